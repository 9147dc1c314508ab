//! The analysis pipeline: rasterise → per-page inference → aggregation.
//!
//! ```text
//! Received ─▶ Validating ─▶ Rasterizing ─▶ PerPageInference ─▶ Aggregating ─▶ Succeeded
//!                 │              │                 │                  │
//!                 └──────────────┴────────┬────────┴──────────────────┘
//!                                         ▼
//!                                       Failed           (cleanup on every exit)
//! ```
//!
//! ## Page order
//!
//! Pages are sent one at a time in ascending page number. The first failing
//! page ends the run; later pages are never requested.
//!
//! ## Cleanup
//!
//! [`analyze`] owns the uploaded PDF and the per-request [`Workspace`] for
//! the whole run and releases both after the stages return, whatever the
//! outcome. The stages themselves never clean up.

use crate::config::PipelineConfig;
use crate::error::PipelineError;
use crate::output::{AnalysisOutput, FinalResult, PageExtraction, PageResult};
use crate::pipeline::encode;
use crate::pipeline::input::{SourcePdf, Workspace};
use crate::pipeline::llm::{ChatMessage, CompletionGateway, ContentPart, SchemaSpec};
use crate::pipeline::parse::{parse_model_json, ParseOutcome};
use crate::pipeline::render::{ExternalRasterizer, Rasterize, RasterizedPage};
use crate::prompts;
use crate::provider::{ChatTransport, OpenAiClient};
use crate::request::{AnalysisForm, AnalysisRequest};
use serde_json::Value;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

/// Schema name sent with page-level structured output.
const PAGE_SCHEMA_NAME: &str = "page_extraction";
/// Schema name sent with final structured output.
const FINAL_SCHEMA_NAME: &str = "final_result";

/// Validate a form and run the full pipeline on it.
///
/// This is the primary entry point for the library.
///
/// # Errors
/// Validation errors are returned before any rasterisation; the uploaded
/// file is deleted in that case too. See [`PipelineError`] for the rest.
pub async fn analyze(
    form: AnalysisForm,
    config: &PipelineConfig,
) -> Result<AnalysisOutput, PipelineError> {
    let request = match form.validate().await {
        Ok(r) => r,
        Err(e) => {
            warn!("Request rejected: {}", e);
            return Err(e);
        }
    };
    analyze_request(request, config).await
}

/// Run the pipeline on an already-validated request.
pub async fn analyze_request(
    request: AnalysisRequest,
    config: &PipelineConfig,
) -> Result<AnalysisOutput, PipelineError> {
    let start = Instant::now();
    let AnalysisRequest {
        pdf,
        page_prompt,
        final_prompt,
        page_schema,
        final_schema,
        max_pages,
    } = request;
    info!("Starting analysis: {}", pdf.path().display());

    let job = Job {
        config,
        pdf: &pdf,
        page_prompt: &page_prompt,
        final_prompt: &final_prompt,
        page_schema: page_schema.map(|s| SchemaSpec::new(PAGE_SCHEMA_NAME, s)),
        final_schema: final_schema.map(|s| SchemaSpec::new(FINAL_SCHEMA_NAME, s)),
        page_limit: config.effective_page_limit(max_pages),
    };

    let mut workspace = Workspace::new(&config.work_dir);
    let outcome = job.run(&mut workspace, start).await;

    workspace.cleanup();
    pdf.cleanup();

    match &outcome {
        Ok(out) => info!(
            "Analysis complete: {} pages, {}ms",
            out.pages_processed, out.elapsed_ms
        ),
        Err(e) => warn!("Analysis failed after {}ms: {}", start.elapsed().as_millis(), e),
    }
    outcome
}

/// Convenience wrapper for a caller-owned PDF on disk (never deleted).
pub async fn analyze_file(
    path: impl Into<PathBuf>,
    page_prompt: impl Into<String>,
    config: &PipelineConfig,
) -> Result<AnalysisOutput, PipelineError> {
    let form = AnalysisForm {
        pdf: Some(SourcePdf::Local(path.into())),
        page_prompt: Some(page_prompt.into()),
        ..Default::default()
    };
    analyze(form, config).await
}

/// Synchronous wrapper around [`analyze`].
///
/// Creates a temporary tokio runtime internally.
pub fn analyze_sync(
    form: AnalysisForm,
    config: &PipelineConfig,
) -> Result<AnalysisOutput, PipelineError> {
    tokio::runtime::Runtime::new()
        .map_err(|e| PipelineError::Internal(format!("Failed to create tokio runtime: {}", e)))?
        .block_on(analyze(form, config))
}

/// Borrowed view of one validated request.
struct Job<'a> {
    config: &'a PipelineConfig,
    pdf: &'a SourcePdf,
    page_prompt: &'a str,
    final_prompt: &'a str,
    page_schema: Option<SchemaSpec>,
    final_schema: Option<SchemaSpec>,
    page_limit: Option<usize>,
}

impl Job<'_> {
    /// Run every stage, then report completion exactly once on any exit.
    async fn run(
        &self,
        workspace: &mut Workspace,
        start: Instant,
    ) -> Result<AnalysisOutput, PipelineError> {
        let mut total = 0;
        let outcome = self.stages(workspace, start, &mut total).await;
        if let Some(ref cb) = self.config.progress_callback {
            cb.on_analysis_complete(total, outcome.is_ok());
        }
        outcome
    }

    /// `total` is set once the page count is known and stays 0 before that.
    async fn stages(
        &self,
        workspace: &mut Workspace,
        start: Instant,
        total: &mut usize,
    ) -> Result<AnalysisOutput, PipelineError> {
        let config = self.config;

        // ── Rasterizing ──────────────────────────────────────────────────
        let rasterizer = resolve_rasterizer(config)?;
        let pages_dir = workspace.dir()?.join("pages");
        let mut pages = rasterizer
            .rasterize(self.pdf.path(), &pages_dir, config.dpi)
            .await?;
        let available = pages.len();
        if let Some(limit) = self.page_limit {
            pages.truncate(limit);
        }
        if pages.is_empty() {
            return Err(PipelineError::ConversionProducedNoPages);
        }
        info!(
            "Analysing {} of {} pages (limit: {:?})",
            pages.len(),
            available,
            self.page_limit
        );

        let gateway = CompletionGateway::new(resolve_transport(config)?, config.model.clone());
        *total = pages.len();
        let total = *total;
        if let Some(ref cb) = config.progress_callback {
            cb.on_analysis_start(total);
        }

        // ── PerPageInference ─────────────────────────────────────────────
        let mut extractions = Vec::with_capacity(total);
        for page in &pages {
            if let Some(ref cb) = config.progress_callback {
                cb.on_page_start(page.page_num, total);
            }
            let result = self.extract_page(&gateway, page).await?;
            debug!("Page {}: stored {} result", page.page_num, result.kind());
            if let Some(ref cb) = config.progress_callback {
                cb.on_page_complete(page.page_num, total, result.kind());
            }
            extractions.push(PageExtraction {
                page_num: page.page_num,
                result,
            });
        }

        // ── Aggregating ──────────────────────────────────────────────────
        if let Some(ref cb) = config.progress_callback {
            cb.on_aggregation_start(total);
        }
        let result = self.aggregate(&gateway, &extractions).await?;

        let unparsed = extractions.iter().filter(|e| e.result.is_unparsed()).count();
        let note = (unparsed > 0).then(|| {
            format!("{unparsed} page(s) returned non-JSON output; their raw text was passed to aggregation")
        });

        Ok(AnalysisOutput {
            model: config.model.clone(),
            pages_processed: extractions.len(),
            result,
            elapsed_ms: start.elapsed().as_millis() as u64,
            pages: extractions,
            note,
        })
    }

    /// One page: prompt + image, optional strict-JSON instruction, parse if schema.
    async fn extract_page(
        &self,
        gateway: &CompletionGateway,
        page: &RasterizedPage,
    ) -> Result<PageResult, PipelineError> {
        let page_start = Instant::now();
        let image = encode::encode_image_file(&page.path).await?;

        let mut messages = Vec::with_capacity(2);
        if let Some(ref schema) = self.page_schema {
            messages.push(ChatMessage::system(prompts::page_schema_instruction(
                &schema.schema,
            )));
        }
        messages.push(ChatMessage::user_parts(vec![
            ContentPart::text(self.page_prompt),
            image,
        ]));

        let raw = gateway
            .complete(&messages, self.page_schema.as_ref())
            .await?;
        debug!(
            "Page {}: {} chars in {}ms",
            page.page_num,
            raw.len(),
            page_start.elapsed().as_millis()
        );

        if self.page_schema.is_none() {
            return Ok(PageResult::Text(raw));
        }
        Ok(match parse_model_json(&raw) {
            ParseOutcome::Parsed {
                value,
                from_snippet,
            } => {
                if from_snippet {
                    debug!("Page {}: JSON recovered from surrounding text", page.page_num);
                }
                PageResult::Json(value)
            }
            ParseOutcome::Failed => {
                warn!("Page {}: answer is not JSON, keeping raw text", page.page_num);
                PageResult::Unparsed { raw }
            }
        })
    }

    /// Merge all page results with a single completion.
    async fn aggregate(
        &self,
        gateway: &CompletionGateway,
        extractions: &[PageExtraction],
    ) -> Result<FinalResult, PipelineError> {
        let results: Vec<&PageResult> = extractions.iter().map(|e| &e.result).collect();
        let results_json = serde_json::to_string_pretty(&results)
            .map_err(|e| PipelineError::Internal(format!("serialise page results: {e}")))?;

        let mut messages = Vec::with_capacity(2);
        if let Some(ref schema) = self.final_schema {
            messages.push(ChatMessage::system(prompts::final_schema_instruction(
                &schema.schema,
            )));
        }
        messages.push(ChatMessage::user(prompts::aggregation_text(
            self.final_prompt,
            &results_json,
        )));

        let raw = gateway
            .complete(&messages, self.final_schema.as_ref())
            .await?;

        if self.final_schema.is_none() {
            return Ok(FinalResult::Text(raw));
        }
        match parse_model_json(&raw).into_value() {
            Some(value) => Ok(FinalResult::Json(value)),
            None => Err(PipelineError::AggregationUnparsable { raw }),
        }
    }
}

fn resolve_rasterizer(config: &PipelineConfig) -> Result<Arc<dyn Rasterize>, PipelineError> {
    if let Some(ref rasterizer) = config.rasterizer {
        return Ok(Arc::clone(rasterizer));
    }
    let detected = ExternalRasterizer::detect(config.converter_timeout_secs)?;
    debug!("Using rasterizer {}", detected.kind());
    Ok(Arc::new(detected))
}

/// Injected transport first, otherwise an [`OpenAiClient`] for `base_url`.
pub fn resolve_transport(config: &PipelineConfig) -> Result<Arc<dyn ChatTransport>, PipelineError> {
    if let Some(ref transport) = config.transport {
        return Ok(Arc::clone(transport));
    }
    Ok(Arc::new(OpenAiClient::from_config(config)?))
}

/// Forward a raw chat-completion body, defaulting `model` and disabling streaming.
pub async fn passthrough(
    mut body: Value,
    config: &PipelineConfig,
) -> Result<Value, PipelineError> {
    if let Some(obj) = body.as_object_mut() {
        obj.entry("model")
            .or_insert_with(|| Value::String(config.model.clone()));
        obj.insert("stream".into(), Value::Bool(false));
    }
    resolve_transport(config)?.send(&body).await
}
