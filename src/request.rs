//! Analysis requests: raw form fields in, validated request out.
//!
//! [`AnalysisForm`] collects whatever the caller sent (multipart fields in
//! the service, flags in the CLI). [`AnalysisForm::validate`] turns it into
//! an [`AnalysisRequest`] or rejects it before any rasterisation happens.
//! A rejected form drops its [`SourcePdf`], which deletes an uploaded file.

use crate::error::PipelineError;
use crate::pipeline::input::SourcePdf;
use crate::prompts::DEFAULT_FINAL_PROMPT;
use serde_json::Value;
use tokio::io::AsyncReadExt;
use tracing::{debug, warn};

/// Raw, unvalidated request fields.
#[derive(Debug, Default)]
pub struct AnalysisForm {
    pub pdf: Option<SourcePdf>,
    pub page_prompt: Option<String>,
    /// Legacy alias of `page_prompt` (`prompt` form field).
    pub legacy_prompt: Option<String>,
    pub final_prompt: Option<String>,
    pub page_schema: Option<String>,
    /// Legacy alias of `page_schema` (`schema` form field).
    pub legacy_schema: Option<String>,
    pub final_schema: Option<String>,
    pub max_pages: Option<String>,
}

/// Bytes scanned for the `%PDF-` header.
const HEADER_SCAN_BYTES: u64 = 1024;

/// A request that passed validation.
#[derive(Debug)]
pub struct AnalysisRequest {
    pub pdf: SourcePdf,
    pub page_prompt: String,
    pub final_prompt: String,
    pub page_schema: Option<Value>,
    pub final_schema: Option<Value>,
    /// Request-level page limit; `None` when unset or not a positive integer.
    pub max_pages: Option<usize>,
}

impl AnalysisForm {
    /// Store a text field by its form name. Returns `false` for unknown names.
    pub fn set_field(&mut self, name: &str, value: String) -> bool {
        let slot = match name {
            "pagePrompt" => &mut self.page_prompt,
            "prompt" => &mut self.legacy_prompt,
            "finalPrompt" => &mut self.final_prompt,
            "pageSchema" => &mut self.page_schema,
            "schema" => &mut self.legacy_schema,
            "finalSchema" => &mut self.final_schema,
            "maxPages" => &mut self.max_pages,
            _ => return false,
        };
        *slot = Some(value);
        true
    }

    /// Validate the form.
    ///
    /// Checks, in order: PDF present, `pagePrompt` non-blank, schemas are
    /// JSON, `%PDF-` header within the first 1024 bytes. A `maxPages` that
    /// is not a positive integer is ignored so the global limit applies.
    pub async fn validate(self) -> Result<AnalysisRequest, PipelineError> {
        let pdf = self.pdf.ok_or(PipelineError::MissingPdf)?;

        let page_prompt = non_blank(self.page_prompt)
            .or_else(|| non_blank(self.legacy_prompt))
            .ok_or(PipelineError::MissingPagePrompt)?;

        let page_schema_raw = non_blank(self.page_schema).or_else(|| non_blank(self.legacy_schema));
        let page_schema = parse_schema("pageSchema", page_schema_raw)?;
        let final_schema = parse_schema("finalSchema", non_blank(self.final_schema))?;

        let max_pages = non_blank(self.max_pages).and_then(|raw| match raw.trim().parse::<usize>() {
            Ok(n) if n > 0 => Some(n),
            _ => {
                warn!("Ignoring maxPages '{}': not a positive integer", raw.trim());
                None
            }
        });

        check_pdf_header(&pdf).await?;

        let final_prompt = non_blank(self.final_prompt)
            .unwrap_or_else(|| DEFAULT_FINAL_PROMPT.to_string());

        debug!(
            "Validated request: page schema={}, final schema={}, maxPages={:?}",
            page_schema.is_some(),
            final_schema.is_some(),
            max_pages
        );

        Ok(AnalysisRequest {
            pdf,
            page_prompt,
            final_prompt,
            page_schema,
            final_schema,
            max_pages,
        })
    }
}

fn non_blank(s: Option<String>) -> Option<String> {
    s.filter(|v| !v.trim().is_empty())
}

fn parse_schema(field: &'static str, raw: Option<String>) -> Result<Option<Value>, PipelineError> {
    raw.map(|s| {
        serde_json::from_str(&s).map_err(|e| PipelineError::InvalidSchema {
            field,
            reason: e.to_string(),
        })
    })
    .transpose()
}

/// Accepts a `%PDF-` header anywhere in the first [`HEADER_SCAN_BYTES`],
/// so BOMs and leading whitespace or junk pass like they do in PDF readers.
async fn check_pdf_header(pdf: &SourcePdf) -> Result<(), PipelineError> {
    let path = pdf.path();
    let mut file = tokio::fs::File::open(path)
        .await
        .map_err(|e| PipelineError::io(path, e))?;

    let mut head = Vec::with_capacity(HEADER_SCAN_BYTES as usize);
    (&mut file)
        .take(HEADER_SCAN_BYTES)
        .read_to_end(&mut head)
        .await
        .map_err(|e| PipelineError::io(path, e))?;

    if !head.windows(5).any(|w| w == b"%PDF-") {
        head.truncate(8);
        return Err(PipelineError::NotAPdf { magic: head });
    }
    Ok(())
}
