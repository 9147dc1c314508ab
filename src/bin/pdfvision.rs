//! CLI binary for pdfvision.
//!
//! `serve` runs the HTTP service, `analyze` runs one document from disk and
//! `detect` reports which rasterizer would be used.

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use pdfvision::pipeline::converter;
use pdfvision::{
    analyze, AnalysisForm, AnalysisProgressCallback, FinalResult, PipelineConfig,
    ProgressCallback, SourcePdf,
};
use std::collections::HashMap;
use std::io::{self, Write};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tracing_subscriber::EnvFilter;

// ── ANSI colour helpers ──────────────────────────────────────────────────────

fn green(s: &str) -> String {
    format!("\x1b[32m{s}\x1b[0m")
}
fn red(s: &str) -> String {
    format!("\x1b[31m{s}\x1b[0m")
}
fn dim(s: &str) -> String {
    format!("\x1b[2m{s}\x1b[0m")
}
fn bold(s: &str) -> String {
    format!("\x1b[1m{s}\x1b[0m")
}
fn cyan(s: &str) -> String {
    format!("\x1b[36m{s}\x1b[0m")
}

const TICKS: &[&str] = &["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"];

// ── CLI progress callback using indicatif ────────────────────────────────────

/// Spinner while rasterising, then a page bar, then a spinner for aggregation.
struct CliProgressCallback {
    bar: ProgressBar,
    start_times: Mutex<HashMap<usize, Instant>>,
}

impl CliProgressCallback {
    fn new() -> Arc<Self> {
        let bar = ProgressBar::new(0);
        let spinner_style = ProgressStyle::with_template("{spinner:.cyan} {prefix:.bold}  {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_strings(TICKS);
        bar.set_style(spinner_style);
        bar.set_prefix("Preparing");
        bar.set_message("Rasterising PDF…");
        bar.enable_steady_tick(Duration::from_millis(80));

        Arc::new(Self {
            bar,
            start_times: Mutex::new(HashMap::new()),
        })
    }

    fn elapsed_secs(&self, page_num: usize) -> f64 {
        self.start_times
            .lock()
            .ok()
            .and_then(|mut m| m.remove(&page_num))
            .map(|t| t.elapsed().as_secs_f64())
            .unwrap_or(0.0)
    }
}

impl AnalysisProgressCallback for CliProgressCallback {
    fn on_analysis_start(&self, total_pages: usize) {
        let style = ProgressStyle::with_template(
            "{spinner:.cyan} {prefix:.bold}  \
             [{bar:42.green/238}] {pos:>3}/{len} pages  \
             ⏱ {elapsed_precise}  ETA {eta_precise}",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("█▉▊▋▌▍▎▏  ")
        .tick_strings(TICKS);

        self.bar.set_length(total_pages as u64);
        self.bar.set_style(style);
        self.bar.set_prefix("Analysing");
        self.bar.reset_eta();
        self.bar.println(format!(
            "{} {}",
            cyan("◆"),
            bold(&format!("Analysing {total_pages} pages…"))
        ));
    }

    fn on_page_start(&self, page_num: usize, _total_pages: usize) {
        if let Ok(mut m) = self.start_times.lock() {
            m.insert(page_num, Instant::now());
        }
        self.bar.set_message(format!("page {page_num}"));
    }

    fn on_page_complete(&self, page_num: usize, total_pages: usize, kind: &str) {
        let secs = self.elapsed_secs(page_num);
        let mark = if kind == "unparsed" {
            cyan("⚠")
        } else {
            green("✓")
        };
        self.bar.println(format!(
            "  {} Page {:>3}/{:<3}  {:<8}  {}",
            mark,
            page_num,
            total_pages,
            dim(kind),
            dim(&format!("{secs:.1}s")),
        ));
        self.bar.inc(1);
    }

    fn on_aggregation_start(&self, _total_pages: usize) {
        let style = ProgressStyle::with_template("{spinner:.cyan} {prefix:.bold}  {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_strings(TICKS);
        self.bar.set_style(style);
        self.bar.set_prefix("Aggregating");
        self.bar.set_message("merging page results…");
    }

    fn on_analysis_complete(&self, total_pages: usize, succeeded: bool) {
        self.bar.finish_and_clear();
        if succeeded {
            eprintln!("{} {} pages analysed", green("✔"), bold(&total_pages.to_string()));
        } else {
            eprintln!("{} analysis failed", red("✘"));
        }
    }
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # Run the HTTP service (default 0.0.0.0:3000)
  pdfvision serve --bind 127.0.0.1:8080

  # Analyse a local PDF, free-text answer on stdout
  pdfvision analyze invoice.pdf --prompt "List every line item"

  # Structured extraction with schemas, first 3 pages only
  pdfvision analyze invoice.pdf --prompt "Extract line items" \
      --page-schema page.json --final-schema total.json --max-pages 3 --json

  # Which rasterizer will be used?
  pdfvision detect

ENVIRONMENT VARIABLES:
  OPENAI_API_KEY        API key sent as a bearer token
  OPENAI_BASE_URL       OpenAI-compatible base URL (default https://api.openai.com/v1)
  PDFVISION_MODEL       Chat model (default gpt-4o-mini)
  PDFVISION_MAX_PAGES   Global page limit, 0 = unlimited
  PDFVISION_DEBUG       Per-page results in responses, debug logging
  RUST_LOG              Log filter, overrides --verbose

EXTERNAL TOOLS (first found wins):
  pdftoppm   poppler-utils
  magick     ImageMagick 7
  gm         GraphicsMagick
"#;

/// Extract structured data from PDFs with multimodal chat models.
#[derive(Parser, Debug)]
#[command(
    name = "pdfvision",
    version,
    about = "Extract structured data from PDFs with multimodal chat models",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, global = true, env = "PDFVISION_VERBOSE")]
    verbose: bool,

    /// Suppress all output except errors.
    #[arg(short, long, global = true, env = "PDFVISION_QUIET")]
    quiet: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the HTTP service.
    Serve {
        /// Address to listen on.
        #[arg(long, env = "PDFVISION_BIND", default_value = "0.0.0.0:3000")]
        bind: SocketAddr,

        #[command(flatten)]
        pipeline: PipelineArgs,
    },

    /// Analyse one PDF from disk.
    Analyze(AnalyzeArgs),

    /// Report the rasterizer that would be used.
    Detect,
}

/// Settings shared by `serve` and `analyze`.
#[derive(Args, Debug)]
struct PipelineArgs {
    /// Chat model ID.
    #[arg(long, env = "PDFVISION_MODEL", default_value = pdfvision::config::DEFAULT_MODEL)]
    model: String,

    /// OpenAI-compatible base URL.
    #[arg(long, env = "OPENAI_BASE_URL", default_value = pdfvision::config::DEFAULT_BASE_URL)]
    base_url: String,

    /// API key.
    #[arg(long, env = "OPENAI_API_KEY", hide_env_values = true)]
    api_key: Option<String>,

    /// Rasterisation DPI (72–400).
    #[arg(long, env = "PDFVISION_DPI", default_value_t = 150,
          value_parser = clap::value_parser!(u32).range(72..=400))]
    dpi: u32,

    /// Global page limit, 0 = unlimited. A request's own maxPages wins.
    #[arg(long = "global-max-pages", env = "PDFVISION_MAX_PAGES", default_value_t = 0)]
    global_max_pages: usize,

    /// Include per-page results in the response.
    #[arg(long, env = "PDFVISION_DEBUG")]
    debug: bool,

    /// Directory for uploads and page images.
    #[arg(long, env = "PDFVISION_WORK_DIR")]
    work_dir: Option<PathBuf>,

    /// Per-request completion timeout in seconds.
    #[arg(long, env = "PDFVISION_API_TIMEOUT", default_value_t = 120)]
    api_timeout: u64,

    /// Rasterizer timeout in seconds.
    #[arg(long, env = "PDFVISION_CONVERTER_TIMEOUT", default_value_t = 300)]
    converter_timeout: u64,

    /// Maximum upload size in bytes.
    #[arg(long, env = "PDFVISION_MAX_UPLOAD_BYTES", default_value_t = 50 * 1024 * 1024)]
    max_upload_bytes: usize,
}

#[derive(Args, Debug)]
struct AnalyzeArgs {
    /// PDF file to analyse.
    input: PathBuf,

    /// Instruction sent with every page image.
    #[arg(short, long)]
    prompt: String,

    /// Instruction for the aggregation step.
    #[arg(long)]
    final_prompt: Option<String>,

    /// JSON schema file for per-page answers.
    #[arg(long)]
    page_schema: Option<PathBuf>,

    /// JSON schema file for the final answer.
    #[arg(long)]
    final_schema: Option<PathBuf>,

    /// Analyse at most this many pages.
    #[arg(long)]
    max_pages: Option<usize>,

    /// Print the full response body as JSON.
    #[arg(long)]
    json: bool,

    /// Write the result to this file instead of stdout.
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Disable progress bar.
    #[arg(long, env = "PDFVISION_NO_PROGRESS")]
    no_progress: bool,

    #[command(flatten)]
    pipeline: PipelineArgs,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    // The progress bar replaces INFO logs during an interactive analyze.
    let (show_progress, debug) = match cli.command {
        Command::Analyze(ref a) => (!cli.quiet && !a.no_progress && !a.json, a.pipeline.debug),
        Command::Serve { ref pipeline, .. } => (false, pipeline.debug),
        Command::Detect => (false, false),
    };
    let filter = if cli.verbose || debug {
        "debug"
    } else if cli.quiet || show_progress {
        "error"
    } else {
        "info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_writer(io::stderr)
        .init();

    match cli.command {
        Command::Detect => run_detect(),
        Command::Serve { bind, pipeline } => {
            let config = build_config(&pipeline, None)?;
            pdfvision::server::serve(config, bind)
                .await
                .context("HTTP service failed")
        }
        Command::Analyze(args) => run_analyze(args, show_progress, cli.quiet).await,
    }
}

fn run_detect() -> Result<()> {
    match converter::detect_program() {
        Some(found) => {
            println!("{}  {}", found.kind, dim(&found.program.display().to_string()));
            Ok(())
        }
        None => anyhow::bail!(pdfvision::PipelineError::NoConverterAvailable),
    }
}

async fn run_analyze(args: AnalyzeArgs, show_progress: bool, quiet: bool) -> Result<()> {
    let progress: Option<ProgressCallback> = if show_progress {
        Some(CliProgressCallback::new() as Arc<dyn AnalysisProgressCallback>)
    } else {
        None
    };
    let config = build_config(&args.pipeline, progress)?;

    let mut form = AnalysisForm {
        pdf: Some(SourcePdf::Local(args.input.clone())),
        page_prompt: Some(args.prompt.clone()),
        final_prompt: args.final_prompt.clone(),
        max_pages: args.max_pages.map(|n| n.to_string()),
        ..Default::default()
    };
    if let Some(ref path) = args.page_schema {
        form.page_schema = Some(read_schema(path).await?);
    }
    if let Some(ref path) = args.final_schema {
        form.final_schema = Some(read_schema(path).await?);
    }

    let output = analyze(form, &config)
        .await
        .with_context(|| format!("Analysis of {} failed", args.input.display()))?;

    let rendered = if args.json {
        serde_json::to_string_pretty(&output.to_response(config.debug))
            .context("Failed to serialise output")?
    } else {
        match output.result {
            FinalResult::Json(ref value) => {
                serde_json::to_string_pretty(value).context("Failed to serialise result")?
            }
            FinalResult::Text(ref text) => text.clone(),
        }
    };

    if let Some(ref path) = args.output {
        tokio::fs::write(path, rendered.as_bytes())
            .await
            .with_context(|| format!("Failed to write {}", path.display()))?;
    } else {
        let stdout = io::stdout();
        let mut handle = stdout.lock();
        handle
            .write_all(rendered.as_bytes())
            .context("Failed to write to stdout")?;
        if !rendered.ends_with('\n') {
            handle.write_all(b"\n").ok();
        }
    }

    if !quiet && !args.json {
        if let Some(ref note) = output.note {
            eprintln!("{} {}", cyan("⚠"), note);
        }
        eprintln!(
            "   {} pages  —  {}ms  —  {}",
            output.pages_processed,
            output.elapsed_ms,
            dim(&output.model)
        );
    }
    Ok(())
}

async fn read_schema(path: &Path) -> Result<String> {
    tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("Failed to read schema from {}", path.display()))
}

/// Map CLI args to `PipelineConfig`.
fn build_config(args: &PipelineArgs, progress: Option<ProgressCallback>) -> Result<PipelineConfig> {
    let mut builder = PipelineConfig::builder()
        .model(&args.model)
        .base_url(&args.base_url)
        .dpi(args.dpi)
        .max_pages(args.global_max_pages)
        .debug(args.debug)
        .api_timeout_secs(args.api_timeout)
        .converter_timeout_secs(args.converter_timeout)
        .max_upload_bytes(args.max_upload_bytes);

    if let Some(ref key) = args.api_key {
        builder = builder.api_key(key);
    }
    if let Some(ref dir) = args.work_dir {
        builder = builder.work_dir(dir);
    }
    if let Some(cb) = progress {
        builder = builder.progress_callback(cb);
    }

    builder.build().context("Invalid configuration")
}
