//! # pdfvision
//!
//! Extract structured data from PDF documents with multimodal chat models.
//!
//! Each page is rasterised to a PNG by an installed command-line converter,
//! sent to an OpenAI-compatible chat-completion endpoint together with a
//! caller-supplied prompt, and the per-page answers are merged by one final
//! aggregation request. Optional JSON schemas turn either step into strict
//! structured output.
//!
//! ## Pipeline Overview
//!
//! ```text
//! PDF upload
//!  │
//!  ├─ 1. Validate   prompt present, schemas parse, file starts with %PDF
//!  ├─ 2. Rasterize  pdftoppm → magick → gm, first one installed wins
//!  ├─ 3. Pages      one chat request per page, in order (image + prompt)
//!  ├─ 4. Aggregate  one chat request over all page results
//!  └─ 5. Cleanup    upload and workspace removed on every exit path
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use pdfvision::{analyze_file, FinalResult, PipelineConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     // api key from OPENAI_API_KEY, model defaults to gpt-4o-mini
//!     let config = PipelineConfig::builder()
//!         .api_key(std::env::var("OPENAI_API_KEY").unwrap_or_default())
//!         .build()?;
//!     let output = analyze_file("invoice.pdf", "List every line item", &config).await?;
//!     if let FinalResult::Text(text) = output.result {
//!         println!("{text}");
//!     }
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature  | Default | Description |
//! |----------|---------|-------------|
//! | `server` | via cli | axum HTTP service ([`server`]) |
//! | `cli`    | on      | `pdfvision` binary (clap + anyhow + tracing-subscriber + indicatif) |
//!
//! Library only:
//! ```toml
//! pdfvision = { version = "0.1", default-features = false }
//! ```
//!
//! ## External tools
//!
//! One of `pdftoppm` (poppler-utils), `magick` (ImageMagick 7) or `gm`
//! (GraphicsMagick) must be on `PATH`. `pdfvision detect` reports which one
//! will be used.

// ── Modules ──────────────────────────────────────────────────────────────

pub mod analyze;
pub mod config;
pub mod error;
pub mod output;
pub mod pipeline;
pub mod progress;
pub mod prompts;
pub mod provider;
pub mod request;
#[cfg(feature = "server")]
pub mod server;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use analyze::{analyze, analyze_file, analyze_request, analyze_sync, passthrough};
pub use config::{PipelineConfig, PipelineConfigBuilder};
pub use error::{ErrorClass, PipelineError};
pub use output::{AnalysisOutput, FinalResult, PageExtraction, PageResult};
pub use pipeline::converter::{ConverterKind, DetectedConverter};
pub use pipeline::input::SourcePdf;
pub use pipeline::render::{ExternalRasterizer, Rasterize, RasterizedPage};
pub use progress::{AnalysisProgressCallback, NoopProgressCallback, ProgressCallback};
pub use provider::{ChatTransport, OpenAiClient};
pub use request::{AnalysisForm, AnalysisRequest};
