//! Error types for the pdfvision library.
//!
//! Every fatal outcome of an analysis is a [`PipelineError`]. Page-level
//! parse failures are *not* errors: they are recorded as
//! [`crate::output::PageResult::Unparsed`] and flow into aggregation.
//!
//! Errors are grouped by the pipeline stage that raises them. The HTTP layer
//! never matches on individual variants; it asks [`PipelineError::class`] and
//! maps the resulting [`ErrorClass`] to a status code.

use std::path::PathBuf;
use thiserror::Error;

/// All fatal errors returned by the pdfvision library.
#[derive(Debug, Error)]
pub enum PipelineError {
    // ── Validation errors ─────────────────────────────────────────────────
    /// No PDF was attached to the request.
    #[error("No PDF file uploaded (expected a multipart file field named 'file')")]
    MissingPdf,

    /// No `%PDF-` header in the first 1024 bytes of the upload.
    #[error("Uploaded file is not a PDF (no %PDF- header in the first 1024 bytes)\nFirst bytes: {magic:?}")]
    NotAPdf { magic: Vec<u8> },

    /// `pagePrompt` (or its legacy alias `prompt`) is missing or blank.
    #[error("pagePrompt is required and must not be empty")]
    MissingPagePrompt,

    /// A schema field was supplied but is not valid JSON.
    #[error("{field} is not valid JSON: {reason}")]
    InvalidSchema { field: &'static str, reason: String },

    // ── Rasterization errors ──────────────────────────────────────────────
    /// None of the supported rasterizers is installed.
    #[error(
        "No PDF rasterizer found on PATH (looked for pdftoppm, magick, gm).\n\
Install one of:\n\
  • poppler-utils  (pdftoppm, recommended)\n\
  • ImageMagick 7  (magick)\n\
  • GraphicsMagick (gm)"
    )]
    NoConverterAvailable,

    /// The rasterizer could not be spawned or exited unsuccessfully.
    #[error(
        "Rasterizer '{tool}' failed (exit code {code:?}): {detail}\n\
Check that the PDF is readable; magick and gm also need Ghostscript installed."
    )]
    RasterizationFailed {
        tool: String,
        code: Option<i32>,
        detail: String,
    },

    /// The rasterizer did not finish within the configured timeout.
    #[error("Rasterizer '{tool}' timed out after {secs}s\nIncrease --converter-timeout.")]
    RasterizationTimeout { tool: String, secs: u64 },

    /// Rasterization succeeded but no page images were produced.
    #[error("PDF conversion produced no pages")]
    ConversionProducedNoPages,

    // ── Completion errors ─────────────────────────────────────────────────
    /// The completion endpoint returned an error or could not be reached.
    #[error("Completion request failed{}: {message}", status_suffix(.status))]
    CompletionFailed {
        status: Option<u16>,
        message: String,
    },

    /// The completion endpoint did not answer within the configured timeout.
    #[error("Completion request timed out after {secs}s\nIncrease --api-timeout.")]
    CompletionTimeout { secs: u64 },

    /// A final schema was demanded but the model's answer is not JSON.
    #[error("Final aggregation returned non-JSON output")]
    AggregationUnparsable { raw: String },

    // ── I/O errors ────────────────────────────────────────────────────────
    /// Reading or writing a working file failed.
    #[error("I/O error on '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // ── Config errors ─────────────────────────────────────────────────────
    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

fn status_suffix(status: &Option<u16>) -> String {
    status.map(|s| format!(" (HTTP {s})")).unwrap_or_default()
}

/// Coarse classification of a [`PipelineError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// The request itself is malformed. Client error.
    Validation,
    /// The PDF could be read but yielded nothing to analyse.
    EmptyDocument,
    /// The host is missing a tool or the tool misbehaved.
    Environment,
    /// The completion endpoint failed.
    Upstream,
    /// The model ignored a final schema.
    UnparsableAggregation,
    /// A subprocess or upstream call ran out of time.
    Timeout,
    /// Anything else.
    Internal,
}

impl PipelineError {
    /// Classify the error for status mapping and logging.
    pub fn class(&self) -> ErrorClass {
        match self {
            Self::MissingPdf
            | Self::NotAPdf { .. }
            | Self::MissingPagePrompt
            | Self::InvalidSchema { .. } => ErrorClass::Validation,
            Self::ConversionProducedNoPages => ErrorClass::EmptyDocument,
            Self::NoConverterAvailable | Self::RasterizationFailed { .. } => {
                ErrorClass::Environment
            }
            Self::CompletionFailed { .. } => ErrorClass::Upstream,
            Self::AggregationUnparsable { .. } => ErrorClass::UnparsableAggregation,
            Self::RasterizationTimeout { .. } | Self::CompletionTimeout { .. } => {
                ErrorClass::Timeout
            }
            Self::Io { .. } | Self::InvalidConfig(_) | Self::Internal(_) => ErrorClass::Internal,
        }
    }

    /// Raw model output attached to the error, if any.
    pub fn raw_output(&self) -> Option<&str> {
        match self {
            Self::AggregationUnparsable { raw } => Some(raw),
            _ => None,
        }
    }

    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}
