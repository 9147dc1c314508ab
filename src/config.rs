//! Process-wide configuration for the analysis pipeline.
//!
//! Every knob lives in [`PipelineConfig`], built via its
//! [`PipelineConfigBuilder`]. The config is read-only once built and is
//! shared between concurrent requests as an `Arc<PipelineConfig>`; nothing
//! request-specific is ever stored here.
//!
//! The two I/O seams ([`ChatTransport`] and [`Rasterize`]) can be injected
//! through the config. When they are absent the pipeline builds an
//! [`crate::provider::OpenAiClient`] and detects a rasterizer on `PATH`.

use crate::error::PipelineError;
use crate::pipeline::render::Rasterize;
use crate::progress::ProgressCallback;
use crate::provider::ChatTransport;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

/// Default model used for both page extraction and aggregation.
pub const DEFAULT_MODEL: &str = "gpt-4o-mini";

/// Default OpenAI-compatible API root.
pub const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

/// Configuration for the analysis pipeline.
///
/// # Example
/// ```rust
/// use pdfvision::PipelineConfig;
///
/// let config = PipelineConfig::builder()
///     .dpi(200)
///     .max_pages(10)
///     .model("gpt-4o")
///     .build()
///     .unwrap();
/// assert_eq!(config.max_pages, 10);
/// ```
#[derive(Clone)]
pub struct PipelineConfig {
    /// Chat model identifier sent as `model` on every completion request.
    pub model: String,

    /// API root of the OpenAI-compatible endpoint, without `/chat/completions`.
    pub base_url: String,

    /// Bearer token. `None` sends no `Authorization` header (local servers).
    pub api_key: Option<String>,

    /// Rasterization DPI. Range: 72–400. Default: 150.
    ///
    /// 150 DPI keeps body text legible for vision models while a letter-size
    /// page stays around 1 300 × 1 650 px.
    pub dpi: u32,

    /// Global page limit. `0` means no limit. Default: 0.
    ///
    /// A positive `maxPages` on the request takes precedence over this value.
    pub max_pages: usize,

    /// Include per-page results in responses and log at debug level.
    pub debug: bool,

    /// Root under which per-request workspaces and uploads are created.
    /// Default: the system temp directory.
    pub work_dir: PathBuf,

    /// Per-completion-call timeout in seconds. Default: 120.
    pub api_timeout_secs: u64,

    /// Rasterizer subprocess timeout in seconds. Default: 300.
    pub converter_timeout_secs: u64,

    /// Largest accepted upload in bytes. Default: 50 MiB.
    pub max_upload_bytes: usize,

    /// Pre-constructed completion transport. Takes precedence over `base_url`.
    pub transport: Option<Arc<dyn ChatTransport>>,

    /// Pre-constructed rasterizer. Takes precedence over `PATH` detection.
    pub rasterizer: Option<Arc<dyn Rasterize>>,

    /// Optional progress callback for per-page events.
    pub progress_callback: Option<ProgressCallback>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            model: DEFAULT_MODEL.to_string(),
            base_url: DEFAULT_BASE_URL.to_string(),
            api_key: None,
            dpi: 150,
            max_pages: 0,
            debug: false,
            work_dir: std::env::temp_dir(),
            api_timeout_secs: 120,
            converter_timeout_secs: 300,
            max_upload_bytes: 50 * 1024 * 1024,
            transport: None,
            rasterizer: None,
            progress_callback: None,
        }
    }
}

impl fmt::Debug for PipelineConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PipelineConfig")
            .field("model", &self.model)
            .field("base_url", &self.base_url)
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .field("dpi", &self.dpi)
            .field("max_pages", &self.max_pages)
            .field("debug", &self.debug)
            .field("work_dir", &self.work_dir)
            .field("api_timeout_secs", &self.api_timeout_secs)
            .field("converter_timeout_secs", &self.converter_timeout_secs)
            .field("max_upload_bytes", &self.max_upload_bytes)
            .field("transport", &self.transport.as_ref().map(|_| "<dyn ChatTransport>"))
            .field("rasterizer", &self.rasterizer.as_ref().map(|_| "<dyn Rasterize>"))
            .field(
                "progress_callback",
                &self.progress_callback.as_ref().map(|_| "<callback>"),
            )
            .finish()
    }
}

impl PipelineConfig {
    /// Create a new builder for `PipelineConfig`.
    pub fn builder() -> PipelineConfigBuilder {
        PipelineConfigBuilder {
            config: Self::default(),
        }
    }

    /// The page limit applied to a request.
    ///
    /// A positive request-level limit wins; otherwise a positive global limit
    /// applies; otherwise pages are not limited.
    pub fn effective_page_limit(&self, requested: Option<usize>) -> Option<usize> {
        match requested {
            Some(n) if n > 0 => Some(n),
            _ if self.max_pages > 0 => Some(self.max_pages),
            _ => None,
        }
    }
}

/// Builder for [`PipelineConfig`].
pub struct PipelineConfigBuilder {
    config: PipelineConfig,
}

impl fmt::Debug for PipelineConfigBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PipelineConfigBuilder")
            .field("config", &self.config)
            .finish()
    }
}

impl PipelineConfigBuilder {
    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.config.model = model.into();
        self
    }

    pub fn base_url(mut self, url: impl Into<String>) -> Self {
        self.config.base_url = url.into().trim_end_matches('/').to_string();
        self
    }

    pub fn api_key(mut self, key: impl Into<String>) -> Self {
        let key = key.into();
        self.config.api_key = if key.is_empty() { None } else { Some(key) };
        self
    }

    pub fn dpi(mut self, dpi: u32) -> Self {
        self.config.dpi = dpi.clamp(72, 400);
        self
    }

    pub fn max_pages(mut self, n: usize) -> Self {
        self.config.max_pages = n;
        self
    }

    pub fn debug(mut self, v: bool) -> Self {
        self.config.debug = v;
        self
    }

    pub fn work_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.work_dir = dir.into();
        self
    }

    pub fn api_timeout_secs(mut self, secs: u64) -> Self {
        self.config.api_timeout_secs = secs.max(1);
        self
    }

    pub fn converter_timeout_secs(mut self, secs: u64) -> Self {
        self.config.converter_timeout_secs = secs.max(1);
        self
    }

    pub fn max_upload_bytes(mut self, bytes: usize) -> Self {
        self.config.max_upload_bytes = bytes;
        self
    }

    pub fn transport(mut self, transport: Arc<dyn ChatTransport>) -> Self {
        self.config.transport = Some(transport);
        self
    }

    pub fn rasterizer(mut self, rasterizer: Arc<dyn Rasterize>) -> Self {
        self.config.rasterizer = Some(rasterizer);
        self
    }

    pub fn progress_callback(mut self, cb: ProgressCallback) -> Self {
        self.config.progress_callback = Some(cb);
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<PipelineConfig, PipelineError> {
        let c = &self.config;
        if c.model.trim().is_empty() {
            return Err(PipelineError::InvalidConfig("model must not be empty".into()));
        }
        if c.transport.is_none() && !is_http_url(&c.base_url) {
            return Err(PipelineError::InvalidConfig(format!(
                "base URL must start with http:// or https://, got '{}'",
                c.base_url
            )));
        }
        if c.max_upload_bytes == 0 {
            return Err(PipelineError::InvalidConfig(
                "max upload size must be ≥ 1 byte".into(),
            ));
        }
        Ok(self.config)
    }
}

fn is_http_url(s: &str) -> bool {
    s.starts_with("http://") || s.starts_with("https://")
}
