//! Progress-callback trait for per-page analysis events.
//!
//! Inject an [`Arc<dyn AnalysisProgressCallback>`] via
//! [`crate::config::PipelineConfigBuilder::progress_callback`] to receive
//! events as the pipeline works through a document. The CLI uses it to drive
//! a terminal progress bar; a service could forward events to a channel.
//!
//! Events for one analysis arrive in page order. One config may serve
//! concurrent analyses, so implementations must be `Send + Sync`.
//!
//! # Example
//!
//! ```rust
//! use pdfvision::{AnalysisProgressCallback, PipelineConfig};
//! use std::sync::{Arc, atomic::{AtomicUsize, Ordering}};
//!
//! struct CountingCallback {
//!     completed: AtomicUsize,
//! }
//!
//! impl AnalysisProgressCallback for CountingCallback {
//!     fn on_page_complete(&self, page_num: usize, total_pages: usize, kind: &str) {
//!         self.completed.fetch_add(1, Ordering::SeqCst);
//!         eprintln!("Page {}/{} done ({})", page_num, total_pages, kind);
//!     }
//! }
//!
//! let counter = Arc::new(CountingCallback { completed: AtomicUsize::new(0) });
//!
//! let config = PipelineConfig::builder()
//!     .progress_callback(counter as Arc<dyn AnalysisProgressCallback>)
//!     .build()
//!     .unwrap();
//! ```

use std::sync::Arc;

/// Called by the pipeline as it processes a document.
///
/// All methods have default no-op implementations so callers only override
/// what they care about.
pub trait AnalysisProgressCallback: Send + Sync {
    /// Called once after rasterisation and page limiting.
    ///
    /// # Arguments
    /// * `total_pages`: number of pages that will be sent to the model
    fn on_analysis_start(&self, total_pages: usize) {
        let _ = total_pages;
    }

    /// Called just before the completion request for a page is sent.
    fn on_page_start(&self, page_num: usize, total_pages: usize) {
        let _ = (page_num, total_pages);
    }

    /// Called when a page result has been stored.
    ///
    /// # Arguments
    /// * `kind`: `"json"`, `"text"` or `"unparsed"`
    fn on_page_complete(&self, page_num: usize, total_pages: usize, kind: &str) {
        let _ = (page_num, total_pages, kind);
    }

    /// Called before the aggregation request is sent.
    fn on_aggregation_start(&self, total_pages: usize) {
        let _ = total_pages;
    }

    /// Called exactly once per validated request, on success or failure.
    ///
    /// # Arguments
    /// * `total_pages`: pages scheduled for inference, `0` if the run failed
    ///   before that was known
    /// * `succeeded`: `false` when any stage failed
    fn on_analysis_complete(&self, total_pages: usize, succeeded: bool) {
        let _ = (total_pages, succeeded);
    }
}

/// A no-op implementation for callers that don't need progress events.
pub struct NoopProgressCallback;

impl AnalysisProgressCallback for NoopProgressCallback {}

/// Convenience alias matching the type stored in [`crate::config::PipelineConfig`].
pub type ProgressCallback = Arc<dyn AnalysisProgressCallback>;
