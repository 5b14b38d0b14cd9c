//! Progress-callback trait for per-stage extraction events.
//!
//! Inject an [`Arc<dyn ExtractionProgressCallback>`] via
//! [`crate::config::ExtractionConfigBuilder::progress_callback`] to receive
//! events as the pipeline moves a document through its stages. The CLI uses
//! this to drive a spinner; a server could forward events to a log sink.
//!
//! # Example
//!
//! ```rust
//! use receipt2json::{ExtractionConfig, ExtractionProgressCallback, Stage};
//! use std::sync::{Arc, atomic::{AtomicUsize, Ordering}};
//! use std::time::Duration;
//!
//! struct CountingCallback {
//!     completed: AtomicUsize,
//! }
//!
//! impl ExtractionProgressCallback for CountingCallback {
//!     fn on_stage_complete(&self, stage: Stage, elapsed: Duration) {
//!         self.completed.fetch_add(1, Ordering::SeqCst);
//!         eprintln!("{stage} done in {elapsed:?}");
//!     }
//! }
//!
//! let counter = Arc::new(CountingCallback { completed: AtomicUsize::new(0) });
//!
//! let config = ExtractionConfig::builder()
//!     .progress_callback(counter as Arc<dyn ExtractionProgressCallback>)
//!     .build()
//!     .unwrap();
//! ```

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// A pipeline stage that reports progress.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    /// Decode and downsample the uploaded image.
    Normalize,
    /// Run OCR over the normalized image.
    Recognize,
    /// Call the language model.
    Extract,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Normalize => "normalize",
            Stage::Recognize => "recognize",
            Stage::Extract => "extract",
        };
        f.write_str(name)
    }
}

/// Called by the pipeline as it processes a document.
///
/// Implementations must be `Send + Sync`; one callback may observe several
/// concurrent requests. All methods default to no-ops.
pub trait ExtractionProgressCallback: Send + Sync {
    /// Called just before `stage` starts.
    fn on_stage_start(&self, stage: Stage) {
        let _ = stage;
    }

    /// Called when `stage` finished successfully.
    fn on_stage_complete(&self, stage: Stage, elapsed: Duration) {
        let _ = (stage, elapsed);
    }

    /// Called when the language model failed and the fallback record was
    /// produced instead.
    fn on_fallback(&self, reason: &str) {
        let _ = reason;
    }
}

/// A no-op implementation for callers that don't need progress events.
pub struct NoopProgressCallback;

impl ExtractionProgressCallback for NoopProgressCallback {}

/// Convenience alias matching the type stored in [`crate::config::ExtractionConfig`].
pub type ProgressCallback = Arc<dyn ExtractionProgressCallback>;
