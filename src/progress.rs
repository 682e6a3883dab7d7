//! Progress-callback trait for workflow stage and poll-tick events.
//!
//! Inject an [`Arc<dyn WorkflowProgressCallback>`] via
//! [`crate::config::ClientConfigBuilder::progress_callback`] to receive
//! events as the run moves through its stages.
//!
//! # Why callbacks instead of printing?
//!
//! The library must not own the terminal. The CLI renders events as an
//! indicatif spinner; tests count them; an embedding application can forward
//! them anywhere. The trait is `Send + Sync` so it can be shared with the
//! concurrent status queries of a poll tick.
//!
//! # Example
//!
//! ```rust
//! use docsvc_client::{ClientConfig, Stage, WorkflowProgressCallback};
//! use std::sync::Arc;
//!
//! struct StageLogger;
//!
//! impl WorkflowProgressCallback for StageLogger {
//!     fn on_stage_start(&self, stage: Stage) {
//!         eprintln!("[{}] {stage}…", stage.number());
//!     }
//! }
//!
//! let config = ClientConfig::builder()
//!     .progress_callback(Arc::new(StageLogger))
//!     .build()
//!     .unwrap();
//! ```

use crate::error::Stage;
use std::sync::Arc;
use std::time::Duration;

/// Called by the workflow as it moves through its stages.
///
/// All methods have default no-op implementations so callers only override
/// what they care about.
pub trait WorkflowProgressCallback: Send + Sync {
    /// Called before a stage is attempted.
    fn on_stage_start(&self, stage: Stage) {
        let _ = stage;
    }

    /// Called when a stage finished successfully.
    ///
    /// # Arguments
    /// * `detail` — short human-readable summary (case id, file count, …)
    fn on_stage_complete(&self, stage: Stage, detail: &str) {
        let _ = (stage, detail);
    }

    /// Called when a stage failed or degraded.
    ///
    /// # Arguments
    /// * `fatal` — `true` when the run aborts here
    fn on_stage_failed(&self, stage: Stage, error: &str, fatal: bool) {
        let _ = (stage, error, fatal);
    }

    /// Called once per upload, after the file was accepted.
    ///
    /// # Arguments
    /// * `index` — 1-based position in the input list
    fn on_file_uploaded(&self, index: usize, total: usize, file_name: &str) {
        let _ = (index, total, file_name);
    }

    /// Called after every poll tick.
    ///
    /// # Arguments
    /// * `attempt` — 1-based refresh count
    /// * `elapsed` — time since the loop was entered
    /// * `summary` — strategy-specific status line (e.g. "2/3 runs terminal")
    fn on_poll_tick(&self, attempt: u32, elapsed: Duration, summary: &str) {
        let _ = (attempt, elapsed, summary);
    }
}

/// A no-op implementation for callers that don't need progress events.
///
/// This is the default when no callback is configured.
pub struct NoopProgressCallback;

impl WorkflowProgressCallback for NoopProgressCallback {}

/// Convenience alias matching the type stored in [`crate::config::ClientConfig`].
pub type ProgressCallback = Arc<dyn WorkflowProgressCallback>;
