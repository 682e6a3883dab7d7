//! # docsvc-client
//!
//! Drive an asynchronous document-conversion service: submit files, wait
//! for the conversion, fetch what it produced.
//!
//! ## Why this crate?
//!
//! The service's HTTP API is a handful of uncoordinated calls. Turning them
//! into a dependable "submit, wait, fetch" run takes the parts a shell
//! script gets wrong: a wait that is always bounded, polling that survives
//! transient errors, completion detection when the server offers no job
//! status at all, and a useful answer when the packaged archive is missing.
//!
//! ## Workflow Overview
//!
//! ```text
//! files
//!  │
//!  ├─ 1. Preflight  inputs readable, output dir ready (no network)
//!  ├─ 2. Create     case  (or: batch upload → file ids)
//!  ├─ 3. Upload     one multipart request per file, sequential
//!  ├─ 4. Trigger    queued: true  (or: one task_run_id per file)
//!  ├─ 5. Wait       result-set diff  (or: every run terminal), bounded
//!  └─ 6. Fetch      results.zip, else per-entry listing
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use docsvc_client::{run, ClientConfig};
//! use std::path::PathBuf;
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = ClientConfig::builder()
//!         .base_url("http://localhost:8000")
//!         .poll_timeout(Duration::from_secs(300))
//!         .build()?;
//!     let report = run(&[PathBuf::from("report.docx")], &config).await?;
//!     println!("{:?}", report.outcome);
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `docsvc` binary (clap + anyhow + tracing-subscriber + indicatif) |
//!
//! Disable `cli` when using only the library:
//! ```toml
//! docsvc-client = { version = "0.1", default-features = false }
//! ```

// ── Modules ──────────────────────────────────────────────────────────────

pub mod api;
pub mod config;
pub mod error;
pub mod fetch;
pub mod model;
pub mod poll;
pub mod progress;
pub mod submit;
pub mod transport;
pub mod workflow;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use config::{ClientConfig, ClientConfigBuilder, ConversionParams, ImageFormat, SubmitMode};
pub use error::{DocsvcError, Stage, TransportError};
pub use fetch::{FetchOutcome, PdfExport, ResultEntry};
pub use model::{CaseId, FileId, JobHandle, PollState, ResultSet, WorkUnit};
pub use poll::{wait_for_completion, CompletionStrategy, Deadline, PollOutcome};
pub use progress::{NoopProgressCallback, ProgressCallback, WorkflowProgressCallback};
pub use workflow::{run, RunOutcome, RunReport, WaitDetail, WaitReport};
