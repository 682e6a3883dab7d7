//! Error types for the docsvc-client library.
//!
//! Two distinct error types reflect two distinct failure modes:
//!
//! * [`DocsvcError`] — **Fatal**: the run cannot proceed at all (missing
//!   input file, case never created, conversion not queued). Returned as
//!   `Err(DocsvcError)` from [`crate::workflow::run`] and the submitter.
//!
//! * [`TransportError`] — **Per-call**: one HTTP exchange failed. The caller
//!   decides whether it is fatal. During submission it is wrapped into a
//!   [`DocsvcError`]; during polling and fetching it is logged and folded
//!   into the report instead.
//!
//! Everything that happens after the conversion was queued (timeouts, a
//! missing `results.zip`) is reported through [`crate::workflow::RunReport`],
//! never through an error.

use std::fmt;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// All fatal errors returned by the docsvc-client library.
#[derive(Debug, Error)]
pub enum DocsvcError {
    // ── Preflight errors ──────────────────────────────────────────────────
    /// Input file was not found at the given path.
    #[error("Input file not found: '{path}'\nCheck the path exists and is readable.")]
    FileNotFound { path: PathBuf },

    /// Process does not have read permission on the file.
    #[error("Permission denied reading '{path}'\nTry: chmod +r {path:?}")]
    PermissionDenied { path: PathBuf },

    /// The path exists but is a directory or another non-regular file.
    #[error("Input '{path}' is not a regular file")]
    NotAFile { path: PathBuf },

    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// The service answered its liveness check with something other than `ok: true`.
    #[error("Service is up but not ready.\nRaw response: {raw}")]
    ServiceNotReady { raw: String },

    // ── Submission errors ─────────────────────────────────────────────────
    /// The server did not hand back a usable case id / file id list.
    #[error("{what} was not created by the server.\nRaw response: {raw}")]
    WorkUnitNotCreated { what: &'static str, raw: String },

    /// A single upload failed; the whole run is aborted.
    #[error("Upload of '{path}' failed: {source}")]
    UploadFailed {
        path: PathBuf,
        #[source]
        source: TransportError,
    },

    /// The trigger call did not acknowledge the conversion.
    #[error("Conversion was not queued by the server.\nRaw response: {raw}")]
    NotQueued { raw: String },

    /// Any other HTTP failure during submission, tagged with its stage.
    #[error("Stage '{stage}' failed: {source}")]
    Request {
        stage: Stage,
        #[source]
        source: TransportError,
    },

    // ── I/O errors ────────────────────────────────────────────────────────
    /// Could not create the download directory.
    #[error("Failed to prepare output directory '{path}': {source}")]
    OutputDirFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error.
    #[error("Internal error in stage '{stage}': {message}")]
    Internal { stage: Stage, message: String },
}

impl DocsvcError {
    /// The workflow stage a run aborted in when this error surfaced.
    pub fn stage(&self) -> Stage {
        match self {
            DocsvcError::FileNotFound { .. }
            | DocsvcError::PermissionDenied { .. }
            | DocsvcError::NotAFile { .. }
            | DocsvcError::InvalidConfig(_)
            | DocsvcError::ServiceNotReady { .. }
            | DocsvcError::OutputDirFailed { .. } => Stage::Preflight,
            DocsvcError::WorkUnitNotCreated { .. } => Stage::CreateWorkUnit,
            DocsvcError::UploadFailed { .. } => Stage::Upload,
            DocsvcError::NotQueued { .. } => Stage::Trigger,
            DocsvcError::Request { stage, .. } | DocsvcError::Internal { stage, .. } => *stage,
        }
    }
}

/// Failure of a single HTTP exchange with the conversion service.
///
/// Every variant that saw a response keeps its raw body so the caller can
/// dump it verbatim; the service's error details live there.
#[derive(Debug, Error)]
pub enum TransportError {
    /// Could not construct the HTTP client.
    #[error("Failed to build HTTP client: {reason}")]
    Build { reason: String },

    /// Connection refused, DNS failure, reset mid-body, …
    #[error("Request to '{url}' failed: {reason}\nCheck BASE_URL and that the service is running.")]
    Connect { url: String, reason: String },

    /// The request exceeded the per-call timeout.
    #[error("Request to '{url}' timed out after {after:?}")]
    Timeout { url: String, after: Duration },

    /// The server answered with a non-2xx status.
    #[error("HTTP {status} from '{url}': {body}")]
    Status { url: String, status: u16, body: String },

    /// The server answered 2xx but the body was not what the call expects.
    #[error("Unexpected response from '{url}': {reason}\nBody: {body}")]
    Decode {
        url: String,
        reason: String,
        body: String,
    },

    /// Reading an upload or writing a download failed locally.
    #[error("I/O error on '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl TransportError {
    /// Raw response body, when the server sent one.
    pub fn raw_body(&self) -> Option<&str> {
        match self {
            TransportError::Status { body, .. } | TransportError::Decode { body, .. } => {
                Some(body)
            }
            _ => None,
        }
    }

    /// HTTP status code, when the failure was a non-2xx response.
    pub fn status(&self) -> Option<u16> {
        match self {
            TransportError::Status { status, .. } => Some(*status),
            _ => None,
        }
    }
}

/// Workflow stages, numbered in the order a run goes through them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum Stage {
    Preflight,
    CreateWorkUnit,
    Upload,
    Trigger,
    Wait,
    Fetch,
}

impl Stage {
    /// 1-based position used in "aborted at stage N" messages.
    pub fn number(self) -> u8 {
        match self {
            Stage::Preflight => 1,
            Stage::CreateWorkUnit => 2,
            Stage::Upload => 3,
            Stage::Trigger => 4,
            Stage::Wait => 5,
            Stage::Fetch => 6,
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Stage::Preflight => "preflight",
            Stage::CreateWorkUnit => "create work unit",
            Stage::Upload => "upload",
            Stage::Trigger => "trigger conversion",
            Stage::Wait => "wait for completion",
            Stage::Fetch => "fetch results",
        };
        f.write_str(label)
    }
}
