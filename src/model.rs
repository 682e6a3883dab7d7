//! Identifiers and status types shared by the submitter, poller and fetcher.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

/// Server-assigned case identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CaseId(pub String);

/// Server-assigned identifier of one uploaded file (batch mode).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FileId(pub String);

/// Identifier of one triggered conversion task (`task_run_id`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobHandle(pub String);

macro_rules! impl_id_display {
    ($($ty:ty),*) => {$(
        impl fmt::Display for $ty {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl $ty {
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }
    )*};
}

impl_id_display!(CaseId, FileId, JobHandle);

/// The scope of one conversion request. Immutable once the server returned it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum WorkUnit {
    Case { case_id: CaseId },
    Batch { file_ids: Vec<FileId> },
}

impl fmt::Display for WorkUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WorkUnit::Case { case_id } => write!(f, "case {case_id}"),
            WorkUnit::Batch { file_ids } => write!(f, "batch of {} file(s)", file_ids.len()),
        }
    }
}

/// Names of the result entries the server currently knows for a case.
pub type ResultSet = BTreeSet<String>;

/// Per-handle status tag.
///
/// `Unknown` covers both a failed status query and a status string this
/// client does not recognise. It is never terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PollState {
    #[default]
    Pending,
    Running,
    Succeeded,
    Failed,
    Unknown,
}

impl PollState {
    /// Map the service's `status` string.
    pub fn from_wire(status: &str) -> Self {
        match status.trim().to_ascii_uppercase().as_str() {
            "PENDING" => PollState::Pending,
            "RUNNING" => PollState::Running,
            "SUCCEEDED" => PollState::Succeeded,
            "FAILED" => PollState::Failed,
            _ => PollState::Unknown,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, PollState::Succeeded | PollState::Failed)
    }

    /// Fold a freshly observed status into the current one.
    ///
    /// Terminal states are sticky: a server that reports a finished run as
    /// pending again is a protocol anomaly, and the first terminal
    /// classification wins.
    pub fn advance(self, observed: PollState) -> PollState {
        if self.is_terminal() {
            return self;
        }
        observed
    }
}

impl fmt::Display for PollState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            PollState::Pending => "PENDING",
            PollState::Running => "RUNNING",
            PollState::Succeeded => "SUCCEEDED",
            PollState::Failed => "FAILED",
            PollState::Unknown => "UNKNOWN",
        };
        f.write_str(s)
    }
}

/// One handle returned by the batch trigger, paired with the file it runs on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TriggeredRun {
    pub handle: JobHandle,
    pub file_id: Option<FileId>,
}
