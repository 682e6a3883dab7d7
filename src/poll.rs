//! Completion detection: one bounded loop, two strategies.
//!
//! ## Why a strategy trait?
//!
//! The service exposes two unrelated signals for "is the job done?":
//!
//! * **batch mode** returns a `task_run_id` per file and a status endpoint
//!   for each, so completion means every run reached `SUCCEEDED` or
//!   `FAILED` ([`RunStatusStrategy`]);
//! * **case mode** only acknowledges `queued: true`. The sole observable
//!   progress is the case's result listing, so completion means the listing
//!   differs from the snapshot taken before triggering
//!   ([`ResultDiffStrategy`]).
//!
//! Both are driven by [`wait_for_completion`], which owns the timing:
//!
//! ```text
//! loop {
//!     done?            → Completed
//!     now > deadline?  → TimedOut
//!     sleep(interval)
//!     state = refresh(state, deadline + interval - now)
//! }
//! ```
//!
//! The [`Deadline`] is computed once at loop entry and passed in. Every
//! refresh gets the time left until `deadline + interval` as its query
//! budget, and the sources use it as their per-call timeout, so a stalled
//! server cannot hold the loop past that point. All waits go through
//! `tokio::time`, so tests drive the loop with a paused clock.
//!
//! ## Query failures
//!
//! A failed status or listing query is never a completion signal. Runs
//! whose query failed become [`PollState::Unknown`] (non-terminal); a failed
//! listing is recorded as [`Observation::QueryFailed`], which cannot match
//! "changed". Both are retried on the next tick until the deadline.

use crate::error::TransportError;
use crate::model::{CaseId, FileId, JobHandle, PollState, ResultSet, TriggeredRun};
use crate::progress::ProgressCallback;
use futures::stream::{self, StreamExt};
use serde::Serialize;
use std::time::Duration;
use tokio::time::{sleep, Instant};
use tracing::{debug, warn};

// ── Timing ───────────────────────────────────────────────────────────────

/// Wall-clock bound of one poll loop.
#[derive(Debug, Clone, Copy)]
pub struct Deadline {
    start: Instant,
    at: Instant,
    interval: Duration,
}

impl Deadline {
    /// Deadline `timeout` from now, ticking every `interval`.
    pub fn after(timeout: Duration, interval: Duration) -> Self {
        Self::starting_at(Instant::now(), timeout, interval)
    }

    pub fn starting_at(start: Instant, timeout: Duration, interval: Duration) -> Self {
        Self {
            start,
            at: start + timeout,
            interval,
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn timeout(&self) -> Duration {
        self.at - self.start
    }

    /// Strictly past the deadline.
    pub fn expired(&self, now: Instant) -> bool {
        now > self.at
    }

    pub fn elapsed(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.start)
    }

    /// Time a query started at `now` may take without pushing the loop
    /// past `deadline + interval`.
    pub fn query_budget(&self, now: Instant) -> Duration {
        (self.at + self.interval).saturating_duration_since(now)
    }
}

/// What a poll loop ended with.
#[derive(Debug, Clone)]
pub struct PollOutcome<S> {
    pub state: S,
    /// Number of refreshes performed.
    pub attempts: u32,
    pub elapsed: Duration,
    pub timed_out: bool,
}

/// "Is it done?" for one kind of work unit.
#[allow(async_fn_in_trait)]
pub trait CompletionStrategy {
    type State;

    fn is_done(&self, state: &Self::State) -> bool;

    /// Query the server once and fold the answer into `state`.
    ///
    /// Must not fail: query errors, including running out of `budget`, are
    /// folded into the state as non-terminal observations.
    async fn refresh(&self, state: Self::State, budget: Duration) -> Self::State;

    /// One-line description for progress output.
    fn summary(&self, state: &Self::State) -> String;
}

/// Drive `strategy` until it reports done or `deadline` passes.
///
/// Never fails; the only exits are completion and timeout. Returns within
/// `deadline + interval` as long as the strategy honours its query budget.
pub async fn wait_for_completion<S: CompletionStrategy>(
    strategy: &S,
    initial: S::State,
    deadline: Deadline,
    progress: Option<&ProgressCallback>,
) -> PollOutcome<S::State> {
    let mut state = initial;
    let mut attempts = 0u32;

    loop {
        let now = Instant::now();
        if strategy.is_done(&state) {
            debug!("Completion observed after {} attempt(s)", attempts);
            return PollOutcome {
                state,
                attempts,
                elapsed: deadline.elapsed(now),
                timed_out: false,
            };
        }
        if deadline.expired(now) {
            warn!(
                "Gave up waiting after {}s ({} attempt(s)): {}",
                deadline.timeout().as_secs(),
                attempts,
                strategy.summary(&state)
            );
            return PollOutcome {
                state,
                attempts,
                elapsed: deadline.elapsed(now),
                timed_out: true,
            };
        }

        sleep(deadline.interval()).await;
        attempts += 1;
        let budget = deadline.query_budget(Instant::now());
        state = strategy.refresh(state, budget).await;

        let summary = strategy.summary(&state);
        debug!("Poll {}: {}", attempts, summary);
        if let Some(cb) = progress {
            cb.on_poll_tick(attempts, deadline.elapsed(Instant::now()), &summary);
        }
    }
}

// ── Handle-based: batch runs ─────────────────────────────────────────────

/// One status answer for a run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunStatus {
    pub state: PollState,
    /// Server-side failure text, if any.
    pub error: Option<String>,
    pub started_at: Option<String>,
    pub finished_at: Option<String>,
}

/// Where run statuses come from. [`crate::api::ServiceApi`] in production.
#[allow(async_fn_in_trait)]
pub trait RunStatusSource {
    /// One status query that gives up after `budget`.
    async fn run_status(&self, handle: &JobHandle, budget: Duration) -> Result<RunStatus, TransportError>;
}

/// Tracked status of one handle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HandleStatus {
    pub handle: JobHandle,
    pub file_id: Option<FileId>,
    pub state: PollState,
    /// Server-reported error for failed runs.
    pub error: Option<String>,
    /// Server timestamps, as sent.
    pub started_at: Option<String>,
    pub finished_at: Option<String>,
    /// Why the most recent query for this handle failed, if it did.
    pub last_query_error: Option<String>,
}

impl HandleStatus {
    fn apply(&mut self, observed: Result<RunStatus, TransportError>) {
        match observed {
            Ok(status) => {
                if self.state.is_terminal() && status.state != self.state {
                    warn!(
                        "Run {} reported {} after {}; keeping {}",
                        self.handle, status.state, self.state, self.state
                    );
                }
                let next = self.state.advance(status.state);
                if next != self.state || !next.is_terminal() {
                    self.error = status.error;
                    self.started_at = status.started_at;
                    self.finished_at = status.finished_at;
                }
                self.state = next;
                self.last_query_error = None;
            }
            Err(e) => {
                warn!("Status query for run {} failed: {}", self.handle, e);
                self.state = self.state.advance(PollState::Unknown);
                self.last_query_error = Some(e.to_string());
            }
        }
    }
}

/// State of the handle-based strategy: every run, in trigger order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RunSet {
    pub runs: Vec<HandleStatus>,
}

/// Per-state totals of a [`RunSet`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StatusCounts {
    pub succeeded: usize,
    pub failed: usize,
    /// Pending, running or unknown.
    pub unfinished: usize,
}

impl RunSet {
    /// Fresh set: every handle `Pending` until first queried.
    pub fn new(runs: &[TriggeredRun]) -> Self {
        Self {
            runs: runs
                .iter()
                .map(|r| HandleStatus {
                    handle: r.handle.clone(),
                    file_id: r.file_id.clone(),
                    state: PollState::Pending,
                    error: None,
                    started_at: None,
                    finished_at: None,
                    last_query_error: None,
                })
                .collect(),
        }
    }

    pub fn all_terminal(&self) -> bool {
        self.runs.iter().all(|r| r.state.is_terminal())
    }

    pub fn counts(&self) -> StatusCounts {
        self.runs
            .iter()
            .fold(StatusCounts::default(), |mut c, r| {
                match r.state {
                    PollState::Succeeded => c.succeeded += 1,
                    PollState::Failed => c.failed += 1,
                    _ => c.unfinished += 1,
                }
                c
            })
    }

    pub fn get(&self, handle: &JobHandle) -> Option<&HandleStatus> {
        self.runs.iter().find(|r| &r.handle == handle)
    }
}

/// Done when every run is terminal. Only non-terminal runs are queried.
pub struct RunStatusStrategy<'a, S> {
    source: &'a S,
    concurrency: usize,
}

impl<'a, S: RunStatusSource> RunStatusStrategy<'a, S> {
    pub fn new(source: &'a S, concurrency: usize) -> Self {
        Self {
            source,
            concurrency: concurrency.max(1),
        }
    }
}

impl<S: RunStatusSource> CompletionStrategy for RunStatusStrategy<'_, S> {
    type State = RunSet;

    fn is_done(&self, state: &RunSet) -> bool {
        state.all_terminal()
    }

    async fn refresh(&self, mut state: RunSet, budget: Duration) -> RunSet {
        let open: Vec<(usize, JobHandle)> = state
            .runs
            .iter()
            .enumerate()
            .filter(|(_, r)| !r.state.is_terminal())
            .map(|(i, r)| (i, r.handle.clone()))
            .collect();

        let source = self.source;
        let observed: Vec<(usize, Result<RunStatus, TransportError>)> =
            stream::iter(open.into_iter().map(|(i, handle)| async move {
                (i, source.run_status(&handle, budget).await)
            }))
            .buffer_unordered(self.concurrency)
            .collect()
            .await;

        for (i, result) in observed {
            state.runs[i].apply(result);
        }
        state
    }

    fn summary(&self, state: &RunSet) -> String {
        let c = state.counts();
        format!(
            "{}/{} runs terminal ({} succeeded, {} failed)",
            c.succeeded + c.failed,
            state.runs.len(),
            c.succeeded,
            c.failed
        )
    }
}

// ── Diff-based: case results ─────────────────────────────────────────────

/// Where case result listings come from. [`crate::api::ServiceApi`] in production.
#[allow(async_fn_in_trait)]
pub trait ResultSource {
    /// One listing that gives up after `budget`.
    async fn list_results(&self, case_id: &CaseId, budget: Duration) -> Result<ResultSet, TransportError>;
}

/// Latest listing attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Observation {
    NotQueried,
    /// The query failed; says nothing about the result set.
    QueryFailed(String),
    Snapshot(ResultSet),
}

/// State of the diff-based strategy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiffState {
    /// Listing taken before the conversion was triggered.
    pub baseline: ResultSet,
    pub latest: Observation,
    pub failed_queries: u32,
}

impl DiffState {
    pub fn new(baseline: ResultSet) -> Self {
        Self {
            baseline,
            latest: Observation::NotQueried,
            failed_queries: 0,
        }
    }

    /// Entries added or removed since the baseline, from the last
    /// successful query only.
    pub fn changes(&self) -> Vec<String> {
        match &self.latest {
            Observation::Snapshot(current) => {
                self.baseline.symmetric_difference(current).cloned().collect()
            }
            _ => Vec::new(),
        }
    }

    /// Entries of the last successful snapshot, if any.
    pub fn current(&self) -> Option<&ResultSet> {
        match &self.latest {
            Observation::Snapshot(s) => Some(s),
            _ => None,
        }
    }
}

/// `true` iff the two snapshots differ in membership.
pub fn results_changed(baseline: &ResultSet, current: &ResultSet) -> bool {
    baseline.symmetric_difference(current).next().is_some()
}

/// Done when a successful listing differs from the baseline.
pub struct ResultDiffStrategy<'a, S> {
    source: &'a S,
    case_id: &'a CaseId,
}

impl<'a, S: ResultSource> ResultDiffStrategy<'a, S> {
    pub fn new(source: &'a S, case_id: &'a CaseId) -> Self {
        Self { source, case_id }
    }
}

impl<S: ResultSource> CompletionStrategy for ResultDiffStrategy<'_, S> {
    type State = DiffState;

    fn is_done(&self, state: &DiffState) -> bool {
        match &state.latest {
            Observation::Snapshot(current) => results_changed(&state.baseline, current),
            Observation::NotQueried | Observation::QueryFailed(_) => false,
        }
    }

    async fn refresh(&self, mut state: DiffState, budget: Duration) -> DiffState {
        state.latest = match self.source.list_results(self.case_id, budget).await {
            Ok(current) => Observation::Snapshot(current),
            Err(e) => {
                warn!("Result listing for case {} failed: {}", self.case_id, e);
                state.failed_queries += 1;
                Observation::QueryFailed(e.to_string())
            }
        };
        state
    }

    fn summary(&self, state: &DiffState) -> String {
        match &state.latest {
            Observation::NotQueried => "waiting for first listing".to_string(),
            Observation::QueryFailed(e) => format!("listing failed ({e}), retrying"),
            Observation::Snapshot(current) => {
                let changed = state.changes().len();
                if changed == 0 {
                    format!("{} result(s), no change yet", current.len())
                } else {
                    format!("{} result(s), {} changed", current.len(), changed)
                }
            }
        }
    }
}
