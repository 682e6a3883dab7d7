//! The submit → wait → fetch workflow.
//!
//! ## Stages
//!
//! ```text
//! 1. Preflight   inputs readable, output dir exists, GET / answers ok
//! 2. Create      POST /cases            (batch: POST /files)
//! 3. Upload      POST /cases/{id}/files (batch: folded into 2)
//! 4. Trigger     POST /cases/{id}/convert (batch: POST /files:run)
//! 5. Wait        bounded poll, see [`crate::poll`]
//! 6. Fetch       results.zip or listing fallback
//!                (batch: per-file to-pdf, only with `export_pdf`)
//! ```
//!
//! Stages 1–4 are fatal on failure and return `Err`. Once the conversion is
//! queued the run has "reached polling": timeouts and fetch problems end up
//! in the [`RunReport`], never in an error.

use crate::api::ServiceApi;
use crate::config::{ClientConfig, SubmitMode};
use crate::error::{DocsvcError, Stage, TransportError};
use crate::fetch::{export_pdfs, fetch_packaged_artifact, FetchOutcome, PdfExport};
use crate::model::{CaseId, ResultSet, TriggeredRun, WorkUnit};
use crate::poll::{
    wait_for_completion, Deadline, DiffState, HandleStatus, ResultDiffStrategy, RunSet,
    RunStatusStrategy,
};
use crate::progress::ProgressCallback;
use crate::submit::{check_inputs, check_unique_names, JobSubmitter, Trigger};
use crate::transport::HttpTransport;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing::{debug, info, warn};

/// Everything a run observed after it reached polling.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub mode: SubmitMode,
    pub work_unit: WorkUnit,
    /// File names as the server knows them, in upload order.
    pub uploaded: Vec<String>,
    pub wait: WaitReport,
    /// `None` in batch mode, which has no packaged artifact.
    pub fetch: Option<FetchOutcome>,
    /// Batch mode with `export_pdf` only; one entry per file id.
    pub pdf_exports: Vec<PdfExport>,
    pub outcome: RunOutcome,
    pub total_duration_ms: u64,
}

/// How the poll loop ended.
#[derive(Debug, Clone, Serialize)]
pub struct WaitReport {
    pub attempts: u32,
    pub elapsed_ms: u64,
    pub timed_out: bool,
    pub detail: WaitDetail,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum WaitDetail {
    /// Case mode.
    Results {
        baseline: ResultSet,
        /// Last successful listing, if any succeeded.
        current: Option<ResultSet>,
        changed: Vec<String>,
        failed_queries: u32,
    },
    /// Batch mode, one entry per handle in trigger order.
    Runs { runs: Vec<HandleStatus> },
}

/// The final state of a run that reached polling.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RunOutcome {
    ArtifactDownloaded { path: PathBuf },
    /// No archive on disk; the fetch outcome says where to look instead.
    ManualRetrieval { timed_out: bool },
    RunsFinished { succeeded: usize, failed: usize },
    RunsTimedOut {
        succeeded: usize,
        failed: usize,
        pending: usize,
    },
}

impl RunOutcome {
    fn for_case(fetch: &FetchOutcome, timed_out: bool) -> Self {
        match fetch {
            FetchOutcome::Downloaded { path, .. } => RunOutcome::ArtifactDownloaded { path: path.clone() },
            _ => RunOutcome::ManualRetrieval { timed_out },
        }
    }

    fn for_runs(runs: &RunSet, timed_out: bool) -> Self {
        let c = runs.counts();
        if timed_out {
            RunOutcome::RunsTimedOut {
                succeeded: c.succeeded,
                failed: c.failed,
                pending: c.unfinished,
            }
        } else {
            RunOutcome::RunsFinished {
                succeeded: c.succeeded,
                failed: c.failed,
            }
        }
    }
}

/// Submit `inputs`, wait for the conversion and fetch what it produced.
///
/// # Errors
/// Returns `Err(DocsvcError)` only for failures before the conversion was
/// queued; [`DocsvcError::stage`] names where the run aborted. Work already
/// done on the server (created case, uploaded files) is left in place.
pub async fn run(inputs: &[PathBuf], config: &ClientConfig) -> Result<RunReport, DocsvcError> {
    let total_start = Instant::now();
    let stages = StageEvents {
        progress: config.progress_callback.as_ref(),
    };
    info!("Starting {:?}-mode run for {} file(s)", config.mode, inputs.len());

    // ── Stage 1: Preflight ───────────────────────────────────────────────
    stages.start(Stage::Preflight);
    let api = preflight(inputs, config).await.map_err(|e| stages.abort(e))?;
    stages.complete(Stage::Preflight, &format!("{} file(s) ready", inputs.len()));

    let submitter = JobSubmitter::new(&api, config.progress_callback.as_ref());
    let mut report = match config.mode {
        SubmitMode::Case => run_case(&api, &submitter, inputs, config, &stages).await?,
        SubmitMode::Batch => run_batch(&api, &submitter, inputs, config, &stages).await?,
    };

    report.total_duration_ms = total_start.elapsed().as_millis() as u64;
    info!("Run finished in {}ms: {:?}", report.total_duration_ms, report.outcome);
    Ok(report)
}

/// Local checks first; the only request, the health check, is sent once
/// they pass.
async fn preflight(inputs: &[PathBuf], config: &ClientConfig) -> Result<ServiceApi, DocsvcError> {
    check_inputs(inputs)?;
    if config.mode == SubmitMode::Case {
        check_unique_names(inputs)?;
    }
    prepare_out_dir(&config.out_dir).await?;

    let transport = HttpTransport::new(config.base_url.as_str(), config.request_timeout).map_err(|source| {
        DocsvcError::Request {
            stage: Stage::Preflight,
            source,
        }
    })?;
    let api = ServiceApi::new(transport);
    check_service(&api).await?;
    Ok(api)
}

/// `GET /` must answer `{"ok": true}`.
async fn check_service(api: &ServiceApi) -> Result<(), DocsvcError> {
    let parsed = api.health().await.map_err(|source| match source {
        TransportError::Decode { body, .. } => DocsvcError::ServiceNotReady { raw: body },
        source => DocsvcError::Request {
            stage: Stage::Preflight,
            source,
        },
    })?;
    if parsed.value.ok != Some(true) {
        return Err(DocsvcError::ServiceNotReady { raw: parsed.raw });
    }
    debug!("Service at {} is up", api.transport().base_url());
    Ok(())
}

async fn prepare_out_dir(dir: &Path) -> Result<(), DocsvcError> {
    tokio::fs::create_dir_all(dir)
        .await
        .map_err(|source| DocsvcError::OutputDirFailed {
            path: dir.to_path_buf(),
            source,
        })
}

async fn run_case(
    api: &ServiceApi,
    submitter: &JobSubmitter<'_>,
    inputs: &[PathBuf],
    config: &ClientConfig,
    stages: &StageEvents<'_>,
) -> Result<RunReport, DocsvcError> {
    // ── Stage 2: Create case ─────────────────────────────────────────────
    stages.start(Stage::CreateWorkUnit);
    let unit = submitter
        .create_work_unit(&config.case_name, &config.case_note)
        .await
        .map_err(|e| stages.abort(e))?;
    stages.complete(Stage::CreateWorkUnit, &unit.to_string());
    let case_id = match &unit {
        WorkUnit::Case { case_id } => case_id.clone(),
        WorkUnit::Batch { .. } => {
            return Err(stages.abort(DocsvcError::Internal {
                stage: Stage::CreateWorkUnit,
                message: "case creation returned a batch work unit".into(),
            }))
        }
    };

    // ── Stage 3: Upload ──────────────────────────────────────────────────
    stages.start(Stage::Upload);
    let uploaded = submitter
        .upload_files(&unit, inputs)
        .await
        .map_err(|e| stages.abort(e))?;
    stages.complete(Stage::Upload, &format!("{} file(s)", uploaded.len()));

    // ── Stage 4: Trigger ─────────────────────────────────────────────────
    stages.start(Stage::Trigger);
    let baseline = baseline_snapshot(api, &case_id).await;
    submitter
        .trigger_conversion(&unit, &uploaded, &config.params, &config.task_name)
        .await
        .map_err(|e| stages.abort(e))?;
    stages.complete(Stage::Trigger, "queued");

    // ── Stage 5: Wait ────────────────────────────────────────────────────
    stages.start(Stage::Wait);
    let strategy = ResultDiffStrategy::new(api, &case_id);
    let deadline = Deadline::after(config.poll_timeout, config.poll_interval);
    let outcome =
        wait_for_completion(&strategy, DiffState::new(baseline), deadline, config.progress_callback.as_ref()).await;

    if outcome.timed_out {
        let msg = format!(
            "no new results after {}s; see {} for manual retrieval",
            config.poll_timeout.as_secs(),
            api.results_url(&case_id)
        );
        warn!("{}", msg);
        stages.degrade(Stage::Wait, &msg);
    } else {
        stages.complete(
            Stage::Wait,
            &format!("{} result(s) changed", outcome.state.changes().len()),
        );
    }

    let wait = WaitReport {
        attempts: outcome.attempts,
        elapsed_ms: outcome.elapsed.as_millis() as u64,
        timed_out: outcome.timed_out,
        detail: WaitDetail::Results {
            changed: outcome.state.changes(),
            current: outcome.state.current().cloned(),
            baseline: outcome.state.baseline,
            failed_queries: outcome.state.failed_queries,
        },
    };

    // ── Stage 6: Fetch ───────────────────────────────────────────────────
    stages.start(Stage::Fetch);
    let fetch = fetch_packaged_artifact(api, &case_id, &config.out_dir).await;
    match &fetch {
        FetchOutcome::Downloaded { path, bytes } => {
            stages.complete(Stage::Fetch, &format!("{} ({} bytes)", path.display(), bytes))
        }
        FetchOutcome::Fallback { reason, entries, .. } => stages.degrade(
            Stage::Fetch,
            &format!("{reason}; {} entries listed for manual retrieval", entries.len()),
        ),
        FetchOutcome::Unavailable {
            reason, listing_error, ..
        } => stages.degrade(Stage::Fetch, &format!("{reason}; listing failed: {listing_error}")),
    }

    Ok(RunReport {
        mode: SubmitMode::Case,
        outcome: RunOutcome::for_case(&fetch, wait.timed_out),
        work_unit: unit,
        uploaded,
        wait,
        fetch: Some(fetch),
        pdf_exports: Vec::new(),
        total_duration_ms: 0,
    })
}

async fn run_batch(
    api: &ServiceApi,
    submitter: &JobSubmitter<'_>,
    inputs: &[PathBuf],
    config: &ClientConfig,
    stages: &StageEvents<'_>,
) -> Result<RunReport, DocsvcError> {
    // ── Stage 2+3: Upload batch (creates the work unit) ──────────────────
    stages.start(Stage::CreateWorkUnit);
    let (unit, uploaded) = submitter
        .upload_batch(inputs, config.user_id.as_deref())
        .await
        .map_err(|e| stages.abort(e))?;
    stages.complete(Stage::CreateWorkUnit, &unit.to_string());

    // ── Stage 4: Trigger ─────────────────────────────────────────────────
    stages.start(Stage::Trigger);
    let runs: Vec<TriggeredRun> = match submitter
        .trigger_conversion(&unit, &uploaded, &config.params, &config.task_name)
        .await
        .map_err(|e| stages.abort(e))?
    {
        Trigger::Runs(runs) => runs,
        Trigger::Queued => {
            return Err(stages.abort(DocsvcError::Internal {
                stage: Stage::Trigger,
                message: "batch trigger answered without run handles".into(),
            }))
        }
    };
    stages.complete(Stage::Trigger, &format!("{} run(s)", runs.len()));

    // ── Stage 5: Wait ────────────────────────────────────────────────────
    stages.start(Stage::Wait);
    let strategy = RunStatusStrategy::new(api, config.status_concurrency);
    let deadline = Deadline::after(config.poll_timeout, config.poll_interval);
    let outcome =
        wait_for_completion(&strategy, RunSet::new(&runs), deadline, config.progress_callback.as_ref()).await;

    let counts = outcome.state.counts();
    if outcome.timed_out {
        let msg = format!(
            "{} of {} run(s) unfinished after {}s",
            counts.unfinished,
            runs.len(),
            config.poll_timeout.as_secs()
        );
        warn!("{}", msg);
        stages.degrade(Stage::Wait, &msg);
    } else {
        stages.complete(
            Stage::Wait,
            &format!("{} succeeded, {} failed", counts.succeeded, counts.failed),
        );
    }

    let wait = WaitReport {
        attempts: outcome.attempts,
        elapsed_ms: outcome.elapsed.as_millis() as u64,
        timed_out: outcome.timed_out,
        detail: WaitDetail::Runs {
            runs: outcome.state.runs.clone(),
        },
    };

    // ── Stage 6: PDF export (opt-in) ─────────────────────────────────────
    let pdf_exports = match (&unit, config.export_pdf) {
        (WorkUnit::Batch { file_ids }, true) => {
            stages.start(Stage::Fetch);
            let exports = export_pdfs(api, file_ids, &config.out_dir).await;
            let saved = exports
                .iter()
                .filter(|e| matches!(e, PdfExport::Saved { .. }))
                .count();
            if saved == exports.len() {
                stages.complete(Stage::Fetch, &format!("{saved} PDF(s) saved"));
            } else {
                stages.degrade(
                    Stage::Fetch,
                    &format!("{} of {} PDF export(s) failed", exports.len() - saved, exports.len()),
                );
            }
            exports
        }
        _ => Vec::new(),
    };

    Ok(RunReport {
        mode: SubmitMode::Batch,
        outcome: RunOutcome::for_runs(&outcome.state, outcome.timed_out),
        work_unit: unit,
        uploaded,
        wait,
        fetch: None,
        pdf_exports,
        total_duration_ms: 0,
    })
}

/// Listing taken before triggering. A fresh case has no results, so a
/// failed query degrades to the empty set.
async fn baseline_snapshot(api: &ServiceApi, case_id: &CaseId) -> ResultSet {
    match api.list_results(case_id, None).await {
        Ok(set) => set,
        Err(e) => {
            warn!("Baseline listing for case {} failed, assuming empty: {}", case_id, e);
            ResultSet::new()
        }
    }
}

/// Stage events fan out to the optional progress callback.
struct StageEvents<'a> {
    progress: Option<&'a ProgressCallback>,
}

impl StageEvents<'_> {
    fn start(&self, stage: Stage) {
        info!("[{}] {}", stage.number(), stage);
        if let Some(cb) = self.progress {
            cb.on_stage_start(stage);
        }
    }

    fn complete(&self, stage: Stage, detail: &str) {
        if let Some(cb) = self.progress {
            cb.on_stage_complete(stage, detail);
        }
    }

    fn degrade(&self, stage: Stage, reason: &str) {
        if let Some(cb) = self.progress {
            cb.on_stage_failed(stage, reason, false);
        }
    }

    /// Report a fatal error and hand it back for propagation.
    fn abort(&self, err: DocsvcError) -> DocsvcError {
        if let Some(cb) = self.progress {
            cb.on_stage_failed(err.stage(), &err.to_string(), true);
        }
        err
    }
}
