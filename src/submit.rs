//! Job submission: preflight checks, work-unit creation, uploads, trigger.
//!
//! Every call here is fatal on failure. The service offers no idempotency
//! keys, so nothing is retried: a half-created case stays on the server
//! and the user re-runs.

use crate::api::ServiceApi;
use crate::config::ConversionParams;
use crate::error::{DocsvcError, Stage, TransportError};
use crate::model::{CaseId, FileId, JobHandle, TriggeredRun, WorkUnit};
use crate::progress::ProgressCallback;
use crate::transport::file_name_of;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Result of the trigger call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Trigger {
    /// Case mode: the server acknowledged the conversion with `queued: true`.
    Queued,
    /// Batch mode: one handle per accepted input.
    Runs(Vec<TriggeredRun>),
}

/// Validate every input path locally, before any network call.
///
/// Fails fast on the first missing, unreadable or non-regular file.
pub fn check_inputs(paths: &[PathBuf]) -> Result<(), DocsvcError> {
    if paths.is_empty() {
        return Err(DocsvcError::InvalidConfig(
            "at least one input file is required".into(),
        ));
    }
    for path in paths {
        check_input(path)?;
    }
    debug!("Preflight: {} input file(s) readable", paths.len());
    Ok(())
}

fn check_input(path: &Path) -> Result<(), DocsvcError> {
    let meta = match std::fs::metadata(path) {
        Ok(m) => m,
        Err(e) if e.kind() == std::io::ErrorKind::PermissionDenied => {
            return Err(DocsvcError::PermissionDenied {
                path: path.to_path_buf(),
            });
        }
        Err(_) => {
            return Err(DocsvcError::FileNotFound {
                path: path.to_path_buf(),
            });
        }
    };
    if !meta.is_file() {
        return Err(DocsvcError::NotAFile {
            path: path.to_path_buf(),
        });
    }

    // Check read permission by attempting to open
    match std::fs::File::open(path) {
        Ok(_) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::PermissionDenied => {
            Err(DocsvcError::PermissionDenied {
                path: path.to_path_buf(),
            })
        }
        Err(_) => Err(DocsvcError::FileNotFound {
            path: path.to_path_buf(),
        }),
    }
}

/// Case mode stores uploads by file name, so two inputs sharing a name would
/// overwrite each other server-side.
pub fn check_unique_names(paths: &[PathBuf]) -> Result<(), DocsvcError> {
    let mut seen = HashSet::new();
    for path in paths {
        let name = file_name_of(path);
        if !seen.insert(name.clone()) {
            return Err(DocsvcError::InvalidConfig(format!(
                "two inputs share the file name '{name}'; case uploads are keyed by name"
            )));
        }
    }
    Ok(())
}

/// Composes work units and trigger requests against one [`ServiceApi`].
pub struct JobSubmitter<'a> {
    api: &'a ServiceApi,
    progress: Option<&'a ProgressCallback>,
}

impl<'a> JobSubmitter<'a> {
    pub fn new(api: &'a ServiceApi, progress: Option<&'a ProgressCallback>) -> Self {
        Self { api, progress }
    }

    /// `POST /cases`. A missing, null or empty `case_id` is unrecoverable.
    pub async fn create_work_unit(&self, name: &str, note: &str) -> Result<WorkUnit, DocsvcError> {
        let parsed = match self.api.create_case(name, note).await {
            Ok(p) => p,
            Err(TransportError::Decode { body, .. }) => {
                return Err(DocsvcError::WorkUnitNotCreated {
                    what: "case",
                    raw: body,
                })
            }
            Err(source) => {
                return Err(DocsvcError::Request {
                    stage: Stage::CreateWorkUnit,
                    source,
                })
            }
        };

        match parsed.value.case_id {
            Some(id) if !id.trim().is_empty() && id != "null" => {
                info!("Created case {}", id);
                Ok(WorkUnit::Case {
                    case_id: CaseId(id),
                })
            }
            _ => Err(DocsvcError::WorkUnitNotCreated {
                what: "case",
                raw: parsed.raw,
            }),
        }
    }

    /// Upload each file into the case, one at a time.
    ///
    /// The first failure aborts with the failing path attached; files
    /// uploaded before it stay on the server.
    ///
    /// # Returns
    /// The file names the server now knows the uploads by.
    pub async fn upload_files(&self, unit: &WorkUnit, paths: &[PathBuf]) -> Result<Vec<String>, DocsvcError> {
        let case_id = match unit {
            WorkUnit::Case { case_id } => case_id,
            WorkUnit::Batch { .. } => {
                return Err(DocsvcError::Internal {
                    stage: Stage::Upload,
                    message: "per-file uploads only apply to case work units".into(),
                })
            }
        };

        let total = paths.len();
        let mut names = Vec::with_capacity(total);
        for (i, path) in paths.iter().enumerate() {
            let name = file_name_of(path);
            debug!("Uploading {}/{}: {}", i + 1, total, path.display());
            self.api
                .upload_case_file(case_id, path)
                .await
                .map_err(|source| DocsvcError::UploadFailed {
                    path: path.clone(),
                    source,
                })?;
            if let Some(cb) = self.progress {
                cb.on_file_uploaded(i + 1, total, &name);
            }
            names.push(name);
        }
        info!("Uploaded {} file(s) to case {}", names.len(), case_id);
        Ok(names)
    }

    /// `POST /files`: uploading the batch is what creates its work unit.
    ///
    /// # Returns
    /// The work unit and the names of the files the server accepted.
    pub async fn upload_batch(
        &self,
        paths: &[PathBuf],
        user_id: Option<&str>,
    ) -> Result<(WorkUnit, Vec<String>), DocsvcError> {
        let parsed = match self.api.upload_files(paths, user_id).await {
            Ok(p) => p,
            Err(TransportError::Decode { body, .. }) => {
                return Err(DocsvcError::WorkUnitNotCreated {
                    what: "file batch",
                    raw: body,
                })
            }
            Err(source) => {
                return Err(DocsvcError::Request {
                    stage: Stage::CreateWorkUnit,
                    source,
                })
            }
        };

        let ids: Vec<FileId> = parsed
            .value
            .file_ids
            .unwrap_or_default()
            .into_iter()
            .filter(|id| !id.trim().is_empty())
            .map(FileId)
            .collect();
        if ids.is_empty() {
            return Err(DocsvcError::WorkUnitNotCreated {
                what: "file batch",
                raw: parsed.raw,
            });
        }
        if ids.len() != paths.len() {
            warn!(
                "Server accepted {} of {} file(s); empty files are skipped",
                ids.len(),
                paths.len()
            );
        }
        let accepted = accepted_names(paths, &ids);
        if let Some(cb) = self.progress {
            for (i, name) in accepted.iter().enumerate() {
                cb.on_file_uploaded(i + 1, accepted.len(), name);
            }
        }
        info!("Uploaded batch of {} file(s)", ids.len());
        Ok((WorkUnit::Batch { file_ids: ids }, accepted))
    }

    /// Trigger conversion for the work unit.
    ///
    /// * case  → `POST /cases/{id}/convert`, must answer `queued: true`
    /// * batch → `POST /files:run` with `task_name`, must answer at least one run
    pub async fn trigger_conversion(
        &self,
        unit: &WorkUnit,
        filenames: &[String],
        params: &ConversionParams,
        task_name: &str,
    ) -> Result<Trigger, DocsvcError> {
        match unit {
            WorkUnit::Case { case_id } => {
                let parsed = self
                    .api
                    .convert_case(case_id, filenames, params)
                    .await
                    .map_err(not_queued)?;
                if parsed.value.queued == Some(true) {
                    info!("Conversion queued for case {}", case_id);
                    Ok(Trigger::Queued)
                } else {
                    Err(DocsvcError::NotQueued { raw: parsed.raw })
                }
            }
            WorkUnit::Batch { file_ids } => {
                let parsed = self
                    .api
                    .run_files(file_ids, task_name, params)
                    .await
                    .map_err(not_queued)?;
                let runs: Vec<TriggeredRun> = parsed
                    .value
                    .runs
                    .unwrap_or_default()
                    .into_iter()
                    .filter(|r| !r.task_run_id.trim().is_empty())
                    .map(|r| TriggeredRun {
                        handle: JobHandle(r.task_run_id),
                        file_id: r.file_id.map(FileId),
                    })
                    .collect();
                if runs.is_empty() {
                    return Err(DocsvcError::NotQueued { raw: parsed.raw });
                }
                info!("Triggered {} run(s) of '{}'", runs.len(), task_name);
                Ok(Trigger::Runs(runs))
            }
        }
    }
}

/// Names of the inputs behind `ids`, in upload order.
///
/// The service skips empty uploads and answers ids for the rest. When the
/// non-empty inputs don't line up with the ids either, the ids themselves
/// are the only honest names.
fn accepted_names(paths: &[PathBuf], ids: &[FileId]) -> Vec<String> {
    if ids.len() == paths.len() {
        return paths.iter().map(|p| file_name_of(p)).collect();
    }
    let non_empty: Vec<String> = paths
        .iter()
        .filter(|p| std::fs::metadata(p).is_ok_and(|m| m.len() > 0))
        .map(|p| file_name_of(p))
        .collect();
    if non_empty.len() == ids.len() {
        non_empty
    } else {
        ids.iter().map(|id| id.to_string()).collect()
    }
}

/// Decoding problems are a non-acknowledgement; everything else is a
/// transport failure of the trigger stage.
fn not_queued(e: TransportError) -> DocsvcError {
    match e {
        TransportError::Decode { body, .. } => DocsvcError::NotQueued { raw: body },
        source => DocsvcError::Request {
            stage: Stage::Trigger,
            source,
        },
    }
}
