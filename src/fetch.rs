//! Result retrieval.
//!
//! Case mode: the packaged `results.zip` is the preferred artifact. If it
//! cannot be downloaded (not packed yet, `pack_zip=false`, network trouble)
//! the fetcher lists the case's results once and hands back pointers the
//! user can follow by hand.
//!
//! Batch mode: optionally pulls a PDF rendition of each uploaded file
//! through the service's synchronous `to-pdf` endpoint.
//!
//! Nothing here is fatal: by the time we fetch, the conversion has been
//! queued and the run counts as reached.

use crate::api::ServiceApi;
use crate::error::TransportError;
use crate::model::{CaseId, FileId};
use serde::Serialize;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// One result entry with its download pointer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResultEntry {
    pub name: String,
    pub url: String,
}

/// How the fetch stage ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FetchOutcome {
    /// The archive is on disk.
    Downloaded { path: PathBuf, bytes: u64 },
    /// No archive; the listing worked and names what the user can pull.
    Fallback {
        reason: String,
        listing_url: String,
        entries: Vec<ResultEntry>,
    },
    /// Neither the archive nor the listing could be retrieved.
    Unavailable {
        reason: String,
        listing_error: String,
        listing_url: String,
    },
}

impl FetchOutcome {
    pub fn is_downloaded(&self) -> bool {
        matches!(self, FetchOutcome::Downloaded { .. })
    }
}

/// One `to-pdf` export in batch mode.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PdfExport {
    Saved {
        file_id: FileId,
        path: PathBuf,
        bytes: u64,
    },
    Failed { file_id: FileId, reason: String },
}

/// Reduce a server-assigned id to a single safe file-name component.
///
/// Anything outside `[A-Za-z0-9._-]` becomes `_` and leading dots are
/// dropped, so the name can neither leave `out_dir` nor hide itself.
fn local_name(id: &str) -> String {
    let cleaned: String = id
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') {
                c
            } else {
                '_'
            }
        })
        .collect();
    match cleaned.trim_start_matches('.') {
        "" => "unnamed".to_string(),
        name => name.to_string(),
    }
}

/// Where the archive for `case_id` lands inside `out_dir`.
pub fn artifact_path(out_dir: &Path, case_id: &CaseId) -> PathBuf {
    out_dir.join(format!("{}_results.zip", local_name(case_id.as_str())))
}

/// Where the PDF rendition of `file_id` lands inside `out_dir`.
pub fn pdf_path(out_dir: &Path, file_id: &FileId) -> PathBuf {
    out_dir.join(format!("{}.pdf", local_name(file_id.as_str())))
}

/// Download the packaged archive, falling back to one listing call.
pub async fn fetch_packaged_artifact(api: &ServiceApi, case_id: &CaseId, out_dir: &Path) -> FetchOutcome {
    let dest = artifact_path(out_dir, case_id);
    let reason = match api.download_results_zip(case_id, &dest).await {
        Ok(bytes) => {
            info!("Saved {} ({} bytes)", dest.display(), bytes);
            return FetchOutcome::Downloaded { path: dest, bytes };
        }
        Err(e) => {
            warn!("Could not download results archive: {}", e);
            match e.status() {
                Some(404) => "results archive not available (HTTP 404)".to_string(),
                _ => e.to_string(),
            }
        }
    };

    let listing_url = api.results_url(case_id);
    match list_result_entries(api, case_id).await {
        Ok(entries) => {
            info!("Listed {} result entries for manual retrieval", entries.len());
            FetchOutcome::Fallback {
                reason,
                listing_url,
                entries,
            }
        }
        Err(e) => {
            warn!("Result listing failed as well: {}", e);
            FetchOutcome::Unavailable {
                reason,
                listing_error: e.to_string(),
                listing_url,
            }
        }
    }
}

/// Current result entries of a case, each with its per-entry URL.
pub async fn list_result_entries(api: &ServiceApi, case_id: &CaseId) -> Result<Vec<ResultEntry>, TransportError> {
    let names = api.list_results(case_id, None).await?;
    Ok(names
        .into_iter()
        .map(|name| ResultEntry {
            url: api.entry_url(case_id, &name),
            name,
        })
        .collect())
}

/// Convert every file to PDF through `POST /files/{id}/to-pdf`, one at a time.
///
/// The endpoint converts synchronously, so each call may take as long as
/// the request timeout allows. Failures are recorded per file.
pub async fn export_pdfs(api: &ServiceApi, file_ids: &[FileId], out_dir: &Path) -> Vec<PdfExport> {
    let mut exports = Vec::with_capacity(file_ids.len());
    for file_id in file_ids {
        let dest = pdf_path(out_dir, file_id);
        let export = match api.export_pdf(file_id, &dest).await {
            Ok(bytes) => {
                info!("Saved {} ({} bytes)", dest.display(), bytes);
                PdfExport::Saved {
                    file_id: file_id.clone(),
                    path: dest,
                    bytes,
                }
            }
            Err(e) => {
                warn!("PDF export of file {} failed: {}", file_id, e);
                PdfExport::Failed {
                    file_id: file_id.clone(),
                    reason: e.to_string(),
                }
            }
        };
        exports.push(export);
    }
    exports
}
