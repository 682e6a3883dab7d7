//! Typed wrappers over the conversion service's HTTP contract.
//!
//! | Call | Endpoint |
//! |------|----------|
//! | [`ServiceApi::health`] | `GET /` |
//! | [`ServiceApi::create_case`] | `POST /cases` |
//! | [`ServiceApi::upload_case_file`] | `POST /cases/{case_id}/files` |
//! | [`ServiceApi::convert_case`] | `POST /cases/{case_id}/convert` |
//! | [`ServiceApi::list_results`] | `GET /cases/{case_id}/results` |
//! | [`ServiceApi::download_results_zip`] | `GET /cases/{case_id}/results.zip` |
//! | [`ServiceApi::upload_files`] | `POST /files` |
//! | [`ServiceApi::run_files`] | `POST /files:run` |
//! | [`ServiceApi::run_status`] | `GET /runs/{task_run_id}` |
//! | [`ServiceApi::export_pdf`] | `POST /files/{file_id}/to-pdf` |
//!
//! Response fields the caller must validate (`case_id`, `queued`,
//! `file_ids`, `runs`) are decoded as `Option` so the submitter, not serde,
//! decides what a missing value means and can dump the raw body.

use crate::config::ConversionParams;
use crate::error::TransportError;
use crate::model::{CaseId, FileId, JobHandle, PollState, ResultSet};
use crate::poll::{ResultSource, RunStatus, RunStatusSource};
use crate::transport::{ApiResponse, FormField, HttpTransport, Method, RequestBody};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::json;
use std::path::Path;
use std::time::Duration;

/// A decoded response plus the body exactly as the server sent it.
#[derive(Debug, Clone)]
pub struct Parsed<T> {
    pub value: T,
    pub raw: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct HealthResponse {
    #[serde(default)]
    pub ok: Option<bool>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CreateCaseResponse {
    #[serde(default)]
    pub case_id: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ConvertResponse {
    #[serde(default)]
    pub queued: Option<bool>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ResultsResponse {
    pub results: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct UploadFilesResponse {
    #[serde(default)]
    pub file_ids: Option<Vec<String>>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RunRef {
    pub task_run_id: String,
    #[serde(default)]
    pub file_id: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RunFilesResponse {
    #[serde(default)]
    pub runs: Option<Vec<RunRef>>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RunStatusResponse {
    pub status: String,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub started_at: Option<String>,
    #[serde(default)]
    pub finished_at: Option<String>,
}

/// The service's endpoints, bound to one transport.
#[derive(Debug, Clone)]
pub struct ServiceApi {
    transport: HttpTransport,
}

impl ServiceApi {
    pub fn new(transport: HttpTransport) -> Self {
        Self { transport }
    }

    pub fn transport(&self) -> &HttpTransport {
        &self.transport
    }

    /// `GET /`, the health check. Answers `{"ok": true}` when the service is up.
    pub async fn health(&self) -> Result<Parsed<HealthResponse>, TransportError> {
        let response = self
            .transport
            .call(Method::GET, &[""], RequestBody::Empty, None)
            .await?;
        decode(response)
    }

    // ── Case mode ────────────────────────────────────────────────────────

    pub async fn create_case(
        &self,
        name: &str,
        note: &str,
    ) -> Result<Parsed<CreateCaseResponse>, TransportError> {
        let body = RequestBody::Json(json!({ "name": name, "note": note }));
        let response = self
            .transport
            .call(Method::POST, &["cases"], body, None)
            .await?;
        decode(response)
    }

    /// Upload one file as multipart field `file`. The ack has no required fields.
    pub async fn upload_case_file(&self, case_id: &CaseId, path: &Path) -> Result<(), TransportError> {
        let body = RequestBody::Multipart(vec![FormField::file("file", path)]);
        self.transport
            .call(Method::POST, &["cases", case_id.as_str(), "files"], body, None)
            .await?;
        Ok(())
    }

    pub async fn convert_case(
        &self,
        case_id: &CaseId,
        filenames: &[String],
        params: &ConversionParams,
    ) -> Result<Parsed<ConvertResponse>, TransportError> {
        let body = RequestBody::Multipart(convert_form(filenames, params));
        let response = self
            .transport
            .call(Method::POST, &["cases", case_id.as_str(), "convert"], body, None)
            .await?;
        decode(response)
    }

    /// `timeout` overrides the transport default for this one call.
    pub async fn list_results(
        &self,
        case_id: &CaseId,
        timeout: Option<Duration>,
    ) -> Result<ResultSet, TransportError> {
        let response = self
            .transport
            .call(
                Method::GET,
                &["cases", case_id.as_str(), "results"],
                RequestBody::Empty,
                timeout,
            )
            .await?;
        let parsed: Parsed<ResultsResponse> = decode(response)?;
        Ok(parsed.value.results.into_iter().collect())
    }

    /// Download the packaged archive to `dest`; may 404 if not produced yet.
    pub async fn download_results_zip(&self, case_id: &CaseId, dest: &Path) -> Result<u64, TransportError> {
        self.transport
            .download(Method::GET, &["cases", case_id.as_str(), "results.zip"], dest, None)
            .await
    }

    // ── Batch mode ───────────────────────────────────────────────────────

    /// Upload every path in one request as repeatable field `files`.
    pub async fn upload_files(
        &self,
        paths: &[impl AsRef<Path>],
        user_id: Option<&str>,
    ) -> Result<Parsed<UploadFilesResponse>, TransportError> {
        let mut fields: Vec<FormField> = paths
            .iter()
            .map(|p| FormField::file("files", p.as_ref()))
            .collect();
        if let Some(user) = user_id {
            fields.push(FormField::text("user_id", user));
        }
        let response = self
            .transport
            .call(Method::POST, &["files"], RequestBody::Multipart(fields), None)
            .await?;
        decode(response)
    }

    pub async fn run_files(
        &self,
        file_ids: &[FileId],
        task_name: &str,
        params: &ConversionParams,
    ) -> Result<Parsed<RunFilesResponse>, TransportError> {
        let body = RequestBody::Json(json!({
            "file_ids": file_ids,
            "name": task_name,
            "params": {
                "image_format": params.image_format,
                "dpi": params.dpi,
                "max_side": params.max_side,
            },
        }));
        let response = self
            .transport
            .call(Method::POST, &["files:run"], body, None)
            .await?;
        decode(response)
    }

    pub async fn run_status(
        &self,
        handle: &JobHandle,
        timeout: Option<Duration>,
    ) -> Result<Parsed<RunStatusResponse>, TransportError> {
        let response = self
            .transport
            .call(Method::GET, &["runs", handle.as_str()], RequestBody::Empty, timeout)
            .await?;
        decode(response)
    }

    /// `POST /files/{file_id}/to-pdf`: synchronous conversion of one
    /// uploaded file, answered with the PDF bytes, written to `dest`.
    pub async fn export_pdf(&self, file_id: &FileId, dest: &Path) -> Result<u64, TransportError> {
        self.transport
            .download(Method::POST, &["files", file_id.as_str(), "to-pdf"], dest, None)
            .await
    }

    // ── Pointers for manual retrieval ────────────────────────────────────

    pub fn results_url(&self, case_id: &CaseId) -> String {
        self.transport.url(&["cases", case_id.as_str(), "results"])
    }

    pub fn results_zip_url(&self, case_id: &CaseId) -> String {
        self.transport.url(&["cases", case_id.as_str(), "results.zip"])
    }

    /// Per-entry download pointer; entry names are percent-encoded.
    pub fn entry_url(&self, case_id: &CaseId, entry: &str) -> String {
        self.transport.url(&["cases", case_id.as_str(), "results", entry])
    }

    /// Per-call timeout for a poll query: the remaining budget, capped by
    /// the transport default.
    fn within(&self, budget: Duration) -> Option<Duration> {
        Some(budget.min(self.transport.default_timeout()))
    }
}

impl RunStatusSource for ServiceApi {
    async fn run_status(&self, handle: &JobHandle, budget: Duration) -> Result<RunStatus, TransportError> {
        let parsed = ServiceApi::run_status(self, handle, self.within(budget)).await?;
        let RunStatusResponse {
            status,
            error,
            started_at,
            finished_at,
        } = parsed.value;
        Ok(RunStatus {
            state: PollState::from_wire(&status),
            error,
            started_at,
            finished_at,
        })
    }
}

impl ResultSource for ServiceApi {
    async fn list_results(&self, case_id: &CaseId, budget: Duration) -> Result<ResultSet, TransportError> {
        ServiceApi::list_results(self, case_id, self.within(budget)).await
    }
}

/// Multipart fields of the case convert request. `max_side` is omitted
/// when unconstrained.
fn convert_form(filenames: &[String], params: &ConversionParams) -> Vec<FormField> {
    let mut fields: Vec<FormField> = filenames
        .iter()
        .map(|name| FormField::text("filenames", name.as_str()))
        .collect();
    fields.push(FormField::text("dpi", params.dpi.to_string()));
    fields.push(FormField::text("image_format", params.image_format.as_str()));
    fields.push(FormField::text("pack_zip", params.pack_zip.to_string()));
    fields.push(FormField::text("filename_prefix", params.filename_prefix.as_str()));
    if let Some(max_side) = params.max_side {
        fields.push(FormField::text("max_side", max_side.to_string()));
    }
    fields
}

fn decode<T: DeserializeOwned>(response: ApiResponse) -> Result<Parsed<T>, TransportError> {
    match serde_json::from_value::<T>(response.body) {
        Ok(value) => Ok(Parsed {
            value,
            raw: response.raw,
        }),
        Err(e) => Err(TransportError::Decode {
            url: response.url,
            reason: e.to_string(),
            body: response.raw,
        }),
    }
}
