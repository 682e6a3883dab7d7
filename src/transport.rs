//! HTTP transport: one request in, one parsed response (or error) out.
//!
//! ## Why a thin layer?
//!
//! Every endpoint of the conversion service answers JSON, accepts either a
//! JSON or a multipart body, and reports problems through its status code
//! plus a body worth showing to the user. Centralising that here means the
//! submitter, poller and fetcher never touch `reqwest` directly and every
//! failure carries the raw server response upward.
//!
//! No retries at this layer. The poller owns re-querying; submission calls
//! are never retried.
//!
//! Paths are passed as segments and percent-encoded one by one, so ids the
//! server hands back (`case_id`, `task_run_id`) can never add or remove
//! path components.

use crate::error::TransportError;
use futures::StreamExt;
use reqwest::multipart::{Form, Part};
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tracing::debug;

pub use reqwest::Method;

/// Body of an outgoing request.
#[derive(Debug, Clone)]
pub enum RequestBody {
    Empty,
    Json(Value),
    Multipart(Vec<FormField>),
}

/// One multipart field. Repeating a name sends a repeatable field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FormField {
    pub name: String,
    pub value: FieldValue,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldValue {
    Text(String),
    /// Read from disk at send time and sent under its file name.
    File(PathBuf),
}

impl FormField {
    pub fn text(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: FieldValue::Text(value.into()),
        }
    }

    pub fn file(name: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            value: FieldValue::File(path.into()),
        }
    }
}

/// A successful (2xx) response.
#[derive(Debug, Clone)]
pub struct ApiResponse {
    /// Absolute URL the request went to.
    pub url: String,
    pub status: u16,
    /// Parsed JSON body; `Value::Null` for an empty body.
    pub body: Value,
    /// Body exactly as received, for diagnostic dumps.
    pub raw: String,
}

/// reqwest-backed transport bound to one service root.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
    base: reqwest::Url,
    default_timeout: Duration,
}

impl HttpTransport {
    /// Create a transport for `base_url`. A trailing slash is ignored.
    pub fn new(base_url: &str, default_timeout: Duration) -> Result<Self, TransportError> {
        let base = reqwest::Url::parse(base_url.trim().trim_end_matches('/')).map_err(|e| {
            TransportError::Build {
                reason: format!("invalid base URL '{base_url}': {e}"),
            }
        })?;
        if base.cannot_be_a_base() {
            return Err(TransportError::Build {
                reason: format!("base URL '{base_url}' cannot carry a path"),
            });
        }

        let client = reqwest::Client::builder()
            .user_agent(concat!("docsvc-client/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| TransportError::Build {
                reason: e.to_string(),
            })?;

        Ok(Self {
            client,
            base,
            default_timeout,
        })
    }

    pub fn base_url(&self) -> &str {
        self.base.as_str().trim_end_matches('/')
    }

    pub fn default_timeout(&self) -> Duration {
        self.default_timeout
    }

    /// Absolute URL for the service path made of `segments`.
    ///
    /// Each segment is percent-encoded on its own, `/` included; `.` and
    /// `..` segments are dropped. `&[""]` addresses the service root.
    pub fn url(&self, segments: &[&str]) -> String {
        let mut url = self.base.clone();
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().extend(segments);
        }
        url.to_string()
    }

    /// Issue one request and parse the JSON response.
    ///
    /// Any non-2xx status, connection failure, timeout or non-JSON 2xx body
    /// is returned as a [`TransportError`]; callers decide whether it is
    /// fatal.
    pub async fn call(
        &self,
        method: Method,
        segments: &[&str],
        body: RequestBody,
        timeout: Option<Duration>,
    ) -> Result<ApiResponse, TransportError> {
        let url = self.url(segments);
        let timeout = timeout.unwrap_or(self.default_timeout);

        let request = self.client.request(method.clone(), &url).timeout(timeout);
        let request = match body {
            RequestBody::Empty => request,
            RequestBody::Json(value) => request.json(&value),
            RequestBody::Multipart(fields) => request.multipart(build_form(fields).await?),
        };

        debug!("{} {}", method, url);
        let response = request
            .send()
            .await
            .map_err(|e| map_reqwest_error(&url, timeout, e))?;

        let status = response.status();
        let raw = response
            .text()
            .await
            .map_err(|e| map_reqwest_error(&url, timeout, e))?;
        debug!("{} {} → {}", method, url, status.as_u16());

        if !status.is_success() {
            return Err(TransportError::Status {
                url,
                status: status.as_u16(),
                body: raw,
            });
        }

        let body = if raw.trim().is_empty() {
            Value::Null
        } else {
            match serde_json::from_str(&raw) {
                Ok(v) => v,
                Err(e) => {
                    return Err(TransportError::Decode {
                        url,
                        reason: format!("body is not JSON: {e}"),
                        body: raw,
                    })
                }
            }
        };

        Ok(ApiResponse {
            url,
            status: status.as_u16(),
            body,
            raw,
        })
    }

    /// Request a binary body and write it to `dest`.
    ///
    /// The body is streamed into a temp file next to `dest` which is renamed
    /// into place only after the last chunk arrived, so a failed download
    /// never leaves a truncated archive behind.
    ///
    /// # Returns
    /// The number of bytes written.
    pub async fn download(
        &self,
        method: Method,
        segments: &[&str],
        dest: &Path,
        timeout: Option<Duration>,
    ) -> Result<u64, TransportError> {
        let url = self.url(segments);
        let timeout = timeout.unwrap_or(self.default_timeout);

        debug!("{} {} → {}", method, url, dest.display());
        let response = self
            .client
            .request(method, &url)
            .timeout(timeout)
            .send()
            .await
            .map_err(|e| map_reqwest_error(&url, timeout, e))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(TransportError::Status {
                url,
                status: status.as_u16(),
                body,
            });
        }

        let parent = match dest.parent() {
            Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
            _ => PathBuf::from("."),
        };
        let (file, tmp_path) = tempfile::NamedTempFile::new_in(&parent)
            .map_err(|e| io_error(&parent, e))?
            .into_parts();
        let mut file = tokio::fs::File::from_std(file);

        let mut written = 0u64;
        let mut chunks = response.bytes_stream();
        while let Some(chunk) = chunks.next().await {
            let chunk = chunk.map_err(|e| map_reqwest_error(&url, timeout, e))?;
            file.write_all(&chunk)
                .await
                .map_err(|e| io_error(&tmp_path, e))?;
            written += chunk.len() as u64;
        }
        file.flush().await.map_err(|e| io_error(&tmp_path, e))?;
        drop(file);

        tmp_path
            .persist(dest)
            .map_err(|e| io_error(dest, e.error))?;

        Ok(written)
    }
}

/// Assemble a multipart form, reading file fields from disk.
async fn build_form(fields: Vec<FormField>) -> Result<Form, TransportError> {
    let mut form = Form::new();
    for field in fields {
        form = match field.value {
            FieldValue::Text(value) => form.text(field.name, value),
            FieldValue::File(path) => {
                let data = tokio::fs::read(&path)
                    .await
                    .map_err(|e| io_error(&path, e))?;
                let file_name = file_name_of(&path);
                let part = Part::bytes(data)
                    .file_name(file_name)
                    .mime_str(guess_mime(&path))
                    .map_err(|e| TransportError::Build {
                        reason: e.to_string(),
                    })?;
                form.part(field.name, part)
            }
        };
    }
    Ok(form)
}

/// Last path component as a UTF-8 string; what the server stores as the
/// user-facing file name.
pub fn file_name_of(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "upload.bin".to_string())
}

/// Content type for an upload, from its extension.
fn guess_mime(path: &Path) -> &'static str {
    let ext = path
        .extension()
        .map(|e| e.to_string_lossy().to_ascii_lowercase())
        .unwrap_or_default();
    match ext.as_str() {
        "pdf" => "application/pdf",
        "doc" => "application/msword",
        "docx" => "application/vnd.openxmlformats-officedocument.wordprocessingml.document",
        "ppt" => "application/vnd.ms-powerpoint",
        "pptx" => "application/vnd.openxmlformats-officedocument.presentationml.presentation",
        "xls" => "application/vnd.ms-excel",
        "xlsx" => "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet",
        "odt" => "application/vnd.oasis.opendocument.text",
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "webp" => "image/webp",
        "tif" | "tiff" => "image/tiff",
        "txt" => "text/plain",
        _ => "application/octet-stream",
    }
}

fn map_reqwest_error(url: &str, timeout: Duration, e: reqwest::Error) -> TransportError {
    if e.is_timeout() {
        TransportError::Timeout {
            url: url.to_string(),
            after: timeout,
        }
    } else {
        TransportError::Connect {
            url: url.to_string(),
            reason: e.to_string(),
        }
    }
}

fn io_error(path: &Path, source: std::io::Error) -> TransportError {
    TransportError::Io {
        path: path.to_path_buf(),
        source,
    }
}
