//! Configuration types for a submit / wait / fetch run.
//!
//! All run behaviour is controlled through [`ClientConfig`], built via its
//! [`ClientConfigBuilder`]. The config is constructed once at startup and
//! passed by reference into every component; nothing in the library reads
//! the process environment. The CLI is the only place that maps `BASE_URL`,
//! `POLL_TIMEOUT` and friends onto builder calls.

use crate::error::DocsvcError;
use crate::progress::ProgressCallback;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

/// Configuration for one client invocation.
///
/// # Example
/// ```rust
/// use docsvc_client::{ClientConfig, ImageFormat, SubmitMode};
/// use std::time::Duration;
///
/// let config = ClientConfig::builder()
///     .base_url("http://localhost:8000")
///     .mode(SubmitMode::Batch)
///     .image_format(ImageFormat::Webp)
///     .poll_timeout(Duration::from_secs(120))
///     .build()
///     .unwrap();
/// assert_eq!(config.params.image_format, ImageFormat::Webp);
/// ```
#[derive(Clone)]
pub struct ClientConfig {
    /// Service root, without a trailing slash. Default: `http://localhost:8000`.
    pub base_url: String,

    /// Which work unit the run creates. Default: [`SubmitMode::Case`].
    pub mode: SubmitMode,

    /// Case name sent to `POST /cases`. Default: `docsvc-cli`.
    pub case_name: String,

    /// Free-text case note. Default: empty.
    pub case_note: String,

    /// Server-side task name for `POST /files:run`. Default: `doc_convert`.
    ///
    /// Only used in batch mode. The service also registers `to_pdf` and
    /// `vlm_ocr`.
    pub task_name: String,

    /// Owner sent with batch uploads. `None` lets the server default to
    /// its anonymous user.
    pub user_id: Option<String>,

    /// Where the packaged artifact is downloaded. Default: `./out`.
    pub out_dir: PathBuf,

    /// Batch mode: after the wait, pull a PDF of every uploaded file via
    /// `POST /files/{file_id}/to-pdf` into `out_dir`. Default: `false`.
    pub export_pdf: bool,

    /// Conversion parameters forwarded to the trigger call.
    pub params: ConversionParams,

    /// Sleep between poll ticks. Default: 3 s.
    pub poll_interval: Duration,

    /// Wall-clock bound on the whole wait. Default: 600 s.
    pub poll_timeout: Duration,

    /// Per-HTTP-call timeout. Default: 60 s.
    pub request_timeout: Duration,

    /// Status queries in flight at once within a single poll tick. Default: 8.
    pub status_concurrency: usize,

    /// Stage and poll-tick events. Default: none.
    pub progress_callback: Option<ProgressCallback>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8000".to_string(),
            mode: SubmitMode::default(),
            case_name: "docsvc-cli".to_string(),
            case_note: String::new(),
            task_name: "doc_convert".to_string(),
            user_id: None,
            out_dir: PathBuf::from("./out"),
            export_pdf: false,
            params: ConversionParams::default(),
            poll_interval: Duration::from_secs(3),
            poll_timeout: Duration::from_secs(600),
            request_timeout: Duration::from_secs(60),
            status_concurrency: 8,
            progress_callback: None,
        }
    }
}

impl fmt::Debug for ClientConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientConfig")
            .field("base_url", &self.base_url)
            .field("mode", &self.mode)
            .field("case_name", &self.case_name)
            .field("task_name", &self.task_name)
            .field("user_id", &self.user_id)
            .field("out_dir", &self.out_dir)
            .field("export_pdf", &self.export_pdf)
            .field("params", &self.params)
            .field("poll_interval", &self.poll_interval)
            .field("poll_timeout", &self.poll_timeout)
            .field("request_timeout", &self.request_timeout)
            .field("status_concurrency", &self.status_concurrency)
            .field(
                "progress_callback",
                &self.progress_callback.as_ref().map(|_| "<dyn WorkflowProgressCallback>"),
            )
            .finish()
    }
}

impl ClientConfig {
    /// Create a new builder for `ClientConfig`.
    pub fn builder() -> ClientConfigBuilder {
        ClientConfigBuilder {
            config: Self::default(),
        }
    }
}

/// Builder for [`ClientConfig`].
#[derive(Debug)]
pub struct ClientConfigBuilder {
    config: ClientConfig,
}

impl ClientConfigBuilder {
    pub fn base_url(mut self, url: impl Into<String>) -> Self {
        self.config.base_url = url.into().trim().trim_end_matches('/').to_string();
        self
    }

    pub fn mode(mut self, mode: SubmitMode) -> Self {
        self.config.mode = mode;
        self
    }

    pub fn case_name(mut self, name: impl Into<String>) -> Self {
        self.config.case_name = name.into();
        self
    }

    pub fn case_note(mut self, note: impl Into<String>) -> Self {
        self.config.case_note = note.into();
        self
    }

    pub fn task_name(mut self, name: impl Into<String>) -> Self {
        self.config.task_name = name.into();
        self
    }

    pub fn user_id(mut self, user: impl Into<String>) -> Self {
        self.config.user_id = Some(user.into());
        self
    }

    pub fn out_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.out_dir = dir.into();
        self
    }

    pub fn export_pdf(mut self, v: bool) -> Self {
        self.config.export_pdf = v;
        self
    }

    pub fn dpi(mut self, dpi: u32) -> Self {
        self.config.params.dpi = dpi;
        self
    }

    /// `None` leaves the rendered size unconstrained.
    pub fn max_side(mut self, px: Option<u32>) -> Self {
        self.config.params.max_side = px;
        self
    }

    pub fn image_format(mut self, format: ImageFormat) -> Self {
        self.config.params.image_format = format;
        self
    }

    pub fn pack_zip(mut self, v: bool) -> Self {
        self.config.params.pack_zip = v;
        self
    }

    pub fn filename_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.config.params.filename_prefix = prefix.into();
        self
    }

    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.config.poll_interval = interval;
        self
    }

    pub fn poll_timeout(mut self, timeout: Duration) -> Self {
        self.config.poll_timeout = timeout;
        self
    }

    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.config.request_timeout = timeout;
        self
    }

    pub fn status_concurrency(mut self, n: usize) -> Self {
        self.config.status_concurrency = n.max(1);
        self
    }

    pub fn progress_callback(mut self, cb: ProgressCallback) -> Self {
        self.config.progress_callback = Some(cb);
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<ClientConfig, DocsvcError> {
        let c = &self.config;

        match reqwest::Url::parse(&c.base_url) {
            Ok(url) if matches!(url.scheme(), "http" | "https") => {}
            Ok(url) => {
                return Err(DocsvcError::InvalidConfig(format!(
                    "BASE_URL must be http or https, got scheme '{}'",
                    url.scheme()
                )))
            }
            Err(e) => {
                return Err(DocsvcError::InvalidConfig(format!(
                    "BASE_URL '{}' is not a valid URL: {e}",
                    c.base_url
                )))
            }
        }
        if !(36..=1200).contains(&c.params.dpi) {
            return Err(DocsvcError::InvalidConfig(format!(
                "DPI must be 36–1200, got {}",
                c.params.dpi
            )));
        }
        if c.params.max_side == Some(0) {
            return Err(DocsvcError::InvalidConfig(
                "MAX_SIDE must be ≥ 1 (leave it empty for unconstrained)".into(),
            ));
        }
        if c.params.filename_prefix.contains(['/', '\\']) {
            return Err(DocsvcError::InvalidConfig(format!(
                "FILENAME_PREFIX must not contain path separators, got '{}'",
                c.params.filename_prefix
            )));
        }
        if c.case_name.trim().is_empty() {
            return Err(DocsvcError::InvalidConfig("CASE_NAME must not be empty".into()));
        }
        if c.task_name.trim().is_empty() {
            return Err(DocsvcError::InvalidConfig("task name must not be empty".into()));
        }
        if c.poll_interval.is_zero() {
            return Err(DocsvcError::InvalidConfig(
                "POLL_INTERVAL must be greater than zero".into(),
            ));
        }
        if c.request_timeout.is_zero() {
            return Err(DocsvcError::InvalidConfig(
                "request timeout must be greater than zero".into(),
            ));
        }
        Ok(self.config)
    }
}

// ── Enums ────────────────────────────────────────────────────────────────

/// Which kind of work unit a run creates, and therefore how completion is
/// detected.
///
/// | Mode | Work unit | Trigger ack | Completion signal |
/// |------|-----------|-------------|-------------------|
/// | `Case` | `case_id` | `{queued: bool}` | result listing changed |
/// | `Batch` | `file_ids` | one `task_run_id` per file | every run terminal |
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SubmitMode {
    #[default]
    Case,
    Batch,
}

/// Output image format requested from the service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ImageFormat {
    #[default]
    Png,
    Jpeg,
    Webp,
    Tiff,
}

impl ImageFormat {
    /// Wire spelling expected by the service.
    pub fn as_str(self) -> &'static str {
        match self {
            ImageFormat::Png => "PNG",
            ImageFormat::Jpeg => "JPEG",
            ImageFormat::Webp => "WEBP",
            ImageFormat::Tiff => "TIFF",
        }
    }
}

impl fmt::Display for ImageFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ImageFormat {
    type Err = DocsvcError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "PNG" => Ok(ImageFormat::Png),
            "JPEG" | "JPG" => Ok(ImageFormat::Jpeg),
            "WEBP" => Ok(ImageFormat::Webp),
            "TIFF" | "TIF" => Ok(ImageFormat::Tiff),
            other => Err(DocsvcError::InvalidConfig(format!(
                "IMAGE_FORMAT must be one of PNG, JPEG, WEBP, TIFF (got '{other}')"
            ))),
        }
    }
}

/// Conversion parameters carried by the trigger request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversionParams {
    /// Render resolution. Default: 220 (the worker's own default).
    pub dpi: u32,
    /// Longest-edge bound in pixels; `None` is unconstrained.
    pub max_side: Option<u32>,
    pub image_format: ImageFormat,
    /// Ask the service to pack all images into one archive. Default: true.
    pub pack_zip: bool,
    /// Prefix for generated image names. Default: `page`.
    pub filename_prefix: String,
}

impl Default for ConversionParams {
    fn default() -> Self {
        Self {
            dpi: 220,
            max_side: None,
            image_format: ImageFormat::default(),
            pack_zip: true,
            filename_prefix: "page".to_string(),
        }
    }
}
