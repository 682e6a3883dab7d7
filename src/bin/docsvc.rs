//! CLI binary for docsvc-client.
//!
//! A thin shim over the library crate that maps flags and environment
//! variables to `ClientConfig` and prints the run report.

use anyhow::{Context, Result};
use clap::builder::BoolishValueParser;
use clap::{ArgAction, Parser};
use docsvc_client::poll::HandleStatus;
use docsvc_client::{
    run, ClientConfig, DocsvcError, FetchOutcome, ImageFormat, PdfExport, PollState,
    ProgressCallback, RunOutcome, RunReport, Stage, SubmitMode, WaitDetail,
    WorkflowProgressCallback,
};
use indicatif::{ProgressBar, ProgressStyle};
use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

// ── ANSI colour helpers (no extra deps) ──────────────────────────────────────

fn green(s: &str) -> String {
    format!("\x1b[32m{s}\x1b[0m")
}
fn red(s: &str) -> String {
    format!("\x1b[31m{s}\x1b[0m")
}
fn dim(s: &str) -> String {
    format!("\x1b[2m{s}\x1b[0m")
}
fn bold(s: &str) -> String {
    format!("\x1b[1m{s}\x1b[0m")
}
fn cyan(s: &str) -> String {
    format!("\x1b[36m{s}\x1b[0m")
}

const STAGE_COUNT: u8 = 6;

// ── CLI progress callback using indicatif ────────────────────────────────────

/// Prints one line per stage event. With a live spinner the lines are
/// printed above it; without one they go straight to stderr.
struct CliProgressCallback {
    bar: ProgressBar,
}

impl CliProgressCallback {
    fn new(spinner: bool) -> Arc<Self> {
        let bar = if spinner {
            let bar = ProgressBar::new_spinner();
            let style = ProgressStyle::with_template("{spinner:.cyan} {prefix:.bold}  {msg}  {elapsed:.dim}")
                .unwrap_or_else(|_| ProgressStyle::default_spinner())
                .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"]);
            bar.set_style(style);
            bar.enable_steady_tick(Duration::from_millis(80));
            bar
        } else {
            ProgressBar::hidden()
        };
        Arc::new(Self { bar })
    }

    fn line(&self, msg: String) {
        if self.bar.is_hidden() {
            eprintln!("{msg}");
        } else {
            self.bar.println(msg);
        }
    }

    fn finish(&self) {
        self.bar.finish_and_clear();
    }
}

impl WorkflowProgressCallback for CliProgressCallback {
    fn on_stage_start(&self, stage: Stage) {
        self.bar.set_prefix(format!("[{}/{}]", stage.number(), STAGE_COUNT));
        self.bar.set_message(format!("{stage}…"));
        if self.bar.is_hidden() {
            self.line(format!(
                "{} {}",
                cyan("◆"),
                bold(&format!("[{}/{}] {stage}…", stage.number(), STAGE_COUNT))
            ));
        }
    }

    fn on_stage_complete(&self, stage: Stage, detail: &str) {
        self.line(format!(
            "  {} [{}/{}] {:<20} {}",
            green("✓"),
            stage.number(),
            STAGE_COUNT,
            stage.to_string(),
            dim(detail)
        ));
    }

    fn on_stage_failed(&self, stage: Stage, error: &str, fatal: bool) {
        // First line only; the full error is printed on exit.
        let first = error.lines().next().unwrap_or(error);
        let mark = if fatal { red("✗") } else { cyan("⚠") };
        self.line(format!(
            "  {} [{}/{}] {:<20} {}",
            mark,
            stage.number(),
            STAGE_COUNT,
            stage.to_string(),
            if fatal { red(first) } else { first.to_string() }
        ));
    }

    fn on_file_uploaded(&self, index: usize, total: usize, file_name: &str) {
        self.bar.set_message(format!("uploaded {index}/{total}: {file_name}"));
        if self.bar.is_hidden() {
            self.line(format!("    {} {index}/{total} {file_name}", dim("↑")));
        }
    }

    fn on_poll_tick(&self, attempt: u32, elapsed: Duration, summary: &str) {
        self.bar
            .set_message(format!("poll #{attempt} · {}s · {summary}", elapsed.as_secs()));
        if self.bar.is_hidden() {
            self.line(format!(
                "    {} poll #{attempt} {} {summary}",
                dim("·"),
                dim(&format!("({}s)", elapsed.as_secs()))
            ));
        }
    }
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # Convert two documents into page images, wait up to 10 minutes
  docsvc report.docx slides.pptx

  # Point at another service and keep archives elsewhere
  BASE_URL=http://convert.internal:8000 OUT_DIR=/tmp/pages docsvc report.pdf

  # Smaller WEBP pages, no archive (results are listed instead)
  docsvc --image-format WEBP --max-side 1600 --pack-zip false report.pdf

  # Batch mode: one tracked run per file
  docsvc --mode batch --task-name to_pdf a.docx b.docx c.docx

  # Batch mode, then pull a PDF of every file into OUT_DIR
  docsvc --mode batch --export-pdf a.docx b.pptx

  # Machine-readable report
  docsvc --json report.pdf > report.json

ENVIRONMENT VARIABLES:
  BASE_URL                Service root (default http://localhost:8000)
  CASE_NAME, CASE_NOTE    Case metadata
  OUT_DIR                 Where results.zip is saved (default ./out)
  DPI                     Render resolution, 36–1200 (default 220)
  MAX_SIDE                Longest page side in pixels; empty = unconstrained
  IMAGE_FORMAT            PNG, JPEG, WEBP or TIFF (default PNG)
  PACK_ZIP                Ask the service for a results.zip (default true)
  FILENAME_PREFIX         Prefix of generated page images (default page)
  POLL_INTERVAL           Seconds between status checks (default 3)
  POLL_TIMEOUT            Seconds before giving up waiting (default 600)
  DOCSVC_EXPORT_PDF       Batch mode: save a PDF per file via to-pdf (default false)
  RUST_LOG                Overrides the log filter (e.g. docsvc_client=debug)

EXIT STATUS:
  0   the conversion was queued; timeouts and a missing archive are warnings
  1   aborted before queuing (bad input, case not created, upload failed, …)
"#;

/// Submit documents to the conversion service, wait, and fetch the results.
#[derive(Parser, Debug)]
#[command(
    name = "docsvc",
    version,
    about = "Submit documents to the conversion service, wait, and fetch the results",
    long_about = "Upload documents to an asynchronous document-conversion service, trigger the \
conversion, poll until it completes or a deadline passes, then download the packaged results \
(or list them for manual retrieval).",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    /// Local files to convert.
    #[arg(required = true)]
    inputs: Vec<PathBuf>,

    /// Service root URL.
    #[arg(long, env = "BASE_URL", default_value = "http://localhost:8000")]
    base_url: String,

    /// Work-unit flavour: `case` (result diff) or `batch` (tracked runs).
    #[arg(long, env = "DOCSVC_MODE", value_enum, default_value = "case")]
    mode: ModeArg,

    /// Case name.
    #[arg(long, env = "CASE_NAME", default_value = "docsvc-cli")]
    case_name: String,

    /// Case note.
    #[arg(long, env = "CASE_NOTE", default_value = "")]
    case_note: String,

    /// Server-side task for batch runs: doc_convert, to_pdf, vlm_ocr.
    #[arg(long, env = "DOCSVC_TASK_NAME", default_value = "doc_convert")]
    task_name: String,

    /// Owner recorded for batch uploads.
    #[arg(long, env = "DOCSVC_USER_ID")]
    user_id: Option<String>,

    /// Directory for the downloaded results archive.
    #[arg(long, env = "OUT_DIR", default_value = "./out")]
    out_dir: PathBuf,

    /// Render DPI (36–1200).
    #[arg(long, env = "DPI", default_value_t = 220,
          value_parser = clap::value_parser!(u32).range(36..=1200))]
    dpi: u32,

    /// Longest side of a page image in pixels; empty = unconstrained.
    #[arg(long, env = "MAX_SIDE")]
    max_side: Option<String>,

    /// Page image format: PNG, JPEG, WEBP, TIFF.
    #[arg(long, env = "IMAGE_FORMAT", default_value = "PNG")]
    image_format: String,

    /// Ask the service to pack results into results.zip.
    #[arg(long, env = "PACK_ZIP", default_value = "true",
          action = ArgAction::Set, value_parser = BoolishValueParser::new())]
    pack_zip: bool,

    /// File-name prefix of generated page images.
    #[arg(long, env = "FILENAME_PREFIX", default_value = "page")]
    filename_prefix: String,

    /// Seconds between status checks.
    #[arg(long, env = "POLL_INTERVAL", default_value_t = 3)]
    poll_interval: u64,

    /// Seconds before the wait gives up.
    #[arg(long, env = "POLL_TIMEOUT", default_value_t = 600)]
    poll_timeout: u64,

    /// Batch mode: after waiting, save a PDF of every uploaded file to OUT_DIR.
    #[arg(long, env = "DOCSVC_EXPORT_PDF")]
    export_pdf: bool,

    /// Per-request HTTP timeout in seconds.
    #[arg(long, env = "DOCSVC_REQUEST_TIMEOUT", default_value_t = 60)]
    request_timeout: u64,

    /// Print the run report as JSON on stdout.
    #[arg(long, env = "DOCSVC_JSON")]
    json: bool,

    /// Disable the spinner (stage lines are still printed).
    #[arg(long, env = "DOCSVC_NO_PROGRESS")]
    no_progress: bool,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, env = "DOCSVC_VERBOSE")]
    verbose: bool,

    /// Suppress all output except errors.
    #[arg(short, long, env = "DOCSVC_QUIET")]
    quiet: bool,
}

#[derive(clap::ValueEnum, Clone, Copy, Debug)]
enum ModeArg {
    Case,
    Batch,
}

impl From<ModeArg> for SubmitMode {
    fn from(v: ModeArg) -> Self {
        match v {
            ModeArg::Case => SubmitMode::Case,
            ModeArg::Batch => SubmitMode::Batch,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    // The stage lines carry what INFO logs would; keep the log quiet unless
    // asked for.
    let show_events = !cli.quiet && !cli.json;
    let show_spinner = show_events && !cli.no_progress;
    let filter = if cli.verbose {
        "debug"
    } else if cli.quiet || show_events {
        "error"
    } else {
        "warn"
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_writer(io::stderr)
        .init();

    // ── Build config ─────────────────────────────────────────────────────
    let progress = show_events.then(|| CliProgressCallback::new(show_spinner));
    let config = build_config(
        &cli,
        progress.clone().map(|cb| cb as Arc<dyn WorkflowProgressCallback>),
    )?;

    // ── Run ──────────────────────────────────────────────────────────────
    let result = run(&cli.inputs, &config).await;
    if let Some(ref cb) = progress {
        cb.finish();
    }

    let report = match result {
        Ok(report) => report,
        Err(e) => return Err(aborted(e)),
    };

    if cli.json {
        let json = serde_json::to_string_pretty(&report).context("Failed to serialise report")?;
        println!("{json}");
    } else if !cli.quiet {
        print_report(&report);
    }

    Ok(())
}

/// Map CLI args to `ClientConfig`.
fn build_config(cli: &Cli, progress: Option<ProgressCallback>) -> Result<ClientConfig> {
    let image_format: ImageFormat = cli
        .image_format
        .parse()
        .with_context(|| format!("Invalid IMAGE_FORMAT '{}'", cli.image_format))?;

    let mut builder = ClientConfig::builder()
        .base_url(cli.base_url.as_str())
        .mode(cli.mode.into())
        .case_name(cli.case_name.as_str())
        .case_note(cli.case_note.as_str())
        .task_name(cli.task_name.as_str())
        .out_dir(cli.out_dir.clone())
        .export_pdf(cli.export_pdf)
        .dpi(cli.dpi)
        .max_side(parse_max_side(cli.max_side.as_deref())?)
        .image_format(image_format)
        .pack_zip(cli.pack_zip)
        .filename_prefix(cli.filename_prefix.as_str())
        .poll_interval(Duration::from_secs(cli.poll_interval))
        .poll_timeout(Duration::from_secs(cli.poll_timeout))
        .request_timeout(Duration::from_secs(cli.request_timeout));

    if let Some(ref user) = cli.user_id {
        builder = builder.user_id(user.as_str());
    }
    if let Some(cb) = progress {
        builder = builder.progress_callback(cb);
    }

    builder.build().context("Invalid configuration")
}

/// `MAX_SIDE` is unconstrained when unset or empty.
fn parse_max_side(raw: Option<&str>) -> Result<Option<u32>> {
    match raw.map(str::trim) {
        None | Some("") => Ok(None),
        Some(s) => s
            .parse::<u32>()
            .map(Some)
            .with_context(|| format!("Invalid MAX_SIDE '{s}': expected a positive integer")),
    }
}

fn aborted(e: DocsvcError) -> anyhow::Error {
    let stage = e.stage();
    anyhow::Error::new(e).context(format!("aborted at stage {} ({})", stage.number(), stage))
}

// ── Report rendering ─────────────────────────────────────────────────────────

fn print_report(report: &RunReport) {
    match &report.outcome {
        RunOutcome::ArtifactDownloaded { path } => {
            println!("{} artifact downloaded  →  {}", green("✔"), bold(&path.display().to_string()));
        }
        RunOutcome::ManualRetrieval { timed_out } => {
            if *timed_out {
                println!("{} timed out — manual retrieval available", cyan("⚠"));
            } else {
                println!("{} conversion finished — results archive unavailable", cyan("⚠"));
            }
        }
        RunOutcome::RunsFinished { succeeded, failed } => {
            let mark = if *failed == 0 { green("✔") } else { cyan("⚠") };
            println!("{mark} {succeeded} run(s) succeeded, {failed} failed");
        }
        RunOutcome::RunsTimedOut {
            succeeded,
            failed,
            pending,
        } => {
            println!(
                "{} timed out — {succeeded} succeeded, {failed} failed, {pending} unfinished",
                cyan("⚠")
            );
        }
    }

    if let WaitDetail::Runs { runs } = &report.wait.detail {
        print_runs(runs);
    }

    match &report.fetch {
        Some(FetchOutcome::Fallback {
            reason,
            listing_url,
            entries,
        }) => {
            println!("  {}", dim(reason));
            println!("  listing: {listing_url}");
            if entries.is_empty() {
                println!("  (no result entries yet)");
            }
            for entry in entries {
                println!("    {:<40} {}", entry.name, dim(&entry.url));
            }
        }
        Some(FetchOutcome::Unavailable {
            reason,
            listing_error,
            listing_url,
        }) => {
            println!("  {}", dim(reason));
            println!("  {} listing failed: {listing_error}", red("✗"));
            println!("  retry later: {listing_url}");
        }
        Some(FetchOutcome::Downloaded { .. }) | None => {}
    }

    for export in &report.pdf_exports {
        match export {
            PdfExport::Saved { path, bytes, .. } => {
                println!("  {} {}  {}", green("✔"), path.display(), dim(&format!("{bytes} bytes")));
            }
            PdfExport::Failed { file_id, reason } => {
                println!("  {} PDF of {file_id}: {}", red("✗"), dim(reason));
            }
        }
    }

    println!(
        "  {}",
        dim(&format!(
            "{} · {} poll(s) · {}ms total",
            report.work_unit, report.wait.attempts, report.total_duration_ms
        ))
    );
}

fn print_runs(runs: &[HandleStatus]) {
    println!(
        "  {:<38} {:<10} {:<20} {}",
        bold("RUN"),
        bold("STATUS"),
        bold("FINISHED"),
        bold("DETAIL")
    );
    for run in runs {
        let status = match run.state {
            PollState::Succeeded => green(&run.state.to_string()),
            PollState::Failed => red(&run.state.to_string()),
            _ => cyan(&run.state.to_string()),
        };
        let detail = run
            .error
            .as_deref()
            .or(run.last_query_error.as_deref())
            .unwrap_or("");
        let finished = run.finished_at.as_deref().unwrap_or("-");
        println!("  {:<38} {:<19} {:<20} {}", run.handle, status, finished, dim(detail));
    }
}
