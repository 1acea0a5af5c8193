//! CLI binary for edgequake-doctools.
//!
//! A thin shim over the library crate: resolves inputs, maps subcommands and
//! flags to a `Job` and a `PipelineConfig`, runs it and writes the result.

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use edgequake_doctools::{
    default_output_path, resolve_all, resolve_input, run, save_output, CompletionHook, Document,
    ImageCompressOptions, ImageConvertOptions, ImageTarget, JsonFileStore, Job, KeyValueStore,
    MediaKind, NumberFormat, NumberPosition, PageNumberOptions, PageSelection, PipelineConfig,
    ProgressCallback, ProgressEvent, RecentItems, Rotation, RunRecord,
};
use futures::future::BoxFuture;
use indicatif::{ProgressBar, ProgressStyle};
use serde::Serialize;
use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;
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

// ── CLI progress bar using indicatif ─────────────────────────────────────────

const TICKS: &[&str] = &["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"];

/// A 0–100 bar driven by pipeline progress events.
fn progress_bar(label: &str) -> ProgressBar {
    let bar = ProgressBar::new(100);
    let style = ProgressStyle::with_template(
        "{spinner:.cyan} {prefix:.bold}  [{bar:42.green/238}] {pos:>3}%  {msg}  ⏱ {elapsed_precise}",
    )
    .unwrap_or_else(|_| ProgressStyle::default_bar())
    .progress_chars("█▉▊▋▌▍▎▏  ")
    .tick_strings(TICKS);
    bar.set_style(style);
    bar.set_prefix(label.to_string());
    bar.enable_steady_tick(Duration::from_millis(80));
    bar
}

fn bar_observer(bar: ProgressBar) -> ProgressCallback {
    Arc::new(move |event: &ProgressEvent| {
        bar.set_position(u64::from(event.percentage));
        if let (Some(current), Some(total)) = (event.current, event.total) {
            bar.set_message(format!("{current}/{total}"));
        }
    })
}

// ── History hook ─────────────────────────────────────────────────────────────

/// Records the tool in the recent list and signals when it is done, so the
/// process does not exit before the write lands.
struct HistoryHook {
    recent: RecentItems,
    done: Arc<Notify>,
}

impl CompletionHook for HistoryHook {
    fn on_complete(&self, record: RunRecord) -> BoxFuture<'static, ()> {
        let inner = self.recent.on_complete(record);
        let done = Arc::clone(&self.done);
        Box::pin(async move {
            inner.await;
            done.notify_one();
        })
    }
}

fn open_history() -> Option<RecentItems> {
    let path = JsonFileStore::default_path();
    match JsonFileStore::open(&path) {
        Ok(store) => {
            let store: Arc<dyn KeyValueStore> = Arc::new(store);
            Some(RecentItems::new(store))
        }
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "History disabled");
            None
        }
    }
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # Merge files in the given order
  doctools merge a.pdf b.pdf c.pdf -o all.pdf

  # Keep pages 1, 3 and 6 to 8
  doctools extract report.pdf --pages 1,3,6-8

  # Drop the cover page
  doctools delete report.pdf --pages 1

  # Move the last of three pages to the front
  doctools reorder report.pdf --order 3,1,2

  # Turn every page a quarter clockwise
  doctools rotate scan.pdf --angle 90

  # Shrink a PDF or an image
  doctools compress report.pdf --quality 0.6
  doctools compress photo.jpg --quality 0.7 --max-dimension 2048

  # "Page 1 of 12" in the bottom right corner
  doctools number report.pdf --position bottom-right --format page-of-total

  # Require a password to open; remove it again
  doctools protect contract.pdf --password s3cret --owner-password admin
  doctools unlock contract-protect.pdf --password s3cret

  # Image format conversion and images to PDF
  doctools convert photo.png --to jpeg
  doctools images-to-pdf p1.jpg p2.png -o scans.pdf

  # Inputs can be URLs
  doctools compress https://example.com/big.pdf -o small.pdf

PAGE LISTS:
  Pages are 1-indexed: "all", "5", "2-4" or "1,3,6-8".
  reorder keeps the order given and allows repeats.
  Page numbers above 100000 are rejected.

ENVIRONMENT VARIABLES:
  DOCTOOLS_OUTPUT            Output path (same as -o)
  DOCTOOLS_VERBOSE           Enable debug logging
  DOCTOOLS_QUIET             Suppress all output except errors
  DOCTOOLS_NO_PROGRESS       Disable the progress bar
  DOCTOOLS_JSON              Print a JSON summary on stdout
  DOCTOOLS_DOWNLOAD_TIMEOUT  HTTP download timeout in seconds
  DOCTOOLS_PDF_VERSION       Header version of newly built PDFs
  DOCTOOLS_NO_HISTORY        Do not record recently used tools
  DOCTOOLS_PASSWORD          Password for protect and unlock
  RUST_LOG                   Overrides the log filter

Press Ctrl-C to cancel a running operation; no output file is written.
"#;

/// Merge, split, rotate, number, compress and convert PDFs and images.
#[derive(Parser, Debug)]
#[command(
    name = "doctools",
    version,
    about = "Merge, split, rotate, number, compress and convert PDFs and images",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    #[command(flatten)]
    global: GlobalArgs,
}

#[derive(Args, Debug)]
struct GlobalArgs {
    /// Write the result here instead of `<input>-<tool>.<ext>`.
    #[arg(short, long, global = true, env = "DOCTOOLS_OUTPUT")]
    output: Option<PathBuf>,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, global = true, env = "DOCTOOLS_VERBOSE")]
    verbose: bool,

    /// Suppress all output except errors.
    #[arg(short, long, global = true, env = "DOCTOOLS_QUIET")]
    quiet: bool,

    /// Disable progress bar.
    #[arg(long, global = true, env = "DOCTOOLS_NO_PROGRESS")]
    no_progress: bool,

    /// Print a JSON summary of the result on stdout.
    #[arg(long, global = true, env = "DOCTOOLS_JSON")]
    json: bool,

    /// HTTP download timeout in seconds.
    #[arg(long, global = true, env = "DOCTOOLS_DOWNLOAD_TIMEOUT", default_value_t = 120)]
    download_timeout: u64,

    /// Header version for PDFs built from scratch (merge, images-to-pdf).
    #[arg(long, global = true, env = "DOCTOOLS_PDF_VERSION", default_value = "1.7")]
    pdf_version: String,

    /// Do not record this run in the recent-tools list.
    #[arg(long, global = true, env = "DOCTOOLS_NO_HISTORY")]
    no_history: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Combine PDFs into one, in the order given.
    Merge {
        /// PDF files or URLs.
        #[arg(required = true, num_args = 1..)]
        inputs: Vec<String>,
    },
    /// Keep only the listed pages.
    Extract {
        input: String,
        /// Pages to keep, e.g. 1,3,6-8.
        #[arg(short, long)]
        pages: String,
    },
    /// Remove the listed pages.
    Delete {
        input: String,
        /// Pages to remove, e.g. 2-4.
        #[arg(short, long)]
        pages: String,
    },
    /// Lay pages out in a new order; repeats duplicate a page.
    Reorder {
        input: String,
        /// New order, e.g. 3,1,2.
        #[arg(long)]
        order: String,
    },
    /// Rotate pages clockwise, on top of their current rotation.
    Rotate {
        input: String,
        /// 90, 180 or 270 (negative values turn counter-clockwise).
        #[arg(long, default_value_t = 90, allow_negative_numbers = true)]
        angle: i64,
        #[arg(short, long, default_value = "all")]
        pages: String,
    },
    /// Make a PDF or an image smaller.
    Compress {
        input: String,
        /// 0.01–1.0; lower is smaller.
        #[arg(long, default_value_t = 0.8)]
        quality: f32,
        /// Images only: downscale so the longest edge fits.
        #[arg(long)]
        max_dimension: Option<u32>,
    },
    /// Stamp page numbers.
    Number {
        input: String,
        #[arg(long, value_enum, default_value = "bottom-center")]
        position: PositionArg,
        #[arg(long, value_enum, default_value = "plain")]
        format: FormatArg,
        /// Number printed on the first page.
        #[arg(long, default_value_t = 1)]
        start_from: usize,
        /// Points (4–72).
        #[arg(long, default_value_t = 12.0)]
        font_size: f32,
        /// Distance from the page edge in points (0–144).
        #[arg(long, default_value_t = 30.0)]
        margin: f32,
        /// Pages that get a label.
        #[arg(short, long, default_value = "all")]
        pages: String,
    },
    /// Encrypt a PDF so that it needs a password to open.
    Protect {
        input: String,
        #[arg(long, env = "DOCTOOLS_PASSWORD", hide_env_values = true)]
        password: String,
        /// Grants full permissions; defaults to --password.
        #[arg(long)]
        owner_password: Option<String>,
    },
    /// Remove the password from a PDF.
    Unlock {
        input: String,
        /// User or owner password.
        #[arg(long, env = "DOCTOOLS_PASSWORD", hide_env_values = true)]
        password: String,
    },
    /// Convert an image to another format.
    Convert {
        input: String,
        #[arg(long, value_enum)]
        to: TargetArg,
        /// JPEG only: 0.01–1.0.
        #[arg(long, default_value_t = 0.92)]
        quality: f32,
    },
    /// Put each image on its own page of a new PDF.
    ImagesToPdf {
        #[arg(required = true, num_args = 1..)]
        inputs: Vec<String>,
    },
    /// Show the recently used tools.
    Recent {
        /// Forget the list instead.
        #[arg(long)]
        clear: bool,
    },
}

#[derive(clap::ValueEnum, Clone, Copy, Debug)]
enum PositionArg {
    TopLeft,
    TopCenter,
    TopRight,
    BottomLeft,
    BottomCenter,
    BottomRight,
}

impl From<PositionArg> for NumberPosition {
    fn from(v: PositionArg) -> Self {
        match v {
            PositionArg::TopLeft => NumberPosition::TopLeft,
            PositionArg::TopCenter => NumberPosition::TopCenter,
            PositionArg::TopRight => NumberPosition::TopRight,
            PositionArg::BottomLeft => NumberPosition::BottomLeft,
            PositionArg::BottomCenter => NumberPosition::BottomCenter,
            PositionArg::BottomRight => NumberPosition::BottomRight,
        }
    }
}

#[derive(clap::ValueEnum, Clone, Copy, Debug)]
enum FormatArg {
    /// "5"
    Plain,
    /// "5 / 12"
    OfTotal,
    /// "Page 5 of 12"
    PageOfTotal,
}

impl From<FormatArg> for NumberFormat {
    fn from(v: FormatArg) -> Self {
        match v {
            FormatArg::Plain => NumberFormat::Plain,
            FormatArg::OfTotal => NumberFormat::OfTotal,
            FormatArg::PageOfTotal => NumberFormat::PageOfTotal,
        }
    }
}

#[derive(clap::ValueEnum, Clone, Copy, Debug)]
enum TargetArg {
    Png,
    #[value(alias = "jpg")]
    Jpeg,
    Webp,
    Gif,
    Bmp,
}

impl From<TargetArg> for ImageTarget {
    fn from(v: TargetArg) -> Self {
        match v {
            TargetArg::Png => ImageTarget::Png,
            TargetArg::Jpeg => ImageTarget::Jpeg,
            TargetArg::Webp => ImageTarget::Webp,
            TargetArg::Gif => ImageTarget::Gif,
            TargetArg::Bmp => ImageTarget::Bmp,
        }
    }
}

/// What `--json` prints after a successful run.
#[derive(Serialize)]
struct Summary<'a> {
    tool: &'a str,
    output: String,
    bytes: usize,
    mime_type: &'a str,
    duration_ms: u64,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let global = &cli.global;

    // ── Logging setup ────────────────────────────────────────────────────
    // Suppress INFO-level library logs when the progress bar is active;
    // the bar provides all the feedback that matters to the user.
    let show_progress = !global.quiet && !global.no_progress && !global.json;
    let filter = if global.verbose {
        "debug"
    } else if global.quiet || show_progress {
        "error"
    } else {
        "info"
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_writer(io::stderr)
        .init();

    // ── Resolve inputs and build the job ─────────────────────────────────
    let timeout = global.download_timeout;
    let (job, inputs, first) = match &cli.command {
        Command::Recent { clear } => return show_recent(*clear, global.json),
        Command::Merge { inputs } => (Job::Merge, resolve_all(inputs, timeout).await?, &inputs[0]),
        Command::ImagesToPdf { inputs } => {
            (Job::ImagesToPdf, resolve_all(inputs, timeout).await?, &inputs[0])
        }
        Command::Extract { input, pages } => {
            let job = Job::ExtractPages {
                pages: parse_page_list(pages)?,
            };
            (job, vec![resolve_input(input, timeout).await?], input)
        }
        Command::Delete { input, pages } => {
            let job = Job::DeletePages {
                pages: parse_page_list(pages)?,
            };
            (job, vec![resolve_input(input, timeout).await?], input)
        }
        Command::Reorder { input, order } => {
            let job = Job::ReorderPages {
                order: parse_page_list(order)?,
            };
            (job, vec![resolve_input(input, timeout).await?], input)
        }
        Command::Rotate {
            input,
            angle,
            pages,
        } => {
            let angle = Rotation::from_degrees(*angle)
                .with_context(|| format!("Angle must be a multiple of 90, got {angle}"))?;
            let job = Job::Rotate {
                angle,
                pages: parse_pages(pages)?,
            };
            (job, vec![resolve_input(input, timeout).await?], input)
        }
        Command::Compress {
            input,
            quality,
            max_dimension,
        } => {
            let doc = resolve_input(input, timeout).await?;
            let job = compress_job(&doc, *quality, *max_dimension)?;
            (job, vec![doc], input)
        }
        Command::Number {
            input,
            position,
            format,
            start_from,
            font_size,
            margin,
            pages,
        } => {
            let job = Job::AddPageNumbers(PageNumberOptions {
                position: (*position).into(),
                format: (*format).into(),
                start_from: *start_from,
                font_size: *font_size,
                margin: *margin,
                pages: parse_pages(pages)?,
            });
            (job, vec![resolve_input(input, timeout).await?], input)
        }
        Command::Protect {
            input,
            password,
            owner_password,
        } => {
            let job = Job::Protect {
                password: password.clone(),
                owner_password: owner_password.clone(),
            };
            (job, vec![resolve_input(input, timeout).await?], input)
        }
        Command::Unlock { input, password } => {
            let job = Job::Unlock {
                password: password.clone(),
            };
            (job, vec![resolve_input(input, timeout).await?], input)
        }
        Command::Convert { input, to, quality } => {
            let job = Job::ConvertImage(ImageConvertOptions {
                target: (*to).into(),
                quality: *quality,
            });
            (job, vec![resolve_input(input, timeout).await?], input)
        }
    };
    let operation = job.operation();

    // ── Build config ─────────────────────────────────────────────────────
    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                cancel.cancel();
            }
        });
    }

    let bar = show_progress.then(|| progress_bar(operation.name()));
    let history_done = Arc::new(Notify::new());

    let mut builder = PipelineConfig::builder()
        .cancel_token(cancel)
        .pdf_version(global.pdf_version.clone())
        .download_timeout_secs(timeout);
    if let Some(ref bar) = bar {
        builder = builder.progress(bar_observer(bar.clone()));
    }
    let history = (!global.no_history).then(open_history).flatten();
    if let Some(recent) = history.clone() {
        builder = builder.completion_hook(Arc::new(HistoryHook {
            recent,
            done: Arc::clone(&history_done),
        }));
    }
    let config = builder.build().context("Invalid configuration")?;

    // ── Run ──────────────────────────────────────────────────────────────
    let started = Instant::now();
    let result = run(&job, &inputs, &config).await;
    if let Some(ref bar) = bar {
        bar.finish_and_clear();
    }
    let output = match result {
        Ok(output) => output,
        Err(e) => {
            if !global.quiet {
                eprintln!("{} {}", red("✘"), bold(&e.to_string()));
            }
            return Err(e).with_context(|| format!("{} failed", operation.name()));
        }
    };

    let path = match global.output {
        Some(ref p) => p.clone(),
        None => default_output_path(first, operation.name(), output.kind.extension()),
    };
    save_output(&output, &path)
        .await
        .with_context(|| format!("Failed to write {}", path.display()))?;
    let duration_ms = started.elapsed().as_millis() as u64;

    if global.json {
        let summary = Summary {
            tool: operation.name(),
            output: path.display().to_string(),
            bytes: output.len(),
            mime_type: output.mime_type(),
            duration_ms,
        };
        println!(
            "{}",
            serde_json::to_string_pretty(&summary).context("Failed to serialise summary")?
        );
    } else if !global.quiet {
        eprintln!(
            "{}  {}  {}  {}ms  →  {}",
            green("✔"),
            operation.name(),
            dim(&format!("{} bytes", output.len())),
            duration_ms,
            bold(&path.display().to_string()),
        );
    }

    if history.is_some() {
        // The hook runs detached; give it a moment to persist before exit.
        let _ = tokio::time::timeout(Duration::from_secs(2), history_done.notified()).await;
    }

    Ok(())
}

fn show_recent(clear: bool, json: bool) -> Result<()> {
    let path = JsonFileStore::default_path();
    let store = JsonFileStore::open(&path)
        .with_context(|| format!("Failed to open {}", path.display()))?;
    let recent = RecentItems::new(Arc::new(store));

    if clear {
        recent.clear().context("Failed to clear recent tools")?;
        return Ok(());
    }
    let items = recent.list().context("Failed to read recent tools")?;
    if json {
        println!(
            "{}",
            serde_json::to_string_pretty(&items).context("Failed to serialise recent tools")?
        );
    } else if items.is_empty() {
        eprintln!("{}", dim("No tools used yet"));
    } else {
        for item in items {
            println!("{item}");
        }
    }
    Ok(())
}

/// PDFs get structural compression; images are re-encoded.
fn compress_job(doc: &Document, quality: f32, max_dimension: Option<u32>) -> Result<Job> {
    let kind = match doc.kind() {
        MediaKind::Unknown => MediaKind::sniff(doc.bytes()),
        kind => kind,
    };
    match kind {
        MediaKind::Pdf => Ok(Job::CompressPdf { quality }),
        kind if kind.is_image() => Ok(Job::CompressImage(ImageCompressOptions {
            quality,
            max_dimension,
        })),
        other => anyhow::bail!("Cannot compress {} input", other),
    }
}

/// Parse `--pages` into a `PageSelection`: all, 5, 3-15, or 1,3,6-8.
fn parse_pages(s: &str) -> Result<PageSelection> {
    let s = s.trim().to_lowercase();

    if s == "all" {
        return Ok(PageSelection::All);
    }

    // Range: "3-15"
    if !s.contains(',') {
        if let Some((start, end)) = s.split_once('-') {
            let (start, end) = parse_range(start, end)?;
            return Ok(PageSelection::Range(start, end));
        }
        return Ok(PageSelection::Single(parse_page(&s)?));
    }

    // Set: "1,3,6-8"
    let pages = page_numbers(&s)?;
    Ok(PageSelection::Set(pages))
}

/// Parse an ordered 1-indexed page list into 0-indexed positions.
/// Order and repeats are kept.
fn parse_page_list(s: &str) -> Result<Vec<usize>> {
    if s.trim().eq_ignore_ascii_case("all") {
        anyhow::bail!("List the pages explicitly, e.g. 1,3,6-8");
    }
    Ok(page_numbers(s)?.into_iter().map(|p| p - 1).collect())
}

/// 1-indexed page numbers from comma-separated numbers and ranges.
fn page_numbers(s: &str) -> Result<Vec<usize>> {
    let mut pages = Vec::new();
    for part in s.split(',').map(str::trim).filter(|p| !p.is_empty()) {
        match part.split_once('-') {
            Some((start, end)) => {
                let (start, end) = parse_range(start, end)?;
                pages.extend(start..=end);
            }
            None => pages.push(parse_page(part)?),
        }
    }
    if pages.is_empty() {
        anyhow::bail!("No pages given");
    }
    Ok(pages)
}

/// Largest page number accepted on the command line.
const MAX_PAGE: usize = 100_000;

fn parse_page(s: &str) -> Result<usize> {
    let page: usize = s
        .trim()
        .parse()
        .with_context(|| format!("Invalid page number: '{}'", s.trim()))?;
    if page < 1 {
        anyhow::bail!("Pages are 1-indexed, minimum is 1 (got {})", page);
    }
    if page > MAX_PAGE {
        anyhow::bail!("Page {} is out of range, maximum is {}", page, MAX_PAGE);
    }
    Ok(page)
}

fn parse_range(start: &str, end: &str) -> Result<(usize, usize)> {
    let start = parse_page(start).context("Invalid start page in range")?;
    let end = parse_page(end).context("Invalid end page in range")?;
    if start > end {
        anyhow::bail!(
            "Invalid page range '{}-{}': start must be <= end",
            start,
            end
        );
    }
    Ok((start, end))
}
