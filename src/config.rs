//! Configuration and job types for pipeline runs.
//!
//! Two things configure a run:
//!
//! * a [`Job`] says *what* to do: the operation plus its enumerated options;
//! * a [`PipelineConfig`] says *how* to run it: progress observer, cancellation
//!   token, completion hook, serialisation knobs. Built via
//!   [`PipelineConfigBuilder`].
//!
//! Options never make a run crash: out-of-range values are clamped (quality,
//! font size, margins) or filtered (page indices) by the stages.

use crate::engine::CompletionHook;
use crate::error::{ErrorCode, ToolError};
use crate::document::MediaKind;
use crate::progress::ProgressCallback;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// PDF versions accepted for newly created documents.
const PDF_VERSIONS: [&str; 6] = ["1.3", "1.4", "1.5", "1.6", "1.7", "2.0"];

/// Run-level configuration.
///
/// # Example
/// ```rust
/// use edgequake_doctools::PipelineConfig;
///
/// let config = PipelineConfig::builder()
///     .pdf_version("1.5")
///     .compress_streams(false)
///     .build()
///     .unwrap();
/// ```
#[derive(Clone)]
pub struct PipelineConfig {
    /// Receives progress events. Default: none.
    pub progress: Option<ProgressCallback>,

    /// Cooperative cancellation, checked between steps. Default: none.
    pub cancel: Option<CancellationToken>,

    /// Fire-and-forget hook spawned after every successful run. Default: none.
    pub completion_hook: Option<Arc<dyn CompletionHook>>,

    /// Header version of PDFs built from scratch (merge, images-to-PDF). Default: "1.7".
    pub pdf_version: String,

    /// Flate-compress streams when serialising PDFs. Default: true.
    ///
    /// Turning this off makes content streams readable in the output, which is
    /// mostly useful when debugging page-number overlays.
    pub compress_streams: bool,

    /// Download timeout for URL inputs in seconds. Default: 120.
    pub download_timeout_secs: u64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            progress: None,
            cancel: None,
            completion_hook: None,
            pdf_version: "1.7".to_string(),
            compress_streams: true,
            download_timeout_secs: 120,
        }
    }
}

impl fmt::Debug for PipelineConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PipelineConfig")
            .field("progress", &self.progress.as_ref().map(|_| "<dyn ProgressObserver>"))
            .field("cancel", &self.cancel)
            .field(
                "completion_hook",
                &self.completion_hook.as_ref().map(|_| "<dyn CompletionHook>"),
            )
            .field("pdf_version", &self.pdf_version)
            .field("compress_streams", &self.compress_streams)
            .field("download_timeout_secs", &self.download_timeout_secs)
            .finish()
    }
}

impl PipelineConfig {
    /// Create a new builder for `PipelineConfig`.
    pub fn builder() -> PipelineConfigBuilder {
        PipelineConfigBuilder {
            config: Self::default(),
        }
    }

    pub(crate) fn is_cancelled(&self) -> bool {
        self.cancel.as_ref().is_some_and(|t| t.is_cancelled())
    }
}

/// Builder for [`PipelineConfig`].
#[derive(Debug)]
pub struct PipelineConfigBuilder {
    config: PipelineConfig,
}

impl PipelineConfigBuilder {
    pub fn progress(mut self, observer: ProgressCallback) -> Self {
        self.config.progress = Some(observer);
        self
    }

    pub fn cancel_token(mut self, token: CancellationToken) -> Self {
        self.config.cancel = Some(token);
        self
    }

    pub fn completion_hook(mut self, hook: Arc<dyn CompletionHook>) -> Self {
        self.config.completion_hook = Some(hook);
        self
    }

    pub fn pdf_version(mut self, version: impl Into<String>) -> Self {
        self.config.pdf_version = version.into();
        self
    }

    pub fn compress_streams(mut self, v: bool) -> Self {
        self.config.compress_streams = v;
        self
    }

    pub fn download_timeout_secs(mut self, secs: u64) -> Self {
        self.config.download_timeout_secs = secs.max(1);
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<PipelineConfig, ToolError> {
        let c = &self.config;
        if !PDF_VERSIONS.contains(&c.pdf_version.as_str()) {
            return Err(ToolError::InvalidConfig(format!(
                "PDF version must be one of {}, got '{}'",
                PDF_VERSIONS.join(", "),
                c.pdf_version
            )));
        }
        Ok(self.config)
    }
}

// ── Operations ───────────────────────────────────────────────────────────

/// The operation families, used for logging and failure classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Operation {
    Merge,
    ExtractPages,
    DeletePages,
    ReorderPages,
    Rotate,
    Protect,
    Unlock,
    CompressPdf,
    CompressImage,
    AddPageNumbers,
    ConvertImage,
    ImagesToPdf,
}

impl Operation {
    /// Stable name used in logs and the recent-tools list.
    pub fn name(&self) -> &'static str {
        match self {
            Operation::Merge => "merge",
            Operation::ExtractPages => "extract-pages",
            Operation::DeletePages => "delete-pages",
            Operation::ReorderPages => "reorder-pages",
            Operation::Rotate => "rotate",
            Operation::Protect => "protect",
            Operation::Unlock => "unlock",
            Operation::CompressPdf => "compress-pdf",
            Operation::CompressImage => "compress-image",
            Operation::AddPageNumbers => "add-page-numbers",
            Operation::ConvertImage => "convert-image",
            Operation::ImagesToPdf => "images-to-pdf",
        }
    }

    /// The single catch-all code for unclassified failures.
    pub fn failure_code(&self) -> ErrorCode {
        match self {
            Operation::Merge => ErrorCode::MergeFailed,
            Operation::ExtractPages => ErrorCode::PageExtractionFailed,
            Operation::DeletePages => ErrorCode::PageDeletionFailed,
            Operation::ReorderPages => ErrorCode::PageReorderingFailed,
            Operation::Rotate => ErrorCode::RotationFailed,
            Operation::Protect => ErrorCode::ProtectionFailed,
            Operation::Unlock => ErrorCode::UnlockFailed,
            Operation::CompressPdf | Operation::CompressImage => ErrorCode::CompressionFailed,
            Operation::AddPageNumbers => ErrorCode::PageNumberingFailed,
            Operation::ConvertImage | Operation::ImagesToPdf => ErrorCode::ConversionFailed,
        }
    }

    /// Whether the operation consumes every input rather than just the first.
    pub fn is_multi_input(&self) -> bool {
        matches!(self, Operation::Merge | Operation::ImagesToPdf)
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// An operation plus its options.
///
/// Page indices in `ExtractPages`, `DeletePages` and `ReorderPages` are
/// 0-based; indices outside `[0, page_count)` are dropped silently.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "operation", rename_all = "kebab-case")]
pub enum Job {
    /// Concatenate every input PDF in the order supplied.
    Merge,
    /// New document with the given pages, ascending, deduplicated.
    ExtractPages { pages: Vec<usize> },
    /// Remove the given pages.
    DeletePages { pages: Vec<usize> },
    /// New document with the given pages in exactly this order.
    ReorderPages { order: Vec<usize> },
    /// Add `angle` to each selected page's stored rotation.
    Rotate {
        angle: Rotation,
        #[serde(default)]
        pages: PageSelection,
    },
    /// Encrypt the PDF (AES-256) so that opening it requires `password`.
    Protect {
        password: String,
        /// Grants full permissions when opened with it. Defaults to `password`.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        owner_password: Option<String>,
    },
    /// Remove encryption; `password` may be the user or the owner password.
    Unlock { password: String },
    /// Restructure and recompress a PDF; embedded JPEGs are re-encoded at `quality`.
    CompressPdf {
        #[serde(default = "default_quality")]
        quality: f32,
    },
    CompressImage(ImageCompressOptions),
    AddPageNumbers(PageNumberOptions),
    ConvertImage(ImageConvertOptions),
    /// One page per input image.
    ImagesToPdf,
}

impl Job {
    pub fn operation(&self) -> Operation {
        match self {
            Job::Merge => Operation::Merge,
            Job::ExtractPages { .. } => Operation::ExtractPages,
            Job::DeletePages { .. } => Operation::DeletePages,
            Job::ReorderPages { .. } => Operation::ReorderPages,
            Job::Rotate { .. } => Operation::Rotate,
            Job::Protect { .. } => Operation::Protect,
            Job::Unlock { .. } => Operation::Unlock,
            Job::CompressPdf { .. } => Operation::CompressPdf,
            Job::CompressImage(_) => Operation::CompressImage,
            Job::AddPageNumbers(_) => Operation::AddPageNumbers,
            Job::ConvertImage(_) => Operation::ConvertImage,
            Job::ImagesToPdf => Operation::ImagesToPdf,
        }
    }
}

// ── Option types ─────────────────────────────────────────────────────────

fn default_quality() -> f32 {
    0.8
}

/// Clamp a quality factor into `(0, 1]`; NaN falls back to the default.
pub fn clamp_quality(q: f32) -> f32 {
    if q.is_nan() {
        default_quality()
    } else {
        q.clamp(0.01, 1.0)
    }
}

/// Map a `(0, 1]` quality factor onto the JPEG encoder's 1–100 scale.
pub fn jpeg_quality(q: f32) -> u8 {
    (clamp_quality(q) * 100.0).round().clamp(1.0, 100.0) as u8
}

/// Quarter-turn rotations. Serialised as degrees.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "i64", into = "i64")]
pub enum Rotation {
    Deg90,
    Deg180,
    Deg270,
}

impl Rotation {
    pub fn degrees(&self) -> i64 {
        match self {
            Rotation::Deg90 => 90,
            Rotation::Deg180 => 180,
            Rotation::Deg270 => 270,
        }
    }

    /// Normalise any multiple of 90 (negative allowed) into a rotation.
    /// Returns `None` for non-multiples and full turns.
    pub fn from_degrees(deg: i64) -> Option<Self> {
        match deg.rem_euclid(360) {
            90 => Some(Rotation::Deg90),
            180 => Some(Rotation::Deg180),
            270 => Some(Rotation::Deg270),
            _ => None,
        }
    }
}

impl TryFrom<i64> for Rotation {
    type Error = String;

    fn try_from(deg: i64) -> Result<Self, Self::Error> {
        Rotation::from_degrees(deg).ok_or_else(|| format!("rotation must be 90, 180 or 270, got {deg}"))
    }
}

impl From<Rotation> for i64 {
    fn from(r: Rotation) -> Self {
        r.degrees()
    }
}

/// Specifies which pages an operation applies to (1-indexed).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum PageSelection {
    /// Every page (default).
    #[default]
    All,
    /// A single page (1-indexed).
    Single(usize),
    /// A contiguous range of pages (1-indexed, inclusive).
    Range(usize, usize),
    /// Specific pages (1-indexed, deduplicated).
    Set(Vec<usize>),
}

impl PageSelection {
    /// Expand the selection into a sorted, deduplicated list of 0-indexed page numbers.
    pub fn to_indices(&self, total_pages: usize) -> Vec<usize> {
        let mut indices: Vec<usize> = match self {
            PageSelection::All => (0..total_pages).collect(),
            PageSelection::Single(p) => {
                if *p >= 1 && *p <= total_pages {
                    vec![p - 1]
                } else {
                    vec![]
                }
            }
            PageSelection::Range(start, end) => {
                let s = (*start).max(1) - 1;
                let e = (*end).min(total_pages);
                (s..e).collect()
            }
            PageSelection::Set(pages) => pages
                .iter()
                .filter(|&&p| p >= 1 && p <= total_pages)
                .map(|p| p - 1)
                .collect(),
        };
        indices.sort_unstable();
        indices.dedup();
        indices
    }
}

/// Where a page number is drawn: 3 horizontal × 2 vertical anchors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum NumberPosition {
    TopLeft,
    TopCenter,
    TopRight,
    BottomLeft,
    #[default]
    BottomCenter,
    BottomRight,
}

impl NumberPosition {
    pub fn horizontal(&self) -> HorizontalAnchor {
        match self {
            NumberPosition::TopLeft | NumberPosition::BottomLeft => HorizontalAnchor::Left,
            NumberPosition::TopCenter | NumberPosition::BottomCenter => HorizontalAnchor::Center,
            NumberPosition::TopRight | NumberPosition::BottomRight => HorizontalAnchor::Right,
        }
    }

    pub fn is_top(&self) -> bool {
        matches!(
            self,
            NumberPosition::TopLeft | NumberPosition::TopCenter | NumberPosition::TopRight
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HorizontalAnchor {
    Left,
    Center,
    Right,
}

/// How the counter is rendered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum NumberFormat {
    /// "5"
    #[default]
    Plain,
    /// "5 / 7"
    OfTotal,
    /// "Page 5 of 7"
    PageOfTotal,
}

impl NumberFormat {
    pub fn render(&self, number: usize, total: usize) -> String {
        match self {
            NumberFormat::Plain => number.to_string(),
            NumberFormat::OfTotal => format!("{number} / {total}"),
            NumberFormat::PageOfTotal => format!("Page {number} of {total}"),
        }
    }
}

/// Options for [`Job::AddPageNumbers`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct PageNumberOptions {
    pub position: NumberPosition,
    pub format: NumberFormat,
    /// Number printed on the first page, at most [`MAX_START_FROM`]. Default: 1.
    pub start_from: usize,
    /// Points, clamped to 4–72. Default: 12.
    pub font_size: f32,
    /// Distance from the page edge in points, clamped to 0–144. Default: 30.
    pub margin: f32,
    /// Pages that get a label; numbering still follows physical position.
    pub pages: PageSelection,
}

impl Default for PageNumberOptions {
    fn default() -> Self {
        Self {
            position: NumberPosition::default(),
            format: NumberFormat::default(),
            start_from: 1,
            font_size: 12.0,
            margin: 30.0,
            pages: PageSelection::All,
        }
    }
}

/// Largest accepted [`PageNumberOptions::start_from`].
pub const MAX_START_FROM: usize = 1_000_000_000;

impl PageNumberOptions {
    pub(crate) fn clamped_start_from(&self) -> usize {
        self.start_from.min(MAX_START_FROM)
    }

    pub(crate) fn clamped_font_size(&self) -> f32 {
        if self.font_size.is_nan() {
            12.0
        } else {
            self.font_size.clamp(4.0, 72.0)
        }
    }

    pub(crate) fn clamped_margin(&self) -> f32 {
        if self.margin.is_nan() {
            30.0
        } else {
            self.margin.clamp(0.0, 144.0)
        }
    }
}

/// Options for [`Job::CompressImage`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ImageCompressOptions {
    /// `(0, 1]`. Default: 0.8.
    pub quality: f32,
    /// Downscale so the longest edge is at most this many pixels.
    pub max_dimension: Option<u32>,
}

impl Default for ImageCompressOptions {
    fn default() -> Self {
        Self {
            quality: default_quality(),
            max_dimension: None,
        }
    }
}

/// Raster formats the converter can write.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImageTarget {
    #[default]
    Png,
    Jpeg,
    Webp,
    Gif,
    Bmp,
}

impl ImageTarget {
    pub fn media_kind(&self) -> MediaKind {
        match self {
            ImageTarget::Png => MediaKind::Png,
            ImageTarget::Jpeg => MediaKind::Jpeg,
            ImageTarget::Webp => MediaKind::Webp,
            ImageTarget::Gif => MediaKind::Gif,
            ImageTarget::Bmp => MediaKind::Bmp,
        }
    }
}

/// Options for [`Job::ConvertImage`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ImageConvertOptions {
    pub target: ImageTarget,
    /// JPEG only. `(0, 1]`. Default: 0.92.
    pub quality: f32,
}

impl Default for ImageConvertOptions {
    fn default() -> Self {
        Self {
            target: ImageTarget::default(),
            quality: 0.92,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_rejects_unknown_pdf_version() {
        let err = PipelineConfig::builder().pdf_version("3.1").build().unwrap_err();
        assert!(err.to_string().contains("3.1"));
        assert!(PipelineConfig::builder().pdf_version("1.4").build().is_ok());
    }

    #[test]
    fn default_config_is_not_cancelled() {
        let config = PipelineConfig::default();
        assert!(!config.is_cancelled());
        let token = CancellationToken::new();
        let config = PipelineConfig::builder()
            .cancel_token(token.clone())
            .build()
            .unwrap();
        token.cancel();
        assert!(config.is_cancelled());
    }

    #[test]
    fn page_selection_to_indices() {
        assert_eq!(PageSelection::All.to_indices(3), vec![0, 1, 2]);
        assert_eq!(PageSelection::Single(3).to_indices(5), vec![2]);
        assert_eq!(PageSelection::Single(6).to_indices(5), Vec::<usize>::new());
        assert_eq!(PageSelection::Range(2, 40).to_indices(5), vec![1, 2, 3, 4]);
        assert_eq!(PageSelection::Set(vec![3, 1, 3, 0]).to_indices(5), vec![0, 2]);
    }

    #[test]
    fn rotation_normalises_degrees() {
        assert_eq!(Rotation::from_degrees(90), Some(Rotation::Deg90));
        assert_eq!(Rotation::from_degrees(-90), Some(Rotation::Deg270));
        assert_eq!(Rotation::from_degrees(540), Some(Rotation::Deg180));
        assert_eq!(Rotation::from_degrees(360), None);
        assert_eq!(Rotation::from_degrees(45), None);
    }

    #[test]
    fn quality_is_clamped() {
        assert_eq!(clamp_quality(0.0), 0.01);
        assert_eq!(clamp_quality(7.5), 1.0);
        assert_eq!(clamp_quality(f32::NAN), 0.8);
        assert_eq!(jpeg_quality(0.85), 85);
        assert_eq!(jpeg_quality(-1.0), 1);
    }

    #[test]
    fn start_from_is_clamped() {
        let options = PageNumberOptions {
            start_from: usize::MAX,
            ..PageNumberOptions::default()
        };
        assert_eq!(options.clamped_start_from(), MAX_START_FROM);
        assert_eq!(PageNumberOptions::default().clamped_start_from(), 1);
    }

    #[test]
    fn number_format_render() {
        assert_eq!(NumberFormat::Plain.render(5, 7), "5");
        assert_eq!(NumberFormat::OfTotal.render(5, 7), "5 / 7");
        assert_eq!(NumberFormat::PageOfTotal.render(2, 9), "Page 2 of 9");
    }

    #[test]
    fn failure_codes_per_operation() {
        assert_eq!(Operation::Merge.failure_code(), ErrorCode::MergeFailed);
        assert_eq!(Operation::CompressImage.failure_code(), ErrorCode::CompressionFailed);
        assert_eq!(Operation::ImagesToPdf.failure_code(), ErrorCode::ConversionFailed);
        assert_eq!(Operation::Unlock.failure_code(), ErrorCode::UnlockFailed);
    }

    #[test]
    fn jobs_deserialize_from_json() {
        let job: Job = serde_json::from_str(r#"{"operation":"rotate","angle":270}"#).unwrap();
        assert_eq!(
            job,
            Job::Rotate {
                angle: Rotation::Deg270,
                pages: PageSelection::All
            }
        );

        let job: Job = serde_json::from_str(
            r#"{"operation":"add-page-numbers","format":"of-total","startFrom":5}"#,
        )
        .unwrap();
        match job {
            Job::AddPageNumbers(opts) => {
                assert_eq!(opts.format, NumberFormat::OfTotal);
                assert_eq!(opts.start_from, 5);
                assert_eq!(opts.position, NumberPosition::BottomCenter);
            }
            other => panic!("unexpected job {other:?}"),
        }

        assert!(serde_json::from_str::<Job>(r#"{"operation":"rotate","angle":45}"#).is_err());

        let job: Job = serde_json::from_str(r#"{"operation":"protect","password":"s3cret"}"#).unwrap();
        assert_eq!(
            job,
            Job::Protect {
                password: "s3cret".into(),
                owner_password: None
            }
        );
        assert_eq!(job.operation(), Operation::Protect);
    }
}
