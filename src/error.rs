//! Error types for the edgequake-doctools library.
//!
//! Three error types, one per layer:
//!
//! * [`PipelineError`] (**classified**): the only failure a pipeline run
//!   ever returns. Carries an [`ErrorCode`], a human message and, for
//!   per-item failures, the 1-based index of the failing input.
//!
//! * [`StepError`] (**internal**): whatever the underlying library raised
//!   (lopdf, image, I/O, a panicked blocking task). Never crosses the
//!   [`crate::engine::run`] boundary; it is logged there and replaced by the
//!   operation's generic code. A `StepError::Classified` passes through as-is.
//!
//! * [`ToolError`] (**ambient**): failures around the pipeline rather than in
//!   it (resolving an input path or URL, invalid configuration, writing the
//!   output file).

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

/// Enumerated failure codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    NoInputProvided,
    FailedToProcessFile,
    FailedToProcessImage,
    MergeFailed,
    PageExtractionFailed,
    PageDeletionFailed,
    PageReorderingFailed,
    RotationFailed,
    ProtectionFailed,
    UnlockFailed,
    CompressionFailed,
    PageNumberingFailed,
    ConversionFailed,
    Cancelled,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::NoInputProvided => "NO_INPUT_PROVIDED",
            ErrorCode::FailedToProcessFile => "FAILED_TO_PROCESS_FILE",
            ErrorCode::FailedToProcessImage => "FAILED_TO_PROCESS_IMAGE",
            ErrorCode::MergeFailed => "MERGE_FAILED",
            ErrorCode::PageExtractionFailed => "PAGE_EXTRACTION_FAILED",
            ErrorCode::PageDeletionFailed => "PAGE_DELETION_FAILED",
            ErrorCode::PageReorderingFailed => "PAGE_REORDERING_FAILED",
            ErrorCode::RotationFailed => "ROTATION_FAILED",
            ErrorCode::ProtectionFailed => "PROTECTION_FAILED",
            ErrorCode::UnlockFailed => "UNLOCK_FAILED",
            ErrorCode::CompressionFailed => "COMPRESSION_FAILED",
            ErrorCode::PageNumberingFailed => "PAGE_NUMBERING_FAILED",
            ErrorCode::ConversionFailed => "CONVERSION_FAILED",
            ErrorCode::Cancelled => "CANCELLED",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A classified pipeline failure.
///
/// Callers surface `code` and `message` to the user. When this is returned
/// no output blob exists.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[error("{code}: {message}")]
pub struct PipelineError {
    pub code: ErrorCode,
    pub message: String,
    /// 1-based index of the failing input, for per-item codes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub index: Option<usize>,
}

impl PipelineError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            index: None,
        }
    }

    /// A failure attributed to the input at `index` (1-based).
    pub fn at_item(code: ErrorCode, index: usize, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            index: Some(index),
        }
    }

    pub fn no_input() -> Self {
        Self::new(ErrorCode::NoInputProvided, "No input documents were provided")
    }

    pub fn cancelled() -> Self {
        Self::new(ErrorCode::Cancelled, "The operation was cancelled")
    }
}

/// Low-level failure raised inside a pipeline step.
#[derive(Debug, Error)]
pub enum StepError {
    #[error("PDF error: {0}")]
    Pdf(#[from] lopdf::Error),

    #[error("image error: {0}")]
    Image(#[from] image::ImageError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A `spawn_blocking` task panicked or was aborted.
    #[error("blocking task failed: {0}")]
    Task(String),

    /// The input parsed but its structure is unusable (no page tree, etc.).
    #[error("malformed document: {0}")]
    Malformed(String),

    /// An already-classified failure; passes through the boundary unchanged.
    #[error(transparent)]
    Classified(#[from] PipelineError),
}

impl From<tokio::task::JoinError> for StepError {
    fn from(e: tokio::task::JoinError) -> Self {
        StepError::Task(e.to_string())
    }
}

/// Failures outside the pipeline proper.
#[derive(Debug, Error)]
pub enum ToolError {
    // ── Input errors ──────────────────────────────────────────────────────
    /// Input file was not found at the given path.
    #[error("File not found: '{path}'\nCheck the path exists and is readable.")]
    FileNotFound { path: PathBuf },

    /// Process does not have read permission on the file.
    #[error("Permission denied reading '{path}'\nTry: chmod +r {path:?}")]
    PermissionDenied { path: PathBuf },

    /// The input string is not a valid file path or URL.
    #[error("Invalid input '{input}': not a file path or a valid HTTP/HTTPS URL")]
    InvalidInput { input: String },

    /// HTTP URL was syntactically valid but download failed.
    #[error("Failed to download '{url}': {reason}\nCheck your internet connection.")]
    DownloadFailed { url: String, reason: String },

    /// Download exceeded the configured timeout.
    #[error("Download timed out after {secs}s for '{url}'\nIncrease --download-timeout.")]
    DownloadTimeout { url: String, secs: u64 },

    // ── Output errors ─────────────────────────────────────────────────────
    /// Could not create or write the output file.
    #[error("Failed to write output file '{path}': {source}")]
    OutputWriteFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // ── Config errors ─────────────────────────────────────────────────────
    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // ── Pipeline ──────────────────────────────────────────────────────────
    #[error(transparent)]
    Pipeline(#[from] PipelineError),

    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}
