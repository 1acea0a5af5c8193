//! # edgequake-doctools
//!
//! Everyday document tools (merge, split, rotate, compress, number, protect,
//! convert) built on one sequential pipeline with progress reporting and
//! typed failures.
//!
//! ## Pipeline Overview
//!
//! ```text
//! Document(s)
//!  │
//!  ├─ 1. Validate   fail fast on missing input, clamp/filter options
//!  ├─ 2. Parse      lopdf / image decoders (CPU-bound, spawn_blocking)
//!  ├─ 3. Transform  unit by unit: file, page, embedded image
//!  ├─ 4. Serialize  back to bytes
//!  └─ 5. Result     bytes + media type, or one classified PipelineError
//! ```
//!
//! Progress is reported as a non-decreasing percentage: 10 after setup, one
//! event per unit between 30 and 90, 95 while serialising and exactly 100
//! just before a successful result is returned.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use edgequake_doctools::{resolve_input, run, Job, PipelineConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let a = resolve_input("a.pdf", 120).await?;
//!     let b = resolve_input("b.pdf", 120).await?;
//!
//!     let config = PipelineConfig::default();
//!     let merged = run(&Job::Merge, &[a, b], &config).await?;
//!     std::fs::write("merged.pdf", &merged.bytes)?;
//!     Ok(())
//! }
//! ```
//!
//! ## Failures
//!
//! Every run ends in exactly one of `Ok(OutputDocument)` or
//! `Err(PipelineError)`. Library-level causes (lopdf, image, I/O) are logged
//! with the step that raised them and surface as the operation's generic
//! [`ErrorCode`], e.g. `ROTATION_FAILED`. Failures that already carry a code,
//! such as `FAILED_TO_PROCESS_FILE` with the 1-based index of the bad file,
//! reach the caller unchanged.
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `doctools` binary (clap + indicatif + anyhow + tracing-subscriber) |
//!
//! Disable `cli` when using only the library to avoid pulling in CLI-only deps:
//! ```toml
//! edgequake-doctools = { version = "0.1", default-features = false }
//! ```

// ── Modules ──────────────────────────────────────────────────────────────

pub mod config;
pub mod document;
pub mod engine;
pub mod error;
pub mod input;
pub mod pipeline;
pub mod progress;
pub mod store;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use config::{
    ImageCompressOptions, ImageConvertOptions, ImageTarget, Job, NumberFormat, NumberPosition,
    Operation, PageNumberOptions, PageSelection, PipelineConfig, PipelineConfigBuilder, Rotation,
};
pub use document::{Document, MediaKind, OutputDocument};
pub use engine::{run, run_sync, run_to_file, save_output, CompletionHook, RunRecord};
pub use error::{ErrorCode, PipelineError, ToolError};
pub use input::{default_output_path, resolve_all, resolve_input};
pub use progress::{
    progress_channel, NoopProgress, ProgressCallback, ProgressEvent, ProgressObserver,
    ProgressStream,
};
pub use store::{JsonFileStore, KeyValueStore, MemoryStore, RecentItems, StoreError};
