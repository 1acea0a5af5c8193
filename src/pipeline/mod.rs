//! Pipeline stages, one module per operation family.
//!
//! Every stage follows the same shape and shares the helpers below:
//!
//! ```text
//! parse ──▶ transform (unit by unit) ──▶ serialize
//! 10 %      30 % ─────────────── 90 %     95 % ─▶ 100 % (engine)
//! ```
//!
//! 1. [`merge`]: concatenate PDFs into one page tree
//! 2. [`pages`]: extract, delete and reorder pages
//! 3. [`rotate`]: additive page rotation
//! 4. [`security`]: password protection and unlocking
//! 5. [`compress`]: restructure a PDF and re-encode its embedded JPEGs
//! 6. [`numbering`]: stamp page numbers onto each page
//! 7. [`raster`]: image compression, format conversion, images to PDF
//!
//! [`pdf`] holds the lopdf plumbing the PDF stages have in common.
//!
//! Parsing, serialisation and image codecs are CPU-bound and run on
//! `spawn_blocking`; between units a stage yields to the runtime and checks
//! the cancellation token.

pub mod compress;
pub mod merge;
pub mod numbering;
pub mod pages;
pub mod pdf;
pub mod raster;
pub mod rotate;
pub mod security;

use crate::config::{Operation, PipelineConfig};
use crate::document::{Document, MediaKind, OutputDocument};
use crate::error::{PipelineError, StepError};
use crate::progress::{ProgressReporter, SERIALIZE_PERCENT, SETUP_PERCENT};
use tracing::debug;

/// Per-run state threaded through a stage.
pub struct StepContext<'a> {
    operation: Operation,
    config: &'a PipelineConfig,
    pub(crate) progress: ProgressReporter,
    step: &'static str,
}

impl<'a> StepContext<'a> {
    pub(crate) fn new(
        operation: Operation,
        config: &'a PipelineConfig,
        progress: ProgressReporter,
    ) -> Self {
        Self {
            operation,
            config,
            progress,
            step: "validate",
        }
    }

    pub fn operation(&self) -> Operation {
        self.operation
    }

    pub fn config(&self) -> &PipelineConfig {
        self.config
    }

    /// Name of the step currently running, for error attribution.
    pub fn step(&self) -> &'static str {
        self.step
    }

    /// Move on to the named step. Fails with `CANCELLED` if the token fired.
    pub(crate) fn enter(&mut self, step: &'static str) -> Result<(), StepError> {
        self.checkpoint()?;
        self.step = step;
        debug!(operation = self.operation.name(), step, "Entering step");
        Ok(())
    }

    pub(crate) fn checkpoint(&self) -> Result<(), StepError> {
        if self.config.is_cancelled() {
            debug!(operation = self.operation.name(), step = self.step, "Cancelled");
            return Err(PipelineError::cancelled().into());
        }
        Ok(())
    }

    /// Report a finished unit of work, then give other tasks a turn.
    pub(crate) async fn unit_done(&mut self, done: usize, total: usize) -> Result<(), StepError> {
        self.progress.report_unit(done, total);
        tokio::task::yield_now().await;
        self.checkpoint()
    }
}

/// Run CPU-bound work off the async worker threads.
pub(crate) async fn blocking<T, F>(f: F) -> Result<T, StepError>
where
    F: FnOnce() -> Result<T, StepError> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f).await?
}

/// Parse step shared by the single-document PDF stages.
pub(crate) async fn open_pdf(
    input: &Document,
    ctx: &mut StepContext<'_>,
) -> Result<lopdf::Document, StepError> {
    ctx.enter("parse")?;
    ctx.progress.report(SETUP_PERCENT);
    let doc = pdf::load(input.shared_bytes()).await?;
    debug!(
        operation = ctx.operation().name(),
        pages = doc.get_pages().len(),
        "Parsed PDF"
    );
    Ok(doc)
}

/// Serialise step shared by every stage that produces a PDF.
pub(crate) async fn finish_pdf(
    doc: lopdf::Document,
    ctx: &mut StepContext<'_>,
) -> Result<OutputDocument, StepError> {
    ctx.enter("serialize")?;
    ctx.progress.report(SERIALIZE_PERCENT);
    let bytes = pdf::save(doc, ctx.config().compress_streams).await?;
    Ok(OutputDocument::new(bytes, MediaKind::Pdf))
}
