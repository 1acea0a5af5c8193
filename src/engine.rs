//! Pipeline entry points and the classification boundary.
//!
//! [`run`] is the only way into the pipeline. It validates preconditions,
//! dispatches the [`Job`] to its stage module, and guarantees the caller one
//! of exactly two outcomes:
//!
//! * `Ok(OutputDocument)`, after a final progress event of exactly 100;
//! * `Err(PipelineError)`, a classified failure. Low-level errors are logged
//!   here and replaced by the operation's generic code; errors that are
//!   already classified pass through unchanged.
//!
//! Nothing a stage builds is visible to the caller unless the whole run
//! succeeds.

use crate::config::{Job, Operation, PipelineConfig};
use crate::document::{Document, MediaKind, OutputDocument};
use crate::error::{PipelineError, StepError, ToolError};
use crate::pipeline::{
    compress, merge, numbering, pages, raster, rotate, security, StepContext,
};
use crate::progress::ProgressReporter;
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use std::io::Write;
use std::path::Path;
use std::time::Instant;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Summary of a successful run, handed to the [`CompletionHook`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunRecord {
    pub operation: Operation,
    pub inputs: usize,
    pub output_bytes: usize,
    pub output_type: MediaKind,
    pub duration_ms: u64,
}

/// Called once after every successful run.
///
/// The returned future is spawned onto the runtime and never awaited by the
/// pipeline: a slow or failing hook cannot delay or fail the run. Typical
/// uses are recording usage history or a "recent tools" list.
pub trait CompletionHook: Send + Sync {
    fn on_complete(&self, record: RunRecord) -> BoxFuture<'static, ()>;
}

/// Run `job` over `inputs`.
///
/// # Errors
/// - `NO_INPUT_PROVIDED` when `inputs` is empty (no progress is emitted);
/// - `FAILED_TO_PROCESS_FILE` / `FAILED_TO_PROCESS_IMAGE` with the 1-based
///   index of the input that could not be read (multi-input jobs);
/// - `CANCELLED` when the config's token fires between steps;
/// - otherwise the operation's generic code, e.g. `ROTATION_FAILED`.
pub async fn run(
    job: &Job,
    inputs: &[Document],
    config: &PipelineConfig,
) -> Result<OutputDocument, PipelineError> {
    let (output, _hook) = run_with_hook(job, inputs, config).await?;
    Ok(output)
}

/// [`run`], also returning the handle of the spawned completion hook.
async fn run_with_hook(
    job: &Job,
    inputs: &[Document],
    config: &PipelineConfig,
) -> Result<(OutputDocument, Option<JoinHandle<()>>), PipelineError> {
    let operation = job.operation();

    // ── Step 1: Validate ─────────────────────────────────────────────────
    if inputs.is_empty() {
        debug!(operation = operation.name(), "Rejected run without inputs");
        return Err(PipelineError::no_input());
    }
    if !operation.is_multi_input() && inputs.len() > 1 {
        warn!(
            operation = operation.name(),
            ignored = inputs.len() - 1,
            "Operation uses only the first input; ignoring the rest"
        );
    }

    let started = Instant::now();
    info!(
        operation = operation.name(),
        inputs = inputs.len(),
        "Starting pipeline"
    );

    let mut ctx = StepContext::new(
        operation,
        config,
        ProgressReporter::new(config.progress.clone()),
    );

    // ── Step 2–4: Parse, transform, serialise ────────────────────────────
    let result = dispatch(job, inputs, &mut ctx).await;

    match result {
        Ok(output) => {
            ctx.progress.finish();
            let duration_ms = started.elapsed().as_millis() as u64;
            info!(
                operation = operation.name(),
                output_bytes = output.len(),
                output_type = output.mime_type(),
                duration_ms,
                "Pipeline complete"
            );

            let hook = config.completion_hook.as_ref().map(|hook| {
                let record = RunRecord {
                    operation,
                    inputs: inputs.len(),
                    output_bytes: output.len(),
                    output_type: output.kind,
                    duration_ms,
                };
                tokio::spawn(hook.on_complete(record))
            });

            Ok((output, hook))
        }
        Err(err) => Err(classify(operation, ctx.step(), err)),
    }
}

/// Run `job` and write the result to `output_path`.
///
/// See [`save_output`] for how the file is written.
pub async fn run_to_file(
    job: &Job,
    inputs: &[Document],
    output_path: impl AsRef<Path>,
    config: &PipelineConfig,
) -> Result<OutputDocument, ToolError> {
    let output = run(job, inputs, config).await?;
    save_output(&output, output_path).await?;
    Ok(output)
}

/// Write a result to `path`, creating parent directories as needed.
///
/// Uses atomic write (temp file in the target directory + rename) so a failed
/// or interrupted write never leaves a partial file behind.
pub async fn save_output(
    output: &OutputDocument,
    path: impl AsRef<Path>,
) -> Result<(), ToolError> {
    let path = path.as_ref().to_path_buf();
    let bytes = output.bytes.clone();
    let target = path.clone();
    tokio::task::spawn_blocking(move || write_atomic(&target, &bytes))
        .await
        .map_err(|e| ToolError::Internal(format!("Write task panicked: {}", e)))?
        .map_err(|source| ToolError::OutputWriteFailed {
            path: path.clone(),
            source,
        })?;
    debug!(path = %path.display(), bytes = output.len(), "Wrote output");
    Ok(())
}

/// Synchronous wrapper around [`run`].
///
/// Creates a temporary tokio runtime internally. Unlike [`run`], the
/// completion hook is awaited before returning, since the runtime it was
/// spawned on is dropped afterwards.
pub fn run_sync(
    job: &Job,
    inputs: &[Document],
    config: &PipelineConfig,
) -> Result<OutputDocument, ToolError> {
    let runtime = tokio::runtime::Runtime::new()
        .map_err(|e| ToolError::Internal(format!("Failed to create tokio runtime: {}", e)))?;
    let output = runtime.block_on(async {
        let (output, hook) = run_with_hook(job, inputs, config).await?;
        if let Some(hook) = hook {
            if let Err(e) = hook.await {
                warn!(operation = job.operation().name(), error = %e, "Completion hook failed");
            }
        }
        Ok::<_, PipelineError>(output)
    })?;
    Ok(output)
}

// ── Internal helpers ─────────────────────────────────────────────────────

async fn dispatch(
    job: &Job,
    inputs: &[Document],
    ctx: &mut StepContext<'_>,
) -> Result<OutputDocument, StepError> {
    let first = &inputs[0];
    match job {
        Job::Merge => merge::merge(inputs, ctx).await,
        Job::ExtractPages { pages: selected } => pages::extract(first, selected, ctx).await,
        Job::DeletePages { pages: selected } => pages::delete(first, selected, ctx).await,
        Job::ReorderPages { order } => pages::reorder(first, order, ctx).await,
        Job::Rotate { angle, pages: selected } => {
            rotate::rotate(first, *angle, selected, ctx).await
        }
        Job::Protect {
            password,
            owner_password,
        } => security::protect(first, password, owner_password.as_deref(), ctx).await,
        Job::Unlock { password } => security::unlock(first, password, ctx).await,
        Job::CompressPdf { quality } => compress::compress_pdf(first, *quality, ctx).await,
        Job::CompressImage(options) => raster::compress(first, options, ctx).await,
        Job::AddPageNumbers(options) => numbering::add_page_numbers(first, options, ctx).await,
        Job::ConvertImage(options) => raster::convert(first, options, ctx).await,
        Job::ImagesToPdf => raster::images_to_pdf(inputs, ctx).await,
    }
}

/// Map a step failure onto the classified error the caller sees.
fn classify(operation: Operation, step: &'static str, err: StepError) -> PipelineError {
    match err {
        StepError::Classified(e) => {
            debug!(
                operation = operation.name(),
                step,
                code = e.code.as_str(),
                "Pipeline failed"
            );
            e
        }
        other => {
            warn!(
                operation = operation.name(),
                step,
                error = %other,
                "Pipeline step failed"
            );
            PipelineError::new(
                operation.failure_code(),
                format!("The {} operation failed", operation.name()),
            )
        }
    }
}

fn write_atomic(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    let dir = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
        _ => std::path::PathBuf::from("."),
    };
    std::fs::create_dir_all(&dir)?;
    let mut tmp = tempfile::NamedTempFile::new_in(&dir)?;
    tmp.write_all(bytes)?;
    tmp.as_file().sync_all()?;
    tmp.persist(path).map_err(|e| e.error)?;
    Ok(())
}
