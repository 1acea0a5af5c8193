//! Progress reporting for pipeline runs.
//!
//! Inject an [`Arc<dyn ProgressObserver>`] via
//! [`crate::config::PipelineConfigBuilder::progress`] to receive
//! [`ProgressEvent`]s as a run moves through its steps.
//!
//! Events are coarse: one after setup, one after each unit of work (file,
//! page, embedded image), and a final `100` just before the result is
//! returned. Within one run the percentage never decreases.
//!
//! # Example
//!
//! ```rust
//! use edgequake_doctools::{PipelineConfig, ProgressEvent, ProgressCallback};
//! use std::sync::Arc;
//!
//! let observer: ProgressCallback = Arc::new(|event: &ProgressEvent| {
//!     eprintln!("{}%", event.percentage);
//! });
//!
//! let config = PipelineConfig::builder()
//!     .progress(observer)
//!     .build()
//!     .unwrap();
//! ```
//!
//! Callers that prefer a stream can use [`progress_channel`] instead; the
//! pipeline writes into an unbounded channel and the caller drains it.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;

/// First event of a non-trivial run.
pub const SETUP_PERCENT: u8 = 10;
/// Lower edge of the per-unit band.
pub const WORK_START_PERCENT: u8 = 30;
/// Upper edge of the per-unit band.
pub const WORK_END_PERCENT: u8 = 90;
/// Reported while serialising the result.
pub const SERIALIZE_PERCENT: u8 = 95;

/// A percentage-complete notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgressEvent {
    /// 0–100.
    pub percentage: u8,
    /// Units finished so far, when the event follows a unit of work.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total: Option<usize>,
}

impl ProgressEvent {
    pub fn percent(percentage: u8) -> Self {
        Self {
            percentage,
            current: None,
            total: None,
        }
    }
}

/// Receives progress events.
///
/// Called synchronously from the pipeline's own task, so implementations
/// should return quickly. Closures `Fn(&ProgressEvent)` implement it.
pub trait ProgressObserver: Send + Sync {
    fn on_progress(&self, event: &ProgressEvent);
}

impl<F> ProgressObserver for F
where
    F: Fn(&ProgressEvent) + Send + Sync,
{
    fn on_progress(&self, event: &ProgressEvent) {
        self(event)
    }
}

/// A no-op observer for callers that don't need progress events.
pub struct NoopProgress;

impl ProgressObserver for NoopProgress {
    fn on_progress(&self, _event: &ProgressEvent) {}
}

/// Convenience alias matching the type stored in [`crate::config::PipelineConfig`].
pub type ProgressCallback = Arc<dyn ProgressObserver>;

/// Stream side of [`progress_channel`].
pub type ProgressStream = UnboundedReceiverStream<ProgressEvent>;

/// Observer that forwards every event into an unbounded channel.
pub struct ChannelProgress {
    tx: mpsc::UnboundedSender<ProgressEvent>,
}

impl ProgressObserver for ChannelProgress {
    fn on_progress(&self, event: &ProgressEvent) {
        // Receiver gone means nobody is listening any more.
        let _ = self.tx.send(*event);
    }
}

/// Create an observer/stream pair. The stream ends once the observer (and
/// every config holding it) is dropped.
pub fn progress_channel() -> (ProgressCallback, ProgressStream) {
    let (tx, rx) = mpsc::unbounded_channel();
    (
        Arc::new(ChannelProgress { tx }),
        UnboundedReceiverStream::new(rx),
    )
}

/// Linear interpolation of `done / total` into `[start, end]`.
pub fn band(start: u8, end: u8, done: usize, total: usize) -> u8 {
    if total == 0 || done >= total {
        return end;
    }
    let span = end.saturating_sub(start) as usize;
    start + (span * done / total) as u8
}

/// Emits events for one run and keeps them monotonic.
///
/// Out-of-order or oversized percentages are clamped rather than emitted
/// as-is, so observers can rely on a non-decreasing sequence.
pub struct ProgressReporter {
    observer: Option<ProgressCallback>,
    last: Option<u8>,
}

impl ProgressReporter {
    pub fn new(observer: Option<ProgressCallback>) -> Self {
        Self {
            observer,
            last: None,
        }
    }

    /// Highest percentage emitted so far.
    pub fn last(&self) -> Option<u8> {
        self.last
    }

    pub fn report(&mut self, percentage: u8) {
        self.emit(ProgressEvent::percent(percentage));
    }

    /// Report that `done` of `total` units are finished, inside the work band.
    pub fn report_unit(&mut self, done: usize, total: usize) {
        self.emit(ProgressEvent {
            percentage: band(WORK_START_PERCENT, WORK_END_PERCENT, done, total),
            current: Some(done),
            total: Some(total),
        });
    }

    pub fn finish(&mut self) {
        self.report(100);
    }

    fn emit(&mut self, mut event: ProgressEvent) {
        event.percentage = event.percentage.min(100);
        if let Some(last) = self.last {
            event.percentage = event.percentage.max(last);
        }
        self.last = Some(event.percentage);
        if let Some(ref observer) = self.observer {
            observer.on_progress(&event);
        }
    }
}
