//! Progress reporting and cancellation support.
//!
//! This module provides [`ProgressCallback`] for monitoring a pipeline
//! invocation, [`CancellationToken`] for cooperative cancellation, and
//! [`ProgressInfo`] for progress snapshots.
//!
//! Percentages delivered to a callback are monotonically non-decreasing and
//! stay within `0.0..=100.0`. Once an invocation has settled (succeeded,
//! failed, or been cancelled) further updates are dropped, so a late update
//! racing cancellation can never resurrect a finished invocation.
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//!
//! use clipsmith::{CancellationToken, PipelineOptions, ProgressCallback, ProgressInfo};
//!
//! struct PrintProgress;
//!
//! impl ProgressCallback for PrintProgress {
//!     fn on_progress(&self, info: &ProgressInfo) {
//!         println!("[{:?}] {:.0}% {}", info.operation, info.percentage, info.status);
//!     }
//! }
//!
//! let token = CancellationToken::new();
//! let options = PipelineOptions::new()
//!     .with_progress(Arc::new(PrintProgress))
//!     .with_cancellation(token.clone());
//! ```

use std::sync::{
    Arc, Mutex,
    atomic::{AtomicBool, Ordering},
};
use std::time::{Duration, Instant};

/// The kind of work an invocation is performing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum OperationType {
    /// Opening and probing the source.
    Probing,
    /// Scanning for the highest-motion start point.
    MotionSearch,
    /// Recording frames into the encoder.
    Recording,
    /// Finalizing the output container.
    Finalizing,
    /// Sampling frames for color analysis.
    ColorAnalysis,
    /// Sampling still thumbnails.
    ThumbnailSampling,
}

/// A snapshot of invocation progress.
#[derive(Debug, Clone)]
pub struct ProgressInfo {
    /// What kind of work is being performed.
    pub operation: OperationType,
    /// Completion percentage, monotonic within one invocation.
    pub percentage: f32,
    /// Human-readable status line.
    pub status: String,
    /// Items (frames, samples, scan steps) processed in the current stage.
    pub current: u64,
    /// Items expected in the current stage, if known.
    pub total: Option<u64>,
    /// Wall-clock time elapsed since the invocation started.
    pub elapsed: Duration,
}

/// Trait for receiving progress updates during an invocation.
///
/// Implementations must be [`Send`] and [`Sync`] because callbacks may be
/// invoked from a blocking worker thread when the `async` feature is used.
///
/// Progress callbacks are **infallible**: they observe but cannot halt the
/// invocation. Use [`CancellationToken`] for cooperative cancellation.
pub trait ProgressCallback: Send + Sync {
    /// Called whenever the invocation makes reportable progress.
    fn on_progress(&self, info: &ProgressInfo);
}

/// A no-op implementation that discards all progress notifications.
///
/// This is the default when no callback is configured.
pub(crate) struct NoOpProgress;

impl ProgressCallback for NoOpProgress {
    fn on_progress(&self, _info: &ProgressInfo) {}
}

/// Cooperative cancellation token backed by an [`AtomicBool`].
///
/// Clone this token and share it between threads; call
/// [`cancel`](CancellationToken::cancel) from any thread to request
/// cancellation. The pipeline checks the token before every seek and before
/// every frame pushed into the encoder.
///
/// # Example
///
/// ```
/// use clipsmith::CancellationToken;
///
/// let token = CancellationToken::new();
/// assert!(!token.is_cancelled());
///
/// token.cancel();
/// assert!(token.is_cancelled());
/// ```
#[derive(Debug, Clone)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
}

impl CancellationToken {
    /// Create a new, non-cancelled token.
    pub fn new() -> Self {
        Self {
            cancelled: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Request cancellation.
    ///
    /// All clones of this token will observe the cancellation.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }

    /// Check whether cancellation has been requested.
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }
}

impl Default for CancellationToken {
    fn default() -> Self {
        Self::new()
    }
}

struct ReporterState {
    last_percentage: f32,
    stage: (f32, f32),
    operation: OperationType,
    items_since_last_report: u64,
}

/// Per-invocation progress emitter.
///
/// Maps stage-relative fractions into the stage's percentage range, keeps
/// the delivered percentage monotonic, batches per-item reports, and stops
/// delivering once [`settle`](ProgressReporter::settle) has been called or
/// the invocation's token is cancelled.
pub(crate) struct ProgressReporter {
    callback: Arc<dyn ProgressCallback>,
    cancellation: Option<CancellationToken>,
    settled: AtomicBool,
    batch_size: u64,
    start_time: Instant,
    state: Mutex<ReporterState>,
}

impl ProgressReporter {
    pub(crate) fn new(
        callback: Arc<dyn ProgressCallback>,
        cancellation: Option<CancellationToken>,
        batch_size: u64,
    ) -> Self {
        Self {
            callback,
            cancellation,
            settled: AtomicBool::new(false),
            batch_size: batch_size.max(1),
            start_time: Instant::now(),
            state: Mutex::new(ReporterState {
                last_percentage: 0.0,
                stage: (0.0, 100.0),
                operation: OperationType::Probing,
                items_since_last_report: 0,
            }),
        }
    }

    /// Enter a new stage spanning `from..=to` percent.
    pub(crate) fn stage(&self, operation: OperationType, from: f32, to: f32, status: &str) {
        if let Ok(mut state) = self.state.lock() {
            state.operation = operation;
            state.stage = (from.clamp(0.0, 100.0), to.clamp(0.0, 100.0));
            state.items_since_last_report = 0;
        }
        self.emit(from, status, 0, None);
    }

    /// Report `current` of `total` items completed within the current stage.
    ///
    /// Reports are batched: only every `batch_size`-th call (and the final
    /// item) reaches the callback.
    pub(crate) fn advance(&self, current: u64, total: u64, status: &str) {
        let percentage = {
            let Ok(mut state) = self.state.lock() else {
                return;
            };
            state.items_since_last_report += 1;
            if state.items_since_last_report < self.batch_size && current < total {
                return;
            }
            state.items_since_last_report = 0;
            let fraction = if total == 0 {
                1.0
            } else {
                (current as f32 / total as f32).min(1.0)
            };
            let (from, to) = state.stage;
            from + (to - from) * fraction
        };
        self.emit(percentage, status, current, Some(total));
    }

    /// Report an absolute percentage with a status line.
    pub(crate) fn report(&self, percentage: f32, status: &str) {
        self.emit(percentage, status, 0, None);
    }

    /// Mark the invocation as settled; later updates are dropped.
    pub(crate) fn settle(&self) {
        self.settled.store(true, Ordering::Release);
    }

    /// Deliver the final 100% report and settle.
    pub(crate) fn complete(&self, status: &str) {
        self.emit(100.0, status, 0, None);
        self.settle();
    }

    fn is_closed(&self) -> bool {
        self.settled.load(Ordering::Acquire)
            || self
                .cancellation
                .as_ref()
                .is_some_and(|token| token.is_cancelled())
    }

    fn emit(&self, percentage: f32, status: &str, current: u64, total: Option<u64>) {
        if self.is_closed() {
            return;
        }

        let (percentage, operation) = {
            let Ok(mut state) = self.state.lock() else {
                return;
            };
            let clamped = percentage.clamp(0.0, 100.0).max(state.last_percentage);
            state.last_percentage = clamped;
            (clamped, state.operation)
        };

        let info = ProgressInfo {
            operation,
            percentage,
            status: status.to_string(),
            current,
            total,
            elapsed: self.start_time.elapsed(),
        };
        self.callback.on_progress(&info);
    }
}
