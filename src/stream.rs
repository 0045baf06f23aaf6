//! Async execution of pipeline invocations.
//!
//! [`spawn_job`] runs a [`Pipeline`] on a Tokio blocking thread and returns
//! a [`JobHandle`], a future that resolves to the invocation's
//! [`Outcome`]. Decoding, transforming and encoding happen off the runtime's
//! worker threads, so one invocation never stalls another.
//!
//! [`progress_channel`] pairs a [`ProgressCallback`] with a
//! [`ProgressStream`] that yields progress snapshots through a bounded
//! channel. Snapshots that do not fit in the channel are dropped rather than
//! blocking the pipeline.
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! use tokio_stream::StreamExt;
//!
//! use clipsmith::stream::{progress_channel, spawn_job};
//! use clipsmith::synthetic::{MemorySink, SyntheticSource};
//! use clipsmith::{Job, Outcome, Pipeline, PipelineOptions};
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> Result<(), clipsmith::PipelineError> {
//! let (sender, mut progress) = progress_channel(64);
//! let options = PipelineOptions::new().with_progress(Arc::new(sender));
//!
//! let backend = SyntheticSource::solid(32, 18, 10.0, Duration::from_secs(2), [90, 90, 90]);
//! let handle = spawn_job(Pipeline::new(backend, MemorySink::new()), Job::analyze_color(), options);
//!
//! let Outcome::Analysis(report) = handle.await? else { unreachable!() };
//! assert_eq!(report.timeline.len(), 40);
//!
//! let mut last = 0.0;
//! while let Some(info) = progress.next().await {
//!     assert!(info.percentage >= last);
//!     last = info.percentage;
//! }
//! assert_eq!(last, 100.0);
//! # Ok(())
//! # }
//! ```

use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use tokio::sync::mpsc::{self, Receiver, Sender};
use tokio::task::JoinHandle;
use tokio_stream::Stream;

use crate::configuration::PipelineOptions;
use crate::error::PipelineError;
use crate::media::{EncoderSink, MediaBackend};
use crate::pipeline::{Job, Outcome, Pipeline};
use crate::progress::{CancellationToken, ProgressCallback, ProgressInfo};

/// Default capacity of a [`progress_channel`].
pub const DEFAULT_PROGRESS_CAPACITY: usize = 32;

/// A running invocation.
///
/// Resolves to the invocation's outcome. Dropping the handle does not stop
/// the invocation; call [`cancel`](JobHandle::cancel) for that.
pub struct JobHandle {
    handle: JoinHandle<Result<Outcome, PipelineError>>,
    token: CancellationToken,
}

impl JobHandle {
    /// Request cancellation. The handle then resolves to
    /// [`PipelineError::Cancelled`] unless the invocation already settled.
    pub fn cancel(&self) {
        self.token.cancel();
    }

    /// The token observed by the invocation.
    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.token
    }
}

impl Future for JobHandle {
    type Output = Result<Outcome, PipelineError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.handle)
            .poll(cx)
            .map(|result| result.unwrap_or_else(|_| Err(PipelineError::Cancelled)))
    }
}

/// Run `job` on a blocking thread.
///
/// The invocation observes the token already attached to `options`, or a
/// fresh one otherwise; either way [`JobHandle::cancel`] reaches it.
pub fn spawn_job<B, S>(pipeline: Pipeline<B, S>, job: Job, options: PipelineOptions) -> JobHandle
where
    B: MediaBackend + Send + 'static,
    S: EncoderSink + Send + 'static,
{
    let token = options.cancellation.clone().unwrap_or_default();
    let options = options.with_cancellation(token.clone());
    let handle = tokio::task::spawn_blocking(move || pipeline.run(&job, &options));
    JobHandle { handle, token }
}

/// The sending half of a [`progress_channel`]; attach it to
/// [`PipelineOptions::with_progress`].
#[derive(Clone)]
pub struct ProgressSender {
    sender: Sender<ProgressInfo>,
}

impl ProgressCallback for ProgressSender {
    fn on_progress(&self, info: &ProgressInfo) {
        if self.sender.try_send(info.clone()).is_err() {
            log::trace!("Progress update at {:.1}% dropped", info.percentage);
        }
    }
}

/// Progress snapshots of one invocation, in delivery order.
///
/// The stream ends once the invocation has settled and every
/// [`ProgressSender`] has been dropped.
pub struct ProgressStream {
    receiver: Receiver<ProgressInfo>,
}

impl Stream for ProgressStream {
    type Item = ProgressInfo;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.receiver.poll_recv(cx)
    }
}

/// Create a bounded progress channel holding at most `capacity` snapshots.
pub fn progress_channel(capacity: usize) -> (ProgressSender, ProgressStream) {
    let (sender, receiver) = mpsc::channel(capacity.max(1));
    (ProgressSender { sender }, ProgressStream { receiver })
}
