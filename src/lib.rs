//! # clipsmith
//!
//! Frame sampling, pixel transforms and re-encoding for short-form video
//! tooling.
//!
//! A job opens a media source, samples rasters from it either at arbitrary
//! timestamps or continuously during playback, runs each raster through a
//! pure transform, and either feeds the results to an encoder at a fixed
//! frame rate or reduces them to an analysis report.
//!
//! ## Quick Start
//!
//! ### Compress a Clip
//!
//! ```no_run
//! # #[cfg(feature = "ffmpeg")]
//! # fn main() -> Result<(), clipsmith::PipelineError> {
//! use clipsmith::ffmpeg::{FfmpegSink, FfmpegSource};
//! use clipsmith::{Job, Outcome, Pipeline, PipelineOptions};
//!
//! let source = FfmpegSource::open("input.mp4")?;
//! let outcome = Pipeline::new(source, FfmpegSink::new()).run(&Job::compress(), &PipelineOptions::new())?;
//! if let Outcome::Artifact(artifact) = outcome {
//!     artifact.save("compressed.mkv")?;
//! }
//! # Ok(())
//! # }
//! # #[cfg(not(feature = "ffmpeg"))]
//! # fn main() {}
//! ```
//!
//! ### Analyze Colors
//!
//! ```
//! use std::time::Duration;
//!
//! use clipsmith::synthetic::{MemorySink, SyntheticSource};
//! use clipsmith::{Job, Outcome, Pipeline, PipelineOptions, Temperature};
//!
//! let backend = SyntheticSource::solid(48, 27, 10.0, Duration::from_secs(3), [240, 200, 120]);
//! let outcome = Pipeline::new(backend, MemorySink::new()).run(&Job::analyze_color(), &PipelineOptions::new())?;
//! let Outcome::Analysis(report) = outcome else { unreachable!() };
//! assert_eq!(report.temperature, Temperature::Warm);
//! # Ok::<(), clipsmith::PipelineError>(())
//! ```
//!
//! ## Building Blocks
//!
//! - [`FrameSource`] wraps a [`MediaBackend`]: bounded seeking, sampling at
//!   a capture size, and continuous sampling during playback.
//! - [`transform`] holds the pure raster functions: color filters, rotation,
//!   flips, center cropping, zoom and subtitle overlay.
//! - [`CaptureSession`] records transformed frames at a fixed rate into an
//!   [`EncoderSink`] and yields an [`Artifact`].
//! - [`analysis`] scores motion to pick highlight start points and builds
//!   color reports with a k-means palette.
//! - [`Pipeline`] plans and runs a [`Job`] end to end, reporting progress
//!   and honoring cancellation through [`PipelineOptions`].
//!
//! ### Optional Features
//!
//! | Feature | Description |
//! |---------|-------------|
//! | `ffmpeg` | `FfmpegSource` and `FfmpegSink` hosts, and the `clipsmith` binary |
//! | `async` | `spawn_job` and `progress_channel` for Tokio applications |
//! | `rayon` | Color filters process rows in parallel |
//! | `full` | Enables all of the above |

pub mod analysis;
pub mod capture;
pub mod configuration;
pub mod error;
#[cfg(feature = "ffmpeg")]
pub mod ffmpeg;
pub mod media;
pub mod pipeline;
pub mod progress;
pub mod source;
#[cfg(feature = "async")]
pub mod stream;
pub mod synthetic;
pub mod transform;

pub use analysis::{ColorReport, CutPoint, PaletteCluster, Temperature, TimelineEntry};
pub use capture::{
    Artifact, AudioRoute, CaptureConfig, CaptureSession, SessionState, StopReason,
};
pub use configuration::{Container, EncoderOptions, PipelineOptions, VideoCodec};
pub use error::{ErrorKind, PipelineError};
pub use media::{
    AudioPacket, AudioTrack, DecodedFrame, EncoderConfig, EncoderSink, MediaBackend,
    PlaybackFrame, SourceInfo,
};
pub use pipeline::{CapturePlan, Job, Outcome, Pipeline, Plan};
pub use progress::{CancellationToken, OperationType, ProgressCallback, ProgressInfo};
pub use source::{FrameSource, Sample};
#[cfg(feature = "async")]
pub use stream::{JobHandle, ProgressStream, spawn_job};
pub use transform::{ColorFilter, FrameContext, Rotation, SubtitleCue, TransformSpec};
