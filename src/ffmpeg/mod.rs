//! FFmpeg-backed host capabilities.
//!
//! - [`FfmpegSource`] decodes a media file: bounded seeking, RGBA
//!   conversion, and paced forward playback that taps the best audio
//!   stream's packets without decoding them.
//! - [`FfmpegSink`] encodes rasters with VP9, VP8 or H.264 and muxes them,
//!   together with copied audio packets, into an in-memory container.
//!
//! FFmpeg prints its own diagnostics to stderr, independent of the `log`
//! facade used by the rest of the crate. [`set_ffmpeg_log_level`] tunes
//! that output.
//!
//! # Example
//!
//! ```no_run
//! use clipsmith::ffmpeg::{FfmpegLogLevel, FfmpegSink, FfmpegSource, set_ffmpeg_log_level};
//! use clipsmith::{Job, Outcome, Pipeline, PipelineOptions};
//!
//! set_ffmpeg_log_level(FfmpegLogLevel::Error);
//!
//! let source = FfmpegSource::open("input.mp4")?;
//! let outcome = Pipeline::new(source, FfmpegSink::new()).run(&Job::compress(), &PipelineOptions::new())?;
//! if let Outcome::Artifact(artifact) = outcome {
//!     artifact.save("compressed.mkv")?;
//! }
//! # Ok::<(), clipsmith::PipelineError>(())
//! ```

mod conversion;
mod sink;
mod source;

use std::str::FromStr;

use ffmpeg_next::util::log::Level;

use crate::error::PipelineError;

pub use sink::FfmpegSink;
pub use source::FfmpegSource;

/// Verbosity of FFmpeg's own console output, most quiet first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FfmpegLogLevel {
    /// Nothing.
    Quiet,
    /// Only conditions that abort the process.
    Panic,
    /// Unrecoverable errors.
    Fatal,
    /// Recoverable errors.
    Error,
    /// Warnings. FFmpeg's default.
    Warning,
    /// Informational messages.
    Info,
    /// Verbose informational messages.
    Verbose,
    /// Debugging messages.
    Debug,
    /// Everything.
    Trace,
}

impl From<FfmpegLogLevel> for Level {
    fn from(level: FfmpegLogLevel) -> Self {
        match level {
            FfmpegLogLevel::Quiet => Level::Quiet,
            FfmpegLogLevel::Panic => Level::Panic,
            FfmpegLogLevel::Fatal => Level::Fatal,
            FfmpegLogLevel::Error => Level::Error,
            FfmpegLogLevel::Warning => Level::Warning,
            FfmpegLogLevel::Info => Level::Info,
            FfmpegLogLevel::Verbose => Level::Verbose,
            FfmpegLogLevel::Debug => Level::Debug,
            FfmpegLogLevel::Trace => Level::Trace,
        }
    }
}

impl FromStr for FfmpegLogLevel {
    type Err = PipelineError;

    fn from_str(name: &str) -> Result<Self, Self::Err> {
        match name.to_ascii_lowercase().as_str() {
            "quiet" => Ok(FfmpegLogLevel::Quiet),
            "panic" => Ok(FfmpegLogLevel::Panic),
            "fatal" => Ok(FfmpegLogLevel::Fatal),
            "error" => Ok(FfmpegLogLevel::Error),
            "warning" | "warn" => Ok(FfmpegLogLevel::Warning),
            "info" => Ok(FfmpegLogLevel::Info),
            "verbose" => Ok(FfmpegLogLevel::Verbose),
            "debug" => Ok(FfmpegLogLevel::Debug),
            "trace" => Ok(FfmpegLogLevel::Trace),
            other => Err(PipelineError::Validation(format!("unknown FFmpeg log level '{other}'"))),
        }
    }
}

/// Set FFmpeg's console verbosity. Does not affect the `log` facade.
pub fn set_ffmpeg_log_level(level: FfmpegLogLevel) {
    ffmpeg_next::util::log::set_level(level.into());
}

/// Initialize FFmpeg. Safe to call repeatedly.
pub(crate) fn init() -> Result<(), PipelineError> {
    ffmpeg_next::init()
        .map_err(|error| PipelineError::source_error(format!("FFmpeg initialization failed: {error}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn log_level_names() {
        assert_eq!("warn".parse::<FfmpegLogLevel>().unwrap(), FfmpegLogLevel::Warning);
        assert_eq!("QUIET".parse::<FfmpegLogLevel>().unwrap(), FfmpegLogLevel::Quiet);
        assert!("loud".parse::<FfmpegLogLevel>().is_err());
    }
}
