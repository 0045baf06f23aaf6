//! Invocation and encoder configuration.
//!
//! [`PipelineOptions`] is the explicit invocation context: a builder that
//! threads progress callbacks, the cancellation token and the seek bound
//! through the Frame Source, Capture Session and Orchestrator without
//! polluting every function signature. [`EncoderOptions`] selects what the
//! host encoder produces.
//!
//! # Example
//!
//! ```
//! use std::{sync::Arc, time::Duration};
//!
//! use clipsmith::{CancellationToken, EncoderOptions, PipelineOptions, VideoCodec};
//!
//! let token = CancellationToken::new();
//! let options = PipelineOptions::new()
//!     .with_cancellation(token.clone())
//!     .with_seek_timeout(Duration::from_millis(120))
//!     .with_encoder(EncoderOptions::default().codec(VideoCodec::H264));
//! ```

use std::fmt::{Debug, Formatter, Result as FmtResult};
use std::sync::Arc;
use std::time::Duration;

use crate::progress::{CancellationToken, NoOpProgress, ProgressCallback, ProgressReporter};

/// Default upper bound on how long a seek may wait for a frame.
pub const DEFAULT_SEEK_TIMEOUT: Duration = Duration::from_millis(150);

const MIN_SEEK_TIMEOUT: Duration = Duration::from_millis(1);
const MAX_SEEK_TIMEOUT: Duration = Duration::from_secs(5);

/// Output video codec requested from the host encoder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum VideoCodec {
    /// VP9. This is the default.
    #[default]
    Vp9,
    /// VP8.
    Vp8,
    /// H.264 / AVC.
    H264,
}

impl VideoCodec {
    /// Short codec name as understood by FFmpeg.
    pub fn name(self) -> &'static str {
        match self {
            VideoCodec::Vp9 => "vp9",
            VideoCodec::Vp8 => "vp8",
            VideoCodec::H264 => "h264",
        }
    }
}

/// Output container requested from the host encoder.
///
/// All variants are streamable: they can be written front to back into a
/// growing in-memory buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Container {
    /// Matroska. Accepts any tapped audio codec. This is the default.
    #[default]
    Matroska,
    /// WebM (VP8/VP9 with Opus/Vorbis audio only).
    WebM,
    /// Fragmented MP4.
    Mp4,
}

impl Container {
    /// Muxer short name as understood by FFmpeg.
    pub fn muxer_name(self) -> &'static str {
        match self {
            Container::Matroska => "matroska",
            Container::WebM => "webm",
            Container::Mp4 => "mp4",
        }
    }

    /// MIME type of artifacts written in this container.
    pub fn mime_type(self) -> &'static str {
        match self {
            Container::Matroska => "video/x-matroska",
            Container::WebM => "video/webm",
            Container::Mp4 => "video/mp4",
        }
    }
}

/// Options for the host video encoder.
///
/// Bit rates left as `None` are chosen per job (see
/// [`Job::plan`](crate::Job::plan)), falling back to the host default.
#[derive(Debug, Clone, Default)]
pub struct EncoderOptions {
    /// Codec to use. Default is VP9.
    pub codec: VideoCodec,
    /// Output container. Default is Matroska.
    pub container: Container,
    /// Video bit rate in bits per second.
    pub video_bitrate: Option<usize>,
    /// Audio bit rate in bits per second (applies when audio is re-encoded).
    pub audio_bitrate: Option<usize>,
}

impl EncoderOptions {
    /// Set the codec.
    #[must_use]
    pub fn codec(mut self, codec: VideoCodec) -> Self {
        self.codec = codec;
        self
    }

    /// Set the container.
    #[must_use]
    pub fn container(mut self, container: Container) -> Self {
        self.container = container;
        self
    }

    /// Set the target video bit rate in bits per second.
    #[must_use]
    pub fn video_bitrate(mut self, bitrate: usize) -> Self {
        self.video_bitrate = Some(bitrate);
        self
    }

    /// Set the target audio bit rate in bits per second.
    #[must_use]
    pub fn audio_bitrate(mut self, bitrate: usize) -> Self {
        self.audio_bitrate = Some(bitrate);
        self
    }
}

/// Configuration for one pipeline invocation.
///
/// All fields have sensible defaults: no progress callback, no
/// cancellation, a 150 ms seek bound, progress reported for every item.
#[derive(Clone)]
pub struct PipelineOptions {
    pub(crate) progress: Arc<dyn ProgressCallback>,
    pub(crate) cancellation: Option<CancellationToken>,
    pub(crate) seek_timeout: Duration,
    pub(crate) batch_size: u64,
    pub(crate) encoder: EncoderOptions,
}

impl Debug for PipelineOptions {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.debug_struct("PipelineOptions")
            .field("has_cancellation", &self.cancellation.is_some())
            .field("seek_timeout", &self.seek_timeout)
            .field("batch_size", &self.batch_size)
            .field("encoder", &self.encoder)
            .finish_non_exhaustive()
    }
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self::new()
    }
}

impl PipelineOptions {
    /// Create a new configuration with default settings.
    pub fn new() -> Self {
        Self {
            progress: Arc::new(NoOpProgress),
            cancellation: None,
            seek_timeout: DEFAULT_SEEK_TIMEOUT,
            batch_size: 1,
            encoder: EncoderOptions::default(),
        }
    }

    /// Attach a progress callback.
    #[must_use]
    pub fn with_progress(mut self, callback: Arc<dyn ProgressCallback>) -> Self {
        self.progress = callback;
        self
    }

    /// Attach a cancellation token.
    ///
    /// When the token is cancelled the invocation stops at the next seek or
    /// frame boundary, releases its resources, and returns
    /// [`PipelineError::Cancelled`](crate::PipelineError::Cancelled).
    #[must_use]
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancellation = Some(token);
        self
    }

    /// Set the upper bound on how long a seek may wait for a frame.
    ///
    /// Clamped to `1ms..=5s`. A seek decodes forward from the previous
    /// keyframe, so inputs with long keyframe intervals may need more than
    /// the default [`DEFAULT_SEEK_TIMEOUT`].
    #[must_use]
    pub fn with_seek_timeout(mut self, timeout: Duration) -> Self {
        self.seek_timeout = timeout.clamp(MIN_SEEK_TIMEOUT, MAX_SEEK_TIMEOUT);
        self
    }

    /// Set how often per-item progress fires (every N items, minimum 1).
    #[must_use]
    pub fn with_batch_size(mut self, size: u64) -> Self {
        self.batch_size = size.max(1);
        self
    }

    /// Set the encoder options.
    #[must_use]
    pub fn with_encoder(mut self, encoder: EncoderOptions) -> Self {
        self.encoder = encoder;
        self
    }

    /// The configured seek bound.
    pub fn seek_timeout(&self) -> Duration {
        self.seek_timeout
    }

    /// The configured encoder options.
    pub fn encoder(&self) -> &EncoderOptions {
        &self.encoder
    }

    /// Returns `true` if cancellation has been requested.
    pub(crate) fn is_cancelled(&self) -> bool {
        self.cancellation
            .as_ref()
            .is_some_and(|token| token.is_cancelled())
    }

    pub(crate) fn reporter(&self) -> ProgressReporter {
        ProgressReporter::new(
            self.progress.clone(),
            self.cancellation.clone(),
            self.batch_size,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn seek_timeout_is_clamped() {
        let options = PipelineOptions::new().with_seek_timeout(Duration::ZERO);
        assert_eq!(options.seek_timeout(), Duration::from_millis(1));

        let options = PipelineOptions::new().with_seek_timeout(Duration::from_secs(60));
        assert_eq!(options.seek_timeout(), Duration::from_secs(5));
    }

    #[test]
    fn defaults() {
        let options = PipelineOptions::default();
        assert_eq!(options.seek_timeout(), DEFAULT_SEEK_TIMEOUT);
        assert_eq!(options.encoder().codec, VideoCodec::Vp9);
        assert_eq!(options.encoder().container, Container::Matroska);
        assert!(!options.is_cancelled());
    }
}
