//! Host decode and encode capabilities.
//!
//! The pipeline never decodes or encodes video itself. It drives two
//! host-provided capabilities through the traits in this module:
//!
//! - [`MediaBackend`] decodes a media resource: probing, bounded seeking,
//!   and real-time forward playback with an audio tap.
//! - [`EncoderSink`] encodes rasters (and tapped audio packets) into a
//!   streamable container, handing out encoded chunks as they become ready.
//!
//! The `ffmpeg` feature provides FFmpeg-backed implementations; the
//! [`synthetic`](crate::synthetic) module provides in-process ones.

use std::time::Duration;

use image::RgbaImage;

use crate::configuration::{Container, VideoCodec};
use crate::error::PipelineError;

/// Natural properties of a media resource, known once it has been opened.
#[derive(Debug, Clone)]
pub struct SourceInfo {
    /// Natural width in pixels.
    pub width: u32,
    /// Natural height in pixels.
    pub height: u32,
    /// Total duration.
    pub duration: Duration,
    /// Frame-rate hint, if the container declares one.
    pub frame_rate: Option<f64>,
    /// The audio track that can be tapped during playback, if any.
    pub audio: Option<AudioTrack>,
}

impl SourceInfo {
    /// Width divided by height.
    pub fn aspect_ratio(&self) -> f64 {
        if self.height == 0 {
            0.0
        } else {
            self.width as f64 / self.height as f64
        }
    }
}

/// Description of a source audio track, sufficient to copy its packets into
/// an output container without re-encoding.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioTrack {
    /// Codec short name (e.g. `"aac"`, `"opus"`).
    pub codec_name: String,
    /// Sample rate in Hz.
    pub sample_rate: u32,
    /// Channel count.
    pub channels: u16,
    /// Packet time base as `(numerator, denominator)`.
    pub time_base: (i32, i32),
    /// Codec-specific extradata, if the codec carries any.
    pub extradata: Vec<u8>,
}

/// One encoded audio packet tapped from the source.
///
/// Timestamps are in the track's [`time_base`](AudioTrack::time_base).
#[derive(Debug, Clone, PartialEq)]
pub struct AudioPacket {
    /// Presentation timestamp.
    pub pts: Option<i64>,
    /// Decode timestamp.
    pub dts: Option<i64>,
    /// Packet duration.
    pub duration: i64,
    /// Encoded payload.
    pub data: Vec<u8>,
    /// Whether this packet can be decoded independently.
    pub keyframe: bool,
}

/// A decoded video frame at its presentation time.
#[derive(Debug, Clone)]
pub struct DecodedFrame {
    /// Presentation time relative to the start of the resource.
    pub timestamp: Duration,
    /// Decoded pixels at natural size.
    pub image: RgbaImage,
}

/// A frame delivered during real-time playback, together with the audio
/// packets that became available since the previous frame.
#[derive(Debug, Clone)]
pub struct PlaybackFrame {
    /// The displayed frame.
    pub frame: DecodedFrame,
    /// Audio packets tapped alongside this frame.
    pub audio: Vec<AudioPacket>,
}

/// Host decode capability behind a [`FrameSource`](crate::FrameSource).
///
/// Implementations own exactly one decodable resource. Seek-based access
/// and playback share the same decode position, which is why the pipeline
/// never uses both at once on the same backend.
pub trait MediaBackend {
    /// Determine the natural dimensions, duration and audio track.
    fn probe(&mut self) -> Result<SourceInfo, PipelineError>;

    /// Move the decode position to the first frame at or after `timestamp`
    /// and return it.
    ///
    /// Returns `Ok(None)` if no frame arrived within `budget`.
    fn seek(
        &mut self,
        timestamp: Duration,
        budget: Duration,
    ) -> Result<Option<DecodedFrame>, PipelineError>;

    /// Begin forward playback at `from`.
    fn play(&mut self, from: Duration) -> Result<(), PipelineError>;

    /// Block until the next displayed frame is available.
    ///
    /// Returns `Ok(None)` once playback has reached the end of the resource.
    fn next_frame(&mut self) -> Result<Option<PlaybackFrame>, PipelineError>;

    /// Stop playback and release playback resources.
    fn stop(&mut self);
}

/// Configuration handed to an [`EncoderSink`] when a capture session starts.
#[derive(Debug, Clone)]
pub struct EncoderConfig {
    /// Output width in pixels.
    pub width: u32,
    /// Output height in pixels.
    pub height: u32,
    /// Constant output frame rate.
    pub frame_rate: u32,
    /// Video codec.
    pub codec: VideoCodec,
    /// Output container.
    pub container: Container,
    /// Target video bit rate in bits per second.
    pub video_bitrate: Option<usize>,
    /// Target audio bit rate in bits per second.
    pub audio_bitrate: Option<usize>,
    /// Audio track to copy into the output, or `None` for video only.
    pub audio: Option<AudioTrack>,
}

/// Host encode capability behind a [`CaptureSession`](crate::CaptureSession).
pub trait EncoderSink {
    /// Open the encoder and write the container header.
    ///
    /// Returns [`PipelineError::ResourceExhausted`] if the host rejects the
    /// configuration.
    fn open(&mut self, config: &EncoderConfig) -> Result<(), PipelineError>;

    /// Encode one raster. `pts` counts output frames from zero.
    fn write_video(&mut self, frame: &RgbaImage, pts: i64) -> Result<(), PipelineError>;

    /// Copy one tapped audio packet into the output.
    fn write_audio(&mut self, packet: &AudioPacket) -> Result<(), PipelineError>;

    /// Drain the encoded chunks that are ready so far.
    fn take_chunks(&mut self) -> Vec<Vec<u8>>;

    /// Flush the encoder, write the trailer, and return the remaining bytes.
    fn finish(&mut self) -> Result<Vec<u8>, PipelineError>;

    /// Discard everything and release encoder resources.
    fn abort(&mut self);
}
