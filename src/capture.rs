//! Capture Session: fixed-rate recording of transformed frames into an
//! encoder sink.
//!
//! A [`CaptureSession`] moves through
//! `Idle → Started → Recording → Stopping → Stopped`, or ends in `Failed`
//! or `Cancelled`. Frames are accepted only while `Recording`. Encoded
//! chunks accumulate in a buffer private to the session and only become
//! visible as an [`Artifact`] once the session has reached `Stopped`.
//!
//! Source frames arrive at whatever rate the source plays; the session
//! resamples them onto a constant output clock by emitting the most recent
//! frame for every output tick that has come due.
//!
//! # Example
//!
//! ```
//! use std::time::Duration;
//!
//! use clipsmith::synthetic::{MemorySink, SyntheticSource};
//! use clipsmith::{CaptureConfig, CaptureSession, FrameSource, PipelineOptions};
//!
//! let backend = SyntheticSource::solid(64, 48, 30.0, Duration::from_secs(10), [0, 0, 0]);
//! let mut source = FrameSource::open(backend)?;
//!
//! let config = CaptureConfig::new(30).with_frame_budget(CaptureConfig::budget_for(30, Duration::from_secs(4)));
//! let artifact = CaptureSession::new(MemorySink::new(), config).record(&mut source, &PipelineOptions::new())?;
//! assert_eq!(artifact.frame_count, 120);
//! # Ok::<(), clipsmith::PipelineError>(())
//! ```

use std::fmt::{Display, Formatter, Result as FmtResult};
use std::fs;
use std::ops::ControlFlow;
use std::path::Path;
use std::time::Duration;

use image::RgbaImage;

use crate::configuration::{EncoderOptions, PipelineOptions};
use crate::error::PipelineError;
use crate::media::{AudioPacket, AudioTrack, EncoderConfig, EncoderSink, MediaBackend};
use crate::progress::{OperationType, ProgressReporter};
use crate::source::{FrameSource, Sample};
use crate::transform::{FrameContext, TransformSpec};

/// Why a session left `Recording`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// The source reached its end.
    SourceEnded,
    /// The configured frame budget was reached.
    FrameBudget,
    /// The caller cancelled the invocation.
    Cancelled,
}

/// Lifecycle state of a [`CaptureSession`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Created, encoder not yet opened.
    Idle,
    /// Encoder open and audio route attached.
    Started,
    /// Accepting frames.
    Recording,
    /// No longer accepting frames; waiting to finalize or release.
    Stopping(StopReason),
    /// Finalized; the artifact has been produced.
    Stopped,
    /// A source or encoder error ended the session.
    Failed,
    /// The caller cancelled the session.
    Cancelled,
}

impl SessionState {
    /// Whether the session has settled and can make no further progress.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            SessionState::Stopped | SessionState::Failed | SessionState::Cancelled
        )
    }
}

impl Display for SessionState {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        match self {
            SessionState::Idle => f.write_str("idle"),
            SessionState::Started => f.write_str("started"),
            SessionState::Recording => f.write_str("recording"),
            SessionState::Stopping(reason) => write!(f, "stopping ({reason:?})"),
            SessionState::Stopped => f.write_str("stopped"),
            SessionState::Failed => f.write_str("failed"),
            SessionState::Cancelled => f.write_str("cancelled"),
        }
    }
}

/// Whether the source's audio track is carried into the output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AudioRoute {
    /// Copy the source audio track, if there is one.
    #[default]
    Passthrough,
    /// Produce a video-only output.
    Mute,
}

/// Parameters of one capture session.
#[derive(Debug, Clone)]
pub struct CaptureConfig {
    /// Output frames per second.
    pub frame_rate: u32,
    /// Transform applied to every frame before encoding.
    pub transform: Option<TransformSpec>,
    /// Playback position recording starts from.
    pub start: Duration,
    /// Stop after this many output frames, regardless of the source.
    pub frame_budget: Option<u64>,
    /// Audio routing.
    pub audio: AudioRoute,
    /// Encoder selection and bit rates.
    pub encoder: EncoderOptions,
}

impl CaptureConfig {
    /// A session at `frame_rate` with no transform, starting at zero, with
    /// audio passthrough and default encoder options.
    pub fn new(frame_rate: u32) -> Self {
        Self {
            frame_rate,
            transform: None,
            start: Duration::ZERO,
            frame_budget: None,
            audio: AudioRoute::Passthrough,
            encoder: EncoderOptions::default(),
        }
    }

    /// Frames needed for `duration` at `frame_rate`: `round(frame_rate * duration)`.
    pub fn budget_for(frame_rate: u32, duration: Duration) -> u64 {
        (frame_rate as f64 * duration.as_secs_f64()).round() as u64
    }

    /// Apply `transform` to every frame.
    #[must_use]
    pub fn with_transform(mut self, transform: TransformSpec) -> Self {
        self.transform = Some(transform);
        self
    }

    /// Start recording at `start`.
    #[must_use]
    pub fn with_start(mut self, start: Duration) -> Self {
        self.start = start;
        self
    }

    /// Stop after `frames` output frames.
    #[must_use]
    pub fn with_frame_budget(mut self, frames: u64) -> Self {
        self.frame_budget = Some(frames);
        self
    }

    /// Set the audio route.
    #[must_use]
    pub fn with_audio(mut self, route: AudioRoute) -> Self {
        self.audio = route;
        self
    }

    /// Set encoder options.
    #[must_use]
    pub fn with_encoder(mut self, encoder: EncoderOptions) -> Self {
        self.encoder = encoder;
        self
    }
}

/// The single output of a successful capture session.
#[derive(Debug, Clone)]
pub struct Artifact {
    /// Encoded container bytes.
    pub bytes: Vec<u8>,
    /// MIME type of the container.
    pub mime_type: &'static str,
    /// Output width in pixels.
    pub width: u32,
    /// Output height in pixels.
    pub height: u32,
    /// Output frames per second.
    pub frame_rate: u32,
    /// Video frames written.
    pub frame_count: u64,
    /// Whether an audio track was carried into the output.
    pub has_audio: bool,
}

impl Artifact {
    /// Length of the video track.
    pub fn duration(&self) -> Duration {
        if self.frame_rate == 0 {
            Duration::ZERO
        } else {
            Duration::from_secs_f64(self.frame_count as f64 / self.frame_rate as f64)
        }
    }

    /// Size change relative to an input of `original_len` bytes, as a
    /// percentage. Positive when the artifact is smaller.
    pub fn size_reduction_percent(&self, original_len: u64) -> f64 {
        if original_len == 0 {
            return 0.0;
        }
        (1.0 - self.bytes.len() as f64 / original_len as f64) * 100.0
    }

    /// Write the artifact bytes to `path`.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<(), PipelineError> {
        fs::write(path.as_ref(), &self.bytes)?;
        log::info!("Saved {} bytes to {:?}", self.bytes.len(), path.as_ref());
        Ok(())
    }
}

/// Stateful unit driving continuous frame production into an encoder.
///
/// A session is used once. [`record`](CaptureSession::record) drives the
/// whole lifecycle from a [`FrameSource`]; the step methods
/// ([`start`](CaptureSession::start), [`push_frame`](CaptureSession::push_frame),
/// [`finish`](CaptureSession::finish), [`cancel`](CaptureSession::cancel))
/// expose the same machine for hosts that produce frames themselves.
pub struct CaptureSession<S: EncoderSink> {
    sink: S,
    config: CaptureConfig,
    state: SessionState,
    chunks: Vec<Vec<u8>>,
    output_size: (u32, u32),
    has_audio: bool,
    audio_origin: Option<i64>,
    origin: Option<Duration>,
    frames_pushed: u64,
}

impl<S: EncoderSink> CaptureSession<S> {
    /// Create an idle session writing into `sink`.
    pub fn new(sink: S, config: CaptureConfig) -> Self {
        Self {
            sink,
            config,
            state: SessionState::Idle,
            chunks: Vec::new(),
            output_size: (0, 0),
            has_audio: false,
            audio_origin: None,
            origin: None,
            frames_pushed: 0,
        }
    }

    /// Current lifecycle state.
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Output frames written so far.
    pub fn frames_pushed(&self) -> u64 {
        self.frames_pushed
    }

    /// Session configuration.
    pub fn config(&self) -> &CaptureConfig {
        &self.config
    }

    /// Open the encoder for rasters captured at `capture_size` and attach
    /// the audio route. Moves `Idle → Started`.
    ///
    /// `audio` is the source's tappable audio track; it is ignored when the
    /// route is [`AudioRoute::Mute`].
    pub fn start(
        &mut self,
        capture_size: (u32, u32),
        audio: Option<&AudioTrack>,
    ) -> Result<(), PipelineError> {
        self.expect_state(SessionState::Idle, "start")?;

        if self.config.frame_rate == 0 {
            return Err(PipelineError::Validation("frame rate must be at least 1".to_string()));
        }
        if self.config.frame_budget == Some(0) {
            return Err(PipelineError::Validation("frame budget must be at least 1".to_string()));
        }

        let (width, height) = match &self.config.transform {
            Some(transform) => transform.output_size(capture_size.0, capture_size.1)?,
            None => capture_size,
        };
        let audio = match self.config.audio {
            AudioRoute::Passthrough => audio.cloned(),
            AudioRoute::Mute => None,
        };

        let encoder_config = EncoderConfig {
            width,
            height,
            frame_rate: self.config.frame_rate,
            codec: self.config.encoder.codec,
            container: self.config.encoder.container,
            video_bitrate: self.config.encoder.video_bitrate,
            audio_bitrate: self.config.encoder.audio_bitrate,
            audio,
        };

        if let Err(error) = self.sink.open(&encoder_config) {
            self.fail();
            return Err(error);
        }

        log::info!(
            "Capture session started: {}x{} @ {} fps (audio={}, budget={:?})",
            width,
            height,
            self.config.frame_rate,
            encoder_config.audio.is_some(),
            self.config.frame_budget,
        );

        self.output_size = (width, height);
        self.has_audio = encoder_config.audio.is_some();
        self.audio_origin = encoder_config.audio.as_ref().map(|track| {
            let (numerator, denominator) = track.time_base;
            if numerator <= 0 {
                0
            } else {
                (self.config.start.as_secs_f64() * denominator as f64 / numerator as f64).round()
                    as i64
            }
        });
        self.state = SessionState::Started;
        Ok(())
    }

    /// Begin accepting frames. Moves `Started → Recording`.
    pub fn begin(&mut self) -> Result<(), PipelineError> {
        self.expect_state(SessionState::Started, "begin recording")?;
        self.state = SessionState::Recording;
        Ok(())
    }

    /// Push one displayed source frame and the audio tapped alongside it.
    ///
    /// The transform runs once per source frame, and the result is encoded
    /// once for every output tick due by the frame's time. Returns
    /// [`ControlFlow::Break`] once the frame budget has been reached, after
    /// which the session is `Stopping`.
    ///
    /// # Errors
    ///
    /// [`PipelineError::InvalidState`] outside `Recording`. Encoder and
    /// transform errors move the session to `Failed`.
    pub fn push_frame(
        &mut self,
        sample: &Sample,
        audio: &[AudioPacket],
    ) -> Result<ControlFlow<()>, PipelineError> {
        self.expect_state(SessionState::Recording, "push a frame")?;

        match self.encode_frame(sample, audio) {
            Ok(flow) => Ok(flow),
            Err(error) => {
                self.fail();
                Err(error)
            }
        }
    }

    /// Finalize the encoder and produce the artifact. Moves
    /// `Recording | Stopping → Stopped`.
    pub fn finish(&mut self) -> Result<Artifact, PipelineError> {
        match self.state {
            SessionState::Recording => {
                self.state = SessionState::Stopping(StopReason::SourceEnded);
            }
            SessionState::Stopping(StopReason::SourceEnded | StopReason::FrameBudget) => {}
            _ => {
                return Err(PipelineError::InvalidState {
                    operation: "finish",
                    state: self.state.to_string(),
                });
            }
        }

        if self.frames_pushed == 0 {
            self.fail();
            return Err(PipelineError::Encode("no frames were recorded".to_string()));
        }

        let tail = match self.sink.finish() {
            Ok(tail) => tail,
            Err(error) => {
                self.fail();
                return Err(error);
            }
        };
        self.collect_chunks();
        if !tail.is_empty() {
            self.chunks.push(tail);
        }

        let bytes = std::mem::take(&mut self.chunks).concat();
        self.state = SessionState::Stopped;

        let artifact = Artifact {
            bytes,
            mime_type: self.config.encoder.container.mime_type(),
            width: self.output_size.0,
            height: self.output_size.1,
            frame_rate: self.config.frame_rate,
            frame_count: self.frames_pushed,
            has_audio: self.has_audio,
        };
        log::info!(
            "Capture session stopped: {} frames, {} bytes",
            artifact.frame_count,
            artifact.bytes.len()
        );
        Ok(artifact)
    }

    /// Cancel the session, releasing the encoder and discarding every
    /// buffered chunk. Moves any non-terminal state through
    /// `Stopping(Cancelled)` to `Cancelled`.
    pub fn cancel(&mut self) {
        if self.state.is_terminal() {
            return;
        }
        self.state = SessionState::Stopping(StopReason::Cancelled);
        self.sink.abort();
        self.chunks.clear();
        self.state = SessionState::Cancelled;
        log::info!("Capture session cancelled after {} frames", self.frames_pushed);
    }

    /// Drive the whole lifecycle from `source`.
    ///
    /// Plays the source from the configured start, pushes every displayed
    /// frame, and finalizes when the source ends or the budget is reached.
    /// Cancellation is checked before every frame.
    ///
    /// # Errors
    ///
    /// [`PipelineError::Cancelled`] if the token fires; otherwise the first
    /// source or encoder error. No artifact is produced on any error.
    pub fn record<B: MediaBackend>(
        self,
        source: &mut FrameSource<B>,
        options: &PipelineOptions,
    ) -> Result<Artifact, PipelineError> {
        let reporter = options.reporter();
        let result = self.record_with(source, options, &reporter, (0.0, 100.0));
        reporter.settle();
        result
    }

    pub(crate) fn record_with<B: MediaBackend>(
        mut self,
        source: &mut FrameSource<B>,
        options: &PipelineOptions,
        reporter: &ProgressReporter,
        (from, to): (f32, f32),
    ) -> Result<Artifact, PipelineError> {
        if options.is_cancelled() {
            self.cancel();
            return Err(PipelineError::Cancelled);
        }

        let audio = source.info().audio.clone();
        self.start(source.capture_size(), audio.as_ref())?;
        self.begin()?;

        reporter.stage(OperationType::Recording, from, to, "Recording");
        let budget = self.config.frame_budget;
        let start = self.config.start;
        let span_ms = source.duration().saturating_sub(start).as_millis().max(1) as u64;

        let outcome = source.sample_continuous(start, |sample, audio| {
            if options.is_cancelled() {
                return Err(PipelineError::Cancelled);
            }
            let timestamp = sample.timestamp;
            let flow = self.push_frame(&sample, audio)?;
            match budget {
                Some(budget) => reporter.advance(self.frames_pushed, budget, "Recording"),
                None => {
                    let elapsed = timestamp.saturating_sub(start).as_millis() as u64;
                    reporter.advance(elapsed.min(span_ms), span_ms, "Recording");
                }
            }
            Ok(flow)
        });

        match outcome {
            Ok(()) if !options.is_cancelled() => {}
            Err(error) if !error.is_cancelled() && !options.is_cancelled() => {
                self.fail();
                return Err(error);
            }
            _ => {
                self.cancel();
                return Err(PipelineError::Cancelled);
            }
        }

        reporter.stage(OperationType::Finalizing, to, to, "Finalizing");
        self.finish()
    }

    fn encode_frame(
        &mut self,
        sample: &Sample,
        audio: &[AudioPacket],
    ) -> Result<ControlFlow<()>, PipelineError> {
        let origin = *self.origin.get_or_insert(sample.timestamp);
        let elapsed = sample.timestamp.saturating_sub(origin).as_secs_f64();
        let frame_rate = self.config.frame_rate as f64;

        if self.has_audio {
            for packet in audio {
                self.write_audio(packet)?;
            }
        }

        let due = |tick: u64| tick as f64 / frame_rate <= elapsed + 1e-6;
        if !due(self.frames_pushed) {
            self.collect_chunks();
            return Ok(ControlFlow::Continue(()));
        }

        let raster = self.prepare(sample)?;
        while due(self.frames_pushed) {
            if self.budget_reached() {
                break;
            }
            self.sink.write_video(&raster, self.frames_pushed as i64)?;
            self.frames_pushed += 1;
        }
        self.collect_chunks();

        if self.budget_reached() {
            log::debug!("Frame budget of {} reached", self.frames_pushed);
            self.state = SessionState::Stopping(StopReason::FrameBudget);
            return Ok(ControlFlow::Break(()));
        }
        Ok(ControlFlow::Continue(()))
    }

    fn prepare(&self, sample: &Sample) -> Result<RgbaImage, PipelineError> {
        let raster = match &self.config.transform {
            Some(transform) => {
                let context = FrameContext {
                    timestamp: sample.timestamp,
                    frame_index: self.frames_pushed,
                    frame_budget: self.config.frame_budget,
                };
                transform.apply(&sample.raster, &context)?
            }
            None => sample.raster.clone(),
        };

        if raster.dimensions() != self.output_size {
            return Err(PipelineError::Encode(format!(
                "frame is {}x{} but the encoder was opened for {}x{}",
                raster.width(),
                raster.height(),
                self.output_size.0,
                self.output_size.1
            )));
        }
        Ok(raster)
    }

    fn write_audio(&mut self, packet: &AudioPacket) -> Result<(), PipelineError> {
        let origin = self.audio_origin.unwrap_or(0);
        let Some(pts) = packet.pts.or(packet.dts) else {
            return self.sink.write_audio(packet);
        };
        if pts < origin {
            log::trace!("Dropping audio packet at pts {pts} before origin {origin}");
            return Ok(());
        }
        let rebased = AudioPacket {
            pts: packet.pts.map(|value| value - origin),
            dts: packet.dts.map(|value| value - origin),
            ..packet.clone()
        };
        self.sink.write_audio(&rebased)
    }

    fn budget_reached(&self) -> bool {
        self.config
            .frame_budget
            .is_some_and(|budget| self.frames_pushed >= budget)
    }

    fn collect_chunks(&mut self) {
        self.chunks.extend(self.sink.take_chunks());
    }

    fn fail(&mut self) {
        if self.state.is_terminal() {
            return;
        }
        self.sink.abort();
        self.chunks.clear();
        self.state = SessionState::Failed;
        log::warn!("Capture session failed after {} frames", self.frames_pushed);
    }

    fn expect_state(
        &self,
        expected: SessionState,
        operation: &'static str,
    ) -> Result<(), PipelineError> {
        if self.state == expected {
            Ok(())
        } else {
            Err(PipelineError::InvalidState {
                operation,
                state: self.state.to_string(),
            })
        }
    }
}
