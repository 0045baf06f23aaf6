//! In-process host implementations.
//!
//! [`SyntheticSource`] generates frames from a closure and can simulate an
//! audio track, stalled seeks and decode failures. [`MemorySink`] writes a
//! trivial length-prefixed container ([`RawContainer`]) and can simulate
//! encoder failures and a host that rejects large configurations.
//!
//! Both are deterministic and never sleep: "real-time" playback delivers
//! frames back to back with their presentation timestamps. They back the
//! crate's tests and are useful for exercising a pipeline without FFmpeg.
//!
//! # Example
//!
//! ```
//! use std::time::Duration;
//!
//! use clipsmith::synthetic::{MemorySink, RawContainer, SyntheticSource};
//! use clipsmith::{Job, Outcome, PipelineOptions, Pipeline};
//!
//! let backend = SyntheticSource::solid(64, 36, 30.0, Duration::from_secs(2), [200, 40, 40])
//!     .with_audio(48_000, 2);
//! let outcome = Pipeline::new(backend, MemorySink::new())
//!     .run(&Job::Compress { scale: 0.5 }, &PipelineOptions::new())?;
//!
//! let Outcome::Artifact(artifact) = outcome else { unreachable!() };
//! let container = RawContainer::parse(&artifact.bytes)?;
//! assert_eq!((container.width, container.height), (32, 18));
//! assert!(!container.audio.is_empty());
//! # Ok::<(), clipsmith::PipelineError>(())
//! ```

use std::sync::{Arc, Mutex};
use std::time::Duration;

use image::{Rgba, RgbaImage};

use crate::error::PipelineError;
use crate::media::{
    AudioPacket, AudioTrack, DecodedFrame, EncoderConfig, EncoderSink, MediaBackend,
    PlaybackFrame, SourceInfo,
};

type Generator = Box<dyn Fn(Duration) -> RgbaImage + Send>;

/// A [`MediaBackend`] whose frames come from a closure of the timestamp.
///
/// Frame `i` is presented at `i / fps`; the source holds every frame whose
/// timestamp is below its duration.
pub struct SyntheticSource {
    width: u32,
    height: u32,
    fps: f64,
    duration: Duration,
    generator: Generator,
    audio: Option<AudioTrack>,
    undecodable: bool,
    stall_from: Option<Duration>,
    fail_from: Option<Duration>,
    next_index: Option<u64>,
    seeks: Arc<Mutex<Vec<Duration>>>,
}

impl SyntheticSource {
    /// A source of `width` x `height` frames at `fps` for `duration`, drawn
    /// by `generator` from each frame's timestamp.
    pub fn new<F>(width: u32, height: u32, fps: f64, duration: Duration, generator: F) -> Self
    where
        F: Fn(Duration) -> RgbaImage + Send + 'static,
    {
        Self {
            width,
            height,
            fps,
            duration,
            generator: Box::new(generator),
            audio: None,
            undecodable: false,
            stall_from: None,
            fail_from: None,
            next_index: None,
            seeks: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// A source whose every frame is one opaque color.
    pub fn solid(width: u32, height: u32, fps: f64, duration: Duration, rgb: [u8; 3]) -> Self {
        Self::new(width, height, fps, duration, move |_| {
            RgbaImage::from_pixel(width, height, Rgba([rgb[0], rgb[1], rgb[2], 255]))
        })
    }

    /// Attach a PCM audio track; one packet is tapped with every frame.
    #[must_use]
    pub fn with_audio(mut self, sample_rate: u32, channels: u16) -> Self {
        self.audio = Some(AudioTrack {
            codec_name: "pcm_s16le".to_string(),
            sample_rate,
            channels,
            time_base: (1, sample_rate as i32),
            extradata: Vec::new(),
        });
        self
    }

    /// Make every seek at or after `time` deliver no frame.
    #[must_use]
    pub fn with_seek_stall_from(mut self, time: Duration) -> Self {
        self.stall_from = Some(time);
        self
    }

    /// Make decoding fail for every frame at or after `time`.
    #[must_use]
    pub fn with_decode_failure_from(mut self, time: Duration) -> Self {
        self.fail_from = Some(time);
        self
    }

    /// Make probing fail, as for a corrupt resource.
    #[must_use]
    pub fn undecodable(mut self) -> Self {
        self.undecodable = true;
        self
    }

    /// Shared log of every seek target, in order.
    pub fn seek_log(&self) -> Arc<Mutex<Vec<Duration>>> {
        self.seeks.clone()
    }

    fn frame_count(&self) -> u64 {
        (self.duration.as_secs_f64() * self.fps - 1e-9).ceil().max(0.0) as u64
    }

    fn index_at(&self, time: Duration) -> u64 {
        (time.as_secs_f64() * self.fps - 1e-9).ceil().max(0.0) as u64
    }

    fn timestamp_of(&self, index: u64) -> Duration {
        Duration::from_secs_f64(index as f64 / self.fps)
    }

    fn decode(&self, index: u64) -> Result<DecodedFrame, PipelineError> {
        let timestamp = self.timestamp_of(index);
        if self.fail_from.is_some_and(|from| timestamp >= from) {
            return Err(PipelineError::source_error(format!(
                "synthetic decode failure at {timestamp:?}"
            )));
        }
        Ok(DecodedFrame {
            timestamp,
            image: (self.generator)(timestamp),
        })
    }

    fn audio_for(&self, index: u64) -> Vec<AudioPacket> {
        let Some(track) = &self.audio else {
            return Vec::new();
        };
        let start = (index as f64 / self.fps * track.sample_rate as f64).round() as i64;
        let end = ((index + 1) as f64 / self.fps * track.sample_rate as f64).round() as i64;
        let samples = (end - start).max(0);
        vec![AudioPacket {
            pts: Some(start),
            dts: Some(start),
            duration: samples,
            data: vec![0; samples as usize * track.channels as usize * 2],
            keyframe: true,
        }]
    }
}

impl MediaBackend for SyntheticSource {
    fn probe(&mut self) -> Result<SourceInfo, PipelineError> {
        if self.undecodable {
            return Err(PipelineError::source_error("synthetic source is undecodable"));
        }
        Ok(SourceInfo {
            width: self.width,
            height: self.height,
            duration: self.duration,
            frame_rate: Some(self.fps),
            audio: self.audio.clone(),
        })
    }

    fn seek(
        &mut self,
        timestamp: Duration,
        _budget: Duration,
    ) -> Result<Option<DecodedFrame>, PipelineError> {
        if let Ok(mut seeks) = self.seeks.lock() {
            seeks.push(timestamp);
        }
        if self.stall_from.is_some_and(|from| timestamp >= from) {
            return Ok(None);
        }
        let last = self.frame_count().saturating_sub(1);
        let index = self.index_at(timestamp).min(last);
        self.decode(index).map(Some)
    }

    fn play(&mut self, from: Duration) -> Result<(), PipelineError> {
        self.next_index = Some(self.index_at(from));
        Ok(())
    }

    fn next_frame(&mut self) -> Result<Option<PlaybackFrame>, PipelineError> {
        let Some(index) = self.next_index else {
            return Err(PipelineError::source_error("playback has not been started"));
        };
        if index >= self.frame_count() {
            return Ok(None);
        }
        let frame = self.decode(index)?;
        self.next_index = Some(index + 1);
        Ok(Some(PlaybackFrame {
            frame,
            audio: self.audio_for(index),
        }))
    }

    fn stop(&mut self) {
        self.next_index = None;
    }
}

const MAGIC: &[u8; 6] = b"CSRAW1";
const VIDEO_TAG: u8 = b'V';
const AUDIO_TAG: u8 = b'A';
const END_TAG: u8 = b'E';

/// What a [`MemorySink`] has been asked to do, shared with the test that
/// created it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SinkActivity {
    /// `open` succeeded.
    pub opened: bool,
    /// `finish` succeeded.
    pub finished: bool,
    /// `abort` was called.
    pub aborted: bool,
    /// Video frames accepted.
    pub video_frames: u64,
    /// Audio packets accepted.
    pub audio_packets: u64,
}

/// An [`EncoderSink`] that writes a length-prefixed raw container into
/// memory, one chunk per record.
#[derive(Default)]
pub struct MemorySink {
    config: Option<EncoderConfig>,
    pending: Vec<Vec<u8>>,
    pixel_budget: Option<u64>,
    fail_after: Option<u64>,
    activity: Arc<Mutex<SinkActivity>>,
}

impl MemorySink {
    /// A sink with no limits.
    pub fn new() -> Self {
        Self::default()
    }

    /// Reject configurations with more than `pixels` per frame as
    /// [`PipelineError::ResourceExhausted`].
    #[must_use]
    pub fn with_pixel_budget(mut self, pixels: u64) -> Self {
        self.pixel_budget = Some(pixels);
        self
    }

    /// Fail with [`PipelineError::Encode`] once `frames` video frames have
    /// been accepted.
    #[must_use]
    pub fn with_failure_after(mut self, frames: u64) -> Self {
        self.fail_after = Some(frames);
        self
    }

    /// Shared view of the sink's activity.
    pub fn activity(&self) -> Arc<Mutex<SinkActivity>> {
        self.activity.clone()
    }

    fn update(&self, change: impl FnOnce(&mut SinkActivity)) {
        if let Ok(mut activity) = self.activity.lock() {
            change(&mut activity);
        }
    }

    fn frames_accepted(&self) -> u64 {
        self.activity.lock().map(|activity| activity.video_frames).unwrap_or(0)
    }

    fn record(tag: u8, pts: i64, payload: &[u8]) -> Vec<u8> {
        let mut record = Vec::with_capacity(payload.len() + 13);
        record.push(tag);
        record.extend_from_slice(&pts.to_le_bytes());
        record.extend_from_slice(&(payload.len() as u32).to_le_bytes());
        record.extend_from_slice(payload);
        record
    }
}

impl EncoderSink for MemorySink {
    fn open(&mut self, config: &EncoderConfig) -> Result<(), PipelineError> {
        let pixels = config.width as u64 * config.height as u64;
        if let Some(budget) = self.pixel_budget
            && pixels > budget
        {
            return Err(PipelineError::ResourceExhausted(format!(
                "{}x{} exceeds the sink's budget of {budget} pixels",
                config.width, config.height
            )));
        }

        let mut header = MAGIC.to_vec();
        header.extend_from_slice(&config.width.to_le_bytes());
        header.extend_from_slice(&config.height.to_le_bytes());
        header.extend_from_slice(&config.frame_rate.to_le_bytes());
        header.push(config.audio.is_some() as u8);
        self.pending.push(header);
        self.config = Some(config.clone());
        self.update(|activity| activity.opened = true);
        Ok(())
    }

    fn write_video(&mut self, frame: &RgbaImage, pts: i64) -> Result<(), PipelineError> {
        let Some(config) = &self.config else {
            return Err(PipelineError::Encode("sink is not open".to_string()));
        };
        if frame.dimensions() != (config.width, config.height) {
            return Err(PipelineError::Encode(format!(
                "frame is {}x{}, sink expects {}x{}",
                frame.width(),
                frame.height(),
                config.width,
                config.height
            )));
        }
        if self.fail_after.is_some_and(|limit| self.frames_accepted() >= limit) {
            return Err(PipelineError::Encode("simulated encoder failure".to_string()));
        }
        self.pending.push(Self::record(VIDEO_TAG, pts, frame.as_raw()));
        self.update(|activity| activity.video_frames += 1);
        Ok(())
    }

    fn write_audio(&mut self, packet: &AudioPacket) -> Result<(), PipelineError> {
        let Some(config) = &self.config else {
            return Err(PipelineError::Encode("sink is not open".to_string()));
        };
        if config.audio.is_none() {
            return Err(PipelineError::Encode("sink was opened without audio".to_string()));
        }
        let pts = packet.pts.or(packet.dts).unwrap_or(0);
        self.pending.push(Self::record(AUDIO_TAG, pts, &packet.data));
        self.update(|activity| activity.audio_packets += 1);
        Ok(())
    }

    fn take_chunks(&mut self) -> Vec<Vec<u8>> {
        std::mem::take(&mut self.pending)
    }

    fn finish(&mut self) -> Result<Vec<u8>, PipelineError> {
        if self.config.take().is_none() {
            return Err(PipelineError::Encode("sink is not open".to_string()));
        }
        let mut tail: Vec<u8> = self.pending.drain(..).flatten().collect();
        tail.extend(Self::record(END_TAG, self.frames_accepted() as i64, &[]));
        self.update(|activity| activity.finished = true);
        Ok(tail)
    }

    fn abort(&mut self) {
        self.config = None;
        self.pending.clear();
        self.update(|activity| activity.aborted = true);
    }
}

/// A parsed [`MemorySink`] container.
#[derive(Debug, Clone)]
pub struct RawContainer {
    /// Frame width.
    pub width: u32,
    /// Frame height.
    pub height: u32,
    /// Frames per second.
    pub frame_rate: u32,
    /// Whether the container was opened with an audio track.
    pub has_audio: bool,
    /// Video frames with their presentation index.
    pub video: Vec<(i64, RgbaImage)>,
    /// Audio payloads with their rebased timestamps.
    pub audio: Vec<(i64, Vec<u8>)>,
}

impl RawContainer {
    /// Parse a complete container.
    ///
    /// # Errors
    ///
    /// [`PipelineError::Encode`] if the bytes are truncated, have no end
    /// record, or are not a raw container.
    pub fn parse(bytes: &[u8]) -> Result<Self, PipelineError> {
        let corrupt = |what: &str| PipelineError::Encode(format!("corrupt raw container: {what}"));

        let mut reader = Reader { bytes, position: 0 };
        if reader.take(MAGIC.len()).ok_or_else(|| corrupt("missing header"))? != MAGIC {
            return Err(corrupt("bad magic"));
        }
        let width = reader.u32().ok_or_else(|| corrupt("missing width"))?;
        let height = reader.u32().ok_or_else(|| corrupt("missing height"))?;
        let frame_rate = reader.u32().ok_or_else(|| corrupt("missing frame rate"))?;
        let has_audio = reader.take(1).ok_or_else(|| corrupt("missing audio flag"))?[0] == 1;

        let mut container = RawContainer {
            width,
            height,
            frame_rate,
            has_audio,
            video: Vec::new(),
            audio: Vec::new(),
        };

        loop {
            let tag = reader.take(1).ok_or_else(|| corrupt("missing end record"))?[0];
            let pts = reader.i64().ok_or_else(|| corrupt("truncated record"))?;
            let length = reader.u32().ok_or_else(|| corrupt("truncated record"))? as usize;
            let payload = reader.take(length).ok_or_else(|| corrupt("truncated payload"))?;
            match tag {
                VIDEO_TAG => {
                    let image = RgbaImage::from_raw(width, height, payload.to_vec())
                        .ok_or_else(|| corrupt("video payload size mismatch"))?;
                    container.video.push((pts, image));
                }
                AUDIO_TAG => container.audio.push((pts, payload.to_vec())),
                END_TAG => return Ok(container),
                _ => return Err(corrupt("unknown record tag")),
            }
        }
    }
}

struct Reader<'a> {
    bytes: &'a [u8],
    position: usize,
}

impl<'a> Reader<'a> {
    fn take(&mut self, length: usize) -> Option<&'a [u8]> {
        let end = self.position.checked_add(length)?;
        let slice = self.bytes.get(self.position..end)?;
        self.position = end;
        Some(slice)
    }

    fn u32(&mut self) -> Option<u32> {
        self.take(4)?.try_into().ok().map(u32::from_le_bytes)
    }

    fn i64(&mut self) -> Option<i64> {
        self.take(8)?.try_into().ok().map(i64::from_le_bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn seek_lands_on_next_frame_and_clamps() {
        let mut source = SyntheticSource::new(2, 2, 10.0, Duration::from_secs(1), |t| {
            RgbaImage::from_pixel(2, 2, Rgba([(t.as_millis() / 10) as u8, 0, 0, 255]))
        });
        let frame = source
            .seek(Duration::from_millis(250), Duration::from_millis(150))
            .unwrap()
            .unwrap();
        assert_eq!(frame.timestamp, Duration::from_millis(300));

        let frame = source
            .seek(Duration::from_secs(5), Duration::from_millis(150))
            .unwrap()
            .unwrap();
        assert_eq!(frame.timestamp, Duration::from_millis(900));
    }

    #[test]
    fn playback_delivers_every_frame_once() {
        let mut source = SyntheticSource::solid(2, 2, 30.0, Duration::from_secs(2), [1, 2, 3]);
        source.play(Duration::ZERO).unwrap();
        let mut count = 0;
        while source.next_frame().unwrap().is_some() {
            count += 1;
        }
        assert_eq!(count, 60);
    }

    #[test]
    fn memory_sink_round_trip() {
        let mut sink = MemorySink::new();
        let config = EncoderConfig {
            width: 2,
            height: 1,
            frame_rate: 30,
            codec: Default::default(),
            container: Default::default(),
            video_bitrate: None,
            audio_bitrate: None,
            audio: None,
        };
        sink.open(&config).unwrap();
        let frame = RgbaImage::from_pixel(2, 1, Rgba([5, 6, 7, 8]));
        sink.write_video(&frame, 0).unwrap();

        let mut bytes: Vec<u8> = sink.take_chunks().concat();
        bytes.extend(sink.finish().unwrap());

        let container = RawContainer::parse(&bytes).unwrap();
        assert_eq!(container.video.len(), 1);
        assert_eq!(container.video[0].1, frame);
        assert!(RawContainer::parse(&bytes[..bytes.len() - 1]).is_err());
    }

    #[test]
    fn pixel_budget_rejects_large_configurations() {
        let mut sink = MemorySink::new().with_pixel_budget(100);
        let config = EncoderConfig {
            width: 20,
            height: 20,
            frame_rate: 30,
            codec: Default::default(),
            container: Default::default(),
            video_bitrate: None,
            audio_bitrate: None,
            audio: None,
        };
        let error = sink.open(&config).unwrap_err();
        assert_eq!(error.kind(), crate::ErrorKind::ResourceExhausted);
    }
}
