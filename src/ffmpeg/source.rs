//! [`FfmpegSource`]: decode, seek and paced playback of a media file.

use std::path::{Path, PathBuf};
use std::thread;
use std::time::{Duration, Instant};

use ffmpeg_next::codec::context::Context as CodecContext;
use ffmpeg_next::format::Pixel;
use ffmpeg_next::format::context::Input;
use ffmpeg_next::frame::Video as VideoFrame;
use ffmpeg_next::media::Type;
use ffmpeg_next::software::scaling::{Context as ScalingContext, Flags as ScalingFlags};
use ffmpeg_next::{Error as FfmpegError, Packet, Rational};
use image::RgbaImage;

use super::conversion::{frame_to_buffer, pts_to_duration, pts_to_seconds, seek_timestamp};
use crate::error::PipelineError;
use crate::media::{AudioPacket, AudioTrack, DecodedFrame, MediaBackend, PlaybackFrame, SourceInfo};

/// Frames up to this far before a requested time still count as "at" it.
const TIMESTAMP_TOLERANCE: f64 = 0.001;

/// A media file decoded through FFmpeg.
///
/// Playback is paced against the wall clock by default, so a session
/// records in real time. [`set_realtime(false)`](FfmpegSource::set_realtime)
/// delivers frames as fast as they decode.
pub struct FfmpegSource {
    path: PathBuf,
    input: Input,
    decoder: ffmpeg_next::decoder::Video,
    scaler: Option<Scaler>,
    video_index: usize,
    video_time_base: Rational,
    video_origin: f64,
    audio_index: Option<usize>,
    audio_origin: i64,
    info: SourceInfo,
    realtime: bool,
    draining: bool,
    playback: Option<Playback>,
    pending_audio: Vec<AudioPacket>,
}

struct Scaler {
    context: ScalingContext,
    format: Pixel,
    width: u32,
    height: u32,
}

struct Playback {
    from: Duration,
    started: Instant,
}

impl FfmpegSource {
    /// Open `path` and locate its best video and audio streams.
    ///
    /// # Errors
    ///
    /// [`PipelineError::Source`] if the file cannot be opened, has no video
    /// stream, or its video codec cannot be decoded.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, PipelineError> {
        let path = path.as_ref().to_path_buf();
        log::debug!("Opening media file: {}", path.display());
        super::init()?;

        let input = ffmpeg_next::format::input(&path).map_err(|error| {
            PipelineError::source_error(format!("cannot open {}: {error}", path.display()))
        })?;

        let video = input
            .streams()
            .best(Type::Video)
            .ok_or_else(|| PipelineError::source_error(format!("{} has no video stream", path.display())))?;
        let video_index = video.index();
        let video_time_base = video.time_base();
        let video_origin = stream_origin(video.start_time(), video_time_base);

        let decoder = CodecContext::from_parameters(video.parameters())?
            .decoder()
            .video()
            .map_err(|error| PipelineError::source_error(format!("cannot decode video: {error}")))?;

        let rate = video.avg_frame_rate();
        let frame_rate = (rate.numerator() > 0 && rate.denominator() > 0)
            .then(|| rate.numerator() as f64 / rate.denominator() as f64);

        let duration_us = input.duration();
        let duration = if duration_us > 0 {
            Duration::from_micros(duration_us as u64)
        } else if video.duration() > 0 {
            Duration::from_secs_f64(pts_to_seconds(video.duration(), video_time_base))
        } else {
            Duration::ZERO
        };

        let (audio_index, audio, audio_origin) = match input.streams().best(Type::Audio) {
            Some(stream) => {
                let track = audio_track(&stream);
                let origin = if stream.start_time() == ffmpeg_sys_next::AV_NOPTS_VALUE {
                    0
                } else {
                    stream.start_time()
                };
                (Some(stream.index()), Some(track), origin)
            }
            None => (None, None, 0),
        };

        let info = SourceInfo {
            width: decoder.width(),
            height: decoder.height(),
            duration,
            frame_rate,
            audio,
        };
        log::debug!(
            "Probed {}: {}x{}, {:?}, {:?} fps, audio={:?}",
            path.display(),
            info.width,
            info.height,
            info.duration,
            info.frame_rate,
            info.audio.as_ref().map(|track| track.codec_name.as_str()),
        );

        Ok(Self {
            path,
            input,
            decoder,
            scaler: None,
            video_index,
            video_time_base,
            video_origin,
            audio_index,
            audio_origin,
            info,
            realtime: true,
            draining: false,
            playback: None,
            pending_audio: Vec::new(),
        })
    }

    /// Path the source was opened from.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Pace playback against the wall clock (the default) or not.
    pub fn set_realtime(&mut self, realtime: bool) {
        self.realtime = realtime;
    }

    fn reposition(&mut self, position: Duration) -> Result<(), PipelineError> {
        let target = seek_timestamp(position, self.video_origin);
        self.input.seek(target, ..target)?;
        self.decoder.flush();
        self.draining = false;
        self.pending_audio.clear();
        Ok(())
    }

    /// Decode the next video frame, tapping audio packets on the way while
    /// playing. `None` once the stream is exhausted.
    fn decode_next(&mut self, frame: &mut VideoFrame) -> Result<Option<Duration>, PipelineError> {
        loop {
            if self.decoder.receive_frame(frame).is_ok() {
                let pts = frame.timestamp().or(frame.pts()).unwrap_or(0);
                return Ok(Some(pts_to_duration(pts, self.video_time_base, self.video_origin)));
            }
            if self.draining {
                return Ok(None);
            }

            let mut packet = Packet::empty();
            match packet.read(&mut self.input) {
                Ok(()) => {}
                Err(FfmpegError::Eof) => {
                    self.decoder.send_eof()?;
                    self.draining = true;
                    continue;
                }
                Err(error) => return Err(error.into()),
            }

            if packet.stream() == self.video_index {
                self.decoder.send_packet(&packet)?;
            } else if Some(packet.stream()) == self.audio_index && self.playback.is_some() {
                self.pending_audio.push(AudioPacket {
                    pts: packet.pts().map(|pts| pts - self.audio_origin),
                    dts: packet.dts().map(|dts| dts - self.audio_origin),
                    duration: packet.duration(),
                    data: packet.data().map(<[u8]>::to_vec).unwrap_or_default(),
                    keyframe: packet.is_key(),
                });
            }
        }
    }

    fn to_rgba(&mut self, frame: &VideoFrame) -> Result<RgbaImage, PipelineError> {
        let (format, width, height) = (frame.format(), frame.width(), frame.height());
        let stale = self
            .scaler
            .as_ref()
            .is_none_or(|scaler| (scaler.format, scaler.width, scaler.height) != (format, width, height));
        if stale {
            let context = ScalingContext::get(format, width, height, Pixel::RGBA, width, height, ScalingFlags::BILINEAR)?;
            self.scaler = Some(Scaler {
                context,
                format,
                width,
                height,
            });
        }

        let mut rgba = VideoFrame::empty();
        if let Some(scaler) = self.scaler.as_mut() {
            scaler.context.run(frame, &mut rgba)?;
        }
        RgbaImage::from_raw(width, height, frame_to_buffer(&rgba, width, height, 4))
            .ok_or_else(|| PipelineError::source_error("decoded frame has an unexpected size"))
    }
}

impl MediaBackend for FfmpegSource {
    fn probe(&mut self) -> Result<SourceInfo, PipelineError> {
        Ok(self.info.clone())
    }

    fn seek(&mut self, timestamp: Duration, budget: Duration) -> Result<Option<DecodedFrame>, PipelineError> {
        let deadline = Instant::now() + budget;
        self.playback = None;
        self.reposition(timestamp)?;

        let target = timestamp.as_secs_f64() - TIMESTAMP_TOLERANCE;
        let mut frame = VideoFrame::empty();
        // Newest picture below the target. A failed receive unrefs `frame`.
        let mut previous = VideoFrame::empty();
        let mut last = None;
        loop {
            match self.decode_next(&mut frame)? {
                Some(time) if time.as_secs_f64() >= target => {
                    let image = self.to_rgba(&frame)?;
                    return Ok(Some(DecodedFrame { timestamp: time, image }));
                }
                Some(time) => {
                    std::mem::swap(&mut frame, &mut previous);
                    last = Some(time);
                }
                None => break,
            }
            if Instant::now() > deadline {
                log::debug!("Seek to {timestamp:?} exceeded {budget:?}");
                return Ok(None);
            }
        }

        // Past the last frame: deliver the final decoded picture.
        match last {
            Some(time) => {
                let image = self.to_rgba(&previous)?;
                Ok(Some(DecodedFrame { timestamp: time, image }))
            }
            None => Ok(None),
        }
    }

    fn play(&mut self, from: Duration) -> Result<(), PipelineError> {
        self.reposition(from)?;
        self.playback = Some(Playback {
            from,
            started: Instant::now(),
        });
        Ok(())
    }

    fn next_frame(&mut self) -> Result<Option<PlaybackFrame>, PipelineError> {
        let Some(from) = self.playback.as_ref().map(|playback| playback.from) else {
            return Err(PipelineError::source_error("playback has not been started"));
        };

        let mut frame = VideoFrame::empty();
        let timestamp = loop {
            match self.decode_next(&mut frame)? {
                Some(time) if time.as_secs_f64() >= from.as_secs_f64() - TIMESTAMP_TOLERANCE => break time,
                Some(_) => continue,
                None => return Ok(None),
            }
        };

        if self.realtime
            && let Some(playback) = &self.playback
        {
            let due = playback.started + timestamp.saturating_sub(from);
            let now = Instant::now();
            if due > now {
                thread::sleep(due - now);
            }
        }

        let image = self.to_rgba(&frame)?;
        Ok(Some(PlaybackFrame {
            frame: DecodedFrame { timestamp, image },
            audio: std::mem::take(&mut self.pending_audio),
        }))
    }

    fn stop(&mut self) {
        self.playback = None;
        self.pending_audio.clear();
    }
}

fn stream_origin(start_time: i64, time_base: Rational) -> f64 {
    if start_time == ffmpeg_sys_next::AV_NOPTS_VALUE {
        0.0
    } else {
        pts_to_seconds(start_time, time_base)
    }
}

fn audio_track(stream: &ffmpeg_next::format::stream::Stream) -> AudioTrack {
    let time_base = stream.time_base();
    let parameters = stream.parameters();
    // SAFETY: the parameters belong to the stream, which outlives this call.
    let raw = unsafe { &*parameters.as_ptr() };
    let extradata = if raw.extradata.is_null() || raw.extradata_size <= 0 {
        Vec::new()
    } else {
        // SAFETY: FFmpeg guarantees `extradata_size` readable bytes.
        unsafe { std::slice::from_raw_parts(raw.extradata, raw.extradata_size as usize).to_vec() }
    };

    AudioTrack {
        codec_name: ffmpeg_next::codec::Id::from(raw.codec_id).name().to_string(),
        sample_rate: raw.sample_rate.max(0) as u32,
        channels: raw.ch_layout.nb_channels.max(0) as u16,
        time_base: (time_base.numerator(), time_base.denominator()),
        extradata,
    }
}
