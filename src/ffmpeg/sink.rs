//! [`FfmpegSink`]: encode rasters and mux them into memory.

use std::ffi::{CStr, CString};
use std::ptr;

use ffmpeg_next::codec::Id;
use ffmpeg_next::codec::context::Context as CodecContext;
use ffmpeg_next::format::Pixel;
use ffmpeg_next::frame::Video as VideoFrame;
use ffmpeg_next::software::scaling::{Context as ScalingContext, Flags as ScalingFlags};
use ffmpeg_next::{Dictionary, Packet, Rational};
use ffmpeg_sys_next::{AVFormatContext, AVRational};
use image::RgbaImage;

use super::conversion::buffer_to_frame;
use crate::configuration::{Container, VideoCodec};
use crate::error::PipelineError;
use crate::media::{AudioPacket, AudioTrack, EncoderConfig, EncoderSink};

const VIDEO_STREAM: usize = 0;
const AUDIO_STREAM: usize = 1;

/// An [`EncoderSink`] that encodes with FFmpeg into a growing memory buffer.
///
/// The container is written without seeking back, so every byte handed out
/// by [`take_chunks`](EncoderSink::take_chunks) is final. MP4 output is
/// fragmented for that reason.
#[derive(Default)]
pub struct FfmpegSink {
    muxer: Option<Muxer>,
}

impl FfmpegSink {
    /// A sink that is not yet open.
    pub fn new() -> Self {
        Self::default()
    }

    fn muxer(&mut self) -> Result<&mut Muxer, PipelineError> {
        self.muxer
            .as_mut()
            .ok_or_else(|| PipelineError::Encode("sink is not open".to_string()))
    }
}

impl EncoderSink for FfmpegSink {
    fn open(&mut self, config: &EncoderConfig) -> Result<(), PipelineError> {
        if self.muxer.is_some() {
            return Err(PipelineError::Encode("sink is already open".to_string()));
        }
        super::init()?;
        self.muxer = Some(Muxer::open(config)?);
        Ok(())
    }

    fn write_video(&mut self, frame: &RgbaImage, pts: i64) -> Result<(), PipelineError> {
        self.muxer()?.write_video(frame, pts)
    }

    fn write_audio(&mut self, packet: &AudioPacket) -> Result<(), PipelineError> {
        self.muxer()?.write_audio(packet)
    }

    fn take_chunks(&mut self) -> Vec<Vec<u8>> {
        match self.muxer.as_mut().map(Muxer::drain) {
            Some(chunk) if !chunk.is_empty() => vec![chunk],
            _ => Vec::new(),
        }
    }

    fn finish(&mut self) -> Result<Vec<u8>, PipelineError> {
        let mut muxer = self
            .muxer
            .take()
            .ok_or_else(|| PipelineError::Encode("sink is not open".to_string()))?;
        muxer.finish()
    }

    fn abort(&mut self) {
        // Dropping the muxer releases the encoder and the buffer.
        self.muxer = None;
    }
}

/// An output context backed by an FFmpeg dynamic buffer.
///
/// The raw FFmpeg sequence is:
///   1. avformat_alloc_output_context2 allocates the muxer
///   2. avio_open_dyn_buf attaches memory-backed I/O
///   3. streams are added, the header and packets written
///   4. avio_close_dyn_buf extracts the buffer
///   5. pb is nulled before the context is freed, so FFmpeg never closes
///      the already-released buffer
///
/// [`close`](DynamicOutput::close) performs 4 and 5; dropping an unclosed
/// output does the same and discards the bytes.
struct DynamicOutput {
    context: *mut AVFormatContext,
}

impl DynamicOutput {
    fn alloc(container: Container) -> Result<Self, PipelineError> {
        let muxer_name = CString::new(container.muxer_name())
            .map_err(|error| PipelineError::Encode(format!("invalid muxer name: {error}")))?;

        let mut context: *mut AVFormatContext = ptr::null_mut();
        // SAFETY: all pointers passed are valid or null as the API permits.
        unsafe {
            let result = ffmpeg_sys_next::avformat_alloc_output_context2(
                &mut context,
                ptr::null_mut(),
                muxer_name.as_ptr(),
                ptr::null(),
            );
            if result < 0 || context.is_null() {
                return Err(PipelineError::ResourceExhausted(format!(
                    "{} muxer is not available",
                    container.muxer_name()
                )));
            }
            if ffmpeg_sys_next::avio_open_dyn_buf(&mut (*context).pb) < 0 {
                ffmpeg_sys_next::avformat_free_context(context);
                return Err(PipelineError::Encode("cannot open dynamic buffer".to_string()));
            }
        }
        Ok(Self { context })
    }

    fn needs_global_header(&self) -> bool {
        // SAFETY: the context is allocated and its output format is set.
        unsafe { ((*(*self.context).oformat).flags & ffmpeg_sys_next::AVFMT_GLOBALHEADER as i32) != 0 }
    }

    /// Time base the muxer settled on for `stream`.
    fn time_base(&self, stream: usize) -> Rational {
        // SAFETY: callers only pass indices of streams they created.
        unsafe {
            let raw = (*(*(*self.context).streams.add(stream))).time_base;
            Rational::new(raw.num, raw.den)
        }
    }

    /// Close the buffer and free the context, returning every byte written.
    fn close(&mut self) -> Vec<u8> {
        if self.context.is_null() {
            return Vec::new();
        }
        // SAFETY: the context is valid and its pb is the open dynamic buffer;
        // the context is nulled so it is never touched again.
        unsafe {
            let mut buffer: *mut u8 = ptr::null_mut();
            let size = ffmpeg_sys_next::avio_close_dyn_buf((*self.context).pb, &mut buffer);
            let bytes = if size > 0 && !buffer.is_null() {
                std::slice::from_raw_parts(buffer, size as usize).to_vec()
            } else {
                Vec::new()
            };
            if !buffer.is_null() {
                ffmpeg_sys_next::av_free(buffer as *mut _);
            }
            (*self.context).pb = ptr::null_mut();
            ffmpeg_sys_next::avformat_free_context(self.context);
            self.context = ptr::null_mut();
            bytes
        }
    }
}

impl Drop for DynamicOutput {
    fn drop(&mut self) {
        self.close();
    }
}

/// An open encoder writing into a [`DynamicOutput`].
struct Muxer {
    output: DynamicOutput,
    encoder: ffmpeg_next::encoder::video::Encoder,
    scaler: ScalingContext,
    encoder_time_base: Rational,
    audio_time_base: Option<Rational>,
    width: u32,
    height: u32,
    taken: usize,
}

impl Muxer {
    fn open(config: &EncoderConfig) -> Result<Self, PipelineError> {
        let codec = ffmpeg_next::encoder::find(codec_id(config.codec)).ok_or_else(|| {
            PipelineError::ResourceExhausted(format!("no {} encoder in this FFmpeg build", config.codec.name()))
        })?;
        let output = DynamicOutput::alloc(config.container)?;

        let encoder_time_base = Rational::new(1, config.frame_rate as i32);
        let mut encoder = CodecContext::new_with_codec(codec)
            .encoder()
            .video()
            .map_err(|error| PipelineError::ResourceExhausted(format!("cannot create encoder: {error}")))?;
        encoder.set_width(config.width);
        encoder.set_height(config.height);
        encoder.set_format(Pixel::YUV420P);
        encoder.set_time_base(encoder_time_base);
        encoder.set_frame_rate(Some(Rational::new(config.frame_rate as i32, 1)));
        if let Some(bitrate) = config.video_bitrate {
            encoder.set_bit_rate(bitrate);
        }
        if output.needs_global_header() {
            // SAFETY: the encoder is not yet opened; setting flags is allowed.
            unsafe {
                (*encoder.as_mut_ptr()).flags |= ffmpeg_sys_next::AV_CODEC_FLAG_GLOBAL_HEADER as i32;
            }
        }

        let encoder = encoder
            .open_as_with(codec, encoder_options(config.codec))
            .map_err(|error| {
                PipelineError::ResourceExhausted(format!(
                    "{} rejected {}x{} @ {} fps: {error}",
                    config.codec.name(),
                    config.width,
                    config.height,
                    config.frame_rate
                ))
            })?;
        let scaler = ScalingContext::get(
            Pixel::RGBA,
            config.width,
            config.height,
            Pixel::YUV420P,
            config.width,
            config.height,
            ScalingFlags::BILINEAR,
        )
        .map_err(|error| PipelineError::ResourceExhausted(format!("cannot create scaler: {error}")))?;

        let mut muxer = Muxer {
            output,
            encoder,
            scaler,
            encoder_time_base,
            audio_time_base: None,
            width: config.width,
            height: config.height,
            taken: 0,
        };

        let context = muxer.output.context;
        // SAFETY: the context is valid and its header is not yet written.
        unsafe {
            let stream = ffmpeg_sys_next::avformat_new_stream(context, ptr::null());
            if stream.is_null() {
                return Err(PipelineError::Encode("cannot add video stream".to_string()));
            }
            ffmpeg_sys_next::avcodec_parameters_from_context((*stream).codecpar, muxer.encoder.as_ptr());
            (*stream).time_base = AVRational {
                num: encoder_time_base.numerator(),
                den: encoder_time_base.denominator(),
            };

            if let Some(track) = &config.audio {
                muxer.audio_time_base = Some(add_audio_stream(context, track)?);
            }

            let mut options = ptr::null_mut();
            if config.container == Container::Mp4 {
                let key = c"movflags";
                let value = c"frag_keyframe+empty_moov+default_base_moof";
                ffmpeg_sys_next::av_dict_set(&mut options, key.as_ptr(), value.as_ptr(), 0);
            }
            let result = ffmpeg_sys_next::avformat_write_header(context, &mut options);
            ffmpeg_sys_next::av_dict_free(&mut options);
            if result < 0 {
                return Err(PipelineError::ResourceExhausted(format!(
                    "{} container rejected the stream layout ({})",
                    config.container.muxer_name(),
                    ffmpeg_next::Error::from(result)
                )));
            }
        }

        log::debug!(
            "FFmpeg sink open: {} in {}, {}x{} @ {} fps, audio={}",
            config.codec.name(),
            config.container.muxer_name(),
            config.width,
            config.height,
            config.frame_rate,
            config.audio.is_some(),
        );
        Ok(muxer)
    }

    fn write_video(&mut self, image: &RgbaImage, pts: i64) -> Result<(), PipelineError> {
        if image.dimensions() != (self.width, self.height) {
            return Err(PipelineError::Encode(format!(
                "frame is {}x{}, encoder expects {}x{}",
                image.width(),
                image.height(),
                self.width,
                self.height
            )));
        }

        let mut rgba = VideoFrame::new(Pixel::RGBA, self.width, self.height);
        buffer_to_frame(image.as_raw(), &mut rgba, self.width, self.height, 4);
        let mut yuv = VideoFrame::empty();
        self.scaler
            .run(&rgba, &mut yuv)
            .map_err(|error| PipelineError::Encode(format!("scaling failed: {error}")))?;
        yuv.set_pts(Some(pts));

        self.encoder
            .send_frame(&yuv)
            .map_err(|error| PipelineError::Encode(format!("send_frame failed: {error}")))?;
        self.write_encoded()
    }

    fn write_audio(&mut self, packet: &AudioPacket) -> Result<(), PipelineError> {
        let Some(time_base) = self.audio_time_base else {
            return Err(PipelineError::Encode("sink was opened without audio".to_string()));
        };
        let mut copy = Packet::copy(&packet.data);
        copy.set_pts(packet.pts);
        copy.set_dts(packet.dts);
        copy.set_duration(packet.duration);
        if packet.keyframe {
            copy.set_flags(ffmpeg_next::packet::Flags::KEY);
        }
        self.write_packet(copy, AUDIO_STREAM, time_base)
    }

    fn write_encoded(&mut self) -> Result<(), PipelineError> {
        let mut packet = Packet::empty();
        while self.encoder.receive_packet(&mut packet).is_ok() {
            let encoded = std::mem::replace(&mut packet, Packet::empty());
            self.write_packet(encoded, VIDEO_STREAM, self.encoder_time_base)?;
        }
        Ok(())
    }

    fn write_packet(&mut self, mut packet: Packet, stream: usize, from: Rational) -> Result<(), PipelineError> {
        packet.set_stream(stream);
        packet.rescale_ts(from, self.output.time_base(stream));
        // SAFETY: the header has been written and the packet is valid.
        let result =
            unsafe { ffmpeg_sys_next::av_interleaved_write_frame(self.output.context, packet.as_mut_ptr()) };
        if result < 0 {
            return Err(PipelineError::Encode(format!(
                "writing a packet failed: {}",
                ffmpeg_next::Error::from(result)
            )));
        }
        Ok(())
    }

    /// Bytes written since the previous drain.
    fn drain(&mut self) -> Vec<u8> {
        // SAFETY: pb is the open dynamic buffer; the returned pointer stays
        // valid until the next write.
        unsafe {
            let pb = (*self.output.context).pb;
            ffmpeg_sys_next::avio_flush(pb);
            let mut buffer: *mut u8 = ptr::null_mut();
            let size = ffmpeg_sys_next::avio_get_dyn_buf(pb, &mut buffer);
            if size <= 0 || buffer.is_null() || size as usize <= self.taken {
                return Vec::new();
            }
            let chunk = std::slice::from_raw_parts(buffer.add(self.taken), size as usize - self.taken).to_vec();
            self.taken = size as usize;
            chunk
        }
    }

    /// Flush the encoder, write the trailer and return the remaining bytes.
    fn finish(&mut self) -> Result<Vec<u8>, PipelineError> {
        self.encoder
            .send_eof()
            .map_err(|error| PipelineError::Encode(format!("send_eof failed: {error}")))?;
        self.write_encoded()?;

        // SAFETY: the context is open.
        let result = unsafe { ffmpeg_sys_next::av_write_trailer(self.output.context) };
        if result < 0 {
            return Err(PipelineError::Encode(format!(
                "writing the trailer failed: {}",
                ffmpeg_next::Error::from(result)
            )));
        }

        let bytes = self.output.close();
        Ok(bytes.get(self.taken..).map(<[u8]>::to_vec).unwrap_or_default())
    }
}

/// Add a stream-copy audio stream described by `track`.
///
/// # Safety
///
/// `context` must be a valid output context whose header is not written.
unsafe fn add_audio_stream(context: *mut AVFormatContext, track: &AudioTrack) -> Result<Rational, PipelineError> {
    let name = CString::new(track.codec_name.as_str())
        .map_err(|error| PipelineError::Encode(format!("invalid audio codec name: {error}")))?;

    unsafe {
        let descriptor = ffmpeg_sys_next::avcodec_descriptor_get_by_name(name.as_ptr());
        if descriptor.is_null() {
            return Err(PipelineError::ResourceExhausted(format!(
                "unknown audio codec '{}'",
                track.codec_name
            )));
        }

        let stream = ffmpeg_sys_next::avformat_new_stream(context, ptr::null());
        if stream.is_null() {
            return Err(PipelineError::Encode("cannot add audio stream".to_string()));
        }

        let parameters = (*stream).codecpar;
        (*parameters).codec_type = ffmpeg_sys_next::AVMediaType::AVMEDIA_TYPE_AUDIO;
        (*parameters).codec_id = (*descriptor).id;
        (*parameters).codec_tag = 0;
        (*parameters).sample_rate = track.sample_rate as i32;
        ffmpeg_sys_next::av_channel_layout_default(&mut (*parameters).ch_layout, track.channels as i32);

        if !track.extradata.is_empty() {
            let padded = track.extradata.len() + ffmpeg_sys_next::AV_INPUT_BUFFER_PADDING_SIZE as usize;
            let extradata = ffmpeg_sys_next::av_mallocz(padded) as *mut u8;
            if extradata.is_null() {
                return Err(PipelineError::ResourceExhausted("cannot allocate audio extradata".to_string()));
            }
            ptr::copy_nonoverlapping(track.extradata.as_ptr(), extradata, track.extradata.len());
            (*parameters).extradata = extradata;
            (*parameters).extradata_size = track.extradata.len() as i32;
        }

        let (num, den) = track.time_base;
        (*stream).time_base = AVRational { num, den };

        let codec = CStr::from_ptr((*descriptor).name).to_string_lossy();
        log::debug!("Copying {codec} audio ({} Hz, {} channels)", track.sample_rate, track.channels);
    }
    Ok(Rational::new(track.time_base.0, track.time_base.1))
}

fn codec_id(codec: VideoCodec) -> Id {
    match codec {
        VideoCodec::Vp9 => Id::VP9,
        VideoCodec::Vp8 => Id::VP8,
        VideoCodec::H264 => Id::H264,
    }
}

fn encoder_options(codec: VideoCodec) -> Dictionary<'static> {
    let mut options = Dictionary::new();
    match codec {
        VideoCodec::Vp9 | VideoCodec::Vp8 => {
            options.set("deadline", "realtime");
            options.set("cpu-used", "8");
        }
        VideoCodec::H264 => options.set("preset", "veryfast"),
    }
    options
}
