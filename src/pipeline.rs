//! Pipeline Orchestrator: one feature invocation from source to outcome.
//!
//! A [`Job`] names what the caller wants. [`Job::plan`] validates it against
//! the source's natural properties and resolves it into a [`Plan`], and
//! [`Pipeline::run`] executes that plan against a fresh [`FrameSource`]
//! and, for capture plans, a [`CaptureSession`].
//!
//! Every invocation reports monotonically increasing progress in `[0, 100]`
//! and returns exactly one [`Outcome`] or one error. Failed and cancelled
//! invocations release the source and the encoder before returning.

use std::time::Duration;

use crate::analysis::{self, ColorReport, DEFAULT_PALETTE_SIZE, DEFAULT_SAMPLE_COUNT};
use crate::capture::{Artifact, AudioRoute, CaptureConfig, CaptureSession};
use crate::configuration::{EncoderOptions, PipelineOptions};
use crate::error::PipelineError;
use crate::media::{EncoderSink, MediaBackend, SourceInfo};
use crate::progress::{OperationType, ProgressReporter};
use crate::source::{FrameSource, Sample};
use crate::transform::{ColorFilter, Rotation, SubtitleCue, TransformSpec, center_crop_window};

/// Default scale factor of [`Job::Compress`].
pub const DEFAULT_COMPRESS_SCALE: f64 = 0.7;
/// Default width/height ratio of [`Job::VerticalCrop`].
pub const DEFAULT_VERTICAL_RATIO: f64 = 9.0 / 16.0;
/// Capture width used by [`Job::Filter`].
pub const FILTER_CAPTURE_WIDTH: u32 = 640;
/// Zoom reached at the end of a highlight clip.
pub const HIGHLIGHT_ZOOM: f32 = 1.12;

const OUTPUT_FRAME_RATE: u32 = 30;
const SUBTITLE_FRAME_RATE: u32 = 15;
const COMPRESS_VIDEO_BITRATE: usize = 900_000;
const RESIZE_VIDEO_BITRATE: usize = 1_500_000;
const AUDIO_BITRATE: usize = 128_000;

/// A feature invocation.
#[derive(Debug, Clone, PartialEq)]
pub enum Job {
    /// Re-encode at a reduced resolution and bit rate.
    Compress {
        /// Resolution scale factor in `(0, 1]`.
        scale: f64,
    },
    /// Apply a color filter at 640 pixels wide.
    Filter(ColorFilter),
    /// Rotate clockwise.
    Rotate(Rotation),
    /// Mirror the video.
    Flip {
        /// Mirror left to right when true, top to bottom otherwise.
        horizontal: bool,
    },
    /// Crop a centered full-height window for portrait playback.
    VerticalCrop {
        /// Output width/height ratio, below the source's own.
        ratio: f64,
    },
    /// Change resolution, preserving the aspect ratio.
    Resize {
        /// Output height; `None` keeps the native height.
        height: Option<u32>,
    },
    /// Burn subtitle cues into the video.
    BurnSubtitles {
        /// Cues in declaration order.
        cues: Vec<SubtitleCue>,
    },
    /// Cut a short clip starting at the moment with the most motion.
    Highlight {
        /// Clip length; `None` picks one from the source duration.
        duration: Option<Duration>,
    },
    /// Color timeline, temperature and palette.
    AnalyzeColor {
        /// Evenly spaced samples to take.
        samples: usize,
        /// Palette size.
        k: usize,
    },
    /// Evenly spaced still frames.
    Thumbnails {
        /// Stills to take.
        count: usize,
    },
}

impl Job {
    /// Compression at the default scale.
    pub fn compress() -> Self {
        Job::Compress {
            scale: DEFAULT_COMPRESS_SCALE,
        }
    }

    /// 9:16 vertical crop.
    pub fn vertical() -> Self {
        Job::VerticalCrop {
            ratio: DEFAULT_VERTICAL_RATIO,
        }
    }

    /// Color analysis with the default sample count and palette size.
    pub fn analyze_color() -> Self {
        Job::AnalyzeColor {
            samples: DEFAULT_SAMPLE_COUNT,
            k: DEFAULT_PALETTE_SIZE,
        }
    }

    /// Short lowercase name, used in logs.
    pub fn name(&self) -> &'static str {
        match self {
            Job::Compress { .. } => "compress",
            Job::Filter(_) => "filter",
            Job::Rotate(_) => "rotate",
            Job::Flip { .. } => "flip",
            Job::VerticalCrop { .. } => "vertical",
            Job::Resize { .. } => "resize",
            Job::BurnSubtitles { .. } => "subtitles",
            Job::Highlight { .. } => "highlight",
            Job::AnalyzeColor { .. } => "analyze",
            Job::Thumbnails { .. } => "thumbnails",
        }
    }

    /// Validate the job against `info` and resolve it into a plan.
    ///
    /// Bit rates left unset in `encoder` take the job's own defaults.
    ///
    /// # Errors
    ///
    /// [`PipelineError::Validation`] if a parameter is out of range or
    /// incompatible with the source, e.g. a vertical crop of a source whose
    /// aspect ratio is 1 or less.
    pub fn plan(&self, info: &SourceInfo, encoder: &EncoderOptions) -> Result<Plan, PipelineError> {
        let native = (info.width, info.height);
        let capture = |capture_size: (u32, u32), config: CaptureConfig| -> Result<Plan, PipelineError> {
            let output_size = match &config.transform {
                Some(transform) => transform.output_size(capture_size.0, capture_size.1)?,
                None => capture_size,
            };
            Ok(Plan::Capture(CapturePlan {
                capture_size,
                output_size,
                config: config.with_encoder(encoder.clone()),
                search_start: false,
            }))
        };

        match self {
            Job::Compress { scale } => {
                if !(scale.is_finite() && *scale > 0.0 && *scale <= 1.0) {
                    return Err(PipelineError::Validation(format!(
                        "compression scale must be in (0, 1], got {scale}"
                    )));
                }
                let size = (scaled(info.width, *scale), scaled(info.height, *scale));
                let encoder = with_default_bitrates(encoder, COMPRESS_VIDEO_BITRATE, AUDIO_BITRATE);
                Ok(Plan::Capture(CapturePlan {
                    capture_size: size,
                    output_size: size,
                    config: CaptureConfig::new(OUTPUT_FRAME_RATE).with_encoder(encoder),
                    search_start: false,
                }))
            }
            Job::Filter(filter) => {
                let height = scaled(FILTER_CAPTURE_WIDTH, 1.0 / info.aspect_ratio());
                capture(
                    (FILTER_CAPTURE_WIDTH, height),
                    CaptureConfig::new(OUTPUT_FRAME_RATE).with_transform(TransformSpec::Color(*filter)),
                )
            }
            Job::Rotate(rotation) => capture(
                native,
                CaptureConfig::new(OUTPUT_FRAME_RATE).with_transform(TransformSpec::Rotate(*rotation)),
            ),
            Job::Flip { horizontal } => {
                let transform = if *horizontal {
                    TransformSpec::FlipHorizontal
                } else {
                    TransformSpec::FlipVertical
                };
                capture(native, CaptureConfig::new(OUTPUT_FRAME_RATE).with_transform(transform))
            }
            Job::VerticalCrop { ratio } => {
                center_crop_window(info.width, info.height, *ratio)?;
                capture(
                    native,
                    CaptureConfig::new(OUTPUT_FRAME_RATE)
                        .with_transform(TransformSpec::CenterCropAspect(*ratio)),
                )
            }
            Job::Resize { height } => {
                let target = height.unwrap_or(info.height);
                if target == 0 {
                    return Err(PipelineError::Validation("output height must be at least 1".to_string()));
                }
                let width = scaled(info.width, target as f64 / info.height as f64);
                let encoder = with_default_bitrates(encoder, RESIZE_VIDEO_BITRATE, AUDIO_BITRATE);
                Ok(Plan::Capture(CapturePlan {
                    capture_size: (width, target),
                    output_size: (width, target),
                    config: CaptureConfig::new(OUTPUT_FRAME_RATE).with_encoder(encoder),
                    search_start: false,
                }))
            }
            Job::BurnSubtitles { cues } => capture(
                native,
                CaptureConfig::new(SUBTITLE_FRAME_RATE)
                    .with_transform(TransformSpec::SubtitleOverlay(cues.clone()))
                    .with_audio(AudioRoute::Mute),
            ),
            Job::Highlight { duration } => {
                let duration = duration.unwrap_or_else(|| analysis::smart_duration(info.duration));
                if duration.is_zero() {
                    return Err(PipelineError::Validation("highlight duration must be positive".to_string()));
                }
                let config = CaptureConfig::new(OUTPUT_FRAME_RATE)
                    .with_transform(TransformSpec::ProgressiveZoom { max: HIGHLIGHT_ZOOM })
                    .with_frame_budget(CaptureConfig::budget_for(OUTPUT_FRAME_RATE, duration))
                    .with_audio(AudioRoute::Mute);
                let mut plan = capture(native, config)?;
                if let Plan::Capture(capture) = &mut plan {
                    capture.search_start = true;
                }
                Ok(plan)
            }
            Job::AnalyzeColor { samples, k } => {
                if *samples == 0 || *k == 0 {
                    return Err(PipelineError::Validation(
                        "sample count and palette size must be at least 1".to_string(),
                    ));
                }
                Ok(Plan::Analysis {
                    samples: *samples,
                    palette_size: *k,
                })
            }
            Job::Thumbnails { count } => {
                if *count == 0 {
                    return Err(PipelineError::Validation("thumbnail count must be at least 1".to_string()));
                }
                let interval = info.duration.as_secs_f64() / (*count + 1) as f64;
                Ok(Plan::Thumbnails {
                    times: (1..=*count)
                        .map(|index| Duration::from_secs_f64(interval * index as f64))
                        .collect(),
                })
            }
        }
    }
}

fn scaled(length: u32, factor: f64) -> u32 {
    ((length as f64 * factor).round() as u32).max(1)
}

fn with_default_bitrates(encoder: &EncoderOptions, video: usize, audio: usize) -> EncoderOptions {
    EncoderOptions {
        video_bitrate: encoder.video_bitrate.or(Some(video)),
        audio_bitrate: encoder.audio_bitrate.or(Some(audio)),
        ..encoder.clone()
    }
}

/// A capture resolved from a [`Job`].
#[derive(Debug, Clone)]
pub struct CapturePlan {
    /// Size frames are sampled at.
    pub capture_size: (u32, u32),
    /// Size of the encoded frames, after the transform.
    pub output_size: (u32, u32),
    /// Session configuration.
    pub config: CaptureConfig,
    /// Search for the start with the most motion before recording.
    pub search_start: bool,
}

/// What an invocation will do.
#[derive(Debug, Clone)]
pub enum Plan {
    /// Record a transformed copy of the source.
    Capture(CapturePlan),
    /// Sample the source and analyze its colors.
    Analysis {
        /// Evenly spaced samples to take.
        samples: usize,
        /// Palette size.
        palette_size: usize,
    },
    /// Seek-sample stills at the given times.
    Thumbnails {
        /// Sample times.
        times: Vec<Duration>,
    },
}

/// The single result of a successful invocation.
#[derive(Debug, Clone)]
pub enum Outcome {
    /// An encoded video.
    Artifact(Artifact),
    /// A color analysis report.
    Analysis(ColorReport),
    /// Still frames at native size.
    Thumbnails(Vec<Sample>),
}

/// One invocation's exclusively owned source and encoder.
pub struct Pipeline<B: MediaBackend, S: EncoderSink> {
    backend: B,
    sink: S,
}

impl<B: MediaBackend, S: EncoderSink> Pipeline<B, S> {
    /// Bind a media resource and an encoder for one invocation.
    pub fn new(backend: B, sink: S) -> Self {
        Self { backend, sink }
    }

    /// Run `job` to completion.
    ///
    /// # Errors
    ///
    /// Any [`PipelineError`]; [`PipelineError::Cancelled`] when the
    /// options' token fires. No partial artifact is returned.
    pub fn run(self, job: &Job, options: &PipelineOptions) -> Result<Outcome, PipelineError> {
        let reporter = options.reporter();
        log::info!("Running {} job", job.name());

        let result = self.execute(job, options, &reporter);
        match &result {
            Ok(_) => {
                reporter.complete("Done");
                log::info!("{} job finished", job.name());
            }
            Err(error) => {
                reporter.settle();
                log::warn!("{} job ended: {error}", job.name());
            }
        }
        result
    }

    fn execute(
        self,
        job: &Job,
        options: &PipelineOptions,
        reporter: &ProgressReporter,
    ) -> Result<Outcome, PipelineError> {
        reporter.stage(OperationType::Probing, 0.0, 10.0, "Loading video");
        let mut source = FrameSource::open(self.backend)?;
        source.set_seek_timeout(options.seek_timeout());
        let plan = job.plan(source.info(), options.encoder())?;
        reporter.report(10.0, "Loading video");

        if options.is_cancelled() {
            return Err(PipelineError::Cancelled);
        }

        match plan {
            Plan::Capture(mut plan) => {
                let mut range = (10.0, 95.0);
                if plan.search_start {
                    let cut = analysis::find_best_start_with(&mut source, options, reporter, (10.0, 50.0))?;
                    plan.config = plan.config.with_start(cut.timestamp);
                    range = (50.0, 95.0);
                }
                source.set_capture_size(plan.capture_size.0, plan.capture_size.1)?;
                CaptureSession::new(self.sink, plan.config)
                    .record_with(&mut source, options, reporter, range)
                    .map(Outcome::Artifact)
            }
            Plan::Analysis {
                samples,
                palette_size,
            } => analysis::analyze_colors_with(
                &mut source,
                samples,
                palette_size,
                options,
                reporter,
                (10.0, 90.0),
            )
            .map(Outcome::Analysis),
            Plan::Thumbnails { times } => {
                reporter.stage(OperationType::ThumbnailSampling, 10.0, 95.0, "Extracting thumbnails");
                let mut stills = Vec::with_capacity(times.len());
                for (index, &time) in times.iter().enumerate() {
                    if options.is_cancelled() {
                        return Err(PipelineError::Cancelled);
                    }
                    stills.push(source.seek_and_sample(time)?);
                    reporter.advance(index as u64 + 1, times.len() as u64, "Extracting thumbnails");
                }
                Ok(Outcome::Thumbnails(stills))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn info(width: u32, height: u32, seconds: u64) -> SourceInfo {
        SourceInfo {
            width,
            height,
            duration: Duration::from_secs(seconds),
            frame_rate: Some(30.0),
            audio: None,
        }
    }

    fn capture_plan(job: &Job, info: &SourceInfo) -> CapturePlan {
        match job.plan(info, &EncoderOptions::default()).unwrap() {
            Plan::Capture(plan) => plan,
            other => panic!("expected a capture plan, got {other:?}"),
        }
    }

    #[test]
    fn compress_scales_and_sets_bitrates() {
        let plan = capture_plan(&Job::compress(), &info(1280, 720, 10));
        assert_eq!(plan.capture_size, (896, 504));
        assert_eq!(plan.config.encoder.video_bitrate, Some(900_000));
        assert_eq!(plan.config.encoder.audio_bitrate, Some(128_000));
        assert_eq!(plan.config.audio, AudioRoute::Passthrough);
    }

    #[test]
    fn caller_bitrate_wins() {
        let encoder = EncoderOptions::default().video_bitrate(2_000_000);
        let Plan::Capture(plan) = Job::compress().plan(&info(100, 100, 1), &encoder).unwrap() else {
            panic!("expected a capture plan");
        };
        assert_eq!(plan.config.encoder.video_bitrate, Some(2_000_000));
    }

    #[test]
    fn compress_rejects_bad_scale() {
        for scale in [0.0, -1.0, 1.5, f64::NAN] {
            assert!(Job::Compress { scale }.plan(&info(100, 100, 1), &EncoderOptions::default()).is_err());
        }
    }

    #[test]
    fn filter_captures_at_640_wide() {
        let plan = capture_plan(&Job::Filter(ColorFilter::Sepia), &info(1920, 1080, 10));
        assert_eq!(plan.capture_size, (640, 360));
        assert_eq!(plan.output_size, (640, 360));
    }

    #[test]
    fn rotation_swaps_output() {
        let plan = capture_plan(&Job::Rotate(Rotation::Deg90), &info(1920, 1080, 10));
        assert_eq!(plan.capture_size, (1920, 1080));
        assert_eq!(plan.output_size, (1080, 1920));
    }

    #[test]
    fn vertical_crop_of_full_hd() {
        let plan = capture_plan(&Job::vertical(), &info(1920, 1080, 10));
        assert_eq!(plan.output_size, (608, 1080));
    }

    #[test]
    fn vertical_crop_rejects_portrait_sources() {
        let error = Job::vertical()
            .plan(&info(1080, 1920, 10), &EncoderOptions::default())
            .unwrap_err();
        assert_eq!(error.kind(), crate::ErrorKind::ValidationError);
    }

    #[test]
    fn resize_preserves_aspect() {
        let plan = capture_plan(&Job::Resize { height: Some(480) }, &info(1920, 1080, 10));
        assert_eq!(plan.capture_size, (853, 480));
        assert_eq!(plan.config.encoder.video_bitrate, Some(1_500_000));

        let plan = capture_plan(&Job::Resize { height: None }, &info(1920, 1080, 10));
        assert_eq!(plan.capture_size, (1920, 1080));
    }

    #[test]
    fn subtitles_are_video_only_at_15_fps() {
        let plan = capture_plan(&Job::BurnSubtitles { cues: Vec::new() }, &info(640, 360, 10));
        assert_eq!(plan.config.frame_rate, 15);
        assert_eq!(plan.config.audio, AudioRoute::Mute);
    }

    #[test]
    fn highlight_budget_from_smart_duration() {
        let plan = capture_plan(&Job::Highlight { duration: None }, &info(640, 360, 30));
        assert!(plan.search_start);
        assert_eq!(plan.config.frame_budget, Some(120));
        assert_eq!(plan.config.audio, AudioRoute::Mute);
    }

    #[test]
    fn thumbnail_times_avoid_the_ends() {
        let Plan::Thumbnails { times } = (Job::Thumbnails { count: 3 })
            .plan(&info(640, 360, 8), &EncoderOptions::default())
            .unwrap()
        else {
            panic!("expected a thumbnail plan");
        };
        assert_eq!(
            times,
            vec![Duration::from_secs(2), Duration::from_secs(4), Duration::from_secs(6)]
        );
    }
}
