//! End-to-end pipeline integration tests over the synthetic host.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use clipsmith::analysis::{self, Temperature};
use clipsmith::synthetic::{MemorySink, RawContainer, SyntheticSource};
use clipsmith::{
    CancellationToken, ColorFilter, ErrorKind, FrameSource, Job, OperationType, Outcome, Pipeline,
    PipelineOptions, ProgressCallback, ProgressInfo, SubtitleCue,
};
use image::{Rgba, RgbaImage};

struct Recorder(Mutex<Vec<ProgressInfo>>);

impl Recorder {
    fn new() -> Arc<Self> {
        Arc::new(Self(Mutex::new(Vec::new())))
    }

    fn updates(&self) -> Vec<ProgressInfo> {
        self.0.lock().unwrap().clone()
    }
}

impl ProgressCallback for Recorder {
    fn on_progress(&self, info: &ProgressInfo) {
        self.0.lock().unwrap().push(info.clone());
    }
}

/// Cancels its token once progress passes a threshold.
struct CancelAt {
    threshold: f32,
    token: CancellationToken,
}

impl ProgressCallback for CancelAt {
    fn on_progress(&self, info: &ProgressInfo) {
        if info.percentage > self.threshold {
            self.token.cancel();
        }
    }
}

/// Black until `cut`, red afterwards.
fn cut_to_red(width: u32, height: u32, fps: f64, duration: Duration, cut: Duration) -> SyntheticSource {
    SyntheticSource::new(width, height, fps, duration, move |time| {
        let red = if time >= cut { 255 } else { 0 };
        RgbaImage::from_pixel(width, height, Rgba([red, 0, 0, 255]))
    })
}

fn artifact(outcome: Outcome) -> clipsmith::Artifact {
    match outcome {
        Outcome::Artifact(artifact) => artifact,
        other => panic!("expected an artifact, got {other:?}"),
    }
}

// ── Capture jobs ───────────────────────────────────────────────────

#[test]
fn compress_scales_down_and_keeps_audio() {
    let backend = SyntheticSource::solid(64, 36, 30.0, Duration::from_secs(2), [50, 60, 70]).with_audio(48_000, 2);
    let outcome = Pipeline::new(backend, MemorySink::new())
        .run(&Job::compress(), &PipelineOptions::new())
        .unwrap();

    let artifact = artifact(outcome);
    assert_eq!((artifact.width, artifact.height), (45, 25));
    assert_eq!(artifact.frame_count, 60);
    assert!(artifact.has_audio);

    let container = RawContainer::parse(&artifact.bytes).unwrap();
    assert_eq!(container.frame_rate, 30);
    assert_eq!(container.audio.len(), 60);
}

#[test]
fn filter_job_records_at_640_wide() {
    let backend = SyntheticSource::solid(1280, 720, 30.0, Duration::from_millis(200), [100, 100, 100]);
    let artifact = artifact(
        Pipeline::new(backend, MemorySink::new())
            .run(&Job::Filter(ColorFilter::Grayscale), &PipelineOptions::new())
            .unwrap(),
    );
    assert_eq!((artifact.width, artifact.height), (640, 360));
}

#[test]
fn vertical_job_crops_landscape_sources() {
    let backend = SyntheticSource::solid(160, 90, 30.0, Duration::from_millis(200), [0, 0, 0]);
    let artifact = artifact(
        Pipeline::new(backend, MemorySink::new())
            .run(&Job::vertical(), &PipelineOptions::new())
            .unwrap(),
    );
    // round(90 * 9 / 16) = 51
    assert_eq!((artifact.width, artifact.height), (51, 90));

    let portrait = SyntheticSource::solid(90, 160, 30.0, Duration::from_millis(200), [0, 0, 0]);
    let sink = MemorySink::new();
    let activity = sink.activity();
    let error = Pipeline::new(portrait, sink)
        .run(&Job::vertical(), &PipelineOptions::new())
        .unwrap_err();
    assert_eq!(error.kind(), ErrorKind::ValidationError);
    assert!(!activity.lock().unwrap().opened);
}

#[test]
fn rotate_job_swaps_output_dimensions() {
    let backend = SyntheticSource::solid(40, 20, 30.0, Duration::from_millis(200), [0, 0, 0]);
    let artifact = artifact(
        Pipeline::new(backend, MemorySink::new())
            .run(&Job::Rotate(clipsmith::Rotation::Deg270), &PipelineOptions::new())
            .unwrap(),
    );
    assert_eq!((artifact.width, artifact.height), (20, 40));
}

#[test]
fn subtitles_are_burned_at_15_fps_without_audio() {
    let backend = SyntheticSource::solid(80, 40, 30.0, Duration::from_secs(2), [200, 200, 200]).with_audio(48_000, 2);
    let job = Job::BurnSubtitles {
        cues: vec![SubtitleCue::new(Duration::ZERO, "hi")],
    };
    let artifact = artifact(Pipeline::new(backend, MemorySink::new()).run(&job, &PipelineOptions::new()).unwrap());
    assert_eq!(artifact.frame_rate, 15);
    assert_eq!(artifact.frame_count, 30);
    assert!(!artifact.has_audio);

    let container = RawContainer::parse(&artifact.bytes).unwrap();
    let (_, first) = &container.video[0];
    assert_eq!(first.get_pixel(0, 0), &Rgba([200, 200, 200, 255]));
    assert_eq!(first.get_pixel(0, 39), &Rgba([70, 70, 70, 255]));
}

// ── Highlight ──────────────────────────────────────────────────────

#[test]
fn best_start_lands_just_before_the_cut() {
    let backend = cut_to_red(64, 36, 30.0, Duration::from_secs(12), Duration::from_secs(5));
    let mut source = FrameSource::open(backend).unwrap();

    let cut = analysis::find_best_start(&mut source, &PipelineOptions::new()).unwrap();
    assert_eq!(cut.timestamp, Duration::from_secs_f64(4.75));
    assert!(cut.motion_score > 0);
    // Capture size is restored after the search.
    assert_eq!(source.capture_size(), (64, 36));
}

#[test]
fn best_start_defaults_when_nothing_moves() {
    let backend = SyntheticSource::solid(32, 18, 30.0, Duration::from_secs(12), [9, 9, 9]);
    let mut source = FrameSource::open(backend).unwrap();
    let cut = analysis::find_best_start(&mut source, &PipelineOptions::new()).unwrap();
    assert_eq!(cut.timestamp, Duration::from_secs(1));
    assert_eq!(cut.motion_score, 0);

    let short = SyntheticSource::solid(32, 18, 30.0, Duration::from_millis(800), [9, 9, 9]);
    let mut source = FrameSource::open(short).unwrap();
    let cut = analysis::find_best_start(&mut source, &PipelineOptions::new()).unwrap();
    assert_eq!(cut.timestamp, Duration::ZERO);
}

#[test]
fn highlight_records_a_zooming_clip_from_the_best_start() {
    let backend = cut_to_red(64, 36, 30.0, Duration::from_secs(12), Duration::from_secs(5));
    let seeks = backend.seek_log();

    let artifact = artifact(
        Pipeline::new(backend, MemorySink::new())
            .run(&Job::Highlight { duration: None }, &PipelineOptions::new())
            .unwrap(),
    );
    assert_eq!(artifact.frame_count, 120);
    assert_eq!((artifact.width, artifact.height), (64, 36));
    assert!(!artifact.has_audio);

    let seeks = seeks.lock().unwrap();
    assert_eq!(seeks.first(), Some(&Duration::from_secs(1)));
    assert_eq!(seeks.len(), 2 * analysis::search_times(Duration::from_secs(12)).len());

    // Recording starts just before the cut, so the clip opens black and turns red.
    let container = RawContainer::parse(&artifact.bytes).unwrap();
    assert_eq!(container.video[0].1.get_pixel(32, 18)[0], 0);
    assert!(container.video[119].1.get_pixel(32, 18)[0] >= 250);
}

// ── Analysis and thumbnails ────────────────────────────────────────

#[test]
fn forty_samples_evenly_spaced() {
    let backend = SyntheticSource::solid(48, 27, 10.0, Duration::from_secs(12), [20, 30, 200]);
    let seeks = backend.seek_log();

    let Outcome::Analysis(report) = Pipeline::new(backend, MemorySink::new())
        .run(&Job::analyze_color(), &PipelineOptions::new())
        .unwrap()
    else {
        panic!("expected an analysis report");
    };

    assert_eq!(report.timeline.len(), 40);
    assert_eq!(seeks.lock().unwrap().len(), 40);
    for (index, entry) in report.timeline.iter().enumerate() {
        let expected = 0.3 * index as f64;
        assert!((entry.timestamp.as_secs_f64() - expected).abs() < 1e-6);
    }
    assert_eq!(report.dominant_color, [20, 30, 200]);
    assert_eq!(report.temperature, Temperature::Cold);
    assert_eq!(report.palette.len(), 5);
    assert!(report.palette.iter().all(|cluster| cluster.rgb() == [20, 30, 200]));
}

#[test]
fn report_serializes_to_json() {
    let backend = SyntheticSource::solid(16, 16, 10.0, Duration::from_secs(2), [255, 255, 255]);
    let Outcome::Analysis(report) = Pipeline::new(backend, MemorySink::new())
        .run(&Job::AnalyzeColor { samples: 4, k: 2 }, &PipelineOptions::new())
        .unwrap()
    else {
        panic!("expected an analysis report");
    };
    assert_eq!(report.temperature, Temperature::Warm);

    let json = report.to_json();
    assert_eq!(json["dominant_color"]["hex"], "#ffffff");
    assert_eq!(json["temperature"], "warm");
    assert_eq!(json["timeline"].as_array().map(Vec::len), Some(4));
}

#[test]
fn thumbnails_at_native_size() {
    let backend = SyntheticSource::solid(120, 68, 30.0, Duration::from_secs(8), [1, 2, 3]);
    let Outcome::Thumbnails(stills) = Pipeline::new(backend, MemorySink::new())
        .run(&Job::Thumbnails { count: 3 }, &PipelineOptions::new())
        .unwrap()
    else {
        panic!("expected thumbnails");
    };
    let times: Vec<Duration> = stills.iter().map(|still| still.timestamp).collect();
    assert_eq!(times, vec![Duration::from_secs(2), Duration::from_secs(4), Duration::from_secs(6)]);
    assert!(stills.iter().all(|still| still.raster.dimensions() == (120, 68)));
}

// ── Progress ───────────────────────────────────────────────────────

#[test]
fn progress_is_monotonic_and_completes() {
    let recorder = Recorder::new();
    let backend = SyntheticSource::solid(32, 18, 30.0, Duration::from_secs(2), [0, 0, 0]);
    Pipeline::new(backend, MemorySink::new())
        .run(&Job::compress(), &PipelineOptions::new().with_progress(recorder.clone()))
        .unwrap();

    let updates = recorder.updates();
    assert_eq!(updates.first().map(|info| info.operation), Some(OperationType::Probing));
    assert!(updates.iter().any(|info| info.operation == OperationType::Recording));
    assert!(updates.windows(2).all(|pair| pair[0].percentage <= pair[1].percentage));
    assert_eq!(updates.last().map(|info| info.percentage), Some(100.0));
}

#[test]
fn batched_progress_fires_less_often() {
    let every = Recorder::new();
    let batched = Recorder::new();
    for (recorder, batch) in [(&every, 1), (&batched, 10)] {
        let backend = SyntheticSource::solid(16, 16, 10.0, Duration::from_secs(4), [0, 0, 0]);
        Pipeline::new(backend, MemorySink::new())
            .run(
                &Job::analyze_color(),
                &PipelineOptions::new()
                    .with_progress(recorder.clone())
                    .with_batch_size(batch),
            )
            .unwrap();
    }
    assert!(batched.updates().len() < every.updates().len());
}

// ── Cancellation ───────────────────────────────────────────────────

#[test]
fn cancelling_mid_recording_discards_output() {
    let token = CancellationToken::new();
    let options = PipelineOptions::new()
        .with_cancellation(token.clone())
        .with_progress(Arc::new(CancelAt {
            threshold: 30.0,
            token: token.clone(),
        }));
    let backend = SyntheticSource::solid(32, 18, 30.0, Duration::from_secs(10), [0, 0, 0]);
    let sink = MemorySink::new();
    let activity = sink.activity();

    let error = Pipeline::new(backend, sink).run(&Job::compress(), &options).unwrap_err();
    assert!(error.is_cancelled());

    let activity = activity.lock().unwrap();
    assert!(activity.opened);
    assert!(activity.aborted);
    assert!(!activity.finished);
    assert!(activity.video_frames < 300);
}

#[test]
fn cancelled_before_start_returns_immediately() {
    let token = CancellationToken::new();
    token.cancel();
    let backend = SyntheticSource::solid(16, 16, 10.0, Duration::from_secs(12), [0, 0, 0]);
    let seeks = backend.seek_log();

    let error = Pipeline::new(backend, MemorySink::new())
        .run(&Job::analyze_color(), &PipelineOptions::new().with_cancellation(token))
        .unwrap_err();
    assert_eq!(error.kind(), ErrorKind::Cancelled);
    assert!(seeks.lock().unwrap().is_empty());
}

#[test]
fn no_progress_after_cancellation() {
    let token = CancellationToken::new();
    let recorder = Recorder::new();
    let canceller = Arc::new(CancelAt {
        threshold: 20.0,
        token: token.clone(),
    });

    struct Both(Arc<Recorder>, Arc<CancelAt>);
    impl ProgressCallback for Both {
        fn on_progress(&self, info: &ProgressInfo) {
            self.0.on_progress(info);
            self.1.on_progress(info);
        }
    }

    let options = PipelineOptions::new()
        .with_cancellation(token)
        .with_progress(Arc::new(Both(recorder.clone(), canceller)));
    let backend = SyntheticSource::solid(16, 16, 10.0, Duration::from_secs(12), [0, 0, 0]);
    let result = Pipeline::new(backend, MemorySink::new()).run(&Job::analyze_color(), &options);
    assert!(result.unwrap_err().is_cancelled());

    let updates = recorder.updates();
    let over = updates.iter().filter(|info| info.percentage > 20.0).count();
    assert_eq!(over, 1, "only the update that triggered cancellation is delivered");
}

// ── Errors ─────────────────────────────────────────────────────────

#[test]
fn stalled_seek_times_out() {
    let backend = SyntheticSource::solid(16, 16, 10.0, Duration::from_secs(12), [0, 0, 0])
        .with_seek_stall_from(Duration::from_secs(6));
    let options = PipelineOptions::new().with_seek_timeout(Duration::from_millis(40));
    let error = Pipeline::new(backend, MemorySink::new())
        .run(&Job::analyze_color(), &options)
        .unwrap_err();
    assert_eq!(error.kind(), ErrorKind::SeekTimeout);
    assert!(error.to_string().contains("timed out after 40ms"), "{error}");
}

#[test]
fn rejected_encoder_configuration() {
    let backend = SyntheticSource::solid(1920, 1080, 30.0, Duration::from_millis(100), [0, 0, 0]);
    let error = Pipeline::new(backend, MemorySink::new().with_pixel_budget(640 * 360))
        .run(&Job::Rotate(clipsmith::Rotation::Deg180), &PipelineOptions::new())
        .unwrap_err();
    assert_eq!(error.kind(), ErrorKind::ResourceExhausted);
}

#[test]
fn undecodable_and_empty_sources_are_rejected() {
    let corrupt = SyntheticSource::solid(16, 16, 10.0, Duration::from_secs(1), [0, 0, 0]).undecodable();
    let error = Pipeline::new(corrupt, MemorySink::new())
        .run(&Job::compress(), &PipelineOptions::new())
        .unwrap_err();
    assert_eq!(error.kind(), ErrorKind::SourceError);

    let empty = SyntheticSource::solid(0, 16, 10.0, Duration::from_secs(1), [0, 0, 0]);
    let error = Pipeline::new(empty, MemorySink::new())
        .run(&Job::compress(), &PipelineOptions::new())
        .unwrap_err();
    assert_eq!(error.kind(), ErrorKind::SourceError);
    assert!(error.to_string().contains("zero dimensions"));
}

#[test]
fn invalid_parameters_are_validation_errors() {
    for job in [
        Job::Compress { scale: 1.5 },
        Job::AnalyzeColor { samples: 0, k: 5 },
        Job::Thumbnails { count: 0 },
        Job::Resize { height: Some(0) },
    ] {
        let backend = SyntheticSource::solid(16, 9, 10.0, Duration::from_secs(1), [0, 0, 0]);
        let error = Pipeline::new(backend, MemorySink::new())
            .run(&job, &PipelineOptions::new())
            .unwrap_err();
        assert_eq!(error.kind(), ErrorKind::ValidationError, "{job:?}");
    }
}
