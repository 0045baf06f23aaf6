//! Pixel transform integration tests.

use std::time::Duration;

use clipsmith::transform::{self, ColorFilter, Rotation, SubtitleCue, TransformSpec, active_cue, center_crop_window};
use clipsmith::{ErrorKind, FrameContext};
use image::{Rgba, RgbaImage};

/// Encodes the column in red/green so crops can be located.
fn column_coded(width: u32, height: u32) -> RgbaImage {
    RgbaImage::from_fn(width, height, |x, y| {
        Rgba([(x & 0xff) as u8, (x >> 8) as u8, (y % 251) as u8, 200])
    })
}

fn gradient(width: u32, height: u32) -> RgbaImage {
    RgbaImage::from_fn(width, height, |x, y| {
        Rgba([(x * 7 % 256) as u8, (y * 13 % 256) as u8, ((x + y) % 256) as u8, (x % 256) as u8])
    })
}

// ── Color filters ──────────────────────────────────────────────────

#[test]
fn double_invert_is_identity() {
    let raster = gradient(37, 23);
    let spec = TransformSpec::Color(ColorFilter::Invert);
    let twice = transform::apply(&transform::apply(&raster, &spec).unwrap(), &spec).unwrap();
    assert_eq!(twice, raster);
}

#[test]
fn every_filter_preserves_dimensions_and_alpha() {
    let raster = gradient(33, 17);
    for filter in ColorFilter::ALL {
        let output = transform::apply(&raster, &TransformSpec::Color(filter)).unwrap();
        assert_eq!(output.dimensions(), raster.dimensions(), "{filter} changed dimensions");
        for (before, after) in raster.pixels().zip(output.pixels()) {
            assert_eq!(before[3], after[3], "{filter} touched alpha");
        }
    }
}

#[test]
fn filter_names_round_trip_through_from_str() {
    for filter in ColorFilter::ALL {
        assert_eq!(filter.name().parse::<ColorFilter>().unwrap(), filter);
    }
    assert_eq!("Night_Blue".parse::<ColorFilter>().unwrap(), ColorFilter::NightBlue);
    assert_eq!(
        "posterize".parse::<ColorFilter>().unwrap_err().kind(),
        ErrorKind::ValidationError
    );
}

// ── Geometry ───────────────────────────────────────────────────────

#[test]
fn quarter_turns_swap_dimensions() {
    let raster = gradient(40, 10);
    let rotated = transform::apply(&raster, &TransformSpec::Rotate(Rotation::Deg90)).unwrap();
    assert_eq!(rotated.dimensions(), (10, 40));

    let back = transform::apply(&rotated, &TransformSpec::Rotate(Rotation::Deg270)).unwrap();
    assert_eq!(back, raster);

    let half = transform::apply(&raster, &TransformSpec::Rotate(Rotation::Deg180)).unwrap();
    assert_eq!(half.dimensions(), (40, 10));
    assert_eq!(half.get_pixel(0, 0), raster.get_pixel(39, 9));
}

#[test]
fn rotation_degrees_are_validated() {
    assert_eq!(Rotation::from_degrees(270).unwrap(), Rotation::Deg270);
    assert!(Rotation::from_degrees(45).is_err());
}

#[test]
fn flips_are_involutions() {
    let raster = gradient(9, 5);
    for spec in [TransformSpec::FlipHorizontal, TransformSpec::FlipVertical] {
        let twice = transform::apply(&transform::apply(&raster, &spec).unwrap(), &spec).unwrap();
        assert_eq!(twice, raster);
    }
    let mirrored = transform::apply(&raster, &TransformSpec::FlipHorizontal).unwrap();
    assert_eq!(mirrored.get_pixel(0, 2), raster.get_pixel(8, 2));
}

#[test]
fn vertical_crop_of_full_hd_window() {
    assert_eq!(center_crop_window(1920, 1080, 9.0 / 16.0).unwrap(), (656, 608));

    let raster = column_coded(1920, 1080);
    let cropped = transform::apply(&raster, &TransformSpec::CenterCropAspect(9.0 / 16.0)).unwrap();
    assert_eq!(cropped.dimensions(), (608, 1080));
    assert_eq!(cropped.get_pixel(0, 500), raster.get_pixel(656, 500));
    assert_eq!(cropped.get_pixel(607, 0), raster.get_pixel(1263, 0));
}

#[test]
fn crop_rejects_non_landscape_and_oversized_windows() {
    for (width, height, ratio) in [(100, 100, 0.5), (90, 160, 0.5), (160, 90, 2.0), (160, 90, 0.0)] {
        let error = center_crop_window(width, height, ratio).unwrap_err();
        assert_eq!(error.kind(), ErrorKind::ValidationError, "{width}x{height} @ {ratio}");
    }
}

#[test]
fn zoom_keeps_size_and_centers() {
    let raster = column_coded(200, 100);
    let zoomed = transform::apply(&raster, &TransformSpec::Zoom(2.0)).unwrap();
    assert_eq!(zoomed.dimensions(), (200, 100));
    // The 100 px window starts at x = 50, so the left edge now shows column ~50.
    assert!((45..=55).contains(&zoomed.get_pixel(0, 50)[0]));

    assert!(transform::apply(&raster, &TransformSpec::Zoom(0.5)).is_err());
}

#[test]
fn progressive_zoom_starts_unscaled() {
    let raster = column_coded(64, 32);
    let spec = TransformSpec::ProgressiveZoom { max: 1.5 };
    let first = FrameContext {
        timestamp: Duration::ZERO,
        frame_index: 0,
        frame_budget: Some(10),
    };
    assert_eq!(spec.apply(&raster, &first).unwrap(), raster);

    let last = FrameContext { frame_index: 10, ..first };
    let zoomed = spec.apply(&raster, &last).unwrap();
    assert_eq!(zoomed.dimensions(), (64, 32));
    assert_ne!(zoomed, raster);
}

// ── Subtitles ──────────────────────────────────────────────────────

#[test]
fn first_declared_active_cue_wins() {
    let cues = vec![
        SubtitleCue::new(Duration::from_secs(0), "first"),
        SubtitleCue::new(Duration::from_secs(1), "second"),
    ];
    assert_eq!(active_cue(&cues, Duration::from_secs(2)).unwrap().text, "first");
    assert_eq!(active_cue(&cues, Duration::from_millis(3500)).unwrap().text, "second");
    assert!(active_cue(&cues, Duration::from_secs(4)).is_none());
}

#[test]
fn overlay_darkens_the_bottom_band_only() {
    let raster = RgbaImage::from_pixel(160, 80, Rgba([200, 200, 200, 255]));
    let spec = TransformSpec::SubtitleOverlay(vec![SubtitleCue::new(Duration::from_secs(1), "Hi")]);

    let inactive = spec.apply(&raster, &FrameContext::at(Duration::ZERO)).unwrap();
    assert_eq!(inactive, raster);

    let active = spec.apply(&raster, &FrameContext::at(Duration::from_secs(2))).unwrap();
    assert_eq!(active.get_pixel(0, 0), raster.get_pixel(0, 0));
    // Band: 10 rows at 35% brightness.
    assert_eq!(active.get_pixel(0, 79), &Rgba([70, 70, 70, 255]));
    assert_eq!(active.get_pixel(0, 69), &Rgba([200, 200, 200, 255]));
}

#[test]
fn cues_parse_from_json() {
    let cues = SubtitleCue::list_from_json(r#"[{"time": 1.5, "text": "hello"}, {"time": 0, "text": "zero"}]"#)
        .unwrap();
    assert_eq!(cues.len(), 2);
    assert_eq!(cues[0], SubtitleCue::new(Duration::from_millis(1500), "hello"));

    assert!(SubtitleCue::list_from_json(r#"{"time": 1}"#).is_err());
    assert!(SubtitleCue::list_from_json(r#"[{"time": -1, "text": "x"}]"#).is_err());
}
