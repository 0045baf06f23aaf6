//! Motion scoring and highlight start search.

use std::time::Duration;

use image::RgbaImage;

use crate::configuration::PipelineOptions;
use crate::error::PipelineError;
use crate::media::MediaBackend;
use crate::progress::{OperationType, ProgressReporter};
use crate::source::FrameSource;

/// Distance between the two frames compared by the motion scorer.
pub const MOTION_OFFSET: Duration = Duration::from_millis(350);
/// Downscale factor applied to both frames before scoring.
pub const MOTION_SCALE: f64 = 0.25;

const SEARCH_START: f64 = 1.0;
const SEARCH_STEP: f64 = 0.75;
const SEARCH_HORIZON: f64 = 20.0;
/// Seconds kept free at the end of the source.
const SEARCH_TAIL: f64 = 3.0;

/// A candidate start point and its motion score.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CutPoint {
    /// Candidate start time.
    pub timestamp: Duration,
    /// Sum of red-channel differences between the frame at `timestamp` and
    /// the frame [`MOTION_OFFSET`] later.
    pub motion_score: u64,
}

/// Sum of `|R1 - R2|` over all pixels of two equally sized rasters.
///
/// Only the red channel is compared.
pub fn red_difference(before: &RgbaImage, after: &RgbaImage) -> u64 {
    before
        .pixels()
        .zip(after.pixels())
        .map(|(a, b)| a.0[0].abs_diff(b.0[0]) as u64)
        .sum()
}

/// Pick a clip length from the source duration.
///
/// Under 10 s: 30% of the source but at least 3 s. Under a minute: 4 s.
/// Otherwise 6 s.
pub fn smart_duration(duration: Duration) -> Duration {
    let seconds = duration.as_secs_f64();
    if seconds < 10.0 {
        Duration::from_secs_f64((seconds * 0.3).max(3.0))
    } else if seconds < 60.0 {
        Duration::from_secs(4)
    } else {
        Duration::from_secs(6)
    }
}

/// Timestamps probed by [`find_best_start`] for a source of `duration`.
///
/// Starts at 1 s and steps by 0.75 s while below
/// `min(duration - 3 s, 20 s)`.
pub fn search_times(duration: Duration) -> Vec<Duration> {
    let limit = (duration.as_secs_f64() - SEARCH_TAIL).min(SEARCH_HORIZON);
    (0..)
        .map(|step| SEARCH_START + step as f64 * SEARCH_STEP)
        .take_while(|&seconds| seconds < limit)
        .map(Duration::from_secs_f64)
        .collect()
}

/// Score motion at `time` by comparing quarter-scale samples at `time` and
/// `time + 0.35 s`.
///
/// The source's capture size is restored before returning.
pub fn motion_score<B: MediaBackend>(
    source: &mut FrameSource<B>,
    time: Duration,
    options: &PipelineOptions,
) -> Result<u64, PipelineError> {
    let previous = source.capture_size();
    let info = source.info();
    let width = ((info.width as f64 * MOTION_SCALE) as u32).max(1);
    let height = ((info.height as f64 * MOTION_SCALE) as u32).max(1);
    source.set_capture_size(width, height)?;

    let result = (|| {
        if options.is_cancelled() {
            return Err(PipelineError::Cancelled);
        }
        let before = source.seek_and_sample(time)?;
        if options.is_cancelled() {
            return Err(PipelineError::Cancelled);
        }
        let after = source.seek_and_sample(time + MOTION_OFFSET)?;
        Ok(red_difference(&before.raster, &after.raster))
    })();

    source.set_capture_size(previous.0, previous.1)?;
    result
}

/// Find the start time with the most motion in the search window.
///
/// Scans `[1 s, min(duration - 3 s, 20 s))` in 0.75 s steps and keeps the
/// strictly greatest score, so ties resolve to the earliest time. When the
/// window is empty the result is 1 s (or 0 s for sources no longer than
/// 1 s) with a score of zero.
pub fn find_best_start<B: MediaBackend>(
    source: &mut FrameSource<B>,
    options: &PipelineOptions,
) -> Result<CutPoint, PipelineError> {
    let reporter = options.reporter();
    let result = find_best_start_with(source, options, &reporter, (0.0, 100.0));
    reporter.settle();
    result
}

pub(crate) fn find_best_start_with<B: MediaBackend>(
    source: &mut FrameSource<B>,
    options: &PipelineOptions,
    reporter: &ProgressReporter,
    (from, to): (f32, f32),
) -> Result<CutPoint, PipelineError> {
    let duration = source.duration();
    let mut best = CutPoint {
        timestamp: if duration > Duration::from_secs(1) {
            Duration::from_secs_f64(SEARCH_START)
        } else {
            Duration::ZERO
        },
        motion_score: 0,
    };

    let times = search_times(duration);
    reporter.stage(OperationType::MotionSearch, from, to, "Searching for action");
    log::debug!("Motion search over {} candidate start points", times.len());

    for (index, &time) in times.iter().enumerate() {
        let score = motion_score(source, time, options)?;
        if score > best.motion_score {
            best = CutPoint {
                timestamp: time,
                motion_score: score,
            };
        }
        reporter.advance(
            index as u64 + 1,
            times.len() as u64,
            &format!("Searching for action ({:.1}s)", time.as_secs_f64()),
        );
    }

    log::info!(
        "Best start at {:.2}s (score {})",
        best.timestamp.as_secs_f64(),
        best.motion_score
    );
    Ok(best)
}

#[cfg(test)]
mod tests {
    use image::Rgba;

    use super::*;

    #[test]
    fn smart_duration_tiers() {
        assert_eq!(smart_duration(Duration::from_secs(5)), Duration::from_secs(3));
        assert_eq!(smart_duration(Duration::from_secs_f64(9.0)), Duration::from_secs_f64(3.0));
        assert_eq!(smart_duration(Duration::from_secs(30)), Duration::from_secs(4));
        assert_eq!(smart_duration(Duration::from_secs(600)), Duration::from_secs(6));
    }

    #[test]
    fn search_window_bounds() {
        let times = search_times(Duration::from_secs(12));
        // limit = 9 s: 1.0, 1.75, ..., 8.5
        assert_eq!(times.first(), Some(&Duration::from_secs(1)));
        assert_eq!(times.last(), Some(&Duration::from_secs_f64(8.5)));
        assert_eq!(times.len(), 11);

        let long = search_times(Duration::from_secs(120));
        assert!(long.iter().all(|time| time.as_secs_f64() < 20.0));
        assert!(search_times(Duration::from_secs(4)).is_empty());
    }

    #[test]
    fn red_difference_ignores_other_channels() {
        let a = RgbaImage::from_pixel(2, 2, Rgba([10, 0, 0, 255]));
        let b = RgbaImage::from_pixel(2, 2, Rgba([4, 200, 90, 0]));
        assert_eq!(red_difference(&a, &b), 24);
    }
}
