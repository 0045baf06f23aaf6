//! Color timeline, mood temperature and palette report.

use std::fmt::{Display, Formatter, Result as FmtResult};
use std::time::Duration;

use image::RgbaImage;
use serde_json::{Value, json};

use super::palette::{PaletteCluster, kmeans};
use crate::configuration::PipelineOptions;
use crate::error::PipelineError;
use crate::media::MediaBackend;
use crate::progress::{OperationType, ProgressReporter};
use crate::source::FrameSource;

/// Samples taken across the source by default.
pub const DEFAULT_SAMPLE_COUNT: usize = 40;
/// Palette size by default.
pub const DEFAULT_PALETTE_SIZE: usize = 5;
/// Only every `POOL_STRIDE`-th pixel of a sample is pooled.
pub const POOL_STRIDE: usize = 20;

/// Perceived mood temperature of a color.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Temperature {
    /// Luma below 80.
    Cold,
    /// Luma from 80 up to 150.
    Neutral,
    /// Luma of 150 and above.
    Warm,
}

impl Temperature {
    /// Classify by luma `0.3 r + 0.59 g + 0.11 b`.
    pub fn from_rgb([r, g, b]: [u8; 3]) -> Self {
        let luma = r as f64 * 0.3 + g as f64 * 0.59 + b as f64 * 0.11;
        if luma < 80.0 {
            Temperature::Cold
        } else if luma < 150.0 {
            Temperature::Neutral
        } else {
            Temperature::Warm
        }
    }

    /// Lowercase label.
    pub fn label(self) -> &'static str {
        match self {
            Temperature::Cold => "cold",
            Temperature::Neutral => "neutral",
            Temperature::Warm => "warm",
        }
    }
}

impl Display for Temperature {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.write_str(self.label())
    }
}

/// Per-sample color summary.
#[derive(Debug, Clone, PartialEq)]
pub struct TimelineEntry {
    /// Playback position of the sample.
    pub timestamp: Duration,
    /// Mean color of the pooled pixels, truncated to integers.
    pub color: [u8; 3],
    /// Mean of `(r + g + b) / 3` over the pooled pixels.
    pub brightness: f64,
    /// Mean of `(max - min) / max(1, max)` over the pooled pixels.
    pub saturation: f64,
}

/// Result of a color analysis.
#[derive(Debug, Clone, PartialEq)]
pub struct ColorReport {
    /// Mean color of the last sample.
    pub dominant_color: [u8; 3],
    /// Temperature of the dominant color.
    pub temperature: Temperature,
    /// Mean brightness over the timeline.
    pub mean_brightness: f64,
    /// Mean saturation over the timeline.
    pub mean_saturation: f64,
    /// k-means palette over all pooled pixels, in initialization order.
    pub palette: Vec<PaletteCluster>,
    /// One entry per sample, in time order.
    pub timeline: Vec<TimelineEntry>,
}

impl ColorReport {
    /// Render the report as JSON.
    pub fn to_json(&self) -> Value {
        json!({
            "dominant_color": {
                "rgb": self.dominant_color,
                "hex": to_hex(self.dominant_color),
            },
            "temperature": self.temperature.label(),
            "mean_brightness": self.mean_brightness,
            "mean_saturation": self.mean_saturation,
            "palette": self.palette.iter().map(|cluster| json!({
                "rgb": cluster.rgb(),
                "hex": to_hex(cluster.rgb()),
                "members": cluster.member_count,
            })).collect::<Vec<_>>(),
            "timeline": self.timeline.iter().map(|entry| json!({
                "timestamp": entry.timestamp.as_secs_f64(),
                "rgb": entry.color,
                "hex": to_hex(entry.color),
                "brightness": entry.brightness,
                "saturation": entry.saturation,
            })).collect::<Vec<_>>(),
        })
    }
}

/// Format a color as `#rrggbb`.
pub fn to_hex([r, g, b]: [u8; 3]) -> String {
    format!("#{r:02x}{g:02x}{b:02x}")
}

/// Sample times for `count` evenly spaced samples: `(duration / count) * i`.
pub fn sample_times(duration: Duration, count: usize) -> Vec<Duration> {
    if count == 0 {
        return Vec::new();
    }
    let interval = duration.as_secs_f64() / count as f64;
    (0..count)
        .map(|index| Duration::from_secs_f64(interval * index as f64))
        .collect()
}

/// Summarize one sample: pool every [`POOL_STRIDE`]-th pixel into `pool`
/// and return the timeline entry for it.
pub fn summarize_sample(
    timestamp: Duration,
    raster: &RgbaImage,
    pool: &mut Vec<[u8; 3]>,
) -> TimelineEntry {
    let mut sums = [0u64; 3];
    let mut brightness = 0.0f64;
    let mut saturation = 0.0f64;
    let mut pooled = 0usize;

    for pixel in raster.pixels().step_by(POOL_STRIDE) {
        let [r, g, b, _] = pixel.0;
        sums[0] += r as u64;
        sums[1] += g as u64;
        sums[2] += b as u64;
        brightness += (r as f64 + g as f64 + b as f64) / 3.0;
        let max = r.max(g).max(b) as f64;
        let min = r.min(g).min(b) as f64;
        saturation += (max - min) / max.max(1.0);
        pool.push([r, g, b]);
        pooled += 1;
    }

    if pooled == 0 {
        return TimelineEntry {
            timestamp,
            color: [0; 3],
            brightness: 0.0,
            saturation: 0.0,
        };
    }

    TimelineEntry {
        timestamp,
        color: sums.map(|sum| (sum / pooled as u64) as u8),
        brightness: brightness / pooled as f64,
        saturation: saturation / pooled as f64,
    }
}

/// Build a report from a finished timeline and pooled colors.
pub fn build_report(
    timeline: Vec<TimelineEntry>,
    pool: &[[u8; 3]],
    palette_size: usize,
) -> Result<ColorReport, PipelineError> {
    let last = timeline
        .last()
        .ok_or_else(|| PipelineError::Validation("color analysis needs at least one sample".to_string()))?;
    let dominant_color = last.color;
    let count = timeline.len() as f64;

    Ok(ColorReport {
        dominant_color,
        temperature: Temperature::from_rgb(dominant_color),
        mean_brightness: timeline.iter().map(|entry| entry.brightness).sum::<f64>() / count,
        mean_saturation: timeline.iter().map(|entry| entry.saturation).sum::<f64>() / count,
        palette: kmeans(pool, palette_size),
        timeline,
    })
}

/// Sample the source `samples` times and analyze its colors.
///
/// # Errors
///
/// [`PipelineError::Validation`] if `samples` or `palette_size` is zero;
/// any seek error from the source.
pub fn analyze_colors<B: MediaBackend>(
    source: &mut FrameSource<B>,
    samples: usize,
    palette_size: usize,
    options: &PipelineOptions,
) -> Result<ColorReport, PipelineError> {
    let reporter = options.reporter();
    let result = analyze_colors_with(source, samples, palette_size, options, &reporter, (0.0, 100.0));
    reporter.settle();
    result
}

pub(crate) fn analyze_colors_with<B: MediaBackend>(
    source: &mut FrameSource<B>,
    samples: usize,
    palette_size: usize,
    options: &PipelineOptions,
    reporter: &ProgressReporter,
    (from, to): (f32, f32),
) -> Result<ColorReport, PipelineError> {
    if samples == 0 {
        return Err(PipelineError::Validation("sample count must be at least 1".to_string()));
    }
    if palette_size == 0 {
        return Err(PipelineError::Validation("palette size must be at least 1".to_string()));
    }

    let times = sample_times(source.duration(), samples);
    let mut timeline = Vec::with_capacity(samples);
    let mut pool = Vec::new();

    reporter.stage(OperationType::ColorAnalysis, from, to, "Extracting frames");
    for (index, &time) in times.iter().enumerate() {
        if options.is_cancelled() {
            return Err(PipelineError::Cancelled);
        }
        let sample = source.seek_and_sample(time)?;
        timeline.push(summarize_sample(sample.timestamp, &sample.raster, &mut pool));
        reporter.advance(
            index as u64 + 1,
            samples as u64,
            &format!("Analyzing frames: {} of {}", index + 1, samples),
        );
    }

    log::debug!("Pooled {} colors from {} samples", pool.len(), timeline.len());
    build_report(timeline, &pool, palette_size)
}
