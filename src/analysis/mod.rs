//! Analysis Engine: motion scoring and color clustering over sampled rasters.
//!
//! - [`find_best_start`] scans the start of a source for the moment with the
//!   most motion, comparing quarter-scale frames 0.35 s apart.
//! - [`kmeans`] extracts a fixed-iteration k-means palette.
//! - [`analyze_colors`] samples a source evenly and builds a
//!   [`ColorReport`]: dominant color, temperature, mean brightness and
//!   saturation, palette, and a per-sample timeline.
//!
//! # Example
//!
//! ```
//! use std::time::Duration;
//!
//! use clipsmith::analysis::{self, Temperature};
//! use clipsmith::synthetic::SyntheticSource;
//! use clipsmith::{FrameSource, PipelineOptions};
//!
//! let backend = SyntheticSource::solid(64, 36, 10.0, Duration::from_secs(4), [20, 30, 200]);
//! let mut source = FrameSource::open(backend)?;
//! let report = analysis::analyze_colors(&mut source, 8, 3, &PipelineOptions::new())?;
//!
//! assert_eq!(report.timeline.len(), 8);
//! assert_eq!(report.dominant_color, [20, 30, 200]);
//! assert_eq!(report.temperature, Temperature::Cold);
//! # Ok::<(), clipsmith::PipelineError>(())
//! ```

mod color;
mod motion;
mod palette;

pub use color::{
    ColorReport, DEFAULT_PALETTE_SIZE, DEFAULT_SAMPLE_COUNT, POOL_STRIDE, Temperature,
    TimelineEntry, analyze_colors, build_report, sample_times, summarize_sample, to_hex,
};
pub use motion::{
    CutPoint, MOTION_OFFSET, MOTION_SCALE, find_best_start, motion_score, red_difference,
    search_times, smart_duration,
};
pub use palette::{KMEANS_ITERATIONS, PaletteCluster, kmeans};

pub(crate) use color::analyze_colors_with;
pub(crate) use motion::find_best_start_with;
