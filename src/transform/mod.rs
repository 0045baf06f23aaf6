//! Pixel Transform Library.
//!
//! Pure raster-to-raster functions selected by a closed [`TransformSpec`]
//! variant: color filters, geometric transforms, center cropping, zoom,
//! and subtitle overlay.
//!
//! Color filters and zoom preserve the raster's dimensions. Rotating by 90
//! or 270 degrees swaps width and height, and
//! [`CenterCropAspect`](TransformSpec::CenterCropAspect) narrows the width.
//! Channel arithmetic runs in `f32` and is clamped to `0..=255` and rounded
//! before write-back; alpha is never modified.
//!
//! # Example
//!
//! ```
//! use clipsmith::transform::{self, ColorFilter, TransformSpec};
//! use image::{Rgba, RgbaImage};
//!
//! let raster = RgbaImage::from_pixel(4, 2, Rgba([10, 200, 30, 255]));
//! let inverted = transform::apply(&raster, &TransformSpec::Color(ColorFilter::Invert))?;
//! assert_eq!(inverted.get_pixel(0, 0), &Rgba([245, 55, 225, 255]));
//! # Ok::<(), clipsmith::PipelineError>(())
//! ```

mod color;
mod font;
mod geometry;
mod subtitle;

use std::fmt::{Display, Formatter, Result as FmtResult};
use std::str::FromStr;
use std::time::Duration;

use image::RgbaImage;

use crate::error::PipelineError;

pub use geometry::center_crop_window;
pub use subtitle::{CUE_WINDOW, SubtitleCue, active_cue};

/// Per-pixel color filters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ColorFilter {
    /// Channel average.
    Grayscale,
    /// Classic sepia matrix.
    Sepia,
    /// `255 - c` per channel.
    Invert,
    /// `c * 1.2 - 30` per channel.
    ContrastBoost,
    /// Cooled, darkened night look.
    NightBlue,
    /// Red/green lift with reduced blue.
    WarmVintage,
    /// Reduced red/green with lifted blue.
    CoolMood,
    /// Simulated local-contrast boost.
    HdrSim,
    /// Saturated high-contrast look.
    Lomo,
    /// Edges darkened by distance from the center.
    Vignette,
}

impl ColorFilter {
    /// Every filter, in menu order.
    pub const ALL: [ColorFilter; 10] = [
        ColorFilter::Grayscale,
        ColorFilter::Sepia,
        ColorFilter::Invert,
        ColorFilter::ContrastBoost,
        ColorFilter::NightBlue,
        ColorFilter::WarmVintage,
        ColorFilter::CoolMood,
        ColorFilter::HdrSim,
        ColorFilter::Lomo,
        ColorFilter::Vignette,
    ];

    /// Kebab-case name, as accepted by [`FromStr`].
    pub fn name(self) -> &'static str {
        match self {
            ColorFilter::Grayscale => "grayscale",
            ColorFilter::Sepia => "sepia",
            ColorFilter::Invert => "invert",
            ColorFilter::ContrastBoost => "contrast-boost",
            ColorFilter::NightBlue => "night-blue",
            ColorFilter::WarmVintage => "warm-vintage",
            ColorFilter::CoolMood => "cool-mood",
            ColorFilter::HdrSim => "hdr-sim",
            ColorFilter::Lomo => "lomo",
            ColorFilter::Vignette => "vignette",
        }
    }
}

impl Display for ColorFilter {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.write_str(self.name())
    }
}

impl FromStr for ColorFilter {
    type Err = PipelineError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let normalized = value.trim().to_ascii_lowercase().replace('_', "-");
        ColorFilter::ALL
            .into_iter()
            .find(|filter| filter.name() == normalized)
            .ok_or_else(|| PipelineError::Validation(format!("unknown color filter '{value}'")))
    }
}

/// Clockwise rotation amounts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Rotation {
    /// 90 degrees clockwise. Swaps width and height.
    Deg90,
    /// 180 degrees.
    Deg180,
    /// 270 degrees clockwise. Swaps width and height.
    Deg270,
}

impl Rotation {
    /// Parse a rotation from its angle in degrees.
    pub fn from_degrees(degrees: u32) -> Result<Self, PipelineError> {
        match degrees {
            90 => Ok(Rotation::Deg90),
            180 => Ok(Rotation::Deg180),
            270 => Ok(Rotation::Deg270),
            other => Err(PipelineError::Validation(format!(
                "rotation must be 90, 180 or 270 degrees, got {other}"
            ))),
        }
    }

    /// Whether this rotation swaps width and height.
    pub fn swaps_dimensions(self) -> bool {
        matches!(self, Rotation::Deg90 | Rotation::Deg270)
    }
}

/// A pure, named per-raster transformation.
#[derive(Debug, Clone, PartialEq)]
pub enum TransformSpec {
    /// A per-pixel color filter.
    Color(ColorFilter),
    /// Clockwise rotation.
    Rotate(Rotation),
    /// Mirror left to right.
    FlipHorizontal,
    /// Mirror top to bottom.
    FlipVertical,
    /// Crop a centered full-height window of the given width/height ratio.
    CenterCropAspect(f64),
    /// Draw the active cue in a translucent band at the bottom.
    SubtitleOverlay(Vec<SubtitleCue>),
    /// Centered scale-up by a constant factor `>= 1`.
    Zoom(f32),
    /// Zoom growing linearly from 1 to `max` over the frame budget.
    ProgressiveZoom {
        /// Zoom factor reached at the end of the budget.
        max: f32,
    },
}

/// Per-frame information available to time-dependent transforms.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FrameContext {
    /// Playback position of the frame.
    pub timestamp: Duration,
    /// Zero-based index of the frame within the session.
    pub frame_index: u64,
    /// Total frames the session will push, when bounded.
    pub frame_budget: Option<u64>,
}

impl FrameContext {
    /// Context for a still raster at `timestamp`.
    pub fn at(timestamp: Duration) -> Self {
        Self {
            timestamp,
            ..Self::default()
        }
    }
}

impl TransformSpec {
    /// Dimensions of the raster this transform produces from a
    /// `width` x `height` input.
    ///
    /// # Errors
    ///
    /// [`PipelineError::Validation`] if the transform cannot be applied to
    /// rasters of this size.
    pub fn output_size(&self, width: u32, height: u32) -> Result<(u32, u32), PipelineError> {
        match self {
            TransformSpec::Rotate(rotation) if rotation.swaps_dimensions() => Ok((height, width)),
            TransformSpec::CenterCropAspect(ratio) => {
                let (_, crop_width) = center_crop_window(width, height, *ratio)?;
                Ok((crop_width, height))
            }
            TransformSpec::Zoom(factor) if !(factor.is_finite() && *factor >= 1.0) => Err(
                PipelineError::Validation(format!("zoom factor must be >= 1, got {factor}")),
            ),
            TransformSpec::ProgressiveZoom { max } if !(max.is_finite() && *max >= 1.0) => Err(
                PipelineError::Validation(format!("zoom factor must be >= 1, got {max}")),
            ),
            _ => Ok((width, height)),
        }
    }

    /// Apply this transform to one frame.
    pub fn apply(
        &self,
        raster: &RgbaImage,
        context: &FrameContext,
    ) -> Result<RgbaImage, PipelineError> {
        match self {
            TransformSpec::Color(filter) => Ok(color::apply(raster, *filter)),
            TransformSpec::Rotate(rotation) => Ok(geometry::rotate(raster, *rotation)),
            TransformSpec::FlipHorizontal => Ok(image::imageops::flip_horizontal(raster)),
            TransformSpec::FlipVertical => Ok(image::imageops::flip_vertical(raster)),
            TransformSpec::CenterCropAspect(ratio) => geometry::center_crop(raster, *ratio),
            TransformSpec::SubtitleOverlay(cues) => {
                Ok(subtitle::overlay(raster, cues, context.timestamp))
            }
            TransformSpec::Zoom(factor) => {
                self.output_size(raster.width(), raster.height())?;
                Ok(geometry::zoom(raster, *factor))
            }
            TransformSpec::ProgressiveZoom { max } => {
                self.output_size(raster.width(), raster.height())?;
                let progress = match context.frame_budget {
                    Some(budget) if budget > 0 => {
                        (context.frame_index as f32 / budget as f32).min(1.0)
                    }
                    _ => 0.0,
                };
                Ok(geometry::zoom(raster, 1.0 + progress * (max - 1.0)))
            }
        }
    }
}

/// Apply `spec` to a still raster.
///
/// Equivalent to [`TransformSpec::apply`] with a default [`FrameContext`]
/// (timestamp zero, first frame, no budget).
pub fn apply(raster: &RgbaImage, spec: &TransformSpec) -> Result<RgbaImage, PipelineError> {
    spec.apply(raster, &FrameContext::default())
}

/// Clamp a channel value to `0..=255` and round it.
#[inline]
pub(crate) fn to_channel(value: f32) -> u8 {
    value.clamp(0.0, 255.0).round() as u8
}

#[cfg(test)]
mod tests {
    use image::Rgba;

    use super::*;

    #[test]
    fn filter_names_round_trip() {
        for filter in ColorFilter::ALL {
            assert_eq!(filter.name().parse::<ColorFilter>().unwrap(), filter);
        }
        assert_eq!("night_blue".parse::<ColorFilter>().unwrap(), ColorFilter::NightBlue);
        assert!("posterize".parse::<ColorFilter>().is_err());
    }

    #[test]
    fn rotation_from_degrees() {
        assert_eq!(Rotation::from_degrees(90).unwrap(), Rotation::Deg90);
        assert!(Rotation::from_degrees(45).is_err());
    }

    #[test]
    fn output_size_swaps_for_quarter_turns() {
        let spec = TransformSpec::Rotate(Rotation::Deg270);
        assert_eq!(spec.output_size(640, 360).unwrap(), (360, 640));
        let spec = TransformSpec::Rotate(Rotation::Deg180);
        assert_eq!(spec.output_size(640, 360).unwrap(), (640, 360));
    }

    #[test]
    fn progressive_zoom_starts_at_identity() {
        let raster = RgbaImage::from_fn(8, 8, |x, y| Rgba([(x * 30) as u8, (y * 30) as u8, 0, 255]));
        let spec = TransformSpec::ProgressiveZoom { max: 1.12 };
        let context = FrameContext {
            frame_budget: Some(120),
            ..FrameContext::default()
        };
        assert_eq!(spec.apply(&raster, &context).unwrap(), raster);
    }

    #[test]
    fn zoom_below_one_is_rejected() {
        let raster = RgbaImage::new(4, 4);
        assert!(apply(&raster, &TransformSpec::Zoom(0.5)).is_err());
    }

    #[test]
    fn to_channel_clamps_before_rounding() {
        assert_eq!(to_channel(-12.0), 0);
        assert_eq!(to_channel(300.7), 255);
        assert_eq!(to_channel(127.5), 128);
    }
}
