//! Subtitle cues and burn-in overlay.

use std::time::Duration;

use image::RgbaImage;
use serde_json::Value;

use super::font::{self, GLYPH_HEIGHT, GLYPH_SPACING, GLYPH_WIDTH};
use super::to_channel;
use crate::error::PipelineError;

/// How long a cue stays on screen after its start time.
pub const CUE_WINDOW: Duration = Duration::from_secs(3);

/// Band height relative to the raster height.
const BAND_FRACTION: f32 = 0.125;
/// Opacity of the black band.
const BAND_ALPHA: f32 = 0.65;
/// Glyph height relative to the band height.
const TEXT_FRACTION: f32 = 0.42;

/// A timestamped text annotation.
///
/// A cue is active over `[start, start + 3s)`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubtitleCue {
    /// When the cue appears.
    pub start: Duration,
    /// Text to draw.
    pub text: String,
}

impl SubtitleCue {
    /// Create a cue.
    pub fn new(start: Duration, text: impl Into<String>) -> Self {
        Self {
            start,
            text: text.into(),
        }
    }

    /// Whether the cue is on screen at `time`.
    pub fn is_active_at(&self, time: Duration) -> bool {
        time >= self.start && time < self.start + CUE_WINDOW
    }

    /// Parse a JSON array of `{"time": seconds, "text": "..."}` objects, the
    /// shape transcription services return.
    ///
    /// Declaration order is preserved; overlapping cues are allowed.
    pub fn list_from_json(json: &str) -> Result<Vec<SubtitleCue>, PipelineError> {
        let value: Value = serde_json::from_str(json)
            .map_err(|error| PipelineError::Validation(format!("invalid cue list: {error}")))?;
        let entries = value
            .as_array()
            .ok_or_else(|| PipelineError::Validation("cue list must be a JSON array".to_string()))?;

        entries
            .iter()
            .enumerate()
            .map(|(index, entry)| {
                let time = entry
                    .get("time")
                    .and_then(Value::as_f64)
                    .filter(|time| time.is_finite() && *time >= 0.0)
                    .ok_or_else(|| {
                        PipelineError::Validation(format!("cue {index} has no valid 'time'"))
                    })?;
                let text = entry.get("text").and_then(Value::as_str).ok_or_else(|| {
                    PipelineError::Validation(format!("cue {index} has no 'text'"))
                })?;
                Ok(SubtitleCue::new(Duration::from_secs_f64(time), text))
            })
            .collect()
    }
}

/// The cue shown at `time`: the first active cue in declaration order.
pub fn active_cue(cues: &[SubtitleCue], time: Duration) -> Option<&SubtitleCue> {
    cues.iter().find(|cue| cue.is_active_at(time))
}

pub(super) fn overlay(raster: &RgbaImage, cues: &[SubtitleCue], time: Duration) -> RgbaImage {
    let mut output = raster.clone();
    let Some(cue) = active_cue(cues, time) else {
        return output;
    };
    let (width, height) = output.dimensions();
    if width == 0 || height == 0 {
        return output;
    }

    let band_height = ((height as f32 * BAND_FRACTION).round() as u32).clamp(1, height);
    let band_top = height - band_height;
    for y in band_top..height {
        for x in 0..width {
            let pixel = output.get_pixel_mut(x, y);
            for channel in &mut pixel.0[..3] {
                *channel = to_channel(*channel as f32 * (1.0 - BAND_ALPHA));
            }
        }
    }

    let text = cue.text.trim();
    let unscaled_width = font::text_width(text);
    if unscaled_width == 0 {
        return output;
    }

    let mut scale =
        ((band_height as f32 * TEXT_FRACTION / GLYPH_HEIGHT as f32).round() as u32).max(1);
    while scale > 1 && unscaled_width * scale > width {
        scale -= 1;
    }

    let left = (width as i64 - (unscaled_width * scale) as i64) / 2;
    let top = band_top as i64 + (band_height as i64 - (GLYPH_HEIGHT * scale) as i64) / 2;
    let advance = ((GLYPH_WIDTH + GLYPH_SPACING) * scale) as i64;

    for (index, character) in text.chars().enumerate() {
        let origin_x = left + index as i64 * advance;
        for (column, bits) in font::glyph(character).iter().enumerate() {
            for row in 0..GLYPH_HEIGHT {
                if bits >> row & 1 == 0 {
                    continue;
                }
                fill_block(
                    &mut output,
                    origin_x + column as i64 * scale as i64,
                    top + (row * scale) as i64,
                    scale,
                );
            }
        }
    }

    output
}

/// Paint a `size` x `size` white block, clipped to the raster.
fn fill_block(raster: &mut RgbaImage, x: i64, y: i64, size: u32) {
    let (width, height) = raster.dimensions();
    for dy in 0..size as i64 {
        for dx in 0..size as i64 {
            let (px, py) = (x + dx, y + dy);
            if px < 0 || py < 0 || px >= width as i64 || py >= height as i64 {
                continue;
            }
            let pixel = raster.get_pixel_mut(px as u32, py as u32);
            pixel.0[0] = 255;
            pixel.0[1] = 255;
            pixel.0[2] = 255;
        }
    }
}

#[cfg(test)]
mod tests {
    use image::Rgba;

    use super::*;

    fn secs(value: f64) -> Duration {
        Duration::from_secs_f64(value)
    }

    #[test]
    fn window_is_half_open() {
        let cue = SubtitleCue::new(secs(2.0), "hola");
        assert!(!cue.is_active_at(secs(1.99)));
        assert!(cue.is_active_at(secs(2.0)));
        assert!(cue.is_active_at(secs(4.99)));
        assert!(!cue.is_active_at(secs(5.0)));
    }

    #[test]
    fn first_declared_cue_wins_overlap() {
        let cues = vec![
            SubtitleCue::new(secs(2.0), "first"),
            SubtitleCue::new(secs(3.0), "second"),
        ];
        assert_eq!(active_cue(&cues, secs(3.5)).unwrap().text, "first");
        assert_eq!(active_cue(&cues, secs(5.5)).unwrap().text, "second");
        assert!(active_cue(&cues, secs(6.0)).is_none());
    }

    #[test]
    fn band_darkens_bottom_only() {
        let raster = RgbaImage::from_pixel(64, 80, Rgba([200, 100, 40, 255]));
        let cues = vec![SubtitleCue::new(Duration::ZERO, " ")];
        let output = overlay(&raster, &cues, secs(1.0));
        assert_eq!(output.get_pixel(0, 0), &Rgba([200, 100, 40, 255]));
        // 200 * 0.35 = 70, 100 * 0.35 = 35, 40 * 0.35 = 14
        assert_eq!(output.get_pixel(0, 79), &Rgba([70, 35, 14, 255]));
        assert_eq!(output.get_pixel(0, 70), &Rgba([70, 35, 14, 255]));
        assert_eq!(output.get_pixel(0, 69), &Rgba([200, 100, 40, 255]));
    }

    #[test]
    fn text_is_drawn_in_white_inside_band() {
        let raster = RgbaImage::from_pixel(320, 240, Rgba([0, 0, 0, 255]));
        let cues = vec![SubtitleCue::new(Duration::ZERO, "Hola")];
        let output = overlay(&raster, &cues, Duration::ZERO);
        let white: Vec<(u32, u32)> = output
            .enumerate_pixels()
            .filter(|(_, _, pixel)| pixel.0[0] == 255)
            .map(|(x, y, _)| (x, y))
            .collect();
        assert!(!white.is_empty());
        assert!(white.iter().all(|&(_, y)| y >= 210));
    }

    #[test]
    fn inactive_time_leaves_raster_untouched() {
        let raster = RgbaImage::from_pixel(16, 16, Rgba([9, 9, 9, 255]));
        let cues = vec![SubtitleCue::new(secs(10.0), "later")];
        assert_eq!(overlay(&raster, &cues, secs(1.0)), raster);
    }

    #[test]
    fn cues_parse_from_json() {
        let cues = SubtitleCue::list_from_json(
            r#"[{"time": 0.5, "text": "uno"}, {"time": 4, "text": "dos"}]"#,
        )
        .unwrap();
        assert_eq!(cues.len(), 2);
        assert_eq!(cues[1], SubtitleCue::new(secs(4.0), "dos"));
        assert!(SubtitleCue::list_from_json(r#"[{"text": "sin tiempo"}]"#).is_err());
    }
}
