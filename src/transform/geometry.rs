//! Rotation, cropping and zoom.

use image::RgbaImage;
use image::imageops::{self, FilterType};

use super::Rotation;
use crate::error::PipelineError;

pub(super) fn rotate(raster: &RgbaImage, rotation: Rotation) -> RgbaImage {
    match rotation {
        Rotation::Deg90 => imageops::rotate90(raster),
        Rotation::Deg180 => imageops::rotate180(raster),
        Rotation::Deg270 => imageops::rotate270(raster),
    }
}

/// Compute the centered full-height crop window for a `ratio` (width /
/// height) on a `width` x `height` source.
///
/// Returns `(sx, crop_width)`: the left edge of the window and its width.
/// The crop width is `height * ratio` rounded to the nearest pixel, so a
/// 1920x1080 source cropped to 9:16 yields a 608 pixel wide window starting
/// at x = 656.
///
/// # Errors
///
/// [`PipelineError::Validation`] if the source is not landscape (aspect
/// ratio <= 1), if `ratio` is not a positive finite number, or if the
/// window would be wider than the source.
pub fn center_crop_window(width: u32, height: u32, ratio: f64) -> Result<(u32, u32), PipelineError> {
    if !(ratio.is_finite() && ratio > 0.0) {
        return Err(PipelineError::Validation(format!(
            "crop ratio must be positive, got {ratio}"
        )));
    }
    if width <= height {
        return Err(PipelineError::Validation(format!(
            "center crop needs a landscape source, got {width}x{height}"
        )));
    }

    let crop_width = (height as f64 * ratio).round() as u32;
    if crop_width == 0 || crop_width > width {
        return Err(PipelineError::Validation(format!(
            "crop ratio {ratio:.4} does not fit a {width}x{height} source"
        )));
    }

    Ok(((width - crop_width) / 2, crop_width))
}

pub(super) fn center_crop(raster: &RgbaImage, ratio: f64) -> Result<RgbaImage, PipelineError> {
    let (sx, crop_width) = center_crop_window(raster.width(), raster.height(), ratio)?;
    Ok(imageops::crop_imm(raster, sx, 0, crop_width, raster.height()).to_image())
}

/// Scale the raster up around its center by `factor`, keeping its size.
pub(super) fn zoom(raster: &RgbaImage, factor: f32) -> RgbaImage {
    let (width, height) = raster.dimensions();
    if factor <= 1.0 || width == 0 || height == 0 {
        return raster.clone();
    }

    let window_width = ((width as f32 / factor).round() as u32).clamp(1, width);
    let window_height = ((height as f32 / factor).round() as u32).clamp(1, height);
    if (window_width, window_height) == (width, height) {
        return raster.clone();
    }

    let window = imageops::crop_imm(
        raster,
        (width - window_width) / 2,
        (height - window_height) / 2,
        window_width,
        window_height,
    )
    .to_image();
    imageops::resize(&window, width, height, FilterType::Triangle)
}

#[cfg(test)]
mod tests {
    use image::Rgba;

    use super::*;

    #[test]
    fn vertical_crop_of_full_hd() {
        assert_eq!(center_crop_window(1920, 1080, 9.0 / 16.0).unwrap(), (656, 608));
    }

    #[test]
    fn portrait_and_square_sources_are_rejected() {
        assert!(center_crop_window(1080, 1920, 9.0 / 16.0).is_err());
        assert!(center_crop_window(720, 720, 9.0 / 16.0).is_err());
    }

    #[test]
    fn oversized_window_is_rejected() {
        assert!(center_crop_window(400, 300, 2.0).is_err());
        assert!(center_crop_window(400, 300, f64::NAN).is_err());
    }

    #[test]
    fn rotate90_is_clockwise() {
        let mut raster = RgbaImage::new(3, 2);
        raster.put_pixel(0, 0, Rgba([255, 0, 0, 255]));
        let rotated = rotate(&raster, Rotation::Deg90);
        assert_eq!(rotated.dimensions(), (2, 3));
        // Top-left moves to top-right.
        assert_eq!(rotated.get_pixel(1, 0), &Rgba([255, 0, 0, 255]));
    }

    #[test]
    fn zoom_keeps_dimensions_and_magnifies_center() {
        let raster = RgbaImage::from_fn(40, 20, |x, _| {
            if (15..25).contains(&x) {
                Rgba([255, 255, 255, 255])
            } else {
                Rgba([0, 0, 0, 255])
            }
        });
        let zoomed = zoom(&raster, 2.0);
        assert_eq!(zoomed.dimensions(), (40, 20));
        let white = |image: &RgbaImage| image.pixels().filter(|p| p.0[0] > 128).count();
        assert!(white(&zoomed) > white(&raster));
    }
}
