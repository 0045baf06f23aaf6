//! Per-pixel color filters.

use image::RgbaImage;
#[cfg(feature = "rayon")]
use rayon::prelude::*;

use super::{ColorFilter, to_channel};

/// Geometry shared by every pixel of one raster; only the vignette uses it.
#[derive(Clone, Copy)]
struct Frame {
    center_x: f32,
    center_y: f32,
    max_distance: f32,
}

pub(super) fn apply(raster: &RgbaImage, filter: ColorFilter) -> RgbaImage {
    let mut output = raster.clone();
    let width = output.width() as usize;
    if width == 0 || output.height() == 0 {
        return output;
    }

    let center_x = output.width() as f32 / 2.0;
    let center_y = output.height() as f32 / 2.0;
    let frame = Frame {
        center_x,
        center_y,
        max_distance: (center_x * center_x + center_y * center_y).sqrt(),
    };

    let row_bytes = width * 4;
    let buffer: &mut [u8] = &mut output;

    #[cfg(feature = "rayon")]
    let rows = buffer.par_chunks_mut(row_bytes);
    #[cfg(not(feature = "rayon"))]
    let rows = buffer.chunks_mut(row_bytes);

    rows.enumerate().for_each(|(y, row)| {
        for (x, pixel) in row.chunks_exact_mut(4).enumerate() {
            let rgb = [pixel[0] as f32, pixel[1] as f32, pixel[2] as f32];
            let [r, g, b] = filter_pixel(filter, rgb, x as f32, y as f32, frame);
            pixel[0] = to_channel(r);
            pixel[1] = to_channel(g);
            pixel[2] = to_channel(b);
        }
    });

    output
}

fn filter_pixel(filter: ColorFilter, [r, g, b]: [f32; 3], x: f32, y: f32, frame: Frame) -> [f32; 3] {
    match filter {
        ColorFilter::Grayscale => {
            let average = (r + g + b) / 3.0;
            [average; 3]
        }
        ColorFilter::Sepia => [
            r * 0.393 + g * 0.769 + b * 0.189,
            r * 0.349 + g * 0.686 + b * 0.168,
            r * 0.272 + g * 0.534 + b * 0.131,
        ],
        ColorFilter::Invert => [255.0 - r, 255.0 - g, 255.0 - b],
        ColorFilter::ContrastBoost => [r * 1.2 - 30.0, g * 1.2 - 30.0, b * 1.2 - 30.0],
        ColorFilter::NightBlue => [r * 0.5, g * 0.7, b * 1.3],
        ColorFilter::WarmVintage => [r + 30.0, g + 15.0, b - 20.0],
        ColorFilter::CoolMood => [r - 25.0, g - 10.0, b + 35.0],
        ColorFilter::HdrSim => {
            const BOOST: f32 = 1.1;
            const SATURATION: f32 = 1.15;
            let luminance = (r + g + b) / 3.0;
            let offset = luminance * (1.0 - SATURATION) * 0.5;
            [
                r * BOOST * SATURATION + offset,
                g * BOOST * SATURATION + offset,
                b * BOOST * SATURATION + offset,
            ]
        }
        ColorFilter::Lomo => [r * 1.3, g * 1.3, b * 1.3],
        ColorFilter::Vignette => {
            let dx = x - frame.center_x;
            let dy = y - frame.center_y;
            let distance = (dx * dx + dy * dy).sqrt();
            let factor = 1.0 - (distance / frame.max_distance) * 0.6;
            [r * factor, g * factor, b * factor]
        }
    }
}

#[cfg(test)]
mod tests {
    use image::Rgba;

    use super::*;

    fn single(rgb: [u8; 3]) -> RgbaImage {
        RgbaImage::from_pixel(1, 1, Rgba([rgb[0], rgb[1], rgb[2], 77]))
    }

    fn filtered(filter: ColorFilter, rgb: [u8; 3]) -> [u8; 4] {
        apply(&single(rgb), filter).get_pixel(0, 0).0
    }

    #[test]
    fn grayscale_averages_channels() {
        assert_eq!(filtered(ColorFilter::Grayscale, [10, 20, 60]), [30, 30, 30, 77]);
    }

    #[test]
    fn sepia_saturates_instead_of_wrapping() {
        assert_eq!(filtered(ColorFilter::Sepia, [255, 255, 255]), [255, 255, 239, 77]);
    }

    #[test]
    fn contrast_boost_clamps_low_end() {
        assert_eq!(filtered(ColorFilter::ContrastBoost, [10, 100, 250]), [0, 90, 255, 77]);
    }

    #[test]
    fn tints_shift_channels() {
        assert_eq!(filtered(ColorFilter::WarmVintage, [240, 100, 10]), [255, 115, 0, 77]);
        assert_eq!(filtered(ColorFilter::CoolMood, [20, 100, 230]), [0, 90, 255, 77]);
        assert_eq!(filtered(ColorFilter::NightBlue, [100, 100, 100]), [50, 70, 130, 77]);
    }

    #[test]
    fn hdr_sim_matches_formula() {
        // lum = 100, offset = 100 * -0.15 * 0.5 = -7.5, gain = 1.265
        assert_eq!(filtered(ColorFilter::HdrSim, [100, 100, 100]), [119, 119, 119, 77]);
    }

    #[test]
    fn vignette_darkens_corners_more_than_center() {
        let raster = RgbaImage::from_pixel(9, 9, Rgba([200, 200, 200, 255]));
        let output = apply(&raster, ColorFilter::Vignette);
        let corner = output.get_pixel(0, 0).0[0];
        let center = output.get_pixel(4, 4).0[0];
        assert!(corner < center, "corner {corner} center {center}");
    }

    #[test]
    fn alpha_is_preserved() {
        for filter in ColorFilter::ALL {
            assert_eq!(filtered(filter, [12, 34, 56])[3], 77, "{filter}");
        }
    }
}
