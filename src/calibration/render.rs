//! Diagnostic images
//!
//! Maps are written as 8-bit PNGs through the `image` crate. Array indexing
//! is [row, col] = [y, x] with (height, width) dimensions; image pixels are
//! addressed (x, y), so every conversion swaps the order.
//!
//! Curves and histograms are not drawn here; the steps export their series
//! as JSON next to the images.

use std::path::Path;

use image::{GrayImage, Luma, Rgb, RgbImage};
use ndarray::{Array2, Array3, ArrayView2, ArrayView3, Axis};

use crate::calibration::common::error::{CalibrationError, Result};
use crate::calibration::stats::symmetric_percentiles;

/// How values are mapped to grey levels.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Scale {
    /// Linear between explicit limits
    Range(f64, f64),
    /// Linear between the `p` and `100 - p` percentiles of the data
    Percentiles(f64),
}

fn limits(data: ArrayView2<'_, f64>, scale: Scale) -> (f64, f64) {
    match scale {
        Scale::Range(low, high) => (low, high),
        Scale::Percentiles(p) => {
            let values: Vec<f64> = data.iter().copied().filter(|v| v.is_finite()).collect();
            symmetric_percentiles(&values, p)
        }
    }
}

/// Converts a map to 8-bit grey levels. NaNs become black.
pub fn array2_to_gray_image(data: ArrayView2<'_, f64>, scale: Scale) -> GrayImage {
    let (height, width) = data.dim();
    let (low, high) = limits(data, scale);
    let span = if high > low { high - low } else { 1.0 };
    let mut img = GrayImage::new(width as u32, height as u32);
    for ((y, x), &value) in data.indexed_iter() {
        let level = if value.is_finite() {
            (((value - low) / span).clamp(0.0, 1.0) * 255.0).round() as u8
        } else {
            0
        };
        img.put_pixel(x as u32, y as u32, Luma([level]));
    }
    img
}

fn save_image<P: AsRef<Path>>(save: impl FnOnce(&Path) -> image::ImageResult<()>, path: P) -> Result<()> {
    let path = path.as_ref();
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    save(path).map_err(|e| CalibrationError::EncodeError(format!("{}: {}", path.display(), e)))
}

/// Writes a map as a greyscale PNG.
pub fn save_heatmap<P: AsRef<Path>>(data: &Array2<f64>, path: P, scale: Scale) -> Result<()> {
    let img = array2_to_gray_image(data.view(), scale);
    save_image(|p| img.save(p), path)
}

/// Scales data to 8 bits so that `max / boost` maps to 255.
pub fn to_8_bit(data: ArrayView3<'_, f64>, boost: f64) -> Array3<u8> {
    let max = data.iter().copied().filter(|v| v.is_finite()).fold(0.0, f64::max);
    let scale = if max > 0.0 { 255.0 * boost / max } else { 0.0 };
    data.mapv(|v| (v * scale).round().clamp(0.0, 255.0) as u8)
}

/// RGB composite of an RGBG stack: R, mean of both greens, B. The result
/// has shape `(h, w, 3)`.
pub fn rgbg_composite(stack: ArrayView3<'_, f64>) -> Result<Array3<f64>> {
    let (channels, height, width) = stack.dim();
    if channels != 4 {
        return Err(CalibrationError::shape_mismatch(&[4, height, width], stack.shape()));
    }
    Ok(Array3::from_shape_fn((height, width, 3), |(y, x, c)| match c {
        0 => stack[[0, y, x]],
        1 => 0.5 * (stack[[1, y, x]] + stack[[3, y, x]]),
        _ => stack[[2, y, x]],
    }))
}

/// Writes an `(h, w, 3)` array of 8-bit values as an RGB PNG.
pub fn save_rgb<P: AsRef<Path>>(data: &Array3<u8>, path: P) -> Result<()> {
    let (height, width, channels) = data.dim();
    if channels != 3 {
        return Err(CalibrationError::shape_mismatch(&[height, width, 3], data.shape()));
    }
    let mut img = RgbImage::new(width as u32, height as u32);
    for (y, row) in data.axis_iter(Axis(0)).enumerate() {
        for (x, pixel) in row.axis_iter(Axis(0)).enumerate() {
            img.put_pixel(x as u32, y as u32, Rgb([pixel[0], pixel[1], pixel[2]]));
        }
    }
    save_image(|p| img.save(p), path)
}

/// Writes one greyscale PNG per channel of an RGBG stack, named
/// `<stem>_R.png`, `<stem>_G.png`, `<stem>_B.png`, `<stem>_G2.png`.
pub fn save_rgbg_maps(stack: ArrayView3<'_, f64>, folder: &Path, stem: &str, scale: Scale) -> Result<()> {
    for (plane, label) in stack.axis_iter(Axis(0)).zip(["R", "G", "B", "G2"]) {
        let img = array2_to_gray_image(plane, scale);
        save_image(|p| img.save(p), folder.join(format!("{}_{}.png", stem, label)))?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn test_gray_image_orientation_and_scaling() {
        let data = array![[0.0, 1.0, 2.0], [f64::NAN, 4.0, 8.0]];
        let img = array2_to_gray_image(data.view(), Scale::Range(0.0, 4.0));
        assert_eq!(img.dimensions(), (3, 2));
        assert_eq!(img.get_pixel(0, 0)[0], 0);
        assert_eq!(img.get_pixel(2, 0)[0], 128);
        assert_eq!(img.get_pixel(0, 1)[0], 0);
        assert_eq!(img.get_pixel(2, 1)[0], 255);
    }

    #[test]
    fn test_to_8_bit_with_boost() {
        let data = Array3::from_shape_vec((1, 2, 2), vec![0.0, 40.0, 100.0, 200.0]).unwrap();
        let out = to_8_bit(data.view(), 2.0);
        assert_eq!(out[[0, 0, 0]], 0);
        assert_eq!(out[[0, 0, 1]], 102);
        assert_eq!(out[[0, 1, 0]], 255);
        assert_eq!(out[[0, 1, 1]], 255);
    }

    #[test]
    fn test_to_8_bit_full_scale() {
        // 255 / 3 * 3 does not come back to exactly 255
        let data = Array3::from_shape_vec((1, 1, 3), vec![1.0, 2.0, 3.0]).unwrap();
        let out = to_8_bit(data.view(), 1.0);
        assert_eq!(out.into_raw_vec_and_offset().0, vec![85, 170, 255]);
        let data = Array3::from_shape_vec((1, 1, 2), vec![0.1, 0.3]).unwrap();
        assert_eq!(to_8_bit(data.view(), 1.0)[[0, 0, 1]], 255);
    }

    #[test]
    fn test_rgbg_composite_averages_greens() {
        let stack = Array3::from_shape_fn((4, 1, 1), |(c, _, _)| [1.0, 2.0, 3.0, 4.0][c]);
        let rgb = rgbg_composite(stack.view()).unwrap();
        assert_eq!(rgb.into_raw_vec_and_offset().0, vec![1.0, 3.0, 3.0]);
    }

    #[test]
    fn test_saves_png_files() {
        let dir = tempfile::tempdir().unwrap();
        let stack = Array3::from_shape_fn((4, 3, 5), |(c, y, x)| (c + y + x) as f64);
        save_rgbg_maps(stack.view(), &dir.path().join("maps"), "bias", Scale::Percentiles(1.0)).unwrap();
        assert!(dir.path().join("maps/bias_G2.png").is_file());

        let rgb = to_8_bit(rgbg_composite(stack.view()).unwrap().view(), 1.0);
        save_rgb(&rgb, dir.path().join("rgb.png")).unwrap();
        let img = image::open(dir.path().join("rgb.png")).unwrap();
        assert_eq!((img.width(), img.height()), (5, 3));
    }
}
