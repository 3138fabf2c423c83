//! Splitting a Bayer mosaic into per-channel planes and back.

use ndarray::{s, Array2, Array3, ArrayView2, ArrayView3};

use crate::calibration::bayer::pattern::{BayerPattern, Channel};
use crate::calibration::common::error::{CalibrationError, Result};

/// Per-channel planes of a Bayer mosaic in R, G, B, G2 order, shape
/// `(4, height / 2, width / 2)`.
pub type RgbgStack<T> = Array3<T>;

fn check_even(height: usize, width: usize) -> Result<()> {
    if height < 2 || width < 2 || height % 2 != 0 || width % 2 != 0 {
        return Err(CalibrationError::InvalidDimensions(width, height));
    }
    Ok(())
}

/// Pulls a mosaic apart into its four colour planes.
///
/// Returns the stack together with each channel's (row, col) offset inside
/// the 2x2 tile.
pub fn pull_apart<T: Copy>(
    data: ArrayView2<'_, T>,
    pattern: &BayerPattern,
) -> Result<(RgbgStack<T>, [(usize, usize); 4])> {
    let (height, width) = data.dim();
    check_even(height, width)?;
    let offsets = pattern.offsets();
    let stack = Array3::from_shape_fn((4, height / 2, width / 2), |(c, row, col)| {
        let (dy, dx) = offsets[c];
        data[[2 * row + dy, 2 * col + dx]]
    });
    Ok((stack, offsets))
}

/// Re-interleaves four colour planes into a mosaic. Inverse of [`pull_apart`].
pub fn put_together<T: Copy>(stack: ArrayView3<'_, T>, pattern: &BayerPattern) -> Result<Array2<T>> {
    let (channels, half_height, half_width) = stack.dim();
    if channels != 4 {
        return Err(CalibrationError::shape_mismatch(
            &[4, half_height, half_width],
            stack.shape(),
        ));
    }
    Ok(Array2::from_shape_fn(
        (2 * half_height, 2 * half_width),
        |(row, col)| {
            let channel = pattern.colour_at(row, col);
            stack[[channel.index(), row / 2, col / 2]]
        },
    ))
}

/// Places every pixel in its own colour plane of an `(h, w, 3)` array and
/// leaves the other planes at zero. Both greens go to the G plane.
pub fn to_rgb_array(data: ArrayView2<'_, f64>, pattern: &BayerPattern) -> Array3<f64> {
    let (height, width) = data.dim();
    let mut rgb = Array3::zeros((height, width, 3));
    for ((row, col), &value) in data.indexed_iter() {
        let plane = match pattern.colour_at(row, col) {
            Channel::Red => 0,
            Channel::Green | Channel::Green2 => 1,
            Channel::Blue => 2,
        };
        rgb[[row, col, plane]] = value;
    }
    rgb
}

/// Groups the pixel values by R, G (both greens) and B.
pub fn split_rgb(data: ArrayView2<'_, f64>, pattern: &BayerPattern) -> [Vec<f64>; 3] {
    let mut groups: [Vec<f64>; 3] = Default::default();
    for ((row, col), &value) in data.indexed_iter() {
        let group = match pattern.colour_at(row, col) {
            Channel::Red => 0,
            Channel::Green | Channel::Green2 => 1,
            Channel::Blue => 2,
        };
        groups[group].push(value);
    }
    groups
}

/// Rectangular region of the mosaic, `rows` and `cols` as half-open ranges.
///
/// The region has to start on even coordinates and have even size so the
/// cut-out keeps the same Bayer phase as the full frame.
pub fn cut_out<T: Copy>(
    data: ArrayView2<'_, T>,
    rows: (usize, usize),
    cols: (usize, usize),
) -> Result<Array2<T>> {
    let (height, width) = data.dim();
    let (y0, y1) = rows;
    let (x0, x1) = cols;
    if y1 > height || x1 > width || y0 >= y1 || x0 >= x1 {
        return Err(CalibrationError::InvalidDimensions(x1.saturating_sub(x0), y1.saturating_sub(y0)));
    }
    if y0 % 2 != 0 || x0 % 2 != 0 {
        return Err(CalibrationError::InvalidPattern(format!(
            "cut-out origin ({}, {}) breaks the 2x2 tile",
            y0, x0
        )));
    }
    check_even(y1 - y0, x1 - x0)?;
    Ok(data.slice(s![y0..y1, x0..x1]).to_owned())
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn test_pull_apart_rggb() {
        let data = array![
            [1.0, 2.0, 1.0, 2.0],
            [4.0, 3.0, 4.0, 3.0],
            [1.0, 2.0, 1.0, 2.0],
            [4.0, 3.0, 4.0, 3.0],
        ];
        // RGGB with G2 on the second row
        let (stack, offsets) = pull_apart(data.view(), &BayerPattern::RGGB).unwrap();
        assert_eq!(stack.dim(), (4, 2, 2));
        assert!(stack.slice(s![0, .., ..]).iter().all(|&v| v == 1.0));
        assert!(stack.slice(s![1, .., ..]).iter().all(|&v| v == 2.0));
        assert!(stack.slice(s![2, .., ..]).iter().all(|&v| v == 3.0));
        assert!(stack.slice(s![3, .., ..]).iter().all(|&v| v == 4.0));
        assert_eq!(offsets, [(0, 0), (0, 1), (1, 1), (1, 0)]);
    }

    #[test]
    fn test_put_together_restores_mosaic() {
        let data = Array2::from_shape_fn((6, 8), |(r, c)| (r * 8 + c) as u16);
        for pattern in [BayerPattern::RGGB, BayerPattern::BGGR, BayerPattern::GRBG, BayerPattern::GBRG] {
            let (stack, _) = pull_apart(data.view(), &pattern).unwrap();
            let restored = put_together(stack.view(), &pattern).unwrap();
            assert_eq!(restored, data);
        }
    }

    #[test]
    fn test_odd_dimensions_rejected() {
        let data = Array2::<f64>::zeros((5, 4));
        assert!(matches!(
            pull_apart(data.view(), &BayerPattern::RGGB),
            Err(CalibrationError::InvalidDimensions(4, 5))
        ));
    }

    #[test]
    fn test_to_rgb_array_and_split_rgb() {
        let data = array![[1.0, 2.0], [4.0, 3.0]];
        let rgb = to_rgb_array(data.view(), &BayerPattern::RGGB);
        assert_eq!(rgb[[0, 0, 0]], 1.0);
        assert_eq!(rgb[[0, 0, 1]], 0.0);
        assert_eq!(rgb[[1, 0, 1]], 4.0);
        assert_eq!(rgb[[1, 1, 2]], 3.0);

        let [r, g, b] = split_rgb(data.view(), &BayerPattern::RGGB);
        assert_eq!(r, vec![1.0]);
        assert_eq!(g, vec![2.0, 4.0]);
        assert_eq!(b, vec![3.0]);
    }

    #[test]
    fn test_cut_out_keeps_phase() {
        let data = Array2::from_shape_fn((8, 8), |(r, c)| (r * 8 + c) as f64);
        let cut = cut_out(data.view(), (2, 6), (4, 8)).unwrap();
        assert_eq!(cut.dim(), (4, 4));
        assert_eq!(cut[[0, 0]], 20.0);
        assert!(cut_out(data.view(), (1, 5), (0, 4)).is_err());
        assert!(cut_out(data.view(), (0, 10), (0, 4)).is_err());
    }
}
