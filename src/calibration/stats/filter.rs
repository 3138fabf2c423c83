use ndarray::{Array2, ArrayView2, Axis};

/// Default truncation of the gaussian kernel, in standard deviations.
const TRUNCATE: f64 = 4.0;

fn gaussian_kernel(sigma: f64) -> Vec<f64> {
    let radius = (TRUNCATE * sigma + 0.5) as isize;
    let weights: Vec<f64> = (-radius..=radius)
        .map(|x| (-0.5 * (x as f64 / sigma).powi(2)).exp())
        .collect();
    let total: f64 = weights.iter().sum();
    weights.into_iter().map(|w| w / total).collect()
}

/// Mirror an out-of-range index back into `0..n` (d c b a | a b c d | d c b a).
fn reflect(index: isize, n: usize) -> usize {
    let period = 2 * n as isize;
    let i = index.rem_euclid(period);
    if i < n as isize { i as usize } else { (period - 1 - i) as usize }
}

fn convolve_axis(data: ArrayView2<'_, f64>, kernel: &[f64], axis: Axis) -> Array2<f64> {
    let radius = (kernel.len() / 2) as isize;
    let mut out = Array2::zeros(data.raw_dim());
    for (lane_in, mut lane_out) in data.lanes(axis).into_iter().zip(out.lanes_mut(axis)) {
        let n = lane_in.len();
        for i in 0..n {
            lane_out[i] = kernel
                .iter()
                .enumerate()
                .map(|(k, w)| w * lane_in[reflect(i as isize + k as isize - radius, n)])
                .sum();
        }
    }
    out
}

/// Separable gaussian smoothing with reflecting boundaries. A sigma of zero
/// leaves the data unchanged.
pub fn gauss_filter_2d(data: ArrayView2<'_, f64>, sigma: f64) -> Array2<f64> {
    if sigma <= 0.0 {
        return data.to_owned();
    }
    let kernel = gaussian_kernel(sigma);
    let rows = convolve_axis(data, &kernel, Axis(0));
    convolve_axis(rows.view(), &kernel, Axis(1))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kernel_is_normalised() {
        let kernel = gaussian_kernel(2.0);
        assert_eq!(kernel.len(), 17);
        assert!((kernel.iter().sum::<f64>() - 1.0).abs() < 1e-12);
        assert!(kernel[8] > kernel[7]);
    }

    #[test]
    fn test_reflect() {
        assert_eq!(reflect(-1, 4), 0);
        assert_eq!(reflect(-2, 4), 1);
        assert_eq!(reflect(4, 4), 3);
        assert_eq!(reflect(5, 4), 2);
        assert_eq!(reflect(2, 4), 2);
    }

    #[test]
    fn test_constant_stays_constant() {
        let data = Array2::from_elem((6, 5), 3.0);
        let smoothed = gauss_filter_2d(data.view(), 5.0);
        assert!(smoothed.iter().all(|&v| (v - 3.0).abs() < 1e-12));
    }

    #[test]
    fn test_smoothing_suppresses_outlier() {
        let mut data = Array2::from_elem((21, 21), 1.0);
        data[[10, 10]] = 100.0;
        let smoothed = gauss_filter_2d(data.view(), 3.0);
        assert!(smoothed[[10, 10]] < 10.0);
        let total: f64 = smoothed.sum();
        assert!((total - data.sum()).abs() < 1e-6);
    }
}
