//! Least-squares fits and correlation measures.

use nalgebra::{DMatrix, DVector};
use ndarray::{Array, ArrayView, ArrayView1, Axis, Dimension, RemoveAxis, Zip};

use crate::calibration::common::error::{CalibrationError, Result};

/// Ordinary least-squares polynomial fit.
///
/// Coefficients are returned highest power first, so that they can be fed
/// straight into [`polyval`].
pub fn polyfit(x: &[f64], y: &[f64], degree: usize) -> Result<Vec<f64>> {
    if x.len() != y.len() {
        return Err(CalibrationError::shape_mismatch(&[x.len()], &[y.len()]));
    }
    if x.len() <= degree {
        return Err(CalibrationError::FitError(format!(
            "{} points are not enough for a degree {} polynomial",
            x.len(),
            degree
        )));
    }
    let vandermonde = DMatrix::from_fn(x.len(), degree + 1, |i, j| x[i].powi((degree - j) as i32));
    let rhs = DVector::from_column_slice(y);
    let solution = vandermonde
        .svd(true, true)
        .solve(&rhs, 1e-12)
        .map_err(|e| CalibrationError::FitError(e.to_string()))?;
    Ok(solution.iter().copied().collect())
}

/// Evaluates a polynomial with coefficients ordered highest power first.
pub fn polyval(coefficients: &[f64], x: f64) -> f64 {
    coefficients.iter().fold(0.0, |acc, &c| acc * x + c)
}

/// Slope and intercept of a straight-line fit.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LinearFit {
    pub slope: f64,
    pub intercept: f64,
}

/// Straight-line least-squares fit of `y` against `x`.
pub fn linear_fit(x: &[f64], y: &[f64]) -> Result<LinearFit> {
    let coefficients = polyfit(x, y, 1)?;
    Ok(LinearFit {
        slope: coefficients[0],
        intercept: coefficients[1],
    })
}

/// Pearson correlation coefficient. NaN when there are fewer than two
/// points or either variable has no variance.
pub fn pearson_r(x: ArrayView1<'_, f64>, y: ArrayView1<'_, f64>) -> f64 {
    let n = x.len().min(y.len());
    if n < 2 {
        return f64::NAN;
    }
    let mean_x = x.iter().take(n).sum::<f64>() / n as f64;
    let mean_y = y.iter().take(n).sum::<f64>() / n as f64;
    let (mut sxy, mut sxx, mut syy) = (0.0, 0.0, 0.0);
    for (&a, &b) in x.iter().zip(y.iter()).take(n) {
        let dx = a - mean_x;
        let dy = b - mean_y;
        sxy += dx * dy;
        sxx += dx * dx;
        syy += dy * dy;
    }
    if sxx == 0.0 || syy == 0.0 {
        return f64::NAN;
    }
    sxy / (sxx * syy).sqrt()
}

fn check_stack_length<D: Dimension>(x: &[f64], data: &ArrayView<'_, f64, D>) -> Result<()> {
    if data.ndim() < 2 || data.len_of(Axis(0)) != x.len() {
        return Err(CalibrationError::shape_mismatch(&[x.len()], data.shape()));
    }
    if x.len() < 2 {
        return Err(CalibrationError::FitError(
            "a linear fit needs at least two conditions".to_string(),
        ));
    }
    Ok(())
}

/// Per-pixel straight-line fit along the first axis of a stack, e.g.
/// `(n, h, w)` for raw data or `(n, h, w, 3)` for JPEG data.
///
/// Returns the slope and intercept maps, each shaped like one array of the
/// stack.
#[allow(clippy::type_complexity)]
pub fn linear_fit_per_pixel<D: RemoveAxis>(
    x: &[f64],
    data: ArrayView<'_, f64, D>,
) -> Result<(Array<f64, D::Smaller>, Array<f64, D::Smaller>)> {
    check_stack_length(x, &data)?;
    let n = x.len() as f64;
    let mean_x = x.iter().sum::<f64>() / n;
    let sxx: f64 = x.iter().map(|v| (v - mean_x).powi(2)).sum();
    if sxx == 0.0 {
        return Err(CalibrationError::FitError(
            "all conditions share the same x value".to_string(),
        ));
    }

    let shape = data.raw_dim().remove_axis(Axis(0));
    let mut slope = Array::zeros(shape.clone());
    let mut intercept = Array::zeros(shape);
    Zip::from(&mut slope)
        .and(&mut intercept)
        .and(data.lanes(Axis(0)))
        .for_each(|s, b, lane| {
            let mean_y = lane.sum() / n;
            let sxy: f64 = x.iter().zip(lane.iter()).map(|(xi, yi)| (xi - mean_x) * (yi - mean_y)).sum();
            *s = sxy / sxx;
            *b = mean_y - *s * mean_x;
        });
    Ok((slope, intercept))
}

/// Per-pixel Pearson r along the first axis of a stack.
pub fn pearson_r_per_pixel<D: RemoveAxis>(
    x: &[f64],
    data: ArrayView<'_, f64, D>,
) -> Result<Array<f64, D::Smaller>> {
    check_stack_length(x, &data)?;
    let x = ArrayView1::from(x);
    let mut r = Array::zeros(data.raw_dim().remove_axis(Axis(0)));
    Zip::from(&mut r)
        .and(data.lanes(Axis(0)))
        .for_each(|r, lane| *r = pearson_r(x, lane));
    Ok(r)
}

/// Coefficient of determination of `model` against `data`.
pub fn r_squared(data: &[f64], model: &[f64]) -> f64 {
    let mean = data.iter().sum::<f64>() / data.len() as f64;
    let ss_tot: f64 = data.iter().map(|d| (d - mean).powi(2)).sum();
    let ss_res: f64 = data.iter().zip(model).map(|(d, m)| (d - m).powi(2)).sum();
    1.0 - ss_res / ss_tot
}
