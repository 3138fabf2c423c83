//! Radial vignetting model of the DNG 1.4 FixVignetteRadial opcode.
//!
//! g(r) = 1 + k0 r² + k1 r⁴ + k2 r⁶ + k3 r⁸ + k4 r¹⁰, where r is the distance
//! to the optical centre divided by the distance from the centre to the
//! farthest corner of the grid. The centre (cx_hat, cy_hat) is given in
//! units of the grid size, relative to its top left corner.

use levenberg_marquardt::{LeastSquaresProblem, LevenbergMarquardt};
use nalgebra::{storage::Owned, DMatrix, DVector, Dyn};
use ndarray::{Array2, ArrayView2};
use serde::Serialize;
use tracing::{debug, warn};

use crate::calibration::common::error::{CalibrationError, Result};

pub const PARAMETER_LABELS: [&str; 7] = ["k0", "k1", "k2", "k3", "k4", "cx", "cy"];

/// Pixel extent the model is normalised to: x from `x0` to `x1`, y from
/// `y0` to `y1`, in pixel units.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VignetteGrid {
    pub x0: f64,
    pub x1: f64,
    pub y0: f64,
    pub y1: f64,
}

impl VignetteGrid {
    /// Grid over an array of the given `(height, width)`, with pixel
    /// indices as coordinates.
    pub fn from_shape((height, width): (usize, usize)) -> Self {
        VignetteGrid {
            x0: 0.0,
            x1: width.saturating_sub(1) as f64,
            y0: 0.0,
            y1: height.saturating_sub(1) as f64,
        }
    }
}

/// Squared normalised distance of (x, y) to the optical centre.
fn radius_squared(x: f64, y: f64, grid: &VignetteGrid, cx_hat: f64, cy_hat: f64) -> f64 {
    let cx = grid.x0 + cx_hat * (grid.x1 - grid.x0);
    let cy = grid.y0 + cy_hat * (grid.y1 - grid.y0);
    let mx = (grid.x0 - cx).abs().max((grid.x1 - cx).abs());
    let my = (grid.y0 - cy).abs().max((grid.y1 - cy).abs());
    ((x - cx).powi(2) + (y - cy).powi(2)) / (mx * mx + my * my)
}

/// Correction factor g at pixel (x, y).
pub fn vignette_radial(x: f64, y: f64, grid: &VignetteGrid, parameters: &[f64; 7]) -> f64 {
    let [k0, k1, k2, k3, k4, cx_hat, cy_hat] = *parameters;
    let r2 = radius_squared(x, y, grid, cx_hat, cy_hat);
    1.0 + r2 * (k0 + r2 * (k1 + r2 * (k2 + r2 * (k3 + r2 * k4))))
}

/// Evaluates the model on every pixel of an array of `shape`.
pub fn apply_vignette_radial(shape: (usize, usize), parameters: &[f64; 7]) -> Array2<f64> {
    apply_vignette_radial_on(shape, &VignetteGrid::from_shape(shape), (0.0, 0.0), parameters)
}

/// Evaluates the model on an array of `shape` whose pixel (row, col) sits
/// at `(col + shift.1, row + shift.0)` on `grid`.
///
/// This extends a model fitted on a clipped region to the full frame.
pub fn apply_vignette_radial_on(
    shape: (usize, usize),
    grid: &VignetteGrid,
    shift: (f64, f64),
    parameters: &[f64; 7],
) -> Array2<f64> {
    Array2::from_shape_fn(shape, |(row, col)| {
        vignette_radial(col as f64 + shift.1, row as f64 + shift.0, grid, parameters)
    })
}

/// Best-fit parameters and their standard errors.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct VignetteFit {
    pub parameters: [f64; 7],
    pub errors: [f64; 7],
}

struct VignetteProblem {
    x: Vec<f64>,
    y: Vec<f64>,
    observed: Vec<f64>,
    grid: VignetteGrid,
    parameters: DVector<f64>,
}

impl VignetteProblem {
    fn current(&self) -> [f64; 7] {
        let mut p = [0.0; 7];
        p.copy_from_slice(self.parameters.as_slice());
        p
    }

    fn model(&self, parameters: &[f64; 7]) -> impl Iterator<Item = f64> + '_ {
        let parameters = *parameters;
        self.x
            .iter()
            .zip(&self.y)
            .map(move |(&x, &y)| vignette_radial(x, y, &self.grid, &parameters))
    }
}

impl LeastSquaresProblem<f64, Dyn, Dyn> for VignetteProblem {
    type ResidualStorage = Owned<f64, Dyn>;
    type JacobianStorage = Owned<f64, Dyn, Dyn>;
    type ParameterStorage = Owned<f64, Dyn>;

    fn set_params(&mut self, x: &DVector<f64>) {
        self.parameters.clone_from(x);
    }

    fn params(&self) -> DVector<f64> {
        self.parameters.clone()
    }

    fn residuals(&self) -> Option<DVector<f64>> {
        let p = self.current();
        Some(DVector::from_iterator(
            self.observed.len(),
            self.model(&p).zip(&self.observed).map(|(m, o)| m - o),
        ))
    }

    fn jacobian(&self) -> Option<DMatrix<f64>> {
        let p = self.current();
        let n = self.observed.len();
        let mut jacobian = DMatrix::zeros(n, 7);

        // dg/dk_i = r^(2i + 2)
        for (i, (&x, &y)) in self.x.iter().zip(&self.y).enumerate() {
            let r2 = radius_squared(x, y, &self.grid, p[5], p[6]);
            let mut power = r2;
            for k in 0..5 {
                jacobian[(i, k)] = power;
                power *= r2;
            }
        }

        // the centre moves the normalisation as well; central differences
        for k in 5..7 {
            let step = 1e-6;
            let mut plus = p;
            let mut minus = p;
            plus[k] += step;
            minus[k] -= step;
            for (i, (a, b)) in self.model(&plus).zip(self.model(&minus)).enumerate() {
                jacobian[(i, k)] = (a - b) / (2.0 * step);
            }
        }
        Some(jacobian)
    }
}

/// Fits the radial model to an observed correction map.
///
/// Only every `stride`-th pixel in each direction is used, and non-finite
/// values are skipped; the grid still spans the whole map. Standard errors
/// come from the covariance `(JᵀJ)⁻¹ · SSR / (n - p)` at the optimum.
pub fn fit_vignette_radial(
    correction_observed: ArrayView2<'_, f64>,
    initial_guess: &[f64; 7],
    stride: usize,
) -> Result<VignetteFit> {
    let grid = VignetteGrid::from_shape(correction_observed.dim());
    let stride = stride.max(1);
    let (mut x, mut y, mut observed) = (Vec::new(), Vec::new(), Vec::new());
    for ((row, col), &value) in correction_observed.indexed_iter() {
        if row % stride == 0 && col % stride == 0 && value.is_finite() {
            x.push(col as f64);
            y.push(row as f64);
            observed.push(value);
        }
    }
    let n = observed.len();
    if n <= 7 {
        return Err(CalibrationError::FitError(format!(
            "{} samples are not enough for the vignetting model",
            n
        )));
    }
    debug!("Fitting vignetting model to {} samples", n);

    let problem = VignetteProblem {
        x,
        y,
        observed,
        grid,
        parameters: DVector::from_column_slice(initial_guess),
    };
    let (problem, report) = LevenbergMarquardt::new().minimize(problem);
    if !report.termination.was_successful() {
        warn!("Vignetting fit did not converge: {:?}", report.termination);
    }
    let parameters = problem.current();
    if parameters.iter().any(|p| !p.is_finite()) {
        return Err(CalibrationError::FitError("vignetting fit diverged".to_string()));
    }

    let residuals = problem
        .residuals()
        .ok_or_else(|| CalibrationError::FitError("no residuals at optimum".to_string()))?;
    let jacobian = problem
        .jacobian()
        .ok_or_else(|| CalibrationError::FitError("no jacobian at optimum".to_string()))?;
    let ssr = residuals.norm_squared();
    let covariance = (jacobian.transpose() * &jacobian)
        .try_inverse()
        .map(|inverse| inverse * (ssr / (n - 7) as f64));

    let mut errors = [f64::INFINITY; 7];
    match covariance {
        Some(covariance) => {
            for (k, error) in errors.iter_mut().enumerate() {
                *error = covariance[(k, k)].max(0.0).sqrt();
            }
        }
        None => warn!("Covariance of the vignetting fit could not be estimated"),
    }
    Ok(VignetteFit { parameters, errors })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_model_at_centre_and_corner() {
        let grid = VignetteGrid::from_shape((11, 21));
        let parameters = [0.5, 0.25, 0.0, 0.0, 0.0, 0.5, 0.5];
        assert_eq!(vignette_radial(10.0, 5.0, &grid, &parameters), 1.0);
        // corners sit at r = 1
        assert!((vignette_radial(0.0, 0.0, &grid, &parameters) - 1.75).abs() < 1e-12);
        assert!((vignette_radial(20.0, 10.0, &grid, &parameters) - 1.75).abs() < 1e-12);
    }

    #[test]
    fn test_off_centre_normalisation() {
        let grid = VignetteGrid::from_shape((11, 11));
        let parameters = [1.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0];
        // centre in the top left corner: the farthest corner is the opposite one
        assert!((vignette_radial(10.0, 10.0, &grid, &parameters) - 2.0).abs() < 1e-12);
        assert!((vignette_radial(10.0, 0.0, &grid, &parameters) - 1.5).abs() < 1e-12);
    }

    #[test]
    fn test_fit_recovers_synthetic_map() {
        let truth = [0.4, 0.1, 0.0, 0.0, 0.0, 0.5, 0.5];
        let observed = apply_vignette_radial((40, 60), &truth);
        let fit = fit_vignette_radial(observed.view(), &[1.0, 2.0, -5.0, 5.0, -2.0, 0.5, 0.5], 2).unwrap();
        let modelled = apply_vignette_radial((40, 60), &fit.parameters);
        let worst = (&modelled - &observed).iter().fold(0.0f64, |m, d| m.max(d.abs()));
        assert!(worst < 1e-4, "worst residual {}", worst);
        assert!(fit.errors.iter().all(|e| e.is_finite()));
    }

    #[test]
    fn test_extension_to_full_frame() {
        let parameters = [0.3, 0.0, 0.0, 0.0, 0.0, 0.5, 0.5];
        let clipped = apply_vignette_radial((6, 8), &parameters);
        let grid = VignetteGrid::from_shape((6, 8));
        let full = apply_vignette_radial_on((10, 12), &grid, (-2.0, -2.0), &parameters);
        assert_eq!(full[[2, 2]], clipped[[0, 0]]);
        assert_eq!(full[[7, 9]], clipped[[5, 7]]);
    }

    #[test]
    fn test_too_few_samples() {
        let observed = Array2::from_elem((2, 2), 1.0);
        assert!(fit_vignette_radial(observed.view(), &[0.0; 7], 1).is_err());
    }
}
