//! Comparison of JPEG response to an sRGB transfer curve.

use levenberg_marquardt::{LeastSquaresProblem, LevenbergMarquardt};
use nalgebra::{storage::Owned, DVector, Dyn, OMatrix, Vector1, U1};
use ndarray::{Array, ArrayView, ArrayView1, Axis, RemoveAxis, Zip};
use tracing::debug;

use crate::calibration::common::error::{CalibrationError, Result};
use crate::calibration::stats::r_squared;

/// Linear segment threshold of the sRGB curve.
const SRGB_LINEAR_LIMIT: f64 = 0.0031308;

/// sRGB transfer curve, scaled to 8-bit values.
///
/// The intensity is first divided by `normalization` and clipped to
/// `[0, 1]`; `gamma` is the exponent of the power-law segment (2.4 for the
/// standard curve).
pub fn srgb(intensity: f64, normalization: f64, gamma: f64) -> f64 {
    let u = (intensity / normalization).clamp(0.0, 1.0);
    let value = if u <= SRGB_LINEAR_LIMIT {
        12.92 * u
    } else {
        1.055 * u.powf(1.0 / gamma) - 0.055
    };
    255.0 * value
}

/// Derivative of [`srgb`] with respect to the normalization.
fn srgb_dn(intensity: f64, normalization: f64, gamma: f64) -> f64 {
    let u = intensity / normalization;
    if !(0.0..=1.0).contains(&u) {
        return 0.0;
    }
    let du_dn = -u / normalization;
    let dv_du = if u <= SRGB_LINEAR_LIMIT {
        12.92
    } else {
        1.055 / gamma * u.powf(1.0 / gamma - 1.0)
    };
    255.0 * dv_du * du_dn
}

struct NormalizationProblem<'a> {
    intensities: &'a [f64],
    values: Vec<f64>,
    gamma: f64,
    normalization: Vector1<f64>,
}

impl LeastSquaresProblem<f64, Dyn, U1> for NormalizationProblem<'_> {
    type ResidualStorage = Owned<f64, Dyn>;
    type JacobianStorage = Owned<f64, Dyn, U1>;
    type ParameterStorage = Owned<f64, U1>;

    fn set_params(&mut self, x: &Vector1<f64>) {
        self.normalization.clone_from(x);
    }

    fn params(&self) -> Vector1<f64> {
        self.normalization
    }

    fn residuals(&self) -> Option<DVector<f64>> {
        let n = self.normalization[0];
        if n <= 0.0 {
            return None;
        }
        Some(DVector::from_iterator(
            self.values.len(),
            self.intensities
                .iter()
                .zip(&self.values)
                .map(|(&i, &v)| srgb(i, n, self.gamma) - v),
        ))
    }

    fn jacobian(&self) -> Option<OMatrix<f64, Dyn, U1>> {
        let n = self.normalization[0];
        if n <= 0.0 {
            return None;
        }
        Some(OMatrix::<f64, Dyn, U1>::from_iterator(
            self.values.len(),
            self.intensities.iter().map(|&i| srgb_dn(i, n, self.gamma)),
        ))
    }
}

/// Best-fitting normalization of one pixel's response and the fit quality.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SrgbPixelFit {
    pub normalization: f64,
    pub r_squared: f64,
    pub rms: f64,
    pub rms_relative: f64,
}

/// Fits the sRGB normalization for one pixel.
///
/// The relative RMS is the RMS difference divided by the mean JPEG value.
pub fn fit_srgb_pixel(intensities: &[f64], values: ArrayView1<'_, f64>, gamma: f64) -> SrgbPixelFit {
    let start = intensities.iter().copied().fold(f64::MIN, f64::max);
    let problem = NormalizationProblem {
        intensities,
        values: values.to_vec(),
        gamma,
        normalization: Vector1::new(if start > 0.0 { start } else { 1.0 }),
    };
    let (problem, report) = LevenbergMarquardt::new().minimize(problem);
    let normalization = problem.normalization[0];
    if !report.termination.was_successful() {
        debug!("sRGB fit did not converge: {:?}", report.termination);
    }

    let model: Vec<f64> = intensities.iter().map(|&i| srgb(i, normalization, gamma)).collect();
    let data = &problem.values;
    let rms = (data
        .iter()
        .zip(&model)
        .map(|(d, m)| (d - m).powi(2))
        .sum::<f64>()
        / data.len() as f64)
        .sqrt();
    let mean = data.iter().sum::<f64>() / data.len() as f64;
    SrgbPixelFit {
        normalization,
        r_squared: r_squared(data, &model),
        rms,
        rms_relative: rms / mean,
    }
}

/// Per-pixel sRGB comparison maps.
#[derive(Debug, Clone)]
pub struct SrgbComparison<D: ndarray::Dimension> {
    pub normalization: Array<f64, D>,
    pub r_squared: Array<f64, D>,
    pub rms: Array<f64, D>,
    pub rms_relative: Array<f64, D>,
}

/// Fits an sRGB curve with fixed `gamma` to every pixel of a JPEG stack
/// taken at the given relative `intensities`.
pub fn srgb_compare_gamma<D: RemoveAxis>(
    intensities: &[f64],
    jmeans: ArrayView<'_, f64, D>,
    gamma: f64,
) -> Result<SrgbComparison<D::Smaller>> {
    if jmeans.ndim() < 2 || jmeans.len_of(Axis(0)) != intensities.len() {
        return Err(CalibrationError::shape_mismatch(&[intensities.len()], jmeans.shape()));
    }
    if gamma <= 0.0 {
        return Err(CalibrationError::FitError(format!("invalid gamma {}", gamma)));
    }
    let shape = jmeans.raw_dim().remove_axis(Axis(0));
    let mut comparison = SrgbComparison {
        normalization: Array::zeros(shape.clone()),
        r_squared: Array::zeros(shape.clone()),
        rms: Array::zeros(shape.clone()),
        rms_relative: Array::zeros(shape),
    };
    Zip::from(&mut comparison.normalization)
        .and(&mut comparison.r_squared)
        .and(&mut comparison.rms)
        .and(&mut comparison.rms_relative)
        .and(jmeans.lanes(Axis(0)))
        .for_each(|n, r2, rms, rel, lane| {
            let fit = fit_srgb_pixel(intensities, lane, gamma);
            *n = fit.normalization;
            *r2 = fit.r_squared;
            *rms = fit.rms;
            *rel = fit.rms_relative;
        });
    Ok(comparison)
}
