//! Flat-field response
//!
//! A flat field is normalised per colour channel, clipped away from the
//! sensor edges and inverted into an observed correction map, to which the
//! radial vignetting model is fitted.

mod vignette;

pub use vignette::{
    apply_vignette_radial, apply_vignette_radial_on, fit_vignette_radial, vignette_radial, VignetteFit,
    VignetteGrid, PARAMETER_LABELS,
};

use std::path::{Path, PathBuf};

use ndarray::{s, Array2, ArrayView2, Axis};
use tracing::{info, instrument};

use crate::calibration::bayer::{pull_apart, put_together, BayerPattern};
use crate::calibration::common::config::AnalysisConfig;
use crate::calibration::common::error::{CalibrationError, Result};
use crate::calibration::io::{self, StackKind};
use crate::calibration::metadata::CameraFolders;
use crate::calibration::render::{self, Scale};
use crate::calibration::stats::gauss_filter_2d;

pub const FLATFIELD_PARAMETERS_FILE: &str = "flatfield_parameters.npy";
pub const FLATFIELD_MAP_FILE: &str = "flatfield_correction_modelled.npy";

/// Removes `border` pixels from every edge.
pub fn clip_data(data: ArrayView2<'_, f64>, border: usize) -> Result<ArrayView2<'_, f64>> {
    let (height, width) = data.dim();
    if 2 * border >= height || 2 * border >= width {
        return Err(CalibrationError::InvalidDimensions(width, height));
    }
    Ok(data.slice_move(s![border..height - border, border..width - border]))
}

/// Normalises each Bayer channel of a flat field to 1.
///
/// The maximum of each channel is taken after gaussian smoothing so single
/// hot pixels do not set it. Means and standard deviations are divided by
/// the same factors.
pub fn normalise_rgbg2(
    mean: ArrayView2<'_, f64>,
    stds: ArrayView2<'_, f64>,
    pattern: &BayerPattern,
    sigma: f64,
) -> Result<(Array2<f64>, Array2<f64>)> {
    if mean.shape() != stds.shape() {
        return Err(CalibrationError::shape_mismatch(mean.shape(), stds.shape()));
    }
    let (mut mean_rgbg, _) = pull_apart(mean, pattern)?;
    let (mut stds_rgbg, _) = pull_apart(stds, pattern)?;

    for (mut mean_plane, mut stds_plane) in mean_rgbg.axis_iter_mut(Axis(0)).zip(stds_rgbg.axis_iter_mut(Axis(0))) {
        let smoothed = gauss_filter_2d(mean_plane.view(), sigma);
        let maximum = smoothed.iter().copied().fold(f64::MIN, f64::max);
        if !(maximum.is_finite() && maximum > 0.0) {
            return Err(CalibrationError::FitError(format!(
                "flat field channel has no positive maximum ({})",
                maximum
            )));
        }
        mean_plane.mapv_inplace(|v| v / maximum);
        stds_plane.mapv_inplace(|v| v / maximum);
    }

    Ok((
        put_together(mean_rgbg.view(), pattern)?,
        put_together(stds_rgbg.view(), pattern)?,
    ))
}

/// Loads the `(2, 7)` parameters and errors from
/// `calibration/flatfield_parameters.npy` under `root`.
pub fn read_flat_field_parameters(root: &Path) -> Result<VignetteFit> {
    let path = CameraFolders::at_root(root).calibration.join(FLATFIELD_PARAMETERS_FILE);
    let array = io::read_array2(&path)?;
    if array.dim() != (2, 7) {
        return Err(CalibrationError::shape_mismatch(&[2, 7], array.shape()));
    }
    let mut fit = VignetteFit {
        parameters: [0.0; 7],
        errors: [0.0; 7],
    };
    for k in 0..7 {
        fit.parameters[k] = array[[0, k]];
        fit.errors[k] = array[[1, k]];
    }
    Ok(fit)
}

/// Correction map of `shape` computed from the stored model parameters.
pub fn read_flat_field_correction(root: &Path, shape: (usize, usize)) -> Result<Array2<f64>> {
    let fit = read_flat_field_parameters(root)?;
    Ok(apply_vignette_radial(shape, &fit.parameters))
}

/// Loads `calibration/flatfield_correction_modelled.npy` under `root`.
pub fn load_flat_field_correction_map(root: &Path) -> Result<Array2<f64>> {
    io::read_array2(CameraFolders::at_root(root).calibration.join(FLATFIELD_MAP_FILE))
}

/// Fits the vignetting model to the flat-field stacks in `folder`.
///
/// All `*_mean.npy` / `*_stds.npy` pairs are averaged. The fitted
/// parameters go to `calibration/flatfield_parameters.npy` and the model,
/// extended over the full frame, to
/// `calibration/flatfield_correction_modelled.npy`. Maps of the observed
/// and modelled corrections and their difference are written to
/// `analysis/flat/`.
#[instrument(skip(config))]
pub fn run_flat_field(folder: &Path, config: &AnalysisConfig) -> Result<PathBuf> {
    let folders = CameraFolders::find(folder)?;
    let camera = folders.load_camera()?;

    let means = io::load_stack(folder, StackKind::Mean, |_| Ok(()), None)?;
    let stds = io::load_stack(folder, StackKind::Stds, |_| Ok(()), None)?;
    let count = means.len() as f64;
    let mean = means
        .data
        .mean_axis(Axis(0))
        .ok_or_else(|| CalibrationError::shape_mismatch(&[1], means.data.shape()))?;
    let stds = stds.data.mapv(|s| s * s).sum_axis(Axis(0)).mapv(|v| v.sqrt() / count);
    info!("Loaded {} flat field frames", means.len());

    let (mean, _stds) = normalise_rgbg2(mean.view(), stds.view(), &camera.image.bayer_pattern, config.gauss_sigma)?;
    info!("Normalised RGBG2 channels");

    let clipped = clip_data(mean.view(), config.clip_border)?;
    let observed = clipped.mapv(|v| 1.0 / v);
    let fit = {
        let _span = tracing::info_span!("fit_vignette").entered();
        fit_vignette_radial(observed.view(), &config.vignette_guess, config.vignette_stride)?
    };
    for ((label, p), e) in PARAMETER_LABELS.iter().zip(fit.parameters).zip(fit.errors) {
        info!("{} = {:.4} +- {:.4}", label, p, e);
    }

    let mut parameters = Array2::zeros((2, 7));
    for k in 0..7 {
        parameters[[0, k]] = fit.parameters[k];
        parameters[[1, k]] = fit.errors[k];
    }
    let parameters_file = folders.calibration.join(FLATFIELD_PARAMETERS_FILE);
    io::save_array(&parameters_file, &parameters)?;

    let border = -(config.clip_border as f64);
    let grid = VignetteGrid::from_shape(observed.dim());
    let full = apply_vignette_radial_on(mean.dim(), &grid, (border, border), &fit.parameters);
    io::save_array(folders.calibration.join(FLATFIELD_MAP_FILE), &full)?;

    let modelled = apply_vignette_radial(observed.dim(), &fit.parameters);
    let difference = &observed - &modelled;
    let analysis = folders.analysis.join("flat");
    let (low, high) = (modelled.fold(f64::MAX, |a, &b| a.min(b)), modelled.fold(f64::MIN, |a, &b| a.max(b)));
    render::save_heatmap(&observed, analysis.join("correction_observed.png"), Scale::Range(low, high))?;
    render::save_heatmap(&modelled, analysis.join("correction_modelled.png"), Scale::Range(low, high))?;
    render::save_heatmap(
        &difference,
        analysis.join("correction_difference.png"),
        Scale::Percentiles(config.percentile_cut),
    )?;
    io::write_json(analysis.join("flatfield_parameters.json"), &fit)?;

    info!("Saved flat field model to '{}'", parameters_file.display());
    Ok(parameters_file)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn test_clip_data() {
        let data = Array2::from_shape_fn((6, 8), |(y, x)| (y * 8 + x) as f64);
        let clipped = clip_data(data.view(), 2).unwrap();
        assert_eq!(clipped.dim(), (2, 4));
        assert_eq!(clipped[[0, 0]], 18.0);
        assert!(matches!(clip_data(data.view(), 3), Err(CalibrationError::InvalidDimensions(8, 6))));
    }

    #[test]
    fn test_normalise_rgbg2_per_channel() {
        // uniform channels at different levels on an RGGB mosaic
        let mean = Array2::from_shape_fn((8, 8), |(y, x)| [[100.0, 50.0], [40.0, 20.0]][y % 2][x % 2]);
        let stds = mean.mapv(|v| v / 10.0);
        let (mean, stds) = normalise_rgbg2(mean.view(), stds.view(), &BayerPattern::RGGB, 5.0).unwrap();
        assert!(mean.iter().all(|v| (v - 1.0).abs() < 1e-12));
        assert!(stds.iter().all(|v| (v - 0.1).abs() < 1e-12));
    }

    #[test]
    fn test_normalise_rejects_empty_channel() {
        let mean = array![[1.0, 1.0], [1.0, 0.0]];
        assert!(normalise_rgbg2(mean.view(), mean.view(), &BayerPattern::RGGB, 1.0).is_err());
    }

    #[test]
    fn test_read_parameters() {
        let dir = tempfile::tempdir().unwrap();
        let mut stored = Array2::zeros((2, 7));
        stored.row_mut(0).assign(&ndarray::arr1(&[0.2, 0.0, 0.0, 0.0, 0.0, 0.5, 0.5]));
        stored.row_mut(1).fill(0.01);
        io::save_array(dir.path().join("calibration").join(FLATFIELD_PARAMETERS_FILE), &stored).unwrap();

        let fit = read_flat_field_parameters(dir.path()).unwrap();
        assert_eq!(fit.parameters[0], 0.2);
        assert_eq!(fit.errors[6], 0.01);
        let map = read_flat_field_correction(dir.path(), (5, 5)).unwrap();
        assert_eq!(map[[2, 2]], 1.0);
        assert!((map[[0, 0]] - 1.2).abs() < 1e-12);
    }
}
