//! Bias (read-noise offset) characterisation

use std::path::{Path, PathBuf};

use ndarray::{Array2, Array3, ArrayView2, ArrayView3, Axis};
use serde::Serialize;
use tracing::{info, instrument};

use crate::calibration::bayer::{pull_apart, split_rgb, BayerPattern};
use crate::calibration::common::config::AnalysisConfig;
use crate::calibration::common::error::{CalibrationError, Result};
use crate::calibration::io::{self, StackKind};
use crate::calibration::metadata::CameraFolders;
use crate::calibration::render::{self, Scale};
use crate::calibration::stats::{
    gauss_filter_2d, histogram, statistics, symmetric_percentiles, Histogram, StatisticsTable,
};

/// R, G and B histograms of the bias at one ISO speed.
#[derive(Debug, Clone, Serialize)]
pub struct BiasHistograms {
    pub iso: f64,
    pub red: Histogram,
    pub green: Histogram,
    pub blue: Histogram,
}

/// Statistics and histograms of a bias stack, one entry per ISO speed.
#[derive(Debug, Clone, Serialize)]
pub struct BiasCharacterisation {
    pub statistics: StatisticsTable,
    /// Histogram range shared by every ISO speed
    pub range: (f64, f64),
    pub histograms: Vec<BiasHistograms>,
}

/// Summarises bias frames taken at the given ISO speeds.
pub fn characterise_bias(
    isos: &[f64],
    means: ArrayView3<'_, f64>,
    pattern: &BayerPattern,
    config: &AnalysisConfig,
) -> Result<BiasCharacterisation> {
    if means.len_of(Axis(0)) != isos.len() {
        return Err(CalibrationError::shape_mismatch(&[isos.len()], means.shape()));
    }
    let table = statistics(means, isos, "ISO");
    let all: Vec<f64> = means.iter().copied().collect();
    let range = symmetric_percentiles(&all, config.percentile_cut);

    let histograms = isos
        .iter()
        .zip(means.axis_iter(Axis(0)))
        .map(|(&iso, mean)| {
            let [red, green, blue] = split_rgb(mean, pattern);
            BiasHistograms {
                iso,
                red: histogram(&red, range, config.histogram_bins),
                green: histogram(&green, range, config.histogram_bins),
                blue: histogram(&blue, range, config.histogram_bins),
            }
        })
        .collect();

    Ok(BiasCharacterisation {
        statistics: table,
        range,
        histograms,
    })
}

/// Splits a bias frame into RGBG planes and smooths each with a gaussian.
pub fn gauss_rgbg_maps(mean: ArrayView2<'_, f64>, pattern: &BayerPattern, sigma: f64) -> Result<Array3<f64>> {
    let (mut stack, _) = pull_apart(mean, pattern)?;
    for mut plane in stack.axis_iter_mut(Axis(0)) {
        let smoothed = gauss_filter_2d(plane.view(), sigma);
        plane.assign(&smoothed);
    }
    Ok(stack)
}

/// Averages a bias stack into one map.
pub fn bias_map_from_stack(means: ArrayView3<'_, f64>) -> Result<Array2<f64>> {
    means
        .mean_axis(Axis(0))
        .ok_or_else(|| CalibrationError::shape_mismatch(&[1], means.shape()))
}

/// Characterises the `iso<N>_mean.npy` bias stacks in `folder`.
///
/// Writes the statistics and histograms to `analysis/bias/bias.json`,
/// smoothed RGBG maps per ISO speed to `analysis/bias/`, and the averaged
/// map to `calibration/bias.npy`.
#[instrument(skip(config))]
pub fn run_bias(folder: &Path, config: &AnalysisConfig) -> Result<PathBuf> {
    let folders = CameraFolders::find(folder)?;
    let camera = folders.load_camera()?;
    let save_to = folders.analysis.join("bias");

    let stack = io::load_stack(folder, StackKind::Mean, io::split_iso, None)?;
    info!("Loaded data");

    let characterisation = characterise_bias(&stack.values, stack.data.view(), &camera.image.bayer_pattern, config)?;
    info!("\n{}", characterisation.statistics);
    io::write_json(save_to.join("bias.json"), &characterisation)?;

    for (iso, mean) in stack.values.iter().zip(stack.data.axis_iter(Axis(0))) {
        let _span = tracing::info_span!("bias_maps", iso = *iso).entered();
        let maps = gauss_rgbg_maps(mean, &camera.image.bayer_pattern, config.gauss_sigma)?;
        render::save_rgbg_maps(
            maps.view(),
            &save_to,
            &format!("bias_map_iso{}", iso),
            Scale::Percentiles(config.percentile_cut),
        )?;
        info!("Saved plots for ISO speed {}", iso);
    }

    let bias = bias_map_from_stack(stack.data.view())?;
    let bias_file = folders.calibration.join("bias.npy");
    io::save_array(&bias_file, &bias)?;
    info!("Saved bias map to '{}'", bias_file.display());
    Ok(bias_file)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bias_stack() -> Array3<f64> {
        // R=500, G=510, B=520, G2=530 on an RGGB mosaic, offset per ISO
        Array3::from_shape_fn((2, 4, 6), |(k, y, x)| {
            let colour = [[500.0, 510.0], [530.0, 520.0]][y % 2][x % 2];
            colour + k as f64
        })
    }

    #[test]
    fn test_characterise_bias() {
        let stack = bias_stack();
        let config = AnalysisConfig::builder().histogram_bins(40).percentile_cut(0.0).build();
        let result = characterise_bias(&[100.0, 200.0], stack.view(), &BayerPattern::RGGB, &config).unwrap();
        assert_eq!(result.range, (500.0, 531.0));
        assert_eq!(result.statistics.rows.len(), 2);
        assert_eq!(result.statistics.rows[1].0, 200.0);

        let at_100 = &result.histograms[0];
        assert_eq!(at_100.red.counts.iter().sum::<u64>(), 6);
        assert_eq!(at_100.green.counts.iter().sum::<u64>(), 12);
        assert_eq!(at_100.blue.counts.iter().sum::<u64>(), 6);
        assert_eq!(at_100.red.counts[0], 6);
    }

    #[test]
    fn test_gauss_maps_keep_uniform_planes() {
        let stack = bias_stack();
        let maps = gauss_rgbg_maps(stack.index_axis(Axis(0), 0), &BayerPattern::RGGB, 5.0).unwrap();
        assert_eq!(maps.dim(), (4, 2, 3));
        for (plane, expected) in maps.axis_iter(Axis(0)).zip([500.0, 510.0, 520.0, 530.0]) {
            assert!(plane.iter().all(|v| (v - expected).abs() < 1e-9));
        }
    }

    #[test]
    fn test_bias_map_from_stack() {
        let map = bias_map_from_stack(bias_stack().view()).unwrap();
        assert_eq!(map[[0, 0]], 500.5);
        assert_eq!(map[[1, 1]], 520.5);
    }
}
