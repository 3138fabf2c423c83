//! Linearity of the sensor response
//!
//! Pearson r of pixel values against relative intensity (exposure time or
//! polariser angle), comparison of JPEG data with an sRGB curve, and the
//! polariser-series export for the centre pixels.

mod srgb;

pub use srgb::{fit_srgb_pixel, srgb, srgb_compare_gamma, SrgbComparison, SrgbPixelFit};

use std::path::{Path, PathBuf};

use ndarray::{Array, Array2, ArrayView, ArrayView1, ArrayView2, ArrayView3, Axis, RemoveAxis, Zip};
use serde::Serialize;
use tracing::{info, instrument};

use crate::calibration::bayer::{BayerPattern, Channel};
use crate::calibration::common::config::AnalysisConfig;
use crate::calibration::common::error::{CalibrationError, Result};
use crate::calibration::io::{self, Region, StackKind};
use crate::calibration::metadata::CameraFolders;
use crate::calibration::render;
use crate::calibration::stats::{linear_fit, pearson_r, pearson_r_per_pixel};

/// Malus's law: relative intensity behind two polarisers at `angle` and
/// `offset` degrees.
pub fn malus(angle: f64, offset: f64) -> f64 {
    (angle - offset).to_radians().cos().powi(2)
}

/// Uncertainty of [`malus`] given the angle uncertainties (degrees) of both
/// polarisers.
pub fn malus_error(angle: f64, offset: f64, sigma_angle0: f64, sigma_angle1: f64) -> f64 {
    let d = (angle - offset).to_radians();
    let sigma = (sigma_angle0.to_radians().powi(2) + sigma_angle1.to_radians().powi(2)).sqrt();
    (2.0 * d).sin().abs() * sigma
}

/// Per-pixel Pearson r of raw means against intensity.
pub fn pearson_r_raw(intensities: &[f64], means: ArrayView3<'_, f64>) -> Result<Array2<f64>> {
    pearson_r_per_pixel(intensities, means)
}

/// Per-pixel Pearson r of JPEG means against intensity.
///
/// Values at or above `saturate` are left out. Pixels that lost any value
/// are flagged in the returned mask; their r uses the remaining points and
/// is NaN when fewer than three remain.
#[allow(clippy::type_complexity)]
pub fn pearson_r_jpeg<D: RemoveAxis>(
    intensities: &[f64],
    jmeans: ArrayView<'_, f64, D>,
    saturate: f64,
) -> Result<(Array<f64, D::Smaller>, Array<bool, D::Smaller>)> {
    if jmeans.ndim() < 2 || jmeans.len_of(Axis(0)) != intensities.len() {
        return Err(CalibrationError::shape_mismatch(&[intensities.len()], jmeans.shape()));
    }
    let shape = jmeans.raw_dim().remove_axis(Axis(0));
    let mut r = Array::zeros(shape.clone());
    let mut saturated = Array::from_elem(shape, false);
    Zip::from(&mut r)
        .and(&mut saturated)
        .and(jmeans.lanes(Axis(0)))
        .for_each(|r, sat, lane| {
            let (x, y): (Vec<f64>, Vec<f64>) = intensities
                .iter()
                .zip(lane.iter())
                .filter(|&(_, &v)| v < saturate)
                .map(|(&i, &v)| (i, v))
                .unzip();
            *sat = x.len() < intensities.len();
            *r = if x.len() < 3 {
                f64::NAN
            } else {
                pearson_r(ArrayView1::from(&x), ArrayView1::from(&y))
            };
        });
    Ok((r, saturated))
}

/// Measurements of one centre pixel in a polariser series.
#[derive(Debug, Clone, Serialize)]
pub struct PixelSeries {
    pub channel: &'static str,
    pub values: Vec<f64>,
    pub slope: f64,
    pub intercept: f64,
    pub pearson_r: f64,
}

/// Polariser linearity data for the pixels of the centre 2x2 block.
#[derive(Debug, Clone, Serialize)]
pub struct PolariserLinearity {
    pub angles: Vec<f64>,
    pub offset_angle: f64,
    pub intensities: Vec<f64>,
    pub intensity_errors: Vec<f64>,
    pub max_value: f64,
    pub pixels: Vec<PixelSeries>,
}

/// Fits the response of each pixel in a small block against Malus
/// intensities. `means` has shape `(n, 2, 2)` and `colours` the matching
/// colour indices.
pub fn polariser_linearity(
    angles: &[f64],
    means: ArrayView3<'_, f64>,
    colours: ArrayView2<'_, u8>,
    offset_angle: f64,
    max_value: f64,
) -> Result<PolariserLinearity> {
    if means.len_of(Axis(0)) != angles.len() {
        return Err(CalibrationError::shape_mismatch(&[angles.len()], means.shape()));
    }
    if means.shape()[1..] != *colours.shape() {
        return Err(CalibrationError::shape_mismatch(colours.shape(), &means.shape()[1..]));
    }
    let intensities: Vec<f64> = angles.iter().map(|&a| malus(a, offset_angle)).collect();
    let intensity_errors: Vec<f64> = angles
        .iter()
        .map(|&a| malus_error(a, offset_angle, 1.0, 1.0))
        .collect();

    let mut pixels = Vec::new();
    for ((row, col), &colour) in colours.indexed_iter() {
        let values: Vec<f64> = means.slice(ndarray::s![.., row, col]).to_vec();
        let fit = linear_fit(&intensities, &values)?;
        pixels.push(PixelSeries {
            channel: Channel::from_index(colour)?.label(),
            pearson_r: pearson_r(ArrayView1::from(&intensities), ArrayView1::from(&values)),
            slope: fit.slope,
            intercept: fit.intercept,
            values,
        });
    }

    Ok(PolariserLinearity {
        angles: angles.to_vec(),
        offset_angle,
        intensities,
        intensity_errors,
        max_value,
        pixels,
    })
}

/// Intensities, their errors and the stacked data of a linearity series.
type LinearitySeries = (Vec<f64>, Vec<f64>, ndarray::ArrayD<f64>);

fn load_linearity_series(folder: &Path, kind: StackKind, offset: f64) -> Result<LinearitySeries> {
    let stack = io::load_stack_dyn(folder, kind, |p| io::intensity_from_filename(p, offset), None)?;
    let (intensities, errors) = stack.values.into_iter().unzip();
    Ok((intensities, errors, stack.data))
}

/// Polariser offset for the series in `folder`. Polariser series need
/// `default_angle.dat`; exposure-time series do not use the offset.
fn series_offset_angle(folders: &CameraFolders, folder: &Path, kind: StackKind) -> Result<f64> {
    let files = io::stack_files(folder, kind.suffix())?;
    let polariser = files
        .iter()
        .filter_map(|file| file.file_stem().and_then(|s| s.to_str()))
        .any(|stem| stem.contains("pol"));
    if polariser {
        let offset = io::load_angle(&folders.stacks)?;
        info!("Polariser offset angle: {} degrees", offset);
        Ok(offset)
    } else {
        Ok(0.0)
    }
}

/// Pearson r for every pixel of a raw linearity series. Saves
/// `intermediaries/linearity/linearity_raw.npy` and a map of r.
#[instrument(skip(config))]
pub fn run_linearity_raw(folder: &Path, config: &AnalysisConfig) -> Result<PathBuf> {
    let folders = CameraFolders::find(folder)?;
    let offset = series_offset_angle(&folders, folder, StackKind::Mean)?;
    let (intensities, _, means) = load_linearity_series(folder, StackKind::Mean, offset)?;
    let means = means
        .into_dimensionality::<ndarray::Ix3>()
        .map_err(|e| CalibrationError::NpyError(e.to_string()))?;
    info!("Loaded {} raw linearity conditions", intensities.len());

    let r = {
        let _span = tracing::info_span!("pearson_r").entered();
        pearson_r_raw(&intensities, means.view())?
    };

    let save_to = folders.intermediaries.join("linearity").join("linearity_raw.npy");
    io::save_array(&save_to, &r)?;
    render::save_heatmap(
        &r,
        folders.analysis.join("linearity").join("linearity_raw_r.png"),
        render::Scale::Percentiles(config.percentile_cut),
    )?;
    info!("Saved results to '{}'", save_to.display());
    Ok(save_to)
}

/// Pearson r for every pixel and colour of a JPEG linearity series. Saves
/// `intermediaries/linearity/linearity_jpeg.npy` and the saturation mask.
#[instrument(skip(config))]
pub fn run_linearity_jpeg(folder: &Path, config: &AnalysisConfig) -> Result<PathBuf> {
    let folders = CameraFolders::find(folder)?;
    let offset = series_offset_angle(&folders, folder, StackKind::JpegMean)?;
    let (intensities, _, jmeans) = load_linearity_series(folder, StackKind::JpegMean, offset)?;
    info!("Loaded {} JPEG linearity conditions", intensities.len());

    let (r, saturated) = {
        let _span = tracing::info_span!("pearson_r").entered();
        pearson_r_jpeg(&intensities, jmeans.view(), config.jpeg_saturation)?
    };
    let saturated_count = saturated.iter().filter(|&&s| s).count();
    info!("{} of {} pixels contain saturated values", saturated_count, saturated.len());

    let save_to = folders.intermediaries.join("linearity").join("linearity_jpeg.npy");
    io::save_array(&save_to, &r)?;
    io::save_array(
        folders.intermediaries.join("linearity").join("linearity_jpeg_saturated.npy"),
        &saturated.mapv(u8::from),
    )?;
    info!("Saved results to '{}'", save_to.display());
    Ok(save_to)
}

/// Compares a JPEG linearity series with an sRGB curve of the given gamma
/// and saves the normalization, R², RMS and relative RMS maps to
/// `results/linearity/`.
#[instrument]
pub fn run_srgb_comparison(folder: &Path, gamma: f64) -> Result<Vec<PathBuf>> {
    let folders = CameraFolders::find(folder)?;
    let offset = series_offset_angle(&folders, folder, StackKind::JpegMean)?;
    let (intensities, _, jmeans) = load_linearity_series(folder, StackKind::JpegMean, offset)?;
    info!("Fitting sRGB model with gamma = {} ...", gamma);

    let comparison = srgb_compare_gamma(&intensities, jmeans.view(), gamma)?;
    let save_folder = folders.results.join("linearity");
    let mut saved = Vec::new();
    for (param, label) in [
        (&comparison.normalization, "normalization"),
        (&comparison.r_squared, "R2"),
        (&comparison.rms, "RMS"),
        (&comparison.rms_relative, "RMS_rel"),
    ] {
        let save_to = save_folder.join(format!("sRGB_gamma{}_{}.npy", gamma, label));
        io::save_array(&save_to, param)?;
        info!("Saved {} results to '{}'", label, save_to.display());
        saved.push(save_to);
    }
    Ok(saved)
}

/// Linearity of the centre pixels in a polariser series, exported as JSON
/// to `results/linearity/polariser_linearity.json`.
#[instrument]
pub fn run_polariser_linearity(folder: &Path) -> Result<PathBuf> {
    let folders = CameraFolders::find(folder)?;
    let camera = folders.load_camera()?;

    let size = io::array_size_raw(folder)?;
    if size.len() != 2 {
        return Err(CalibrationError::shape_mismatch(&[0, 0], &size));
    }
    // start the centre block on the tile grid so it holds one pixel per channel
    let (mid_row, mid_col) = ((size[0] / 2) & !1, (size[1] / 2) & !1);
    let centre = Region {
        rows: (mid_row, mid_row + 2),
        cols: (mid_col, mid_col + 2),
    };

    let stack = io::load_stack(folder, StackKind::Mean, io::split_pol_angle, Some(centre))?;
    info!("Loaded DNG data");
    let offset = io::load_angle(&folders.stacks)?;
    info!("Read angles");

    let pattern: BayerPattern = camera.image.bayer_pattern;
    let colours = pattern.colour_map(2, 2);
    let max_value = 2f64.powi(camera.image.bit_depth as i32);
    let linearity = polariser_linearity(&stack.values, stack.data.view(), colours.view(), offset, max_value)?;

    let save_to = folders.results.join("linearity").join("polariser_linearity.json");
    io::write_json(&save_to, &linearity)?;
    info!("Saved polariser linearity to '{}'", save_to.display());
    Ok(save_to)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{array, Array3};

    #[test]
    fn test_malus() {
        assert!((malus(0.0, 0.0) - 1.0).abs() < 1e-12);
        assert!(malus(90.0, 0.0).abs() < 1e-12);
        assert!((malus(75.0, 30.0) - 0.5).abs() < 1e-12);
    }

    #[test]
    fn test_malus_error() {
        assert_eq!(malus_error(30.0, 30.0, 1.0, 1.0), 0.0);
        let expected = 2f64.sqrt() * 1f64.to_radians();
        assert!((malus_error(75.0, 30.0, 1.0, 1.0) - expected).abs() < 1e-12);
    }

    #[test]
    fn test_series_offset_angle() {
        let dir = tempfile::tempdir().unwrap();
        let folders = CameraFolders::at_root(dir.path());
        let exposure = dir.path().join("exposure");
        let polariser = folders.stacks.join("linearity");
        io::save_array(exposure.join("t1_mean.npy"), &Array2::<f64>::zeros((2, 2))).unwrap();
        io::save_array(polariser.join("pol45_mean.npy"), &Array2::<f64>::zeros((2, 2))).unwrap();

        assert_eq!(series_offset_angle(&folders, &exposure, StackKind::Mean).unwrap(), 0.0);
        assert!(matches!(
            series_offset_angle(&folders, &polariser, StackKind::Mean),
            Err(CalibrationError::InputReadError(_))
        ));

        io::write_dat(polariser.join("default_angle.dat"), &[vec![12.5]]).unwrap();
        assert_eq!(series_offset_angle(&folders, &polariser, StackKind::Mean).unwrap(), 12.5);
    }

    #[test]
    fn test_pearson_r_jpeg_drops_saturated_values() {
        let intensities: [f64; 5] = [0.1, 0.2, 0.3, 0.4, 0.5];
        // pixel 0 is linear; pixel 1 saturates in the last two conditions
        let jmeans = Array2::from_shape_fn((5, 2), |(k, c)| {
            if c == 0 { 100.0 * intensities[k] } else { (600.0 * intensities[k]).min(255.0) }
        });
        let (r, saturated) = pearson_r_jpeg(&intensities, jmeans.view(), 240.0).unwrap();
        assert!((r[0] - 1.0).abs() < 1e-12);
        assert!(!saturated[0]);
        assert!((r[1] - 1.0).abs() < 1e-12);
        assert!(saturated[1]);
    }

    #[test]
    fn test_pearson_r_jpeg_too_few_points() {
        let intensities = [0.1, 0.2, 0.3];
        let jmeans = array![[10.0], [250.0], [250.0]];
        let (r, saturated) = pearson_r_jpeg(&intensities, jmeans.view(), 240.0).unwrap();
        assert!(r[0].is_nan());
        assert!(saturated[0]);
    }

    #[test]
    fn test_polariser_linearity_centre_block() {
        let angles = [0.0, 30.0, 60.0, 90.0];
        let means = Array3::from_shape_fn((4, 2, 2), |(k, r, c)| {
            let gain = 1000.0 * (1 + r * 2 + c) as f64;
            gain * malus(angles[k], 0.0) + 500.0
        });
        let colours = BayerPattern::RGGB.colour_map(2, 2);
        let result = polariser_linearity(&angles, means.view(), colours.view(), 0.0, 4096.0).unwrap();
        assert_eq!(result.pixels.len(), 4);
        assert_eq!(result.pixels[0].channel, "R");
        assert_eq!(result.pixels[2].channel, "G2");
        for (i, pixel) in result.pixels.iter().enumerate() {
            assert!((pixel.slope - 1000.0 * (i + 1) as f64).abs() < 1e-6);
            assert!((pixel.intercept - 500.0).abs() < 1e-6);
            assert!((pixel.pearson_r - 1.0).abs() < 1e-12);
        }
    }
}
