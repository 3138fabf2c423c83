//! ISO speed normalization
//!
//! Signal scales with ISO speed relative to the lowest ISO. The relation is
//! modelled as a straight line, or a straight line up to a knee beyond which
//! the camera applies no more analogue gain.

use std::fmt;
use std::path::{Path, PathBuf};

use ndarray::{Array2, ArrayView2, ArrayView3, Axis};
use serde::Serialize;
use tracing::{debug, info, instrument, warn};

use crate::calibration::common::error::{CalibrationError, Result};
use crate::calibration::correction::{correct_bias, load_bias_map};
use crate::calibration::io::{self, StackKind};
use crate::calibration::metadata::CameraFolders;
use crate::calibration::stats::{linear_fit, LinearFit, Summary};

pub const ISO_MODEL_FILE: &str = "iso_model.dat";
pub const ISO_LOOKUP_TABLE_FILE: &str = "iso_lookup_table.npy";
pub const ISO_DATA_FILE: &str = "iso_data.npy";

/// Which model [`fit_iso_model`] fits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IsoModelKind {
    Linear,
    Knee,
}

/// Normalization as a function of ISO speed.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum IsoModel {
    Linear { slope: f64, offset: f64 },
    /// Linear up to `knee`, constant above it
    Knee { slope: f64, offset: f64, knee: f64 },
}

impl IsoModel {
    pub fn kind(&self) -> IsoModelKind {
        match self {
            IsoModel::Linear { .. } => IsoModelKind::Linear,
            IsoModel::Knee { .. } => IsoModelKind::Knee,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            IsoModel::Linear { .. } => "Linear",
            IsoModel::Knee { .. } => "Knee",
        }
    }

    pub fn parameters(&self) -> Vec<f64> {
        match *self {
            IsoModel::Linear { slope, offset } => vec![slope, offset],
            IsoModel::Knee { slope, offset, knee } => vec![slope, offset, knee],
        }
    }

    /// Builds a model from its name and parameters as written in
    /// `iso_model.dat`.
    pub fn from_parameters(name: &str, parameters: &[f64]) -> Result<Self> {
        match (name, parameters) {
            ("Linear", &[slope, offset]) => Ok(IsoModel::Linear { slope, offset }),
            ("Knee", &[slope, offset, knee]) => Ok(IsoModel::Knee { slope, offset, knee }),
            _ => Err(CalibrationError::InputReadError(format!(
                "unknown ISO model '{}' with {} parameters",
                name,
                parameters.len()
            ))),
        }
    }

    /// Normalization factor at `iso`.
    pub fn normalization(&self, iso: f64) -> f64 {
        match *self {
            IsoModel::Linear { slope, offset } => slope * iso + offset,
            IsoModel::Knee { slope, offset, knee } => slope * iso.min(knee) + offset,
        }
    }
}

impl fmt::Display for IsoModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            IsoModel::Linear { slope, offset } => write!(f, "linear model ({:.4e} * ISO + {:.4})", slope, offset),
            IsoModel::Knee { slope, offset, knee } => write!(
                f,
                "knee model ({:.4e} * min(ISO, {}) + {:.4})",
                slope, knee, offset
            ),
        }
    }
}

/// A fitted model with the standard errors of its parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct FittedIsoModel {
    pub model: IsoModel,
    pub errors: Vec<f64>,
}

/// Reads `iso_model.dat` from the calibration folder: the model name, its
/// parameters and their errors on three lines.
pub fn read_iso_model_with_errors(calibration: &Path) -> Result<FittedIsoModel> {
    let path = calibration.join(ISO_MODEL_FILE);
    let text = std::fs::read_to_string(&path)
        .map_err(|e| CalibrationError::InputReadError(format!("{}: {}", path.display(), e)))?;
    let mut lines = text.lines().map(str::trim).filter(|l| !l.is_empty() && !l.starts_with('#'));
    let malformed = || CalibrationError::InputReadError(format!("{}: malformed ISO model", path.display()));

    let name = lines.next().and_then(|l| l.split_whitespace().next()).ok_or_else(malformed)?;
    let mut numbers = || -> Result<Vec<f64>> {
        lines
            .next()
            .ok_or_else(malformed)?
            .split_whitespace()
            .map(|t| t.parse::<f64>().map_err(|_| malformed()))
            .collect()
    };
    let parameters = numbers()?;
    let errors = numbers()?;
    let model = IsoModel::from_parameters(name, &parameters)?;
    if errors.len() != parameters.len() {
        return Err(malformed());
    }
    Ok(FittedIsoModel { model, errors })
}

pub fn read_iso_model(calibration: &Path) -> Result<IsoModel> {
    Ok(read_iso_model_with_errors(calibration)?.model)
}

pub fn write_iso_model(calibration: &Path, fitted: &FittedIsoModel) -> Result<PathBuf> {
    let path = calibration.join(ISO_MODEL_FILE);
    std::fs::create_dir_all(calibration)?;
    let join = |values: &[f64]| values.iter().map(|v| v.to_string()).collect::<Vec<_>>().join(" ");
    let text = format!(
        "{}\n{}\n{}\n",
        fitted.model.name(),
        join(&fitted.model.parameters()),
        join(&fitted.errors)
    );
    std::fs::write(&path, text)
        .map_err(|e| CalibrationError::OutputWriteError(format!("{}: {}", path.display(), e)))?;
    Ok(path)
}

/// Ratio of every frame to the frame at the lowest ISO speed.
///
/// Returns a `(3, n)` array of ISO speed, mean ratio and its standard
/// deviation over the pixels, sorted by ISO speed.
pub fn iso_normalization_data(isos: &[f64], means: ArrayView3<'_, f64>) -> Result<Array2<f64>> {
    if isos.is_empty() || means.len_of(Axis(0)) != isos.len() {
        return Err(CalibrationError::shape_mismatch(&[isos.len()], means.shape()));
    }
    let mut order: Vec<usize> = (0..isos.len()).collect();
    order.sort_by(|&a, &b| isos[a].total_cmp(&isos[b]));
    let lowest = means.index_axis(Axis(0), order[0]);

    let mut data = Array2::zeros((3, isos.len()));
    for (column, &k) in order.iter().enumerate() {
        let frame = means.index_axis(Axis(0), k);
        let ratios: Vec<f64> = frame
            .iter()
            .zip(lowest.iter())
            .map(|(&v, &l)| v / l)
            .filter(|r| r.is_finite())
            .collect();
        let summary = Summary::of(&ratios);
        data[[0, column]] = isos[k];
        data[[1, column]] = summary.mean;
        data[[2, column]] = summary.std;
    }
    Ok(data)
}

/// Straight-line fit with the standard errors of slope and intercept.
fn linear_fit_with_errors(x: &[f64], y: &[f64]) -> Result<(LinearFit, [f64; 2])> {
    let fit = linear_fit(x, y)?;
    let n = x.len() as f64;
    let mean_x = x.iter().sum::<f64>() / n;
    let sxx: f64 = x.iter().map(|v| (v - mean_x).powi(2)).sum();
    let ssr: f64 = x
        .iter()
        .zip(y)
        .map(|(xi, yi)| (yi - (fit.slope * xi + fit.intercept)).powi(2))
        .sum();
    if x.len() <= 2 {
        return Ok((fit, [f64::NAN, f64::NAN]));
    }
    let variance = ssr / (n - 2.0);
    let slope_error = (variance / sxx).sqrt();
    let intercept_error = (variance * (1.0 / n + mean_x * mean_x / sxx)).sqrt();
    Ok((fit, [slope_error, intercept_error]))
}

/// Fits a model to the `(3, n)` output of [`iso_normalization_data`].
///
/// The knee is chosen among the measured ISO speeds as the one with the
/// smallest squared residual; its error is half the gap to the next
/// measured ISO speed.
pub fn fit_iso_model(data: ArrayView2<'_, f64>, kind: IsoModelKind) -> Result<FittedIsoModel> {
    if data.nrows() < 2 {
        return Err(CalibrationError::shape_mismatch(&[3, data.ncols()], data.shape()));
    }
    let isos = data.row(0).to_vec();
    let values = data.row(1).to_vec();

    match kind {
        IsoModelKind::Linear => {
            let (fit, errors) = linear_fit_with_errors(&isos, &values)?;
            Ok(FittedIsoModel {
                model: IsoModel::Linear {
                    slope: fit.slope,
                    offset: fit.intercept,
                },
                errors: errors.to_vec(),
            })
        }
        IsoModelKind::Knee => {
            let mut best: Option<(f64, FittedIsoModel)> = None;
            for (k, &knee) in isos.iter().enumerate().skip(1) {
                let below: Vec<usize> = (0..isos.len()).filter(|&i| isos[i] <= knee).collect();
                if below.len() < 2 {
                    continue;
                }
                let x: Vec<f64> = below.iter().map(|&i| isos[i]).collect();
                let y: Vec<f64> = below.iter().map(|&i| values[i]).collect();
                let Ok((fit, errors)) = linear_fit_with_errors(&x, &y) else {
                    continue;
                };
                let model = IsoModel::Knee {
                    slope: fit.slope,
                    offset: fit.intercept,
                    knee,
                };
                let ssr: f64 = isos
                    .iter()
                    .zip(&values)
                    .map(|(&iso, &v)| (v - model.normalization(iso)).powi(2))
                    .sum();
                debug!("Knee at ISO {}: SSR {:.4e}", knee, ssr);
                let knee_error = isos.get(k + 1).map(|next| 0.5 * (next - knee)).unwrap_or(0.0);
                if best.as_ref().is_none_or(|(best_ssr, _)| ssr < *best_ssr) {
                    best = Some((
                        ssr,
                        FittedIsoModel {
                            model,
                            errors: vec![errors[0], errors[1], knee_error],
                        },
                    ));
                }
            }
            best.map(|(_, fitted)| fitted)
                .ok_or_else(|| CalibrationError::FitError("not enough ISO speeds for a knee model".to_string()))
        }
    }
}

/// Normalization at every integer ISO speed from `iso_min` to `iso_max`,
/// as a `(2, n)` array.
pub fn lookup_table(model: &IsoModel, iso_min: u32, iso_max: u32) -> Array2<f64> {
    let isos: Vec<f64> = (iso_min..=iso_max).map(f64::from).collect();
    let mut table = Array2::zeros((2, isos.len()));
    for (column, &iso) in isos.iter().enumerate() {
        table[[0, column]] = iso;
        table[[1, column]] = model.normalization(iso);
    }
    table
}

/// Fits the ISO model to a folder of `iso<N>_mean.npy` stacks taken at a
/// fixed exposure. Writes `iso_model.dat`, the lookup table and the data it
/// was fitted to into the calibration folder.
#[instrument]
pub fn run_iso_normalization(folder: &Path, kind: IsoModelKind) -> Result<PathBuf> {
    let folders = CameraFolders::find(folder)?;
    let camera = folders.load_camera()?;
    let mut stack = io::load_stack(folder, StackKind::Mean, io::split_iso, None)?;
    info!("Loaded {} ISO speeds", stack.len());

    match load_bias_map(&folders.root) {
        Ok(bias) => {
            for mut frame in stack.data.axis_iter_mut(Axis(0)) {
                let corrected = correct_bias(frame.view(), bias.view())?;
                frame.assign(&corrected);
            }
            info!("Subtracted bias map");
        }
        Err(e) => warn!("No bias map available ({}), using uncorrected data", e),
    }

    let data = iso_normalization_data(&stack.values, stack.data.view())?;
    let fitted = fit_iso_model(data.view(), kind)?;
    info!("Fitted {} (errors {:?})", fitted.model, fitted.errors);

    let table = lookup_table(&fitted.model, camera.settings.iso_min, camera.settings.iso_max);
    let model_path = write_iso_model(&folders.calibration, &fitted)?;
    io::save_array(folders.calibration.join(ISO_LOOKUP_TABLE_FILE), &table)?;
    io::save_array(folders.calibration.join(ISO_DATA_FILE), &data)?;
    io::write_json(
        folders.analysis.join("iso").join("iso_normalization.json"),
        &IsoSeries::new(&camera.to_string(), camera.settings.iso_max, data.view(), table.view()),
    )?;
    info!("Saved ISO model to '{}'", model_path.display());
    Ok(model_path)
}

/// Measured normalization and lookup table of one camera, for plotting.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IsoSeries {
    pub label: String,
    pub iso_max: u32,
    pub iso: Vec<f64>,
    pub normalization: Vec<f64>,
    pub normalization_error: Vec<f64>,
    pub lookup_iso: Vec<f64>,
    pub lookup_normalization: Vec<f64>,
}

impl IsoSeries {
    fn new(label: &str, iso_max: u32, data: ArrayView2<'_, f64>, table: ArrayView2<'_, f64>) -> Self {
        IsoSeries {
            label: label.to_string(),
            iso_max,
            iso: data.row(0).to_vec(),
            normalization: data.row(1).to_vec(),
            normalization_error: data.row(2).to_vec(),
            lookup_iso: table.row(0).to_vec(),
            lookup_normalization: table.row(1).to_vec(),
        }
    }
}

/// Gathers the ISO data and lookup tables of several cameras.
pub fn iso_comparison(devices: &[PathBuf]) -> Result<Vec<IsoSeries>> {
    devices
        .iter()
        .map(|device| {
            let folders = CameraFolders::find(device)?;
            let camera = folders.load_camera()?;
            let data = io::read_array2(folders.calibration.join(ISO_DATA_FILE))?;
            let table = io::read_array2(folders.calibration.join(ISO_LOOKUP_TABLE_FILE))?;
            if data.nrows() != 3 {
                return Err(CalibrationError::shape_mismatch(&[3, data.ncols()], data.shape()));
            }
            if table.nrows() != 2 {
                return Err(CalibrationError::shape_mismatch(&[2, table.ncols()], table.shape()));
            }
            info!("{}", camera);
            Ok(IsoSeries::new(&camera.to_string(), camera.settings.iso_max, data.view(), table.view()))
        })
        .collect()
}

#[instrument]
pub fn run_iso_comparison(devices: &[PathBuf], save_to: &Path) -> Result<PathBuf> {
    let series = iso_comparison(devices)?;
    io::write_json(save_to, &series)?;
    info!("Saved comparison of {} cameras to '{}'", series.len(), save_to.display());
    Ok(save_to.to_path_buf())
}
