//! Dark current
//!
//! Dark current is the slope of a per-pixel linear fit of the signal
//! against exposure time; the intercept of the same fit is a bias estimate.

use std::path::{Path, PathBuf};

use ndarray::{Array2, ArrayView3};
use tracing::{info, instrument, warn};

use crate::calibration::common::config::AnalysisConfig;
use crate::calibration::common::error::Result;
use crate::calibration::io::{self, StackKind};
use crate::calibration::iso::read_iso_model;
use crate::calibration::metadata::CameraFolders;
use crate::calibration::render;
use crate::calibration::stats::linear_fit_per_pixel;

/// Name of the dark current map in the calibration folder.
pub const DARK_CURRENT_FILE: &str = "dark_current_normalised.npy";

/// Fits a linear trend to every pixel of `data` taken at the given
/// exposure times. Returns `(dark, bias)`: the slopes in ADU/s and the
/// intercepts in ADU, both in the spatial shape of one frame.
pub fn fit_dark_current_linear(
    exposure_times: &[f64],
    data: ArrayView3<'_, f64>,
) -> Result<(Array2<f64>, Array2<f64>)> {
    linear_fit_per_pixel(exposure_times, data)
}

/// Loads `calibration/dark_current_normalised.npy` under `root`.
pub fn load_dark_current_map(root: &Path) -> Result<Array2<f64>> {
    io::read_array2(CameraFolders::at_root(root).calibration.join(DARK_CURRENT_FILE))
}

/// Fits dark current to a folder of exposure-time stacks
/// (`t<exposure>_mean.npy`).
///
/// When the folder name carries an ISO speed (`iso<N>`) and an ISO model
/// has been calibrated, the map is divided by the normalization at that
/// ISO so it can be applied at any ISO speed.
#[instrument(skip(config))]
pub fn run_dark_current(folder: &Path, config: &AnalysisConfig) -> Result<PathBuf> {
    let folders = CameraFolders::find(folder)?;
    let stack = io::load_stack(folder, StackKind::Mean, io::split_exposure_time, None)?;
    info!("Loaded {} exposure times", stack.len());

    let (dark, bias) = {
        let _span = tracing::info_span!("fit_dark_current").entered();
        fit_dark_current_linear(&stack.values, stack.data.view())?
    };
    info!("Fitted dark current to {} pixels", dark.len());

    let intermediaries = folders.intermediaries.join("dark_current");
    io::save_array(intermediaries.join("dark_current.npy"), &dark)?;
    io::save_array(intermediaries.join("dark_bias.npy"), &bias)?;

    let normalised = match io::split_iso(folder) {
        Ok(iso) => match read_iso_model(&folders.calibration) {
            Ok(model) => {
                info!("Normalising dark current to ISO {} with {}", iso, model);
                dark.mapv(|d| d / model.normalization(iso))
            }
            Err(e) => {
                warn!("No ISO model available ({}), dark current is not normalised", e);
                dark.clone()
            }
        },
        Err(_) => dark.clone(),
    };

    let save_to = folders.calibration.join(DARK_CURRENT_FILE);
    io::save_array(&save_to, &normalised)?;
    render::save_heatmap(
        &dark,
        folders.analysis.join("dark_current").join("dark_current_map.png"),
        render::Scale::Percentiles(config.percentile_cut),
    )?;
    info!("Saved dark current map to '{}'", save_to.display());
    Ok(save_to)
}
