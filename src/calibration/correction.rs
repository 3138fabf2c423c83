//! Applying calibration products to data

use std::path::Path;

use ndarray::{Array, ArrayView, Dimension, Zip};

use crate::calibration::common::error::{CalibrationError, Result};
use crate::calibration::io;
use crate::calibration::metadata::CameraFolders;

fn check_shapes<D: Dimension>(data: &ArrayView<'_, f64, D>, map: &ArrayView<'_, f64, D>) -> Result<()> {
    if data.shape() != map.shape() {
        return Err(CalibrationError::shape_mismatch(data.shape(), map.shape()));
    }
    Ok(())
}

/// Subtracts a bias map.
pub fn correct_bias<D: Dimension>(data: ArrayView<'_, f64, D>, bias: ArrayView<'_, f64, D>) -> Result<Array<f64, D>> {
    check_shapes(&data, &bias)?;
    Ok(Zip::from(&data).and(&bias).map_collect(|&d, &b| d - b))
}

/// Subtracts the dark current accumulated over `exposure_time` seconds.
pub fn correct_dark_current<D: Dimension>(
    data: ArrayView<'_, f64, D>,
    exposure_time: f64,
    dark_current: ArrayView<'_, f64, D>,
) -> Result<Array<f64, D>> {
    check_shapes(&data, &dark_current)?;
    Ok(Zip::from(&data)
        .and(&dark_current)
        .map_collect(|&d, &dc| d - dc * exposure_time))
}

/// Multiplies by a flat-field correction map.
pub fn correct_flatfield<D: Dimension>(
    data: ArrayView<'_, f64, D>,
    correction: ArrayView<'_, f64, D>,
) -> Result<Array<f64, D>> {
    check_shapes(&data, &correction)?;
    Ok(Zip::from(&data).and(&correction).map_collect(|&d, &c| d * c))
}

/// Loads `calibration/bias.npy` under `root`.
pub fn load_bias_map(root: &Path) -> Result<ndarray::Array2<f64>> {
    io::read_array2(CameraFolders::at_root(root).calibration.join("bias.npy"))
}
