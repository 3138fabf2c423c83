//! Spectral response and camera-to-XYZ conversion

use std::path::{Path, PathBuf};

use ndarray::{Array1, Array2, ArrayView1, ArrayView2, Axis};
use serde::Serialize;
use tracing::{info, instrument};

use crate::calibration::common::error::{CalibrationError, Result};
use crate::calibration::io;
use crate::calibration::metadata::CameraFolders;
use crate::calibration::stats::interpolate_many;

/// Spectral response curves, one row per channel in R, G, B, G2 order.
#[derive(Debug, Clone, PartialEq)]
pub struct SpectralResponse {
    pub wavelengths: Array1<f64>,
    pub rgbg2: Array2<f64>,
    pub errors: Array2<f64>,
}

/// Reads the spectral response from `results/spectral_response/`.
///
/// Monochromator data (`monochromator_curve.npy`) is used when present,
/// otherwise `curve.npy`. Rows hold the wavelengths, the four channel
/// responses and their four errors.
pub fn read_spectral_responses(results: &Path) -> Result<SpectralResponse> {
    let folder = results.join("spectral_response");
    let monochromator = folder.join("monochromator_curve.npy");
    let path = if monochromator.is_file() {
        monochromator
    } else {
        folder.join("curve.npy")
    };
    let array = io::read_array2(&path)?;
    if array.nrows() != 9 {
        return Err(CalibrationError::shape_mismatch(&[9, array.ncols()], array.shape()));
    }
    info!("Read spectral response from '{}'", path.display());
    Ok(SpectralResponse {
        wavelengths: array.row(0).to_owned(),
        rgbg2: array.slice(ndarray::s![1..5, ..]).to_owned(),
        errors: array.slice(ndarray::s![5..9, ..]).to_owned(),
    })
}

/// Effective spectral bandwidths per channel from
/// `spectral_bandwidths.dat` in the calibration folder.
pub fn read_spectral_bandwidths(calibration: &Path) -> Result<Vec<f64>> {
    Ok(io::read_dat(&calibration.join("spectral_bandwidths.dat"))?
        .into_iter()
        .flatten()
        .collect())
}

/// Resamples every row of `data` from `wavelengths` to `new_wavelengths`.
/// Outside the measured range the response is zero.
pub fn interpolate_spectral_data(
    wavelengths: ArrayView1<'_, f64>,
    data: ArrayView2<'_, f64>,
    new_wavelengths: ArrayView1<'_, f64>,
) -> Result<Array2<f64>> {
    if data.ncols() != wavelengths.len() {
        return Err(CalibrationError::shape_mismatch(&[data.nrows(), wavelengths.len()], data.shape()));
    }
    let xp = wavelengths.to_vec();
    let x = new_wavelengths.to_vec();
    let mut interpolated = Array2::zeros((data.nrows(), x.len()));
    for (mut out, row) in interpolated.axis_iter_mut(Axis(0)).zip(data.axis_iter(Axis(0))) {
        let fp = row.to_vec();
        out.assign(&Array1::from(interpolate_many(&x, &xp, &fp, Some(0.0))));
    }
    Ok(interpolated)
}

/// CIE colour matching functions x̄, ȳ, z̄ sampled at `wavelengths`.
#[derive(Debug, Clone, PartialEq)]
pub struct ColourMatchingFunctions {
    pub wavelengths: Array1<f64>,
    /// Shape `(3, n)`
    pub xyz: Array2<f64>,
}

impl ColourMatchingFunctions {
    /// Loads the functions from a table with columns wavelength, x̄, ȳ, z̄.
    ///
    /// `.npy` files may hold the table as `(n, 4)` or `(4, n)`; text files
    /// are read as whitespace- or comma-separated `(n, 4)` tables.
    pub fn load(path: &Path) -> Result<Self> {
        let table = if path.extension().is_some_and(|e| e == "npy") {
            let array = io::read_array2(path)?;
            if array.nrows() == 4 && array.ncols() != 4 {
                array.reversed_axes()
            } else {
                array
            }
        } else {
            let text = std::fs::read_to_string(path)
                .map_err(|e| CalibrationError::InputReadError(format!("{}: {}", path.display(), e)))?;
            let rows = text
                .lines()
                .map(str::trim)
                .filter(|l| !l.is_empty() && !l.starts_with('#'))
                .map(|line| {
                    line.split(|c: char| c == ',' || c.is_whitespace())
                        .filter(|t| !t.is_empty())
                        .map(|t| {
                            t.parse::<f64>().map_err(|_| {
                                CalibrationError::InputReadError(format!("{}: cannot parse '{}'", path.display(), t))
                            })
                        })
                        .collect::<Result<Vec<f64>>>()
                })
                .collect::<Result<Vec<_>>>()?;
            let flat: Vec<f64> = rows.iter().flatten().copied().collect();
            Array2::from_shape_vec((rows.len(), 4), flat)
                .map_err(|_| CalibrationError::InputReadError(format!("{}: expected 4 columns", path.display())))?
        };
        if table.ncols() != 4 {
            return Err(CalibrationError::shape_mismatch(&[table.nrows(), 4], table.shape()));
        }
        Ok(ColourMatchingFunctions {
            wavelengths: table.column(0).to_owned(),
            xyz: table.slice(ndarray::s![.., 1..4]).reversed_axes().to_owned(),
        })
    }
}

/// Camera RGB to CIE XYZ conversion.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct XyzMatrix {
    /// Rows X, Y, Z; columns R, G, B
    pub matrix: [[f64; 3]; 3],
    /// `matrix` with every column scaled to sum to 1
    pub normalised: [[f64; 3]; 3],
    /// xy chromaticity of the R, G and B primaries
    pub primaries_xy: [[f64; 2]; 3],
}

/// Integrates the colour matching functions against the R, G, B spectral
/// responses (already sampled at the CMF wavelengths, shape `(3, n)`).
pub fn xyz_matrix(cmf: &ColourMatchingFunctions, srf_rgb: ArrayView2<'_, f64>) -> Result<XyzMatrix> {
    let n = cmf.wavelengths.len();
    if srf_rgb.dim() != (3, n) {
        return Err(CalibrationError::shape_mismatch(&[3, n], srf_rgb.shape()));
    }
    let product = cmf.xyz.dot(&srf_rgb.t()) / n as f64;

    let mut matrix = [[0.0; 3]; 3];
    let mut normalised = [[0.0; 3]; 3];
    let mut primaries_xy = [[0.0; 2]; 3];
    for colour in 0..3 {
        let column = product.column(colour);
        let sum = column.sum();
        if sum <= 0.0 {
            return Err(CalibrationError::FitError(format!(
                "channel {} has no overlap with the colour matching functions",
                colour
            )));
        }
        for component in 0..3 {
            matrix[component][colour] = column[component];
            normalised[component][colour] = column[component] / sum;
        }
        primaries_xy[colour] = [column[0] / sum, column[1] / sum];
    }
    Ok(XyzMatrix {
        matrix,
        normalised,
        primaries_xy,
    })
}

#[derive(Serialize)]
struct Curves {
    cmf_wavelengths: Vec<f64>,
    cmf_xyz: Vec<Vec<f64>>,
    srf_wavelengths: Vec<f64>,
    srf_rgb: Vec<Vec<f64>>,
}

/// Computes the XYZ matrix from the camera's spectral response and the
/// colour matching functions in `cmf_file`. Writes
/// `results/spectral_response/xyz_matrix.json` and the input curves to
/// `analysis/spectral_response/curves.json`.
#[instrument]
pub fn run_xyz_matrix(folder: &Path, cmf_file: &Path) -> Result<PathBuf> {
    let folders = CameraFolders::find(folder)?;
    let camera = folders.load_camera()?;
    info!("Loaded Camera object: {}", camera);

    let response = read_spectral_responses(&folders.results)?;
    let srf_rgb = response.rgbg2.slice(ndarray::s![0..3, ..]);
    let cmf = ColourMatchingFunctions::load(cmf_file)?;

    let interpolated = interpolate_spectral_data(response.wavelengths.view(), srf_rgb, cmf.wavelengths.view())?;
    let result = xyz_matrix(&cmf, interpolated.view())?;
    info!("RGB primaries (xy): {:?}", result.primaries_xy);

    io::write_json(
        folders.analysis.join("spectral_response").join("curves.json"),
        &Curves {
            cmf_wavelengths: cmf.wavelengths.to_vec(),
            cmf_xyz: cmf.xyz.outer_iter().map(|r| r.to_vec()).collect(),
            srf_wavelengths: response.wavelengths.to_vec(),
            srf_rgb: srf_rgb.outer_iter().map(|r| r.to_vec()).collect(),
        },
    )?;
    let save_to = folders.results.join("spectral_response").join("xyz_matrix.json");
    io::write_json(&save_to, &result)?;
    info!("Saved XYZ matrix to '{}'", save_to.display());
    Ok(save_to)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{array, Array};

    #[test]
    fn test_interpolation_zero_outside_range() {
        let wavelengths = array![400.0, 500.0, 600.0];
        let data = array![[1.0, 2.0, 3.0], [0.0, 1.0, 0.0]];
        let new = array![350.0, 450.0, 600.0, 650.0];
        let out = interpolate_spectral_data(wavelengths.view(), data.view(), new.view()).unwrap();
        assert_eq!(out.row(0).to_vec(), vec![0.0, 1.5, 3.0, 0.0]);
        assert_eq!(out.row(1).to_vec(), vec![0.0, 0.5, 0.0, 0.0]);
    }

    #[test]
    fn test_xyz_matrix_of_identical_responses() {
        let wavelengths = Array::linspace(400.0, 700.0, 4);
        let cmf = ColourMatchingFunctions {
            wavelengths,
            xyz: array![[1.0, 1.0, 0.0, 0.0], [0.0, 1.0, 1.0, 0.0], [0.0, 0.0, 1.0, 1.0]],
        };
        // R only sees the first band, G the middle two, B the last
        let srf = array![[1.0, 0.0, 0.0, 0.0], [0.0, 1.0, 1.0, 0.0], [0.0, 0.0, 0.0, 1.0]];
        let result = xyz_matrix(&cmf, srf.view()).unwrap();
        assert_eq!(result.normalised[0][0], 1.0);
        assert_eq!(result.primaries_xy[0], [1.0, 0.0]);
        assert_eq!(result.primaries_xy[1], [0.25, 0.5]);
        assert_eq!(result.primaries_xy[2], [0.0, 0.0]);
        assert_eq!(result.matrix[1][1], 0.5);
        for colour in 0..3 {
            let sum: f64 = (0..3).map(|c| result.normalised[c][colour]).sum();
            assert!((sum - 1.0).abs() < 1e-12);
        }
    }

    #[test]
    fn test_read_spectral_responses_fallback() {
        let dir = tempfile::tempdir().unwrap();
        let folder = dir.path().join("spectral_response");
        let curve = Array2::from_shape_fn((9, 5), |(r, c)| if r == 0 { 400.0 + 10.0 * c as f64 } else { r as f64 });
        io::save_array(folder.join("curve.npy"), &curve).unwrap();
        let response = read_spectral_responses(dir.path()).unwrap();
        assert_eq!(response.wavelengths[4], 440.0);
        assert_eq!(response.rgbg2.dim(), (4, 5));
        assert_eq!(response.errors[[0, 0]], 5.0);

        let monochromator = curve.mapv(|v| v * 2.0);
        io::save_array(folder.join("monochromator_curve.npy"), &monochromator).unwrap();
        let response = read_spectral_responses(dir.path()).unwrap();
        assert_eq!(response.wavelengths[0], 800.0);
    }

    #[test]
    fn test_load_cmf_csv() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cie.csv");
        std::fs::write(&path, "400,0.1,0.0,0.5\n500,0.0,0.3,0.2\n600,1.0,0.6,0.0\n").unwrap();
        let cmf = ColourMatchingFunctions::load(&path).unwrap();
        assert_eq!(cmf.wavelengths.to_vec(), vec![400.0, 500.0, 600.0]);
        assert_eq!(cmf.xyz.row(1).to_vec(), vec![0.0, 0.3, 0.6]);
    }

    #[test]
    fn test_read_bandwidths() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("spectral_bandwidths.dat"), "# R G B G2\n80.1 95.2 70.3 95.0\n").unwrap();
        assert_eq!(read_spectral_bandwidths(dir.path()).unwrap(), vec![80.1, 95.2, 70.3, 95.0]);
    }
}
