//! NPY array reading and writing.
//!
//! Stacks produced by the extraction step may be stored with different
//! dtypes (float64 means, uint16 raw values, uint8 colour maps), so readers
//! accept any of the common numeric dtypes and widen to `f64`.

use std::path::Path;

use ndarray::{ArrayD, Dimension, Ix2, Ix3, IntoDimension};
use ndarray_npy::{read_npy, write_npy, ReadNpyError, WriteNpyExt};
use tracing::debug;

use crate::calibration::common::error::{CalibrationError, Result};

fn npy_error(path: &Path, e: impl std::fmt::Display) -> CalibrationError {
    CalibrationError::NpyError(format!("{}: {}", path.display(), e))
}

macro_rules! try_dtype {
    ($path:expr, $ty:ty) => {
        match read_npy::<_, ArrayD<$ty>>($path) {
            Ok(array) => return Ok(array.mapv(|v| v as f64)),
            Err(ReadNpyError::WrongDescriptor(_)) => {}
            Err(e) => return Err(npy_error($path, e)),
        }
    };
}

/// Reads an NPY file of any common numeric dtype as `f64`.
pub fn read_array<P: AsRef<Path>>(path: P) -> Result<ArrayD<f64>> {
    let path = path.as_ref();
    debug!("Reading {}", path.display());
    try_dtype!(path, f64);
    try_dtype!(path, f32);
    try_dtype!(path, u16);
    try_dtype!(path, u8);
    try_dtype!(path, i64);
    try_dtype!(path, i32);
    try_dtype!(path, i16);
    try_dtype!(path, u32);
    Err(npy_error(path, "unsupported dtype"))
}

/// Reads an NPY file and checks its dimensionality.
pub fn read_array_dim<P: AsRef<Path>, D: Dimension>(path: P) -> Result<ndarray::Array<f64, D>> {
    let path = path.as_ref();
    let array = read_array(path)?;
    let shape = array.shape().to_vec();
    array
        .into_dimensionality::<D>()
        .map_err(|_| CalibrationError::NpyError(format!("{}: unexpected shape {:?}", path.display(), shape)))
}

pub fn read_array2<P: AsRef<Path>>(path: P) -> Result<ndarray::Array2<f64>> {
    read_array_dim::<_, Ix2>(path)
}

pub fn read_array3<P: AsRef<Path>>(path: P) -> Result<ndarray::Array3<f64>> {
    read_array_dim::<_, Ix3>(path)
}

/// Reads a Bayer colour map (`colour.npy`) as `u8` indices.
pub fn read_colour_map<P: AsRef<Path>>(path: P) -> Result<ndarray::Array2<u8>> {
    let colours = read_array2(path)?;
    Ok(colours.mapv(|v| v as u8))
}

/// Writes an array to an NPY file, creating parent folders as needed.
pub fn save_array<P: AsRef<Path>, T: WriteNpyExt>(path: P, array: &T) -> Result<()> {
    let path = path.as_ref();
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    write_npy(path, array).map_err(|e| npy_error(path, e))?;
    debug!("Saved {}", path.display());
    Ok(())
}

/// Shape of the array stored in `path`, without converting its contents.
pub fn array_shape<P: AsRef<Path>>(path: P) -> Result<Vec<usize>> {
    Ok(read_array(path)?.shape().to_vec())
}

/// Checks that `actual` has the `expected` shape.
pub fn ensure_shape<D: IntoDimension>(expected: D, actual: &[usize]) -> Result<()> {
    let expected = expected.into_dimension();
    if expected.slice() != actual {
        return Err(CalibrationError::shape_mismatch(expected.slice(), actual));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{array, Array2};

    #[test]
    fn test_reads_integer_arrays_as_f64() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("colour.npy");
        let colours: Array2<u8> = array![[0, 1], [3, 2]];
        save_array(&path, &colours).unwrap();

        let read = read_array2(&path).unwrap();
        assert_eq!(read, array![[0.0, 1.0], [3.0, 2.0]]);
        assert_eq!(read_colour_map(&path).unwrap(), colours);
    }

    #[test]
    fn test_wrong_dimensionality() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/mean.npy");
        save_array(&path, &array![1.0f64, 2.0, 3.0]).unwrap();
        assert!(matches!(read_array2(&path), Err(CalibrationError::NpyError(_))));
        assert_eq!(array_shape(&path).unwrap(), vec![3]);
    }

    #[test]
    fn test_ensure_shape() {
        assert!(ensure_shape((2, 3), &[2, 3]).is_ok());
        assert!(matches!(
            ensure_shape((2, 3), &[3, 2]),
            Err(CalibrationError::ShapeMismatch { .. })
        ));
    }
}
