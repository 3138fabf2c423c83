use std::path::{Path, PathBuf};

use ndarray::{Array, Array2, ArrayD, Axis, Dimension, Ix3, IxDyn, Slice};
use tracing::{debug, info};

use crate::calibration::common::error::{CalibrationError, Result};
use crate::calibration::io::npy::{read_array, read_array2};
use crate::calibration::io::{list_files, read_dat};

/// Kinds of per-condition stack files.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StackKind {
    /// Raw means, `*_mean.npy`
    Mean,
    /// Raw standard deviations, `*_stds.npy`
    Stds,
    /// JPEG means, `*_jmean.npy`
    JpegMean,
    /// JPEG standard deviations, `*_jstds.npy`
    JpegStds,
}

impl StackKind {
    pub fn suffix(self) -> &'static str {
        match self {
            StackKind::Mean => "_mean.npy",
            StackKind::Stds => "_stds.npy",
            StackKind::JpegMean => "_jmean.npy",
            StackKind::JpegStds => "_jstds.npy",
        }
    }
}

/// Rectangular selection applied to every 2D array of a stack, as
/// half-open row and column ranges.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Region {
    pub rows: (usize, usize),
    pub cols: (usize, usize),
}

impl Region {
    /// The 2x2 block at the centre of an array of the given shape.
    pub fn centre(height: usize, width: usize) -> Self {
        let (mid_y, mid_x) = (height / 2, width / 2);
        Region {
            rows: (mid_y, mid_y + 2),
            cols: (mid_x, mid_x + 2),
        }
    }
}

/// Values parsed from the filenames together with the stacked arrays,
/// shape `(files, height, width)` for raw stacks.
#[derive(Debug, Clone)]
pub struct Stack<V, D: Dimension = Ix3> {
    pub values: Vec<V>,
    pub data: Array<f64, D>,
    pub files: Vec<PathBuf>,
}

impl<V, D: Dimension> Stack<V, D> {
    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// Files in `folder` whose names end with `suffix`, sorted by name.
pub fn stack_files(folder: &Path, suffix: &str) -> Result<Vec<PathBuf>> {
    let files = list_files(folder, |name| name.ends_with(suffix))?;
    if files.is_empty() {
        return Err(CalibrationError::NoFiles {
            folder: folder.display().to_string(),
            pattern: format!("*{}", suffix),
        });
    }
    Ok(files)
}

/// Loads every stack file of `kind` in `folder`, parsing one value per file
/// with `retrieve_value` and optionally cutting each array to `selection`.
///
/// Every file must hold a 2D array.
pub fn load_stack<V, F>(
    folder: &Path,
    kind: StackKind,
    retrieve_value: F,
    selection: Option<Region>,
) -> Result<Stack<V>>
where
    F: Fn(&Path) -> Result<V>,
{
    let stack = load_stack_dyn(folder, kind, retrieve_value, selection)?;
    let shape = stack.data.shape().to_vec();
    let data = stack
        .data
        .into_dimensionality::<Ix3>()
        .map_err(|_| CalibrationError::NpyError(format!("expected 2D arrays, got stack of {:?}", shape)))?;
    Ok(Stack {
        values: stack.values,
        data,
        files: stack.files,
    })
}

/// Like [`load_stack`] but for arrays of any dimensionality, such as
/// `(height, width, 3)` JPEG means. The selection cuts the first two axes.
pub fn load_stack_dyn<V, F>(
    folder: &Path,
    kind: StackKind,
    retrieve_value: F,
    selection: Option<Region>,
) -> Result<Stack<V, IxDyn>>
where
    F: Fn(&Path) -> Result<V>,
{
    let files = stack_files(folder, kind.suffix())?;
    info!("Loading {} {:?} files from {}", files.len(), kind, folder.display());

    let mut values = Vec::with_capacity(files.len());
    let mut arrays: Vec<ArrayD<f64>> = Vec::with_capacity(files.len());
    for file in &files {
        let array = read_array(file)?;
        let array = match selection {
            Some(region) => select(array, region)?,
            None => array,
        };
        if let Some(first) = arrays.first() {
            if first.shape() != array.shape() {
                return Err(CalibrationError::shape_mismatch(first.shape(), array.shape()));
            }
        }
        values.push(retrieve_value(file)?);
        arrays.push(array);
    }

    let views: Vec<_> = arrays.iter().map(|a| a.view()).collect();
    let data = ndarray::stack(Axis(0), &views)
        .map_err(|e| CalibrationError::NpyError(e.to_string()))?;
    debug!("Stacked shape {:?}", data.shape());

    Ok(Stack { values, data, files })
}

fn select(array: ArrayD<f64>, region: Region) -> Result<ArrayD<f64>> {
    if array.ndim() < 2 {
        return Err(CalibrationError::shape_mismatch(&[region.rows.1, region.cols.1], array.shape()));
    }
    let (height, width) = (array.shape()[0], array.shape()[1]);
    if region.rows.1 > height || region.cols.1 > width {
        return Err(CalibrationError::InvalidDimensions(width, height));
    }
    let mut array = array;
    array.slice_axis_inplace(Axis(0), Slice::from(region.rows.0..region.rows.1));
    array.slice_axis_inplace(Axis(1), Slice::from(region.cols.0..region.cols.1));
    Ok(array.as_standard_layout().into_owned())
}

/// Shape of the first file matching `suffix` in `folder`.
pub fn expected_array_size(folder: &Path, suffix: &str) -> Result<Vec<usize>> {
    let files = stack_files(folder, suffix)?;
    Ok(read_array(&files[0])?.shape().to_vec())
}

/// Shape of the raw mean arrays in `folder`.
pub fn array_size_raw(folder: &Path) -> Result<Vec<usize>> {
    expected_array_size(folder, StackKind::Mean.suffix())
}

/// Reads the Bayer colour map `colour.npy` in a stacks folder.
pub fn load_colour(stacks: &Path) -> Result<Array2<u8>> {
    crate::calibration::io::npy::read_colour_map(stacks.join("colour.npy"))
}

/// Reads the polariser offset angle from `linearity/default_angle.dat`.
pub fn load_angle(stacks: &Path) -> Result<f64> {
    let path = stacks.join("linearity").join("default_angle.dat");
    read_dat(&path)?
        .into_iter()
        .flatten()
        .next()
        .ok_or_else(|| CalibrationError::InputReadError(format!("{}: empty file", path.display())))
}

/// Reads a gain table and the ISO speed it was measured at (from its name).
pub fn read_gain_table(path: &Path) -> Result<(f64, Array2<f64>)> {
    let iso = crate::calibration::io::filenames::split_iso(path)?;
    Ok((iso, read_array2(path)?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::calibration::io::filenames::split_iso;
    use crate::calibration::io::npy::save_array;

    #[test]
    fn test_load_stack_sorted_with_selection() {
        let dir = tempfile::tempdir().unwrap();
        for iso in [400u32, 100, 200] {
            let array = Array2::from_elem((4, 6), iso as f64);
            save_array(dir.path().join(format!("iso{}_mean.npy", iso)), &array).unwrap();
            save_array(dir.path().join(format!("iso{}_stds.npy", iso)), &array).unwrap();
        }

        let stack = load_stack(dir.path(), StackKind::Mean, split_iso, Some(Region::centre(4, 6))).unwrap();
        // sorted by filename: iso100, iso200, iso400
        assert_eq!(stack.values, vec![100.0, 200.0, 400.0]);
        assert_eq!(stack.data.dim(), (3, 2, 2));
        assert_eq!(stack.data[[2, 1, 1]], 400.0);

        let stds = load_stack(dir.path(), StackKind::Stds, split_iso, None).unwrap();
        assert_eq!(stds.data.dim(), (3, 4, 6));
        assert_eq!(array_size_raw(dir.path()).unwrap(), vec![4, 6]);
    }

    #[test]
    fn test_missing_files() {
        let dir = tempfile::tempdir().unwrap();
        let result = load_stack(dir.path(), StackKind::JpegMean, split_iso, None);
        assert!(matches!(result, Err(CalibrationError::NoFiles { .. })));
    }

    #[test]
    fn test_mismatched_shapes() {
        let dir = tempfile::tempdir().unwrap();
        save_array(dir.path().join("iso100_mean.npy"), &Array2::<f64>::zeros((2, 2))).unwrap();
        save_array(dir.path().join("iso200_mean.npy"), &Array2::<f64>::zeros((2, 4))).unwrap();
        let result = load_stack(dir.path(), StackKind::Mean, split_iso, None);
        assert!(matches!(result, Err(CalibrationError::ShapeMismatch { .. })));
    }

    #[test]
    fn test_load_angle_and_gain_table() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("linearity")).unwrap();
        std::fs::write(dir.path().join("linearity/default_angle.dat"), "74.5\n").unwrap();
        assert_eq!(load_angle(dir.path()).unwrap(), 74.5);

        let path = dir.path().join("gain_iso800.npy");
        save_array(&path, &Array2::from_elem((2, 2), 1.5)).unwrap();
        let (iso, table) = read_gain_table(&path).unwrap();
        assert_eq!(iso, 800.0);
        assert_eq!(table[[0, 0]], 1.5);
    }
}
