use std::path::Path;

use ndarray::Array3;
use tracing::debug;

use crate::calibration::common::error::{CalibrationError, Result};

/// Loads a JPEG (or any 8-bit image) as an `(height, width, 3)` array.
pub fn load_jpeg<P: AsRef<Path>>(path: P) -> Result<Array3<u8>> {
    let path = path.as_ref();
    let img = image::open(path)
        .map_err(|e| CalibrationError::InputReadError(format!("{}: {}", path.display(), e)))?
        .to_rgb8();
    let (width, height) = img.dimensions();
    debug!("Loaded JPEG {} ({}x{})", path.display(), width, height);
    Array3::from_shape_vec((height as usize, width as usize, 3), img.into_raw())
        .map_err(|e| CalibrationError::DecodeError(e.to_string()))
}

/// Loads every JPEG in `folder` (sorted by name) into one `(n, h, w, 3)` stack.
pub fn load_jpeg_many<P: AsRef<Path>>(folder: P) -> Result<ndarray::Array4<u8>> {
    let folder = folder.as_ref();
    let files = crate::calibration::io::list_files(folder, |name| {
        let lower = name.to_ascii_lowercase();
        lower.ends_with(".jpg") || lower.ends_with(".jpeg")
    })?;
    let first = files.first().ok_or_else(|| CalibrationError::NoFiles {
        folder: folder.display().to_string(),
        pattern: "*.jp*g".to_string(),
    })?;
    let first = load_jpeg(first)?;
    let (height, width, _) = first.dim();
    let mut stack = ndarray::Array4::zeros((files.len(), height, width, 3));
    stack.index_axis_mut(ndarray::Axis(0), 0).assign(&first);
    for (j, file) in files.iter().enumerate().skip(1) {
        let img = load_jpeg(file)?;
        if img.dim() != first.dim() {
            return Err(CalibrationError::shape_mismatch(first.shape(), img.shape()));
        }
        stack.index_axis_mut(ndarray::Axis(0), j).assign(&img);
    }
    Ok(stack)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgb, RgbImage};

    #[test]
    fn test_load_jpeg_stack() {
        let dir = tempfile::tempdir().unwrap();
        for (name, level) in [("b.jpg", 200u8), ("a.jpeg", 50)] {
            RgbImage::from_pixel(16, 8, Rgb([level, level, level]))
                .save(dir.path().join(name))
                .unwrap();
        }
        std::fs::write(dir.path().join("notes.txt"), "skip").unwrap();

        let stack = load_jpeg_many(dir.path()).unwrap();
        assert_eq!(stack.dim(), (2, 8, 16, 3));
        // sorted by name, so the dark frame comes first
        assert!(stack[[0, 4, 8, 1]] < stack[[1, 4, 8, 1]]);
    }

    #[test]
    fn test_empty_folder() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(load_jpeg_many(dir.path()), Err(CalibrationError::NoFiles { .. })));
    }
}
