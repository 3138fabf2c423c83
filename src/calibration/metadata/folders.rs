use std::path::{Path, PathBuf};

use tracing::debug;

use crate::calibration::common::error::{CalibrationError, Result};
use crate::calibration::metadata::camera::Camera;

/// Name of the camera description file that marks a camera root folder.
pub const INFO_FILE: &str = "info.json";

/// Folder layout of one camera's calibration data.
///
/// ```text
/// <root>/info.json
/// <root>/images/          captured RAW and JPEG files
/// <root>/stacks/          per-condition mean/std NPY stacks, colour.npy
/// <root>/calibration/     calibration products (bias, dark, flat, ISO, ...)
/// <root>/intermediaries/  per-pixel intermediate results
/// <root>/analysis/        diagnostic plots
/// <root>/results/         published results
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CameraFolders {
    pub root: PathBuf,
    pub images: PathBuf,
    pub stacks: PathBuf,
    pub calibration: PathBuf,
    pub intermediaries: PathBuf,
    pub analysis: PathBuf,
    pub results: PathBuf,
}

impl CameraFolders {
    pub fn at_root<P: AsRef<Path>>(root: P) -> Self {
        let root = root.as_ref().to_path_buf();
        Self {
            images: root.join("images"),
            stacks: root.join("stacks"),
            calibration: root.join("calibration"),
            intermediaries: root.join("intermediaries"),
            analysis: root.join("analysis"),
            results: root.join("results"),
            root,
        }
    }

    /// Walks up from `path` to the first folder containing `info.json`.
    pub fn find<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let root = path
            .ancestors()
            .find(|folder| folder.join(INFO_FILE).is_file())
            .ok_or_else(|| {
                CalibrationError::MetadataError(format!(
                    "no {} found in '{}' or any of its parents",
                    INFO_FILE,
                    path.display()
                ))
            })?;
        debug!("Camera root folder: {}", root.display());
        Ok(Self::at_root(root))
    }

    pub fn info_file(&self) -> PathBuf {
        self.root.join(INFO_FILE)
    }

    pub fn load_camera(&self) -> Result<Camera> {
        Camera::load(&self.info_file())
    }

    /// Creates every sub-folder that does not exist yet.
    pub fn create_all(&self) -> Result<()> {
        for folder in [
            &self.images,
            &self.stacks,
            &self.calibration,
            &self.intermediaries,
            &self.analysis,
            &self.results,
        ] {
            std::fs::create_dir_all(folder)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_find_walks_up_to_info_file() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("phone");
        let deep = root.join("stacks").join("bias");
        std::fs::create_dir_all(&deep).unwrap();
        std::fs::write(root.join(INFO_FILE), "{}").unwrap();

        let folders = CameraFolders::find(&deep).unwrap();
        assert_eq!(folders.root, root);
        assert_eq!(folders.calibration, root.join("calibration"));
    }

    #[test]
    fn test_find_without_info_file() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            CameraFolders::find(dir.path()),
            Err(CalibrationError::MetadataError(_))
        ));
    }

    #[test]
    fn test_create_all() {
        let dir = tempfile::tempdir().unwrap();
        let folders = CameraFolders::at_root(dir.path());
        folders.create_all().unwrap();
        assert!(folders.analysis.is_dir());
        assert!(folders.intermediaries.is_dir());
    }
}
