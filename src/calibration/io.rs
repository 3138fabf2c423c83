//! Loading and saving calibration data
//!
//! Stacks of per-condition NPY arrays, filename conventions, and the small
//! whitespace-separated `.dat` tables some calibration products use.

pub mod filenames;
pub mod npy;
mod stacks;

pub use filenames::{
    intensity_from_filename, parse_exposure, split_exposure_time, split_iso, split_pol_angle,
    split_path,
};
pub use npy::{read_array, read_array2, read_array3, read_colour_map, save_array};
pub use stacks::{
    array_size_raw, expected_array_size, load_angle, load_colour, load_stack, load_stack_dyn,
    read_gain_table, stack_files, Region, Stack, StackKind,
};

use std::fmt::Display;
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::calibration::common::error::{CalibrationError, Result};

/// Regular files in `folder` whose name satisfies `keep`, sorted by path.
pub fn list_files<F: Fn(&str) -> bool>(folder: &Path, keep: F) -> Result<Vec<PathBuf>> {
    let entries = std::fs::read_dir(folder)
        .map_err(|e| CalibrationError::InputReadError(format!("{}: {}", folder.display(), e)))?;
    let mut files = Vec::new();
    for entry in entries {
        let path = entry?.path();
        let matches = path
            .file_name()
            .and_then(|n| n.to_str())
            .map(|name| keep(name))
            .unwrap_or(false);
        if matches && path.is_file() {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}

/// Reads a whitespace-separated table of numbers. Lines starting with `#`
/// and blank lines are skipped.
pub fn read_dat<P: AsRef<Path>>(path: P) -> Result<Vec<Vec<f64>>> {
    let path = path.as_ref();
    let text = std::fs::read_to_string(path)
        .map_err(|e| CalibrationError::InputReadError(format!("{}: {}", path.display(), e)))?;
    text.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(|line| {
            line.split_whitespace()
                .map(|token| {
                    token.parse::<f64>().map_err(|_| {
                        CalibrationError::InputReadError(format!(
                            "{}: cannot parse '{}'",
                            path.display(),
                            token
                        ))
                    })
                })
                .collect()
        })
        .collect()
}

/// Writes rows of values as a whitespace-separated table.
pub fn write_dat<P: AsRef<Path>, T: Display>(path: P, rows: &[Vec<T>]) -> Result<()> {
    let path = path.as_ref();
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let mut file = std::fs::File::create(path)
        .map_err(|e| CalibrationError::OutputWriteError(format!("{}: {}", path.display(), e)))?;
    for row in rows {
        let line: Vec<String> = row.iter().map(|v| v.to_string()).collect();
        writeln!(file, "{}", line.join(" "))?;
    }
    Ok(())
}

/// Serialises `value` as pretty JSON, creating parent folders as needed.
pub fn write_json<P: AsRef<Path>, T: serde::Serialize>(path: P, value: &T) -> Result<()> {
    let path = path.as_ref();
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let file = std::fs::File::create(path)
        .map_err(|e| CalibrationError::OutputWriteError(format!("{}: {}", path.display(), e)))?;
    serde_json::to_writer_pretty(std::io::BufWriter::new(file), value)?;
    Ok(())
}

pub fn read_json<P: AsRef<Path>, T: serde::de::DeserializeOwned>(path: P) -> Result<T> {
    let path = path.as_ref();
    let data = std::fs::read_to_string(path)
        .map_err(|e| CalibrationError::InputReadError(format!("{}: {}", path.display(), e)))?;
    Ok(serde_json::from_str(&data)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dat_round_trip_skips_comments() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out/table.dat");
        write_dat(&path, &[vec![1.0, 2.5], vec![3.0, -4.0]]).unwrap();
        let mut text = std::fs::read_to_string(&path).unwrap();
        text.insert_str(0, "# header\n\n");
        std::fs::write(&path, text).unwrap();

        assert_eq!(read_dat(&path).unwrap(), vec![vec![1.0, 2.5], vec![3.0, -4.0]]);
    }

    #[test]
    fn test_json_round_trip_with_owned_path() {
        let dir = tempfile::tempdir().unwrap();
        let path: PathBuf = dir.path().join("nested").join("values.json");
        write_json(path.clone(), &vec![1.5, -2.0]).unwrap();
        let values: Vec<f64> = read_json(path).unwrap();
        assert_eq!(values, vec![1.5, -2.0]);
        assert!(read_json::<_, Vec<f64>>(dir.path().join("missing.json")).is_err());
    }

    #[test]
    fn test_read_dat_rejects_text() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.dat");
        std::fs::write(&path, "1 two 3\n").unwrap();
        assert!(read_dat(&path).is_err());
    }

    #[test]
    fn test_list_files_filters_and_sorts() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["b_mean.npy", "a_mean.npy", "a_stds.npy"] {
            std::fs::write(dir.path().join(name), b"").unwrap();
        }
        std::fs::create_dir(dir.path().join("c_mean.npy")).unwrap();
        let files = list_files(dir.path(), |n| n.ends_with("_mean.npy")).unwrap();
        let names: Vec<String> = files
            .iter()
            .map(|f| f.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["a_mean.npy", "b_mean.npy"]);
    }
}
