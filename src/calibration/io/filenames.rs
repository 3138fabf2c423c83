//! Parsing exposure conditions out of stack filenames.
//!
//! Stack files are named after the condition they were taken at, e.g.
//! `iso200_mean.npy`, `t1_250_stds.npy` or `pol37.5_jmean.npy`.

use std::path::Path;

use crate::calibration::common::error::{CalibrationError, Result};
use crate::calibration::linearity::{malus, malus_error};

fn stem(path: &Path) -> Result<&str> {
    path.file_stem()
        .and_then(|s| s.to_str())
        .ok_or_else(|| CalibrationError::FilenameParse(path.display().to_string()))
}

fn parse_error(path: &Path) -> CalibrationError {
    CalibrationError::FilenameParse(path.display().to_string())
}

/// The text following `marker` in the stem, up to the next underscore.
pub fn split_path<'a>(path: &'a Path, marker: &str) -> Result<&'a str> {
    let stem = stem(path)?;
    let (_, after) = stem.split_once(marker).ok_or_else(|| parse_error(path))?;
    Ok(after.split('_').next().unwrap_or(after))
}

/// ISO speed from a name like `iso200_mean.npy`.
pub fn split_iso(path: &Path) -> Result<f64> {
    let value = split_path(path, "iso")?;
    value
        .parse::<u32>()
        .map(f64::from)
        .map_err(|_| parse_error(path))
}

/// Polariser angle in degrees from a name like `pol37.5_mean.npy`.
pub fn split_pol_angle(path: &Path) -> Result<f64> {
    split_path(path, "pol")?.parse::<f64>().map_err(|_| parse_error(path))
}

/// Characters stripped from both ends of the stem before reading an
/// exposure time: the leading `t`, underscores and the `mean`/`stds`/
/// `jmean`/`jstds` suffix letters.
const EXPOSURE_STRIP: &[char] = &['t', '_', 'j', 'm', 'e', 'a', 'n', 's', 'd'];

/// Exposure time in seconds from a name like `t1_250_mean.npy` (1/250 s)
/// or `t0.5_stds.npy`.
pub fn split_exposure_time(path: &Path) -> Result<f64> {
    let stripped = stem(path)?.trim_matches(EXPOSURE_STRIP);
    parse_exposure(stripped).ok_or_else(|| parse_error(path))
}

/// Parses `a_b` or `a/b` as a fraction, anything else as a float.
pub fn parse_exposure(text: &str) -> Option<f64> {
    match text.split_once(['_', '/']) {
        Some((numerator, denominator)) => {
            let numerator: f64 = numerator.trim().parse().ok()?;
            let denominator: f64 = denominator.trim().parse().ok()?;
            if denominator == 0.0 {
                None
            } else {
                Some(numerator / denominator)
            }
        }
        None => text.trim().parse().ok(),
    }
}

/// Relative intensity and its uncertainty for a linearity stack file.
///
/// Names starting with `t` are exposure-time series and the exposure time is
/// the intensity (without uncertainty). Names containing `pol` are polariser
/// series and the intensity follows Malus's law with the given offset angle,
/// using a one degree uncertainty on both polarisers.
pub fn intensity_from_filename(path: &Path, offset_angle: f64) -> Result<(f64, f64)> {
    let name = stem(path)?;
    if name.starts_with('t') {
        Ok((split_exposure_time(path)?, 0.0))
    } else if name.contains("pol") {
        let angle = split_pol_angle(path)?;
        Ok((malus(angle, offset_angle), malus_error(angle, offset_angle, 1.0, 1.0)))
    } else {
        Err(parse_error(path))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_iso() {
        assert_eq!(split_iso(Path::new("stacks/iso200_mean.npy")).unwrap(), 200.0);
        assert_eq!(split_iso(Path::new("iso1600.npy")).unwrap(), 1600.0);
        assert!(split_iso(Path::new("t1_200_mean.npy")).is_err());
        assert!(split_iso(Path::new("isoABC_mean.npy")).is_err());
    }

    #[test]
    fn test_split_exposure_time() {
        let t = split_exposure_time(Path::new("t1_200_mean.npy")).unwrap();
        assert!((t - 0.005).abs() < 1e-12);
        assert_eq!(split_exposure_time(Path::new("t0.5_stds.npy")).unwrap(), 0.5);
        assert_eq!(split_exposure_time(Path::new("t3_jmean.npy")).unwrap(), 3.0);
        assert!(split_exposure_time(Path::new("t1_0_mean.npy")).is_err());
    }

    #[test]
    fn test_split_pol_angle() {
        assert_eq!(split_pol_angle(Path::new("pol37.5_mean.npy")).unwrap(), 37.5);
        assert_eq!(split_pol_angle(Path::new("x_pol120_jstds.npy")).unwrap(), 120.0);
    }

    #[test]
    fn test_parse_exposure_forms() {
        assert_eq!(parse_exposure("1/5"), Some(0.2));
        assert_eq!(parse_exposure("10"), Some(10.0));
        assert_eq!(parse_exposure("0.12"), Some(0.12));
        assert_eq!(parse_exposure("a/5"), None);
    }

    #[test]
    fn test_intensity_from_filename() {
        let (i, err) = intensity_from_filename(Path::new("t1_4_jmean.npy"), 0.0).unwrap();
        assert_eq!((i, err), (0.25, 0.0));

        let (i, err) = intensity_from_filename(Path::new("pol60_jmean.npy"), 0.0).unwrap();
        assert!((i - 0.25).abs() < 1e-12);
        assert!(err > 0.0);

        assert!(intensity_from_filename(Path::new("iso100_mean.npy"), 0.0).is_err());
    }
}
