use std::fmt;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::calibration::bayer::BayerPattern;
use crate::calibration::common::error::{CalibrationError, Result};
use crate::calibration::io::{parse_exposure, read_json, write_json};

/// Camera identification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Device {
    pub manufacturer: String,
    pub name: String,
}

/// Properties of the RAW images the camera produces.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageProperties {
    #[serde(rename = "raw extension")]
    pub raw_extension: String,
    /// Bias (black level) per channel in R, G, B, G2 order
    pub bias: [u16; 4],
    #[serde(rename = "bayer pattern")]
    pub bayer_pattern: BayerPattern,
    #[serde(rename = "bit depth")]
    pub bit_depth: u32,
}

/// Ranges of ISO speed and exposure time the camera supports.
///
/// Exposure times are kept as written by the user, e.g. "1/4000" or "30".
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Settings {
    #[serde(rename = "ISO min")]
    pub iso_min: u32,
    #[serde(rename = "ISO max")]
    pub iso_max: u32,
    #[serde(rename = "t_exp min")]
    pub exposure_min: String,
    #[serde(rename = "t_exp max")]
    pub exposure_max: String,
}

impl Settings {
    /// Validates the ranges: ISO min <= max and both exposure times
    /// parseable as an integer, float or fraction with min <= max.
    pub fn validate(&self) -> Result<()> {
        if self.iso_min == 0 || self.iso_min > self.iso_max {
            return Err(CalibrationError::MetadataError(format!(
                "invalid ISO range {}..{}",
                self.iso_min, self.iso_max
            )));
        }
        let min = self.exposure_min_seconds()?;
        let max = self.exposure_max_seconds()?;
        if min <= 0.0 || min > max {
            return Err(CalibrationError::MetadataError(format!(
                "invalid exposure range {}..{}",
                self.exposure_min, self.exposure_max
            )));
        }
        Ok(())
    }

    pub fn exposure_min_seconds(&self) -> Result<f64> {
        parse_exposure_setting(&self.exposure_min)
    }

    pub fn exposure_max_seconds(&self) -> Result<f64> {
        parse_exposure_setting(&self.exposure_max)
    }
}

fn parse_exposure_setting(text: &str) -> Result<f64> {
    if text.contains('_') {
        return Err(CalibrationError::MetadataError(format!("cannot parse exposure time '{}'", text)));
    }
    parse_exposure(text)
        .ok_or_else(|| CalibrationError::MetadataError(format!("cannot parse exposure time '{}'", text)))
}

/// Contents of a camera's `info.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Camera {
    pub device: Device,
    pub image: ImageProperties,
    pub settings: Settings,
}

impl Camera {
    pub fn load(path: &Path) -> Result<Self> {
        read_json(path)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        write_json(path, self)
    }

    /// Largest value a pixel can hold, 2^bits - 1.
    pub fn saturation_value(&self) -> f64 {
        2f64.powi(self.image.bit_depth as i32) - 1.0
    }
}

impl fmt::Display for Camera {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.device.manufacturer, self.device.name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const INFO_JSON: &str = r#"{
        "device": {"manufacturer": "Apple", "name": "iPhone SE"},
        "image": {"raw extension": ".dng", "bias": [528, 528, 528, 528],
                  "bayer pattern": [[0, 1], [3, 2]], "bit depth": 12},
        "settings": {"ISO min": 23, "ISO max": 1840, "t_exp min": "1/20000", "t_exp max": "1/3"}
    }"#;

    #[test]
    fn test_parse_info_json() {
        let camera: Camera = serde_json::from_str(INFO_JSON).unwrap();
        assert_eq!(camera.device.name, "iPhone SE");
        assert_eq!(camera.image.bayer_pattern, BayerPattern::RGGB);
        assert_eq!(camera.image.bit_depth, 12);
        assert_eq!(camera.saturation_value(), 4095.0);
        assert_eq!(camera.to_string(), "Apple iPhone SE");
        assert!(camera.settings.validate().is_ok());
        assert!((camera.settings.exposure_max_seconds().unwrap() - 1.0 / 3.0).abs() < 1e-12);
    }

    #[test]
    fn test_save_and_load() {
        let camera: Camera = serde_json::from_str(INFO_JSON).unwrap();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("info.json");
        camera.save(&path).unwrap();
        let text = std::fs::read_to_string(&path).unwrap();
        assert!(text.contains("\"bayer pattern\""));
        assert_eq!(Camera::load(&path).unwrap(), camera);
    }

    #[test]
    fn test_invalid_settings() {
        let mut settings = Settings {
            iso_min: 100,
            iso_max: 50,
            exposure_min: "1/100".into(),
            exposure_max: "2".into(),
        };
        assert!(settings.validate().is_err());
        settings.iso_max = 800;
        assert!(settings.validate().is_ok());
        settings.exposure_min = "fast".into();
        assert!(settings.validate().is_err());
        settings.exposure_min = "1_100".into();
        assert!(settings.validate().is_err());
    }
}
