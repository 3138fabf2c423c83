use std::path::Path;

use tracing::{info, instrument};

use crate::calibration::common::error::{CalibrationError, Result};
use crate::calibration::metadata::camera::{Camera, Device, ImageProperties, Settings};
use crate::calibration::metadata::folders::CameraFolders;
use crate::calibration::raw::{read_raw_file, RawFrame, RawImageReader};

/// Bit depth of a sensor from the value of a saturated pixel.
///
/// Only maxima of the form 2^n - 1 with 8 <= n <= 16 are accepted; anything
/// else means the image holds no saturated pixel and the depth cannot be
/// told.
pub fn bit_depth_from_maximum(maximum: u32) -> Result<u32> {
    (8..=16)
        .find(|&bits| maximum == (1u32 << bits) - 1)
        .ok_or(CalibrationError::Unsaturated(maximum))
}

/// Builds the camera description from a saturated RAW frame and the
/// user-supplied ranges.
pub fn generate_metadata(frame: &RawFrame, raw_extension: &str, settings: Settings) -> Result<Camera> {
    settings.validate()?;
    let bit_depth = bit_depth_from_maximum(frame.max_value() as u32)?;

    let camera = Camera {
        device: Device {
            manufacturer: frame.make.clone(),
            name: frame.model.clone(),
        },
        image: ImageProperties {
            raw_extension: raw_extension.to_string(),
            bias: frame.black_levels,
            bayer_pattern: frame.pattern,
            bit_depth,
        },
        settings,
    };
    info!("Device properties: {:?}", camera.device);
    info!("Image properties: {:?}", camera.image);
    info!("Camera settings: {:?}", camera.settings);
    Ok(camera)
}

/// Reads `raw_file`, generates the camera description and writes it to
/// `info.json` in `root`, creating the folder layout.
#[instrument(skip(reader, settings))]
pub fn run_generate_metadata<R: RawImageReader>(
    reader: &R,
    raw_file: &Path,
    root: &Path,
    settings: Settings,
) -> Result<Camera> {
    let frame = {
        let _span = tracing::info_span!("decode_raw").entered();
        read_raw_file(reader, raw_file)?
    };
    info!("Loaded data");

    let extension = raw_file
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| format!(".{}", e))
        .unwrap_or_default();
    let camera = generate_metadata(&frame, &extension, settings)?;

    let folders = CameraFolders::at_root(root);
    folders.create_all()?;
    camera.save(&folders.info_file())?;
    info!("Saved camera description to '{}'", folders.info_file().display());
    Ok(camera)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::calibration::bayer::BayerPattern;

    struct MockReader {
        maximum: u16,
    }

    impl RawImageReader for MockReader {
        fn read_raw(&self, _data: &[u8]) -> Result<RawFrame> {
            let mut data = vec![600u16; 16];
            data[5] = self.maximum;
            Ok(RawFrame {
                width: 4,
                height: 4,
                data,
                bits_per_sample: 12,
                black_levels: [512, 513, 514, 515],
                white_level: 4095,
                pattern: BayerPattern::BGGR,
                make: "Acme".into(),
                model: "Cam 1".into(),
            })
        }
    }

    fn settings() -> Settings {
        Settings {
            iso_min: 100,
            iso_max: 3200,
            exposure_min: "1/8000".into(),
            exposure_max: "30".into(),
        }
    }

    #[test]
    fn test_bit_depth_from_maximum() {
        assert_eq!(bit_depth_from_maximum(255).unwrap(), 8);
        assert_eq!(bit_depth_from_maximum(1023).unwrap(), 10);
        assert_eq!(bit_depth_from_maximum(65535).unwrap(), 16);
        assert!(matches!(bit_depth_from_maximum(1000), Err(CalibrationError::Unsaturated(1000))));
        assert!(bit_depth_from_maximum(127).is_err());
    }

    #[test]
    fn test_run_generate_metadata_writes_info() {
        let dir = tempfile::tempdir().unwrap();
        let raw_file = dir.path().join("saturated.dng");
        std::fs::write(&raw_file, b"not decoded by the mock").unwrap();
        let root = dir.path().join("acme");

        let camera = run_generate_metadata(&MockReader { maximum: 4095 }, &raw_file, &root, settings()).unwrap();
        assert_eq!(camera.image.bit_depth, 12);
        assert_eq!(camera.image.raw_extension, ".dng");
        assert_eq!(camera.image.bias, [512, 513, 514, 515]);
        assert_eq!(camera.image.bayer_pattern, BayerPattern::BGGR);

        let folders = CameraFolders::find(root.join("stacks")).unwrap();
        assert_eq!(folders.load_camera().unwrap(), camera);
    }

    #[test]
    fn test_unsaturated_image_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let raw_file = dir.path().join("dim.dng");
        std::fs::write(&raw_file, b"").unwrap();
        let result = run_generate_metadata(&MockReader { maximum: 3000 }, &raw_file, dir.path(), settings());
        assert!(matches!(result, Err(CalibrationError::Unsaturated(3000))));
    }
}
