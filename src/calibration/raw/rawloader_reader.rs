//! RAW image reader implementation using the rawloader library.
//!
//! Handles decoding RAW sensor data (DNG, ARW, CR2, NEF, ...) and extracting
//! the metadata needed for calibration: black and white levels, the colour
//! filter layout and the camera identification.

use std::io::Cursor;

use rawloader::RawImageData as RawloaderImageData;
use tracing::debug;

use crate::calibration::bayer::BayerPattern;
use crate::calibration::common::error::{CalibrationError, Result};
use crate::calibration::raw::reader::RawImageReader;
use crate::calibration::raw::types::RawFrame;

/// RAW image reader that uses the rawloader library for decoding.
pub struct RawLoaderReader;

/// Default bit depth when no white level information is available from the RAW file.
const DEFAULT_BITS_PER_SAMPLE: u32 = 16;

/// The bit width of the u16 data type, used for calculating actual bits per sample.
const U16_BITS: u32 = 16;

impl RawImageReader for RawLoaderReader {
    /// Reads and decodes RAW image data from a byte array.
    ///
    /// Float RAW data (normalised 0.0-1.0) is scaled to the u16 range. The
    /// second green of the CFA tile is given colour index 3.
    fn read_raw(&self, data: &[u8]) -> Result<RawFrame> {
        debug!("Decoding RAW image, {} bytes", data.len());

        let decoded = rawloader::decode(&mut Cursor::new(data))
            .map_err(|e| CalibrationError::DecodeError(e.to_string()))?;

        let width = decoded.width;
        let height = decoded.height;

        debug!("Decoded image: {}x{}", width, height);

        if decoded.cpp != 1 {
            return Err(CalibrationError::DecodeError(format!(
                "expected a single-channel mosaic, got {} components per pixel",
                decoded.cpp
            )));
        }

        let data: Vec<u16> = match decoded.data {
            RawloaderImageData::Integer(values) => values,
            RawloaderImageData::Float(values) => {
                values.iter().map(|&v| (v * u16::MAX as f32) as u16).collect()
            }
        };

        let layout = [
            [decoded.cfa.color_at(0, 0), decoded.cfa.color_at(0, 1)],
            [decoded.cfa.color_at(1, 0), decoded.cfa.color_at(1, 1)],
        ];
        let pattern = BayerPattern::from_rgb_layout(layout)?;

        let white_level = decoded.whitelevels.iter().max().copied().unwrap_or(u16::MAX);
        let bits_per_sample = if white_level == 0 {
            DEFAULT_BITS_PER_SAMPLE
        } else {
            // e.g. 4095 -> 12 bits, 16383 -> 14 bits
            U16_BITS - white_level.leading_zeros()
        };

        let levels = decoded.blacklevels;
        let green2 = if levels[3] == 0 { levels[1] } else { levels[3] };
        let black_levels = [levels[0], levels[1], levels[2], green2];

        debug!(
            "Pattern {}, bits_per_sample {} (white level {}), black levels {:?}",
            pattern, bits_per_sample, white_level, black_levels
        );

        Ok(RawFrame {
            width,
            height,
            data,
            bits_per_sample,
            black_levels,
            white_level,
            pattern,
            make: decoded.clean_make,
            model: decoded.clean_model,
        })
    }
}
