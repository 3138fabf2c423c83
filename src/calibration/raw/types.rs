//! RAW image data types

use ndarray::Array2;

use crate::calibration::bayer::BayerPattern;
use crate::calibration::common::error::{CalibrationError, Result};

/// Decoded RAW sensor frame
#[derive(Debug, Clone)]
pub struct RawFrame {
    /// Width of the image in pixels
    pub width: usize,
    /// Height of the image in pixels
    pub height: usize,
    /// Raw pixel data (single channel Bayer mosaic, row-major)
    pub data: Vec<u16>,
    /// Actual bits per sample from the sensor (e.g., 12, 14, or 16)
    pub bits_per_sample: u32,
    /// Black level per channel, R, G, B, G2 order
    pub black_levels: [u16; 4],
    /// Sensor white level
    pub white_level: u16,
    /// Colour filter layout
    pub pattern: BayerPattern,
    /// Camera manufacturer as reported by the file
    pub make: String,
    /// Camera model as reported by the file
    pub model: String,
}

impl RawFrame {
    /// Mosaic as an `(height, width)` array.
    pub fn to_array(&self) -> Result<Array2<u16>> {
        Array2::from_shape_vec((self.height, self.width), self.data.clone()).map_err(|_| {
            CalibrationError::shape_mismatch(&[self.height * self.width], &[self.data.len()])
        })
    }

    pub fn max_value(&self) -> u16 {
        self.data.iter().copied().max().unwrap_or(0)
    }
}

/// RGB frame after demosaicking
#[derive(Debug, Clone)]
pub struct RgbFrame {
    pub width: usize,
    pub height: usize,
    /// RGB pixel data interleaved [R, G, B, R, G, B, ...]
    pub data: Vec<u16>,
}
