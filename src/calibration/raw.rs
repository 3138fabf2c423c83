//! RAW and JPEG image reading module
//!
//! This module provides format-agnostic RAW image reading capabilities.

mod jpeg;
mod rawloader_reader;
mod reader;
pub mod types;

pub use jpeg::{load_jpeg, load_jpeg_many};
pub use rawloader_reader::RawLoaderReader;
pub use reader::RawImageReader;
pub use types::{RawFrame, RgbFrame};

use std::path::Path;

use crate::calibration::common::error::{CalibrationError, Result};

/// Reads and decodes a RAW file from disk with the given reader.
pub fn read_raw_file<R: RawImageReader, P: AsRef<Path>>(reader: &R, path: P) -> Result<RawFrame> {
    let path = path.as_ref();
    let bytes = std::fs::read(path)
        .map_err(|e| CalibrationError::InputReadError(format!("{}: {}", path.display(), e)))?;
    reader.read_raw(&bytes)
}
