//! End-to-end RAW conversion pipelines

mod raw_split;

pub use raw_split::RawSplitPipeline;

use std::path::Path;

use tracing::{info, instrument};

use crate::calibration::common::config::TiffCompression;
use crate::calibration::common::error::{CalibrationError, Result};
use crate::calibration::io;
use crate::calibration::tiff::TiffWriter;

/// Writes a 2D calibration map stored as NPY to a 32-bit float TIFF.
#[instrument(skip(writer))]
pub fn export_map<W: TiffWriter>(writer: &W, input: &Path, output: &Path, compression: TiffCompression) -> Result<()> {
    let map = io::read_array2(input)?;
    if let Some(parent) = output.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let mut output_file = std::fs::File::create(output)
        .map_err(|e| CalibrationError::OutputWriteError(format!("{}: {}", output.display(), e)))?;
    writer.write_map(map.view(), &mut output_file, compression)?;
    info!(height = map.nrows(), width = map.ncols(), "Exported map");
    Ok(())
}
