use std::io::Write;

use ndarray::{ArrayView2, ArrayView3};

use crate::calibration::common::config::TiffCompression;
use crate::calibration::common::error::Result;
use crate::calibration::raw::RgbFrame;

pub trait TiffWriter {
    /// One 16-bit greyscale page per channel of a `(channels, h, w)` stack.
    fn write_channels(&self, stack: ArrayView3<'_, u16>, output: &mut dyn Write, compression: TiffCompression) -> Result<()>;
    fn write_rgb(&self, image: &RgbFrame, output: &mut dyn Write, compression: TiffCompression) -> Result<()>;
    /// A single 32-bit float page.
    fn write_map(&self, map: ArrayView2<'_, f64>, output: &mut dyn Write, compression: TiffCompression) -> Result<()>;
}
