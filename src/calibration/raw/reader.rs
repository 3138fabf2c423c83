use crate::calibration::common::error::Result;
use crate::calibration::raw::types::RawFrame;

pub trait RawImageReader {
    fn read_raw(&self, data: &[u8]) -> Result<RawFrame>;
}
