//! TIFF export of channel planes, demosaicked frames and float maps.

mod channel_tiff_writer;
mod writer;

pub use channel_tiff_writer::ChannelTiffWriter;
pub use writer::TiffWriter;
