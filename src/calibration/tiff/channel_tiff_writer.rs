use std::io::{Cursor, Seek, Write};

use ndarray::{ArrayView2, ArrayView3, Axis};
use tiff::encoder::colortype::{Gray16, Gray32Float, RGB16};
use tiff::encoder::compression::DeflateLevel;
use tiff::encoder::{Compression, TiffEncoder};
use tracing::debug;

use crate::calibration::common::config::TiffCompression;
use crate::calibration::common::error::{CalibrationError, Result};
use crate::calibration::raw::RgbFrame;
use crate::calibration::tiff::writer::TiffWriter;

pub struct ChannelTiffWriter;

fn compression_for(compression: TiffCompression) -> Compression {
    match compression {
        TiffCompression::None => Compression::Uncompressed,
        TiffCompression::Lzw => Compression::Lzw,
        TiffCompression::DeflateFast => Compression::Deflate(DeflateLevel::Fast),
        TiffCompression::DeflateBalanced => Compression::Deflate(DeflateLevel::Balanced),
        TiffCompression::DeflateBest => Compression::Deflate(DeflateLevel::Best),
    }
}

fn encoder<W: Write + Seek>(buffer: W, compression: TiffCompression) -> Result<TiffEncoder<W>> {
    Ok(TiffEncoder::new(buffer)
        .map_err(|e| CalibrationError::EncodeError(e.to_string()))?
        .with_compression(compression_for(compression)))
}

impl TiffWriter for ChannelTiffWriter {
    fn write_channels(&self, stack: ArrayView3<'_, u16>, output: &mut dyn Write, compression: TiffCompression) -> Result<()> {
        let (channels, height, width) = stack.dim();
        debug!("Encoding {} TIFF pages: {}x{}", channels, width, height);

        let mut buffer = Vec::new();
        let mut encoder = encoder(Cursor::new(&mut buffer), compression)?;
        for plane in stack.axis_iter(Axis(0)) {
            let data: Vec<u16> = plane.iter().copied().collect();
            encoder
                .write_image::<Gray16>(width as u32, height as u32, &data)
                .map_err(|e| CalibrationError::EncodeError(e.to_string()))?;
        }
        drop(encoder);
        output.write_all(&buffer)?;

        debug!("TIFF encoding complete");
        Ok(())
    }

    fn write_rgb(&self, image: &RgbFrame, output: &mut dyn Write, compression: TiffCompression) -> Result<()> {
        debug!("Encoding RGB TIFF image: {}x{}", image.width, image.height);

        let mut buffer = Vec::new();
        encoder(Cursor::new(&mut buffer), compression)?
            .write_image::<RGB16>(image.width as u32, image.height as u32, &image.data)
            .map_err(|e| CalibrationError::EncodeError(e.to_string()))?;
        output.write_all(&buffer)?;
        Ok(())
    }

    fn write_map(&self, map: ArrayView2<'_, f64>, output: &mut dyn Write, compression: TiffCompression) -> Result<()> {
        let (height, width) = map.dim();
        debug!("Encoding float TIFF map: {}x{}", width, height);

        let data: Vec<f32> = map.iter().map(|&v| v as f32).collect();
        let mut buffer = Vec::new();
        encoder(Cursor::new(&mut buffer), compression)?
            .write_image::<Gray32Float>(width as u32, height as u32, &data)
            .map_err(|e| CalibrationError::EncodeError(e.to_string()))?;
        output.write_all(&buffer)?;
        Ok(())
    }
}
