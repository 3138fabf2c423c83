use std::io::Write;
use std::path::Path;

use tracing::{info, instrument, warn};

use crate::calibration::{
    bayer::{pull_apart, Demosaicker},
    common::config::AnalysisConfig,
    common::error::{CalibrationError, Result},
    raw::{RawFrame, RawImageReader, RawLoaderReader},
    tiff::{ChannelTiffWriter, TiffWriter},
};

/// Decodes a RAW file and writes its R, G, B and G2 planes as a four-page
/// TIFF, or a demosaicked RGB preview.
pub struct RawSplitPipeline<R: RawImageReader, W: TiffWriter> {
    reader: R,
    writer: W,
    config: AnalysisConfig,
}

impl RawSplitPipeline<RawLoaderReader, ChannelTiffWriter> {
    pub fn new(config: AnalysisConfig) -> Self {
        Self {
            reader: RawLoaderReader,
            writer: ChannelTiffWriter,
            config,
        }
    }
}

impl<R: RawImageReader, W: TiffWriter> RawSplitPipeline<R, W> {
    pub fn with_custom(reader: R, writer: W, config: AnalysisConfig) -> Self {
        Self { reader, writer, config }
    }

    fn validate_dimensions(&self, raw_image: &RawFrame) -> Result<()> {
        let (width, height) = (raw_image.width, raw_image.height);

        // the mosaic has to tile into whole 2x2 cells, whatever the config says
        if width == 0 || height == 0 || width % 2 != 0 || height % 2 != 0 {
            return Err(CalibrationError::InvalidDimensions(width, height));
        }

        if !self.config.validate_dimensions {
            return Ok(());
        }

        if raw_image.data.len() != width * height {
            warn!(
                "Decoded {} samples for a {}x{} frame",
                raw_image.data.len(),
                width,
                height
            );
            return Err(CalibrationError::shape_mismatch(&[height, width], &[raw_image.data.len()]));
        }

        Ok(())
    }

    #[instrument(skip(self, input_data, output), fields(input_size = input_data.len()))]
    pub fn convert(&self, input_data: &[u8], output: &mut dyn Write) -> Result<()> {
        info!("Starting RAW channel split");

        let raw_image = {
            let _span = tracing::info_span!("decode_raw").entered();
            self.reader.read_raw(input_data)?
        };

        {
            let _span = tracing::info_span!("validate_dimensions",
                width = raw_image.width,
                height = raw_image.height
            ).entered();
            self.validate_dimensions(&raw_image)?;
        }

        let (planes, _) = {
            let _span = tracing::info_span!("split_channels", pattern = %raw_image.pattern).entered();
            pull_apart(raw_image.to_array()?.view(), &raw_image.pattern)?
        };

        {
            let _span = tracing::info_span!("encode_tiff").entered();
            self.writer.write_channels(planes.view(), output, self.config.compression)?;
        }

        info!(
            width = raw_image.width,
            height = raw_image.height,
            "Split complete"
        );
        Ok(())
    }

    #[instrument(skip(self, input_data, output), fields(input_size = input_data.len()))]
    pub fn convert_rgb(&self, input_data: &[u8], output: &mut dyn Write) -> Result<()> {
        info!("Starting RAW to RGB conversion");

        let raw_image = {
            let _span = tracing::info_span!("decode_raw").entered();
            self.reader.read_raw(input_data)?
        };
        {
            let _span = tracing::info_span!("validate_dimensions",
                width = raw_image.width,
                height = raw_image.height
            ).entered();
            self.validate_dimensions(&raw_image)?;
        }

        let rgb = {
            let _span = tracing::info_span!("demosaic").entered();
            Demosaicker::new()
                .and_then(|demosaicker| demosaicker.process(&raw_image))
                .map_err(|e| CalibrationError::DecodeError(e.to_string()))?
        };

        {
            let _span = tracing::info_span!("encode_tiff").entered();
            self.writer.write_rgb(&rgb, output, self.config.compression)?;
        }

        info!(width = rgb.width, height = rgb.height, "Conversion complete");
        Ok(())
    }

    /// Splits `input_path` into `output_path`; with `rgb` set a demosaicked
    /// preview is written instead.
    #[instrument(skip(self, input_path, output_path))]
    pub fn convert_file<P: AsRef<Path>, Q: AsRef<Path>>(&self, input_path: P, output_path: Q, rgb: bool) -> Result<()> {
        let input_path = input_path.as_ref();
        let output_path = output_path.as_ref();

        info!(
            input = %input_path.display(),
            output = %output_path.display(),
            "Converting file"
        );

        let input_data = {
            let _span = tracing::info_span!("read_input_file").entered();
            std::fs::read(input_path)
                .map_err(|e| CalibrationError::InputReadError(format!("{}: {}", input_path.display(), e)))?
        };

        let mut output_file = {
            let _span = tracing::info_span!("create_output_file").entered();
            std::fs::File::create(output_path)
                .map_err(|e| CalibrationError::OutputWriteError(format!("{}: {}", output_path.display(), e)))?
        };

        if rgb {
            self.convert_rgb(&input_data, &mut output_file)
        } else {
            self.convert(&input_data, &mut output_file)
        }
    }

    pub fn config(&self) -> &AnalysisConfig {
        &self.config
    }

    pub fn set_config(&mut self, config: AnalysisConfig) {
        self.config = config;
    }
}
