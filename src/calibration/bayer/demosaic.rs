use std::io::Cursor;

use anyhow::Result;
use bayer::{BayerDepth, CFA, Demosaic, RasterDepth, RasterMut};
use tracing::info;

use crate::calibration::bayer::BayerPattern;
use crate::calibration::raw::{RawFrame, RgbFrame};

/// Bilinear demosaicking of a RAW frame into a full-resolution RGB frame.
///
/// Black levels are subtracted per channel and the result is stretched to
/// the full 16-bit range using the sensor white level. No white balance or
/// colour matrix is applied, so the output stays in camera RGB.
pub struct Demosaicker;

fn cfa_for(pattern: &BayerPattern) -> Result<CFA> {
    match pattern.name().as_str() {
        "RGGB" => Ok(CFA::RGGB),
        "BGGR" => Ok(CFA::BGGR),
        "GRBG" => Ok(CFA::GRBG),
        "GBRG" => Ok(CFA::GBRG),
        other => Err(anyhow::anyhow!("Unsupported CFA layout {}", other)),
    }
}

impl Demosaicker {
    pub fn new() -> Result<Self> {
        Ok(Self)
    }

    pub fn process(&self, raw: &RawFrame) -> Result<RgbFrame> {
        let width = raw.width;
        let height = raw.height;
        if width == 0 || height == 0 || raw.data.len() != width * height {
            return Err(anyhow::anyhow!(
                "Cannot demosaic {}x{} frame with {} samples",
                width,
                height,
                raw.data.len()
            ));
        }
        let cfa = cfa_for(&raw.pattern)?;
        info!("Demosaicking {}x{} frame, CFA={}", width, height, raw.pattern);

        // Subtract the black level of each photosite's own channel first so
        // the interpolation works on bias-free values. Every channel's own
        // black-to-white range is stretched to 16 bits.
        let scales = raw
            .black_levels
            .map(|black| u16::MAX as f32 / (raw.white_level as f32 - black as f32).max(1.0));
        let bayer_bytes: Vec<u8> = raw
            .data
            .iter()
            .enumerate()
            .flat_map(|(i, &value)| {
                let channel = raw.pattern.colour_at(i / width, i % width).index();
                let black = raw.black_levels[channel];
                let corrected = (value.saturating_sub(black) as f32 * scales[channel])
                    .round()
                    .min(u16::MAX as f32);
                (corrected as u16).to_le_bytes()
            })
            .collect();

        let mut output_buf = vec![0u8; width * height * 3 * 2];
        let mut cursor = Cursor::new(&bayer_bytes[..]);
        let mut output_raster = RasterMut::new(width, height, RasterDepth::Depth16, &mut output_buf);

        bayer::run_demosaic(
            &mut cursor,
            BayerDepth::Depth16LE,
            cfa,
            Demosaic::Linear,
            &mut output_raster,
        )
        .map_err(|e| anyhow::anyhow!("Demosaic failed: {:?}", e))?;

        let data: Vec<u16> = output_buf
            .chunks_exact(2)
            .map(|bytes| u16::from_le_bytes([bytes[0], bytes[1]]))
            .collect();

        Ok(RgbFrame { width, height, data })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn flat_frame(pattern: BayerPattern) -> RawFrame {
        RawFrame {
            width: 8,
            height: 8,
            data: vec![1100; 64],
            bits_per_sample: 12,
            black_levels: [100; 4],
            white_level: 4095,
            pattern,
            make: "Test".into(),
            model: "Flat".into(),
        }
    }

    #[test]
    fn test_uniform_frame_stays_uniform() {
        let demosaicker = Demosaicker::new().unwrap();
        let rgb = demosaicker.process(&flat_frame(BayerPattern::RGGB)).unwrap();
        assert_eq!(rgb.data.len(), 8 * 8 * 3);
        let first = rgb.data[0];
        assert!(first > 0);
        assert!(rgb.data.iter().all(|&v| v == first));
    }

    #[test]
    fn test_saturation_reaches_full_scale_in_every_channel() {
        let mut frame = flat_frame(BayerPattern::RGGB);
        frame.black_levels = [100, 200, 150, 250];
        frame.data = vec![frame.white_level; 64];
        let rgb = Demosaicker::new().unwrap().process(&frame).unwrap();
        assert!(rgb.data.iter().all(|&v| v == u16::MAX));
    }

    #[test]
    fn test_empty_frame_rejected() {
        let mut frame = flat_frame(BayerPattern::RGGB);
        frame.width = 0;
        frame.height = 0;
        frame.data.clear();
        assert!(Demosaicker::new().unwrap().process(&frame).is_err());
    }

    #[test]
    fn test_all_layouts_supported() {
        let demosaicker = Demosaicker::new().unwrap();
        for pattern in [BayerPattern::BGGR, BayerPattern::GRBG, BayerPattern::GBRG] {
            assert!(demosaicker.process(&flat_frame(pattern)).is_ok());
        }
    }
}
