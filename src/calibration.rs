//! Radiometric and spectral calibration of consumer cameras
//!
//! Each calibration step reads stacks of mean and standard-deviation images
//! from a camera folder, derives a calibration product, and writes it to the
//! camera's `calibration/` or `results/` folder together with diagnostic
//! output under `analysis/`.

pub mod bayer;
pub mod bias;
pub mod common;
pub mod correction;
pub mod dark;
pub mod flat;
pub mod io;
pub mod iso;
pub mod linearity;
pub mod metadata;
pub mod pipelines;
pub mod raw;
pub mod render;
pub mod spectral;
pub mod stats;
pub mod tiff;
pub mod wavelength;

pub use common::{
    AnalysisConfig,
    AnalysisConfigBuilder,
    CalibrationError,
    Result,
    TiffCompression,
};

pub use bayer::{BayerPattern, Channel, Demosaicker};

pub use raw::{
    RawFrame,
    RawImageReader,
    RawLoaderReader,
    RgbFrame,
};

pub use metadata::{Camera, CameraFolders};

pub use tiff::{ChannelTiffWriter, TiffWriter};

pub use pipelines::{export_map, RawSplitPipeline};
