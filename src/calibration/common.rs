//! Common utilities module
//!
//! This module contains the error type and configuration shared by every
//! calibration step.

pub mod config;
pub mod error;

pub use config::{AnalysisConfig, AnalysisConfigBuilder, TiffCompression};
pub use error::{CalibrationError, Result};
