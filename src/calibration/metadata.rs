//! Camera description and calibration folder layout

mod camera;
mod folders;
mod generate;

pub use camera::{Camera, Device, ImageProperties, Settings};
pub use folders::{CameraFolders, INFO_FILE};
pub use generate::{bit_depth_from_maximum, generate_metadata, run_generate_metadata};
