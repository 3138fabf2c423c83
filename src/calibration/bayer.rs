//! Bayer mosaic bookkeeping
//!
//! Splitting a colour-filter-array mosaic into its R, G, B and G2 planes,
//! re-composing it, and bilinear demosaicking for previews.

mod demosaic;
mod pattern;
mod split;

pub use demosaic::Demosaicker;
pub use pattern::{BayerPattern, Channel};
pub use split::{cut_out, pull_apart, put_together, split_rgb, to_rgb_array, RgbgStack};
