//! Numerical helpers shared by the calibration steps
//!
//! Least-squares and polynomial fits, correlation, summary statistics,
//! histograms, gaussian smoothing and linear interpolation.

mod filter;
mod fit;
mod interpolate;
mod summary;

pub use filter::gauss_filter_2d;
pub use fit::{
    linear_fit, linear_fit_per_pixel, pearson_r, pearson_r_per_pixel, polyfit, polyval, r_squared,
    LinearFit,
};
pub use interpolate::{interpolate, interpolate_many};
pub use summary::{
    histogram, percentile, statistics, symmetric_percentiles, Histogram, StatisticsTable, Summary,
};
