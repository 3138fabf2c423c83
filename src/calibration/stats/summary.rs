use std::fmt;

use ndarray::{ArrayView3, Axis};
use serde::Serialize;

/// Percentile with linear interpolation between closest ranks (numpy's
/// default). NaNs are ignored; returns NaN for empty input.
pub fn percentile(values: &[f64], percent: f64) -> f64 {
    let mut sorted: Vec<f64> = values.iter().copied().filter(|v| !v.is_nan()).collect();
    sorted.sort_by(f64::total_cmp);
    percentile_sorted(&sorted, percent)
}

fn percentile_sorted(sorted: &[f64], percent: f64) -> f64 {
    if sorted.is_empty() {
        return f64::NAN;
    }
    let rank = (percent.clamp(0.0, 100.0) / 100.0) * (sorted.len() - 1) as f64;
    let lower = rank.floor() as usize;
    let upper = rank.ceil() as usize;
    let fraction = rank - lower as f64;
    sorted[lower] + (sorted[upper] - sorted[lower]) * fraction
}

/// Range between the `percent` and `100 - percent` percentiles, used to
/// give histograms of all conditions the same x axis.
pub fn symmetric_percentiles(values: &[f64], percent: f64) -> (f64, f64) {
    let mut sorted: Vec<f64> = values.iter().copied().filter(|v| !v.is_nan()).collect();
    sorted.sort_by(f64::total_cmp);
    (
        percentile_sorted(&sorted, percent),
        percentile_sorted(&sorted, 100.0 - percent),
    )
}

/// Summary statistics of one array.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Summary {
    pub mean: f64,
    pub median: f64,
    pub std: f64,
    pub min: f64,
    pub max: f64,
}

impl Summary {
    pub fn of(values: &[f64]) -> Self {
        let finite: Vec<f64> = values.iter().copied().filter(|v| !v.is_nan()).collect();
        if finite.is_empty() {
            return Summary {
                mean: f64::NAN,
                median: f64::NAN,
                std: f64::NAN,
                min: f64::NAN,
                max: f64::NAN,
            };
        }
        let n = finite.len() as f64;
        let mean = finite.iter().sum::<f64>() / n;
        let std = (finite.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n).sqrt();
        let mut sorted = finite;
        sorted.sort_by(f64::total_cmp);
        Summary {
            mean,
            median: percentile_sorted(&sorted, 50.0),
            std,
            min: sorted[0],
            max: sorted[sorted.len() - 1],
        }
    }
}

/// Per-condition statistics of a stack, one row per array.
#[derive(Debug, Clone, Serialize)]
pub struct StatisticsTable {
    pub prefix_header: String,
    pub rows: Vec<(f64, Summary)>,
}

/// Statistics of each array in a `(n, h, w)` stack, labelled by `prefix`.
pub fn statistics(stack: ArrayView3<'_, f64>, prefix: &[f64], prefix_header: &str) -> StatisticsTable {
    let rows = stack
        .axis_iter(Axis(0))
        .zip(prefix)
        .map(|(array, &label)| {
            let values: Vec<f64> = array.iter().copied().collect();
            (label, Summary::of(&values))
        })
        .collect();
    StatisticsTable {
        prefix_header: prefix_header.to_string(),
        rows,
    }
}

impl fmt::Display for StatisticsTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "{:>8} | {:>10} | {:>10} | {:>10} | {:>10} | {:>10}",
            self.prefix_header, "Mean", "Median", "Std", "Min", "Max"
        )?;
        writeln!(f, "{:-<73}", "")?;
        for (label, s) in &self.rows {
            writeln!(
                f,
                "{:>8} | {:>10.3} | {:>10.3} | {:>10.3} | {:>10.3} | {:>10.3}",
                label, s.mean, s.median, s.std, s.min, s.max
            )?;
        }
        Ok(())
    }
}

/// Counts per bin over a fixed range.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Histogram {
    /// Bin edges, one more than the number of bins
    pub edges: Vec<f64>,
    pub counts: Vec<u64>,
}

/// Histogram of `values` over `range` with equal-width bins. The last bin
/// includes its upper edge; values outside the range are ignored.
pub fn histogram(values: &[f64], range: (f64, f64), bins: usize) -> Histogram {
    let bins = bins.max(1);
    let (low, high) = range;
    let width = (high - low) / bins as f64;
    let edges = (0..=bins).map(|i| low + width * i as f64).collect();
    let mut counts = vec![0u64; bins];
    if width > 0.0 {
        for &value in values {
            if value < low || value > high || value.is_nan() {
                continue;
            }
            let bin = (((value - low) / width) as usize).min(bins - 1);
            counts[bin] += 1;
        }
    }
    Histogram { edges, counts }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array3;

    #[test]
    fn test_percentile_interpolates() {
        let values = [4.0, 1.0, 3.0, 2.0];
        assert_eq!(percentile(&values, 0.0), 1.0);
        assert_eq!(percentile(&values, 50.0), 2.5);
        assert_eq!(percentile(&values, 100.0), 4.0);
        assert!(percentile(&[], 50.0).is_nan());
    }

    #[test]
    fn test_symmetric_percentiles() {
        let values: Vec<f64> = (0..=100).map(|v| v as f64).collect();
        assert_eq!(symmetric_percentiles(&values, 10.0), (10.0, 90.0));
    }

    #[test]
    fn test_statistics_table() {
        let stack = Array3::from_shape_fn((2, 2, 2), |(k, r, c)| (k * 10 + r * 2 + c) as f64);
        let table = statistics(stack.view(), &[100.0, 200.0], "ISO");
        assert_eq!(table.rows.len(), 2);
        let (label, summary) = table.rows[1];
        assert_eq!(label, 200.0);
        assert_eq!(summary.mean, 11.5);
        assert_eq!(summary.median, 11.5);
        assert_eq!(summary.min, 10.0);
        assert_eq!(summary.max, 13.0);
        assert!(table.to_string().contains("ISO"));
    }

    #[test]
    fn test_histogram_edges_and_counts() {
        let h = histogram(&[0.0, 0.5, 1.0, 1.5, 2.0, 5.0], (0.0, 2.0), 2);
        assert_eq!(h.edges, vec![0.0, 1.0, 2.0]);
        assert_eq!(h.counts, vec![2, 3]);
    }
}
