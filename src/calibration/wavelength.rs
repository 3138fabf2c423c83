//! Wavelength calibration from a fluorescent-lamp spectrum
//!
//! The R, G and B channels each see one strong line of a fluorescent lamp.
//! Their positions along every row of the spectrum give a quadratic
//! wavelength-position relation per row; the relation's coefficients vary
//! smoothly with row and are fitted with polynomials, which is the
//! wavelength solution that gets saved.

use std::path::{Path, PathBuf};

use ndarray::{Array2, Array3, ArrayView1, ArrayView2, ArrayView3, Axis};
use serde::Serialize;
use tracing::{debug, info, instrument};

use crate::calibration::bayer::{cut_out, pull_apart, to_rgb_array};
use crate::calibration::common::config::AnalysisConfig;
use crate::calibration::common::error::{CalibrationError, Result};
use crate::calibration::io::{self, Region};
use crate::calibration::raw::{read_raw_file, RawImageReader};
use crate::calibration::render;
use crate::calibration::stats::{interpolate_many, percentile, polyfit, polyval};

/// Wavelengths (nm) of the lines seen by R, G and B: europium 611.6 nm,
/// terbium 544.45 nm and mercury 435.8 nm.
pub const FLUORESCENT_LINES: [f64; 3] = [611.6, 544.45, 435.8];

/// RGBG planes contributing to each of the R, G, B lines.
const LINE_PLANES: [&[usize]; 3] = [&[0], &[1, 3], &[2]];

/// Half width, in channel pixels, of the window a line centroid is taken in.
const CENTROID_HALF_WINDOW: usize = 3;

/// Rows whose line contrast is below this fraction of the strongest row of
/// the same channel are left out.
const FAINT_FRACTION: f64 = 0.1;

/// Step of the common wavelength grid, nm.
const WAVELENGTH_STEP: f64 = 0.5;

const SPECTRUM_BOOST: f64 = 2.5;

/// Line positions found in a cut-out.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FluorescentLines {
    /// Full-frame row of every cut-out row
    pub rows: Vec<f64>,
    /// Full-frame column of the R, G and B lines per row, shape `(3, rows)`;
    /// NaN where the channel has no pixels or the line is too faint
    pub positions: Array2<f64>,
}

/// Sub-pixel position of the brightest feature in `row` and its contrast
/// above the row median.
fn line_centroid(row: ArrayView1<'_, f64>) -> Option<(f64, f64)> {
    let values: Vec<f64> = row.to_vec();
    let (peak, &maximum) = values.iter().enumerate().max_by(|a, b| a.1.total_cmp(b.1))?;
    let median = percentile(&values, 50.0);
    let contrast = maximum - median;
    if !(contrast > 0.0) {
        return None;
    }
    let low = peak.saturating_sub(CENTROID_HALF_WINDOW);
    let high = (peak + CENTROID_HALF_WINDOW + 1).min(values.len());
    let (mut weighted, mut total) = (0.0, 0.0);
    for (k, &v) in values.iter().enumerate().take(high).skip(low) {
        let w = (v - median).max(0.0);
        weighted += k as f64 * w;
        total += w;
    }
    Some((weighted / total, contrast))
}

/// Finds the R, G and B line in every row of an RGBG stack cut out of the
/// frame at `origin` (row, col).
pub fn find_fluorescent_lines(
    rgbg: ArrayView3<'_, f64>,
    offsets: &[(usize, usize); 4],
    origin: (usize, usize),
) -> Result<FluorescentLines> {
    let (channels, half_height, _) = rgbg.dim();
    if channels != 4 {
        return Err(CalibrationError::shape_mismatch(&[4, half_height], rgbg.shape()));
    }
    let height = 2 * half_height;
    let mut positions = Array2::from_elem((3, height), f64::NAN);

    for (line, planes) in LINE_PLANES.iter().enumerate() {
        let mut found = Vec::new();
        for &plane in planes.iter() {
            let (dy, dx) = offsets[plane];
            for (i, row) in rgbg.index_axis(Axis(0), plane).outer_iter().enumerate() {
                if let Some((centroid, contrast)) = line_centroid(row) {
                    found.push((2 * i + dy, (origin.1 + dx) as f64 + 2.0 * centroid, contrast));
                }
            }
        }
        let strongest = found.iter().map(|f| f.2).fold(0.0, f64::max);
        for (row, position, contrast) in found {
            if contrast >= FAINT_FRACTION * strongest {
                positions[[line, row]] = position;
            }
        }
    }

    Ok(FluorescentLines {
        rows: (0..height).map(|r| (origin.0 + r) as f64).collect(),
        positions,
    })
}

/// Smooths each line's positions with a polynomial in row. Returns the
/// fitted positions at every row, shape `(3, rows)`.
pub fn fit_line_positions(lines: &FluorescentLines, degree: usize) -> Result<Array2<f64>> {
    let mut fitted = Array2::zeros(lines.positions.raw_dim());
    for (mut out, positions) in fitted.outer_iter_mut().zip(lines.positions.outer_iter()) {
        let (rows, values): (Vec<f64>, Vec<f64>) = lines
            .rows
            .iter()
            .zip(positions.iter())
            .filter(|(_, p)| p.is_finite())
            .map(|(&r, &p)| (r, p))
            .unzip();
        let coefficients = polyfit(&rows, &values, degree)?;
        for (o, &r) in out.iter_mut().zip(&lines.rows) {
            *o = polyval(&coefficients, r);
        }
    }
    Ok(fitted)
}

/// Per row, the quadratic through the three (position, wavelength) pairs.
/// Returns coefficients highest power first, shape `(rows, 3)`.
pub fn fit_wavelength_relations(line_positions: ArrayView2<'_, f64>) -> Result<Array2<f64>> {
    if line_positions.nrows() != 3 {
        return Err(CalibrationError::shape_mismatch(&[3, line_positions.ncols()], line_positions.shape()));
    }
    let mut relations = Array2::zeros((line_positions.ncols(), 3));
    for (mut out, positions) in relations.outer_iter_mut().zip(line_positions.axis_iter(Axis(1))) {
        let coefficients = polyfit(&positions.to_vec(), &FLUORESCENT_LINES, 2)?;
        out.assign(&ndarray::Array1::from(coefficients));
    }
    Ok(relations)
}

/// Fits every column of the per-row relations against row. Returns the
/// wavelength solution, one polynomial per relation coefficient with shape
/// `(3, degree + 1)`, and the relations it reproduces at each row.
pub fn fit_wavelength_coefficients(
    rows: &[f64],
    relations: ArrayView2<'_, f64>,
    degree: usize,
) -> Result<(Array2<f64>, Array2<f64>)> {
    let mut coefficients = Array2::zeros((relations.ncols(), degree + 1));
    let mut fitted = Array2::zeros(relations.raw_dim());
    for (k, column) in relations.axis_iter(Axis(1)).enumerate() {
        let polynomial = polyfit(rows, &column.to_vec(), degree)?;
        for (r, &row) in rows.iter().enumerate() {
            fitted[[r, k]] = polyval(&polynomial, row);
        }
        coefficients.row_mut(k).assign(&ndarray::Array1::from(polynomial));
    }
    Ok((coefficients, fitted))
}

/// Wavelength of every pixel (x, y) of a grid, shape `(y.len(), x.len())`.
pub fn calculate_wavelengths(coefficients: ArrayView2<'_, f64>, x: &[f64], y: &[f64]) -> Array2<f64> {
    let mut wavelengths = Array2::zeros((y.len(), x.len()));
    for (mut out, &row) in wavelengths.outer_iter_mut().zip(y) {
        let relation: Vec<f64> = coefficients
            .outer_iter()
            .map(|c| polyval(&c.to_vec(), row))
            .collect();
        for (o, &col) in out.iter_mut().zip(x) {
            *o = polyval(&relation, col);
        }
    }
    wavelengths
}

pub fn save_coefficients(path: &Path, coefficients: &Array2<f64>) -> Result<()> {
    io::save_array(path, coefficients)
}

pub fn load_coefficients(path: &Path) -> Result<Array2<f64>> {
    io::read_array2(path)
}

/// Resamples every row of every channel onto one wavelength grid covering
/// all `wavelengths`, with zero outside each row's own range.
pub fn interpolate_multi(
    wavelengths: ArrayView3<'_, f64>,
    data: ArrayView3<'_, f64>,
) -> Result<(Vec<f64>, Array3<f64>)> {
    if wavelengths.shape() != data.shape() {
        return Err(CalibrationError::shape_mismatch(wavelengths.shape(), data.shape()));
    }
    let finite = wavelengths.iter().copied().filter(|w| w.is_finite());
    let (low, high) = finite.fold((f64::MAX, f64::MIN), |(lo, hi), w| (lo.min(w), hi.max(w)));
    if low > high {
        return Err(CalibrationError::FitError("no finite wavelengths".to_string()));
    }
    let start = low.floor();
    let count = ((high.ceil() - start) / WAVELENGTH_STEP) as usize + 1;
    let grid: Vec<f64> = (0..count).map(|i| start + WAVELENGTH_STEP * i as f64).collect();

    let (channels, rows, _) = data.dim();
    let mut interpolated = Array3::zeros((channels, rows, grid.len()));
    for c in 0..channels {
        for r in 0..rows {
            let xp = wavelengths.slice(ndarray::s![c, r, ..]).to_vec();
            let fp = data.slice(ndarray::s![c, r, ..]).to_vec();
            let values = interpolate_many(&grid, &xp, &fp, Some(0.0));
            interpolated
                .slice_mut(ndarray::s![c, r, ..])
                .assign(&ndarray::Array1::from(values));
        }
    }
    Ok((grid, interpolated))
}

/// Spectrum averaged over rows: columns wavelength, R, G, B, G2.
pub fn stack_spectrum(grid: &[f64], interpolated: ArrayView3<'_, f64>) -> Result<Array2<f64>> {
    let means = interpolated
        .mean_axis(Axis(1))
        .ok_or_else(|| CalibrationError::shape_mismatch(&[4, 1, grid.len()], interpolated.shape()))?;
    let mut stacked = Array2::zeros((grid.len(), means.nrows() + 1));
    for (i, &w) in grid.iter().enumerate() {
        stacked[[i, 0]] = w;
        for c in 0..means.nrows() {
            stacked[[i, c + 1]] = means[[c, i]];
        }
    }
    Ok(stacked)
}

#[derive(Serialize)]
struct LineSeries<'a> {
    lines: &'a FluorescentLines,
    fitted: &'a Array2<f64>,
    relations: &'a Array2<f64>,
    relations_fitted: &'a Array2<f64>,
}

/// Calibrates wavelength on the spectrum in `region` of a RAW image of a
/// fluorescent lamp. The solution goes to
/// `<output>/wavelength_solution.npy`; diagnostic images and series are
/// written alongside.
#[instrument(skip(reader, config))]
pub fn run_wavelength<R: RawImageReader>(
    reader: &R,
    raw_file: &Path,
    region: Region,
    output: &Path,
    config: &AnalysisConfig,
) -> Result<PathBuf> {
    let frame = {
        let _span = tracing::info_span!("decode_raw").entered();
        read_raw_file(reader, raw_file)?
    };
    let pattern = frame.pattern;
    let image = frame.to_array()?.mapv(f64::from);
    let image_cut = cut_out(image.view(), region.rows, region.cols)?;
    let (rgbg, offsets) = pull_apart(image_cut.view(), &pattern)?;
    info!("Cut out {:?} from {} x {} frame", image_cut.dim(), frame.width, frame.height);

    let composite = render::rgbg_composite(rgbg.view())?;
    render::save_rgb(&render::to_8_bit(composite.view(), SPECTRUM_BOOST), output.join("cutout.png"))?;
    let bayer = to_rgb_array(image_cut.view(), &pattern);
    render::save_rgb(&render::to_8_bit(bayer.view(), SPECTRUM_BOOST), output.join("cutout_bayer.png"))?;

    let lines = find_fluorescent_lines(rgbg.view(), &offsets, (region.rows.0, region.cols.0))?;
    let fitted = fit_line_positions(&lines, config.wavelength_degree)?;
    let relations = fit_wavelength_relations(fitted.view())?;
    let (coefficients, relations_fitted) =
        fit_wavelength_coefficients(&lines.rows, relations.view(), config.wavelength_degree)?;
    debug!("Wavelength solution: {:?}", coefficients);
    io::write_json(
        output.join("lines.json"),
        &LineSeries {
            lines: &lines,
            fitted: &fitted,
            relations: &relations,
            relations_fitted: &relations_fitted,
        },
    )?;

    let save_to = output.join("wavelength_solution.npy");
    save_coefficients(&save_to, &coefficients)?;
    let coefficients = load_coefficients(&save_to)?;

    let x: Vec<f64> = (region.cols.0..region.cols.1).map(|c| c as f64).collect();
    let wavelengths = calculate_wavelengths(coefficients.view(), &x, &lines.rows);
    let (wavelengths_split, _) = pull_apart(wavelengths.view(), &pattern)?;
    let (grid, interpolated) = interpolate_multi(wavelengths_split.view(), rgbg.view())?;
    info!("Resampled onto {} wavelengths from {} to {} nm", grid.len(), grid[0], grid[grid.len() - 1]);

    let composite = render::rgbg_composite(interpolated.view())?;
    render::save_rgb(
        &render::to_8_bit(composite.view(), SPECTRUM_BOOST),
        output.join("cutout_corrected.png"),
    )?;
    let spectrum = stack_spectrum(&grid, interpolated.view())?;
    io::save_array(output.join("spectrum.npy"), &spectrum)?;

    info!("Saved wavelength solution to '{}'", save_to.display());
    Ok(save_to)
}
