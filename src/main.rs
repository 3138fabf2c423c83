use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};

use radiocal::calibration::{
    bias, dark, flat,
    io::Region,
    iso::{self, IsoModelKind},
    linearity,
    metadata::{self, Settings},
    spectral, wavelength, AnalysisConfig, ChannelTiffWriter, RawLoaderReader, RawSplitPipeline,
    TiffCompression,
};
use radiocal::logger::{self, error, info};

fn main() -> ExitCode {
    let cli = Cli::parse();
    logger::init(cli.verbose);

    match cli.execute() {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!("{:#}", err);
            ExitCode::from(1)
        }
    }
}

#[derive(Parser, Debug)]
#[command(name = "radiocal", about = "Radiometric and spectral camera calibration")]
struct Cli {
    /// Log at debug level unless RUST_LOG says otherwise
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(flatten)]
    tuning: Tuning,

    #[command(subcommand)]
    command: Command,
}

#[derive(Args, Debug, Clone)]
struct Tuning {
    /// Pixels clipped from every edge before the vignetting fit
    #[arg(long, global = true)]
    clip_border: Option<usize>,
    /// Gaussian sigma used for flat-field normalisation and bias maps
    #[arg(long, global = true)]
    gauss_sigma: Option<f64>,
    /// JPEG values at or above this count as saturated
    #[arg(long, global = true)]
    jpeg_saturation: Option<f64>,
    /// Sample every n-th pixel when fitting the vignetting model
    #[arg(long, global = true)]
    vignette_stride: Option<usize>,
    /// Polynomial degree of the spectral line and wavelength fits
    #[arg(long, global = true)]
    wavelength_degree: Option<usize>,
    /// Number of bins in diagnostic histograms
    #[arg(long, global = true)]
    histogram_bins: Option<usize>,
    /// Percentile cut (in percent) for symmetric histogram ranges
    #[arg(long, global = true)]
    percentile_cut: Option<f64>,
    /// Compression for exported TIFF files
    #[arg(long, value_enum, global = true)]
    compression: Option<CompressionArg>,
}

impl Tuning {
    fn config(&self) -> AnalysisConfig {
        let mut builder = AnalysisConfig::builder();
        if let Some(border) = self.clip_border {
            builder = builder.clip_border(border);
        }
        if let Some(sigma) = self.gauss_sigma {
            builder = builder.gauss_sigma(sigma);
        }
        if let Some(threshold) = self.jpeg_saturation {
            builder = builder.jpeg_saturation(threshold);
        }
        if let Some(stride) = self.vignette_stride {
            builder = builder.vignette_stride(stride);
        }
        if let Some(degree) = self.wavelength_degree {
            builder = builder.wavelength_degree(degree);
        }
        if let Some(bins) = self.histogram_bins {
            builder = builder.histogram_bins(bins);
        }
        if let Some(percent) = self.percentile_cut {
            builder = builder.percentile_cut(percent);
        }
        if let Some(compression) = self.compression {
            builder = builder.compression(compression.into());
        }
        builder.build()
    }
}

#[derive(ValueEnum, Debug, Clone, Copy)]
enum CompressionArg {
    None,
    Lzw,
    DeflateFast,
    DeflateBalanced,
    DeflateBest,
}

impl From<CompressionArg> for TiffCompression {
    fn from(value: CompressionArg) -> Self {
        match value {
            CompressionArg::None => TiffCompression::None,
            CompressionArg::Lzw => TiffCompression::Lzw,
            CompressionArg::DeflateFast => TiffCompression::DeflateFast,
            CompressionArg::DeflateBalanced => TiffCompression::DeflateBalanced,
            CompressionArg::DeflateBest => TiffCompression::DeflateBest,
        }
    }
}

#[derive(ValueEnum, Debug, Clone, Copy)]
enum ModelArg {
    Linear,
    Knee,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Generate info.json for a camera from one of its RAW files
    Metadata(MetadataArgs),
    /// Split a RAW file into a 4-page RGBG TIFF
    Split {
        raw_file: PathBuf,
        output: PathBuf,
        /// Write a demosaicked RGB16 TIFF instead
        #[arg(long)]
        rgb: bool,
    },
    /// Export an NPY calibration map to a float TIFF
    ToTiff { input: PathBuf, output: PathBuf },
    /// Characterise bias stacks and write the bias map
    Bias { folder: PathBuf },
    /// Fit dark current against exposure time
    Dark { folder: PathBuf },
    /// Fit the vignetting model to flat-field stacks
    Flat { folder: PathBuf },
    /// Pearson r of every pixel in a RAW linearity series
    LinearityRaw { folder: PathBuf },
    /// Pearson r of every pixel in a JPEG linearity series
    LinearityJpeg { folder: PathBuf },
    /// Compare a JPEG linearity series with an sRGB curve
    SrgbCompare {
        folder: PathBuf,
        #[arg(long, default_value_t = 2.4)]
        gamma: f64,
    },
    /// Linearity of the centre pixels in a polariser series
    Polariser { folder: PathBuf },
    /// Fit the ISO normalization model
    Iso {
        folder: PathBuf,
        #[arg(long, value_enum, default_value_t = ModelArg::Linear)]
        model: ModelArg,
    },
    /// Compare ISO normalization across cameras
    IsoCompare {
        #[arg(required = true)]
        roots: Vec<PathBuf>,
        #[arg(long, default_value = "iso_comparison")]
        output: PathBuf,
    },
    /// Convert spectral responses to an RGB to XYZ matrix
    XyzMatrix { folder: PathBuf, cmf_file: PathBuf },
    /// Calibrate wavelengths from a fluorescent lamp spectrum
    Wavelength(WavelengthArgs),
}

#[derive(Args, Debug)]
struct MetadataArgs {
    raw_file: PathBuf,
    /// Camera root folder; info.json and the folder layout go here
    root: PathBuf,
    #[arg(long)]
    iso_min: u32,
    #[arg(long)]
    iso_max: u32,
    /// Shortest exposure, e.g. 1/4000
    #[arg(long)]
    exposure_min: String,
    /// Longest exposure, e.g. 30
    #[arg(long)]
    exposure_max: String,
}

#[derive(Args, Debug)]
struct WavelengthArgs {
    raw_file: PathBuf,
    /// First and last row (exclusive) of the spectrum
    #[arg(long, num_args = 2, required = true, value_names = ["START", "END"])]
    rows: Vec<usize>,
    /// First and last column (exclusive) of the spectrum
    #[arg(long, num_args = 2, required = true, value_names = ["START", "END"])]
    cols: Vec<usize>,
    #[arg(long, default_value = "wavelength")]
    output: PathBuf,
}

impl Cli {
    fn execute(self) -> Result<()> {
        let config = self.tuning.config();
        match self.command {
            Command::Metadata(args) => {
                let settings = Settings {
                    iso_min: args.iso_min,
                    iso_max: args.iso_max,
                    exposure_min: args.exposure_min,
                    exposure_max: args.exposure_max,
                };
                settings.validate()?;
                let camera = metadata::run_generate_metadata(&RawLoaderReader, &args.raw_file, &args.root, settings)?;
                info!("Generated metadata for {}", camera);
            }
            Command::Split { raw_file, output, rgb } => {
                let pipeline = RawSplitPipeline::new(config);
                info!("Compression: {:?}", pipeline.config().compression);
                pipeline.convert_file(&raw_file, &output, rgb)?;
            }
            Command::ToTiff { input, output } => {
                radiocal::calibration::export_map(&ChannelTiffWriter, &input, &output, config.compression)?;
            }
            Command::Bias { folder } => {
                bias::run_bias(&folder, &config)?;
            }
            Command::Dark { folder } => {
                dark::run_dark_current(&folder, &config)?;
            }
            Command::Flat { folder } => {
                flat::run_flat_field(&folder, &config)?;
            }
            Command::LinearityRaw { folder } => {
                linearity::run_linearity_raw(&folder, &config)?;
            }
            Command::LinearityJpeg { folder } => {
                linearity::run_linearity_jpeg(&folder, &config)?;
            }
            Command::SrgbCompare { folder, gamma } => {
                linearity::run_srgb_comparison(&folder, gamma)?;
            }
            Command::Polariser { folder } => {
                linearity::run_polariser_linearity(&folder)?;
            }
            Command::Iso { folder, model } => {
                let kind = match model {
                    ModelArg::Linear => IsoModelKind::Linear,
                    ModelArg::Knee => IsoModelKind::Knee,
                };
                iso::run_iso_normalization(&folder, kind)?;
            }
            Command::IsoCompare { roots, output } => {
                iso::run_iso_comparison(&roots, &output)?;
            }
            Command::XyzMatrix { folder, cmf_file } => {
                spectral::run_xyz_matrix(&folder, &cmf_file)?;
            }
            Command::Wavelength(args) => {
                let region = Region {
                    rows: (args.rows[0], args.rows[1]),
                    cols: (args.cols[0], args.cols[1]),
                };
                wavelength::run_wavelength(&RawLoaderReader, &args.raw_file, region, &args.output, &config)
                    .with_context(|| format!("wavelength calibration of {}", args.raw_file.display()))?;
            }
        }
        Ok(())
    }
}
