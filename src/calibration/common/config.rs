//! Analysis configuration types

/// TIFF compression methods used when exporting maps and channel pages
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TiffCompression {
    /// No compression (fastest, largest file)
    None,
    /// LZW compression
    Lzw,
    /// Deflate compression - fast level
    DeflateFast,
    /// Deflate compression - balanced
    DeflateBalanced,
    /// Deflate compression - best compression (slower)
    DeflateBest,
}

/// Initial guess for the radial vignetting fit: k0..k4, cx_hat, cy_hat.
pub const DEFAULT_VIGNETTE_GUESS: [f64; 7] = [1.0, 2.0, -5.0, 5.0, -2.0, 0.5, 0.5];

/// Tunables shared by the calibration steps
#[derive(Debug, Clone)]
pub struct AnalysisConfig {
    /// Pixels removed from every edge before fitting the vignetting model
    pub clip_border: usize,
    /// Gaussian sigma (in channel pixels) used to find flat-field maxima
    pub gauss_sigma: f64,
    /// JPEG values at or above this are treated as saturated
    pub jpeg_saturation: f64,
    /// Sample every n-th pixel in both directions when fitting vignetting
    pub vignette_stride: usize,
    /// Starting parameters for the vignetting fit
    pub vignette_guess: [f64; 7],
    /// Polynomial degree for spectral line and wavelength coefficient fits
    pub wavelength_degree: usize,
    /// Number of bins in diagnostic histograms
    pub histogram_bins: usize,
    /// Percentile cut (in percent) for symmetric histogram ranges
    pub percentile_cut: f64,
    /// Compression of exported TIFF files
    pub compression: TiffCompression,
    /// Whether to validate image dimensions before splitting
    pub validate_dimensions: bool,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            clip_border: 250,
            gauss_sigma: 5.0,
            jpeg_saturation: 240.0,
            vignette_stride: 4,
            vignette_guess: DEFAULT_VIGNETTE_GUESS,
            wavelength_degree: 2,
            histogram_bins: 250,
            percentile_cut: 0.001,
            compression: TiffCompression::None,
            validate_dimensions: true,
        }
    }
}

impl AnalysisConfig {
    pub fn builder() -> AnalysisConfigBuilder {
        AnalysisConfigBuilder::default()
    }
}

/// Builder for AnalysisConfig
#[derive(Default)]
pub struct AnalysisConfigBuilder {
    clip_border: Option<usize>,
    gauss_sigma: Option<f64>,
    jpeg_saturation: Option<f64>,
    vignette_stride: Option<usize>,
    vignette_guess: Option<[f64; 7]>,
    wavelength_degree: Option<usize>,
    histogram_bins: Option<usize>,
    percentile_cut: Option<f64>,
    compression: Option<TiffCompression>,
    validate_dimensions: Option<bool>,
}

impl AnalysisConfigBuilder {
    pub fn clip_border(mut self, border: usize) -> Self {
        self.clip_border = Some(border);
        self
    }

    pub fn gauss_sigma(mut self, sigma: f64) -> Self {
        self.gauss_sigma = Some(sigma);
        self
    }

    pub fn jpeg_saturation(mut self, threshold: f64) -> Self {
        self.jpeg_saturation = Some(threshold);
        self
    }

    pub fn vignette_stride(mut self, stride: usize) -> Self {
        self.vignette_stride = Some(stride.max(1));
        self
    }

    pub fn vignette_guess(mut self, guess: [f64; 7]) -> Self {
        self.vignette_guess = Some(guess);
        self
    }

    pub fn wavelength_degree(mut self, degree: usize) -> Self {
        self.wavelength_degree = Some(degree);
        self
    }

    pub fn histogram_bins(mut self, bins: usize) -> Self {
        self.histogram_bins = Some(bins.max(1));
        self
    }

    pub fn percentile_cut(mut self, percent: f64) -> Self {
        self.percentile_cut = Some(percent);
        self
    }

    pub fn compression(mut self, compression: TiffCompression) -> Self {
        self.compression = Some(compression);
        self
    }

    pub fn validate_dimensions(mut self, validate: bool) -> Self {
        self.validate_dimensions = Some(validate);
        self
    }

    pub fn build(self) -> AnalysisConfig {
        let default = AnalysisConfig::default();
        AnalysisConfig {
            clip_border: self.clip_border.unwrap_or(default.clip_border),
            gauss_sigma: self.gauss_sigma.unwrap_or(default.gauss_sigma),
            jpeg_saturation: self.jpeg_saturation.unwrap_or(default.jpeg_saturation),
            vignette_stride: self.vignette_stride.unwrap_or(default.vignette_stride),
            vignette_guess: self.vignette_guess.unwrap_or(default.vignette_guess),
            wavelength_degree: self.wavelength_degree.unwrap_or(default.wavelength_degree),
            histogram_bins: self.histogram_bins.unwrap_or(default.histogram_bins),
            percentile_cut: self.percentile_cut.unwrap_or(default.percentile_cut),
            compression: self.compression.unwrap_or(default.compression),
            validate_dimensions: self
                .validate_dimensions
                .unwrap_or(default.validate_dimensions),
        }
    }
}
