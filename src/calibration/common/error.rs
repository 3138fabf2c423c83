use thiserror::Error;

#[derive(Error, Debug)]
pub enum CalibrationError {
    #[error("Failed to read input file: {0}")]
    InputReadError(String),

    #[error("Failed to write output file: {0}")]
    OutputWriteError(String),

    #[error("Failed to decode RAW image: {0}")]
    DecodeError(String),

    #[error("Failed to read or write NPY array: {0}")]
    NpyError(String),

    #[error("Failed to encode image: {0}")]
    EncodeError(String),

    #[error("Invalid image dimensions: width={0}, height={1}")]
    InvalidDimensions(usize, usize),

    #[error("Shape mismatch: expected {expected:?}, got {actual:?}")]
    ShapeMismatch {
        expected: Vec<usize>,
        actual: Vec<usize>,
    },

    #[error("Cannot parse a value from filename '{0}'")]
    FilenameParse(String),

    #[error("Invalid camera metadata: {0}")]
    MetadataError(String),

    #[error("No files matching '{pattern}' in {folder}")]
    NoFiles { folder: String, pattern: String },

    #[error("Fit failed: {0}")]
    FitError(String),

    #[error("The image does not have any saturated pixels (maximum value: {0})")]
    Unsaturated(u32),

    #[error("Invalid Bayer pattern: {0}")]
    InvalidPattern(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),
}

impl CalibrationError {
    pub fn shape_mismatch(expected: &[usize], actual: &[usize]) -> Self {
        CalibrationError::ShapeMismatch {
            expected: expected.to_vec(),
            actual: actual.to_vec(),
        }
    }
}

pub type Result<T> = std::result::Result<T, CalibrationError>;
