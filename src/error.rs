use burn::{config::ConfigError, record::RecorderError};
use thiserror::Error;

/// Error raised while preparing images and labels.
#[derive(Error, Debug)]
pub enum DataError {
    /// An image has rows of different lengths.
    #[error("image {index} is not rectangular: row {row} has {found} values, expected {expected}")]
    RaggedImage {
        /// Position of the image in the collection.
        index: usize,
        /// Offending row.
        row: usize,
        /// Row length of the first row.
        expected: usize,
        /// Row length found.
        found: usize,
    },

    /// An image does not have the same shape as the first image of the collection.
    #[error("image {index} has shape {found:?}, expected {expected:?}")]
    ShapeMismatch {
        /// Position of the image in the collection.
        index: usize,
        /// Shape (height, width) of the first image.
        expected: (usize, usize),
        /// Shape (height, width) found.
        found: (usize, usize),
    },

    /// Images and labels do not pair up.
    #[error("{images} images for {labels} labels")]
    LengthMismatch {
        /// Number of images.
        images: usize,
        /// Number of labels.
        labels: usize,
    },

    /// A label is not a valid class identifier.
    #[error("label {label} at index {index} is outside [0, {num_classes})")]
    LabelOutOfRange {
        /// Position of the label.
        index: usize,
        /// Label value.
        label: i32,
        /// Number of classes.
        num_classes: usize,
    },

    /// Flattened images do not have the length the model expects.
    #[error("images have {found} pixels, the model expects {expected}")]
    PixelCount {
        /// Input width of the model.
        expected: usize,
        /// Length of the flattened images.
        found: usize,
    },

    /// A flattened image does not have the length of the first image.
    #[error("image {index} has {found} pixels, expected {expected}")]
    RowLength {
        /// Position of the image in the collection.
        index: usize,
        /// Length of the first image.
        expected: usize,
        /// Length found.
        found: usize,
    },

    /// An IDX file could not be decoded.
    #[error("Invalid IDX file `{file}`: {reason}")]
    InvalidIdx {
        /// File name.
        file: String,
        /// What is wrong with it.
        reason: String,
    },
}

/// Error type of the crate.
#[derive(Error, Debug)]
pub enum Error {
    /// Data preparation or loading error.
    #[error(transparent)]
    Data(#[from] DataError),

    /// I/O operation error.
    #[error("I/O error: `{0}`")]
    Io(#[from] std::io::Error),

    /// Configuration could not be saved or loaded.
    #[error("Config error: `{0}`")]
    Config(#[from] ConfigError),

    /// Model record could not be saved or loaded.
    #[error("Recorder error: `{0}`")]
    Recorder(#[from] RecorderError),

    /// Serving spec could not be (de)serialized.
    #[error("JSON error: `{0}`")]
    Json(#[from] serde_json::Error),

    /// A request does not match the serving spec.
    #[error("Invalid serving request: {0}")]
    Serving(String),

    /// A tensor could not be read back from the backend.
    #[error("Tensor data error: {0}")]
    Tensor(String),
}

/// Result alias of the crate.
pub type Result<T> = core::result::Result<T, Error>;
