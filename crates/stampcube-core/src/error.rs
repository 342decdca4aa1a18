use thiserror::Error;

use crate::catalog::Picid;

#[derive(Error, Debug)]
pub enum StampError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Image format error: {0}")]
    ImageError(#[from] image::ImageError),

    #[error("Invalid TOML document: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("Invalid stamp container: {0}")]
    InvalidContainer(String),

    #[error("Invalid frame file: {0}")]
    InvalidFrameFile(String),

    #[error("Invalid stamp size {rows}x{cols}: both sides must be positive and odd")]
    InvalidStampSize { rows: usize, cols: usize },

    #[error("Stamp shape mismatch: expected {expected:?}, got {actual:?}")]
    ShapeMismatch {
        expected: (usize, usize, usize),
        actual: (usize, usize, usize),
    },

    #[error("Frame {index} has dimensions {actual:?}, expected {expected:?}")]
    FrameGridMismatch {
        index: usize,
        expected: (usize, usize),
        actual: (usize, usize),
    },

    #[error("Source {0} not found")]
    SourceNotFound(Picid),

    #[error("Stamp entry for source {0} already exists")]
    EntryExists(Picid),

    #[error("Observation has no usable frames")]
    EmptyObservation,

    #[error("No point sources supplied")]
    EmptySourceList,

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("{operation} timed out after {seconds}s")]
    Timeout { operation: String, seconds: u64 },

    #[error("External collaborator failed: {0}")]
    External(String),

    #[error("Run cancelled")]
    Cancelled,
}

pub type Result<T> = std::result::Result<T, StampError>;
