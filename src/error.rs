use std::path::PathBuf;

use thiserror::Error;

/// Faults that abort processing of the whole document.
#[derive(Error, Debug)]
pub enum Error {
    #[error("source file not found: {}", .0.display())]
    SourceMissing(PathBuf),

    #[error("PDF error: {0}")]
    Pdf(#[from] lopdf::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Per-image faults the page walker absorbs. The image is skipped, its
/// original bytes stay in the document, and the run continues.
#[derive(Error, Debug)]
pub enum ImageFault {
    #[error("malformed image: {0}")]
    Malformed(String),

    #[error("missing dictionary key: {0}")]
    MissingKey(&'static str),

    #[error("invalid image data: {0}")]
    InvalidImage(String),
}

impl ImageFault {
    pub fn malformed(message: impl Into<String>) -> Self {
        ImageFault::Malformed(message.into())
    }

    pub fn invalid(message: impl Into<String>) -> Self {
        ImageFault::InvalidImage(message.into())
    }
}
