use std::path::PathBuf;

use thiserror::Error;

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("io error")]
    Io(#[from] std::io::Error),

    #[error("image error")]
    Image(#[from] image::ImageError),

    #[error("failed to parse ground truth archive")]
    Json(#[from] serde_json::Error),

    #[error("invalid configuration: {0}")]
    Config(String),

    /// A crop or warp that would produce an empty raster.
    #[error("degenerate geometry: {0}")]
    DegenerateGeometry(String),

    #[error("{}:{line}: {message}", path.display())]
    Annotation {
        path: PathBuf,
        line: usize,
        message: String,
    },

    #[error("record index {index} out of range for source of length {len}")]
    IndexOutOfRange { index: usize, len: usize },

    #[error("inference failed")]
    Inference(#[from] ort::Error),

    #[error("unexpected model output: {0}")]
    Model(String),

    #[error("tensor shape mismatch")]
    Shape(#[from] ndarray::ShapeError),
}

impl Error {
    pub(crate) fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    pub(crate) fn degenerate(message: impl Into<String>) -> Self {
        Self::DegenerateGeometry(message.into())
    }
}
