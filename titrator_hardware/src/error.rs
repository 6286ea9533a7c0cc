use thiserror::Error;

#[derive(Debug, Error)]
pub enum HwError {
    #[error("serial error: {0}")]
    Serial(String),
    #[error("serial port already closed")]
    Closed,
    #[error("camera capture failed: {0}")]
    Capture(String),
    #[error("camera timeout")]
    Timeout,
    #[error("image decode: {0}")]
    Image(#[from] image::ImageError),
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, HwError>;
