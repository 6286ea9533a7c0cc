use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum TitratorError {
    /// Camera unavailable, read failed, or the capture timed out.
    #[error("capture error: {0}")]
    Capture(String),
    /// Sample region rejected or outside the frame.
    #[error("geometry error: {0}")]
    Geometry(String),
    /// Serial open/write/close failure.
    #[error("hardware error: {0}")]
    Hardware(String),
    /// Unrecoverable failure inside the active control loop.
    #[error("titration error: {0}")]
    Titration(String),
    /// Operation requested in an incompatible state.
    #[error("invalid state: {0}")]
    InvalidState(String),
    #[error("configuration error: {0}")]
    Config(String),
}

#[derive(Debug, Error, Clone)]
pub enum BuildError {
    #[error("missing camera")]
    MissingCamera,
    #[error("missing pump link")]
    MissingPump,
    #[error("invalid config: {0}")]
    InvalidConfig(String),
}

pub type Result<T> = eyre::Result<T>;
pub use eyre::Report;

/// Find the typed error anywhere in a report's context chain.
pub fn titrator_error(err: &Report) -> Option<&TitratorError> {
    err.downcast_ref::<TitratorError>()
        .or_else(|| err.chain().find_map(|e| e.downcast_ref::<TitratorError>()))
}
