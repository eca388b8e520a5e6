use thiserror::Error;

/// Canonical result for core.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors shared by every layer of the pipeline.
///
/// `Clone` so that one terminal failure can be handed to every listener of a
/// one-shot signal.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum Error {
    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Schema error: {0}")]
    Schema(String),

    #[error("Cast error: {0}")]
    Cast(String),

    // Driver and source failures (connection, prepare, cursor read).
    #[error("Source error: {0}")]
    Source(String),

    #[error("Stream error: {0}")]
    Stream(String),

    #[error("Internal invariant failed: {0}")]
    Invariant(String),
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Config(e.to_string())
    }
}
