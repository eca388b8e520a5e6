use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised by writers. Sources report through `querypipe_core::Error`.
#[derive(Debug, Error)]
pub enum Error {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

impl From<Error> for querypipe_core::Error {
    fn from(e: Error) -> Self {
        querypipe_core::Error::Stream(e.to_string())
    }
}
