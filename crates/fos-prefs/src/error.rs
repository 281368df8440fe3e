use thiserror::Error;

/// Errors raised while persisting preferences
#[derive(Debug, Error)]
pub enum PrefsError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
