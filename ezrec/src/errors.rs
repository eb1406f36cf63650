use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum RpaError {
    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Input capture unavailable: {0}")]
    CaptureUnavailable(String),

    #[error("Input synthesis unavailable: {0}")]
    SinkUnavailable(String),

    #[error("Window not found: {0}")]
    WindowNotFound(String),

    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    #[error("Input synthesis failed: {0}")]
    SynthesisFailed(String),

    #[error("Operation timed out: {0}")]
    Timeout(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Data corruption: {0}")]
    Corruption(String),

    #[error("Decryption failed: {0}")]
    DecryptionFailed(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Precondition not met: {0}")]
    PreconditionNotMet(String),

    #[error("Cancelled: {0}")]
    Cancelled(String),

    #[error("Unsupported platform: {0}")]
    UnsupportedPlatform(String),
}

pub type Result<T> = std::result::Result<T, RpaError>;

impl From<rusqlite::Error> for RpaError {
    fn from(err: rusqlite::Error) -> Self {
        RpaError::Storage(err.to_string())
    }
}

impl From<std::io::Error> for RpaError {
    fn from(err: std::io::Error) -> Self {
        RpaError::Storage(err.to_string())
    }
}

impl From<serde_json::Error> for RpaError {
    fn from(err: serde_json::Error) -> Self {
        RpaError::Corruption(format!("serialization: {err}"))
    }
}
