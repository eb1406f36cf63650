use thiserror::Error;

#[derive(Error, Debug)]
pub enum RecorderError {
    #[error("Capture hook unavailable: {0}")]
    HookUnavailable(String),

    #[error("Invalid capture state: {0}")]
    InvalidState(String),

    #[error("Event channel closed: {0}")]
    ChannelClosed(String),

    #[error(transparent)]
    Core(#[from] ezrec::RpaError),
}

pub type Result<T> = std::result::Result<T, RecorderError>;
