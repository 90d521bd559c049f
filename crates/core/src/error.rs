/// Result alias that carries the custom [`BeatlockError`] type.
pub type Result<T> = std::result::Result<T, BeatlockError>;

/// Common error type for the core crate.
///
/// Scheduling and calibration never fail; these variants only surface from
/// the I/O edges (config files, worker threads) and from audio players.
#[derive(Debug, thiserror::Error)]
pub enum BeatlockError {
    /// Free-form error raised from a plain message.
    #[error("{0}")]
    Message(String),
    /// Wrapper around standard IO errors.
    #[error("{0}")]
    Io(#[from] std::io::Error),
    /// Config or report (de)serialisation failed.
    #[error("{0}")]
    Json(#[from] serde_json::Error),
    /// A config value is outside what the scheduler accepts.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
    /// Reported by an [`AudioPlayer`](crate::AudioPlayer). Never fatal to
    /// the scheduler.
    #[error("audio playback failed: {0}")]
    Audio(String),
}

impl BeatlockError {
    /// Creates a new error that simply wraps the provided message.
    pub fn msg<T: Into<String>>(msg: T) -> Self {
        Self::Message(msg.into())
    }

    /// Creates an [`Audio`](Self::Audio) error for a player failure.
    pub fn audio<T: Into<String>>(reason: T) -> Self {
        Self::Audio(reason.into())
    }
}

impl From<&str> for BeatlockError {
    fn from(value: &str) -> Self {
        Self::msg(value)
    }
}

impl From<String> for BeatlockError {
    fn from(value: String) -> Self {
        Self::Message(value)
    }
}
