//! Error types for wakeloop

use thiserror::Error;

/// Result type alias for wakeloop operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while running a voice session
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error, raised while building components
    #[error("configuration error: {0}")]
    Config(String),

    /// Caller contract violation
    #[error("usage error: {0}")]
    Usage(String),

    /// Audio device or PCM handling error
    #[error("audio error: {0}")]
    Audio(String),

    /// Hotword engine error
    #[error("trigger error: {0}")]
    Trigger(String),

    /// Voice activity model error
    #[error("vad error: {0}")]
    Vad(String),

    /// Dialog backend error
    #[error("dialog error: {0}")]
    Dialog(String),

    /// IO error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// HTTP error
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// TOML parsing error
    #[error("toml error: {0}")]
    Toml(#[from] toml::de::Error),

    /// YAML parsing error
    #[error("yaml error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

impl Error {
    /// Whether this error is a caller contract violation
    #[must_use]
    pub const fn is_usage(&self) -> bool {
        matches!(self, Self::Usage(_))
    }

    /// Whether this error was raised by configuration validation
    #[must_use]
    pub const fn is_config(&self) -> bool {
        matches!(self, Self::Config(_))
    }
}
