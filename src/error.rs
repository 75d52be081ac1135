//! Error types for the voice widget

use thiserror::Error;

/// Result type alias for widget operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in the voice widget
#[derive(Debug, Error)]
pub enum Error {
    /// Capture device cannot be acquired (permission denied, no hardware)
    #[error("microphone unavailable: {0}")]
    DeviceUnavailable(String),

    /// Backend call failed or returned a non-success status
    #[error("network failure: {0}")]
    NetworkFailure(String),

    /// Audio reply could not be decoded or played
    #[error("decode failure: {0}")]
    DecodeFailure(String),

    /// Form field missing or malformed
    #[error("{0}")]
    ValidationFailure(String),

    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// Audio device error outside of acquisition
    #[error("audio error: {0}")]
    Audio(String),

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
}

impl Error {
    /// Whether the widget can keep running after this error
    ///
    /// Every runtime failure is recoverable; only configuration problems
    /// detected at startup are not.
    #[must_use]
    pub const fn is_recoverable(&self) -> bool {
        !matches!(self, Self::Config(_) | Self::Toml(_))
    }

    /// Short, dismissable text suitable for showing to the user
    #[must_use]
    pub fn user_message(&self) -> String {
        match self {
            Self::DeviceUnavailable(detail) => {
                format!("Failed to access microphone: {detail}")
            }
            Self::NetworkFailure(_) | Self::Http(_) => {
                "Voice processing failed. Please try again.".to_string()
            }
            Self::DecodeFailure(_) | Self::Audio(_) => "Failed to play audio response".to_string(),
            Self::ValidationFailure(msg) => msg.clone(),
            Self::Config(_) | Self::Io(_) | Self::Serialization(_) | Self::Toml(_) => {
                self.to_string()
            }
        }
    }

    /// Collapse a transport error into a [`Error::NetworkFailure`]
    #[must_use]
    pub fn network(err: &reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::NetworkFailure(format!("request timed out: {err}"))
        } else {
            Self::NetworkFailure(err.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validation_message_is_shown_verbatim() {
        let err = Error::ValidationFailure("Missing required field: email".to_string());
        assert_eq!(err.user_message(), "Missing required field: email");
        assert_eq!(err.to_string(), "Missing required field: email");
    }

    #[test]
    fn runtime_errors_are_recoverable() {
        assert!(Error::DeviceUnavailable("denied".into()).is_recoverable());
        assert!(Error::NetworkFailure("502".into()).is_recoverable());
        assert!(Error::DecodeFailure("garbage".into()).is_recoverable());
        assert!(!Error::Config("bad url".into()).is_recoverable());
    }

    #[test]
    fn device_message_names_microphone() {
        let err = Error::DeviceUnavailable("permission denied".into());
        assert!(err.user_message().contains("microphone"));
    }
}
