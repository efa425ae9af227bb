use miette::Diagnostic;
use serde::Serialize;
use thiserror::Error;

/// Main error type for the application
#[derive(Debug, Error, Diagnostic)]
pub enum Error {
    #[error("Authentication error: {0}")]
    #[diagnostic(code(ontime::auth), help("run `get_calendar_token` to authorize again"))]
    Auth(String),

    #[error("Network error: {0}")]
    #[diagnostic(code(ontime::network))]
    Network(String),

    #[error("Failed to decode calendar data: {0}")]
    #[diagnostic(code(ontime::decode))]
    Decode(String),

    #[error("Notification scheduling error: {0}")]
    #[diagnostic(code(ontime::scheduling))]
    Scheduling(String),

    #[error("Refresh scheduler is not active")]
    #[diagnostic(code(ontime::inactive))]
    Inactive,

    #[error("Environment error: {0}")]
    #[diagnostic(code(ontime::environment))]
    Environment(String),

    #[error("Configuration error: {0}")]
    #[diagnostic(code(ontime::config))]
    Config(String),

    #[error("Component error: {0}")]
    #[diagnostic(code(ontime::component))]
    Component(String),

    #[error(transparent)]
    #[diagnostic(code(ontime::io))]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    #[diagnostic(code(ontime::serialization))]
    Serialization(String),

    #[error("Other error: {0}")]
    #[diagnostic(code(ontime::other))]
    Other(String),
}

/// Coarse classification surfaced to the UI
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Auth,
    Network,
    Decode,
    Scheduling,
    Other,
}

impl Error {
    /// Classify the error for banners and metrics
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Auth(_) => ErrorKind::Auth,
            Error::Network(_) => ErrorKind::Network,
            Error::Decode(_) | Error::Serialization(_) => ErrorKind::Decode,
            Error::Scheduling(_) => ErrorKind::Scheduling,
            _ => ErrorKind::Other,
        }
    }
}

impl From<toml::ser::Error> for Error {
    fn from(err: toml::ser::Error) -> Self {
        Error::Serialization(err.to_string())
    }
}

impl From<toml::de::Error> for Error {
    fn from(err: toml::de::Error) -> Self {
        Error::Serialization(err.to_string())
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Decode(err.to_string())
    }
}

impl From<reqwest::Error> for Error {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            Error::Decode(err.to_string())
        } else {
            Error::Network(err.to_string())
        }
    }
}

/// Type alias for Result with our Error type
pub type BotResult<T> = Result<T, Error>;

/// Helper to create environment errors
pub fn env_error(var: &str) -> Error {
    Error::Environment(format!("Missing environment variable: {}", var))
}

/// Helper to create configuration errors
pub fn config_error(message: &str) -> Error {
    Error::Config(message.to_string())
}

/// Helper to create component errors
pub fn component_error(message: &str) -> Error {
    Error::Component(message.to_string())
}

/// Helper to create authentication errors
pub fn auth_error(message: &str) -> Error {
    Error::Auth(message.to_string())
}

/// Helper to create network errors
pub fn network_error(message: &str) -> Error {
    Error::Network(message.to_string())
}

/// Helper to create decode errors
pub fn decode_error(message: &str) -> Error {
    Error::Decode(message.to_string())
}

/// Helper to create notification scheduling errors
pub fn scheduling_error(message: &str) -> Error {
    Error::Scheduling(message.to_string())
}

/// Helper to create other errors
pub fn other_error(message: &str) -> Error {
    Error::Other(message.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_kind() {
        assert_eq!(auth_error("expired").kind(), ErrorKind::Auth);
        assert_eq!(network_error("HTTP 500").kind(), ErrorKind::Network);
        assert_eq!(decode_error("bad json").kind(), ErrorKind::Decode);
        assert_eq!(scheduling_error("rejected").kind(), ErrorKind::Scheduling);
        assert_eq!(Error::Inactive.kind(), ErrorKind::Other);
    }

    #[test]
    fn test_json_errors_are_decode_errors() {
        let err = serde_json::from_str::<serde_json::Value>("{not json").unwrap_err();
        assert_eq!(Error::from(err).kind(), ErrorKind::Decode);
    }
}
