//! Error types for the bridge.

use crate::host::{HostError, HostErrorKind};
use crate::taxonomy::ErrorKind;
use thiserror::Error;

#[derive(Error, Debug)]
#[non_exhaustive]
pub enum BridgeError {
    /// A required request field is missing or malformed.
    #[error("{message}")]
    Validation { message: String },

    #[error("Host model error: {0}")]
    Host(#[from] HostError),

    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
}

impl BridgeError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation {
            message: msg.into(),
        }
    }

    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config {
            message: msg.into(),
        }
    }

    pub fn missing_field(field: &str) -> Self {
        Self::validation(format!("Missing required parameter: '{field}'"))
    }

    /// Where this error lands in the client-facing taxonomy.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Validation { .. } => ErrorKind::InvalidRequest,
            Self::Host(err) => match err.kind {
                HostErrorKind::InvalidMessage => ErrorKind::InvalidRequest,
                HostErrorKind::InvalidModel | HostErrorKind::NotFound => ErrorKind::ModelNotFound,
                HostErrorKind::NoPermission => ErrorKind::PermissionDenied,
                HostErrorKind::Blocked => ErrorKind::ContentBlocked,
                HostErrorKind::QuotaExceeded => ErrorKind::QuotaExceeded,
                HostErrorKind::Unknown => ErrorKind::Internal,
            },
            _ => ErrorKind::Internal,
        }
    }

    /// Message shown to clients.
    pub fn client_message(&self) -> String {
        match self {
            Self::Host(err) => err.message.clone(),
            other => other.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, BridgeError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validation_is_invalid_request() {
        let err = BridgeError::missing_field("messages");
        assert_eq!(err.kind(), ErrorKind::InvalidRequest);
        assert_eq!(err.to_string(), "Missing required parameter: 'messages'");
    }

    #[test]
    fn test_host_kinds_project_onto_taxonomy() {
        let kind = |k| BridgeError::from(HostError::new(k, "x")).kind();
        assert_eq!(kind(HostErrorKind::NotFound), ErrorKind::ModelNotFound);
        assert_eq!(kind(HostErrorKind::InvalidModel), ErrorKind::ModelNotFound);
        assert_eq!(kind(HostErrorKind::NoPermission), ErrorKind::PermissionDenied);
        assert_eq!(kind(HostErrorKind::Blocked), ErrorKind::ContentBlocked);
        assert_eq!(kind(HostErrorKind::QuotaExceeded), ErrorKind::QuotaExceeded);
        assert_eq!(kind(HostErrorKind::Unknown), ErrorKind::Internal);
    }

    #[test]
    fn test_config_errors_are_internal() {
        let err = BridgeError::config("no provider");
        assert_eq!(err.kind(), ErrorKind::Internal);
        assert_eq!(err.client_message(), "Configuration error: no provider");

        let toml_err = toml::from_str::<toml::Value>("port = ").unwrap_err();
        assert_eq!(BridgeError::from(toml_err).kind(), ErrorKind::Internal);
    }

    #[test]
    fn test_host_message_is_client_message() {
        let err = BridgeError::from(HostError::new(HostErrorKind::Blocked, "filtered"));
        assert_eq!(err.client_message(), "filtered");
    }
}
