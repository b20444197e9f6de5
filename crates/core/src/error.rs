//! Shared error type for SummitHub services

use thiserror::Error;

/// Errors raised by the shared building blocks (configuration, validation)
#[derive(Debug, Clone, Error, PartialEq)]
pub enum SummitHubError {
    /// A configuration value is missing, malformed or out of range
    #[error("Configuration error: {message}")]
    ConfigurationError {
        message: String,
        /// Environment variable the error refers to, if any
        key: Option<String>,
    },

    /// Caller supplied input that does not satisfy a constraint
    #[error("Validation error on {field}: {message}")]
    ValidationError { message: String, field: String },
}

impl SummitHubError {
    /// Build a configuration error bound to an environment key
    pub fn config(message: impl Into<String>, key: impl Into<String>) -> Self {
        Self::ConfigurationError {
            message: message.into(),
            key: Some(key.into()),
        }
    }

    /// Build a validation error for a named field
    pub fn validation_field(message: impl Into<String>, field: impl Into<String>) -> Self {
        Self::ValidationError {
            message: message.into(),
            field: field.into(),
        }
    }

    /// Name of the offending field for validation errors
    pub fn field(&self) -> Option<&str> {
        match self {
            Self::ValidationError { field, .. } => Some(field),
            Self::ConfigurationError { .. } => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validation_field_display() {
        let err = SummitHubError::validation_field("must be finite", "lat");
        assert_eq!(err.to_string(), "Validation error on lat: must be finite");
        assert_eq!(err.field(), Some("lat"));
    }

    #[test]
    fn test_config_error_keeps_key() {
        let err = SummitHubError::config("bad port", "SUMMITHUB_SERVICE_PORT");
        match err {
            SummitHubError::ConfigurationError { key, .. } => {
                assert_eq!(key.as_deref(), Some("SUMMITHUB_SERVICE_PORT"));
            }
            _ => panic!("Expected ConfigurationError"),
        }
    }
}
