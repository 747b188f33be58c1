use thiserror::Error;

use crate::client::is_retriable_status;

/// Errors raised while talking to the Agent Service.
#[derive(Error, Debug)]
pub enum ServiceError {
    /// The service answered with a non-success status and no structured error body.
    #[error("HTTP error: {status} - {message}")]
    Http { status: u16, message: String },

    /// The credential could not be turned into an authorization header.
    #[error("Authentication failed: {0}")]
    Auth(String),

    /// A payload could not be serialized or deserialized.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The HTTP request failed at the transport level.
    #[error("Request error: {0}")]
    Request(#[from] reqwest::Error),

    /// The endpoint URL is invalid.
    #[error("Invalid endpoint URL: {message}")]
    InvalidEndpoint {
        message: String,
        #[source]
        source: Option<url::ParseError>,
    },

    /// A required configuration value is missing.
    #[error("Missing configuration: {0}")]
    MissingConfig(String),

    /// The service returned a structured `{"error": {...}}` body.
    #[error("API error ({code}): {message}")]
    Api { code: String, message: String },

    /// A request builder was given missing or out-of-range values.
    #[error("Invalid request: {0}")]
    Builder(String),
}

impl ServiceError {
    /// Create an [`ServiceError::Http`] error.
    pub fn http(status: u16, message: impl Into<String>) -> Self {
        Self::Http {
            status,
            message: message.into(),
        }
    }

    /// Create an [`ServiceError::InvalidEndpoint`] error wrapping a URL parse failure.
    pub fn invalid_endpoint_with_source(message: impl Into<String>, source: url::ParseError) -> Self {
        Self::InvalidEndpoint {
            message: message.into(),
            source: Some(source),
        }
    }

    /// Whether repeating the same request could plausibly succeed.
    ///
    /// True for retriable HTTP statuses and for transport timeouts or
    /// connection failures. Decode failures are not retriable.
    pub fn is_retriable(&self) -> bool {
        match self {
            Self::Http { status, .. } => is_retriable_status(*status),
            Self::Request(e) => e.is_timeout() || e.is_connect(),
            _ => false,
        }
    }
}

/// Result type alias for Agent Service operations.
pub type ServiceResult<T> = std::result::Result<T, ServiceError>;
