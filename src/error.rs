//! Error types for onenote-image-fetcher
//!
//! This module provides the error taxonomy for the crate:
//! - [`AuthError`] for the OAuth2 authorization-code and refresh flows
//! - [`ApiError`] for calls made through the resilient Graph caller
//! - [`Error`], the crate-level error wrapping both plus I/O and configuration failures
//! - HTTP status code mapping and JSON error bodies for the local web server

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for onenote-image-fetcher operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for onenote-image-fetcher
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error with context about which setting is invalid
    #[error("configuration error: {message}")]
    Config {
        /// Human-readable error message describing the configuration issue
        message: String,
        /// The configuration key that caused the error (e.g., "CLIENT_ID")
        key: Option<String>,
    },

    /// OAuth2 flow failed
    #[error("authentication error: {0}")]
    Auth(#[from] AuthError),

    /// Graph API call failed
    #[error("Graph API error: {0}")]
    Api(#[from] ApiError),

    /// The configured notebook does not exist for the signed-in user
    #[error("notebook not found: {0}")]
    NotebookNotFound(String),

    /// An option submitted from the progress page is not recognised
    #[error("unknown option: {0}")]
    InvalidOption(String),

    /// Target file already exists and the collision policy forbids writing it
    #[error("file collision at {path}: {reason}")]
    FileCollision {
        /// The path where the collision occurred
        path: PathBuf,
        /// Why the path could not be used
        reason: String,
    },

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Network error outside the resilient caller (plain image downloads)
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Local web server error
    #[error("server error: {0}")]
    Server(String),
}

/// Failures of the OAuth2 authorization-code grant and refresh-token exchange
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AuthError {
    /// The callback did not carry an authorization code
    #[error("no authorization code received")]
    MissingCode,

    /// The `state` parameter of the callback does not match the one we issued
    #[error("authorization state mismatch")]
    StateMismatch,

    /// The token endpoint answered without an access token
    #[error("token acquisition failed: {description}")]
    ProviderRejected {
        /// Provider's `error_description`, or a transport failure description
        description: String,
    },

    /// The refresh-token exchange did not yield an access token
    #[error("failed to refresh token: {reason}")]
    RefreshFailed {
        /// Why the refresh failed
        reason: String,
    },
}

/// Failures surfaced by the resilient Graph API caller
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ApiError {
    /// No token is stored; no request was issued
    #[error("no access token available")]
    NoToken,

    /// The provider rejected the token and it could not be refreshed
    #[error("access token expired and could not be refreshed")]
    AuthExpired,

    /// Non-success HTTP status after at most one retry
    #[error("Graph API returned HTTP {status}")]
    HttpError {
        /// HTTP status code of the final response
        status: u16,
    },

    /// The request never produced a response (DNS, connect, timeout, foreign URL)
    #[error("request to {endpoint} failed: {reason}")]
    Transport {
        /// Endpoint or URL that was requested
        endpoint: String,
        /// Underlying failure
        reason: String,
    },

    /// A 2xx response whose body could not be decoded
    #[error("invalid response from {endpoint}: {reason}")]
    InvalidResponse {
        /// Endpoint that returned the body
        endpoint: String,
        /// Decoding failure
        reason: String,
    },
}

impl ApiError {
    /// HTTP status carried by this error, if any
    pub fn status(&self) -> Option<u16> {
        match self {
            ApiError::HttpError { status } => Some(*status),
            ApiError::AuthExpired => Some(401),
            _ => None,
        }
    }
}

/// Error response body returned by the local web server
///
/// ```json
/// {
///   "error": {
///     "code": "missing_code",
///     "message": "authentication error: no authorization code received"
///   }
/// }
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    /// The error details
    pub error: ErrorDetail,
}

/// Detailed error information for server responses
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorDetail {
    /// Machine-readable error code (e.g., "no_token", "invalid_option")
    pub code: String,

    /// Human-readable error message
    pub message: String,

    /// Optional additional context about the error
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl ErrorResponse {
    /// Create a new error body with code and message
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            error: ErrorDetail {
                code: code.into(),
                message: message.into(),
                details: None,
            },
        }
    }
}

/// Convert errors to HTTP status codes for server responses
pub trait ToHttpStatus {
    /// Get the HTTP status code for this error
    fn status_code(&self) -> u16;

    /// Get the machine-readable error code
    fn error_code(&self) -> &str;
}

impl ToHttpStatus for Error {
    fn status_code(&self) -> u16 {
        match self {
            Error::Config { .. } => 400,
            Error::Auth(AuthError::MissingCode) => 400,
            Error::Auth(AuthError::StateMismatch) => 400,
            Error::Auth(_) => 401,

            Error::Api(ApiError::NoToken) => 401,
            Error::Api(ApiError::AuthExpired) => 401,
            Error::Api(_) => 502,

            Error::NotebookNotFound(_) => 404,
            Error::InvalidOption(_) => 422,
            Error::FileCollision { .. } => 409,

            Error::Network(_) => 502,

            Error::Io(_) => 500,
            Error::Serialization(_) => 500,
            Error::Server(_) => 500,
        }
    }

    fn error_code(&self) -> &str {
        match self {
            Error::Config { .. } => "config_error",
            Error::Auth(e) => match e {
                AuthError::MissingCode => "missing_code",
                AuthError::StateMismatch => "state_mismatch",
                AuthError::ProviderRejected { .. } => "provider_rejected",
                AuthError::RefreshFailed { .. } => "refresh_failed",
            },
            Error::Api(e) => match e {
                ApiError::NoToken => "no_token",
                ApiError::AuthExpired => "auth_expired",
                ApiError::HttpError { .. } => "graph_http_error",
                ApiError::Transport { .. } => "graph_transport_error",
                ApiError::InvalidResponse { .. } => "graph_invalid_response",
            },
            Error::NotebookNotFound(_) => "notebook_not_found",
            Error::InvalidOption(_) => "invalid_option",
            Error::FileCollision { .. } => "file_collision",
            Error::Io(_) => "io_error",
            Error::Network(_) => "network_error",
            Error::Serialization(_) => "serialization_error",
            Error::Server(_) => "server_error",
        }
    }
}

impl From<Error> for ErrorResponse {
    fn from(error: Error) -> Self {
        let code = error.error_code().to_string();
        let message = error.to_string();

        let details = match &error {
            Error::Config { key: Some(key), .. } => Some(serde_json::json!({ "key": key })),
            Error::Api(ApiError::HttpError { status }) => {
                Some(serde_json::json!({ "status": status }))
            }
            Error::FileCollision { path, .. } => Some(serde_json::json!({ "path": path })),
            _ => None,
        };

        ErrorResponse {
            error: ErrorDetail {
                code,
                message,
                details,
            },
        }
    }
}
