//! Error types for the image service client.
//!
//! # Design
//! Callers branch on the error kind, never on raw status codes. Every variant
//! produced from an HTTP response carries the response body text so the
//! server's explanation survives. `Connection` covers everything below HTTP:
//! socket failures, TLS handshakes and unreadable certificate material.

use std::io;

/// Errors returned by `Client::request` and the supporting components.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// Network, TLS or certificate-file failure. Never retried.
    #[error("connection error: {0}")]
    Connection(String),

    /// The server returned 401 or 403.
    #[error("not authorized: {0}")]
    NotAuthorized(String),

    /// The server returned 404.
    #[error("not found: {0}")]
    NotFound(String),

    /// The server returned 409.
    #[error("duplicate: {0}")]
    Duplicate(String),

    /// The server returned 400.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// The server returned 300.
    #[error("multiple choices: {0}")]
    MultipleChoices(String),

    /// The server returned 500.
    #[error("internal server error: {0}")]
    ServerError(String),

    /// Any status the classifier does not recognise.
    #[error("unknown error occurred (HTTP {status}): {body}")]
    Unknown { status: u16, body: String },

    /// The auth plugin could not obtain a token.
    #[error("authentication failed: {0}")]
    Authentication(String),

    /// A management or auth URL that cannot be used to connect.
    #[error("invalid url: {0}")]
    InvalidUrl(String),

    /// The server sent something that is not an HTTP/1.x response.
    #[error("protocol error: {0}")]
    Protocol(String),
}

impl From<io::Error> for ApiError {
    fn from(e: io::Error) -> Self {
        ApiError::Connection(e.to_string())
    }
}

impl From<rustls::Error> for ApiError {
    fn from(e: rustls::Error) -> Self {
        ApiError::Connection(format!("tls: {e}"))
    }
}

impl From<url::ParseError> for ApiError {
    fn from(e: url::ParseError) -> Self {
        ApiError::InvalidUrl(e.to_string())
    }
}

impl ApiError {
    /// True for the kind that triggers the single re-authentication retry.
    pub fn is_not_authorized(&self) -> bool {
        matches!(self, ApiError::NotAuthorized(_))
    }
}
