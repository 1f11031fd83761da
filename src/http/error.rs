//! Error types for the chain gateway client.

use thiserror::Error;

use crate::chain::ChainError;

/// Errors that can occur while talking to the chain gateway.
///
/// # Error Categories
///
/// - **Network errors**: [`RequestFailed`](HttpError::RequestFailed),
///   [`MiddlewareError`](HttpError::MiddlewareError)
/// - **Server errors**: [`ServerError`](HttpError::ServerError)
/// - **Client errors**: [`UrlError`](HttpError::UrlError),
///   [`UnsupportedMethod`](HttpError::UnsupportedMethod),
///   [`JsonError`](HttpError::JsonError)
#[derive(Debug, Error)]
pub enum HttpError {
    /// Connection refused, timeout, DNS or TLS failure.
    #[error("Request failed: {0}")]
    RequestFailed(#[from] reqwest::Error),

    /// An error in the retry middleware, usually after all attempts were exhausted.
    #[error("Middleware error: {0}")]
    MiddlewareError(#[from] reqwest_middleware::Error),

    /// The gateway returned a non-success status code.
    #[error("Server error {status}: {body}")]
    ServerError {
        status: reqwest::StatusCode,
        body: String,
    },

    #[error("URL parse error: {0}")]
    UrlError(#[from] url::ParseError),

    /// Only `GET` and `POST` are supported.
    #[error("Unsupported HTTP method")]
    UnsupportedMethod,

    #[error("JSON serialization error: {0}")]
    JsonError(#[from] serde_json::Error),
}

impl HttpError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, HttpError::ServerError { status, .. } if *status == reqwest::StatusCode::NOT_FOUND)
    }
}

impl From<HttpError> for ChainError {
    fn from(err: HttpError) -> Self {
        match err {
            HttpError::JsonError(e) => ChainError::Malformed(e.to_string()),
            other => ChainError::Unavailable(other.to_string()),
        }
    }
}
