//! Errors from authenticated backend calls

use thiserror::Error;

/// Failures of an `ApiClient` request.
///
/// Backend rejections keep the status and the message from the response body
/// so callers can show it; transport problems carry the reqwest error text.
#[derive(Error, Debug)]
pub enum ApiError {
    #[error("authentication required but no backend token is cached")]
    MissingToken,

    #[error("invalid request URL: {0}")]
    Url(String),

    #[error("request failed: {0}")]
    Http(String),

    #[error("backend returned {status}: {message}")]
    Status { status: u16, message: String },

    #[error("invalid response body: {0}")]
    Decode(String),
}

impl ApiError {
    /// Whether the backend refused the bearer token.
    pub fn is_unauthorized(&self) -> bool {
        matches!(self, ApiError::Status { status: 401, .. })
    }
}

/// Result alias using `ApiError`
pub type Result<T> = std::result::Result<T, ApiError>;
