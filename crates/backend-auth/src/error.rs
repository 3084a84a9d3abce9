//! Error types for backend token operations

/// Errors from backend token exchange, validation and caching.
///
/// None of these cross the session orchestrator's public contract: they are
/// logged and collapse into `backend_authenticated = false`.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("HTTP request failed: {0}")]
    Http(String),

    #[error("token exchange failed: {0}")]
    TokenExchange(String),

    #[error("backend rejected token: {0}")]
    Invalid(String),

    #[error("token cache error: {0}")]
    Storage(String),
}

impl Error {
    /// Transport-level failures are the only ones worth retrying.
    pub fn is_transient(&self) -> bool {
        matches!(self, Error::Http(_))
    }
}

impl From<common::Error> for Error {
    fn from(e: common::Error) -> Self {
        Error::Storage(e.to_string())
    }
}

/// Result alias for backend auth operations.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_transport_errors_are_transient() {
        assert!(Error::Http("connection refused".into()).is_transient());
        assert!(!Error::TokenExchange("401".into()).is_transient());
        assert!(!Error::Invalid("expired".into()).is_transient());
        assert!(!Error::Storage("disk full".into()).is_transient());
    }
}
