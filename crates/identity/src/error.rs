//! Error types for identity-provider operations

/// Errors from the identity provider (session lookup, sign-in, sign-up, sign-out).
///
/// These are the only auth failures surfaced to callers as typed errors.
#[derive(Debug, thiserror::Error)]
pub enum IdentityError {
    #[error("identity request failed: {0}")]
    Http(String),

    #[error("invalid credentials: {0}")]
    InvalidCredentials(String),

    #[error("identity provider rejected request: {0}")]
    Rejected(String),

    #[error("session storage error: {0}")]
    Storage(String),

    #[error("unexpected identity response: {0}")]
    Protocol(String),
}

impl From<common::Error> for IdentityError {
    fn from(e: common::Error) -> Self {
        IdentityError::Storage(e.to_string())
    }
}

/// Result alias for identity operations.
pub type Result<T> = std::result::Result<T, IdentityError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn storage_errors_convert() {
        let err: IdentityError = common::Error::Config("no file name".into()).into();
        assert!(matches!(err, IdentityError::Storage(_)));
        assert!(err.to_string().contains("no file name"));
    }
}
