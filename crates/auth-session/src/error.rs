//! Error types for session orchestration

use identity::IdentityError;

/// Errors surfaced by `AuthSession`'s public operations.
///
/// Backend-link failures never appear here: they are absorbed into
/// `AuthState::backend_authenticated` and logged.
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error(transparent)]
    Identity(#[from] IdentityError),

    #[error("session has been shut down")]
    ShutDown,
}

/// Result alias for session operations.
pub type Result<T> = std::result::Result<T, AuthError>;
