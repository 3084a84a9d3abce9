//! Identity provider abstraction
//!
//! Defines the `IdentityProvider` trait that decouples session orchestration
//! from the identity service that actually checks passwords and issues primary
//! sessions. `SupabaseProvider` implements it against a GoTrue endpoint; tests
//! substitute in-memory fakes behind the same trait.
//!
//! The provider owns the primary session. Consumers receive immutable
//! snapshots (`PrimarySession` clones) and learn about changes through the
//! broadcast stream returned by `subscribe()`.

pub mod error;
pub mod supabase;

pub use error::{IdentityError, Result};
pub use supabase::{SupabaseConfig, SupabaseProvider};

use common::Secret;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::pin::Pin;
use tokio::sync::broadcast;

/// Boxed future returned by provider methods (keeps the trait dyn-compatible).
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// The authenticated user as described by the identity provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Identity {
    pub id: String,
    #[serde(default)]
    pub email: Option<String>,
    /// Arbitrary profile data supplied at sign-up
    #[serde(default, alias = "user_metadata")]
    pub metadata: serde_json::Map<String, serde_json::Value>,
}

/// A primary session issued by the identity provider.
///
/// `access_credential` is what gets exchanged for a backend token.
#[derive(Debug, Clone, PartialEq)]
pub struct PrimarySession {
    pub access_credential: Secret<String>,
    pub refresh_credential: Option<Secret<String>>,
    /// Unix seconds; `None` when the provider did not say
    pub expires_at: Option<u64>,
    pub user: Identity,
}

impl PrimarySession {
    /// Whether both sessions carry the same access credential.
    pub fn same_credential(&self, other: &PrimarySession) -> bool {
        self.access_credential == other.access_credential
    }
}

/// Email/password pair for sign-in and sign-up.
#[derive(Debug, Clone)]
pub struct Credentials {
    pub email: String,
    pub password: Secret<String>,
}

impl Credentials {
    pub fn new(email: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            email: email.into(),
            password: Secret::new(password.into()),
        }
    }
}

/// Result of a sign-up: the user always, a session only when the provider
/// confirms the account immediately.
#[derive(Debug, Clone, Default)]
pub struct SignUpOutcome {
    pub user: Option<Identity>,
    pub session: Option<PrimarySession>,
}

/// Session-change notifications emitted by the provider.
#[derive(Debug, Clone)]
pub enum SessionEvent {
    SignedIn(PrimarySession),
    SignedOut,
    /// Same user, new access credential
    TokenRefreshed(PrimarySession),
}

impl SessionEvent {
    /// Label for logging.
    pub fn label(&self) -> &'static str {
        match self {
            SessionEvent::SignedIn(_) => "signed_in",
            SessionEvent::SignedOut => "signed_out",
            SessionEvent::TokenRefreshed(_) => "token_refreshed",
        }
    }
}

/// Source of primary sessions.
///
/// Uses `Pin<Box<dyn Future>>` return types for dyn-compatibility
/// (`Arc<dyn IdentityProvider>`).
pub trait IdentityProvider: Send + Sync {
    /// Identifier for logging (e.g. "supabase")
    fn id(&self) -> &str;

    /// The session the provider currently holds, if any.
    fn current_session(&self) -> BoxFuture<'_, Result<Option<PrimarySession>>>;

    /// Authenticate with email/password. Emits `SignedIn` on success.
    fn sign_in<'a>(&'a self, credentials: &'a Credentials) -> BoxFuture<'a, Result<PrimarySession>>;

    /// Register a new account. Emits `SignedIn` when a session is issued.
    fn sign_up<'a>(
        &'a self,
        credentials: &'a Credentials,
        metadata: serde_json::Map<String, serde_json::Value>,
    ) -> BoxFuture<'a, Result<SignUpOutcome>>;

    /// End the primary session. Emits `SignedOut`.
    fn sign_out(&self) -> BoxFuture<'_, Result<()>>;

    /// Register for session-change events.
    fn subscribe(&self) -> broadcast::Receiver<SessionEvent>;
}
