//! Observable authentication state

use backend_auth::BackendToken;
use identity::{Identity, PrimarySession};

/// Where the session currently stands.
///
/// Transitions:
/// - Initializing → Unauthenticated (no session, or lookup failed)
/// - Initializing → AuthenticatedPrimaryOnly → FullyAuthenticated (reconciliation)
/// - AuthenticatedPrimaryOnly ↔ FullyAuthenticated (exchange / smoke test / refresh)
/// - any → Unauthenticated (sign-out)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthPhase {
    Initializing,
    Unauthenticated,
    AuthenticatedPrimaryOnly,
    FullyAuthenticated,
}

impl AuthPhase {
    /// Phase label for logging and status output.
    pub fn label(&self) -> &'static str {
        match self {
            AuthPhase::Initializing => "initializing",
            AuthPhase::Unauthenticated => "unauthenticated",
            AuthPhase::AuthenticatedPrimaryOnly => "authenticated_primary_only",
            AuthPhase::FullyAuthenticated => "fully_authenticated",
        }
    }
}

/// Snapshot of the orchestrator's state.
///
/// Invariants maintained by `AuthSession`:
/// - `backend_authenticated` implies `backend_token.is_some()`
/// - `session.is_none()` implies `!backend_authenticated && backend_token.is_none()`
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AuthState {
    pub user: Option<Identity>,
    pub session: Option<PrimarySession>,
    /// A session lookup or reconciliation is in flight
    pub is_loading: bool,
    pub backend_authenticated: bool,
    pub backend_token: Option<BackendToken>,
}

impl AuthState {
    /// State before the first session lookup completes.
    pub fn initializing() -> Self {
        Self {
            is_loading: true,
            ..Self::default()
        }
    }

    pub fn phase(&self) -> AuthPhase {
        match (&self.session, self.backend_authenticated) {
            (None, _) if self.is_loading => AuthPhase::Initializing,
            (None, _) => AuthPhase::Unauthenticated,
            (Some(_), true) => AuthPhase::FullyAuthenticated,
            (Some(_), false) => AuthPhase::AuthenticatedPrimaryOnly,
        }
    }

    /// Adopt a primary session. Any backend linkage belonged to the previous
    /// session and is dropped until reconciliation re-establishes it.
    pub(crate) fn adopt_session(&mut self, session: PrimarySession) {
        self.user = Some(session.user.clone());
        self.session = Some(session);
        self.backend_authenticated = false;
        self.backend_token = None;
        self.is_loading = true;
    }

    pub(crate) fn link_backend(&mut self, token: BackendToken) {
        self.backend_token = Some(token);
        self.backend_authenticated = true;
    }

    pub(crate) fn unlink_backend(&mut self) {
        self.backend_token = None;
        self.backend_authenticated = false;
    }

    pub(crate) fn sign_out(&mut self) {
        *self = Self::default();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::Secret;

    fn session() -> PrimarySession {
        PrimarySession {
            access_credential: Secret::new("sb-1".into()),
            refresh_credential: None,
            expires_at: None,
            user: Identity {
                id: "u-1".into(),
                email: None,
                metadata: serde_json::Map::new(),
            },
        }
    }

    #[test]
    fn phases_follow_fields() {
        let mut state = AuthState::initializing();
        assert_eq!(state.phase(), AuthPhase::Initializing);

        state.is_loading = false;
        assert_eq!(state.phase(), AuthPhase::Unauthenticated);

        state.adopt_session(session());
        assert_eq!(state.phase(), AuthPhase::AuthenticatedPrimaryOnly);

        state.link_backend("T1".into());
        assert_eq!(state.phase(), AuthPhase::FullyAuthenticated);

        state.unlink_backend();
        assert_eq!(state.phase(), AuthPhase::AuthenticatedPrimaryOnly);
    }

    #[test]
    fn adopting_a_session_drops_previous_backend_link() {
        let mut state = AuthState::default();
        state.adopt_session(session());
        state.link_backend("T1".into());

        state.adopt_session(session());
        assert!(!state.backend_authenticated);
        assert!(state.backend_token.is_none());
        assert!(state.user.is_some());
    }

    #[test]
    fn sign_out_resets_everything() {
        let mut state = AuthState::default();
        state.adopt_session(session());
        state.link_backend("T1".into());

        state.sign_out();
        assert_eq!(state, AuthState::default());
        assert_eq!(state.phase(), AuthPhase::Unauthenticated);
        assert_eq!(state.phase().label(), "unauthenticated");
    }
}
