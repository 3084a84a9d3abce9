//! Session orchestration between the identity provider and the backend
//!
//! `AuthSession` reconciles a primary identity-provider session with an
//! application-issued backend token and is the single source of truth the
//! rest of the application reads (`AuthState`). It is the only writer of the
//! `TokenCache`.
//!
//! Lifecycle:
//! 1. `AuthSession::start()` subscribes to provider events, then initializes
//! 2. A present primary session triggers reconciliation: validate the cached
//!    token, otherwise exchange the primary credential for a new one
//! 3. Sign-in events reconcile again; sign-out events clear everything
//! 4. `refresh_backend_token()` forces a fresh exchange (e.g. after a 401)
//! 5. `shutdown()` unsubscribes and fences off any in-flight reconciliation
//!
//! Identity failures are returned to callers. Backend failures never are:
//! they only show up as `backend_authenticated == false`.

pub mod error;
pub mod listener;
pub mod metrics;
pub mod orchestrator;
pub mod state;

#[cfg(test)]
mod fakes;

pub use error::{AuthError, Result};
pub use listener::Subscription;
pub use orchestrator::{AuthSession, SessionConfig};
pub use state::{AuthPhase, AuthState};
