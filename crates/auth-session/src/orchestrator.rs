//! Auth session orchestrator
//!
//! Owns `AuthState` and is the only writer of the token cache. Every
//! reconciliation is issued a `Ticket` carrying a generation number and the
//! user it was started for. Sign-in, sign-out, refresh and shutdown all bump
//! the generation under the same async lock that guards commits, so a result
//! computed for an older generation (or another user) is dropped instead of
//! resurrecting backend access after a sign-out.
//!
//! Reconciliation for a present primary session:
//! 1. Validate the cached backend token; if valid, adopt it
//! 2. Otherwise exchange the primary access credential for a new token
//! 3. Persist + adopt the new token, then optionally smoke-test it
//!
//! Each backend call is bounded by `call_timeout`; expiry counts as failure.

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex, PoisonError};
use std::time::Duration;

use backend_auth::{BackendToken, TokenCache, TokenExchanger};
use identity::{
    Credentials, Identity, IdentityProvider, PrimarySession, SessionEvent, SignUpOutcome,
};
use tokio::sync::{Mutex, watch};
use tracing::{debug, info, warn};

use crate::error::{AuthError, Result};
use crate::listener::{Subscription, spawn_listener};
use crate::metrics;
use crate::state::{AuthPhase, AuthState};

/// Default bound on a single session lookup or backend call.
pub const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(10);

/// Orchestrator tuning.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub call_timeout: Duration,
    /// Probe the backend with a freshly exchanged token
    pub smoke_test: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            call_timeout: DEFAULT_CALL_TIMEOUT,
            smoke_test: true,
        }
    }
}

/// Identifies one reconciliation attempt.
#[derive(Debug, Clone)]
struct Ticket {
    generation: u64,
    user_id: String,
}

/// Single source of truth for authentication state.
pub struct AuthSession {
    identity: Arc<dyn IdentityProvider>,
    exchanger: Arc<dyn TokenExchanger>,
    cache: Arc<TokenCache>,
    config: SessionConfig,
    state: watch::Sender<AuthState>,
    /// Current generation; held while committing
    generation: Mutex<u64>,
    /// Serializes manual refreshes so concurrent callers share one exchange
    refresh_flight: Mutex<()>,
    closed: AtomicBool,
    subscription: StdMutex<Option<Subscription>>,
}

impl AuthSession {
    pub fn new(
        identity: Arc<dyn IdentityProvider>,
        exchanger: Arc<dyn TokenExchanger>,
        cache: Arc<TokenCache>,
        config: SessionConfig,
    ) -> Arc<Self> {
        let (state, _) = watch::channel(AuthState::initializing());
        Arc::new(Self {
            identity,
            exchanger,
            cache,
            config,
            state,
            generation: Mutex::new(0),
            refresh_flight: Mutex::new(()),
            closed: AtomicBool::new(false),
            subscription: StdMutex::new(None),
        })
    }

    /// Construct, subscribe to provider events, and run initialization.
    ///
    /// The subscription is registered before the initial lookup so no event
    /// emitted in between is missed.
    pub async fn start(
        identity: Arc<dyn IdentityProvider>,
        exchanger: Arc<dyn TokenExchanger>,
        cache: Arc<TokenCache>,
        config: SessionConfig,
    ) -> Arc<Self> {
        let session = Self::new(identity, exchanger, cache, config);
        session.listen();
        session.initialize().await;
        session
    }

    /// Register for identity-provider events, replacing any earlier
    /// subscription.
    pub fn listen(self: &Arc<Self>) {
        let subscription = spawn_listener(Arc::downgrade(self), self.identity.subscribe());
        let previous = self
            .subscription
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .replace(subscription);
        drop(previous);
        debug!(provider = self.identity.id(), "subscribed to session events");
    }

    /// Look up an existing primary session and reconcile it.
    ///
    /// Never fails: a lookup error or timeout leaves the session
    /// unauthenticated so public functionality keeps working.
    pub async fn initialize(&self) {
        let lookup = self
            .bounded("session_lookup", self.identity.current_session())
            .await;
        match lookup {
            Some(Ok(Some(session))) => {
                info!(
                    user_id = %session.user.id,
                    provider = self.identity.id(),
                    "existing primary session found"
                );
                self.establish(session).await;
            }
            Some(Ok(None)) => {
                info!("no primary session");
                self.clear_local(true).await;
            }
            Some(Err(e)) => {
                warn!(error = %e, "primary session lookup failed, continuing unauthenticated");
                self.clear_local(false).await;
            }
            None => {
                warn!("primary session lookup timed out, continuing unauthenticated");
                self.clear_local(false).await;
            }
        }
    }

    /// Unsubscribe from provider events and fence off in-flight work.
    pub async fn shutdown(&self) {
        self.closed.store(true, Ordering::SeqCst);
        *self.generation.lock().await += 1;
        let subscription = self
            .subscription
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(subscription) = subscription {
            subscription.unsubscribe();
        }
        info!("auth session shut down");
    }

    /// Whether a provider event listener is running.
    pub fn is_listening(&self) -> bool {
        self.subscription
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .is_some_and(Subscription::is_active)
    }

    // --- Read accessors ---

    pub fn state(&self) -> AuthState {
        self.state.borrow().clone()
    }

    /// Receiver that observes every state change.
    pub fn watch(&self) -> watch::Receiver<AuthState> {
        self.state.subscribe()
    }

    pub fn user(&self) -> Option<Identity> {
        self.state.borrow().user.clone()
    }

    pub fn session(&self) -> Option<PrimarySession> {
        self.state.borrow().session.clone()
    }

    pub fn is_loading(&self) -> bool {
        self.state.borrow().is_loading
    }

    pub fn backend_authenticated(&self) -> bool {
        self.state.borrow().backend_authenticated
    }

    pub fn backend_token(&self) -> Option<BackendToken> {
        self.state.borrow().backend_token.clone()
    }

    pub fn phase(&self) -> AuthPhase {
        self.state.borrow().phase()
    }

    /// Wait until no lookup or reconciliation is in flight.
    pub async fn settled(&self) -> AuthState {
        let mut rx = self.state.subscribe();
        match rx.wait_for(|s| !s.is_loading).await {
            Ok(state) => (*state).clone(),
            Err(_) => self.state(),
        }
    }

    // --- Mutating operations ---

    /// Sign in with the identity provider, then reconcile backend access.
    ///
    /// Only identity failures are returned; a failed backend link leaves the
    /// user signed in with `backend_authenticated == false`. If the provider's
    /// `SignedIn` event was applied first, its reconciliation may still be
    /// running when this returns; use [`settled`](Self::settled) to wait.
    pub async fn sign_in(&self, credentials: &Credentials) -> Result<PrimarySession> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(AuthError::ShutDown);
        }
        let session = self
            .identity
            .sign_in(credentials)
            .await
            .inspect_err(|e| warn!(email = %credentials.email, error = %e, "sign-in failed"))?;
        self.establish(session.clone()).await;
        Ok(session)
    }

    /// Register with the identity provider. Reconciles when the provider
    /// issues a session right away.
    pub async fn sign_up(
        &self,
        credentials: &Credentials,
        metadata: serde_json::Map<String, serde_json::Value>,
    ) -> Result<SignUpOutcome> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(AuthError::ShutDown);
        }
        let outcome = self
            .identity
            .sign_up(credentials, metadata)
            .await
            .inspect_err(|e| warn!(email = %credentials.email, error = %e, "sign-up failed"))?;
        if let Some(session) = outcome.session.clone() {
            self.establish(session).await;
        }
        Ok(outcome)
    }

    /// Clear local state and the cached token, then tell the provider.
    ///
    /// Local state is cleared first and stays cleared whatever the provider
    /// answers.
    pub async fn sign_out(&self) {
        self.clear_local(true).await;
        info!("signed out locally");
        if let Err(e) = self.identity.sign_out().await {
            warn!(error = %e, "identity provider sign-out failed, local session already cleared");
        }
    }

    /// Exchange the current primary credential for a fresh backend token,
    /// skipping cached-token validation.
    ///
    /// Returns `None` without any network call when there is no session.
    /// Concurrent callers share one exchange: whoever waited behind an
    /// in-flight refresh gets its result.
    pub async fn refresh_backend_token(&self) -> Option<BackendToken> {
        let (user_id, seen) = {
            let state = self.state.borrow();
            (
                state.session.as_ref().map(|s| s.user.id.clone()),
                state.backend_token.clone(),
            )
        };
        let Some(user_id) = user_id else {
            debug!("no primary session, nothing to refresh");
            return None;
        };

        let _flight = self.refresh_flight.lock().await;

        let (session, current, linked) = {
            let state = self.state.borrow();
            (
                state.session.clone(),
                state.backend_token.clone(),
                state.backend_authenticated,
            )
        };
        if linked && current.is_some() && current != seen {
            debug!("backend token replaced while waiting, reusing it");
            return current;
        }
        let session = session.filter(|s| s.user.id == user_id)?;

        let ticket = self.begin_refresh(&user_id).await?;
        info!(user_id = %user_id, "refreshing backend token");
        self.reconcile(ticket, session, false).await
    }

    // --- Event handling ---

    /// Apply one provider event. Called by the listener in emission order.
    pub(crate) async fn handle_event(self: &Arc<Self>, event: SessionEvent) {
        debug!(event = event.label(), "session event");
        if self.closed.load(Ordering::SeqCst) {
            return;
        }
        match event {
            SessionEvent::SignedIn(session) => self.establish_in_background(session).await,
            SessionEvent::SignedOut => {
                self.clear_local(true).await;
                info!("signed out by identity provider");
            }
            SessionEvent::TokenRefreshed(session) => {
                let generation = self.generation.lock().await;
                let same_user = self
                    .state
                    .borrow()
                    .session
                    .as_ref()
                    .is_some_and(|s| s.user.id == session.user.id);
                if same_user {
                    self.state.send_modify(|s| {
                        s.user = Some(session.user.clone());
                        s.session = Some(session);
                    });
                    debug!("primary access credential refreshed");
                } else {
                    drop(generation);
                    self.establish_in_background(session).await;
                }
            }
        }
    }

    /// Re-read the provider's session after missed events.
    pub(crate) async fn resync(self: &Arc<Self>) {
        match self
            .bounded("session_lookup", self.identity.current_session())
            .await
        {
            Some(Ok(Some(session))) => self.establish_in_background(session).await,
            Some(Ok(None)) => self.clear_local(true).await,
            Some(Err(e)) => warn!(error = %e, "resync lookup failed"),
            None => warn!("resync lookup timed out"),
        }
    }

    /// Adopt `session` now and reconcile it on a separate task, so later
    /// events (notably sign-out) are not stuck behind backend calls.
    async fn establish_in_background(self: &Arc<Self>, session: PrimarySession) {
        let Some(ticket) = self.begin(session.clone()).await else {
            return;
        };
        let this = Arc::clone(self);
        tokio::spawn(async move {
            this.reconcile(ticket, session, true).await;
        });
    }

    // --- Reconciliation ---

    async fn establish(&self, session: PrimarySession) -> Option<BackendToken> {
        let ticket = self.begin(session.clone()).await?;
        self.reconcile(ticket, session, true).await
    }

    /// Start a new generation for `session` and adopt it.
    ///
    /// Returns `None` when the same credential is already adopted: whoever
    /// adopted it (a provider event or a direct call) owns its reconciliation.
    async fn begin(&self, session: PrimarySession) -> Option<Ticket> {
        let mut generation = self.generation.lock().await;
        if self.closed.load(Ordering::SeqCst) {
            return None;
        }
        let adopted = self
            .state
            .borrow()
            .session
            .as_ref()
            .is_some_and(|s| s.same_credential(&session));
        if adopted {
            debug!(user_id = %session.user.id, "session already adopted");
            return None;
        }
        *generation += 1;
        let ticket = Ticket {
            generation: *generation,
            user_id: session.user.id.clone(),
        };
        self.state.send_modify(|s| s.adopt_session(session));
        debug!(generation = ticket.generation, user_id = %ticket.user_id, "reconciliation started");
        Some(ticket)
    }

    /// Start a new generation for the already adopted session of `user_id`.
    async fn begin_refresh(&self, user_id: &str) -> Option<Ticket> {
        let mut generation = self.generation.lock().await;
        if self.closed.load(Ordering::SeqCst) {
            return None;
        }
        let current_user = self
            .state
            .borrow()
            .session
            .as_ref()
            .map(|s| s.user.id.clone());
        if current_user.as_deref() != Some(user_id) {
            return None;
        }
        *generation += 1;
        self.state.send_modify(|s| s.is_loading = true);
        Some(Ticket {
            generation: *generation,
            user_id: user_id.to_owned(),
        })
    }

    fn is_current(&self, generation: u64, ticket: &Ticket) -> bool {
        generation == ticket.generation
            && !self.closed.load(Ordering::SeqCst)
            && self
                .state
                .borrow()
                .session
                .as_ref()
                .is_some_and(|s| s.user.id == ticket.user_id)
    }

    fn discard(&self, ticket: &Ticket) -> Option<BackendToken> {
        metrics::record_discarded();
        debug!(
            generation = ticket.generation,
            user_id = %ticket.user_id,
            "discarding stale reconciliation result"
        );
        None
    }

    async fn reconcile(
        &self,
        ticket: Ticket,
        session: PrimarySession,
        use_cache: bool,
    ) -> Option<BackendToken> {
        let mut stale_cached = false;

        if use_cache && let Some(cached) = self.cache.get().await {
            match self
                .bounded("validate", self.exchanger.validate(&cached))
                .await
            {
                Some(validation) if validation.valid => {
                    metrics::record_validation("valid");
                    let generation = self.generation.lock().await;
                    if !self.is_current(*generation, &ticket) {
                        return self.discard(&ticket);
                    }
                    self.state.send_modify(|s| {
                        s.link_backend(cached.clone());
                        s.is_loading = false;
                    });
                    info!(user_id = %ticket.user_id, "cached backend token still valid");
                    return Some(cached);
                }
                Some(_) => {
                    metrics::record_validation("invalid");
                    debug!("cached backend token rejected");
                }
                None => metrics::record_validation("timeout"),
            }
            stale_cached = true;
        }

        let exchanged = match self
            .bounded(
                "exchange",
                self.exchanger.exchange(session.access_credential.expose()),
            )
            .await
        {
            Some(Ok(token)) => {
                metrics::record_exchange("success");
                Ok(token)
            }
            Some(Err(e)) => {
                metrics::record_exchange("failure");
                Err(e.to_string())
            }
            None => {
                metrics::record_exchange("timeout");
                Err(String::from("timed out"))
            }
        };

        let token = match exchanged {
            Ok(token) => token,
            Err(reason) => {
                let generation = self.generation.lock().await;
                if !self.is_current(*generation, &ticket) {
                    return self.discard(&ticket);
                }
                warn!(
                    user_id = %ticket.user_id,
                    error = %reason,
                    "backend token exchange failed, continuing without backend access"
                );
                if stale_cached && let Err(e) = self.cache.clear().await {
                    warn!(error = %e, "failed to clear rejected backend token");
                }
                self.state.send_modify(|s| {
                    s.unlink_backend();
                    s.is_loading = false;
                });
                return None;
            }
        };

        {
            let generation = self.generation.lock().await;
            if !self.is_current(*generation, &ticket) {
                return self.discard(&ticket);
            }
            if let Err(e) = self.cache.set(token.clone()).await {
                warn!(error = %e, "failed to persist backend token");
            }
            let still_loading = self.config.smoke_test;
            self.state.send_modify(|s| {
                s.link_backend(token.clone());
                s.is_loading = still_loading;
            });
            info!(user_id = %ticket.user_id, "backend token issued");
        }

        if self.config.smoke_test {
            let passed = match self
                .bounded("smoke_test", self.exchanger.smoke_test(&token))
                .await
            {
                Some(Ok(())) => true,
                Some(Err(e)) => {
                    warn!(error = %e, "backend auth test failed");
                    false
                }
                None => {
                    warn!("backend auth test timed out");
                    false
                }
            };
            let generation = self.generation.lock().await;
            if !self.is_current(*generation, &ticket) {
                return self.discard(&ticket);
            }
            self.state.send_modify(|s| {
                if !passed {
                    s.backend_authenticated = false;
                }
                s.is_loading = false;
            });
        }

        Some(token)
    }

    /// Drop to unauthenticated, invalidating every in-flight reconciliation.
    async fn clear_local(&self, clear_cache: bool) {
        let mut generation = self.generation.lock().await;
        *generation += 1;
        if clear_cache && let Err(e) = self.cache.clear().await {
            warn!(error = %e, "failed to clear cached backend token");
        }
        self.state.send_modify(AuthState::sign_out);
    }

    async fn bounded<T>(&self, call: &'static str, fut: impl Future<Output = T>) -> Option<T> {
        match tokio::time::timeout(self.config.call_timeout, fut).await {
            Ok(value) => Some(value),
            Err(_) => {
                warn!(
                    call,
                    timeout_ms = self.config.call_timeout.as_millis() as u64,
                    "call timed out"
                );
                None
            }
        }
    }
}
