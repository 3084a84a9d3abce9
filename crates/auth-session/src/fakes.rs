//! In-memory identity provider and token exchanger for orchestrator tests.

use std::collections::{HashSet, VecDeque};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

use backend_auth::{BackendToken, TokenExchanger, Validation};
use common::Secret;
use identity::{
    BoxFuture, Credentials, Identity, IdentityError, IdentityProvider, PrimarySession,
    SessionEvent, SignUpOutcome,
};
use tokio::sync::{Notify, broadcast};

pub fn session_for(user_id: &str, access: &str) -> PrimarySession {
    PrimarySession {
        access_credential: Secret::new(access.to_string()),
        refresh_credential: Some(Secret::new(format!("rt-{access}"))),
        expires_at: None,
        user: Identity {
            id: user_id.to_string(),
            email: Some(format!("{user_id}@example.com")),
            metadata: serde_json::Map::new(),
        },
    }
}

/// Accepts password "correct" for any email; the user id is the email's
/// local part and the access credential is `sb-<user id>`.
pub struct FakeIdentity {
    pub session: Mutex<Option<PrimarySession>>,
    pub lookup_fails: AtomicBool,
    pub sign_out_fails: AtomicBool,
    pub sign_out_calls: AtomicU32,
    events: broadcast::Sender<SessionEvent>,
}

impl FakeIdentity {
    pub fn new(session: Option<PrimarySession>) -> Arc<Self> {
        let (events, _) = broadcast::channel(16);
        Arc::new(Self {
            session: Mutex::new(session),
            lookup_fails: AtomicBool::new(false),
            sign_out_fails: AtomicBool::new(false),
            sign_out_calls: AtomicU32::new(0),
            events,
        })
    }

    /// Emit an event as if another part of the app changed the session.
    pub fn emit(&self, event: SessionEvent) {
        let _ = self.events.send(event);
    }

    /// Live event receivers, i.e. listeners that have not stopped.
    pub fn subscribers(&self) -> usize {
        self.events.receiver_count()
    }

    fn session_for_email(email: &str) -> PrimarySession {
        let user_id = email.split('@').next().unwrap_or(email);
        session_for(user_id, &format!("sb-{user_id}"))
    }
}

impl IdentityProvider for FakeIdentity {
    fn id(&self) -> &str {
        "fake"
    }

    fn current_session(&self) -> BoxFuture<'_, identity::Result<Option<PrimarySession>>> {
        Box::pin(async move {
            if self.lookup_fails.load(Ordering::SeqCst) {
                return Err(IdentityError::Http("provider unreachable".into()));
            }
            Ok(self.session.lock().unwrap().clone())
        })
    }

    fn sign_in<'a>(
        &'a self,
        credentials: &'a Credentials,
    ) -> BoxFuture<'a, identity::Result<PrimarySession>> {
        Box::pin(async move {
            if credentials.password.expose() != "correct" {
                return Err(IdentityError::InvalidCredentials("bad password".into()));
            }
            let session = Self::session_for_email(&credentials.email);
            *self.session.lock().unwrap() = Some(session.clone());
            self.emit(SessionEvent::SignedIn(session.clone()));
            Ok(session)
        })
    }

    fn sign_up<'a>(
        &'a self,
        credentials: &'a Credentials,
        metadata: serde_json::Map<String, serde_json::Value>,
    ) -> BoxFuture<'a, identity::Result<SignUpOutcome>> {
        Box::pin(async move {
            let mut session = Self::session_for_email(&credentials.email);
            session.user.metadata = metadata;
            if credentials.email.starts_with("pending") {
                return Ok(SignUpOutcome {
                    user: Some(session.user),
                    session: None,
                });
            }
            *self.session.lock().unwrap() = Some(session.clone());
            self.emit(SessionEvent::SignedIn(session.clone()));
            Ok(SignUpOutcome {
                user: Some(session.user.clone()),
                session: Some(session),
            })
        })
    }

    fn sign_out(&self) -> BoxFuture<'_, identity::Result<()>> {
        Box::pin(async move {
            self.sign_out_calls.fetch_add(1, Ordering::SeqCst);
            *self.session.lock().unwrap() = None;
            self.emit(SessionEvent::SignedOut);
            if self.sign_out_fails.load(Ordering::SeqCst) {
                return Err(IdentityError::Http("logout unreachable".into()));
            }
            Ok(())
        })
    }

    fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }
}

/// Scripted exchanger. Exchanges pop results from `script` (an empty script
/// fails); tokens in `valid` pass validation.
pub struct FakeExchanger {
    pub exchange_calls: AtomicU32,
    pub validate_calls: AtomicU32,
    pub smoke_calls: AtomicU32,
    pub smoke_ok: AtomicBool,
    /// Exchanges never resolve while set
    pub hang: AtomicBool,
    script: Mutex<VecDeque<Option<String>>>,
    valid: Mutex<HashSet<String>>,
    gate: Mutex<Option<Arc<Notify>>>,
    /// Notified each time an exchange starts
    pub entered: Notify,
}

impl FakeExchanger {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            exchange_calls: AtomicU32::new(0),
            validate_calls: AtomicU32::new(0),
            smoke_calls: AtomicU32::new(0),
            smoke_ok: AtomicBool::new(true),
            hang: AtomicBool::new(false),
            script: Mutex::new(VecDeque::new()),
            valid: Mutex::new(HashSet::new()),
            gate: Mutex::new(None),
            entered: Notify::new(),
        })
    }

    /// Queue the next exchange result: a token, or `None` for a failure.
    pub fn then(&self, token: Option<&str>) -> &Self {
        self.script
            .lock()
            .unwrap()
            .push_back(token.map(str::to_owned));
        self
    }

    pub fn accept(&self, token: &str) -> &Self {
        self.valid.lock().unwrap().insert(token.to_owned());
        self
    }

    /// Hold every exchange until the returned `Notify` is signalled.
    pub fn gate(&self) -> Arc<Notify> {
        let gate = Arc::new(Notify::new());
        *self.gate.lock().unwrap() = Some(gate.clone());
        gate
    }

    /// Let exchanges started from now on through; held ones stay held.
    pub fn ungate(&self) {
        self.gate.lock().unwrap().take();
    }

    pub fn exchanges(&self) -> u32 {
        self.exchange_calls.load(Ordering::SeqCst)
    }

    pub fn validations(&self) -> u32 {
        self.validate_calls.load(Ordering::SeqCst)
    }
}

impl TokenExchanger for FakeExchanger {
    fn exchange<'a>(
        &'a self,
        _access_credential: &'a str,
    ) -> Pin<Box<dyn Future<Output = backend_auth::Result<BackendToken>> + Send + 'a>> {
        Box::pin(async move {
            self.exchange_calls.fetch_add(1, Ordering::SeqCst);
            self.entered.notify_one();
            if self.hang.load(Ordering::SeqCst) {
                std::future::pending::<()>().await;
            }
            let gate = self.gate.lock().unwrap().clone();
            if let Some(gate) = gate {
                gate.notified().await;
            }
            let next = self.script.lock().unwrap().pop_front().flatten();
            match next {
                Some(token) => {
                    self.valid.lock().unwrap().insert(token.clone());
                    Ok(BackendToken::new(token))
                }
                None => Err(backend_auth::Error::Http("connection refused".into())),
            }
        })
    }

    fn validate<'a>(
        &'a self,
        token: &'a BackendToken,
    ) -> Pin<Box<dyn Future<Output = Validation> + Send + 'a>> {
        Box::pin(async move {
            self.validate_calls.fetch_add(1, Ordering::SeqCst);
            if self.valid.lock().unwrap().contains(token.expose()) {
                Validation {
                    valid: true,
                    user: Some(serde_json::json!({"id": "backend-user"})),
                }
            } else {
                Validation::invalid()
            }
        })
    }

    fn smoke_test<'a>(
        &'a self,
        _token: &'a BackendToken,
    ) -> Pin<Box<dyn Future<Output = backend_auth::Result<()>> + Send + 'a>> {
        Box::pin(async move {
            self.smoke_calls.fetch_add(1, Ordering::SeqCst);
            if self.smoke_ok.load(Ordering::SeqCst) {
                Ok(())
            } else {
                Err(backend_auth::Error::Invalid("auth test returned 401".into()))
            }
        })
    }
}

/// Yield until `cond` holds, failing after five seconds.
pub async fn eventually(mut cond: impl FnMut() -> bool) {
    tokio::time::timeout(std::time::Duration::from_secs(5), async {
        while !cond() {
            tokio::task::yield_now().await;
        }
    })
    .await
    .expect("condition never held");
}
