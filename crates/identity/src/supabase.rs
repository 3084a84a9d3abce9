//! Supabase (GoTrue) identity provider
//!
//! Talks to the GoTrue REST endpoints under `{url}/auth/v1`:
//! - `POST /token?grant_type=password`: email/password sign-in
//! - `POST /token?grant_type=refresh_token`: renew an expiring session
//! - `POST /signup`: register (returns a session only when auto-confirmed)
//! - `POST /logout`: revoke the session server-side
//!
//! Every request carries the project's anon key in the `apikey` header. The
//! current session is persisted to `session_path` so a restarted process
//! resumes it, the same way the browser client keeps it in local storage.

use std::path::PathBuf;
use std::time::{SystemTime, UNIX_EPOCH};

use common::Secret;
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, broadcast};
use tracing::{debug, info, warn};

use crate::error::{IdentityError, Result};
use crate::{
    BoxFuture, Credentials, Identity, IdentityProvider, PrimarySession, SessionEvent,
    SignUpOutcome,
};

/// Sessions expiring within this many seconds are refreshed on lookup.
const REFRESH_MARGIN_SECS: u64 = 60;

/// Buffered session events per subscriber before the oldest are dropped.
const EVENT_CAPACITY: usize = 16;

/// Connection settings for a Supabase project.
#[derive(Debug, Clone)]
pub struct SupabaseConfig {
    /// Project URL, e.g. `https://abcd.supabase.co`
    pub url: String,
    pub anon_key: Secret<String>,
    /// Where the primary session is persisted between runs
    pub session_path: PathBuf,
}

/// Session as returned by the GoTrue token and signup endpoints.
#[derive(Debug, Deserialize)]
struct GoTrueSession {
    access_token: String,
    #[serde(default)]
    refresh_token: Option<String>,
    #[serde(default)]
    expires_in: Option<u64>,
    #[serde(default)]
    expires_at: Option<u64>,
    user: Identity,
}

impl GoTrueSession {
    fn into_session(self) -> PrimarySession {
        let expires_at = self
            .expires_at
            .or_else(|| self.expires_in.map(|delta| now_secs() + delta));
        PrimarySession {
            access_credential: Secret::new(self.access_token),
            refresh_credential: self.refresh_token.map(Secret::new),
            expires_at,
            user: self.user,
        }
    }
}

/// Signup responses come in three shapes depending on project settings.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum SignUpResponse {
    Session(GoTrueSession),
    Wrapped {
        user: Identity,
        #[serde(default)]
        session: Option<GoTrueSession>,
    },
    User(Identity),
}

/// On-disk form of the primary session.
#[derive(Debug, Serialize, Deserialize)]
struct StoredSession {
    access_token: String,
    #[serde(default)]
    refresh_token: Option<String>,
    #[serde(default)]
    expires_at: Option<u64>,
    user: Identity,
}

impl From<&PrimarySession> for StoredSession {
    fn from(session: &PrimarySession) -> Self {
        Self {
            access_token: session.access_credential.expose().clone(),
            refresh_token: session
                .refresh_credential
                .as_ref()
                .map(|r| r.expose().clone()),
            expires_at: session.expires_at,
            user: session.user.clone(),
        }
    }
}

impl StoredSession {
    fn into_session(self) -> PrimarySession {
        PrimarySession {
            access_credential: Secret::new(self.access_token),
            refresh_credential: self.refresh_token.map(Secret::new),
            expires_at: self.expires_at,
            user: self.user,
        }
    }
}

/// GoTrue-backed identity provider with a persisted session.
pub struct SupabaseProvider {
    client: reqwest::Client,
    config: SupabaseConfig,
    session: Mutex<Option<PrimarySession>>,
    events: broadcast::Sender<SessionEvent>,
}

impl SupabaseProvider {
    /// Create the provider, resuming any session persisted at `session_path`.
    ///
    /// An unreadable session file is discarded with a warning: the user simply
    /// has to sign in again.
    pub async fn load(client: reqwest::Client, config: SupabaseConfig) -> Self {
        let session = match common::read_json::<StoredSession>(&config.session_path).await {
            Ok(stored) => stored.map(StoredSession::into_session),
            Err(e) => {
                warn!(
                    path = %config.session_path.display(),
                    error = %e,
                    "discarding unreadable session file"
                );
                None
            }
        };
        if let Some(ref s) = session {
            info!(user_id = %s.user.id, "resumed persisted identity session");
        }

        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            client,
            config,
            session: Mutex::new(session),
            events,
        }
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/auth/v1{path}", self.config.url.trim_end_matches('/'))
    }

    fn emit(&self, event: SessionEvent) {
        debug!(event = event.label(), "emitting session event");
        // No subscribers is fine
        let _ = self.events.send(event);
    }

    async fn persist(&self, session: &PrimarySession) -> Result<()> {
        common::write_json_atomic(&self.config.session_path, &StoredSession::from(session))
            .await?;
        Ok(())
    }

    async fn forget(&self) {
        if let Err(e) = common::remove_file(&self.config.session_path).await {
            warn!(error = %e, "failed to remove persisted session");
        }
    }

    async fn post_token(&self, grant_type: &str, body: serde_json::Value) -> Result<PrimarySession> {
        let response = self
            .client
            .post(self.endpoint(&format!("/token?grant_type={grant_type}")))
            .header("apikey", self.config.anon_key.expose())
            .json(&body)
            .send()
            .await
            .map_err(|e| IdentityError::Http(format!("{grant_type} grant request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| String::from("<no body>"));
            // GoTrue answers bad passwords and dead refresh tokens with 400
            if matches!(status.as_u16(), 400 | 401 | 403) {
                return Err(IdentityError::InvalidCredentials(format!(
                    "{grant_type} grant rejected ({status}): {body}"
                )));
            }
            return Err(IdentityError::Rejected(format!(
                "{grant_type} grant returned {status}: {body}"
            )));
        }

        response
            .json::<GoTrueSession>()
            .await
            .map(GoTrueSession::into_session)
            .map_err(|e| IdentityError::Protocol(format!("invalid session response: {e}")))
    }

    /// Adopt a freshly issued session: memory, disk, then subscribers.
    async fn adopt(&self, session: PrimarySession, event: SessionEvent) -> Result<()> {
        let mut current = self.session.lock().await;
        self.persist(&session).await?;
        *current = Some(session);
        drop(current);
        self.emit(event);
        Ok(())
    }
}

impl IdentityProvider for SupabaseProvider {
    fn id(&self) -> &str {
        "supabase"
    }

    fn current_session(&self) -> BoxFuture<'_, Result<Option<PrimarySession>>> {
        Box::pin(async move {
            let current = self.session.lock().await.clone();
            let Some(current) = current else {
                return Ok(None);
            };

            let now = now_secs();
            let expires_at = match current.expires_at {
                Some(at) if at <= now + REFRESH_MARGIN_SECS => at,
                _ => return Ok(Some(current)),
            };

            let Some(refresh) = current.refresh_credential.clone() else {
                if expires_at <= now {
                    info!(user_id = %current.user.id, "persisted session expired, no refresh token");
                    *self.session.lock().await = None;
                    self.forget().await;
                    return Ok(None);
                }
                return Ok(Some(current));
            };

            debug!(user_id = %current.user.id, "identity session expiring, refreshing");
            match self
                .post_token(
                    "refresh_token",
                    serde_json::json!({ "refresh_token": refresh.expose() }),
                )
                .await
            {
                Ok(session) => {
                    self.adopt(session.clone(), SessionEvent::TokenRefreshed(session.clone()))
                        .await?;
                    info!(user_id = %session.user.id, "identity session refreshed");
                    Ok(Some(session))
                }
                Err(IdentityError::InvalidCredentials(msg)) => {
                    warn!(error = %msg, "refresh token rejected, dropping session");
                    *self.session.lock().await = None;
                    self.forget().await;
                    Ok(None)
                }
                Err(e) => Err(e),
            }
        })
    }

    fn sign_in<'a>(&'a self, credentials: &'a Credentials) -> BoxFuture<'a, Result<PrimarySession>> {
        Box::pin(async move {
            debug!(email = %credentials.email, "password sign-in");
            let session = self
                .post_token(
                    "password",
                    serde_json::json!({
                        "email": credentials.email,
                        "password": credentials.password.expose(),
                    }),
                )
                .await?;
            self.adopt(session.clone(), SessionEvent::SignedIn(session.clone()))
                .await?;
            info!(user_id = %session.user.id, "signed in");
            Ok(session)
        })
    }

    fn sign_up<'a>(
        &'a self,
        credentials: &'a Credentials,
        metadata: serde_json::Map<String, serde_json::Value>,
    ) -> BoxFuture<'a, Result<SignUpOutcome>> {
        Box::pin(async move {
            let response = self
                .client
                .post(self.endpoint("/signup"))
                .header("apikey", self.config.anon_key.expose())
                .json(&serde_json::json!({
                    "email": credentials.email,
                    "password": credentials.password.expose(),
                    "data": metadata,
                }))
                .send()
                .await
                .map_err(|e| IdentityError::Http(format!("signup request failed: {e}")))?;

            let status = response.status();
            if !status.is_success() {
                let body = response
                    .text()
                    .await
                    .unwrap_or_else(|_| String::from("<no body>"));
                return Err(IdentityError::Rejected(format!(
                    "signup returned {status}: {body}"
                )));
            }

            let parsed = response
                .json::<SignUpResponse>()
                .await
                .map_err(|e| IdentityError::Protocol(format!("invalid signup response: {e}")))?;

            let outcome = match parsed {
                SignUpResponse::Session(s) => {
                    let session = s.into_session();
                    SignUpOutcome {
                        user: Some(session.user.clone()),
                        session: Some(session),
                    }
                }
                SignUpResponse::Wrapped { user, session } => SignUpOutcome {
                    user: Some(user),
                    session: session.map(GoTrueSession::into_session),
                },
                SignUpResponse::User(user) => SignUpOutcome {
                    user: Some(user),
                    session: None,
                },
            };

            match &outcome.session {
                Some(session) => {
                    self.adopt(session.clone(), SessionEvent::SignedIn(session.clone()))
                        .await?;
                    info!(user_id = %session.user.id, "signed up and signed in");
                }
                None => {
                    info!(email = %credentials.email, "signed up, confirmation pending");
                }
            }
            Ok(outcome)
        })
    }

    fn sign_out(&self) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            let previous = self.session.lock().await.take();
            self.forget().await;
            self.emit(SessionEvent::SignedOut);

            let Some(previous) = previous else {
                return Ok(());
            };

            let response = self
                .client
                .post(self.endpoint("/logout"))
                .header("apikey", self.config.anon_key.expose())
                .bearer_auth(previous.access_credential.expose())
                .send()
                .await
                .map_err(|e| IdentityError::Http(format!("logout request failed: {e}")))?;

            let status = response.status();
            if !status.is_success() {
                return Err(IdentityError::Rejected(format!("logout returned {status}")));
            }
            info!(user_id = %previous.user.id, "signed out");
            Ok(())
        })
    }

    fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }
}

fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}
