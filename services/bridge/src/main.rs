//! Translation bridge session CLI
//!
//! Single binary that:
//! 1. Loads config and resumes any persisted identity session
//! 2. Reconciles it with a backend token (cached, or freshly exchanged)
//! 3. Runs one command against the settled session
//! 4. Shuts the session down, leaving token and session files for next time

mod api;
mod cli;
mod config;
mod error;

use std::sync::Arc;

use anyhow::{Context, Result};
use auth_session::{AuthSession, AuthState};
use backend_auth::{AUTH_TEST_PATH, HttpTokenExchanger, TokenCache};
use clap::Parser;
use identity::{Credentials, SupabaseProvider};
use tracing::info;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::api::{ApiClient, RequestOptions};
use crate::cli::{Cli, Command, HttpMethod};
use crate::config::Config;

/// Initialize tracing on stderr with LOG_LEVEL / RUST_LOG support.
///
/// Defaults to `warn` so command output on stdout stays readable.
fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_env("LOG_LEVEL")
        .or_else(|_| EnvFilter::try_from_default_env())
        .unwrap_or_else(|_| EnvFilter::new("warn"));
    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_writer(std::io::stderr),
            )
            .init();
    } else {
        registry
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init();
    }
}

/// Printable view of `AuthState`. The backend token is never shown.
fn status_json(state: &AuthState) -> serde_json::Value {
    serde_json::json!({
        "phase": state.phase().label(),
        "is_loading": state.is_loading,
        "user": state.user,
        "session_expires_at": state.session.as_ref().and_then(|s| s.expires_at),
        "backend_authenticated": state.backend_authenticated,
        "backend_token": state.backend_token.as_ref().map(|_| "[REDACTED]"),
    })
}

fn print_json(value: &serde_json::Value) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn resolve_password(flag: Option<String>) -> Result<String> {
    flag.or_else(|| std::env::var("BRIDGE_PASSWORD").ok())
        .context("no password: pass --password or set BRIDGE_PASSWORD")
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.json_logs);

    let config_path = Config::resolve_path(cli.config.as_deref());
    info!(path = %config_path.display(), "loading configuration");

    let config = Config::load(&config_path)
        .with_context(|| format!("failed to load config from {}", config_path.display()))?;

    info!(
        identity_url = %config.identity.url,
        api_url = %config.backend.api_url,
        timeout_secs = config.backend.timeout_secs,
        smoke_test = config.backend.smoke_test,
        "configuration loaded"
    );

    let http = reqwest::Client::builder()
        .timeout(config.backend.timeout())
        .build()
        .context("failed to build HTTP client")?;

    let identity = SupabaseProvider::load(http.clone(), config.supabase()?).await;
    let exchanger = HttpTokenExchanger::new(http.clone(), config.backend.api_url.clone())
        .with_attempts(config.backend.exchange_attempts);
    let cache = Arc::new(TokenCache::load(config.storage.token_path.clone()).await);

    let session = AuthSession::start(
        Arc::new(identity),
        Arc::new(exchanger),
        cache.clone(),
        config.session(),
    )
    .await;
    let api = ApiClient::new(http, config.backend.api_url.clone(), cache, session.clone());

    let outcome = run(cli.command, &session, &api).await;
    session.shutdown().await;
    outcome
}

async fn run(command: Command, session: &AuthSession, api: &ApiClient) -> Result<()> {
    match command {
        Command::Status => {
            let state = session.settled().await;
            print_json(&status_json(&state))
        }
        Command::SignIn { email, password } => {
            let credentials = Credentials::new(email, resolve_password(password)?);
            session.sign_in(&credentials).await?;
            print_json(&status_json(&session.settled().await))
        }
        Command::SignUp {
            email,
            password,
            meta,
        } => {
            let credentials = Credentials::new(email, resolve_password(password)?);
            let metadata = meta
                .into_iter()
                .map(|(k, v)| (k, serde_json::Value::String(v)))
                .collect();
            let outcome = session.sign_up(&credentials, metadata).await?;
            if outcome.session.is_none() {
                println!("Account created. Confirm your email address, then sign in.");
                return Ok(());
            }
            print_json(&status_json(&session.settled().await))
        }
        Command::SignOut => {
            session.settled().await;
            session.sign_out().await;
            print_json(&status_json(&session.state()))
        }
        Command::Refresh => {
            session.settled().await;
            session
                .refresh_backend_token()
                .await
                .context("no backend token issued; sign in first or check the backend")?;
            print_json(&status_json(&session.settled().await))
        }
        Command::AuthTest => {
            session.settled().await;
            let body: serde_json::Value = api.get(AUTH_TEST_PATH, &RequestOptions::default()).await?;
            print_json(&body)
        }
        Command::Api {
            method,
            endpoint,
            data,
            params,
            public,
        } => {
            session.settled().await;
            let body = data
                .map(|raw| serde_json::from_str::<serde_json::Value>(&raw))
                .transpose()
                .context("--data must be valid JSON")?;
            let mut options = if public {
                RequestOptions::public()
            } else {
                RequestOptions::default()
            };
            for (key, value) in params {
                options = options.param(key, value);
            }
            let response: serde_json::Value = match method {
                HttpMethod::Get => api.get(&endpoint, &options).await?,
                HttpMethod::Post => api.post(&endpoint, body.as_ref(), &options).await?,
                HttpMethod::Put => api.put(&endpoint, body.as_ref(), &options).await?,
                HttpMethod::Delete => api.delete(&endpoint, &options).await?,
            };
            print_json(&response)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use backend_auth::BackendToken;
    use common::Secret;
    use identity::{Identity, PrimarySession};

    fn signed_in_state() -> AuthState {
        AuthState {
            user: Some(Identity {
                id: "u1".into(),
                email: Some("u1@example.com".into()),
                metadata: serde_json::Map::new(),
            }),
            session: Some(PrimarySession {
                access_credential: Secret::new("sb-secret".into()),
                refresh_credential: None,
                expires_at: Some(1_700_000_000),
                user: Identity {
                    id: "u1".into(),
                    email: None,
                    metadata: serde_json::Map::new(),
                },
            }),
            is_loading: false,
            backend_authenticated: true,
            backend_token: Some(BackendToken::new("T-secret")),
        }
    }

    #[test]
    fn status_never_prints_tokens() {
        let json = status_json(&signed_in_state());
        let rendered = json.to_string();
        assert!(!rendered.contains("T-secret"), "got: {rendered}");
        assert!(!rendered.contains("sb-secret"), "got: {rendered}");
        assert_eq!(json["phase"], "fully_authenticated");
        assert_eq!(json["backend_token"], "[REDACTED]");
        assert_eq!(json["user"]["id"], "u1");
        assert_eq!(json["session_expires_at"], 1_700_000_000);
    }

    #[test]
    fn status_of_signed_out_state() {
        let json = status_json(&AuthState::default());
        assert_eq!(json["phase"], "unauthenticated");
        assert!(json["user"].is_null());
        assert!(json["backend_token"].is_null());
    }
}
