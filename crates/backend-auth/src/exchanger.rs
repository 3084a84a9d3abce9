//! Token exchanger seam
//!
//! `TokenExchanger` is what the session orchestrator talks to. The HTTP
//! implementation wraps the calls in `token.rs` and adds the retry policy for
//! exchanges: transport failures are retried with exponential backoff up to
//! `attempts` total tries, while a backend rejection ends the sequence at once.
//! Validation never retries and never errors; any failure reads as invalid.

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use tracing::debug;

use crate::error::Result;
use crate::token::{self, BackendToken, Validation};

/// Default total exchange attempts (first try + one retry).
pub const DEFAULT_EXCHANGE_ATTEMPTS: u32 = 2;

/// Backoff before the first exchange retry; doubles per retry.
pub const DEFAULT_RETRY_BACKOFF: Duration = Duration::from_millis(250);

/// Boundary to the backend's token endpoints.
///
/// Uses `Pin<Box<dyn Future>>` return types for dyn-compatibility
/// (`Arc<dyn TokenExchanger>`).
pub trait TokenExchanger: Send + Sync {
    /// Trade a primary access credential for a new backend token.
    fn exchange<'a>(
        &'a self,
        access_credential: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<BackendToken>> + Send + 'a>>;

    /// Check a cached token. Transport failures read as invalid.
    fn validate<'a>(
        &'a self,
        token: &'a BackendToken,
    ) -> Pin<Box<dyn Future<Output = Validation> + Send + 'a>>;

    /// Confirm a freshly issued token authorizes backend calls.
    fn smoke_test<'a>(
        &'a self,
        token: &'a BackendToken,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + 'a>>;
}

/// `TokenExchanger` backed by the backend's REST endpoints.
#[derive(Debug, Clone)]
pub struct HttpTokenExchanger {
    client: reqwest::Client,
    api_url: String,
    attempts: u32,
    backoff: Duration,
}

impl HttpTokenExchanger {
    pub fn new(client: reqwest::Client, api_url: impl Into<String>) -> Self {
        Self {
            client,
            api_url: api_url.into(),
            attempts: DEFAULT_EXCHANGE_ATTEMPTS,
            backoff: DEFAULT_RETRY_BACKOFF,
        }
    }

    /// Total exchange attempts on transport failure (clamped to at least 1).
    pub fn with_attempts(mut self, attempts: u32) -> Self {
        self.attempts = attempts.max(1);
        self
    }

    pub fn with_backoff(mut self, backoff: Duration) -> Self {
        self.backoff = backoff;
        self
    }
}

impl TokenExchanger for HttpTokenExchanger {
    fn exchange<'a>(
        &'a self,
        access_credential: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<BackendToken>> + Send + 'a>> {
        Box::pin(async move {
            let mut attempt = 0;
            loop {
                attempt += 1;
                match token::exchange_token(&self.client, &self.api_url, access_credential).await {
                    Err(e) if e.is_transient() && attempt < self.attempts => {
                        let delay = self.backoff * 2u32.saturating_pow(attempt - 1);
                        debug!(
                            attempt,
                            max_attempts = self.attempts,
                            delay_ms = delay.as_millis() as u64,
                            error = %e,
                            "token exchange transport failure, retrying"
                        );
                        tokio::time::sleep(delay).await;
                    }
                    other => return other,
                }
            }
        })
    }

    fn validate<'a>(
        &'a self,
        token: &'a BackendToken,
    ) -> Pin<Box<dyn Future<Output = Validation> + Send + 'a>> {
        Box::pin(async move {
            match token::validate_token(&self.client, &self.api_url, token).await {
                Ok(user) => Validation {
                    valid: true,
                    user: Some(user),
                },
                Err(e) => {
                    debug!(error = %e, "cached backend token did not validate");
                    Validation::invalid()
                }
            }
        })
    }

    fn smoke_test<'a>(
        &'a self,
        token: &'a BackendToken,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + 'a>> {
        Box::pin(async move {
            token::auth_test(&self.client, &self.api_url, token).await?;
            Ok(())
        })
    }
}
