//! Backend token endpoint calls
//!
//! Three interactions with the backend's auth routes:
//! 1. Exchange (`POST /auth/token`): primary credential in, backend token out
//! 2. Validation (`POST /auth/validate`): 2xx means the token is still good
//! 3. Auth test (`GET /users/auth-test`): bearer probe after a fresh exchange
//!
//! Backend tokens are opaque here. Expiry is enforced server-side and is only
//! ever learned by asking the validation endpoint.

use std::fmt;

use common::Secret;
use serde::{Deserialize, Serialize};

use crate::constants::{AUTH_TEST_PATH, TOKEN_PATH, VALIDATE_PATH};
use crate::error::{Error, Result};

/// Application-scoped bearer token issued by the backend.
#[derive(Clone, PartialEq, Eq)]
pub struct BackendToken(Secret<String>);

impl BackendToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(Secret::new(token.into()))
    }

    /// The raw token, for building an Authorization header.
    pub fn expose(&self) -> &str {
        self.0.expose()
    }
}

impl fmt::Debug for BackendToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "BackendToken([REDACTED])")
    }
}

impl From<&str> for BackendToken {
    fn from(token: &str) -> Self {
        Self::new(token)
    }
}

/// Outcome of validating a cached token.
#[derive(Debug, Clone, PartialEq)]
pub struct Validation {
    pub valid: bool,
    /// User record the backend associates with the token, when valid
    pub user: Option<serde_json::Value>,
}

impl Validation {
    pub fn invalid() -> Self {
        Self {
            valid: false,
            user: None,
        }
    }
}

/// Request body for the exchange endpoint. The field name is fixed by the
/// backend even though any primary-session credential is accepted.
#[derive(Debug, Serialize)]
struct ExchangeRequest<'a> {
    supabase_token: &'a str,
}

#[derive(Debug, Deserialize)]
struct ExchangeResponse {
    #[serde(default)]
    token: Option<String>,
}

#[derive(Debug, Serialize)]
struct ValidateRequest<'a> {
    token: &'a str,
}

#[derive(Debug, Deserialize)]
struct ValidateResponse {
    #[serde(default)]
    user: Option<serde_json::Value>,
}

/// Join an API base URL and an endpoint path.
pub(crate) fn endpoint(api_url: &str, path: &str) -> String {
    format!("{}{path}", api_url.trim_end_matches('/'))
}

/// Pull a human-readable message out of a backend error body.
fn error_message(body: &str) -> String {
    serde_json::from_str::<serde_json::Value>(body)
        .ok()
        .and_then(|v| {
            v.get("error")
                .or_else(|| v.get("message"))
                .and_then(|m| m.as_str())
                .map(str::to_owned)
        })
        .unwrap_or_else(|| body.to_owned())
}

/// Exchange a primary-session access credential for a backend token.
///
/// Non-success responses and responses without a token are both
/// `TokenExchange` errors; only transport failures are `Http`.
pub async fn exchange_token(
    client: &reqwest::Client,
    api_url: &str,
    access_credential: &str,
) -> Result<BackendToken> {
    let response = client
        .post(endpoint(api_url, TOKEN_PATH))
        .json(&ExchangeRequest {
            supabase_token: access_credential,
        })
        .send()
        .await
        .map_err(|e| Error::Http(format!("token exchange request failed: {e}")))?;

    let status = response.status();
    if !status.is_success() {
        let body = response
            .text()
            .await
            .unwrap_or_else(|_| String::from("<no body>"));
        return Err(Error::TokenExchange(format!(
            "token endpoint returned {status}: {}",
            error_message(&body)
        )));
    }

    let parsed = response
        .json::<ExchangeResponse>()
        .await
        .map_err(|e| Error::TokenExchange(format!("invalid token response: {e}")))?;

    match parsed.token {
        Some(token) if !token.is_empty() => Ok(BackendToken::new(token)),
        _ => Err(Error::TokenExchange(
            "token endpoint returned no token".into(),
        )),
    }
}

/// Ask the backend whether `token` is still valid.
///
/// Returns the associated user record (or `Null` when the backend sends
/// none). Any non-success status is `Invalid`.
pub async fn validate_token(
    client: &reqwest::Client,
    api_url: &str,
    token: &BackendToken,
) -> Result<serde_json::Value> {
    let response = client
        .post(endpoint(api_url, VALIDATE_PATH))
        .json(&ValidateRequest {
            token: token.expose(),
        })
        .send()
        .await
        .map_err(|e| Error::Http(format!("token validation request failed: {e}")))?;

    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(Error::Invalid(format!(
            "validation returned {status}: {}",
            error_message(&body)
        )));
    }

    // A 2xx with an unreadable body still means "valid"
    let user = response
        .json::<ValidateResponse>()
        .await
        .ok()
        .and_then(|r| r.user)
        .unwrap_or(serde_json::Value::Null);
    Ok(user)
}

/// Call the bearer-authenticated auth test endpoint with `token`.
pub async fn auth_test(
    client: &reqwest::Client,
    api_url: &str,
    token: &BackendToken,
) -> Result<serde_json::Value> {
    let response = client
        .get(endpoint(api_url, AUTH_TEST_PATH))
        .bearer_auth(token.expose())
        .send()
        .await
        .map_err(|e| Error::Http(format!("auth test request failed: {e}")))?;

    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(Error::Invalid(format!(
            "auth test returned {status}: {}",
            error_message(&body)
        )));
    }

    response
        .json::<serde_json::Value>()
        .await
        .map_err(|e| Error::Invalid(format!("invalid auth test response: {e}")))
}
