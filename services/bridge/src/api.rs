//! Authenticated backend API client
//!
//! Requests go to `{api_url}{endpoint}` with JSON bodies. Authenticated
//! requests carry `Authorization: Bearer <token>` using whatever token the
//! cache currently holds; the client never exchanges tokens on its own. When
//! the backend answers 401 it asks the session for one refresh and retries
//! once with the new token.

use std::sync::Arc;

use auth_session::AuthSession;
use backend_auth::{BackendToken, TokenCache};
use reqwest::{Method, StatusCode, Url};
use serde::de::DeserializeOwned;
use tracing::{debug, warn};

use crate::error::{ApiError, Result};

/// Per-request options.
#[derive(Debug, Clone)]
pub struct RequestOptions {
    /// Attach the cached backend token (default `true`)
    pub authenticated: bool,
    pub params: Vec<(String, String)>,
}

impl Default for RequestOptions {
    fn default() -> Self {
        Self {
            authenticated: true,
            params: Vec::new(),
        }
    }
}

impl RequestOptions {
    /// Send without a bearer token.
    pub fn public() -> Self {
        Self {
            authenticated: false,
            ..Self::default()
        }
    }

    pub fn param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.params.push((key.into(), value.into()));
        self
    }
}

/// Build the full URL for `endpoint` under `base`, appending query params.
pub fn build_url(base: &str, endpoint: &str, params: &[(String, String)]) -> Result<Url> {
    let endpoint = endpoint.trim_start_matches('/');
    let raw = format!("{}/{endpoint}", base.trim_end_matches('/'));
    let parsed = if params.is_empty() {
        Url::parse(&raw)
    } else {
        Url::parse_with_params(&raw, params)
    };
    parsed.map_err(|e| ApiError::Url(format!("{raw}: {e}")))
}

/// Extract the backend's error text, preferring `error` over `message`.
fn error_message(status: StatusCode, body: &str) -> String {
    serde_json::from_str::<serde_json::Value>(body)
        .ok()
        .and_then(|v| {
            v.get("error")
                .or_else(|| v.get("message"))
                .and_then(|m| m.as_str())
                .map(str::to_owned)
        })
        .unwrap_or_else(|| format!("HTTP error {}", status.as_u16()))
}

/// JSON client for the translation backend.
pub struct ApiClient {
    http: reqwest::Client,
    base_url: String,
    cache: Arc<TokenCache>,
    session: Arc<AuthSession>,
}

impl ApiClient {
    pub fn new(
        http: reqwest::Client,
        base_url: impl Into<String>,
        cache: Arc<TokenCache>,
        session: Arc<AuthSession>,
    ) -> Self {
        Self {
            http,
            base_url: base_url.into(),
            cache,
            session,
        }
    }

    pub async fn get<T: DeserializeOwned>(
        &self,
        endpoint: &str,
        options: &RequestOptions,
    ) -> Result<T> {
        self.request(Method::GET, endpoint, None, options).await
    }

    pub async fn post<T: DeserializeOwned>(
        &self,
        endpoint: &str,
        body: Option<&serde_json::Value>,
        options: &RequestOptions,
    ) -> Result<T> {
        self.request(Method::POST, endpoint, body, options).await
    }

    pub async fn put<T: DeserializeOwned>(
        &self,
        endpoint: &str,
        body: Option<&serde_json::Value>,
        options: &RequestOptions,
    ) -> Result<T> {
        self.request(Method::PUT, endpoint, body, options).await
    }

    pub async fn delete<T: DeserializeOwned>(
        &self,
        endpoint: &str,
        options: &RequestOptions,
    ) -> Result<T> {
        self.request(Method::DELETE, endpoint, None, options).await
    }

    /// Send a request, refreshing the backend token once on 401.
    ///
    /// A 204 response deserializes from JSON `null`, so callers expecting no
    /// content should ask for `()`, `Option<_>` or `serde_json::Value`.
    pub async fn request<T: DeserializeOwned>(
        &self,
        method: Method,
        endpoint: &str,
        body: Option<&serde_json::Value>,
        options: &RequestOptions,
    ) -> Result<T> {
        let url = build_url(&self.base_url, endpoint, &options.params)?;

        if !options.authenticated {
            return self.send(method, url, body, None).await;
        }

        let token = self.cache.get().await.ok_or(ApiError::MissingToken)?;
        match self
            .send(method.clone(), url.clone(), body, Some(&token))
            .await
        {
            Err(e) if e.is_unauthorized() => {
                debug!(%url, "backend rejected token, refreshing");
                let Some(fresh) = self.session.refresh_backend_token().await else {
                    warn!(%url, "token refresh failed, giving up");
                    return Err(e);
                };
                self.send(method, url, body, Some(&fresh)).await
            }
            other => other,
        }
    }

    async fn send<T: DeserializeOwned>(
        &self,
        method: Method,
        url: Url,
        body: Option<&serde_json::Value>,
        token: Option<&BackendToken>,
    ) -> Result<T> {
        let mut request = self.http.request(method.clone(), url.clone());
        if let Some(token) = token {
            request = request.bearer_auth(token.expose());
        }
        if let Some(body) = body {
            request = request.json(body);
        }

        let response = request
            .send()
            .await
            .map_err(|e| ApiError::Http(format!("{method} {url}: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(ApiError::Status {
                status: status.as_u16(),
                message: error_message(status, &text),
            });
        }

        if status == StatusCode::NO_CONTENT {
            return serde_json::from_value(serde_json::Value::Null)
                .map_err(|e| ApiError::Decode(e.to_string()));
        }

        response
            .json::<T>()
            .await
            .map_err(|e| ApiError::Decode(format!("{method} {url}: {e}")))
    }
}
