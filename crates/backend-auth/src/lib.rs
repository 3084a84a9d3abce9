//! Backend token exchange and caching
//!
//! Turns a primary identity-provider session into an application-scoped
//! backend token and keeps that token on disk between runs. This crate is
//! the boundary to the backend's auth endpoints; it knows nothing about
//! session lifecycles, which live in `auth-session`.
//!
//! Token flow:
//! 1. `token::exchange_token()` trades the primary access credential for a token
//! 2. The token is stored via `cache::TokenCache::set()`
//! 3. On the next start, `token::validate_token()` checks the cached token
//! 4. `token::auth_test()` confirms a fresh token actually authorizes calls
//! 5. Sign-out removes it via `cache::TokenCache::clear()`

pub mod cache;
pub mod constants;
pub mod error;
pub mod exchanger;
pub mod token;

pub use cache::TokenCache;
pub use constants::*;
pub use error::{Error, Result};
pub use exchanger::{HttpTokenExchanger, TokenExchanger};
pub use token::{BackendToken, Validation, auth_test, exchange_token, validate_token};
