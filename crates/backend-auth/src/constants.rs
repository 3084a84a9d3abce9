//! Backend auth endpoint paths and storage names
//!
//! Paths are relative to the configured API base URL (which already carries
//! the `/api` prefix).

/// API base used when nothing is configured
pub const DEFAULT_API_URL: &str = "http://localhost:5000/api";

/// Exchange a primary session credential for a backend token
pub const TOKEN_PATH: &str = "/auth/token";

/// Check whether a backend token is still accepted
pub const VALIDATE_PATH: &str = "/auth/validate";

/// Bearer-authenticated probe used right after a fresh exchange
pub const AUTH_TEST_PATH: &str = "/users/auth-test";

/// Key under which the backend token is persisted
pub const STORAGE_KEY: &str = "backend_token";
