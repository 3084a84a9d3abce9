//! Configuration types and loading
//!
//! Config precedence: CLI args > env vars > config file > defaults.
//! The Supabase anon key is loaded from SUPABASE_ANON_KEY or anon_key_file,
//! never stored in the TOML directly.

use std::path::{Path, PathBuf};
use std::time::Duration;

use auth_session::SessionConfig;
use backend_auth::DEFAULT_API_URL;
use backend_auth::exchanger::DEFAULT_EXCHANGE_ATTEMPTS;
use common::Secret;
use identity::SupabaseConfig;
use serde::Deserialize;

/// Root configuration
#[derive(Debug, Deserialize)]
pub struct Config {
    pub identity: IdentityConfig,
    #[serde(default)]
    pub backend: BackendConfig,
    pub storage: StorageConfig,
}

/// Supabase project settings
#[derive(Debug, Deserialize)]
pub struct IdentityConfig {
    pub url: String,
    #[serde(skip)]
    pub anon_key: Option<Secret<String>>,
    /// Path to a file containing the anon key (alternative to SUPABASE_ANON_KEY)
    #[serde(default)]
    pub anon_key_file: Option<PathBuf>,
    pub session_path: PathBuf,
}

/// Translation backend settings
#[derive(Debug, Deserialize)]
pub struct BackendConfig {
    #[serde(default = "default_api_url")]
    pub api_url: String,
    /// Bound on each exchange, validation and auth-test call
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
    #[serde(default = "default_exchange_attempts")]
    pub exchange_attempts: u32,
    #[serde(default = "default_smoke_test")]
    pub smoke_test: bool,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            api_url: default_api_url(),
            timeout_secs: default_timeout(),
            exchange_attempts: default_exchange_attempts(),
            smoke_test: default_smoke_test(),
        }
    }
}

impl BackendConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Local state files
#[derive(Debug, Deserialize)]
pub struct StorageConfig {
    pub token_path: PathBuf,
}

fn default_api_url() -> String {
    DEFAULT_API_URL.to_string()
}

fn default_timeout() -> u64 {
    10
}

fn default_exchange_attempts() -> u32 {
    DEFAULT_EXCHANGE_ATTEMPTS
}

fn default_smoke_test() -> bool {
    true
}

fn require_http_url(field: &str, value: &str) -> common::Result<()> {
    if value.starts_with("http://") || value.starts_with("https://") {
        Ok(())
    } else {
        Err(common::Error::Config(format!(
            "{field} must start with http:// or https://, got: {value}"
        )))
    }
}

/// Expand a leading `~/` against HOME.
fn expand_home(path: &Path) -> PathBuf {
    match (path.strip_prefix("~"), std::env::var_os("HOME")) {
        (Ok(rest), Some(home)) => PathBuf::from(home).join(rest),
        _ => path.to_path_buf(),
    }
}

impl Config {
    /// Load configuration from a TOML file, then overlay environment variables.
    ///
    /// Anon key resolution order:
    /// 1. SUPABASE_ANON_KEY env var
    /// 2. anon_key_file path from config
    pub fn load(path: &Path) -> common::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let mut config: Config = toml::from_str(&contents)?;

        if let Ok(url) = std::env::var("BACKEND_API_URL") {
            config.backend.api_url = url;
        }

        require_http_url("identity.url", &config.identity.url)?;
        require_http_url("backend.api_url", &config.backend.api_url)?;

        if config.backend.timeout_secs == 0 {
            return Err(common::Error::Config(
                "timeout_secs must be greater than 0".into(),
            ));
        }

        if config.backend.exchange_attempts == 0 {
            return Err(common::Error::Config(
                "exchange_attempts must be at least 1".into(),
            ));
        }

        config.identity.session_path = expand_home(&config.identity.session_path);
        config.storage.token_path = expand_home(&config.storage.token_path);

        // Env var takes precedence over file
        if let Ok(key) = std::env::var("SUPABASE_ANON_KEY") {
            config.identity.anon_key = Some(Secret::new(key));
        } else if let Some(ref key_file) = config.identity.anon_key_file {
            let key = std::fs::read_to_string(key_file).map_err(|e| {
                common::Error::Config(format!(
                    "failed to read anon_key_file {}: {e}",
                    key_file.display()
                ))
            })?;
            let key = key.trim().to_owned();
            if !key.is_empty() {
                config.identity.anon_key = Some(Secret::new(key));
            }
        }

        Ok(config)
    }

    /// Resolve config file path from CLI arg or CONFIG_PATH env var.
    pub fn resolve_path(cli_path: Option<&Path>) -> PathBuf {
        if let Some(p) = cli_path {
            return p.to_path_buf();
        }
        if let Ok(p) = std::env::var("CONFIG_PATH") {
            return PathBuf::from(p);
        }
        PathBuf::from("bridge.toml")
    }

    /// Identity provider settings. Fails when no anon key was resolved.
    pub fn supabase(&self) -> common::Result<SupabaseConfig> {
        let anon_key = self.identity.anon_key.clone().ok_or_else(|| {
            common::Error::Config(
                "no Supabase anon key: set SUPABASE_ANON_KEY or identity.anon_key_file".into(),
            )
        })?;
        Ok(SupabaseConfig {
            url: self.identity.url.clone(),
            anon_key,
            session_path: self.identity.session_path.clone(),
        })
    }

    pub fn session(&self) -> SessionConfig {
        SessionConfig {
            call_timeout: self.backend.timeout(),
            smoke_test: self.backend.smoke_test,
        }
    }
}
