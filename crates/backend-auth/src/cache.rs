//! Persisted backend token
//!
//! Holds at most one backend token, mirrored to a small JSON file
//! (`{"backend_token": "..."}`) so it survives restarts within the same
//! profile directory. Only the session orchestrator writes; any number of
//! API clients read the last committed value.
//!
//! A token file that cannot be read or parsed is treated as a cache miss,
//! which forces a fresh exchange. Clearing on sign-out is mandatory so the
//! next user of a shared machine never inherits the token.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::error::Result;
use crate::token::BackendToken;

#[derive(Debug, Serialize, Deserialize)]
struct CacheFile {
    backend_token: String,
}

/// File-backed single-slot token cache.
///
/// The Mutex serializes writers with each other and with readers, so a
/// reader never observes a value that was replaced on disk but not in memory.
pub struct TokenCache {
    path: PathBuf,
    state: Mutex<Option<BackendToken>>,
}

impl TokenCache {
    /// Load the cached token from `path`, if one is stored there.
    pub async fn load(path: PathBuf) -> Self {
        let token = match common::read_json::<CacheFile>(&path).await {
            Ok(Some(file)) if !file.backend_token.is_empty() => {
                info!(path = %path.display(), "loaded cached backend token");
                Some(BackendToken::new(file.backend_token))
            }
            Ok(_) => {
                debug!(path = %path.display(), "no cached backend token");
                None
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "unreadable token cache, treating as empty");
                None
            }
        };

        Self {
            path,
            state: Mutex::new(token),
        }
    }

    /// The last committed token.
    pub async fn get(&self) -> Option<BackendToken> {
        self.state.lock().await.clone()
    }

    /// Store `token`, replacing any previous one.
    ///
    /// The in-memory value is committed even when persisting fails, so
    /// readers in this process keep working; the error is returned for
    /// logging.
    pub async fn set(&self, token: BackendToken) -> Result<()> {
        let mut state = self.state.lock().await;
        let file = CacheFile {
            backend_token: token.expose().to_owned(),
        };
        *state = Some(token);
        common::write_json_atomic(&self.path, &file).await?;
        debug!("cached backend token updated");
        Ok(())
    }

    /// Drop the token from memory and disk.
    pub async fn clear(&self) -> Result<()> {
        let mut state = self.state.lock().await;
        *state = None;
        common::remove_file(&self.path).await?;
        debug!("cached backend token cleared");
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::STORAGE_KEY;

    #[tokio::test]
    async fn empty_when_no_file() {
        let dir = tempfile::tempdir().unwrap();
        let cache = TokenCache::load(dir.path().join("token.json")).await;
        assert!(cache.get().await.is_none());
    }

    #[tokio::test]
    async fn survives_reload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("token.json");

        let cache = TokenCache::load(path.clone()).await;
        cache.set("T1".into()).await.unwrap();
        assert_eq!(cache.get().await, Some("T1".into()));

        let reloaded = TokenCache::load(path).await;
        assert_eq!(reloaded.get().await, Some("T1".into()));
    }

    #[tokio::test]
    async fn file_uses_storage_key() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("token.json");
        let cache = TokenCache::load(path.clone()).await;
        cache.set("T1".into()).await.unwrap();

        let raw: serde_json::Value =
            serde_json::from_str(&tokio::fs::read_to_string(&path).await.unwrap()).unwrap();
        assert_eq!(raw[STORAGE_KEY], "T1");
    }

    #[tokio::test]
    async fn set_replaces_previous_token() {
        let dir = tempfile::tempdir().unwrap();
        let cache = TokenCache::load(dir.path().join("token.json")).await;
        cache.set("T1".into()).await.unwrap();
        cache.set("T2".into()).await.unwrap();
        assert_eq!(cache.get().await, Some("T2".into()));
    }

    #[tokio::test]
    async fn clear_removes_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("token.json");
        let cache = TokenCache::load(path.clone()).await;
        cache.set("T1".into()).await.unwrap();

        cache.clear().await.unwrap();
        assert!(cache.get().await.is_none());
        assert!(!path.exists());

        // Clearing twice is fine
        cache.clear().await.unwrap();
    }

    #[tokio::test]
    async fn corrupt_file_is_a_cache_miss() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("token.json");
        tokio::fs::write(&path, "garbage").await.unwrap();

        let cache = TokenCache::load(path.clone()).await;
        assert!(cache.get().await.is_none());

        // The bad file is replaced on the next write
        cache.set("T3".into()).await.unwrap();
        assert_eq!(TokenCache::load(path).await.get().await, Some("T3".into()));
    }

    #[tokio::test]
    async fn concurrent_sets_settle_on_one_value() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("token.json");
        let cache = std::sync::Arc::new(TokenCache::load(path.clone()).await);

        let mut handles = vec![];
        for i in 0..10 {
            let cache = cache.clone();
            handles.push(tokio::spawn(async move {
                cache.set(BackendToken::new(format!("T{i}"))).await.unwrap();
            }));
        }
        for h in handles {
            h.await.unwrap();
        }

        let in_memory = cache.get().await.unwrap();
        let on_disk = TokenCache::load(path).await.get().await.unwrap();
        assert_eq!(in_memory, on_disk);
    }
}
