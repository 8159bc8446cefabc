//! Session credential storage.
//!
//! The live-session handshake authenticates with a bearer credential that was
//! obtained elsewhere and persisted. This module only stores and reads it.

use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{PoisonError, RwLock};

use secrecy::{ExposeSecret, SecretString};
use thiserror::Error;

/// Key under which the credential is persisted.
pub const TOKEN_KEY: &str = "sessionId";

/// Errors produced while reading or persisting a credential.
#[derive(Debug, Error)]
pub enum TokenStoreError {
    /// Reading or writing the backing file failed.
    #[error("token store io error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// The backing file is not a JSON string map.
    #[error("token store at {path} is not valid json: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// Persists and retrieves the single opaque session credential.
pub trait TokenStore: Send + Sync {
    /// Returns the stored credential, or `None` when nothing was stored.
    ///
    /// A store that exists but cannot be read is an error, not an absent
    /// credential.
    fn token(&self) -> Result<Option<SecretString>, TokenStoreError>;

    /// Replaces the stored credential.
    fn set_token(&self, token: SecretString) -> Result<(), TokenStoreError>;
}

/// Process-local store, mostly useful for tests and short-lived tools.
#[derive(Debug, Default)]
pub struct MemoryTokenStore {
    token: RwLock<Option<SecretString>>,
}

impl MemoryTokenStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a store that already holds `token`.
    pub fn with_token(token: SecretString) -> Self {
        Self {
            token: RwLock::new(Some(token)),
        }
    }
}

impl TokenStore for MemoryTokenStore {
    fn token(&self) -> Result<Option<SecretString>, TokenStoreError> {
        Ok(self
            .token
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .map(|token| SecretString::new(token.expose_secret().clone())))
    }

    fn set_token(&self, token: SecretString) -> Result<(), TokenStoreError> {
        *self.token.write().unwrap_or_else(PoisonError::into_inner) = Some(token);
        Ok(())
    }
}

/// Key-value JSON file that outlives the process.
///
/// The file holds a flat string map; the credential lives under [`TOKEN_KEY`]
/// and other keys written by other tools are preserved on update.
#[derive(Debug, Clone)]
pub struct FileTokenStore {
    path: PathBuf,
}

impl FileTokenStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn load(&self) -> Result<BTreeMap<String, String>, TokenStoreError> {
        let text = match fs::read_to_string(&self.path) {
            Ok(text) => text,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(BTreeMap::new()),
            Err(source) => {
                return Err(TokenStoreError::Io {
                    path: self.path.clone(),
                    source,
                })
            }
        };
        if text.trim().is_empty() {
            return Ok(BTreeMap::new());
        }
        serde_json::from_str(&text).map_err(|source| TokenStoreError::Json {
            path: self.path.clone(),
            source,
        })
    }

    fn store(&self, entries: &BTreeMap<String, String>) -> Result<(), TokenStoreError> {
        let io_err = |source| TokenStoreError::Io {
            path: self.path.clone(),
            source,
        };
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(io_err)?;
        }
        let text = serde_json::to_string_pretty(entries).map_err(|source| {
            TokenStoreError::Json {
                path: self.path.clone(),
                source,
            }
        })?;
        let tmp = self.path.with_extension("tmp");
        fs::write(&tmp, text).map_err(io_err)?;
        fs::rename(&tmp, &self.path).map_err(io_err)
    }
}

impl TokenStore for FileTokenStore {
    fn token(&self) -> Result<Option<SecretString>, TokenStoreError> {
        let mut entries = self.load().map_err(|err| {
            tracing::warn!(event = "token_store_read_failed", error = %err);
            err
        })?;
        Ok(entries.remove(TOKEN_KEY).map(SecretString::new))
    }

    fn set_token(&self, token: SecretString) -> Result<(), TokenStoreError> {
        let mut entries = self.load()?;
        entries.insert(TOKEN_KEY.to_string(), token.expose_secret().clone());
        self.store(&entries)
    }
}

#[cfg(test)]
mod tests {
    use secrecy::{ExposeSecret, SecretString};

    use super::{FileTokenStore, MemoryTokenStore, TokenStore, TokenStoreError, TOKEN_KEY};

    #[test]
    fn memory_store_starts_empty() {
        let store = MemoryTokenStore::new();
        assert!(store.token().expect("read").is_none());
        store
            .set_token(SecretString::new("abc".to_string()))
            .expect("set token");
        let token = store.token().expect("read").expect("token");
        assert_eq!(token.expose_secret(), "abc");
    }

    #[test]
    fn file_store_missing_file_reads_as_absent() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = FileTokenStore::new(dir.path().join("settings.json"));
        assert!(store.token().expect("read").is_none());
    }

    #[test]
    fn file_store_survives_a_new_instance() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("nested").join("settings.json");
        FileTokenStore::new(&path)
            .set_token(SecretString::new("persisted".to_string()))
            .expect("set token");

        let reopened = FileTokenStore::new(&path);
        let token = reopened.token().expect("read").expect("token");
        assert_eq!(token.expose_secret(), "persisted");
    }

    #[test]
    fn file_store_preserves_foreign_keys() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("settings.json");
        std::fs::write(&path, r#"{"theme":"dark"}"#).expect("seed file");

        let store = FileTokenStore::new(&path);
        store
            .set_token(SecretString::new("t1".to_string()))
            .expect("set token");

        let raw: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&path).expect("read")).expect("json");
        assert_eq!(raw["theme"], "dark");
        assert_eq!(raw[TOKEN_KEY], "t1");
    }

    #[test]
    fn file_store_reports_corrupt_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("settings.json");
        std::fs::write(&path, "not json").expect("seed file");

        let store = FileTokenStore::new(&path);
        assert!(matches!(store.token(), Err(TokenStoreError::Json { .. })));
        assert!(store.set_token(SecretString::new("x".to_string())).is_err());
    }

    #[test]
    fn file_store_reports_unreadable_path() {
        let dir = tempfile::tempdir().expect("tempdir");
        // a directory where the file should be cannot be read as text
        let store = FileTokenStore::new(dir.path());
        assert!(matches!(store.token(), Err(TokenStoreError::Io { .. })));
    }

    #[test]
    fn empty_file_reads_as_absent() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("settings.json");
        std::fs::write(&path, "  \n").expect("seed file");
        assert!(FileTokenStore::new(&path).token().expect("read").is_none());
    }
}
