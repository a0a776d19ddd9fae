//! Token storage.
//!
//! [`TokenStore`] is the async boundary the session uses to load the token
//! before each handshake, save it after authentication and remove it on
//! deauthentication. Two implementations ship here:
//!
//! - [`MemoryTokenStore`]: a map behind a lock, lost on exit
//! - [`FileTokenStore`]: a JSON object `{name: token}` on disk, written with
//!   0o600 permissions

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::errors::AuthError;

/// Async persistence for the signed auth token.
///
/// Implementations must report failures through the returned `Result` and
/// never panic.
#[async_trait]
pub trait TokenStore: Send + Sync {
    /// Load the token stored under `name`.
    async fn load(&self, name: &str) -> Result<Option<String>, AuthError>;

    /// Store `token` under `name`, returning the stored token.
    async fn save(&self, name: &str, token: &str) -> Result<String, AuthError>;

    /// Remove the token stored under `name`, returning the previous value.
    async fn remove(&self, name: &str) -> Result<Option<String>, AuthError>;
}

// ─────────────────────────────────────────────────────────────────────────────
// In-memory store
// ─────────────────────────────────────────────────────────────────────────────

/// Process-local token store.
#[derive(Clone, Debug, Default)]
pub struct MemoryTokenStore {
    tokens: Arc<Mutex<HashMap<String, String>>>,
}

impl MemoryTokenStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store pre-populated with one token.
    pub fn with_token(name: impl Into<String>, token: impl Into<String>) -> Self {
        let store = Self::default();
        let _ = store.tokens.lock().insert(name.into(), token.into());
        store
    }

    /// Synchronous read, for assertions.
    pub fn get(&self, name: &str) -> Option<String> {
        self.tokens.lock().get(name).cloned()
    }
}

#[async_trait]
impl TokenStore for MemoryTokenStore {
    async fn load(&self, name: &str) -> Result<Option<String>, AuthError> {
        Ok(self.get(name))
    }

    async fn save(&self, name: &str, token: &str) -> Result<String, AuthError> {
        let _ = self.tokens.lock().insert(name.to_owned(), token.to_owned());
        Ok(token.to_owned())
    }

    async fn remove(&self, name: &str) -> Result<Option<String>, AuthError> {
        Ok(self.tokens.lock().remove(name))
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// File store
// ─────────────────────────────────────────────────────────────────────────────

/// Default token file name.
const TOKEN_FILE_NAME: &str = "tokens.json";

/// Get the token file path under the given data directory.
pub fn token_file_path(data_dir: &Path) -> PathBuf {
    data_dir.join(TOKEN_FILE_NAME)
}

/// JSON-file token store.
///
/// Each mutation is a read-modify-write of the whole file on the blocking
/// pool, serialized by an internal lock.
#[derive(Clone, Debug)]
pub struct FileTokenStore {
    path: PathBuf,
    lock: Arc<Mutex<()>>,
}

impl FileTokenStore {
    /// Store backed by the file at `path`.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Arc::new(Mutex::new(())),
        }
    }

    /// Path of the backing file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn with_tokens<T, F>(&self, op: F) -> Result<T, AuthError>
    where
        T: Send + 'static,
        F: FnOnce(&Path, &mut HashMap<String, String>) -> Result<T, AuthError> + Send + 'static,
    {
        let path = self.path.clone();
        let lock = Arc::clone(&self.lock);
        tokio::task::spawn_blocking(move || {
            let _guard = lock.lock();
            let mut tokens = load_tokens(&path);
            op(&path, &mut tokens)
        })
        .await
        .map_err(|e| AuthError::Task(e.to_string()))?
    }
}

#[async_trait]
impl TokenStore for FileTokenStore {
    async fn load(&self, name: &str) -> Result<Option<String>, AuthError> {
        let name = name.to_owned();
        self.with_tokens(move |_, tokens| Ok(tokens.remove(&name)))
            .await
    }

    async fn save(&self, name: &str, token: &str) -> Result<String, AuthError> {
        let name = name.to_owned();
        let token = token.to_owned();
        self.with_tokens(move |path, tokens| {
            let _ = tokens.insert(name, token.clone());
            save_tokens(path, tokens)?;
            Ok(token)
        })
        .await
    }

    async fn remove(&self, name: &str) -> Result<Option<String>, AuthError> {
        let name = name.to_owned();
        self.with_tokens(move |path, tokens| {
            let previous = tokens.remove(&name);
            if previous.is_some() {
                save_tokens(path, tokens)?;
            }
            Ok(previous)
        })
        .await
    }
}

/// Load the token map from file (sync).
///
/// Returns an empty map if the file doesn't exist or is invalid.
fn load_tokens(path: &Path) -> HashMap<String, String> {
    let data = match std::fs::read_to_string(path) {
        Ok(d) => d,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return HashMap::new(),
        Err(e) => {
            tracing::warn!(path = %path.display(), "failed to read token file: {e}");
            return HashMap::new();
        }
    };

    match serde_json::from_str(&data) {
        Ok(tokens) => tokens,
        Err(e) => {
            tracing::warn!(path = %path.display(), "failed to parse token file: {e}");
            HashMap::new()
        }
    }
}

/// Save the token map to file (sync).
///
/// Creates parent directories if needed. Sets file permissions to 0o600.
fn save_tokens(path: &Path, tokens: &HashMap<String, String>) -> Result<(), AuthError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let json = serde_json::to_string_pretty(tokens)?;
    std::fs::write(path, &json)?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let perms = std::fs::Permissions::from_mode(0o600);
        let _ = std::fs::set_permissions(path, perms);
    }

    Ok(())
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn memory_round_trip() {
        let store = MemoryTokenStore::new();
        assert_eq!(store.load("t").await.unwrap(), None);
        assert_eq!(store.save("t", "abc").await.unwrap(), "abc");
        assert_eq!(store.load("t").await.unwrap().as_deref(), Some("abc"));
        assert_eq!(store.remove("t").await.unwrap().as_deref(), Some("abc"));
        assert_eq!(store.load("t").await.unwrap(), None);
    }

    #[tokio::test]
    async fn memory_with_token() {
        let store = MemoryTokenStore::with_token("t", "x");
        assert_eq!(store.get("t").as_deref(), Some("x"));
        assert_eq!(store.remove("other").await.unwrap(), None);
    }

    #[tokio::test]
    async fn file_round_trip() {
        let dir = TempDir::new().unwrap();
        let store = FileTokenStore::new(token_file_path(dir.path()));

        assert_eq!(store.load("t").await.unwrap(), None);
        let _ = store.save("t", "abc").await.unwrap();
        let _ = store.save("u", "def").await.unwrap();
        assert_eq!(store.load("t").await.unwrap().as_deref(), Some("abc"));

        let reopened = FileTokenStore::new(store.path());
        assert_eq!(reopened.load("u").await.unwrap().as_deref(), Some("def"));

        assert_eq!(store.remove("t").await.unwrap().as_deref(), Some("abc"));
        assert_eq!(store.load("t").await.unwrap(), None);
        assert_eq!(store.load("u").await.unwrap().as_deref(), Some("def"));
    }

    #[tokio::test]
    async fn file_creates_parent_dirs() {
        let dir = TempDir::new().unwrap();
        let store = FileTokenStore::new(dir.path().join("nested/deeper/tokens.json"));
        let _ = store.save("t", "abc").await.unwrap();
        assert!(store.path().exists());
    }

    #[tokio::test]
    async fn invalid_file_is_treated_as_empty() {
        let dir = TempDir::new().unwrap();
        let path = token_file_path(dir.path());
        std::fs::write(&path, "not json").unwrap();
        let store = FileTokenStore::new(&path);
        assert_eq!(store.load("t").await.unwrap(), None);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn file_permissions_are_private() {
        use std::os::unix::fs::PermissionsExt;

        let dir = TempDir::new().unwrap();
        let store = FileTokenStore::new(token_file_path(dir.path()));
        let _ = store.save("t", "abc").await.unwrap();
        let mode = std::fs::metadata(store.path()).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }
}
