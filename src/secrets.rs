//! Secret storage interface (§4.3, §6, §9 design notes).
//!
//! The platform keyring itself is an external collaborator (out of scope,
//! §1); this module specifies only the two-operation `get`/`set` interface
//! the rest of the crate depends on, plus a file-backed implementation
//! suitable for headless Linux services and containers where no desktop
//! keyring is available.

use crate::error::Result;
use async_trait::async_trait;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

pub const SERVICE_NAME: &str = "HerculesGateway";

#[async_trait]
pub trait SecretStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>>;
    async fn set(&self, key: &str, value: &str) -> Result<()>;
}

/// Stores secrets as `key=value` lines in a single file under the install
/// directory. Not encrypted; the platform keyring adapter this stands in
/// for is expected to do better on a desktop target.
pub struct FileSecretStore {
    path: PathBuf,
    lock: Mutex<()>,
}

impl FileSecretStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    fn read_all(path: &Path) -> HashMap<String, String> {
        let Ok(contents) = std::fs::read_to_string(path) else {
            return HashMap::new();
        };
        contents
            .lines()
            .filter_map(|line| line.split_once('='))
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }
}

#[async_trait]
impl SecretStore for FileSecretStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        let path = self.path.clone();
        let key = key.to_string();
        let value = tokio::task::spawn_blocking(move || Self::read_all(&path).get(&key).cloned())
            .await
            .map_err(|e| crate::error::GatewayError::Decode(e.to_string()))?;
        Ok(value)
    }

    async fn set(&self, key: &str, value: &str) -> Result<()> {
        let _guard = self.lock.lock().unwrap();
        let mut entries = Self::read_all(&self.path);
        entries.insert(key.to_string(), value.to_string());
        let body = entries
            .into_iter()
            .map(|(k, v)| format!("{k}={v}\n"))
            .collect::<String>();
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&self.path, body)?;
        Ok(())
    }
}

/// In-memory secret store used by tests.
#[derive(Default)]
pub struct MemorySecretStore {
    entries: Mutex<HashMap<String, String>>,
}

#[async_trait]
impl SecretStore for MemorySecretStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.entries.lock().unwrap().get(key).cloned())
    }

    async fn set(&self, key: &str, value: &str) -> Result<()> {
        self.entries
            .lock()
            .unwrap()
            .insert(key.to_string(), value.to_string());
        Ok(())
    }
}
