use std::collections::HashMap;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::warn;

use crate::error::StoreError;

/// Storage key of the bounded notification log.
pub const NOTIFICATIONS_KEY: &str = "notifications";
/// Storage key of the fingerprint -> last-shown map.
pub const DEDUP_CACHE_KEY: &str = "notification-cache";

/// Key/value store surviving restarts. Implementations may block; async
/// callers go through [`PendingWrite::commit_async`].
pub trait StateStore: Send + Sync {
    fn load(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError>;
    fn save(&self, key: &str, bytes: &[u8]) -> Result<(), StoreError>;
}

pub type SharedStore = Arc<dyn StateStore>;

/// JSON snapshot taken under a lock and written after it is released.
pub struct PendingWrite {
    store: SharedStore,
    key: &'static str,
    bytes: Vec<u8>,
}

impl PendingWrite {
    pub fn encode<T: Serialize + ?Sized>(
        store: &SharedStore,
        key: &'static str,
        value: &T,
    ) -> Option<Self> {
        match serde_json::to_vec(value) {
            Ok(bytes) => Some(Self {
                store: store.clone(),
                key,
                bytes,
            }),
            Err(err) => {
                warn!(key, error = ?err, "failed to encode state");
                None
            }
        }
    }

    pub fn key(&self) -> &'static str {
        self.key
    }

    /// Write on the calling thread.
    pub fn commit(self) {
        if let Err(err) = self.store.save(self.key, &self.bytes) {
            warn!(key = self.key, error = ?err, "failed to persist state");
        }
    }

    /// Write on the blocking pool so file I/O never stalls a runtime worker.
    pub async fn commit_async(self) {
        let key = self.key;
        if let Err(err) = tokio::task::spawn_blocking(move || self.commit()).await {
            warn!(key, error = ?err, "state writer task failed");
        }
    }
}

/// Read and decode `key`; a missing or corrupt entry yields `None`.
pub fn load_json<T: DeserializeOwned>(store: &dyn StateStore, key: &str) -> Option<T> {
    match store.load(key) {
        Ok(Some(bytes)) => match serde_json::from_slice(&bytes) {
            Ok(value) => Some(value),
            Err(err) => {
                warn!(key, error = ?err, "discarding unreadable persisted state");
                None
            }
        },
        Ok(None) => None,
        Err(err) => {
            warn!(key, error = ?err, "failed reading persisted state");
            None
        }
    }
}

/// One JSON file per key inside a data directory.
pub struct FileStore {
    dir: PathBuf,
}

impl FileStore {
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{key}.json"))
    }
}

impl StateStore for FileStore {
    fn load(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        match fs::read(self.path_for(key)) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err.into()),
        }
    }

    fn save(&self, key: &str, bytes: &[u8]) -> Result<(), StoreError> {
        let path = self.path_for(key);
        // Atomic write: write to tmp then rename.
        let tmp = path.with_extension("tmp");
        fs::write(&tmp, bytes)?;
        fs::rename(&tmp, &path)?;
        Ok(())
    }
}

/// Volatile store used when no data directory is configured, and in tests.
#[derive(Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, Vec<u8>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl StateStore for MemoryStore {
    fn load(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        let guard = self
            .entries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        Ok(guard.get(key).cloned())
    }

    fn save(&self, key: &str, bytes: &[u8]) -> Result<(), StoreError> {
        let mut guard = self
            .entries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        guard.insert(key.to_string(), bytes.to_vec());
        Ok(())
    }
}
