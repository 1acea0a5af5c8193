//! Small persistent state: an injectable key-value store and the bounded
//! "recently used tools" list built on it.
//!
//! Nothing here is global. The CLI opens a [`JsonFileStore`] under the
//! user's local data directory and hands a [`RecentItems`] to the pipeline
//! as its [`CompletionHook`]; library users can supply any store.

use crate::engine::{CompletionHook, RunRecord};
use futures::future::BoxFuture;
use serde_json::{Map, Value};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use thiserror::Error;
use tracing::{debug, warn};

/// Number of entries [`RecentItems`] keeps unless told otherwise.
pub const DEFAULT_RECENT_CAPACITY: usize = 5;

/// Key under which the recent-tools list is stored.
pub const RECENT_TOOLS_KEY: &str = "recentTools";

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store I/O error at '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("store contents are not valid JSON: {0}")]
    Json(#[from] serde_json::Error),
}

/// String-keyed JSON values.
pub trait KeyValueStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<Value>, StoreError>;
    fn set(&self, key: &str, value: Value) -> Result<(), StoreError>;
    fn remove(&self, key: &str) -> Result<(), StoreError>;
    fn clear(&self) -> Result<(), StoreError>;
}

fn lock(map: &Mutex<Map<String, Value>>) -> MutexGuard<'_, Map<String, Value>> {
    // A panic while holding the lock cannot leave the map half-written.
    map.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// In-process store, lost on exit.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: Mutex<Map<String, Value>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<Value>, StoreError> {
        Ok(lock(&self.entries).get(key).cloned())
    }

    fn set(&self, key: &str, value: Value) -> Result<(), StoreError> {
        lock(&self.entries).insert(key.to_string(), value);
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), StoreError> {
        lock(&self.entries).remove(key);
        Ok(())
    }

    fn clear(&self) -> Result<(), StoreError> {
        lock(&self.entries).clear();
        Ok(())
    }
}

/// A JSON object on disk, rewritten atomically after every change.
#[derive(Debug)]
pub struct JsonFileStore {
    path: PathBuf,
    entries: Mutex<Map<String, Value>>,
}

impl JsonFileStore {
    /// Open `path`, starting empty if the file does not exist yet.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let path = path.into();
        let entries = match std::fs::read(&path) {
            Ok(bytes) if bytes.iter().all(u8::is_ascii_whitespace) => Map::new(),
            Ok(bytes) => serde_json::from_slice(&bytes)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Map::new(),
            Err(source) => return Err(StoreError::Io { path, source }),
        };
        debug!(path = %path.display(), keys = entries.len(), "Opened state file");
        Ok(Self {
            path,
            entries: Mutex::new(entries),
        })
    }

    /// `<local data dir>/doctools/state.json`, e.g. `~/.local/share/doctools/state.json`.
    pub fn default_path() -> PathBuf {
        dirs::data_local_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("doctools")
            .join("state.json")
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn persist(&self, entries: &Map<String, Value>) -> Result<(), StoreError> {
        let io = |source| StoreError::Io {
            path: self.path.clone(),
            source,
        };
        let dir = match self.path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
            _ => PathBuf::from("."),
        };
        std::fs::create_dir_all(&dir).map_err(io)?;
        let json = serde_json::to_vec_pretty(entries)?;
        let mut tmp = tempfile::NamedTempFile::new_in(&dir).map_err(io)?;
        tmp.write_all(&json).map_err(io)?;
        tmp.persist(&self.path).map_err(|e| io(e.error))?;
        Ok(())
    }
}

impl KeyValueStore for JsonFileStore {
    fn get(&self, key: &str) -> Result<Option<Value>, StoreError> {
        Ok(lock(&self.entries).get(key).cloned())
    }

    fn set(&self, key: &str, value: Value) -> Result<(), StoreError> {
        let mut entries = lock(&self.entries);
        entries.insert(key.to_string(), value);
        self.persist(&entries)
    }

    fn remove(&self, key: &str) -> Result<(), StoreError> {
        let mut entries = lock(&self.entries);
        if entries.remove(key).is_some() {
            self.persist(&entries)?;
        }
        Ok(())
    }

    fn clear(&self) -> Result<(), StoreError> {
        let mut entries = lock(&self.entries);
        entries.clear();
        self.persist(&entries)
    }
}

/// Most-recent-first list of names, without duplicates, bounded in length.
#[derive(Clone)]
pub struct RecentItems {
    store: Arc<dyn KeyValueStore>,
    key: String,
    capacity: usize,
}

impl RecentItems {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self {
            store,
            key: RECENT_TOOLS_KEY.to_string(),
            capacity: DEFAULT_RECENT_CAPACITY,
        }
    }

    pub fn with_key(mut self, key: impl Into<String>) -> Self {
        self.key = key.into();
        self
    }

    pub fn with_capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity.max(1);
        self
    }

    /// Newest first. A missing or malformed entry reads as empty.
    pub fn list(&self) -> Result<Vec<String>, StoreError> {
        let items = match self.store.get(&self.key)? {
            Some(value) => serde_json::from_value(value).unwrap_or_else(|e| {
                warn!(key = %self.key, error = %e, "Ignoring malformed recent list");
                Vec::new()
            }),
            None => Vec::new(),
        };
        Ok(items)
    }

    /// Move `item` to the front, evicting the oldest entry past capacity.
    pub fn push(&self, item: &str) -> Result<Vec<String>, StoreError> {
        let mut items = self.list()?;
        items.retain(|existing| existing != item);
        items.insert(0, item.to_string());
        items.truncate(self.capacity);
        self.store.set(&self.key, Value::from(items.clone()))?;
        Ok(items)
    }

    pub fn clear(&self) -> Result<(), StoreError> {
        self.store.remove(&self.key)
    }
}

impl CompletionHook for RecentItems {
    fn on_complete(&self, record: RunRecord) -> BoxFuture<'static, ()> {
        let recent = self.clone();
        Box::pin(async move {
            let name = record.operation.name();
            match tokio::task::spawn_blocking(move || recent.push(name)).await {
                Ok(Ok(_)) => debug!(tool = name, "Recorded recent tool"),
                Ok(Err(e)) => warn!(tool = name, error = %e, "Could not record recent tool"),
                Err(e) => warn!(tool = name, error = %e, "Recent-tools task failed"),
            }
        })
    }
}
