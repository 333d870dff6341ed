//! Key/value persistence used by the persistent session manager.
//!
//! Browser hosts back this with `localStorage`; the crate ships an in-memory
//! adapter and a JSON-file adapter for native hosts and tests.  Values are
//! opaque strings and every `set` replaces the whole value.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use parking_lot::{Mutex, RwLock};

use lm_domain::error::{Error, Result};

/// Durable string storage shared by every execution context of one scope.
pub trait StorageAdapter: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>>;

    /// Replace the value under `key`.  Fails when storage is full or
    /// unavailable.
    fn set(&self, key: &str, value: String) -> Result<()>;

    fn remove(&self, key: &str) -> Result<()>;
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// In-memory storage
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Process-local storage.  Several managers sharing one `Arc<MemoryStorage>`
/// behave like tabs sharing `localStorage`.
#[derive(Debug, Default)]
pub struct MemoryStorage {
    entries: RwLock<HashMap<String, String>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

impl StorageAdapter for MemoryStorage {
    fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.entries.read().get(key).cloned())
    }

    fn set(&self, key: &str, value: String) -> Result<()> {
        self.entries.write().insert(key.to_owned(), value);
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<()> {
        self.entries.write().remove(key);
        Ok(())
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// File storage
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Storage backed by a JSON object in `state_path/sessions/storage.json`.
///
/// Nothing is cached: every call reads the file, so instances in other
/// processes sharing the state directory see each other's writes.  Updates
/// are written to a temporary file and renamed over the original, so readers
/// never observe a half-written object.
pub struct FileStorage {
    path: PathBuf,
    /// Serializes read-modify-write cycles within this process.
    write_lock: Mutex<()>,
}

impl FileStorage {
    /// Open or create the storage file under `state_path`.
    pub fn new(state_path: &Path) -> Result<Self> {
        let dir = state_path.join("sessions");
        std::fs::create_dir_all(&dir).map_err(Error::Io)?;

        let storage = Self {
            path: dir.join("storage.json"),
            write_lock: Mutex::new(()),
        };

        tracing::info!(
            keys = storage.load()?.len(),
            path = %storage.path.display(),
            "session storage opened"
        );

        Ok(storage)
    }

    /// Current on-disk entries.  A missing file is empty; an unreadable one
    /// is discarded.
    fn load(&self) -> Result<HashMap<String, String>> {
        let raw = match std::fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(HashMap::new()),
            Err(e) => return Err(Error::Io(e)),
        };
        Ok(serde_json::from_str(&raw).unwrap_or_else(|e| {
            tracing::debug!(path = %self.path.display(), error = %e, "discarding unreadable storage file");
            HashMap::new()
        }))
    }

    fn write_to_disk(&self, entries: &HashMap<String, String>) -> Result<()> {
        let json = serde_json::to_string_pretty(entries)
            .map_err(|e| Error::Storage(format!("serializing storage: {e}")))?;

        // Unique per write so concurrent writers never share a temp file.
        let tmp_path = self
            .path
            .with_extension(format!("json.{}.tmp", uuid::Uuid::new_v4().simple()));
        std::fs::write(&tmp_path, json).map_err(Error::Io)?;
        std::fs::rename(&tmp_path, &self.path).map_err(|e| {
            let _ = std::fs::remove_file(&tmp_path);
            Error::Io(e)
        })
    }
}

impl StorageAdapter for FileStorage {
    fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.load()?.remove(key))
    }

    fn set(&self, key: &str, value: String) -> Result<()> {
        let _guard = self.write_lock.lock();
        let mut entries = self.load()?;
        entries.insert(key.to_owned(), value);
        self.write_to_disk(&entries)
    }

    fn remove(&self, key: &str) -> Result<()> {
        let _guard = self.write_lock.lock();
        let mut entries = self.load()?;
        if entries.remove(key).is_none() {
            return Ok(());
        }
        self.write_to_disk(&entries)
    }
}
