//! Injected key/value persistence for client-side state that must survive restarts.

use dashmap::DashMap;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use crate::error::StorageError;

/// Storage key of the form `<feature>_<entity>`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StorageKey(String);

impl StorageKey {
    pub fn new(feature: &str, entity: &str) -> Self {
        StorageKey(format!("{}_{}", feature, entity))
    }

    /// One saved answer set per (questionnaire, project).
    pub fn questionnaire(questionnaire_id: &str, project_id: &str) -> Self {
        Self::new(questionnaire_id, project_id)
    }

    pub fn info_box(key: &str) -> Self {
        Self::new("infoBox", key)
    }

    pub fn tip(entity_name: &str) -> Self {
        Self::new("tip", entity_name)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for StorageKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

pub trait KeyValueStore: Send + Sync {
    fn get(&self, key: &StorageKey) -> Result<Option<String>, StorageError>;
    fn set(&self, key: &StorageKey, value: String) -> Result<(), StorageError>;
    fn remove(&self, key: &StorageKey) -> Result<(), StorageError>;
}

impl dyn KeyValueStore + '_ {
    pub fn get_json<T: DeserializeOwned>(&self, key: &StorageKey) -> Result<Option<T>, StorageError> {
        match self.get(key)? {
            Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            None => Ok(None),
        }
    }

    pub fn set_json<T: Serialize>(&self, key: &StorageKey, value: &T) -> Result<(), StorageError> {
        self.set(key, serde_json::to_string(value)?)
    }
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: DashMap<StorageKey, String>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &StorageKey) -> Result<Option<String>, StorageError> {
        Ok(self.entries.get(key).map(|v| v.value().clone()))
    }

    fn set(&self, key: &StorageKey, value: String) -> Result<(), StorageError> {
        self.entries.insert(key.clone(), value);
        Ok(())
    }

    fn remove(&self, key: &StorageKey) -> Result<(), StorageError> {
        self.entries.remove(key);
        Ok(())
    }
}

/// A JSON object on disk, rewritten on every change.
pub struct FileStore {
    path: PathBuf,
    entries: Mutex<BTreeMap<String, String>>,
}

impl FileStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StorageError> {
        let path = path.as_ref().to_path_buf();
        let entries = match fs::read_to_string(&path) {
            Ok(raw) if raw.trim().is_empty() => BTreeMap::new(),
            Ok(raw) => serde_json::from_str(&raw)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => BTreeMap::new(),
            Err(e) => return Err(e.into()),
        };
        Ok(Self {
            path,
            entries: Mutex::new(entries),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn flush(&self, entries: &BTreeMap<String, String>) -> Result<(), StorageError> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        let tmp = self.path.with_extension("tmp");
        fs::write(&tmp, serde_json::to_string_pretty(entries)?)?;
        fs::rename(&tmp, &self.path)?;
        Ok(())
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BTreeMap<String, String>> {
        self.entries.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl KeyValueStore for FileStore {
    fn get(&self, key: &StorageKey) -> Result<Option<String>, StorageError> {
        Ok(self.lock().get(key.as_str()).cloned())
    }

    fn set(&self, key: &StorageKey, value: String) -> Result<(), StorageError> {
        let mut entries = self.lock();
        entries.insert(key.as_str().to_string(), value);
        self.flush(&entries)
    }

    fn remove(&self, key: &StorageKey) -> Result<(), StorageError> {
        let mut entries = self.lock();
        if entries.remove(key.as_str()).is_some() {
            self.flush(&entries)?;
        }
        Ok(())
    }
}

/// Dismissal flags for info boxes and tips.
pub struct Dismissals<'a> {
    store: &'a dyn KeyValueStore,
}

impl<'a> Dismissals<'a> {
    pub fn new(store: &'a dyn KeyValueStore) -> Self {
        Self { store }
    }

    pub fn is_dismissed(&self, key: &StorageKey) -> Result<bool, StorageError> {
        Ok(self.store.get(key)?.as_deref() == Some("true"))
    }

    pub fn dismiss(&self, key: &StorageKey) -> Result<(), StorageError> {
        self.store.set(key, "true".to_string())
    }

    pub fn reset(&self, key: &StorageKey) -> Result<(), StorageError> {
        self.store.remove(key)
    }
}
