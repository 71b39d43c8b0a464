use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};

use parking_lot::Mutex;
use tracing::warn;

use crate::error::PersistenceError;
use crate::files::{FileSet, FileTab};

/// Durable string key-value store backing the playground's saved tabs.
pub trait KeyValueStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>, PersistenceError>;
    fn set(&self, key: &str, value: &str) -> Result<(), PersistenceError>;
}

/// One `<key>.json` file per key under a directory.
#[derive(Debug, Clone)]
pub struct DirectoryStore {
    root: PathBuf,
}

impl DirectoryStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn path_for(&self, key: &str) -> PathBuf {
        self.root.join(format!("{key}.json"))
    }
}

impl KeyValueStore for DirectoryStore {
    fn get(&self, key: &str) -> Result<Option<String>, PersistenceError> {
        match fs::read_to_string(self.path_for(key)) {
            Ok(text) => Ok(Some(text)),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err.into()),
        }
    }

    /// Written to a sibling temp file first, then renamed over the target.
    fn set(&self, key: &str, value: &str) -> Result<(), PersistenceError> {
        fs::create_dir_all(&self.root)?;
        let target = self.path_for(key);
        let staging = target.with_extension("json.tmp");
        fs::write(&staging, value)?;
        fs::rename(&staging, &target)?;
        Ok(())
    }
}

/// Non-durable store; counts writes so tests can observe coalescing.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, String>>,
    writes: AtomicUsize,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_entry(key: &str, value: &str) -> Self {
        let store = Self::new();
        store.entries.lock().insert(key.to_string(), value.to_string());
        store
    }

    pub fn write_count(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<String>, PersistenceError> {
        Ok(self.entries.lock().get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<(), PersistenceError> {
        self.entries.lock().insert(key.to_string(), value.to_string());
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Read saved tabs. Missing, unreadable, unparsable or empty data all
/// mean "nothing saved"; only the reason is logged.
pub fn load_files(store: &dyn KeyValueStore, key: &str) -> Option<FileSet> {
    let text = match store.get(key) {
        Ok(Some(text)) => text,
        Ok(None) => return None,
        Err(err) => {
            warn!("could not read saved files: {err}");
            return None;
        }
    };
    match serde_json::from_str::<Vec<FileTab>>(&text) {
        Ok(tabs) => FileSet::from_saved(tabs),
        Err(err) => {
            warn!("discarding saved files: {}", PersistenceError::from(err));
            None
        }
    }
}

pub fn save_files(store: &dyn KeyValueStore, key: &str, files: &FileSet) -> Result<(), PersistenceError> {
    let text = serde_json::to_string(files.tabs())?;
    store.set(key, &text)
}

#[cfg(test)]
mod tests {
    use super::*;

    const KEY: &str = "orus-playground-files";

    #[test]
    fn round_trips_through_directory_store() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = DirectoryStore::new(dir.path().join("state"));
        assert_eq!(store.get(KEY).expect("get"), None);

        let mut files = FileSet::default();
        files.add("b.orus", "orus");
        save_files(&store, KEY, &files).expect("save");

        assert!(store.path_for(KEY).exists());
        let loaded = load_files(&store, KEY).expect("loaded");
        assert_eq!(loaded, files);
    }

    #[test]
    fn corrupt_json_counts_as_nothing_saved() {
        let store = MemoryStore::with_entry(KEY, "[{\"id\": 1");
        assert!(load_files(&store, KEY).is_none());
    }

    #[test]
    fn empty_array_counts_as_nothing_saved() {
        let store = MemoryStore::with_entry(KEY, "[]");
        assert!(load_files(&store, KEY).is_none());
    }

    #[test]
    fn persisted_format_is_a_plain_array() {
        let store = MemoryStore::new();
        save_files(&store, KEY, &FileSet::default()).expect("save");
        let text = store.get(KEY).expect("get").expect("present");
        let value: serde_json::Value = serde_json::from_str(&text).expect("json");
        let records = value.as_array().expect("array");
        assert_eq!(records.len(), 1);
        assert_eq!(records[0]["name"], "main.orus");
        assert_eq!(records[0]["active"], true);
        assert_eq!(store.write_count(), 1);
    }
}
