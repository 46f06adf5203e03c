//! Key-value byte stores backing the local replica.
//!
//! The replica only needs whole-value get and put under a single key.
//! [`FileStore`] keeps one file per key and survives process restarts;
//! [`MemoryStore`] is process-local and shared between clones.

use std::collections::HashMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

use tempfile::NamedTempFile;
use tracing::debug;

use crate::StoreError;

/// Minimal byte store: overwrite semantics, no partial writes.
pub trait KvStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError>;
    fn put(&self, key: &str, value: &[u8]) -> Result<(), StoreError>;
}

fn check_key(key: &str) -> Result<(), StoreError> {
    let valid = !key.is_empty()
        && !key.starts_with('.')
        && key
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || matches!(b, b'.' | b'-' | b'_'));
    if valid {
        Ok(())
    } else {
        Err(StoreError::InvalidKey(key.to_string()))
    }
}

/// Directory-backed store. Each key is a `<key>.json` file.
///
/// Writes go to a temp file in the same directory and are renamed into place,
/// so a crash mid-write leaves the previous value intact.
#[derive(Debug, Clone)]
pub struct FileStore {
    dir: PathBuf,
}

impl FileStore {
    /// Open a store rooted at `dir`, creating the directory if needed.
    pub fn open(dir: impl AsRef<Path>) -> Result<Self, StoreError> {
        let dir = dir.as_ref().to_path_buf();
        std::fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, key: &str) -> Result<PathBuf, StoreError> {
        check_key(key)?;
        Ok(self.dir.join(format!("{key}.json")))
    }
}

impl KvStore for FileStore {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        let path = self.path_for(key)?;
        match std::fs::read(&path) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn put(&self, key: &str, value: &[u8]) -> Result<(), StoreError> {
        let path = self.path_for(key)?;
        let mut tmp = NamedTempFile::new_in(&self.dir)?;
        tmp.write_all(value)?;
        tmp.as_file().sync_all()?;
        tmp.persist(&path).map_err(|e| StoreError::Io(e.error))?;
        debug!(path = %path.display(), bytes = value.len(), "wrote store key");
        Ok(())
    }
}

/// In-process store. Clones share the same map, which lets tests drop an
/// engine and "restart" against the same contents.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    entries: Arc<Mutex<HashMap<String, Vec<u8>>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KvStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        check_key(key)?;
        let entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(entries.get(key).cloned())
    }

    fn put(&self, key: &str, value: &[u8]) -> Result<(), StoreError> {
        check_key(key)?;
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        entries.insert(key.to_string(), value.to_vec());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_store_missing_key_is_none() {
        let tmp = tempfile::TempDir::new().unwrap();
        let store = FileStore::open(tmp.path()).unwrap();
        assert!(store.get("bearmap.reports.v0").unwrap().is_none());
    }

    #[test]
    fn file_store_put_then_get() {
        let tmp = tempfile::TempDir::new().unwrap();
        let store = FileStore::open(tmp.path()).unwrap();
        store.put("bearmap.reports.v0", b"[1,2]").unwrap();
        assert_eq!(store.get("bearmap.reports.v0").unwrap().unwrap(), b"[1,2]");
        assert!(tmp.path().join("bearmap.reports.v0.json").exists());
    }

    #[test]
    fn file_store_overwrites() {
        let tmp = tempfile::TempDir::new().unwrap();
        let store = FileStore::open(tmp.path()).unwrap();
        store.put("k", b"first, and longer").unwrap();
        store.put("k", b"second").unwrap();
        assert_eq!(store.get("k").unwrap().unwrap(), b"second");
    }

    #[test]
    fn file_store_survives_reopen() {
        let tmp = tempfile::TempDir::new().unwrap();
        FileStore::open(tmp.path()).unwrap().put("k", b"v").unwrap();
        let reopened = FileStore::open(tmp.path()).unwrap();
        assert_eq!(reopened.get("k").unwrap().unwrap(), b"v");
    }

    #[test]
    fn file_store_creates_nested_dir() {
        let tmp = tempfile::TempDir::new().unwrap();
        let dir = tmp.path().join("a").join("b");
        let store = FileStore::open(&dir).unwrap();
        store.put("k", b"v").unwrap();
        assert!(dir.join("k.json").exists());
    }

    #[test]
    fn path_traversal_keys_rejected() {
        let tmp = tempfile::TempDir::new().unwrap();
        let store = FileStore::open(tmp.path()).unwrap();
        assert!(matches!(
            store.put("../escape", b"x"),
            Err(StoreError::InvalidKey(_))
        ));
        assert!(matches!(store.get(""), Err(StoreError::InvalidKey(_))));
        assert!(matches!(store.get(".hidden"), Err(StoreError::InvalidKey(_))));
    }

    #[test]
    fn memory_store_clones_share_contents() {
        let a = MemoryStore::new();
        let b = a.clone();
        a.put("k", b"v").unwrap();
        assert_eq!(b.get("k").unwrap().unwrap(), b"v");
    }
}
