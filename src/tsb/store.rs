//! Content-keyed blob store with quota and min-free-percentage policy.
//!
//! Every `TsbStore` call is expected to execute synchronously on the
//! writer thread or a reader's calling thread (see `tsb::session_manager`),
//! never from async code directly.

use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;
use std::sync::Mutex;

use crate::errors::StoreError;

#[derive(Debug, Clone)]
struct Entry {
    path: PathBuf,
    size_bytes: u64,
}

/// A directory-backed, content-keyed blob store.
///
/// Thread-safety: distinct keys may be written and read concurrently from
/// different threads; the store's own bookkeeping (`registry`, `used_bytes`)
/// is guarded by a single mutex.
pub struct TsbStore {
    root: PathBuf,
    max_bytes: u64,
    min_free_percentage: u8,
    registry: Mutex<HashMap<String, Entry>>,
    used_bytes: Mutex<u64>,
}

impl TsbStore {
    pub fn open(root: PathBuf, max_bytes: u64, min_free_percentage: u8) -> Result<Self, StoreError> {
        fs::create_dir_all(&root)?;
        Ok(Self {
            root,
            max_bytes,
            min_free_percentage,
            registry: Mutex::new(HashMap::new()),
            used_bytes: Mutex::new(0),
        })
    }

    fn path_for(&self, key: &str) -> PathBuf {
        // Keys are caller-controlled strings (URL + position); sanitize the
        // path separator so a malformed URL can't escape the store root.
        let sanitized = key.replace(['/', '\\'], "_");
        self.root.join(sanitized)
    }

    fn free_percentage(&self, additional_bytes: u64) -> f64 {
        let used = *self.used_bytes.lock().unwrap() + additional_bytes;
        if self.max_bytes == 0 {
            return 0.0;
        }
        let free = self.max_bytes.saturating_sub(used);
        (free as f64 / self.max_bytes as f64) * 100.0
    }

    /// Write `bytes` under `key`. Returns `Ok(())` on a fresh write,
    /// `Err(AlreadyExists)` when the key already existed (callers treat this
    /// as success and skip index insertion), and `Err(NoSpace)` when the
    /// quota or min-free-percentage policy rejects the write.
    pub fn write(&self, key: &str, bytes: &[u8]) -> Result<(), StoreError> {
        {
            let registry = self.registry.lock().unwrap();
            if registry.contains_key(key) {
                return Err(StoreError::AlreadyExists {
                    key: key.to_string(),
                });
            }
        }

        let len = bytes.len() as u64;
        if *self.used_bytes.lock().unwrap() + len > self.max_bytes {
            return Err(StoreError::NoSpace {
                key: key.to_string(),
            });
        }
        if self.free_percentage(len) < self.min_free_percentage as f64 {
            return Err(StoreError::NoSpace {
                key: key.to_string(),
            });
        }

        let path = self.path_for(key);
        fs::write(&path, bytes)?;

        let mut registry = self.registry.lock().unwrap();
        // Re-check under lock: another thread may have written this key
        // while we were doing the I/O above.
        if registry.contains_key(key) {
            let _ = fs::remove_file(&path);
            return Err(StoreError::AlreadyExists {
                key: key.to_string(),
            });
        }
        registry.insert(
            key.to_string(),
            Entry {
                path,
                size_bytes: len,
            },
        );
        *self.used_bytes.lock().unwrap() += len;
        Ok(())
    }

    pub fn size(&self, key: &str) -> Option<u64> {
        self.registry.lock().unwrap().get(key).map(|e| e.size_bytes)
    }

    pub fn read(&self, key: &str) -> Result<Vec<u8>, StoreError> {
        let path = {
            let registry = self.registry.lock().unwrap();
            registry
                .get(key)
                .map(|e| e.path.clone())
                .ok_or_else(|| StoreError::NotFound {
                    key: key.to_string(),
                })?
        };
        Ok(fs::read(path)?)
    }

    /// Idempotent delete; missing keys are not an error.
    pub fn delete(&self, key: &str) {
        let entry = self.registry.lock().unwrap().remove(key);
        if let Some(entry) = entry {
            let _ = fs::remove_file(&entry.path);
            let mut used = self.used_bytes.lock().unwrap();
            *used = used.saturating_sub(entry.size_bytes);
        }
    }

    /// Erase every key owned by this store instance.
    pub fn flush(&self) {
        let mut registry = self.registry.lock().unwrap();
        for (_, entry) in registry.drain() {
            let _ = fs::remove_file(&entry.path);
        }
        *self.used_bytes.lock().unwrap() = 0;
    }

    pub fn total_bytes(&self) -> u64 {
        *self.used_bytes.lock().unwrap()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU64, Ordering};

    struct TempDir(PathBuf);

    impl TempDir {
        fn new() -> Self {
            static COUNTER: AtomicU64 = AtomicU64::new(0);
            let n = COUNTER.fetch_add(1, Ordering::Relaxed);
            let path = std::env::temp_dir().join(format!(
                "tsb-store-test-{}-{}",
                std::process::id(),
                n
            ));
            fs::create_dir_all(&path).unwrap();
            TempDir(path)
        }
    }

    impl Drop for TempDir {
        fn drop(&mut self) {
            let _ = fs::remove_dir_all(&self.0);
        }
    }

    fn temp_store(max_bytes: u64, min_free_pct: u8) -> (TsbStore, TempDir) {
        let dir = TempDir::new();
        let store = TsbStore::open(dir.0.clone(), max_bytes, min_free_pct).unwrap();
        (store, dir)
    }

    #[test]
    fn write_then_read_round_trips() {
        let (store, _dir) = temp_store(1024, 0);
        store.write("k1", b"hello").unwrap();
        assert_eq!(store.read("k1").unwrap(), b"hello");
    }

    #[test]
    fn rewrite_of_existing_key_is_rejected_as_already_exists() {
        let (store, _dir) = temp_store(1024, 0);
        store.write("k1", b"hello").unwrap();
        assert!(matches!(
            store.write("k1", b"world").unwrap_err(),
            StoreError::AlreadyExists { .. }
        ));
        assert_eq!(store.read("k1").unwrap(), b"hello");
    }

    #[test]
    fn write_over_quota_fails_with_no_space() {
        let (store, _dir) = temp_store(4, 0);
        let err = store.write("k1", b"hello").unwrap_err();
        assert!(matches!(err, StoreError::NoSpace { .. }));
    }

    #[test]
    fn delete_is_idempotent() {
        let (store, _dir) = temp_store(1024, 0);
        store.write("k1", b"hello").unwrap();
        store.delete("k1");
        store.delete("k1");
        assert!(matches!(
            store.read("k1").unwrap_err(),
            StoreError::NotFound { .. }
        ));
    }

    #[test]
    fn flush_erases_everything() {
        let (store, _dir) = temp_store(1024, 0);
        store.write("k1", b"a").unwrap();
        store.write("k2", b"b").unwrap();
        store.flush();
        assert_eq!(store.total_bytes(), 0);
        assert!(store.read("k1").is_err());
    }
}
