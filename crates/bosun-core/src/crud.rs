//! Generic key-value persistence.
//!
//! Records are opaque byte blobs keyed by name. Reads of a missing key fail
//! with [`io::ErrorKind::NotFound`] so callers can tell absence apart from
//! other failures.

use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use tracing::debug;

/// Byte-oriented key-value store.
pub trait KeyValueStore: Send + Sync + std::fmt::Debug {
    /// List all keys, sorted.
    fn list(&self) -> io::Result<Vec<String>>;

    /// Read the record stored under `key`.
    fn read(&self, key: &str) -> io::Result<Vec<u8>>;

    /// Replace the record stored under `key`.
    fn store(&self, key: &str, data: &[u8]) -> io::Result<()>;

    /// Delete the record stored under `key`.
    fn delete(&self, key: &str) -> io::Result<()>;
}

/// Store keeping one file per key: `<dir>/<key>.<extension>`.
#[derive(Debug, Clone)]
pub struct FileSystemStore {
    dir: PathBuf,
    extension: String,
}

impl FileSystemStore {
    pub fn new(dir: impl Into<PathBuf>, extension: impl Into<String>) -> Self {
        Self {
            dir: dir.into(),
            extension: extension.into(),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{}.{}", key, self.extension))
    }
}

impl KeyValueStore for FileSystemStore {
    fn list(&self) -> io::Result<Vec<String>> {
        let entries = match fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => return Err(err),
        };

        let mut keys = Vec::new();
        for entry in entries {
            let entry = entry?;
            if !entry.file_type()?.is_file() {
                continue;
            }
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some(self.extension.as_str()) {
                continue;
            }
            if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                keys.push(stem.to_string());
            }
        }
        keys.sort();
        Ok(keys)
    }

    fn read(&self, key: &str) -> io::Result<Vec<u8>> {
        fs::read(self.path_for(key))
    }

    /// Write atomically (tmp + rename).
    fn store(&self, key: &str, data: &[u8]) -> io::Result<()> {
        fs::create_dir_all(&self.dir)?;

        let path = self.path_for(key);
        let tmp_path = self
            .dir
            .join(format!(".{}.{}.tmp", key, std::process::id()));
        fs::write(&tmp_path, data)?;
        if let Err(err) = fs::rename(&tmp_path, &path) {
            let _ = fs::remove_file(&tmp_path);
            return Err(err);
        }
        debug!(path = %path.display(), "record stored");
        Ok(())
    }

    fn delete(&self, key: &str) -> io::Result<()> {
        fs::remove_file(self.path_for(key))
    }
}

/// In-memory store for tests and embedding.
#[derive(Debug, Default)]
pub struct MemoryStore {
    records: Mutex<BTreeMap<String, Vec<u8>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> io::Result<std::sync::MutexGuard<'_, BTreeMap<String, Vec<u8>>>> {
        self.records
            .lock()
            .map_err(|_| io::Error::other("memory store lock poisoned"))
    }
}

impl KeyValueStore for MemoryStore {
    fn list(&self) -> io::Result<Vec<String>> {
        Ok(self.lock()?.keys().cloned().collect())
    }

    fn read(&self, key: &str) -> io::Result<Vec<u8>> {
        self.lock()?.get(key).cloned().ok_or_else(|| {
            io::Error::new(io::ErrorKind::NotFound, format!("no record for '{key}'"))
        })
    }

    fn store(&self, key: &str, data: &[u8]) -> io::Result<()> {
        self.lock()?.insert(key.to_string(), data.to_vec());
        Ok(())
    }

    fn delete(&self, key: &str) -> io::Result<()> {
        self.lock()?
            .remove(key)
            .map(|_| ())
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, format!("no record for '{key}'")))
    }
}
