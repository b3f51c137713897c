use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError};

use serde::Serialize;
use serde::de::DeserializeOwned;
use thiserror::Error;
use tracing::{debug, info};

#[derive(Error, Debug)]
pub enum DocumentError {
    #[error("I/O error on {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed JSON in {path}: {source}")]
    Json {
        path: String,
        #[source]
        source: serde_json::Error,
    },
}

/// Serialized document contents, numbered in the order they were taken.
#[derive(Debug)]
pub struct Snapshot {
    version: u64,
    bytes: Vec<u8>,
}

/// A whole-document JSON file. Reads return the full value, writes replace it.
///
/// Saves go through `<file>.tmp` + `sync_all` + rename so a crash mid-write
/// leaves either the previous document or the new one, never a truncated file.
///
/// Owners take a [`Snapshot`] while holding their own lock and [`write`](Self::write)
/// it after releasing that lock. A snapshot older than the last one written is
/// skipped, so the file never goes back in time.
#[derive(Debug)]
pub struct JsonDocument {
    path: PathBuf,
    next_version: AtomicU64,
    written: Mutex<u64>,
}

impl JsonDocument {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            next_version: AtomicU64::new(1),
            written: Mutex::new(0),
        }
    }

    /// Load the document. A missing file yields `T::default()`.
    pub fn load<T>(&self) -> Result<T, DocumentError>
    where
        T: DeserializeOwned + Default,
    {
        let bytes = match std::fs::read(&self.path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                info!(path = %self.path.display(), "no document found, starting empty");
                return Ok(T::default());
            }
            Err(source) => return Err(self.io_error(source)),
        };

        if bytes.iter().all(u8::is_ascii_whitespace) {
            return Ok(T::default());
        }

        serde_json::from_slice(&bytes).map_err(|source| DocumentError::Json {
            path: self.path.display().to_string(),
            source,
        })
    }

    /// Serialize `value` for a later [`write`](Self::write).
    pub fn snapshot<T>(&self, value: &T) -> Result<Snapshot, DocumentError>
    where
        T: Serialize + ?Sized,
    {
        let bytes = serde_json::to_vec_pretty(value).map_err(|source| DocumentError::Json {
            path: self.path.display().to_string(),
            source,
        })?;
        Ok(Snapshot {
            version: self.next_version.fetch_add(1, Ordering::Relaxed),
            bytes,
        })
    }

    /// Atomically replace the document on disk with `snapshot`.
    /// Returns false when a newer snapshot was already written.
    pub fn write(&self, snapshot: Snapshot) -> Result<bool, DocumentError> {
        let mut written = self.written.lock().unwrap_or_else(PoisonError::into_inner);
        if snapshot.version <= *written {
            debug!(path = %self.path.display(), version = snapshot.version, "stale snapshot skipped");
            return Ok(false);
        }

        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent).map_err(|e| self.io_error(e))?;
        }

        let temp_path = self.temp_path();
        let mut file = std::fs::File::create(&temp_path).map_err(|e| self.io_error(e))?;
        file.write_all(&snapshot.bytes).map_err(|e| self.io_error(e))?;
        file.sync_all().map_err(|e| self.io_error(e))?;
        drop(file);

        std::fs::rename(&temp_path, &self.path).map_err(|e| self.io_error(e))?;
        *written = snapshot.version;

        debug!(path = %self.path.display(), bytes = snapshot.bytes.len(), "document saved");
        Ok(true)
    }

    /// Snapshot and write in one step.
    pub fn save<T>(&self, value: &T) -> Result<(), DocumentError>
    where
        T: Serialize + ?Sized,
    {
        let snapshot = self.snapshot(value)?;
        self.write(snapshot).map(|_| ())
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_default();
        name.push(".tmp");
        self.path.with_file_name(name)
    }

    fn io_error(&self, source: std::io::Error) -> DocumentError {
        DocumentError::Io {
            path: self.path.display().to_string(),
            source,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn scratch_dir() -> PathBuf {
        let dir = std::env::temp_dir().join(format!("relay-doc-{}", uuid::Uuid::new_v4()));
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[test]
    fn test_missing_file_loads_default() {
        let doc = JsonDocument::new(scratch_dir().join("absent.json"));
        let value: BTreeMap<String, u32> = doc.load().unwrap();
        assert!(value.is_empty());
    }

    #[test]
    fn test_save_then_load() {
        let doc = JsonDocument::new(scratch_dir().join("doc.json"));
        let mut value = BTreeMap::new();
        value.insert("a".to_string(), 1u32);
        value.insert("b".to_string(), 2u32);
        doc.save(&value).unwrap();

        let loaded: BTreeMap<String, u32> = doc.load().unwrap();
        assert_eq!(loaded, value);
    }

    #[test]
    fn test_save_leaves_no_temp_file() {
        let dir = scratch_dir();
        let doc = JsonDocument::new(dir.join("doc.json"));
        doc.save(&vec!["x".to_string()]).unwrap();
        assert!(!dir.join("doc.json.tmp").exists());
        assert!(dir.join("doc.json").exists());
    }

    #[test]
    fn test_save_replaces_previous_document() {
        let doc = JsonDocument::new(scratch_dir().join("doc.json"));
        doc.save(&vec!["old".to_string(), "older".to_string()]).unwrap();
        doc.save(&vec!["new".to_string()]).unwrap();
        let loaded: Vec<String> = doc.load().unwrap();
        assert_eq!(loaded, vec!["new".to_string()]);
    }

    #[test]
    fn test_creates_parent_directories() {
        let doc = JsonDocument::new(scratch_dir().join("nested/deeper/doc.json"));
        doc.save(&vec![1u8]).unwrap();
        let loaded: Vec<u8> = doc.load().unwrap();
        assert_eq!(loaded, vec![1]);
    }

    #[test]
    fn test_corrupt_file_is_an_error() {
        let dir = scratch_dir();
        std::fs::write(dir.join("doc.json"), b"{ not json").unwrap();
        let doc = JsonDocument::new(dir.join("doc.json"));
        let result: Result<Vec<String>, _> = doc.load();
        assert!(matches!(result, Err(DocumentError::Json { .. })));
    }

    #[test]
    fn test_stale_snapshot_does_not_overwrite_newer() {
        let doc = JsonDocument::new(scratch_dir().join("doc.json"));
        let older = doc.snapshot(&vec!["older".to_string()]).unwrap();
        let newer = doc.snapshot(&vec!["newer".to_string()]).unwrap();

        assert!(doc.write(newer).unwrap());
        assert!(!doc.write(older).unwrap());
        let loaded: Vec<String> = doc.load().unwrap();
        assert_eq!(loaded, vec!["newer".to_string()]);
    }

    #[test]
    fn test_write_fails_when_parent_is_a_file() {
        let dir = scratch_dir();
        std::fs::write(dir.join("blocker"), b"").unwrap();
        let doc = JsonDocument::new(dir.join("blocker/doc.json"));
        assert!(matches!(doc.save(&vec![1u8]), Err(DocumentError::Io { .. })));
    }

    #[test]
    fn test_blank_file_loads_default() {
        let dir = scratch_dir();
        std::fs::write(dir.join("doc.json"), b"  \n").unwrap();
        let doc = JsonDocument::new(dir.join("doc.json"));
        let value: Vec<String> = doc.load().unwrap();
        assert!(value.is_empty());
    }
}
