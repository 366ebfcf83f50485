//! Durable backends for the learning document
//!
//! The store only ever loads the full document or runs a read-modify-write
//! transaction against it. `JsonFileStorage` serialises writers with an
//! exclusive lock on a sidecar `.lock` file and replaces the document by
//! rename, so readers see either the old or the new document, never a torn one.

use chrono::Utc;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::{debug, warn};

use super::record::LearningDocument;
use crate::error::StoreError;

/// Mutation applied inside a storage transaction
pub type Mutation<'a> = &'a mut dyn FnMut(&mut LearningDocument) -> Result<(), StoreError>;

/// Backend holding the single learning document
pub trait DocumentStorage: Send + Sync {
    /// Read the current document. A missing or corrupt document yields an
    /// empty one.
    fn load(&self) -> Result<LearningDocument, StoreError>;

    /// Load, mutate and persist atomically with respect to other writers.
    /// Returns the document as written.
    fn transact(&self, mutate: Mutation<'_>) -> Result<LearningDocument, StoreError>;

    /// Human-readable location
    fn describe(&self) -> String;
}

/// JSON document on disk
pub struct JsonFileStorage {
    path: PathBuf,
    lock_path: PathBuf,
}

impl JsonFileStorage {
    pub fn new(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let path = path.into();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|source| StoreError::Io {
                path: parent.to_path_buf(),
                source,
            })?;
        }
        let mut lock_name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
        lock_name.push(".lock");
        let lock_path = path.with_file_name(lock_name);
        Ok(Self { path, lock_path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read_document(&self) -> Result<LearningDocument, StoreError> {
        let content = match std::fs::read(&self.path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Ok(LearningDocument::default());
            }
            Err(source) => {
                return Err(StoreError::Io {
                    path: self.path.clone(),
                    source,
                })
            }
        };

        // Bad UTF-8 is a decode failure like any other, not an I/O error
        serde_json::from_slice(&content).map_err(|e| StoreError::Corrupt {
            path: self.path.clone(),
            reason: e.to_string(),
        })
    }

    /// Move a corrupt document aside so its content is not lost outright
    fn quarantine(&self) {
        let mut name = self.path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
        name.push(format!(".corrupt-{}", Utc::now().format("%Y%m%dT%H%M%S")));
        let target = self.path.with_file_name(name);
        match std::fs::rename(&self.path, &target) {
            Ok(()) => warn!(backup = %target.display(), "Moved corrupt learning store aside"),
            Err(e) => warn!(error = %e, "Could not move corrupt learning store aside"),
        }
    }

    fn write_atomic(&self, doc: &LearningDocument) -> Result<(), StoreError> {
        let dir = self
            .path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        let io_err = |source| StoreError::Io {
            path: self.path.clone(),
            source,
        };

        let json = serde_json::to_vec_pretty(doc)?;
        let mut tmp = tempfile::NamedTempFile::new_in(dir).map_err(io_err)?;
        tmp.write_all(&json).map_err(io_err)?;
        tmp.as_file().sync_all().map_err(io_err)?;
        tmp.persist(&self.path).map_err(|e| io_err(e.error))?;
        Ok(())
    }

    fn open_lock_file(&self) -> Result<File, StoreError> {
        OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .read(true)
            .open(&self.lock_path)
            .map_err(|source| StoreError::Lock {
                path: self.lock_path.clone(),
                source,
            })
    }
}

impl DocumentStorage for JsonFileStorage {
    fn load(&self) -> Result<LearningDocument, StoreError> {
        let lock = fd_lock::RwLock::new(self.open_lock_file()?);
        let _guard = lock.read().map_err(|source| StoreError::Lock {
            path: self.lock_path.clone(),
            source,
        })?;

        match self.read_document() {
            Err(StoreError::Corrupt { path, reason }) => {
                warn!(path = %path.display(), %reason, "Learning store is corrupt, starting empty");
                Ok(LearningDocument::default())
            }
            other => other,
        }
    }

    fn transact(&self, mutate: Mutation<'_>) -> Result<LearningDocument, StoreError> {
        let mut lock = fd_lock::RwLock::new(self.open_lock_file()?);
        let _guard = lock.write().map_err(|source| StoreError::Lock {
            path: self.lock_path.clone(),
            source,
        })?;

        let mut doc = match self.read_document() {
            Err(StoreError::Corrupt { path, reason }) => {
                warn!(path = %path.display(), %reason, "Learning store is corrupt, reinitialising");
                self.quarantine();
                LearningDocument::default()
            }
            other => other?,
        };

        mutate(&mut doc)?;
        doc.touch();
        self.write_atomic(&doc)?;
        debug!(path = %self.path.display(), patterns = doc.patterns.len(), "Learning store written");
        Ok(doc)
    }

    fn describe(&self) -> String {
        self.path.display().to_string()
    }
}

/// Process-local backend for tests and embedding
#[derive(Default)]
pub struct MemoryStorage {
    doc: Mutex<LearningDocument>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

impl DocumentStorage for MemoryStorage {
    fn load(&self) -> Result<LearningDocument, StoreError> {
        self.doc
            .lock()
            .map(|d| d.clone())
            .map_err(|_| StoreError::Poisoned)
    }

    fn transact(&self, mutate: Mutation<'_>) -> Result<LearningDocument, StoreError> {
        let mut guard = self.doc.lock().map_err(|_| StoreError::Poisoned)?;
        // Mutate a copy so a failed mutation leaves the stored document intact
        let mut doc = guard.clone();
        mutate(&mut doc)?;
        doc.touch();
        *guard = doc.clone();
        Ok(doc)
    }

    fn describe(&self) -> String {
        "in-memory".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_missing_file_loads_empty() {
        let dir = TempDir::new().unwrap();
        let storage = JsonFileStorage::new(dir.path().join("learning_db.json")).unwrap();
        let doc = storage.load().unwrap();
        assert!(doc.patterns.is_empty());
    }

    #[test]
    fn test_transact_persists() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested/learning_db.json");
        let storage = JsonFileStorage::new(&path).unwrap();
        storage
            .transact(&mut |doc: &mut LearningDocument| {
                doc.record_mut("safe:formatting").observe(true);
                Ok(())
            })
            .unwrap();
        assert!(path.exists());
        let reloaded = JsonFileStorage::new(&path).unwrap().load().unwrap();
        assert_eq!(reloaded.patterns["safe:formatting"].success_count, 1);
    }

    #[test]
    fn test_corrupt_file_is_quarantined_on_write() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("learning_db.json");
        std::fs::write(&path, "{ not json").unwrap();
        let storage = JsonFileStorage::new(&path).unwrap();

        assert!(storage.load().unwrap().patterns.is_empty());

        storage
            .transact(&mut |doc: &mut LearningDocument| {
                doc.record_mut("unknown").observe(false);
                Ok(())
            })
            .unwrap();

        let backups: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().contains(".corrupt-"))
            .collect();
        assert_eq!(backups.len(), 1);
        assert_eq!(storage.load().unwrap().patterns["unknown"].failure_count, 1);
    }

    #[test]
    fn test_non_utf8_file_recovers_empty() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("learning_db.json");
        std::fs::write(&path, [0xff, 0xfe, 0x00, 0x7b]).unwrap();
        let storage = JsonFileStorage::new(&path).unwrap();

        assert!(storage.load().unwrap().patterns.is_empty());
        let doc = storage
            .transact(&mut |doc: &mut LearningDocument| {
                doc.record_mut("risky:security").observe(true);
                Ok(())
            })
            .unwrap();
        assert_eq!(doc.patterns["risky:security"].success_count, 1);
        assert_eq!(storage.load().unwrap().patterns.len(), 1);
    }

    #[test]
    fn test_failed_mutation_leaves_memory_document_intact() {
        let storage = MemoryStorage::new();
        let result = storage.transact(&mut |doc: &mut LearningDocument| {
            doc.record_mut("x").observe(true);
            Err(StoreError::UnknownCategory("x".into()))
        });
        assert!(result.is_err());
        assert!(storage.load().unwrap().patterns.is_empty());
    }
}
