//! Blob storage for committed images.
//!
//! The transfer core persists exactly one named blob per committed session.
//! Stores enforce a byte quota, and overwriting a blob only needs space for
//! the size difference.

use crate::MAX_IMAGE_SIZE;
use crate::config::is_plain_name;
use crate::error::StorageError;
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

/// Named blob persistence
pub trait BlobStore: Send {
    /// Persist `data` under `name`, replacing any previous blob.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` if the name is invalid, the blob is too large,
    /// the quota would be exceeded, or the write fails. A failed save leaves
    /// any previous blob intact.
    fn save(&mut self, name: &str, data: &[u8]) -> Result<(), StorageError>;

    /// Load the blob stored under `name`.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::NotFound` if no such blob exists.
    fn load(&self, name: &str) -> Result<Vec<u8>, StorageError>;

    /// Check if a blob exists
    fn exists(&self, name: &str) -> bool;

    /// Remove the blob stored under `name`.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::NotFound` if no such blob exists.
    fn delete(&mut self, name: &str) -> Result<(), StorageError>;

    /// Bytes still available under the quota
    fn free_space(&self) -> u64;
}

fn check_blob(name: &str, len: usize) -> Result<(), StorageError> {
    if !is_plain_name(name) {
        return Err(StorageError::InvalidName(name.to_string()));
    }
    if len > MAX_IMAGE_SIZE {
        return Err(StorageError::TooLarge {
            size: len,
            max: MAX_IMAGE_SIZE,
        });
    }
    Ok(())
}

fn check_space(needed: u64, replaced: u64, used: u64, quota: u64) -> Result<(), StorageError> {
    let available = quota.saturating_sub(used) + replaced;
    if needed > available {
        return Err(StorageError::NoSpace { needed, available });
    }
    Ok(())
}

/// In-memory blob store
#[derive(Debug, Clone)]
pub struct MemoryStore {
    blobs: HashMap<String, Vec<u8>>,
    quota: u64,
}

impl MemoryStore {
    /// Create an empty store with the given quota
    #[must_use]
    pub fn new(quota: u64) -> Self {
        Self {
            blobs: HashMap::new(),
            quota,
        }
    }

    fn used(&self) -> u64 {
        self.blobs.values().map(|b| b.len() as u64).sum()
    }

    /// Number of stored blobs
    #[must_use]
    pub fn len(&self) -> usize {
        self.blobs.len()
    }

    /// Check if the store is empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.blobs.is_empty()
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new(MAX_IMAGE_SIZE as u64)
    }
}

impl BlobStore for MemoryStore {
    fn save(&mut self, name: &str, data: &[u8]) -> Result<(), StorageError> {
        check_blob(name, data.len())?;
        let replaced = self.blobs.get(name).map_or(0, |b| b.len() as u64);
        check_space(data.len() as u64, replaced, self.used(), self.quota)?;

        self.blobs.insert(name.to_string(), data.to_vec());
        tracing::debug!("Stored {} ({} bytes) in memory", name, data.len());
        Ok(())
    }

    fn load(&self, name: &str) -> Result<Vec<u8>, StorageError> {
        self.blobs
            .get(name)
            .cloned()
            .ok_or_else(|| StorageError::NotFound(name.to_string()))
    }

    fn exists(&self, name: &str) -> bool {
        self.blobs.contains_key(name)
    }

    fn delete(&mut self, name: &str) -> Result<(), StorageError> {
        self.blobs
            .remove(name)
            .map(|_| ())
            .ok_or_else(|| StorageError::NotFound(name.to_string()))
    }

    fn free_space(&self) -> u64 {
        self.quota.saturating_sub(self.used())
    }
}

/// Directory-backed blob store.
///
/// Each blob is one file directly under the root. Writes go to a hidden
/// temporary file first and are renamed into place.
#[derive(Debug, Clone)]
pub struct FsStore {
    root: PathBuf,
    quota: u64,
}

impl FsStore {
    /// Open a store rooted at `root`, creating the directory if needed.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::Io` if the directory cannot be created.
    pub fn open(root: impl Into<PathBuf>, quota: u64) -> Result<Self, StorageError> {
        let root = root.into();
        fs::create_dir_all(&root)?;
        tracing::debug!("Opened blob store at {}", root.display());
        Ok(Self { root, quota })
    }

    /// Store root directory
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path(&self, name: &str) -> PathBuf {
        self.root.join(name)
    }

    fn used(&self) -> u64 {
        let Ok(entries) = fs::read_dir(&self.root) else {
            return 0;
        };
        entries
            .filter_map(Result::ok)
            .filter(|e| !e.file_name().to_string_lossy().starts_with('.'))
            .filter_map(|e| e.metadata().ok())
            .filter(fs::Metadata::is_file)
            .map(|m| m.len())
            .sum()
    }
}

impl BlobStore for FsStore {
    fn save(&mut self, name: &str, data: &[u8]) -> Result<(), StorageError> {
        check_blob(name, data.len())?;
        let path = self.path(name);
        let replaced = fs::metadata(&path).map_or(0, |m| m.len());
        check_space(data.len() as u64, replaced, self.used(), self.quota)?;

        let tmp = self.root.join(format!(".{name}.tmp"));
        if let Err(err) = fs::write(&tmp, data).and_then(|()| fs::rename(&tmp, &path)) {
            let _ = fs::remove_file(&tmp);
            return Err(err.into());
        }

        tracing::debug!("Stored {} ({} bytes)", path.display(), data.len());
        Ok(())
    }

    fn load(&self, name: &str) -> Result<Vec<u8>, StorageError> {
        if !is_plain_name(name) {
            return Err(StorageError::InvalidName(name.to_string()));
        }
        fs::read(self.path(name)).map_err(|err| match err.kind() {
            std::io::ErrorKind::NotFound => StorageError::NotFound(name.to_string()),
            _ => err.into(),
        })
    }

    fn exists(&self, name: &str) -> bool {
        is_plain_name(name) && self.path(name).is_file()
    }

    fn delete(&mut self, name: &str) -> Result<(), StorageError> {
        if !self.exists(name) {
            return Err(StorageError::NotFound(name.to_string()));
        }
        fs::remove_file(self.path(name))?;
        Ok(())
    }

    fn free_space(&self) -> u64 {
        self.quota.saturating_sub(self.used())
    }
}
