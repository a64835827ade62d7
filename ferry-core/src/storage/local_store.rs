//! Directory-backed file store with whole-file atomic writes.

use std::collections::HashMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::fs;

use super::{StorageError, validate_filename};

/// Flat directory of shared files.
///
/// Writes go to a unique hidden temp file that is renamed over the target,
/// so a reader sees either the old or the new content in full. Writers of
/// the same name additionally queue on a per-name lock.
#[derive(Debug)]
pub struct LocalStore {
    root: PathBuf,
    write_locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl LocalStore {
    /// Opens the store, creating the directory if needed.
    ///
    /// # Errors
    ///
    /// - `StorageError::Io` - Directory could not be created
    pub fn open(root: impl Into<PathBuf>) -> Result<Self, StorageError> {
        let root = root.into();
        std::fs::create_dir_all(&root)?;
        Ok(Self {
            root,
            write_locks: Mutex::new(HashMap::new()),
        })
    }

    /// Directory backing this store.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Lists shared file names in sorted order.
    ///
    /// Subdirectories and hidden entries (including in-flight writes) are skipped.
    ///
    /// # Errors
    ///
    /// - `StorageError::Io` - Directory could not be read
    pub async fn list_files(&self) -> Result<Vec<String>, StorageError> {
        let mut entries = fs::read_dir(&self.root).await?;
        let mut names = Vec::new();

        while let Some(entry) = entries.next_entry().await? {
            if !entry.file_type().await?.is_file() {
                continue;
            }
            let Ok(name) = entry.file_name().into_string() else {
                tracing::debug!("Skipping non UTF-8 file name in {}", self.root.display());
                continue;
            };
            if validate_filename(&name).is_ok() {
                names.push(name);
            }
        }

        names.sort();
        Ok(names)
    }

    /// Whether `name` is currently shared. Invalid names are never shared.
    pub async fn contains(&self, name: &str) -> bool {
        if validate_filename(name).is_err() {
            return false;
        }
        fs::metadata(self.root.join(name))
            .await
            .map(|meta| meta.is_file())
            .unwrap_or(false)
    }

    /// Reads the full content of `name`, or `None` if it is not shared.
    ///
    /// # Errors
    ///
    /// - `StorageError::InvalidFilename` - Name is not a plain file name
    /// - `StorageError::Io` - File exists but could not be read
    pub async fn read(&self, name: &str) -> Result<Option<Vec<u8>>, StorageError> {
        validate_filename(name)?;
        let path = self.root.join(name);

        match fs::metadata(&path).await {
            Ok(meta) if meta.is_file() => {}
            Ok(_) => return Ok(None),
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        }

        match fs::read(&path).await {
            Ok(content) => Ok(Some(content)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Replaces the content of `name` atomically.
    ///
    /// # Errors
    ///
    /// - `StorageError::InvalidFilename` - Name is not a plain file name
    /// - `StorageError::Io` - Temp file could not be written or renamed
    pub async fn write(&self, name: &str, content: &[u8]) -> Result<(), StorageError> {
        validate_filename(name)?;

        let lock = self.write_lock(name);
        let result = {
            let _guard = lock.lock().await;
            self.write_via_rename(name, content).await
        };
        self.release_write_lock(name, lock);

        result
    }

    async fn write_via_rename(&self, name: &str, content: &[u8]) -> Result<(), StorageError> {
        let target = self.root.join(name);
        let temp = self
            .root
            .join(format!(".{name}.{}.tmp", uuid::Uuid::new_v4().simple()));

        if let Err(e) = fs::write(&temp, content).await {
            let _ = fs::remove_file(&temp).await;
            return Err(e.into());
        }
        if let Err(e) = fs::rename(&temp, &target).await {
            let _ = fs::remove_file(&temp).await;
            return Err(e.into());
        }

        tracing::debug!("Stored {} ({} bytes)", target.display(), content.len());
        Ok(())
    }

    fn write_lock(&self, name: &str) -> Arc<tokio::sync::Mutex<()>> {
        Arc::clone(self.write_locks.lock().entry(name.to_string()).or_default())
    }

    fn release_write_lock(&self, name: &str, lock: Arc<tokio::sync::Mutex<()>>) {
        let mut locks = self.write_locks.lock();
        // Clones are only handed out under this map lock, so two owners means map + us.
        if Arc::strong_count(&lock) == 2 {
            locks.remove(name);
        }
    }

    #[cfg(test)]
    fn pending_write_locks(&self) -> usize {
        self.write_locks.lock().len()
    }
}
