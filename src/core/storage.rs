//! Key-value storage backing the session token and the conversation list.
//!
//! Values are opaque strings. Three backends exist: a directory of files for
//! normal use, the platform keyring for secrets, and an in-memory map used by
//! headless runs and tests.

use std::collections::HashMap;
use std::error::Error as StdError;
use std::fmt;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use keyring::Entry;
use tempfile::NamedTempFile;

use crate::core::config::data::path_display;

pub trait Storage: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>, StorageError>;
    fn set(&self, key: &str, value: &str) -> Result<(), StorageError>;
    fn remove(&self, key: &str) -> Result<(), StorageError>;
}

#[derive(Debug)]
pub enum StorageError {
    /// Keys double as file names, so only a conservative character set is allowed.
    InvalidKey(String),

    Io {
        path: PathBuf,
        source: io::Error,
    },

    Keyring {
        key: String,
        source: keyring::Error,
    },

    /// A value could not be serialized before storing it.
    Encode(serde_json::Error),

    /// A previous holder of the in-memory map panicked.
    Poisoned,
}

impl fmt::Display for StorageError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StorageError::InvalidKey(key) => write!(f, "Invalid storage key: {key:?}"),
            StorageError::Io { path, source } => {
                write!(f, "Storage access failed at {}: {}", path_display(path), source)
            }
            StorageError::Keyring { key, source } => {
                write!(f, "Keyring access failed for {key}: {source}")
            }
            StorageError::Encode(err) => write!(f, "Could not encode value: {err}"),
            StorageError::Poisoned => write!(f, "In-memory storage is poisoned"),
        }
    }
}

impl StdError for StorageError {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        match self {
            StorageError::Io { source, .. } => Some(source),
            StorageError::Keyring { source, .. } => Some(source),
            StorageError::Encode(source) => Some(source),
            StorageError::InvalidKey(_) | StorageError::Poisoned => None,
        }
    }
}

impl<T> From<PoisonError<T>> for StorageError {
    fn from(_: PoisonError<T>) -> Self {
        StorageError::Poisoned
    }
}

fn validate_key(key: &str) -> Result<(), StorageError> {
    let valid = !key.is_empty()
        && key
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
    if valid {
        Ok(())
    } else {
        Err(StorageError::InvalidKey(key.to_string()))
    }
}

/// One file per key inside a data directory. Writes go through a temporary
/// file in the same directory and are renamed into place.
#[derive(Debug, Clone)]
pub struct FileStorage {
    dir: PathBuf,
}

impl FileStorage {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, key: &str) -> Result<PathBuf, StorageError> {
        validate_key(key)?;
        Ok(self.dir.join(key))
    }
}

impl Storage for FileStorage {
    fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        let path = self.path_for(key)?;
        match fs::read_to_string(&path) {
            Ok(contents) => Ok(Some(contents)),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(source) => Err(StorageError::Io { path, source }),
        }
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StorageError> {
        let path = self.path_for(key)?;
        let io_err = |source| StorageError::Io {
            path: path.clone(),
            source,
        };

        fs::create_dir_all(&self.dir).map_err(io_err)?;
        let mut temp_file = NamedTempFile::new_in(&self.dir).map_err(io_err)?;
        temp_file.write_all(value.as_bytes()).map_err(io_err)?;
        temp_file.as_file_mut().sync_all().map_err(io_err)?;
        temp_file.persist(&path).map_err(|err| io_err(err.error))?;
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), StorageError> {
        let path = self.path_for(key)?;
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(source) => Err(StorageError::Io { path, source }),
        }
    }
}

/// Stores each key as a password entry under one keyring service.
#[derive(Debug, Clone)]
pub struct KeyringStorage {
    service: String,
}

impl KeyringStorage {
    pub fn new(service: impl Into<String>) -> Self {
        Self {
            service: service.into(),
        }
    }

    fn entry(&self, key: &str) -> Result<Entry, StorageError> {
        validate_key(key)?;
        Entry::new(&self.service, key).map_err(|source| StorageError::Keyring {
            key: key.to_string(),
            source,
        })
    }
}

impl Storage for KeyringStorage {
    fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        match self.entry(key)?.get_password() {
            Ok(value) => Ok(Some(value)),
            Err(keyring::Error::NoEntry) => Ok(None),
            Err(source) => Err(StorageError::Keyring {
                key: key.to_string(),
                source,
            }),
        }
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StorageError> {
        self.entry(key)?
            .set_password(value)
            .map_err(|source| StorageError::Keyring {
                key: key.to_string(),
                source,
            })
    }

    fn remove(&self, key: &str) -> Result<(), StorageError> {
        match self.entry(key)?.delete_credential() {
            Ok(()) | Err(keyring::Error::NoEntry) => Ok(()),
            Err(source) => Err(StorageError::Keyring {
                key: key.to_string(),
                source,
            }),
        }
    }
}

#[derive(Debug, Default)]
pub struct MemoryStorage {
    entries: Mutex<HashMap<String, String>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Storage for MemoryStorage {
    fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        validate_key(key)?;
        Ok(self.entries.lock()?.get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StorageError> {
        validate_key(key)?;
        self.entries
            .lock()?
            .insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), StorageError> {
        validate_key(key)?;
        self.entries.lock()?.remove(key);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn file_storage_round_trips_values() {
        let temp_dir = TempDir::new().expect("temp dir");
        let storage = FileStorage::new(temp_dir.path().join("data"));

        assert_eq!(storage.get("token").expect("get"), None);
        storage.set("token", "abc").expect("set");
        assert_eq!(storage.get("token").expect("get").as_deref(), Some("abc"));

        storage.set("token", "def").expect("overwrite");
        assert_eq!(storage.get("token").expect("get").as_deref(), Some("def"));

        storage.remove("token").expect("remove");
        assert_eq!(storage.get("token").expect("get"), None);
        storage.remove("token").expect("removing twice is fine");
    }

    #[test]
    fn keys_that_could_escape_the_directory_are_rejected() {
        let temp_dir = TempDir::new().expect("temp dir");
        let storage = FileStorage::new(temp_dir.path());

        for key in ["", "../token", "a/b", "with space"] {
            assert!(
                matches!(storage.set(key, "x"), Err(StorageError::InvalidKey(_))),
                "key {key:?} should be rejected"
            );
        }
    }

    #[test]
    fn memory_storage_behaves_like_a_map() {
        let storage = MemoryStorage::new();
        storage.set("conversations", "[]").expect("set");
        assert_eq!(
            storage.get("conversations").expect("get").as_deref(),
            Some("[]")
        );
        storage.remove("conversations").expect("remove");
        assert_eq!(storage.get("conversations").expect("get"), None);
    }
}
