//! Whole-value key/value snapshot backends.

use std::collections::HashMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::RwLock;

use async_trait::async_trait;
use tokio::fs;

use crate::errors::AppError;

#[async_trait]
pub trait SnapshotStore: Send + Sync {
    /// Returns `None` when the slot has never been written.
    async fn read(&self, key: &str) -> Result<Option<String>, AppError>;

    async fn write(&self, key: &str, value: &str) -> Result<(), AppError>;
}

/// One `<key>.json` file per slot under a data directory.
pub struct FileSnapshotStore {
    dir: PathBuf,
}

impl FileSnapshotStore {
    pub async fn open(dir: impl AsRef<Path>) -> Result<Self, AppError> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir).await?;
        Ok(Self { dir })
    }

    fn path_for(&self, key: &str) -> Result<PathBuf, AppError> {
        if key.is_empty() || !key.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_') {
            return Err(AppError::Storage(format!("Invalid snapshot key '{}'", key)));
        }
        Ok(self.dir.join(format!("{}.json", key)))
    }
}

#[async_trait]
impl SnapshotStore for FileSnapshotStore {
    async fn read(&self, key: &str) -> Result<Option<String>, AppError> {
        match fs::read_to_string(self.path_for(key)?).await {
            Ok(contents) => Ok(Some(contents)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn write(&self, key: &str, value: &str) -> Result<(), AppError> {
        let path = self.path_for(key)?;
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, value).await?;
        fs::rename(&tmp, &path).await?;
        Ok(())
    }
}

/// In-memory implementation for development and testing
#[derive(Default)]
pub struct InMemorySnapshotStore {
    slots: RwLock<HashMap<String, String>>,
}

impl InMemorySnapshotStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SnapshotStore for InMemorySnapshotStore {
    async fn read(&self, key: &str) -> Result<Option<String>, AppError> {
        let slots = self
            .slots
            .read()
            .map_err(|e| AppError::Storage(e.to_string()))?;
        Ok(slots.get(key).cloned())
    }

    async fn write(&self, key: &str, value: &str) -> Result<(), AppError> {
        let mut slots = self
            .slots
            .write()
            .map_err(|e| AppError::Storage(e.to_string()))?;
        slots.insert(key.to_string(), value.to_string());
        Ok(())
    }
}
