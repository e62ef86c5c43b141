use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use sha2::{Digest, Sha256};
use tokio::{fs, io::AsyncWriteExt};
use uuid::Uuid;

use crate::application::storage::{SnapshotStorage, StorageError};

const ENTRY_EXTENSION: &str = "json";

/// Filesystem-backed storage with one file per storage key.
///
/// File names are the SHA-256 of the key, so arbitrary paths and query strings map to
/// safe names. Writes go to a temporary file that is renamed into place, so readers
/// never observe a partial entry.
#[derive(Debug, Clone)]
pub struct FsStorage {
    root: PathBuf,
}

impl FsStorage {
    /// Open storage rooted at `root`, creating the directory if necessary.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self, std::io::Error> {
        let root = root.into();
        std::fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn entry_path(&self, key: &str) -> PathBuf {
        let digest = Sha256::digest(key.as_bytes());
        self.root
            .join(format!("{}.{ENTRY_EXTENSION}", hex::encode(digest)))
    }
}

#[async_trait]
impl SnapshotStorage for FsStorage {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StorageError> {
        match fs::read(self.entry_path(key)).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(None),
            Err(err) => Err(StorageError::io(key, err)),
        }
    }

    async fn put(&self, key: &str, value: Vec<u8>) -> Result<(), StorageError> {
        let target = self.entry_path(key);
        let staging = self.root.join(format!(".{}.tmp", Uuid::new_v4()));

        let written = async {
            let mut file = fs::File::create(&staging).await?;
            file.write_all(&value).await?;
            file.sync_all().await?;
            drop(file);
            fs::rename(&staging, &target).await
        }
        .await;

        if let Err(err) = written {
            let _ = fs::remove_file(&staging).await;
            return Err(StorageError::io(key, err));
        }
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), StorageError> {
        match fs::remove_file(self.entry_path(key)).await {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
            Err(err) => Err(StorageError::io(key, err)),
        }
    }
}
