//! Storage port describing the durable blob store behind the snapshot cache.

use std::io;

use async_trait::async_trait;
use serde::{Serialize, de::DeserializeOwned};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("storage i/o failed for `{key}`: {source}")]
    Io {
        key: String,
        #[source]
        source: io::Error,
    },
    #[error("failed to encode `{key}`: {source}")]
    Encode {
        key: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("failed to decode `{key}`: {source}")]
    Decode {
        key: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("storage unavailable: {0}")]
    Unavailable(String),
}

impl StorageError {
    pub fn io(key: &str, source: io::Error) -> Self {
        Self::Io {
            key: key.to_string(),
            source,
        }
    }
}

/// Durable string-keyed blob store.
///
/// A completed `put` or `delete` must be visible to every `get` issued after it returns.
#[async_trait]
pub trait SnapshotStorage: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StorageError>;

    async fn put(&self, key: &str, value: Vec<u8>) -> Result<(), StorageError>;

    /// Remove `key`. Deleting an absent key succeeds.
    async fn delete(&self, key: &str) -> Result<(), StorageError>;
}

/// Read and decode a JSON value, returning `None` when the key is absent.
pub async fn read_json<T>(
    storage: &dyn SnapshotStorage,
    key: &str,
) -> Result<Option<T>, StorageError>
where
    T: DeserializeOwned,
{
    match storage.get(key).await? {
        Some(bytes) => serde_json::from_slice(&bytes)
            .map(Some)
            .map_err(|source| StorageError::Decode {
                key: key.to_string(),
                source,
            }),
        None => Ok(None),
    }
}

/// Encode a value as JSON and store it under `key`.
pub async fn write_json<T>(
    storage: &dyn SnapshotStorage,
    key: &str,
    value: &T,
) -> Result<(), StorageError>
where
    T: Serialize + ?Sized,
{
    let bytes = serde_json::to_vec(value).map_err(|source| StorageError::Encode {
        key: key.to_string(),
        source,
    })?;
    storage.put(key, bytes).await
}
