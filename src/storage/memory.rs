use alloy_primitives::keccak256;
use std::collections::HashMap;
use tokio::sync::RwLock;

use crate::storage::{
    RootHash, StorageBackend, StorageError, StoragePayload, StorageReceipt, StreamId,
};

/// Content-addressed storage held in process memory.
///
/// Files are keyed by the keccak256 of their bytes. Key-value writes overwrite
/// the previous value of the same key in the same stream. No ledger is
/// involved, so receipts never carry a transaction hash.
#[derive(Debug, Default)]
pub struct InMemoryStorage {
    files: RwLock<HashMap<RootHash, Vec<u8>>>,
    values: RwLock<HashMap<(StreamId, String), Vec<u8>>>,
}

#[cfg(test)]
impl InMemoryStorage {
    pub(crate) async fn file_count(&self) -> usize {
        self.files.read().await.len()
    }
}

/// Root hash of a key-value entry: keccak256 over stream, key length, key and value.
fn entry_hash(stream_id: &StreamId, key: &str, value: &[u8]) -> RootHash {
    let mut preimage = Vec::with_capacity(32 + 8 + key.len() + value.len());
    preimage.extend_from_slice(stream_id.as_b256().as_slice());
    preimage.extend_from_slice(&(key.len() as u64).to_be_bytes());
    preimage.extend_from_slice(key.as_bytes());
    preimage.extend_from_slice(value);
    keccak256(preimage)
}

impl StorageBackend for InMemoryStorage {
    async fn upload(&self, payload: StoragePayload) -> Result<StorageReceipt, StorageError> {
        let root_hash = match payload {
            StoragePayload::File { name, bytes } => {
                let root_hash = keccak256(&bytes);
                tracing::debug!(%root_hash, %name, size = bytes.len(), "Stored file in memory");
                self.files.write().await.insert(root_hash, bytes);
                root_hash
            }
            StoragePayload::KeyValue {
                stream_id,
                key,
                value,
            } => {
                let root_hash = entry_hash(&stream_id, &key, &value);
                tracing::debug!(%root_hash, %stream_id, %key, "Stored value in memory");
                self.values.write().await.insert((stream_id, key), value);
                root_hash
            }
        };
        Ok(StorageReceipt {
            root_hash,
            tx_hash: None,
        })
    }

    async fn download_file(&self, root_hash: RootHash) -> Result<Vec<u8>, StorageError> {
        self.files
            .read()
            .await
            .get(&root_hash)
            .cloned()
            .ok_or_else(|| StorageError::NotFound(format!("file {root_hash}")))
    }

    async fn download_value(&self, stream_id: StreamId, key: &str) -> Result<Vec<u8>, StorageError> {
        self.values
            .read()
            .await
            .get(&(stream_id, key.to_string()))
            .cloned()
            .ok_or_else(|| StorageError::NotFound(format!("key '{key}' in stream {stream_id}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_file_is_content_addressed() {
        let storage = InMemoryStorage::default();
        let bytes = b"\x89PNG\r\n".to_vec();
        let first = storage
            .upload(StoragePayload::File {
                name: "a.png".into(),
                bytes: bytes.clone(),
            })
            .await
            .unwrap();
        let second = storage
            .upload(StoragePayload::File {
                name: "b.png".into(),
                bytes: bytes.clone(),
            })
            .await
            .unwrap();
        assert_eq!(first.root_hash, keccak256(&bytes));
        assert_eq!(first, second);
        assert_eq!(storage.file_count().await, 1);
        assert_eq!(storage.download_file(first.root_hash).await.unwrap(), bytes);
    }

    #[tokio::test]
    async fn test_values_are_partitioned_by_stream() {
        let storage = InMemoryStorage::default();
        let other: StreamId = "0x2".parse().unwrap();
        storage
            .upload(StoragePayload::KeyValue {
                stream_id: StreamId::DEFAULT,
                key: "name".into(),
                value: b"alice".to_vec(),
            })
            .await
            .unwrap();
        storage
            .upload(StoragePayload::KeyValue {
                stream_id: other,
                key: "name".into(),
                value: b"bob".to_vec(),
            })
            .await
            .unwrap();

        let alice = storage
            .download_value(StreamId::DEFAULT, "name")
            .await
            .unwrap();
        let bob = storage.download_value(other, "name").await.unwrap();
        assert_eq!(alice, b"alice");
        assert_eq!(bob, b"bob");
    }

    #[tokio::test]
    async fn test_unknown_content_is_not_found() {
        let storage = InMemoryStorage::default();
        assert!(matches!(
            storage.download_file(RootHash::ZERO).await,
            Err(StorageError::NotFound(_))
        ));
        assert!(matches!(
            storage.download_value(StreamId::DEFAULT, "missing").await,
            Err(StorageError::NotFound(_))
        ));
    }
}
