//! Storage collaborator.
//!
//! The storage network is opaque: it takes a file or a key-value entry and
//! answers with a content hash and, for writes, the transaction that recorded
//! it on the storage network's ledger. [`StorageBackend`] is the seam;
//! [`gateway::HttpStorageGateway`] talks to a remote gateway and
//! [`memory::InMemoryStorage`] keeps everything in process.

pub mod gateway;
pub mod media;
pub mod memory;

use alloy_primitives::{B256, TxHash};
use reqwest::StatusCode;
use serde::{Deserialize, Deserializer, Serialize, Serializer, de};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use crate::config::StorageConfig;
use gateway::HttpStorageGateway;
use memory::InMemoryStorage;

/// Content-derived identifier of an uploaded file.
pub type RootHash = B256;

/// Key-value namespace on the storage network, a 32-byte value.
///
/// Parsed from hex; shorter strings are left-padded with zeros, so `0x1`
/// is the same stream as the default [`StreamId::DEFAULT`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StreamId(B256);

impl StreamId {
    pub const DEFAULT: StreamId = StreamId(B256::with_last_byte(1));

    pub fn as_b256(&self) -> B256 {
        self.0
    }
}

impl Default for StreamId {
    fn default() -> Self {
        Self::DEFAULT
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid stream id '{0}': expected up to 64 hex characters")]
pub struct StreamIdError(String);

impl FromStr for StreamId {
    type Err = StreamIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let digits = s.trim();
        let digits = digits.strip_prefix("0x").unwrap_or(digits);
        let valid = !digits.is_empty()
            && digits.len() <= 64
            && digits.chars().all(|c| c.is_ascii_hexdigit());
        if !valid {
            return Err(StreamIdError(s.to_string()));
        }
        let padded = format!("0x{digits:0>64}");
        B256::from_str(&padded)
            .map(StreamId)
            .map_err(|_| StreamIdError(s.to_string()))
    }
}

impl fmt::Display for StreamId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl Serialize for StreamId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for StreamId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        StreamId::from_str(&s).map_err(de::Error::custom)
    }
}

/// What a gated write stores.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoragePayload {
    File {
        name: String,
        bytes: Vec<u8>,
    },
    KeyValue {
        stream_id: StreamId,
        key: String,
        value: Vec<u8>,
    },
}

impl StoragePayload {
    pub fn kind(&self) -> &'static str {
        match self {
            StoragePayload::File { .. } => "file",
            StoragePayload::KeyValue { .. } => "kv",
        }
    }

    pub fn len(&self) -> usize {
        match self {
            StoragePayload::File { bytes, .. } => bytes.len(),
            StoragePayload::KeyValue { value, .. } => value.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// The storage network's answer to a write.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StorageReceipt {
    pub root_hash: RootHash,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tx_hash: Option<TxHash>,
}

/// Errors that can occur while talking to the storage collaborator.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("Content not found: {0}")]
    NotFound(String),
    #[error("URL parse error: {context}: {source}")]
    UrlParse {
        context: &'static str,
        #[source]
        source: url::ParseError,
    },
    #[error("HTTP error: {context}: {source}")]
    Http {
        context: &'static str,
        #[source]
        source: reqwest::Error,
    },
    #[error("Failed to deserialize JSON: {context}: {source}")]
    JsonDeserialization {
        context: &'static str,
        #[source]
        source: reqwest::Error,
    },
    #[error("Unexpected HTTP status {status}: {context}: {body}")]
    HttpStatus {
        context: &'static str,
        status: StatusCode,
        body: String,
    },
    #[error("Failed to read response body: {context}: {source}")]
    ResponseBodyRead {
        context: &'static str,
        #[source]
        source: reqwest::Error,
    },
}

/// Trait defining the asynchronous interface to the storage network.
pub trait StorageBackend {
    /// Stores `payload` and returns where it ended up.
    fn upload(
        &self,
        payload: StoragePayload,
    ) -> impl Future<Output = Result<StorageReceipt, StorageError>> + Send;

    fn download_file(
        &self,
        root_hash: RootHash,
    ) -> impl Future<Output = Result<Vec<u8>, StorageError>> + Send;

    fn download_value(
        &self,
        stream_id: StreamId,
        key: &str,
    ) -> impl Future<Output = Result<Vec<u8>, StorageError>> + Send;
}

impl<T: StorageBackend> StorageBackend for Arc<T> {
    fn upload(
        &self,
        payload: StoragePayload,
    ) -> impl Future<Output = Result<StorageReceipt, StorageError>> + Send {
        self.as_ref().upload(payload)
    }

    fn download_file(
        &self,
        root_hash: RootHash,
    ) -> impl Future<Output = Result<Vec<u8>, StorageError>> + Send {
        self.as_ref().download_file(root_hash)
    }

    fn download_value(
        &self,
        stream_id: StreamId,
        key: &str,
    ) -> impl Future<Output = Result<Vec<u8>, StorageError>> + Send {
        self.as_ref().download_value(stream_id, key)
    }
}

/// Uploads wait for the storage network to accept the data.
pub const DEFAULT_GATEWAY_TIMEOUT_SECS: u64 = 120;

/// The storage backend selected in configuration.
#[derive(Debug)]
pub enum StorageProvider {
    Gateway(HttpStorageGateway),
    Memory(InMemoryStorage),
}

impl StorageProvider {
    pub fn from_config(config: &StorageConfig) -> Result<Self, StorageError> {
        match config {
            StorageConfig::Memory => {
                tracing::warn!("Using in-memory storage, contents are lost on restart");
                Ok(StorageProvider::Memory(InMemoryStorage::default()))
            }
            StorageConfig::Gateway { url, timeout_secs } => {
                let timeout = Duration::from_secs(timeout_secs.unwrap_or(DEFAULT_GATEWAY_TIMEOUT_SECS));
                let gateway = HttpStorageGateway::try_from(url.as_str())?.with_timeout(timeout);
                tracing::info!(url = %gateway.base_url(), ?timeout, "Using storage gateway");
                Ok(StorageProvider::Gateway(gateway))
            }
        }
    }
}

impl StorageBackend for StorageProvider {
    async fn upload(&self, payload: StoragePayload) -> Result<StorageReceipt, StorageError> {
        match self {
            StorageProvider::Gateway(gateway) => gateway.upload(payload).await,
            StorageProvider::Memory(memory) => memory.upload(payload).await,
        }
    }

    async fn download_file(&self, root_hash: RootHash) -> Result<Vec<u8>, StorageError> {
        match self {
            StorageProvider::Gateway(gateway) => gateway.download_file(root_hash).await,
            StorageProvider::Memory(memory) => memory.download_file(root_hash).await,
        }
    }

    async fn download_value(&self, stream_id: StreamId, key: &str) -> Result<Vec<u8>, StorageError> {
        match self {
            StorageProvider::Gateway(gateway) => gateway.download_value(stream_id, key).await,
            StorageProvider::Memory(memory) => memory.download_value(stream_id, key).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stream_id_is_left_padded() {
        let short: StreamId = "0x1".parse().unwrap();
        assert_eq!(short, StreamId::DEFAULT);
        let bare: StreamId = "01".parse().unwrap();
        assert_eq!(bare, StreamId::default());
        assert_eq!(
            StreamId::DEFAULT.to_string(),
            "0x0000000000000000000000000000000000000000000000000000000000000001"
        );
    }

    #[test]
    fn test_stream_id_rejects_garbage() {
        assert!("0x".parse::<StreamId>().is_err());
        assert!("stream".parse::<StreamId>().is_err());
        assert!(format!("0x{}", "1".repeat(65)).parse::<StreamId>().is_err());
    }

    #[test]
    fn test_stream_id_serde() {
        let id: StreamId = serde_json::from_str("\"0xabc\"").unwrap();
        assert_eq!(
            serde_json::to_string(&id).unwrap(),
            "\"0x0000000000000000000000000000000000000000000000000000000000000abc\""
        );
    }

    #[test]
    fn test_receipt_omits_missing_tx_hash() {
        let receipt = StorageReceipt {
            root_hash: B256::repeat_byte(0xaa),
            tx_hash: None,
        };
        let json = serde_json::to_value(&receipt).unwrap();
        assert!(json.get("txHash").is_none());
        assert!(json["rootHash"].as_str().unwrap().starts_with("0xaaaa"));
    }
}
