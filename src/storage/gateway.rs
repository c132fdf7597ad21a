//! A [`StorageBackend`] that forwards to a remote storage gateway over HTTP.
//!
//! The gateway fronts the storage network's indexer and nodes:
//!
//! - `POST {base}/file` with a multipart `file` field, answers `{ rootHash, txHash? }`
//! - `GET {base}/file/{rootHash}` answers the raw bytes
//! - `POST {base}/kv` with `{ streamId, key, value }`, answers `{ rootHash, txHash? }`
//! - `GET {base}/kv?streamId=..&key=..` answers `{ value }`
//!
//! Values travel base64 encoded. A `404` from a read becomes
//! [`StorageError::NotFound`].

use reqwest::multipart::{Form, Part};
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::instrument;
use url::Url;

use crate::storage::{
    RootHash, StorageBackend, StorageError, StoragePayload, StorageReceipt, StreamId,
};
use crate::util::b64;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct KvWriteRequest<'a> {
    stream_id: StreamId,
    key: &'a str,
    #[serde(with = "b64")]
    value: Vec<u8>,
}

#[derive(Debug, Deserialize)]
struct KvReadResponse {
    #[serde(with = "b64")]
    value: Vec<u8>,
}

/// A client for a remote storage gateway.
#[derive(Clone, Debug)]
pub struct HttpStorageGateway {
    /// Base URL of the gateway (e.g. `https://gateway.example/`)
    base_url: Url,
    /// Full URL to `POST /file` requests
    file_url: Url,
    /// Full URL to `/kv` requests
    kv_url: Url,
    client: Client,
    timeout: Option<Duration>,
}

impl HttpStorageGateway {
    /// Constructs a new gateway client from a base URL with a trailing slash.
    pub fn try_new(base_url: Url) -> Result<Self, StorageError> {
        let file_url = base_url
            .join("./file")
            .map_err(|e| StorageError::UrlParse {
                context: "Failed to construct ./file URL",
                source: e,
            })?;
        let kv_url = base_url.join("./kv").map_err(|e| StorageError::UrlParse {
            context: "Failed to construct ./kv URL",
            source: e,
        })?;
        Ok(Self {
            base_url,
            file_url,
            kv_url,
            client: Client::new(),
            timeout: None,
        })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// Sets a timeout for all future requests.
    ///
    /// Uploads wait for the storage network to accept the data, so this should
    /// be generous.
    pub fn with_timeout(&self, timeout: Duration) -> Self {
        let mut this = self.clone();
        this.timeout = Some(timeout);
        this
    }

    #[instrument(name = "storage.gateway.upload_file", skip(self, bytes), fields(size = bytes.len()), err)]
    async fn upload_file(
        &self,
        name: String,
        bytes: Vec<u8>,
    ) -> Result<StorageReceipt, StorageError> {
        let form = Form::new().part("file", Part::bytes(bytes).file_name(name));
        let request = self.client.post(self.file_url.clone()).multipart(form);
        let response = self.send(request, "POST /file").await?;
        Self::json(response, "POST /file").await
    }

    #[instrument(name = "storage.gateway.upload_value", skip(self, value), fields(size = value.len()), err)]
    async fn upload_value(
        &self,
        stream_id: StreamId,
        key: &str,
        value: Vec<u8>,
    ) -> Result<StorageReceipt, StorageError> {
        let body = KvWriteRequest {
            stream_id,
            key,
            value,
        };
        let request = self.client.post(self.kv_url.clone()).json(&body);
        let response = self.send(request, "POST /kv").await?;
        Self::json(response, "POST /kv").await
    }

    /// Applies the timeout, sends, and turns non-2xx answers into errors.
    async fn send(
        &self,
        mut request: RequestBuilder,
        context: &'static str,
    ) -> Result<Response, StorageError> {
        if let Some(timeout) = self.timeout {
            request = request.timeout(timeout);
        }
        let response = request
            .send()
            .await
            .map_err(|e| StorageError::Http { context, source: e })?;
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response
            .text()
            .await
            .map_err(|e| StorageError::ResponseBodyRead { context, source: e })?;
        if status == StatusCode::NOT_FOUND {
            return Err(StorageError::NotFound(body));
        }
        Err(StorageError::HttpStatus {
            context,
            status,
            body,
        })
    }

    async fn json<R>(response: Response, context: &'static str) -> Result<R, StorageError>
    where
        R: serde::de::DeserializeOwned,
    {
        response
            .json::<R>()
            .await
            .map_err(|e| StorageError::JsonDeserialization { context, source: e })
    }
}

impl StorageBackend for HttpStorageGateway {
    async fn upload(&self, payload: StoragePayload) -> Result<StorageReceipt, StorageError> {
        match payload {
            StoragePayload::File { name, bytes } => self.upload_file(name, bytes).await,
            StoragePayload::KeyValue {
                stream_id,
                key,
                value,
            } => self.upload_value(stream_id, &key, value).await,
        }
    }

    #[instrument(name = "storage.gateway.download_file", skip(self), err)]
    async fn download_file(&self, root_hash: RootHash) -> Result<Vec<u8>, StorageError> {
        let context = "GET /file/{rootHash}";
        let url = self
            .base_url
            .join(&format!("./file/{root_hash}"))
            .map_err(|e| StorageError::UrlParse { context, source: e })?;
        let response = self.send(self.client.get(url), context).await?;
        let bytes = response
            .bytes()
            .await
            .map_err(|e| StorageError::ResponseBodyRead { context, source: e })?;
        Ok(bytes.to_vec())
    }

    #[instrument(name = "storage.gateway.download_value", skip(self), err)]
    async fn download_value(&self, stream_id: StreamId, key: &str) -> Result<Vec<u8>, StorageError> {
        let mut url = self.kv_url.clone();
        url.query_pairs_mut()
            .append_pair("streamId", &stream_id.to_string())
            .append_pair("key", key);
        let response = self.send(self.client.get(url), "GET /kv").await?;
        let read: KvReadResponse = Self::json(response, "GET /kv").await?;
        Ok(read.value)
    }
}

/// Parses a base URL, normalizing it to a single trailing slash.
impl TryFrom<&str> for HttpStorageGateway {
    type Error = StorageError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        let mut normalized = value.trim_end_matches('/').to_string();
        normalized.push('/');
        let url = Url::parse(&normalized).map_err(|e| StorageError::UrlParse {
            context: "Failed to parse base url",
            source: e,
        })?;
        HttpStorageGateway::try_new(url)
    }
}
