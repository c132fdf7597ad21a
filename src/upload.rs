//! Gated access to the storage collaborator.
//!
//! Every write goes through [`UploadController::attempt_upload`], which asks
//! the [`PaymentGate`] first. Reads are passed straight through.

use std::sync::Arc;
use tracing::instrument;

use crate::chain::ChainClient;
use crate::payment::{PaymentGate, PaymentTerms};
use crate::storage::{
    RootHash, StorageBackend, StorageError, StoragePayload, StorageReceipt, StreamId,
};

#[derive(Debug, thiserror::Error)]
pub enum UploadError {
    /// The session has not paid yet. Carries what has to be paid.
    #[error("Payment of {} to {} is required before uploading", .0.amount, .0.payee)]
    PaymentRequired(PaymentTerms),
    #[error(transparent)]
    StorageBackend(#[from] StorageError),
}

pub struct UploadController<C, S> {
    gate: Arc<PaymentGate<C>>,
    storage: S,
}

impl<C, S> UploadController<C, S>
where
    C: ChainClient,
    S: StorageBackend,
{
    pub fn new(gate: Arc<PaymentGate<C>>, storage: S) -> Self {
        Self { gate, storage }
    }

    pub fn gate(&self) -> &Arc<PaymentGate<C>> {
        &self.gate
    }

    /// Forwards `payload` to storage if the session is paid for.
    ///
    /// Storage errors are returned as they are; nothing is retried.
    #[instrument(skip_all, fields(kind = payload.kind(), size = payload.len()))]
    pub async fn attempt_upload(
        &self,
        payload: StoragePayload,
    ) -> Result<StorageReceipt, UploadError> {
        if !self.gate.is_authorized() {
            tracing::warn!("Upload rejected, payment required");
            return Err(UploadError::PaymentRequired(self.gate.terms().clone()));
        }
        let receipt = self.storage.upload(payload).await.inspect_err(|err| {
            tracing::warn!(error = %err, "Storage rejected upload");
        })?;
        tracing::info!(root_hash = %receipt.root_hash, tx_hash = ?receipt.tx_hash, "Upload stored");
        Ok(receipt)
    }

    pub async fn download_file(&self, root_hash: RootHash) -> Result<Vec<u8>, UploadError> {
        Ok(self.storage.download_file(root_hash).await?)
    }

    pub async fn download_value(
        &self,
        stream_id: StreamId,
        key: &str,
    ) -> Result<Vec<u8>, UploadError> {
        Ok(self.storage.download_value(stream_id, key).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::memory::InMemoryStorage;
    use crate::testing::{MockChain, PAYEE, terms};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    /// Storage that counts writes before handing them to memory.
    #[derive(Default)]
    struct CountingStorage {
        inner: InMemoryStorage,
        uploads: AtomicUsize,
        fail: bool,
    }

    impl StorageBackend for CountingStorage {
        async fn upload(&self, payload: StoragePayload) -> Result<StorageReceipt, StorageError> {
            self.uploads.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(StorageError::NotFound("indexer has no nodes".into()));
            }
            self.inner.upload(payload).await
        }

        async fn download_file(&self, root_hash: RootHash) -> Result<Vec<u8>, StorageError> {
            self.inner.download_file(root_hash).await
        }

        async fn download_value(
            &self,
            stream_id: StreamId,
            key: &str,
        ) -> Result<Vec<u8>, StorageError> {
            self.inner.download_value(stream_id, key).await
        }
    }

    fn controller(storage: CountingStorage) -> UploadController<MockChain, Arc<CountingStorage>> {
        let gate = Arc::new(PaymentGate::new(
            MockChain::connected(),
            terms(),
            Duration::from_secs(5),
        ));
        gate.connect_wallet().unwrap();
        UploadController::new(gate, Arc::new(storage))
    }

    fn file() -> StoragePayload {
        StoragePayload::File {
            name: "cat.gif".into(),
            bytes: b"GIF89a".to_vec(),
        }
    }

    #[tokio::test]
    async fn test_unpaid_upload_never_reaches_storage() {
        let controller = controller(CountingStorage::default());
        let err = controller.attempt_upload(file()).await.unwrap_err();
        match err {
            UploadError::PaymentRequired(terms) => assert_eq!(terms.payee, PAYEE),
            other => panic!("unexpected error {other:?}"),
        }
        assert_eq!(controller.storage.uploads.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_paid_upload_is_forwarded_once() {
        let controller = controller(CountingStorage::default());
        controller.gate().request_payment().await.unwrap();

        let receipt = controller.attempt_upload(file()).await.unwrap();
        assert_eq!(controller.storage.uploads.load(Ordering::SeqCst), 1);
        let bytes = controller.download_file(receipt.root_hash).await.unwrap();
        assert_eq!(bytes, b"GIF89a");
    }

    #[tokio::test]
    async fn test_storage_errors_are_surfaced_without_retry() {
        let controller = controller(CountingStorage {
            fail: true,
            ..Default::default()
        });
        controller.gate().request_payment().await.unwrap();

        let err = controller.attempt_upload(file()).await.unwrap_err();
        assert!(matches!(err, UploadError::StorageBackend(_)));
        assert_eq!(controller.storage.uploads.load(Ordering::SeqCst), 1);
        assert!(controller.gate().is_authorized());
    }

    #[tokio::test]
    async fn test_reads_are_not_gated() {
        let controller = controller(CountingStorage::default());
        let err = controller
            .download_value(StreamId::DEFAULT, "missing")
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            UploadError::StorageBackend(StorageError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_reset_revokes_write_access() {
        let controller = controller(CountingStorage::default());
        controller.gate().request_payment().await.unwrap();
        controller.gate().reset().unwrap();
        assert!(matches!(
            controller.attempt_upload(file()).await,
            Err(UploadError::PaymentRequired(_))
        ));
    }
}
