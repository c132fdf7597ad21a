//! HTTP endpoints of the storage paygate.
//!
//! Wallet and payment endpoints drive the [`PaymentGate`]; storage endpoints
//! go through the [`UploadController`], so writes are refused with
//! `402 Payment Required` until the session's payment is confirmed.
//!
//! All JSON uses camelCase. Failures answer `{ "error": "..." }`.

use alloy_primitives::TxHash;
use axum::extract::multipart::Multipart;
use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::extract::{DefaultBodyLimit, Query, State};
use axum::http::{StatusCode, header};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use futures_util::Stream;
use serde::{Deserialize, Serialize};
use std::convert::Infallible;
use std::str::FromStr;
use std::sync::Arc;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::instrument;

use crate::chain::ChainClient;
use crate::payment::{PaymentError, PaymentGate, PaymentSession, PaymentTerms};
use crate::storage::media::ImageKind;
use crate::storage::{RootHash, StorageBackend, StorageError, StoragePayload, StreamId};
use crate::upload::{UploadController, UploadError};

/// Largest accepted multipart upload.
pub const MAX_UPLOAD_BYTES: usize = 32 * 1024 * 1024;

/// Shared state of all handlers.
pub struct AppState<C, S> {
    pub gate: Arc<PaymentGate<C>>,
    pub uploads: UploadController<C, S>,
    /// Background confirmation waits are spawned here so shutdown can wait for them.
    pub tasks: TaskTracker,
    pub shutdown: CancellationToken,
}

impl<C, S> AppState<C, S>
where
    C: ChainClient,
    S: StorageBackend,
{
    pub fn new(
        gate: Arc<PaymentGate<C>>,
        storage: S,
        tasks: TaskTracker,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            uploads: UploadController::new(gate.clone(), storage),
            gate,
            tasks,
            shutdown,
        }
    }
}

pub fn routes<C, S>() -> Router<Arc<AppState<C, S>>>
where
    C: ChainClient + Send + Sync + 'static,
    S: StorageBackend + Send + Sync + 'static,
{
    Router::new()
        .route("/payment", get(get_payment::<C, S>).post(post_payment::<C, S>))
        .route("/payment/events", get(get_payment_events::<C, S>))
        .route("/payment/confirm", post(post_payment_confirm::<C, S>))
        .route("/payment/reset", post(post_payment_reset::<C, S>))
        .route("/wallet/connect", post(post_wallet_connect::<C, S>))
        .route("/wallet/disconnect", post(post_wallet_disconnect::<C, S>))
        .route(
            "/upload",
            post(post_upload::<C, S>).layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES)),
        )
        .route("/kv-upload", post(post_kv_upload::<C, S>))
        .route("/kv-download", get(get_kv_download::<C, S>))
        .route("/download", post(post_download::<C, S>))
}

/// Everything a handler can fail with, mapped onto HTTP statuses.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error(transparent)]
    Payment(#[from] PaymentError),
    #[error(transparent)]
    Upload(#[from] UploadError),
    #[error("{0}")]
    BadRequest(String),
    #[error("{0}")]
    Internal(String),
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        ApiError::BadRequest(rejection.body_text())
    }
}

impl From<QueryRejection> for ApiError {
    fn from(rejection: QueryRejection) -> Self {
        ApiError::BadRequest(rejection.body_text())
    }
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct PaymentRequiredResponse<'a> {
    error: String,
    #[serde(flatten)]
    terms: &'a PaymentTerms,
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match self {
            ApiError::Payment(err) => match err {
                PaymentError::NotConnected => StatusCode::PRECONDITION_REQUIRED,
                PaymentError::PaymentAlreadyInProgress
                | PaymentError::AlreadyConfirmed
                | PaymentError::NoPendingPayment => StatusCode::CONFLICT,
                PaymentError::SubmissionRejected(_) => StatusCode::UNPROCESSABLE_ENTITY,
                PaymentError::TransactionFailed(_) | PaymentError::ReceiptMismatch(_) => {
                    StatusCode::PAYMENT_REQUIRED
                }
                PaymentError::ConfirmationTimeout(_) => StatusCode::GATEWAY_TIMEOUT,
                PaymentError::ChainUnavailable(_) => StatusCode::BAD_GATEWAY,
            },
            ApiError::Upload(UploadError::PaymentRequired(_)) => StatusCode::PAYMENT_REQUIRED,
            ApiError::Upload(UploadError::StorageBackend(StorageError::NotFound(_))) => {
                StatusCode::NOT_FOUND
            }
            ApiError::Upload(UploadError::StorageBackend(_)) => StatusCode::BAD_GATEWAY,
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let error = self.to_string();
        tracing::warn!(%status, %error, "Request failed");
        match &self {
            ApiError::Upload(UploadError::PaymentRequired(terms)) => {
                (status, Json(PaymentRequiredResponse { error, terms })).into_response()
            }
            _ => (status, Json(ErrorResponse { error })).into_response(),
        }
    }
}

/// `GET /payment`: the current payment session.
pub async fn get_payment<C, S>(State(state): State<Arc<AppState<C, S>>>) -> Json<PaymentSession>
where
    C: ChainClient,
    S: StorageBackend,
{
    Json(state.gate.snapshot())
}

/// `GET /payment/events`: server-sent `payment` events, one per session change.
///
/// The first event carries the session as it is when the stream opens.
pub async fn get_payment_events<C, S>(
    State(state): State<Arc<AppState<C, S>>>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>>
where
    C: ChainClient,
    S: StorageBackend,
{
    let receiver = state.gate.subscribe();
    let stream = futures_util::stream::unfold((receiver, true), |(mut receiver, first)| async move {
        if !first {
            receiver.changed().await.ok()?;
        }
        let session = receiver.borrow_and_update().clone();
        let event = Event::default().event("payment").json_data(&session).ok()?;
        Some((Ok(event), (receiver, false)))
    });
    Sse::new(stream).keep_alive(KeepAlive::default())
}

/// `POST /wallet/connect`: picks up the configured wallet.
#[instrument(skip_all)]
pub async fn post_wallet_connect<C, S>(
    State(state): State<Arc<AppState<C, S>>>,
) -> Result<Json<PaymentSession>, ApiError>
where
    C: ChainClient,
    S: StorageBackend,
{
    Ok(Json(state.gate.connect_wallet()?))
}

/// `POST /wallet/disconnect`: forgets the wallet and any payment.
#[instrument(skip_all)]
pub async fn post_wallet_disconnect<C, S>(
    State(state): State<Arc<AppState<C, S>>>,
) -> Result<Json<PaymentSession>, ApiError>
where
    C: ChainClient,
    S: StorageBackend,
{
    Ok(Json(state.gate.disconnect_wallet()?))
}

/// `POST /payment`: submits the payment and answers `202 Accepted` once the
/// chain has the transaction.
///
/// Submission and the confirmation wait run in one tracked task, so a client
/// that goes away mid-request cannot abandon a transfer that may already be
/// broadcast. Follow confirmation on `GET /payment` or `GET /payment/events`.
#[instrument(skip_all)]
pub async fn post_payment<C, S>(
    State(state): State<Arc<AppState<C, S>>>,
) -> Result<(StatusCode, Json<PaymentSession>), ApiError>
where
    C: ChainClient + Send + Sync + 'static,
    S: StorageBackend + Send + Sync + 'static,
{
    let (submitted_tx, submitted) = oneshot::channel();
    let gate = state.gate.clone();
    let shutdown = state.shutdown.clone();
    state.tasks.spawn(async move {
        let result = gate.submit_payment().await;
        let tx_hash = result.as_ref().ok().copied();
        if submitted_tx.send(result.map(|_| gate.snapshot())).is_err() {
            tracing::info!(?tx_hash, "Payment requester went away before the submission finished");
        }
        if let Some(tx_hash) = tx_hash {
            confirm_in_background(gate, tx_hash, shutdown).await;
        }
    });
    let session = submitted
        .await
        .map_err(|_| ApiError::Internal("payment task stopped before submitting".to_string()))??;
    Ok((StatusCode::ACCEPTED, Json(session)))
}

/// `POST /payment/confirm`: waits for the pending payment, resuming an
/// abandoned wait.
#[instrument(skip_all)]
pub async fn post_payment_confirm<C, S>(
    State(state): State<Arc<AppState<C, S>>>,
) -> Result<Json<PaymentSession>, ApiError>
where
    C: ChainClient,
    S: StorageBackend,
{
    state.gate.await_confirmation().await?;
    Ok(Json(state.gate.snapshot()))
}

/// `POST /payment/reset`: starts over with the same wallet.
#[instrument(skip_all)]
pub async fn post_payment_reset<C, S>(
    State(state): State<Arc<AppState<C, S>>>,
) -> Result<Json<PaymentSession>, ApiError>
where
    C: ChainClient,
    S: StorageBackend,
{
    Ok(Json(state.gate.reset()?))
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadResponse {
    pub success: bool,
    pub root_hash: RootHash,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tx_hash: Option<TxHash>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stream_id: Option<StreamId>,
    pub message: String,
}

/// `POST /upload`: stores the multipart `image` (or `file`) field.
#[instrument(skip_all)]
pub async fn post_upload<C, S>(
    State(state): State<Arc<AppState<C, S>>>,
    mut multipart: Multipart,
) -> Result<Json<UploadResponse>, ApiError>
where
    C: ChainClient,
    S: StorageBackend,
{
    let mut upload = None;
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::BadRequest(e.body_text()))?
    {
        if !matches!(field.name(), Some("image" | "file")) {
            continue;
        }
        let name = field.file_name().unwrap_or("upload.bin").to_string();
        let bytes = field
            .bytes()
            .await
            .map_err(|e| ApiError::BadRequest(e.body_text()))?;
        upload = Some((name, bytes.to_vec()));
        break;
    }
    let (name, bytes) = upload
        .ok_or_else(|| ApiError::BadRequest("No file in `image` or `file` field".to_string()))?;
    if bytes.is_empty() {
        return Err(ApiError::BadRequest("Uploaded file is empty".to_string()));
    }

    let receipt = state
        .uploads
        .attempt_upload(StoragePayload::File { name, bytes })
        .await?;
    Ok(Json(UploadResponse {
        success: true,
        root_hash: receipt.root_hash,
        tx_hash: receipt.tx_hash,
        stream_id: None,
        message: "File stored".to_string(),
    }))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KvUploadRequest {
    pub key: String,
    pub value: String,
    #[serde(default)]
    pub stream_id: Option<StreamId>,
}

/// `POST /kv-upload`: stores a string value under `key` in a stream.
#[instrument(skip_all)]
pub async fn post_kv_upload<C, S>(
    State(state): State<Arc<AppState<C, S>>>,
    body: Result<Json<KvUploadRequest>, JsonRejection>,
) -> Result<Json<UploadResponse>, ApiError>
where
    C: ChainClient,
    S: StorageBackend,
{
    let Json(request) = body?;
    if request.key.is_empty() {
        return Err(ApiError::BadRequest("key must not be empty".to_string()));
    }
    if request.value.is_empty() {
        return Err(ApiError::BadRequest("value must not be empty".to_string()));
    }
    let stream_id = request.stream_id.unwrap_or_default();
    let receipt = state
        .uploads
        .attempt_upload(StoragePayload::KeyValue {
            stream_id,
            key: request.key,
            value: request.value.into_bytes(),
        })
        .await?;
    Ok(Json(UploadResponse {
        success: true,
        root_hash: receipt.root_hash,
        tx_hash: receipt.tx_hash,
        stream_id: Some(stream_id),
        message: "Value stored".to_string(),
    }))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KvDownloadQuery {
    pub key: String,
    #[serde(default)]
    pub stream_id: Option<StreamId>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct KvDownloadResponse {
    pub key: String,
    pub stream_id: StreamId,
    pub value: String,
}

/// `GET /kv-download?key=..&streamId=..`: reads a value back.
#[instrument(skip_all)]
pub async fn get_kv_download<C, S>(
    State(state): State<Arc<AppState<C, S>>>,
    query: Result<Query<KvDownloadQuery>, QueryRejection>,
) -> Result<Json<KvDownloadResponse>, ApiError>
where
    C: ChainClient,
    S: StorageBackend,
{
    let Query(query) = query?;
    let stream_id = query.stream_id.unwrap_or_default();
    let value = state.uploads.download_value(stream_id, &query.key).await?;
    Ok(Json(KvDownloadResponse {
        key: query.key,
        stream_id,
        value: String::from_utf8_lossy(&value).into_owned(),
    }))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DownloadRequest {
    #[serde(default)]
    pub root_hash: String,
}

/// `POST /download`: returns the stored file as an inline image.
#[instrument(skip_all)]
pub async fn post_download<C, S>(
    State(state): State<Arc<AppState<C, S>>>,
    body: Result<Json<DownloadRequest>, JsonRejection>,
) -> Result<Response, ApiError>
where
    C: ChainClient,
    S: StorageBackend,
{
    let Json(request) = body?;
    if request.root_hash.is_empty() {
        return Err(ApiError::BadRequest("rootHash is required".to_string()));
    }
    let root_hash = RootHash::from_str(&request.root_hash)
        .map_err(|_| ApiError::BadRequest(format!("Invalid rootHash '{}'", request.root_hash)))?;

    let bytes = state.uploads.download_file(root_hash).await?;
    let kind = ImageKind::sniff(&bytes);
    tracing::info!(%root_hash, size = bytes.len(), kind = kind.extension(), "Serving download");
    let headers = [
        (header::CONTENT_TYPE, kind.mime_type().to_string()),
        (header::CONTENT_LENGTH, bytes.len().to_string()),
        (header::CONTENT_DISPOSITION, kind.content_disposition()),
    ];
    Ok((headers, bytes).into_response())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::StorageReceipt;
    use crate::storage::memory::InMemoryStorage;
    use crate::payment::PaymentState;
    use crate::testing::{Confirmation, MockChain, PAYEE, terms, tx_hash};
    use axum::body::{Body, to_bytes};
    use axum::http::Request;
    use serde_json::{Value, json};
    use std::time::Duration;
    use tower::ServiceExt;

    type TestState = AppState<Arc<MockChain>, Arc<InMemoryStorage>>;

    struct Harness {
        app: Router,
        state: Arc<TestState>,
        chain: Arc<MockChain>,
        storage: Arc<InMemoryStorage>,
    }

    fn harness(chain: MockChain) -> Harness {
        let chain = Arc::new(chain);
        let gate = Arc::new(PaymentGate::new(
            chain.clone(),
            terms(),
            Duration::from_secs(5),
        ));
        let storage = Arc::new(InMemoryStorage::default());
        let state = Arc::new(AppState::new(
            gate,
            storage.clone(),
            TaskTracker::new(),
            CancellationToken::new(),
        ));
        let app = routes::<Arc<MockChain>, Arc<InMemoryStorage>>().with_state(state.clone());
        Harness {
            app,
            state,
            chain,
            storage,
        }
    }

    async fn send(app: &Router, request: Request<Body>) -> (StatusCode, Vec<u8>) {
        let response = app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, body.to_vec())
    }

    async fn send_json(app: &Router, request: Request<Body>) -> (StatusCode, Value) {
        let (status, body) = send(app, request).await;
        (status, serde_json::from_slice(&body).unwrap())
    }

    fn post(uri: &str) -> Request<Body> {
        Request::post(uri).body(Body::empty()).unwrap()
    }

    fn post_json(uri: &str, body: Value) -> Request<Body> {
        Request::post(uri)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    fn multipart(field: &str, file_name: &str, bytes: &[u8]) -> Request<Body> {
        let boundary = "paygate-test-boundary";
        let mut body = format!(
            "--{boundary}\r\nContent-Disposition: form-data; name=\"{field}\"; filename=\"{file_name}\"\r\nContent-Type: application/octet-stream\r\n\r\n"
        )
        .into_bytes();
        body.extend_from_slice(bytes);
        body.extend_from_slice(format!("\r\n--{boundary}--\r\n").as_bytes());
        Request::post("/upload")
            .header(
                header::CONTENT_TYPE,
                format!("multipart/form-data; boundary={boundary}"),
            )
            .body(Body::from(body))
            .unwrap()
    }

    /// Connects, pays, and waits for the background confirmation.
    async fn pay(harness: &Harness) {
        let (status, _) = send(&harness.app, post("/wallet/connect")).await;
        assert_eq!(status, StatusCode::OK);
        let (status, session) = send_json(&harness.app, post("/payment")).await;
        assert_eq!(status, StatusCode::ACCEPTED);
        assert_eq!(session["state"], "pendingConfirmation");
        harness.state.tasks.close();
        harness.state.tasks.wait().await;
    }

    #[tokio::test]
    async fn test_session_starts_disconnected() {
        let harness = harness(MockChain::connected());
        let request = Request::get("/payment").body(Body::empty()).unwrap();
        let (status, session) = send_json(&harness.app, request).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(session["state"], "disconnected");
        assert_eq!(session["requiredAmount"], "0.001");
    }

    #[tokio::test]
    async fn test_payment_without_wallet_is_precondition_required() {
        let harness = harness(MockChain::disconnected());
        let (status, body) = send_json(&harness.app, post("/wallet/connect")).await;
        assert_eq!(status, StatusCode::PRECONDITION_REQUIRED);
        assert_eq!(body["error"], "No wallet is connected");
        let (status, _) = send_json(&harness.app, post("/payment")).await;
        assert_eq!(status, StatusCode::PRECONDITION_REQUIRED);
    }

    #[tokio::test]
    async fn test_unpaid_upload_is_payment_required() {
        let harness = harness(MockChain::connected());
        let (status, body) =
            send_json(&harness.app, multipart("image", "cat.png", b"\x89PNG....")).await;
        assert_eq!(status, StatusCode::PAYMENT_REQUIRED);
        assert_eq!(body["payee"], json!(PAYEE));
        assert_eq!(body["amount"], "0.001");
        assert_eq!(body["amountWei"], "1000000000000000");
        assert_eq!(harness.storage.file_count().await, 0);
    }

    #[tokio::test]
    async fn test_paid_session_can_upload_and_download() {
        let harness = harness(MockChain::connected());
        pay(&harness).await;
        let request = Request::get("/payment").body(Body::empty()).unwrap();
        let (_, session) = send_json(&harness.app, request).await;
        assert_eq!(session["state"], "confirmed");

        let png = b"\x89PNG\r\n\x1a\nrest-of-image".to_vec();
        let (status, body) = send_json(&harness.app, multipart("image", "cat.png", &png)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["success"], true);
        let root_hash = body["rootHash"].as_str().unwrap().to_string();

        let response = harness
            .app
            .clone()
            .oneshot(post_json("/download", json!({ "rootHash": root_hash })))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()[header::CONTENT_TYPE], "image/png");
        assert_eq!(
            response.headers()[header::CONTENT_DISPOSITION],
            "inline; filename=\"downloaded_image.png\""
        );
        assert_eq!(
            response.headers()[header::CONTENT_LENGTH],
            png.len().to_string()
        );
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert_eq!(body.to_vec(), png);
    }

    #[tokio::test]
    async fn test_kv_round_trip_uses_default_stream() {
        let harness = harness(MockChain::connected());
        pay(&harness).await;

        let (status, body) = send_json(
            &harness.app,
            post_json("/kv-upload", json!({ "key": "greeting", "value": "hello" })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["streamId"], json!(StreamId::DEFAULT));

        let request = Request::get("/kv-download?key=greeting&streamId=0x1")
            .body(Body::empty())
            .unwrap();
        let (status, body) = send_json(&harness.app, request).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["value"], "hello");
    }

    #[tokio::test]
    async fn test_kv_upload_is_gated() {
        let harness = harness(MockChain::connected());
        let (status, _) = send_json(
            &harness.app,
            post_json("/kv-upload", json!({ "key": "k", "value": "v" })),
        )
        .await;
        assert_eq!(status, StatusCode::PAYMENT_REQUIRED);
    }

    #[tokio::test]
    async fn test_download_input_errors() {
        let harness = harness(MockChain::connected());
        let (status, body) = send_json(&harness.app, post_json("/download", json!({}))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "rootHash is required");

        let (status, _) =
            send_json(&harness.app, post_json("/download", json!({ "rootHash": "0x12" }))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let unknown = RootHash::repeat_byte(0x42).to_string();
        let (status, _) =
            send_json(&harness.app, post_json("/download", json!({ "rootHash": unknown }))).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_download_falls_back_to_jpeg() {
        let harness = harness(MockChain::connected());
        let StorageReceipt { root_hash, .. } = harness
            .storage
            .upload(StoragePayload::File {
                name: "notes.txt".into(),
                bytes: b"plain text".to_vec(),
            })
            .await
            .unwrap();
        let response = harness
            .app
            .clone()
            .oneshot(post_json("/download", json!({ "rootHash": root_hash })))
            .await
            .unwrap();
        assert_eq!(response.headers()[header::CONTENT_TYPE], "image/jpeg");
    }

    #[tokio::test]
    async fn test_reset_is_rejected_while_pending() {
        let chain = MockChain::connected();
        chain.script(Confirmation::Hang);
        let harness = harness(chain);
        send(&harness.app, post("/wallet/connect")).await;
        let (status, _) = send_json(&harness.app, post("/payment")).await;
        assert_eq!(status, StatusCode::ACCEPTED);

        let (status, body) = send_json(&harness.app, post("/payment/reset")).await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(body["error"], "A payment is already in progress");
        let (status, _) = send_json(&harness.app, post("/payment")).await;
        assert_eq!(status, StatusCode::CONFLICT);
    }

    #[tokio::test]
    async fn test_dropped_payment_request_keeps_submission_alive() {
        let chain = MockChain::connected().holding_submissions();
        chain.script(Confirmation::Hang);
        let harness = harness(chain);
        send(&harness.app, post("/wallet/connect")).await;

        let dropped = tokio::time::timeout(
            Duration::from_millis(20),
            send(&harness.app, post("/payment")),
        )
        .await;
        assert!(dropped.is_err());
        assert_eq!(harness.state.gate.snapshot().state, PaymentState::Submitting);

        harness.chain.submit_permits.add_permits(1);
        let mut sessions = harness.state.gate.subscribe();
        let session = tokio::time::timeout(
            Duration::from_secs(1),
            sessions.wait_for(|session| session.state == PaymentState::PendingConfirmation),
        )
        .await
        .unwrap()
        .unwrap()
        .clone();
        assert_eq!(session.submitted_tx_hash, Some(tx_hash(1)));
        assert_eq!(harness.chain.submit_count(), 1);

        let (status, _) = send_json(&harness.app, post("/payment")).await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(harness.chain.submit_count(), 1);
    }

    #[tokio::test]
    async fn test_kv_upload_requires_key_and_value() {
        let harness = harness(MockChain::connected());
        pay(&harness).await;

        let (status, body) = send_json(
            &harness.app,
            post_json("/kv-upload", json!({ "key": "", "value": "v" })),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "key must not be empty");

        let (status, body) = send_json(
            &harness.app,
            post_json("/kv-upload", json!({ "key": "k", "value": "" })),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "value must not be empty");
    }

    #[tokio::test]
    async fn test_confirm_without_payment_is_conflict() {
        let harness = harness(MockChain::connected());
        send(&harness.app, post("/wallet/connect")).await;
        let (status, _) = send_json(&harness.app, post("/payment/confirm")).await;
        assert_eq!(status, StatusCode::CONFLICT);
    }

    #[tokio::test]
    async fn test_upload_without_file_field_is_bad_request() {
        let harness = harness(MockChain::connected());
        pay(&harness).await;
        let (status, _) =
            send_json(&harness.app, multipart("attachment", "a.bin", b"data")).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }
}
