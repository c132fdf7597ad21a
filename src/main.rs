//! Storage paygate HTTP entrypoint.
//!
//! Endpoints:
//! - `GET /payment` – Current payment session
//! - `GET /payment/events` – Session changes as server-sent events
//! - `POST /wallet/connect`, `POST /wallet/disconnect` – Wallet session
//! - `POST /payment` – Pay, confirming in the background
//! - `POST /payment/confirm` – Wait for the pending payment
//! - `POST /payment/reset` – Start over
//! - `POST /upload`, `POST /kv-upload` – Gated storage writes
//! - `POST /download`, `GET /kv-download` – Storage reads
//!
//! Environment:
//! - `.env` values loaded at startup
//! - `CONFIG` points at the JSON config file
//! - `HOST`, `PORT` control binding address unless set in the config
//! - `OTEL_*` variables enable tracing to an OTLP collector

use axum::Router;
use axum::http::Method;
use dotenvy::dotenv;
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::cors;

use storage_paygate::chain::eip155::Eip155ChainClient;
use storage_paygate::config::Config;
use storage_paygate::handlers::{self, AppState};
use storage_paygate::payment::{PaymentGate, PaymentTerms};
use storage_paygate::storage::StorageProvider;
use storage_paygate::util::{SigDown, Telemetry};

/// Initializes the storage paygate server.
///
/// - Loads `.env` variables.
/// - Initializes tracing and OpenTelemetry.
/// - Connects to the chain RPC and loads the paying wallet.
/// - Starts an Axum HTTP server with the paygate handlers.
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    rustls::crypto::CryptoProvider::install_default(rustls::crypto::ring::default_provider())
        .map_err(|_| "Failed to initialize rustls crypto provider")?;

    dotenv().ok();

    let telemetry = Telemetry::new()
        .with_name(env!("CARGO_PKG_NAME"))
        .with_version(env!("CARGO_PKG_VERSION"))
        .register();

    let config = Config::load()?;

    let terms = PaymentTerms::new(config.payment().payee(), config.payment().amount().clone())?;
    tracing::info!(payee = %terms.payee, amount = %terms.amount, "Uploads require payment");

    let chain = Eip155ChainClient::from_config(config.chain())?;
    let gate = Arc::new(PaymentGate::new(
        chain,
        terms,
        config.chain().receipt_timeout(),
    ));
    let storage = StorageProvider::from_config(config.storage())?;

    let sig_down = SigDown::try_new()?;
    let axum_state = Arc::new(AppState::new(
        gate,
        storage,
        sig_down.task_tracker(),
        sig_down.cancellation_token(),
    ));

    let http_endpoints = Router::new()
        .merge(handlers::routes().with_state(axum_state))
        .layer(telemetry.http_tracing())
        .layer(
            cors::CorsLayer::new()
                .allow_origin(cors::Any)
                .allow_methods([Method::GET, Method::POST])
                .allow_headers(cors::Any),
        );

    let addr = SocketAddr::new(config.host(), config.port());
    tracing::info!("Starting server at http://{}", addr);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .inspect_err(|e| tracing::error!("Failed to bind to {}: {}", addr, e))?;

    let axum_cancellation_token = sig_down.cancellation_token();
    let axum_graceful_shutdown = async move { axum_cancellation_token.cancelled().await };
    axum::serve(listener, http_endpoints)
        .with_graceful_shutdown(axum_graceful_shutdown)
        .await?;

    // Let background confirmation waits observe the cancellation and finish
    sig_down.recv().await;

    Ok(())
}
