//! Payment-gated uploads to decentralized storage.
//!
//! A user connects a wallet, pays a fixed amount of native coin to a fixed
//! payee, and once the chain confirms the transfer may write files and
//! key-value entries to a storage network. Reads are free.
//!
//! # Modules
//!
//! - [`chain`] - The [`ChainClient`](chain::ChainClient) seam and its EVM JSON-RPC implementation.
//! - [`payment`] - The payment session state machine and the [`PaymentGate`](payment::PaymentGate) that drives it.
//! - [`upload`] - The [`UploadController`](upload::UploadController) that gates storage writes.
//! - [`storage`] - The [`StorageBackend`](storage::StorageBackend) seam, an HTTP gateway client and an in-memory store.
//! - [`handlers`] - Axum routes for wallet, payment and storage endpoints.
//! - [`config`] - JSON configuration with environment variable references.
//! - [`util`] - Amount parsing, base64 serde, telemetry and shutdown handling.

pub mod chain;
pub mod config;
pub mod handlers;
pub mod payment;
pub mod storage;
pub mod upload;
pub mod util;

#[cfg(test)]
mod testing;
