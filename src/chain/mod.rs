//! Wallet and chain collaborator.
//!
//! [`ChainClient`] is the seam between the payment gate and a blockchain: it
//! knows the connected wallet address, submits native-coin transfers and
//! reports whether a submitted transaction made it into a block.
//! [`eip155::Eip155ChainClient`] is the JSON-RPC implementation.

mod chain_id;
pub mod eip155;

pub use chain_id::*;

use alloy_primitives::{Address, TxHash, U256};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

/// Facts the chain reports about an included, successful transfer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentReceipt {
    pub tx_hash: TxHash,
    pub block_number: Option<u64>,
    pub from: Address,
    pub to: Option<Address>,
    /// Transferred value in wei.
    #[serde(with = "decimal_u256")]
    pub value: U256,
}

#[derive(Debug, thiserror::Error)]
pub enum ChainError {
    /// The wallet refused to sign, or there is no key to sign with.
    #[error("signing declined: {0}")]
    SigningDeclined(String),
    #[error("broadcast failed: {0}")]
    BroadcastError(String),
    #[error("transaction {0} was not confirmed in time")]
    ConfirmationTimeout(TxHash),
    #[error("transaction {0} reverted")]
    TransactionReverted(TxHash),
    /// The node could not be queried; says nothing about the transaction itself.
    #[error("rpc error: {0}")]
    Rpc(String),
}

/// Trait defining the asynchronous interface to the wallet and the chain.
pub trait ChainClient {
    /// Address of the connected wallet, if any.
    fn connected_address(&self) -> Option<Address>;

    /// Signs and broadcasts a transfer of `amount` wei to `to`.
    ///
    /// Resolves once the node has accepted the transaction and returns its hash.
    fn submit(
        &self,
        to: Address,
        amount: U256,
    ) -> impl Future<Output = Result<TxHash, ChainError>> + Send;

    /// Waits until `tx` is included in a block, or until `timeout` elapses.
    fn await_confirmation(
        &self,
        tx: TxHash,
        timeout: Duration,
    ) -> impl Future<Output = Result<PaymentReceipt, ChainError>> + Send;
}

impl<T: ChainClient> ChainClient for Arc<T> {
    fn connected_address(&self) -> Option<Address> {
        self.as_ref().connected_address()
    }

    fn submit(
        &self,
        to: Address,
        amount: U256,
    ) -> impl Future<Output = Result<TxHash, ChainError>> + Send {
        self.as_ref().submit(to, amount)
    }

    fn await_confirmation(
        &self,
        tx: TxHash,
        timeout: Duration,
    ) -> impl Future<Output = Result<PaymentReceipt, ChainError>> + Send {
        self.as_ref().await_confirmation(tx, timeout)
    }
}

pub mod decimal_u256 {
    use alloy_primitives::U256;
    use serde::{Deserialize, Deserializer, Serializer};

    /// Serialize a U256 as a decimal string.
    pub fn serialize<S>(value: &U256, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&value.to_string())
    }

    /// Deserialize a decimal string into a U256.
    pub fn deserialize<'de, D>(deserializer: D) -> Result<U256, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        U256::from_str_radix(&s, 10).map_err(serde::de::Error::custom)
    }
}
