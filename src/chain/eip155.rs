//! JSON-RPC [`ChainClient`] for EVM chains, built on Alloy.
//!
//! Reads and receipt watching go through a plain [`RootProvider`]; transfers
//! go through a provider with gas, nonce, chain-id and wallet fillers. Both
//! share one RPC client: HTTP transports behind a throttle and fallback layer,
//! polled at the configured interval.

use alloy_consensus::Transaction as _;
use alloy_network::{EthereumWallet, ReceiptResponse, TransactionBuilder};
use alloy_primitives::{Address, TxHash, U256};
use alloy_provider::fillers::{
    BlobGasFiller, ChainIdFiller, FillProvider, GasFiller, JoinFill, NonceFiller, WalletFiller,
};
use alloy_provider::{
    Identity, PendingTransactionBuilder, PendingTransactionError, Provider, ProviderBuilder,
    RootProvider, WatchTxError,
};
use alloy_rpc_client::RpcClient;
use alloy_rpc_types_eth::{TransactionReceipt, TransactionRequest};
use alloy_signer::Signer;
use alloy_signer_local::PrivateKeySigner;
use alloy_transport::layers::{FallbackLayer, ThrottleLayer};
use alloy_transport::{RpcError, TransportError};
use alloy_transport_http::Http;
use std::num::NonZeroUsize;
use std::time::Duration;
use tower::ServiceBuilder;
use tracing::instrument;

use crate::chain::{ChainClient, ChainError, ChainId, PaymentReceipt};
use crate::config::{ChainConfig, RpcConfig};

/// Combined filler type for gas, blob gas, nonce, and chain ID.
pub type InnerFiller =
    JoinFill<GasFiller, JoinFill<BlobGasFiller, JoinFill<NonceFiller, ChainIdFiller>>>;

/// Provider that fills and signs transactions with the configured wallet.
pub type InnerProvider = FillProvider<
    JoinFill<JoinFill<Identity, InnerFiller>, WalletFiller<EthereumWallet>>,
    RootProvider,
>;

/// The wallet half of the client; absent when no signer is configured.
#[derive(Debug)]
struct ConnectedWallet {
    address: Address,
    provider: InnerProvider,
}

#[derive(Debug)]
pub struct Eip155ChainClient {
    chain: ChainId,
    eip1559: bool,
    confirmations: u64,
    reader: RootProvider,
    wallet: Option<ConnectedWallet>,
}

impl Eip155ChainClient {
    pub fn rpc_client(
        chain: ChainId,
        rpc: &[RpcConfig],
    ) -> Result<RpcClient, Box<dyn std::error::Error>> {
        let transports = rpc
            .iter()
            .filter_map(|provider_config| {
                let scheme = provider_config.http.scheme();
                let is_http = scheme == "http" || scheme == "https";
                if !is_http {
                    tracing::warn!(%chain, rpc_url = %provider_config.http, "Skipping non-HTTP RPC endpoint");
                    return None;
                }
                let rpc_url = provider_config.http.clone();
                tracing::info!(%chain, %rpc_url, rate_limit = ?provider_config.rate_limit, "Using HTTP transport");
                let rate_limit = provider_config.rate_limit.unwrap_or(u32::MAX);
                let service = ServiceBuilder::new()
                    .layer(ThrottleLayer::new(rate_limit))
                    .service(Http::new(rpc_url));
                Some(service)
            })
            .collect::<Vec<_>>();
        let transport_count = NonZeroUsize::new(transports.len())
            .ok_or("at least one http(s) rpc endpoint should be provided")?;
        let fallback = ServiceBuilder::new()
            .layer(FallbackLayer::default().with_active_transport_count(transport_count))
            .service(transports);
        Ok(RpcClient::new(fallback, false))
    }

    /// Connects to the configured RPC endpoints and loads the signer, if any.
    pub fn from_config(config: &ChainConfig) -> Result<Self, Box<dyn std::error::Error>> {
        let chain = config.chain();
        let client = Self::rpc_client(chain, config.rpc())?
            .with_poll_interval(config.poll_interval());
        let reader = RootProvider::new(client.clone());

        let wallet = match config.signer() {
            None => {
                tracing::warn!(%chain, "No signer configured, wallet stays disconnected");
                None
            }
            Some(key) => {
                let signer = PrivateKeySigner::from_bytes(&key.as_b256())?
                    .with_chain_id(Some(chain.reference()));
                let address = signer.address();
                let filler = JoinFill::new(
                    GasFiller,
                    JoinFill::new(
                        BlobGasFiller::default(),
                        JoinFill::new(
                            NonceFiller::default(),
                            ChainIdFiller::new(Some(chain.reference())),
                        ),
                    ),
                );
                let provider: InnerProvider = ProviderBuilder::default()
                    .filler(filler)
                    .wallet(EthereumWallet::from(signer))
                    .connect_client(client);
                tracing::info!(%chain, %address, "Wallet connected to EVM provider");
                Some(ConnectedWallet { address, provider })
            }
        };

        Ok(Self {
            chain,
            eip1559: config.eip1559(),
            confirmations: config.confirmations().max(1),
            reader,
            wallet,
        })
    }

    pub fn chain(&self) -> ChainId {
        self.chain
    }

    /// Combines the receipt with the transferred value, which only the
    /// transaction itself carries.
    async fn payment_receipt(
        &self,
        receipt: TransactionReceipt,
    ) -> Result<PaymentReceipt, ChainError> {
        let tx_hash = receipt.transaction_hash;
        let transaction = self
            .reader
            .get_transaction_by_hash(tx_hash)
            .await
            .map_err(rpc_error)?
            .ok_or_else(|| ChainError::Rpc(format!("transaction {tx_hash} not found")))?;
        Ok(PaymentReceipt {
            tx_hash,
            block_number: receipt.block_number,
            from: receipt.from,
            to: receipt.to.or_else(|| transaction.to()),
            value: transaction.value(),
        })
    }
}

impl ChainClient for Eip155ChainClient {
    fn connected_address(&self) -> Option<Address> {
        self.wallet.as_ref().map(|wallet| wallet.address)
    }

    #[instrument(skip(self), fields(chain = %self.chain), err)]
    async fn submit(&self, to: Address, amount: U256) -> Result<TxHash, ChainError> {
        let wallet = self
            .wallet
            .as_ref()
            .ok_or_else(|| ChainError::SigningDeclined("no wallet is connected".to_string()))?;
        let mut txr = TransactionRequest::default()
            .with_from(wallet.address)
            .with_to(to)
            .with_value(amount);

        if !self.eip1559 {
            let gas: u128 = wallet.provider.get_gas_price().await.map_err(rpc_error)?;
            txr.set_gas_price(gas);
        }

        let pending = wallet
            .provider
            .send_transaction(txr)
            .await
            .map_err(send_error)?;
        let tx_hash = *pending.tx_hash();
        tracing::info!(%tx_hash, from = %wallet.address, %to, %amount, "Transfer broadcast");
        Ok(tx_hash)
    }

    #[instrument(skip(self), fields(chain = %self.chain), err)]
    async fn await_confirmation(
        &self,
        tx: TxHash,
        timeout: Duration,
    ) -> Result<PaymentReceipt, ChainError> {
        let watcher = PendingTransactionBuilder::new(self.reader.clone(), tx)
            .with_required_confirmations(self.confirmations)
            .with_timeout(Some(timeout));
        // The watcher's own timeout is not applied to a transaction that was
        // already mined when the watch started.
        let receipt = tokio::time::timeout(timeout, watcher.get_receipt())
            .await
            .map_err(|_| ChainError::ConfirmationTimeout(tx))?
            .map_err(|err| watch_error(tx, err))?;
        if !receipt.status() {
            return Err(ChainError::TransactionReverted(tx));
        }
        self.payment_receipt(receipt).await
    }
}

fn rpc_error(err: TransportError) -> ChainError {
    ChainError::Rpc(err.to_string())
}

fn watch_error(tx: TxHash, err: PendingTransactionError) -> ChainError {
    match err {
        PendingTransactionError::TxWatcher(WatchTxError::Timeout) => {
            ChainError::ConfirmationTimeout(tx)
        }
        other => ChainError::Rpc(other.to_string()),
    }
}

/// Signing happens locally inside the wallet filler; anything else failed on
/// the way to, or inside, the node.
fn send_error(err: TransportError) -> ChainError {
    match err {
        RpcError::LocalUsageError(err) => ChainError::SigningDeclined(err.to_string()),
        other => ChainError::BroadcastError(other.to_string()),
    }
}
