//! Configuration module for the storage paygate server.
//!
//! Configuration is a JSON file. Any string value can instead reference an
//! environment variable (`"$PRIVATE_KEY"` or `"${PRIVATE_KEY}"`), which keeps
//! secrets out of the file:
//!
//! ```json
//! {
//!   "port": 8080,
//!   "chain": {
//!     "chain": "eip155:16601",
//!     "rpc": [{ "http": "https://evmrpc-testnet.0g.ai" }],
//!     "signer": "$PRIVATE_KEY"
//!   },
//!   "payment": { "payee": "0x549e8F736D8DB98b5479160333fcaEb812EAF1fa", "amount": "0.001" },
//!   "storage": { "kind": "gateway", "url": "$STORAGE_GATEWAY_URL" }
//! }
//! ```

use alloy_primitives::{Address, B256};
use clap::Parser;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::net::IpAddr;
use std::ops::Deref;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;
use url::Url;

use crate::chain::ChainId;
use crate::util::MoneyAmount;

/// CLI arguments for the storage paygate server.
#[derive(Parser, Debug)]
#[command(name = "storage-paygate")]
#[command(about = "Payment-gated decentralized storage HTTP server")]
struct CliArgs {
    /// Path to the JSON configuration file
    #[arg(long, short, env = "CONFIG", default_value = "config.json")]
    config: PathBuf,
}

/// Server configuration.
///
/// `host` and `port` fall back to environment variables, then to hardcoded
/// defaults. `storage` defaults to the in-memory backend.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default = "config_defaults::default_port")]
    port: u16,
    #[serde(default = "config_defaults::default_host")]
    host: IpAddr,
    chain: ChainConfig,
    payment: PaymentConfig,
    #[serde(default)]
    storage: StorageConfig,
}

/// RPC provider configuration for a single provider.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RpcConfig {
    /// HTTP URL for the RPC endpoint.
    pub http: Url,
    /// Rate limit for requests per second (optional).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rate_limit: Option<u32>,
}

/// The chain payments are made on, and the wallet that pays.
#[derive(Debug, Clone, Deserialize)]
pub struct ChainConfig {
    /// CAIP-2 chain id, e.g. `eip155:16601`.
    chain: ChainId,
    rpc: Vec<RpcConfig>,
    /// Private key of the paying wallet. Without it no wallet is connected.
    #[serde(default)]
    signer: Option<LiteralOrEnv<EvmPrivateKey>>,
    #[serde(default = "chain_config::default_eip1559")]
    eip1559: bool,
    /// Blocks a receipt must be buried under before it counts.
    #[serde(default = "chain_config::default_confirmations")]
    confirmations: u64,
    #[serde(default = "chain_config::default_receipt_timeout_secs")]
    receipt_timeout_secs: u64,
    /// How often the RPC client polls for new blocks and receipts.
    #[serde(default = "chain_config::default_poll_interval_ms")]
    poll_interval_ms: u64,
}

mod chain_config {
    pub fn default_eip1559() -> bool {
        true
    }
    pub fn default_confirmations() -> u64 {
        1
    }
    pub fn default_receipt_timeout_secs() -> u64 {
        60
    }
    pub fn default_poll_interval_ms() -> u64 {
        1_000
    }
}

impl ChainConfig {
    pub fn chain(&self) -> ChainId {
        self.chain
    }
    pub fn rpc(&self) -> &[RpcConfig] {
        &self.rpc
    }
    pub fn signer(&self) -> Option<&EvmPrivateKey> {
        self.signer.as_ref().map(|s| s.inner())
    }
    pub fn eip1559(&self) -> bool {
        self.eip1559
    }
    pub fn confirmations(&self) -> u64 {
        self.confirmations
    }
    pub fn receipt_timeout(&self) -> Duration {
        Duration::from_secs(self.receipt_timeout_secs)
    }
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

/// Price of write access: `amount` of native coin sent to `payee`.
#[derive(Debug, Clone, Deserialize)]
pub struct PaymentConfig {
    payee: LiteralOrEnv<Address>,
    amount: LiteralOrEnv<MoneyAmount>,
}

impl PaymentConfig {
    pub fn payee(&self) -> Address {
        *self.payee.inner()
    }
    pub fn amount(&self) -> &MoneyAmount {
        self.amount.inner()
    }
}

/// Which storage collaborator uploads are forwarded to.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum StorageConfig {
    /// Process-local content-addressed store. Contents vanish on restart.
    #[default]
    Memory,
    /// Remote storage gateway spoken to over HTTP.
    Gateway {
        url: LiteralOrEnv<Url>,
        #[serde(default)]
        timeout_secs: Option<u64>,
    },
}

// ============================================================================
// EVM Private Key
// ============================================================================

/// A validated EVM private key (32 bytes).
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct EvmPrivateKey(B256);

impl EvmPrivateKey {
    pub fn as_b256(&self) -> B256 {
        self.0
    }
}

impl fmt::Debug for EvmPrivateKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("EvmPrivateKey(<redacted>)")
    }
}

impl FromStr for EvmPrivateKey {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        // Keys are often exported without the 0x prefix
        let s = s.trim();
        let prefixed = if s.starts_with("0x") {
            s.to_string()
        } else {
            format!("0x{s}")
        };
        B256::from_str(&prefixed)
            .map(Self)
            .map_err(|_| "Invalid evm private key: expected 64 hex characters".to_string())
    }
}

// ============================================================================
// Environment Variable Resolution
// ============================================================================

/// A transparent wrapper that resolves environment variables during deserialization.
///
/// Supports both literal values and environment variable references:
/// - Literal: `"http://localhost:8083"`
/// - Simple env var: `"$STORAGE_GATEWAY_URL"`
/// - Braced env var: `"${STORAGE_GATEWAY_URL}"`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LiteralOrEnv<T>(T);

impl<T> LiteralOrEnv<T> {
    pub fn from_literal(value: T) -> Self {
        Self(value)
    }

    pub fn inner(&self) -> &T {
        &self.0
    }

    pub fn into_inner(self) -> T {
        self.0
    }

    /// Returns the variable name if the string matches `$VAR` or `${VAR}` syntax.
    fn parse_env_var_syntax(s: &str) -> Option<&str> {
        if let Some(braced) = s.strip_prefix("${").and_then(|s| s.strip_suffix('}')) {
            Some(braced)
        } else if let Some(var_name) = s.strip_prefix('$') {
            let is_name = !var_name.is_empty()
                && var_name.chars().all(|c| c.is_alphanumeric() || c == '_');
            is_name.then_some(var_name)
        } else {
            None
        }
    }
}

impl<T> Deref for LiteralOrEnv<T> {
    type Target = T;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl<'de, T> Deserialize<'de> for LiteralOrEnv<T>
where
    T: FromStr,
    T::Err: fmt::Display,
{
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;

        let value = match Self::parse_env_var_syntax(&s) {
            Some(var_name) => std::env::var(var_name).map_err(|_| {
                serde::de::Error::custom(format!(
                    "Environment variable '{}' not found (referenced as '{}')",
                    var_name, s
                ))
            })?,
            None => s,
        };

        let parsed = value
            .parse::<T>()
            .map_err(|e| serde::de::Error::custom(format!("Failed to parse value: {}", e)))?;

        Ok(LiteralOrEnv(parsed))
    }
}

pub mod config_defaults {
    use std::env;
    use std::net::{IpAddr, Ipv4Addr};

    pub const DEFAULT_PORT: u16 = 8080;
    pub const DEFAULT_HOST: IpAddr = IpAddr::V4(Ipv4Addr::UNSPECIFIED);

    /// Returns the default port value with fallback: $PORT env var -> 8080
    pub fn default_port() -> u16 {
        env::var("PORT")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(DEFAULT_PORT)
    }

    /// Returns the default host value with fallback: $HOST env var -> "0.0.0.0"
    pub fn default_host() -> IpAddr {
        env::var("HOST")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(DEFAULT_HOST)
    }
}

/// Configuration error types.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file at {0}: {1}")]
    FileRead(PathBuf, std::io::Error),
    #[error("Failed to parse config file: {0}")]
    JsonParse(#[from] serde_json::Error),
}

impl Config {
    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn host(&self) -> IpAddr {
        self.host
    }

    pub fn chain(&self) -> &ChainConfig {
        &self.chain
    }

    pub fn payment(&self) -> &PaymentConfig {
        &self.payment
    }

    pub fn storage(&self) -> &StorageConfig {
        &self.storage
    }

    /// Load configuration from CLI arguments and JSON file.
    ///
    /// The config file path is determined by `--config <path>`, then `$CONFIG`,
    /// then `./config.json`.
    pub fn load() -> Result<Self, ConfigError> {
        let cli_args = CliArgs::parse();
        let config_path = Path::new(&cli_args.config)
            .canonicalize()
            .map_err(|e| ConfigError::FileRead(cli_args.config, e))?;
        Self::load_from_path(config_path)
    }

    fn load_from_path(path: PathBuf) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(&path).map_err(|e| ConfigError::FileRead(path, e))?;
        Self::from_json(&content)
    }

    pub fn from_json(content: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(content)?)
    }
}
