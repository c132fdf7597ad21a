use serde::{Deserialize, Deserializer, Serialize, Serializer, de};
use std::fmt;
use std::str::FromStr;

/// The CAIP-2 namespace for EVM-compatible chains.
pub const EIP155_NAMESPACE: &str = "eip155";

/// A CAIP-2 identifier of an EVM chain, written as `eip155:<chain id>`.
///
/// Only the `eip155` namespace is accepted: payments are plain native-coin
/// transfers on an EVM chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ChainId(u64);

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ChainIdError {
    #[error("invalid chain id format: {0}")]
    InvalidFormat(String),
    #[error("unexpected namespace '{0}', expected '{EIP155_NAMESPACE}'")]
    UnexpectedNamespace(String),
    #[error("invalid eip155 reference '{0}'")]
    InvalidReference(String),
}

impl ChainId {
    pub const fn new(reference: u64) -> Self {
        Self(reference)
    }

    /// The numeric EIP-155 chain id, as used for transaction signing.
    pub fn reference(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for ChainId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", EIP155_NAMESPACE, self.0)
    }
}

impl FromStr for ChainId {
    type Err = ChainIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (namespace, reference) = s
            .split_once(':')
            .ok_or_else(|| ChainIdError::InvalidFormat(s.to_string()))?;
        if namespace != EIP155_NAMESPACE {
            return Err(ChainIdError::UnexpectedNamespace(namespace.to_string()));
        }
        let reference = reference
            .parse::<u64>()
            .map_err(|_| ChainIdError::InvalidReference(reference.to_string()))?;
        Ok(ChainId(reference))
    }
}

impl Serialize for ChainId {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for ChainId {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        ChainId::from_str(&s).map_err(de::Error::custom)
    }
}
