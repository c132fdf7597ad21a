//! Payment gate: the single source of truth for "may the user write to
//! storage now".
//!
//! A [`PaymentSession`] walks through
//! `Disconnected → Connected → Submitting → PendingConfirmation → Confirmed`,
//! with `Failed` reachable from either in-flight state. [`PaymentGate`] owns
//! the session, drives it with a [`ChainClient`](crate::chain::ChainClient)
//! and publishes every transition to subscribers.

mod gate;
mod session;

pub use gate::*;
pub use session::*;

use alloy_primitives::{Address, TxHash, U256};
use serde::Serialize;

use crate::chain::decimal_u256;
use crate::util::{MoneyAmount, MoneyAmountParseError, NATIVE_DECIMALS};

/// What write access costs: `amount` of native coin sent to `payee`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentTerms {
    pub payee: Address,
    pub amount: MoneyAmount,
    #[serde(with = "decimal_u256")]
    pub amount_wei: U256,
}

impl PaymentTerms {
    /// Fails when `amount` has more fractional digits than the native coin.
    pub fn new(payee: Address, amount: MoneyAmount) -> Result<Self, MoneyAmountParseError> {
        let amount_wei = amount.to_base_units(NATIVE_DECIMALS)?;
        Ok(Self {
            payee,
            amount,
            amount_wei,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PaymentError {
    #[error("No wallet is connected")]
    NotConnected,
    #[error("A payment is already in progress")]
    PaymentAlreadyInProgress,
    #[error("Payment was already confirmed for this session")]
    AlreadyConfirmed,
    #[error("No payment is awaiting confirmation")]
    NoPendingPayment,
    /// Signing was declined or the node refused the transaction.
    #[error("Payment submission rejected: {0}")]
    SubmissionRejected(String),
    #[error("Payment transaction {0} failed on chain")]
    TransactionFailed(TxHash),
    #[error("Payment transaction {0} was not confirmed in time")]
    ConfirmationTimeout(TxHash),
    /// The confirmed transaction does not pay what was asked.
    #[error("Payment receipt does not match the requested payment: {0}")]
    ReceiptMismatch(String),
    /// The chain could not be queried. The session is left as it was.
    #[error("Chain unavailable: {0}")]
    ChainUnavailable(String),
}

impl From<TransitionError> for PaymentError {
    fn from(err: TransitionError) -> Self {
        match err.from {
            PaymentState::Disconnected => PaymentError::NotConnected,
            PaymentState::Submitting | PaymentState::PendingConfirmation => {
                PaymentError::PaymentAlreadyInProgress
            }
            PaymentState::Confirmed => PaymentError::AlreadyConfirmed,
            PaymentState::Connected | PaymentState::Failed => PaymentError::NoPendingPayment,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy_primitives::address;

    #[test]
    fn test_terms_convert_to_wei() {
        let terms = PaymentTerms::new(
            address!("0x549e8F736D8DB98b5479160333fcaEb812EAF1fa"),
            MoneyAmount::parse("0.001").unwrap(),
        )
        .unwrap();
        assert_eq!(terms.amount_wei, U256::from(1_000_000_000_000_000u64));
        let json = serde_json::to_value(&terms).unwrap();
        assert_eq!(json["amountWei"], "1000000000000000");
        assert_eq!(json["amount"], "0.001");
    }

    #[test]
    fn test_terms_reject_sub_wei_amounts() {
        let amount = MoneyAmount::parse("0.0000000000000000011").unwrap();
        let result = PaymentTerms::new(Address::ZERO, amount);
        assert!(matches!(
            result,
            Err(MoneyAmountParseError::WrongPrecision { .. })
        ));
    }

    #[test]
    fn test_transition_errors_map_to_payment_errors() {
        let err = TransitionError {
            from: PaymentState::PendingConfirmation,
            event: "start submission",
        };
        assert_eq!(
            PaymentError::from(err),
            PaymentError::PaymentAlreadyInProgress
        );
        let err = TransitionError {
            from: PaymentState::Disconnected,
            event: "start submission",
        };
        assert_eq!(PaymentError::from(err), PaymentError::NotConnected);
    }
}
