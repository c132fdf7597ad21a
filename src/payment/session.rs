use alloy_primitives::{Address, TxHash};
use serde::Serialize;
use std::fmt;

use crate::chain::PaymentReceipt;
use crate::payment::PaymentTerms;
use crate::util::MoneyAmount;

/// Where the current session stands on its way to write access.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum PaymentState {
    Disconnected,
    Connected,
    Submitting,
    PendingConfirmation,
    Confirmed,
    Failed,
}

impl PaymentState {
    /// A payment has been started and has not yet succeeded or failed.
    pub fn is_in_flight(&self) -> bool {
        matches!(self, PaymentState::Submitting | PaymentState::PendingConfirmation)
    }
}

impl fmt::Display for PaymentState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            PaymentState::Disconnected => "disconnected",
            PaymentState::Connected => "connected",
            PaymentState::Submitting => "submitting",
            PaymentState::PendingConfirmation => "pending confirmation",
            PaymentState::Confirmed => "confirmed",
            PaymentState::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// Something that happened to the session: a wallet callback, a chain
/// response or a user request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PaymentEvent {
    WalletConnected(Address),
    WalletDisconnected,
    SubmissionStarted,
    TransactionSubmitted(TxHash),
    SubmissionFailed(String),
    PaymentConfirmed(PaymentReceipt),
    ConfirmationFailed(String),
    Reset,
}

impl PaymentEvent {
    fn name(&self) -> &'static str {
        match self {
            PaymentEvent::WalletConnected(_) => "connect wallet",
            PaymentEvent::WalletDisconnected => "disconnect wallet",
            PaymentEvent::SubmissionStarted => "start submission",
            PaymentEvent::TransactionSubmitted(_) => "record transaction",
            PaymentEvent::SubmissionFailed(_) => "fail submission",
            PaymentEvent::PaymentConfirmed(_) => "confirm payment",
            PaymentEvent::ConfirmationFailed(_) => "fail confirmation",
            PaymentEvent::Reset => "reset",
        }
    }
}

/// An event that is not allowed in the session's current state.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("cannot {event} while {from}")]
pub struct TransitionError {
    pub from: PaymentState,
    pub event: &'static str,
}

/// The one payment session of this service instance.
///
/// Only [`PaymentSession::apply`] changes it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentSession {
    pub wallet_address: Option<Address>,
    pub required_amount: MoneyAmount,
    pub payee_address: Address,
    pub submitted_tx_hash: Option<TxHash>,
    pub state: PaymentState,
    pub receipt: Option<PaymentReceipt>,
    pub last_error: Option<String>,
}

impl PaymentSession {
    pub fn new(terms: &PaymentTerms) -> Self {
        Self {
            wallet_address: None,
            required_amount: terms.amount.clone(),
            payee_address: terms.payee,
            submitted_tx_hash: None,
            state: PaymentState::Disconnected,
            receipt: None,
            last_error: None,
        }
    }

    pub fn is_authorized(&self) -> bool {
        self.state == PaymentState::Confirmed
    }

    /// Applies `event`, or leaves the session untouched and reports why not.
    pub fn apply(&mut self, event: PaymentEvent) -> Result<(), TransitionError> {
        use PaymentState::*;

        let rejected = TransitionError {
            from: self.state,
            event: event.name(),
        };
        match (self.state, event) {
            (Disconnected, PaymentEvent::WalletConnected(address)) => {
                self.wallet_address = Some(address);
                self.state = Connected;
            }
            (Connected | Failed, PaymentEvent::SubmissionStarted) => {
                self.submitted_tx_hash = None;
                self.last_error = None;
                self.state = Submitting;
            }
            (Submitting, PaymentEvent::TransactionSubmitted(tx_hash)) => {
                self.submitted_tx_hash = Some(tx_hash);
                self.state = PendingConfirmation;
            }
            (Submitting, PaymentEvent::SubmissionFailed(reason))
            | (PendingConfirmation, PaymentEvent::ConfirmationFailed(reason)) => {
                self.last_error = Some(reason);
                self.state = Failed;
            }
            (PendingConfirmation, PaymentEvent::PaymentConfirmed(receipt)) => {
                self.receipt = Some(receipt);
                self.state = Confirmed;
            }
            (state, PaymentEvent::Reset) if !state.is_in_flight() => {
                self.clear_payment();
                self.state = if self.wallet_address.is_some() {
                    Connected
                } else {
                    Disconnected
                };
            }
            (state, PaymentEvent::WalletDisconnected) if !state.is_in_flight() => {
                self.clear_payment();
                self.wallet_address = None;
                self.state = Disconnected;
            }
            _ => return Err(rejected),
        }
        Ok(())
    }

    fn clear_payment(&mut self) {
        self.submitted_tx_hash = None;
        self.receipt = None;
        self.last_error = None;
    }
}
