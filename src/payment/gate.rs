use alloy_primitives::{Address, TxHash};
use std::time::Duration;
use tokio::sync::watch;
use tracing::instrument;

use crate::chain::{ChainClient, ChainError, PaymentReceipt};
use crate::payment::{PaymentError, PaymentEvent, PaymentSession, PaymentState, PaymentTerms};

/// Owns the payment session and moves it along as the wallet and chain respond.
///
/// Every transition goes through one [`watch::Sender`], so readers see a
/// consistent snapshot and subscribers are woken on each change.
pub struct PaymentGate<C> {
    chain: C,
    terms: PaymentTerms,
    receipt_timeout: Duration,
    session: watch::Sender<PaymentSession>,
}

impl<C> PaymentGate<C>
where
    C: ChainClient,
{
    pub fn new(chain: C, terms: PaymentTerms, receipt_timeout: Duration) -> Self {
        let session = watch::Sender::new(PaymentSession::new(&terms));
        Self {
            chain,
            terms,
            receipt_timeout,
            session,
        }
    }

    pub fn terms(&self) -> &PaymentTerms {
        &self.terms
    }

    pub fn snapshot(&self) -> PaymentSession {
        self.session.borrow().clone()
    }

    /// Receiver that is marked changed on every state transition.
    pub fn subscribe(&self) -> watch::Receiver<PaymentSession> {
        self.session.subscribe()
    }

    pub fn is_authorized(&self) -> bool {
        self.session.borrow().is_authorized()
    }

    /// Picks up the wallet the chain client signs with.
    ///
    /// Connecting again while a wallet is known keeps the session as it is.
    #[instrument(skip(self))]
    pub fn connect_wallet(&self) -> Result<PaymentSession, PaymentError> {
        let address = self.chain.connected_address().ok_or_else(|| {
            tracing::warn!("Wallet connection requested but no wallet is available");
            PaymentError::NotConnected
        })?;
        transition(&self.session, |session| {
            if session.state == PaymentState::Disconnected {
                session.apply(PaymentEvent::WalletConnected(address))?;
            }
            Ok(())
        })?;
        Ok(self.snapshot())
    }

    #[instrument(skip(self))]
    pub fn disconnect_wallet(&self) -> Result<PaymentSession, PaymentError> {
        transition(&self.session, |session| {
            Ok(session.apply(PaymentEvent::WalletDisconnected)?)
        })?;
        Ok(self.snapshot())
    }

    /// Drops the current payment attempt, keeping the wallet.
    #[instrument(skip(self))]
    pub fn reset(&self) -> Result<PaymentSession, PaymentError> {
        transition(&self.session, |session| Ok(session.apply(PaymentEvent::Reset)?))?;
        Ok(self.snapshot())
    }

    /// Pays and waits for the payment to confirm.
    pub async fn request_payment(&self) -> Result<PaymentReceipt, PaymentError> {
        self.submit_payment().await?;
        self.await_confirmation().await
    }

    /// Signs and broadcasts the payment, and returns once the chain accepted it.
    ///
    /// Leaves the session in `PendingConfirmation`. If the returned future is
    /// dropped before the chain answers, the session moves to `Failed`.
    #[instrument(skip(self), fields(payee = %self.terms.payee, amount = %self.terms.amount))]
    pub async fn submit_payment(&self) -> Result<TxHash, PaymentError> {
        transition(&self.session, |session| {
            Ok(session.apply(PaymentEvent::SubmissionStarted)?)
        })?;
        let guard = SubmissionGuard {
            session: &self.session,
            armed: true,
        };
        let submitted = self
            .chain
            .submit(self.terms.payee, self.terms.amount_wei)
            .await;
        guard.disarm();

        match submitted {
            Ok(tx_hash) => {
                transition(&self.session, |session| {
                    Ok(session.apply(PaymentEvent::TransactionSubmitted(tx_hash))?)
                })?;
                Ok(tx_hash)
            }
            Err(err) => {
                let err = PaymentError::SubmissionRejected(err.to_string());
                let reason = err.to_string();
                transition(&self.session, |session| {
                    Ok(session.apply(PaymentEvent::SubmissionFailed(reason))?)
                })?;
                Err(err)
            }
        }
    }

    /// Waits for the submitted payment to confirm and checks what it paid.
    ///
    /// Dropping the returned future leaves the session pending; calling this
    /// again resumes the wait. On a session that is already confirmed the
    /// stored receipt is returned.
    #[instrument(skip(self))]
    pub async fn await_confirmation(&self) -> Result<PaymentReceipt, PaymentError> {
        let (tx_hash, payer) = {
            let session = self.session.borrow();
            match (session.state, session.submitted_tx_hash, &session.receipt) {
                (PaymentState::Confirmed, _, Some(receipt)) => return Ok(receipt.clone()),
                (PaymentState::PendingConfirmation, Some(tx_hash), _) => {
                    (tx_hash, session.wallet_address)
                }
                _ => return Err(PaymentError::NoPendingPayment),
            }
        };

        let confirmed = self
            .chain
            .await_confirmation(tx_hash, self.receipt_timeout)
            .await;
        let err = match confirmed {
            Ok(receipt) => match self.verify_receipt(tx_hash, payer, &receipt) {
                Ok(()) => return self.record_confirmation(tx_hash, receipt),
                Err(reason) => PaymentError::ReceiptMismatch(reason),
            },
            Err(ChainError::TransactionReverted(tx_hash)) => {
                PaymentError::TransactionFailed(tx_hash)
            }
            Err(ChainError::ConfirmationTimeout(tx_hash)) => {
                PaymentError::ConfirmationTimeout(tx_hash)
            }
            Err(err) => {
                tracing::warn!(%tx_hash, error = %err, "Chain unavailable, payment stays pending");
                return Err(PaymentError::ChainUnavailable(err.to_string()));
            }
        };
        let reason = err.to_string();
        transition(&self.session, |session| {
            if session.state == PaymentState::PendingConfirmation
                && session.submitted_tx_hash == Some(tx_hash)
            {
                session.apply(PaymentEvent::ConfirmationFailed(reason))?;
            }
            Ok(())
        })?;
        Err(err)
    }

    fn record_confirmation(
        &self,
        tx_hash: TxHash,
        receipt: PaymentReceipt,
    ) -> Result<PaymentReceipt, PaymentError> {
        transition(&self.session, |session| {
            match (session.state, session.submitted_tx_hash) {
                (PaymentState::PendingConfirmation, Some(pending)) if pending == tx_hash => {
                    Ok(session.apply(PaymentEvent::PaymentConfirmed(receipt.clone()))?)
                }
                // Another waiter on the same transaction got there first
                (PaymentState::Confirmed, Some(confirmed)) if confirmed == tx_hash => Ok(()),
                _ => Err(PaymentError::NoPendingPayment),
            }
        })?;
        Ok(receipt)
    }

    fn verify_receipt(
        &self,
        tx_hash: TxHash,
        payer: Option<Address>,
        receipt: &PaymentReceipt,
    ) -> Result<(), String> {
        if receipt.tx_hash != tx_hash {
            return Err(format!("receipt is for transaction {}", receipt.tx_hash));
        }
        if receipt.to != Some(self.terms.payee) {
            return Err(match receipt.to {
                Some(to) => format!("paid {to} instead of {}", self.terms.payee),
                None => "transaction has no recipient".to_string(),
            });
        }
        if receipt.value < self.terms.amount_wei {
            return Err(format!(
                "paid {} wei, {} wei required",
                receipt.value, self.terms.amount_wei
            ));
        }
        if payer.is_some_and(|payer| payer != receipt.from) {
            return Err(format!("paid from {} instead of the connected wallet", receipt.from));
        }
        Ok(())
    }
}

/// Applies `f` to the session as one atomic step.
///
/// Subscribers are notified only when the session actually changed.
fn transition<F>(session: &watch::Sender<PaymentSession>, f: F) -> Result<(), PaymentError>
where
    F: FnOnce(&mut PaymentSession) -> Result<(), PaymentError>,
{
    let mut outcome = Ok(());
    session.send_if_modified(|session| {
        let before = session.state;
        let snapshot = session.clone();
        outcome = f(session);
        if outcome.is_err() {
            *session = snapshot;
            return false;
        }
        let changed = *session != snapshot;
        if session.state != before {
            tracing::info!(from = %before, to = %session.state, "Payment state changed");
        }
        changed
    });
    if let Err(err) = &outcome {
        tracing::warn!(error = %err, "Payment transition rejected");
    }
    outcome
}

/// Fails the session if a submission is abandoned before the chain answered.
struct SubmissionGuard<'a> {
    session: &'a watch::Sender<PaymentSession>,
    armed: bool,
}

impl SubmissionGuard<'_> {
    fn disarm(mut self) {
        self.armed = false;
    }
}

impl Drop for SubmissionGuard<'_> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let _ = transition(self.session, |session| {
            Ok(session.apply(PaymentEvent::SubmissionFailed(
                "payment submission was abandoned".to_string(),
            ))?)
        });
    }
}
