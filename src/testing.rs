//! Scripted collaborators shared by unit tests.

use alloy_primitives::{Address, TxHash, U256, address};
use std::collections::VecDeque;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::Semaphore;

use crate::chain::{ChainClient, ChainError, PaymentReceipt};
use crate::payment::PaymentTerms;
use crate::util::MoneyAmount;

pub const WALLET: Address = address!("0xf39Fd6e51aad88F6F4ce6aB8827279cffFb92266");
pub const PAYEE: Address = address!("0x549e8F736D8DB98b5479160333fcaEb812EAF1fa");

pub fn terms() -> PaymentTerms {
    PaymentTerms::new(PAYEE, MoneyAmount::parse("0.001").unwrap()).unwrap()
}

pub fn tx_hash(n: u8) -> TxHash {
    TxHash::repeat_byte(n)
}

/// A receipt that pays exactly what [`terms`] asks for.
pub fn receipt(tx: TxHash) -> PaymentReceipt {
    PaymentReceipt {
        tx_hash: tx,
        block_number: Some(42),
        from: WALLET,
        to: Some(PAYEE),
        value: U256::from(1_000_000_000_000_000u64),
    }
}

/// Confirmation outcome scripted for [`MockChain::await_confirmation`].
pub enum Confirmation {
    Done(Result<PaymentReceipt, ChainError>),
    /// Never resolves; the caller has to give up.
    Hang,
}

/// A chain whose answers are queued up front.
///
/// Submissions hand out `tx_hash(1)`, `tx_hash(2)`, ... unless an error is
/// queued. With `hold_submissions` every submission waits for a permit on
/// `submit_permits`.
pub struct MockChain {
    pub address: Option<Address>,
    pub submit_errors: Mutex<VecDeque<ChainError>>,
    pub confirmations: Mutex<VecDeque<Confirmation>>,
    pub submit_calls: AtomicUsize,
    pub confirm_calls: AtomicUsize,
    pub hold_submissions: bool,
    pub submit_permits: Semaphore,
}

impl MockChain {
    pub fn connected() -> Self {
        Self {
            address: Some(WALLET),
            submit_errors: Mutex::new(VecDeque::new()),
            confirmations: Mutex::new(VecDeque::new()),
            submit_calls: AtomicUsize::new(0),
            confirm_calls: AtomicUsize::new(0),
            hold_submissions: false,
            submit_permits: Semaphore::new(0),
        }
    }

    pub fn disconnected() -> Self {
        Self {
            address: None,
            ..Self::connected()
        }
    }

    pub fn holding_submissions(mut self) -> Self {
        self.hold_submissions = true;
        self
    }

    pub fn fail_next_submit(&self, err: ChainError) {
        self.submit_errors.lock().unwrap().push_back(err);
    }

    pub fn script(&self, confirmation: Confirmation) {
        self.confirmations.lock().unwrap().push_back(confirmation);
    }

    pub fn confirm_with(&self, result: Result<PaymentReceipt, ChainError>) {
        self.script(Confirmation::Done(result));
    }

    pub fn submit_count(&self) -> usize {
        self.submit_calls.load(Ordering::SeqCst)
    }
}

impl ChainClient for MockChain {
    fn connected_address(&self) -> Option<Address> {
        self.address
    }

    async fn submit(&self, _to: Address, _amount: U256) -> Result<TxHash, ChainError> {
        let n = self.submit_calls.fetch_add(1, Ordering::SeqCst) + 1;
        if self.hold_submissions {
            let permit = self.submit_permits.acquire().await;
            permit.unwrap().forget();
        }
        let queued = self.submit_errors.lock().unwrap().pop_front();
        match queued {
            Some(err) => Err(err),
            None => Ok(tx_hash(n as u8)),
        }
    }

    async fn await_confirmation(
        &self,
        tx: TxHash,
        _timeout: Duration,
    ) -> Result<PaymentReceipt, ChainError> {
        self.confirm_calls.fetch_add(1, Ordering::SeqCst);
        let next = self.confirmations.lock().unwrap().pop_front();
        match next {
            Some(Confirmation::Done(result)) => result,
            Some(Confirmation::Hang) => std::future::pending().await,
            None => Ok(receipt(tx)),
        }
    }
}
