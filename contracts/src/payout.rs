//! # Payout Rails
//!
//! The external side of a fund movement. When the vault releases funds it
//! has already reserved the amount in the ledger and marked its own state;
//! the rail then moves the money out. A rail that fails makes the vault roll
//! everything back.
//!
//! Rails receive the originating vault so that the receiving end can react,
//! including by calling straight back into it. That is exactly the
//! re-entrancy window the vault's guard closes.

use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use thiserror::Error;

use biogate_protocol::AccountId;

use crate::vault::BiometricVault;

/// Why an external transfer did not go through.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransferError {
    /// The recipient refused or could not accept the funds.
    #[error("recipient {0} rejected the transfer")]
    Rejected(AccountId),

    /// The rail itself is down.
    #[error("payout rail unavailable: {0}")]
    Unavailable(String),
}

/// Moves funds out of the vault to an external account.
pub trait PayoutRail: Send + Sync {
    /// Sends `amount` to `recipient`. Called with no vault locks held other
    /// than the re-entrancy guard.
    fn transfer(
        &self,
        vault: &BiometricVault,
        recipient: &AccountId,
        amount: u64,
    ) -> Result<(), TransferError>;
}

/// A rail that records payouts in memory. Used by tests and the replay tool.
#[derive(Debug, Default)]
pub struct InMemoryRail {
    received: Mutex<HashMap<AccountId, u64>>,
    rejecting: Mutex<HashSet<AccountId>>,
    offline: Mutex<bool>,
}

impl InMemoryRail {
    pub fn new() -> Self {
        Self::default()
    }

    /// Total paid out to `recipient` so far.
    pub fn received(&self, recipient: &AccountId) -> u64 {
        self.received.lock().get(recipient).copied().unwrap_or(0)
    }

    /// Total paid out to everyone.
    pub fn total_paid(&self) -> u128 {
        self.received.lock().values().map(|v| *v as u128).sum()
    }

    /// Snapshot of all payouts.
    pub fn payouts(&self) -> HashMap<AccountId, u64> {
        self.received.lock().clone()
    }

    /// Makes every future transfer to `recipient` fail.
    pub fn reject_transfers_to(&self, recipient: impl Into<AccountId>) {
        self.rejecting.lock().insert(recipient.into());
    }

    /// Takes the whole rail down or brings it back.
    pub fn set_offline(&self, offline: bool) {
        *self.offline.lock() = offline;
    }
}

impl PayoutRail for InMemoryRail {
    fn transfer(
        &self,
        _vault: &BiometricVault,
        recipient: &AccountId,
        amount: u64,
    ) -> Result<(), TransferError> {
        if *self.offline.lock() {
            return Err(TransferError::Unavailable("rail offline".into()));
        }
        if self.rejecting.lock().contains(recipient) {
            return Err(TransferError::Rejected(recipient.clone()));
        }
        let mut received = self.received.lock();
        let entry = received.entry(recipient.clone()).or_insert(0);
        // Recipient-side bookkeeping only.
        *entry = entry.saturating_add(amount);
        Ok(())
    }
}
