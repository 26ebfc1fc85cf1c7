//! # Custodial Ledger
//!
//! Per-account balances in the smallest currency unit. The ledger is pure
//! bookkeeping: it never talks to the outside world. The vault decides when
//! to debit, when to pay out, and when to roll a debit back.
//!
//! Invariants:
//!
//! - A balance never goes below zero; a debit that would is rejected.
//! - A credit that would overflow `u64` is rejected, not wrapped.
//! - Every successful credit or debit changes exactly one balance by exactly
//!   the requested amount.
//! - Funds held for an in-flight payout ([`Ledger::reserve`]) still count
//!   toward the account's headroom, so `available + reserved <= u64::MAX`
//!   always holds and handing a reservation back cannot overflow.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use thiserror::Error;

use biogate_protocol::AccountId;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Errors that can occur during balance operations.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum LedgerError {
    /// Attempted to debit more than the available balance.
    #[error("insufficient balance for {account}: available {available}, requested {requested}")]
    InsufficientBalance {
        /// The account being debited.
        account: AccountId,
        /// The current balance.
        available: u64,
        /// The amount that was requested.
        requested: u64,
    },

    /// Arithmetic overflow during a credit.
    #[error("balance overflow for {account}: current {current}, credit {credit}")]
    Overflow {
        /// The account being credited.
        account: AccountId,
        /// The balance before the failed credit.
        current: u64,
        /// The amount that caused the overflow.
        credit: u64,
    },

    /// Zero-amount movements are rejected; they are no-ops at best and a
    /// caller bug at worst.
    #[error("zero-amount operations are not permitted")]
    ZeroAmount,
}

// ---------------------------------------------------------------------------
// Ledger
// ---------------------------------------------------------------------------

/// Balance table keyed by account.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Ledger {
    balances: HashMap<AccountId, u64>,
    #[serde(default)]
    reserved: HashMap<AccountId, u64>,
}

impl Ledger {
    /// Creates an empty ledger.
    pub fn new() -> Self {
        Self::default()
    }

    /// Current balance of `account`; zero for unknown accounts.
    pub fn balance_of(&self, account: &AccountId) -> u64 {
        self.balances.get(account).copied().unwrap_or(0)
    }

    /// Amount of `account` currently held for an unsettled payout.
    pub fn reserved_of(&self, account: &AccountId) -> u64 {
        self.reserved.get(account).copied().unwrap_or(0)
    }

    /// Credits `amount` to `account` and returns the new balance.
    ///
    /// # Errors
    ///
    /// [`LedgerError::ZeroAmount`] for `amount == 0`,
    /// [`LedgerError::Overflow`] if the balance plus any reservation would
    /// exceed `u64::MAX`.
    pub fn credit(&mut self, account: &AccountId, amount: u64) -> Result<u64, LedgerError> {
        if amount == 0 {
            return Err(LedgerError::ZeroAmount);
        }
        let current = self.balance_of(account);
        let overflow = || LedgerError::Overflow {
            account: account.clone(),
            current,
            credit: amount,
        };
        let updated = current.checked_add(amount).ok_or_else(overflow)?;
        updated
            .checked_add(self.reserved_of(account))
            .ok_or_else(overflow)?;
        self.balances.insert(account.clone(), updated);
        Ok(updated)
    }

    /// Debits `amount` from `account` and returns the new balance.
    ///
    /// # Errors
    ///
    /// [`LedgerError::ZeroAmount`] for `amount == 0`,
    /// [`LedgerError::InsufficientBalance`] if the balance is below `amount`.
    pub fn debit(&mut self, account: &AccountId, amount: u64) -> Result<u64, LedgerError> {
        if amount == 0 {
            return Err(LedgerError::ZeroAmount);
        }
        let available = self.balance_of(account);
        let updated = available
            .checked_sub(amount)
            .ok_or(LedgerError::InsufficientBalance {
                account: account.clone(),
                available,
                requested: amount,
            })?;
        self.balances.insert(account.clone(), updated);
        Ok(updated)
    }

    /// Moves `amount` from the available balance of `account` into a
    /// reservation and returns the remaining available balance. The funds
    /// stay in custody until [`settle`](Self::settle) or
    /// [`release`](Self::release).
    ///
    /// # Errors
    ///
    /// Same as [`debit`](Self::debit).
    pub fn reserve(&mut self, account: &AccountId, amount: u64) -> Result<u64, LedgerError> {
        let remaining = self.debit(account, amount)?;
        let held = self.reserved.entry(account.clone()).or_insert(0);
        // available + reserved was <= u64::MAX before the move.
        *held = held.saturating_add(amount);
        Ok(remaining)
    }

    /// Drops up to `amount` of the reservation on `account`: the payout went
    /// out.
    pub fn settle(&mut self, account: &AccountId, amount: u64) {
        let taken = self.take_reserved(account, amount);
        debug_assert_eq!(taken, amount, "settled more than was reserved");
    }

    /// Returns up to `amount` of the reservation on `account` to its
    /// available balance. Never fails.
    pub fn release(&mut self, account: &AccountId, amount: u64) {
        let taken = self.take_reserved(account, amount);
        debug_assert_eq!(taken, amount, "released more than was reserved");
        if taken == 0 {
            return;
        }
        let balance = self.balances.entry(account.clone()).or_insert(0);
        // `credit` keeps available + reserved within u64, so this is exact.
        *balance = balance.saturating_add(taken);
    }

    fn take_reserved(&mut self, account: &AccountId, amount: u64) -> u64 {
        match self.reserved.get_mut(account) {
            Some(held) => {
                let taken = amount.min(*held);
                *held -= taken;
                if *held == 0 {
                    self.reserved.remove(account);
                }
                taken
            }
            None => 0,
        }
    }

    /// Sum of all custodial funds, reservations included. `u128` so the sum
    /// itself cannot overflow.
    pub fn total(&self) -> u128 {
        self.balances
            .values()
            .chain(self.reserved.values())
            .map(|b| *b as u128)
            .sum()
    }

    /// Iterates `(account, balance)` pairs in arbitrary order.
    pub fn balances(&self) -> impl Iterator<Item = (&AccountId, u64)> {
        self.balances.iter().map(|(a, b)| (a, *b))
    }
}
