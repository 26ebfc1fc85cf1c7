//! # Vault Events
//!
//! Notifications emitted by the vault, kept in an append-only in-memory log
//! and mirrored to `tracing`. The transport layer is expected to drain and
//! forward them; nothing in the vault reads its own events back.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use biogate_protocol::AccountId;

/// Something observable happened to a release or a balance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum VaultEvent {
    /// The administrator created a release.
    #[serde(rename = "transaction_initiated")]
    TransactionInitiated { user_id: String, tx_id: String },
    /// The owner presented the matching secret.
    #[serde(rename = "transaction_verified")]
    TransactionVerified { user_id: String, tx_id: String },
    /// Verification was attempted after the deadline.
    #[serde(rename = "transaction_failed")]
    TransactionFailed {
        user_id: String,
        tx_id: String,
        reason: String,
    },
    /// Funds were paid out to the recipient.
    #[serde(rename = "transaction_completed")]
    TransactionCompleted {
        user_id: String,
        tx_id: String,
        amount: u64,
        recipient: AccountId,
    },
    /// A balance owner withdrew to themselves.
    #[serde(rename = "withdrawal")]
    Withdrawal { account: AccountId, amount: u64 },
}

/// An event with its position in the log and the vault time it was emitted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoggedEvent {
    pub seq: u64,
    pub at: DateTime<Utc>,
    #[serde(flatten)]
    pub event: VaultEvent,
}

/// Append-only event log.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EventLog {
    entries: Vec<LoggedEvent>,
}

impl EventLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends `event` stamped with `at`.
    pub fn push(&mut self, at: DateTime<Utc>, event: VaultEvent) {
        let seq = self.entries.len() as u64;
        self.entries.push(LoggedEvent { seq, at, event });
    }

    pub fn entries(&self) -> &[LoggedEvent] {
        &self.entries
    }

    /// Entries with `seq >= from`, for incremental readers.
    pub fn since(&self, from: u64) -> &[LoggedEvent] {
        let start = usize::try_from(from)
            .unwrap_or(usize::MAX)
            .min(self.entries.len());
        &self.entries[start..]
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
