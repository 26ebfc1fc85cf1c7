//! # Transaction Store
//!
//! Release records keyed by their externally supplied id, plus a per-user
//! log of ids in initiation order. The store only holds data; every state
//! transition is decided by [`crate::vault::BiometricVault`].
//!
//! Existence is the presence of a record in the map. A zero amount is never
//! used to mean "absent", and the vault refuses zero-amount releases anyway.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

use biogate_protocol::{AccountId, SecretCommitment};

// ---------------------------------------------------------------------------
// Status
// ---------------------------------------------------------------------------

/// Lifecycle position of a release, derived from its flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransactionStatus {
    /// Initiated, awaiting verification.
    Pending,
    /// A verification attempt after the deadline flagged the record.
    Expired,
    /// The owner presented the matching secret.
    Verified,
    /// Funds were paid out. Terminal.
    Completed,
}

impl fmt::Display for TransactionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransactionStatus::Pending => write!(f, "Pending"),
            TransactionStatus::Expired => write!(f, "Expired"),
            TransactionStatus::Verified => write!(f, "Verified"),
            TransactionStatus::Completed => write!(f, "Completed"),
        }
    }
}

// ---------------------------------------------------------------------------
// Record
// ---------------------------------------------------------------------------

/// A single biometric-gated release.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransactionRecord {
    /// Externally supplied unique id.
    pub id: String,
    /// The user whose balance funds the release.
    pub user_id: String,
    /// Free-form description supplied by the administrator.
    pub description: String,
    /// Amount to release, in smallest units. Never zero.
    pub amount: u64,
    /// Commitment to the secret the owner must present.
    pub commitment: SecretCommitment,
    /// Set once the owner presents the matching secret.
    pub verified: bool,
    /// Set once funds are paid out. Terminal.
    pub completed: bool,
    /// Set by a verification attempt after `expires_at`. Informational.
    pub expired: bool,
    /// When the record was initiated.
    pub created_at: DateTime<Utc>,
    /// Verification deadline.
    pub expires_at: DateTime<Utc>,
    /// When the payout succeeded.
    pub completed_at: Option<DateTime<Utc>>,
    /// Where the payout went.
    pub recipient: Option<AccountId>,
}

impl TransactionRecord {
    /// Status derived from the flags. `completed` wins over `verified`, which
    /// wins over `expired`.
    pub fn status(&self) -> TransactionStatus {
        if self.completed {
            TransactionStatus::Completed
        } else if self.verified {
            TransactionStatus::Verified
        } else if self.expired {
            TransactionStatus::Expired
        } else {
            TransactionStatus::Pending
        }
    }
}

/// Read-only projection of a record. Lookups of unknown ids return
/// `TransactionView::default()`, which has `exists == false`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionView {
    pub exists: bool,
    pub id: String,
    pub user_id: String,
    pub description: String,
    pub amount: u64,
    /// Hex digest of the secret commitment.
    pub commitment: Option<String>,
    pub verified: bool,
    pub completed: bool,
    pub expired: bool,
    pub status: Option<TransactionStatus>,
    pub created_at: Option<DateTime<Utc>>,
    pub expires_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub recipient: Option<AccountId>,
}

impl From<&TransactionRecord> for TransactionView {
    fn from(r: &TransactionRecord) -> Self {
        Self {
            exists: true,
            id: r.id.clone(),
            user_id: r.user_id.clone(),
            description: r.description.clone(),
            amount: r.amount,
            commitment: Some(r.commitment.to_hex()),
            verified: r.verified,
            completed: r.completed,
            expired: r.expired,
            status: Some(r.status()),
            created_at: Some(r.created_at),
            expires_at: Some(r.expires_at),
            completed_at: r.completed_at,
            recipient: r.recipient.clone(),
        }
    }
}

// ---------------------------------------------------------------------------
// Store
// ---------------------------------------------------------------------------

/// Records by id and append-only per-user logs.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TransactionStore {
    records: HashMap<String, TransactionRecord>,
    user_logs: HashMap<String, Vec<String>>,
}

impl TransactionStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `true` if a record with `id` exists.
    pub fn contains(&self, id: &str) -> bool {
        self.records.contains_key(id)
    }

    /// Inserts a new record and appends its id to the owner's log.
    ///
    /// Returns `false`, leaving the store untouched, if the id is taken.
    pub fn create(&mut self, record: TransactionRecord) -> bool {
        if self.records.contains_key(&record.id) {
            return false;
        }
        self.user_logs
            .entry(record.user_id.clone())
            .or_default()
            .push(record.id.clone());
        self.records.insert(record.id.clone(), record);
        true
    }

    pub fn get(&self, id: &str) -> Option<&TransactionRecord> {
        self.records.get(id)
    }

    pub fn get_mut(&mut self, id: &str) -> Option<&mut TransactionRecord> {
        self.records.get_mut(id)
    }

    /// Puts back a previously cloned record, used to undo a failed payout.
    /// Does nothing for unknown ids and never touches the user logs.
    pub fn restore(&mut self, record: TransactionRecord) {
        if let Some(slot) = self.records.get_mut(&record.id) {
            *slot = record;
        }
    }

    /// Ids initiated for `user_id`, oldest first.
    pub fn user_log(&self, user_id: &str) -> &[String] {
        self.user_logs.get(user_id).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn records(&self) -> impl Iterator<Item = &TransactionRecord> {
        self.records.values()
    }

    pub fn user_logs(&self) -> impl Iterator<Item = (&str, &[String])> {
        self.user_logs
            .iter()
            .map(|(u, ids)| (u.as_str(), ids.as_slice()))
    }
}
