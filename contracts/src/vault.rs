//! # Biometric Vault
//!
//! The contract that ties the registry, the ledger and the transaction store
//! together and runs the three-step release protocol:
//!
//! 1. **Initiate**: the administrator creates a release for a user, with an
//!    amount, a deadline and a commitment to the user's secret.
//! 2. **Verify**: the user's own account presents the secret before the
//!    deadline. A late attempt flags the record as expired and fails.
//! 3. **Complete**: the administrator pays the verified amount out of the
//!    user's balance to a recipient.
//!
//! ```text
//!   Uninitiated --initiate--> Pending --verify--> Verified --complete--> Completed
//!                                |
//!                                +--verify after deadline--> (expired flag set)
//! ```
//!
//! ## Concurrency
//!
//! Every mutating call takes the state mutex for its bookkeeping, so calls on
//! one instance are serialized. `withdraw` and `complete` additionally hold
//! the fund lock, a [`ReentrantMutex`], and the [`ReentrancyGuard`] for their
//! whole duration. Fund movements on other threads block on the fund lock
//! until the current one finishes. A callback on the paying thread gets
//! through the fund lock and is rejected by the guard.
//!
//! The amount is moved into a ledger reservation (and, for `complete`, the
//! record is marked) *before* calling the [`PayoutRail`], with the state
//! mutex released, so a callback observes the reduced balance. If the rail
//! fails, the reservation is handed back and the record restored before the
//! error is returned. A reservation still counts toward the account's
//! headroom, so handing it back cannot overflow even if the callback
//! deposited in the meantime.

use chrono::{DateTime, Duration, Utc};
use parking_lot::{Mutex, ReentrantMutex};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};

use biogate_protocol::config::{format_units, MAX_TRANSACTION_ID_LEN};
use biogate_protocol::{AccountId, Clock, GateConfig, SecretCommitment, SystemClock};

use crate::events::{EventLog, LoggedEvent, VaultEvent};
use crate::identity_registry::{IdentityRegistry, RegistryError};
use crate::ledger::{Ledger, LedgerError};
use crate::payout::{PayoutRail, TransferError};
use crate::reentrancy::{GuardPermit, ReentrancyError, ReentrancyGuard};
use crate::transaction_store::{TransactionRecord, TransactionStore, TransactionView};

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Every way a vault operation can fail.
#[derive(Debug, Error)]
pub enum VaultError {
    /// The operation is reserved for the administrator.
    #[error("admin only: {0} is not the administrator")]
    AdminOnly(AccountId),

    /// The caller is not the account bound to the user id.
    #[error("unauthorized: {account} may not act for user '{user_id}'")]
    Unauthorized {
        /// The calling account.
        account: AccountId,
        /// The user id it tried to act for.
        user_id: String,
    },

    /// Registration conflict.
    #[error("registry error: {0}")]
    Registry(#[from] RegistryError),

    /// Balance rule violated (insufficient funds, overflow, zero amount).
    #[error("ledger error: {0}")]
    Ledger(#[from] LedgerError),

    /// A fund-moving call arrived while another was still in flight.
    #[error("withdraw failed: {0}")]
    Reentrancy(#[from] ReentrancyError),

    /// The payout rail failed; all state was rolled back.
    #[error("transfer failed: {0}")]
    TransferFailed(#[from] TransferError),

    /// The user id has no registered account.
    #[error("user '{0}' is not registered")]
    UnknownUser(String),

    #[error("transaction '{0}' already exists")]
    TransactionAlreadyExists(String),

    #[error("transaction '{0}' not found")]
    TransactionNotFound(String),

    #[error("transaction '{0}' is already completed")]
    TransactionAlreadyCompleted(String),

    #[error("transaction '{0}' has not been verified")]
    TransactionNotVerified(String),

    /// Verification was attempted after the deadline.
    #[error("transaction '{id}' expired at {expires_at}")]
    TransactionExpired {
        /// The transaction id.
        id: String,
        /// Its deadline.
        expires_at: DateTime<Utc>,
    },

    /// The presented secret does not hash to the recorded commitment.
    #[error("transaction '{0}': presented data does not match the commitment")]
    TransactionDataMismatch(String),

    #[error("invalid transaction id: {0}")]
    InvalidTransactionId(String),

    #[error("description is {len} bytes, limit is {max}")]
    DescriptionTooLong {
        /// Actual length.
        len: usize,
        /// Configured limit.
        max: usize,
    },

    #[error("invalid deadline: {0}")]
    InvalidDeadline(String),
}

// ---------------------------------------------------------------------------
// Requests & snapshots
// ---------------------------------------------------------------------------

/// Parameters of [`BiometricVault::initiate`].
#[derive(Clone)]
pub struct ReleaseRequest {
    /// Externally supplied unique id.
    pub id: String,
    /// The user whose balance funds the release.
    pub user_id: String,
    /// Free-form description.
    pub description: String,
    /// Amount in smallest units. Must be nonzero.
    pub amount: u64,
    /// The secret to commit to. Only its digest is kept.
    pub secret: Vec<u8>,
    /// Verification deadline.
    pub expires_at: DateTime<Utc>,
}

impl ReleaseRequest {
    /// A request with an empty description.
    pub fn new(
        id: impl Into<String>,
        user_id: impl Into<String>,
        amount: u64,
        secret: impl Into<Vec<u8>>,
        expires_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: id.into(),
            user_id: user_id.into(),
            description: String::new(),
            amount,
            secret: secret.into(),
            expires_at,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }
}

impl fmt::Debug for ReleaseRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReleaseRequest")
            .field("id", &self.id)
            .field("user_id", &self.user_id)
            .field("description", &self.description)
            .field("amount", &self.amount)
            .field("secret", &"<redacted>")
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

/// A point-in-time, deterministic view of the whole vault.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VaultSnapshot {
    pub taken_at: DateTime<Utc>,
    pub admin: AccountId,
    /// user id -> account.
    pub bindings: BTreeMap<String, AccountId>,
    pub balances: BTreeMap<AccountId, u64>,
    pub transactions: BTreeMap<String, TransactionView>,
    pub user_logs: BTreeMap<String, Vec<String>>,
    pub total_balance: u128,
}

// ---------------------------------------------------------------------------
// Vault
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
struct VaultState {
    registry: IdentityRegistry,
    ledger: Ledger,
    transactions: TransactionStore,
    events: EventLog,
}

/// The biometric-gated release contract.
pub struct BiometricVault {
    config: GateConfig,
    clock: Arc<dyn Clock>,
    rail: Arc<dyn PayoutRail>,
    state: Mutex<VaultState>,
    fund_lock: ReentrantMutex<()>,
    fund_guard: ReentrancyGuard,
}

impl fmt::Debug for BiometricVault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BiometricVault")
            .field("config", &self.config)
            .field("transfer_in_progress", &self.fund_guard.is_entered())
            .finish_non_exhaustive()
    }
}

impl BiometricVault {
    /// Creates an empty vault on wall-clock time.
    pub fn new(config: GateConfig, rail: Arc<dyn PayoutRail>) -> Self {
        Self::with_clock(config, rail, Arc::new(SystemClock))
    }

    /// Creates an empty vault reading time from `clock`.
    pub fn with_clock(config: GateConfig, rail: Arc<dyn PayoutRail>, clock: Arc<dyn Clock>) -> Self {
        Self {
            config,
            clock,
            rail,
            state: Mutex::new(VaultState::default()),
            fund_lock: ReentrantMutex::new(()),
            fund_guard: ReentrancyGuard::new(),
        }
    }

    pub fn config(&self) -> &GateConfig {
        &self.config
    }

    pub fn admin(&self) -> &AccountId {
        &self.config.admin
    }

    /// Returns `true` while a `withdraw` or `complete` is paying out.
    pub fn is_transfer_in_progress(&self) -> bool {
        self.fund_guard.is_entered()
    }

    fn require_admin(&self, caller: &AccountId) -> Result<(), VaultError> {
        if caller != &self.config.admin {
            warn!(caller = %caller, "admin-only operation rejected");
            return Err(VaultError::AdminOnly(caller.clone()));
        }
        Ok(())
    }

    fn enter_fund_guard(
        &self,
        operation: &'static str,
        caller: &AccountId,
    ) -> Result<GuardPermit<'_>, VaultError> {
        self.fund_guard.enter().map_err(|e| {
            warn!(operation, caller = %caller, "re-entrant fund movement rejected");
            VaultError::from(e)
        })
    }

    // -----------------------------------------------------------------------
    // Identity & balances
    // -----------------------------------------------------------------------

    /// Binds the calling account to `user_id`.
    ///
    /// # Errors
    ///
    /// [`RegistryError::AlreadyRegistered`] if the caller already has a
    /// binding, [`RegistryError::UserIdTaken`] if the id is claimed.
    pub fn register(&self, caller: &AccountId, user_id: &str) -> Result<(), VaultError> {
        self.state.lock().registry.register(caller, user_id)?;
        info!(account = %caller, user_id, "identity registered");
        Ok(())
    }

    /// Credits `amount` to the caller's custodial balance and returns the
    /// new balance. Any account may deposit, registered or not.
    pub fn deposit(&self, caller: &AccountId, amount: u64) -> Result<u64, VaultError> {
        let balance = self.state.lock().ledger.credit(caller, amount)?;
        info!(
            account = %caller,
            amount,
            balance,
            display = %format_units(amount),
            "deposit credited"
        );
        Ok(balance)
    }

    /// Pays `amount` of the caller's balance out to the caller.
    ///
    /// The amount is reserved before the payout and handed back if the
    /// payout fails. Fund movements from other threads wait for this one;
    /// a `withdraw` or `complete` made from inside the payout fails with
    /// [`VaultError::Reentrancy`].
    pub fn withdraw(&self, caller: &AccountId, amount: u64) -> Result<(), VaultError> {
        let _serial = self.fund_lock.lock();
        let _permit = self.enter_fund_guard("withdraw", caller)?;

        let remaining = self.state.lock().ledger.reserve(caller, amount)?;
        debug!(account = %caller, amount, remaining, "withdrawal reserved, paying out");

        if let Err(e) = self.rail.transfer(self, caller, amount) {
            self.state.lock().ledger.release(caller, amount);
            warn!(account = %caller, amount, error = %e, "withdrawal payout failed, balance restored");
            return Err(e.into());
        }

        let now = self.clock.now();
        let mut state = self.state.lock();
        state.ledger.settle(caller, amount);
        state.events.push(
            now,
            VaultEvent::Withdrawal {
                account: caller.clone(),
                amount,
            },
        );
        drop(state);
        info!(account = %caller, amount, remaining, "withdrawal completed");
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Release workflow
    // -----------------------------------------------------------------------

    /// Creates a pending release. Administrator only.
    ///
    /// # Errors
    ///
    /// [`VaultError::AdminOnly`], [`VaultError::InvalidTransactionId`],
    /// [`VaultError::TransactionAlreadyExists`], [`LedgerError::ZeroAmount`],
    /// [`VaultError::DescriptionTooLong`], [`VaultError::InvalidDeadline`],
    /// and, when `require_registered_user` is set, [`VaultError::UnknownUser`].
    pub fn initiate(&self, caller: &AccountId, request: ReleaseRequest) -> Result<(), VaultError> {
        self.require_admin(caller)?;
        let now = self.clock.now();
        let mut state = self.state.lock();

        if request.id.is_empty() {
            return Err(VaultError::InvalidTransactionId("must not be empty".into()));
        }
        if request.id.len() > MAX_TRANSACTION_ID_LEN {
            return Err(VaultError::InvalidTransactionId(format!(
                "{} bytes exceeds the {} byte limit",
                request.id.len(),
                MAX_TRANSACTION_ID_LEN
            )));
        }
        if state.transactions.contains(&request.id) {
            return Err(VaultError::TransactionAlreadyExists(request.id));
        }
        if request.amount == 0 {
            return Err(LedgerError::ZeroAmount.into());
        }
        if request.description.len() > self.config.max_description_len {
            return Err(VaultError::DescriptionTooLong {
                len: request.description.len(),
                max: self.config.max_description_len,
            });
        }
        if request.expires_at <= now {
            return Err(VaultError::InvalidDeadline(format!(
                "{} is not after {}",
                request.expires_at, now
            )));
        }
        if let Some(latest) = self.latest_deadline(now) {
            if request.expires_at > latest {
                return Err(VaultError::InvalidDeadline(format!(
                    "{} is beyond the verification window ending {}",
                    request.expires_at, latest
                )));
            }
        }
        if self.config.require_registered_user && state.registry.resolve(&request.user_id).is_none()
        {
            return Err(VaultError::UnknownUser(request.user_id));
        }

        let commitment = SecretCommitment::commit(self.config.commitment_scheme, &request.secret);
        let record = TransactionRecord {
            id: request.id.clone(),
            user_id: request.user_id.clone(),
            description: request.description,
            amount: request.amount,
            commitment,
            verified: false,
            completed: false,
            expired: false,
            created_at: now,
            expires_at: request.expires_at,
            completed_at: None,
            recipient: None,
        };
        let created = state.transactions.create(record);
        debug_assert!(created, "existence was checked under the same lock");

        state.events.push(
            now,
            VaultEvent::TransactionInitiated {
                user_id: request.user_id.clone(),
                tx_id: request.id.clone(),
            },
        );
        info!(
            tx_id = %request.id,
            user_id = %request.user_id,
            amount = request.amount,
            expires_at = %request.expires_at,
            "transaction initiated"
        );
        Ok(())
    }

    fn latest_deadline(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        i64::try_from(self.config.max_verification_window_secs)
            .ok()
            .and_then(Duration::try_seconds)
            .and_then(|window| now.checked_add_signed(window))
    }

    /// Checks the presented secret against the release's commitment.
    ///
    /// Must be called by the account bound to `user_id`, which must own the
    /// release. A mismatch may be retried until the deadline. A call after
    /// the deadline sets the record's `expired` flag and emits
    /// `TransactionFailed` before returning [`VaultError::TransactionExpired`];
    /// that flag is the only state a failed call ever leaves behind.
    pub fn verify(
        &self,
        caller: &AccountId,
        id: &str,
        user_id: &str,
        secret: &[u8],
    ) -> Result<bool, VaultError> {
        let now = self.clock.now();
        let mut guard = self.state.lock();
        let state = &mut *guard;

        if state.registry.resolve(user_id) != Some(caller) {
            warn!(caller = %caller, user_id, tx_id = id, "verification by unbound account rejected");
            return Err(VaultError::Unauthorized {
                account: caller.clone(),
                user_id: user_id.to_string(),
            });
        }

        let record = state
            .transactions
            .get_mut(id)
            .ok_or_else(|| VaultError::TransactionNotFound(id.to_string()))?;

        if record.user_id != user_id {
            warn!(caller = %caller, user_id, tx_id = id, "verification for another user's transaction rejected");
            return Err(VaultError::Unauthorized {
                account: caller.clone(),
                user_id: user_id.to_string(),
            });
        }
        if record.completed {
            return Err(VaultError::TransactionAlreadyCompleted(id.to_string()));
        }
        if now > record.expires_at {
            record.expired = true;
            state.events.push(
                now,
                VaultEvent::TransactionFailed {
                    user_id: user_id.to_string(),
                    tx_id: id.to_string(),
                    reason: "verification deadline passed".into(),
                },
            );
            warn!(tx_id = id, user_id, expires_at = %record.expires_at, "verification after deadline");
            return Err(VaultError::TransactionExpired {
                id: id.to_string(),
                expires_at: record.expires_at,
            });
        }
        if !record.commitment.matches(secret) {
            warn!(tx_id = id, user_id, "presented data does not match commitment");
            return Err(VaultError::TransactionDataMismatch(id.to_string()));
        }

        record.verified = true;
        state.events.push(
            now,
            VaultEvent::TransactionVerified {
                user_id: user_id.to_string(),
                tx_id: id.to_string(),
            },
        );
        info!(tx_id = id, user_id, "transaction verified");
        Ok(true)
    }

    /// Pays a verified release out of the owner's balance to `recipient`.
    /// Administrator only.
    ///
    /// The amount is reserved and the `completed` flag set before the
    /// payout. If the payout fails both are undone and
    /// [`VaultError::TransferFailed`] is returned; no partial completion is
    /// ever visible afterwards.
    ///
    /// Expiry is not re-checked here: a release verified before its deadline
    /// can be completed after it.
    pub fn complete(
        &self,
        caller: &AccountId,
        id: &str,
        recipient: &AccountId,
    ) -> Result<(), VaultError> {
        self.require_admin(caller)?;
        let _serial = self.fund_lock.lock();
        let _permit = self.enter_fund_guard("complete", caller)?;
        let now = self.clock.now();

        let (before, owner) = {
            let mut guard = self.state.lock();
            let state = &mut *guard;

            let record = state
                .transactions
                .get_mut(id)
                .ok_or_else(|| VaultError::TransactionNotFound(id.to_string()))?;
            if !record.verified {
                return Err(VaultError::TransactionNotVerified(id.to_string()));
            }
            if record.completed {
                return Err(VaultError::TransactionAlreadyCompleted(id.to_string()));
            }
            let owner = state
                .registry
                .resolve(&record.user_id)
                .cloned()
                .ok_or_else(|| VaultError::UnknownUser(record.user_id.clone()))?;

            let before = record.clone();
            state.ledger.reserve(&owner, record.amount)?;
            record.completed = true;
            record.completed_at = Some(now);
            record.recipient = Some(recipient.clone());
            (before, owner)
        };

        let amount = before.amount;
        debug!(tx_id = id, owner = %owner, recipient = %recipient, amount, "release reserved, paying out");

        if let Err(e) = self.rail.transfer(self, recipient, amount) {
            let mut state = self.state.lock();
            state.ledger.release(&owner, amount);
            state.transactions.restore(before);
            warn!(tx_id = id, recipient = %recipient, amount, error = %e, "release payout failed, rolled back");
            return Err(e.into());
        }

        let mut state = self.state.lock();
        state.ledger.settle(&owner, amount);
        state.events.push(
            now,
            VaultEvent::TransactionCompleted {
                user_id: before.user_id.clone(),
                tx_id: id.to_string(),
                amount,
                recipient: recipient.clone(),
            },
        );
        drop(state);
        info!(
            tx_id = id,
            user_id = %before.user_id,
            recipient = %recipient,
            amount,
            display = %format_units(amount),
            "transaction completed"
        );
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Read-only projections
    // -----------------------------------------------------------------------

    /// View of a release; `TransactionView::default()` if unknown.
    pub fn transaction(&self, id: &str) -> TransactionView {
        self.state
            .lock()
            .transactions
            .get(id)
            .map(TransactionView::from)
            .unwrap_or_default()
    }

    /// Release ids initiated for `user_id`, oldest first.
    pub fn user_transaction_log(&self, user_id: &str) -> Vec<String> {
        self.state.lock().transactions.user_log(user_id).to_vec()
    }

    /// Balance of the account bound to `user_id`; zero if unregistered.
    pub fn user_balance(&self, user_id: &str) -> u64 {
        let state = self.state.lock();
        state
            .registry
            .resolve(user_id)
            .map(|account| state.ledger.balance_of(account))
            .unwrap_or(0)
    }

    pub fn balance_of(&self, account: &AccountId) -> u64 {
        self.state.lock().ledger.balance_of(account)
    }

    pub fn resolve(&self, user_id: &str) -> Option<AccountId> {
        self.state.lock().registry.resolve(user_id).cloned()
    }

    /// Sum of all custodial balances.
    pub fn total_balance(&self) -> u128 {
        self.state.lock().ledger.total()
    }

    /// All events emitted so far.
    pub fn events(&self) -> Vec<LoggedEvent> {
        self.state.lock().events.entries().to_vec()
    }

    /// Events with sequence number `>= from`.
    pub fn events_since(&self, from: u64) -> Vec<LoggedEvent> {
        self.state.lock().events.since(from).to_vec()
    }

    pub fn snapshot(&self) -> VaultSnapshot {
        let taken_at = self.clock.now();
        let state = self.state.lock();
        VaultSnapshot {
            taken_at,
            admin: self.config.admin.clone(),
            bindings: state
                .registry
                .bindings()
                .map(|(u, a)| (u.to_string(), a.clone()))
                .collect(),
            balances: state
                .ledger
                .balances()
                .map(|(a, b)| (a.clone(), b))
                .collect(),
            transactions: state
                .transactions
                .records()
                .map(|r| (r.id.clone(), TransactionView::from(r)))
                .collect(),
            user_logs: state
                .transactions
                .user_logs()
                .map(|(u, ids)| (u.to_string(), ids.to_vec()))
                .collect(),
            total_balance: state.ledger.total(),
        }
    }
}
