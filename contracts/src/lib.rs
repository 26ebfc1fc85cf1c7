//! # BIOGATE Contracts
//!
//! Stateful logic for biometric-gated fund release. A user binds an account
//! to a user id, deposits into a custodial balance, and an administrator
//! releases part of that balance to a third party only after the user has
//! presented a secret matching a commitment recorded at initiation.
//!
//! - **Identity Registry**: write-once, injective account <-> user id
//!   bindings.
//! - **Ledger**: per-account balances with checked credit/debit.
//! - **Transaction Store**: release records and per-user initiation logs.
//! - **Vault**: the contract itself: `initiate -> verify -> complete`,
//!   deposits and withdrawals, guarded against re-entrant fund movement.
//!
//! ## Design Principles
//!
//! 1. All monetary operations check for overflow. `checked_add` and
//!    `checked_sub` everywhere.
//! 2. Fund-moving operations reserve funds and mark state *before* the
//!    external transfer and roll back completely if it fails.
//! 3. Fund-moving calls from different threads are serialized. A
//!    per-instance [`reentrancy::ReentrancyGuard`] rejects, rather than
//!    blocks, any fund-moving call made from inside a payout.
//! 4. Every public type is serializable (serde) for snapshots and tooling.

pub mod events;
pub mod identity_registry;
pub mod ledger;
pub mod payout;
pub mod reentrancy;
pub mod transaction_store;
pub mod vault;

pub use events::{LoggedEvent, VaultEvent};
pub use identity_registry::{IdentityRegistry, RegistryError};
pub use ledger::{Ledger, LedgerError};
pub use payout::{InMemoryRail, PayoutRail, TransferError};
pub use reentrancy::{ReentrancyError, ReentrancyGuard};
pub use transaction_store::{TransactionRecord, TransactionStatus, TransactionStore, TransactionView};
pub use vault::{BiometricVault, ReleaseRequest, VaultError, VaultSnapshot};
