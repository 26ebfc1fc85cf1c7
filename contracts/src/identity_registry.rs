//! # Identity Registry
//!
//! Binds each account to exactly one human-readable user id, and each user id
//! to exactly one account. Bindings are write-once: there is no update and no
//! delete, so both directions stay injective for the life of the vault.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use thiserror::Error;

use biogate_protocol::config::MAX_USER_ID_LEN;
use biogate_protocol::AccountId;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Errors that can occur while registering an identity.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RegistryError {
    /// The account already has a binding.
    #[error("account {account} is already registered as '{user_id}'")]
    AlreadyRegistered {
        /// The account that tried to register again.
        account: AccountId,
        /// The user id it is already bound to.
        user_id: String,
    },

    /// Another account already claimed this user id.
    #[error("user id '{0}' is already taken")]
    UserIdTaken(String),

    /// The user id is empty or too long.
    #[error("invalid user id: {0}")]
    InvalidUserId(String),
}

// ---------------------------------------------------------------------------
// Registry
// ---------------------------------------------------------------------------

/// Bidirectional account <-> user id index.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IdentityRegistry {
    by_account: HashMap<AccountId, String>,
    by_user_id: HashMap<String, AccountId>,
}

impl IdentityRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Binds `account` to `user_id`.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::AlreadyRegistered`] if `account` already has
    /// a binding (checked first), [`RegistryError::UserIdTaken`] if another
    /// account holds `user_id`, and [`RegistryError::InvalidUserId`] for an
    /// empty or oversized id. On error nothing is inserted.
    pub fn register(&mut self, account: &AccountId, user_id: &str) -> Result<(), RegistryError> {
        if let Some(existing) = self.by_account.get(account) {
            return Err(RegistryError::AlreadyRegistered {
                account: account.clone(),
                user_id: existing.clone(),
            });
        }
        if self.by_user_id.contains_key(user_id) {
            return Err(RegistryError::UserIdTaken(user_id.to_string()));
        }
        if user_id.is_empty() {
            return Err(RegistryError::InvalidUserId("must not be empty".into()));
        }
        if user_id.len() > MAX_USER_ID_LEN {
            return Err(RegistryError::InvalidUserId(format!(
                "{} bytes exceeds the {} byte limit",
                user_id.len(),
                MAX_USER_ID_LEN
            )));
        }

        self.by_account.insert(account.clone(), user_id.to_string());
        self.by_user_id.insert(user_id.to_string(), account.clone());
        Ok(())
    }

    /// The account bound to `user_id`, if any.
    pub fn resolve(&self, user_id: &str) -> Option<&AccountId> {
        self.by_user_id.get(user_id)
    }

    /// The user id bound to `account`, if any.
    pub fn user_id_of(&self, account: &AccountId) -> Option<&str> {
        self.by_account.get(account).map(String::as_str)
    }

    /// Number of bindings.
    pub fn len(&self) -> usize {
        self.by_user_id.len()
    }

    /// Returns `true` if nothing has been registered.
    pub fn is_empty(&self) -> bool {
        self.by_user_id.is_empty()
    }

    /// Iterates `(user_id, account)` pairs in arbitrary order.
    pub fn bindings(&self) -> impl Iterator<Item = (&str, &AccountId)> {
        self.by_user_id.iter().map(|(u, a)| (u.as_str(), a))
    }
}
