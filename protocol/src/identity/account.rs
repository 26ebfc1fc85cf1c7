//! # Account Identities
//!
//! An [`AccountId`] is whatever the transport layer uses to name a caller: a
//! hex public key, an address, a service principal. Contracts only ever
//! compare and hash them, so the representation is a plain string behind a
//! newtype that keeps it from being confused with user ids or transaction
//! ids.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Opaque identity of a participant (caller, balance owner, or recipient).
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AccountId(String);

impl AccountId {
    /// Wraps an identity string.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// The identity as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns `true` for the empty identity, which no entry point should
    /// ever resolve a caller to.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for AccountId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for AccountId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for AccountId {
    fn from(s: String) -> Self {
        Self(s)
    }
}
