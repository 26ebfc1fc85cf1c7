//! # Re-entrancy Guard
//!
//! Fund-moving operations (`withdraw`, `complete`) end with an external
//! transfer, and the receiving side of that transfer may call back into the
//! vault. The guard makes every such callback fail fast: a second `enter`
//! while a [`GuardPermit`] is alive returns [`ReentrancyError::Locked`]
//! instead of double-spending.
//!
//! The guard alone does not queue callers. The vault takes a
//! thread-reentrant lock before entering it, so callers on other threads
//! wait their turn and only a callback on the paying thread ever reaches a
//! held guard.
//!
//! The permit releases the guard on drop, so every exit path (success, `?`
//! early return, panic unwind) leaves the guard open again.

use std::sync::atomic::{AtomicBool, Ordering};
use thiserror::Error;

/// Raised when a guarded section is entered while already held.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ReentrancyError {
    /// Another fund-moving call on this instance has not finished.
    #[error("re-entrant call rejected: a fund transfer is already in progress")]
    Locked,
}

/// Per-instance mutual exclusion for fund-moving operations.
#[derive(Debug, Default)]
pub struct ReentrancyGuard {
    entered: AtomicBool,
}

impl ReentrancyGuard {
    /// Creates an open guard.
    pub fn new() -> Self {
        Self::default()
    }

    /// Takes the guard, or fails immediately if it is already held.
    pub fn enter(&self) -> Result<GuardPermit<'_>, ReentrancyError> {
        self.entered
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .map_err(|_| ReentrancyError::Locked)?;
        Ok(GuardPermit { guard: self })
    }

    /// Returns `true` while a permit is alive.
    pub fn is_entered(&self) -> bool {
        self.entered.load(Ordering::Acquire)
    }
}

/// Proof of holding the guard. Releases it on drop.
#[derive(Debug)]
#[must_use = "the guard is released as soon as the permit is dropped"]
pub struct GuardPermit<'a> {
    guard: &'a ReentrancyGuard,
}

impl Drop for GuardPermit<'_> {
    fn drop(&mut self) {
        self.guard.entered.store(false, Ordering::Release);
    }
}
