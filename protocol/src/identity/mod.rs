//! # Identity
//!
//! Callers and recipients are identified by an [`AccountId`]: an opaque,
//! comparable token resolved by the authenticated entry point before any
//! contract code runs. BIOGATE never derives or verifies these itself.

pub mod account;

pub use account::AccountId;
