// Copyright (c) 2026 ALAS Technology. MIT License.
// See LICENSE for details.

//! # BIOGATE Protocol: Core Primitives
//!
//! The shared vocabulary of the BIOGATE fund-release system. Nothing in this
//! crate moves money; it defines the types that the contracts crate moves
//! money *with*:
//!
//! - **identity**: Opaque account identities for callers and recipients.
//! - **crypto**: Hashing and one-way secret commitments. The "biometric"
//!   secret never leaves the verification call; only its digest is stored.
//! - **clock**: Time sources. Deadlines are checked lazily, so the clock is
//!   injectable for deterministic tests and replays.
//! - **config**: Protocol constants and the runtime [`config::GateConfig`].
//!
//! ## Design Philosophy
//!
//! 1. Amounts are `u64` in the smallest unit. No floats near money.
//! 2. Commitments compare digests, never secrets.
//! 3. Every public type is serializable for snapshots and operator tooling.

pub mod clock;
pub mod config;
pub mod crypto;
pub mod identity;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::GateConfig;
pub use crypto::{CommitmentScheme, SecretCommitment};
pub use identity::AccountId;
