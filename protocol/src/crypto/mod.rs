//! # Cryptographic Primitives for BIOGATE
//!
//! Deliberately small. The fund-release workflow needs exactly one
//! cryptographic property: given a secret at verification time, decide
//! whether it matches the secret committed at initiation time without ever
//! storing the secret itself. That is a one-way hash and a comparison.
//!
//! - **SHA-256**: the default commitment hash.
//! - **BLAKE3**: available as an alternative scheme for deployments that
//!   prefer it. Both produce 32-byte digests.
//!
//! Proof-of-possession protocols and key management are out of scope here.

pub mod commitment;
pub mod hash;

pub use commitment::{CommitmentScheme, SecretCommitment};
pub use hash::{blake3_hash, sha256, sha256_array};
