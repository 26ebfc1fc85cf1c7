//! # Secret Commitments
//!
//! A [`SecretCommitment`] is the one-way digest of a secret (in BIOGATE, the
//! user's biometric template) recorded when a release is initiated. At
//! verification time the presented secret is hashed with the same scheme and
//! the digests are compared. The secret itself is never stored.
//!
//! ```text
//! initiate:  commitment = H(secret)
//! verify:    H(candidate) == commitment ?
//! ```
//!
//! The comparison runs over every byte regardless of where the first
//! difference is, so response timing does not reveal a matching prefix.

use serde::{Deserialize, Serialize};
use std::fmt;

use super::hash::{blake3_hash, sha256_array};

/// Digest length of every supported scheme, in bytes.
pub const COMMITMENT_LENGTH: usize = 32;

/// The hash function used to produce a commitment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommitmentScheme {
    /// SHA-256. The default.
    #[default]
    Sha256,
    /// BLAKE3.
    Blake3,
}

impl CommitmentScheme {
    fn digest(self, data: &[u8]) -> [u8; COMMITMENT_LENGTH] {
        match self {
            CommitmentScheme::Sha256 => sha256_array(data),
            CommitmentScheme::Blake3 => blake3_hash(data),
        }
    }
}

impl fmt::Display for CommitmentScheme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CommitmentScheme::Sha256 => write!(f, "sha256"),
            CommitmentScheme::Blake3 => write!(f, "blake3"),
        }
    }
}

/// A one-way commitment to a secret, tagged with the scheme that produced it.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecretCommitment {
    /// Hash function used for both commit and verify.
    pub scheme: CommitmentScheme,
    /// The digest, hex-encoded on the wire.
    #[serde(with = "hex_digest")]
    digest: [u8; COMMITMENT_LENGTH],
}

impl SecretCommitment {
    /// Commit to `secret` under `scheme`.
    ///
    /// # Example
    ///
    /// ```
    /// use biogate_protocol::crypto::{CommitmentScheme, SecretCommitment};
    ///
    /// let c = SecretCommitment::commit(CommitmentScheme::Sha256, b"template");
    /// assert!(c.matches(b"template"));
    /// assert!(!c.matches(b"other"));
    /// ```
    pub fn commit(scheme: CommitmentScheme, secret: &[u8]) -> Self {
        Self {
            scheme,
            digest: scheme.digest(secret),
        }
    }

    /// Returns `true` if `candidate` hashes to this commitment.
    pub fn matches(&self, candidate: &[u8]) -> bool {
        let other = self.scheme.digest(candidate);
        self.digest
            .iter()
            .zip(other.iter())
            .fold(0u8, |acc, (a, b)| acc | (a ^ b))
            == 0
    }

    /// Raw digest bytes.
    pub fn as_bytes(&self) -> &[u8; COMMITMENT_LENGTH] {
        &self.digest
    }

    /// Hex-encoded digest.
    pub fn to_hex(&self) -> String {
        hex::encode(self.digest)
    }
}

impl fmt::Debug for SecretCommitment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SecretCommitment({}:{})", self.scheme, self.to_hex())
    }
}

impl fmt::Display for SecretCommitment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.scheme, self.to_hex())
    }
}

mod hex_digest {
    use super::COMMITMENT_LENGTH;
    use serde::{de::Error as _, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(
        digest: &[u8; COMMITMENT_LENGTH],
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&hex::encode(digest))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<[u8; COMMITMENT_LENGTH], D::Error> {
        let s = String::deserialize(deserializer)?;
        let bytes = hex::decode(&s).map_err(D::Error::custom)?;
        bytes.as_slice().try_into().map_err(|_| {
            D::Error::custom(format!(
                "expected {} digest bytes, got {}",
                COMMITMENT_LENGTH,
                bytes.len()
            ))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn matching_secret_is_accepted() {
        let c = SecretCommitment::commit(CommitmentScheme::Sha256, b"s");
        assert!(c.matches(b"s"));
    }

    #[test]
    fn wrong_secret_is_rejected() {
        let c = SecretCommitment::commit(CommitmentScheme::Sha256, b"s");
        assert!(!c.matches(b"S"));
        assert!(!c.matches(b""));
    }

    #[test]
    fn schemes_are_not_interchangeable() {
        let sha = SecretCommitment::commit(CommitmentScheme::Sha256, b"template");
        let b3 = SecretCommitment::commit(CommitmentScheme::Blake3, b"template");
        assert_ne!(sha, b3);
        assert!(b3.matches(b"template"));
    }

    #[test]
    fn sha256_commitment_is_plain_digest() {
        let c = SecretCommitment::commit(CommitmentScheme::Sha256, b"");
        assert_eq!(
            c.to_hex(),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }

    #[test]
    fn serde_uses_hex_digest() {
        let c = SecretCommitment::commit(CommitmentScheme::Blake3, b"x");
        let json = serde_json::to_value(&c).unwrap();
        assert_eq!(json["scheme"], "blake3");
        assert_eq!(json["digest"], c.to_hex());

        let back: SecretCommitment = serde_json::from_value(json).unwrap();
        assert_eq!(back, c);
    }

    #[test]
    fn short_digest_fails_to_deserialize() {
        let json = serde_json::json!({ "scheme": "sha256", "digest": "abcd" });
        assert!(serde_json::from_value::<SecretCommitment>(json).is_err());
    }
}
