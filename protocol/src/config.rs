//! # Protocol Configuration & Constants
//!
//! Every magic number in BIOGATE lives here, next to the runtime
//! [`GateConfig`] that operators load from JSON. Constants are the
//! defaults; the config file can tighten them per deployment.

use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

use crate::crypto::CommitmentScheme;
use crate::identity::AccountId;

// ---------------------------------------------------------------------------
// Protocol Version
// ---------------------------------------------------------------------------

/// The protocol version string.
pub const PROTOCOL_VERSION: &str = "0.1.0";

// ---------------------------------------------------------------------------
// Currency
// ---------------------------------------------------------------------------

/// Decimal places of the custodial currency. Balances are stored in the
/// smallest unit, so `1.0` coin is `10^CURRENCY_DECIMALS` units.
pub const CURRENCY_DECIMALS: u8 = 8;

/// Smallest units per whole coin.
pub const UNITS_PER_COIN: u64 = 100_000_000;

// ---------------------------------------------------------------------------
// Transaction Limits
// ---------------------------------------------------------------------------

/// Maximum length of an externally supplied transaction id, in bytes.
pub const MAX_TRANSACTION_ID_LEN: usize = 128;

/// Maximum length of a user id, in bytes.
pub const MAX_USER_ID_LEN: usize = 64;

/// Default maximum description length, in bytes.
pub const DEFAULT_MAX_DESCRIPTION_LEN: usize = 512;

/// Default verification window: the furthest in the future an administrator
/// may set a deadline. Thirty days.
pub const DEFAULT_MAX_VERIFICATION_WINDOW_SECS: u64 = 30 * 24 * 60 * 60;

/// Deadline used by tooling when a script does not specify one. One hour.
pub const DEFAULT_VERIFICATION_WINDOW_SECS: u64 = 3_600;

// ---------------------------------------------------------------------------
// Runtime configuration
// ---------------------------------------------------------------------------

/// Errors raised while loading or validating a [`GateConfig`].
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The config file could not be read.
    #[error("failed to read config: {0}")]
    Io(#[from] std::io::Error),

    /// The config file is not valid JSON for this schema.
    #[error("failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),

    /// A field holds a value the vault cannot operate with.
    #[error("invalid config: {field} {reason}")]
    Invalid {
        /// The offending field.
        field: &'static str,
        /// What is wrong with it.
        reason: String,
    },
}

/// Runtime parameters of a vault instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GateConfig {
    /// The single identity allowed to initiate and complete releases.
    pub admin: AccountId,
    /// Hash scheme for secret commitments.
    pub commitment_scheme: CommitmentScheme,
    /// Reject `initiate` for user ids that are not registered. When `false`
    /// the record is created anyway and later steps fail on resolution.
    pub require_registered_user: bool,
    /// Maximum description length in bytes.
    pub max_description_len: usize,
    /// Furthest allowed deadline, in seconds from initiation.
    pub max_verification_window_secs: u64,
}

impl Default for GateConfig {
    fn default() -> Self {
        Self {
            admin: AccountId::new("admin"),
            commitment_scheme: CommitmentScheme::default(),
            require_registered_user: true,
            max_description_len: DEFAULT_MAX_DESCRIPTION_LEN,
            max_verification_window_secs: DEFAULT_MAX_VERIFICATION_WINDOW_SECS,
        }
    }
}

impl GateConfig {
    /// Default configuration with the given administrator.
    pub fn with_admin(admin: impl Into<AccountId>) -> Self {
        Self {
            admin: admin.into(),
            ..Self::default()
        }
    }

    /// Loads and validates a JSON config file. Missing fields take their
    /// defaults.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path.as_ref())?;
        let config: GateConfig = serde_json::from_str(&raw)?;
        config.validate()?;
        tracing::debug!(path = %path.as_ref().display(), admin = %config.admin, "config loaded");
        Ok(config)
    }

    /// Checks that every field is usable.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.admin.is_empty() {
            return Err(ConfigError::Invalid {
                field: "admin",
                reason: "must not be empty".into(),
            });
        }
        if self.max_description_len == 0 {
            return Err(ConfigError::Invalid {
                field: "max_description_len",
                reason: "must be positive".into(),
            });
        }
        if self.max_verification_window_secs == 0 {
            return Err(ConfigError::Invalid {
                field: "max_verification_window_secs",
                reason: "must be positive".into(),
            });
        }
        if self.max_verification_window_secs > i64::MAX as u64 {
            return Err(ConfigError::Invalid {
                field: "max_verification_window_secs",
                reason: format!("must not exceed {}", i64::MAX),
            });
        }
        Ok(())
    }
}

/// Formats an amount in smallest units as a decimal coin string, mainly
/// for logs: `150_000_000` becomes `"1.50000000"`.
pub fn format_units(amount: u64) -> String {
    format!(
        "{}.{:0width$}",
        amount / UNITS_PER_COIN,
        amount % UNITS_PER_COIN,
        width = CURRENCY_DECIMALS as usize
    )
}
