//! # Operation Scripts
//!
//! A script is a JSON array of [`ScenarioStep`]s applied in order to a fresh
//! in-memory vault driven by a manual clock. Each step's outcome is recorded;
//! the final report carries the outcomes, a vault snapshot, the event log and
//! the payouts the in-memory rail saw.
//!
//! ```json
//! [
//!   { "op": "register", "account": "alice-key", "user_id": "u1" },
//!   { "op": "deposit", "account": "alice-key", "amount": 100000000 },
//!   { "op": "initiate", "id": "t1", "user_id": "u1", "amount": 50000000, "secret": "s" },
//!   { "op": "verify", "account": "alice-key", "id": "t1", "user_id": "u1", "secret": "s" },
//!   { "op": "complete", "id": "t1", "recipient": "merchant" }
//! ]
//! ```

use anyhow::{anyhow, bail, Result};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;

use biogate_contracts::{BiometricVault, InMemoryRail, LoggedEvent, ReleaseRequest, VaultSnapshot};
use biogate_protocol::config::DEFAULT_VERIFICATION_WINDOW_SECS;
use biogate_protocol::{AccountId, Clock, GateConfig, ManualClock};

fn default_window() -> i64 {
    DEFAULT_VERIFICATION_WINDOW_SECS as i64
}

/// One scripted operation. Admin-only steps run as the configured
/// administrator unless `caller` is given.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum ScenarioStep {
    Register {
        account: AccountId,
        user_id: String,
    },
    Deposit {
        account: AccountId,
        amount: u64,
    },
    Withdraw {
        account: AccountId,
        amount: u64,
    },
    Initiate {
        #[serde(default)]
        caller: Option<AccountId>,
        id: String,
        user_id: String,
        #[serde(default)]
        description: String,
        amount: u64,
        secret: String,
        /// Deadline, in seconds after the current script time.
        #[serde(default = "default_window")]
        expires_in_secs: i64,
    },
    Verify {
        account: AccountId,
        id: String,
        user_id: String,
        secret: String,
    },
    Complete {
        #[serde(default)]
        caller: Option<AccountId>,
        id: String,
        recipient: AccountId,
    },
    /// Moves script time forward.
    AdvanceClock { secs: i64 },
}

impl ScenarioStep {
    /// Short operation name for logs and reports.
    pub fn name(&self) -> &'static str {
        match self {
            ScenarioStep::Register { .. } => "register",
            ScenarioStep::Deposit { .. } => "deposit",
            ScenarioStep::Withdraw { .. } => "withdraw",
            ScenarioStep::Initiate { .. } => "initiate",
            ScenarioStep::Verify { .. } => "verify",
            ScenarioStep::Complete { .. } => "complete",
            ScenarioStep::AdvanceClock { .. } => "advance_clock",
        }
    }
}

/// Result of one step.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepOutcome {
    pub index: usize,
    pub op: String,
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Everything `replay` prints.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReplayReport {
    pub outcomes: Vec<StepOutcome>,
    pub snapshot: VaultSnapshot,
    pub events: Vec<LoggedEvent>,
    pub payouts: BTreeMap<AccountId, u64>,
}

impl ReplayReport {
    /// Number of steps that failed.
    pub fn failures(&self) -> usize {
        self.outcomes.iter().filter(|o| !o.ok).count()
    }
}

/// Parses a JSON script.
pub fn parse_script(raw: &str) -> Result<Vec<ScenarioStep>> {
    Ok(serde_json::from_str(raw)?)
}

/// Applies `steps` to a fresh vault.
///
/// With `fail_fast`, the first failing step aborts the replay with an error
/// naming it; otherwise failures are recorded and the replay continues.
pub fn run_script(config: GateConfig, steps: &[ScenarioStep], fail_fast: bool) -> Result<ReplayReport> {
    let rail = Arc::new(InMemoryRail::new());
    let clock = Arc::new(ManualClock::starting_now());
    let admin = config.admin.clone();
    let vault = BiometricVault::with_clock(config, rail.clone(), clock.clone());

    let mut outcomes = Vec::with_capacity(steps.len());
    for (index, step) in steps.iter().enumerate() {
        let result = apply_step(&vault, &clock, &admin, step);
        match &result {
            Ok(()) => tracing::debug!(index, op = step.name(), "step applied"),
            Err(e) => tracing::warn!(index, op = step.name(), error = %e, "step failed"),
        }
        if fail_fast {
            if let Err(e) = &result {
                bail!("step {} ({}) failed: {}", index, step.name(), e);
            }
        }
        outcomes.push(StepOutcome {
            index,
            op: step.name().to_string(),
            ok: result.is_ok(),
            error: result.err().map(|e| e.to_string()),
        });
    }

    let report = ReplayReport {
        outcomes,
        snapshot: vault.snapshot(),
        events: vault.events(),
        payouts: rail.payouts().into_iter().collect(),
    };
    tracing::info!(
        steps = steps.len(),
        failures = report.failures(),
        events = report.events.len(),
        "replay finished"
    );
    Ok(report)
}

fn apply_step(
    vault: &BiometricVault,
    clock: &ManualClock,
    admin: &AccountId,
    step: &ScenarioStep,
) -> Result<()> {
    match step {
        ScenarioStep::Register { account, user_id } => vault.register(account, user_id)?,
        ScenarioStep::Deposit { account, amount } => {
            vault.deposit(account, *amount)?;
        }
        ScenarioStep::Withdraw { account, amount } => vault.withdraw(account, *amount)?,
        ScenarioStep::Initiate {
            caller,
            id,
            user_id,
            description,
            amount,
            secret,
            expires_in_secs,
        } => {
            let expires_at = offset(clock, *expires_in_secs)?;
            let request = ReleaseRequest::new(id, user_id, *amount, secret.as_bytes(), expires_at)
                .with_description(description);
            vault.initiate(caller.as_ref().unwrap_or(admin), request)?;
        }
        ScenarioStep::Verify {
            account,
            id,
            user_id,
            secret,
        } => {
            vault.verify(account, id, user_id, secret.as_bytes())?;
        }
        ScenarioStep::Complete {
            caller,
            id,
            recipient,
        } => vault.complete(caller.as_ref().unwrap_or(admin), id, recipient)?,
        ScenarioStep::AdvanceClock { secs } => {
            let to = offset(clock, *secs)?;
            clock.set(to);
        }
    }
    Ok(())
}

/// Script time plus `secs`, or an error if that is not a representable
/// instant.
fn offset(clock: &ManualClock, secs: i64) -> Result<DateTime<Utc>> {
    Duration::try_seconds(secs)
        .and_then(|d| clock.now().checked_add_signed(d))
        .ok_or_else(|| anyhow!("{} seconds from now is out of range", secs))
}
