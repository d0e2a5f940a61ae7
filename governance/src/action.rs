//! Proposal actions
//!
//! The closed set of effects an executed proposal can have. Every action is
//! schema-checked when the proposal is drafted and re-checked by the
//! [`ActionExecutor`] against current state right before it is applied.

use agora_core::{ErrorKind, GovernanceError, ParticipantId, Result};
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Primary role of a DAO member
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Role {
    Admin,
    Member,
    Authority,
    Guardian,
    Observer,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Role::Admin => "admin",
            Role::Member => "member",
            Role::Authority => "authority",
            Role::Guardian => "guardian",
            Role::Observer => "observer",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "kebab-case")]
pub enum Action {
    TransferFunds {
        asset: String,
        to: ParticipantId,
        amount: u64,
        #[serde(default)]
        memo: String,
    },
    UpdateParameter {
        key: String,
        value: serde_json::Value,
    },
    UpgradeContract {
        module: String,
        version: String,
        /// Hex SHA-256 of the new code
        code_hash: String,
    },
    GrantRole {
        member: ParticipantId,
        role: Role,
    },
    RevokeRole {
        member: ParticipantId,
    },
    MintTokens {
        token: String,
        to: ParticipantId,
        amount: u64,
    },
    BurnTokens {
        token: String,
        from: ParticipantId,
        amount: u64,
    },
    InstallModule {
        module: String,
        #[serde(default)]
        config: serde_json::Value,
    },
    Custom {
        kind: String,
        #[serde(default)]
        payload: serde_json::Value,
    },
}

impl Action {
    pub fn name(&self) -> &'static str {
        match self {
            Action::TransferFunds { .. } => "transfer-funds",
            Action::UpdateParameter { .. } => "update-parameter",
            Action::UpgradeContract { .. } => "upgrade-contract",
            Action::GrantRole { .. } => "grant-role",
            Action::RevokeRole { .. } => "revoke-role",
            Action::MintTokens { .. } => "mint-tokens",
            Action::BurnTokens { .. } => "burn-tokens",
            Action::InstallModule { .. } => "install-module",
            Action::Custom { .. } => "custom",
        }
    }

    /// Stateless shape check done at draft time
    pub fn validate_schema(&self) -> Result<()> {
        let fail = |reason: &str| {
            Err(GovernanceError::ExecutionFailed(format!(
                "{}: {}",
                self.name(),
                reason
            )))
        };
        match self {
            Action::TransferFunds { asset, to, amount, .. } => {
                if asset.is_empty() || to.as_str().is_empty() {
                    return fail("asset and recipient are required");
                }
                if *amount == 0 {
                    return fail("amount must be positive");
                }
            }
            Action::UpdateParameter { key, value } => {
                if key.is_empty() {
                    return fail("parameter key is required");
                }
                if value.is_null() {
                    return fail("parameter value is required");
                }
            }
            Action::UpgradeContract {
                module,
                version,
                code_hash,
            } => {
                if module.is_empty() || version.is_empty() {
                    return fail("module and version are required");
                }
                if code_hash.len() != 64 || hex::decode(code_hash).is_err() {
                    return fail("code hash must be 32 bytes of hex");
                }
            }
            Action::GrantRole { member, .. } | Action::RevokeRole { member } => {
                if member.as_str().is_empty() {
                    return fail("member is required");
                }
            }
            Action::MintTokens { token, to: who, amount }
            | Action::BurnTokens {
                token,
                from: who,
                amount,
            } => {
                if token.is_empty() || who.as_str().is_empty() {
                    return fail("token and account are required");
                }
                if *amount == 0 {
                    return fail("amount must be positive");
                }
            }
            Action::InstallModule { module, .. } => {
                if module.is_empty() {
                    return fail("module name is required");
                }
            }
            Action::Custom { kind, .. } => {
                if kind.is_empty() {
                    return fail("custom kind is required");
                }
            }
        }
        Ok(())
    }

    /// Re-applying the action leaves state unchanged, so its effect may stand
    /// after a later action fails
    pub fn is_idempotent(&self) -> bool {
        matches!(
            self,
            Action::UpdateParameter { .. }
                | Action::UpgradeContract { .. }
                | Action::GrantRole { .. }
                | Action::RevokeRole { .. }
                | Action::InstallModule { .. }
        )
    }
}

/// Applies actions against live governance state
pub trait ActionExecutor {
    /// Re-check an action against the latest state without applying it
    fn check(&self, action: &Action) -> Result<()>;

    fn apply(&mut self, action: &Action) -> Result<()>;

    /// Undo a previously applied non-idempotent action
    fn compensate(&mut self, action: &Action) -> Result<()>;
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ActionReport {
    pub applied: usize,
    pub failed_at: Option<usize>,
    pub error: Option<String>,
    pub error_kind: Option<ErrorKind>,
    /// Indices of actions rolled back after the failure
    pub compensated: Vec<usize>,
    pub compensation_failures: Vec<String>,
}

impl ActionReport {
    pub fn succeeded(&self) -> bool {
        self.failed_at.is_none()
    }
}

/// Apply `actions` in order, stopping at the first failure.
///
/// On failure, applied actions that are not idempotent are compensated in
/// reverse order.
pub fn execute_all(executor: &mut dyn ActionExecutor, actions: &[Action]) -> ActionReport {
    let mut report = ActionReport::default();
    for (index, action) in actions.iter().enumerate() {
        let outcome = executor.check(action).and_then(|_| executor.apply(action));
        match outcome {
            Ok(()) => {
                debug!("⚙️  Applied action {} ({})", index, action.name());
                report.applied += 1;
            }
            Err(err) => {
                warn!("⚠️  Action {} ({}) failed: {}", index, action.name(), err);
                report.failed_at = Some(index);
                report.error_kind = Some(err.kind());
                report.error = Some(err.to_string());
                break;
            }
        }
    }

    if let Some(failed) = report.failed_at {
        for index in (0..failed).rev() {
            let action = &actions[index];
            if action.is_idempotent() {
                continue;
            }
            match executor.compensate(action) {
                Ok(()) => report.compensated.push(index),
                Err(err) => {
                    warn!("⚠️  Could not roll back action {} ({}): {}", index, action.name(), err);
                    report
                        .compensation_failures
                        .push(format!("{}: {}", index, err));
                }
            }
        }
    }
    report
}
