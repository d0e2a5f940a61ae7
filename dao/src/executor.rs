//! Action execution against DAO state
//!
//! [`DaoExecutor`] applies proposal actions to the DAO's roster, treasury,
//! parameters and installed modules, and to the token ledger for mint and
//! burn. Each action is re-checked against live state before it runs.

use crate::membership::{Member, Roster};
use agora_core::{GovernanceError, Result};
use agora_governance::{Action, ActionExecutor, GovernanceParams};
use agora_ledger::TokenLedger;
use agora_treasury::TreasuryPool;
use log::info;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContractVersion {
    pub version: String,
    pub code_hash: String,
    pub upgraded_at: u64,
}

/// Applied custom action, kept for downstream consumers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CustomRecord {
    pub authorization: String,
    pub kind: String,
    pub payload: serde_json::Value,
    pub at: u64,
}

/// Everything an executed proposal may change
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DaoState {
    pub params: GovernanceParams,
    pub roster: Roster,
    pub treasury: TreasuryPool,
    pub modules: BTreeMap<String, serde_json::Value>,
    pub contracts: BTreeMap<String, ContractVersion>,
    pub custom: Vec<CustomRecord>,
}

impl DaoState {
    pub fn new(params: GovernanceParams, max_members: usize) -> Self {
        Self {
            params,
            roster: Roster::new(max_members),
            treasury: TreasuryPool::new(),
            modules: BTreeMap::new(),
            contracts: BTreeMap::new(),
            custom: Vec::new(),
        }
    }

    /// Parameters with `key` replaced by `value`, validated
    pub fn updated_params(&self, key: &str, value: &serde_json::Value) -> Result<GovernanceParams> {
        let invalid = |reason: String| GovernanceError::ExecutionFailed(format!("update {}: {}", key, reason));
        let mut doc = serde_json::to_value(&self.params).map_err(|e| invalid(e.to_string()))?;
        let fields = doc
            .as_object_mut()
            .ok_or_else(|| invalid("parameters are not a table".into()))?;
        if !fields.contains_key(key) {
            return Err(invalid("unknown parameter".into()));
        }
        fields.insert(key.to_string(), value.clone());
        let params: GovernanceParams = serde_json::from_value(doc).map_err(|e| invalid(e.to_string()))?;
        params.validate()?;
        Ok(params)
    }
}

pub struct DaoExecutor<'a> {
    /// Id of the proposal whose actions run
    authorization: String,
    state: &'a mut DaoState,
    ledger: &'a mut TokenLedger,
    at: u64,
}

impl<'a> DaoExecutor<'a> {
    pub fn new(
        authorization: impl Into<String>,
        state: &'a mut DaoState,
        ledger: &'a mut TokenLedger,
        at: u64,
    ) -> Self {
        Self {
            authorization: authorization.into(),
            state,
            ledger,
            at,
        }
    }

    fn reason(&self) -> String {
        format!("proposal {}", self.authorization)
    }
}

impl ActionExecutor for DaoExecutor<'_> {
    fn check(&self, action: &Action) -> Result<()> {
        match action {
            Action::TransferFunds { asset, amount, .. } => {
                let available = self.state.treasury.balance(asset);
                if available < *amount {
                    return Err(GovernanceError::InsufficientBalance {
                        required: *amount,
                        available,
                    });
                }
            }
            Action::UpdateParameter { key, value } => {
                self.state.updated_params(key, value)?;
            }
            Action::UpgradeContract {
                module,
                version,
                code_hash,
            } => {
                if let Some(current) = self.state.contracts.get(module) {
                    if current.version == *version && current.code_hash != *code_hash {
                        return Err(GovernanceError::ExecutionFailed(format!(
                            "{} {} is installed with a different code hash",
                            module, version
                        )));
                    }
                }
            }
            Action::GrantRole { member, .. } => {
                if !self.state.roster.contains(member.as_str()) && self.state.roster.is_full() {
                    return Err(GovernanceError::PermissionDenied(format!(
                        "member limit {} reached",
                        self.state.roster.max_members()
                    )));
                }
            }
            Action::RevokeRole { member } => {
                self.state.roster.require(member.as_str())?;
            }
            Action::MintTokens { token, .. } => {
                self.ledger.token(token)?;
            }
            Action::BurnTokens { token, from, amount } => {
                let available = self.ledger.balance(token, from.as_str())?;
                if available < *amount {
                    return Err(GovernanceError::InsufficientBalance {
                        required: *amount,
                        available,
                    });
                }
            }
            Action::InstallModule { .. } | Action::Custom { .. } => {}
        }
        Ok(())
    }

    fn apply(&mut self, action: &Action) -> Result<()> {
        let at = self.at;
        match action {
            Action::TransferFunds {
                asset,
                to,
                amount,
                memo,
            } => {
                let memo = (!memo.is_empty()).then(|| memo.clone());
                self.state
                    .treasury
                    .withdraw(asset, to.clone(), *amount, &self.authorization, memo, at)?;
            }
            Action::UpdateParameter { key, value } => {
                self.state.params = self.state.updated_params(key, value)?;
                info!("🔧 Parameter {} updated by {}", key, self.authorization);
            }
            Action::UpgradeContract {
                module,
                version,
                code_hash,
            } => {
                self.state.contracts.insert(
                    module.clone(),
                    ContractVersion {
                        version: version.clone(),
                        code_hash: code_hash.clone(),
                        upgraded_at: at,
                    },
                );
                info!("⬆️  {} upgraded to {}", module, version);
            }
            Action::GrantRole { member, role } => {
                if self.state.roster.contains(member.as_str()) {
                    self.state.roster.set_role(member.as_str(), *role)?;
                } else {
                    self.state.roster.insert(Member::new(member.clone(), *role, at))?;
                }
            }
            Action::RevokeRole { member } => {
                self.state.roster.remove(member.as_str())?;
            }
            Action::MintTokens { token, to, amount } => {
                let reason = self.reason();
                self.ledger.mint(token, to.as_str(), *amount, &reason, at)?;
            }
            Action::BurnTokens { token, from, amount } => {
                let reason = self.reason();
                self.ledger.burn(token, from.as_str(), *amount, &reason, at)?;
            }
            Action::InstallModule { module, config } => {
                self.state.modules.insert(module.clone(), config.clone());
            }
            Action::Custom { kind, payload } => {
                self.state.custom.push(CustomRecord {
                    authorization: self.authorization.clone(),
                    kind: kind.clone(),
                    payload: payload.clone(),
                    at,
                });
            }
        }
        Ok(())
    }

    fn compensate(&mut self, action: &Action) -> Result<()> {
        let at = self.at;
        let reason = format!("rollback of {}", self.authorization);
        match action {
            Action::TransferFunds { asset, to, .. } => {
                let tx = self
                    .state
                    .treasury
                    .last_withdrawal(&self.authorization, asset, to.as_str())
                    .ok_or_else(|| {
                        GovernanceError::ExecutionFailed(format!("no withdrawal of {} to {} to reverse", asset, to))
                    })?;
                self.state.treasury.reverse(tx, at)?;
            }
            Action::MintTokens { token, to, amount } => {
                self.ledger.burn(token, to.as_str(), *amount, &reason, at)?;
            }
            Action::BurnTokens { token, from, amount } => {
                self.ledger.mint(token, from.as_str(), *amount, &reason, at)?;
            }
            Action::Custom { kind, .. } => {
                let position = self
                    .state
                    .custom
                    .iter()
                    .rposition(|r| r.authorization == self.authorization && r.kind == *kind);
                if let Some(position) = position {
                    self.state.custom.remove(position);
                }
            }
            // idempotent actions stand
            Action::UpdateParameter { .. }
            | Action::UpgradeContract { .. }
            | Action::GrantRole { .. }
            | Action::RevokeRole { .. }
            | Action::InstallModule { .. } => {}
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use agora_governance::action::execute_all;
    use agora_governance::Role;
    use agora_ledger::TokenConfig;
    use agora_treasury::TreasurySource;

    fn setup() -> (DaoState, TokenLedger) {
        let mut state = DaoState::new(GovernanceParams::default(), 10);
        state.roster.insert(Member::new("alice", Role::Admin, 0)).unwrap();
        state
            .treasury
            .deposit("AGR", "alice", 500, TreasurySource::Contribution, None, 0)
            .unwrap();
        let mut ledger = TokenLedger::new();
        ledger.create_token(TokenConfig::new("AGR"), 0).unwrap();
        ledger.mint("AGR", "alice", 100, "genesis", 0).unwrap();
        (state, ledger)
    }

    #[test]
    fn test_update_parameter_is_validated() {
        let (state, _) = setup();
        let params = state
            .updated_params("quorum", &serde_json::json!({"num": 1, "den": 2}))
            .unwrap();
        assert_eq!(params.quorum, agora_core::Ratio::HALF);
        assert!(state
            .updated_params("quorum", &serde_json::json!({"num": 3, "den": 2}))
            .is_err());
        assert!(state.updated_params("colour", &serde_json::json!("blue")).is_err());
    }

    #[test]
    fn test_failed_transfer_rolls_back_mint() {
        let (mut state, mut ledger) = setup();
        let actions = vec![
            Action::MintTokens {
                token: "AGR".into(),
                to: "bob".into(),
                amount: 50,
            },
            Action::GrantRole {
                member: "bob".into(),
                role: Role::Member,
            },
            Action::TransferFunds {
                asset: "AGR".into(),
                to: "bob".into(),
                amount: 10_000,
                memo: String::new(),
            },
        ];
        let report = {
            let mut executor = DaoExecutor::new("gov-1/prop-1", &mut state, &mut ledger, 5);
            execute_all(&mut executor, &actions)
        };
        assert_eq!(report.failed_at, Some(2));
        assert_eq!(report.compensated, vec![0]);
        assert_eq!(ledger.balance("AGR", "bob").unwrap(), 0);
        assert_eq!(ledger.total_supply("AGR").unwrap(), 100);
        // role grants are idempotent and stand
        assert!(state.roster.contains("bob"));
        assert_eq!(state.treasury.balance("AGR"), 500);
    }

    #[test]
    fn test_transfer_compensation_reverses_withdrawal() {
        let (mut state, mut ledger) = setup();
        let transfer = Action::TransferFunds {
            asset: "AGR".into(),
            to: "bob".into(),
            amount: 200,
            memo: "grant".into(),
        };
        let mut executor = DaoExecutor::new("gov-1/prop-2", &mut state, &mut ledger, 7);
        executor.apply(&transfer).unwrap();
        executor.compensate(&transfer).unwrap();
        assert_eq!(state.treasury.balance("AGR"), 500);
        state.treasury.check_invariants().unwrap();
    }

    #[test]
    fn test_revoke_unknown_member_fails_check() {
        let (mut state, mut ledger) = setup();
        let executor = DaoExecutor::new("gov-1/prop-3", &mut state, &mut ledger, 1);
        assert!(executor
            .check(&Action::RevokeRole {
                member: "mallory".into()
            })
            .is_err());
    }
}
