//! Token state: balances, locks and the per-token audit log

use crate::delegation::{DelegationGraph, DelegationScope};
use crate::power::PowerRules;
use agora_core::{ParticipantId, TokenSymbol};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TokenFeature {
    Delegation,
    Staking,
    Snapshot,
}

impl fmt::Display for TokenFeature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TokenFeature::Delegation => f.write_str("delegation"),
            TokenFeature::Staking => f.write_str("staking"),
            TokenFeature::Snapshot => f.write_str("snapshot"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TokenConfig {
    pub symbol: TokenSymbol,
    #[serde(default)]
    pub name: String,
    #[serde(default = "all_features")]
    pub features: BTreeSet<TokenFeature>,
    /// Hard cap on total supply; `None` is bounded only by `u64`
    #[serde(default)]
    pub supply_cap: Option<u64>,
    /// Power pipeline used by votes that do not bring their own
    #[serde(default)]
    pub power: PowerRules,
}

fn all_features() -> BTreeSet<TokenFeature> {
    [
        TokenFeature::Delegation,
        TokenFeature::Staking,
        TokenFeature::Snapshot,
    ]
    .into_iter()
    .collect()
}

impl TokenConfig {
    pub fn new(symbol: impl Into<TokenSymbol>) -> Self {
        let symbol = symbol.into();
        Self {
            name: symbol.to_string(),
            symbol,
            features: all_features(),
            supply_cap: None,
            power: PowerRules::default(),
        }
    }

    pub fn with_cap(mut self, cap: u64) -> Self {
        self.supply_cap = Some(cap);
        self
    }

    pub fn with_power(mut self, power: PowerRules) -> Self {
        self.power = power;
        self
    }

    pub fn without(mut self, feature: TokenFeature) -> Self {
        self.features.remove(&feature);
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LockId(pub u64);

impl fmt::Display for LockId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "lock-{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum LockPurpose {
    Staking,
    ProposalBond,
    SupportStake,
    Vesting,
}

/// Amount moved out of the liquid pool until `release_at`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Lock {
    pub id: LockId,
    pub owner: ParticipantId,
    pub amount: u64,
    pub purpose: LockPurpose,
    pub since: u64,
    pub release_at: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "kebab-case")]
pub enum LedgerOp {
    Mint {
        to: ParticipantId,
        amount: u64,
        reason: String,
    },
    Burn {
        from: ParticipantId,
        amount: u64,
        reason: String,
    },
    Transfer {
        from: ParticipantId,
        to: ParticipantId,
        amount: u64,
    },
    Lock {
        lock: LockId,
        owner: ParticipantId,
        amount: u64,
        purpose: LockPurpose,
    },
    Unlock {
        lock: LockId,
        owner: ParticipantId,
        amount: u64,
    },
    Delegate {
        delegator: ParticipantId,
        delegate: ParticipantId,
        scope: DelegationScope,
    },
    Revoke {
        delegator: ParticipantId,
        scope: DelegationScope,
    },
    Snapshot {
        id: u64,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub height: u64,
    pub at: u64,
    #[serde(flatten)]
    pub op: LedgerOp,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Token {
    pub config: TokenConfig,
    pub total_supply: u64,
    pub(crate) balances: BTreeMap<ParticipantId, u64>,
    pub(crate) locks: BTreeMap<LockId, Lock>,
    pub(crate) first_funded: BTreeMap<ParticipantId, u64>,
    pub(crate) delegations: DelegationGraph,
    pub(crate) audit: Vec<LedgerEntry>,
}

impl Token {
    pub(crate) fn new(config: TokenConfig) -> Self {
        Self {
            config,
            total_supply: 0,
            balances: BTreeMap::new(),
            locks: BTreeMap::new(),
            first_funded: BTreeMap::new(),
            delegations: DelegationGraph::new(),
            audit: Vec::new(),
        }
    }

    pub fn symbol(&self) -> &TokenSymbol {
        &self.config.symbol
    }

    pub fn supports(&self, feature: TokenFeature) -> bool {
        self.config.features.contains(&feature)
    }

    /// Liquid balance
    pub fn balance(&self, participant: &str) -> u64 {
        self.balances.get(participant).copied().unwrap_or(0)
    }

    pub fn locked(&self, participant: &str) -> u64 {
        self.locks
            .values()
            .filter(|l| l.owner.as_str() == participant)
            .map(|l| l.amount)
            .sum()
    }

    pub fn locks_of<'a>(&'a self, participant: &'a str) -> impl Iterator<Item = &'a Lock> + 'a {
        self.locks.values().filter(move |l| l.owner.as_str() == participant)
    }

    pub fn lock(&self, id: LockId) -> Option<&Lock> {
        self.locks.get(&id)
    }

    pub fn first_funded(&self, participant: &str) -> Option<u64> {
        self.first_funded.get(participant).copied()
    }

    pub fn delegations(&self) -> &DelegationGraph {
        &self.delegations
    }

    pub fn holders(&self) -> impl Iterator<Item = (&ParticipantId, &u64)> {
        self.balances.iter()
    }

    pub fn audit_log(&self) -> &[LedgerEntry] {
        &self.audit
    }

    pub(crate) fn credit(&mut self, participant: &ParticipantId, amount: u64, at: u64) {
        *self.balances.entry(participant.clone()).or_insert(0) += amount;
        self.first_funded.entry(participant.clone()).or_insert(at);
    }

    /// Caller has checked the balance
    pub(crate) fn debit(&mut self, participant: &str, amount: u64) {
        if let Some(balance) = self.balances.get_mut(participant) {
            *balance -= amount;
            if *balance == 0 {
                self.balances.remove(participant);
            }
        }
    }

    pub fn sum_balances(&self) -> u128 {
        self.balances.values().map(|b| *b as u128).sum()
    }

    pub fn sum_locks(&self) -> u128 {
        self.locks.values().map(|l| l.amount as u128).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_defaults_enable_every_feature() {
        let config = TokenConfig::new("AGR");
        assert_eq!(config.features.len(), 3);
        let config = config.without(TokenFeature::Staking);
        assert!(!config.features.contains(&TokenFeature::Staking));

        let parsed: TokenConfig = serde_json::from_str(r#"{"symbol":"GOV"}"#).unwrap();
        assert_eq!(parsed.features.len(), 3);
        assert_eq!(parsed.supply_cap, None);
    }

    #[test]
    fn test_debit_drops_empty_accounts() {
        let mut token = Token::new(TokenConfig::new("AGR"));
        token.credit(&"alice".into(), 10, 5);
        token.debit("alice", 10);
        assert_eq!(token.balance("alice"), 0);
        assert_eq!(token.holders().count(), 0);
        assert_eq!(token.first_funded("alice"), Some(5));
    }
}
