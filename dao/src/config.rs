//! Governance and orchestrator configuration
//!
//! Loaded from TOML. Every field has a default, so a config file only needs
//! the values it changes:
//!
//! ```toml
//! tick_interval_ms = 500
//!
//! [consensus]
//! consensus_timeout_ms = 30000
//! view_change_timeout_ms = 10000
//! max_validators = 100
//! max_views = 10
//!
//! [defaults]
//! name = "agora"
//! max_members = 1000
//!
//! [defaults.params]
//! quorum = { num = 60, den = 100 }
//! voting_duration_ms = 1209600000
//!
//! [[defaults.catalogue]]
//! category = "treasury-spend"
//! proposal_bond = 100
//! ```

use crate::error::{ConfigError, ConfigResult};
use crate::membership::MembershipType;
use agora_consensus::{ConsensusMechanism, EngineConfig};
use agora_core::{GovernanceId, ParticipantId};
use agora_governance::{
    CatalogueEntry, EligibilityRule, GovernanceParams, ProposalCatalogue, ResolvedProposalType,
};
use agora_ledger::TokenConfig;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::path::Path;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum GovernanceKind {
    /// Member-run organisation with a treasury
    Dao,
    /// Any token holder votes
    TokenVoting,
    /// Validators decide; every passing proposal is ratified by a round
    Consensus,
    /// Member votes, with consensus ratification where the catalogue asks for it
    Hybrid,
}

impl GovernanceKind {
    pub fn name(self) -> &'static str {
        match self {
            GovernanceKind::Dao => "dao",
            GovernanceKind::TokenVoting => "token-voting",
            GovernanceKind::Consensus => "consensus",
            GovernanceKind::Hybrid => "hybrid",
        }
    }

    /// Whether a passing proposal of this type needs a validator round first
    pub fn ratifies(self, params: &ResolvedProposalType) -> bool {
        match self {
            GovernanceKind::Consensus => true,
            GovernanceKind::Hybrid => params.requires_ratification,
            GovernanceKind::Dao | GovernanceKind::TokenVoting => false,
        }
    }

    /// Rules every ballot in a governance of this kind must pass
    pub fn vote_rules(self, governance: &GovernanceId, token: &str) -> Vec<EligibilityRule> {
        let member = EligibilityRule::DaoMember {
            dao: governance.to_string(),
        };
        match self {
            GovernanceKind::Dao | GovernanceKind::Hybrid => vec![member],
            GovernanceKind::TokenVoting => vec![EligibilityRule::TokenHolder {
                token: token.to_string(),
                min: 1,
            }],
            GovernanceKind::Consensus => vec![member, EligibilityRule::AuthorityFlag],
        }
    }
}

impl fmt::Display for GovernanceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Settings for one governance instance
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GovernanceConfig {
    pub name: String,
    /// Governance token; created on the ledger if it does not exist yet
    pub token: TokenConfig,
    pub membership: MembershipType,
    pub max_members: usize,
    /// Validators admitted to a ratification round
    pub max_validators: usize,
    /// Registered participants that join as admins at creation
    pub founders: Vec<ParticipantId>,
    /// Default quorum, support threshold, durations, mechanism and proposal threshold
    pub params: GovernanceParams,
    /// Mechanism of ratification rounds
    pub ratification: ConsensusMechanism,
    /// Overrides layered on the standard proposal-type catalogue
    pub catalogue: Vec<CatalogueEntry>,
}

impl Default for GovernanceConfig {
    fn default() -> Self {
        Self {
            name: "agora".to_string(),
            token: TokenConfig::new("AGR"),
            membership: MembershipType::Open,
            max_members: 1_000,
            max_validators: 100,
            founders: Vec::new(),
            params: GovernanceParams::default(),
            ratification: ConsensusMechanism::Pbft,
            catalogue: Vec::new(),
        }
    }
}

impl GovernanceConfig {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    pub fn validate(&self) -> ConfigResult<()> {
        if self.name.trim().is_empty() {
            return Err(ConfigError::Invalid("governance name is empty".into()));
        }
        if self.token.symbol.as_str().is_empty() {
            return Err(ConfigError::Invalid("token symbol is empty".into()));
        }
        if self.token.supply_cap == Some(0) {
            return Err(ConfigError::Invalid("token supply cap must be positive".into()));
        }
        if self.max_members == 0 {
            return Err(ConfigError::Invalid("max_members must be positive".into()));
        }
        if self.max_validators == 0 {
            return Err(ConfigError::Invalid("max_validators must be positive".into()));
        }
        if let MembershipType::TokenGated { token, .. } = &self.membership {
            if token.is_empty() {
                return Err(ConfigError::Invalid("token-gated membership needs a token".into()));
            }
        }
        self.params.validate()?;
        self.ratification
            .validate()
            .map_err(|e| ConfigError::Invalid(format!("ratification: {}", e)))?;

        let mut seen = BTreeSet::new();
        for entry in &self.catalogue {
            if !seen.insert(entry.category) {
                return Err(ConfigError::Invalid(format!(
                    "catalogue lists {} twice",
                    entry.category
                )));
            }
            validate_entry(entry)?;
        }
        Ok(())
    }

    /// Standard catalogue with this config's entries registered over it
    pub fn catalogue(&self) -> ProposalCatalogue {
        let mut catalogue = ProposalCatalogue::standard();
        for entry in &self.catalogue {
            catalogue.register(entry.clone());
        }
        catalogue
    }
}

fn validate_entry(entry: &CatalogueEntry) -> ConfigResult<()> {
    let category = entry.category;
    for (name, ratio) in [("quorum", entry.quorum), ("support_threshold", entry.support_threshold)] {
        if let Some(ratio) = ratio {
            if !ratio.is_valid() {
                return Err(ConfigError::Invalid(format!(
                    "{}: invalid {} {}",
                    category, name, ratio
                )));
            }
        }
    }
    if entry.support_duration_ms == Some(0) || entry.voting_duration_ms == Some(0) {
        return Err(ConfigError::Invalid(format!(
            "{}: support and voting durations must be positive",
            category
        )));
    }
    if let Some(mechanism) = &entry.mechanism {
        mechanism
            .validate()
            .map_err(|e| ConfigError::Invalid(format!("{}: {}", category, e)))?;
    }
    Ok(())
}

/// Top-level node configuration read by `agorad`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestratorConfig {
    /// Period of the scheduler driver loop
    pub tick_interval_ms: u64,
    /// Consensus timeout, view-change timeout and validator cap
    pub consensus: EngineConfig,
    /// Used for governances created without their own config
    pub defaults: GovernanceConfig,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            tick_interval_ms: 1_000,
            consensus: EngineConfig::default(),
            defaults: GovernanceConfig::default(),
        }
    }
}

impl OrchestratorConfig {
    pub fn load(path: impl AsRef<Path>) -> ConfigResult<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_toml_str(&text)
    }

    pub fn from_toml_str(text: &str) -> ConfigResult<Self> {
        let config: Self = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> ConfigResult<()> {
        if self.tick_interval_ms == 0 {
            return Err(ConfigError::Invalid("tick_interval_ms must be positive".into()));
        }
        self.consensus
            .validate()
            .map_err(|e| ConfigError::Invalid(format!("consensus: {}", e)))?;
        self.defaults.validate()
    }

    pub fn to_toml_string(&self) -> ConfigResult<String> {
        toml::to_string_pretty(self).map_err(|e| ConfigError::Invalid(e.to_string()))
    }
}
