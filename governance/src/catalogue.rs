//! Proposal-type catalogue
//!
//! Each proposal category resolves to concrete parameters: the governance
//! defaults overlaid with the category's registered overrides.

use crate::config;
use crate::mechanism::MechanismSpec;
use agora_core::{EntityKind, GovernanceError, Ratio, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ProposalCategory {
    General,
    ParameterChange,
    TreasurySpend,
    ProtocolUpgrade,
    Membership,
    Emergency,
}

impl fmt::Display for ProposalCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ProposalCategory::General => "general",
            ProposalCategory::ParameterChange => "parameter-change",
            ProposalCategory::TreasurySpend => "treasury-spend",
            ProposalCategory::ProtocolUpgrade => "protocol-upgrade",
            ProposalCategory::Membership => "membership",
            ProposalCategory::Emergency => "emergency",
        };
        f.write_str(name)
    }
}

/// Governance-wide defaults every category starts from
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GovernanceParams {
    pub mechanism: MechanismSpec,
    pub quorum: Ratio,
    pub support_threshold: Ratio,
    pub support_duration_ms: u64,
    pub voting_duration_ms: u64,
    pub execution_delay_ms: u64,
    /// Minimum balance a proposer must hold to submit
    pub proposal_threshold: u64,
}

impl Default for GovernanceParams {
    fn default() -> Self {
        Self {
            mechanism: MechanismSpec::SimpleMajority,
            quorum: config::QUORUM,
            support_threshold: config::SUPPORT_THRESHOLD,
            support_duration_ms: config::SUPPORT_PERIOD_MS,
            voting_duration_ms: config::VOTING_PERIOD_MS,
            execution_delay_ms: config::EXECUTION_DELAY_MS,
            proposal_threshold: 0,
        }
    }
}

impl GovernanceParams {
    pub fn validate(&self) -> Result<()> {
        for (name, ratio) in [("quorum", self.quorum), ("support threshold", self.support_threshold)] {
            if !ratio.is_valid() {
                return Err(GovernanceError::BallotInvalid(format!("invalid {} {}", name, ratio)));
            }
        }
        if self.voting_duration_ms == 0 || self.support_duration_ms == 0 {
            return Err(GovernanceError::BallotInvalid(
                "support and voting durations must be positive".into(),
            ));
        }
        self.mechanism.validate()
    }
}

/// Overrides registered for one category; unset fields inherit
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CatalogueEntry {
    pub category: ProposalCategory,
    #[serde(default)]
    pub mechanism: Option<MechanismSpec>,
    #[serde(default)]
    pub quorum: Option<Ratio>,
    #[serde(default)]
    pub support_threshold: Option<Ratio>,
    #[serde(default)]
    pub support_duration_ms: Option<u64>,
    #[serde(default)]
    pub voting_duration_ms: Option<u64>,
    #[serde(default)]
    pub execution_delay_ms: Option<u64>,
    #[serde(default)]
    pub min_proposer_balance: Option<u64>,
    /// Amount locked from the proposer until the proposal is terminal
    #[serde(default)]
    pub proposal_bond: Option<u64>,
    #[serde(default)]
    pub requires_ratification: bool,
    #[serde(default)]
    pub allow_mechanism_override: bool,
}

impl CatalogueEntry {
    pub fn new(category: ProposalCategory) -> Self {
        Self {
            category,
            mechanism: None,
            quorum: None,
            support_threshold: None,
            support_duration_ms: None,
            voting_duration_ms: None,
            execution_delay_ms: None,
            min_proposer_balance: None,
            proposal_bond: None,
            requires_ratification: false,
            allow_mechanism_override: false,
        }
    }
}

/// Fully resolved parameters for one proposal
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResolvedProposalType {
    pub category: ProposalCategory,
    pub mechanism: MechanismSpec,
    pub quorum: Ratio,
    pub support_threshold: Ratio,
    pub support_duration_ms: u64,
    pub voting_duration_ms: u64,
    pub execution_delay_ms: u64,
    pub min_proposer_balance: u64,
    pub proposal_bond: u64,
    pub requires_ratification: bool,
    pub allow_mechanism_override: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProposalCatalogue {
    entries: BTreeMap<ProposalCategory, CatalogueEntry>,
}

impl ProposalCatalogue {
    pub fn new() -> Self {
        Self::default()
    }

    /// General, parameter-change, treasury-spend, protocol-upgrade,
    /// membership and emergency entries
    pub fn standard() -> Self {
        let mut catalogue = Self::new();
        catalogue.register(CatalogueEntry {
            allow_mechanism_override: true,
            ..CatalogueEntry::new(ProposalCategory::General)
        });
        catalogue.register(CatalogueEntry::new(ProposalCategory::ParameterChange));
        catalogue.register(CatalogueEntry {
            quorum: Some(config::QUORUM),
            ..CatalogueEntry::new(ProposalCategory::TreasurySpend)
        });
        catalogue.register(CatalogueEntry {
            mechanism: Some(MechanismSpec::super_majority()),
            requires_ratification: true,
            ..CatalogueEntry::new(ProposalCategory::ProtocolUpgrade)
        });
        catalogue.register(CatalogueEntry::new(ProposalCategory::Membership));
        catalogue.register(CatalogueEntry {
            mechanism: Some(MechanismSpec::SuperMajority {
                threshold: config::EMERGENCY_APPROVAL_THRESHOLD,
            }),
            voting_duration_ms: Some(config::EMERGENCY_VOTING_MS),
            execution_delay_ms: Some(0),
            ..CatalogueEntry::new(ProposalCategory::Emergency)
        });
        catalogue
    }

    /// Register or replace the entry for its category
    pub fn register(&mut self, entry: CatalogueEntry) -> Option<CatalogueEntry> {
        self.entries.insert(entry.category, entry)
    }

    pub fn get(&self, category: ProposalCategory) -> Option<&CatalogueEntry> {
        self.entries.get(&category)
    }

    pub fn categories(&self) -> impl Iterator<Item = ProposalCategory> + '_ {
        self.entries.keys().copied()
    }

    pub fn resolve(
        &self,
        category: ProposalCategory,
        params: &GovernanceParams,
    ) -> Result<ResolvedProposalType> {
        let entry = self
            .entries
            .get(&category)
            .ok_or_else(|| GovernanceError::unknown(EntityKind::Proposal, format!("category {}", category)))?;
        let resolved = ResolvedProposalType {
            category,
            mechanism: entry.mechanism.clone().unwrap_or_else(|| params.mechanism.clone()),
            quorum: entry.quorum.unwrap_or(params.quorum),
            support_threshold: entry.support_threshold.unwrap_or(params.support_threshold),
            support_duration_ms: entry.support_duration_ms.unwrap_or(params.support_duration_ms),
            voting_duration_ms: entry.voting_duration_ms.unwrap_or(params.voting_duration_ms),
            execution_delay_ms: entry.execution_delay_ms.unwrap_or(params.execution_delay_ms),
            min_proposer_balance: entry.min_proposer_balance.unwrap_or(params.proposal_threshold),
            proposal_bond: entry.proposal_bond.unwrap_or(0),
            requires_ratification: entry.requires_ratification,
            allow_mechanism_override: entry.allow_mechanism_override,
        };
        resolved.mechanism.validate()?;
        Ok(resolved)
    }

    /// Resolve and apply a proposer's mechanism choice, if the category allows one
    pub fn resolve_with(
        &self,
        category: ProposalCategory,
        params: &GovernanceParams,
        mechanism: Option<&MechanismSpec>,
    ) -> Result<ResolvedProposalType> {
        let mut resolved = self.resolve(category, params)?;
        if let Some(mechanism) = mechanism {
            if *mechanism != resolved.mechanism {
                if !resolved.allow_mechanism_override {
                    return Err(GovernanceError::PermissionDenied(format!(
                        "{} proposals cannot override the {} mechanism",
                        category, resolved.mechanism
                    )));
                }
                mechanism.validate()?;
                resolved.mechanism = mechanism.clone();
            }
        }
        Ok(resolved)
    }
}
