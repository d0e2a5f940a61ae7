//! Status and health reports returned by the orchestrator

use crate::cross::CrossGovernance;
use crate::dao::Dao;
use agora_consensus::RoundReport;
use agora_core::{GovernanceId, ParticipantId, ProposalId, Score, VoteId};
use agora_governance::{ActionReport, Decision, PhaseChange, Proposal, ProposalKind, ProposalPhase};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GovernanceStatus {
    pub id: GovernanceId,
    pub name: String,
    pub kind: String,
    pub token: String,
    pub members: usize,
    pub proposals: usize,
    pub active_votes: usize,
    pub treasury: BTreeMap<String, u64>,
    /// Installed modules by name
    pub modules: Vec<String>,
    pub degraded: Option<String>,
    pub created_at: u64,
}

impl GovernanceStatus {
    pub fn of(dao: &Dao) -> Self {
        Self {
            id: dao.id.clone(),
            name: dao.name().to_string(),
            kind: dao.kind.to_string(),
            token: dao.token().to_string(),
            members: dao.roster().len(),
            proposals: dao.proposals().len(),
            active_votes: dao.active_votes(),
            treasury: dao.treasury().balances().clone(),
            modules: dao.state().modules.keys().cloned().collect(),
            degraded: dao.degraded().map(str::to_string),
            created_at: dao.created_at,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VoteReport {
    pub id: VoteId,
    pub mechanism: String,
    pub status: String,
    pub ballots: usize,
    pub eligible: usize,
    pub closes_at: Option<u64>,
    pub decision: Option<Decision>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProposalStatus {
    pub id: ProposalId,
    pub governance: GovernanceId,
    pub kind: ProposalKind,
    pub title: String,
    pub proposer: ParticipantId,
    pub category: String,
    pub phase: ProposalPhase,
    pub total_support: Score,
    pub vote: Option<VoteReport>,
    pub execute_at: Option<u64>,
    pub awaiting_ratification: bool,
    /// Why a rejected or failed proposal ended
    pub reason: Option<String>,
    pub report: Option<ActionReport>,
    pub history: Vec<PhaseChange>,
}

impl ProposalStatus {
    pub fn of(governance: &GovernanceId, proposal: &Proposal) -> Self {
        let vote = proposal.vote().map(|v| VoteReport {
            id: v.id.clone(),
            mechanism: v.spec.mechanism.name().to_string(),
            status: format!("{:?}", v.status()).to_lowercase(),
            ballots: v.ballots().len(),
            eligible: v.eligible_count(),
            closes_at: v.spec.closes_at,
            decision: proposal.decision().cloned().or_else(|| v.decision().cloned()),
        });
        Self {
            id: proposal.id.clone(),
            governance: governance.clone(),
            kind: proposal.kind,
            title: proposal.spec.title.clone(),
            proposer: proposal.proposer().clone(),
            category: proposal.params.category.to_string(),
            phase: proposal.phase(),
            total_support: proposal.total_support(),
            vote,
            execute_at: proposal.execute_at(),
            awaiting_ratification: proposal.phase() == ProposalPhase::ExecutionPending
                && proposal.needs_ratification(),
            reason: proposal.reason().map(str::to_string),
            report: proposal.report().cloned(),
            history: proposal.history().to_vec(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum StatusReport {
    Governance {
        reported_at: DateTime<Utc>,
        status: GovernanceStatus,
    },
    Proposal {
        reported_at: DateTime<Utc>,
        status: Box<ProposalStatus>,
    },
    Round {
        reported_at: DateTime<Utc>,
        status: RoundReport,
    },
    Cross {
        reported_at: DateTime<Utc>,
        status: CrossGovernance,
    },
}

impl StatusReport {
    pub fn governance(status: GovernanceStatus) -> Self {
        StatusReport::Governance {
            reported_at: Utc::now(),
            status,
        }
    }

    pub fn proposal(status: ProposalStatus) -> Self {
        StatusReport::Proposal {
            reported_at: Utc::now(),
            status: Box::new(status),
        }
    }

    pub fn round(status: RoundReport) -> Self {
        StatusReport::Round {
            reported_at: Utc::now(),
            status,
        }
    }

    pub fn cross(status: CrossGovernance) -> Self {
        StatusReport::Cross {
            reported_at: Utc::now(),
            status,
        }
    }
}

/// Aggregate view over every governance
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthReport {
    pub governances: usize,
    pub degraded: Vec<GovernanceId>,
    pub active_votes: usize,
    pub active_rounds: usize,
    pub pending_tasks: usize,
    pub healthy: bool,
    pub checked_at: DateTime<Utc>,
}
