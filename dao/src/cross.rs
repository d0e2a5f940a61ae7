//! Cross-governance proposals
//!
//! One proposal spanning several governances. In sequential mode each
//! governance runs its own lifecycle in listed order and the first rejection
//! aborts the rest. Parallel mode runs them all at once; a leg that is ready
//! to execute waits for the others, and the legs then execute together or
//! not at all. Consensus mode replaces the per-governance votes with a single
//! validator round.

use agora_consensus::ConsensusMechanism;
use agora_core::{GovernanceId, ProposalId, RoundId};
use agora_governance::{ProposalPhase, ProposalSpec};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CoordinationMode {
    Sequential,
    Parallel,
    Consensus,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CrossGovernanceSpec {
    pub mode: CoordinationMode,
    pub governances: Vec<GovernanceId>,
    pub proposal: ProposalSpec,
    /// Round mechanism for consensus mode; defaults to PBFT
    #[serde(default)]
    pub mechanism: Option<ConsensusMechanism>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "kebab-case")]
pub enum CrossStatus {
    Running,
    Passed,
    Rejected { reason: String },
}

impl CrossStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, CrossStatus::Running)
    }
}

/// Progress of the proposal in one governance
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CrossLeg {
    pub governance: GovernanceId,
    pub proposal: Option<ProposalId>,
    pub phase: Option<ProposalPhase>,
    /// Parallel mode: passed and due, waiting for the other legs
    #[serde(default)]
    pub ready: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CrossGovernance {
    pub id: String,
    pub spec: CrossGovernanceSpec,
    pub legs: Vec<CrossLeg>,
    pub status: CrossStatus,
    pub round: Option<RoundId>,
}

impl CrossGovernance {
    pub fn new(id: impl Into<String>, spec: CrossGovernanceSpec) -> Self {
        let legs = spec
            .governances
            .iter()
            .map(|g| CrossLeg {
                governance: g.clone(),
                proposal: None,
                phase: None,
                ready: false,
            })
            .collect();
        Self {
            id: id.into(),
            spec,
            legs,
            status: CrossStatus::Running,
            round: None,
        }
    }

    pub fn mode(&self) -> CoordinationMode {
        self.spec.mode
    }

    /// Governances whose lifecycle should start now
    pub fn pending_starts(&self) -> Vec<GovernanceId> {
        if self.status.is_terminal() {
            return Vec::new();
        }
        match self.spec.mode {
            CoordinationMode::Parallel => self
                .legs
                .iter()
                .filter(|l| l.proposal.is_none())
                .map(|l| l.governance.clone())
                .collect(),
            CoordinationMode::Sequential => {
                let next = self.legs.iter().find(|l| l.phase != Some(ProposalPhase::Executed));
                match next {
                    Some(leg) if leg.proposal.is_none() => vec![leg.governance.clone()],
                    _ => Vec::new(),
                }
            }
            CoordinationMode::Consensus => Vec::new(),
        }
    }

    pub fn started(&mut self, governance: &GovernanceId, proposal: ProposalId, phase: ProposalPhase) {
        if let Some(leg) = self.legs.iter_mut().find(|l| &l.governance == governance) {
            leg.proposal = Some(proposal);
            leg.phase = Some(phase);
        }
    }

    /// Started legs as `(governance, proposal)` pairs
    pub fn leg_proposals(&self) -> Vec<(GovernanceId, ProposalId)> {
        self.legs
            .iter()
            .filter_map(|l| l.proposal.clone().map(|p| (l.governance.clone(), p)))
            .collect()
    }

    /// Mark a parallel leg as due; true once every leg is
    pub fn mark_ready(&mut self, proposal: &ProposalId) -> bool {
        if let Some(leg) = self
            .legs
            .iter_mut()
            .find(|l| l.proposal.as_ref() == Some(proposal))
        {
            leg.ready = true;
        }
        self.legs.iter().all(|l| l.ready)
    }

    pub fn involves(&self, proposal: &ProposalId) -> bool {
        self.legs.iter().any(|l| l.proposal.as_ref() == Some(proposal))
    }

    /// Fold a phase change of one leg into the overall status
    pub fn record(&mut self, proposal: &ProposalId, phase: ProposalPhase) -> &CrossStatus {
        let Some(leg) = self
            .legs
            .iter_mut()
            .find(|l| l.proposal.as_ref() == Some(proposal))
        else {
            return &self.status;
        };
        leg.phase = Some(phase);
        if self.status.is_terminal() {
            return &self.status;
        }
        if matches!(phase, ProposalPhase::Rejected | ProposalPhase::Failed) {
            self.status = CrossStatus::Rejected {
                reason: format!("{} ended {} in {}", proposal, phase, leg.governance),
            };
        } else if self
            .legs
            .iter()
            .all(|l| l.phase == Some(ProposalPhase::Executed))
        {
            self.status = CrossStatus::Passed;
        }
        &self.status
    }

    pub fn resolve(&mut self, passed: bool, reason: impl Into<String>) {
        if self.status.is_terminal() {
            return;
        }
        self.status = if passed {
            CrossStatus::Passed
        } else {
            CrossStatus::Rejected {
                reason: reason.into(),
            }
        };
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cross(mode: CoordinationMode) -> CrossGovernance {
        CrossGovernance::new(
            "cross-1",
            CrossGovernanceSpec {
                mode,
                governances: vec!["gov-1".into(), "gov-2".into()],
                proposal: ProposalSpec::new("joint", "alice"),
                mechanism: None,
            },
        )
    }

    #[test]
    fn test_sequential_starts_one_leg_at_a_time() {
        let mut cross = cross(CoordinationMode::Sequential);
        assert_eq!(cross.pending_starts(), vec![GovernanceId::from("gov-1")]);
        cross.started(&"gov-1".into(), "gov-1/prop-1".into(), ProposalPhase::Support);
        assert!(cross.pending_starts().is_empty());

        cross.record(&"gov-1/prop-1".into(), ProposalPhase::Executed);
        assert_eq!(cross.pending_starts(), vec![GovernanceId::from("gov-2")]);
        cross.started(&"gov-2".into(), "gov-2/prop-1".into(), ProposalPhase::Support);
        assert_eq!(
            cross.record(&"gov-2/prop-1".into(), ProposalPhase::Executed),
            &CrossStatus::Passed
        );
    }

    #[test]
    fn test_sequential_aborts_on_first_rejection() {
        let mut cross = cross(CoordinationMode::Sequential);
        cross.started(&"gov-1".into(), "gov-1/prop-1".into(), ProposalPhase::Support);
        let status = cross.record(&"gov-1/prop-1".into(), ProposalPhase::Rejected).clone();
        assert!(matches!(status, CrossStatus::Rejected { .. }));
        assert!(cross.pending_starts().is_empty());
        assert!(cross.legs[1].proposal.is_none());
    }

    #[test]
    fn test_parallel_needs_every_leg() {
        let mut cross = cross(CoordinationMode::Parallel);
        assert_eq!(cross.pending_starts().len(), 2);
        cross.started(&"gov-1".into(), "gov-1/prop-1".into(), ProposalPhase::Support);
        cross.started(&"gov-2".into(), "gov-2/prop-1".into(), ProposalPhase::Support);
        cross.record(&"gov-1/prop-1".into(), ProposalPhase::Executed);
        assert_eq!(cross.status, CrossStatus::Running);
        cross.record(&"gov-2/prop-1".into(), ProposalPhase::Failed);
        assert!(matches!(cross.status, CrossStatus::Rejected { .. }));
    }

    #[test]
    fn test_parallel_waits_for_every_leg_to_be_ready() {
        let mut cross = cross(CoordinationMode::Parallel);
        cross.started(&"gov-1".into(), "gov-1/prop-1".into(), ProposalPhase::Support);
        assert!(!cross.mark_ready(&"gov-1/prop-1".into()));
        cross.started(&"gov-2".into(), "gov-2/prop-1".into(), ProposalPhase::Support);
        assert!(!cross.mark_ready(&"gov-1/prop-1".into()));
        assert!(cross.mark_ready(&"gov-2/prop-1".into()));
        assert_eq!(cross.leg_proposals().len(), 2);
    }
}
