//! Proposal and referendum lifecycle
//!
//! ```text
//! draft -> support -> voting -> execution-pending -> executed
//!            |          |              |
//!            +-> rejected <------------+--> failed
//! ```
//!
//! A referendum skips the support phase. Phases only move forward and every
//! transition is appended to the proposal's history. Lifecycle steps that
//! end a proposal never return errors: the reason is recorded and the
//! proposal moves to `rejected` or `failed`. Errors are reserved for calls
//! made in the wrong phase or by the wrong participant.

use crate::action::{self, Action, ActionExecutor, ActionReport};
use crate::catalogue::{ProposalCategory, ResolvedProposalType};
use crate::eligibility::EligibilityRule;
use crate::mechanism::{Decision, MechanismSpec};
use crate::vote::{Vote, VoteSpec, VoteStatus};
use agora_core::{GovernanceError, ParticipantId, ProposalId, Result, Score};
use agora_ledger::LockId;
use log::{info, warn};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ProposalKind {
    Proposal,
    Referendum,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ProposalPhase {
    Draft,
    Support,
    Voting,
    ExecutionPending,
    Executed,
    Rejected,
    Failed,
}

impl ProposalPhase {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            ProposalPhase::Executed | ProposalPhase::Rejected | ProposalPhase::Failed
        )
    }

    /// Legal edges of the lifecycle
    pub fn can_transition(self, to: ProposalPhase) -> bool {
        use ProposalPhase::*;
        matches!(
            (self, to),
            (Draft, Support)
                | (Draft, Voting)
                | (Draft, Rejected)
                | (Support, Voting)
                | (Support, Rejected)
                | (Voting, ExecutionPending)
                | (Voting, Rejected)
                | (ExecutionPending, Executed)
                | (ExecutionPending, Failed)
                | (ExecutionPending, Rejected)
        )
    }
}

impl fmt::Display for ProposalPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ProposalPhase::Draft => "draft",
            ProposalPhase::Support => "support",
            ProposalPhase::Voting => "voting",
            ProposalPhase::ExecutionPending => "execution-pending",
            ProposalPhase::Executed => "executed",
            ProposalPhase::Rejected => "rejected",
            ProposalPhase::Failed => "failed",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhaseChange {
    pub from: ProposalPhase,
    pub to: ProposalPhase,
    pub at: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// What a proposer submits
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProposalSpec {
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default = "default_category")]
    pub category: ProposalCategory,
    pub proposer: ParticipantId,
    #[serde(default)]
    pub actions: Vec<Action>,
    /// Defaults to `["yes", "no"]`
    #[serde(default)]
    pub options: Option<Vec<String>>,
    #[serde(default)]
    pub mechanism: Option<MechanismSpec>,
    #[serde(default)]
    pub topic: Option<String>,
    #[serde(default)]
    pub eligibility: Vec<EligibilityRule>,
}

fn default_category() -> ProposalCategory {
    ProposalCategory::General
}

impl ProposalSpec {
    pub fn new(title: impl Into<String>, proposer: impl Into<ParticipantId>) -> Self {
        Self {
            title: title.into(),
            description: String::new(),
            category: ProposalCategory::General,
            proposer: proposer.into(),
            actions: Vec::new(),
            options: None,
            mechanism: None,
            topic: None,
            eligibility: Vec::new(),
        }
    }

    pub fn with_category(mut self, category: ProposalCategory) -> Self {
        self.category = category;
        self
    }

    pub fn with_action(mut self, action: Action) -> Self {
        self.actions.push(action);
        self
    }

    pub fn with_options(mut self, options: &[&str]) -> Self {
        self.options = Some(options.iter().map(|o| o.to_string()).collect());
        self
    }

    pub fn with_mechanism(mut self, mechanism: MechanismSpec) -> Self {
        self.mechanism = Some(mechanism);
        self
    }

    pub fn with_topic(mut self, topic: impl Into<String>) -> Self {
        self.topic = Some(topic.into());
        self
    }

    pub fn with_eligibility(mut self, rules: Vec<EligibilityRule>) -> Self {
        self.eligibility = rules;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SupportReceipt {
    pub total_support: Score,
    pub threshold_met: bool,
}

#[derive(Debug)]
pub struct Proposal {
    pub id: ProposalId,
    pub kind: ProposalKind,
    pub spec: ProposalSpec,
    pub params: ResolvedProposalType,
    pub created_at: u64,
    phase: ProposalPhase,
    history: Vec<PhaseChange>,
    support_deadline: Option<u64>,
    support_power: Score,
    supporters: BTreeMap<ParticipantId, Score>,
    vote: Option<Vote>,
    decision: Option<Decision>,
    execute_at: Option<u64>,
    ratified: Option<bool>,
    report: Option<ActionReport>,
    reason: Option<String>,
    locks: Vec<LockId>,
}

impl Proposal {
    /// Draft a proposal. Actions are schema-checked here.
    pub fn new(
        id: impl Into<ProposalId>,
        kind: ProposalKind,
        spec: ProposalSpec,
        params: ResolvedProposalType,
        at: u64,
    ) -> Result<Self> {
        if kind == ProposalKind::Proposal && spec.actions.is_empty() {
            return Err(GovernanceError::ExecutionFailed(
                "a proposal needs at least one action".into(),
            ));
        }
        for action in &spec.actions {
            action.validate_schema()?;
        }
        if let Some(mechanism) = &spec.mechanism {
            if *mechanism != params.mechanism {
                return Err(GovernanceError::PermissionDenied(format!(
                    "mechanism {} not allowed for {} proposals",
                    mechanism, params.category
                )));
            }
        }
        Ok(Self {
            id: id.into(),
            kind,
            spec,
            params,
            created_at: at,
            phase: ProposalPhase::Draft,
            history: Vec::new(),
            support_deadline: None,
            support_power: Score::ZERO,
            supporters: BTreeMap::new(),
            vote: None,
            decision: None,
            execute_at: None,
            ratified: None,
            report: None,
            reason: None,
            locks: Vec::new(),
        })
    }

    pub fn phase(&self) -> ProposalPhase {
        self.phase
    }

    pub fn history(&self) -> &[PhaseChange] {
        &self.history
    }

    pub fn proposer(&self) -> &ParticipantId {
        &self.spec.proposer
    }

    pub fn vote(&self) -> Option<&Vote> {
        self.vote.as_ref()
    }

    pub fn vote_mut(&mut self) -> Option<&mut Vote> {
        self.vote.as_mut()
    }

    pub fn decision(&self) -> Option<&Decision> {
        self.decision.as_ref()
    }

    pub fn execute_at(&self) -> Option<u64> {
        self.execute_at
    }

    pub fn support_deadline(&self) -> Option<u64> {
        self.support_deadline
    }

    pub fn report(&self) -> Option<&ActionReport> {
        self.report.as_ref()
    }

    /// Why the proposal ended, for terminal proposals that did not execute
    pub fn reason(&self) -> Option<&str> {
        self.reason.as_deref()
    }

    pub fn total_support(&self) -> Score {
        self.supporters.values().copied().sum()
    }

    pub fn supporters(&self) -> impl Iterator<Item = (&ParticipantId, &Score)> {
        self.supporters.iter()
    }

    pub fn support_met(&self) -> bool {
        let total = self.total_support();
        total.is_positive() && self.params.support_threshold.is_met(total, self.support_power)
    }

    pub fn needs_ratification(&self) -> bool {
        self.params.requires_ratification && self.ratified.is_none()
    }

    /// Track a ledger lock to release once the proposal is terminal
    pub fn hold_lock(&mut self, lock: LockId) {
        self.locks.push(lock);
    }

    /// Locks to release; empty until the proposal is terminal
    pub fn take_locks(&mut self) -> Vec<LockId> {
        if self.phase.is_terminal() {
            std::mem::take(&mut self.locks)
        } else {
            Vec::new()
        }
    }

    fn transition(&mut self, to: ProposalPhase, at: u64, reason: Option<String>) -> Result<()> {
        if !self.phase.can_transition(to) {
            return Err(GovernanceError::transition(self.phase, to));
        }
        info!(
            "📜 Proposal {}: {} -> {}{}",
            self.id,
            self.phase,
            to,
            reason.as_deref().map(|r| format!(" ({})", r)).unwrap_or_default()
        );
        if matches!(to, ProposalPhase::Rejected | ProposalPhase::Failed) {
            self.reason = reason.clone();
        }
        self.history.push(PhaseChange {
            from: self.phase,
            to,
            at,
            reason,
        });
        self.phase = to;
        Ok(())
    }

    /// Move a draft into its support period
    pub fn submit(&mut self, proposer_balance: u64, support_power: Score, at: u64) -> Result<()> {
        if self.kind == ProposalKind::Referendum {
            return Err(GovernanceError::transition(self.phase, ProposalPhase::Support));
        }
        if self.phase != ProposalPhase::Draft {
            return Err(GovernanceError::transition(self.phase, ProposalPhase::Support));
        }
        if proposer_balance < self.params.min_proposer_balance {
            return Err(GovernanceError::IneligibleParticipant {
                participant: self.spec.proposer.to_string(),
                rule: format!("proposer balance >= {}", self.params.min_proposer_balance),
            });
        }
        self.support_power = support_power;
        self.support_deadline = Some(at.saturating_add(self.params.support_duration_ms));
        self.transition(ProposalPhase::Support, at, None)
    }

    pub fn support(&mut self, supporter: &str, weight: Score, at: u64) -> Result<SupportReceipt> {
        if self.phase != ProposalPhase::Support {
            return Err(GovernanceError::transition(self.phase, ProposalPhase::Support));
        }
        if let Some(deadline) = self.support_deadline {
            if at > deadline {
                return Err(GovernanceError::TimeoutExpired(format!(
                    "support for {} closed at {}",
                    self.id, deadline
                )));
            }
        }
        if self.supporters.contains_key(supporter) {
            return Err(GovernanceError::DuplicateBallot(supporter.to_string()));
        }
        if !weight.is_positive() {
            return Err(GovernanceError::IneligibleParticipant {
                participant: supporter.to_string(),
                rule: "support weight > 0".into(),
            });
        }
        self.supporters.insert(ParticipantId::from(supporter), weight);
        Ok(SupportReceipt {
            total_support: self.total_support(),
            threshold_met: self.support_met(),
        })
    }

    /// Support deadline passed: returns whether voting may open, rejecting otherwise
    pub fn close_support(&mut self, at: u64) -> Result<bool> {
        if self.phase != ProposalPhase::Support {
            return Err(GovernanceError::transition(self.phase, ProposalPhase::Voting));
        }
        if self.support_met() {
            return Ok(true);
        }
        self.transition(
            ProposalPhase::Rejected,
            at,
            Some(format!(
                "support threshold {} not met",
                self.params.support_threshold
            )),
        )?;
        Ok(false)
    }

    /// Spec for the vote this proposal opens at `opens_at`
    pub fn vote_spec(&self, opens_at: u64) -> VoteSpec {
        let options = self
            .spec
            .options
            .clone()
            .unwrap_or_else(|| vec!["yes".to_string(), "no".to_string()]);
        let mechanism = self.params.mechanism.clone();
        let closes_at = if mechanism.is_open_ended() {
            None
        } else {
            Some(opens_at.saturating_add(self.params.voting_duration_ms))
        };
        let mut spec = VoteSpec::new(mechanism, options, opens_at, closes_at)
            .with_quorum(self.params.quorum)
            .with_eligibility(self.spec.eligibility.clone());
        spec.topic = self.spec.topic.clone();
        spec
    }

    /// Attach the vote and enter the voting phase
    pub fn open_voting(&mut self, vote: Vote, at: u64) -> Result<()> {
        match (self.kind, self.phase) {
            (ProposalKind::Referendum, ProposalPhase::Draft) => {}
            (ProposalKind::Proposal, ProposalPhase::Support) if self.support_met() => {}
            (_, phase) => return Err(GovernanceError::transition(phase, ProposalPhase::Voting)),
        }
        self.transition(ProposalPhase::Voting, at, None)?;
        self.vote = Some(vote);
        Ok(())
    }

    /// Outcome counts as approval: "yes" when offered, otherwise any decisive winner
    fn approves(&self, decision: &Decision) -> bool {
        if !decision.is_decisive() {
            return false;
        }
        let offers_yes = self
            .vote
            .as_ref()
            .is_some_and(|v| v.spec.options.iter().any(|o| o == "yes"));
        match decision.outcome.as_deref() {
            Some(outcome) if offers_yes => outcome == "yes",
            Some(_) => true,
            None => false,
        }
    }

    /// Finalize the vote and move to execution-pending or rejected
    pub fn close_voting(&mut self, now: u64) -> Result<Decision> {
        if self.phase != ProposalPhase::Voting {
            return Err(GovernanceError::transition(self.phase, ProposalPhase::ExecutionPending));
        }
        let vote = self
            .vote
            .as_mut()
            .ok_or_else(|| GovernanceError::InvariantViolation(format!("proposal {} is voting without a vote", self.id)))?;

        if vote.status() == VoteStatus::Cancelled {
            let decision = vote.decide(now);
            self.transition(ProposalPhase::Rejected, now, Some("vote cancelled".into()))?;
            self.decision = Some(decision.clone());
            return Ok(decision);
        }
        let decision = match vote.status() {
            VoteStatus::Active => vote.close(now)?,
            _ => vote.decide(now),
        };
        self.decision = Some(decision.clone());

        if self.approves(&decision) {
            self.execute_at = Some(now.saturating_add(self.params.execution_delay_ms));
            self.transition(ProposalPhase::ExecutionPending, now, None)?;
        } else {
            let reason = if !decision.quorum_met {
                GovernanceError::QuorumNotMet(format!(
                    "participation {} of {} below {}",
                    decision.participation, decision.total_power, self.params.quorum
                ))
            } else {
                GovernanceError::ThresholdNotMet(format!(
                    "outcome {}",
                    decision.outcome.as_deref().unwrap_or("none")
                ))
            };
            self.transition(ProposalPhase::Rejected, now, Some(reason.to_string()))?;
        }
        Ok(decision)
    }

    /// Result of the validator round for proposals that need ratification
    pub fn record_ratification(&mut self, approved: bool, at: u64) -> Result<()> {
        if self.phase != ProposalPhase::ExecutionPending || !self.params.requires_ratification {
            return Err(GovernanceError::transition(self.phase, ProposalPhase::Executed));
        }
        self.ratified = Some(approved);
        if !approved {
            self.transition(ProposalPhase::Rejected, at, Some("ratification rejected".into()))?;
        }
        Ok(())
    }

    pub fn is_ready(&self, now: u64) -> bool {
        self.phase == ProposalPhase::ExecutionPending
            && !self.needs_ratification()
            && self.execute_at.is_some_and(|at| now >= at)
    }

    /// Apply the actions in order; a failure moves the proposal to `failed`
    pub fn execute(&mut self, executor: &mut dyn ActionExecutor, now: u64) -> Result<ActionReport> {
        if self.phase != ProposalPhase::ExecutionPending {
            return Err(GovernanceError::transition(self.phase, ProposalPhase::Executed));
        }
        if self.needs_ratification() {
            return Err(GovernanceError::PermissionDenied(format!(
                "proposal {} awaits ratification",
                self.id
            )));
        }
        if let Some(at) = self.execute_at {
            if now < at {
                return Err(GovernanceError::TimeoutExpired(format!(
                    "proposal {} executes at {}",
                    self.id, at
                )));
            }
        }

        let report = action::execute_all(executor, &self.spec.actions);
        if report.succeeded() {
            self.transition(ProposalPhase::Executed, now, None)?;
        } else {
            let reason = report.error.clone().unwrap_or_else(|| "action failed".into());
            warn!("🚨 Proposal {} execution failed: {}", self.id, reason);
            self.transition(ProposalPhase::Failed, now, Some(reason))?;
        }
        self.report = Some(report.clone());
        Ok(report)
    }

    /// Withdraw a draft or a proposal still gathering support
    pub fn cancel(&mut self, by: &str, at: u64) -> Result<()> {
        if by != self.spec.proposer.as_str() {
            return Err(GovernanceError::PermissionDenied(format!(
                "only {} may cancel {}",
                self.spec.proposer, self.id
            )));
        }
        if !matches!(self.phase, ProposalPhase::Draft | ProposalPhase::Support) {
            return Err(GovernanceError::transition(self.phase, ProposalPhase::Rejected));
        }
        self.transition(ProposalPhase::Rejected, at, Some("cancelled by proposer".into()))
    }

    /// Terminal rejection from outside the normal flow, e.g. a cancelled vote
    pub fn reject(&mut self, reason: impl Into<String>, at: u64) -> Result<()> {
        if let Some(vote) = self.vote.as_mut() {
            if vote.is_active() {
                vote.cancel()?;
            }
        }
        self.transition(ProposalPhase::Rejected, at, Some(reason.into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalogue::{GovernanceParams, ProposalCatalogue};
    use crate::mechanism::BallotPayload;
    use crate::vote::VoteContext;
    use agora_core::{Participant, ParticipantRegistry, Ratio};
    use agora_ledger::{TokenConfig, TokenLedger};

    fn params() -> ResolvedProposalType {
        let params = GovernanceParams {
            support_duration_ms: 100,
            voting_duration_ms: 100,
            execution_delay_ms: 50,
            ..Default::default()
        };
        ProposalCatalogue::standard()
            .resolve(ProposalCategory::ParameterChange, &params)
            .unwrap()
    }

    fn update() -> Action {
        Action::UpdateParameter {
            key: "quorum".into(),
            value: serde_json::json!({"num": 1, "den": 2}),
        }
    }

    fn vote_for(proposal: &Proposal, holders: &[(&str, u64)], at: u64) -> Vote {
        let mut registry = ParticipantRegistry::new();
        let mut ledger = TokenLedger::new();
        ledger.create_token(TokenConfig::new("AGR"), 0).unwrap();
        for (holder, amount) in holders {
            registry.register(Participant::new(*holder, vec![], 0)).unwrap();
            ledger.mint("AGR", holder, *amount, "genesis", 0).unwrap();
        }
        let spec = proposal.vote_spec(at);
        let context =
            VoteContext::capture(&mut ledger, "AGR", &registry, BTreeMap::new(), &spec, at).unwrap();
        Vote::new(format!("{}/vote", proposal.id), spec, context).unwrap()
    }

    #[derive(Default)]
    struct Recorder(Vec<String>);

    impl ActionExecutor for Recorder {
        fn check(&self, _action: &Action) -> Result<()> {
            Ok(())
        }
        fn apply(&mut self, action: &Action) -> Result<()> {
            self.0.push(action.name().to_string());
            Ok(())
        }
        fn compensate(&mut self, _action: &Action) -> Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_phase_edges_are_monotone() {
        use ProposalPhase::*;
        assert!(Draft.can_transition(Support));
        assert!(!Voting.can_transition(Support));
        assert!(!Executed.can_transition(Failed));
        assert!(!Rejected.can_transition(Voting));
    }

    #[test]
    fn test_proposal_needs_actions() {
        let spec = ProposalSpec::new("empty", "alice");
        let err = Proposal::new("p1", ProposalKind::Proposal, spec.clone(), params(), 0).unwrap_err();
        assert!(matches!(err, GovernanceError::ExecutionFailed(_)));
        assert!(Proposal::new("r1", ProposalKind::Referendum, spec, params(), 0).is_ok());
    }

    #[test]
    fn test_full_lifecycle() {
        let spec = ProposalSpec::new("lower quorum", "alice").with_action(update());
        let mut proposal = Proposal::new("p1", ProposalKind::Proposal, spec, params(), 0).unwrap();

        proposal.submit(10, Score::from_units(100), 0).unwrap();
        let receipt = proposal.support("bob", Score::from_units(5), 10).unwrap();
        assert!(!receipt.threshold_met);
        let receipt = proposal.support("carol", Score::from_units(5), 20).unwrap();
        assert!(receipt.threshold_met);
        assert_eq!(receipt.total_support, Score::from_units(10));

        let vote = vote_for(&proposal, &[("alice", 40), ("bob", 30), ("carol", 30)], 30);
        proposal.open_voting(vote, 30).unwrap();
        let vote = proposal.vote_mut().unwrap();
        vote.cast("alice", BallotPayload::choice("yes"), 40).unwrap();
        vote.cast("bob", BallotPayload::choice("yes"), 41).unwrap();
        vote.cast("carol", BallotPayload::choice("no"), 42).unwrap();

        let decision = proposal.close_voting(130).unwrap();
        assert!(decision.is_decisive());
        assert_eq!(proposal.phase(), ProposalPhase::ExecutionPending);
        assert_eq!(proposal.execute_at(), Some(180));
        assert!(!proposal.is_ready(179));

        let mut recorder = Recorder::default();
        assert!(proposal.execute(&mut recorder, 150).is_err());
        let report = proposal.execute(&mut recorder, 180).unwrap();
        assert!(report.succeeded());
        assert_eq!(proposal.phase(), ProposalPhase::Executed);
        assert_eq!(recorder.0, vec!["update-parameter"]);

        let phases: Vec<ProposalPhase> = proposal.history().iter().map(|c| c.to).collect();
        assert_eq!(
            phases,
            vec![
                ProposalPhase::Support,
                ProposalPhase::Voting,
                ProposalPhase::ExecutionPending,
                ProposalPhase::Executed
            ]
        );
    }

    #[test]
    fn test_support_deadline_rejects() {
        let spec = ProposalSpec::new("unpopular", "alice").with_action(update());
        let mut proposal = Proposal::new("p1", ProposalKind::Proposal, spec, params(), 0).unwrap();
        proposal.submit(0, Score::from_units(100), 0).unwrap();
        proposal.support("bob", Score::from_units(1), 5).unwrap();
        assert!(matches!(
            proposal.support("carol", Score::from_units(50), 101),
            Err(GovernanceError::TimeoutExpired(_))
        ));
        assert!(!proposal.close_support(101).unwrap());
        assert_eq!(proposal.phase(), ProposalPhase::Rejected);
        assert!(proposal.reason().unwrap().contains("support threshold"));
    }

    #[test]
    fn test_proposer_balance_required() {
        let mut resolved = params();
        resolved.min_proposer_balance = 50;
        let spec = ProposalSpec::new("t", "alice").with_action(update());
        let mut proposal = Proposal::new("p1", ProposalKind::Proposal, spec, resolved, 0).unwrap();
        let err = proposal.submit(49, Score::from_units(100), 0).unwrap_err();
        assert!(matches!(err, GovernanceError::IneligibleParticipant { .. }));
        assert_eq!(proposal.phase(), ProposalPhase::Draft);
    }

    #[test]
    fn test_cancel_by_proposer_only() {
        let spec = ProposalSpec::new("t", "alice").with_action(update());
        let mut proposal = Proposal::new("p1", ProposalKind::Proposal, spec, params(), 0).unwrap();
        assert!(matches!(
            proposal.cancel("bob", 1),
            Err(GovernanceError::PermissionDenied(_))
        ));
        proposal.cancel("alice", 1).unwrap();
        assert_eq!(proposal.phase(), ProposalPhase::Rejected);
        assert_eq!(proposal.reason(), Some("cancelled by proposer"));
        assert!(proposal.cancel("alice", 2).is_err());
    }

    #[test]
    fn test_empty_referendum_rejected_without_quorum() {
        let spec = ProposalSpec::new("poll", "alice");
        let mut referendum = Proposal::new("r1", ProposalKind::Referendum, spec, params(), 0).unwrap();
        let vote = vote_for(&referendum, &[("alice", 10)], 0);
        referendum.open_voting(vote, 0).unwrap();
        let decision = referendum.close_voting(100).unwrap();
        assert_eq!(decision.outcome, None);
        assert!(!decision.quorum_met);
        assert_eq!(referendum.phase(), ProposalPhase::Rejected);
        assert!(referendum.reason().unwrap().starts_with("Quorum not met"));
    }

    #[test]
    fn test_ratification_gate() {
        let mut resolved = params();
        resolved.requires_ratification = true;
        resolved.quorum = Ratio::ZERO;
        let spec = ProposalSpec::new("poll", "alice");
        let mut referendum = Proposal::new("r1", ProposalKind::Referendum, spec, resolved, 0).unwrap();
        let vote = vote_for(&referendum, &[("alice", 10)], 0);
        referendum.open_voting(vote, 0).unwrap();
        referendum
            .vote_mut()
            .unwrap()
            .cast("alice", BallotPayload::choice("yes"), 1)
            .unwrap();
        referendum.close_voting(100).unwrap();
        assert!(referendum.needs_ratification());
        assert!(!referendum.is_ready(1_000));

        referendum.record_ratification(true, 120).unwrap();
        assert!(referendum.is_ready(150));
        let report = referendum.execute(&mut Recorder::default(), 150).unwrap();
        assert_eq!(report.applied, 0);
        assert_eq!(referendum.phase(), ProposalPhase::Executed);
    }
}
