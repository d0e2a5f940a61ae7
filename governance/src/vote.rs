//! Votes and the ballot box
//!
//! A [`Vote`] is opened against a [`VoteContext`] captured at creation: the
//! token snapshot, participant profiles and memberships. Every ballot is
//! weighed and checked against that frozen context, so ledger or membership
//! changes after the vote opened never affect it.

use crate::eligibility::{self, EligibilityContext, EligibilityRule};
use crate::mechanism::{
    BallotPayload, Decision, FinalizeContext, MarketOracle, MechanismSpec, Tally, VotingMechanism,
};
use agora_core::{
    EntityKind, GovernanceError, Participant, ParticipantId, ParticipantRegistry, Ratio, Result,
    Score, TokenSymbol, VoteId,
};
use agora_ledger::{PowerContext, PowerRules, Snapshot, TokenLedger, VotingPower};
use log::debug;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VoteSpec {
    pub mechanism: MechanismSpec,
    pub options: Vec<String>,
    pub opens_at: u64,
    /// `None` only for open-ended mechanisms
    pub closes_at: Option<u64>,
    pub quorum: Ratio,
    #[serde(default)]
    pub topic: Option<String>,
    #[serde(default)]
    pub eligibility: Vec<EligibilityRule>,
    /// Overrides the token's default power pipeline
    #[serde(default)]
    pub power: Option<PowerRules>,
}

impl VoteSpec {
    pub fn new(mechanism: MechanismSpec, options: Vec<String>, opens_at: u64, closes_at: Option<u64>) -> Self {
        Self {
            mechanism,
            options,
            opens_at,
            closes_at,
            quorum: crate::config::QUORUM,
            topic: None,
            eligibility: Vec::new(),
            power: None,
        }
    }

    pub fn with_quorum(mut self, quorum: Ratio) -> Self {
        self.quorum = quorum;
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

    pub fn with_power(mut self, power: PowerRules) -> Self {
        self.power = Some(power);
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.options.is_empty() {
            return Err(GovernanceError::BallotInvalid(
                "vote requires at least one option".into(),
            ));
        }
        let mut seen = BTreeSet::new();
        for option in &self.options {
            if option.is_empty() || !seen.insert(option.as_str()) {
                return Err(GovernanceError::BallotInvalid(format!(
                    "invalid or duplicate option {:?}",
                    option
                )));
            }
        }
        match (self.closes_at, self.mechanism.is_open_ended()) {
            (Some(close), _) if close <= self.opens_at => {
                return Err(GovernanceError::BallotInvalid(format!(
                    "close {} must be after open {}",
                    close, self.opens_at
                )));
            }
            (None, false) => {
                return Err(GovernanceError::BallotInvalid(format!(
                    "{} votes need a close time",
                    self.mechanism
                )));
            }
            _ => {}
        }
        if !self.quorum.is_valid() {
            return Err(GovernanceError::BallotInvalid(format!(
                "invalid quorum {}",
                self.quorum
            )));
        }
        self.mechanism.validate()
    }
}

/// Frozen facts a vote is evaluated against
#[derive(Debug, Clone)]
pub struct VoteContext {
    pub token: TokenSymbol,
    snapshot: Arc<Snapshot>,
    /// Extra snapshots for token-holder rules on other tokens
    other_snapshots: BTreeMap<TokenSymbol, Arc<Snapshot>>,
    participants: BTreeMap<ParticipantId, Participant>,
    memberships: BTreeMap<String, BTreeSet<ParticipantId>>,
    power_rules: PowerRules,
    power: PowerContext,
    at: u64,
}

impl VoteContext {
    /// Snapshot the ledger and copy the participant state a vote needs
    pub fn capture(
        ledger: &mut TokenLedger,
        token: &str,
        registry: &ParticipantRegistry,
        memberships: BTreeMap<String, BTreeSet<ParticipantId>>,
        spec: &VoteSpec,
        at: u64,
    ) -> Result<Self> {
        let snapshot = ledger.snapshot(token, at)?;
        let mut other_snapshots = BTreeMap::new();
        for rule in &spec.eligibility {
            if let EligibilityRule::TokenHolder { token: other, .. } = rule {
                if other != token && !other_snapshots.contains_key(other.as_str()) {
                    other_snapshots.insert(TokenSymbol::from(other.as_str()), ledger.snapshot(other, at)?);
                }
            }
        }
        let power_rules = match &spec.power {
            Some(rules) => rules.clone(),
            None => ledger.token(token)?.config.power.clone(),
        };
        let participants: BTreeMap<ParticipantId, Participant> =
            registry.iter().map(|p| (p.id.clone(), p.clone())).collect();
        Ok(Self::from_parts(
            snapshot,
            participants,
            memberships,
            power_rules,
            spec.topic.clone(),
            at,
        )
        .with_other_snapshots(other_snapshots))
    }

    pub fn from_parts(
        snapshot: Arc<Snapshot>,
        participants: BTreeMap<ParticipantId, Participant>,
        memberships: BTreeMap<String, BTreeSet<ParticipantId>>,
        power_rules: PowerRules,
        topic: Option<String>,
        at: u64,
    ) -> Self {
        let reputations = participants
            .values()
            .map(|p| (p.id.clone(), p.reputation))
            .collect();
        Self {
            token: snapshot.token.clone(),
            snapshot,
            other_snapshots: BTreeMap::new(),
            participants,
            memberships,
            power_rules,
            power: PowerContext {
                topic,
                at,
                reputations,
            },
            at,
        }
    }

    fn with_other_snapshots(mut self, others: BTreeMap<TokenSymbol, Arc<Snapshot>>) -> Self {
        self.other_snapshots = others;
        self
    }

    pub fn snapshot(&self) -> &Arc<Snapshot> {
        &self.snapshot
    }

    pub fn participant(&self, id: &str) -> Option<&Participant> {
        self.participants.get(id)
    }

    pub fn participants(&self) -> impl Iterator<Item = &Participant> {
        self.participants.values()
    }

    pub fn voting_power(&self) -> VotingPower<'_> {
        VotingPower::new(&self.snapshot, &self.power_rules, &self.power)
    }
}

impl EligibilityContext for VoteContext {
    fn balance(&self, token: &str, participant: &str) -> u64 {
        if token == self.token.as_str() {
            self.snapshot.balance(participant)
        } else {
            self.other_snapshots
                .get(token)
                .map(|s| s.balance(participant))
                .unwrap_or(0)
        }
    }

    fn reputation(&self, participant: &str) -> Option<u64> {
        self.participants.get(participant).map(|p| p.reputation)
    }

    fn is_member(&self, dao: &str, participant: &str) -> bool {
        self.memberships
            .get(dao)
            .is_some_and(|members| members.contains(participant))
    }

    fn staked_for(&self, participant: &str, min_duration: u64) -> u64 {
        self.snapshot.staked_for(participant, min_duration, self.at)
    }

    fn account_age(&self, participant: &str) -> Option<u64> {
        self.participants
            .get(participant)
            .map(|p| self.at.saturating_sub(p.registered_at))
    }

    fn is_authority(&self, participant: &str) -> bool {
        self.participants
            .get(participant)
            .is_some_and(|p| p.authority)
    }

    fn inviter(&self, participant: &str) -> Option<ParticipantId> {
        self.participants
            .get(participant)
            .and_then(|p| p.invited_by.clone())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum VoteStatus {
    Active,
    Completed,
    Cancelled,
}

/// Entry in the append-only ballot log
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BallotRecord {
    pub seq: u64,
    pub voter: ParticipantId,
    pub payload: BallotPayload,
    pub weight: Score,
    pub cast_at: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CastReceipt {
    pub accepted: bool,
    pub weight: Score,
    pub seq: u64,
}

#[derive(Debug)]
pub struct Vote {
    pub id: VoteId,
    pub spec: VoteSpec,
    status: VoteStatus,
    context: VoteContext,
    tally: Tally,
    ballots: Vec<BallotRecord>,
    total_power: Score,
    eligible_count: usize,
    decision: Option<Decision>,
    oracle: Option<Arc<dyn MarketOracle>>,
}

impl Vote {
    pub fn new(id: impl Into<VoteId>, spec: VoteSpec, context: VoteContext) -> Result<Self> {
        spec.validate()?;
        let mechanism = spec.mechanism.build(None);
        let power = context.voting_power();
        let total_power = power.total();
        let eligible_count = context
            .participants()
            .filter(|p| {
                p.active
                    && eligibility::first_failure(&spec.eligibility, &context, p.id.as_str()).is_none()
                    && mechanism.ballot_weight(&power, p.id.as_str()).is_positive()
            })
            .count();
        let tally = mechanism.empty_tally(&spec);
        let id = id.into();
        debug!(
            "🗳️  Opened vote {} ({}, {} options, total power {})",
            id,
            spec.mechanism,
            spec.options.len(),
            total_power
        );
        Ok(Self {
            id,
            spec,
            status: VoteStatus::Active,
            context,
            tally,
            ballots: Vec::new(),
            total_power,
            eligible_count,
            decision: None,
            oracle: None,
        })
    }

    pub fn with_oracle(mut self, oracle: Arc<dyn MarketOracle>) -> Self {
        self.oracle = Some(oracle);
        self
    }

    fn mechanism(&self) -> Box<dyn VotingMechanism> {
        self.spec.mechanism.build(self.oracle.clone())
    }

    pub fn status(&self) -> VoteStatus {
        self.status
    }

    pub fn is_active(&self) -> bool {
        self.status == VoteStatus::Active
    }

    pub fn tally(&self) -> &Tally {
        &self.tally
    }

    pub fn ballots(&self) -> &[BallotRecord] {
        &self.ballots
    }

    pub fn total_power(&self) -> Score {
        self.total_power
    }

    pub fn eligible_count(&self) -> usize {
        self.eligible_count
    }

    pub fn decision(&self) -> Option<&Decision> {
        self.decision.as_ref()
    }

    pub fn context(&self) -> &VoteContext {
        &self.context
    }

    pub fn has_voted(&self, voter: &str) -> bool {
        self.tally.ballots.contains_key(voter)
    }

    /// Weight `voter` would cast with
    pub fn power_of(&self, voter: &str) -> Score {
        self.mechanism()
            .ballot_weight(&self.context.voting_power(), voter)
    }

    /// Accept one ballot. On error the vote is unchanged.
    pub fn cast(&mut self, voter: &str, payload: BallotPayload, at: u64) -> Result<CastReceipt> {
        if self.status != VoteStatus::Active {
            return Err(GovernanceError::VoteClosed(format!(
                "vote {} is {:?}",
                self.id, self.status
            )));
        }
        if at < self.spec.opens_at {
            return Err(GovernanceError::VoteClosed(format!(
                "vote {} opens at {}",
                self.id, self.spec.opens_at
            )));
        }
        if let Some(close) = self.spec.closes_at {
            if at > close {
                return Err(GovernanceError::VoteClosed(format!(
                    "vote {} closed at {}",
                    self.id, close
                )));
            }
        }
        if self.has_voted(voter) {
            return Err(GovernanceError::DuplicateBallot(voter.to_string()));
        }
        match self.context.participant(voter) {
            None => return Err(GovernanceError::unknown(EntityKind::Participant, voter)),
            Some(p) if !p.active => {
                return Err(GovernanceError::IneligibleParticipant {
                    participant: voter.to_string(),
                    rule: "active participant".into(),
                })
            }
            Some(_) => {}
        }
        eligibility::check(&self.spec.eligibility, &self.context, voter)?;

        let mechanism = self.mechanism();
        let weight = mechanism.ballot_weight(&self.context.voting_power(), voter);
        if !weight.is_positive() {
            return Err(GovernanceError::IneligibleParticipant {
                participant: voter.to_string(),
                rule: "voting power > 0".into(),
            });
        }
        let voter_id = ParticipantId::from(voter);
        let ballot = mechanism.validate_ballot(&voter_id, &payload, weight, at, &self.spec)?;

        let tally = std::mem::take(&mut self.tally);
        self.tally = mechanism.accumulate(tally, ballot);
        let seq = self.ballots.len() as u64;
        self.ballots.push(BallotRecord {
            seq,
            voter: voter_id,
            payload,
            weight,
            cast_at: at,
        });
        Ok(CastReceipt {
            accepted: true,
            weight,
            seq,
        })
    }

    /// Finalize the current tally as of `now` without changing the vote
    pub fn decide(&self, now: u64) -> Decision {
        if let Some(decision) = &self.decision {
            return decision.clone();
        }
        let power = self.context.voting_power();
        let ctx = FinalizeContext {
            total_power: self.total_power,
            now,
            power: &power,
        };
        self.mechanism().finalize(&self.tally, &self.spec, &ctx)
    }

    /// Non-terminal tally, used for periodic conviction evaluation
    pub fn preview(&self, now: u64) -> Decision {
        self.decide(now)
    }

    /// Finalize and move to completed
    pub fn close(&mut self, now: u64) -> Result<Decision> {
        if self.status != VoteStatus::Active {
            return Err(GovernanceError::VoteClosed(format!(
                "vote {} is {:?}",
                self.id, self.status
            )));
        }
        let decision = self.decide(now);
        self.status = VoteStatus::Completed;
        self.decision = Some(decision.clone());
        debug!(
            "🗳️  Closed vote {}: outcome {:?}, passed {}, quorum {}",
            self.id, decision.outcome, decision.passed, decision.quorum_met
        );
        Ok(decision)
    }

    /// Admin cancel; in-flight ballots then fail with `VoteClosed`
    pub fn cancel(&mut self) -> Result<()> {
        if self.status != VoteStatus::Active {
            return Err(GovernanceError::transition(self.status, VoteStatus::Cancelled));
        }
        self.status = VoteStatus::Cancelled;
        Ok(())
    }
}
