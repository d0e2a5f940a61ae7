//! Phased BFT commit pipeline
//!
//! Shared state machine behind PBFT, Tendermint and HotStuff. The leader of
//! each view (`validators[view mod n]`) proposes a value; validators then
//! vote through the profile's phases, each needing `floor(2n/3) + 1` votes.
//! Reaching quorum in the lock phase locks the value; a locked value can
//! only be replaced by a proposal justified with a quorum certificate from a
//! higher view. The value commits once every phase has quorum.

use super::RoundProtocol;
use crate::collector::VoteCollector;
use crate::leader;
use crate::message::{
    ConsensusMessage, MessageOutcome, QuorumCertificate, RoundCheck, TimeoutOutcome, VotePhase,
};
use crate::quorum;
use crate::validator::ValidatorSet;
use agora_core::ParticipantId;
use log::{debug, info};
use std::collections::BTreeMap;

/// Phase layout of a pipeline flavour
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineProfile {
    pub name: &'static str,
    pub phases: Vec<VotePhase>,
    /// Phase whose quorum locks the value
    pub lock_phase: VotePhase,
    /// Votes for a phase are refused until the previous phase has quorum
    pub strict_order: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Lock {
    pub value: String,
    pub view: u64,
}

#[derive(Debug, Clone)]
pub struct PhasedPipeline {
    profile: PipelineProfile,
    validators: Vec<ParticipantId>,
    quorum: usize,
    view: u64,
    proposal: Option<String>,
    lock: Option<Lock>,
    /// Highest certificate formed in the lock phase
    high_qc: Option<QuorumCertificate>,
    votes: BTreeMap<(u64, VotePhase), VoteCollector>,
    decided: Option<String>,
}

impl PhasedPipeline {
    pub fn new(profile: PipelineProfile, validators: &ValidatorSet) -> Self {
        let ids = validators.active_ids();
        let quorum = quorum::bft_quorum(ids.len());
        Self {
            profile,
            validators: ids,
            quorum,
            view: 0,
            proposal: None,
            lock: None,
            high_qc: None,
            votes: BTreeMap::new(),
            decided: None,
        }
    }

    pub fn quorum(&self) -> usize {
        self.quorum
    }

    pub fn lock(&self) -> Option<&Lock> {
        self.lock.as_ref()
    }

    pub fn high_qc(&self) -> Option<&QuorumCertificate> {
        self.high_qc.as_ref()
    }

    pub fn proposal(&self) -> Option<&str> {
        self.proposal.as_deref()
    }

    fn phase_count(&self, phase: VotePhase, value: &str) -> usize {
        self.votes
            .get(&(self.view, phase))
            .map(|c| c.count(value))
            .unwrap_or(0)
    }

    fn phase_reached(&self, phase: VotePhase, value: &str) -> bool {
        self.phase_count(phase, value) >= self.quorum
    }

    fn on_propose(
        &mut self,
        validators: &ValidatorSet,
        sender: &ParticipantId,
        view: u64,
        value: &str,
        justify: Option<&QuorumCertificate>,
    ) -> MessageOutcome {
        if view != self.view {
            return MessageOutcome::rejected(format!("wrong view {}", view));
        }
        if self.leader().as_ref() != Some(sender) {
            return MessageOutcome::rejected("not the leader");
        }
        if self.proposal.is_some() {
            return MessageOutcome::rejected("already proposed");
        }
        if let Some(lock) = &self.lock {
            if lock.value != value {
                let unlocks = justify.is_some_and(|qc| {
                    qc.view > lock.view
                        && qc.value == value
                        && qc.verify(validators, self.quorum)
                });
                if !unlocks {
                    return MessageOutcome::rejected(format!(
                        "locked on {} since view {}",
                        lock.value, lock.view
                    ));
                }
                info!(
                    "🔓 {} unlocks {} for {} at view {}",
                    self.profile.name, lock.value, value, view
                );
                self.lock = None;
            }
        }
        self.proposal = Some(value.to_string());
        MessageOutcome::Accepted
    }

    fn on_vote(
        &mut self,
        sender: &ParticipantId,
        view: u64,
        phase: VotePhase,
        value: &str,
    ) -> MessageOutcome {
        if view != self.view {
            return MessageOutcome::rejected(format!("wrong view {}", view));
        }
        let Some(position) = self.profile.phases.iter().position(|p| *p == phase) else {
            return MessageOutcome::rejected(format!(
                "{} has no {} phase",
                self.profile.name, phase
            ));
        };
        match &self.proposal {
            None => return MessageOutcome::rejected("no proposal in this view"),
            Some(proposal) if proposal != value => {
                return MessageOutcome::rejected("value does not match proposal")
            }
            Some(_) => {}
        }
        if self.profile.strict_order && position > 0 {
            let previous = self.profile.phases[position - 1];
            if !self.phase_reached(previous, value) {
                return MessageOutcome::rejected(format!("{} quorum not reached", previous));
            }
        }

        let collector = self.votes.entry((view, phase)).or_default();
        if !collector.record(sender, value, 1) {
            return MessageOutcome::rejected("duplicate vote");
        }
        debug!(
            "{} {} votes for {} in view {}: {}/{}",
            self.profile.name,
            phase,
            value,
            view,
            collector.count(value),
            self.quorum
        );

        if phase == self.profile.lock_phase && self.phase_reached(phase, value) {
            self.lock_value(view, phase, value);
        }
        if self
            .profile
            .phases
            .iter()
            .all(|p| self.phase_reached(*p, value))
        {
            info!("✅ {} committed {} in view {}", self.profile.name, value, view);
            self.decided = Some(value.to_string());
        }
        MessageOutcome::Accepted
    }

    fn lock_value(&mut self, view: u64, phase: VotePhase, value: &str) {
        if self.lock.as_ref().is_some_and(|l| l.view == view) {
            return;
        }
        let signers = self
            .votes
            .get(&(view, phase))
            .map(|c| c.voters(value))
            .unwrap_or_default();
        self.lock = Some(Lock {
            value: value.to_string(),
            view,
        });
        self.high_qc = Some(QuorumCertificate {
            view,
            phase,
            value: value.to_string(),
            signers,
        });
    }
}

impl RoundProtocol for PhasedPipeline {
    fn name(&self) -> &'static str {
        self.profile.name
    }

    fn view(&self) -> u64 {
        self.view
    }

    fn leader(&self) -> Option<ParticipantId> {
        leader::round_robin(&self.validators, self.view).cloned()
    }

    fn on_message(
        &mut self,
        validators: &ValidatorSet,
        sender: &ParticipantId,
        message: &ConsensusMessage,
        _now: u64,
    ) -> MessageOutcome {
        match message {
            ConsensusMessage::Propose {
                view,
                value,
                justify,
            } => self.on_propose(validators, sender, *view, value, justify.as_ref()),
            ConsensusMessage::PhaseVote { view, phase, value } => {
                self.on_vote(sender, *view, *phase, value)
            }
            other => MessageOutcome::rejected(format!("unexpected {} message", other.kind())),
        }
    }

    fn check(&self) -> RoundCheck {
        match &self.decided {
            Some(value) => RoundCheck::committed(value.clone()),
            None => RoundCheck::pending(),
        }
    }

    fn on_timeout(&mut self, _validators: &ValidatorSet, _now: u64) -> TimeoutOutcome {
        let first = self.profile.phases.first().copied();
        let tally = first
            .and_then(|p| self.votes.get(&(self.view, p)))
            .map(|c| {
                c.tally()
                    .into_keys()
                    .map(|value| {
                        let count = c.count(&value) as u64;
                        (value, count)
                    })
                    .collect()
            })
            .unwrap_or_default();

        self.view += 1;
        self.proposal = None;
        info!(
            "🔄 {} view change to {}, primary {:?}",
            self.profile.name,
            self.view,
            self.leader().map(|l| l.to_string())
        );
        TimeoutOutcome {
            view: self.view,
            view_change: true,
            verdict: None,
            tally,
        }
    }
}
