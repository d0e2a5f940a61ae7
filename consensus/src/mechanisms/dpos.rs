//! Delegated Proof-of-Stake
//!
//! The top `delegates` validators by stake (ties by registration order) form
//! the producer set. Each view the round-robin leader proposes and the
//! delegates vote; two thirds of the delegate count commits.

use super::RoundProtocol;
use crate::collector::VoteCollector;
use crate::leader;
use crate::message::{ConsensusMessage, MessageOutcome, RoundCheck, TimeoutOutcome, VotePhase};
use crate::quorum;
use crate::validator::ValidatorSet;
use agora_core::ParticipantId;
use log::info;

#[derive(Debug, Clone)]
pub struct DelegatedProofOfStake {
    delegates: Vec<ParticipantId>,
    view: u64,
    proposal: Option<String>,
    votes: VoteCollector,
    decided: Option<String>,
}

impl DelegatedProofOfStake {
    pub fn new(validators: &ValidatorSet, delegates: usize) -> Self {
        let mut ranked: Vec<(usize, &ParticipantId, u64)> = validators
            .active()
            .enumerate()
            .map(|(i, v)| (i, &v.id, v.stake))
            .collect();
        ranked.sort_by(|a, b| b.2.cmp(&a.2).then(a.0.cmp(&b.0)));
        ranked.truncate(delegates);
        // keep registration order inside the elected set
        ranked.sort_by_key(|(i, _, _)| *i);

        Self {
            delegates: ranked.into_iter().map(|(_, id, _)| id.clone()).collect(),
            view: 0,
            proposal: None,
            votes: VoteCollector::new(),
            decided: None,
        }
    }

    pub fn delegates(&self) -> &[ParticipantId] {
        &self.delegates
    }

    fn is_delegate(&self, id: &ParticipantId) -> bool {
        self.delegates.contains(id)
    }

    fn required(&self) -> usize {
        quorum::calculate_required_votes(self.delegates.len(), 2, 3)
    }
}

impl RoundProtocol for DelegatedProofOfStake {
    fn name(&self) -> &'static str {
        "delegated-proof-of-stake"
    }

    fn view(&self) -> u64 {
        self.view
    }

    fn leader(&self) -> Option<ParticipantId> {
        leader::round_robin(&self.delegates, self.view).cloned()
    }

    fn on_message(
        &mut self,
        _validators: &ValidatorSet,
        sender: &ParticipantId,
        message: &ConsensusMessage,
        _now: u64,
    ) -> MessageOutcome {
        if !self.is_delegate(sender) {
            return MessageOutcome::rejected("not an elected delegate");
        }
        match message {
            ConsensusMessage::Propose { view, value, .. } => {
                if *view != self.view {
                    return MessageOutcome::rejected(format!("wrong view {}", view));
                }
                if self.leader().as_ref() != Some(sender) {
                    return MessageOutcome::rejected("not the leader");
                }
                if self.proposal.is_some() {
                    return MessageOutcome::rejected("already proposed");
                }
                self.proposal = Some(value.clone());
                MessageOutcome::Accepted
            }
            ConsensusMessage::PhaseVote {
                view,
                phase: VotePhase::Commit,
                value,
            } => {
                if *view != self.view {
                    return MessageOutcome::rejected(format!("wrong view {}", view));
                }
                match &self.proposal {
                    None => return MessageOutcome::rejected("no proposal in this view"),
                    Some(proposal) if proposal != value => {
                        return MessageOutcome::rejected("value does not match proposal")
                    }
                    Some(_) => {}
                }
                if !self.votes.record(sender, value, 1) {
                    return MessageOutcome::rejected("duplicate vote");
                }
                if self.votes.count(value) >= self.required() {
                    self.decided = Some(value.clone());
                }
                MessageOutcome::Accepted
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
        let tally = self.votes.tally();
        self.view += 1;
        self.proposal = None;
        self.votes.clear();
        info!(
            "🔄 DPoS view change to {}, leader {:?}",
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::validator::Validator;

    fn set() -> ValidatorSet {
        ValidatorSet::from_validators([
            Validator::new("v1", 10),
            Validator::new("v2", 50),
            Validator::new("v3", 30),
            Validator::new("v4", 5),
        ])
        .unwrap()
    }

    fn commit(view: u64, value: &str) -> ConsensusMessage {
        ConsensusMessage::PhaseVote {
            view,
            phase: VotePhase::Commit,
            value: value.into(),
        }
    }

    #[test]
    fn test_top_stake_delegates_elected() {
        let round = DelegatedProofOfStake::new(&set(), 3);
        let ids: Vec<&str> = round.delegates().iter().map(|d| d.as_str()).collect();
        assert_eq!(ids, vec!["v1", "v2", "v3"]);
        assert_eq!(round.leader().unwrap().as_str(), "v1");
    }

    #[test]
    fn test_commit_on_two_thirds_of_delegates() {
        let validators = set();
        let mut round = DelegatedProofOfStake::new(&validators, 3);
        let propose = ConsensusMessage::Propose {
            view: 0,
            value: "block".into(),
            justify: None,
        };
        assert_eq!(
            round.on_message(&validators, &"v2".into(), &propose, 0).reason(),
            Some("not the leader")
        );
        assert!(round.on_message(&validators, &"v1".into(), &propose, 0).is_accepted());
        assert_eq!(
            round.on_message(&validators, &"v4".into(), &commit(0, "block"), 0).reason(),
            Some("not an elected delegate")
        );
        assert!(round.on_message(&validators, &"v1".into(), &commit(0, "block"), 0).is_accepted());
        assert!(!round.check().finalized);
        assert!(round.on_message(&validators, &"v3".into(), &commit(0, "block"), 0).is_accepted());
        assert_eq!(round.check().decision(), Some("block"));
    }

    #[test]
    fn test_timeout_rotates_leader() {
        let validators = set();
        let mut round = DelegatedProofOfStake::new(&validators, 3);
        let outcome = round.on_timeout(&validators, 100);
        assert!(outcome.view_change);
        assert_eq!(outcome.view, 1);
        assert_eq!(round.leader().unwrap().as_str(), "v2");
        assert_eq!(
            round.on_message(&validators, &"v2".into(), &commit(0, "x"), 0).reason(),
            Some("wrong view 0")
        );
    }
}
