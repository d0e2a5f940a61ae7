//! Proof-of-Stake: one-phase stake-weighted voting
//!
//! A value commits once its stake exceeds two thirds of the total bonded
//! stake. A timeout ends the round without a decision and reports the tally.

use super::RoundProtocol;
use crate::collector::VoteCollector;
use crate::errors::{ConsensusError, ConsensusResult};
use crate::message::{ConsensusMessage, MessageOutcome, RoundCheck, TimeoutOutcome, Verdict};
use crate::quorum;
use crate::validator::ValidatorSet;
use agora_core::ParticipantId;
use log::debug;

#[derive(Debug, Clone)]
pub struct ProofOfStake {
    total_stake: u128,
    votes: VoteCollector,
    decided: Option<String>,
}

impl ProofOfStake {
    pub fn new(validators: &ValidatorSet) -> ConsensusResult<Self> {
        let total_stake = validators.total_stake();
        if total_stake == 0 {
            return Err(ConsensusError::InvalidRound("no stake bonded".to_string()));
        }
        Ok(Self {
            total_stake,
            votes: VoteCollector::new(),
            decided: None,
        })
    }
}

impl RoundProtocol for ProofOfStake {
    fn name(&self) -> &'static str {
        "proof-of-stake"
    }

    fn view(&self) -> u64 {
        0
    }

    fn on_message(
        &mut self,
        validators: &ValidatorSet,
        sender: &ParticipantId,
        message: &ConsensusMessage,
        _now: u64,
    ) -> MessageOutcome {
        let ConsensusMessage::Vote { value, approve } = message else {
            return MessageOutcome::rejected(format!("unexpected {} message", message.kind()));
        };
        if !approve {
            return MessageOutcome::rejected("proof-of-stake takes approvals only");
        }
        let stake = validators.stake_of(sender.as_str());
        if stake == 0 {
            return MessageOutcome::rejected("no stake");
        }
        if !self.votes.record(sender, value, stake) {
            return MessageOutcome::rejected("duplicate vote");
        }

        let weight = self.votes.weight(value);
        debug!("stake for {}: {}/{}", value, weight, self.total_stake);
        if quorum::exceeds(weight, self.total_stake, 2, 3) {
            self.decided = Some(value.clone());
        }
        MessageOutcome::Accepted
    }

    fn check(&self) -> RoundCheck {
        match &self.decided {
            Some(value) => RoundCheck::committed(value.clone()),
            None => RoundCheck::pending(),
        }
    }

    fn on_timeout(&mut self, _validators: &ValidatorSet, _now: u64) -> TimeoutOutcome {
        TimeoutOutcome {
            view: 0,
            view_change: false,
            verdict: self.decided.clone().map(Verdict::Commit),
            tally: self.votes.tally(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::validator::Validator;

    fn vote(value: &str) -> ConsensusMessage {
        ConsensusMessage::Vote {
            value: value.into(),
            approve: true,
        }
    }

    fn validators() -> ValidatorSet {
        ValidatorSet::from_validators([
            Validator::new("v1", 40),
            Validator::new("v2", 30),
            Validator::new("v3", 20),
            Validator::new("v4", 10),
        ])
        .unwrap()
    }

    #[test]
    fn test_commits_above_two_thirds_of_stake() {
        let set = validators();
        let mut round = ProofOfStake::new(&set).unwrap();
        assert!(round.on_message(&set, &"v1".into(), &vote("a"), 0).is_accepted());
        assert!(round.on_message(&set, &"v3".into(), &vote("a"), 0).is_accepted());
        // 60 of 100 is not enough
        assert!(!round.check().finalized);
        // 70 of 100
        assert!(round.on_message(&set, &"v4".into(), &vote("a"), 0).is_accepted());
        assert_eq!(round.check().decision(), Some("a"));
    }

    #[test]
    fn test_duplicate_vote_rejected() {
        let set = validators();
        let mut round = ProofOfStake::new(&set).unwrap();
        round.on_message(&set, &"v1".into(), &vote("a"), 0);
        let outcome = round.on_message(&set, &"v1".into(), &vote("b"), 0);
        assert_eq!(outcome.reason(), Some("duplicate vote"));
    }

    #[test]
    fn test_timeout_returns_tally_without_decision() {
        let set = validators();
        let mut round = ProofOfStake::new(&set).unwrap();
        round.on_message(&set, &"v1".into(), &vote("a"), 0);
        round.on_message(&set, &"v2".into(), &vote("b"), 0);
        let outcome = round.on_timeout(&set, 10);
        assert!(!outcome.view_change);
        assert_eq!(outcome.verdict, None);
        assert_eq!(outcome.tally.get("a"), Some(&40));
        assert_eq!(outcome.tally.get("b"), Some(&30));
    }

    #[test]
    fn test_huge_stakes_commit_without_overflow() {
        let set = ValidatorSet::from_validators([
            Validator::new("v1", 10_000_000_000_000_000_000),
            Validator::new("v2", 10_000_000_000_000_000_000),
            Validator::new("v3", 10_000_000_000_000_000_000),
        ])
        .unwrap();
        let mut round = ProofOfStake::new(&set).unwrap();
        round.on_message(&set, &"v1".into(), &vote("a"), 0);
        round.on_message(&set, &"v2".into(), &vote("a"), 0);
        // exactly two thirds is not enough
        assert!(!round.check().finalized);
        round.on_message(&set, &"v3".into(), &vote("a"), 0);
        assert_eq!(round.check().decision(), Some("a"));
    }
}
