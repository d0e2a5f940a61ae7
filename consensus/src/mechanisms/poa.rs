//! Proof-of-Authority
//!
//! Only flagged authorities vote. A value commits on a strict majority of
//! the authority set; once every authority has replied without one, the
//! round rejects.

use super::RoundProtocol;
use crate::collector::VoteCollector;
use crate::errors::{ConsensusError, ConsensusResult};
use crate::message::{ConsensusMessage, MessageOutcome, RoundCheck, TimeoutOutcome, Verdict};
use crate::quorum;
use crate::validator::ValidatorSet;
use agora_core::ParticipantId;

const REJECT: &str = "reject";

#[derive(Debug, Clone)]
pub struct ProofOfAuthority {
    authorities: Vec<ParticipantId>,
    replies: VoteCollector,
    verdict: Option<Verdict>,
}

impl ProofOfAuthority {
    pub fn new(validators: &ValidatorSet) -> ConsensusResult<Self> {
        let authorities = validators.authorities();
        if authorities.is_empty() {
            return Err(ConsensusError::NotEnoughValidators {
                required: 1,
                available: 0,
            });
        }
        Ok(Self {
            authorities,
            replies: VoteCollector::new(),
            verdict: None,
        })
    }

    fn required(&self) -> usize {
        quorum::majority(self.authorities.len())
    }
}

impl RoundProtocol for ProofOfAuthority {
    fn name(&self) -> &'static str {
        "proof-of-authority"
    }

    fn view(&self) -> u64 {
        0
    }

    fn on_message(
        &mut self,
        _validators: &ValidatorSet,
        sender: &ParticipantId,
        message: &ConsensusMessage,
        _now: u64,
    ) -> MessageOutcome {
        let ConsensusMessage::Vote { value, approve } = message else {
            return MessageOutcome::rejected(format!("unexpected {} message", message.kind()));
        };
        if !self.authorities.contains(sender) {
            return MessageOutcome::rejected("not an authority");
        }
        let choice = if *approve { value.as_str() } else { REJECT };
        if !self.replies.record(sender, choice, 1) {
            return MessageOutcome::rejected("duplicate vote");
        }

        if *approve && self.replies.count(value) >= self.required() {
            self.verdict = Some(Verdict::Commit(value.clone()));
        } else if self.replies.total_count() == self.authorities.len() {
            self.verdict = Some(Verdict::Reject);
        }
        MessageOutcome::Accepted
    }

    fn check(&self) -> RoundCheck {
        match &self.verdict {
            Some(Verdict::Commit(value)) => RoundCheck::committed(value.clone()),
            Some(Verdict::Reject) => RoundCheck::rejected(),
            None => RoundCheck::pending(),
        }
    }

    fn on_timeout(&mut self, _validators: &ValidatorSet, _now: u64) -> TimeoutOutcome {
        TimeoutOutcome {
            view: 0,
            view_change: false,
            verdict: self.verdict.clone(),
            tally: self.replies.tally(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::validator::Validator;

    fn set() -> ValidatorSet {
        ValidatorSet::from_validators([
            Validator::new("a1", 0).with_authority(true),
            Validator::new("a2", 0).with_authority(true),
            Validator::new("a3", 0).with_authority(true),
            Validator::new("a4", 0).with_authority(true),
            Validator::new("plain", 100),
        ])
        .unwrap()
    }

    fn vote(value: &str, approve: bool) -> ConsensusMessage {
        ConsensusMessage::Vote {
            value: value.into(),
            approve,
        }
    }

    #[test]
    fn test_commit_on_majority_of_authorities() {
        let validators = set();
        let mut round = ProofOfAuthority::new(&validators).unwrap();
        assert_eq!(
            round.on_message(&validators, &"plain".into(), &vote("x", true), 0).reason(),
            Some("not an authority")
        );
        for id in ["a1", "a2"] {
            round.on_message(&validators, &id.into(), &vote("x", true), 0);
        }
        assert!(!round.check().finalized);
        round.on_message(&validators, &"a3".into(), &vote("x", true), 0);
        assert_eq!(round.check().decision(), Some("x"));
    }

    #[test]
    fn test_full_reply_set_without_quorum_rejects() {
        let validators = set();
        let mut round = ProofOfAuthority::new(&validators).unwrap();
        round.on_message(&validators, &"a1".into(), &vote("x", true), 0);
        round.on_message(&validators, &"a2".into(), &vote("x", true), 0);
        round.on_message(&validators, &"a3".into(), &vote("x", false), 0);
        assert!(!round.check().finalized);
        round.on_message(&validators, &"a4".into(), &vote("y", true), 0);
        let check = round.check();
        assert!(check.finalized);
        assert_eq!(check.verdict, Some(Verdict::Reject));
    }

    #[test]
    fn test_requires_authorities() {
        let validators = ValidatorSet::from_validators([Validator::new("v", 1)]).unwrap();
        assert!(ProofOfAuthority::new(&validators).is_err());
    }
}
