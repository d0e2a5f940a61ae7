//! Tendermint: propose, prevote, precommit
//!
//! A prevote quorum (a polka) locks the value for the validator set; a
//! precommit quorum commits it. Each timeout moves to the next round with
//! the next proposer.

use super::pipeline::{PhasedPipeline, PipelineProfile};
use crate::message::VotePhase;
use crate::validator::ValidatorSet;

pub fn profile() -> PipelineProfile {
    PipelineProfile {
        name: "tendermint",
        phases: vec![VotePhase::Prevote, VotePhase::Precommit],
        lock_phase: VotePhase::Prevote,
        strict_order: false,
    }
}

pub fn new_round(validators: &ValidatorSet) -> PhasedPipeline {
    PhasedPipeline::new(profile(), validators)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mechanisms::RoundProtocol;
    use crate::message::{ConsensusMessage, QuorumCertificate};
    use crate::validator::Validator;

    fn vote(view: u64, phase: VotePhase, value: &str) -> ConsensusMessage {
        ConsensusMessage::PhaseVote {
            view,
            phase,
            value: value.into(),
        }
    }

    #[test]
    fn test_polka_lock_then_commit_in_later_round() {
        let validators = ValidatorSet::from_validators(
            ["a", "b", "c", "d"].into_iter().map(|id| Validator::new(id, 10)),
        )
        .unwrap();
        let mut round = new_round(&validators);

        round.on_message(
            &validators,
            &"a".into(),
            &ConsensusMessage::Propose {
                view: 0,
                value: "x".into(),
                justify: None,
            },
            0,
        );
        for id in ["a", "b", "c"] {
            round.on_message(&validators, &id.into(), &vote(0, VotePhase::Prevote, "x"), 0);
        }
        let qc: QuorumCertificate = round.high_qc().cloned().unwrap();
        assert_eq!(qc.signers.len(), 3);

        // precommits never arrive
        round.on_timeout(&validators, 1_000);
        let reject = round.on_message(
            &validators,
            &"b".into(),
            &ConsensusMessage::Propose {
                view: 1,
                value: "y".into(),
                justify: None,
            },
            0,
        );
        assert!(!reject.is_accepted());

        let repropose = ConsensusMessage::Propose {
            view: 1,
            value: "x".into(),
            justify: Some(qc),
        };
        assert!(round.on_message(&validators, &"b".into(), &repropose, 0).is_accepted());
        for id in ["b", "c", "d"] {
            round.on_message(&validators, &id.into(), &vote(1, VotePhase::Prevote, "x"), 0);
            round.on_message(&validators, &id.into(), &vote(1, VotePhase::Precommit, "x"), 0);
        }
        assert_eq!(round.check().decision(), Some("x"));
        assert_eq!(round.view(), 1);
    }
}
