//! HotStuff: linear three-phase commit
//!
//! Phases run strictly in order (`prepare`, `pre-commit`, `commit`); votes
//! for a phase are only taken once the previous phase has a quorum
//! certificate. The pre-commit certificate locks the value.

use super::pipeline::{PhasedPipeline, PipelineProfile};
use crate::message::VotePhase;
use crate::validator::ValidatorSet;

pub fn profile() -> PipelineProfile {
    PipelineProfile {
        name: "hotstuff",
        phases: vec![VotePhase::Prepare, VotePhase::PreCommit, VotePhase::Commit],
        lock_phase: VotePhase::PreCommit,
        strict_order: true,
    }
}

pub fn new_round(validators: &ValidatorSet) -> PhasedPipeline {
    PhasedPipeline::new(profile(), validators)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mechanisms::RoundProtocol;
    use crate::message::ConsensusMessage;
    use crate::validator::Validator;

    fn vote(phase: VotePhase) -> ConsensusMessage {
        ConsensusMessage::PhaseVote {
            view: 0,
            phase,
            value: "block".into(),
        }
    }

    #[test]
    fn test_three_phases_in_order() {
        let validators = ValidatorSet::from_validators(
            (0..7).map(|i| Validator::new(format!("r{}", i), 1)),
        )
        .unwrap();
        let mut round = new_round(&validators);
        assert_eq!(round.quorum(), 5);
        round.on_message(
            &validators,
            &"r0".into(),
            &ConsensusMessage::Propose {
                view: 0,
                value: "block".into(),
                justify: None,
            },
            0,
        );

        let early = round.on_message(&validators, &"r1".into(), &vote(VotePhase::Commit), 0);
        assert_eq!(early.reason(), Some("pre-commit quorum not reached"));

        let voters = ["r0", "r1", "r2", "r3", "r4"];
        for phase in [VotePhase::Prepare, VotePhase::PreCommit] {
            for id in voters {
                assert!(round.on_message(&validators, &id.into(), &vote(phase), 0).is_accepted());
            }
        }
        assert_eq!(round.lock().map(|l| l.view), Some(0));
        assert!(!round.check().finalized);
        for id in voters {
            round.on_message(&validators, &id.into(), &vote(VotePhase::Commit), 0);
        }
        assert_eq!(round.check().decision(), Some("block"));
    }
}
