//! Practical Byzantine Fault Tolerance
//!
//! Pre-prepare is the primary's `propose`; `prepare` and `commit` each need
//! `2f + 1` votes. Prepare quorum locks the value. On timeout the primary
//! rotates to the next validator.

use super::pipeline::{PhasedPipeline, PipelineProfile};
use crate::message::VotePhase;
use crate::validator::ValidatorSet;

pub fn profile() -> PipelineProfile {
    PipelineProfile {
        name: "pbft",
        phases: vec![VotePhase::Prepare, VotePhase::Commit],
        lock_phase: VotePhase::Prepare,
        strict_order: false,
    }
}

pub fn new_round(validators: &ValidatorSet) -> PhasedPipeline {
    PhasedPipeline::new(profile(), validators)
}
