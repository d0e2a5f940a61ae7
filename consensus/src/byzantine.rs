//! Byzantine behavior detection for consensus rounds
//!
//! Tracks what each validator said in each slot of a round (a view and a
//! message kind). Saying the same thing twice is a duplicate; saying
//! something different is equivocation and produces evidence.

use crate::message::ConsensusMessage;
use agora_core::{ParticipantId, RoundId};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use log::warn;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

/// Proof that a validator sent conflicting messages for one slot
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Evidence {
    pub round: RoundId,
    pub validator: ParticipantId,
    pub view: u64,
    pub slot: String,
    pub first: String,
    pub second: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Observation {
    /// First message in its slot, or a message without a slot
    Fresh,
    Duplicate,
    Equivocation(Evidence),
}

type SlotKey = (RoundId, ParticipantId, u64, &'static str);

/// Double-vote detector shared by all rounds of an engine
#[derive(Debug, Default)]
pub struct EquivocationDetector {
    seen: DashMap<SlotKey, String>,
    evidence: Mutex<Vec<Evidence>>,
}

impl EquivocationDetector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a message and classify it against what the sender said before
    pub fn observe(
        &self,
        round: &RoundId,
        sender: &ParticipantId,
        message: &ConsensusMessage,
    ) -> Observation {
        let Some((view, slot, content)) = message.slot() else {
            return Observation::Fresh;
        };
        let key = (round.clone(), sender.clone(), view, slot);
        let first = match self.seen.entry(key) {
            Entry::Vacant(vacant) => {
                vacant.insert(content);
                return Observation::Fresh;
            }
            Entry::Occupied(occupied) if *occupied.get() == content => {
                return Observation::Duplicate;
            }
            Entry::Occupied(occupied) => occupied.get().clone(),
        };
        let evidence = Evidence {
            round: round.clone(),
            validator: sender.clone(),
            view,
            slot: slot.to_string(),
            first,
            second: content,
        };
        warn!(
            "🚨 Equivocation by {} in {} ({} view {}): {} vs {}",
            evidence.validator, evidence.round, evidence.slot, evidence.view, evidence.first, evidence.second
        );
        self.evidence.lock().push(evidence.clone());
        Observation::Equivocation(evidence)
    }

    /// All evidence gathered for one round
    pub fn evidence_for(&self, round: &RoundId) -> Vec<Evidence> {
        self.evidence
            .lock()
            .iter()
            .filter(|e| &e.round == round)
            .cloned()
            .collect()
    }

    pub fn offenders(&self) -> Vec<ParticipantId> {
        let mut offenders: Vec<ParticipantId> =
            self.evidence.lock().iter().map(|e| e.validator.clone()).collect();
        offenders.sort();
        offenders.dedup();
        offenders
    }

    /// Forget slot history for a finished round; evidence is kept
    pub fn clear_round(&self, round: &RoundId) {
        self.seen.retain(|(r, _, _, _), _| r != round);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::VotePhase;

    fn commit(view: u64, value: &str) -> ConsensusMessage {
        ConsensusMessage::PhaseVote {
            view,
            phase: VotePhase::Commit,
            value: value.into(),
        }
    }

    #[test]
    fn test_double_vote_produces_evidence() {
        let detector = EquivocationDetector::new();
        let round = RoundId::from("round-1");
        let v1 = ParticipantId::from("v1");

        assert_eq!(detector.observe(&round, &v1, &commit(0, "a")), Observation::Fresh);
        assert_eq!(detector.observe(&round, &v1, &commit(0, "a")), Observation::Duplicate);
        // a new view is a new slot
        assert_eq!(detector.observe(&round, &v1, &commit(1, "b")), Observation::Fresh);

        let Observation::Equivocation(evidence) = detector.observe(&round, &v1, &commit(0, "b")) else {
            panic!("expected equivocation");
        };
        assert_eq!(evidence.first, "a");
        assert_eq!(evidence.second, "b");
        assert_eq!(detector.evidence_for(&round).len(), 1);
        assert_eq!(detector.offenders(), vec![v1]);
    }

    #[test]
    fn test_clear_round_keeps_evidence() {
        let detector = EquivocationDetector::new();
        let round = RoundId::from("round-1");
        let v1 = ParticipantId::from("v1");
        detector.observe(&round, &v1, &commit(0, "a"));
        detector.observe(&round, &v1, &commit(0, "b"));
        detector.clear_round(&round);
        assert_eq!(detector.observe(&round, &v1, &commit(0, "c")), Observation::Fresh);
        assert_eq!(detector.evidence_for(&round).len(), 1);
    }
}
