//! Single-choice plurality mechanisms

use super::{
    invalid, leader, no_decision, quorum_met, require_option, wrong_payload, BallotPayload,
    Decision, DecisionMetadata, FinalizeContext, NormalizedBallot, Tally, VotingMechanism,
};
use crate::vote::VoteSpec;
use agora_core::{ParticipantId, Ratio, Result, Score};
use std::collections::BTreeMap;

/// Validate a single-choice ballot and credit its full weight
pub(crate) fn choice_ballot(
    mechanism: &str,
    voter: &ParticipantId,
    payload: &BallotPayload,
    weight: Score,
    cast_at: u64,
    spec: &VoteSpec,
) -> Result<NormalizedBallot> {
    let BallotPayload::Choice { option } = payload else {
        return Err(wrong_payload(mechanism, payload));
    };
    require_option(spec, option)?;
    if !weight.is_positive() {
        return Err(invalid("ballot weight must be positive"));
    }
    Ok(NormalizedBallot {
        voter: voter.clone(),
        payload: payload.clone(),
        weight,
        cast_at,
        contributions: BTreeMap::from([(option.clone(), weight)]),
        participation: weight,
    })
}

/// Plurality winner with its share of the weight
fn plurality(
    mechanism: &str,
    weights: &BTreeMap<String, Score>,
    participation: Score,
    ballots: usize,
) -> Option<(String, Score, DecisionMetadata)> {
    let (winner, best, tied) = leader(weights)?;
    if !best.is_positive() {
        return None;
    }
    let metadata = DecisionMetadata {
        mechanism: mechanism.to_string(),
        ballots,
        tie: !tied.is_empty(),
        tied,
        winner_fraction: (participation.is_positive())
            .then(|| best.as_f64() / participation.as_f64()),
        ..Default::default()
    };
    Some((winner, best, metadata))
}

/// Outcome is the heaviest option; passes iff it outweighs all others combined
#[derive(Debug, Clone, Copy, Default)]
pub struct SimpleMajority;

impl VotingMechanism for SimpleMajority {
    fn name(&self) -> &'static str {
        "simple-majority"
    }

    fn validate_ballot(
        &self,
        voter: &ParticipantId,
        payload: &BallotPayload,
        weight: Score,
        cast_at: u64,
        spec: &VoteSpec,
    ) -> Result<NormalizedBallot> {
        choice_ballot(self.name(), voter, payload, weight, cast_at, spec)
    }

    fn finalize(&self, tally: &Tally, spec: &VoteSpec, ctx: &FinalizeContext<'_>) -> Decision {
        let Some((winner, best, metadata)) =
            plurality(self.name(), &tally.totals, tally.participation, tally.len())
        else {
            return no_decision(self.name(), tally, ctx, "no ballots");
        };
        let others: Score = tally
            .totals
            .iter()
            .filter(|(option, _)| **option != winner)
            .map(|(_, w)| *w)
            .sum();
        Decision {
            passed: best > others,
            outcome: Some(winner),
            weights: tally.totals.clone(),
            metadata,
            quorum_met: quorum_met(tally.participation, ctx.total_power, spec.quorum),
            participation: tally.participation,
            total_power: ctx.total_power,
        }
    }
}

/// Plurality that passes only when the winner holds `threshold` of all weight
#[derive(Debug, Clone, Copy)]
pub struct SuperMajority {
    pub threshold: Ratio,
}

impl VotingMechanism for SuperMajority {
    fn name(&self) -> &'static str {
        "super-majority"
    }

    fn validate_ballot(
        &self,
        voter: &ParticipantId,
        payload: &BallotPayload,
        weight: Score,
        cast_at: u64,
        spec: &VoteSpec,
    ) -> Result<NormalizedBallot> {
        choice_ballot(self.name(), voter, payload, weight, cast_at, spec)
    }

    fn finalize(&self, tally: &Tally, spec: &VoteSpec, ctx: &FinalizeContext<'_>) -> Decision {
        let Some((winner, best, metadata)) =
            plurality(self.name(), &tally.totals, tally.participation, tally.len())
        else {
            return no_decision(self.name(), tally, ctx, "no ballots");
        };
        let cast: Score = tally.totals.values().copied().sum();
        Decision {
            passed: self.threshold.is_met(best, cast),
            outcome: Some(winner),
            weights: tally.totals.clone(),
            metadata,
            quorum_met: quorum_met(tally.participation, ctx.total_power, spec.quorum),
            participation: tally.participation,
            total_power: ctx.total_power,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::super::testing::{run, spec};
    use super::*;
    use crate::mechanism::MechanismSpec;

    #[test]
    fn test_simple_majority_three_options() {
        let spec = spec(MechanismSpec::SimpleMajority, &["A", "B", "C"])
            .with_quorum(Ratio::ONE);
        let decision = run(
            &SimpleMajority,
            &spec,
            &[
                ("p1", BallotPayload::choice("A"), 30),
                ("p2", BallotPayload::choice("B"), 20),
                ("p3", BallotPayload::choice("A"), 25),
                ("p4", BallotPayload::choice("C"), 25),
            ],
            100,
        );

        assert_eq!(decision.outcome.as_deref(), Some("A"));
        assert_eq!(decision.weights["A"], Score::from_units(55));
        assert_eq!(decision.weights["B"], Score::from_units(20));
        assert_eq!(decision.weights["C"], Score::from_units(25));
        assert!(decision.passed);
        assert!(decision.quorum_met);
        assert!(!decision.metadata.tie);
    }

    #[test]
    fn test_super_majority_fails_below_two_thirds() {
        let spec = spec(MechanismSpec::super_majority(), &["yes", "no"]);
        let mechanism = SuperMajority {
            threshold: Ratio::TWO_THIRDS,
        };
        let decision = run(
            &mechanism,
            &spec,
            &[
                ("p1", BallotPayload::choice("yes"), 60),
                ("p2", BallotPayload::choice("no"), 40),
            ],
            100,
        );
        assert_eq!(decision.outcome.as_deref(), Some("yes"));
        assert_eq!(decision.metadata.winner_fraction, Some(0.6));
        assert!(!decision.passed);
    }

    #[test]
    fn test_super_majority_exact_threshold_passes() {
        let spec = spec(MechanismSpec::super_majority(), &["yes", "no"]);
        let mechanism = SuperMajority {
            threshold: Ratio::TWO_THIRDS,
        };
        let decision = run(
            &mechanism,
            &spec,
            &[
                ("p1", BallotPayload::choice("yes"), 2),
                ("p2", BallotPayload::choice("no"), 1),
            ],
            3,
        );
        assert!(decision.passed);
    }

    #[test]
    fn test_tie_goes_to_first_option_and_fails() {
        let spec = spec(MechanismSpec::SimpleMajority, &["no", "yes"]);
        let decision = run(
            &SimpleMajority,
            &spec,
            &[
                ("p1", BallotPayload::choice("yes"), 10),
                ("p2", BallotPayload::choice("no"), 10),
            ],
            20,
        );
        assert_eq!(decision.outcome.as_deref(), Some("no"));
        assert!(decision.metadata.tie);
        assert!(!decision.passed);
    }

    #[test]
    fn test_quorum_boundary_is_inclusive() {
        let spec = spec(MechanismSpec::SimpleMajority, &["yes", "no"])
            .with_quorum(Ratio::from_percent(40));
        let decision = run(
            &SimpleMajority,
            &spec,
            &[("p1", BallotPayload::choice("yes"), 40)],
            100,
        );
        assert!(decision.quorum_met);

        let decision = run(
            &SimpleMajority,
            &spec,
            &[("p1", BallotPayload::choice("yes"), 39)],
            100,
        );
        assert!(!decision.quorum_met);
    }

    #[test]
    fn test_rejects_unknown_option_and_wrong_shape() {
        let spec = spec(MechanismSpec::SimpleMajority, &["yes", "no"]);
        let voter = ParticipantId::from("p1");
        let err = SimpleMajority
            .validate_ballot(&voter, &BallotPayload::choice("maybe"), Score::from_units(1), 0, &spec)
            .unwrap_err();
        assert!(matches!(err, agora_core::GovernanceError::BallotInvalid(_)));

        let ranking = BallotPayload::Ranking {
            ranking: vec!["yes".into()],
        };
        assert!(SimpleMajority
            .validate_ballot(&voter, &ranking, Score::from_units(1), 0, &spec)
            .is_err());
    }
}
