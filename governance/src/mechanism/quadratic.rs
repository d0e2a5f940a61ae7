use super::{
    invalid, leader, no_decision, quorum_met, require_option, wrong_payload, BallotPayload,
    Decision, DecisionMetadata, FinalizeContext, NormalizedBallot, Tally, VotingMechanism,
};
use crate::vote::VoteSpec;
use agora_core::{ParticipantId, Result, Score};
use std::collections::BTreeMap;

/// Voters spread signed credits over options; each option receives
/// `sign(credits) * sqrt(|credits|)`. Credits spent may not exceed weight.
#[derive(Debug, Clone, Copy, Default)]
pub struct QuadraticVoting;

impl VotingMechanism for QuadraticVoting {
    fn name(&self) -> &'static str {
        "quadratic"
    }

    fn validate_ballot(
        &self,
        voter: &ParticipantId,
        payload: &BallotPayload,
        weight: Score,
        cast_at: u64,
        spec: &VoteSpec,
    ) -> Result<NormalizedBallot> {
        let BallotPayload::Allocation { credits } = payload else {
            return Err(wrong_payload(self.name(), payload));
        };
        if credits.is_empty() {
            return Err(invalid("allocation is empty"));
        }
        let mut spent: u128 = 0;
        let mut contributions = BTreeMap::new();
        for (option, amount) in credits {
            require_option(spec, option)?;
            let magnitude = amount.unsigned_abs();
            spent += magnitude as u128;
            let root = Score::sqrt_units(magnitude);
            contributions.insert(option.clone(), if *amount < 0 { -root } else { root });
        }
        let spent = Score::from_raw(spent as i128 * Score::SCALE);
        if spent > weight {
            return Err(invalid(format!(
                "allocated {} credits with weight {}",
                spent, weight
            )));
        }
        Ok(NormalizedBallot {
            voter: voter.clone(),
            payload: payload.clone(),
            weight,
            cast_at,
            contributions,
            participation: spent,
        })
    }

    fn finalize(&self, tally: &Tally, spec: &VoteSpec, ctx: &FinalizeContext<'_>) -> Decision {
        if tally.is_empty() {
            return no_decision(self.name(), tally, ctx, "no ballots");
        }
        let Some((winner, best, tied)) = leader(&tally.totals) else {
            return no_decision(self.name(), tally, ctx, "no options");
        };
        Decision {
            passed: best.is_positive() && tied.is_empty(),
            outcome: Some(winner),
            weights: tally.totals.clone(),
            metadata: DecisionMetadata {
                mechanism: self.name().to_string(),
                ballots: tally.len(),
                tie: !tied.is_empty(),
                tied,
                ..Default::default()
            },
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
    use agora_core::GovernanceError;

    fn allocation(pairs: &[(&str, i64)]) -> BallotPayload {
        BallotPayload::Allocation {
            credits: pairs.iter().map(|(o, c)| (o.to_string(), *c)).collect(),
        }
    }

    #[test]
    fn test_quadratic_allocation() {
        let spec = spec(MechanismSpec::Quadratic, &["A", "B"]);
        let ballot = QuadraticVoting
            .validate_ballot(
                &"p1".into(),
                &allocation(&[("A", 64), ("B", 36)]),
                Score::from_units(100),
                0,
                &spec,
            )
            .unwrap();
        assert_eq!(ballot.contributions["A"], Score::from_units(8));
        assert_eq!(ballot.contributions["B"], Score::from_units(6));
        assert_eq!(ballot.participation, Score::from_units(100));
    }

    #[test]
    fn test_overspent_credits_rejected() {
        let spec = spec(MechanismSpec::Quadratic, &["A", "B"]);
        let err = QuadraticVoting
            .validate_ballot(
                &"p1".into(),
                &allocation(&[("A", 64), ("B", -37)]),
                Score::from_units(100),
                0,
                &spec,
            )
            .unwrap_err();
        assert!(matches!(err, GovernanceError::BallotInvalid(_)));
    }

    #[test]
    fn test_negative_credits_count_against() {
        let spec = spec(MechanismSpec::Quadratic, &["A", "B"]);
        let decision = run(
            &QuadraticVoting,
            &spec,
            &[
                ("p1", allocation(&[("A", 49)]), 49),
                ("p2", allocation(&[("A", -16), ("B", 9)]), 25),
            ],
            100,
        );
        assert_eq!(decision.weights["A"], Score::from_units(3));
        assert_eq!(decision.weights["B"], Score::from_units(3));
        assert_eq!(decision.outcome.as_deref(), Some("A"));
        assert!(decision.metadata.tie);
        assert!(!decision.passed);
        assert_eq!(decision.participation, Score::from_units(74));
    }
}
