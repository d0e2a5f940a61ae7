use super::{
    invalid, leader, no_decision, quorum_met, require_option, wrong_payload, BallotPayload,
    Decision, DecisionMetadata, FinalizeContext, NormalizedBallot, Tally, VotingMechanism,
};
use crate::vote::VoteSpec;
use agora_core::{ParticipantId, Result, Score};
use std::collections::BTreeMap;

/// Every approved option receives the voter's full weight. The most
/// approved option wins and passes once more than half of the participating
/// weight approved it.
#[derive(Debug, Clone, Copy, Default)]
pub struct ApprovalVoting;

impl VotingMechanism for ApprovalVoting {
    fn name(&self) -> &'static str {
        "approval"
    }

    fn validate_ballot(
        &self,
        voter: &ParticipantId,
        payload: &BallotPayload,
        weight: Score,
        cast_at: u64,
        spec: &VoteSpec,
    ) -> Result<NormalizedBallot> {
        let BallotPayload::Approval { approved } = payload else {
            return Err(wrong_payload(self.name(), payload));
        };
        if approved.is_empty() {
            return Err(invalid("approval set is empty"));
        }
        if !weight.is_positive() {
            return Err(invalid("ballot weight must be positive"));
        }
        let mut contributions = BTreeMap::new();
        for option in approved {
            require_option(spec, option)?;
            if contributions.insert(option.clone(), weight).is_some() {
                return Err(invalid(format!("{} approved twice", option)));
            }
        }
        Ok(NormalizedBallot {
            voter: voter.clone(),
            payload: payload.clone(),
            weight,
            cast_at,
            contributions,
            participation: weight,
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
            passed: best.raw() * 2 > tally.participation.raw(),
            outcome: Some(winner),
            weights: tally.totals.clone(),
            metadata: DecisionMetadata {
                mechanism: self.name().to_string(),
                ballots: tally.len(),
                tie: !tied.is_empty(),
                tied,
                winner_fraction: Some(best.as_f64() / tally.participation.as_f64()),
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

    fn approve(options: &[&str]) -> BallotPayload {
        BallotPayload::Approval {
            approved: options.iter().map(|o| o.to_string()).collect(),
        }
    }

    #[test]
    fn test_approval_counts_each_option() {
        let spec = spec(MechanismSpec::Approval, &["A", "B", "C"]);
        let decision = run(
            &ApprovalVoting,
            &spec,
            &[
                ("p1", approve(&["A", "B"]), 30),
                ("p2", approve(&["B"]), 20),
                ("p3", approve(&["C", "A"]), 10),
            ],
            100,
        );
        assert_eq!(decision.weights["A"], Score::from_units(40));
        assert_eq!(decision.weights["B"], Score::from_units(50));
        assert_eq!(decision.weights["C"], Score::from_units(10));
        assert_eq!(decision.outcome.as_deref(), Some("B"));
        assert!(decision.passed);
        assert_eq!(decision.participation, Score::from_units(60));
    }

    #[test]
    fn test_duplicate_approval_rejected() {
        let spec = spec(MechanismSpec::Approval, &["A", "B"]);
        assert!(ApprovalVoting
            .validate_ballot(&"p1".into(), &approve(&["A", "A"]), Score::from_units(1), 0, &spec)
            .is_err());
    }
}
