use super::{
    invalid, no_decision, quorum_met, require_option, wrong_payload, BallotPayload, Decision,
    DecisionMetadata, FinalizeContext, NormalizedBallot, Tally, VotingMechanism,
};
use crate::vote::VoteSpec;
use agora_core::{ParticipantId, Result, Score};
use std::collections::{BTreeMap, BTreeSet};

/// Instant-runoff voting
///
/// Each round credits every ballot's full weight to its highest-ranked
/// remaining option. A candidate holding more than half of the round's
/// weight wins; otherwise the weakest remaining option is eliminated. When
/// several options share the lowest weight, the lexicographically greatest
/// of them goes first.
#[derive(Debug, Clone, Copy, Default)]
pub struct RankedChoice;

impl VotingMechanism for RankedChoice {
    fn name(&self) -> &'static str {
        "ranked-choice"
    }

    fn validate_ballot(
        &self,
        voter: &ParticipantId,
        payload: &BallotPayload,
        weight: Score,
        cast_at: u64,
        spec: &VoteSpec,
    ) -> Result<NormalizedBallot> {
        let BallotPayload::Ranking { ranking } = payload else {
            return Err(wrong_payload(self.name(), payload));
        };
        let Some(first) = ranking.first() else {
            return Err(invalid("ranking is empty"));
        };
        let mut seen = BTreeSet::new();
        for option in ranking {
            require_option(spec, option)?;
            if !seen.insert(option) {
                return Err(invalid(format!("{} ranked twice", option)));
            }
        }
        if !weight.is_positive() {
            return Err(invalid("ballot weight must be positive"));
        }
        Ok(NormalizedBallot {
            voter: voter.clone(),
            payload: payload.clone(),
            weight,
            cast_at,
            contributions: BTreeMap::from([(first.clone(), weight)]),
            participation: weight,
        })
    }

    fn finalize(&self, tally: &Tally, spec: &VoteSpec, ctx: &FinalizeContext<'_>) -> Decision {
        if tally.is_empty() {
            return no_decision(self.name(), tally, ctx, "no ballots");
        }

        let mut remaining: BTreeSet<String> = spec.options.iter().cloned().collect();
        let mut rounds = Vec::new();
        let mut eliminated = Vec::new();

        let winner = loop {
            let mut round: BTreeMap<String, Score> =
                remaining.iter().map(|o| (o.clone(), Score::ZERO)).collect();
            for ballot in tally.ballots.values() {
                let BallotPayload::Ranking { ranking } = &ballot.payload else {
                    continue;
                };
                if let Some(top) = ranking.iter().find(|o| remaining.contains(*o)) {
                    *round.entry(top.clone()).or_default() += ballot.weight;
                }
            }
            let round_weight: Score = round.values().copied().sum();
            rounds.push(round.clone());

            let majority = round
                .iter()
                .find(|(_, w)| w.raw() * 2 > round_weight.raw())
                .map(|(o, _)| o.clone());
            if let Some(option) = majority {
                break Some(option);
            }
            if remaining.len() <= 1 {
                break remaining.iter().next().cloned();
            }

            let lowest = round.values().copied().min().unwrap_or(Score::ZERO);
            let loser = round
                .iter()
                .filter(|(_, w)| **w == lowest)
                .map(|(o, _)| o.clone())
                .next_back();
            match loser {
                Some(loser) => {
                    remaining.remove(&loser);
                    eliminated.push(loser);
                }
                None => break None,
            }
        };

        let weights = rounds.last().cloned().unwrap_or_default();
        Decision {
            passed: winner.is_some(),
            outcome: winner,
            weights,
            metadata: DecisionMetadata {
                mechanism: self.name().to_string(),
                ballots: tally.len(),
                rounds,
                eliminated,
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

    fn ranking(order: &[&str]) -> BallotPayload {
        BallotPayload::Ranking {
            ranking: order.iter().map(|o| o.to_string()).collect(),
        }
    }

    #[test]
    fn test_irv_elimination() {
        let spec = spec(MechanismSpec::RankedChoice, &["X", "Y", "Z"]);
        let decision = run(
            &RankedChoice,
            &spec,
            &[
                ("p1", ranking(&["X", "Y", "Z"]), 40),
                ("p2", ranking(&["Y", "Z", "X"]), 35),
                ("p3", ranking(&["Z", "Y", "X"]), 25),
            ],
            100,
        );

        let rounds = &decision.metadata.rounds;
        assert_eq!(rounds.len(), 2);
        assert_eq!(rounds[0]["X"], Score::from_units(40));
        assert_eq!(rounds[0]["Y"], Score::from_units(35));
        assert_eq!(rounds[0]["Z"], Score::from_units(25));
        assert_eq!(decision.metadata.eliminated, vec!["Z".to_string()]);
        assert_eq!(rounds[1]["X"], Score::from_units(40));
        assert_eq!(rounds[1]["Y"], Score::from_units(60));
        assert_eq!(decision.outcome.as_deref(), Some("Y"));
        assert!(decision.passed);
    }

    #[test]
    fn test_lowest_tie_eliminates_greatest_option() {
        let spec = spec(MechanismSpec::RankedChoice, &["A", "B", "C"]);
        let decision = run(
            &RankedChoice,
            &spec,
            &[
                ("p1", ranking(&["A"]), 40),
                ("p2", ranking(&["B", "A"]), 30),
                ("p3", ranking(&["C", "B"]), 30),
            ],
            100,
        );
        assert_eq!(decision.metadata.eliminated[0], "C");
        assert_eq!(decision.outcome.as_deref(), Some("B"));
    }

    #[test]
    fn test_duplicate_ranking_rejected() {
        let spec = spec(MechanismSpec::RankedChoice, &["A", "B"]);
        assert!(RankedChoice
            .validate_ballot(&"p1".into(), &ranking(&["A", "A"]), Score::from_units(1), 0, &spec)
            .is_err());
        assert!(RankedChoice
            .validate_ballot(&"p1".into(), &ranking(&[]), Score::from_units(1), 0, &spec)
            .is_err());
    }
}
