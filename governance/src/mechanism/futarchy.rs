use super::{
    invalid, leader, no_decision, quorum_met, require_option, wrong_payload, BallotPayload,
    Decision, DecisionMetadata, FinalizeContext, NormalizedBallot, Tally, VotingMechanism,
};
use crate::vote::VoteSpec;
use agora_core::{ParticipantId, Result, Score};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum MarketBranch {
    IfAdopted,
    IfRejected,
}

/// External price source for the conditional markets
pub trait MarketOracle: Send + Sync + fmt::Debug {
    /// Predicted target metric for `option` on `branch`, if the market has one
    fn price(&self, option: &str, branch: MarketBranch) -> Option<Score>;
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarketPrediction {
    pub if_adopted: Score,
    pub if_rejected: Score,
    /// Weight staked on this option's markets
    pub stake: Score,
    pub from_oracle: bool,
}

/// Decision markets
///
/// Each option has two linked markets predicting the target metric
/// conditional on adoption and on rejection. Ballots are weighted
/// predictions; an attached oracle overrides them. The option with the best
/// adopted-branch prediction wins, and passes when adopting it beats
/// rejecting it.
#[derive(Debug, Clone, Default)]
pub struct Futarchy {
    pub oracle: Option<Arc<dyn MarketOracle>>,
}

/// `sum / stake` as a score, dividing before scaling
///
/// Products are clamped at the `i128` bounds rather than wrapping.
fn weighted_mean(sum: i128, stake: Score) -> Score {
    let stake = stake.raw();
    let whole = (sum / stake).saturating_mul(Score::SCALE);
    let frac = (sum % stake).saturating_mul(Score::SCALE) / stake;
    Score::from_raw(whole.saturating_add(frac))
}

impl Futarchy {
    fn predictions(&self, tally: &Tally, options: &[String]) -> BTreeMap<String, MarketPrediction> {
        let mut sums: BTreeMap<&str, (i128, i128, Score)> = BTreeMap::new();
        for ballot in tally.ballots.values() {
            let BallotPayload::Prediction {
                option,
                if_adopted,
                if_rejected,
            } = &ballot.payload
            else {
                continue;
            };
            let entry = sums.entry(option.as_str()).or_insert((0, 0, Score::ZERO));
            let weight = ballot.weight.raw();
            entry.0 = entry.0.saturating_add(weight.saturating_mul(*if_adopted as i128));
            entry.1 = entry.1.saturating_add(weight.saturating_mul(*if_rejected as i128));
            entry.2 += ballot.weight;
        }

        let mut predictions = BTreeMap::new();
        for option in options {
            let from_ballots = sums.get(option.as_str()).and_then(|(adopted, rejected, stake)| {
                stake.is_positive().then(|| {
                    (
                        weighted_mean(*adopted, *stake),
                        weighted_mean(*rejected, *stake),
                        *stake,
                    )
                })
            });
            let oracle_adopted = self
                .oracle
                .as_ref()
                .and_then(|o| o.price(option, MarketBranch::IfAdopted));
            let oracle_rejected = self
                .oracle
                .as_ref()
                .and_then(|o| o.price(option, MarketBranch::IfRejected));

            let stake = from_ballots.map(|(_, _, s)| s).unwrap_or(Score::ZERO);
            let adopted = oracle_adopted.or(from_ballots.map(|(a, _, _)| a));
            let rejected = oracle_rejected.or(from_ballots.map(|(_, r, _)| r));
            if let (Some(if_adopted), Some(if_rejected)) = (adopted, rejected) {
                predictions.insert(
                    option.clone(),
                    MarketPrediction {
                        if_adopted,
                        if_rejected,
                        stake,
                        from_oracle: oracle_adopted.is_some() || oracle_rejected.is_some(),
                    },
                );
            }
        }
        predictions
    }
}

impl VotingMechanism for Futarchy {
    fn name(&self) -> &'static str {
        "futarchy"
    }

    fn validate_ballot(
        &self,
        voter: &ParticipantId,
        payload: &BallotPayload,
        weight: Score,
        cast_at: u64,
        spec: &VoteSpec,
    ) -> Result<NormalizedBallot> {
        let BallotPayload::Prediction { option, .. } = payload else {
            return Err(wrong_payload(self.name(), payload));
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

    fn finalize(&self, tally: &Tally, spec: &VoteSpec, ctx: &FinalizeContext<'_>) -> Decision {
        let predictions = self.predictions(tally, &spec.options);
        let adopted: BTreeMap<String, Score> = predictions
            .iter()
            .map(|(o, p)| (o.clone(), p.if_adopted))
            .collect();
        let Some((winner, _, tied)) = leader(&adopted) else {
            return no_decision(self.name(), tally, ctx, "no market prices");
        };
        let passed = predictions
            .get(&winner)
            .is_some_and(|p| p.if_adopted > p.if_rejected);
        Decision {
            passed: passed && tied.is_empty(),
            outcome: Some(winner),
            weights: adopted,
            metadata: DecisionMetadata {
                mechanism: self.name().to_string(),
                ballots: tally.len(),
                tie: !tied.is_empty(),
                tied,
                predictions,
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

    fn predict(option: &str, if_adopted: i64, if_rejected: i64) -> BallotPayload {
        BallotPayload::Prediction {
            option: option.into(),
            if_adopted,
            if_rejected,
        }
    }

    #[derive(Debug)]
    struct FixedPrices;

    impl MarketOracle for FixedPrices {
        fn price(&self, option: &str, branch: MarketBranch) -> Option<Score> {
            match (option, branch) {
                ("grow", MarketBranch::IfAdopted) => Some(Score::from_units(50)),
                ("grow", MarketBranch::IfRejected) => Some(Score::from_units(60)),
                _ => None,
            }
        }
    }

    #[test]
    fn test_weighted_predictions_pick_best_option() {
        let spec = spec(MechanismSpec::Futarchy, &["grow", "hold"]);
        let decision = run(
            &Futarchy::default(),
            &spec,
            &[
                ("p1", predict("grow", 120, 100), 30),
                ("p2", predict("grow", 100, 100), 10),
                ("p3", predict("hold", 110, 105), 60),
            ],
            100,
        );
        // grow: (120*30 + 100*10) / 40 = 115
        assert_eq!(decision.weights["grow"], Score::from_units(115));
        assert_eq!(decision.weights["hold"], Score::from_units(110));
        assert_eq!(decision.outcome.as_deref(), Some("grow"));
        assert!(decision.passed);
    }

    #[test]
    fn test_large_weights_do_not_overflow() {
        let spec = spec(MechanismSpec::Futarchy, &["grow", "hold"]);
        let whale = 1_000_000_000_000_000_000;
        let decision = run(
            &Futarchy::default(),
            &spec,
            &[
                ("p1", predict("grow", 1_000_000_000, 10), whale),
                ("p2", predict("grow", 3_000_000_000, 10), whale),
                ("p3", predict("hold", 2_500_000_000, 10), whale),
            ],
            u64::MAX,
        );
        assert_eq!(decision.weights["grow"], Score::from_units(2_000_000_000));
        assert_eq!(decision.weights["hold"], Score::from_units(2_500_000_000));
        assert_eq!(decision.outcome.as_deref(), Some("hold"));
        assert!(decision.passed);
    }

    #[test]
    fn test_extreme_predictions_saturate() {
        let spec = spec(MechanismSpec::Futarchy, &["grow"]);
        let decision = run(
            &Futarchy::default(),
            &spec,
            &[
                ("p1", predict("grow", i64::MAX, i64::MIN), u64::MAX),
                ("p2", predict("grow", i64::MAX, i64::MIN), u64::MAX),
            ],
            u64::MAX,
        );
        let prediction = &decision.metadata.predictions["grow"];
        assert!(prediction.if_adopted.is_positive());
        assert!(prediction.if_rejected.is_negative());
        assert!(decision.passed);
    }

    #[test]
    fn test_mean_keeps_fractions() {
        // (1*1 + 2*1) / 2 = 1.5
        assert_eq!(
            weighted_mean(3 * Score::SCALE, Score::from_units(2)),
            Score::from_raw(1_500_000)
        );
    }

    #[test]
    fn test_oracle_overrides_ballots() {
        let spec = spec(MechanismSpec::Futarchy, &["grow"]);
        let mechanism = Futarchy {
            oracle: Some(Arc::new(FixedPrices)),
        };
        let decision = run(&mechanism, &spec, &[("p1", predict("grow", 120, 100), 30)], 100);
        let prediction = &decision.metadata.predictions["grow"];
        assert!(prediction.from_oracle);
        assert_eq!(prediction.if_adopted, Score::from_units(50));
        assert!(!decision.passed);
    }
}
