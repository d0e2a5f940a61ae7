use super::majority::choice_ballot;
use super::{
    leader, no_decision, quorum_met, BallotPayload, Decision, DecisionMetadata, FinalizeContext,
    NormalizedBallot, Tally, VotingMechanism,
};
use crate::vote::VoteSpec;
use agora_core::{ParticipantId, Result, Score};
use std::collections::BTreeMap;

/// Conviction voting
///
/// A ballot's support charges up while it stays in the tally:
/// `conviction(t) = w * (t - tau * (1 - e^(-t/tau)))`, the integral of
/// `w * (1 - e^(-s/tau))` over the `t` seconds since it was cast. The vote
/// has no close time; any finalize is an evaluation at `now`.
#[derive(Debug, Clone, Copy)]
pub struct ConvictionVoting {
    pub tau_ms: u64,
    /// Conviction the leading option must exceed, in weight-seconds
    pub threshold: u64,
}

impl ConvictionVoting {
    pub fn conviction(&self, weight: Score, cast_at: u64, now: u64) -> Score {
        let t = now.saturating_sub(cast_at) as f64 / 1_000.0;
        let tau = self.tau_ms.max(1) as f64 / 1_000.0;
        let charge = t - tau * (1.0 - (-t / tau).exp());
        Score::from_f64(weight.as_f64() * charge)
    }
}

impl VotingMechanism for ConvictionVoting {
    fn name(&self) -> &'static str {
        "conviction"
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
        if tally.is_empty() {
            return no_decision(self.name(), tally, ctx, "no ballots");
        }
        let mut weights: BTreeMap<String, Score> =
            spec.options.iter().map(|o| (o.clone(), Score::ZERO)).collect();
        for ballot in tally.ballots.values() {
            let BallotPayload::Choice { option } = &ballot.payload else {
                continue;
            };
            *weights.entry(option.clone()).or_default() +=
                self.conviction(ballot.weight, ballot.cast_at, ctx.now);
        }

        let Some((winner, best, tied)) = leader(&weights) else {
            return no_decision(self.name(), tally, ctx, "no options");
        };
        Decision {
            passed: tied.is_empty() && best > Score::from_units(self.threshold),
            outcome: Some(winner),
            metadata: DecisionMetadata {
                mechanism: self.name().to_string(),
                ballots: tally.len(),
                tie: !tied.is_empty(),
                tied,
                evaluated_at: Some(ctx.now),
                ..Default::default()
            },
            weights,
            quorum_met: quorum_met(tally.participation, ctx.total_power, spec.quorum),
            participation: tally.participation,
            total_power: ctx.total_power,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_conviction_grows_over_time() {
        let mechanism = ConvictionVoting {
            tau_ms: 10_000,
            threshold: 500,
        };
        let weight = Score::from_units(100);
        assert_eq!(mechanism.conviction(weight, 0, 0), Score::ZERO);

        let early = mechanism.conviction(weight, 0, 5_000);
        let later = mechanism.conviction(weight, 0, 50_000);
        assert!(early < later);
        // after many time constants conviction approaches w * (t - tau)
        let far = mechanism.conviction(weight, 0, 1_000_000);
        let asymptote = Score::from_units(100 * (1_000 - 10));
        assert!((far - asymptote).abs() < Score::from_units(1));
    }

    #[test]
    fn test_conviction_passes_once_charged() {
        use super::super::testing::{snapshot, spec};
        use crate::mechanism::MechanismSpec;
        use agora_ledger::{PowerContext, PowerRules, VotingPower};

        let mechanism = ConvictionVoting {
            tau_ms: 1_000,
            threshold: 1_000,
        };
        let spec = spec(
            MechanismSpec::Conviction {
                tau_ms: 1_000,
                threshold: 1_000,
            },
            &["fund", "skip"],
        );
        let ballot = mechanism
            .validate_ballot(&"p1".into(), &BallotPayload::choice("fund"), Score::from_units(100), 0, &spec)
            .unwrap();
        let tally = mechanism.accumulate(mechanism.empty_tally(&spec), ballot);

        let snapshot = snapshot(&[("p1", 100)]);
        let rules = PowerRules::default();
        let ctx = PowerContext::default();
        let power = VotingPower::new(&snapshot, &rules, &ctx);

        let at = |now| FinalizeContext {
            total_power: Score::from_units(100),
            now,
            power: &power,
        };
        let early = mechanism.finalize(&tally, &spec, &at(5_000));
        assert!(!early.passed);
        let late = mechanism.finalize(&tally, &spec, &at(20_000));
        assert!(late.passed);
        assert_eq!(late.outcome.as_deref(), Some("fund"));
        assert_eq!(late.metadata.evaluated_at, Some(20_000));
    }
}
