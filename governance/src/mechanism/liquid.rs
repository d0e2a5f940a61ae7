use super::majority::choice_ballot;
use super::{
    leader, no_decision, quorum_met, BallotPayload, Decision, DecisionMetadata, FinalizeContext,
    NormalizedBallot, Tally, VotingMechanism,
};
use crate::vote::VoteSpec;
use agora_core::{ParticipantId, Result, Score};
use agora_ledger::VotingPower;
use std::collections::{BTreeMap, BTreeSet, VecDeque};

/// Choice voting where weight follows the snapshot's delegation graph at
/// finalize time.
///
/// A voter's effective weight is their own holdings plus the holdings of
/// everyone delegating to them, transitively, who did not vote themselves.
/// A delegator who votes keeps their own weight and shields the chain
/// behind them from their delegate.
#[derive(Debug, Clone, Copy, Default)]
pub struct LiquidDemocracy;

impl LiquidDemocracy {
    fn effective_weight(
        power: &VotingPower<'_>,
        voter: &str,
        voters: &BTreeSet<&str>,
    ) -> Score {
        let graph = power.snapshot().delegations();
        let mut units = power.holdings(voter) as u128;
        let mut seen: BTreeSet<ParticipantId> = BTreeSet::new();
        let mut queue: VecDeque<ParticipantId> =
            graph.direct_delegators(voter, power.topic()).into();
        while let Some(delegator) = queue.pop_front() {
            if voters.contains(delegator.as_str()) || !seen.insert(delegator.clone()) {
                continue;
            }
            units += power.holdings(delegator.as_str()) as u128;
            queue.extend(graph.direct_delegators(delegator.as_str(), power.topic()));
        }
        Score::from_raw(units as i128 * Score::SCALE)
    }
}

impl VotingMechanism for LiquidDemocracy {
    fn name(&self) -> &'static str {
        "liquid-democracy"
    }

    /// Own holdings plus every delegation that could reach the voter
    fn ballot_weight(&self, power: &VotingPower<'_>, voter: &str) -> Score {
        Self::effective_weight(power, voter, &BTreeSet::new())
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
        let voters: BTreeSet<&str> = tally.ballots.keys().map(|v| v.as_str()).collect();
        let mut weights: BTreeMap<String, Score> =
            spec.options.iter().map(|o| (o.clone(), Score::ZERO)).collect();
        let mut effective = BTreeMap::new();
        let mut participation = Score::ZERO;

        for (voter, ballot) in &tally.ballots {
            let BallotPayload::Choice { option } = &ballot.payload else {
                continue;
            };
            let weight = Self::effective_weight(ctx.power, voter.as_str(), &voters);
            *weights.entry(option.clone()).or_default() += weight;
            participation += weight;
            effective.insert(voter.clone(), weight);
        }

        let Some((winner, best, tied)) = leader(&weights) else {
            return no_decision(self.name(), tally, ctx, "no options");
        };
        let others: Score = weights
            .iter()
            .filter(|(o, _)| **o != winner)
            .map(|(_, w)| *w)
            .sum();
        Decision {
            passed: best.is_positive() && best > others,
            outcome: Some(winner),
            metadata: DecisionMetadata {
                mechanism: self.name().to_string(),
                ballots: tally.len(),
                tie: !tied.is_empty(),
                tied,
                effective_weights: effective,
                ..Default::default()
            },
            weights,
            quorum_met: quorum_met(participation, ctx.total_power, spec.quorum),
            participation,
            total_power: ctx.total_power,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::super::testing::spec;
    use super::*;
    use crate::mechanism::MechanismSpec;
    use agora_ledger::{DelegationScope, PowerContext, PowerRules, TokenConfig, TokenLedger};

    #[test]
    fn test_weight_flows_to_voting_delegate() {
        let mut ledger = TokenLedger::new();
        ledger.create_token(TokenConfig::new("AGR"), 0).unwrap();
        for (holder, amount) in [("a", 10), ("b", 20), ("c", 30), ("d", 40)] {
            ledger.mint("AGR", holder, amount, "test", 0).unwrap();
        }
        // a -> b -> c, d votes alone
        ledger.delegate("AGR", "a", "b", DelegationScope::All, 0).unwrap();
        ledger.delegate("AGR", "b", "c", DelegationScope::All, 0).unwrap();
        let snapshot = ledger.snapshot("AGR", 0).unwrap();

        let rules = PowerRules::default();
        let ctx = PowerContext::default();
        let power = VotingPower::new(&snapshot, &rules, &ctx);
        let spec = spec(MechanismSpec::LiquidDemocracy, &["yes", "no"]);
        let mechanism = LiquidDemocracy;
        let finalize = FinalizeContext {
            total_power: power.total(),
            now: 0,
            power: &power,
        };

        let cast = |tally: Tally, voter: &str, option: &str| {
            let weight = mechanism.ballot_weight(&power, voter);
            let ballot = mechanism
                .validate_ballot(&voter.into(), &BallotPayload::choice(option), weight, 0, &spec)
                .unwrap();
            mechanism.accumulate(tally, ballot)
        };

        // only c and d vote: c carries a and b
        let tally = cast(mechanism.empty_tally(&spec), "c", "yes");
        let tally = cast(tally, "d", "no");
        let decision = mechanism.finalize(&tally, &spec, &finalize);
        assert_eq!(decision.weights["yes"], Score::from_units(60));
        assert_eq!(decision.weights["no"], Score::from_units(40));
        assert!(decision.passed);

        // b votes too: b keeps itself and a, c keeps only itself
        let tally = cast(tally, "b", "no");
        let decision = mechanism.finalize(&tally, &spec, &finalize);
        assert_eq!(decision.metadata.effective_weights[&ParticipantId::from("b")], Score::from_units(30));
        assert_eq!(decision.weights["yes"], Score::from_units(30));
        assert_eq!(decision.weights["no"], Score::from_units(70));
        assert_eq!(decision.participation, Score::from_units(100));
    }
}
