//! Voting-power pipeline
//!
//! Weight for a participant is computed from a snapshot in fixed stages:
//!
//! 1. holdings at the snapshot (zero if the participant delegated away under the vote's topic)
//! 2. plus holdings of everyone delegating to them, transitively
//! 3. times the token multiplier
//! 4. through the configured transform (linear, square root, `ln(1 + x)`)
//! 5. times the account-age factor, if enabled
//! 6. times the reputation factor, if enabled
//! 7. raised to the configured minimum
//!
//! Every stage is a pure function of the snapshot and the rules, so repeated
//! calls return the same [`Score`].

use crate::snapshot::Snapshot;
use crate::YEAR_MS;
use agora_core::score::isqrt;
use agora_core::{ParticipantId, Ratio, Score};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PowerTransform {
    #[default]
    Linear,
    SquareRoot,
    Logarithmic,
}

/// Longevity bonus: `1 + years_held * per_year`, capped at `max_multiplier`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeWeight {
    pub per_year: Ratio,
    pub max_multiplier: Ratio,
}

impl Default for TimeWeight {
    fn default() -> Self {
        Self {
            per_year: Ratio::new(1, 2),
            max_multiplier: Ratio::new(3, 1),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PowerRules {
    /// Follow delegations whose scope matches the vote topic
    pub include_delegations: bool,
    /// Count locked stake alongside the liquid balance
    pub include_locked: bool,
    pub multiplier: Ratio,
    pub transform: PowerTransform,
    pub time_weight: Option<TimeWeight>,
    /// Scale by `min(reputation / 100, 2)`
    pub reputation_weighting: bool,
    /// Floor applied to participants who have not delegated away
    pub minimum: u64,
}

impl Default for PowerRules {
    fn default() -> Self {
        Self {
            include_delegations: true,
            include_locked: false,
            multiplier: Ratio::ONE,
            transform: PowerTransform::Linear,
            time_weight: None,
            reputation_weighting: false,
            minimum: 0,
        }
    }
}

impl PowerRules {
    pub fn linear() -> Self {
        Self::default()
    }

    pub fn with_transform(mut self, transform: PowerTransform) -> Self {
        self.transform = transform;
        self
    }

    pub fn with_time_weight(mut self, time_weight: TimeWeight) -> Self {
        self.time_weight = Some(time_weight);
        self
    }

    pub fn with_reputation(mut self) -> Self {
        self.reputation_weighting = true;
        self
    }
}

/// Per-vote inputs to the pipeline, fixed when the vote is created
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PowerContext {
    pub topic: Option<String>,
    pub at: u64,
    pub reputations: BTreeMap<ParticipantId, u64>,
}

impl PowerContext {
    pub fn new(at: u64) -> Self {
        Self {
            at,
            ..Default::default()
        }
    }

    pub fn with_topic(mut self, topic: Option<String>) -> Self {
        self.topic = topic;
        self
    }
}

/// Calculator bound to one snapshot, rule set and context
pub struct VotingPower<'a> {
    snapshot: &'a Snapshot,
    rules: &'a PowerRules,
    ctx: &'a PowerContext,
    /// Holdings delegated to each final delegate, resolved once
    pooled: BTreeMap<ParticipantId, u128>,
}

impl<'a> VotingPower<'a> {
    pub fn new(snapshot: &'a Snapshot, rules: &'a PowerRules, ctx: &'a PowerContext) -> Self {
        let mut calc = Self {
            snapshot,
            rules,
            ctx,
            pooled: BTreeMap::new(),
        };
        if rules.include_delegations {
            let roots = snapshot.delegations().final_delegates(calc.topic());
            for (delegator, root) in roots {
                let held = calc.holdings(delegator.as_str()) as u128;
                *calc.pooled.entry(root).or_insert(0) += held;
            }
        }
        calc
    }

    pub fn snapshot(&self) -> &'a Snapshot {
        self.snapshot
    }

    pub fn topic(&self) -> Option<&'a str> {
        self.ctx.topic.as_deref()
    }

    /// Tokens the participant holds at the snapshot
    pub fn holdings(&self, participant: &str) -> u64 {
        let mut held = self.snapshot.balance(participant);
        if self.rules.include_locked {
            held = held.saturating_add(self.snapshot.locked(participant));
        }
        held
    }

    pub fn has_delegated(&self, participant: &str) -> bool {
        self.rules.include_delegations
            && self
                .snapshot
                .delegations()
                .effective_delegate(participant, self.topic())
                .is_some()
    }

    /// Stages 1 and 2 in whole token units
    pub fn aggregated_units(&self, participant: &str) -> u128 {
        if self.has_delegated(participant) {
            return 0;
        }
        self.holdings(participant) as u128 + self.pooled.get(participant).copied().unwrap_or(0)
    }

    pub fn power(&self, participant: &str) -> Score {
        if self.has_delegated(participant) {
            return Score::ZERO;
        }
        let units = self.aggregated_units(participant);
        let mut raw = units as i128 * Score::SCALE;

        let multiplier = self.rules.multiplier;
        if multiplier.den != 0 {
            raw = raw * multiplier.num as i128 / multiplier.den as i128;
        }

        let mut weight = match self.rules.transform {
            PowerTransform::Linear => Score::from_raw(raw),
            PowerTransform::SquareRoot => {
                Score::from_raw(isqrt(raw.max(0) as u128 * Score::SCALE as u128) as i128)
            }
            PowerTransform::Logarithmic => Score::from_f64(Score::from_raw(raw).as_f64().ln_1p()),
        };

        if let Some(time_weight) = &self.rules.time_weight {
            weight = scale(weight, self.age_factor(participant, time_weight));
        }

        if self.rules.reputation_weighting {
            let reputation = self
                .ctx
                .reputations
                .get(participant)
                .copied()
                .unwrap_or(100)
                .min(200);
            weight = Score::from_raw(weight.raw() * reputation as i128 / 100);
        }

        let minimum = Score::from_units(self.rules.minimum);
        weight.max(minimum)
    }

    /// Multiplier as raw fixed-point, `SCALE` meaning 1.0
    fn age_factor(&self, participant: &str, time_weight: &TimeWeight) -> i128 {
        let age = self.snapshot.account_age(participant, self.ctx.at).unwrap_or(0) as i128;
        let per_year = time_weight.per_year;
        let mut factor = Score::SCALE;
        if per_year.den != 0 {
            factor += Score::SCALE * age * per_year.num as i128
                / (YEAR_MS as i128 * per_year.den as i128);
        }
        let cap = time_weight.max_multiplier;
        if cap.den != 0 {
            factor = factor.min(Score::SCALE * cap.num as i128 / cap.den as i128);
        }
        factor
    }

    /// Sum of power over everyone the snapshot knows about
    pub fn total(&self) -> Score {
        self.snapshot
            .participants()
            .iter()
            .map(|p| self.power(p.as_str()))
            .sum()
    }
}

fn scale(weight: Score, factor: i128) -> Score {
    Score::from_raw(weight.raw() * factor / Score::SCALE)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::delegation::DelegationScope;
    use crate::ledger::TokenLedger;
    use crate::token::TokenConfig;

    fn ledger() -> TokenLedger {
        let mut ledger = TokenLedger::new();
        ledger.create_token(TokenConfig::new("AGR"), 0).unwrap();
        ledger.mint("AGR", "alice", 64, "genesis", 0).unwrap();
        ledger.mint("AGR", "bob", 36, "genesis", 0).unwrap();
        ledger
    }

    #[test]
    fn test_linear_and_square_root() {
        let mut ledger = ledger();
        let snapshot = ledger.snapshot("AGR", 10).unwrap();
        let ctx = PowerContext::new(10);

        let linear = PowerRules::linear();
        let calc = VotingPower::new(&snapshot, &linear, &ctx);
        assert_eq!(calc.power("alice"), Score::from_units(64));
        assert_eq!(calc.total(), Score::from_units(100));

        let sqrt = PowerRules::linear().with_transform(PowerTransform::SquareRoot);
        let calc = VotingPower::new(&snapshot, &sqrt, &ctx);
        assert_eq!(calc.power("alice"), Score::from_units(8));
        assert_eq!(calc.total(), Score::from_units(14));
    }

    #[test]
    fn test_delegated_weight_moves_to_delegate() {
        let mut ledger = ledger();
        ledger
            .delegate("AGR", "bob", "alice", DelegationScope::All, 5)
            .unwrap();
        let snapshot = ledger.snapshot("AGR", 10).unwrap();
        let rules = PowerRules::linear();
        let ctx = PowerContext::new(10);
        let calc = VotingPower::new(&snapshot, &rules, &ctx);

        assert_eq!(calc.power("alice"), Score::from_units(100));
        assert_eq!(calc.power("bob"), Score::ZERO);
        assert_eq!(calc.total(), Score::from_units(100));
    }

    #[test]
    fn test_delegation_chain_pools_at_the_end() {
        let mut ledger = ledger();
        ledger.mint("AGR", "carol", 10, "genesis", 0).unwrap();
        ledger.mint("AGR", "dave", 5, "genesis", 0).unwrap();
        ledger
            .delegate("AGR", "dave", "carol", DelegationScope::All, 1)
            .unwrap();
        ledger
            .delegate("AGR", "carol", "bob", DelegationScope::All, 1)
            .unwrap();
        ledger
            .delegate("AGR", "bob", "alice", DelegationScope::topic("treasury"), 1)
            .unwrap();
        let snapshot = ledger.snapshot("AGR", 10).unwrap();
        let rules = PowerRules::linear();

        let ctx = PowerContext::new(10);
        let calc = VotingPower::new(&snapshot, &rules, &ctx);
        assert_eq!(calc.power("bob"), Score::from_units(51));
        assert_eq!(calc.power("carol"), Score::ZERO);
        assert_eq!(calc.total(), Score::from_units(115));

        let ctx = PowerContext::new(10).with_topic(Some("treasury".into()));
        let calc = VotingPower::new(&snapshot, &rules, &ctx);
        assert_eq!(calc.power("alice"), Score::from_units(115));
        assert_eq!(calc.power("bob"), Score::ZERO);
        assert_eq!(calc.total(), Score::from_units(115));
    }

    #[test]
    fn test_power_is_pure() {
        let mut ledger = ledger();
        let snapshot = ledger.snapshot("AGR", 10).unwrap();
        let rules = PowerRules::linear()
            .with_transform(PowerTransform::Logarithmic)
            .with_reputation();
        let mut ctx = PowerContext::new(10);
        ctx.reputations.insert("alice".into(), 150);
        let calc = VotingPower::new(&snapshot, &rules, &ctx);

        let first = calc.power("alice");
        for _ in 0..5 {
            assert_eq!(calc.power("alice"), first);
        }
        assert!(first > Score::from_units(6));
    }

    #[test]
    fn test_time_weight_caps() {
        let mut ledger = ledger();
        let snapshot = ledger.snapshot("AGR", 0).unwrap();
        let rules = PowerRules::linear().with_time_weight(TimeWeight::default());

        let ctx = PowerContext::new(2 * YEAR_MS);
        let calc = VotingPower::new(&snapshot, &rules, &ctx);
        assert_eq!(calc.power("bob"), Score::from_units(72));

        let ctx = PowerContext::new(10 * YEAR_MS);
        let calc = VotingPower::new(&snapshot, &rules, &ctx);
        assert_eq!(calc.power("bob"), Score::from_units(108));
    }

    #[test]
    fn test_reputation_factor_is_capped() {
        let mut ledger = ledger();
        let snapshot = ledger.snapshot("AGR", 0).unwrap();
        let rules = PowerRules::linear().with_reputation();
        let mut ctx = PowerContext::new(0);
        ctx.reputations.insert("bob".into(), 500);
        ctx.reputations.insert("alice".into(), 50);
        let calc = VotingPower::new(&snapshot, &rules, &ctx);

        assert_eq!(calc.power("bob"), Score::from_units(72));
        assert_eq!(calc.power("alice"), Score::from_units(32));
    }

    #[test]
    fn test_minimum_floor() {
        let mut ledger = ledger();
        let snapshot = ledger.snapshot("AGR", 0).unwrap();
        let rules = PowerRules {
            minimum: 1,
            ..PowerRules::linear()
        };
        let ctx = PowerContext::new(0);
        let calc = VotingPower::new(&snapshot, &rules, &ctx);
        assert_eq!(calc.power("carol"), Score::from_units(1));
    }
}
