//! Voting mechanisms
//!
//! Every mechanism implements the same contract:
//!
//! - `validate_ballot` checks a raw payload against the vote's options and
//!   the voter's weight, producing a [`NormalizedBallot`]
//! - `accumulate` folds a normalized ballot into a [`Tally`]; folding is
//!   commutative over distinct participants
//! - `finalize` turns a tally into a [`Decision`] without mutating anything
//!
//! [`MechanismSpec`] is the closed set of mechanisms a vote can be opened
//! with; [`MechanismSpec::build`] returns the strategy object.

mod approval;
mod conviction;
mod futarchy;
mod liquid;
mod majority;
mod quadratic;
mod ranked;

pub use approval::ApprovalVoting;
pub use conviction::ConvictionVoting;
pub use futarchy::{Futarchy, MarketBranch, MarketOracle, MarketPrediction};
pub use liquid::LiquidDemocracy;
pub use majority::{SimpleMajority, SuperMajority};
pub use quadratic::QuadraticVoting;
pub use ranked::RankedChoice;

use crate::vote::VoteSpec;
use agora_core::{GovernanceError, ParticipantId, Ratio, Result, Score};
use agora_ledger::VotingPower;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum MechanismSpec {
    #[default]
    SimpleMajority,
    SuperMajority {
        #[serde(default = "default_super_majority")]
        threshold: Ratio,
    },
    Quadratic,
    RankedChoice,
    Approval,
    LiquidDemocracy,
    Conviction {
        /// Half-life style time constant of conviction growth
        tau_ms: u64,
        /// Conviction (weight-seconds) an option must exceed to pass
        threshold: u64,
    },
    Futarchy,
}

fn default_super_majority() -> Ratio {
    crate::config::SUPER_MAJORITY
}

impl MechanismSpec {
    pub fn super_majority() -> Self {
        MechanismSpec::SuperMajority {
            threshold: crate::config::SUPER_MAJORITY,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            MechanismSpec::SimpleMajority => "simple-majority",
            MechanismSpec::SuperMajority { .. } => "super-majority",
            MechanismSpec::Quadratic => "quadratic",
            MechanismSpec::RankedChoice => "ranked-choice",
            MechanismSpec::Approval => "approval",
            MechanismSpec::LiquidDemocracy => "liquid-democracy",
            MechanismSpec::Conviction { .. } => "conviction",
            MechanismSpec::Futarchy => "futarchy",
        }
    }

    /// Conviction votes run without a close time
    pub fn is_open_ended(&self) -> bool {
        matches!(self, MechanismSpec::Conviction { .. })
    }

    pub fn validate(&self) -> Result<()> {
        match self {
            MechanismSpec::SuperMajority { threshold } if !threshold.is_valid() => Err(
                GovernanceError::BallotInvalid(format!("invalid super-majority threshold {}", threshold)),
            ),
            MechanismSpec::Conviction { tau_ms: 0, .. } => Err(GovernanceError::BallotInvalid(
                "conviction tau must be positive".into(),
            )),
            _ => Ok(()),
        }
    }

    pub fn build(&self, oracle: Option<Arc<dyn MarketOracle>>) -> Box<dyn VotingMechanism> {
        match self {
            MechanismSpec::SimpleMajority => Box::new(SimpleMajority),
            MechanismSpec::SuperMajority { threshold } => Box::new(SuperMajority {
                threshold: *threshold,
            }),
            MechanismSpec::Quadratic => Box::new(QuadraticVoting),
            MechanismSpec::RankedChoice => Box::new(RankedChoice),
            MechanismSpec::Approval => Box::new(ApprovalVoting),
            MechanismSpec::LiquidDemocracy => Box::new(LiquidDemocracy),
            MechanismSpec::Conviction { tau_ms, threshold } => Box::new(ConvictionVoting {
                tau_ms: *tau_ms,
                threshold: *threshold,
            }),
            MechanismSpec::Futarchy => Box::new(Futarchy { oracle }),
        }
    }
}

impl fmt::Display for MechanismSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Raw ballot payloads; each mechanism accepts exactly one shape
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum BallotPayload {
    Choice { option: String },
    Allocation { credits: BTreeMap<String, i64> },
    Ranking { ranking: Vec<String> },
    Approval { approved: Vec<String> },
    Prediction {
        option: String,
        if_adopted: i64,
        if_rejected: i64,
    },
}

impl BallotPayload {
    pub fn choice(option: impl Into<String>) -> Self {
        BallotPayload::Choice {
            option: option.into(),
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            BallotPayload::Choice { .. } => "choice",
            BallotPayload::Allocation { .. } => "allocation",
            BallotPayload::Ranking { .. } => "ranking",
            BallotPayload::Approval { .. } => "approval",
            BallotPayload::Prediction { .. } => "prediction",
        }
    }
}

/// Ballot accepted by a mechanism, with its per-option contributions
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NormalizedBallot {
    pub voter: ParticipantId,
    pub payload: BallotPayload,
    pub weight: Score,
    pub cast_at: u64,
    pub contributions: BTreeMap<String, Score>,
    /// Weight counted toward quorum
    pub participation: Score,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Tally {
    pub totals: BTreeMap<String, Score>,
    pub participation: Score,
    pub ballots: BTreeMap<ParticipantId, NormalizedBallot>,
}

impl Tally {
    pub fn empty(options: &[String]) -> Self {
        Self {
            totals: options.iter().map(|o| (o.clone(), Score::ZERO)).collect(),
            ..Self::default()
        }
    }

    /// Add a ballot's contributions; the caller guarantees the voter is new
    pub fn with(mut self, ballot: NormalizedBallot) -> Self {
        for (option, contribution) in &ballot.contributions {
            *self.totals.entry(option.clone()).or_default() += *contribution;
        }
        self.participation += ballot.participation;
        self.ballots.insert(ballot.voter.clone(), ballot);
        self
    }

    pub fn len(&self) -> usize {
        self.ballots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ballots.is_empty()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DecisionMetadata {
    pub mechanism: String,
    pub ballots: usize,
    #[serde(default)]
    pub tie: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tied: Vec<String>,
    /// Winner weight over participating weight
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub winner_fraction: Option<f64>,
    /// IRV per-round tallies
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub rounds: Vec<BTreeMap<String, Score>>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub eliminated: Vec<String>,
    /// Liquid democracy effective weights per voter
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub effective_weights: BTreeMap<ParticipantId, Score>,
    /// Futarchy conditional predictions per option
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub predictions: BTreeMap<String, MarketPrediction>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub evaluated_at: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Decision {
    pub outcome: Option<String>,
    pub weights: BTreeMap<String, Score>,
    pub metadata: DecisionMetadata,
    pub passed: bool,
    pub quorum_met: bool,
    pub participation: Score,
    pub total_power: Score,
}

impl Decision {
    /// Passed and quorate
    pub fn is_decisive(&self) -> bool {
        self.passed && self.quorum_met
    }

    /// Canonical bytes, used to compare decisions
    pub fn canonical_bytes(&self) -> Vec<u8> {
        serde_json::to_vec(self).unwrap_or_default()
    }
}

/// Read-only inputs to finalize
pub struct FinalizeContext<'a> {
    pub total_power: Score,
    pub now: u64,
    pub power: &'a VotingPower<'a>,
}

pub trait VotingMechanism: Send + Sync {
    fn name(&self) -> &'static str;

    /// Weight a voter casts with; defaults to the full power pipeline
    fn ballot_weight(&self, power: &VotingPower<'_>, voter: &str) -> Score {
        power.power(voter)
    }

    fn validate_ballot(
        &self,
        voter: &ParticipantId,
        payload: &BallotPayload,
        weight: Score,
        cast_at: u64,
        spec: &VoteSpec,
    ) -> Result<NormalizedBallot>;

    fn empty_tally(&self, spec: &VoteSpec) -> Tally {
        Tally::empty(&spec.options)
    }

    fn accumulate(&self, tally: Tally, ballot: NormalizedBallot) -> Tally {
        tally.with(ballot)
    }

    fn finalize(&self, tally: &Tally, spec: &VoteSpec, ctx: &FinalizeContext<'_>) -> Decision;
}

pub(crate) fn invalid(reason: impl Into<String>) -> GovernanceError {
    GovernanceError::BallotInvalid(reason.into())
}

pub(crate) fn require_option(spec: &VoteSpec, option: &str) -> Result<()> {
    if spec.options.iter().any(|o| o == option) {
        Ok(())
    } else {
        Err(invalid(format!("unknown option {}", option)))
    }
}

pub(crate) fn wrong_payload(mechanism: &str, payload: &BallotPayload) -> GovernanceError {
    invalid(format!("{} does not accept {} ballots", mechanism, payload.kind()))
}

/// Highest weight wins; ties go to the lexicographically smallest option
pub(crate) fn leader(weights: &BTreeMap<String, Score>) -> Option<(String, Score, Vec<String>)> {
    let best = weights.values().copied().max()?;
    let tied: Vec<String> = weights
        .iter()
        .filter(|(_, w)| **w == best)
        .map(|(o, _)| o.clone())
        .collect();
    let winner = tied.first()?.clone();
    Some((winner, best, if tied.len() > 1 { tied } else { Vec::new() }))
}

/// Participation over total power meets quorum; an empty vote never does
pub(crate) fn quorum_met(participation: Score, total_power: Score, quorum: Ratio) -> bool {
    participation.is_positive() && quorum.is_met(participation, total_power)
}

pub(crate) fn no_decision(
    mechanism: &str,
    tally: &Tally,
    ctx: &FinalizeContext<'_>,
    note: &str,
) -> Decision {
    Decision {
        outcome: None,
        weights: tally.totals.clone(),
        metadata: DecisionMetadata {
            mechanism: mechanism.to_string(),
            ballots: tally.len(),
            note: Some(note.to_string()),
            ..Default::default()
        },
        passed: false,
        quorum_met: false,
        participation: tally.participation,
        total_power: ctx.total_power,
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_leader_tie_break() {
        let weights: BTreeMap<String, Score> = [
            ("b".to_string(), Score::from_units(5)),
            ("a".to_string(), Score::from_units(5)),
            ("c".to_string(), Score::from_units(1)),
        ]
        .into_iter()
        .collect();
        let (winner, best, tied) = leader(&weights).unwrap();
        assert_eq!(winner, "a");
        assert_eq!(best, Score::from_units(5));
        assert_eq!(tied, vec!["a".to_string(), "b".to_string()]);
    }

    #[test]
    fn test_spec_serde() {
        let spec: MechanismSpec = serde_json::from_str(r#"{"type":"super-majority"}"#).unwrap();
        assert_eq!(spec, MechanismSpec::super_majority());
        let spec: MechanismSpec =
            serde_json::from_str(r#"{"type":"conviction","tau_ms":1000,"threshold":50}"#).unwrap();
        assert!(spec.is_open_ended());
        assert!(MechanismSpec::Conviction {
            tau_ms: 0,
            threshold: 1
        }
        .validate()
        .is_err());
    }

    fn sample_ballots(mechanism: &MechanismSpec) -> Vec<(&'static str, BallotPayload, u64)> {
        let names = |options: &[&str]| options.iter().map(|o| o.to_string()).collect::<Vec<_>>();
        let payloads: Vec<BallotPayload> = match mechanism {
            MechanismSpec::Quadratic => [
                vec![("a", 16), ("b", -9)],
                vec![("b", 25)],
                vec![("c", 16)],
                vec![("a", 4), ("c", 4)],
                vec![("b", 4)],
            ]
            .into_iter()
            .map(|credits| BallotPayload::Allocation {
                credits: credits.into_iter().map(|(o, c)| (o.to_string(), c)).collect(),
            })
            .collect(),
            MechanismSpec::RankedChoice => [
                vec!["a", "b", "c"],
                vec!["b", "c"],
                vec!["c", "b", "a"],
                vec!["c", "a"],
                vec!["b", "a"],
            ]
            .into_iter()
            .map(|r| BallotPayload::Ranking { ranking: names(&r) })
            .collect(),
            MechanismSpec::Approval => [vec!["a", "b"], vec!["b"], vec!["a", "c"], vec!["c"], vec!["b", "c"]]
                .into_iter()
                .map(|a| BallotPayload::Approval { approved: names(&a) })
                .collect(),
            MechanismSpec::Futarchy => [("a", 120, 100), ("b", 90, 95), ("a", 110, 100), ("c", 130, 80), ("b", 100, 90)]
                .into_iter()
                .map(|(option, if_adopted, if_rejected)| BallotPayload::Prediction {
                    option: option.to_string(),
                    if_adopted,
                    if_rejected,
                })
                .collect(),
            _ => ["a", "b", "a", "c", "b"].into_iter().map(BallotPayload::choice).collect(),
        };
        ["p1", "p2", "p3", "p4", "p5"]
            .into_iter()
            .zip(payloads)
            .enumerate()
            .map(|(i, (voter, payload))| (voter, payload, 100 * (i as u64 + 1)))
            .collect()
    }

    #[test]
    fn test_finalize_ignores_ballot_order() {
        use agora_ledger::{DelegationScope, PowerContext, PowerRules, TokenConfig, TokenLedger};

        let mut ledger = TokenLedger::new();
        ledger.create_token(TokenConfig::new("AGR"), 0).unwrap();
        for (holder, amount) in [
            ("p1", 40),
            ("p2", 30),
            ("p3", 20),
            ("p4", 10),
            ("p5", 5),
            ("p6", 15),
            ("p7", 8),
        ] {
            ledger.mint("AGR", holder, amount, "test", 0).unwrap();
        }
        // non-voters p7 -> p6 -> p2
        ledger.delegate("AGR", "p6", "p2", DelegationScope::All, 0).unwrap();
        ledger.delegate("AGR", "p7", "p6", DelegationScope::All, 0).unwrap();
        let snapshot = ledger.snapshot("AGR", 0).unwrap();
        let rules = PowerRules::default();
        let ctx = PowerContext::default();
        let power = VotingPower::new(&snapshot, &rules, &ctx);
        let finalize = FinalizeContext {
            total_power: power.total(),
            now: 5_000,
            power: &power,
        };

        let orders: [[usize; 5]; 3] = [[0, 1, 2, 3, 4], [4, 3, 2, 1, 0], [2, 4, 0, 3, 1]];
        for mechanism_spec in [
            MechanismSpec::SimpleMajority,
            MechanismSpec::super_majority(),
            MechanismSpec::Quadratic,
            MechanismSpec::RankedChoice,
            MechanismSpec::Approval,
            MechanismSpec::LiquidDemocracy,
            MechanismSpec::Conviction {
                tau_ms: 1_000,
                threshold: 10,
            },
            MechanismSpec::Futarchy,
        ] {
            let spec = testing::spec(mechanism_spec.clone(), &["a", "b", "c"]);
            let mechanism = mechanism_spec.build(None);
            let ballots = sample_ballots(&mechanism_spec);
            let decisions: Vec<Vec<u8>> = orders
                .iter()
                .map(|order| {
                    let mut tally = mechanism.empty_tally(&spec);
                    for &i in order {
                        let (voter, payload, cast_at) = &ballots[i];
                        let weight = mechanism.ballot_weight(&power, voter);
                        let ballot = mechanism
                            .validate_ballot(&ParticipantId::from(*voter), payload, weight, *cast_at, &spec)
                            .unwrap();
                        tally = mechanism.accumulate(tally, ballot);
                    }
                    mechanism.finalize(&tally, &spec, &finalize).canonical_bytes()
                })
                .collect();
            assert!(!decisions[0].is_empty());
            assert!(decisions.iter().all(|d| *d == decisions[0]), "{}", mechanism_spec);
        }
    }
}
