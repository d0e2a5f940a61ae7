//! Pluggable consensus mechanisms
//!
//! Every mechanism drives one round through the same contract:
//! [`init`] builds the round state from a [`RoundSpec`] and the frozen
//! validator set, [`RoundProtocol::on_message`] folds one message in,
//! [`RoundProtocol::check`] reports finalization, and
//! [`RoundProtocol::on_timeout`] handles the round deadline.

pub mod avalanche;
pub mod dpos;
pub mod hotstuff;
pub mod pbft;
pub mod pipeline;
pub mod poa;
pub mod pos;
pub mod raft;
pub mod tendermint;

use crate::errors::{ConfigError, ConsensusError, ConsensusResult};
use crate::message::{ConsensusMessage, MessageOutcome, RoundCheck, TimeoutOutcome};
use crate::validator::ValidatorSet;
use agora_core::ParticipantId;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Closed set of consensus mechanisms with their parameters
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ConsensusMechanism {
    ProofOfStake,
    DelegatedProofOfStake {
        #[serde(default = "default_delegates")]
        delegates: usize,
    },
    ProofOfAuthority,
    Pbft,
    Tendermint,
    HotStuff,
    Raft {
        #[serde(default = "default_election_min")]
        election_timeout_min_ms: u64,
        #[serde(default = "default_election_max")]
        election_timeout_max_ms: u64,
    },
    Avalanche {
        #[serde(default = "default_sample_size")]
        sample_size: usize,
        #[serde(default = "default_alpha")]
        alpha: usize,
        #[serde(default = "default_beta")]
        beta: u32,
    },
}

fn default_delegates() -> usize {
    21
}

fn default_election_min() -> u64 {
    150
}

fn default_election_max() -> u64 {
    300
}

fn default_sample_size() -> usize {
    20
}

fn default_alpha() -> usize {
    14
}

fn default_beta() -> u32 {
    20
}

impl ConsensusMechanism {
    pub fn name(&self) -> &'static str {
        match self {
            ConsensusMechanism::ProofOfStake => "proof-of-stake",
            ConsensusMechanism::DelegatedProofOfStake { .. } => "delegated-proof-of-stake",
            ConsensusMechanism::ProofOfAuthority => "proof-of-authority",
            ConsensusMechanism::Pbft => "pbft",
            ConsensusMechanism::Tendermint => "tendermint",
            ConsensusMechanism::HotStuff => "hotstuff",
            ConsensusMechanism::Raft { .. } => "raft",
            ConsensusMechanism::Avalanche { .. } => "avalanche",
        }
    }

    pub fn raft() -> Self {
        ConsensusMechanism::Raft {
            election_timeout_min_ms: default_election_min(),
            election_timeout_max_ms: default_election_max(),
        }
    }

    pub fn avalanche(sample_size: usize, alpha: usize, beta: u32) -> Self {
        ConsensusMechanism::Avalanche {
            sample_size,
            alpha,
            beta,
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        match self {
            ConsensusMechanism::DelegatedProofOfStake { delegates } if *delegates == 0 => {
                Err(ConfigError::InvalidValidatorLimit)
            }
            ConsensusMechanism::Raft {
                election_timeout_min_ms,
                election_timeout_max_ms,
            } if *election_timeout_min_ms == 0
                || election_timeout_min_ms >= election_timeout_max_ms =>
            {
                Err(ConfigError::InvalidElectionTimeout {
                    min_ms: *election_timeout_min_ms,
                    max_ms: *election_timeout_max_ms,
                })
            }
            ConsensusMechanism::Avalanche {
                sample_size, alpha, ..
            } if *alpha == 0 || alpha > sample_size => Err(ConfigError::InvalidSampleSize {
                sample: *sample_size,
                alpha: *alpha,
            }),
            _ => Ok(()),
        }
    }
}

impl fmt::Display for ConsensusMechanism {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// What a round is asked to agree on
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoundSpec {
    pub mechanism: ConsensusMechanism,
    /// Proposed value, usually a decision digest or a proposal id
    pub value: String,
    /// Seed for leader rotation and sampling
    #[serde(default)]
    pub seed: u64,
    /// Views before the round gives up; the engine fills in its own limit when unset
    #[serde(default)]
    pub max_views: Option<u64>,
}

impl RoundSpec {
    pub fn new(mechanism: ConsensusMechanism, value: impl Into<String>) -> Self {
        Self {
            mechanism,
            value: value.into(),
            seed: 0,
            max_views: None,
        }
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    pub fn with_max_views(mut self, max_views: u64) -> Self {
        self.max_views = Some(max_views);
        self
    }
}

/// Round state machine shared by all mechanisms
pub trait RoundProtocol: Send + Sync + fmt::Debug {
    fn name(&self) -> &'static str;

    /// Current view (term for Raft, query for Avalanche)
    fn view(&self) -> u64;

    /// Leader of the current view, if the mechanism has one
    fn leader(&self) -> Option<ParticipantId> {
        None
    }

    fn on_message(
        &mut self,
        validators: &ValidatorSet,
        sender: &ParticipantId,
        message: &ConsensusMessage,
        now: u64,
    ) -> MessageOutcome;

    fn check(&self) -> RoundCheck;

    fn on_timeout(&mut self, validators: &ValidatorSet, now: u64) -> TimeoutOutcome;
}

/// Build the round state for `spec` over a frozen validator set
pub fn init(spec: &RoundSpec, validators: &ValidatorSet) -> ConsensusResult<Box<dyn RoundProtocol>> {
    spec.mechanism.validate()?;
    let available = validators.active_count();
    if available == 0 {
        return Err(ConsensusError::NotEnoughValidators {
            required: 1,
            available,
        });
    }

    let protocol: Box<dyn RoundProtocol> = match &spec.mechanism {
        ConsensusMechanism::ProofOfStake => Box::new(pos::ProofOfStake::new(validators)?),
        ConsensusMechanism::DelegatedProofOfStake { delegates } => {
            Box::new(dpos::DelegatedProofOfStake::new(validators, *delegates))
        }
        ConsensusMechanism::ProofOfAuthority => Box::new(poa::ProofOfAuthority::new(validators)?),
        ConsensusMechanism::Pbft => Box::new(pbft::new_round(validators)),
        ConsensusMechanism::Tendermint => Box::new(tendermint::new_round(validators)),
        ConsensusMechanism::HotStuff => Box::new(hotstuff::new_round(validators)),
        ConsensusMechanism::Raft {
            election_timeout_min_ms,
            election_timeout_max_ms,
        } => Box::new(raft::Raft::new(
            validators,
            spec.value.clone(),
            spec.seed,
            *election_timeout_min_ms..*election_timeout_max_ms,
        )),
        ConsensusMechanism::Avalanche {
            sample_size,
            alpha,
            beta,
        } => Box::new(avalanche::Avalanche::new(
            validators,
            spec.value.clone(),
            spec.seed,
            *sample_size,
            *alpha,
            *beta,
        )),
    };
    Ok(protocol)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::validator::Validator;

    #[test]
    fn test_mechanism_serde_defaults() {
        let mechanism: ConsensusMechanism = serde_json::from_str(r#"{"type":"avalanche"}"#).unwrap();
        assert_eq!(mechanism, ConsensusMechanism::avalanche(20, 14, 20));
        assert_eq!(mechanism.to_string(), "avalanche");

        let pbft: ConsensusMechanism = serde_json::from_str(r#"{"type":"pbft"}"#).unwrap();
        assert_eq!(pbft, ConsensusMechanism::Pbft);
    }

    #[test]
    fn test_invalid_parameters_rejected() {
        assert!(ConsensusMechanism::avalanche(5, 6, 3).validate().is_err());
        assert!(ConsensusMechanism::avalanche(5, 0, 3).validate().is_err());
        assert!(ConsensusMechanism::Raft {
            election_timeout_min_ms: 300,
            election_timeout_max_ms: 300
        }
        .validate()
        .is_err());
        assert!(ConsensusMechanism::DelegatedProofOfStake { delegates: 0 }
            .validate()
            .is_err());
    }

    #[test]
    fn test_init_requires_validators() {
        let empty = ValidatorSet::new();
        let spec = RoundSpec::new(ConsensusMechanism::Pbft, "x");
        assert!(matches!(
            init(&spec, &empty),
            Err(ConsensusError::NotEnoughValidators { .. })
        ));

        let validators = ValidatorSet::from_validators([Validator::new("v1", 1)]).unwrap();
        let round = init(&spec, &validators).unwrap();
        assert_eq!(round.name(), "pbft");
        assert_eq!(round.view(), 0);
    }
}
