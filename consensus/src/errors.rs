//! Consensus error types
//!
//! Unified error handling for all consensus operations

use agora_core::{EntityKind, GovernanceError};
use std::fmt;

/// Consensus errors
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConsensusError {
    /// Not enough validators to start a round
    NotEnoughValidators { required: usize, available: usize },

    /// Round id not known to the engine
    UnknownRound(String),

    /// Validator id not registered
    UnknownValidator(String),

    /// Validator already registered
    DuplicateValidator(String),

    /// Sender is not part of the round's validator set
    UnauthorizedValidator(String),

    /// Signature did not verify
    InvalidSignature { sender: String, scheme: String },

    /// Validator set is full
    ValidatorLimit { max: usize },

    /// Round parameters are unusable
    InvalidRound(String),

    /// Configuration error
    ConfigError(String),
}

impl fmt::Display for ConsensusError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotEnoughValidators {
                required,
                available,
            } => {
                write!(
                    f,
                    "Not enough validators for consensus: required {}, available {}",
                    required, available
                )
            }
            Self::UnknownRound(round) => {
                write!(f, "Unknown round: {}", round)
            }
            Self::UnknownValidator(validator) => {
                write!(f, "Unknown validator: {}", validator)
            }
            Self::DuplicateValidator(validator) => {
                write!(f, "Validator already registered: {}", validator)
            }
            Self::UnauthorizedValidator(validator) => {
                write!(f, "Unauthorized validator: {}", validator)
            }
            Self::InvalidSignature { sender, scheme } => {
                write!(f, "Invalid {} signature from {}", scheme, sender)
            }
            Self::ValidatorLimit { max } => {
                write!(f, "Validator set is full ({} max)", max)
            }
            Self::InvalidRound(reason) => {
                write!(f, "Invalid round: {}", reason)
            }
            Self::ConfigError(msg) => {
                write!(f, "Configuration error: {}", msg)
            }
        }
    }
}

impl std::error::Error for ConsensusError {}

impl From<ConsensusError> for GovernanceError {
    fn from(e: ConsensusError) -> Self {
        match e {
            ConsensusError::UnknownRound(id) => GovernanceError::unknown(EntityKind::Round, id),
            ConsensusError::UnknownValidator(id) => {
                GovernanceError::unknown(EntityKind::Validator, id)
            }
            ConsensusError::UnauthorizedValidator(_) | ConsensusError::InvalidSignature { .. } => {
                GovernanceError::ValidatorUnauthorized(e.to_string())
            }
            ConsensusError::DuplicateValidator(_) | ConsensusError::ValidatorLimit { .. } => {
                GovernanceError::PermissionDenied(e.to_string())
            }
            ConsensusError::NotEnoughValidators { .. }
            | ConsensusError::InvalidRound(_)
            | ConsensusError::ConfigError(_) => GovernanceError::ExecutionFailed(e.to_string()),
        }
    }
}

/// Type alias for consensus results
pub type ConsensusResult<T> = Result<T, ConsensusError>;

/// Configuration validation errors
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    TimeoutCannotBeZero,
    InvalidValidatorLimit,
    InvalidViewLimit,
    InvalidSampleSize { sample: usize, alpha: usize },
    InvalidElectionTimeout { min_ms: u64, max_ms: u64 },
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::TimeoutCannotBeZero => {
                write!(f, "Timeout cannot be zero")
            }
            Self::InvalidValidatorLimit => {
                write!(f, "Invalid validator limit: must be > 0")
            }
            Self::InvalidViewLimit => {
                write!(f, "Invalid view limit: must be > 0")
            }
            Self::InvalidSampleSize { sample, alpha } => {
                write!(
                    f,
                    "Invalid sample: alpha {} must be in 1..={}",
                    alpha, sample
                )
            }
            Self::InvalidElectionTimeout { min_ms, max_ms } => {
                write!(
                    f,
                    "Invalid election timeout range: {}..{} ms",
                    min_ms, max_ms
                )
            }
        }
    }
}

impl std::error::Error for ConfigError {}

impl From<ConfigError> for ConsensusError {
    fn from(e: ConfigError) -> Self {
        ConsensusError::ConfigError(e.to_string())
    }
}
