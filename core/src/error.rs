//! Governance error types
//!
//! The closed set of error kinds every component reports through. Component
//! crates keep their own richer error enums and convert into
//! [`GovernanceError`] at the boundary.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Kind of entity named by [`GovernanceError::UnknownEntity`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EntityKind {
    Participant,
    Token,
    Snapshot,
    Governance,
    Proposal,
    Vote,
    Option,
    Round,
    Validator,
    Member,
    Lock,
    CrossGovernance,
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            EntityKind::Participant => "participant",
            EntityKind::Token => "token",
            EntityKind::Snapshot => "snapshot",
            EntityKind::Governance => "governance",
            EntityKind::Proposal => "proposal",
            EntityKind::Vote => "vote",
            EntityKind::Option => "option",
            EntityKind::Round => "round",
            EntityKind::Validator => "validator",
            EntityKind::Member => "member",
            EntityKind::Lock => "lock",
            EntityKind::CrossGovernance => "cross-governance proposal",
        };
        f.write_str(name)
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GovernanceError {
    #[error("Unknown {kind}: {id}")]
    UnknownEntity { kind: EntityKind, id: String },

    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    #[error("Participant {participant} is ineligible: {rule}")]
    IneligibleParticipant { participant: String, rule: String },

    #[error("Insufficient balance: required {required}, available {available}")]
    InsufficientBalance { required: u64, available: u64 },

    #[error("Delegation cycle: {delegator} -> {delegate}")]
    DelegationCycle { delegator: String, delegate: String },

    #[error("Invalid ballot: {0}")]
    BallotInvalid(String),

    #[error("Duplicate ballot from {0}")]
    DuplicateBallot(String),

    #[error("Vote closed: {0}")]
    VoteClosed(String),

    #[error("Quorum not met: {0}")]
    QuorumNotMet(String),

    #[error("Threshold not met: {0}")]
    ThresholdNotMet(String),

    #[error("Execution failed: {0}")]
    ExecutionFailed(String),

    #[error("Timeout expired: {0}")]
    TimeoutExpired(String),

    #[error("Invalid phase transition: {from} -> {to}")]
    InvalidPhaseTransition { from: String, to: String },

    #[error("Validator unauthorized: {0}")]
    ValidatorUnauthorized(String),

    #[error("Invariant violation: {0}")]
    InvariantViolation(String),
}

/// Fieldless mirror of [`GovernanceError`] for status reports and events
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ErrorKind {
    UnknownEntity,
    PermissionDenied,
    IneligibleParticipant,
    InsufficientBalance,
    DelegationCycle,
    BallotInvalid,
    DuplicateBallot,
    VoteClosed,
    QuorumNotMet,
    ThresholdNotMet,
    ExecutionFailed,
    TimeoutExpired,
    InvalidPhaseTransition,
    ValidatorUnauthorized,
    InvariantViolation,
}

impl GovernanceError {
    pub fn unknown(kind: EntityKind, id: impl fmt::Display) -> Self {
        GovernanceError::UnknownEntity {
            kind,
            id: id.to_string(),
        }
    }

    pub fn transition(from: impl fmt::Debug, to: impl fmt::Debug) -> Self {
        GovernanceError::InvalidPhaseTransition {
            from: format!("{:?}", from),
            to: format!("{:?}", to),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            GovernanceError::UnknownEntity { .. } => ErrorKind::UnknownEntity,
            GovernanceError::PermissionDenied(_) => ErrorKind::PermissionDenied,
            GovernanceError::IneligibleParticipant { .. } => ErrorKind::IneligibleParticipant,
            GovernanceError::InsufficientBalance { .. } => ErrorKind::InsufficientBalance,
            GovernanceError::DelegationCycle { .. } => ErrorKind::DelegationCycle,
            GovernanceError::BallotInvalid(_) => ErrorKind::BallotInvalid,
            GovernanceError::DuplicateBallot(_) => ErrorKind::DuplicateBallot,
            GovernanceError::VoteClosed(_) => ErrorKind::VoteClosed,
            GovernanceError::QuorumNotMet(_) => ErrorKind::QuorumNotMet,
            GovernanceError::ThresholdNotMet(_) => ErrorKind::ThresholdNotMet,
            GovernanceError::ExecutionFailed(_) => ErrorKind::ExecutionFailed,
            GovernanceError::TimeoutExpired(_) => ErrorKind::TimeoutExpired,
            GovernanceError::InvalidPhaseTransition { .. } => ErrorKind::InvalidPhaseTransition,
            GovernanceError::ValidatorUnauthorized(_) => ErrorKind::ValidatorUnauthorized,
            GovernanceError::InvariantViolation(_) => ErrorKind::InvariantViolation,
        }
    }

    /// Only invariant violations take a governance out of service
    pub fn is_fatal(&self) -> bool {
        matches!(self, GovernanceError::InvariantViolation(_))
    }
}

pub type Result<T> = std::result::Result<T, GovernanceError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = GovernanceError::unknown(EntityKind::Proposal, "gov-1/prop-9");
        assert_eq!(err.to_string(), "Unknown proposal: gov-1/prop-9");

        let err = GovernanceError::InsufficientBalance {
            required: 100,
            available: 40,
        };
        assert_eq!(
            err.to_string(),
            "Insufficient balance: required 100, available 40"
        );
    }

    #[test]
    fn test_only_invariant_violation_is_fatal() {
        assert!(GovernanceError::InvariantViolation("supply".into()).is_fatal());
        assert!(!GovernanceError::VoteClosed("v".into()).is_fatal());
        assert_eq!(
            GovernanceError::DuplicateBallot("p1".into()).kind(),
            ErrorKind::DuplicateBallot
        );
    }
}
