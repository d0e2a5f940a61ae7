use agora_core::{EntityKind, GovernanceError};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LedgerError {
    #[error("Unknown token: {0}")]
    UnknownToken(String),

    #[error("Token already exists: {0}")]
    TokenExists(String),

    #[error("Unknown participant: {0}")]
    UnknownParticipant(String),

    #[error("Insufficient balance: required {required}, available {available}")]
    InsufficientBalance { required: u64, available: u64 },

    #[error("Delegation cycle: {delegator} -> {delegate}")]
    DelegationCycle { delegator: String, delegate: String },

    #[error("Snapshot expired: {0}")]
    SnapshotExpired(u64),

    #[error("Unknown snapshot: {0}")]
    UnknownSnapshot(u64),

    #[error("Supply overflow on {token}: {reason}")]
    Overflow { token: String, reason: String },

    #[error("Token {token} does not support {feature}")]
    FeatureDisabled { token: String, feature: String },

    #[error("Invalid amount: {0}")]
    InvalidAmount(String),

    #[error("Unknown lock: {0}")]
    UnknownLock(u64),

    #[error("Lock {lock} held until {release_at}")]
    LockHeld { lock: u64, release_at: u64 },

    #[error("Invariant violation: {0}")]
    InvariantViolation(String),
}

pub type Result<T> = std::result::Result<T, LedgerError>;

impl From<LedgerError> for GovernanceError {
    fn from(err: LedgerError) -> Self {
        match err {
            LedgerError::UnknownToken(token) => GovernanceError::unknown(EntityKind::Token, token),
            LedgerError::UnknownParticipant(p) => {
                GovernanceError::unknown(EntityKind::Participant, p)
            }
            LedgerError::UnknownSnapshot(id) | LedgerError::SnapshotExpired(id) => {
                GovernanceError::unknown(EntityKind::Snapshot, id)
            }
            LedgerError::UnknownLock(id) => GovernanceError::unknown(EntityKind::Lock, id),
            LedgerError::InsufficientBalance {
                required,
                available,
            } => GovernanceError::InsufficientBalance {
                required,
                available,
            },
            LedgerError::DelegationCycle {
                delegator,
                delegate,
            } => GovernanceError::DelegationCycle {
                delegator,
                delegate,
            },
            LedgerError::TokenExists(_)
            | LedgerError::FeatureDisabled { .. }
            | LedgerError::LockHeld { .. } => GovernanceError::PermissionDenied(err.to_string()),
            LedgerError::Overflow { .. } | LedgerError::InvalidAmount(_) => {
                GovernanceError::ExecutionFailed(err.to_string())
            }
            LedgerError::InvariantViolation(reason) => GovernanceError::InvariantViolation(reason),
        }
    }
}
