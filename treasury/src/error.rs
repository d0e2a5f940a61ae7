//! Treasury error types

use agora_core::GovernanceError;
use thiserror::Error;

/// Treasury pool errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TreasuryError {
    #[error("Insufficient {asset} balance: requested {requested}, available {available}")]
    InsufficientBalance {
        asset: String,
        requested: u64,
        available: u64,
    },

    #[error("Unauthorized withdrawal attempt")]
    UnauthorizedWithdrawal,

    #[error("Invalid amount: {0}")]
    InvalidAmount(String),

    #[error("Balance overflow for {0}")]
    Overflow(String),

    #[error("Transaction not found: {0}")]
    TransactionNotFound(u64),

    #[error("Transaction already reversed: {0}")]
    AlreadyReversed(u64),

    #[error("Treasury log does not match balances: {0}")]
    Inconsistent(String),
}

impl From<TreasuryError> for GovernanceError {
    fn from(e: TreasuryError) -> Self {
        match e {
            TreasuryError::InsufficientBalance {
                requested,
                available,
                ..
            } => GovernanceError::InsufficientBalance {
                required: requested,
                available,
            },
            TreasuryError::UnauthorizedWithdrawal => GovernanceError::PermissionDenied(e.to_string()),
            TreasuryError::Inconsistent(_) => GovernanceError::InvariantViolation(e.to_string()),
            TreasuryError::InvalidAmount(_)
            | TreasuryError::Overflow(_)
            | TreasuryError::TransactionNotFound(_)
            | TreasuryError::AlreadyReversed(_) => GovernanceError::ExecutionFailed(e.to_string()),
        }
    }
}

pub type Result<T> = std::result::Result<T, TreasuryError>;
