//! Agora Token Ledger
//!
//! Authoritative record of token balances, locks and delegations, the
//! immutable snapshots votes are weighed against, and the voting-power
//! pipeline that turns a snapshot into per-participant weight.

pub mod delegation;
pub mod error;
pub mod ledger;
pub mod power;
pub mod snapshot;
pub mod token;

pub use delegation::{Delegation, DelegationChange, DelegationGraph, DelegationScope};
pub use error::{LedgerError, Result};
pub use ledger::{LedgerHandle, TokenLedger};
pub use power::{PowerContext, PowerRules, PowerTransform, TimeWeight, VotingPower};
pub use snapshot::{Snapshot, SnapshotId, SnapshotStore};
pub use token::{LedgerEntry, LedgerOp, Lock, LockId, LockPurpose, Token, TokenConfig, TokenFeature};

/// Milliseconds in a 365-day year, the unit of account-age time weighting
pub const YEAR_MS: u64 = 365 * agora_core::DAY_MS;
