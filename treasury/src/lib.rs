//! Agora Treasury
//!
//! Holds a governance's funds per asset. Funds only leave the treasury
//! through executed proposals; every movement is kept in the transaction log.

pub mod error;
pub mod pool;

pub use error::{Result, TreasuryError};
pub use pool::{
    TreasuryPool, TreasurySource, TreasuryStats, TreasuryTransaction, TreasuryTransactionKind,
};
