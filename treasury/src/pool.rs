//! Treasury Pool Management
//!
//! Per-asset balances backed by an append-only transaction log. Every
//! movement of funds is a transaction; balances always equal the sum of
//! deposits minus withdrawals for their asset. Withdrawals need the id of
//! the executed proposal that authorised them.

use crate::error::{Result, TreasuryError};
use agora_core::ParticipantId;
use log::info;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Where treasury funds came from
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TreasurySource {
    /// Member or external contribution
    Contribution,
    /// Forfeited proposal bond
    ForfeitedBond,
    /// Compensation of an earlier withdrawal
    Reversal { of: u64 },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum TreasuryTransactionKind {
    Deposit {
        from: ParticipantId,
        source: TreasurySource,
    },
    Withdrawal {
        to: ParticipantId,
        /// Proposal that authorised the withdrawal
        authorization: String,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TreasuryTransaction {
    pub id: u64,
    pub asset: String,
    pub amount: u64,
    pub kind: TreasuryTransactionKind,
    pub memo: Option<String>,
    pub at: u64,
}

impl TreasuryTransaction {
    pub fn is_deposit(&self) -> bool {
        matches!(self.kind, TreasuryTransactionKind::Deposit { .. })
    }
}

/// Aggregate figures for one asset
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TreasuryStats {
    pub balance: u64,
    pub total_deposited: u64,
    pub total_withdrawn: u64,
    pub deposit_count: usize,
    pub withdrawal_count: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TreasuryPool {
    balances: BTreeMap<String, u64>,
    transactions: Vec<TreasuryTransaction>,
    /// Withdrawal ids that have been reversed
    reversed: Vec<u64>,
}

impl TreasuryPool {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn balance(&self, asset: &str) -> u64 {
        self.balances.get(asset).copied().unwrap_or(0)
    }

    pub fn balances(&self) -> &BTreeMap<String, u64> {
        &self.balances
    }

    pub fn transactions(&self) -> &[TreasuryTransaction] {
        &self.transactions
    }

    pub fn transaction(&self, id: u64) -> Result<&TreasuryTransaction> {
        self.transactions
            .get(id as usize)
            .ok_or(TreasuryError::TransactionNotFound(id))
    }

    pub fn deposit(
        &mut self,
        asset: &str,
        from: impl Into<ParticipantId>,
        amount: u64,
        source: TreasurySource,
        memo: Option<String>,
        at: u64,
    ) -> Result<u64> {
        if amount == 0 {
            return Err(TreasuryError::InvalidAmount("deposit of zero".to_string()));
        }
        let current = self.balance(asset);
        let updated = current
            .checked_add(amount)
            .ok_or_else(|| TreasuryError::Overflow(asset.to_string()))?;
        self.balances.insert(asset.to_string(), updated);
        let id = self.append(
            asset,
            amount,
            TreasuryTransactionKind::Deposit {
                from: from.into(),
                source,
            },
            memo,
            at,
        );
        info!("💰 Treasury deposit #{}: {} {}", id, amount, asset);
        Ok(id)
    }

    /// Pay out `amount` of `asset` on behalf of an executed proposal
    pub fn withdraw(
        &mut self,
        asset: &str,
        to: impl Into<ParticipantId>,
        amount: u64,
        authorization: &str,
        memo: Option<String>,
        at: u64,
    ) -> Result<u64> {
        if authorization.is_empty() {
            return Err(TreasuryError::UnauthorizedWithdrawal);
        }
        if amount == 0 {
            return Err(TreasuryError::InvalidAmount("withdrawal of zero".to_string()));
        }
        let available = self.balance(asset);
        if amount > available {
            return Err(TreasuryError::InsufficientBalance {
                asset: asset.to_string(),
                requested: amount,
                available,
            });
        }
        self.balances.insert(asset.to_string(), available - amount);
        let id = self.append(
            asset,
            amount,
            TreasuryTransactionKind::Withdrawal {
                to: to.into(),
                authorization: authorization.to_string(),
            },
            memo,
            at,
        );
        info!(
            "💸 Treasury withdrawal #{}: {} {} ({})",
            id, amount, asset, authorization
        );
        Ok(id)
    }

    /// Undo a withdrawal by depositing the same amount back
    pub fn reverse(&mut self, withdrawal: u64, at: u64) -> Result<u64> {
        let tx = self.transaction(withdrawal)?.clone();
        let TreasuryTransactionKind::Withdrawal { to, .. } = &tx.kind else {
            return Err(TreasuryError::InvalidAmount(format!(
                "transaction {} is not a withdrawal",
                withdrawal
            )));
        };
        if self.reversed.contains(&withdrawal) {
            return Err(TreasuryError::AlreadyReversed(withdrawal));
        }
        let id = self.deposit(
            &tx.asset,
            to.clone(),
            tx.amount,
            TreasurySource::Reversal { of: withdrawal },
            Some(format!("reversal of #{}", withdrawal)),
            at,
        )?;
        self.reversed.push(withdrawal);
        Ok(id)
    }

    /// Latest withdrawal authorised by `authorization` that is not yet reversed
    pub fn last_withdrawal(&self, authorization: &str, asset: &str, to: &str) -> Option<u64> {
        self.transactions
            .iter()
            .rev()
            .filter(|tx| !self.reversed.contains(&tx.id) && tx.asset == asset)
            .find(|tx| match &tx.kind {
                TreasuryTransactionKind::Withdrawal {
                    to: recipient,
                    authorization: auth,
                } => auth == authorization && recipient.as_str() == to,
                TreasuryTransactionKind::Deposit { .. } => false,
            })
            .map(|tx| tx.id)
    }

    fn append(
        &mut self,
        asset: &str,
        amount: u64,
        kind: TreasuryTransactionKind,
        memo: Option<String>,
        at: u64,
    ) -> u64 {
        let id = self.transactions.len() as u64;
        self.transactions.push(TreasuryTransaction {
            id,
            asset: asset.to_string(),
            amount,
            kind,
            memo,
            at,
        });
        id
    }

    pub fn stats(&self, asset: &str) -> TreasuryStats {
        let mut stats = TreasuryStats {
            balance: self.balance(asset),
            ..TreasuryStats::default()
        };
        for tx in self.transactions.iter().filter(|tx| tx.asset == asset) {
            if tx.is_deposit() {
                stats.total_deposited += tx.amount;
                stats.deposit_count += 1;
            } else {
                stats.total_withdrawn += tx.amount;
                stats.withdrawal_count += 1;
            }
        }
        stats
    }

    /// Balances equal deposits minus withdrawals per asset
    pub fn check_invariants(&self) -> Result<()> {
        let mut replayed: BTreeMap<&str, i128> = BTreeMap::new();
        for tx in &self.transactions {
            let entry = replayed.entry(tx.asset.as_str()).or_insert(0);
            if tx.is_deposit() {
                *entry += tx.amount as i128;
            } else {
                *entry -= tx.amount as i128;
            }
        }
        for (asset, balance) in &self.balances {
            let expected = replayed.get(asset.as_str()).copied().unwrap_or(0);
            if expected != *balance as i128 {
                return Err(TreasuryError::Inconsistent(format!(
                    "{}: balance {}, log {}",
                    asset, balance, expected
                )));
            }
        }
        Ok(())
    }
}
