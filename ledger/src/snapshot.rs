//! Immutable balance and delegation snapshots

use crate::delegation::DelegationGraph;
use crate::error::{LedgerError, Result};
use crate::token::{Lock, LockPurpose, Token};
use agora_core::{ParticipantId, TokenSymbol};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SnapshotId(pub u64);

impl fmt::Display for SnapshotId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "snapshot-{}", self.0)
    }
}

/// Frozen view of one token at a ledger height
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    pub id: SnapshotId,
    pub token: TokenSymbol,
    pub height: u64,
    pub taken_at: u64,
    pub total_supply: u64,
    balances: BTreeMap<ParticipantId, u64>,
    locks: Vec<Lock>,
    first_funded: BTreeMap<ParticipantId, u64>,
    delegations: DelegationGraph,
}

impl Snapshot {
    pub(crate) fn capture(id: SnapshotId, token: &Token, height: u64, taken_at: u64) -> Self {
        Self {
            id,
            token: token.symbol().clone(),
            height,
            taken_at,
            total_supply: token.total_supply,
            balances: token.balances.clone(),
            locks: token.locks.values().cloned().collect(),
            first_funded: token.first_funded.clone(),
            delegations: token.delegations.clone(),
        }
    }

    pub fn balance(&self, participant: &str) -> u64 {
        self.balances.get(participant).copied().unwrap_or(0)
    }

    pub fn locked(&self, participant: &str) -> u64 {
        self.locks
            .iter()
            .filter(|l| l.owner.as_str() == participant)
            .map(|l| l.amount)
            .sum()
    }

    /// Amount staked by `participant` for at least `min_duration` as of `at`
    pub fn staked_for(&self, participant: &str, min_duration: u64, at: u64) -> u64 {
        self.locks
            .iter()
            .filter(|l| {
                l.owner.as_str() == participant
                    && l.purpose == LockPurpose::Staking
                    && at.saturating_sub(l.since) >= min_duration
            })
            .map(|l| l.amount)
            .sum()
    }

    /// Time since the participant first received this token
    pub fn account_age(&self, participant: &str, at: u64) -> Option<u64> {
        self.first_funded
            .get(participant)
            .map(|since| at.saturating_sub(*since))
    }

    pub fn delegations(&self) -> &DelegationGraph {
        &self.delegations
    }

    pub fn holders(&self) -> impl Iterator<Item = (&ParticipantId, &u64)> {
        self.balances.iter()
    }

    /// Everyone who may carry weight: holders, lockers and delegation endpoints
    pub fn participants(&self) -> BTreeSet<ParticipantId> {
        let mut all: BTreeSet<ParticipantId> = self.balances.keys().cloned().collect();
        all.extend(self.locks.iter().map(|l| l.owner.clone()));
        all.extend(self.delegations.participants());
        all
    }
}

/// Snapshots by id with retention
///
/// Votes hold their snapshot through an `Arc`, so pruning the store never
/// changes what an open vote sees.
#[derive(Debug, Clone, Default)]
pub struct SnapshotStore {
    snapshots: BTreeMap<SnapshotId, Arc<Snapshot>>,
    expired: BTreeSet<SnapshotId>,
    next_id: u64,
}

impl SnapshotStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn next_id(&mut self) -> SnapshotId {
        self.next_id += 1;
        SnapshotId(self.next_id)
    }

    pub(crate) fn insert(&mut self, snapshot: Snapshot) -> Arc<Snapshot> {
        let snapshot = Arc::new(snapshot);
        self.snapshots.insert(snapshot.id, snapshot.clone());
        snapshot
    }

    pub fn get(&self, id: SnapshotId) -> Result<Arc<Snapshot>> {
        if let Some(snapshot) = self.snapshots.get(&id) {
            return Ok(snapshot.clone());
        }
        if self.expired.contains(&id) {
            Err(LedgerError::SnapshotExpired(id.0))
        } else {
            Err(LedgerError::UnknownSnapshot(id.0))
        }
    }

    /// Drop snapshots taken before `before`; returns how many were pruned
    pub fn prune(&mut self, before: u64) -> usize {
        let stale: Vec<SnapshotId> = self
            .snapshots
            .values()
            .filter(|s| s.taken_at < before)
            .map(|s| s.id)
            .collect();
        for id in &stale {
            self.snapshots.remove(id);
            self.expired.insert(*id);
        }
        stale.len()
    }

    pub fn len(&self) -> usize {
        self.snapshots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.snapshots.is_empty()
    }
}
