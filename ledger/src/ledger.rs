//! Token ledger
//!
//! The only component that mutates balances, locks and delegations. Every
//! operation validates fully before touching state, so a failed call leaves
//! the ledger unchanged.

use crate::delegation::{Delegation, DelegationChange, DelegationScope};
use crate::error::{LedgerError, Result};
use crate::snapshot::{Snapshot, SnapshotId, SnapshotStore};
use crate::token::{LedgerEntry, LedgerOp, Lock, LockId, LockPurpose, Token, TokenConfig, TokenFeature};
use agora_core::{ParticipantHandle, ParticipantId, TokenSymbol};
use log::{debug, info, warn};
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Shared ledger handle passed to governances and the orchestrator
pub type LedgerHandle = Arc<RwLock<TokenLedger>>;

/// Cloning yields an independent copy that shares only the participant registry
#[derive(Clone, Default)]
pub struct TokenLedger {
    tokens: BTreeMap<TokenSymbol, Token>,
    snapshots: SnapshotStore,
    /// When attached, accounts must belong to registered, active participants
    registry: Option<ParticipantHandle>,
    next_lock: u64,
    height: u64,
}

impl TokenLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_registry(registry: ParticipantHandle) -> Self {
        Self {
            registry: Some(registry),
            ..Self::default()
        }
    }

    pub fn shared(self) -> LedgerHandle {
        Arc::new(RwLock::new(self))
    }

    pub fn height(&self) -> u64 {
        self.height
    }

    pub fn create_token(&mut self, config: TokenConfig, at: u64) -> Result<()> {
        if self.tokens.contains_key(&config.symbol) {
            return Err(LedgerError::TokenExists(config.symbol.to_string()));
        }
        info!("🪙 Created token {} at {}", config.symbol, at);
        self.tokens.insert(config.symbol.clone(), Token::new(config));
        Ok(())
    }

    pub fn token(&self, symbol: &str) -> Result<&Token> {
        self.tokens
            .get(symbol)
            .ok_or_else(|| LedgerError::UnknownToken(symbol.to_string()))
    }

    fn token_mut(&mut self, symbol: &str) -> Result<&mut Token> {
        self.tokens
            .get_mut(symbol)
            .ok_or_else(|| LedgerError::UnknownToken(symbol.to_string()))
    }

    pub fn tokens(&self) -> impl Iterator<Item = &Token> {
        self.tokens.values()
    }

    fn require_feature(&self, symbol: &str, feature: TokenFeature) -> Result<()> {
        let token = self.token(symbol)?;
        if token.supports(feature) {
            Ok(())
        } else {
            Err(LedgerError::FeatureDisabled {
                token: symbol.to_string(),
                feature: feature.to_string(),
            })
        }
    }

    fn require_participant(&self, participant: &str) -> Result<()> {
        if let Some(registry) = &self.registry {
            let registry = registry.read();
            match registry.get(participant) {
                Some(p) if p.active => {}
                _ => return Err(LedgerError::UnknownParticipant(participant.to_string())),
            }
        }
        Ok(())
    }

    fn record(&mut self, symbol: &str, at: u64, op: LedgerOp) {
        self.height += 1;
        let height = self.height;
        if let Some(token) = self.tokens.get_mut(symbol) {
            token.audit.push(LedgerEntry { height, at, op });
        }
    }

    pub fn balance(&self, symbol: &str, participant: &str) -> Result<u64> {
        Ok(self.token(symbol)?.balance(participant))
    }

    pub fn locked_balance(&self, symbol: &str, participant: &str) -> Result<u64> {
        Ok(self.token(symbol)?.locked(participant))
    }

    pub fn total_supply(&self, symbol: &str) -> Result<u64> {
        Ok(self.token(symbol)?.total_supply)
    }

    /// Create `amount` new tokens for `to`; returns the new balance
    pub fn mint(&mut self, symbol: &str, to: &str, amount: u64, reason: &str, at: u64) -> Result<u64> {
        if amount == 0 {
            return Err(LedgerError::InvalidAmount("mint amount must be positive".into()));
        }
        self.require_participant(to)?;
        let token = self.token(symbol)?;
        let new_supply = token
            .total_supply
            .checked_add(amount)
            .ok_or_else(|| LedgerError::Overflow {
                token: symbol.to_string(),
                reason: "supply exceeds u64".into(),
            })?;
        if let Some(cap) = token.config.supply_cap {
            if new_supply > cap {
                return Err(LedgerError::Overflow {
                    token: symbol.to_string(),
                    reason: format!("supply {} would exceed cap {}", new_supply, cap),
                });
            }
        }

        let to_id = ParticipantId::from(to);
        let token = self.token_mut(symbol)?;
        token.total_supply = new_supply;
        token.credit(&to_id, amount, at);
        let balance = token.balance(to);
        self.record(
            symbol,
            at,
            LedgerOp::Mint {
                to: to_id,
                amount,
                reason: reason.to_string(),
            },
        );
        debug!("🪙 Minted {} {} to {} ({})", amount, symbol, to, reason);
        Ok(balance)
    }

    /// Destroy `amount` liquid tokens held by `from`; returns the new balance
    pub fn burn(&mut self, symbol: &str, from: &str, amount: u64, reason: &str, at: u64) -> Result<u64> {
        if amount == 0 {
            return Err(LedgerError::InvalidAmount("burn amount must be positive".into()));
        }
        let available = self.token(symbol)?.balance(from);
        if available < amount {
            return Err(LedgerError::InsufficientBalance {
                required: amount,
                available,
            });
        }
        let token = self.token_mut(symbol)?;
        token.debit(from, amount);
        token.total_supply -= amount;
        let balance = token.balance(from);
        self.record(
            symbol,
            at,
            LedgerOp::Burn {
                from: from.into(),
                amount,
                reason: reason.to_string(),
            },
        );
        debug!("🔥 Burned {} {} from {} ({})", amount, symbol, from, reason);
        Ok(balance)
    }

    pub fn transfer(&mut self, symbol: &str, from: &str, to: &str, amount: u64, at: u64) -> Result<()> {
        if amount == 0 {
            return Err(LedgerError::InvalidAmount("transfer amount must be positive".into()));
        }
        self.require_participant(to)?;
        let available = self.token(symbol)?.balance(from);
        if available < amount {
            return Err(LedgerError::InsufficientBalance {
                required: amount,
                available,
            });
        }
        if from == to {
            return Ok(());
        }
        let to_id = ParticipantId::from(to);
        let token = self.token_mut(symbol)?;
        token.debit(from, amount);
        token.credit(&to_id, amount, at);
        self.record(
            symbol,
            at,
            LedgerOp::Transfer {
                from: from.into(),
                to: to_id,
                amount,
            },
        );
        Ok(())
    }

    /// Move `amount` from the liquid pool into a lock released at `release_at`
    pub fn lock(
        &mut self,
        symbol: &str,
        participant: &str,
        amount: u64,
        purpose: LockPurpose,
        release_at: u64,
        at: u64,
    ) -> Result<LockId> {
        if amount == 0 {
            return Err(LedgerError::InvalidAmount("lock amount must be positive".into()));
        }
        if purpose == LockPurpose::Staking {
            self.require_feature(symbol, TokenFeature::Staking)?;
        }
        let available = self.token(symbol)?.balance(participant);
        if available < amount {
            return Err(LedgerError::InsufficientBalance {
                required: amount,
                available,
            });
        }

        self.next_lock += 1;
        let id = LockId(self.next_lock);
        let owner = ParticipantId::from(participant);
        let token = self.token_mut(symbol)?;
        token.debit(participant, amount);
        token.locks.insert(
            id,
            Lock {
                id,
                owner: owner.clone(),
                amount,
                purpose,
                since: at,
                release_at,
            },
        );
        self.record(
            symbol,
            at,
            LedgerOp::Lock {
                lock: id,
                owner,
                amount,
                purpose,
            },
        );
        debug!("🔒 Locked {} {} for {} as {:?}", amount, symbol, participant, purpose);
        Ok(id)
    }

    /// Return a lock to its owner's liquid balance; fails before `release_at`
    pub fn unlock(&mut self, symbol: &str, lock: LockId, at: u64) -> Result<u64> {
        let held = self
            .token(symbol)?
            .lock(lock)
            .cloned()
            .ok_or(LedgerError::UnknownLock(lock.0))?;
        if at < held.release_at {
            return Err(LedgerError::LockHeld {
                lock: lock.0,
                release_at: held.release_at,
            });
        }
        let token = self.token_mut(symbol)?;
        token.locks.remove(&lock);
        token.credit(&held.owner, held.amount, at);
        self.record(
            symbol,
            at,
            LedgerOp::Unlock {
                lock,
                owner: held.owner.clone(),
                amount: held.amount,
            },
        );
        debug!("🔓 Released {} {} to {}", held.amount, symbol, held.owner);
        Ok(held.amount)
    }

    /// Create, replace or (when `delegate == delegator`) revoke a delegation
    pub fn delegate(
        &mut self,
        symbol: &str,
        delegator: &str,
        delegate: &str,
        scope: DelegationScope,
        at: u64,
    ) -> Result<DelegationChange> {
        self.require_feature(symbol, TokenFeature::Delegation)?;
        if delegator == delegate {
            let previous = self.revoke_delegation(symbol, delegator, &scope, at)?;
            return Ok(DelegationChange::Revoked { previous });
        }
        self.require_participant(delegator)?;
        self.require_participant(delegate)?;

        let token = self.token(symbol)?;
        if token.delegations.would_cycle(delegator, delegate, &scope) {
            warn!(
                "⚠️  Rejected delegation {} -> {} on {}: cycle",
                delegator, delegate, symbol
            );
            return Err(LedgerError::DelegationCycle {
                delegator: delegator.to_string(),
                delegate: delegate.to_string(),
            });
        }

        let token = self.token_mut(symbol)?;
        let previous = token.delegations.set(Delegation {
            delegator: delegator.into(),
            delegate: delegate.into(),
            scope: scope.clone(),
            since: at,
        });
        self.record(
            symbol,
            at,
            LedgerOp::Delegate {
                delegator: delegator.into(),
                delegate: delegate.into(),
                scope,
            },
        );
        Ok(match previous {
            Some(previous) => DelegationChange::Replaced {
                previous: previous.delegate,
            },
            None => DelegationChange::Created,
        })
    }

    /// Remove the delegation under `scope`; returns the previous delegate
    pub fn revoke_delegation(
        &mut self,
        symbol: &str,
        delegator: &str,
        scope: &DelegationScope,
        at: u64,
    ) -> Result<Option<ParticipantId>> {
        self.require_feature(symbol, TokenFeature::Delegation)?;
        let token = self.token_mut(symbol)?;
        let removed = token.delegations.revoke(delegator, scope);
        if removed.is_some() {
            self.record(
                symbol,
                at,
                LedgerOp::Revoke {
                    delegator: delegator.into(),
                    scope: scope.clone(),
                },
            );
        }
        Ok(removed.map(|d| d.delegate))
    }

    /// Capture balances, locks and delegations of `symbol`
    pub fn snapshot(&mut self, symbol: &str, at: u64) -> Result<Arc<Snapshot>> {
        self.require_feature(symbol, TokenFeature::Snapshot)?;
        let id = self.snapshots.next_id();
        self.record(symbol, at, LedgerOp::Snapshot { id: id.0 });
        let snapshot = Snapshot::capture(id, self.token(symbol)?, self.height, at);
        debug!("📸 {} of {} at height {}", id, symbol, self.height);
        Ok(self.snapshots.insert(snapshot))
    }

    pub fn get_snapshot(&self, id: SnapshotId) -> Result<Arc<Snapshot>> {
        self.snapshots.get(id)
    }

    pub fn prune_snapshots(&mut self, before: u64) -> usize {
        let pruned = self.snapshots.prune(before);
        if pruned > 0 {
            info!("🧹 Pruned {} snapshots taken before {}", pruned, before);
        }
        pruned
    }

    /// Verify supply conservation and delegation acyclicity for every token
    pub fn check_invariants(&self) -> Result<()> {
        for token in self.tokens.values() {
            let held = token.sum_balances() + token.sum_locks();
            if held != token.total_supply as u128 {
                return Err(LedgerError::InvariantViolation(format!(
                    "{}: balances {} + locks {} != supply {}",
                    token.symbol(),
                    token.sum_balances(),
                    token.sum_locks(),
                    token.total_supply
                )));
            }
            if !token.delegations.is_acyclic() {
                return Err(LedgerError::InvariantViolation(format!(
                    "{}: delegation graph has a cycle",
                    token.symbol()
                )));
            }
        }
        Ok(())
    }

    pub fn audit_log(&self, symbol: &str) -> Result<&[LedgerEntry]> {
        Ok(self.token(symbol)?.audit_log())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use agora_core::{Participant, ParticipantRegistry};

    fn ledger() -> TokenLedger {
        let mut ledger = TokenLedger::new();
        ledger.create_token(TokenConfig::new("AGR").with_cap(1_000), 0).unwrap();
        ledger.mint("AGR", "alice", 100, "genesis", 0).unwrap();
        ledger
    }

    #[test]
    fn test_supply_cap() {
        let mut ledger = ledger();
        let err = ledger.mint("AGR", "bob", 901, "airdrop", 1).unwrap_err();
        assert!(matches!(err, LedgerError::Overflow { .. }));
        assert_eq!(ledger.total_supply("AGR").unwrap(), 100);
        assert_eq!(ledger.mint("AGR", "bob", 900, "airdrop", 1).unwrap(), 900);
    }

    #[test]
    fn test_transfer_is_atomic() {
        let mut ledger = ledger();
        let err = ledger.transfer("AGR", "alice", "bob", 101, 1).unwrap_err();
        assert_eq!(
            err,
            LedgerError::InsufficientBalance {
                required: 101,
                available: 100
            }
        );
        assert_eq!(ledger.balance("AGR", "bob").unwrap(), 0);

        ledger.transfer("AGR", "alice", "bob", 40, 2).unwrap();
        assert_eq!(ledger.balance("AGR", "alice").unwrap(), 60);
        assert_eq!(ledger.balance("AGR", "bob").unwrap(), 40);
        ledger.check_invariants().unwrap();
    }

    #[test]
    fn test_lock_release_time() {
        let mut ledger = ledger();
        let lock = ledger
            .lock("AGR", "alice", 30, LockPurpose::Staking, 50, 10)
            .unwrap();
        assert_eq!(ledger.balance("AGR", "alice").unwrap(), 70);
        assert_eq!(ledger.locked_balance("AGR", "alice").unwrap(), 30);
        ledger.check_invariants().unwrap();

        let err = ledger.unlock("AGR", lock, 49).unwrap_err();
        assert!(matches!(err, LedgerError::LockHeld { release_at: 50, .. }));
        assert_eq!(ledger.unlock("AGR", lock, 50).unwrap(), 30);
        assert_eq!(ledger.balance("AGR", "alice").unwrap(), 100);
        assert!(matches!(
            ledger.unlock("AGR", lock, 60),
            Err(LedgerError::UnknownLock(_))
        ));
    }

    #[test]
    fn test_disabled_feature() {
        let mut ledger = TokenLedger::new();
        ledger
            .create_token(TokenConfig::new("FIX").without(TokenFeature::Delegation), 0)
            .unwrap();
        let err = ledger
            .delegate("FIX", "a", "b", DelegationScope::All, 0)
            .unwrap_err();
        assert!(matches!(err, LedgerError::FeatureDisabled { .. }));
    }

    #[test]
    fn test_registry_gates_accounts() {
        let mut registry = ParticipantRegistry::new();
        registry.register(Participant::new("alice", vec![], 0)).unwrap();
        let mut ledger = TokenLedger::with_registry(registry.shared());
        ledger.create_token(TokenConfig::new("AGR"), 0).unwrap();

        assert!(ledger.mint("AGR", "alice", 5, "genesis", 0).is_ok());
        assert_eq!(
            ledger.mint("AGR", "mallory", 5, "genesis", 0),
            Err(LedgerError::UnknownParticipant("mallory".into()))
        );
    }

    #[test]
    fn test_snapshot_is_immutable_and_prunable() {
        let mut ledger = ledger();
        let snapshot = ledger.snapshot("AGR", 5).unwrap();
        ledger.transfer("AGR", "alice", "bob", 50, 6).unwrap();
        ledger
            .delegate("AGR", "alice", "bob", DelegationScope::All, 7)
            .unwrap();

        assert_eq!(snapshot.balance("alice"), 100);
        assert!(snapshot.delegations().is_empty());

        assert_eq!(ledger.prune_snapshots(6), 1);
        assert_eq!(
            ledger.get_snapshot(snapshot.id),
            Err(LedgerError::SnapshotExpired(snapshot.id.0))
        );
        // the vote's own handle is unaffected
        assert_eq!(snapshot.balance("alice"), 100);
    }

    #[test]
    fn test_audit_log_records_operations() {
        let mut ledger = ledger();
        ledger.transfer("AGR", "alice", "bob", 1, 1).unwrap();
        let log = ledger.audit_log("AGR").unwrap();
        assert_eq!(log.len(), 2);
        assert!(matches!(log[1].op, LedgerOp::Transfer { amount: 1, .. }));
        assert!(log[0].height < log[1].height);
    }
}
