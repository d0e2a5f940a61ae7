use agora_core::{ErrorKind, GovernanceError};
use agora_treasury::*;

#[test]
fn test_treasury_basic_flow() {
    let mut pool = TreasuryPool::new();

    pool.deposit("AGR", "alice", 500, TreasurySource::Contribution, None, 1)
        .unwrap();
    pool.deposit("USD", "bob", 70, TreasurySource::Contribution, Some("seed".into()), 2)
        .unwrap();
    pool.deposit("AGR", "carol", 100, TreasurySource::ForfeitedBond, None, 3)
        .unwrap();
    assert_eq!(pool.balance("AGR"), 600);
    assert_eq!(pool.balance("USD"), 70);

    pool.withdraw("AGR", "dave", 250, "gov-1/prop-3", Some("grant".into()), 4)
        .unwrap();
    assert_eq!(pool.balance("AGR"), 350);
    assert_eq!(pool.transactions().len(), 4);
    pool.check_invariants().unwrap();
}

#[test]
fn test_errors_map_into_governance_errors() {
    let mut pool = TreasuryPool::new();
    let err: GovernanceError = pool
        .withdraw("AGR", "dave", 1, "gov-1/prop-3", None, 0)
        .unwrap_err()
        .into();
    assert_eq!(
        err,
        GovernanceError::InsufficientBalance {
            required: 1,
            available: 0
        }
    );

    let err: GovernanceError = TreasuryError::Inconsistent("AGR".into()).into();
    assert_eq!(err.kind(), ErrorKind::InvariantViolation);
}

#[test]
fn test_log_serializes() {
    let mut pool = TreasuryPool::new();
    pool.deposit("AGR", "alice", 5, TreasurySource::Contribution, None, 1)
        .unwrap();
    let json = serde_json::to_string(&pool).unwrap();
    let restored: TreasuryPool = serde_json::from_str(&json).unwrap();
    assert_eq!(restored, pool);
}
