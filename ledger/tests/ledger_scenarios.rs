use agora_core::Score;
use agora_ledger::{
    DelegationChange, DelegationScope, LedgerError, LockPurpose, PowerContext, PowerRules,
    TokenConfig, TokenLedger, VotingPower,
};

fn ledger_with(holders: &[(&str, u64)]) -> TokenLedger {
    let mut ledger = TokenLedger::new();
    ledger.create_token(TokenConfig::new("AGR"), 0).unwrap();
    for (holder, amount) in holders {
        ledger.mint("AGR", holder, *amount, "genesis", 0).unwrap();
    }
    ledger
}

#[test]
fn test_mint_then_burn_restores_balances() {
    let mut ledger = ledger_with(&[("alice", 100), ("bob", 50)]);
    let supply = ledger.total_supply("AGR").unwrap();

    ledger.mint("AGR", "alice", 25, "grant", 1).unwrap();
    assert_eq!(ledger.balance("AGR", "alice").unwrap(), 125);
    ledger.burn("AGR", "alice", 25, "clawback", 2).unwrap();

    assert_eq!(ledger.balance("AGR", "alice").unwrap(), 100);
    assert_eq!(ledger.balance("AGR", "bob").unwrap(), 50);
    assert_eq!(ledger.total_supply("AGR").unwrap(), supply);
    ledger.check_invariants().unwrap();
}

#[test]
fn test_burn_more_than_held_fails() {
    let mut ledger = ledger_with(&[("alice", 10)]);
    let err = ledger.burn("AGR", "alice", 11, "oops", 1).unwrap_err();
    assert_eq!(
        err,
        LedgerError::InsufficientBalance {
            required: 11,
            available: 10
        }
    );
    assert_eq!(ledger.total_supply("AGR").unwrap(), 10);
}

#[test]
fn test_delegation_cycle_rejected() {
    let mut ledger = ledger_with(&[("a", 10), ("b", 10), ("c", 10)]);
    ledger.delegate("AGR", "a", "b", DelegationScope::All, 1).unwrap();
    ledger.delegate("AGR", "b", "c", DelegationScope::All, 2).unwrap();
    let before = ledger.token("AGR").unwrap().delegations().clone();
    let height = ledger.height();

    let err = ledger
        .delegate("AGR", "c", "a", DelegationScope::All, 3)
        .unwrap_err();
    assert_eq!(
        err,
        LedgerError::DelegationCycle {
            delegator: "c".into(),
            delegate: "a".into()
        }
    );

    // ledger unchanged
    assert_eq!(ledger.token("AGR").unwrap().delegations(), &before);
    assert_eq!(ledger.height(), height);
    ledger.check_invariants().unwrap();
}

#[test]
fn test_self_delegation_restores_own_power() {
    let mut ledger = ledger_with(&[("a", 40), ("b", 60)]);
    let rules = PowerRules::linear();
    let ctx = PowerContext::new(10);

    let change = ledger.delegate("AGR", "a", "b", DelegationScope::All, 1).unwrap();
    assert_eq!(change, DelegationChange::Created);
    let delegated = ledger.snapshot("AGR", 2).unwrap();
    let calc = VotingPower::new(&delegated, &rules, &ctx);
    assert_eq!(calc.power("a"), Score::ZERO);
    assert_eq!(calc.power("b"), Score::from_units(100));

    let change = ledger.delegate("AGR", "a", "a", DelegationScope::All, 3).unwrap();
    assert_eq!(
        change,
        DelegationChange::Revoked {
            previous: Some("b".into())
        }
    );
    let restored = ledger.snapshot("AGR", 4).unwrap();
    let calc = VotingPower::new(&restored, &rules, &ctx);
    assert_eq!(calc.power("a"), Score::from_units(40));
    assert_eq!(calc.power("b"), Score::from_units(60));
}

#[test]
fn test_topic_scoped_delegation_only_applies_to_topic() {
    let mut ledger = ledger_with(&[("a", 30), ("b", 70)]);
    ledger
        .delegate("AGR", "a", "b", DelegationScope::topic("treasury"), 1)
        .unwrap();
    let snapshot = ledger.snapshot("AGR", 2).unwrap();
    let rules = PowerRules::linear();

    let treasury = PowerContext::new(2).with_topic(Some("treasury".into()));
    let calc = VotingPower::new(&snapshot, &rules, &treasury);
    assert_eq!(calc.power("b"), Score::from_units(100));

    let other = PowerContext::new(2).with_topic(Some("upgrades".into()));
    let calc = VotingPower::new(&snapshot, &rules, &other);
    assert_eq!(calc.power("b"), Score::from_units(70));
    assert_eq!(calc.power("a"), Score::from_units(30));
}

#[test]
fn test_supply_conserved_across_operations() {
    let mut ledger = ledger_with(&[("alice", 500), ("bob", 200)]);
    let stake = ledger
        .lock("AGR", "alice", 100, LockPurpose::Staking, 10, 0)
        .unwrap();
    ledger
        .lock("AGR", "bob", 50, LockPurpose::ProposalBond, 0, 1)
        .unwrap();
    ledger.transfer("AGR", "bob", "carol", 25, 2).unwrap();
    ledger.burn("AGR", "carol", 5, "fee", 3).unwrap();
    ledger.check_invariants().unwrap();

    ledger.unlock("AGR", stake, 10).unwrap();
    ledger.check_invariants().unwrap();
    assert_eq!(ledger.total_supply("AGR").unwrap(), 695);
}
