//! End-to-end consensus rounds through the engine

use agora_consensus::{
    ConsensusEngine, ConsensusMechanism, ConsensusMessage, EngineConfig, RoundSpec, RoundStatus,
    Validator, Verdict, VotePhase,
};
use agora_core::{AcceptAllVerifier, EventLog, RoundId, SignedMessage};
use std::sync::Arc;

fn engine(ids: &[&str]) -> (ConsensusEngine, Arc<EventLog>) {
    let log = Arc::new(EventLog::new());
    let engine =
        ConsensusEngine::new(EngineConfig::default(), Arc::new(AcceptAllVerifier), log.clone())
            .unwrap();
    for id in ids {
        engine.register_validator(Validator::new(*id, 10), 0).unwrap();
    }
    (engine, log)
}

fn send(engine: &ConsensusEngine, round: &RoundId, sender: &str, message: ConsensusMessage) -> bool {
    engine
        .submit(round, SignedMessage::unsigned(sender, message), 1)
        .unwrap()
        .is_accepted()
}

fn phase(phase: VotePhase, value: &str) -> ConsensusMessage {
    ConsensusMessage::PhaseVote {
        view: 0,
        phase,
        value: value.into(),
    }
}

#[test]
fn test_pbft_happy_path_rejects_late_commit() {
    let (engine, log) = engine(&["n1", "n2", "n3", "n4"]);
    let round = engine
        .start_round(RoundSpec::new(ConsensusMechanism::Pbft, "proposal"), 0)
        .unwrap();

    let pre_prepare = ConsensusMessage::Propose {
        view: 0,
        value: "proposal".into(),
        justify: None,
    };
    assert!(send(&engine, &round, "n1", pre_prepare));
    for id in ["n1", "n2", "n3"] {
        assert!(send(&engine, &round, id, phase(VotePhase::Prepare, "proposal")));
    }
    for id in ["n1", "n2", "n3"] {
        assert!(send(&engine, &round, id, phase(VotePhase::Commit, "proposal")));
    }

    let check = engine.check(&round).unwrap();
    assert!(check.finalized);
    assert_eq!(check.decision(), Some("proposal"));

    let late = engine
        .submit(
            &round,
            SignedMessage::unsigned("n4", phase(VotePhase::Commit, "proposal")),
            2,
        )
        .unwrap();
    assert_eq!(late.reason(), Some("round finalized"));
    assert_eq!(engine.check(&round).unwrap(), check);
    assert_eq!(log.count("consensus-finalized"), 1);
    assert_eq!(engine.status(&round).unwrap().status, RoundStatus::Finalized);
}

#[test]
fn test_pbft_three_validators_behaves_like_unanimity() {
    let (engine, _) = engine(&["a", "b", "c"]);
    let round = engine
        .start_round(RoundSpec::new(ConsensusMechanism::Pbft, "v"), 0)
        .unwrap();
    send(
        &engine,
        &round,
        "a",
        ConsensusMessage::Propose {
            view: 0,
            value: "v".into(),
            justify: None,
        },
    );
    for id in ["a", "b"] {
        send(&engine, &round, id, phase(VotePhase::Prepare, "v"));
        send(&engine, &round, id, phase(VotePhase::Commit, "v"));
    }
    assert!(!engine.check(&round).unwrap().finalized);

    send(&engine, &round, "c", phase(VotePhase::Prepare, "v"));
    send(&engine, &round, "c", phase(VotePhase::Commit, "v"));
    assert_eq!(engine.check(&round).unwrap().decision(), Some("v"));
}

#[test]
fn test_pbft_view_change_then_commit() {
    let (engine, log) = engine(&["n1", "n2", "n3", "n4"]);
    let round = engine
        .start_round(RoundSpec::new(ConsensusMechanism::Pbft, "p"), 0)
        .unwrap();

    // primary n1 stays silent
    let fired = engine.tick(30_000);
    assert_eq!(fired.len(), 1);
    assert_eq!(engine.status(&round).unwrap().leader.unwrap().as_str(), "n2");

    let pre_prepare = ConsensusMessage::Propose {
        view: 1,
        value: "p".into(),
        justify: None,
    };
    assert!(send(&engine, &round, "n2", pre_prepare));
    for id in ["n2", "n3", "n4"] {
        for p in [VotePhase::Prepare, VotePhase::Commit] {
            let message = ConsensusMessage::PhaseVote {
                view: 1,
                phase: p,
                value: "p".into(),
            };
            assert!(send(&engine, &round, id, message));
        }
    }
    let check = engine.check(&round).unwrap();
    assert_eq!(check.verdict, Some(Verdict::Commit("p".into())));
    assert_eq!(log.count("consensus-timeout"), 1);
}

#[test]
fn test_proof_of_stake_timeout_reports_tally() {
    let (engine, log) = engine(&[]);
    engine.register_validator(Validator::new("big", 60), 0).unwrap();
    engine.register_validator(Validator::new("small", 40), 0).unwrap();
    let round = engine
        .start_round(RoundSpec::new(ConsensusMechanism::ProofOfStake, "x"), 0)
        .unwrap();
    send(
        &engine,
        &round,
        "big",
        ConsensusMessage::Vote {
            value: "x".into(),
            approve: true,
        },
    );
    let outcome = engine.on_timeout(&round, 30_000).unwrap();
    assert!(!outcome.view_change);
    assert_eq!(outcome.verdict, None);
    assert_eq!(outcome.tally.get("x"), Some(&60));
    assert_eq!(engine.status(&round).unwrap().status, RoundStatus::TimedOut);
    assert_eq!(engine.active_rounds(), 0);
    assert_eq!(log.count("consensus-finalized"), 0);
}

#[test]
fn test_round_membership_frozen_at_start() {
    let (engine, _) = engine(&["v1", "v2"]);
    let round = engine
        .start_round(RoundSpec::new(ConsensusMechanism::ProofOfStake, "x"), 0)
        .unwrap();
    engine.register_validator(Validator::new("late", 1_000), 5).unwrap();
    let result = engine.submit(
        &round,
        SignedMessage::unsigned(
            "late",
            ConsensusMessage::Vote {
                value: "x".into(),
                approve: true,
            },
        ),
        6,
    );
    assert!(result.is_err());
    assert_eq!(engine.status(&round).unwrap().validators, 2);
}
