//! Consensus engine
//!
//! Owns the validator registry and every round. Incoming messages are
//! checked for membership and signature, screened for equivocation, logged
//! on their round and folded into the round's mechanism. Every step is
//! published as a [`SystemEvent`].

use crate::byzantine::{EquivocationDetector, Evidence, Observation};
use crate::errors::{ConfigError, ConsensusError, ConsensusResult};
use crate::mechanisms::RoundSpec;
use crate::message::{ConsensusMessage, MessageOutcome, RoundCheck, TimeoutOutcome};
use crate::round::{LoggedMessage, Round, RoundStatus};
use crate::validator::{Validator, ValidatorSet};
use agora_core::{EventSink, ParticipantId, RoundId, SignatureVerifier, SignedMessage, SystemEvent};
use dashmap::DashMap;
use log::{info, warn};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Engine configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Time a round gets before its first timeout
    pub consensus_timeout_ms: u64,
    /// Extra time granted per view change
    pub view_change_timeout_ms: u64,
    pub max_validators: usize,
    /// Views a round may go through before it times out for good
    pub max_views: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            consensus_timeout_ms: 30_000,
            view_change_timeout_ms: 10_000,
            max_validators: 100,
            max_views: 10,
        }
    }
}

impl EngineConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.consensus_timeout_ms == 0 || self.view_change_timeout_ms == 0 {
            return Err(ConfigError::TimeoutCannotBeZero);
        }
        if self.max_validators == 0 {
            return Err(ConfigError::InvalidValidatorLimit);
        }
        if self.max_views == 0 {
            return Err(ConfigError::InvalidViewLimit);
        }
        Ok(())
    }

    /// Timeout for a round in `view`: `consensus_timeout + view * view_change_timeout`
    pub fn timeout_for(&self, view: u64) -> u64 {
        self.consensus_timeout_ms
            .saturating_add(view.saturating_mul(self.view_change_timeout_ms))
    }
}

/// Point-in-time view of a round
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoundReport {
    pub id: RoundId,
    pub mechanism: String,
    pub status: RoundStatus,
    pub view: u64,
    pub leader: Option<ParticipantId>,
    pub validators: usize,
    pub messages: usize,
    pub started_at: u64,
    pub deadline: u64,
    pub decision: Option<String>,
    pub evidence: usize,
}

pub struct ConsensusEngine {
    config: EngineConfig,
    validators: RwLock<ValidatorSet>,
    rounds: DashMap<RoundId, Round>,
    next_round: AtomicU64,
    detector: EquivocationDetector,
    verifier: Arc<dyn SignatureVerifier>,
    events: Arc<dyn EventSink>,
}

impl ConsensusEngine {
    pub fn new(
        config: EngineConfig,
        verifier: Arc<dyn SignatureVerifier>,
        events: Arc<dyn EventSink>,
    ) -> ConsensusResult<Self> {
        config.validate()?;
        let validators = ValidatorSet::with_limit(config.max_validators);
        Ok(Self {
            config,
            validators: RwLock::new(validators),
            rounds: DashMap::new(),
            next_round: AtomicU64::new(1),
            detector: EquivocationDetector::new(),
            verifier,
            events,
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn register_validator(&self, validator: Validator, now: u64) -> ConsensusResult<()> {
        let id = validator.id.clone();
        let stake = validator.stake;
        self.validators.write().register(validator)?;
        info!("➕ Validator {} registered with stake {}", id, stake);
        self.events.publish(
            now,
            SystemEvent::ValidatorRegistered {
                validator: id,
                stake,
            },
        );
        Ok(())
    }

    /// Returns the previous stake
    pub fn update_stake(&self, id: &str, stake: u64, now: u64) -> ConsensusResult<u64> {
        let previous = self.validators.write().update_stake(id, stake)?;
        self.events.publish(
            now,
            SystemEvent::ValidatorStakeUpdated {
                validator: id.into(),
                stake,
            },
        );
        Ok(previous)
    }

    pub fn set_authority(&self, id: &str, authority: bool) -> ConsensusResult<()> {
        self.validators.write().set_authority(id, authority)
    }

    pub fn deactivate_validator(&self, id: &str) -> ConsensusResult<()> {
        self.validators.write().deactivate(id)?;
        warn!("➖ Validator {} deactivated", id);
        Ok(())
    }

    pub fn validators(&self) -> ValidatorSet {
        self.validators.read().clone()
    }

    /// Start a round over the registered validators
    pub fn start_round(&self, spec: RoundSpec, now: u64) -> ConsensusResult<RoundId> {
        let validators = self.validators.read().snapshot();
        self.start_round_with(spec, validators, now)
    }

    /// Start a round over an explicit validator set
    pub fn start_round_with(
        &self,
        mut spec: RoundSpec,
        validators: ValidatorSet,
        now: u64,
    ) -> ConsensusResult<RoundId> {
        let seq = self.next_round.fetch_add(1, Ordering::SeqCst);
        let id = RoundId::new(format!("round-{}", seq));
        let deadline = now.saturating_add(self.config.timeout_for(0));
        spec.max_views.get_or_insert(self.config.max_views);
        let round = Round::new(id.clone(), spec, validators, now, deadline)?;

        info!(
            "🏁 {} started: {} over {} validators for {}",
            id,
            round.mechanism(),
            round.validators().active_count(),
            round.spec.value
        );
        self.events.publish(
            now,
            SystemEvent::ConsensusRoundStarted {
                round: id.clone(),
                mechanism: round.mechanism().to_string(),
                validators: round.validators().active_count(),
            },
        );
        self.rounds.insert(id.clone(), round);
        Ok(id)
    }

    /// Verify, screen and apply one signed message
    pub fn submit(
        &self,
        round_id: &RoundId,
        signed: SignedMessage<ConsensusMessage>,
        now: u64,
    ) -> ConsensusResult<MessageOutcome> {
        let mut round = self
            .rounds
            .get_mut(round_id)
            .ok_or_else(|| ConsensusError::UnknownRound(round_id.to_string()))?;
        let sender = signed.sender.clone();
        let kind = signed.payload.kind();

        let Some(public_key) = round
            .validators()
            .get(sender.as_str())
            .filter(|v| v.active)
            .map(|v| v.public_key.clone())
        else {
            round.record_rejected(&sender, signed.payload, "not a round validator", now);
            drop(round);
            self.publish_message(round_id, &sender, kind, false, now);
            warn!("🚫 {} rejected message from non-validator {}", round_id, sender);
            return Err(ConsensusError::UnauthorizedValidator(sender.to_string()));
        };

        let verified = signed
            .signing_bytes()
            .map(|bytes| self.verifier.verify(&public_key, &bytes, &signed.signature))
            .unwrap_or(false);
        if !verified {
            round.record_rejected(&sender, signed.payload, "invalid signature", now);
            drop(round);
            self.publish_message(round_id, &sender, kind, false, now);
            return Err(ConsensusError::InvalidSignature {
                sender: sender.to_string(),
                scheme: self.verifier.scheme().to_string(),
            });
        }

        let was_final = round.status().is_terminal();
        let outcome = if was_final {
            round.on_message(&sender, signed.payload, now)
        } else {
            match self.detector.observe(round_id, &sender, &signed.payload) {
                Observation::Fresh => round.on_message(&sender, signed.payload, now),
                Observation::Duplicate => {
                    round.record_rejected(&sender, signed.payload, "duplicate message", now);
                    MessageOutcome::rejected("duplicate message")
                }
                Observation::Equivocation(_) => {
                    round.record_rejected(&sender, signed.payload, "equivocation", now);
                    MessageOutcome::rejected("equivocation")
                }
            }
        };

        let finalized_now = !was_final && round.status() == RoundStatus::Finalized;
        let check = round.check();
        let view = round.view();
        drop(round);

        self.publish_message(round_id, &sender, kind, outcome.is_accepted(), now);
        if finalized_now {
            self.finalize(round_id, &check, view, now);
        }
        Ok(outcome)
    }

    fn publish_message(&self, round: &RoundId, sender: &ParticipantId, kind: &str, accepted: bool, now: u64) {
        self.events.publish(
            now,
            SystemEvent::ConsensusMessage {
                round: round.clone(),
                sender: sender.clone(),
                message: kind.to_string(),
                accepted,
            },
        );
    }

    fn finalize(&self, round: &RoundId, check: &RoundCheck, view: u64, now: u64) {
        info!(
            "✅ {} finalized in view {}: {:?}",
            round,
            view,
            check.decision()
        );
        self.detector.clear_round(round);
        self.events.publish(
            now,
            SystemEvent::ConsensusFinalized {
                round: round.clone(),
                decision: check.decision().map(str::to_string),
                view,
            },
        );
    }

    /// Round result with any equivocation evidence attached
    pub fn check(&self, round_id: &RoundId) -> ConsensusResult<RoundCheck> {
        let round = self
            .rounds
            .get(round_id)
            .ok_or_else(|| ConsensusError::UnknownRound(round_id.to_string()))?;
        let mut check = round.check();
        check.evidence = self.detector.evidence_for(round_id);
        Ok(check)
    }

    /// Fire the round's timeout now
    pub fn on_timeout(&self, round_id: &RoundId, now: u64) -> ConsensusResult<TimeoutOutcome> {
        let mut round = self
            .rounds
            .get_mut(round_id)
            .ok_or_else(|| ConsensusError::UnknownRound(round_id.to_string()))?;
        let was_final = round.status().is_terminal();
        let outcome = round.on_timeout(now);
        if outcome.view_change {
            round.set_deadline(now.saturating_add(self.config.timeout_for(outcome.view)));
        }
        let finalized_now = !was_final && round.status() == RoundStatus::Finalized;
        let check = round.check();
        drop(round);

        if was_final {
            return Ok(outcome);
        }
        warn!(
            "⏰ {} timed out (view {}, view change: {})",
            round_id, outcome.view, outcome.view_change
        );
        self.events.publish(
            now,
            SystemEvent::ConsensusTimeout {
                round: round_id.clone(),
                view: outcome.view,
                view_change: outcome.view_change,
            },
        );
        if finalized_now {
            self.finalize(round_id, &check, outcome.view, now);
        }
        Ok(outcome)
    }

    /// Fire every progressing round whose deadline has passed
    pub fn tick(&self, now: u64) -> Vec<(RoundId, TimeoutOutcome)> {
        let due: Vec<RoundId> = self
            .rounds
            .iter()
            .filter(|r| r.status() == RoundStatus::Progressing && r.deadline() <= now)
            .map(|r| r.key().clone())
            .collect();

        let mut fired = Vec::new();
        for id in due {
            if let Ok(outcome) = self.on_timeout(&id, now) {
                fired.push((id, outcome));
            }
        }
        fired
    }

    pub fn status(&self, round_id: &RoundId) -> ConsensusResult<RoundReport> {
        let round = self
            .rounds
            .get(round_id)
            .ok_or_else(|| ConsensusError::UnknownRound(round_id.to_string()))?;
        let check = round.check();
        Ok(RoundReport {
            id: round_id.clone(),
            mechanism: round.mechanism().to_string(),
            status: round.status(),
            view: round.view(),
            leader: round.leader(),
            validators: round.validators().active_count(),
            messages: round.log().len(),
            started_at: round.started_at,
            deadline: round.deadline(),
            decision: check.decision().map(str::to_string),
            evidence: self.detector.evidence_for(round_id).len(),
        })
    }

    pub fn round_log(&self, round_id: &RoundId) -> ConsensusResult<Vec<LoggedMessage>> {
        self.rounds
            .get(round_id)
            .map(|r| r.log().to_vec())
            .ok_or_else(|| ConsensusError::UnknownRound(round_id.to_string()))
    }

    pub fn round_ids(&self) -> Vec<RoundId> {
        let mut ids: Vec<RoundId> = self.rounds.iter().map(|r| r.key().clone()).collect();
        ids.sort();
        ids
    }

    pub fn active_rounds(&self) -> usize {
        self.rounds
            .iter()
            .filter(|r| r.status() == RoundStatus::Progressing)
            .count()
    }

    /// Earliest deadline among progressing rounds
    pub fn next_deadline(&self) -> Option<u64> {
        self.rounds
            .iter()
            .filter(|r| r.status() == RoundStatus::Progressing)
            .map(|r| r.deadline())
            .min()
    }

    pub fn evidence(&self, round_id: &RoundId) -> Vec<Evidence> {
        self.detector.evidence_for(round_id)
    }

    pub fn offenders(&self) -> Vec<ParticipantId> {
        self.detector.offenders()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mechanisms::ConsensusMechanism;
    use crate::message::VotePhase;
    use agora_core::{AcceptAllVerifier, Ed25519Verifier, EventLog};
    use ed25519_dalek::{Signer, SigningKey};

    fn engine_with(verifier: Arc<dyn SignatureVerifier>) -> (ConsensusEngine, Arc<EventLog>) {
        let log = Arc::new(EventLog::new());
        let engine = ConsensusEngine::new(EngineConfig::default(), verifier, log.clone()).unwrap();
        (engine, log)
    }

    fn commit(view: u64, value: &str) -> ConsensusMessage {
        ConsensusMessage::PhaseVote {
            view,
            phase: VotePhase::Commit,
            value: value.into(),
        }
    }

    #[test]
    fn test_config_validation() {
        let config = EngineConfig {
            consensus_timeout_ms: 0,
            ..EngineConfig::default()
        };
        assert_eq!(config.validate(), Err(ConfigError::TimeoutCannotBeZero));
        assert_eq!(EngineConfig::default().timeout_for(2), 50_000);
        let config = EngineConfig {
            max_views: 0,
            ..EngineConfig::default()
        };
        assert_eq!(config.validate(), Err(ConfigError::InvalidViewLimit));
    }

    #[test]
    fn test_non_validator_unauthorized() {
        let (engine, log) = engine_with(Arc::new(AcceptAllVerifier));
        engine.register_validator(Validator::new("v1", 10), 0).unwrap();
        let round = engine
            .start_round(RoundSpec::new(ConsensusMechanism::ProofOfStake, "x"), 0)
            .unwrap();
        let result = engine.submit(
            &round,
            SignedMessage::unsigned(
                "eve",
                ConsensusMessage::Vote {
                    value: "x".into(),
                    approve: true,
                },
            ),
            1,
        );
        assert!(matches!(result, Err(ConsensusError::UnauthorizedValidator(_))));
        assert_eq!(engine.round_log(&round).unwrap().len(), 1);
        assert_eq!(log.count("consensus-message"), 1);
    }

    #[test]
    fn test_signatures_checked_against_validator_keys() {
        let (engine, _) = engine_with(Arc::new(Ed25519Verifier));
        let key = SigningKey::from_bytes(&[7u8; 32]);
        engine
            .register_validator(
                Validator::new("v1", 10).with_key(key.verifying_key().to_bytes().to_vec()),
                0,
            )
            .unwrap();
        let round = engine
            .start_round(RoundSpec::new(ConsensusMechanism::ProofOfStake, "x"), 0)
            .unwrap();
        let payload = ConsensusMessage::Vote {
            value: "x".into(),
            approve: true,
        };

        let forged = SignedMessage::new("v1", payload.clone(), vec![0u8; 64]);
        assert!(matches!(
            engine.submit(&round, forged, 1),
            Err(ConsensusError::InvalidSignature { .. })
        ));

        let mut signed = SignedMessage::unsigned("v1", payload);
        let bytes = signed.signing_bytes().unwrap();
        signed.signature = key.sign(&bytes).to_bytes().to_vec();
        assert!(engine.submit(&round, signed, 2).unwrap().is_accepted());
        assert_eq!(engine.check(&round).unwrap().decision(), Some("x"));
    }

    #[test]
    fn test_equivocation_recorded_as_evidence() {
        let (engine, _) = engine_with(Arc::new(AcceptAllVerifier));
        for id in ["v1", "v2", "v3", "v4"] {
            engine.register_validator(Validator::new(id, 1), 0).unwrap();
        }
        let round = engine
            .start_round(RoundSpec::new(ConsensusMechanism::Pbft, "p"), 0)
            .unwrap();
        let propose = ConsensusMessage::Propose {
            view: 0,
            value: "p".into(),
            justify: None,
        };
        engine.submit(&round, SignedMessage::unsigned("v1", propose), 1).unwrap();
        assert!(engine
            .submit(&round, SignedMessage::unsigned("v2", commit(0, "p")), 2)
            .unwrap()
            .is_accepted());
        let outcome = engine
            .submit(&round, SignedMessage::unsigned("v2", commit(0, "q")), 3)
            .unwrap();
        assert_eq!(outcome.reason(), Some("equivocation"));
        let check = engine.check(&round).unwrap();
        assert_eq!(check.evidence.len(), 1);
        assert_eq!(engine.offenders(), vec![ParticipantId::from("v2")]);
    }

    #[test]
    fn test_tick_fires_due_rounds_and_extends_deadline() {
        let (engine, log) = engine_with(Arc::new(AcceptAllVerifier));
        for id in ["v1", "v2", "v3", "v4"] {
            engine.register_validator(Validator::new(id, 1), 0).unwrap();
        }
        let round = engine
            .start_round(RoundSpec::new(ConsensusMechanism::Pbft, "p"), 0)
            .unwrap();
        assert!(engine.tick(29_999).is_empty());
        let fired = engine.tick(30_000);
        assert_eq!(fired.len(), 1);
        assert!(fired[0].1.view_change);

        let report = engine.status(&round).unwrap();
        assert_eq!(report.view, 1);
        assert_eq!(report.leader, Some(ParticipantId::from("v2")));
        assert_eq!(report.deadline, 30_000 + 40_000);
        assert!(log.names().contains(&"consensus-timeout"));
    }
}
