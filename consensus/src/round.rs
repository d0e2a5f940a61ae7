//! Consensus round
//!
//! Wraps a mechanism's state with the round's frozen validator set, its
//! message log and its lifecycle. Finalization is monotone: once a round is
//! finalized or timed out, no message changes it.

use crate::errors::ConsensusResult;
use crate::mechanisms::{self, RoundProtocol, RoundSpec};
use crate::message::{ConsensusMessage, MessageOutcome, RoundCheck, TimeoutOutcome};
use crate::validator::ValidatorSet;
use agora_core::{ParticipantId, RoundId};
use log::warn;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RoundStatus {
    Progressing,
    Finalized,
    TimedOut,
}

impl RoundStatus {
    pub fn is_terminal(self) -> bool {
        !matches!(self, RoundStatus::Progressing)
    }
}

/// One received message and what the round made of it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoggedMessage {
    pub seq: u64,
    pub at: u64,
    pub view: u64,
    pub sender: ParticipantId,
    pub message: ConsensusMessage,
    pub outcome: MessageOutcome,
}

#[derive(Debug)]
pub struct Round {
    pub id: RoundId,
    pub spec: RoundSpec,
    pub started_at: u64,
    validators: ValidatorSet,
    protocol: Box<dyn RoundProtocol>,
    status: RoundStatus,
    log: Vec<LoggedMessage>,
    result: Option<RoundCheck>,
    deadline: u64,
}

impl Round {
    pub fn new(
        id: RoundId,
        spec: RoundSpec,
        validators: ValidatorSet,
        started_at: u64,
        deadline: u64,
    ) -> ConsensusResult<Self> {
        let validators = validators.snapshot();
        let protocol = mechanisms::init(&spec, &validators)?;
        Ok(Self {
            id,
            spec,
            started_at,
            validators,
            protocol,
            status: RoundStatus::Progressing,
            log: Vec::new(),
            result: None,
            deadline,
        })
    }

    pub fn status(&self) -> RoundStatus {
        self.status
    }

    pub fn is_member(&self, id: &str) -> bool {
        self.validators.is_active(id)
    }

    pub fn validators(&self) -> &ValidatorSet {
        &self.validators
    }

    pub fn view(&self) -> u64 {
        self.protocol.view()
    }

    pub fn leader(&self) -> Option<ParticipantId> {
        self.protocol.leader()
    }

    pub fn mechanism(&self) -> &'static str {
        self.protocol.name()
    }

    pub fn log(&self) -> &[LoggedMessage] {
        &self.log
    }

    pub fn deadline(&self) -> u64 {
        self.deadline
    }

    pub fn set_deadline(&mut self, deadline: u64) {
        self.deadline = deadline;
    }

    /// Fold a message into the round and log it
    pub fn on_message(
        &mut self,
        sender: &ParticipantId,
        message: ConsensusMessage,
        now: u64,
    ) -> MessageOutcome {
        let outcome = match self.status {
            RoundStatus::Finalized => MessageOutcome::rejected("round finalized"),
            RoundStatus::TimedOut => MessageOutcome::rejected("round timed out"),
            RoundStatus::Progressing if !self.is_member(sender.as_str()) => {
                MessageOutcome::rejected("not a round validator")
            }
            RoundStatus::Progressing => {
                self.protocol
                    .on_message(&self.validators, sender, &message, now)
            }
        };
        self.record(sender, message, outcome.clone(), now);

        if outcome.is_accepted() {
            let check = self.protocol.check();
            if check.finalized {
                self.status = RoundStatus::Finalized;
                self.result = Some(check);
            }
        }
        outcome
    }

    /// Log a message that was refused before reaching the mechanism
    pub fn record_rejected(&mut self, sender: &ParticipantId, message: ConsensusMessage, reason: &str, now: u64) {
        self.record(sender, message, MessageOutcome::rejected(reason), now);
    }

    fn record(&mut self, sender: &ParticipantId, message: ConsensusMessage, outcome: MessageOutcome, now: u64) {
        let seq = self.log.len() as u64;
        self.log.push(LoggedMessage {
            seq,
            at: now,
            view: self.protocol.view(),
            sender: sender.clone(),
            message,
            outcome,
        });
    }

    /// Latest result; frozen once the round is finalized
    pub fn check(&self) -> RoundCheck {
        match &self.result {
            Some(result) => result.clone(),
            None => self.protocol.check(),
        }
    }

    fn out_of_views(&self, view: u64) -> bool {
        self.spec.max_views.is_some_and(|max| view >= max)
    }

    pub fn on_timeout(&mut self, now: u64) -> TimeoutOutcome {
        if self.status.is_terminal() {
            return TimeoutOutcome {
                view: self.protocol.view(),
                view_change: false,
                verdict: self.result.as_ref().and_then(|r| r.verdict.clone()),
                tally: Default::default(),
            };
        }
        let mut outcome = self.protocol.on_timeout(&self.validators, now);
        if outcome.verdict.is_none() && outcome.view_change && self.out_of_views(outcome.view) {
            warn!("🛑 {} gave up after {} views", self.id, outcome.view);
            outcome.view_change = false;
        }
        if outcome.verdict.is_some() {
            self.status = RoundStatus::Finalized;
            self.result = Some(self.protocol.check());
        } else if !outcome.view_change {
            self.status = RoundStatus::TimedOut;
            self.result = Some(RoundCheck {
                finalized: false,
                verdict: None,
                evidence: Vec::new(),
            });
        }
        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mechanisms::ConsensusMechanism;
    use crate::validator::Validator;

    fn round(mechanism: ConsensusMechanism) -> Round {
        let validators = ValidatorSet::from_validators([
            Validator::new("v1", 50),
            Validator::new("v2", 30),
            Validator::new("v3", 20),
        ])
        .unwrap();
        Round::new(
            "round-1".into(),
            RoundSpec::new(mechanism, "value"),
            validators,
            0,
            1_000,
        )
        .unwrap()
    }

    fn vote() -> ConsensusMessage {
        ConsensusMessage::Vote {
            value: "value".into(),
            approve: true,
        }
    }

    #[test]
    fn test_finalized_round_rejects_messages() {
        let mut round = round(ConsensusMechanism::ProofOfStake);
        round.on_message(&"v1".into(), vote(), 1);
        round.on_message(&"v2".into(), vote(), 2);
        assert_eq!(round.status(), RoundStatus::Finalized);
        let decision = round.check();

        let late = round.on_message(&"v3".into(), vote(), 3);
        assert_eq!(late.reason(), Some("round finalized"));
        assert_eq!(round.check(), decision);
        assert_eq!(round.log().len(), 3);
    }

    #[test]
    fn test_outsider_rejected_and_logged() {
        let mut round = round(ConsensusMechanism::ProofOfStake);
        let outcome = round.on_message(&"eve".into(), vote(), 1);
        assert_eq!(outcome.reason(), Some("not a round validator"));
        assert_eq!(round.log()[0].sender.as_str(), "eve");
    }

    #[test]
    fn test_timeout_without_view_change_ends_round() {
        let mut round = round(ConsensusMechanism::ProofOfStake);
        round.on_message(&"v3".into(), vote(), 1);
        let outcome = round.on_timeout(1_000);
        assert_eq!(outcome.tally.get("value"), Some(&20));
        assert_eq!(round.status(), RoundStatus::TimedOut);
        assert_eq!(
            round.on_message(&"v1".into(), vote(), 1_001).reason(),
            Some("round timed out")
        );
    }

    #[test]
    fn test_view_change_keeps_round_open() {
        let mut round = round(ConsensusMechanism::Pbft);
        assert_eq!(round.leader().unwrap().as_str(), "v1");
        let outcome = round.on_timeout(1_000);
        assert!(outcome.view_change);
        assert_eq!(round.status(), RoundStatus::Progressing);
        assert_eq!(round.view(), 1);
    }

    #[test]
    fn test_silent_round_times_out_after_max_views() {
        let validators = ValidatorSet::from_validators([
            Validator::new("v1", 50),
            Validator::new("v2", 30),
            Validator::new("v3", 20),
        ])
        .unwrap();
        let spec = RoundSpec::new(ConsensusMechanism::Pbft, "value").with_max_views(3);
        let mut round = Round::new("round-1".into(), spec, validators, 0, 1_000).unwrap();

        assert!(round.on_timeout(1_000).view_change);
        assert!(round.on_timeout(2_000).view_change);
        let last = round.on_timeout(3_000);
        assert!(!last.view_change);
        assert!(last.verdict.is_none());
        assert_eq!(round.status(), RoundStatus::TimedOut);
        assert_eq!(round.check().verdict, None);
    }
}
