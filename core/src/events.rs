//! System event stream
//!
//! The orchestrator publishes [`SystemEvent`]s into an [`EventSink`]. Sinks
//! are append-only observers; nothing downstream calls back into governance.

use crate::error::ErrorKind;
use crate::ids::{GovernanceId, ParticipantId, ProposalId, RoundId, TokenSymbol, VoteId};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum SystemEvent {
    GovernanceCreated {
        governance: GovernanceId,
        kind: String,
    },
    DaoCreated {
        governance: GovernanceId,
        name: String,
    },
    GovernanceDegraded {
        governance: GovernanceId,
        reason: String,
    },
    MemberAdded {
        governance: GovernanceId,
        member: ParticipantId,
        role: String,
    },
    MemberRemoved {
        governance: GovernanceId,
        member: ParticipantId,
    },
    MemberRoleUpdated {
        governance: GovernanceId,
        member: ParticipantId,
        role: String,
    },
    ProposalCreated {
        governance: GovernanceId,
        proposal: ProposalId,
        proposer: ParticipantId,
        category: String,
    },
    ProposalSupported {
        governance: GovernanceId,
        proposal: ProposalId,
        supporter: ParticipantId,
        total_support: String,
        threshold_met: bool,
    },
    ProposalRejected {
        governance: GovernanceId,
        proposal: ProposalId,
        reason: String,
    },
    VotingStarted {
        governance: GovernanceId,
        proposal: ProposalId,
        vote: VoteId,
        mechanism: String,
        closes_at: Option<u64>,
    },
    VoteCast {
        governance: GovernanceId,
        vote: VoteId,
        voter: ParticipantId,
        weight: String,
    },
    VotingEnded {
        governance: GovernanceId,
        vote: VoteId,
        outcome: Option<String>,
        passed: bool,
        quorum_met: bool,
    },
    VoteCancelled {
        governance: GovernanceId,
        vote: VoteId,
    },
    ExecutionScheduled {
        governance: GovernanceId,
        proposal: ProposalId,
        execute_at: u64,
    },
    ProposalExecuted {
        governance: GovernanceId,
        proposal: ProposalId,
        actions: usize,
    },
    ProposalExecutionFailed {
        governance: GovernanceId,
        proposal: ProposalId,
        reason: String,
        kind: ErrorKind,
    },
    ReferendumCreated {
        governance: GovernanceId,
        referendum: ProposalId,
    },
    ReferendumCompleted {
        governance: GovernanceId,
        referendum: ProposalId,
        outcome: Option<String>,
        passed: bool,
    },
    ConsensusRoundStarted {
        round: RoundId,
        mechanism: String,
        validators: usize,
    },
    ConsensusMessage {
        round: RoundId,
        sender: ParticipantId,
        message: String,
        accepted: bool,
    },
    ConsensusFinalized {
        round: RoundId,
        decision: Option<String>,
        view: u64,
    },
    ConsensusTimeout {
        round: RoundId,
        view: u64,
        view_change: bool,
    },
    ValidatorRegistered {
        validator: ParticipantId,
        stake: u64,
    },
    ValidatorStakeUpdated {
        validator: ParticipantId,
        stake: u64,
    },
    VotingPowerDelegated {
        token: TokenSymbol,
        delegator: ParticipantId,
        delegate: ParticipantId,
        scope: String,
    },
}

impl SystemEvent {
    /// Kebab-case event name, matching the serialized `type` tag
    pub fn name(&self) -> &'static str {
        match self {
            SystemEvent::GovernanceCreated { .. } => "governance-created",
            SystemEvent::DaoCreated { .. } => "dao-created",
            SystemEvent::GovernanceDegraded { .. } => "governance-degraded",
            SystemEvent::MemberAdded { .. } => "member-added",
            SystemEvent::MemberRemoved { .. } => "member-removed",
            SystemEvent::MemberRoleUpdated { .. } => "member-role-updated",
            SystemEvent::ProposalCreated { .. } => "proposal-created",
            SystemEvent::ProposalSupported { .. } => "proposal-supported",
            SystemEvent::ProposalRejected { .. } => "proposal-rejected",
            SystemEvent::VotingStarted { .. } => "voting-started",
            SystemEvent::VoteCast { .. } => "vote-cast",
            SystemEvent::VotingEnded { .. } => "voting-ended",
            SystemEvent::VoteCancelled { .. } => "vote-cancelled",
            SystemEvent::ExecutionScheduled { .. } => "execution-scheduled",
            SystemEvent::ProposalExecuted { .. } => "proposal-executed",
            SystemEvent::ProposalExecutionFailed { .. } => "proposal-execution-failed",
            SystemEvent::ReferendumCreated { .. } => "referendum-created",
            SystemEvent::ReferendumCompleted { .. } => "referendum-completed",
            SystemEvent::ConsensusRoundStarted { .. } => "consensus-round-started",
            SystemEvent::ConsensusMessage { .. } => "consensus-message",
            SystemEvent::ConsensusFinalized { .. } => "consensus-finalized",
            SystemEvent::ConsensusTimeout { .. } => "consensus-timeout",
            SystemEvent::ValidatorRegistered { .. } => "validator-registered",
            SystemEvent::ValidatorStakeUpdated { .. } => "validator-stake-updated",
            SystemEvent::VotingPowerDelegated { .. } => "voting-power-delegated",
        }
    }
}

/// Event stamped with its position in the stream
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventRecord {
    pub seq: u64,
    pub at: u64,
    pub event: SystemEvent,
}

pub trait EventSink: Send + Sync {
    fn publish(&self, at: u64, event: SystemEvent);
}

/// In-memory append-only event log
#[derive(Debug, Default)]
pub struct EventLog {
    records: Mutex<Vec<EventRecord>>,
}

impl EventLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> Vec<EventRecord> {
        self.records.lock().clone()
    }

    /// Records with `seq >= from`
    pub fn since(&self, from: u64) -> Vec<EventRecord> {
        self.records
            .lock()
            .iter()
            .filter(|r| r.seq >= from)
            .cloned()
            .collect()
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.records.lock().iter().map(|r| r.event.name()).collect()
    }

    pub fn count(&self, name: &str) -> usize {
        self.records
            .lock()
            .iter()
            .filter(|r| r.event.name() == name)
            .count()
    }

    pub fn len(&self) -> usize {
        self.records.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.lock().is_empty()
    }
}

impl EventSink for EventLog {
    fn publish(&self, at: u64, event: SystemEvent) {
        let mut records = self.records.lock();
        let seq = records.len() as u64;
        records.push(EventRecord { seq, at, event });
    }
}

/// Forwards events to the `log` facade
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingSink;

impl EventSink for LoggingSink {
    fn publish(&self, at: u64, event: SystemEvent) {
        match &event {
            SystemEvent::GovernanceDegraded { governance, reason } => {
                log::error!("🚨 [{}] governance {} degraded: {}", at, governance, reason);
            }
            SystemEvent::ProposalExecutionFailed {
                proposal, reason, ..
            } => {
                log::warn!("⚠️  [{}] proposal {} execution failed: {}", at, proposal, reason);
            }
            SystemEvent::ConsensusMessage { .. } | SystemEvent::VoteCast { .. } => {
                log::debug!("📨 [{}] {}", at, event.name());
            }
            _ => {
                log::info!("📣 [{}] {}", at, event.name());
            }
        }
    }
}

/// Publishes every event into each inner sink in order
#[derive(Default, Clone)]
pub struct FanoutSink {
    sinks: Vec<Arc<dyn EventSink>>,
}

impl FanoutSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.sinks.push(sink);
        self
    }
}

impl EventSink for FanoutSink {
    fn publish(&self, at: u64, event: SystemEvent) {
        for sink in &self.sinks {
            sink.publish(at, event.clone());
        }
    }
}
