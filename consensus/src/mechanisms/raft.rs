//! Raft: leader election and single-entry replication
//!
//! Each term every validator draws an election timeout from the seeded RNG;
//! the validator with the shortest timeout becomes candidate and votes for
//! itself. A majority of `grant-vote` messages elects it. The leader then
//! replicates the round's value with `append-entries`, and the entry commits
//! once a majority (leader included) has acknowledged it.

use super::RoundProtocol;
use crate::collector::VoteCollector;
use crate::leader::seeded_rng;
use crate::message::{ConsensusMessage, MessageOutcome, RoundCheck, TimeoutOutcome, Verdict};
use crate::quorum;
use crate::validator::ValidatorSet;
use agora_core::ParticipantId;
use log::info;
use rand::Rng;
use std::collections::BTreeSet;
use std::ops::Range;

#[derive(Debug, Clone)]
pub struct Raft {
    validators: Vec<ParticipantId>,
    value: String,
    seed: u64,
    election_timeout: Range<u64>,
    term: u64,
    candidate: Option<ParticipantId>,
    leader: Option<ParticipantId>,
    grants: VoteCollector,
    entry: Option<(u64, String)>,
    acks: BTreeSet<ParticipantId>,
    committed: Option<String>,
}

impl Raft {
    pub fn new(
        validators: &ValidatorSet,
        value: String,
        seed: u64,
        election_timeout: Range<u64>,
    ) -> Self {
        let mut raft = Self {
            validators: validators.active_ids(),
            value,
            seed,
            election_timeout,
            term: 0,
            candidate: None,
            leader: None,
            grants: VoteCollector::new(),
            entry: None,
            acks: BTreeSet::new(),
            committed: None,
        };
        raft.start_election();
        raft
    }

    pub fn term(&self) -> u64 {
        self.term
    }

    pub fn candidate(&self) -> Option<&ParticipantId> {
        self.candidate.as_ref()
    }

    fn majority(&self) -> usize {
        quorum::majority(self.validators.len())
    }

    /// Election timeouts drawn for `term`, one per validator in order
    pub fn election_timeouts(&self, term: u64) -> Vec<u64> {
        let mut rng = seeded_rng(self.seed, "raft-election", term);
        self.validators
            .iter()
            .map(|_| rng.random_range(self.election_timeout.clone()))
            .collect()
    }

    fn start_election(&mut self) {
        self.term += 1;
        self.leader = None;
        self.entry = None;
        self.acks.clear();
        self.grants.clear();

        let timeouts = self.election_timeouts(self.term);
        let first = timeouts
            .iter()
            .enumerate()
            .min_by_key(|(i, t)| (**t, *i))
            .map(|(i, _)| i);
        self.candidate = first.and_then(|i| self.validators.get(i)).cloned();

        if let Some(candidate) = self.candidate.clone() {
            self.grants.record(&candidate, candidate.as_str(), 1);
            info!("🗳️ Raft term {}: {} stands for election", self.term, candidate);
            self.try_elect(&candidate);
        }
    }

    fn try_elect(&mut self, candidate: &ParticipantId) {
        if self.grants.count(candidate.as_str()) >= self.majority() {
            info!("👑 Raft term {}: {} elected leader", self.term, candidate);
            self.leader = Some(candidate.clone());
        }
    }

    fn on_grant(&mut self, sender: &ParticipantId, term: u64, candidate: &ParticipantId) -> MessageOutcome {
        if term != self.term {
            return MessageOutcome::rejected(format!("stale term {}", term));
        }
        if self.candidate.as_ref() != Some(candidate) {
            return MessageOutcome::rejected("not the candidate of this term");
        }
        if self.leader.is_some() {
            return MessageOutcome::rejected("leader already elected");
        }
        if !self.grants.record(sender, candidate.as_str(), 1) {
            return MessageOutcome::rejected("duplicate vote");
        }
        let candidate = candidate.clone();
        self.try_elect(&candidate);
        MessageOutcome::Accepted
    }

    fn on_append(&mut self, sender: &ParticipantId, term: u64, index: u64, value: &str) -> MessageOutcome {
        if term != self.term {
            return MessageOutcome::rejected(format!("stale term {}", term));
        }
        if self.leader.as_ref() != Some(sender) {
            return MessageOutcome::rejected("not the leader");
        }
        if value != self.value {
            return MessageOutcome::rejected("entry does not match proposal");
        }
        if self.entry.is_some() {
            return MessageOutcome::rejected("entry already replicated");
        }
        self.entry = Some((index, value.to_string()));
        self.acks.insert(sender.clone());
        self.try_commit();
        MessageOutcome::Accepted
    }

    fn on_ack(&mut self, sender: &ParticipantId, term: u64, index: u64) -> MessageOutcome {
        if term != self.term {
            return MessageOutcome::rejected(format!("stale term {}", term));
        }
        match &self.entry {
            Some((entry_index, _)) if *entry_index == index => {}
            _ => return MessageOutcome::rejected(format!("no entry at index {}", index)),
        }
        if !self.acks.insert(sender.clone()) {
            return MessageOutcome::rejected("duplicate acknowledgement");
        }
        self.try_commit();
        MessageOutcome::Accepted
    }

    fn try_commit(&mut self) {
        if self.acks.len() >= self.majority() {
            if let Some((index, value)) = &self.entry {
                info!("✅ Raft term {} committed index {}", self.term, index);
                self.committed = Some(value.clone());
            }
        }
    }
}

impl RoundProtocol for Raft {
    fn name(&self) -> &'static str {
        "raft"
    }

    fn view(&self) -> u64 {
        self.term
    }

    fn leader(&self) -> Option<ParticipantId> {
        self.leader.clone()
    }

    fn on_message(
        &mut self,
        _validators: &ValidatorSet,
        sender: &ParticipantId,
        message: &ConsensusMessage,
        _now: u64,
    ) -> MessageOutcome {
        match message {
            ConsensusMessage::GrantVote { term, candidate } => self.on_grant(sender, *term, candidate),
            ConsensusMessage::AppendEntries { term, index, value } => {
                self.on_append(sender, *term, *index, value)
            }
            ConsensusMessage::AppendAck { term, index } => self.on_ack(sender, *term, *index),
            other => MessageOutcome::rejected(format!("unexpected {} message", other.kind())),
        }
    }

    fn check(&self) -> RoundCheck {
        match &self.committed {
            Some(value) => RoundCheck::committed(value.clone()),
            None => RoundCheck::pending(),
        }
    }

    fn on_timeout(&mut self, _validators: &ValidatorSet, _now: u64) -> TimeoutOutcome {
        let tally = self.grants.tally();
        self.start_election();
        TimeoutOutcome {
            view: self.term,
            view_change: true,
            verdict: self.committed.clone().map(Verdict::Commit),
            tally,
        }
    }
}
