//! Avalanche: repeated sub-sampled queries
//!
//! Each query samples `k` validators with the seeded RNG. When `alpha` of
//! the sampled replies agree on a value, confidence in it grows (or the
//! preference flips to it with confidence 1). A query without an `alpha`
//! majority resets confidence. The round decides once confidence exceeds
//! `beta`.

use super::RoundProtocol;
use crate::collector::VoteCollector;
use crate::leader::seeded_rng;
use crate::message::{ConsensusMessage, MessageOutcome, RoundCheck, TimeoutOutcome};
use crate::validator::ValidatorSet;
use agora_core::ParticipantId;
use log::{debug, info};
use rand::seq::SliceRandom;

#[derive(Debug, Clone)]
pub struct Avalanche {
    validators: Vec<ParticipantId>,
    seed: u64,
    sample_size: usize,
    alpha: usize,
    beta: u32,
    query: u64,
    sample: Vec<ParticipantId>,
    responses: VoteCollector,
    preference: String,
    confidence: u32,
    decided: Option<String>,
}

impl Avalanche {
    pub fn new(
        validators: &ValidatorSet,
        initial: String,
        seed: u64,
        sample_size: usize,
        alpha: usize,
        beta: u32,
    ) -> Self {
        let ids = validators.active_ids();
        let sample_size = sample_size.min(ids.len());
        let mut avalanche = Self {
            validators: ids,
            seed,
            sample_size,
            // a sample smaller than alpha could never agree
            alpha: alpha.min(sample_size).max(1),
            beta,
            query: 0,
            sample: Vec::new(),
            responses: VoteCollector::new(),
            preference: initial,
            confidence: 0,
            decided: None,
        };
        avalanche.resample();
        avalanche
    }

    pub fn sample(&self) -> &[ParticipantId] {
        &self.sample
    }

    pub fn preference(&self) -> &str {
        &self.preference
    }

    pub fn confidence(&self) -> u32 {
        self.confidence
    }

    pub fn query(&self) -> u64 {
        self.query
    }

    fn resample(&mut self) {
        let mut rng = seeded_rng(self.seed, "avalanche-sample", self.query);
        let mut ids = self.validators.clone();
        ids.shuffle(&mut rng);
        ids.truncate(self.sample_size);
        self.sample = ids;
        self.responses.clear();
    }

    fn conclude_query(&mut self) {
        let agreed = self.responses.value_with_count(self.alpha);
        match agreed {
            Some(value) if value == self.preference => self.confidence += 1,
            Some(value) => {
                debug!("avalanche preference {} -> {}", self.preference, value);
                self.preference = value;
                self.confidence = 1;
            }
            None => self.confidence = 0,
        }
        if self.confidence > self.beta {
            info!(
                "✅ Avalanche decided {} after {} queries",
                self.preference,
                self.query + 1
            );
            self.decided = Some(self.preference.clone());
        }
        self.query += 1;
        self.resample();
    }
}

impl RoundProtocol for Avalanche {
    fn name(&self) -> &'static str {
        "avalanche"
    }

    fn view(&self) -> u64 {
        self.query
    }

    fn on_message(
        &mut self,
        _validators: &ValidatorSet,
        sender: &ParticipantId,
        message: &ConsensusMessage,
        _now: u64,
    ) -> MessageOutcome {
        let ConsensusMessage::QueryResponse { query, preference } = message else {
            return MessageOutcome::rejected(format!("unexpected {} message", message.kind()));
        };
        if *query != self.query {
            return MessageOutcome::rejected(format!("stale query {}", query));
        }
        if !self.sample.contains(sender) {
            return MessageOutcome::rejected("not sampled for this query");
        }
        if !self.responses.record(sender, preference, 1) {
            return MessageOutcome::rejected("duplicate response");
        }

        let settled = self.responses.value_with_count(self.alpha).is_some()
            || self.responses.total_count() == self.sample.len();
        if settled {
            self.conclude_query();
        }
        MessageOutcome::Accepted
    }

    fn check(&self) -> RoundCheck {
        match &self.decided {
            Some(value) => RoundCheck::committed(value.clone()),
            None => RoundCheck::pending(),
        }
    }

    fn on_timeout(&mut self, _validators: &ValidatorSet, _now: u64) -> TimeoutOutcome {
        let tally = self.responses.tally();
        self.confidence = 0;
        self.query += 1;
        self.resample();
        TimeoutOutcome {
            view: self.query,
            view_change: true,
            verdict: None,
            tally,
        }
    }
}
