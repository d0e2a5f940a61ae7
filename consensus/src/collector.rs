//! Vote collection
//!
//! One vote per validator, weighted, grouped by the value voted for. Rounds
//! keep one collector per phase and view.

use agora_core::ParticipantId;
use std::collections::BTreeMap;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VoteCollector {
    votes: BTreeMap<ParticipantId, (String, u64)>,
}

impl VoteCollector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a vote; false if the voter already voted
    pub fn record(&mut self, voter: &ParticipantId, value: &str, weight: u64) -> bool {
        if self.votes.contains_key(voter) {
            return false;
        }
        self.votes.insert(voter.clone(), (value.to_string(), weight));
        true
    }

    pub fn has_voted(&self, voter: &str) -> bool {
        self.votes.contains_key(voter)
    }

    /// Number of voters for `value`
    pub fn count(&self, value: &str) -> usize {
        self.votes.values().filter(|(v, _)| v == value).count()
    }

    pub fn weight(&self, value: &str) -> u128 {
        self.votes
            .values()
            .filter(|(v, _)| v == value)
            .map(|(_, w)| *w as u128)
            .sum()
    }

    pub fn voters(&self, value: &str) -> Vec<ParticipantId> {
        self.votes
            .iter()
            .filter(|(_, (v, _))| v == value)
            .map(|(id, _)| id.clone())
            .collect()
    }

    pub fn total_count(&self) -> usize {
        self.votes.len()
    }

    /// Weight per value, saturating at `u64::MAX`
    pub fn tally(&self) -> BTreeMap<String, u64> {
        let mut tally = BTreeMap::new();
        for (value, weight) in self.votes.values() {
            let entry = tally.entry(value.clone()).or_insert(0u64);
            *entry = entry.saturating_add(*weight);
        }
        tally
    }

    /// Heaviest value; ties go to the smallest value
    pub fn leader(&self) -> Option<(String, u64)> {
        let tally = self.tally();
        let best = tally.values().copied().max()?;
        tally.into_iter().find(|(_, w)| *w == best)
    }

    /// First value with at least `quorum` voters
    pub fn value_with_count(&self, quorum: usize) -> Option<String> {
        let mut counts: BTreeMap<&str, usize> = BTreeMap::new();
        for (value, _) in self.votes.values() {
            *counts.entry(value.as_str()).or_insert(0) += 1;
        }
        counts
            .into_iter()
            .find(|(_, c)| *c >= quorum)
            .map(|(v, _)| v.to_string())
    }

    pub fn clear(&mut self) {
        self.votes.clear();
    }
}
