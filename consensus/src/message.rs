//! Consensus messages and round results

use crate::byzantine::Evidence;
use crate::validator::ValidatorSet;
use agora_core::ParticipantId;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

/// Votes inside a phased BFT view
///
/// PBFT uses `prepare`/`commit`, HotStuff `prepare`/`pre-commit`/`commit`,
/// Tendermint `prevote`/`precommit`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum VotePhase {
    Prepare,
    PreCommit,
    Commit,
    Prevote,
    Precommit,
}

impl VotePhase {
    pub fn name(self) -> &'static str {
        match self {
            VotePhase::Prepare => "prepare",
            VotePhase::PreCommit => "pre-commit",
            VotePhase::Commit => "commit",
            VotePhase::Prevote => "prevote",
            VotePhase::Precommit => "precommit",
        }
    }
}

impl fmt::Display for VotePhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Proof that a quorum voted for `value` in `phase` of `view`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuorumCertificate {
    pub view: u64,
    pub phase: VotePhase,
    pub value: String,
    pub signers: Vec<ParticipantId>,
}

impl QuorumCertificate {
    /// Distinct active signers reach `quorum`
    pub fn verify(&self, validators: &ValidatorSet, quorum: usize) -> bool {
        let signers: BTreeSet<&str> = self
            .signers
            .iter()
            .map(|s| s.as_str())
            .filter(|s| validators.is_active(s))
            .collect();
        signers.len() >= quorum
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ConsensusMessage {
    /// Single-phase ballot (PoS, PoA)
    Vote {
        value: String,
        #[serde(default = "default_approve")]
        approve: bool,
    },
    /// Leader proposal for a view
    Propose {
        view: u64,
        value: String,
        #[serde(default)]
        justify: Option<QuorumCertificate>,
    },
    PhaseVote {
        view: u64,
        phase: VotePhase,
        value: String,
    },
    /// Raft: vote for `candidate` in `term`
    GrantVote {
        term: u64,
        candidate: ParticipantId,
    },
    /// Raft: leader replicates the entry at `index`
    AppendEntries {
        term: u64,
        index: u64,
        value: String,
    },
    AppendAck {
        term: u64,
        index: u64,
    },
    /// Avalanche: a sampled validator's preference for query `query`
    QueryResponse {
        query: u64,
        preference: String,
    },
}

fn default_approve() -> bool {
    true
}

impl ConsensusMessage {
    pub fn kind(&self) -> &'static str {
        match self {
            ConsensusMessage::Vote { .. } => "vote",
            ConsensusMessage::Propose { .. } => "propose",
            ConsensusMessage::PhaseVote { phase, .. } => phase.name(),
            ConsensusMessage::GrantVote { .. } => "grant-vote",
            ConsensusMessage::AppendEntries { .. } => "append-entries",
            ConsensusMessage::AppendAck { .. } => "append-ack",
            ConsensusMessage::QueryResponse { .. } => "query-response",
        }
    }

    /// `(view, slot, content)`: one sender may say one thing per slot
    pub fn slot(&self) -> Option<(u64, &'static str, String)> {
        match self {
            ConsensusMessage::Vote { value, approve } => {
                Some((0, "vote", format!("{}:{}", value, approve)))
            }
            ConsensusMessage::Propose { view, value, .. } => Some((*view, "propose", value.clone())),
            ConsensusMessage::PhaseVote { view, phase, value } => {
                Some((*view, phase.name(), value.clone()))
            }
            ConsensusMessage::GrantVote { term, candidate } => {
                Some((*term, "grant-vote", candidate.to_string()))
            }
            ConsensusMessage::AppendEntries { term, index, value } => {
                Some((*term, "append-entries", format!("{}:{}", index, value)))
            }
            ConsensusMessage::AppendAck { .. } => None,
            ConsensusMessage::QueryResponse { query, preference } => {
                Some((*query, "query-response", preference.clone()))
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "kebab-case")]
pub enum MessageOutcome {
    Accepted,
    Rejected { reason: String },
}

impl MessageOutcome {
    pub fn rejected(reason: impl Into<String>) -> Self {
        MessageOutcome::Rejected {
            reason: reason.into(),
        }
    }

    pub fn is_accepted(&self) -> bool {
        matches!(self, MessageOutcome::Accepted)
    }

    pub fn reason(&self) -> Option<&str> {
        match self {
            MessageOutcome::Accepted => None,
            MessageOutcome::Rejected { reason } => Some(reason),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Verdict {
    Commit(String),
    Reject,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoundCheck {
    pub finalized: bool,
    pub verdict: Option<Verdict>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub evidence: Vec<Evidence>,
}

impl RoundCheck {
    pub fn pending() -> Self {
        Self::default()
    }

    pub fn committed(value: impl Into<String>) -> Self {
        Self {
            finalized: true,
            verdict: Some(Verdict::Commit(value.into())),
            evidence: Vec::new(),
        }
    }

    pub fn rejected() -> Self {
        Self {
            finalized: true,
            verdict: Some(Verdict::Reject),
            evidence: Vec::new(),
        }
    }

    /// Committed value, if any
    pub fn decision(&self) -> Option<&str> {
        match &self.verdict {
            Some(Verdict::Commit(value)) => Some(value),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeoutOutcome {
    /// View after the timeout
    pub view: u64,
    pub view_change: bool,
    pub verdict: Option<Verdict>,
    /// Support per value when the timeout fired
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub tally: BTreeMap<String, u64>,
}
