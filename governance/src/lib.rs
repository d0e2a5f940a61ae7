//! Agora Governance Module
//!
//! Eligibility rules, pluggable voting mechanisms, the vote ballot box and
//! the proposal/referendum lifecycle with its validated action payloads.

pub mod action;
pub mod catalogue;
pub mod eligibility;
pub mod mechanism;
pub mod proposal;
pub mod vote;

pub use action::{Action, ActionExecutor, ActionReport, Role};
pub use catalogue::{CatalogueEntry, GovernanceParams, ProposalCatalogue, ProposalCategory, ResolvedProposalType};
pub use eligibility::{EligibilityContext, EligibilityRule};
pub use mechanism::{
    BallotPayload, Decision, DecisionMetadata, FinalizeContext, MarketBranch, MarketOracle,
    MechanismSpec, NormalizedBallot, Tally, VotingMechanism,
};
pub use proposal::{
    PhaseChange, Proposal, ProposalKind, ProposalPhase, ProposalSpec, SupportReceipt,
};
pub use vote::{BallotRecord, CastReceipt, Vote, VoteContext, VoteSpec, VoteStatus};

pub use agora_core::{GovernanceError, Result};

/// Governance defaults
pub mod config {
    use agora_core::{Ratio, DAY_MS};

    /// Support period before voting starts (7 days)
    pub const SUPPORT_PERIOD_MS: u64 = 7 * DAY_MS;

    /// Standard voting period (14 days)
    pub const VOTING_PERIOD_MS: u64 = 14 * DAY_MS;

    /// Emergency voting period (5 days)
    pub const EMERGENCY_VOTING_MS: u64 = 5 * DAY_MS;

    /// Delay between a passing vote and execution (2 days)
    pub const EXECUTION_DELAY_MS: u64 = 2 * DAY_MS;

    /// Required quorum (60%)
    pub const QUORUM: Ratio = Ratio::from_percent(60);

    /// Required approval for threshold mechanisms (60%)
    pub const APPROVAL_THRESHOLD: Ratio = Ratio::from_percent(60);

    /// Emergency approval threshold (75%)
    pub const EMERGENCY_APPROVAL_THRESHOLD: Ratio = Ratio::from_percent(75);

    /// Support needed to leave the support phase (10%)
    pub const SUPPORT_THRESHOLD: Ratio = Ratio::from_percent(10);

    /// Default super-majority (two thirds)
    pub const SUPER_MAJORITY: Ratio = Ratio::TWO_THIRDS;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_governance_constants() {
        assert_eq!(config::QUORUM, agora_core::Ratio::new(60, 100));
        assert_eq!(config::VOTING_PERIOD_MS, 14 * agora_core::DAY_MS);
        assert!(config::EMERGENCY_VOTING_MS < config::VOTING_PERIOD_MS);
    }
}
