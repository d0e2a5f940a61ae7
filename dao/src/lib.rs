//! Agora DAO
//!
//! The DAO container (roster, treasury, parameters, proposals), the action
//! executor that applies passed proposals to it, and the orchestrator that
//! runs every governance's deadlines, ratification rounds and
//! cross-governance proposals.

pub mod config;
pub mod cross;
pub mod dao;
pub mod error;
pub mod executor;
pub mod membership;
pub mod orchestrator;
pub mod status;

pub use config::{GovernanceConfig, GovernanceKind, OrchestratorConfig};
pub use cross::{CoordinationMode, CrossGovernance, CrossGovernanceSpec, CrossLeg, CrossStatus};
pub use dao::{Dao, VotingClosed, VotingOpened};
pub use error::{ConfigError, ConfigResult};
pub use executor::{ContractVersion, CustomRecord, DaoExecutor, DaoState};
pub use membership::{Member, MembershipType, Roster};
pub use orchestrator::Orchestrator;
pub use status::{GovernanceStatus, HealthReport, ProposalStatus, StatusReport, VoteReport};
