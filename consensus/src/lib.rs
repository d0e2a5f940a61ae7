//! Agora Consensus
//!
//! Byzantine fault tolerant and stake-based consensus rounds used to ratify
//! governance decisions among a validator set.

pub mod byzantine;
pub mod collector;
pub mod engine;
pub mod errors;
pub mod leader;
pub mod mechanisms;
pub mod message;
pub mod quorum;
pub mod round;
pub mod validator;

pub use byzantine::{EquivocationDetector, Evidence, Observation};
pub use collector::VoteCollector;
pub use engine::{ConsensusEngine, EngineConfig, RoundReport};
pub use errors::{ConfigError, ConsensusError, ConsensusResult};
pub use mechanisms::{ConsensusMechanism, RoundProtocol, RoundSpec};
pub use message::{
    ConsensusMessage, MessageOutcome, QuorumCertificate, RoundCheck, TimeoutOutcome, Verdict,
    VotePhase,
};
pub use round::{LoggedMessage, Round, RoundStatus};
pub use validator::{Validator, ValidatorSet};
