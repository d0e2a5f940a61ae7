//! Agora Core Library
//!
//! Primitives shared by every governance component: opaque identifiers,
//! the monotonic clock and deadline scheduler, participant identity and
//! signature verification, the closed error set and the system event stream.

pub mod clock;
pub mod error;
pub mod events;
pub mod identity;
pub mod ids;
pub mod scheduler;
pub mod score;

pub use clock::{Clock, ManualClock, SystemClock};
pub use error::{EntityKind, ErrorKind, GovernanceError, Result};
pub use events::{EventLog, EventRecord, EventSink, FanoutSink, LoggingSink, SystemEvent};
pub use identity::{
    AcceptAllVerifier, Ed25519Verifier, Participant, ParticipantHandle, ParticipantRegistry,
    SignatureVerifier, SignedMessage,
};
pub use ids::{GovernanceId, ParticipantId, ProposalId, RoundId, TokenSymbol, VoteId};
pub use scheduler::{Scheduler, TaskId};
pub use score::{Ratio, Score};

/// Milliseconds per day, used for the default governance durations
pub const DAY_MS: u64 = 86_400_000;
