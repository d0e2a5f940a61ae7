//! Opaque string identifiers
//!
//! Every entity is addressed by an opaque string id. The newtypes keep
//! participant, proposal and round ids from being mixed up while still
//! borrowing as `&str` for map lookups.

use serde::{Deserialize, Serialize};
use std::borrow::Borrow;
use std::fmt;

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            pub fn new(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(id: &str) -> Self {
                Self(id.to_string())
            }
        }

        impl From<String> for $name {
            fn from(id: String) -> Self {
                Self(id)
            }
        }

        impl Borrow<str> for $name {
            fn borrow(&self) -> &str {
                &self.0
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }
    };
}

string_id!(
    /// Registered participant (member, voter, validator)
    ParticipantId
);
string_id!(
    /// Governance instance registered with the orchestrator
    GovernanceId
);
string_id!(
    /// Proposal or referendum, unique across governances
    ProposalId
);
string_id!(
    /// Vote opened by a proposal
    VoteId
);
string_id!(
    /// Consensus round
    RoundId
);
string_id!(
    /// Token symbol, unique within a ledger
    TokenSymbol
);
