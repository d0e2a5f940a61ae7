//! DAO membership
//!
//! Members carry one role. Provisional members may leave (or be removed)
//! directly; everyone else is removed only by an executed proposal.

use agora_core::{EntityKind, GovernanceError, ParticipantId, Result};
use agora_governance::{EligibilityRule, Role};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

/// How participants join a DAO
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum MembershipType {
    #[default]
    Open,
    /// An existing member must invite
    InviteOnly,
    /// Joining requires a minimum balance of `token`
    TokenGated { token: String, min: u64 },
}

impl MembershipType {
    /// Rules a joining participant must satisfy
    pub fn rules(&self) -> Vec<EligibilityRule> {
        match self {
            MembershipType::TokenGated { token, min } => vec![EligibilityRule::TokenHolder {
                token: token.clone(),
                min: *min,
            }],
            MembershipType::Open | MembershipType::InviteOnly => Vec::new(),
        }
    }
}

impl fmt::Display for MembershipType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MembershipType::Open => f.write_str("open"),
            MembershipType::InviteOnly => f.write_str("invite-only"),
            MembershipType::TokenGated { token, min } => write!(f, "token-gated({} >= {})", token, min),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Member {
    pub id: ParticipantId,
    pub role: Role,
    pub joined_at: u64,
    #[serde(default)]
    pub invited_by: Option<ParticipantId>,
    #[serde(default)]
    pub provisional: bool,
}

impl Member {
    pub fn new(id: impl Into<ParticipantId>, role: Role, joined_at: u64) -> Self {
        Self {
            id: id.into(),
            role,
            joined_at,
            invited_by: None,
            provisional: false,
        }
    }

    pub fn provisional(mut self) -> Self {
        self.provisional = true;
        self
    }

    pub fn invited_by(mut self, inviter: impl Into<ParticipantId>) -> Self {
        self.invited_by = Some(inviter.into());
        self
    }

    /// Admins and guardians may cancel votes and manage roles
    pub fn can_moderate(&self) -> bool {
        matches!(self.role, Role::Admin | Role::Guardian)
    }
}

/// Role-tagged member roster with a size cap
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Roster {
    members: BTreeMap<ParticipantId, Member>,
    max_members: usize,
}

impl Roster {
    pub fn new(max_members: usize) -> Self {
        Self {
            members: BTreeMap::new(),
            max_members,
        }
    }

    pub fn get(&self, id: &str) -> Option<&Member> {
        self.members.get(id)
    }

    pub fn require(&self, id: &str) -> Result<&Member> {
        self.members
            .get(id)
            .ok_or_else(|| GovernanceError::unknown(EntityKind::Member, id))
    }

    pub fn contains(&self, id: &str) -> bool {
        self.members.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    pub fn max_members(&self) -> usize {
        self.max_members
    }

    pub fn is_full(&self) -> bool {
        self.members.len() >= self.max_members
    }

    pub fn iter(&self) -> impl Iterator<Item = &Member> {
        self.members.values()
    }

    pub fn ids(&self) -> BTreeSet<ParticipantId> {
        self.members.keys().cloned().collect()
    }

    pub fn with_role(&self, role: Role) -> Vec<ParticipantId> {
        self.members
            .values()
            .filter(|m| m.role == role)
            .map(|m| m.id.clone())
            .collect()
    }

    pub fn insert(&mut self, member: Member) -> Result<()> {
        if self.members.contains_key(&member.id) {
            return Err(GovernanceError::PermissionDenied(format!(
                "{} is already a member",
                member.id
            )));
        }
        if self.is_full() {
            return Err(GovernanceError::PermissionDenied(format!(
                "member limit {} reached",
                self.max_members
            )));
        }
        self.members.insert(member.id.clone(), member);
        Ok(())
    }

    /// Set a role; returns the previous one
    pub fn set_role(&mut self, id: &str, role: Role) -> Result<Role> {
        let member = self
            .members
            .get_mut(id)
            .ok_or_else(|| GovernanceError::unknown(EntityKind::Member, id))?;
        Ok(std::mem::replace(&mut member.role, role))
    }

    pub fn remove(&mut self, id: &str) -> Result<Member> {
        self.members
            .remove(id)
            .ok_or_else(|| GovernanceError::unknown(EntityKind::Member, id))
    }
}
