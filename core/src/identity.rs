//! Participant identity and signature verification
//!
//! Participants are opaque ids bound to a public verification key. The
//! signature scheme is pluggable through [`SignatureVerifier`]; the core only
//! fixes the contract that a signed message is verified against the sender's
//! registered key over the canonical JSON encoding of its payload.

use crate::error::{EntityKind, GovernanceError, Result};
use crate::ids::ParticipantId;
use ed25519_dalek::{Signature, Verifier, VerifyingKey};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Registered participant. Never deleted, only deactivated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Participant {
    pub id: ParticipantId,
    /// Public verification key bytes (scheme defined by the verifier)
    pub public_key: Vec<u8>,
    /// Reputation score, 100 is neutral
    pub reputation: u64,
    /// Protocol authority flag (PoA authorities, delegated authorities)
    pub authority: bool,
    /// Participant who invited this one, if any
    pub invited_by: Option<ParticipantId>,
    pub registered_at: u64,
    pub active: bool,
}

impl Participant {
    pub fn new(id: impl Into<ParticipantId>, public_key: Vec<u8>, registered_at: u64) -> Self {
        Self {
            id: id.into(),
            public_key,
            reputation: 100,
            authority: false,
            invited_by: None,
            registered_at,
            active: true,
        }
    }

    pub fn with_reputation(mut self, reputation: u64) -> Self {
        self.reputation = reputation;
        self
    }

    pub fn with_authority(mut self, authority: bool) -> Self {
        self.authority = authority;
        self
    }

    pub fn invited_by(mut self, inviter: impl Into<ParticipantId>) -> Self {
        self.invited_by = Some(inviter.into());
        self
    }
}

/// Registry of participants keyed by id
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct ParticipantRegistry {
    participants: BTreeMap<ParticipantId, Participant>,
}

/// Shared handle; the registry is read far more often than written
pub type ParticipantHandle = Arc<RwLock<ParticipantRegistry>>;

impl ParticipantRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn shared(self) -> ParticipantHandle {
        Arc::new(RwLock::new(self))
    }

    /// Register a new participant; ids are unique forever
    pub fn register(&mut self, participant: Participant) -> Result<()> {
        if self.participants.contains_key(&participant.id) {
            return Err(GovernanceError::PermissionDenied(format!(
                "participant {} already registered",
                participant.id
            )));
        }
        if let Some(inviter) = &participant.invited_by {
            if !self.participants.contains_key(inviter) {
                return Err(GovernanceError::unknown(EntityKind::Participant, inviter));
            }
        }
        log::debug!("👤 Registered participant {}", participant.id);
        self.participants.insert(participant.id.clone(), participant);
        Ok(())
    }

    pub fn deactivate(&mut self, id: &ParticipantId) -> Result<()> {
        let participant = self
            .participants
            .get_mut(id)
            .ok_or_else(|| GovernanceError::unknown(EntityKind::Participant, id))?;
        participant.active = false;
        Ok(())
    }

    pub fn set_reputation(&mut self, id: &ParticipantId, reputation: u64) -> Result<()> {
        let participant = self
            .participants
            .get_mut(id)
            .ok_or_else(|| GovernanceError::unknown(EntityKind::Participant, id))?;
        participant.reputation = reputation;
        Ok(())
    }

    pub fn set_authority(&mut self, id: &ParticipantId, authority: bool) -> Result<()> {
        let participant = self
            .participants
            .get_mut(id)
            .ok_or_else(|| GovernanceError::unknown(EntityKind::Participant, id))?;
        participant.authority = authority;
        Ok(())
    }

    pub fn get(&self, id: &str) -> Option<&Participant> {
        self.participants.get(id)
    }

    /// Lookup that fails for unknown or deactivated participants
    pub fn active(&self, id: &str) -> Result<&Participant> {
        match self.participants.get(id) {
            Some(p) if p.active => Ok(p),
            Some(_) => Err(GovernanceError::PermissionDenied(format!(
                "participant {} is deactivated",
                id
            ))),
            None => Err(GovernanceError::unknown(EntityKind::Participant, id)),
        }
    }

    pub fn contains(&self, id: &str) -> bool {
        self.participants.contains_key(id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Participant> {
        self.participants.values()
    }

    pub fn len(&self) -> usize {
        self.participants.len()
    }

    pub fn is_empty(&self) -> bool {
        self.participants.is_empty()
    }
}

/// Pluggable signature scheme
pub trait SignatureVerifier: Send + Sync {
    fn verify(&self, public_key: &[u8], message: &[u8], signature: &[u8]) -> bool;

    fn scheme(&self) -> &'static str;
}

/// Accepts every signature. Used by simulations where identity is trusted.
#[derive(Debug, Default, Clone, Copy)]
pub struct AcceptAllVerifier;

impl SignatureVerifier for AcceptAllVerifier {
    fn verify(&self, _public_key: &[u8], _message: &[u8], _signature: &[u8]) -> bool {
        true
    }

    fn scheme(&self) -> &'static str {
        "accept-all"
    }
}

/// Ed25519 signatures over the message bytes
#[derive(Debug, Default, Clone, Copy)]
pub struct Ed25519Verifier;

impl SignatureVerifier for Ed25519Verifier {
    fn verify(&self, public_key: &[u8], message: &[u8], signature: &[u8]) -> bool {
        let Ok(key_bytes) = <[u8; 32]>::try_from(public_key) else {
            return false;
        };
        let Ok(key) = VerifyingKey::from_bytes(&key_bytes) else {
            return false;
        };
        let Ok(signature) = Signature::from_slice(signature) else {
            return false;
        };
        key.verify(message, &signature).is_ok()
    }

    fn scheme(&self) -> &'static str {
        "ed25519"
    }
}

/// Payload signed by a participant
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignedMessage<T> {
    pub sender: ParticipantId,
    pub payload: T,
    #[serde(default)]
    pub signature: Vec<u8>,
}

impl<T: Serialize> SignedMessage<T> {
    pub fn new(sender: impl Into<ParticipantId>, payload: T, signature: Vec<u8>) -> Self {
        Self {
            sender: sender.into(),
            payload,
            signature,
        }
    }

    /// Unsigned message, only accepted by [`AcceptAllVerifier`]
    pub fn unsigned(sender: impl Into<ParticipantId>, payload: T) -> Self {
        Self::new(sender, payload, Vec::new())
    }

    /// Canonical bytes covered by the signature
    pub fn signing_bytes(&self) -> Result<Vec<u8>> {
        serde_json::to_vec(&self.payload).map_err(|e| {
            GovernanceError::BallotInvalid(format!("unencodable message payload: {}", e))
        })
    }

    /// SHA-256 digest of the signing bytes, hex encoded
    pub fn digest(&self) -> Result<String> {
        let bytes = self.signing_bytes()?;
        Ok(hex::encode(Sha256::digest(&bytes)))
    }

    /// Verify the signature against the sender's registered key
    pub fn verify(
        &self,
        registry: &ParticipantRegistry,
        verifier: &dyn SignatureVerifier,
    ) -> Result<()> {
        let sender = registry.active(self.sender.as_str())?;
        let bytes = self.signing_bytes()?;
        if verifier.verify(&sender.public_key, &bytes, &self.signature) {
            Ok(())
        } else {
            Err(GovernanceError::PermissionDenied(format!(
                "invalid {} signature from {}",
                verifier.scheme(),
                self.sender
            )))
        }
    }
}
