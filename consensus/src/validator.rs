//! Validator registry
//!
//! Validators keep their registration order; every leader rotation and
//! sample draw indexes into that order so rounds are reproducible.

use crate::errors::{ConsensusError, ConsensusResult};
use agora_core::ParticipantId;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Validator {
    pub id: ParticipantId,
    #[serde(default)]
    pub public_key: Vec<u8>,
    pub stake: u64,
    #[serde(default = "default_reputation")]
    pub reputation: u64,
    #[serde(default)]
    pub authority: bool,
    #[serde(default = "default_active")]
    pub active: bool,
}

fn default_reputation() -> u64 {
    100
}

fn default_active() -> bool {
    true
}

impl Validator {
    pub fn new(id: impl Into<ParticipantId>, stake: u64) -> Self {
        Self {
            id: id.into(),
            public_key: Vec::new(),
            stake,
            reputation: default_reputation(),
            authority: false,
            active: true,
        }
    }

    pub fn with_key(mut self, public_key: Vec<u8>) -> Self {
        self.public_key = public_key;
        self
    }

    pub fn with_authority(mut self, authority: bool) -> Self {
        self.authority = authority;
        self
    }

    pub fn with_reputation(mut self, reputation: u64) -> Self {
        self.reputation = reputation;
        self
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidatorSet {
    validators: Vec<Validator>,
    max: Option<usize>,
}

impl ValidatorSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_limit(max: usize) -> Self {
        Self {
            validators: Vec::new(),
            max: Some(max),
        }
    }

    pub fn from_validators(validators: impl IntoIterator<Item = Validator>) -> ConsensusResult<Self> {
        let mut set = Self::new();
        for validator in validators {
            set.register(validator)?;
        }
        Ok(set)
    }

    pub fn register(&mut self, validator: Validator) -> ConsensusResult<()> {
        if self.get(validator.id.as_str()).is_some() {
            return Err(ConsensusError::DuplicateValidator(validator.id.to_string()));
        }
        if let Some(max) = self.max {
            if self.active_count() >= max && validator.active {
                return Err(ConsensusError::ValidatorLimit { max });
            }
        }
        self.validators.push(validator);
        Ok(())
    }

    pub fn get(&self, id: &str) -> Option<&Validator> {
        self.validators.iter().find(|v| v.id.as_str() == id)
    }

    fn get_mut(&mut self, id: &str) -> ConsensusResult<&mut Validator> {
        self.validators
            .iter_mut()
            .find(|v| v.id.as_str() == id)
            .ok_or_else(|| ConsensusError::UnknownValidator(id.to_string()))
    }

    pub fn update_stake(&mut self, id: &str, stake: u64) -> ConsensusResult<u64> {
        let validator = self.get_mut(id)?;
        let previous = validator.stake;
        validator.stake = stake;
        Ok(previous)
    }

    pub fn set_authority(&mut self, id: &str, authority: bool) -> ConsensusResult<()> {
        self.get_mut(id)?.authority = authority;
        Ok(())
    }

    pub fn deactivate(&mut self, id: &str) -> ConsensusResult<()> {
        self.get_mut(id)?.active = false;
        Ok(())
    }

    /// Active validators in registration order
    pub fn active(&self) -> impl Iterator<Item = &Validator> {
        self.validators.iter().filter(|v| v.active)
    }

    pub fn active_ids(&self) -> Vec<ParticipantId> {
        self.active().map(|v| v.id.clone()).collect()
    }

    pub fn active_count(&self) -> usize {
        self.active().count()
    }

    pub fn is_active(&self, id: &str) -> bool {
        self.get(id).is_some_and(|v| v.active)
    }

    /// Position among active validators
    pub fn index_of(&self, id: &str) -> Option<usize> {
        self.active().position(|v| v.id.as_str() == id)
    }

    pub fn stake_of(&self, id: &str) -> u64 {
        self.get(id).filter(|v| v.active).map(|v| v.stake).unwrap_or(0)
    }

    /// Bonded stake of the active set, widened so any number of `u64`
    /// stakes sums without overflow
    pub fn total_stake(&self) -> u128 {
        self.active().map(|v| v.stake as u128).sum()
    }

    pub fn authorities(&self) -> Vec<ParticipantId> {
        self.active()
            .filter(|v| v.authority)
            .map(|v| v.id.clone())
            .collect()
    }

    /// Active subset as its own set, used to freeze a round's membership
    pub fn snapshot(&self) -> ValidatorSet {
        ValidatorSet {
            validators: self.active().cloned().collect(),
            max: None,
        }
    }

    pub fn len(&self) -> usize {
        self.validators.len()
    }

    pub fn is_empty(&self) -> bool {
        self.validators.is_empty()
    }
}
