//! Deterministic leader selection and seeded randomness
//!
//! Leaders rotate round-robin over the active validators in registration
//! order. Stake-weighted selection and protocol randomness derive from a
//! SHA-256 seed so every replica computes the same answer.

use crate::validator::ValidatorSet;
use agora_core::ParticipantId;
use rand_chacha::rand_core::SeedableRng;
use rand_chacha::ChaCha8Rng;
use sha2::{Digest, Sha256};

/// Leader for `view`: the `view mod n`-th active validator
pub fn round_robin(validators: &[ParticipantId], view: u64) -> Option<&ParticipantId> {
    if validators.is_empty() {
        return None;
    }
    validators.get((view % validators.len() as u64) as usize)
}

/// Seed bytes for `(seed, salt, counter)`
pub fn derive_seed(seed: u64, salt: &str, counter: u64) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(b"AGORA_CONSENSUS_SEED");
    hasher.update(seed.to_le_bytes());
    hasher.update(salt.as_bytes());
    hasher.update(counter.to_le_bytes());
    hasher.finalize().into()
}

/// Reproducible RNG for `(seed, salt, counter)`
pub fn seeded_rng(seed: u64, salt: &str, counter: u64) -> ChaCha8Rng {
    ChaCha8Rng::from_seed(derive_seed(seed, salt, counter))
}

/// Stake-weighted pick; falls back to round-robin when no stake is bonded
pub fn weighted_leader(validators: &ValidatorSet, seed: u64, view: u64) -> Option<ParticipantId> {
    let weighted: Vec<(ParticipantId, u64)> =
        validators.active().map(|v| (v.id.clone(), v.stake)).collect();
    let total: u128 = weighted.iter().map(|(_, w)| *w as u128).sum();
    if total == 0 {
        let ids: Vec<ParticipantId> = weighted.into_iter().map(|(id, _)| id).collect();
        return round_robin(&ids, view).cloned();
    }

    let hash = derive_seed(seed, "leader", view);
    let mut bytes = [0u8; 16];
    bytes.copy_from_slice(&hash[0..16]);
    let point = u128::from_le_bytes(bytes) % total;

    let mut cumulative = 0u128;
    for (id, weight) in &weighted {
        cumulative += *weight as u128;
        if point < cumulative {
            return Some(id.clone());
        }
    }
    weighted.last().map(|(id, _)| id.clone())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::validator::Validator;
    use rand::Rng;

    #[test]
    fn test_round_robin_rotates() {
        let ids: Vec<ParticipantId> = ["a", "b", "c"].iter().map(|s| ParticipantId::from(*s)).collect();
        assert_eq!(round_robin(&ids, 0).unwrap().as_str(), "a");
        assert_eq!(round_robin(&ids, 4).unwrap().as_str(), "b");
        assert!(round_robin(&[], 1).is_none());
    }

    #[test]
    fn test_seeded_rng_is_reproducible() {
        let a: u64 = seeded_rng(7, "raft", 1).random();
        let b: u64 = seeded_rng(7, "raft", 1).random();
        let c: u64 = seeded_rng(7, "raft", 2).random();
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn test_weighted_leader_is_deterministic() {
        let validators = ValidatorSet::from_validators([
            Validator::new("v1", 10),
            Validator::new("v2", 0),
            Validator::new("v3", 90),
        ])
        .unwrap();
        let first = weighted_leader(&validators, 42, 3);
        assert_eq!(first, weighted_leader(&validators, 42, 3));
        assert_ne!(first, Some(ParticipantId::from("v2")));
    }

    #[test]
    fn test_weighted_leader_with_huge_stakes() {
        let validators = ValidatorSet::from_validators([
            Validator::new("v1", u64::MAX),
            Validator::new("v2", u64::MAX),
            Validator::new("v3", 0),
        ])
        .unwrap();
        for view in 0..16 {
            let leader = weighted_leader(&validators, 9, view).unwrap();
            assert_ne!(leader.as_str(), "v3");
        }
    }
}
