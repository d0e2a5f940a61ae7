//! Quorum calculation for consensus rounds

/// Votes needed for a BFT phase: `floor(2n/3) + 1`.
///
/// Equals `2f + 1` when `n = 3f + 1`. For other sizes it is stricter than
/// `2f + 1` (4 of 5 rather than 3), and every vote is needed for `n <= 3`.
pub fn bft_quorum(n: usize) -> usize {
    if n == 0 {
        return 0;
    }
    (n * 2 / 3 + 1).min(n)
}

/// Strict majority: `floor(n/2) + 1`
pub fn majority(n: usize) -> usize {
    n / 2 + 1
}

/// Calculate required votes for a threshold
///
/// # Arguments
/// * `total` - Total number of voters
/// * `numerator` - Threshold numerator (e.g., 2 for 2/3)
/// * `denominator` - Threshold denominator (e.g., 3 for 2/3)
pub fn calculate_required_votes(total: usize, numerator: usize, denominator: usize) -> usize {
    (total * numerator).div_ceil(denominator)
}

/// `part > total * numerator / denominator`, exact
pub fn exceeds(part: u128, total: u128, numerator: u64, denominator: u64) -> bool {
    if total == 0 {
        return false;
    }
    match (
        part.checked_mul(denominator as u128),
        total.checked_mul(numerator as u128),
    ) {
        (Some(lhs), Some(rhs)) => lhs > rhs,
        // beyond u128: compare the quotients instead
        _ => part / numerator.max(1) as u128 > total / denominator.max(1) as u128,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bft_quorum() {
        assert_eq!(bft_quorum(4), 3);
        assert_eq!(bft_quorum(3), 3);
        assert_eq!(bft_quorum(5), 4);
        assert_eq!(bft_quorum(7), 5);
        assert_eq!(bft_quorum(1), 1);
    }

    #[test]
    fn test_thresholds() {
        assert_eq!(majority(4), 3);
        assert_eq!(majority(5), 3);
        assert_eq!(calculate_required_votes(6, 2, 3), 4);
        assert!(exceeds(67, 100, 2, 3));
        assert!(!exceeds(66, 99, 2, 3));
        assert!(!exceeds(0, 0, 2, 3));
    }
}
