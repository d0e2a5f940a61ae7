//! Fixed-point weights and exact ratios
//!
//! Tallies accumulate [`Score`] values (signed, six decimal places) so that
//! summation is associative and a finalize over the same tally always yields
//! the same bytes. Quorums and thresholds are exact [`Ratio`]s compared by
//! cross-multiplication.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::iter::Sum;
use std::ops::{Add, AddAssign, Neg, Sub, SubAssign};

/// Signed fixed-point weight with six decimal places
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Score(i128);

impl Score {
    /// Raw units per whole unit of weight
    pub const SCALE: i128 = 1_000_000;
    pub const ZERO: Score = Score(0);

    pub const fn from_raw(raw: i128) -> Self {
        Score(raw)
    }

    pub const fn raw(self) -> i128 {
        self.0
    }

    pub fn from_units(units: u64) -> Self {
        Score(units as i128 * Self::SCALE)
    }

    pub fn from_signed_units(units: i64) -> Self {
        Score(units as i128 * Self::SCALE)
    }

    /// Round a float to the nearest representable score
    pub fn from_f64(value: f64) -> Self {
        if !value.is_finite() {
            return Score::ZERO;
        }
        Score((value * Self::SCALE as f64).round() as i128)
    }

    /// Exact floor of `sqrt(units)` to six decimals
    pub fn sqrt_units(units: u64) -> Self {
        let scaled = units as u128 * (Self::SCALE as u128) * (Self::SCALE as u128);
        Score(isqrt(scaled) as i128)
    }

    pub fn as_f64(self) -> f64 {
        self.0 as f64 / Self::SCALE as f64
    }

    /// Whole units, truncated toward zero
    pub fn whole(self) -> i128 {
        self.0 / Self::SCALE
    }

    pub fn abs(self) -> Self {
        Score(self.0.abs())
    }

    pub fn is_zero(self) -> bool {
        self.0 == 0
    }

    pub fn is_positive(self) -> bool {
        self.0 > 0
    }

    pub fn is_negative(self) -> bool {
        self.0 < 0
    }
}

/// Integer square root (floor) by Newton iteration
pub fn isqrt(n: u128) -> u128 {
    if n < 2 {
        return n;
    }
    let mut x = n;
    let mut y = (x + 1) / 2;
    while y < x {
        x = y;
        y = (x + n / x) / 2;
    }
    x
}

impl Add for Score {
    type Output = Score;
    fn add(self, rhs: Score) -> Score {
        Score(self.0 + rhs.0)
    }
}

impl AddAssign for Score {
    fn add_assign(&mut self, rhs: Score) {
        self.0 += rhs.0;
    }
}

impl Sub for Score {
    type Output = Score;
    fn sub(self, rhs: Score) -> Score {
        Score(self.0 - rhs.0)
    }
}

impl SubAssign for Score {
    fn sub_assign(&mut self, rhs: Score) {
        self.0 -= rhs.0;
    }
}

impl Neg for Score {
    type Output = Score;
    fn neg(self) -> Score {
        Score(-self.0)
    }
}

impl Sum for Score {
    fn sum<I: Iterator<Item = Score>>(iter: I) -> Score {
        iter.fold(Score::ZERO, Add::add)
    }
}

impl<'a> Sum<&'a Score> for Score {
    fn sum<I: Iterator<Item = &'a Score>>(iter: I) -> Score {
        iter.copied().sum()
    }
}

impl fmt::Display for Score {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sign = if self.0 < 0 { "-" } else { "" };
        let abs = self.0.unsigned_abs();
        let whole = abs / Self::SCALE as u128;
        let frac = abs % Self::SCALE as u128;
        if frac == 0 {
            write!(f, "{}{}", sign, whole)
        } else {
            let digits = format!("{:06}", frac);
            write!(f, "{}{}.{}", sign, whole, digits.trim_end_matches('0'))
        }
    }
}

/// Exact fraction `num / den` used for quorums and thresholds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Ratio {
    pub num: u64,
    pub den: u64,
}

impl Ratio {
    pub const ZERO: Ratio = Ratio { num: 0, den: 1 };
    pub const ONE: Ratio = Ratio { num: 1, den: 1 };
    pub const HALF: Ratio = Ratio { num: 1, den: 2 };
    pub const TWO_THIRDS: Ratio = Ratio { num: 2, den: 3 };

    pub const fn new(num: u64, den: u64) -> Self {
        Ratio { num, den }
    }

    pub const fn from_percent(percent: u64) -> Self {
        Ratio {
            num: percent,
            den: 100,
        }
    }

    /// A usable fraction lies in [0, 1] with a non-zero denominator
    pub fn is_valid(&self) -> bool {
        self.den != 0 && self.num <= self.den
    }

    /// `part / whole >= num / den`
    ///
    /// An empty whole only satisfies the zero ratio.
    pub fn is_met(&self, part: Score, whole: Score) -> bool {
        if whole.raw() <= 0 {
            return self.num == 0;
        }
        part.raw() * self.den as i128 >= whole.raw() * self.num as i128
    }

    /// `part / whole > num / den`
    pub fn is_exceeded(&self, part: Score, whole: Score) -> bool {
        if whole.raw() <= 0 {
            return false;
        }
        part.raw() * self.den as i128 > whole.raw() * self.num as i128
    }

    pub fn is_met_units(&self, part: u64, whole: u64) -> bool {
        self.is_met(Score::from_units(part), Score::from_units(whole))
    }

    /// Smallest integer count that meets the ratio of `total`
    pub fn required_of(&self, total: u64) -> u64 {
        if self.den == 0 {
            return total;
        }
        ((total as u128 * self.num as u128).div_ceil(self.den as u128)) as u64
    }

    pub fn as_f64(&self) -> f64 {
        if self.den == 0 {
            return 0.0;
        }
        self.num as f64 / self.den as f64
    }
}

impl fmt::Display for Ratio {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.num, self.den)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_square_root_contributions() {
        assert_eq!(Score::sqrt_units(64), Score::from_units(8));
        assert_eq!(Score::sqrt_units(36), Score::from_units(6));
        assert_eq!(Score::sqrt_units(2).raw(), 1_414_213);
        assert_eq!(Score::sqrt_units(0), Score::ZERO);
    }

    #[test]
    fn test_display() {
        assert_eq!(Score::from_units(55).to_string(), "55");
        assert_eq!(Score::from_raw(1_500_000).to_string(), "1.5");
        assert_eq!((-Score::from_raw(250_000)).to_string(), "-0.25");
    }

    #[test]
    fn test_supermajority_is_exact() {
        // 60 of 100 does not meet two thirds
        assert!(!Ratio::TWO_THIRDS.is_met_units(60, 100));
        // 2 of 3 meets it exactly
        assert!(Ratio::TWO_THIRDS.is_met_units(2, 3));
        assert!(!Ratio::TWO_THIRDS.is_exceeded(Score::from_units(2), Score::from_units(3)));
    }

    #[test]
    fn test_empty_whole() {
        assert!(!Ratio::HALF.is_met(Score::ZERO, Score::ZERO));
        assert!(Ratio::ZERO.is_met(Score::ZERO, Score::ZERO));
    }

    #[test]
    fn test_required_of() {
        assert_eq!(Ratio::TWO_THIRDS.required_of(4), 3);
        assert_eq!(Ratio::TWO_THIRDS.required_of(3), 2);
        assert_eq!(Ratio::HALF.required_of(5), 3);
        assert!(!Ratio::new(3, 2).is_valid());
    }
}
