use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::{Add, AddAssign, Div, Mul, Sub, SubAssign};
use std::str::FromStr;

/// Money type with 6 decimal places of internal precision
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, Default)]
pub struct Money(Decimal);

impl Money {
    pub const ZERO: Money = Money(Decimal::ZERO);
    pub const ONE: Money = Money(Decimal::ONE);

    /// create from decimal
    pub fn from_decimal(d: Decimal) -> Self {
        Money(d.round_dp(6))
    }

    /// create from string with exact parsing
    pub fn from_str_exact(s: &str) -> Result<Self, rust_decimal::Error> {
        Ok(Money(Decimal::from_str(s)?.round_dp(6)))
    }

    /// create from integer amount (rupees, dollars, etc)
    pub fn from_major(amount: i64) -> Self {
        Money(Decimal::from(amount))
    }

    /// create from minor amount (paise, cents, etc)
    pub fn from_minor(amount: i64, scale: u32) -> Self {
        let d = Decimal::from(amount) / Decimal::from(10_u64.pow(scale));
        Money(d.round_dp(6))
    }

    /// get underlying decimal
    pub fn as_decimal(&self) -> Decimal {
        self.0
    }

    /// round to specified decimal places
    pub fn round_dp(&self, dp: u32) -> Self {
        Money(self.0.round_dp(dp))
    }

    /// round to instalment granularity (2dp, half away from zero)
    pub fn to_instalment(&self) -> Self {
        Money(
            self.0
                .round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero),
        )
    }

    /// round up to instalment granularity (2dp, toward +inf)
    pub fn ceil_instalment(&self) -> Self {
        Money(
            self.0
                .round_dp_with_strategy(2, RoundingStrategy::ToPositiveInfinity),
        )
    }

    /// check if zero
    pub fn is_zero(&self) -> bool {
        self.0.is_zero()
    }

    /// check if positive
    pub fn is_positive(&self) -> bool {
        self.0.is_sign_positive() && !self.0.is_zero()
    }

    /// check if negative
    pub fn is_negative(&self) -> bool {
        self.0.is_sign_negative()
    }

    /// absolute value
    pub fn abs(&self) -> Self {
        Money(self.0.abs())
    }

    /// minimum of two values
    pub fn min(self, other: Self) -> Self {
        Money(self.0.min(other.0))
    }

    /// maximum of two values
    pub fn max(self, other: Self) -> Self {
        Money(self.0.max(other.0))
    }

    /// one flat month of interest at a monthly rate
    pub fn monthly_interest(&self, monthly_rate: Rate) -> Self {
        Money((self.0 * monthly_rate.as_decimal()).round_dp(6))
    }

    /// flat interest pro-rated by days over a 30-day month
    pub fn prorated_interest(&self, monthly_rate: Rate, days: u32) -> Self {
        let interest =
            self.0 * monthly_rate.as_decimal() * Decimal::from(days) / Decimal::from(30);
        Money(interest.round_dp(6))
    }

    /// split `self` across weights, conserving the total exactly.
    ///
    /// Shares are truncated at 2dp and the rounding residue lands on the
    /// first recipient. Returns an empty vec for empty weights, and an even
    /// split when all weights are zero.
    pub fn split_prorata(&self, weights: &[Money]) -> Vec<Money> {
        if weights.is_empty() {
            return Vec::new();
        }
        let total_weight: Decimal = weights.iter().map(|w| w.0).sum();
        let mut shares: Vec<Money> = if total_weight.is_zero() {
            let even = self.0 / Decimal::from(weights.len() as u64);
            weights
                .iter()
                .map(|_| Money(even.round_dp_with_strategy(2, RoundingStrategy::ToZero)))
                .collect()
        } else {
            weights
                .iter()
                .map(|w| {
                    let share = self.0 * w.0 / total_weight;
                    Money(share.round_dp_with_strategy(2, RoundingStrategy::ToZero))
                })
                .collect()
        };
        let allocated: Decimal = shares.iter().map(|s| s.0).sum();
        let residue = self.0 - allocated;
        if !residue.is_zero() {
            shares[0].0 += residue;
        }
        shares
    }
}

impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for Money {
    type Err = rust_decimal::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Money::from_str_exact(s)
    }
}

impl From<Decimal> for Money {
    fn from(d: Decimal) -> Self {
        Money::from_decimal(d)
    }
}

impl From<i32> for Money {
    fn from(i: i32) -> Self {
        Money::from_major(i as i64)
    }
}

impl From<u32> for Money {
    fn from(i: u32) -> Self {
        Money::from_major(i as i64)
    }
}

impl Add for Money {
    type Output = Money;

    fn add(self, other: Money) -> Money {
        Money((self.0 + other.0).round_dp(6))
    }
}

impl AddAssign for Money {
    fn add_assign(&mut self, other: Money) {
        self.0 = (self.0 + other.0).round_dp(6);
    }
}

impl Sub for Money {
    type Output = Money;

    fn sub(self, other: Money) -> Money {
        Money((self.0 - other.0).round_dp(6))
    }
}

impl SubAssign for Money {
    fn sub_assign(&mut self, other: Money) {
        self.0 = (self.0 - other.0).round_dp(6);
    }
}

impl Mul<Decimal> for Money {
    type Output = Money;

    fn mul(self, other: Decimal) -> Money {
        Money((self.0 * other).round_dp(6))
    }
}

impl Div<Decimal> for Money {
    type Output = Money;

    fn div(self, other: Decimal) -> Money {
        Money((self.0 / other).round_dp(6))
    }
}

impl std::iter::Sum for Money {
    fn sum<I: Iterator<Item = Money>>(iter: I) -> Money {
        iter.fold(Money::ZERO, |acc, x| acc + x)
    }
}

/// rate type for interest rates and percentages
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, Default)]
pub struct Rate(Decimal);

impl Rate {
    pub const ZERO: Rate = Rate(Decimal::ZERO);
    pub const ONE: Rate = Rate(Decimal::ONE);

    /// create from decimal (e.g., 0.03 for 3%)
    pub fn from_decimal(d: Decimal) -> Self {
        Rate(d)
    }

    /// create from percentage (e.g., 3 for 3%)
    pub fn from_percentage(p: u32) -> Self {
        Rate(Decimal::from(p) / Decimal::from(100))
    }

    /// create from basis points (e.g., 300 for 3%)
    pub fn from_bps(bps: u32) -> Self {
        Rate(Decimal::from(bps) / Decimal::from(10000))
    }

    /// get as decimal
    pub fn as_decimal(&self) -> Decimal {
        self.0
    }

    /// get as percentage
    pub fn as_percentage(&self) -> Decimal {
        self.0 * Decimal::from(100)
    }

    /// monthly rate from annual rate
    pub fn monthly_rate(&self) -> Rate {
        Rate(self.0 / Decimal::from(12))
    }

    /// annual rate from monthly rate
    pub fn annualized(&self) -> Rate {
        Rate(self.0 * Decimal::from(12))
    }

    pub fn is_zero(&self) -> bool {
        self.0.is_zero()
    }
}

impl fmt::Display for Rate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}%", self.as_percentage())
    }
}

impl From<Decimal> for Rate {
    fn from(d: Decimal) -> Self {
        Rate::from_decimal(d)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_instalment_rounding() {
        let twelfth = Money::from_major(1000) / dec!(12);
        assert_eq!(twelfth.to_instalment(), Money::from_str_exact("83.33").unwrap());
        assert_eq!(twelfth.ceil_instalment(), Money::from_str_exact("83.34").unwrap());
    }

    #[test]
    fn test_monthly_interest() {
        let principal = Money::from_major(1000);
        let rate = Rate::from_percentage(3);
        assert_eq!(principal.monthly_interest(rate), Money::from_major(30));
    }

    #[test]
    fn test_prorated_interest() {
        let principal = Money::from_major(1000);
        let rate = Rate::from_percentage(3);
        // 15 of 30 days is half a month
        assert_eq!(principal.prorated_interest(rate, 15), Money::from_major(15));
        assert_eq!(principal.prorated_interest(rate, 30), Money::from_major(30));
    }

    #[test]
    fn test_prorata_split_conserves_total() {
        let total = Money::from_major(100);
        let weights = vec![Money::from_major(1000), Money::from_major(2000)];
        let shares = total.split_prorata(&weights);
        assert_eq!(shares.len(), 2);
        assert_eq!(shares.iter().copied().sum::<Money>(), total);
        // 1:2 weighting with the residue on the first recipient
        assert_eq!(shares[0], Money::from_str_exact("33.34").unwrap());
        assert_eq!(shares[1], Money::from_str_exact("66.66").unwrap());
    }

    #[test]
    fn test_prorata_split_awkward_amount() {
        let total = Money::from_str_exact("100.01").unwrap();
        let weights = vec![
            Money::from_major(1),
            Money::from_major(1),
            Money::from_major(1),
        ];
        let shares = total.split_prorata(&weights);
        assert_eq!(shares.iter().copied().sum::<Money>(), total);
    }

    #[test]
    fn test_prorata_split_zero_weights() {
        let total = Money::from_major(10);
        let weights = vec![Money::ZERO, Money::ZERO];
        let shares = total.split_prorata(&weights);
        assert_eq!(shares.iter().copied().sum::<Money>(), total);
    }

    #[test]
    fn test_rate_conversions() {
        let annual = Rate::from_percentage(36);
        assert_eq!(annual.monthly_rate(), Rate::from_percentage(3));
        assert_eq!(Rate::from_percentage(3).annualized(), annual);
        assert_eq!(Rate::from_bps(300), Rate::from_percentage(3));
    }
}
