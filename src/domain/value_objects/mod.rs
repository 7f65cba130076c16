//! Value Objects for fulfillment

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Time-ordered identifier used for every persisted record.
pub fn new_id() -> String { Uuid::now_v7().to_string() }

/// Money value object
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Money { amount: Decimal, currency: String }

impl Money {
    pub fn new(amount: Decimal, currency: &str) -> Self { Self { amount, currency: currency.to_string() } }
    pub fn usd(amount: Decimal) -> Self { Self::new(amount, "USD") }
    pub fn zero(currency: &str) -> Self { Self::new(Decimal::ZERO, currency) }
    pub fn amount(&self) -> Decimal { self.amount }
    pub fn currency(&self) -> &str { &self.currency }
    pub fn add(&self, other: &Money) -> Result<Money, MoneyError> {
        if self.currency != other.currency { return Err(MoneyError::CurrencyMismatch { left: self.currency.clone(), right: other.currency.clone() }); }
        Ok(Money::new(self.amount + other.amount, &self.currency))
    }
    pub fn multiply(&self, qty: u32) -> Money { Money::new(self.amount * Decimal::from(qty), &self.currency) }

    /// Sums a sequence of amounts that must share `currency`.
    pub fn sum<'a>(currency: &str, items: impl IntoIterator<Item = &'a Money>) -> Result<Money, MoneyError> {
        items.into_iter().try_fold(Money::zero(currency), |acc, m| acc.add(m))
    }
}

impl Default for Money { fn default() -> Self { Self::zero("USD") } }

impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { write!(f, "{} {}", self.amount, self.currency) }
}

#[derive(Debug, Clone, PartialEq, Eq)] pub enum MoneyError { CurrencyMismatch { left: String, right: String } }
impl std::error::Error for MoneyError {}
impl fmt::Display for MoneyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self { Self::CurrencyMismatch { left, right } => write!(f, "Currency mismatch: {left} vs {right}") }
    }
}

/// A target weight with a symmetric tolerance, both in grams.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct WeightBand { pub target: f64, pub tolerance: f64 }

impl WeightBand {
    pub fn new(target: f64, tolerance: f64) -> Self { Self { target, tolerance: tolerance.abs() } }
    pub fn lower(&self) -> f64 { self.target - self.tolerance }
    pub fn upper(&self) -> f64 { self.target + self.tolerance }
    pub fn contains(&self, grams: f64) -> bool { grams >= self.lower() && grams <= self.upper() }
    /// Distance from `grams` to the nearest edge of the band, zero inside it.
    pub fn gap(&self, grams: f64) -> f64 {
        if grams < self.lower() { self.lower() - grams } else if grams > self.upper() { grams - self.upper() } else { 0.0 }
    }
}

/// Eight pounds, the usual consolidated parcel target.
pub const DEFAULT_TARGET_GRAMS: f64 = 3628.74;
pub const DEFAULT_TOLERANCE_GRAMS: f64 = 5.0;

impl Default for WeightBand { fn default() -> Self { Self::new(DEFAULT_TARGET_GRAMS, DEFAULT_TOLERANCE_GRAMS) } }

#[cfg(test)]
mod tests {
    use super::*;
    #[test]
    fn test_money_add() {
        let a = Money::usd(Decimal::new(100, 0));
        let b = Money::usd(Decimal::new(50, 0));
        assert_eq!(a.add(&b).unwrap().amount(), Decimal::new(150, 0));
    }
    #[test]
    fn test_money_sum_rejects_mixed_currency() {
        let items = [Money::usd(Decimal::ONE), Money::new(Decimal::ONE, "MXN")];
        assert!(Money::sum("USD", items.iter()).is_err());
    }
    #[test]
    fn test_weight_band() {
        let band = WeightBand::new(1000.0, 10.0);
        assert!(band.contains(990.0) && band.contains(1010.0));
        assert!(!band.contains(1010.5));
        assert_eq!(band.gap(980.0), 10.0);
        assert_eq!(band.gap(1000.0), 0.0);
    }
}
