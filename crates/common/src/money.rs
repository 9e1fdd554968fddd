//! Prices in integer minor currency units.

use serde::{Deserialize, Serialize};

/// Money amount in minor currency units (e.g. cents), never floating point.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Money {
    minor_units: i64,
}

impl Money {
    /// Creates an amount from minor units.
    pub fn from_minor_units(minor_units: i64) -> Self {
        Self { minor_units }
    }

    pub fn zero() -> Self {
        Self { minor_units: 0 }
    }

    pub fn minor_units(&self) -> i64 {
        self.minor_units
    }

    /// Whole major units (truncated toward zero).
    pub fn major_units(&self) -> i64 {
        self.minor_units / 100
    }

    pub fn is_negative(&self) -> bool {
        self.minor_units < 0
    }

    /// Price of `count` units at this unit price, or `None` on overflow.
    pub fn checked_times(&self, count: u32) -> Option<Money> {
        self.minor_units
            .checked_mul(i64::from(count))
            .map(Money::from_minor_units)
    }

    /// Sum of two amounts, or `None` on overflow.
    pub fn checked_add(&self, other: Money) -> Option<Money> {
        self.minor_units
            .checked_add(other.minor_units)
            .map(Money::from_minor_units)
    }

    /// Sums `amounts`, or returns `None` if any partial sum overflows.
    pub fn checked_sum<I: IntoIterator<Item = Money>>(amounts: I) -> Option<Money> {
        amounts
            .into_iter()
            .try_fold(Money::zero(), |acc, amount| acc.checked_add(amount))
    }
}

impl std::fmt::Display for Money {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let sign = if self.minor_units < 0 { "-" } else { "" };
        let abs = self.minor_units.unsigned_abs();
        write!(f, "{sign}{}.{:02}", abs / 100, abs % 100)
    }
}
