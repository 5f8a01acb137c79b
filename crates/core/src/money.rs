//! Money as signed integer cents.
//!
//! Every rate, charge, deduction, and balance in the settlement core is a
//! `Money` value. Arithmetic is checked; overflow surfaces as an invariant
//! violation instead of wrapping silently.

use serde::{Deserialize, Serialize};

use crate::error::{DomainError, DomainResult};
use crate::value_object::ValueObject;

/// A monetary amount in cents (USD).
#[derive(
    Debug, Default, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Money(i64);

impl Money {
    pub const ZERO: Money = Money(0);

    pub const fn from_cents(cents: i64) -> Self {
        Money(cents)
    }

    /// Whole-dollar constructor, mostly for fixtures and seeded rates.
    pub const fn from_dollars(dollars: i64) -> Self {
        Money(dollars * 100)
    }

    pub const fn cents(self) -> i64 {
        self.0
    }

    pub const fn is_zero(self) -> bool {
        self.0 == 0
    }

    pub const fn is_negative(self) -> bool {
        self.0 < 0
    }

    pub fn checked_add(self, other: Money) -> DomainResult<Money> {
        self.0
            .checked_add(other.0)
            .map(Money)
            .ok_or_else(|| DomainError::invariant("money addition overflow"))
    }

    pub fn checked_sub(self, other: Money) -> DomainResult<Money> {
        self.0
            .checked_sub(other.0)
            .map(Money)
            .ok_or_else(|| DomainError::invariant("money subtraction overflow"))
    }

    pub fn checked_mul(self, factor: u32) -> DomainResult<Money> {
        self.0
            .checked_mul(i64::from(factor))
            .map(Money)
            .ok_or_else(|| DomainError::invariant("money multiplication overflow"))
    }

    /// Apply a whole percentage (0..=100), rounding half away from zero.
    pub fn percent(self, percent: u8) -> DomainResult<Money> {
        if percent > 100 {
            return Err(DomainError::validation(format!(
                "percentage must be between 0 and 100, got {percent}"
            )));
        }
        let scaled = i128::from(self.0) * i128::from(percent);
        let rounded = if scaled >= 0 {
            (scaled + 50) / 100
        } else {
            (scaled - 50) / 100
        };
        i64::try_from(rounded)
            .map(Money)
            .map_err(|_| DomainError::invariant("money percentage overflow"))
    }

    /// `max(0, self - other)`. The floor used for net pay and payee debt.
    pub fn sub_floor_zero(self, other: Money) -> Money {
        Money(self.0.saturating_sub(other.0).max(0))
    }

    pub fn min(self, other: Money) -> Money {
        Money(self.0.min(other.0))
    }

    /// Checked sum of an iterator of amounts.
    pub fn sum<I: IntoIterator<Item = Money>>(amounts: I) -> DomainResult<Money> {
        amounts
            .into_iter()
            .try_fold(Money::ZERO, |acc, m| acc.checked_add(m))
    }
}

impl ValueObject for Money {}

impl core::fmt::Display for Money {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let sign = if self.0 < 0 { "-" } else { "" };
        let abs = self.0.unsigned_abs();
        write!(f, "{sign}${}.{:02}", abs / 100, abs % 100)
    }
}
