use crate::error::NotifyError;
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::{Add, AddAssign, Sub};

/// Number of fractional digits installment amounts are cut to before the
/// final installment absorbs the remainder.
pub const MINOR_UNIT_SCALE: u32 = 2;

/// A strictly positive monetary amount.
///
/// Wraps `rust_decimal::Decimal` so that debt principals and payments can never
/// be zero or negative once constructed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "Decimal", into = "Decimal")]
pub struct Amount(Decimal);

impl Amount {
    pub fn new(value: Decimal) -> Result<Self, NotifyError> {
        if value > Decimal::ZERO {
            Ok(Self(value))
        } else {
            Err(NotifyError::ValidationError(
                "Amount must be positive".to_string(),
            ))
        }
    }

    pub fn value(&self) -> Decimal {
        self.0
    }

    /// Splits the amount into `parts` shares truncated to the minor unit.
    ///
    /// Every share but the last is `self / parts` cut to [`MINOR_UNIT_SCALE`];
    /// the last one takes whatever is left, so the shares always add up to
    /// `self` exactly.
    pub fn split(&self, parts: u32) -> Vec<Decimal> {
        if parts <= 1 {
            return vec![self.0];
        }
        let share = (self.0 / Decimal::from(parts))
            .round_dp_with_strategy(MINOR_UNIT_SCALE, RoundingStrategy::ToZero);
        let mut shares = vec![share; parts as usize - 1];
        let allocated: Decimal = shares.iter().copied().sum();
        shares.push(self.0 - allocated);
        shares
    }
}

impl TryFrom<Decimal> for Amount {
    type Error = NotifyError;

    fn try_from(value: Decimal) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<Amount> for Decimal {
    fn from(amount: Amount) -> Self {
        amount.0
    }
}

impl fmt::Display for Amount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.normalize())
    }
}

/// Running total of what has been paid towards an installment or a debt.
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Default, Serialize, Deserialize)]
pub struct Paid(pub Decimal);

impl Paid {
    pub const ZERO: Self = Self(Decimal::ZERO);

    pub fn covers(&self, due: Decimal) -> bool {
        self.0 >= due
    }
}

impl Add for Paid {
    type Output = Self;
    fn add(self, rhs: Self) -> Self::Output {
        Self(self.0 + rhs.0)
    }
}

impl Sub for Paid {
    type Output = Self;
    fn sub(self, rhs: Self) -> Self::Output {
        Self(self.0 - rhs.0)
    }
}

impl AddAssign for Paid {
    fn add_assign(&mut self, rhs: Self) {
        self.0 += rhs.0;
    }
}

impl From<Amount> for Paid {
    fn from(amount: Amount) -> Self {
        Self(amount.0)
    }
}
