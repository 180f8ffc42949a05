//! Fixed-point decimal types for prices and quantities
//!
//! Uses rust_decimal for deterministic arithmetic (no floating-point errors).
//! Both types are non-negative by construction; strict positivity and the
//! upper bounds are order-level rules checked when an order is validated.
//! With price and quantity both capped at [`MAX_PRICE`] / [`MAX_QUANTITY`],
//! a single notional or PnL slice stays far below `Decimal::MAX`.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::{Add, Sub};
use std::str::FromStr;
use thiserror::Error;

/// Largest accepted order price (10^12)
pub const MAX_PRICE: Decimal = Decimal::from_parts(0xD4A5_1000, 0xE8, 0, false, 0);

/// Largest accepted order quantity (10^12)
pub const MAX_QUANTITY: Decimal = Decimal::from_parts(0xD4A5_1000, 0xE8, 0, false, 0);

/// Errors raised when constructing numeric values
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum NumericError {
    #[error("value must not be negative: {0}")]
    Negative(Decimal),

    #[error("cannot parse decimal: {0}")]
    Parse(String),
}

/// Price of one unit of the instrument, quoted in the quote asset
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Price(Decimal);

impl Price {
    /// Create a price, rejecting negative values
    pub fn try_new(value: Decimal) -> Result<Self, NumericError> {
        if value.is_sign_negative() && !value.is_zero() {
            return Err(NumericError::Negative(value));
        }
        Ok(Self(value.normalize()))
    }

    pub fn from_u64(value: u64) -> Self {
        Self(Decimal::from(value))
    }

    /// Parse a price from its decimal string form
    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Result<Self, NumericError> {
        let value = Decimal::from_str(s).map_err(|e| NumericError::Parse(e.to_string()))?;
        Self::try_new(value)
    }

    pub fn zero() -> Self {
        Self(Decimal::ZERO)
    }

    pub fn as_decimal(&self) -> Decimal {
        self.0
    }

    pub fn is_zero(&self) -> bool {
        self.0.is_zero()
    }

    pub fn is_positive(&self) -> bool {
        self.0 > Decimal::ZERO
    }
}

impl fmt::Display for Price {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Traded volume, in units of the base asset
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Quantity(Decimal);

impl Quantity {
    /// Create a quantity, rejecting negative values
    pub fn try_new(value: Decimal) -> Result<Self, NumericError> {
        if value.is_sign_negative() && !value.is_zero() {
            return Err(NumericError::Negative(value));
        }
        Ok(Self(value.normalize()))
    }

    pub fn from_u64(value: u64) -> Self {
        Self(Decimal::from(value))
    }

    /// Parse a quantity from its decimal string form
    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Result<Self, NumericError> {
        let value = Decimal::from_str(s).map_err(|e| NumericError::Parse(e.to_string()))?;
        Self::try_new(value)
    }

    pub fn zero() -> Self {
        Self(Decimal::ZERO)
    }

    pub fn as_decimal(&self) -> Decimal {
        self.0
    }

    pub fn is_zero(&self) -> bool {
        self.0.is_zero()
    }

    pub fn is_positive(&self) -> bool {
        self.0 > Decimal::ZERO
    }

    /// Add `other`, returning None on decimal overflow
    pub fn checked_add(self, other: Quantity) -> Option<Quantity> {
        self.0.checked_add(other.0).map(|sum| Quantity(sum.normalize()))
    }

    /// Subtract `other`, returning None if the result would be negative
    pub fn checked_sub(self, other: Quantity) -> Option<Quantity> {
        if other.0 > self.0 {
            None
        } else {
            Some(Quantity((self.0 - other.0).normalize()))
        }
    }
}

/// Saturating addition: never panics on overflow
impl Add for Quantity {
    type Output = Quantity;

    fn add(self, rhs: Quantity) -> Quantity {
        Quantity(self.0.saturating_add(rhs.0).normalize())
    }
}

/// Saturating subtraction: never produces a negative quantity
impl Sub for Quantity {
    type Output = Quantity;

    fn sub(self, rhs: Quantity) -> Quantity {
        self.checked_sub(rhs).unwrap_or(Quantity::zero())
    }
}

impl std::iter::Sum for Quantity {
    fn sum<I: Iterator<Item = Quantity>>(iter: I) -> Quantity {
        iter.fold(Quantity::zero(), |acc, q| acc + q)
    }
}

impl fmt::Display for Quantity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
