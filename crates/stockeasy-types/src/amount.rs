//! Currency-agnostic amounts
//!
//! Limits, counters and payments are all expressed as an [`Amount`] of minor
//! units (paise, cents, wei…) of one [`Currency`]. The session fixes the
//! currency; amounts themselves are plain integers so limit arithmetic
//! stays exact.

use crate::{Result, StockEasyError};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Currency or token code (`"INR"`, `"POL"`, `"USDC"`…), always upper case
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Currency(String);

impl Currency {
    /// Create a currency from a code, normalised to upper case
    pub fn new(code: impl AsRef<str>) -> Self {
        Self(code.as_ref().trim().to_ascii_uppercase())
    }

    /// The currency code
    pub fn code(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Currency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Currency {
    fn from(code: &str) -> Self {
        Self::new(code)
    }
}

/// Amount in minor units of the session currency
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Amount(pub u64);

impl Amount {
    pub const ZERO: Amount = Amount(0);

    pub fn new(value: u64) -> Self {
        Self(value)
    }

    pub fn zero() -> Self {
        Self::ZERO
    }

    pub fn value(&self) -> u64 {
        self.0
    }

    pub fn is_zero(&self) -> bool {
        self.0 == 0
    }

    pub fn checked_add(self, other: Self) -> Option<Self> {
        self.0.checked_add(other.0).map(Self)
    }

    pub fn checked_sub(self, other: Self) -> Option<Self> {
        self.0.checked_sub(other.0).map(Self)
    }

    /// Subtraction clamped at zero
    pub fn saturating_sub(self, other: Self) -> Self {
        Self(self.0.saturating_sub(other.0))
    }

    /// Multiply a unit price by a quantity
    pub fn checked_mul(self, quantity: u64) -> Result<Self> {
        self.0
            .checked_mul(quantity)
            .map(Self)
            .ok_or(StockEasyError::AmountOverflow)
    }

    /// `self + other`, failing with a typed error on overflow
    pub fn try_add(self, other: Self) -> Result<Self> {
        self.checked_add(other).ok_or(StockEasyError::AmountOverflow)
    }
}

impl fmt::Display for Amount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for Amount {
    fn from(value: u64) -> Self {
        Self(value)
    }
}
