//! Amount types for pool accounting and wallet transfers.
//!
//! The pool credits miners in [`Shannon`], its internal accounting unit. The
//! wallet moves funds in [`Atomic`] units. One Shannon is worth
//! [`ATOMIC_PER_SHANNON`] atomic units, and the conversion is only ever done in
//! that direction (Shannon -> Atomic) so it is always exact.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::TypesError;

/// Wallet atomic units per Shannon.
pub const ATOMIC_PER_SHANNON: u128 = 1_000_000_000;

/// Internal accounting amount credited to payees.
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct Shannon(u64);

impl Shannon {
    pub const ZERO: Self = Self(0);

    pub fn new(raw: u64) -> Self {
        Self(raw)
    }

    pub fn raw(&self) -> u64 {
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

    pub fn saturating_add(self, other: Self) -> Self {
        Self(self.0.saturating_add(other.0))
    }

    pub fn saturating_sub(self, other: Self) -> Self {
        Self(self.0.saturating_sub(other.0))
    }

    /// Convert to wallet units. Never overflows: `u64::MAX * 10^9 < u128::MAX`.
    pub fn to_atomic(self) -> Atomic {
        Atomic(u128::from(self.0) * ATOMIC_PER_SHANNON)
    }
}

impl fmt::Display for Shannon {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} Shannon", self.0)
    }
}

/// Wallet transfer amount (the chain's smallest unit).
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct Atomic(u128);

impl Atomic {
    pub const ZERO: Self = Self(0);

    pub fn new(raw: u128) -> Self {
        Self(raw)
    }

    pub fn raw(&self) -> u128 {
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

    /// Subtract, reporting both operands on underflow.
    pub fn try_sub(self, other: Self) -> Result<Self, TypesError> {
        self.checked_sub(other).ok_or(TypesError::AmountUnderflow {
            minuend: self.0,
            subtrahend: other.0,
        })
    }

    /// Add, reporting an overflow as an error.
    pub fn try_add(self, other: Self) -> Result<Self, TypesError> {
        self.checked_add(other)
            .ok_or_else(|| TypesError::AmountOverflow(format!("{} + {}", self.0, other.0)))
    }
}

impl fmt::Display for Atomic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
