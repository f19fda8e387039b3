// 1.4: ledger amounts. unsigned, arbitrary precision, in the asset's minimal unit.
// a balance can never go negative: subtraction is checked and fails loudly.

use crate::num::InvariantViolation;
use num_bigint::BigUint;
use num_traits::{ToPrimitive, Zero};
use rust_decimal::prelude::FromPrimitive;
use rust_decimal::Decimal;
use serde::{de, Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::iter::Sum;

#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Amount(BigUint);

impl Amount {
    pub fn zero() -> Self {
        Self(BigUint::zero())
    }

    pub fn from_u64(v: u64) -> Self {
        Self(BigUint::from(v))
    }

    pub fn from_u128(v: u128) -> Self {
        Self(BigUint::from(v))
    }

    /// Truncates toward zero. Negative input is a bug in the caller.
    pub fn from_decimal_floor(d: Decimal) -> Result<Self, InvariantViolation> {
        if d.is_sign_negative() && !d.is_zero() {
            return Err(InvariantViolation::Broken(format!("negative amount {d}")));
        }
        d.floor()
            .to_u128()
            .map(Self::from_u128)
            .ok_or(InvariantViolation::Overflow("amount from decimal"))
    }

    pub fn from_decimal_ceil(d: Decimal) -> Result<Self, InvariantViolation> {
        Self::from_decimal_floor(d.ceil())
    }

    pub fn to_decimal(&self) -> Result<Decimal, InvariantViolation> {
        self.0
            .to_u128()
            .and_then(Decimal::from_u128)
            .ok_or(InvariantViolation::Overflow("amount to decimal"))
    }

    pub fn is_zero(&self) -> bool {
        self.0.is_zero()
    }

    pub fn add(&self, other: &Amount) -> Self {
        Self(&self.0 + &other.0)
    }

    pub fn checked_sub(&self, other: &Amount) -> Option<Self> {
        if other.0 > self.0 {
            None
        } else {
            Some(Self(&self.0 - &other.0))
        }
    }

    // difference clamped at zero. only for computing shortfalls, never for balances
    pub fn saturating_sub(&self, other: &Amount) -> Self {
        self.checked_sub(other).unwrap_or_default()
    }

    pub fn mul_u64(&self, k: u64) -> Self {
        Self(&self.0 * BigUint::from(k))
    }

    /// floor(self * num / den)
    pub fn mul_div(&self, num: &Amount, den: &Amount) -> Option<Self> {
        if den.is_zero() {
            return None;
        }
        Some(Self((&self.0 * &num.0) / &den.0))
    }

    /// floor(self * factor) for a non-negative decimal factor
    pub fn mul_decimal_floor(&self, factor: Decimal) -> Result<Self, InvariantViolation> {
        let v = self.to_decimal()?;
        let product = v
            .checked_mul(factor)
            .ok_or(InvariantViolation::Overflow("amount times factor"))?;
        Self::from_decimal_floor(product)
    }
}

impl fmt::Display for Amount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// decimal strings on the wire, so logs and hashes do not depend on the digit layout
impl Serialize for Amount {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.0.to_str_radix(10))
    }
}

impl<'de> Deserialize<'de> for Amount {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Text(String),
            Int(u64),
        }
        match Raw::deserialize(deserializer)? {
            Raw::Int(v) => Ok(Self::from_u64(v)),
            Raw::Text(s) => s
                .parse::<BigUint>()
                .map(Self)
                .map_err(|e| de::Error::custom(format!("invalid amount {s:?}: {e}"))),
        }
    }
}

impl From<u64> for Amount {
    fn from(v: u64) -> Self {
        Self::from_u64(v)
    }
}

impl Sum for Amount {
    fn sum<I: Iterator<Item = Self>>(iter: I) -> Self {
        iter.fold(Self::zero(), |acc, a| acc.add(&a))
    }
}

impl<'a> Sum<&'a Amount> for Amount {
    fn sum<I: Iterator<Item = &'a Self>>(iter: I) -> Self {
        iter.fold(Self::zero(), |acc, a| acc.add(a))
    }
}
