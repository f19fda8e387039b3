// 1.0: primitives. ids, sides, prices, timestamps. each is a newtype so the compiler
// catches a party id passed where a market id belongs.

use crate::num::InvariantViolation;
use chrono::{DateTime, TimeZone, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Longest duration a market or network parameter may name: ten years.
pub const MAX_DURATION_SECS: i64 = 10 * 365 * 24 * 3_600;

// owner string used for positions the protocol takes over during closeouts
pub const NETWORK_PARTY: &str = "network";

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct MarketId(pub String);

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PartyId(pub String);

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct AssetId(pub String);

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct OrderId(pub u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TradeId(pub u64);

macro_rules! string_id {
    ($name:ident) => {
        impl $name {
            pub fn new(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }
    };
}

string_id!(MarketId);
string_id!(PartyId);
string_id!(AssetId);

impl PartyId {
    pub fn network() -> Self {
        Self(NETWORK_PARTY.to_string())
    }

    pub fn is_network(&self) -> bool {
        self.0 == NETWORK_PARTY
    }
}

impl fmt::Display for OrderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "O{}", self.0)
    }
}

impl fmt::Display for TradeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "T{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Side {
    Buy,
    Sell,
}

impl Side {
    // +1 for buys, -1 for sells. multiply a size by this to get the open volume delta
    pub fn sign(&self) -> i64 {
        match self {
            Side::Buy => 1,
            Side::Sell => -1,
        }
    }

    pub fn opposite(&self) -> Self {
        match self {
            Side::Buy => Side::Sell,
            Side::Sell => Side::Buy,
        }
    }
}

// 1.1: price in settlement asset units per contract. always positive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Price(Decimal);

impl Price {
    #[must_use]
    pub fn new(value: Decimal) -> Option<Self> {
        if value > Decimal::ZERO {
            Some(Self(value))
        } else {
            None
        }
    }

    pub fn new_unchecked(value: Decimal) -> Self {
        debug_assert!(value > Decimal::ZERO);
        Self(value)
    }

    pub fn value(&self) -> Decimal {
        self.0
    }

    pub fn is_on_tick(&self, tick_size: Decimal) -> bool {
        tick_size.is_zero() || (self.0 % tick_size).is_zero()
    }

    // largest tick-aligned price not above self. None if that would be zero
    pub fn floor_to_tick(&self, tick_size: Decimal) -> Option<Self> {
        if tick_size.is_zero() {
            return Some(*self);
        }
        Price::new((self.0 / tick_size).floor() * tick_size)
    }
}

impl fmt::Display for Price {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// 1.2: block time in milliseconds. only ever advanced by the replicated log.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Timestamp(pub i64);

impl Timestamp {
    pub fn from_millis(ms: i64) -> Self {
        Self(ms)
    }

    /// Saturates at the ends of the range.
    pub fn from_secs(secs: i64) -> Self {
        Self(secs.saturating_mul(1_000))
    }

    pub fn as_millis(&self) -> i64 {
        self.0
    }

    pub fn add_secs(&self, secs: i64) -> Result<Self, InvariantViolation> {
        secs.checked_mul(1_000)
            .and_then(|ms| self.0.checked_add(ms))
            .map(Self)
            .ok_or(InvariantViolation::Overflow("timestamp"))
    }

    pub fn sub_secs(&self, secs: i64) -> Result<Self, InvariantViolation> {
        secs.checked_mul(1_000)
            .and_then(|ms| self.0.checked_sub(ms))
            .map(Self)
            .ok_or(InvariantViolation::Overflow("timestamp"))
    }

    pub fn secs_since(&self, earlier: Timestamp) -> i64 {
        self.0.saturating_sub(earlier.0) / 1_000
    }

    // year fraction between two block times, used by the risk model horizons
    pub fn year_fraction(secs: i64) -> Decimal {
        Decimal::from(secs) / Decimal::from(31_536_000i64)
    }

    pub fn to_datetime(&self) -> Option<DateTime<Utc>> {
        Utc.timestamp_millis_opt(self.0).single()
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.to_datetime() {
            Some(dt) => write!(f, "{}", dt.to_rfc3339()),
            None => write!(f, "{}ms", self.0),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn side_sign_and_opposite() {
        assert_eq!(Side::Buy.sign(), 1);
        assert_eq!(Side::Sell.sign(), -1);
        assert_eq!(Side::Buy.opposite(), Side::Sell);
    }

    #[test]
    fn price_must_be_positive() {
        assert!(Price::new(dec!(0)).is_none());
        assert!(Price::new(dec!(-1)).is_none());
        assert_eq!(Price::new(dec!(100)).unwrap().value(), dec!(100));
    }

    #[test]
    fn price_tick_alignment() {
        let p = Price::new_unchecked(dec!(104.7));
        assert!(!p.is_on_tick(dec!(1)));
        assert_eq!(p.floor_to_tick(dec!(1)).unwrap().value(), dec!(104));
        assert!(Price::new_unchecked(dec!(0.5)).floor_to_tick(dec!(1)).is_none());
    }

    #[test]
    fn network_party() {
        assert!(PartyId::network().is_network());
        assert!(!PartyId::new("alice").is_network());
    }

    #[test]
    fn timestamp_arithmetic() {
        let t = Timestamp::from_secs(10);
        assert_eq!(t.add_secs(5).unwrap().as_millis(), 15_000);
        assert_eq!(t.add_secs(5).unwrap().secs_since(t), 5);
        assert_eq!(t.sub_secs(5).unwrap(), Timestamp::from_secs(5));
        assert_eq!(t.add_secs(i64::MAX / 10), Err(InvariantViolation::Overflow("timestamp")));
        assert!(Timestamp(i64::MIN).sub_secs(1).is_err());
        assert_eq!(Timestamp::year_fraction(31_536_000), dec!(1));
    }
}
