// 1.3: checked decimal arithmetic. an overflow here means replicas could diverge,
// so it surfaces as an InvariantViolation instead of saturating or wrapping.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Consensus-breaking conditions. Never recovered: the replica must halt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
pub enum InvariantViolation {
    #[error("arithmetic overflow in {0}")]
    Overflow(&'static str),

    #[error("negative balance on account {0}")]
    NegativeBalance(String),

    #[error("open volume does not net to zero in market {market}: {net}")]
    OpenVolumeImbalance { market: String, net: i64 },

    #[error("settlement account for market {market} holds {balance} after settlement")]
    SettlementNotEmpty { market: String, balance: String },

    #[error("closeout queue for market {0} did not converge")]
    CloseoutDiverged(String),

    #[error("crossed book in continuous trading on market {0}")]
    CrossedBook(String),

    #[error("{0}")]
    Broken(String),
}

pub fn add(a: Decimal, b: Decimal) -> Result<Decimal, InvariantViolation> {
    a.checked_add(b).ok_or(InvariantViolation::Overflow("add"))
}

pub fn sub(a: Decimal, b: Decimal) -> Result<Decimal, InvariantViolation> {
    a.checked_sub(b).ok_or(InvariantViolation::Overflow("sub"))
}

pub fn mul(a: Decimal, b: Decimal) -> Result<Decimal, InvariantViolation> {
    a.checked_mul(b).ok_or(InvariantViolation::Overflow("mul"))
}

pub fn div(a: Decimal, b: Decimal) -> Result<Decimal, InvariantViolation> {
    a.checked_div(b).ok_or(InvariantViolation::Overflow("div"))
}

pub fn volume(v: u64) -> Decimal {
    Decimal::from(v)
}

pub fn signed_volume(v: i64) -> Decimal {
    Decimal::from(v)
}

/// price * volume with overflow checking
pub fn notional(price: Decimal, volume: u64) -> Result<Decimal, InvariantViolation> {
    mul(price, Decimal::from(volume))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn checked_ops() {
        assert_eq!(add(dec!(1), dec!(2)).unwrap(), dec!(3));
        assert_eq!(mul(dec!(1.5), dec!(2)).unwrap(), dec!(3.0));
        assert_eq!(notional(dec!(100), 10).unwrap(), dec!(1000));
    }

    #[test]
    fn overflow_is_fatal() {
        assert_eq!(
            mul(Decimal::MAX, dec!(2)),
            Err(InvariantViolation::Overflow("mul"))
        );
        assert!(div(dec!(1), Decimal::ZERO).is_err());
    }
}
