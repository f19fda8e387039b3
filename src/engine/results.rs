// 8.0.2: engine errors. everything but `Invariant` is a rejected transaction
// and leaves state as it was.

use crate::ledger::LedgerError;
use crate::liquidity::LiquidityError;
use crate::market::MarketError;
use crate::num::InvariantViolation;
use crate::order::OrderError;
use crate::types::MarketId;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum EngineError {
    #[error("market {0} not found")]
    MarketNotFound(MarketId),

    #[error("market {0} already exists")]
    MarketAlreadyExists(MarketId),

    #[error("engine halted after an invariant violation")]
    Halted,

    #[error("order rejected: {0}")]
    Order(#[from] OrderError),

    #[error("transfer rejected: {0}")]
    Ledger(#[from] LedgerError),

    #[error("liquidity provision rejected: {0}")]
    Liquidity(#[from] LiquidityError),

    #[error("market error: {0}")]
    Market(MarketError),

    #[error("invariant violated: {0}")]
    Invariant(#[from] InvariantViolation),
}

impl EngineError {
    /// Whether the replica must stop processing.
    pub fn is_fatal(&self) -> bool {
        matches!(self, EngineError::Invariant(_) | EngineError::Halted)
    }
}

impl From<MarketError> for EngineError {
    fn from(e: MarketError) -> Self {
        match e {
            MarketError::Invariant(v) => EngineError::Invariant(v),
            MarketError::Order(e) => EngineError::Order(e),
            MarketError::Ledger(e) => EngineError::Ledger(e),
            MarketError::Liquidity(e) => EngineError::Liquidity(e),
            other => EngineError::Market(other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn market_errors_flatten() {
        let e: EngineError = MarketError::Order(OrderError::InvalidSize).into();
        assert_eq!(e, EngineError::Order(OrderError::InvalidSize));
        let e: EngineError = MarketError::Invariant(InvariantViolation::Overflow("x")).into();
        assert!(e.is_fatal());
        let e: EngineError = MarketError::AlreadyFinal.into();
        assert!(!e.is_fatal());
    }
}
