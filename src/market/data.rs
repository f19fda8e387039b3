// 12.1: market lifecycle enums and the public MarketData snapshot.

use crate::amount::Amount;
use crate::monitor::PriceBound;
use crate::num::InvariantViolation;
use crate::types::{MarketId, Price, Timestamp};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TradingMode {
    OpeningAuction,
    Continuous,
    MonitoringAuction,
    NoTrading,
}

impl TradingMode {
    pub fn is_auction(&self) -> bool {
        matches!(self, TradingMode::OpeningAuction | TradingMode::MonitoringAuction)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MarketState {
    /// In its opening auction.
    Pending,
    Active,
    /// In a monitoring auction.
    Suspended,
    TradingTerminated,
    Settled,
    Closed,
}

impl MarketState {
    pub fn accepts_orders(&self) -> bool {
        matches!(self, MarketState::Pending | MarketState::Active | MarketState::Suspended)
    }

    pub fn is_final(&self) -> bool {
        matches!(self, MarketState::Settled | MarketState::Closed)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AuctionTrigger {
    Opening,
    Price,
    Liquidity,
}

/// The auction the market is currently in.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuctionWindow {
    pub trigger: AuctionTrigger,
    pub extension_trigger: Option<AuctionTrigger>,
    pub start: Timestamp,
    pub end: Timestamp,
}

impl AuctionWindow {
    pub fn new(trigger: AuctionTrigger, start: Timestamp, duration_secs: i64) -> Result<Self, InvariantViolation> {
        Ok(Self {
            trigger,
            extension_trigger: None,
            start,
            end: start.add_secs(duration_secs)?,
        })
    }

    pub fn extend(&mut self, by: AuctionTrigger, secs: i64) -> Result<(), InvariantViolation> {
        self.end = self.end.add_secs(secs)?;
        self.extension_trigger = Some(by);
        Ok(())
    }

    pub fn expired(&self, now: Timestamp) -> bool {
        now >= self.end
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MarketData {
    pub market: MarketId,
    pub mark_price: Option<Price>,
    pub last_traded_price: Option<Price>,
    pub best_bid_price: Option<Price>,
    pub best_bid_volume: u64,
    pub best_offer_price: Option<Price>,
    pub best_offer_volume: u64,
    pub best_static_bid_price: Option<Price>,
    pub best_static_offer_price: Option<Price>,
    pub mid_price: Option<Decimal>,
    pub indicative_price: Option<Price>,
    pub indicative_volume: u64,
    pub open_interest: u64,
    pub target_stake: Amount,
    pub supplied_stake: Amount,
    pub trading_mode: TradingMode,
    pub market_state: MarketState,
    pub auction_start: Option<Timestamp>,
    pub auction_end: Option<Timestamp>,
    pub trigger: Option<AuctionTrigger>,
    pub extension_trigger: Option<AuctionTrigger>,
    pub price_monitoring_bounds: Vec<PriceBound>,
    pub timestamp: Timestamp,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extension_pushes_end_and_records_trigger() {
        let mut window = AuctionWindow::new(AuctionTrigger::Price, Timestamp::from_secs(10), 30).unwrap();
        assert!(!window.expired(Timestamp::from_secs(39)));
        assert!(window.expired(Timestamp::from_secs(40)));
        window.extend(AuctionTrigger::Liquidity, 5).unwrap();
        assert_eq!(window.end, Timestamp::from_secs(45));
        assert_eq!(window.extension_trigger, Some(AuctionTrigger::Liquidity));
    }

    #[test]
    fn only_live_states_take_orders() {
        assert!(MarketState::Suspended.accepts_orders());
        assert!(!MarketState::TradingTerminated.accepts_orders());
        assert!(MarketState::Closed.is_final());
    }
}
