// 2.3: trades. immutable once printed; orders are referenced by id only.

use crate::fees::TradeFee;
use crate::types::{MarketId, OrderId, PartyId, Price, Side, Timestamp, TradeId};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Trade {
    pub id: TradeId,
    pub market: MarketId,
    pub buyer: PartyId,
    pub seller: PartyId,
    pub buy_order: OrderId,
    pub sell_order: OrderId,
    /// None for auction uncrossing and network closeout trades.
    pub aggressor: Option<Side>,
    pub price: Price,
    pub size: u64,
    pub timestamp: Timestamp,
    pub buyer_fee: TradeFee,
    pub seller_fee: TradeFee,
}

impl Trade {
    pub fn party_side(&self, party: &PartyId) -> Option<Side> {
        if &self.buyer == party {
            Some(Side::Buy)
        } else if &self.seller == party {
            Some(Side::Sell)
        } else {
            None
        }
    }
}
