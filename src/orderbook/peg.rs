// 2.4: pegged order pricing. references come from the static book only, so a
// peg never chases another peg.

use crate::order::{Order, PegReference};
use crate::types::{Price, Side};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StaticRefs {
    pub best_bid: Option<Price>,
    pub best_ask: Option<Price>,
}

impl StaticRefs {
    pub fn mid(&self) -> Option<Decimal> {
        Some((self.best_bid?.value() + self.best_ask?.value()) / dec!(2))
    }

    pub fn value(&self, reference: PegReference) -> Option<Decimal> {
        match reference {
            PegReference::BestBid => self.best_bid.map(|p| p.value()),
            PegReference::BestAsk => self.best_ask.map(|p| p.value()),
            PegReference::Mid => self.mid(),
        }
    }
}

/// Where a pegged order should sit. Buys round down to the tick, sells up, so
/// a mid peg never lands on the wrong side of the mid.
pub fn peg_price(order: &Order, refs: &StaticRefs, tick_size: Decimal) -> Option<Price> {
    let peg = order.peg?;
    let raw = peg.price_from(order.side, refs.value(peg.reference)?)?;
    if tick_size.is_zero() {
        return Some(raw);
    }
    match order.side {
        Side::Buy => raw.floor_to_tick(tick_size),
        Side::Sell => Price::new((raw.value() / tick_size).ceil() * tick_size),
    }
}
