//! One side of the book.
//!
//! Orders are keyed by `(rank, seq)`. Bids rank by negated price so that for
//! both sides the first entry is the best order, with earlier arrivals first
//! at equal price.

use crate::order::Order;
use crate::types::{Price, Side};
use rust_decimal::Decimal;
use std::collections::BTreeMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PriorityKey {
    pub rank: Decimal,
    pub seq: u64,
}

impl PriorityKey {
    pub fn new(side: Side, price: Price, seq: u64) -> Self {
        let rank = match side {
            Side::Buy => -price.value(),
            Side::Sell => price.value(),
        };
        Self { rank, seq }
    }
}

#[derive(Debug, Clone)]
pub struct BookSide {
    side: Side,
    orders: BTreeMap<PriorityKey, Order>,
}

impl BookSide {
    pub fn new(side: Side) -> Self {
        Self {
            side,
            orders: BTreeMap::new(),
        }
    }

    pub fn side(&self) -> Side {
        self.side
    }

    pub fn is_empty(&self) -> bool {
        self.orders.is_empty()
    }

    pub fn len(&self) -> usize {
        self.orders.len()
    }

    pub fn insert(&mut self, key: PriorityKey, order: Order) {
        self.orders.insert(key, order);
    }

    pub fn remove(&mut self, key: &PriorityKey) -> Option<Order> {
        self.orders.remove(key)
    }

    pub fn get(&self, key: &PriorityKey) -> Option<&Order> {
        self.orders.get(key)
    }

    pub fn get_mut(&mut self, key: &PriorityKey) -> Option<&mut Order> {
        self.orders.get_mut(key)
    }

    /// Orders in priority order, best first.
    pub fn iter(&self) -> impl Iterator<Item = (&PriorityKey, &Order)> {
        self.orders.iter()
    }

    pub fn best(&self) -> Option<(&PriorityKey, &Order)> {
        self.orders.iter().next()
    }

    pub fn best_price(&self) -> Option<Price> {
        self.best().and_then(|(_, o)| o.price)
    }

    /// Best price among orders that are not pegged.
    pub fn best_static(&self) -> Option<Price> {
        self.orders
            .values()
            .find(|o| o.peg.is_none())
            .and_then(|o| o.price)
    }

    pub fn volume_at(&self, price: Price) -> u64 {
        self.orders
            .values()
            .filter(|o| o.price == Some(price))
            .map(|o| o.remaining)
            .sum()
    }

    pub fn total_volume(&self) -> u64 {
        self.orders.values().map(|o| o.remaining).sum()
    }

    /// (price, visible volume) per level, best first.
    pub fn levels(&self) -> Vec<(Price, u64)> {
        self.levels_by(|o| o.remaining)
    }

    /// Levels with hidden iceberg volume counted, as an uncross trades it.
    pub fn auction_levels(&self) -> Vec<(Price, u64)> {
        self.levels_by(Order::true_remaining)
    }

    fn levels_by(&self, volume: impl Fn(&Order) -> u64) -> Vec<(Price, u64)> {
        let mut levels: Vec<(Price, u64)> = Vec::new();
        for order in self.orders.values() {
            let Some(price) = order.price else { continue };
            let size = volume(order);
            match levels.last_mut() {
                Some((p, v)) if *p == price => *v = v.saturating_add(size),
                _ => levels.push((price, size)),
            }
        }
        levels
    }

    /// Average price to fill `volume` against this side. None if the side is too thin.
    pub fn vwap(&self, volume: u64) -> Option<Decimal> {
        if volume == 0 {
            return None;
        }
        let mut left = volume;
        let mut cost = Decimal::ZERO;
        for (price, level_volume) in self.levels() {
            let take = left.min(level_volume);
            cost = cost.checked_add(price.value().checked_mul(Decimal::from(take))?)?;
            left -= take;
            if left == 0 {
                return cost.checked_div(Decimal::from(volume));
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::order::{OrderStatus, OrderType, TimeInForce};
    use crate::types::{MarketId, OrderId, PartyId, Timestamp};
    use rust_decimal_macros::dec;

    fn order(id: u64, side: Side, price: Decimal, size: u64) -> Order {
        Order {
            id: OrderId(id),
            market: MarketId::new("m"),
            party: PartyId::new("p"),
            side,
            order_type: OrderType::Limit,
            time_in_force: TimeInForce::GTC,
            price: Price::new(price),
            size,
            remaining: size,
            status: OrderStatus::Active,
            reason: None,
            peg: None,
            created_at: Timestamp::default(),
            updated_at: Timestamp::default(),
            expires_at: None,
            reference: String::new(),
            version: 1,
            iceberg: None,
        }
    }

    fn insert(side: &mut BookSide, o: Order, seq: u64) {
        let key = PriorityKey::new(side.side(), o.price.unwrap(), seq);
        side.insert(key, o);
    }

    #[test]
    fn bids_best_is_highest_then_earliest() {
        let mut bids = BookSide::new(Side::Buy);
        insert(&mut bids, order(1, Side::Buy, dec!(100), 1), 1);
        insert(&mut bids, order(2, Side::Buy, dec!(101), 1), 2);
        insert(&mut bids, order(3, Side::Buy, dec!(101), 1), 3);
        assert_eq!(bids.best().unwrap().1.id, OrderId(2));
        assert_eq!(bids.levels(), vec![(Price::new_unchecked(dec!(101)), 2), (Price::new_unchecked(dec!(100)), 1)]);
    }

    #[test]
    fn asks_best_is_lowest() {
        let mut asks = BookSide::new(Side::Sell);
        insert(&mut asks, order(1, Side::Sell, dec!(102), 5), 1);
        insert(&mut asks, order(2, Side::Sell, dec!(101), 5), 2);
        assert_eq!(asks.best_price().unwrap().value(), dec!(101));
        assert_eq!(asks.vwap(10).unwrap(), dec!(101.5));
        assert!(asks.vwap(11).is_none());
    }
}
