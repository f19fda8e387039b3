// 2.x order book: price-time priority, continuous matching, auction uncrossing
// and pegged order repricing. the book never touches money; callers turn its
// fills into trades.

pub mod peg;
pub mod side;
pub mod uncross;

pub use peg::StaticRefs;
pub use side::{BookSide, PriorityKey};
pub use uncross::{Indicative, UncrossFill};

use crate::num::InvariantViolation;
use crate::order::{Order, OrderError, OrderStatus, OrderType, TimeInForce};
use crate::types::{MarketId, OrderId, PartyId, Price, Side, Timestamp};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::collections::{BTreeMap, BTreeSet};
use tracing::trace;

/// One resting order an aggressor would hit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannedFill {
    pub maker: OrderId,
    pub maker_party: PartyId,
    pub price: Price,
    pub size: u64,
}

/// Read-only preview of what matching an order would do right now.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MatchPlan {
    pub fills: Vec<PlannedFill>,
    /// Matching stopped at the aggressor's own resting order.
    pub self_trade: bool,
    /// FOK order that could not fill in full. Fills are empty.
    pub fok_failed: bool,
}

impl MatchPlan {
    pub fn filled(&self) -> u64 {
        self.fills.iter().map(|f| f.size).sum()
    }
}

/// A fill applied to the book. `maker` is the resting order after the fill.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fill {
    pub maker: Order,
    pub price: Price,
    pub size: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubmitOutcome {
    pub order: Order,
    pub fills: Vec<Fill>,
}

/// One uncrossing match, with both orders as they stand after it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuctionFill {
    pub buy: Order,
    pub sell: Order,
    pub size: u64,
}

#[derive(Debug, Clone)]
pub struct OrderBook {
    market: MarketId,
    tick_size: Decimal,
    bids: BookSide,
    asks: BookSide,
    index: BTreeMap<OrderId, (Side, PriorityKey)>,
    parked: BTreeMap<OrderId, Order>,
    next_seq: u64,
    in_auction: bool,
}

impl OrderBook {
    pub fn new(market: MarketId, tick_size: Decimal) -> Self {
        Self {
            market,
            tick_size,
            bids: BookSide::new(Side::Buy),
            asks: BookSide::new(Side::Sell),
            index: BTreeMap::new(),
            parked: BTreeMap::new(),
            next_seq: 1,
            in_auction: false,
        }
    }

    pub fn market(&self) -> &MarketId {
        &self.market
    }

    pub fn in_auction(&self) -> bool {
        self.in_auction
    }

    fn side(&self, side: Side) -> &BookSide {
        match side {
            Side::Buy => &self.bids,
            Side::Sell => &self.asks,
        }
    }

    fn side_mut(&mut self, side: Side) -> &mut BookSide {
        match side {
            Side::Buy => &mut self.bids,
            Side::Sell => &mut self.asks,
        }
    }

    // ---- queries ----

    pub fn get(&self, id: OrderId) -> Option<&Order> {
        match self.index.get(&id) {
            Some((side, key)) => self.side(*side).get(key),
            None => self.parked.get(&id),
        }
    }

    pub fn contains(&self, id: OrderId) -> bool {
        self.index.contains_key(&id) || self.parked.contains_key(&id)
    }

    /// Every live order, by id.
    pub fn orders(&self) -> Vec<&Order> {
        let mut all: Vec<&Order> = self
            .index
            .keys()
            .filter_map(|id| self.get(*id))
            .chain(self.parked.values())
            .collect();
        all.sort_by_key(|o| o.id);
        all
    }

    pub fn len(&self) -> usize {
        self.index.len() + self.parked.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn party_orders(&self, party: &PartyId) -> Vec<Order> {
        self.orders()
            .into_iter()
            .filter(|o| &o.party == party)
            .cloned()
            .collect()
    }

    /// Live buy and sell volume of a party, parked pegs and hidden iceberg
    /// volume included.
    pub fn potential_volume(&self, party: &PartyId) -> Result<(u64, u64), InvariantViolation> {
        let mut buy = 0u64;
        let mut sell = 0u64;
        for o in self.orders().into_iter().filter(|o| &o.party == party) {
            let total = match o.side {
                Side::Buy => &mut buy,
                Side::Sell => &mut sell,
            };
            *total = total
                .checked_add(o.true_remaining())
                .ok_or(InvariantViolation::Overflow("order volume"))?;
        }
        Ok((buy, sell))
    }

    pub fn parties(&self) -> BTreeSet<PartyId> {
        self.orders().into_iter().map(|o| o.party.clone()).collect()
    }

    pub fn best_bid(&self) -> Option<(Price, u64)> {
        let price = self.bids.best_price()?;
        Some((price, self.bids.volume_at(price)))
    }

    pub fn best_ask(&self) -> Option<(Price, u64)> {
        let price = self.asks.best_price()?;
        Some((price, self.asks.volume_at(price)))
    }

    pub fn static_refs(&self) -> StaticRefs {
        StaticRefs {
            best_bid: self.bids.best_static(),
            best_ask: self.asks.best_static(),
        }
    }

    pub fn mid(&self) -> Option<Decimal> {
        let (bid, _) = self.best_bid()?;
        let (ask, _) = self.best_ask()?;
        Some((bid.value() + ask.value()) / dec!(2))
    }

    pub fn is_crossed(&self) -> bool {
        match (self.bids.best_price(), self.asks.best_price()) {
            (Some(bid), Some(ask)) => bid >= ask,
            _ => false,
        }
    }

    /// Average price a `side` order of `volume` would pay walking the opposite side.
    pub fn fill_price(&self, side: Side, volume: u64) -> Option<Decimal> {
        self.side(side.opposite()).vwap(volume)
    }

    pub fn indicative(&self) -> Option<Indicative> {
        uncross::indicative(&self.bids, &self.asks, self.tick_size)
    }

    // ---- continuous matching ----

    /// 2.1: what matching `order` against the book would do, without touching it.
    pub fn plan(&self, order: &Order) -> MatchPlan {
        let mut plan = MatchPlan::default();
        let mut left = order.remaining;

        for (_, maker) in self.side(order.side.opposite()).iter() {
            if left == 0 {
                break;
            }
            let Some(price) = maker.price else { break };
            if !order.crosses(price) {
                break;
            }
            if maker.party == order.party {
                plan.self_trade = true;
                break;
            }
            let size = left.min(maker.remaining);
            plan.fills.push(PlannedFill {
                maker: maker.id,
                maker_party: maker.party.clone(),
                price,
                size,
            });
            left -= size;
        }

        if order.time_in_force == TimeInForce::FOK && left > 0 {
            plan.fills.clear();
            plan.fok_failed = !plan.self_trade;
        }
        plan
    }

    /// Apply a plan produced by `plan` on the unchanged book, then settle the
    /// aggressor's remainder according to its time in force.
    pub fn execute(&mut self, mut order: Order, plan: &MatchPlan, now: Timestamp) -> Result<SubmitOutcome, InvariantViolation> {
        if order.time_in_force == TimeInForce::FOK && (plan.fok_failed || plan.self_trade) {
            let reason = plan.self_trade.then_some(OrderError::SelfTrading);
            order.finish(OrderStatus::Stopped, reason, now);
            return Ok(SubmitOutcome { order, fills: Vec::new() });
        }

        let mut fills = Vec::with_capacity(plan.fills.len());
        for planned in &plan.fills {
            let maker = self.fill_resting(planned.maker, planned.size, now)?;
            order.remaining -= planned.size;
            fills.push(Fill {
                maker,
                price: planned.price,
                size: planned.size,
            });
        }
        order.updated_at = now;

        if order.remaining == 0 {
            order.status = OrderStatus::Filled;
        } else if plan.self_trade {
            order.finish(OrderStatus::Stopped, Some(OrderError::SelfTrading), now);
        } else if order.order_type == OrderType::Market || !order.time_in_force.rests() {
            let status = if fills.is_empty() {
                OrderStatus::Stopped
            } else {
                OrderStatus::PartiallyFilled
            };
            order.finish(status, None, now);
        } else {
            order.status = OrderStatus::Active;
            order = self.insert(order)?;
        }

        trace!(market = %self.market, order = %order.id, fills = fills.len(), "order matched");
        Ok(SubmitOutcome { order, fills })
    }

    pub fn submit(&mut self, order: Order, now: Timestamp) -> Result<SubmitOutcome, InvariantViolation> {
        if self.in_auction {
            let order = self.insert(order)?;
            return Ok(SubmitOutcome { order, fills: Vec::new() });
        }
        let plan = self.plan(&order);
        self.execute(order, &plan, now)
    }

    // take `size` off a resting order, removing it once fully filled
    fn fill_resting(&mut self, id: OrderId, size: u64, now: Timestamp) -> Result<Order, InvariantViolation> {
        let (side, key) = *self
            .index
            .get(&id)
            .ok_or_else(|| InvariantViolation::Broken(format!("order {id} vanished mid-match")))?;
        let book_side = self.side_mut(side);
        let maker = book_side
            .get_mut(&key)
            .ok_or_else(|| InvariantViolation::Broken(format!("order {id} missing from its level")))?;
        maker.remaining = maker
            .remaining
            .checked_sub(size)
            .ok_or_else(|| InvariantViolation::Broken(format!("order {id} overfilled")))?;
        maker.updated_at = now;

        if maker.iceberg_needs_refresh() {
            let mut refreshed = book_side
                .remove(&key)
                .ok_or_else(|| InvariantViolation::Broken(format!("order {id} missing on refresh")))?;
            self.index.remove(&id);
            refreshed.status = OrderStatus::Active;
            trace!(market = %self.market, order = %id, "iceberg refreshed");
            return self.insert(refreshed);
        }
        if maker.remaining == 0 {
            maker.status = OrderStatus::Filled;
            let done = book_side
                .remove(&key)
                .ok_or_else(|| InvariantViolation::Broken(format!("order {id} missing on removal")))?;
            self.index.remove(&id);
            return Ok(done);
        }
        Ok(maker.clone())
    }

    /// Put a priced order on the book with a fresh time priority. Icebergs
    /// show no more than their peak.
    pub fn insert(&mut self, mut order: Order) -> Result<Order, InvariantViolation> {
        order.set_iceberg_peaks();
        let price = order
            .price
            .ok_or_else(|| InvariantViolation::Broken(format!("order {} inserted without a price", order.id)))?;
        let key = PriorityKey::new(order.side, price, self.next_seq);
        self.next_seq += 1;
        self.index.insert(order.id, (order.side, key));
        self.side_mut(order.side).insert(key, order.clone());
        Ok(order)
    }

    pub fn park(&mut self, mut order: Order, now: Timestamp) -> Order {
        order.price = None;
        order.status = OrderStatus::Parked;
        order.updated_at = now;
        self.parked.insert(order.id, order.clone());
        order
    }

    pub fn remove(&mut self, id: OrderId) -> Option<Order> {
        if let Some((side, key)) = self.index.remove(&id) {
            return self.side_mut(side).remove(&key);
        }
        self.parked.remove(&id)
    }

    /// Edit an order without touching its priority. Price and side must not change.
    pub fn update_in_place(&mut self, id: OrderId, edit: impl FnOnce(&mut Order)) -> Option<Order> {
        if let Some((side, key)) = self.index.get(&id).copied() {
            let order = self.side_mut(side).get_mut(&key)?;
            edit(order);
            return Some(order.clone());
        }
        let order = self.parked.get_mut(&id)?;
        edit(order);
        Some(order.clone())
    }

    /// Remove every order matching `pred`, in id order.
    pub fn remove_where(&mut self, pred: impl Fn(&Order) -> bool) -> Vec<Order> {
        let ids: Vec<OrderId> = self
            .orders()
            .into_iter()
            .filter(|o| pred(o))
            .map(|o| o.id)
            .collect();
        ids.into_iter().filter_map(|id| self.remove(id)).collect()
    }

    pub fn remove_expired(&mut self, now: Timestamp) -> Vec<Order> {
        self.remove_where(|o| {
            o.time_in_force == TimeInForce::GTT && o.expires_at.map(|t| now >= t).unwrap_or(false)
        })
    }

    // ---- pegs ----

    fn would_cross(&self, side: Side, price: Price) -> bool {
        match side {
            Side::Buy => self.asks.best_price().map(|ask| price >= ask).unwrap_or(false),
            Side::Sell => self.bids.best_price().map(|bid| price <= bid).unwrap_or(false),
        }
    }

    /// Place a pegged order at its current reference, or park it.
    pub fn place_pegged(&mut self, mut order: Order, now: Timestamp) -> Result<Order, InvariantViolation> {
        let refs = self.static_refs();
        let target = peg::peg_price(&order, &refs, self.tick_size).filter(|p| !self.would_cross(order.side, *p));
        match target {
            Some(price) if !self.in_auction => {
                order.price = Some(price);
                order.status = OrderStatus::Active;
                order.updated_at = now;
                self.insert(order)
            }
            _ => Ok(self.park(order, now)),
        }
    }

    /// 2.4: reprice every peg in id order. Returns the orders whose price or
    /// parked state changed.
    pub fn reprice_pegs(&mut self, now: Timestamp) -> Result<Vec<Order>, InvariantViolation> {
        if self.in_auction {
            return Ok(Vec::new());
        }
        let refs = self.static_refs();
        let ids: BTreeSet<OrderId> = self
            .orders()
            .into_iter()
            .filter(|o| o.is_pegged())
            .map(|o| o.id)
            .collect();

        let mut changed = Vec::new();
        for id in ids {
            let priority = self.index.get(&id).copied();
            let Some(mut order) = self.remove(id) else { continue };
            let target = peg::peg_price(&order, &refs, self.tick_size).filter(|p| !self.would_cross(order.side, *p));

            match (target, priority) {
                (Some(price), Some((side, key))) if order.price == Some(price) => {
                    self.index.insert(id, (side, key));
                    self.side_mut(side).insert(key, order);
                }
                (Some(price), _) => {
                    order.price = Some(price);
                    order.status = OrderStatus::Active;
                    order.updated_at = now;
                    changed.push(self.insert(order)?);
                }
                (None, _) => {
                    let was_parked = order.status == OrderStatus::Parked;
                    let parked = self.park(order, now);
                    if !was_parked {
                        changed.push(parked);
                    }
                }
            }
        }
        Ok(changed)
    }

    // ---- auctions ----

    /// Switch to auction mode. Pegs are parked; nothing matches until uncrossing.
    pub fn enter_auction(&mut self, now: Timestamp) -> Vec<Order> {
        self.in_auction = true;
        let pegs: Vec<OrderId> = self
            .index
            .keys()
            .copied()
            .filter(|id| self.get(*id).map(|o| o.is_pegged()).unwrap_or(false))
            .collect();
        let mut parked = Vec::with_capacity(pegs.len());
        for id in pegs {
            if let Some(order) = self.remove(id) {
                parked.push(self.park(order, now));
            }
        }
        parked
    }

    /// Match everything that crosses at the uncrossing price.
    pub fn uncross(&mut self, now: Timestamp) -> Result<Option<(Price, Vec<AuctionFill>)>, InvariantViolation> {
        let Some(ind) = self.indicative() else {
            return Ok(None);
        };
        let planned = uncross::plan_uncross(&self.bids, &self.asks, ind.price);
        let icebergs: BTreeSet<OrderId> = planned
            .iter()
            .flat_map(|f| [f.buy, f.sell])
            .filter(|id| self.get(*id).map_or(false, |o| o.iceberg.is_some()))
            .collect();
        for id in &icebergs {
            self.update_in_place(*id, Order::unhide);
        }

        let mut fills = Vec::with_capacity(planned.len());
        for f in planned {
            let buy = self.fill_resting(f.buy, f.size, now)?;
            let sell = self.fill_resting(f.sell, f.size, now)?;
            fills.push(AuctionFill { buy, sell, size: f.size });
        }

        // what is left of an iceberg hides again behind its peak, keeping its place
        for id in icebergs {
            self.update_in_place(id, Order::set_iceberg_peaks);
        }
        for fill in &mut fills {
            fill.buy.set_iceberg_peaks();
            fill.sell.set_iceberg_peaks();
        }
        Ok(Some((ind.price, fills)))
    }

    pub fn leave_auction(&mut self) {
        self.in_auction = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::order::{PegReference, PeggedOrder};

    fn order(id: u64, party: &str, side: Side, price: Option<Decimal>, size: u64, tif: TimeInForce) -> Order {
        Order {
            id: OrderId(id),
            market: MarketId::new("m"),
            party: PartyId::new(party),
            side,
            order_type: if price.is_some() { OrderType::Limit } else { OrderType::Market },
            time_in_force: tif,
            price: price.and_then(Price::new),
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

    fn limit(id: u64, party: &str, side: Side, price: Decimal, size: u64) -> Order {
        order(id, party, side, Some(price), size, TimeInForce::GTC)
    }

    fn book() -> OrderBook {
        OrderBook::new(MarketId::new("m"), dec!(1))
    }

    #[test]
    fn crossing_limit_orders_trade_at_maker_price() {
        let mut book = book();
        book.submit(limit(1, "a", Side::Buy, dec!(100), 10), Timestamp::default()).unwrap();
        let out = book.submit(limit(2, "b", Side::Sell, dec!(99), 10), Timestamp::default()).unwrap();
        assert_eq!(out.order.status, OrderStatus::Filled);
        assert_eq!(out.fills.len(), 1);
        assert_eq!(out.fills[0].price.value(), dec!(100));
        assert_eq!(out.fills[0].maker.status, OrderStatus::Filled);
        assert!(book.is_empty());
    }

    #[test]
    fn fill_price_walks_the_opposite_side() {
        let mut book = book();
        book.submit(limit(1, "a", Side::Sell, dec!(100), 4), Timestamp::default()).unwrap();
        book.submit(limit(2, "b", Side::Sell, dec!(102), 4), Timestamp::default()).unwrap();
        assert_eq!(book.fill_price(Side::Buy, 8), Some(dec!(101)));
        assert_eq!(book.fill_price(Side::Buy, 2), Some(dec!(100)));
        assert_eq!(book.fill_price(Side::Buy, 9), None);
        assert_eq!(book.fill_price(Side::Sell, 1), None);
    }

    #[test]
    fn earlier_order_at_same_price_fills_first() {
        let mut book = book();
        book.submit(limit(1, "a", Side::Sell, dec!(100), 5), Timestamp::default()).unwrap();
        book.submit(limit(2, "b", Side::Sell, dec!(100), 5), Timestamp::default()).unwrap();
        let out = book.submit(limit(3, "c", Side::Buy, dec!(100), 5), Timestamp::default()).unwrap();
        assert_eq!(out.fills[0].maker.id, OrderId(1));
        assert!(book.get(OrderId(2)).is_some());
    }

    #[test]
    fn ioc_remainder_is_cancelled() {
        let mut book = book();
        book.submit(limit(1, "a", Side::Sell, dec!(100), 4), Timestamp::default()).unwrap();
        let out = book
            .submit(order(2, "b", Side::Buy, Some(dec!(100)), 10, TimeInForce::IOC), Timestamp::default())
            .unwrap();
        assert_eq!(out.order.status, OrderStatus::PartiallyFilled);
        assert_eq!(out.order.remaining, 6);
        assert!(book.is_empty());

        let out = book
            .submit(order(3, "b", Side::Buy, None, 10, TimeInForce::IOC), Timestamp::default())
            .unwrap();
        assert_eq!(out.order.status, OrderStatus::Stopped);
    }

    #[test]
    fn fok_is_all_or_nothing() {
        let mut book = book();
        book.submit(limit(1, "a", Side::Sell, dec!(100), 4), Timestamp::default()).unwrap();
        let out = book
            .submit(order(2, "b", Side::Buy, Some(dec!(100)), 5, TimeInForce::FOK), Timestamp::default())
            .unwrap();
        assert_eq!(out.order.status, OrderStatus::Stopped);
        assert!(out.fills.is_empty());
        assert_eq!(book.get(OrderId(1)).unwrap().remaining, 4);
    }

    #[test]
    fn self_trade_stops_aggressor_after_prior_fills() {
        let mut book = book();
        book.submit(limit(1, "a", Side::Sell, dec!(100), 3), Timestamp::default()).unwrap();
        book.submit(limit(2, "b", Side::Sell, dec!(101), 3), Timestamp::default()).unwrap();
        let out = book.submit(limit(3, "b", Side::Buy, dec!(101), 10), Timestamp::default()).unwrap();
        assert_eq!(out.fills.len(), 1);
        assert_eq!(out.order.status, OrderStatus::Stopped);
        assert_eq!(out.order.reason, Some(OrderError::SelfTrading));
        assert_eq!(out.order.remaining, 7);
        // the party's own resting order is untouched
        assert_eq!(book.get(OrderId(2)).unwrap().remaining, 3);
    }

    #[test]
    fn plan_does_not_mutate() {
        let mut book = book();
        book.submit(limit(1, "a", Side::Sell, dec!(100), 3), Timestamp::default()).unwrap();
        let plan = book.plan(&limit(2, "b", Side::Buy, dec!(100), 2));
        assert_eq!(plan.filled(), 2);
        assert_eq!(book.get(OrderId(1)).unwrap().remaining, 3);
    }

    #[test]
    fn auction_accumulates_then_uncrosses() {
        let mut book = book();
        book.enter_auction(Timestamp::default());
        let now = Timestamp::default();
        book.submit(limit(1, "a", Side::Buy, dec!(105), 11), now).unwrap();
        book.submit(limit(2, "b", Side::Buy, dec!(102), 5), now).unwrap();
        book.submit(limit(3, "c", Side::Sell, dec!(100), 8), now).unwrap();
        book.submit(limit(4, "d", Side::Sell, dec!(103), 9), now).unwrap();
        assert!(book.is_crossed());

        let (price, fills) = book.uncross(now).unwrap().unwrap();
        book.leave_auction();
        assert_eq!(price.value(), dec!(104));
        assert_eq!(fills.iter().map(|f| f.size).sum::<u64>(), 11);
        assert!(!book.is_crossed());
        assert_eq!(book.get(OrderId(4)).unwrap().remaining, 6);
    }

    #[test]
    fn pegs_follow_the_static_best_and_park_without_reference() {
        let mut book = book();
        let now = Timestamp::default();
        let mut peg = order(9, "p", Side::Buy, None, 2, TimeInForce::GTC);
        peg.order_type = OrderType::Limit;
        peg.peg = Some(PeggedOrder {
            reference: PegReference::BestBid,
            offset: dec!(1),
        });
        let placed = book.place_pegged(peg, now).unwrap();
        assert_eq!(placed.status, OrderStatus::Parked);

        book.submit(limit(1, "a", Side::Buy, dec!(100), 1), now).unwrap();
        let changed = book.reprice_pegs(now).unwrap();
        assert_eq!(changed.len(), 1);
        assert_eq!(book.get(OrderId(9)).unwrap().price.unwrap().value(), dec!(99));

        book.submit(limit(2, "a", Side::Buy, dec!(101), 1), now).unwrap();
        book.reprice_pegs(now).unwrap();
        assert_eq!(book.get(OrderId(9)).unwrap().price.unwrap().value(), dec!(100));

        book.remove(OrderId(1));
        book.remove(OrderId(2));
        book.reprice_pegs(now).unwrap();
        assert_eq!(book.get(OrderId(9)).unwrap().status, OrderStatus::Parked);
    }

    fn iceberg(id: u64, party: &str, side: Side, price: Decimal, size: u64, peak: u64, minimum: u64) -> Order {
        let mut o = limit(id, party, side, price, size);
        o.iceberg = Some(crate::order::IcebergOrder {
            peak_size: peak,
            minimum_visible_size: minimum,
            reserved_remaining: 0,
        });
        o
    }

    #[test]
    fn potential_volume_overflow_is_an_invariant_error() {
        let mut book = book();
        book.insert(limit(1, "a", Side::Buy, dec!(100), u64::MAX - 1)).unwrap();
        book.insert(limit(2, "a", Side::Buy, dec!(99), 2)).unwrap();
        assert_eq!(
            book.potential_volume(&PartyId::new("a")),
            Err(InvariantViolation::Overflow("order volume"))
        );
        assert_eq!(book.potential_volume(&PartyId::new("b")), Ok((0, 0)));
    }

    #[test]
    fn resting_iceberg_shows_its_peak_and_refreshes_to_the_back() {
        let mut book = book();
        let now = Timestamp::default();
        book.submit(iceberg(1, "ice", Side::Sell, dec!(100), 30, 10, 5), now).unwrap();
        book.submit(limit(2, "plain", Side::Sell, dec!(100), 10), now).unwrap();
        assert_eq!(book.best_ask(), Some((Price::new(dec!(100)).unwrap(), 20)));
        assert_eq!(book.potential_volume(&PartyId::new("ice")), Ok((0, 30)));

        let out = book.submit(limit(3, "t", Side::Buy, dec!(100), 12), now).unwrap();
        let hit: Vec<(OrderId, u64)> = out.fills.iter().map(|f| (f.maker.id, f.size)).collect();
        assert_eq!(hit, vec![(OrderId(1), 10), (OrderId(2), 2)]);
        let ice = book.get(OrderId(1)).unwrap();
        assert_eq!((ice.remaining, ice.true_remaining(), ice.status), (10, 20, OrderStatus::Active));

        // the refreshed peak queues behind the plain order
        let out = book.submit(limit(4, "t", Side::Buy, dec!(100), 10), now).unwrap();
        let hit: Vec<(OrderId, u64)> = out.fills.iter().map(|f| (f.maker.id, f.size)).collect();
        assert_eq!(hit, vec![(OrderId(2), 8), (OrderId(1), 2)]);
        assert_eq!(book.get(OrderId(1)).unwrap().remaining, 8);
    }

    #[test]
    fn aggressive_iceberg_trades_in_full_then_rests_behind_its_peak() {
        let mut book = book();
        let now = Timestamp::default();
        book.submit(limit(1, "a", Side::Sell, dec!(100), 8), now).unwrap();
        let out = book.submit(iceberg(2, "ice", Side::Buy, dec!(100), 25, 5, 1), now).unwrap();
        assert_eq!(out.fills.iter().map(|f| f.size).sum::<u64>(), 8);
        assert_eq!(out.order.remaining, 5);
        assert_eq!(out.order.true_remaining(), 17);
        assert_eq!(out.order.filled(), 8);
        assert_eq!(book.best_bid().map(|(_, v)| v), Some(5));
    }

    #[test]
    fn uncross_trades_hidden_iceberg_volume() {
        let mut book = book();
        let now = Timestamp::default();
        book.enter_auction(now);
        book.submit(iceberg(1, "ice", Side::Sell, dec!(100), 30, 5, 1), now).unwrap();
        book.submit(limit(2, "b", Side::Buy, dec!(101), 15), now).unwrap();
        assert_eq!(book.get(OrderId(1)).unwrap().remaining, 5);
        assert_eq!(book.indicative().map(|i| i.volume), Some(15));

        let (_, fills) = book.uncross(now).unwrap().unwrap();
        book.leave_auction();
        assert_eq!(fills.len(), 1);
        assert_eq!(fills[0].size, 15);
        assert_eq!(fills[0].sell.remaining, 5);
        let ice = book.get(OrderId(1)).unwrap();
        assert_eq!((ice.remaining, ice.true_remaining()), (5, 15));
        assert!(book.get(OrderId(2)).is_none());
    }

    #[test]
    fn gtt_orders_expire() {
        let mut book = book();
        let mut o = order(1, "a", Side::Buy, Some(dec!(100)), 1, TimeInForce::GTT);
        o.expires_at = Some(Timestamp::from_secs(10));
        book.submit(o, Timestamp::default()).unwrap();
        assert!(book.remove_expired(Timestamp::from_secs(9)).is_empty());
        assert_eq!(book.remove_expired(Timestamp::from_secs(10)).len(), 1);
    }
}
