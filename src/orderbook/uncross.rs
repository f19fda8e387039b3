// 2.2: auction uncrossing. pick the single price that trades the most volume,
// then match every eligible order at that price in priority order.

use super::side::BookSide;
use crate::order::Order;
use crate::types::{OrderId, Price};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Indicative {
    pub price: Price,
    pub volume: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UncrossFill {
    pub buy: OrderId,
    pub sell: OrderId,
    pub size: u64,
}

fn cumulative(bids: &[(Price, u64)], asks: &[(Price, u64)], price: Price) -> (u64, u64) {
    let total = |levels: &[(Price, u64)], keep: &dyn Fn(Price) -> bool| {
        levels
            .iter()
            .filter(|(p, _)| keep(*p))
            .fold(0u64, |acc, (_, v)| acc.saturating_add(*v))
    };
    let bid = total(bids, &|p| p >= price);
    let ask = total(asks, &|p| p <= price);
    (bid, ask)
}

/// Uncrossing price and volume, or None when the book is not crossed.
///
/// Ties on volume go to the smallest imbalance between cumulative bid and ask
/// volume. Prices still tied resolve to the midpoint of the lowest and highest,
/// floored to the tick.
pub fn indicative(bids: &BookSide, asks: &BookSide, tick_size: Decimal) -> Option<Indicative> {
    let best_bid = bids.best_price()?;
    let best_ask = asks.best_price()?;
    if best_bid < best_ask {
        return None;
    }

    let bid_levels = bids.auction_levels();
    let ask_levels = asks.auction_levels();

    let mut candidates: Vec<Price> = bid_levels
        .iter()
        .chain(ask_levels.iter())
        .map(|(p, _)| *p)
        .filter(|p| *p >= best_ask && *p <= best_bid)
        .collect();
    candidates.sort();
    candidates.dedup();

    // (price, volume, imbalance)
    let scored: Vec<(Price, u64, u64)> = candidates
        .into_iter()
        .map(|p| {
            let (bid, ask) = cumulative(&bid_levels, &ask_levels, p);
            (p, bid.min(ask), bid.abs_diff(ask))
        })
        .collect();

    let max_volume = scored.iter().map(|(_, v, _)| *v).max()?;
    if max_volume == 0 {
        return None;
    }
    let min_imbalance = scored
        .iter()
        .filter(|(_, v, _)| *v == max_volume)
        .map(|(_, _, i)| *i)
        .min()?;
    let survivors: Vec<Price> = scored
        .iter()
        .filter(|(_, v, i)| *v == max_volume && *i == min_imbalance)
        .map(|(p, _, _)| *p)
        .collect();

    let low = *survivors.first()?;
    let high = *survivors.last()?;
    let mid = Price::new((low.value() + high.value()) / dec!(2))?;
    let price = mid.floor_to_tick(tick_size).filter(|p| *p >= low).unwrap_or(low);

    let (bid, ask) = cumulative(&bid_levels, &ask_levels, price);
    Some(Indicative {
        price,
        volume: bid.min(ask),
    })
}

fn eligible<'a>(side: &'a BookSide, price: Price) -> impl Iterator<Item = &'a Order> + 'a {
    side.iter()
        .map(|(_, o)| o)
        .filter(move |o| o.price.is_some() && o.crosses(price))
}

/// Matches for an uncross at `price`: every bid at or above and every ask at or
/// below, walked in priority order on both sides. Icebergs trade in full.
pub fn plan_uncross(bids: &BookSide, asks: &BookSide, price: Price) -> Vec<UncrossFill> {
    let mut fills = Vec::new();
    let mut buys = eligible(bids, price).map(|o| (o.id, o.true_remaining()));
    let mut sells = eligible(asks, price).map(|o| (o.id, o.true_remaining()));

    let mut buy = buys.next();
    let mut sell = sells.next();
    while let (Some((buy_id, buy_left)), Some((sell_id, sell_left))) = (buy, sell) {
        let size = buy_left.min(sell_left);
        fills.push(UncrossFill {
            buy: buy_id,
            sell: sell_id,
            size,
        });
        buy = if buy_left == size { buys.next() } else { Some((buy_id, buy_left - size)) };
        sell = if sell_left == size { sells.next() } else { Some((sell_id, sell_left - size)) };
    }
    fills
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::order::{OrderStatus, OrderType, TimeInForce};
    use crate::orderbook::side::PriorityKey;
    use crate::types::{MarketId, PartyId, Side, Timestamp};

    fn add(side: &mut BookSide, id: u64, price: Decimal, size: u64) {
        let s = side.side();
        let order = Order {
            id: OrderId(id),
            market: MarketId::new("m"),
            party: PartyId::new(format!("p{id}")),
            side: s,
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
        };
        side.insert(PriorityKey::new(s, Price::new_unchecked(price), id), order);
    }

    fn opening_book() -> (BookSide, BookSide) {
        let mut bids = BookSide::new(Side::Buy);
        let mut asks = BookSide::new(Side::Sell);
        add(&mut bids, 1, dec!(105), 11);
        add(&mut bids, 2, dec!(102), 5);
        add(&mut asks, 3, dec!(100), 8);
        add(&mut asks, 4, dec!(103), 9);
        (bids, asks)
    }

    #[test]
    fn tied_prices_resolve_to_midpoint() {
        let (bids, asks) = opening_book();
        let ind = indicative(&bids, &asks, dec!(1)).unwrap();
        assert_eq!(ind.price.value(), dec!(104));
        assert_eq!(ind.volume, 11);
    }

    #[test]
    fn uncross_fills_in_priority_order() {
        let (bids, asks) = opening_book();
        let fills = plan_uncross(&bids, &asks, Price::new_unchecked(dec!(104)));
        assert_eq!(
            fills,
            vec![
                UncrossFill { buy: OrderId(1), sell: OrderId(3), size: 8 },
                UncrossFill { buy: OrderId(1), sell: OrderId(4), size: 3 },
            ]
        );
    }

    #[test]
    fn uncrossed_book_has_no_indicative() {
        let mut bids = BookSide::new(Side::Buy);
        let mut asks = BookSide::new(Side::Sell);
        add(&mut bids, 1, dec!(99), 5);
        add(&mut asks, 2, dec!(100), 5);
        assert!(indicative(&bids, &asks, dec!(1)).is_none());
    }

    #[test]
    fn single_crossing_level() {
        let mut bids = BookSide::new(Side::Buy);
        let mut asks = BookSide::new(Side::Sell);
        add(&mut bids, 1, dec!(100), 10);
        add(&mut asks, 2, dec!(100), 4);
        let ind = indicative(&bids, &asks, dec!(1)).unwrap();
        assert_eq!(ind.price.value(), dec!(100));
        assert_eq!(ind.volume, 4);
    }
}
