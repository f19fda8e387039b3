// 5.0: position tracking per market. one Position per party that ever traded.
// 5.1 has increase/reduce/flip logic, 5.2 the market-wide tracker.

use crate::num::{self, InvariantViolation};
use crate::trade::Trade;
use crate::types::{MarketId, PartyId, Timestamp};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Position {
    pub party: PartyId,
    pub market: MarketId,
    pub open_volume: i64,
    pub average_entry_price: Decimal,
    pub realized_pnl: Decimal,
    pub unrealized_pnl: Decimal,
    pub updated_at: Timestamp,
}

impl Position {
    pub fn new(party: PartyId, market: MarketId, now: Timestamp) -> Self {
        Self {
            party,
            market,
            open_volume: 0,
            average_entry_price: Decimal::ZERO,
            realized_pnl: Decimal::ZERO,
            unrealized_pnl: Decimal::ZERO,
            updated_at: now,
        }
    }

    pub fn is_flat(&self) -> bool {
        self.open_volume == 0
    }

    // 5.1: apply a signed fill. same direction averages the entry, opposite
    // direction realizes pnl on the closed part, and a flip reopens at the fill price.
    pub fn apply_fill(&mut self, delta: i64, price: Decimal, now: Timestamp) -> Result<(), InvariantViolation> {
        let v = self.open_volume;
        let next = v
            .checked_add(delta)
            .ok_or(InvariantViolation::Overflow("open volume"))?;

        if v == 0 || v.signum() == delta.signum() {
            let old_cost = num::mul(Decimal::from(v.unsigned_abs()), self.average_entry_price)?;
            let new_cost = num::mul(Decimal::from(delta.unsigned_abs()), price)?;
            let total = num::add(old_cost, new_cost)?;
            self.average_entry_price = num::div(total, Decimal::from(next.unsigned_abs()))?;
        } else {
            let closed = v.unsigned_abs().min(delta.unsigned_abs());
            let per_unit = num::mul(num::sub(price, self.average_entry_price)?, Decimal::from(v.signum()))?;
            let pnl = num::mul(Decimal::from(closed), per_unit)?;
            self.realized_pnl = num::add(self.realized_pnl, pnl)?;

            if next == 0 {
                self.average_entry_price = Decimal::ZERO;
            } else if next.signum() != v.signum() {
                self.average_entry_price = price;
            }
        }

        self.open_volume = next;
        self.updated_at = now;
        Ok(())
    }

    pub fn mark(&mut self, mark_price: Decimal) -> Result<(), InvariantViolation> {
        self.unrealized_pnl = if self.open_volume == 0 {
            Decimal::ZERO
        } else {
            num::mul(
                Decimal::from(self.open_volume),
                num::sub(mark_price, self.average_entry_price)?,
            )?
        };
        Ok(())
    }

    /// Close the whole position at `price`, moving unrealized into realized.
    pub fn close_at(&mut self, price: Decimal, now: Timestamp) -> Result<(), InvariantViolation> {
        if self.open_volume != 0 {
            self.apply_fill(-self.open_volume, price, now)?;
        }
        self.unrealized_pnl = Decimal::ZERO;
        Ok(())
    }
}

/// 5.2: all positions in one market.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PositionTracker {
    market: MarketId,
    positions: BTreeMap<PartyId, Position>,
}

impl PositionTracker {
    pub fn new(market: MarketId) -> Self {
        Self {
            market,
            positions: BTreeMap::new(),
        }
    }

    pub fn get(&self, party: &PartyId) -> Option<&Position> {
        self.positions.get(party)
    }

    pub fn open_volume(&self, party: &PartyId) -> i64 {
        self.positions.get(party).map(|p| p.open_volume).unwrap_or(0)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Position> {
        self.positions.values()
    }

    fn entry(&mut self, party: &PartyId, now: Timestamp) -> &mut Position {
        let market = self.market.clone();
        self.positions
            .entry(party.clone())
            .or_insert_with(|| Position::new(party.clone(), market, now))
    }

    /// Apply a trade to both counterparties. A trade with itself changes nothing.
    pub fn update(&mut self, trade: &Trade) -> Result<Vec<Position>, InvariantViolation> {
        if trade.buyer == trade.seller {
            return Ok(Vec::new());
        }
        let size = i64::try_from(trade.size).map_err(|_| InvariantViolation::Overflow("trade size"))?;
        let price = trade.price.value();

        self.entry(&trade.buyer, trade.timestamp)
            .apply_fill(size, price, trade.timestamp)?;
        self.entry(&trade.seller, trade.timestamp)
            .apply_fill(-size, price, trade.timestamp)?;

        Ok(vec![
            self.entry(&trade.buyer, trade.timestamp).clone(),
            self.entry(&trade.seller, trade.timestamp).clone(),
        ])
    }

    /// Transfer `volume` of `from`'s position to `to` at `price`. Used when the
    /// network takes over what the book could not absorb in a closeout.
    pub fn transfer_volume(
        &mut self,
        from: &PartyId,
        to: &PartyId,
        volume: i64,
        price: Decimal,
        now: Timestamp,
    ) -> Result<(), InvariantViolation> {
        self.entry(from, now).apply_fill(-volume, price, now)?;
        self.entry(to, now).apply_fill(volume, price, now)
    }

    pub fn mark_all(&mut self, mark_price: Decimal) -> Result<(), InvariantViolation> {
        for position in self.positions.values_mut() {
            position.mark(mark_price)?;
        }
        Ok(())
    }

    pub fn close_all(&mut self, price: Decimal, now: Timestamp) -> Result<(), InvariantViolation> {
        for position in self.positions.values_mut() {
            position.close_at(price, now)?;
        }
        Ok(())
    }

    /// Long open interest. Equal to short open interest while balanced.
    pub fn open_interest(&self) -> u64 {
        self.positions
            .values()
            .filter(|p| p.open_volume > 0)
            .map(|p| p.open_volume.unsigned_abs())
            .sum()
    }

    pub fn check_balanced(&self) -> Result<(), InvariantViolation> {
        let net: i128 = self.positions.values().map(|p| p.open_volume as i128).sum();
        if net != 0 {
            return Err(InvariantViolation::OpenVolumeImbalance {
                market: self.market.to_string(),
                net: net as i64,
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn position() -> Position {
        Position::new(PartyId::new("p"), MarketId::new("m"), Timestamp::default())
    }

    #[test]
    fn increase_averages_entry() {
        let mut p = position();
        p.apply_fill(10, dec!(100), Timestamp::default()).unwrap();
        p.apply_fill(10, dec!(110), Timestamp::default()).unwrap();
        assert_eq!(p.open_volume, 20);
        assert_eq!(p.average_entry_price, dec!(105));
    }

    #[test]
    fn reduce_realizes_pnl() {
        let mut p = position();
        p.apply_fill(10, dec!(100), Timestamp::default()).unwrap();
        p.apply_fill(-4, dec!(110), Timestamp::default()).unwrap();
        assert_eq!(p.open_volume, 6);
        assert_eq!(p.realized_pnl, dec!(40));
        assert_eq!(p.average_entry_price, dec!(100));
    }

    #[test]
    fn short_profits_when_price_falls() {
        let mut p = position();
        p.apply_fill(-5, dec!(100), Timestamp::default()).unwrap();
        p.apply_fill(5, dec!(90), Timestamp::default()).unwrap();
        assert!(p.is_flat());
        assert_eq!(p.realized_pnl, dec!(50));
        assert_eq!(p.average_entry_price, Decimal::ZERO);
    }

    #[test]
    fn flip_reopens_at_fill_price() {
        let mut p = position();
        p.apply_fill(10, dec!(100), Timestamp::default()).unwrap();
        p.apply_fill(-15, dec!(95), Timestamp::default()).unwrap();
        assert_eq!(p.open_volume, -5);
        assert_eq!(p.realized_pnl, dec!(-50));
        assert_eq!(p.average_entry_price, dec!(95));
    }

    #[test]
    fn mark_updates_unrealized() {
        let mut p = position();
        p.apply_fill(-3, dec!(100), Timestamp::default()).unwrap();
        p.mark(dec!(104)).unwrap();
        assert_eq!(p.unrealized_pnl, dec!(-12));
        p.close_at(dec!(104), Timestamp::default()).unwrap();
        assert_eq!(p.realized_pnl, dec!(-12));
        assert_eq!(p.unrealized_pnl, Decimal::ZERO);
    }
}
