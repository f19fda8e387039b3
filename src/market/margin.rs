// 12.4: margin checks and closeouts. top-ups and releases move money between a
// party's general and margin accounts; a party that cannot reach maintenance is
// closed out through the book, and the network takes whatever the book cannot.

use super::{ExecCtx, Market, MarketError};
use crate::amount::Amount;
use crate::events::{CloseoutEvent, EventPayload};
use crate::ledger::{AccountKey, TransferBatch, TransferKind};
use crate::num::InvariantViolation;
use crate::order::{Order, OrderError, OrderStatus, OrderType, TimeInForce};
use crate::risk::{Exposure, MarginAction, MarginTrigger};
use crate::types::{PartyId, Side};
use rust_decimal::Decimal;
use std::collections::{BTreeSet, VecDeque};
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) enum MarginOutcome {
    Covered,
    /// Could not reach the initial level after an order.
    Insufficient,
    /// Below maintenance even after taking everything from general.
    Distressed,
}

impl Market {
    fn exposure(&self, party: &PartyId) -> Result<Exposure, InvariantViolation> {
        let (buy_orders, sell_orders) = self.book.potential_volume(party)?;
        Ok(Exposure {
            open_volume: self.positions.open_volume(party),
            buy_orders,
            sell_orders,
        })
    }

    /// Mark price, else the auction's indicative price, else `fallback`.
    pub(super) fn reference_price(&self, fallback: Option<Decimal>) -> Option<Decimal> {
        self.mark_price
            .map(|p| p.value())
            .or_else(|| self.book.indicative().map(|i| i.price.value()))
            .or(fallback)
    }

    fn margin_key(&self, party: &PartyId) -> AccountKey {
        AccountKey::margin(party, &self.config.id, &self.config.settlement_asset)
    }

    fn general_key(&self, party: &PartyId) -> AccountKey {
        AccountKey::general(party, &self.config.settlement_asset)
    }

    /// 12.4.1: recompute one party's levels and move collateral to match.
    pub(super) fn check_margin(
        &mut self,
        ctx: &mut ExecCtx<'_>,
        party: &PartyId,
        trigger: MarginTrigger,
        fallback: Option<Decimal>,
    ) -> Result<MarginOutcome, InvariantViolation> {
        if party.is_network() {
            return Ok(MarginOutcome::Covered);
        }
        let margin_key = self.margin_key(party);
        let general_key = self.general_key(party);
        let margin = ctx.ledger.balance(&margin_key);
        let exposure = self.exposure(party)?;

        if exposure.is_flat() {
            self.margins.remove(party);
            let mut batch = TransferBatch::new();
            batch.push(margin_key, general_key, margin, TransferKind::MarginHigh);
            ctx.apply(&batch)?;
            return Ok(MarginOutcome::Covered);
        }

        let Some(price) = self.reference_price(fallback) else {
            return Ok(MarginOutcome::Covered);
        };
        let levels = self.risk.levels(party, exposure, price, ctx.now)?;
        if self.margins.get(party).map(|l| (&l.maintenance, &l.initial)) != Some((&levels.maintenance, &levels.initial)) {
            ctx.emit(EventPayload::MarginLevels(levels.clone()));
        }
        self.margins.insert(party.clone(), levels.clone());

        let general = ctx.ledger.balance(&general_key);
        let mut batch = TransferBatch::new();
        let outcome = match self.risk.evaluate(&levels, &margin, &general, trigger) {
            MarginAction::Hold => MarginOutcome::Covered,
            MarginAction::Release(amount) => {
                batch.push(margin_key, general_key, amount, TransferKind::MarginHigh);
                MarginOutcome::Covered
            }
            MarginAction::TopUp {
                amount,
                distressed,
                reaches_initial,
            } => {
                batch.push(general_key, margin_key, amount, TransferKind::MarginLow);
                if !reaches_initial && trigger == MarginTrigger::AfterOrder {
                    MarginOutcome::Insufficient
                } else if distressed {
                    MarginOutcome::Distressed
                } else {
                    MarginOutcome::Covered
                }
            }
        };
        ctx.apply(&batch)?;
        Ok(outcome)
    }

    /// 12.4.2: margin pass over `parties`. The aggressor of a fresh order is held
    /// to the initial level and loses the resting part of that order if it
    /// cannot get there. Returns the parties that need closing out.
    pub(super) fn margin_pass(
        &mut self,
        ctx: &mut ExecCtx<'_>,
        parties: &BTreeSet<PartyId>,
        aggressor: Option<&Order>,
    ) -> Result<Vec<PartyId>, InvariantViolation> {
        let mut distressed = Vec::new();
        for party in parties {
            let own = aggressor.filter(|o| &o.party == party);
            let trigger = if own.is_some() {
                MarginTrigger::AfterOrder
            } else {
                MarginTrigger::AfterMarkMove
            };
            let fallback = own.and_then(|o| o.price).map(|p| p.value());
            let mut outcome = self.check_margin(ctx, party, trigger, fallback)?;

            if outcome == MarginOutcome::Insufficient {
                if let Some(order) = own {
                    if let Some(mut resting) = self.book.remove(order.id) {
                        debug!(market = %self.config.id, order = %order.id, "resting remainder lacks margin");
                        resting.finish(OrderStatus::Stopped, Some(OrderError::InsufficientMargin), ctx.now);
                        ctx.emit(EventPayload::OrderUpdated(resting));
                    }
                }
                outcome = self.check_margin(ctx, party, MarginTrigger::AfterMarkMove, fallback)?;
            }
            if outcome == MarginOutcome::Distressed {
                distressed.push(party.clone());
            }
        }
        Ok(distressed)
    }

    /// Every party with a position or a live order.
    pub(super) fn active_parties(&self) -> BTreeSet<PartyId> {
        let mut parties = self.book.parties();
        parties.extend(self.positions.iter().map(|p| p.party.clone()));
        parties.retain(|p| !p.is_network());
        parties
    }

    /// 12.4.3: close out distressed parties until none are left. Each closeout can
    /// trade and so distress others; the queue is bounded to catch a loop.
    pub(super) fn run_closeouts(&mut self, ctx: &mut ExecCtx<'_>, initial: Vec<PartyId>) -> Result<(), InvariantViolation> {
        let mut queue: VecDeque<PartyId> = VecDeque::new();
        for party in initial {
            if !queue.contains(&party) {
                queue.push_back(party);
            }
        }

        let mut rounds = 0usize;
        while let Some(party) = queue.pop_front() {
            rounds += 1;
            if rounds > ctx.config.max_closeout_rounds {
                return Err(InvariantViolation::CloseoutDiverged(self.config.id.to_string()));
            }
            for next in self.close_out(ctx, &party)? {
                if next != party && !queue.contains(&next) {
                    queue.push_back(next);
                }
            }
        }
        Ok(())
    }

    fn close_out(&mut self, ctx: &mut ExecCtx<'_>, party: &PartyId) -> Result<Vec<PartyId>, InvariantViolation> {
        for mut order in self.book.remove_where(|o| &o.party == party) {
            order.finish(OrderStatus::Stopped, Some(OrderError::ClosedOut), ctx.now);
            ctx.emit(EventPayload::OrderUpdated(order));
        }
        if self.check_margin(ctx, party, MarginTrigger::AfterMarkMove, None)? != MarginOutcome::Distressed {
            return Ok(Vec::new());
        }

        let volume = self.positions.open_volume(party);
        if volume == 0 {
            return Ok(Vec::new());
        }
        warn!(market = %self.config.id, party = %party, volume, "closing out distressed party");

        let size = volume.unsigned_abs();
        let mut distressed = Vec::new();
        let mut filled = 0u64;
        if self.mode == super::TradingMode::Continuous {
            let order = Order {
                id: ctx.ids.next_order(),
                market: self.config.id.clone(),
                party: party.clone(),
                side: if volume > 0 { Side::Sell } else { Side::Buy },
                order_type: OrderType::Market,
                time_in_force: TimeInForce::IOC,
                price: None,
                size,
                remaining: size,
                status: OrderStatus::Active,
                reason: None,
                peg: None,
                created_at: ctx.now,
                updated_at: ctx.now,
                expires_at: None,
                reference: "closeout".to_string(),
                version: 1,
                iceberg: None,
            };
            let placement = self.place(ctx, order, true).map_err(MarketError::into_invariant)?;
            filled = placement.order.filled();
            distressed = placement.distressed;
        }

        let left = size - filled;
        let network_volume = if volume > 0 { left as i64 } else { -(left as i64) };
        if left > 0 {
            let mark = self
                .mark_price
                .ok_or_else(|| InvariantViolation::Broken(format!("position without mark price in {}", self.config.id)))?
                .value();
            let network = PartyId::network();
            self.positions.transfer_volume(party, &network, network_volume, mark, ctx.now)?;
            self.settlement.add_transfer(party, &network, network_volume, mark);
            for p in [party, &network] {
                if let Some(position) = self.positions.get(p) {
                    ctx.emit(EventPayload::PositionState(position.clone()));
                }
            }

            // the network carries the risk now, so the party's collateral backs it
            let margin_key = self.margin_key(party);
            let margin: Amount = ctx.ledger.balance(&margin_key);
            let mut batch = TransferBatch::new();
            batch.push(
                margin_key,
                AccountKey::insurance(&self.config.id, &self.config.settlement_asset),
                margin,
                TransferKind::MarginConfiscated,
            );
            ctx.apply(&batch)?;
            self.margins.remove(party);
        } else {
            self.check_margin(ctx, party, MarginTrigger::AfterMarkMove, None)?;
        }

        ctx.emit(EventPayload::Closeout(CloseoutEvent {
            market: self.config.id.clone(),
            party: party.clone(),
            open_volume: volume,
            network_volume,
        }));
        distressed.retain(|p| p != party);
        Ok(distressed)
    }
}
