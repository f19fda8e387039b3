// 12.3: order flow. validate, preview, execute, then run the fixed downstream
// sequence. rejections leave the market untouched.

use super::{AuctionTrigger, ExecCtx, Market, MarketError, TradingMode};
use crate::amount::Amount;
use crate::events::EventPayload;
use crate::fees::{self, FeePayer, TradeFee};
use crate::ledger::{AccountKey, TransferBatch};
use crate::num::{self, InvariantViolation};
use crate::order::{
    IcebergOrder, Order, OrderAmendment, OrderCancellation, OrderCancellationConfirmation, OrderConfirmation,
    OrderError, OrderStatus, OrderSubmission, OrderType, TimeInForce, MAX_ORDER_SIZE,
};
use crate::orderbook::{Fill, MatchPlan};
use crate::trade::Trade;
use crate::types::{PartyId, Price, Side, Timestamp};
use rust_decimal::Decimal;
use std::collections::BTreeSet;
use tracing::debug;

/// What placing one order did.
pub(super) struct Placement {
    pub order: Order,
    pub trades: Vec<Trade>,
    pub passive: Vec<Order>,
    pub distressed: Vec<PartyId>,
}

impl Market {
    fn check_price(&self, price: Decimal) -> Result<Price, OrderError> {
        let price = Price::new(price).ok_or(OrderError::InvalidPrice)?;
        if !price.is_on_tick(self.config.tick_size) {
            return Err(OrderError::PriceNotOnTick);
        }
        Ok(price)
    }

    fn check_expiry(tif: TimeInForce, expires_at: Option<Timestamp>, now: Timestamp) -> Result<(), OrderError> {
        match (tif, expires_at) {
            (TimeInForce::GTT, Some(at)) if at > now => Ok(()),
            (TimeInForce::GTT, _) => Err(OrderError::InvalidExpiration),
            (_, Some(_)) => Err(OrderError::InvalidExpiration),
            (_, None) => Ok(()),
        }
    }

    /// 12.3.1: stateless checks plus the ones that depend on the trading mode.
    fn validate_submission(&self, s: &OrderSubmission, now: Timestamp) -> Result<Option<Price>, OrderError> {
        if !self.state.accepts_orders() {
            return Err(OrderError::MarketClosed);
        }
        if s.size == 0 || s.size < self.config.min_order_size || s.size > MAX_ORDER_SIZE {
            return Err(OrderError::InvalidSize);
        }
        if let Some(iceberg) = &s.iceberg {
            if s.order_type != OrderType::Limit || s.peg.is_some() || !s.time_in_force.rests() {
                return Err(OrderError::InvalidIcebergOrder);
            }
            iceberg.validate()?;
        }

        let price = match (s.order_type, s.price, &s.peg) {
            (OrderType::Market, None, None) => None,
            (OrderType::Market, _, _) => return Err(OrderError::PriceMismatch),
            (OrderType::Limit, None, Some(peg)) => {
                if !matches!(s.time_in_force, TimeInForce::GTC | TimeInForce::GTT) {
                    return Err(OrderError::InvalidPeggedOrder);
                }
                peg.validate(s.side)?;
                None
            }
            (OrderType::Limit, Some(_), Some(_)) => return Err(OrderError::InvalidPeggedOrder),
            (OrderType::Limit, None, None) => return Err(OrderError::PriceMismatch),
            (OrderType::Limit, Some(p), None) => Some(self.check_price(p)?),
        };

        if s.order_type == OrderType::Market && !matches!(s.time_in_force, TimeInForce::IOC | TimeInForce::FOK) {
            return Err(OrderError::InvalidTimeInForce);
        }
        Self::check_expiry(s.time_in_force, s.expires_at, now)?;

        if self.mode.is_auction() {
            if s.order_type == OrderType::Market {
                return Err(OrderError::MarketOrderInAuction);
            }
            if !s.time_in_force.allowed_in_auction() {
                return Err(OrderError::TimeInForceNotAllowedInAuction);
            }
        } else if !s.time_in_force.allowed_in_continuous() {
            return Err(OrderError::GfaOutsideAuction);
        }
        Ok(price)
    }

    /// Refuse `extra` more volume on `side` if trading all of the party's
    /// orders could carry its position past what a signed 64-bit volume holds.
    fn check_position_room(&self, party: &PartyId, side: Side, extra: u64) -> Result<(), MarketError> {
        let (buys, sells) = self.book.potential_volume(party)?;
        let open = i128::from(self.positions.open_volume(party));
        let worst = match side {
            Side::Buy => open + i128::from(buys) + i128::from(extra),
            Side::Sell => open - i128::from(sells) - i128::from(extra),
        };
        if i64::try_from(worst).is_err() {
            return Err(OrderError::InvalidSize.into());
        }
        Ok(())
    }

    /// 12.3.2: accept a new order from `party`.
    pub fn submit_order(
        &mut self,
        ctx: &mut ExecCtx<'_>,
        party: &PartyId,
        submission: OrderSubmission,
    ) -> Result<OrderConfirmation, MarketError> {
        let price = self.validate_submission(&submission, ctx.now)?;
        self.check_position_room(party, submission.side, submission.size)?;
        let order = Order {
            id: ctx.ids.next_order(),
            market: self.config.id.clone(),
            party: party.clone(),
            side: submission.side,
            order_type: submission.order_type,
            time_in_force: submission.time_in_force,
            price,
            size: submission.size,
            remaining: submission.size,
            status: OrderStatus::Active,
            reason: None,
            peg: submission.peg,
            created_at: ctx.now,
            updated_at: ctx.now,
            expires_at: submission.expires_at,
            reference: submission.reference,
            version: 1,
            iceberg: submission.iceberg.map(IcebergOrder::from),
        };

        let placement = self.place(ctx, order, false)?;
        let confirmation = OrderConfirmation {
            order: placement.order,
            trades: placement.trades,
            passive_orders_affected: placement.passive,
        };
        let traded = !confirmation.trades.is_empty();
        self.finish_command(ctx, placement.distressed, traded)?;
        Ok(confirmation)
    }

    /// Fees the aggressor would owe for `plan`.
    fn planned_fees(&self, plan: &MatchPlan, liquidity_factor: Decimal) -> Result<Amount, InvariantViolation> {
        let mut total = Amount::zero();
        for fill in &plan.fills {
            let notional = num::notional(fill.price.value(), fill.size)?;
            total = total.add(&fees::continuous_fee(notional, &self.config.fees, liquidity_factor)?.total());
        }
        Ok(total)
    }

    fn fee_payer(&self, ctx: &ExecCtx<'_>, party: &PartyId) -> FeePayer {
        let asset = &self.config.settlement_asset;
        FeePayer::new(
            party,
            &self.config.id,
            asset,
            ctx.ledger.balance(&AccountKey::general(party, asset)),
            ctx.ledger.balance(&AccountKey::margin(party, &self.config.id, asset)),
        )
    }

    /// 12.3.3: put an order into the book and run everything up to the margin
    /// pass. Synthetic closeout orders skip the monitor and fee checks and are
    /// charged whatever the party has left.
    pub(super) fn place(
        &mut self,
        ctx: &mut ExecCtx<'_>,
        order: Order,
        synthetic: bool,
    ) -> Result<Placement, MarketError> {
        let party = order.party.clone();

        if order.is_pegged() {
            let placed = self.book.place_pegged(order, ctx.now)?;
            ctx.emit(EventPayload::OrderUpdated(placed.clone()));
            return self.rest_only(ctx, placed);
        }

        if self.mode.is_auction() {
            let outcome = self.book.submit(order, ctx.now)?;
            ctx.emit(EventPayload::OrderUpdated(outcome.order.clone()));
            return self.rest_only(ctx, outcome.order);
        }

        let plan = self.book.plan(&order);
        if !synthetic {
            let liquidity_factor = self.liquidity_fee_factor(ctx.now)?;
            let needed = self.planned_fees(&plan, liquidity_factor)?;
            if needed > self.fee_payer(ctx, &party).available() {
                return Err(OrderError::InsufficientFundsToPayFees.into());
            }

            let mut prices: Vec<Price> = plan.fills.iter().map(|f| f.price).collect();
            prices.dedup();
            if let Some(extension) = self.monitor.check(&prices, &self.risk, ctx.now)? {
                debug!(market = %self.config.id, order = %order.id, "order breaches price bounds");
                self.enter_auction(ctx, AuctionTrigger::Price, extension)?;
                let mut order = order;
                if order.order_type == OrderType::Limit && order.time_in_force.allowed_in_auction() {
                    let outcome = self.book.submit(order, ctx.now)?;
                    ctx.emit(EventPayload::OrderUpdated(outcome.order.clone()));
                    return self.rest_only(ctx, outcome.order);
                }
                order.finish(OrderStatus::Stopped, Some(OrderError::AuctionTriggered), ctx.now);
                ctx.emit(EventPayload::OrderUpdated(order.clone()));
                return Ok(Placement {
                    order,
                    trades: Vec::new(),
                    passive: Vec::new(),
                    distressed: Vec::new(),
                });
            }
        }

        let outcome = self.book.execute(order, &plan, ctx.now)?;
        let trades = self.continuous_trades(ctx, &outcome.order, &outcome.fills)?;

        ctx.emit(EventPayload::OrderUpdated(outcome.order.clone()));
        let passive: Vec<Order> = outcome.fills.iter().map(|f| f.maker.clone()).collect();
        for maker in &passive {
            ctx.emit(EventPayload::OrderUpdated(maker.clone()));
        }

        self.process_trades(ctx, &trades)?;

        let parties = if trades.is_empty() {
            BTreeSet::from([party])
        } else {
            self.active_parties()
        };
        let aggressor = (!synthetic).then_some(&outcome.order);
        let distressed = self.margin_pass(ctx, &parties, aggressor)?;

        let order = self.book.get(outcome.order.id).cloned().unwrap_or(outcome.order);
        let order = if order.status == OrderStatus::Active && !self.book.contains(order.id) {
            // cancelled for lack of margin during the pass
            let mut stopped = order;
            stopped.finish(OrderStatus::Stopped, Some(OrderError::InsufficientMargin), ctx.now);
            stopped
        } else {
            order
        };

        Ok(Placement {
            order,
            trades,
            passive,
            distressed,
        })
    }

    // an order that went straight to the book without trading
    fn rest_only(&mut self, ctx: &mut ExecCtx<'_>, order: Order) -> Result<Placement, MarketError> {
        let parties = BTreeSet::from([order.party.clone()]);
        let distressed = self.margin_pass(ctx, &parties, Some(&order))?;
        let order = match self.book.get(order.id) {
            Some(live) => live.clone(),
            None => {
                let mut stopped = order;
                stopped.finish(OrderStatus::Stopped, Some(OrderError::InsufficientMargin), ctx.now);
                stopped
            }
        };
        Ok(Placement {
            order,
            trades: Vec::new(),
            passive: Vec::new(),
            distressed,
        })
    }

    /// Turn continuous fills into trades and charge the aggressor's fees.
    fn continuous_trades(
        &mut self,
        ctx: &mut ExecCtx<'_>,
        aggressor: &Order,
        fills: &[Fill],
    ) -> Result<Vec<Trade>, InvariantViolation> {
        if fills.is_empty() {
            return Ok(Vec::new());
        }
        let liquidity_factor = self.liquidity_fee_factor(ctx.now)?;
        let mut payer = self.fee_payer(ctx, &aggressor.party);
        let mut batch = TransferBatch::new();
        let mut trades = Vec::with_capacity(fills.len());

        for fill in fills {
            let notional = num::notional(fill.price.value(), fill.size)?;
            let fee = fees::continuous_fee(notional, &self.config.fees, liquidity_factor)?;
            let paid = payer.pay_fee(
                &fee,
                Some(&fill.maker.party),
                &self.config.id,
                &self.config.settlement_asset,
                &mut batch,
            );
            let (buyer, seller, buy_order, sell_order) = match aggressor.side {
                Side::Buy => (&aggressor.party, &fill.maker.party, aggressor.id, fill.maker.id),
                Side::Sell => (&fill.maker.party, &aggressor.party, fill.maker.id, aggressor.id),
            };
            let (buyer_fee, seller_fee) = match aggressor.side {
                Side::Buy => (paid, TradeFee::default()),
                Side::Sell => (TradeFee::default(), paid),
            };
            trades.push(Trade {
                id: ctx.ids.next_trade(),
                market: self.config.id.clone(),
                buyer: buyer.clone(),
                seller: seller.clone(),
                buy_order,
                sell_order,
                aggressor: Some(aggressor.side),
                price: fill.price,
                size: fill.size,
                timestamp: ctx.now,
                buyer_fee,
                seller_fee,
            });
        }
        ctx.apply(&batch)?;
        Ok(trades)
    }

    /// 12.3.4: amend a live order. Price changes and size increases lose time
    /// priority and may trade; everything else is edited in place.
    pub fn amend_order(
        &mut self,
        ctx: &mut ExecCtx<'_>,
        party: &PartyId,
        amendment: OrderAmendment,
    ) -> Result<OrderConfirmation, MarketError> {
        if !self.state.accepts_orders() {
            return Err(OrderError::MarketClosed.into());
        }
        let current = self.book.get(amendment.order_id).cloned().ok_or(OrderError::OrderNotFound)?;
        if &current.party != party {
            return Err(OrderError::NotOrderOwner.into());
        }
        if amendment.is_noop() {
            return Err(OrderError::InvalidAmendment.into());
        }

        let mut amended = current.clone();
        let mut reprice = false;

        if let Some(p) = amendment.price {
            if current.is_pegged() {
                return Err(OrderError::InvalidAmendment.into());
            }
            let price = self.check_price(p)?;
            reprice |= Some(price) != current.price;
            amended.price = Some(price);
        }
        if amendment.peg_offset.is_some() || amendment.peg_reference.is_some() {
            let Some(mut peg) = current.peg else {
                return Err(OrderError::InvalidAmendment.into());
            };
            if let Some(offset) = amendment.peg_offset {
                peg.offset = offset;
            }
            if let Some(reference) = amendment.peg_reference {
                peg.reference = reference;
            }
            peg.validate(current.side)?;
            reprice |= Some(peg) != current.peg;
            amended.peg = Some(peg);
        }

        if amendment.size_delta != 0 {
            let delta = i128::from(amendment.size_delta);
            let remaining = i128::from(current.true_remaining()) + delta;
            if remaining <= 0 {
                return Err(OrderError::InvalidSizeAmendment.into());
            }
            let size = u64::try_from(i128::from(current.size) + delta)
                .ok()
                .filter(|size| *size <= MAX_ORDER_SIZE)
                .ok_or(OrderError::InvalidSize)?;
            if amendment.size_delta > 0 {
                self.check_position_room(party, current.side, amendment.size_delta.unsigned_abs())?;
            }
            // bounded by `size` above
            let remaining = remaining as u64;
            amended.size = size;
            match &mut amended.iceberg {
                // hidden volume absorbs the change so the peak keeps its place
                Some(iceberg) => {
                    amended.remaining = current.remaining.min(remaining);
                    iceberg.reserved_remaining = remaining - amended.remaining;
                }
                None => {
                    amended.remaining = remaining;
                    reprice |= amendment.size_delta > 0;
                }
            }
        }

        let tif = amendment.time_in_force.unwrap_or(current.time_in_force);
        if amendment.time_in_force.is_some()
            && !matches!((current.time_in_force, tif), (TimeInForce::GTC | TimeInForce::GTT, TimeInForce::GTC | TimeInForce::GTT))
        {
            return Err(OrderError::InvalidTimeInForce.into());
        }
        let expires_at = match tif {
            TimeInForce::GTT => amendment.expires_at.or(current.expires_at),
            _ if amendment.expires_at.is_some() => return Err(OrderError::InvalidExpiration.into()),
            _ => None,
        };
        Self::check_expiry(tif, expires_at, ctx.now)?;
        amended.time_in_force = tif;
        amended.expires_at = expires_at;
        amended.version += 1;
        amended.updated_at = ctx.now;

        let placement = if reprice {
            amended.unhide();
            // planning only walks the other side, so the old order can stay put until the checks pass
            if !self.mode.is_auction() && !amended.is_pegged() {
                let plan = self.book.plan(&amended);
                let needed = self.planned_fees(&plan, self.liquidity_fee_factor(ctx.now)?)?;
                if needed > self.fee_payer(ctx, party).available() {
                    return Err(OrderError::InsufficientFundsToPayFees.into());
                }
            }
            self.book.remove(current.id);
            amended.status = OrderStatus::Active;
            if amended.is_pegged() {
                amended.price = None;
            }
            self.place(ctx, amended, false)?
        } else {
            let edited = self
                .book
                .update_in_place(current.id, |o| {
                    o.size = amended.size;
                    o.remaining = amended.remaining;
                    o.iceberg = amended.iceberg;
                    o.time_in_force = amended.time_in_force;
                    o.expires_at = amended.expires_at;
                    o.version = amended.version;
                    o.updated_at = amended.updated_at;
                })
                .ok_or(OrderError::OrderNotFound)?;
            ctx.emit(EventPayload::OrderUpdated(edited.clone()));
            let parties = BTreeSet::from([party.clone()]);
            let distressed = self.margin_pass(ctx, &parties, None)?;
            Placement {
                order: edited,
                trades: Vec::new(),
                passive: Vec::new(),
                distressed,
            }
        };

        let confirmation = OrderConfirmation {
            order: placement.order,
            trades: placement.trades,
            passive_orders_affected: placement.passive,
        };
        let traded = !confirmation.trades.is_empty();
        self.finish_command(ctx, placement.distressed, traded)?;
        Ok(confirmation)
    }

    /// 12.3.5: cancel one order, or every order of the party in this market.
    pub fn cancel_order(
        &mut self,
        ctx: &mut ExecCtx<'_>,
        party: &PartyId,
        cancellation: &OrderCancellation,
    ) -> Result<Vec<OrderCancellationConfirmation>, MarketError> {
        if self.state.is_final() {
            return Err(OrderError::MarketClosed.into());
        }
        let removed = match cancellation.order_id {
            Some(id) => {
                let order = self.book.get(id).ok_or(OrderError::OrderNotFound)?;
                if &order.party != party {
                    return Err(OrderError::NotOrderOwner.into());
                }
                self.book.remove(id).into_iter().collect()
            }
            None => self.book.remove_where(|o| &o.party == party),
        };

        let mut confirmations = Vec::with_capacity(removed.len());
        for mut order in removed {
            order.finish(OrderStatus::Cancelled, None, ctx.now);
            ctx.emit(EventPayload::OrderUpdated(order.clone()));
            confirmations.push(OrderCancellationConfirmation { order });
        }

        let parties = BTreeSet::from([party.clone()]);
        let distressed = self.margin_pass(ctx, &parties, None)?;
        self.finish_command(ctx, distressed, false)?;
        Ok(confirmations)
    }

    /// 12.3.6: the tail every command shares: closeouts, pegs, liquidity
    /// monitoring after trades, market data and the fatal checks.
    pub(super) fn finish_command(
        &mut self,
        ctx: &mut ExecCtx<'_>,
        distressed: Vec<PartyId>,
        traded: bool,
    ) -> Result<(), InvariantViolation> {
        self.run_closeouts(ctx, distressed)?;
        self.reprice_pegs(ctx)?;
        if traded && self.mode == TradingMode::Continuous {
            self.check_liquidity(ctx)?;
        }
        self.publish(ctx)?;
        self.check_invariants(ctx)
    }

    pub(super) fn reprice_pegs(&mut self, ctx: &mut ExecCtx<'_>) -> Result<(), InvariantViolation> {
        for order in self.book.reprice_pegs(ctx.now)? {
            ctx.emit(EventPayload::OrderUpdated(order));
        }
        Ok(())
    }
}
