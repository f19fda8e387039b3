// 12.7: auctions. entering parks pegs; leaving checks every trigger again,
// uncrosses at the indicative price and resumes continuous trading.

use super::{AuctionTrigger, AuctionWindow, ExecCtx, Market, MarketError, MarketState, TradingMode};
use crate::events::{AuctionEvent, EventPayload};
use crate::fees::{self, FeePayer, TradeFee};
use crate::ledger::{AccountKey, TransferBatch};
use crate::num::{self, InvariantViolation};
use crate::order::{OrderError, OrderStatus, TimeInForce};
use crate::orderbook::AuctionFill;
use crate::risk::MarginTrigger;
use crate::trade::Trade;
use crate::types::{PartyId, Price};
use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, info};

impl Market {
    fn emit_auction(&self, ctx: &mut ExecCtx<'_>, window: &AuctionWindow, leave: bool) {
        ctx.emit(EventPayload::Auction(AuctionEvent {
            market: self.config.id.clone(),
            trigger: window.trigger,
            extension_trigger: window.extension_trigger,
            start: window.start,
            end: window.end,
            leave,
        }));
    }

    pub(super) fn start_opening_auction(&mut self, ctx: &mut ExecCtx<'_>, window: AuctionWindow) {
        self.book.enter_auction(ctx.now);
        self.state = MarketState::Pending;
        self.mode = TradingMode::OpeningAuction;
        self.emit_state(ctx);
        self.emit_auction(ctx, &window, false);
        self.auction = Some(window);
    }

    /// 12.7.1: leave continuous trading for a monitoring auction.
    pub(super) fn enter_auction(
        &mut self,
        ctx: &mut ExecCtx<'_>,
        trigger: AuctionTrigger,
        secs: i64,
    ) -> Result<(), InvariantViolation> {
        if self.mode.is_auction() {
            return Ok(());
        }
        info!(market = %self.config.id, ?trigger, secs, "entering auction");
        let window = AuctionWindow::new(trigger, ctx.now, secs)?;

        for parked in self.book.enter_auction(ctx.now) {
            ctx.emit(EventPayload::OrderUpdated(parked));
        }
        let mut touched = BTreeSet::new();
        for mut order in self.book.remove_where(|o| o.time_in_force == TimeInForce::GFN) {
            order.finish(OrderStatus::Cancelled, Some(OrderError::TimeInForceNotAllowedInAuction), ctx.now);
            touched.insert(order.party.clone());
            ctx.emit(EventPayload::OrderUpdated(order));
        }

        self.set_state(ctx, MarketState::Suspended, TradingMode::MonitoringAuction);
        self.emit_auction(ctx, &window, false);
        self.auction = Some(window);

        // fewer orders never need more margin
        for party in touched {
            self.check_margin(ctx, &party, MarginTrigger::AfterMarkMove, None)?;
        }
        Ok(())
    }

    fn extend_auction(&mut self, ctx: &mut ExecCtx<'_>, by: AuctionTrigger, secs: i64) -> Result<(), InvariantViolation> {
        let Some(window) = self.auction.as_mut() else { return Ok(()) };
        debug!(market = %self.config.id, ?by, secs, "auction extended");
        window.extend(by, secs)?;
        let window = window.clone();
        self.emit_auction(ctx, &window, false);
        Ok(())
    }

    /// 12.7.2: called on every time update while in an auction. Returns the
    /// parties left distressed by the uncrossing.
    pub(super) fn try_leave_auction(&mut self, ctx: &mut ExecCtx<'_>) -> Result<Vec<PartyId>, MarketError> {
        let Some(window) = self.auction.clone() else {
            return Ok(Vec::new());
        };
        if !window.expired(ctx.now) {
            return Ok(Vec::new());
        }
        let indicative = self.book.indicative();

        if window.trigger == AuctionTrigger::Opening && indicative.map(|i| i.volume).unwrap_or(0) == 0 {
            self.extend_auction(ctx, AuctionTrigger::Opening, self.config.opening_auction_secs)?;
            return Ok(Vec::new());
        }
        if let Some(ind) = indicative {
            if let Some(extension) = self.monitor.check(&[ind.price], &self.risk, ctx.now)? {
                self.extend_auction(ctx, AuctionTrigger::Price, extension)?;
                return Ok(Vec::new());
            }
        }
        let target = self.target_stake(ctx.now)?;
        if self.liquidity.is_under_supplied(&target)? {
            let secs = self.liquidity.params().auction_extension_secs;
            self.extend_auction(ctx, AuctionTrigger::Liquidity, secs)?;
            return Ok(Vec::new());
        }

        let liquidity_factor = self.liquidity.liquidity_fee(&target);
        let uncrossed = self.book.uncross(ctx.now)?;
        let price = match uncrossed {
            Some((price, fills)) => {
                let trades = self.auction_trades(ctx, price, &fills, liquidity_factor)?;
                info!(market = %self.config.id, %price, trades = trades.len(), "auction uncrossed");
                self.process_trades(ctx, &trades)?;
                Some(price)
            }
            None => self.mark_price,
        };

        self.book.leave_auction();
        self.auction = None;
        self.set_state(ctx, MarketState::Active, TradingMode::Continuous);
        if let Some(price) = price {
            self.monitor.reset(ctx.now, price);
        }

        for mut order in self.book.remove_where(|o| o.time_in_force == TimeInForce::GFA) {
            order.finish(OrderStatus::Cancelled, None, ctx.now);
            ctx.emit(EventPayload::OrderUpdated(order));
        }
        self.reprice_pegs(ctx)?;
        self.emit_auction(ctx, &window, true);

        let parties = self.active_parties();
        Ok(self.margin_pass(ctx, &parties, None)?)
    }

    /// One trade per auction fill. Both sides pay half the fees, capped at
    /// what they hold.
    fn auction_trades(
        &mut self,
        ctx: &mut ExecCtx<'_>,
        price: Price,
        fills: &[AuctionFill],
        liquidity_factor: rust_decimal::Decimal,
    ) -> Result<Vec<Trade>, InvariantViolation> {
        let asset = self.config.settlement_asset.clone();
        let market = self.config.id.clone();
        let mut payers: BTreeMap<PartyId, FeePayer> = BTreeMap::new();
        let mut batch = TransferBatch::new();
        let mut trades = Vec::with_capacity(fills.len());

        for fill in fills {
            let notional = num::notional(price.value(), fill.size)?;
            let fee = fees::auction_fee(notional, &self.config.fees, liquidity_factor)?;
            let mut charge = |party: &PartyId, batch: &mut TransferBatch| -> TradeFee {
                payers
                    .entry(party.clone())
                    .or_insert_with(|| {
                        FeePayer::new(
                            party,
                            &market,
                            &asset,
                            ctx.ledger.balance(&AccountKey::general(party, &asset)),
                            ctx.ledger.balance(&AccountKey::margin(party, &market, &asset)),
                        )
                    })
                    .pay_fee(&fee, None, &market, &asset, batch)
            };
            let buyer_fee = charge(&fill.buy.party, &mut batch);
            let seller_fee = charge(&fill.sell.party, &mut batch);

            ctx.emit(EventPayload::OrderUpdated(fill.buy.clone()));
            ctx.emit(EventPayload::OrderUpdated(fill.sell.clone()));
            trades.push(Trade {
                id: ctx.ids.next_trade(),
                market: market.clone(),
                buyer: fill.buy.party.clone(),
                seller: fill.sell.party.clone(),
                buy_order: fill.buy.id,
                sell_order: fill.sell.id,
                aggressor: None,
                price,
                size: fill.size,
                timestamp: ctx.now,
                buyer_fee,
                seller_fee,
            });
        }
        ctx.apply(&batch)?;
        Ok(trades)
    }

    /// 12.7.3: block time moved. Expire orders, leave a finished auction, pay
    /// out liquidity fees when due and sample open interest.
    pub fn on_time_update(&mut self, ctx: &mut ExecCtx<'_>) -> Result<(), MarketError> {
        if !self.state.accepts_orders() {
            return Ok(());
        }
        let mut expired_parties = BTreeSet::new();
        for mut order in self.book.remove_expired(ctx.now) {
            order.finish(OrderStatus::Expired, None, ctx.now);
            expired_parties.insert(order.party.clone());
            ctx.emit(EventPayload::OrderUpdated(order));
        }
        let mut distressed = self.margin_pass(ctx, &expired_parties, None)?;

        if self.mode.is_auction() {
            distressed.extend(self.try_leave_auction(ctx)?);
        }
        if self
            .liquidity
            .distribution_due(ctx.now, ctx.network.liquidity_fee_distribution_secs)
        {
            self.distribute_liquidity_fees(ctx)?;
        }
        self.liquidity.record_open_interest(ctx.now, self.positions.open_interest());

        self.finish_command(ctx, distressed, false)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::super::testkit::{market_config, Venue};
    use super::*;
    use crate::order::{OrderSubmission, TimeInForce};
    use crate::types::{MarketId, Side, Timestamp};
    use rust_decimal_macros::dec;

    fn opening_market() -> (Venue, Market) {
        let mut venue = Venue::new();
        let mut config = market_config();
        config.opening_auction_secs = 10;
        let market = Market::create(config, &mut venue.ctx()).unwrap();
        for p in ["a", "b"] {
            venue.fund(p, 100_000);
        }
        (venue, market)
    }

    fn limit(side: Side, price: rust_decimal::Decimal, size: u64, tif: TimeInForce) -> OrderSubmission {
        OrderSubmission::limit(MarketId::new("m"), side, price, size, tif)
    }

    #[test]
    fn opening_auction_rejects_continuous_only_orders() {
        let (mut venue, mut market) = opening_market();
        assert_eq!(market.trading_mode(), TradingMode::OpeningAuction);
        assert_eq!(market.state(), MarketState::Pending);

        let ioc = limit(Side::Buy, dec!(100), 1, TimeInForce::IOC);
        assert_eq!(
            market.submit_order(&mut venue.ctx(), &PartyId::new("a"), ioc),
            Err(MarketError::Order(OrderError::TimeInForceNotAllowedInAuction))
        );
        let mkt = OrderSubmission::market(MarketId::new("m"), Side::Buy, 1, TimeInForce::IOC);
        assert_eq!(
            market.submit_order(&mut venue.ctx(), &PartyId::new("a"), mkt),
            Err(MarketError::Order(OrderError::MarketOrderInAuction))
        );
    }

    #[test]
    fn opening_auction_uncrosses_and_cancels_gfa_leftovers() {
        let (mut venue, mut market) = opening_market();
        let a = PartyId::new("a");
        let b = PartyId::new("b");
        market.submit_order(&mut venue.ctx(), &a, limit(Side::Buy, dec!(101), 5, TimeInForce::GTC)).unwrap();
        market.submit_order(&mut venue.ctx(), &b, limit(Side::Sell, dec!(99), 3, TimeInForce::GFA)).unwrap();
        let gfa = market
            .submit_order(&mut venue.ctx(), &b, limit(Side::Sell, dec!(105), 2, TimeInForce::GFA))
            .unwrap()
            .order;

        // crossing orders do not trade during the auction
        assert!(market.positions().open_interest() == 0);

        venue.now = Timestamp::from_secs(5);
        market.on_time_update(&mut venue.ctx()).unwrap();
        assert_eq!(market.trading_mode(), TradingMode::OpeningAuction);

        venue.now = Timestamp::from_secs(11);
        market.on_time_update(&mut venue.ctx()).unwrap();
        assert_eq!(market.trading_mode(), TradingMode::Continuous);
        assert_eq!(market.state(), MarketState::Active);
        assert_eq!(market.positions().open_volume(&a), 3);
        assert_eq!(market.positions().open_volume(&b), -3);
        assert!(market.mark_price().is_some());
        assert!(!market.book().contains(gfa.id));
    }

    #[test]
    fn opening_auction_without_volume_is_extended() {
        let (mut venue, mut market) = opening_market();
        market
            .submit_order(&mut venue.ctx(), &PartyId::new("a"), limit(Side::Buy, dec!(90), 1, TimeInForce::GTC))
            .unwrap();
        venue.now = Timestamp::from_secs(11);
        market.on_time_update(&mut venue.ctx()).unwrap();
        assert_eq!(market.trading_mode(), TradingMode::OpeningAuction);
        let data = market.market_data(venue.now).unwrap();
        assert_eq!(data.auction_end, Some(Timestamp::from_secs(21)));
        assert_eq!(data.extension_trigger, Some(AuctionTrigger::Opening));
    }

    #[test]
    fn expired_gtt_orders_leave_the_book() {
        let mut venue = Venue::new();
        let mut market = Market::create(market_config(), &mut venue.ctx()).unwrap();
        venue.fund("a", 10_000);
        let order = limit(Side::Buy, dec!(100), 1, TimeInForce::GTT).with_expiry(Timestamp::from_secs(5));
        let placed = market.submit_order(&mut venue.ctx(), &PartyId::new("a"), order).unwrap().order;
        venue.now = Timestamp::from_secs(5);
        market.on_time_update(&mut venue.ctx()).unwrap();
        assert!(!market.book().contains(placed.id));
        assert!(venue
            .events
            .events()
            .iter()
            .any(|e| matches!(&e.payload, EventPayload::OrderUpdated(o) if o.id == placed.id && o.status == OrderStatus::Expired)));
    }
}
