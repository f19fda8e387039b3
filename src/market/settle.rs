// 12.5: trades into positions and cash, plus the end of a market's life.

use super::{ExecCtx, Market, MarketError, MarketState, TradingMode};
use crate::amount::Amount;
use crate::events::{EventPayload, LossSocializationEvent};
use crate::ledger::AccountKey;
use crate::market::OracleData;
use crate::num::InvariantViolation;
use crate::order::OrderStatus;
use crate::settlement::SettlementKind;
use crate::trade::Trade;
use crate::types::{Price, Timestamp};
use rust_decimal::Decimal;
use tracing::{info, warn};

impl Market {
    /// 12.5.1: positions, settlement bookkeeping, price history, then
    /// mark-to-market at the last trade price.
    pub(super) fn process_trades(&mut self, ctx: &mut ExecCtx<'_>, trades: &[Trade]) -> Result<(), InvariantViolation> {
        let Some(last) = trades.last() else {
            return Ok(());
        };

        for trade in trades {
            ctx.emit(EventPayload::Trade(trade.clone()));
            for position in self.positions.update(trade)? {
                ctx.emit(EventPayload::PositionState(position));
            }
            self.settlement.add_trade(trade)?;
            if self.mode == TradingMode::Continuous {
                self.monitor.record(ctx.now, trade.price);
            }
        }
        self.positions.check_balanced()?;

        self.last_traded_price = Some(last.price);
        self.mark_price = Some(last.price);
        self.mark_to_market(ctx, last.price.value(), SettlementKind::MarkToMarket)
    }

    fn mark_to_market(&mut self, ctx: &mut ExecCtx<'_>, mark: Decimal, kind: SettlementKind) -> Result<(), InvariantViolation> {
        let outcome = self.settlement.settle(&self.positions, mark, ctx.ledger, kind)?;
        ctx.apply(&outcome.batch)?;
        self.settlement.check_empty(ctx.ledger)?;
        if !outcome.shortfall.is_zero() {
            warn!(market = %self.config.id, shortfall = %outcome.shortfall, "loss socialized");
            ctx.emit(EventPayload::LossSocialization(LossSocializationEvent {
                market: self.config.id.clone(),
                shortfall: outcome.shortfall,
            }));
        }
        self.positions.mark_all(mark)
    }

    /// Stake the market should have. Zero until there is a price to value
    /// open interest at.
    pub(super) fn target_stake(&self, now: Timestamp) -> Result<Amount, InvariantViolation> {
        let indicative = if self.mode.is_auction() { self.book.indicative() } else { None };
        let reference = self
            .mark_price
            .map(|p| p.value())
            .or_else(|| indicative.map(|i| i.price.value()));
        let Some(reference) = reference else {
            return Ok(Amount::zero());
        };
        let open_interest = self.positions.open_interest() + indicative.map(|i| i.volume).unwrap_or(0);
        self.liquidity
            .target_stake(reference, self.risk.factors().max(), open_interest, now)
    }

    pub(super) fn liquidity_fee_factor(&self, now: Timestamp) -> Result<Decimal, InvariantViolation> {
        let target = self.target_stake(now)?;
        Ok(self.liquidity.liquidity_fee(&target))
    }

    /// 12.5.2: oracle input. A termination flag stops trading; a settlement
    /// price settles a terminated market or is kept until termination.
    pub fn submit_oracle_data(&mut self, ctx: &mut ExecCtx<'_>, data: &OracleData) -> Result<(), MarketError> {
        if self.state.is_final() {
            return Err(MarketError::AlreadyFinal);
        }
        let binding = self.config.oracle.clone();
        if let Some(price) = data.number(&binding.settlement_price_key) {
            if price <= Decimal::ZERO {
                return Err(MarketError::NoSettlementPrice);
            }
            self.pending_settlement_price = Some(price);
        }
        if data.flag(&binding.trading_terminated_key) && self.state != MarketState::TradingTerminated {
            self.terminate_trading(ctx)?;
        }

        match (self.state, self.pending_settlement_price) {
            (MarketState::TradingTerminated, Some(price)) => self.final_settle(ctx, price, MarketState::Settled)?,
            _ => self.publish(ctx)?,
        }
        Ok(())
    }

    /// 12.5.3: governance shutdown at `price`, or the stored oracle price, or
    /// the mark price.
    pub fn terminate_market(&mut self, ctx: &mut ExecCtx<'_>, price: Option<Decimal>) -> Result<(), MarketError> {
        if self.state.is_final() {
            return Err(MarketError::AlreadyFinal);
        }
        let price = price
            .or(self.pending_settlement_price)
            .or_else(|| self.mark_price.map(|p| p.value()))
            .filter(|p| *p > Decimal::ZERO)
            .ok_or(MarketError::NoSettlementPrice)?;
        if self.state != MarketState::TradingTerminated {
            self.terminate_trading(ctx)?;
        }
        self.final_settle(ctx, price, MarketState::Closed)?;
        Ok(())
    }

    fn terminate_trading(&mut self, ctx: &mut ExecCtx<'_>) -> Result<(), InvariantViolation> {
        info!(market = %self.config.id, "trading terminated");
        for mut order in self.book.remove_where(|_| true) {
            order.finish(OrderStatus::Cancelled, None, ctx.now);
            ctx.emit(EventPayload::OrderUpdated(order));
        }
        self.book.leave_auction();
        self.auction = None;
        self.set_state(ctx, MarketState::TradingTerminated, TradingMode::NoTrading);

        // nothing left resting, so only positions hold margin now
        for party in self.active_parties() {
            self.check_margin(ctx, &party, crate::risk::MarginTrigger::AfterMarkMove, None)?;
        }
        Ok(())
    }

    /// 12.5.4: settle everything at `price`, close all positions and hand every
    /// market account back.
    fn final_settle(&mut self, ctx: &mut ExecCtx<'_>, price: Decimal, state: MarketState) -> Result<(), InvariantViolation> {
        info!(market = %self.config.id, %price, ?state, "final settlement");
        self.mark_to_market(ctx, price, SettlementKind::Final)?;
        self.positions.close_all(price, ctx.now)?;
        for position in self.positions.iter() {
            ctx.emit(EventPayload::PositionState(position.clone()));
        }
        self.mark_price = Price::new(price);

        self.distribute_liquidity_fees(ctx)?;
        for provision in self.liquidity.close_all(ctx.now) {
            ctx.emit(EventPayload::LiquidityProvision(provision));
        }

        let batch = self.settlement.clear_market(ctx.ledger);
        ctx.apply(&batch)?;
        self.margins.clear();
        self.pending_settlement_price = None;
        self.set_state(ctx, state, TradingMode::NoTrading);

        self.settlement.check_empty(ctx.ledger)?;
        self.publish(ctx)
    }
}
