// 12.x market: one traded instrument. owns its book, positions, risk, settlement,
// monitors and LP commitments; borrows the ledger and event stream per command.
//
// every command runs book -> positions -> risk -> ledger (fees, mtm, margin)
// -> closeouts -> pegs -> liquidity monitor -> market data, in that order.

pub mod config;
pub mod data;

mod auction;
mod liquidity;
mod margin;
mod orders;
mod settle;

pub use config::{MarketConfig, OracleBinding, OracleData, OracleValue};
pub use data::{AuctionTrigger, AuctionWindow, MarketData, MarketState, TradingMode};

use crate::config::NetworkParams;
use crate::engine::EngineConfig;
use crate::events::{EventCollector, EventPayload, MarketCreatedEvent, MarketStateChangedEvent};
use crate::ledger::{Ledger, LedgerError, TransferBatch};
use crate::liquidity::{LiquidityEngine, LiquidityError};
use crate::monitor::PriceMonitor;
use crate::num::InvariantViolation;
use crate::order::OrderError;
use crate::orderbook::OrderBook;
use crate::position::PositionTracker;
use crate::risk::{MarginLevels, RiskEngine, RiskError};
use crate::settlement::SettlementEngine;
use crate::types::{OrderId, PartyId, Price, Timestamp, TradeId};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::info;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum MarketError {
    #[error("invalid market config: {0}")]
    InvalidConfig(&'static str),

    #[error("risk model: {0}")]
    Risk(#[from] RiskError),

    #[error("order rejected: {0}")]
    Order(#[from] OrderError),

    #[error("liquidity provision rejected: {0}")]
    Liquidity(#[from] LiquidityError),

    #[error("transfer rejected: {0}")]
    Ledger(#[from] LedgerError),

    #[error("market is already in a final state")]
    AlreadyFinal,

    #[error("no price to settle at")]
    NoSettlementPrice,

    #[error(transparent)]
    Invariant(#[from] InvariantViolation),
}

impl MarketError {
    /// For commands the market issues itself, where any rejection is a bug.
    pub(crate) fn into_invariant(self) -> InvariantViolation {
        match self {
            MarketError::Invariant(v) => v,
            other => InvariantViolation::Broken(format!("internal command rejected: {other}")),
        }
    }
}

/// Monotonic id source shared by every market, so ids are unique venue-wide.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdGenerator {
    next_order: u64,
    next_trade: u64,
}

impl Default for IdGenerator {
    fn default() -> Self {
        Self {
            next_order: 1,
            next_trade: 1,
        }
    }
}

impl IdGenerator {
    pub fn next_order(&mut self) -> OrderId {
        let id = OrderId(self.next_order);
        self.next_order += 1;
        id
    }

    pub fn next_trade(&mut self) -> TradeId {
        let id = TradeId(self.next_trade);
        self.next_trade += 1;
        id
    }
}

/// What a market borrows from the engine for the length of one command.
pub struct ExecCtx<'a> {
    pub ledger: &'a mut Ledger,
    pub events: &'a mut EventCollector,
    pub ids: &'a mut IdGenerator,
    pub config: &'a EngineConfig,
    pub network: &'a NetworkParams,
    pub now: Timestamp,
}

impl ExecCtx<'_> {
    pub fn emit(&mut self, payload: EventPayload) {
        self.events.emit(self.now, payload);
    }

    /// Apply a batch the market built itself. Failing here means the batch was
    /// computed against stale balances, which must never happen.
    pub fn apply(&mut self, batch: &TransferBatch) -> Result<(), InvariantViolation> {
        if batch.is_empty() {
            return Ok(());
        }
        let movement = self
            .ledger
            .transfer(batch, self.now)
            .map_err(|e| InvariantViolation::Broken(format!("internal transfer failed: {e}")))?;
        self.events.emit_movement(self.now, movement);
        Ok(())
    }

    /// Apply a batch requested by a party. Shortfalls are the party's problem.
    pub fn try_apply(&mut self, batch: &TransferBatch) -> Result<(), LedgerError> {
        if batch.is_empty() {
            return Ok(());
        }
        let movement = self.ledger.transfer(batch, self.now)?;
        self.events.emit_movement(self.now, movement);
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct Market {
    config: MarketConfig,
    state: MarketState,
    mode: TradingMode,
    auction: Option<AuctionWindow>,
    book: OrderBook,
    positions: PositionTracker,
    risk: RiskEngine,
    settlement: SettlementEngine,
    monitor: PriceMonitor,
    liquidity: LiquidityEngine,
    margins: BTreeMap<PartyId, MarginLevels>,
    mark_price: Option<Price>,
    last_traded_price: Option<Price>,
    /// Settlement price seen before trading was terminated.
    pending_settlement_price: Option<rust_decimal::Decimal>,
    updated_at: Timestamp,
}

impl Market {
    /// 12.1: build a market from governance-resolved config and open it.
    pub fn create(config: MarketConfig, ctx: &mut ExecCtx<'_>) -> Result<Self, MarketError> {
        config.validate()?;
        let asset = config.settlement_asset.clone();
        let risk = RiskEngine::new(
            config.id.clone(),
            asset.clone(),
            config.risk_model.clone(),
            config.margin_scaling.clone(),
            config.slippage.clone(),
        )?;
        let opening = match config.opening_auction_secs {
            0 => None,
            secs => Some(AuctionWindow::new(AuctionTrigger::Opening, ctx.now, secs)?),
        };
        // last fallible step before anything is written
        ctx.ledger.create_market_accounts(&config.id, &asset)?;

        let mut market = Self {
            book: OrderBook::new(config.id.clone(), config.tick_size),
            positions: PositionTracker::new(config.id.clone()),
            settlement: SettlementEngine::new(config.id.clone(), asset.clone()),
            monitor: PriceMonitor::new(config.price_monitoring.clone()),
            liquidity: LiquidityEngine::new(
                config.id.clone(),
                config.liquidity_monitoring.clone(),
                config.liquidity_sla.clone(),
                ctx.now,
            ),
            risk,
            state: MarketState::Active,
            mode: TradingMode::Continuous,
            auction: None,
            margins: BTreeMap::new(),
            mark_price: None,
            last_traded_price: None,
            pending_settlement_price: None,
            updated_at: ctx.now,
            config,
        };

        ctx.emit(EventPayload::MarketCreated(MarketCreatedEvent {
            market: market.config.id.clone(),
            asset,
        }));
        match opening {
            Some(window) => market.start_opening_auction(ctx, window),
            None => market.emit_state(ctx),
        }
        market.publish(ctx)?;
        info!(market = %market.config.id, mode = ?market.mode, "market created");
        Ok(market)
    }

    pub fn id(&self) -> &crate::types::MarketId {
        &self.config.id
    }

    pub fn config(&self) -> &MarketConfig {
        &self.config
    }

    pub fn state(&self) -> MarketState {
        self.state
    }

    pub fn trading_mode(&self) -> TradingMode {
        self.mode
    }

    pub fn book(&self) -> &OrderBook {
        &self.book
    }

    pub fn positions(&self) -> &PositionTracker {
        &self.positions
    }

    pub fn liquidity(&self) -> &LiquidityEngine {
        &self.liquidity
    }

    pub fn margin_levels(&self, party: &PartyId) -> Option<&MarginLevels> {
        self.margins.get(party)
    }

    pub fn mark_price(&self) -> Option<Price> {
        self.mark_price
    }

    fn set_state(&mut self, ctx: &mut ExecCtx<'_>, state: MarketState, mode: TradingMode) {
        if self.state == state && self.mode == mode {
            return;
        }
        self.state = state;
        self.mode = mode;
        self.emit_state(ctx);
    }

    fn emit_state(&self, ctx: &mut ExecCtx<'_>) {
        info!(market = %self.config.id, state = ?self.state, mode = ?self.mode, at = %ctx.now, "market state");
        ctx.emit(EventPayload::MarketStateChanged(MarketStateChangedEvent {
            market: self.config.id.clone(),
            state: self.state,
            trading_mode: self.mode,
        }));
    }

    /// 12.2: snapshot of everything a consumer needs about the market right now.
    pub fn market_data(&self, now: Timestamp) -> Result<MarketData, InvariantViolation> {
        let best_bid = self.book.best_bid();
        let best_ask = self.book.best_ask();
        let refs = self.book.static_refs();
        let indicative = if self.mode.is_auction() { self.book.indicative() } else { None };

        Ok(MarketData {
            market: self.config.id.clone(),
            mark_price: self.mark_price,
            last_traded_price: self.last_traded_price,
            best_bid_price: best_bid.map(|(p, _)| p),
            best_bid_volume: best_bid.map(|(_, v)| v).unwrap_or(0),
            best_offer_price: best_ask.map(|(p, _)| p),
            best_offer_volume: best_ask.map(|(_, v)| v).unwrap_or(0),
            best_static_bid_price: refs.best_bid,
            best_static_offer_price: refs.best_ask,
            mid_price: if self.mode.is_auction() { None } else { self.book.mid() },
            indicative_price: indicative.map(|i| i.price),
            indicative_volume: indicative.map(|i| i.volume).unwrap_or(0),
            open_interest: self.positions.open_interest(),
            target_stake: self.target_stake(now)?,
            supplied_stake: self.liquidity.supplied_stake(),
            trading_mode: self.mode,
            market_state: self.state,
            auction_start: self.auction.as_ref().map(|a| a.start),
            auction_end: self.auction.as_ref().map(|a| a.end),
            trigger: self.auction.as_ref().map(|a| a.trigger),
            extension_trigger: self.auction.as_ref().and_then(|a| a.extension_trigger),
            price_monitoring_bounds: self.monitor.bounds(&self.risk, now).unwrap_or_default(),
            timestamp: self.updated_at.max(now),
        })
    }

    fn publish(&mut self, ctx: &mut ExecCtx<'_>) -> Result<(), InvariantViolation> {
        self.updated_at = ctx.now;
        self.observe_obligations(ctx.now);
        let data = self.market_data(ctx.now)?;
        ctx.emit(EventPayload::MarketData(data));
        Ok(())
    }

    /// Fatal checks run at the end of every command.
    fn check_invariants(&self, ctx: &ExecCtx<'_>) -> Result<(), InvariantViolation> {
        self.positions.check_balanced()?;
        self.settlement.check_empty(ctx.ledger)?;
        if self.mode == TradingMode::Continuous && self.book.is_crossed() {
            return Err(InvariantViolation::CrossedBook(self.config.id.to_string()));
        }
        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod testkit {
    use super::*;
    use crate::amount::Amount;
    use crate::risk::{RiskModel, ScalingFactors, SimpleRiskModel, SlippageFactors};
    use crate::types::{AssetId, MarketId};
    use crate::fees::FeeFactors;
    use crate::liquidity::LiquidityMonitoringParameters;
    use crate::monitor::PriceMonitoringSettings;
    use rust_decimal_macros::dec;

    /// Everything a market needs from the engine, owned in one place for tests.
    pub struct Venue {
        pub ledger: Ledger,
        pub events: EventCollector,
        pub ids: IdGenerator,
        pub config: EngineConfig,
        pub network: NetworkParams,
        pub now: Timestamp,
    }

    impl Venue {
        pub fn new() -> Self {
            let mut ledger = Ledger::new();
            ledger.enable_asset(&asset()).unwrap();
            Self {
                ledger,
                events: EventCollector::new(),
                ids: IdGenerator::default(),
                config: EngineConfig::default(),
                network: NetworkParams::default(),
                now: Timestamp::from_secs(1),
            }
        }

        pub fn ctx(&mut self) -> ExecCtx<'_> {
            ExecCtx {
                ledger: &mut self.ledger,
                events: &mut self.events,
                ids: &mut self.ids,
                config: &self.config,
                network: &self.network,
                now: self.now,
            }
        }

        pub fn fund(&mut self, party: &str, amount: u64) {
            self.ledger
                .deposit(&PartyId::new(party), &asset(), Amount::from(amount), self.now)
                .unwrap();
        }
    }

    pub fn asset() -> AssetId {
        AssetId::new("USD")
    }

    pub fn market_config() -> MarketConfig {
        MarketConfig {
            id: MarketId::new("m"),
            settlement_asset: asset(),
            tick_size: dec!(1),
            min_order_size: 1,
            risk_model: RiskModel::Simple(SimpleRiskModel {
                factor_long: dec!(0.1),
                factor_short: dec!(0.1),
                max_move_up: dec!(0.1),
                min_move_down: dec!(0.1),
            }),
            margin_scaling: ScalingFactors::default(),
            slippage: SlippageFactors::default(),
            fees: FeeFactors {
                maker: dec!(0),
                infrastructure: dec!(0),
            },
            price_monitoring: PriceMonitoringSettings::default(),
            liquidity_monitoring: LiquidityMonitoringParameters::default(),
            liquidity_sla: Default::default(),
            opening_auction_secs: 0,
            oracle: OracleBinding::default(),
        }
    }
}
