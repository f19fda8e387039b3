// 8.0 engine/core.rs: main engine. holds every market, the collateral ledger and
// the event stream.

use super::config::EngineConfig;
use super::results::EngineError;
use crate::amount::Amount;
use crate::config::{NetworkParams, VenueConfig};
use crate::events::{Event, EventCollector, EventPayload, TransactionRejectedEvent};
use crate::ledger::Ledger;
use crate::market::{ExecCtx, IdGenerator, Market, MarketConfig, MarketData, MarketError, MarketState};
use crate::types::{AssetId, MarketId, PartyId, Timestamp};
use std::collections::BTreeMap;
use tracing::{debug, error, info};

/** 8.1: main engine struct. all state lives here */
#[derive(Debug)]
pub struct Engine {
    pub(super) config: EngineConfig,
    pub(super) network: NetworkParams,
    pub(super) ledger: Ledger,
    pub(super) events: EventCollector,
    pub(super) ids: IdGenerator,
    pub(super) markets: BTreeMap<MarketId, Market>,
    pub(super) now: Timestamp,
    pub(super) halted: bool,
}

impl Engine {
    pub fn new(config: VenueConfig) -> Self {
        Self {
            events: EventCollector::with_capacity(config.engine.event_buffer),
            config: config.engine,
            network: config.network,
            ledger: Ledger::new(),
            ids: IdGenerator::default(),
            markets: BTreeMap::new(),
            now: Timestamp::default(),
            halted: false,
        }
    }

    pub fn now(&self) -> Timestamp {
        self.now
    }

    pub fn is_halted(&self) -> bool {
        self.halted
    }

    pub fn ledger(&self) -> &Ledger {
        &self.ledger
    }

    pub fn market(&self, id: &MarketId) -> Option<&Market> {
        self.markets.get(id)
    }

    pub fn markets(&self) -> impl Iterator<Item = &Market> {
        self.markets.values()
    }

    pub fn events(&self) -> &[Event] {
        self.events.events()
    }

    pub fn drain_events(&mut self) -> Vec<Event> {
        self.events.drain()
    }

    pub(super) fn ensure_running(&self) -> Result<(), EngineError> {
        if self.halted {
            return Err(EngineError::Halted);
        }
        Ok(())
    }

    /// Record the outcome of one transaction. Rejections become events; an
    /// invariant violation halts the engine for good.
    pub(super) fn conclude<T>(
        &mut self,
        party: Option<&PartyId>,
        transaction: &str,
        result: Result<T, EngineError>,
    ) -> Result<T, EngineError> {
        match &result {
            Ok(_) => {}
            Err(EngineError::Halted) => {}
            Err(EngineError::Invariant(violation)) => {
                error!(%violation, transaction, at = %self.now, "invariant violated, halting");
                self.halted = true;
            }
            Err(e) => {
                debug!(error = %e, transaction, party = ?party.map(|p| p.as_str()), "transaction rejected");
                self.events.emit(
                    self.now,
                    EventPayload::TransactionRejected(TransactionRejectedEvent {
                        party: party.cloned(),
                        transaction: transaction.to_string(),
                        reason: e.to_string(),
                    }),
                );
            }
        }
        result
    }

    /// Run `f` against one market with the shared state lent out.
    pub(super) fn with_market<T>(
        &mut self,
        market: &MarketId,
        party: Option<&PartyId>,
        transaction: &str,
        f: impl FnOnce(&mut Market, &mut ExecCtx<'_>) -> Result<T, MarketError>,
    ) -> Result<T, EngineError> {
        self.ensure_running()?;
        let result = match self.markets.get_mut(market) {
            None => Err(EngineError::MarketNotFound(market.clone())),
            Some(m) => {
                let mut ctx = ExecCtx {
                    ledger: &mut self.ledger,
                    events: &mut self.events,
                    ids: &mut self.ids,
                    config: &self.config,
                    network: &self.network,
                    now: self.now,
                };
                f(m, &mut ctx).map_err(EngineError::from)
            }
        };
        self.conclude(party, transaction, result)
    }

    // ---- collateral ----

    pub fn enable_asset(&mut self, asset: &AssetId) -> Result<(), EngineError> {
        self.ensure_running()?;
        let result = self.ledger.enable_asset(asset).map_err(EngineError::from);
        if result.is_ok() {
            info!(%asset, "asset enabled");
            self.events.emit(self.now, EventPayload::AssetEnabled(asset.clone()));
        }
        self.conclude(None, "EnableAsset", result)
    }

    pub fn deposit(&mut self, party: &PartyId, asset: &AssetId, amount: Amount) -> Result<(), EngineError> {
        self.ensure_running()?;
        let result = self.ledger.deposit(party, asset, amount, self.now).map_err(EngineError::from);
        let result = result.map(|movement| self.events.emit_movement(self.now, movement));
        self.conclude(Some(party), "Deposit", result)
    }

    /// Only the general account can be withdrawn from.
    pub fn withdraw(&mut self, party: &PartyId, asset: &AssetId, amount: Amount) -> Result<(), EngineError> {
        self.ensure_running()?;
        let result = self.ledger.withdraw(party, asset, amount, self.now).map_err(EngineError::from);
        let result = result.map(|movement| self.events.emit_movement(self.now, movement));
        self.conclude(Some(party), "Withdraw", result)
    }

    // ---- markets ----

    /// 8.2: create a market from governance-resolved config.
    pub fn submit_market(&mut self, config: MarketConfig) -> Result<(), EngineError> {
        self.ensure_running()?;
        let id = config.id.clone();
        let result = if self.markets.contains_key(&id) {
            Err(EngineError::MarketAlreadyExists(id.clone()))
        } else {
            let mut ctx = ExecCtx {
                ledger: &mut self.ledger,
                events: &mut self.events,
                ids: &mut self.ids,
                config: &self.config,
                network: &self.network,
                now: self.now,
            };
            Market::create(config, &mut ctx).map_err(EngineError::from)
        };
        let result = result.map(|market| {
            self.markets.insert(id, market);
        });
        self.conclude(None, "SubmitMarket", result)
    }

    pub fn get_market_data(&self, market: &MarketId) -> Result<MarketData, EngineError> {
        let m = self
            .markets
            .get(market)
            .ok_or_else(|| EngineError::MarketNotFound(market.clone()))?;
        Ok(m.market_data(self.now)?)
    }

    pub fn get_market_state(&self, market: &MarketId) -> Result<MarketState, EngineError> {
        self.markets
            .get(market)
            .map(|m| m.state())
            .ok_or_else(|| EngineError::MarketNotFound(market.clone()))
    }
}
