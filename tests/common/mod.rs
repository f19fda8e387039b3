//! Shared setup for the integration tests.

#![allow(dead_code)]

use rust_decimal::Decimal;
use venue_core::market::MarketConfig;
use venue_core::risk::{RiskModel, SimpleRiskModel};
use venue_core::*;

pub const MARKET: &str = "ETH/DEC";

pub fn usd() -> AssetId {
    AssetId::new("USD")
}

pub fn market() -> MarketId {
    MarketId::new(MARKET)
}

pub fn party(name: &str) -> PartyId {
    PartyId::new(name)
}

/// Simple risk model with the same factor both ways, no trading fees, tick 1.
pub fn market_config(factor: Decimal, opening_auction_secs: i64) -> MarketConfig {
    serde_json::from_value(serde_json::json!({
        "id": MARKET,
        "settlement_asset": "USD",
        "tick_size": "1",
        "opening_auction_secs": opening_auction_secs,
        "fees": { "maker": "0", "infrastructure": "0" },
        "risk_model": RiskModel::Simple(SimpleRiskModel {
            factor_long: factor,
            factor_short: factor,
            max_move_up: factor,
            min_move_down: factor,
        }),
    }))
    .expect("market config")
}

pub fn engine_with_market(factor: Decimal, opening_auction_secs: i64) -> Engine {
    engine_with_config(market_config(factor, opening_auction_secs))
}

/// Engine at t=1s with USD enabled and `config` listed.
pub fn engine_with_config(config: MarketConfig) -> Engine {
    let mut engine = Engine::new(VenueConfig::default());
    engine.on_time_update(Timestamp::from_secs(1)).expect("time");
    engine.enable_asset(&usd()).expect("asset");
    engine.submit_market(config).expect("market");
    engine
}

pub fn fund(engine: &mut Engine, name: &str, amount: u64) {
    engine.deposit(&party(name), &usd(), Amount::from(amount)).expect("deposit");
}

pub fn limit(side: Side, price: i64, size: u64) -> OrderSubmission {
    OrderSubmission::limit(market(), side, Decimal::from(price), size, TimeInForce::GTC)
}
