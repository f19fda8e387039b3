// 8.3: time and market lifecycle. block time only moves forward; every market
// sees each new time once, in market id order.

use super::core::Engine;
use super::results::EngineError;
use crate::market::OracleData;
use crate::types::{MarketId, Timestamp};
use rust_decimal::Decimal;
use tracing::{trace, warn};

impl Engine {
    pub fn on_time_update(&mut self, block_time: Timestamp) -> Result<(), EngineError> {
        self.ensure_running()?;
        if block_time < self.now {
            warn!(%block_time, now = %self.now, "ignoring block time from the past");
            return Ok(());
        }
        self.now = block_time;
        trace!(now = %self.now, "time update");

        let ids: Vec<MarketId> = self.markets.keys().cloned().collect();
        for id in ids {
            self.with_market(&id, None, "TimeUpdate", |m, ctx| m.on_time_update(ctx))?;
        }
        Ok(())
    }

    pub fn submit_oracle_data(&mut self, market: &MarketId, data: &OracleData) -> Result<(), EngineError> {
        self.with_market(market, None, "OracleData", |m, ctx| m.submit_oracle_data(ctx, data))
    }

    /// Governance shutdown. Without a price the last mark price is used.
    pub fn terminate_market(&mut self, market: &MarketId, price: Option<Decimal>) -> Result<(), EngineError> {
        self.with_market(market, None, "TerminateMarket", |m, ctx| m.terminate_market(ctx, price))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::amount::Amount;
    use crate::config::VenueConfig;
    use crate::market::{MarketConfig, MarketState, OracleValue, TradingMode};
    use crate::order::{OrderSubmission, TimeInForce};
    use crate::risk::{RiskModel, SimpleRiskModel};
    use crate::types::{AssetId, PartyId, Side};
    use rust_decimal_macros::dec;

    fn engine(opening_secs: i64) -> Engine {
        let mut engine = Engine::new(VenueConfig::default());
        let usd = AssetId::new("USD");
        engine.enable_asset(&usd).unwrap();
        let config: MarketConfig = serde_json::from_value(serde_json::json!({
            "id": "m",
            "settlement_asset": "USD",
            "tick_size": "1",
            "opening_auction_secs": opening_secs,
            "risk_model": RiskModel::Simple(SimpleRiskModel {
                factor_long: dec!(0.1),
                factor_short: dec!(0.1),
                max_move_up: dec!(0.1),
                min_move_down: dec!(0.1),
            }),
        }))
        .unwrap();
        engine.submit_market(config).unwrap();
        for p in ["a", "b"] {
            engine.deposit(&PartyId::new(p), &usd, Amount::from(10_000)).unwrap();
        }
        engine
    }

    #[test]
    fn time_never_goes_backwards() {
        let mut engine = engine(0);
        engine.on_time_update(Timestamp::from_secs(10)).unwrap();
        engine.on_time_update(Timestamp::from_secs(5)).unwrap();
        assert_eq!(engine.now(), Timestamp::from_secs(10));
    }

    #[test]
    fn opening_auction_ends_on_time_update() {
        let mut engine = engine(30);
        let m = MarketId::new("m");
        engine
            .submit_order(OrderSubmission::limit(m.clone(), Side::Buy, dec!(100), 2, TimeInForce::GTC), &PartyId::new("a"))
            .unwrap();
        engine
            .submit_order(OrderSubmission::limit(m.clone(), Side::Sell, dec!(100), 2, TimeInForce::GTC), &PartyId::new("b"))
            .unwrap();
        assert_eq!(engine.get_market_data(&m).unwrap().indicative_volume, 2);

        engine.on_time_update(Timestamp::from_secs(31)).unwrap();
        let data = engine.get_market_data(&m).unwrap();
        assert_eq!(data.trading_mode, TradingMode::Continuous);
        assert_eq!(data.open_interest, 2);
        assert_eq!(data.mark_price.map(|p| p.value()), Some(dec!(100)));
    }

    #[test]
    fn oracle_termination_then_price_settles() {
        let mut engine = engine(0);
        let m = MarketId::new("m");
        let stop = OracleData::default().with("trading.terminated", OracleValue::Flag(true));
        engine.submit_oracle_data(&m, &stop).unwrap();
        assert_eq!(engine.get_market_state(&m).unwrap(), MarketState::TradingTerminated);

        let price = OracleData::default().with("prices.settlement.value", OracleValue::Number(dec!(100)));
        engine.submit_oracle_data(&m, &price).unwrap();
        assert_eq!(engine.get_market_state(&m).unwrap(), MarketState::Settled);
    }
}
