//! Order and liquidity commitment commands.

use super::core::Engine;
use super::results::EngineError;
use crate::liquidity::{LiquidityAmendment, LiquidityCancellation, LiquiditySubmission};
use crate::order::{
    OrderAmendment, OrderCancellation, OrderCancellationConfirmation, OrderConfirmation, OrderError, OrderSubmission,
};
use crate::types::{MarketId, PartyId};

impl Engine {
    pub fn submit_order(&mut self, submission: OrderSubmission, party: &PartyId) -> Result<OrderConfirmation, EngineError> {
        let market = submission.market.clone();
        self.with_market(&market, Some(party), "SubmitOrder", |m, ctx| m.submit_order(ctx, party, submission))
    }

    pub fn amend_order(&mut self, amendment: OrderAmendment, party: &PartyId) -> Result<OrderConfirmation, EngineError> {
        let market = amendment.market.clone();
        self.with_market(&market, Some(party), "AmendOrder", |m, ctx| m.amend_order(ctx, party, amendment))
    }

    /// Without a market, cancels across every market the party has orders in.
    /// An order id without a market is looked up.
    pub fn cancel_order(
        &mut self,
        cancellation: OrderCancellation,
        party: &PartyId,
    ) -> Result<Vec<OrderCancellationConfirmation>, EngineError> {
        self.ensure_running()?;
        let targets: Vec<MarketId> = match (&cancellation.market, cancellation.order_id) {
            (Some(m), _) => vec![m.clone()],
            (None, Some(id)) => self
                .markets
                .values()
                .filter(|m| m.book().contains(id))
                .map(|m| m.id().clone())
                .collect(),
            (None, None) => self
                .markets
                .values()
                .filter(|m| !m.state().is_final() && !m.book().party_orders(party).is_empty())
                .map(|m| m.id().clone())
                .collect(),
        };
        if targets.is_empty() && cancellation.order_id.is_some() {
            return self.conclude(Some(party), "CancelOrder", Err(OrderError::OrderNotFound.into()));
        }

        let mut confirmations = Vec::new();
        for market in targets {
            let done = self.with_market(&market, Some(party), "CancelOrder", |m, ctx| {
                m.cancel_order(ctx, party, &cancellation)
            })?;
            confirmations.extend(done);
        }
        Ok(confirmations)
    }

    pub fn submit_liquidity_provision(
        &mut self,
        submission: LiquiditySubmission,
        party: &PartyId,
        lp_id: &str,
    ) -> Result<(), EngineError> {
        let market = submission.market.clone();
        self.with_market(&market, Some(party), "SubmitLiquidityProvision", |m, ctx| {
            m.submit_liquidity_provision(ctx, party, lp_id.to_string(), &submission)
        })
    }

    pub fn amend_liquidity_provision(
        &mut self,
        amendment: LiquidityAmendment,
        party: &PartyId,
        lp_id: &str,
    ) -> Result<(), EngineError> {
        let market = amendment.market.clone();
        self.with_market(&market, Some(party), "AmendLiquidityProvision", |m, ctx| {
            m.amend_liquidity_provision(ctx, party, lp_id, &amendment)
        })
    }

    pub fn cancel_liquidity_provision(
        &mut self,
        cancellation: LiquidityCancellation,
        party: &PartyId,
        lp_id: &str,
    ) -> Result<(), EngineError> {
        self.with_market(&cancellation.market, Some(party), "CancelLiquidityProvision", |m, ctx| {
            m.cancel_liquidity_provision(ctx, party, lp_id)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::amount::Amount;
    use crate::config::VenueConfig;
    use crate::events::EventPayload;
    use crate::market::MarketConfig;
    use crate::order::{OrderStatus, TimeInForce};
    use crate::risk::{RiskModel, SimpleRiskModel};
    use crate::types::{AssetId, Side};
    use rust_decimal_macros::dec;

    fn config(id: &str) -> MarketConfig {
        serde_json::from_value(serde_json::json!({
            "id": id,
            "settlement_asset": "USD",
            "tick_size": "1",
            "risk_model": RiskModel::Simple(SimpleRiskModel {
                factor_long: dec!(0.1),
                factor_short: dec!(0.1),
                max_move_up: dec!(0.1),
                min_move_down: dec!(0.1),
            }),
        }))
        .unwrap()
    }

    fn engine() -> Engine {
        let mut engine = Engine::new(VenueConfig::default());
        let usd = AssetId::new("USD");
        engine.enable_asset(&usd).unwrap();
        engine.submit_market(config("m1")).unwrap();
        engine.submit_market(config("m2")).unwrap();
        engine.deposit(&PartyId::new("a"), &usd, Amount::from(100_000)).unwrap();
        engine
    }

    #[test]
    fn cancel_without_market_spans_markets() {
        let mut engine = engine();
        let a = PartyId::new("a");
        for m in ["m1", "m2"] {
            let order = OrderSubmission::limit(MarketId::new(m), Side::Buy, dec!(10), 1, TimeInForce::GTC);
            engine.submit_order(order, &a).unwrap();
        }
        let done = engine.cancel_order(OrderCancellation::default(), &a).unwrap();
        assert_eq!(done.len(), 2);
        assert!(done.iter().all(|c| c.order.status == OrderStatus::Cancelled));
    }

    #[test]
    fn rejection_is_reported_and_state_kept() {
        let mut engine = engine();
        let a = PartyId::new("a");
        let order = OrderSubmission::limit(MarketId::new("m1"), Side::Buy, dec!(10.5), 1, TimeInForce::GTC);
        assert_eq!(engine.submit_order(order, &a), Err(EngineError::Order(OrderError::PriceNotOnTick)));
        assert!(engine.market(&MarketId::new("m1")).unwrap().book().is_empty());
        assert!(matches!(
            engine.events().last().map(|e| &e.payload),
            Some(EventPayload::TransactionRejected(_))
        ));

        let missing = OrderCancellation {
            market: None,
            order_id: Some(crate::types::OrderId(77)),
        };
        assert_eq!(
            engine.cancel_order(missing, &a),
            Err(EngineError::Order(OrderError::OrderNotFound))
        );
    }

    #[test]
    fn duplicate_market_is_rejected() {
        let mut engine = engine();
        assert_eq!(
            engine.submit_market(config("m1")),
            Err(EngineError::MarketAlreadyExists(MarketId::new("m1")))
        );
    }
}
