// 6.x price monitoring. each trigger turns the risk model's probable price range
// over its horizon into a band; trading through an active band starts an auction.

use crate::risk::{RiskEngine, RiskError};
use crate::types::{Price, Timestamp, MAX_DURATION_SECS};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriceTrigger {
    pub horizon_secs: i64,
    pub probability: Decimal,
    pub auction_extension_secs: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriceMonitoringSettings {
    pub triggers: Vec<PriceTrigger>,
}

impl PriceMonitoringSettings {
    pub fn validate(&self) -> Result<(), RiskError> {
        for t in &self.triggers {
            let durations = 1..=MAX_DURATION_SECS;
            if !durations.contains(&t.horizon_secs) || !durations.contains(&t.auction_extension_secs) {
                return Err(RiskError::InvalidParameter("price trigger horizon and extension out of range"));
            }
            if t.probability <= Decimal::ZERO || t.probability >= Decimal::ONE {
                return Err(RiskError::InvalidParameter("price trigger probability must be in (0, 1)"));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriceBound {
    pub trigger: PriceTrigger,
    pub reference_price: Decimal,
    pub min_valid_price: Decimal,
    pub max_valid_price: Decimal,
    pub active: bool,
}

impl PriceBound {
    pub fn contains(&self, price: Decimal) -> bool {
        price >= self.min_valid_price && price <= self.max_valid_price
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PriceMonitor {
    settings: PriceMonitoringSettings,
    history: VecDeque<(Timestamp, Decimal)>,
    active: Vec<bool>,
}

impl PriceMonitor {
    pub fn new(settings: PriceMonitoringSettings) -> Self {
        let active = vec![true; settings.triggers.len()];
        Self {
            settings,
            history: VecDeque::new(),
            active,
        }
    }

    pub fn has_triggers(&self) -> bool {
        !self.settings.triggers.is_empty()
    }

    fn max_horizon(&self) -> i64 {
        self.settings
            .triggers
            .iter()
            .map(|t| t.horizon_secs)
            .max()
            .unwrap_or(0)
    }

    /// 6.1: remember a traded price. anything older than the longest horizon is
    /// dropped, except the newest such entry which still anchors that horizon.
    pub fn record(&mut self, now: Timestamp, price: Price) {
        self.history.push_back((now, price.value()));
        // a horizon reaching past the start of time keeps everything
        let Ok(cutoff) = now.sub_secs(self.max_horizon()) else { return };
        while self.history.len() > 1 && self.history.get(1).map(|(t, _)| *t <= cutoff).unwrap_or(false) {
            self.history.pop_front();
        }
    }

    /// Start over from a single price with every trigger armed. Called on auction exit.
    pub fn reset(&mut self, now: Timestamp, price: Price) {
        self.history.clear();
        self.history.push_back((now, price.value()));
        self.active.iter_mut().for_each(|a| *a = true);
    }

    fn reference_price(&self, horizon_secs: i64, now: Timestamp) -> Option<Decimal> {
        let cutoff = now.sub_secs(horizon_secs).ok();
        self.history
            .iter()
            .rev()
            .find(|(t, _)| cutoff.map_or(false, |c| *t <= c))
            .or_else(|| self.history.front())
            .map(|(_, p)| *p)
    }

    pub fn bounds(&self, risk: &RiskEngine, now: Timestamp) -> Result<Vec<PriceBound>, RiskError> {
        let mut bounds = Vec::with_capacity(self.settings.triggers.len());
        for (trigger, active) in self.settings.triggers.iter().zip(&self.active) {
            let Some(reference) = self.reference_price(trigger.horizon_secs, now) else {
                continue;
            };
            let (min, max) = risk.price_range(
                reference,
                Timestamp::year_fraction(trigger.horizon_secs),
                trigger.probability,
            )?;
            bounds.push(PriceBound {
                trigger: trigger.clone(),
                reference_price: reference,
                min_valid_price: min,
                max_valid_price: max,
                active: *active,
            });
        }
        Ok(bounds)
    }

    /// 6.2: check prices about to trade. Returns the auction extension when an
    /// active bound is breached; breached bounds are disarmed.
    pub fn check(&mut self, prices: &[Price], risk: &RiskEngine, now: Timestamp) -> Result<Option<i64>, RiskError> {
        if prices.is_empty() || self.history.is_empty() {
            return Ok(None);
        }
        let bounds = self.bounds(risk, now)?;
        let mut extension = 0i64;
        for (i, bound) in bounds.iter().enumerate() {
            if !bound.active {
                continue;
            }
            if prices.iter().any(|p| !bound.contains(p.value())) {
                extension = extension
                    .checked_add(bound.trigger.auction_extension_secs)
                    .ok_or(RiskError::Math("auction extension"))?;
                if let Some(a) = self.active.get_mut(i) {
                    *a = false;
                }
            }
        }
        Ok((extension > 0).then_some(extension))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::risk::{RiskModel, ScalingFactors, SimpleRiskModel, SlippageFactors};
    use crate::types::{AssetId, MarketId};
    use rust_decimal_macros::dec;

    fn risk() -> RiskEngine {
        RiskEngine::new(
            MarketId::new("m"),
            AssetId::new("USD"),
            RiskModel::Simple(SimpleRiskModel {
                factor_long: dec!(0.1),
                factor_short: dec!(0.1),
                max_move_up: dec!(0.1),
                min_move_down: dec!(0.1),
            }),
            ScalingFactors::default(),
            SlippageFactors::default(),
        )
        .unwrap()
    }

    fn monitor() -> PriceMonitor {
        PriceMonitor::new(PriceMonitoringSettings {
            triggers: vec![PriceTrigger {
                horizon_secs: 60,
                probability: dec!(0.95),
                auction_extension_secs: 30,
            }],
        })
    }

    fn p(v: Decimal) -> Price {
        Price::new_unchecked(v)
    }

    #[test]
    fn no_history_no_bounds() {
        let mut m = monitor();
        assert!(m.bounds(&risk(), Timestamp::from_secs(0)).unwrap().is_empty());
        assert_eq!(m.check(&[p(dec!(500))], &risk(), Timestamp::from_secs(0)).unwrap(), None);
    }

    #[test]
    fn breach_triggers_once() {
        let mut m = monitor();
        m.record(Timestamp::from_secs(0), p(dec!(100)));
        let now = Timestamp::from_secs(10);
        assert_eq!(m.check(&[p(dec!(109))], &risk(), now).unwrap(), None);
        assert_eq!(m.check(&[p(dec!(111))], &risk(), now).unwrap(), Some(30));
        // disarmed until reset
        assert_eq!(m.check(&[p(dec!(120))], &risk(), now).unwrap(), None);
        m.reset(now, p(dec!(111)));
        assert_eq!(m.check(&[p(dec!(125))], &risk(), now).unwrap(), Some(30));
    }

    #[test]
    fn reference_is_price_at_horizon_start() {
        let mut m = monitor();
        m.record(Timestamp::from_secs(0), p(dec!(100)));
        m.record(Timestamp::from_secs(50), p(dec!(105)));
        m.record(Timestamp::from_secs(100), p(dec!(108)));
        let bounds = m.bounds(&risk(), Timestamp::from_secs(100)).unwrap();
        // horizon starts at t=40, last print at or before it is t=0
        assert_eq!(bounds[0].reference_price, dec!(100));
        let bounds = m.bounds(&risk(), Timestamp::from_secs(120)).unwrap();
        assert_eq!(bounds[0].reference_price, dec!(105));
    }
}
