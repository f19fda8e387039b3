// 4.x risk: margin levels per party and what to do about the margin account.

pub mod margin;
pub mod model;

pub use margin::{margin_levels, maintenance_margin, Exposure, LevelsInput, MarginLevels, ScalingFactors, SlippageFactors};
pub use model::{inverse_norm_cdf, LogNormalRiskModel, RiskError, RiskFactors, RiskModel, SimpleRiskModel};

use crate::amount::Amount;
use crate::num::InvariantViolation;
use crate::types::{AssetId, MarketId, PartyId, Timestamp};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// When the check runs. Orders are held to the initial level, mark moves to search.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MarginTrigger {
    AfterOrder,
    AfterMarkMove,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MarginAction {
    Hold,
    /// Move from general to margin. `distressed` when even the full top-up
    /// leaves the party below maintenance.
    TopUp { amount: Amount, distressed: bool, reaches_initial: bool },
    /// Move the excess above initial back to general.
    Release(Amount),
}

/// 4.1: per-market risk engine. model factors are computed once at creation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskEngine {
    market: MarketId,
    asset: AssetId,
    model: RiskModel,
    factors: RiskFactors,
    scaling: ScalingFactors,
    slippage: SlippageFactors,
}

impl RiskEngine {
    pub fn new(
        market: MarketId,
        asset: AssetId,
        model: RiskModel,
        scaling: ScalingFactors,
        slippage: SlippageFactors,
    ) -> Result<Self, RiskError> {
        model.validate()?;
        if !scaling.is_valid() {
            return Err(RiskError::InvalidParameter("scaling factors must satisfy 1 < search < initial < release"));
        }
        let factors = model.risk_factors()?;
        Ok(Self {
            market,
            asset,
            model,
            factors,
            scaling,
            slippage,
        })
    }

    pub fn factors(&self) -> &RiskFactors {
        &self.factors
    }

    pub fn model(&self) -> &RiskModel {
        &self.model
    }

    pub fn price_range(
        &self,
        price: Decimal,
        horizon_years: Decimal,
        probability: Decimal,
    ) -> Result<(Decimal, Decimal), RiskError> {
        self.model.price_range(price, horizon_years, probability)
    }

    pub fn levels(
        &self,
        party: &PartyId,
        exposure: Exposure,
        price: Decimal,
        now: Timestamp,
    ) -> Result<MarginLevels, InvariantViolation> {
        margin_levels(
            LevelsInput {
                party,
                market: &self.market,
                asset: &self.asset,
                exposure,
                price,
                now,
            },
            &self.factors,
            &self.slippage,
            &self.scaling,
        )
    }

    /// 4.2: compare the margin account against the levels.
    pub fn evaluate(
        &self,
        levels: &MarginLevels,
        margin: &Amount,
        general: &Amount,
        trigger: MarginTrigger,
    ) -> MarginAction {
        let threshold = match trigger {
            MarginTrigger::AfterOrder => &levels.initial,
            MarginTrigger::AfterMarkMove => &levels.search,
        };

        if margin < threshold {
            let needed = levels.initial.saturating_sub(margin);
            let amount = needed.min(general.clone());
            let after = margin.add(&amount);
            return MarginAction::TopUp {
                distressed: after < levels.maintenance,
                reaches_initial: after >= levels.initial,
                amount,
            };
        }

        if margin > &levels.collateral_release {
            return MarginAction::Release(margin.saturating_sub(&levels.initial));
        }

        MarginAction::Hold
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn engine() -> RiskEngine {
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

    fn levels(maintenance: u64) -> MarginLevels {
        let risk = engine();
        let mut l = risk
            .levels(
                &PartyId::new("p"),
                Exposure {
                    open_volume: 0,
                    buy_orders: 0,
                    sell_orders: 0,
                },
                dec!(1),
                Timestamp::default(),
            )
            .unwrap();
        l.maintenance = Amount::from(maintenance);
        l.search = Amount::from(maintenance * 11 / 10);
        l.initial = Amount::from(maintenance * 12 / 10);
        l.collateral_release = Amount::from(maintenance * 14 / 10);
        l
    }

    #[test]
    fn top_up_toward_initial() {
        let risk = engine();
        let action = risk.evaluate(&levels(100), &Amount::from(50), &Amount::from(500), MarginTrigger::AfterOrder);
        assert_eq!(
            action,
            MarginAction::TopUp {
                amount: Amount::from(70),
                distressed: false,
                reaches_initial: true,
            }
        );
    }

    #[test]
    fn short_general_leaves_party_distressed() {
        let risk = engine();
        // margin 0, general 50, initial 120
        let action = risk.evaluate(&levels(100), &Amount::zero(), &Amount::from(50), MarginTrigger::AfterOrder);
        assert_eq!(
            action,
            MarginAction::TopUp {
                amount: Amount::from(50),
                distressed: true,
                reaches_initial: false,
            }
        );
    }

    #[test]
    fn mark_moves_use_search_level() {
        let risk = engine();
        // 115 sits between search (110) and initial (120)
        let action = risk.evaluate(&levels(100), &Amount::from(115), &Amount::from(500), MarginTrigger::AfterMarkMove);
        assert_eq!(action, MarginAction::Hold);
        let action = risk.evaluate(&levels(100), &Amount::from(115), &Amount::from(500), MarginTrigger::AfterOrder);
        assert!(matches!(action, MarginAction::TopUp { .. }));
    }

    #[test]
    fn excess_above_release_returns_to_general() {
        let risk = engine();
        let action = risk.evaluate(&levels(100), &Amount::from(200), &Amount::zero(), MarginTrigger::AfterMarkMove);
        assert_eq!(action, MarginAction::Release(Amount::from(80)));
    }

    #[test]
    fn invalid_scaling_rejected() {
        let err = RiskEngine::new(
            MarketId::new("m"),
            AssetId::new("USD"),
            RiskModel::Simple(SimpleRiskModel {
                factor_long: dec!(0.1),
                factor_short: dec!(0.1),
                max_move_up: dec!(0.1),
                min_move_down: dec!(0.1),
            }),
            ScalingFactors {
                search: dec!(1.5),
                initial: dec!(1.2),
                collateral_release: dec!(1.4),
            },
            SlippageFactors::default(),
        );
        assert!(err.is_err());
    }
}
