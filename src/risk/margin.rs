//! Margin level calculation.
//!
//! Maintenance margin is the larger of the long-side and short-side risk, where
//! each side takes the open position plus every resting order that would push
//! the position further that way. The other three levels are fixed multiples.

use super::model::RiskFactors;
use crate::amount::Amount;
use crate::num::{self, InvariantViolation};
use crate::types::{AssetId, MarketId, PartyId, Timestamp};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScalingFactors {
    pub search: Decimal,
    pub initial: Decimal,
    pub collateral_release: Decimal,
}

impl Default for ScalingFactors {
    fn default() -> Self {
        Self {
            search: dec!(1.1),
            initial: dec!(1.2),
            collateral_release: dec!(1.4),
        }
    }
}

impl ScalingFactors {
    pub fn is_valid(&self) -> bool {
        Decimal::ONE < self.search && self.search < self.initial && self.initial < self.collateral_release
    }
}

/// Cost of unwinding the open position against a thin book, per unit of mark price.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlippageFactors {
    pub linear: Decimal,
    pub quadratic: Decimal,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MarginLevels {
    pub party: PartyId,
    pub market: MarketId,
    pub asset: AssetId,
    pub maintenance: Amount,
    pub search: Amount,
    pub initial: Amount,
    pub collateral_release: Amount,
    pub timestamp: Timestamp,
}

/// What the margin calculator needs to know about one party.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Exposure {
    pub open_volume: i64,
    pub buy_orders: u64,
    pub sell_orders: u64,
}

impl Exposure {
    pub fn is_flat(&self) -> bool {
        self.open_volume == 0 && self.buy_orders == 0 && self.sell_orders == 0
    }

    pub fn riskiest_long(&self) -> i128 {
        self.open_volume as i128 + self.buy_orders as i128
    }

    pub fn riskiest_short(&self) -> i128 {
        self.open_volume as i128 - self.sell_orders as i128
    }
}

fn slippage(volume: Decimal, price: Decimal, s: &SlippageFactors) -> Result<Decimal, InvariantViolation> {
    let linear = num::mul(s.linear, volume)?;
    let quadratic = num::mul(s.quadratic, num::mul(volume, volume)?)?;
    num::mul(price, num::add(linear, quadratic)?)
}

/// Maintenance margin in asset units, before rounding.
pub fn maintenance_margin(
    exposure: &Exposure,
    price: Decimal,
    factors: &RiskFactors,
    slip: &SlippageFactors,
) -> Result<Decimal, InvariantViolation> {
    let v = exposure.open_volume;

    let long_risk = {
        let riskiest = exposure.riskiest_long();
        if riskiest > 0 {
            let position = Decimal::from(v.max(0));
            let orders = num::mul(num::mul(Decimal::from(riskiest), price)?, factors.long)?;
            num::add(slippage(position, price, slip)?, orders)?
        } else {
            Decimal::ZERO
        }
    };

    let short_risk = {
        let riskiest = exposure.riskiest_short();
        if riskiest < 0 {
            let position = Decimal::from((-v).max(0));
            let orders = num::mul(num::mul(Decimal::from(-riskiest), price)?, factors.short)?;
            num::add(slippage(position, price, slip)?, orders)?
        } else {
            Decimal::ZERO
        }
    };

    Ok(long_risk.max(short_risk))
}

pub struct LevelsInput<'a> {
    pub party: &'a PartyId,
    pub market: &'a MarketId,
    pub asset: &'a AssetId,
    pub exposure: Exposure,
    pub price: Decimal,
    pub now: Timestamp,
}

pub fn margin_levels(
    input: LevelsInput<'_>,
    factors: &RiskFactors,
    slip: &SlippageFactors,
    scaling: &ScalingFactors,
) -> Result<MarginLevels, InvariantViolation> {
    let maintenance_dec = maintenance_margin(&input.exposure, input.price, factors, slip)?;
    let maintenance = Amount::from_decimal_ceil(maintenance_dec)?;
    let maintenance_int = maintenance.to_decimal()?;

    let scale = |f: Decimal| -> Result<Amount, InvariantViolation> {
        Amount::from_decimal_floor(num::mul(maintenance_int, f)?)
    };

    Ok(MarginLevels {
        party: input.party.clone(),
        market: input.market.clone(),
        asset: input.asset.clone(),
        search: scale(scaling.search)?,
        initial: scale(scaling.initial)?,
        collateral_release: scale(scaling.collateral_release)?,
        maintenance,
        timestamp: input.now,
    })
}
