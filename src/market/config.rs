// 12.0: per-market configuration, fixed at creation.

use super::MarketError;
use crate::fees::FeeFactors;
use crate::liquidity::{LiquidityMonitoringParameters, LiquiditySlaParameters};
use crate::monitor::PriceMonitoringSettings;
use crate::risk::{RiskModel, ScalingFactors, SlippageFactors};
use crate::types::{AssetId, MarketId, MAX_DURATION_SECS};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Which oracle properties drive the market's end of life.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OracleBinding {
    pub settlement_price_key: String,
    pub trading_terminated_key: String,
}

impl Default for OracleBinding {
    fn default() -> Self {
        Self {
            settlement_price_key: "prices.settlement.value".to_string(),
            trading_terminated_key: "trading.terminated".to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum OracleValue {
    Flag(bool),
    Number(Decimal),
}

/// One verified oracle message. Properties the market is not bound to are ignored.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OracleData {
    pub properties: BTreeMap<String, OracleValue>,
}

impl OracleData {
    pub fn with(mut self, key: impl Into<String>, value: OracleValue) -> Self {
        self.properties.insert(key.into(), value);
        self
    }

    pub fn number(&self, key: &str) -> Option<Decimal> {
        match self.properties.get(key)? {
            OracleValue::Number(n) => Some(*n),
            OracleValue::Flag(_) => None,
        }
    }

    pub fn flag(&self, key: &str) -> bool {
        matches!(self.properties.get(key), Some(OracleValue::Flag(true)))
    }
}

fn default_min_order_size() -> u64 {
    1
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MarketConfig {
    pub id: MarketId,
    pub settlement_asset: AssetId,
    pub tick_size: Decimal,
    #[serde(default = "default_min_order_size")]
    pub min_order_size: u64,
    pub risk_model: RiskModel,
    #[serde(default)]
    pub margin_scaling: ScalingFactors,
    #[serde(default)]
    pub slippage: SlippageFactors,
    #[serde(default)]
    pub fees: FeeFactors,
    #[serde(default)]
    pub price_monitoring: PriceMonitoringSettings,
    #[serde(default)]
    pub liquidity_monitoring: LiquidityMonitoringParameters,
    #[serde(default)]
    pub liquidity_sla: LiquiditySlaParameters,
    /// Zero starts the market straight in continuous trading.
    #[serde(default)]
    pub opening_auction_secs: i64,
    #[serde(default)]
    pub oracle: OracleBinding,
}

impl MarketConfig {
    pub fn validate(&self) -> Result<(), MarketError> {
        if self.tick_size <= Decimal::ZERO {
            return Err(MarketError::InvalidConfig("tick size must be positive"));
        }
        if self.min_order_size == 0 {
            return Err(MarketError::InvalidConfig("minimum order size must be positive"));
        }
        if !(0..=MAX_DURATION_SECS).contains(&self.opening_auction_secs) {
            return Err(MarketError::InvalidConfig("opening auction duration out of range"));
        }
        if !self.fees.is_valid() {
            return Err(MarketError::InvalidConfig("fee factors must not be negative"));
        }
        if self.slippage.linear.is_sign_negative() || self.slippage.quadratic.is_sign_negative() {
            return Err(MarketError::InvalidConfig("slippage factors must not be negative"));
        }
        let lm = &self.liquidity_monitoring;
        if !(1..=MAX_DURATION_SECS).contains(&lm.target_stake.time_window_secs)
            || lm.target_stake.scaling_factor <= Decimal::ZERO
            || lm.triggering_ratio.is_sign_negative()
            || lm.triggering_ratio > Decimal::ONE
            || !(1..=MAX_DURATION_SECS).contains(&lm.auction_extension_secs)
        {
            return Err(MarketError::InvalidConfig("invalid liquidity monitoring parameters"));
        }
        if !self.liquidity_sla.is_valid() {
            return Err(MarketError::InvalidConfig("invalid liquidity SLA parameters"));
        }
        self.price_monitoring.validate()?;
        self.risk_model.validate()?;
        if !self.margin_scaling.is_valid() {
            return Err(MarketError::InvalidConfig("scaling factors must satisfy 1 < search < initial < release"));
        }
        Ok(())
    }
}
