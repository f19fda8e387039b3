//! Risk models.
//!
//! A market picks exactly one model at creation. The model supplies two things:
//! the per-unit risk factors used by the margin calculator, and a probable price
//! range used by price monitoring.

use rust_decimal::{Decimal, MathematicalOps};
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
pub enum RiskError {
    #[error("invalid risk parameter: {0}")]
    InvalidParameter(&'static str),

    #[error("risk model evaluation failed: {0}")]
    Math(&'static str),
}

/// Fraction of notional at risk per unit of long and short exposure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RiskFactors {
    pub long: Decimal,
    pub short: Decimal,
}

impl RiskFactors {
    pub fn max(&self) -> Decimal {
        self.long.max(self.short)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SimpleRiskModel {
    pub factor_long: Decimal,
    pub factor_short: Decimal,
    pub max_move_up: Decimal,
    pub min_move_down: Decimal,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogNormalRiskModel {
    /// Tail probability λ of the expected shortfall.
    pub risk_aversion: Decimal,
    /// Horizon in years.
    pub tau: Decimal,
    pub mu: Decimal,
    pub r: Decimal,
    pub sigma: Decimal,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum RiskModel {
    Simple(SimpleRiskModel),
    LogNormal(LogNormalRiskModel),
}

impl RiskModel {
    pub fn validate(&self) -> Result<(), RiskError> {
        match self {
            RiskModel::Simple(m) => {
                if m.factor_long.is_sign_negative() || m.factor_short.is_sign_negative() {
                    return Err(RiskError::InvalidParameter("risk factors must be non-negative"));
                }
                if m.max_move_up.is_sign_negative() {
                    return Err(RiskError::InvalidParameter("max_move_up must be non-negative"));
                }
                if m.min_move_down.is_sign_negative() || m.min_move_down >= Decimal::ONE {
                    return Err(RiskError::InvalidParameter("min_move_down must be in [0, 1)"));
                }
                Ok(())
            }
            RiskModel::LogNormal(m) => {
                if m.risk_aversion <= Decimal::ZERO || m.risk_aversion >= Decimal::ONE {
                    return Err(RiskError::InvalidParameter("risk_aversion must be in (0, 1)"));
                }
                if m.tau <= Decimal::ZERO {
                    return Err(RiskError::InvalidParameter("tau must be positive"));
                }
                if m.sigma <= Decimal::ZERO {
                    return Err(RiskError::InvalidParameter("sigma must be positive"));
                }
                Ok(())
            }
        }
    }

    pub fn risk_factors(&self) -> Result<RiskFactors, RiskError> {
        match self {
            RiskModel::Simple(m) => Ok(RiskFactors {
                long: m.factor_long,
                short: m.factor_short,
            }),
            RiskModel::LogNormal(m) => m.risk_factors(),
        }
    }

    /// Range the price is expected to stay in over `horizon_years` with
    /// confidence `probability`, starting from `price`.
    pub fn price_range(
        &self,
        price: Decimal,
        horizon_years: Decimal,
        probability: Decimal,
    ) -> Result<(Decimal, Decimal), RiskError> {
        match self {
            RiskModel::Simple(m) => {
                let down = Decimal::ONE.checked_sub(m.min_move_down).ok_or(RiskError::Math("1 - min_move_down"))?;
                let up = Decimal::ONE.checked_add(m.max_move_up).ok_or(RiskError::Math("1 + max_move_up"))?;
                let lower = price.checked_mul(down).ok_or(RiskError::Math("lower price bound"))?;
                let upper = price.checked_mul(up).ok_or(RiskError::Math("upper price bound"))?;
                Ok((lower, upper))
            }
            RiskModel::LogNormal(m) => m.price_range(price, horizon_years, probability),
        }
    }
}

impl LogNormalRiskModel {
    // expected shortfall of a log-normal price at tail λ, as a fraction of the start price
    fn risk_factors(&self) -> Result<RiskFactors, RiskError> {
        let sqrt_tau = self.tau.sqrt().ok_or(RiskError::Math("sqrt(tau)"))?;
        let sigma_sqrt_tau = mul(self.sigma, sqrt_tau, "sigma * sqrt(tau)")?;
        let z = inverse_norm_cdf(self.risk_aversion)?;
        let excess = self.mu.checked_sub(self.r).ok_or(RiskError::Math("mu - r"))?;
        let drift = mul(excess, self.tau, "drift")?
            .checked_exp()
            .ok_or(RiskError::Math("exp(drift)"))?;

        let tail = |x: Decimal| -> Result<Decimal, RiskError> {
            mul(drift, x.norm_cdf(), "tail")?
                .checked_div(self.risk_aversion)
                .ok_or(RiskError::Math("tail / risk_aversion"))
        };
        let lower_tail = tail(z.checked_sub(sigma_sqrt_tau).ok_or(RiskError::Math("z - sigma"))?)?;
        let upper_tail = tail(z.checked_add(sigma_sqrt_tau).ok_or(RiskError::Math("z + sigma"))?)?;

        Ok(RiskFactors {
            long: Decimal::ONE
                .checked_sub(lower_tail)
                .ok_or(RiskError::Math("lower tail"))?
                .max(Decimal::ZERO),
            short: upper_tail
                .checked_sub(Decimal::ONE)
                .ok_or(RiskError::Math("upper tail"))?
                .max(Decimal::ZERO),
        })
    }

    fn price_range(
        &self,
        price: Decimal,
        horizon_years: Decimal,
        probability: Decimal,
    ) -> Result<(Decimal, Decimal), RiskError> {
        if probability <= Decimal::ZERO || probability >= Decimal::ONE {
            return Err(RiskError::InvalidParameter("probability must be in (0, 1)"));
        }
        let sqrt_t = horizon_years.sqrt().ok_or(RiskError::Math("sqrt(horizon)"))?;
        let z = inverse_norm_cdf((Decimal::ONE + probability) / dec!(2))?;
        let variance = mul(self.sigma, self.sigma, "sigma^2")? / dec!(2);
        let drift = mul(
            self.mu.checked_sub(variance).ok_or(RiskError::Math("mu - sigma^2/2"))?,
            horizon_years,
            "drift",
        )?;
        let spread = mul(mul(self.sigma, sqrt_t, "sigma * sqrt(t)")?, z, "spread")?;

        let down = drift
            .checked_sub(spread)
            .and_then(|x| x.checked_exp())
            .ok_or(RiskError::Math("exp(lower)"))?;
        let up = drift
            .checked_add(spread)
            .and_then(|x| x.checked_exp())
            .ok_or(RiskError::Math("exp(upper)"))?;
        Ok((mul(price, down, "lower price bound")?, mul(price, up, "upper price bound")?))
    }
}

fn mul(a: Decimal, b: Decimal, what: &'static str) -> Result<Decimal, RiskError> {
    a.checked_mul(b).ok_or(RiskError::Math(what))
}

const BISECTION_STEPS: usize = 48;

/// Φ⁻¹ by bisection on the normal CDF. Fixed step count, so every replica
/// lands on the same digits.
pub fn inverse_norm_cdf(p: Decimal) -> Result<Decimal, RiskError> {
    if p <= Decimal::ZERO || p >= Decimal::ONE {
        return Err(RiskError::InvalidParameter("quantile must be in (0, 1)"));
    }
    let mut lo = dec!(-8);
    let mut hi = dec!(8);
    for _ in 0..BISECTION_STEPS {
        let mid = (lo + hi) / dec!(2);
        if mid.norm_cdf() < p {
            lo = mid;
        } else {
            hi = mid;
        }
    }
    Ok((lo + hi) / dec!(2))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Timestamp;

    fn lognormal() -> RiskModel {
        RiskModel::LogNormal(LogNormalRiskModel {
            risk_aversion: dec!(0.01),
            tau: dec!(0.0001140771161),
            mu: dec!(0),
            r: dec!(0),
            sigma: dec!(1.2),
        })
    }

    #[test]
    fn simple_model_passes_factors_through() {
        let model = RiskModel::Simple(SimpleRiskModel {
            factor_long: dec!(0.15),
            factor_short: dec!(0.2),
            max_move_up: dec!(0.1),
            min_move_down: dec!(0.1),
        });
        let f = model.risk_factors().unwrap();
        assert_eq!(f.long, dec!(0.15));
        assert_eq!(f.max(), dec!(0.2));

        let (lo, hi) = model.price_range(dec!(100), dec!(1), dec!(0.95)).unwrap();
        assert_eq!(lo, dec!(90.0));
        assert_eq!(hi, dec!(110.0));
    }

    #[test]
    fn inverse_cdf_matches_known_quantiles() {
        let z = inverse_norm_cdf(dec!(0.5)).unwrap();
        assert!(z.abs() < dec!(0.001));
        let z = inverse_norm_cdf(dec!(0.975)).unwrap();
        assert!((z - dec!(1.96)).abs() < dec!(0.01));
        assert!(inverse_norm_cdf(dec!(1)).is_err());
    }

    #[test]
    fn lognormal_factors_are_small_and_ordered() {
        let f = lognormal().risk_factors().unwrap();
        assert!(f.long > dec!(0.02) && f.long < dec!(0.05), "long {}", f.long);
        assert!(f.short > dec!(0.02) && f.short < dec!(0.05), "short {}", f.short);
        // upside is unbounded for a log-normal price, so shorts carry more risk
        assert!(f.short > f.long);
    }

    #[test]
    fn lognormal_range_brackets_price() {
        let (lo, hi) = lognormal()
            .price_range(dec!(100), Timestamp::year_fraction(3600), dec!(0.99))
            .unwrap();
        assert!(lo < dec!(100) && hi > dec!(100));
        assert!(lo > dec!(90) && hi < dec!(110));
    }

    #[test]
    fn price_range_overflow_is_an_error() {
        let model = RiskModel::Simple(SimpleRiskModel {
            factor_long: dec!(0.1),
            factor_short: dec!(0.1),
            max_move_up: dec!(0.5),
            min_move_down: dec!(0.1),
        });
        assert_eq!(
            model.price_range(Decimal::MAX, dec!(1), dec!(0.9)),
            Err(RiskError::Math("upper price bound"))
        );
        assert!(lognormal().price_range(Decimal::MAX, dec!(1), dec!(0.99)).is_err());
    }

    #[test]
    fn validation_rejects_bad_parameters() {
        let bad = RiskModel::LogNormal(LogNormalRiskModel {
            risk_aversion: dec!(1.5),
            tau: dec!(0.1),
            mu: dec!(0),
            r: dec!(0),
            sigma: dec!(1),
        });
        assert!(bad.validate().is_err());
        assert!(lognormal().validate().is_ok());
    }
}
