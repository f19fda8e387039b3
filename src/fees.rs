// 7.x fees: maker, infrastructure and liquidity components per trade.
// continuous trades charge the aggressor, auction trades split the charge.

use crate::amount::Amount;
use crate::ledger::{AccountKey, TransferBatch, TransferKind};
use crate::num::{self, InvariantViolation};
use crate::types::{AssetId, MarketId, PartyId};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeeFactors {
    pub maker: Decimal,
    pub infrastructure: Decimal,
}

impl Default for FeeFactors {
    fn default() -> Self {
        Self {
            maker: dec!(0.0002),
            infrastructure: dec!(0.0005),
        }
    }
}

impl FeeFactors {
    pub fn is_valid(&self) -> bool {
        !self.maker.is_sign_negative() && !self.infrastructure.is_sign_negative()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TradeFee {
    pub maker: Amount,
    pub infrastructure: Amount,
    pub liquidity: Amount,
}

impl TradeFee {
    pub fn total(&self) -> Amount {
        self.maker.add(&self.infrastructure).add(&self.liquidity)
    }

    pub fn is_zero(&self) -> bool {
        self.total().is_zero()
    }
}

fn component(notional: Decimal, factor: Decimal) -> Result<Amount, InvariantViolation> {
    Amount::from_decimal_ceil(num::mul(notional, factor)?)
}

/// 7.1: full fee charged to the aggressor of a continuous trade.
pub fn continuous_fee(
    notional: Decimal,
    factors: &FeeFactors,
    liquidity_factor: Decimal,
) -> Result<TradeFee, InvariantViolation> {
    Ok(TradeFee {
        maker: component(notional, factors.maker)?,
        infrastructure: component(notional, factors.infrastructure)?,
        liquidity: component(notional, liquidity_factor)?,
    })
}

/// 7.2: each side of an auction trade pays half the infrastructure and liquidity fee.
pub fn auction_fee(
    notional: Decimal,
    factors: &FeeFactors,
    liquidity_factor: Decimal,
) -> Result<TradeFee, InvariantViolation> {
    let half = num::div(notional, dec!(2))?;
    Ok(TradeFee {
        maker: Amount::zero(),
        infrastructure: component(half, factors.infrastructure)?,
        liquidity: component(half, liquidity_factor)?,
    })
}

/// Tracks what a fee payer still has available while one batch is being built,
/// drawing on the general account before the margin account.
#[derive(Debug, Clone)]
pub struct FeePayer {
    general_key: AccountKey,
    margin_key: AccountKey,
    general_left: Amount,
    margin_left: Amount,
}

impl FeePayer {
    pub fn new(
        party: &PartyId,
        market: &MarketId,
        asset: &AssetId,
        general: Amount,
        margin: Amount,
    ) -> Self {
        Self {
            general_key: AccountKey::general(party, asset),
            margin_key: AccountKey::margin(party, market, asset),
            general_left: general,
            margin_left: margin,
        }
    }

    pub fn available(&self) -> Amount {
        self.general_left.add(&self.margin_left)
    }

    /// Take up to `amount` into `to`. Returns what was actually taken.
    pub fn pay(&mut self, amount: &Amount, to: &AccountKey, kind: TransferKind, batch: &mut TransferBatch) -> Amount {
        let from_general = amount.clone().min(self.general_left.clone());
        let rest = amount.saturating_sub(&from_general);
        let from_margin = rest.min(self.margin_left.clone());

        self.general_left = self.general_left.saturating_sub(&from_general);
        self.margin_left = self.margin_left.saturating_sub(&from_margin);

        let paid = from_general.add(&from_margin);
        batch.push(self.general_key.clone(), to.clone(), from_general, kind);
        batch.push(self.margin_key.clone(), to.clone(), from_margin, kind);
        paid
    }

    /// Pay every component of `fee`, capped at what is left. Returns the fee actually paid.
    pub fn pay_fee(
        &mut self,
        fee: &TradeFee,
        maker: Option<&PartyId>,
        market: &MarketId,
        asset: &AssetId,
        batch: &mut TransferBatch,
    ) -> TradeFee {
        let maker_paid = match maker {
            Some(m) => self.pay(
                &fee.maker,
                &AccountKey::general(m, asset),
                TransferKind::MakerFeePay,
                batch,
            ),
            None => Amount::zero(),
        };
        let infrastructure = self.pay(
            &fee.infrastructure,
            &AccountKey::infrastructure_fees(asset),
            TransferKind::InfrastructureFeePay,
            batch,
        );
        let liquidity = self.pay(
            &fee.liquidity,
            &AccountKey::liquidity_fees(market, asset),
            TransferKind::LiquidityFeePay,
            batch,
        );
        TradeFee {
            maker: maker_paid,
            infrastructure,
            liquidity,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn continuous_fee_rounds_up() {
        let fee = continuous_fee(dec!(1000), &FeeFactors::default(), dec!(0.001)).unwrap();
        // 0.2 -> 1, 0.5 -> 1, 1.0 -> 1
        assert_eq!(fee.maker, Amount::from(1));
        assert_eq!(fee.infrastructure, Amount::from(1));
        assert_eq!(fee.liquidity, Amount::from(1));
        assert_eq!(fee.total(), Amount::from(3));
    }

    #[test]
    fn auction_fee_has_no_maker_component() {
        let factors = FeeFactors {
            maker: dec!(0.01),
            infrastructure: dec!(0.01),
        };
        let fee = auction_fee(dec!(1000), &factors, dec!(0.02)).unwrap();
        assert!(fee.maker.is_zero());
        assert_eq!(fee.infrastructure, Amount::from(5));
        assert_eq!(fee.liquidity, Amount::from(10));
    }

    #[test]
    fn payer_drains_general_before_margin() {
        let party = PartyId::new("p");
        let market = MarketId::new("m");
        let asset = AssetId::new("USD");
        let mut payer = FeePayer::new(&party, &market, &asset, Amount::from(3), Amount::from(10));
        let mut batch = TransferBatch::new();
        let fee = TradeFee {
            maker: Amount::from(2),
            infrastructure: Amount::from(2),
            liquidity: Amount::from(20),
        };
        let paid = payer.pay_fee(&fee, Some(&PartyId::new("maker")), &market, &asset, &mut batch);
        assert_eq!(paid.maker, Amount::from(2));
        assert_eq!(paid.infrastructure, Amount::from(2));
        // only 9 left after 4 went to maker and infrastructure
        assert_eq!(paid.liquidity, Amount::from(9));
        assert!(payer.available().is_zero());
        assert_eq!(batch.legs[0].from, AccountKey::general(&party, &asset));
    }
}
