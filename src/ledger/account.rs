//! Account identity and balances.
//!
//! Every account is addressed by a composite key of owner, asset, market and
//! type. Market-scoped accounts carry `Some(market)`, global accounts `None`.

use crate::amount::Amount;
use crate::types::{AssetId, MarketId, PartyId};
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum AccountType {
    /// Free collateral of a party, per asset.
    General,
    /// Collateral locked against a party's positions and orders in a market.
    Margin,
    /// Liquidity commitment bond.
    Bond,
    /// Transit account used while mark-to-market flows are netted.
    Settlement,
    /// Market reserve absorbing shortfalls before socialization.
    Insurance,
    FeesInfrastructure,
    FeesLiquidity,
    FeesMaker,
    GlobalReward,
    NetworkTreasury,
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Owner {
    Party(PartyId),
    Network,
}

impl fmt::Display for Owner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Owner::Party(p) => write!(f, "{p}"),
            Owner::Network => f.write_str("*"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct AccountKey {
    pub owner: Owner,
    pub asset: AssetId,
    pub market: Option<MarketId>,
    pub kind: AccountType,
}

impl AccountKey {
    pub fn general(party: &PartyId, asset: &AssetId) -> Self {
        Self {
            owner: Owner::Party(party.clone()),
            asset: asset.clone(),
            market: None,
            kind: AccountType::General,
        }
    }

    pub fn margin(party: &PartyId, market: &MarketId, asset: &AssetId) -> Self {
        Self::party_market(party, market, asset, AccountType::Margin)
    }

    pub fn bond(party: &PartyId, market: &MarketId, asset: &AssetId) -> Self {
        Self::party_market(party, market, asset, AccountType::Bond)
    }

    fn party_market(party: &PartyId, market: &MarketId, asset: &AssetId, kind: AccountType) -> Self {
        Self {
            owner: Owner::Party(party.clone()),
            asset: asset.clone(),
            market: Some(market.clone()),
            kind,
        }
    }

    pub fn market_system(market: &MarketId, asset: &AssetId, kind: AccountType) -> Self {
        Self {
            owner: Owner::Network,
            asset: asset.clone(),
            market: Some(market.clone()),
            kind,
        }
    }

    pub fn settlement(market: &MarketId, asset: &AssetId) -> Self {
        Self::market_system(market, asset, AccountType::Settlement)
    }

    pub fn insurance(market: &MarketId, asset: &AssetId) -> Self {
        Self::market_system(market, asset, AccountType::Insurance)
    }

    pub fn liquidity_fees(market: &MarketId, asset: &AssetId) -> Self {
        Self::market_system(market, asset, AccountType::FeesLiquidity)
    }

    pub fn global(asset: &AssetId, kind: AccountType) -> Self {
        Self {
            owner: Owner::Network,
            asset: asset.clone(),
            market: None,
            kind,
        }
    }

    pub fn treasury(asset: &AssetId) -> Self {
        Self::global(asset, AccountType::NetworkTreasury)
    }

    pub fn infrastructure_fees(asset: &AssetId) -> Self {
        Self::global(asset, AccountType::FeesInfrastructure)
    }
}

impl fmt::Display for AccountKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let market = self.market.as_ref().map(|m| m.as_str()).unwrap_or("!");
        write!(f, "{}/{}/{}/{:?}", self.owner, market, self.asset, self.kind)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    pub key: AccountKey,
    pub balance: Amount,
}

impl Account {
    pub fn new(key: AccountKey) -> Self {
        Self {
            key,
            balance: Amount::zero(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keys_are_distinct_per_type_and_market() {
        let party = PartyId::new("p1");
        let asset = AssetId::new("USD");
        let m1 = MarketId::new("m1");
        let m2 = MarketId::new("m2");

        assert_ne!(AccountKey::margin(&party, &m1, &asset), AccountKey::margin(&party, &m2, &asset));
        assert_ne!(AccountKey::margin(&party, &m1, &asset), AccountKey::bond(&party, &m1, &asset));
        assert_eq!(AccountKey::general(&party, &asset).market, None);
    }

    #[test]
    fn display_is_stable() {
        let key = AccountKey::insurance(&MarketId::new("m1"), &AssetId::new("USD"));
        assert_eq!(key.to_string(), "*/m1/USD/Insurance");
    }
}
