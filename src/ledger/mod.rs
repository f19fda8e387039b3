// 3.x ledger: the only owner of balances. every movement of money is a transfer
// batch that either applies in full or not at all.

pub mod account;
pub mod transfer;

pub use account::{Account, AccountKey, AccountType, Owner};
pub use transfer::{LedgerEntry, LedgerMovement, PostTransferBalance, TransferBatch, TransferKind, TransferLeg};

use crate::amount::Amount;
use crate::types::{AssetId, MarketId, PartyId, Timestamp};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
pub enum LedgerError {
    #[error("asset {0} is not enabled")]
    UnknownAsset(AssetId),

    #[error("asset {0} is already enabled")]
    AssetAlreadyEnabled(AssetId),

    #[error("transfer leg moves {from} into {to}")]
    AssetMismatch { from: AssetId, to: AssetId },

    #[error("insufficient balance on {account}: needed {needed}, available {available}")]
    InsufficientBalance {
        account: String,
        needed: Amount,
        available: Amount,
    },

    #[error("amount must be positive")]
    ZeroAmount,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Ledger {
    accounts: BTreeMap<AccountKey, Account>,
    assets: BTreeSet<AssetId>,
}

impl Ledger {
    pub fn new() -> Self {
        Self::default()
    }

    // 3.1: global accounts come into existence with the asset
    pub fn enable_asset(&mut self, asset: &AssetId) -> Result<(), LedgerError> {
        if !self.assets.insert(asset.clone()) {
            return Err(LedgerError::AssetAlreadyEnabled(asset.clone()));
        }
        for kind in [
            AccountType::NetworkTreasury,
            AccountType::FeesInfrastructure,
            AccountType::GlobalReward,
        ] {
            self.ensure(AccountKey::global(asset, kind));
        }
        debug!(%asset, "asset enabled");
        Ok(())
    }

    pub fn is_asset_enabled(&self, asset: &AssetId) -> bool {
        self.assets.contains(asset)
    }

    pub fn create_market_accounts(&mut self, market: &MarketId, asset: &AssetId) -> Result<(), LedgerError> {
        self.require_asset(asset)?;
        for kind in [
            AccountType::Settlement,
            AccountType::Insurance,
            AccountType::FeesLiquidity,
        ] {
            self.ensure(AccountKey::market_system(market, asset, kind));
        }
        Ok(())
    }

    pub fn balance(&self, key: &AccountKey) -> Amount {
        self.accounts
            .get(key)
            .map(|a| a.balance.clone())
            .unwrap_or_default()
    }

    pub fn account(&self, key: &AccountKey) -> Option<&Account> {
        self.accounts.get(key)
    }

    pub fn accounts(&self) -> impl Iterator<Item = &Account> {
        self.accounts.values()
    }

    pub fn party_accounts<'a>(&'a self, party: &'a PartyId) -> impl Iterator<Item = &'a Account> + 'a {
        self.accounts
            .values()
            .filter(move |a| matches!(&a.key.owner, Owner::Party(p) if p == party))
    }

    /// Sum of every balance held in `asset`. Only deposits and withdrawals change it.
    pub fn total(&self, asset: &AssetId) -> Amount {
        self.accounts
            .values()
            .filter(|a| &a.key.asset == asset)
            .map(|a| &a.balance)
            .sum()
    }

    // 3.2: external inflow. the only way new money enters
    pub fn deposit(
        &mut self,
        party: &PartyId,
        asset: &AssetId,
        amount: Amount,
        now: Timestamp,
    ) -> Result<LedgerMovement, LedgerError> {
        self.require_asset(asset)?;
        if amount.is_zero() {
            return Err(LedgerError::ZeroAmount);
        }
        let key = AccountKey::general(party, asset);
        let account = self.ensure(key.clone());
        account.balance = account.balance.add(&amount);
        let balance = account.balance.clone();

        Ok(LedgerMovement {
            entries: vec![LedgerEntry {
                from: None,
                to: Some(key.clone()),
                amount,
                kind: TransferKind::Deposit,
                from_balance: None,
                to_balance: Some(balance.clone()),
                timestamp: now,
            }],
            balances: vec![PostTransferBalance { account: key, balance }],
        })
    }

    pub fn withdraw(
        &mut self,
        party: &PartyId,
        asset: &AssetId,
        amount: Amount,
        now: Timestamp,
    ) -> Result<LedgerMovement, LedgerError> {
        self.require_asset(asset)?;
        if amount.is_zero() {
            return Err(LedgerError::ZeroAmount);
        }
        let key = AccountKey::general(party, asset);
        let available = self.balance(&key);
        let balance = available
            .checked_sub(&amount)
            .ok_or_else(|| LedgerError::InsufficientBalance {
                account: key.to_string(),
                needed: amount.clone(),
                available: available.clone(),
            })?;
        self.ensure(key.clone()).balance = balance.clone();

        Ok(LedgerMovement {
            entries: vec![LedgerEntry {
                from: Some(key.clone()),
                to: None,
                amount,
                kind: TransferKind::Withdraw,
                from_balance: Some(balance.clone()),
                to_balance: None,
                timestamp: now,
            }],
            balances: vec![PostTransferBalance { account: key, balance }],
        })
    }

    /// 3.3: apply a batch atomically.
    ///
    /// Legs are replayed in order against scratch balances first, so a later leg
    /// may spend what an earlier leg credited. Nothing is written unless every leg
    /// succeeds.
    pub fn transfer(&mut self, batch: &TransferBatch, now: Timestamp) -> Result<LedgerMovement, LedgerError> {
        let mut scratch: BTreeMap<AccountKey, Amount> = BTreeMap::new();
        let mut entries = Vec::with_capacity(batch.len());

        for leg in &batch.legs {
            if leg.from.asset != leg.to.asset {
                return Err(LedgerError::AssetMismatch {
                    from: leg.from.asset.clone(),
                    to: leg.to.asset.clone(),
                });
            }
            self.require_asset(&leg.from.asset)?;

            let available = scratch
                .get(&leg.from)
                .cloned()
                .unwrap_or_else(|| self.balance(&leg.from));
            let from_balance = available
                .checked_sub(&leg.amount)
                .ok_or_else(|| LedgerError::InsufficientBalance {
                    account: leg.from.to_string(),
                    needed: leg.amount.clone(),
                    available: available.clone(),
                })?;
            scratch.insert(leg.from.clone(), from_balance.clone());

            let to_balance = scratch
                .get(&leg.to)
                .cloned()
                .unwrap_or_else(|| self.balance(&leg.to))
                .add(&leg.amount);
            scratch.insert(leg.to.clone(), to_balance.clone());

            entries.push(LedgerEntry {
                from: Some(leg.from.clone()),
                to: Some(leg.to.clone()),
                amount: leg.amount.clone(),
                kind: leg.kind,
                from_balance: Some(from_balance),
                to_balance: Some(to_balance),
                timestamp: now,
            });
        }

        let mut balances = Vec::with_capacity(scratch.len());
        for (key, balance) in scratch {
            self.ensure(key.clone()).balance = balance.clone();
            balances.push(PostTransferBalance { account: key, balance });
        }

        Ok(LedgerMovement { entries, balances })
    }

    fn require_asset(&self, asset: &AssetId) -> Result<(), LedgerError> {
        if self.assets.contains(asset) {
            Ok(())
        } else {
            Err(LedgerError::UnknownAsset(asset.clone()))
        }
    }

    fn ensure(&mut self, key: AccountKey) -> &mut Account {
        self.accounts
            .entry(key.clone())
            .or_insert_with(|| Account::new(key))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn setup() -> (Ledger, PartyId, AssetId) {
        let mut ledger = Ledger::new();
        let asset = AssetId::new("USD");
        ledger.enable_asset(&asset).unwrap();
        let party = PartyId::new("alice");
        ledger
            .deposit(&party, &asset, Amount::from(100), Timestamp::default())
            .unwrap();
        (ledger, party, asset)
    }

    #[test]
    fn deposit_creates_general_account() {
        let (ledger, party, asset) = setup();
        assert_eq!(ledger.balance(&AccountKey::general(&party, &asset)), Amount::from(100));
        assert_eq!(ledger.total(&asset), Amount::from(100));
    }

    #[test]
    fn unknown_asset_rejected() {
        let mut ledger = Ledger::new();
        let err = ledger
            .deposit(&PartyId::new("a"), &AssetId::new("BTC"), Amount::from(1), Timestamp::default())
            .unwrap_err();
        assert_eq!(err, LedgerError::UnknownAsset(AssetId::new("BTC")));
    }

    #[test]
    fn withdraw_cannot_overdraw() {
        let (mut ledger, party, asset) = setup();
        assert!(ledger.withdraw(&party, &asset, Amount::from(101), Timestamp::default()).is_err());
        let movement = ledger
            .withdraw(&party, &asset, Amount::from(40), Timestamp::default())
            .unwrap();
        assert_eq!(movement.entries[0].to, None);
        assert_eq!(ledger.balance(&AccountKey::general(&party, &asset)), Amount::from(60));
    }

    #[test]
    fn batch_is_all_or_nothing() {
        let (mut ledger, party, asset) = setup();
        let market = MarketId::new("m1");
        ledger.create_market_accounts(&market, &asset).unwrap();

        let general = AccountKey::general(&party, &asset);
        let margin = AccountKey::margin(&party, &market, &asset);
        let mut batch = TransferBatch::new();
        batch.push(general.clone(), margin.clone(), Amount::from(80), TransferKind::MarginLow);
        batch.push(general.clone(), margin.clone(), Amount::from(30), TransferKind::MarginLow);

        let err = ledger.transfer(&batch, Timestamp::default()).unwrap_err();
        assert!(matches!(err, LedgerError::InsufficientBalance { .. }));
        assert_eq!(ledger.balance(&general), Amount::from(100));
        assert_eq!(ledger.balance(&margin), Amount::zero());
    }

    #[test]
    fn later_legs_see_earlier_credits() {
        let (mut ledger, party, asset) = setup();
        let market = MarketId::new("m1");
        ledger.create_market_accounts(&market, &asset).unwrap();

        let general = AccountKey::general(&party, &asset);
        let settlement = AccountKey::settlement(&market, &asset);
        let insurance = AccountKey::insurance(&market, &asset);
        let mut batch = TransferBatch::new();
        batch.push(general.clone(), settlement.clone(), Amount::from(70), TransferKind::MtmLoss);
        batch.push(settlement.clone(), insurance.clone(), Amount::from(70), TransferKind::ClearAccount);

        let movement = ledger.transfer(&batch, Timestamp::default()).unwrap();
        assert_eq!(movement.entries.len(), 2);
        assert_eq!(ledger.balance(&settlement), Amount::zero());
        assert_eq!(ledger.balance(&insurance), Amount::from(70));
        assert_eq!(ledger.total(&asset), Amount::from(100));
    }

    #[test]
    fn zero_legs_are_skipped() {
        let mut batch = TransferBatch::new();
        let asset = AssetId::new("USD");
        batch.push(
            AccountKey::treasury(&asset),
            AccountKey::infrastructure_fees(&asset),
            Amount::zero(),
            TransferKind::ClearAccount,
        );
        assert!(batch.is_empty());
    }
}
