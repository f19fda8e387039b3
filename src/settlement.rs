// 5.3 settlement.rs: mark-to-market and final settlement. losers pay into the
// market settlement account, winners are paid out of it, and it must end empty.

use crate::amount::Amount;
use crate::ledger::{AccountKey, AccountType, Ledger, Owner, TransferBatch, TransferKind};
use crate::num::{self, InvariantViolation};
use crate::position::PositionTracker;
use crate::trade::Trade;
use crate::types::{AssetId, MarketId, PartyId};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::cmp::Reverse;
use std::collections::BTreeMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SettlementKind {
    MarkToMarket,
    Final,
}

impl SettlementKind {
    fn loss(self) -> TransferKind {
        match self {
            SettlementKind::MarkToMarket => TransferKind::MtmLoss,
            SettlementKind::Final => TransferKind::FinalSettlementLoss,
        }
    }

    fn win(self) -> TransferKind {
        match self {
            SettlementKind::MarkToMarket => TransferKind::MtmWin,
            SettlementKind::Final => TransferKind::FinalSettlementWin,
        }
    }
}

/// Signed cash flow owed to (positive) or by (negative) one party.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SettlementDelta {
    pub party: PartyId,
    pub amount: Decimal,
}

#[derive(Debug, Clone, Default)]
pub struct SettlementOutcome {
    pub deltas: Vec<SettlementDelta>,
    pub batch: TransferBatch,
    /// Losses that nobody could cover, taken out of the winners' payouts.
    pub shortfall: Amount,
}

/// One trade leg waiting for the next mark.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
struct PendingFill {
    volume: i64,
    price: Decimal,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SettlementEngine {
    market: MarketId,
    asset: AssetId,
    last_mark: Option<Decimal>,
    pending: BTreeMap<PartyId, Vec<PendingFill>>,
}

impl SettlementEngine {
    pub fn new(market: MarketId, asset: AssetId) -> Self {
        Self {
            market,
            asset,
            last_mark: None,
            pending: BTreeMap::new(),
        }
    }

    pub fn last_mark(&self) -> Option<Decimal> {
        self.last_mark
    }

    /// 5.3.1: remember both legs of a trade until the next settlement.
    pub fn add_trade(&mut self, trade: &Trade) -> Result<(), InvariantViolation> {
        if trade.buyer == trade.seller {
            return Ok(());
        }
        let size = i64::try_from(trade.size).map_err(|_| InvariantViolation::Overflow("trade size"))?;
        let price = trade.price.value();
        self.pending
            .entry(trade.buyer.clone())
            .or_default()
            .push(PendingFill { volume: size, price });
        self.pending
            .entry(trade.seller.clone())
            .or_default()
            .push(PendingFill { volume: -size, price });
        Ok(())
    }

    /// Volume moved outside the book, e.g. a network takeover at the mark price.
    pub fn add_transfer(&mut self, from: &PartyId, to: &PartyId, volume: i64, price: Decimal) {
        self.pending
            .entry(from.clone())
            .or_default()
            .push(PendingFill { volume: -volume, price });
        self.pending
            .entry(to.clone())
            .or_default()
            .push(PendingFill { volume, price });
    }

    /// Per party: volume held since the last mark times the mark move, plus each
    /// new fill times the distance from its price to the mark.
    pub fn deltas(&self, positions: &PositionTracker, mark: Decimal) -> Result<Vec<SettlementDelta>, InvariantViolation> {
        let mut parties: BTreeMap<PartyId, Decimal> = BTreeMap::new();

        for position in positions.iter() {
            let fills = self.pending.get(&position.party);
            let traded: i64 = fills.map(|f| f.iter().map(|p| p.volume).sum()).unwrap_or(0);
            let previous = position
                .open_volume
                .checked_sub(traded)
                .ok_or(InvariantViolation::Overflow("previous volume"))?;

            let mut delta = match self.last_mark {
                Some(last) if previous != 0 => num::mul(num::signed_volume(previous), num::sub(mark, last)?)?,
                _ => Decimal::ZERO,
            };
            for fill in fills.into_iter().flatten() {
                delta = num::add(delta, num::mul(num::signed_volume(fill.volume), num::sub(mark, fill.price)?)?)?;
            }
            parties.insert(position.party.clone(), delta);
        }

        Ok(parties
            .into_iter()
            .filter(|(_, amount)| !amount.is_zero())
            .map(|(party, amount)| SettlementDelta { party, amount })
            .collect())
    }

    /// 5.3.2: build the transfers settling everything at `mark`. Does not touch
    /// the ledger; the caller applies the batch and then checks the settlement
    /// account is empty.
    pub fn settle(
        &mut self,
        positions: &PositionTracker,
        mark: Decimal,
        ledger: &Ledger,
        kind: SettlementKind,
    ) -> Result<SettlementOutcome, InvariantViolation> {
        let deltas = self.deltas(positions, mark)?;
        self.last_mark = Some(mark);
        self.pending.clear();

        let settlement = AccountKey::settlement(&self.market, &self.asset);
        let insurance = AccountKey::insurance(&self.market, &self.asset);
        let treasury = AccountKey::treasury(&self.asset);
        let mut insurance_left = ledger.balance(&insurance);
        let mut treasury_left = ledger.balance(&treasury);

        let mut batch = TransferBatch::new();
        let mut collected = Amount::zero();
        let mut shortfall = Amount::zero();

        // losses first, so the settlement account holds what winners are paid from
        for d in deltas.iter().filter(|d| d.amount.is_sign_negative()) {
            let owed = Amount::from_decimal_floor(d.amount.abs())?;
            let mut left = owed.clone();

            if !d.party.is_network() {
                for key in [
                    AccountKey::margin(&d.party, &self.market, &self.asset),
                    AccountKey::general(&d.party, &self.asset),
                ] {
                    let take = left.clone().min(ledger.balance(&key));
                    left = left.saturating_sub(&take);
                    batch.push(key, settlement.clone(), take, kind.loss());
                }
            }

            let from_insurance = left.clone().min(insurance_left.clone());
            insurance_left = insurance_left.saturating_sub(&from_insurance);
            left = left.saturating_sub(&from_insurance);
            batch.push(insurance.clone(), settlement.clone(), from_insurance, TransferKind::InsuranceDraw);

            let from_treasury = left.clone().min(treasury_left.clone());
            treasury_left = treasury_left.saturating_sub(&from_treasury);
            left = left.saturating_sub(&from_treasury);
            batch.push(treasury.clone(), settlement.clone(), from_treasury, TransferKind::TreasuryDraw);

            collected = collected.add(&owed.saturating_sub(&left));
            shortfall = shortfall.add(&left);
        }

        let wins: Vec<(PartyId, Amount)> = deltas
            .iter()
            .filter(|d| d.amount.is_sign_positive())
            .map(|d| Ok((d.party.clone(), Amount::from_decimal_floor(d.amount)?)))
            .collect::<Result<_, InvariantViolation>>()?;
        let total_wins: Amount = wins.iter().map(|(_, a)| a).sum();

        let mut payouts: Vec<(PartyId, Amount)> = if collected >= total_wins {
            wins.clone()
        } else {
            wins.iter()
                .map(|(party, win)| {
                    let scaled = win.mul_div(&collected, &total_wins).unwrap_or_default();
                    (party.clone(), scaled)
                })
                .collect()
        };

        // whatever truncation left behind goes to the largest winner, lowest id on ties
        let paid: Amount = payouts.iter().map(|(_, a)| a).sum();
        let residual = collected.saturating_sub(&paid);
        if !residual.is_zero() {
            let largest = wins
                .iter()
                .enumerate()
                .max_by_key(|(_, (party, win))| (win.clone(), Reverse(party.clone())))
                .map(|(i, _)| i);
            match largest {
                Some(i) => payouts[i].1 = payouts[i].1.add(&residual),
                None => batch.push(settlement.clone(), insurance.clone(), residual, kind.win()),
            }
        }

        for (party, amount) in payouts {
            let to = if party.is_network() {
                insurance.clone()
            } else {
                AccountKey::margin(&party, &self.market, &self.asset)
            };
            batch.push(settlement.clone(), to, amount, kind.win());
        }

        Ok(SettlementOutcome {
            deltas,
            batch,
            shortfall,
        })
    }

    /// Transfers that wind a market down after its final settlement: margins
    /// and bonds back to general, leftover pools to the network treasury.
    pub fn clear_market(&self, ledger: &Ledger) -> TransferBatch {
        let mut batch = TransferBatch::new();
        let treasury = AccountKey::treasury(&self.asset);

        for account in ledger.accounts() {
            let key = &account.key;
            if key.market.as_ref() != Some(&self.market) || key.asset != self.asset {
                continue;
            }
            match (&key.owner, key.kind) {
                (Owner::Party(party), AccountType::Margin) => {
                    let general = AccountKey::general(party, &self.asset);
                    batch.push(key.clone(), general, account.balance.clone(), TransferKind::MarginHigh);
                }
                (Owner::Party(party), AccountType::Bond) => {
                    let general = AccountKey::general(party, &self.asset);
                    batch.push(key.clone(), general, account.balance.clone(), TransferKind::BondHigh);
                }
                (Owner::Network, AccountType::Insurance | AccountType::FeesLiquidity) => {
                    batch.push(key.clone(), treasury.clone(), account.balance.clone(), TransferKind::ClearAccount);
                }
                _ => {}
            }
        }
        batch
    }

    /// Fatal unless the settlement account is empty.
    pub fn check_empty(&self, ledger: &Ledger) -> Result<(), InvariantViolation> {
        let balance = ledger.balance(&AccountKey::settlement(&self.market, &self.asset));
        if !balance.is_zero() {
            return Err(InvariantViolation::SettlementNotEmpty {
                market: self.market.to_string(),
                balance: balance.to_string(),
            });
        }
        Ok(())
    }
}
