//! Transfer requests and the ledger entries they produce.

use super::account::AccountKey;
use crate::amount::Amount;
use crate::types::Timestamp;
use serde::{Deserialize, Serialize};

/// Why money moved. Carried on every entry for downstream audit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransferKind {
    Deposit,
    Withdraw,
    MarginLow,
    MarginHigh,
    MarginConfiscated,
    MtmLoss,
    MtmWin,
    FinalSettlementLoss,
    FinalSettlementWin,
    InsuranceDraw,
    TreasuryDraw,
    MakerFeePay,
    MakerFeeReceive,
    InfrastructureFeePay,
    LiquidityFeePay,
    LiquidityFeeDistribute,
    BondLow,
    BondHigh,
    BondSlashing,
    ClearAccount,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferLeg {
    pub from: AccountKey,
    pub to: AccountKey,
    pub amount: Amount,
    pub kind: TransferKind,
}

/// Legs applied all-or-nothing, in order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferBatch {
    pub legs: Vec<TransferLeg>,
}

impl TransferBatch {
    pub fn new() -> Self {
        Self::default()
    }

    // zero legs are dropped so they never show up as entries
    pub fn push(&mut self, from: AccountKey, to: AccountKey, amount: Amount, kind: TransferKind) {
        if amount.is_zero() {
            return;
        }
        self.legs.push(TransferLeg {
            from,
            to,
            amount,
            kind,
        });
    }

    pub fn extend(&mut self, other: TransferBatch) {
        self.legs.extend(other.legs);
    }

    pub fn is_empty(&self) -> bool {
        self.legs.is_empty()
    }

    pub fn len(&self) -> usize {
        self.legs.len()
    }
}

/// One applied leg. `None` on either side is the outside world (deposits, withdrawals).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub from: Option<AccountKey>,
    pub to: Option<AccountKey>,
    pub amount: Amount,
    pub kind: TransferKind,
    pub from_balance: Option<Amount>,
    pub to_balance: Option<Amount>,
    pub timestamp: Timestamp,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PostTransferBalance {
    pub account: AccountKey,
    pub balance: Amount,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerMovement {
    pub entries: Vec<LedgerEntry>,
    pub balances: Vec<PostTransferBalance>,
}

impl LedgerMovement {
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
