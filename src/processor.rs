// 14.0: replicated-log adapter. turns ordered blocks of transactions into
// engine calls and hashes the resulting state so replicas can be compared.

use crate::amount::Amount;
use crate::config::VenueConfig;
use crate::engine::{Engine, EngineError};
use crate::events::Event;
use crate::ledger::Account;
use crate::liquidity::{LiquidityAmendment, LiquidityCancellation, LiquiditySubmission};
use crate::market::{MarketConfig, MarketData, OracleData};
use crate::num::InvariantViolation;
use crate::order::{Order, OrderAmendment, OrderCancellation, OrderSubmission};
use crate::position::Position;
use crate::types::{AssetId, MarketId, PartyId, Timestamp};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{debug, info};

/// One entry of the replicated log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Transaction {
    EnableAsset { asset: AssetId },
    Deposit { party: PartyId, asset: AssetId, amount: Amount },
    Withdraw { party: PartyId, asset: AssetId, amount: Amount },
    SubmitMarket { config: MarketConfig },
    SubmitOrder { party: PartyId, order: OrderSubmission },
    AmendOrder { party: PartyId, amendment: OrderAmendment },
    CancelOrder { party: PartyId, cancellation: OrderCancellation },
    SubmitLiquidityProvision { party: PartyId, lp_id: String, submission: LiquiditySubmission },
    AmendLiquidityProvision { party: PartyId, lp_id: String, amendment: LiquidityAmendment },
    CancelLiquidityProvision { party: PartyId, lp_id: String, cancellation: LiquidityCancellation },
    OracleData { market: MarketId, data: OracleData },
    TerminateMarket { market: MarketId, #[serde(default)] price: Option<Decimal> },
}

/// Transactions sharing one block time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Block {
    pub time: Timestamp,
    #[serde(default)]
    pub transactions: Vec<Transaction>,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct BlockSummary {
    pub applied: usize,
    pub rejected: usize,
}

// state as hashed. vectors only, so the encoding does not depend on map iteration
#[derive(Serialize)]
struct StateView<'a> {
    time: Timestamp,
    accounts: Vec<&'a Account>,
    markets: Vec<MarketView<'a>>,
}

#[derive(Serialize)]
struct MarketView<'a> {
    orders: Vec<&'a Order>,
    positions: Vec<&'a Position>,
    data: MarketData,
}

pub struct Processor {
    engine: Engine,
}

impl Processor {
    pub fn new(config: VenueConfig) -> Self {
        Self {
            engine: Engine::new(config),
        }
    }

    pub fn engine(&self) -> &Engine {
        &self.engine
    }

    /// 14.1: advance time, then apply every transaction in order. Rejections are
    /// counted and reported through events; an invariant violation stops the block.
    pub fn apply_block(&mut self, block: &Block) -> Result<BlockSummary, EngineError> {
        self.engine.on_time_update(block.time)?;
        let mut summary = BlockSummary::default();
        for tx in &block.transactions {
            match self.apply(tx) {
                Ok(()) => summary.applied += 1,
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => {
                    debug!(error = %e, "transaction rejected");
                    summary.rejected += 1;
                }
            }
        }
        info!(time = %block.time, applied = summary.applied, rejected = summary.rejected, "block applied");
        Ok(summary)
    }

    fn apply(&mut self, tx: &Transaction) -> Result<(), EngineError> {
        let engine = &mut self.engine;
        match tx.clone() {
            Transaction::EnableAsset { asset } => engine.enable_asset(&asset),
            Transaction::Deposit { party, asset, amount } => engine.deposit(&party, &asset, amount),
            Transaction::Withdraw { party, asset, amount } => engine.withdraw(&party, &asset, amount),
            Transaction::SubmitMarket { config } => engine.submit_market(config),
            Transaction::SubmitOrder { party, order } => engine.submit_order(order, &party).map(|_| ()),
            Transaction::AmendOrder { party, amendment } => engine.amend_order(amendment, &party).map(|_| ()),
            Transaction::CancelOrder { party, cancellation } => engine.cancel_order(cancellation, &party).map(|_| ()),
            Transaction::SubmitLiquidityProvision { party, lp_id, submission } => {
                engine.submit_liquidity_provision(submission, &party, &lp_id)
            }
            Transaction::AmendLiquidityProvision { party, lp_id, amendment } => {
                engine.amend_liquidity_provision(amendment, &party, &lp_id)
            }
            Transaction::CancelLiquidityProvision { party, lp_id, cancellation } => {
                engine.cancel_liquidity_provision(cancellation, &party, &lp_id)
            }
            Transaction::OracleData { market, data } => engine.submit_oracle_data(&market, &data),
            Transaction::TerminateMarket { market, price } => engine.terminate_market(&market, price),
        }
    }

    pub fn drain_events(&mut self) -> Vec<Event> {
        self.engine.drain_events()
    }

    /// 14.2: SHA-256 over the canonical JSON of accounts, live orders,
    /// positions and market data, hex encoded.
    pub fn state_hash(&self) -> Result<String, InvariantViolation> {
        let now = self.engine.now();
        let mut markets = Vec::new();
        for market in self.engine.markets() {
            markets.push(MarketView {
                orders: market.book().orders(),
                positions: market.positions().iter().collect(),
                data: market.market_data(now)?,
            });
        }
        let view = StateView {
            time: now,
            accounts: self.engine.ledger().accounts().collect(),
            markets,
        };
        let bytes = serde_json::to_vec(&view).map_err(|e| InvariantViolation::Broken(format!("state encoding: {e}")))?;
        Ok(hex::encode(Sha256::digest(&bytes)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn block(time: i64, transactions: Vec<Transaction>) -> Block {
        Block {
            time: Timestamp::from_secs(time),
            transactions,
        }
    }

    #[test]
    fn transactions_parse_from_tagged_json() {
        let tx: Transaction = serde_json::from_str(
            r#"{"type":"Deposit","party":"alice","asset":"USD","amount":"1000"}"#,
        )
        .unwrap();
        assert_eq!(
            tx,
            Transaction::Deposit {
                party: PartyId::new("alice"),
                asset: AssetId::new("USD"),
                amount: Amount::from(1000),
            }
        );
    }

    #[test]
    fn rejections_are_counted_not_fatal() {
        let mut p = Processor::new(VenueConfig::default());
        let usd = AssetId::new("USD");
        let summary = p
            .apply_block(&block(
                1,
                vec![
                    Transaction::EnableAsset { asset: usd.clone() },
                    Transaction::EnableAsset { asset: usd.clone() },
                    Transaction::Withdraw {
                        party: PartyId::new("p"),
                        asset: usd,
                        amount: Amount::from(5),
                    },
                ],
            ))
            .unwrap();
        assert_eq!(summary, BlockSummary { applied: 1, rejected: 2 });
        assert!(!p.engine().is_halted());
    }

    #[test]
    fn hash_tracks_state() {
        let mut p = Processor::new(VenueConfig::default());
        let empty = p.state_hash().unwrap();
        assert_eq!(empty.len(), 64);
        p.apply_block(&block(1, vec![Transaction::EnableAsset { asset: AssetId::new("USD") }]))
            .unwrap();
        p.apply_block(&block(
            2,
            vec![Transaction::Deposit {
                party: PartyId::new("p"),
                asset: AssetId::new("USD"),
                amount: Amount::from(10),
            }],
        ))
        .unwrap();
        assert_ne!(p.state_hash().unwrap(), empty);
    }
}
