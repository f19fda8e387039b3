//! Replaying a block log must reproduce the same state hash every time.

use venue_core::ledger::AccountKey;
use venue_core::processor::{Block, Processor};
use venue_core::*;

const LOG: &str = r#"[
  {"time": 1000, "transactions": [
    {"type": "EnableAsset", "asset": "USD"},
    {"type": "SubmitMarket", "config": {
      "id": "BTC/MAR",
      "settlement_asset": "USD",
      "tick_size": "1",
      "opening_auction_secs": 10,
      "fees": {"maker": "0", "infrastructure": "0"},
      "risk_model": {"Simple": {"factor_long": "0.1", "factor_short": "0.1", "max_move_up": "0.1", "min_move_down": "0.1"}}
    }},
    {"type": "Deposit", "party": "alice", "asset": "USD", "amount": "100000"},
    {"type": "Deposit", "party": "bob", "asset": "USD", "amount": "100000"}
  ]},
  {"time": 2000, "transactions": [
    {"type": "SubmitOrder", "party": "alice", "order": {"market": "BTC/MAR", "side": "Buy", "order_type": "Limit", "time_in_force": "GTC", "price": "101", "size": 5}},
    {"type": "SubmitOrder", "party": "bob", "order": {"market": "BTC/MAR", "side": "Sell", "order_type": "Limit", "time_in_force": "GTC", "price": "99", "size": 3}},
    {"type": "SubmitOrder", "party": "bob", "order": {"market": "BTC/MAR", "side": "Sell", "order_type": "Market", "time_in_force": "IOC", "size": 1}}
  ]},
  {"time": 12000, "transactions": [
    {"type": "SubmitOrder", "party": "bob", "order": {"market": "BTC/MAR", "side": "Sell", "order_type": "Limit", "time_in_force": "GTC", "price": "101", "size": 2}},
    {"type": "CancelOrder", "party": "alice", "cancellation": {}}
  ]},
  {"time": 13000, "transactions": [
    {"type": "OracleData", "market": "BTC/MAR", "data": {"properties": {"trading.terminated": true}}},
    {"type": "OracleData", "market": "BTC/MAR", "data": {"properties": {"prices.settlement.value": "110"}}}
  ]}
]"#;

fn replay(blocks: &[Block]) -> (Vec<String>, Processor) {
    let mut processor = Processor::new(VenueConfig::default());
    let hashes = blocks
        .iter()
        .map(|block| {
            processor.apply_block(block).unwrap();
            processor.state_hash().unwrap()
        })
        .collect();
    (hashes, processor)
}

#[test]
fn same_log_same_hashes() {
    let blocks: Vec<Block> = serde_json::from_str(LOG).unwrap();
    let (first, mut a) = replay(&blocks);
    let (second, mut b) = replay(&blocks);
    assert_eq!(first, second);
    assert_eq!(a.drain_events(), b.drain_events());

    // every block changed something
    for pair in first.windows(2) {
        assert_ne!(pair[0], pair[1]);
    }
}

#[test]
fn replayed_log_settles_the_market() {
    let blocks: Vec<Block> = serde_json::from_str(LOG).unwrap();
    let (_, processor) = replay(&blocks);
    let engine = processor.engine();
    let market = MarketId::new("BTC/MAR");
    let usd = AssetId::new("USD");

    assert_eq!(engine.get_market_state(&market).unwrap(), MarketState::Settled);
    // the market order sent during the opening auction was rejected
    let rejected = engine
        .events()
        .iter()
        .filter(|e| matches!(&e.payload, EventPayload::TransactionRejected(_)))
        .count();
    assert_eq!(rejected, 1);

    // alice bought 3 at the uncrossing price of 100 and 2 at 101, then settled at 110
    let alice = engine.ledger().balance(&AccountKey::general(&PartyId::new("alice"), &usd));
    let bob = engine.ledger().balance(&AccountKey::general(&PartyId::new("bob"), &usd));
    assert_eq!(alice, Amount::from(100_048u64));
    assert_eq!(bob, Amount::from(99_952u64));
    assert_eq!(engine.ledger().total(&usd), Amount::from(200_000u64));
}

#[test]
fn a_changed_log_changes_the_hash() {
    let blocks: Vec<Block> = serde_json::from_str(LOG).unwrap();
    let mut altered = blocks.clone();
    altered[1].transactions.remove(1);
    let (original, _) = replay(&blocks);
    let (changed, _) = replay(&altered);
    assert_eq!(original[0], changed[0]);
    assert_ne!(original[1], changed[1]);
}
