// venue-core: deterministic derivatives venue core.
// every replica fed the same ordered transactions produces the same events and
// the same state hash. no wall clock, no randomness, no I/O.
//
// file map (search X.0 for structs, X.1+ for logic):
//   1.x  types.rs, amount.rs, num.rs: ids, prices, time, ledger amounts, checked math
//   2.x  orderbook/: price-time book, matching, pegs, auction uncrossing
//   3.x  ledger/: accounts and atomic transfer batches
//   4.x  risk/: risk models and margin levels
//   5.x  position.rs, settlement.rs: positions, mark-to-market, final settlement
//   6.x  monitor.rs: price monitoring bounds
//   7.x  config.rs, fees.rs: venue config, trading fees
//   8.x  engine/: command entry points, rejection handling, time
//   9.x  liquidity.rs: LP commitments, target stake, liquidity fee
//   10.x order.rs, trade.rs: orders, instructions, trades
//   11.x events.rs: the output stream
//   12.x market/: one market's command pipeline
//   14.x processor.rs: replicated-log adapter and state hash

pub mod amount;
pub mod config;
pub mod engine;
pub mod events;
pub mod fees;
pub mod ledger;
pub mod liquidity;
pub mod market;
pub mod monitor;
pub mod num;
pub mod order;
pub mod orderbook;
pub mod position;
pub mod processor;
pub mod risk;
pub mod settlement;
pub mod trade;
pub mod types;

// re exports for convenience
pub use amount::Amount;
pub use config::{NetworkParams, VenueConfig};
pub use engine::{Engine, EngineConfig, EngineError};
pub use events::{Event, EventPayload};
pub use market::{MarketConfig, MarketData, MarketState, TradingMode};
pub use num::InvariantViolation;
pub use order::{OrderAmendment, OrderCancellation, OrderSubmission, TimeInForce};
pub use processor::{Block, Processor, Transaction};
pub use types::{AssetId, MarketId, OrderId, PartyId, Price, Side, Timestamp};
