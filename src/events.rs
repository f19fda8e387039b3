// 11.0: every state change produces an event. the stream is append-only and in
// processing order, so a consumer replaying it sees exactly what the core did.

use crate::amount::Amount;
use crate::ledger::{AccountKey, LedgerMovement};
use crate::liquidity::LiquidityProvision;
use crate::market::{AuctionTrigger, MarketData, MarketState, TradingMode};
use crate::order::Order;
use crate::position::Position;
use crate::risk::MarginLevels;
use crate::trade::Trade;
use crate::types::{AssetId, MarketId, PartyId, Timestamp};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EventId(pub u64);

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub id: EventId,
    pub timestamp: Timestamp,
    pub payload: EventPayload,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum EventPayload {
    // order flow
    OrderUpdated(Order),
    Trade(Trade),

    // collateral
    LedgerMovement(LedgerMovement),
    AccountBalance(AccountBalanceEvent),
    AssetEnabled(AssetId),

    // risk
    MarginLevels(MarginLevels),
    PositionState(Position),
    Closeout(CloseoutEvent),
    LossSocialization(LossSocializationEvent),

    // liquidity
    LiquidityProvision(LiquidityProvision),

    // market lifecycle
    MarketCreated(MarketCreatedEvent),
    MarketStateChanged(MarketStateChangedEvent),
    Auction(AuctionEvent),
    MarketData(MarketData),

    TransactionRejected(TransactionRejectedEvent),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountBalanceEvent {
    pub account: AccountKey,
    pub balance: Amount,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CloseoutEvent {
    pub market: MarketId,
    pub party: PartyId,
    /// Signed volume the party held when it was closed out.
    pub open_volume: i64,
    /// Part of it the network had to take over because the book could not.
    pub network_volume: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LossSocializationEvent {
    pub market: MarketId,
    pub shortfall: Amount,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MarketCreatedEvent {
    pub market: MarketId,
    pub asset: AssetId,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MarketStateChangedEvent {
    pub market: MarketId,
    pub state: MarketState,
    pub trading_mode: TradingMode,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuctionEvent {
    pub market: MarketId,
    pub trigger: AuctionTrigger,
    pub extension_trigger: Option<AuctionTrigger>,
    pub start: Timestamp,
    pub end: Timestamp,
    /// true when this event announces the auction ending
    pub leave: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionRejectedEvent {
    pub party: Option<PartyId>,
    pub transaction: String,
    pub reason: String,
}

/// Collects events in emission order and numbers them.
#[derive(Debug, Default)]
pub struct EventCollector {
    events: Vec<Event>,
    next_id: u64,
}

impl EventCollector {
    pub fn new() -> Self {
        Self {
            events: Vec::new(),
            next_id: 1,
        }
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            events: Vec::with_capacity(capacity),
            next_id: 1,
        }
    }

    pub fn emit(&mut self, timestamp: Timestamp, payload: EventPayload) {
        let id = EventId(self.next_id.max(1));
        self.next_id = id.0 + 1;
        self.events.push(Event { id, timestamp, payload });
    }

    /// Emit a ledger movement followed by the balance of every account it touched.
    pub fn emit_movement(&mut self, timestamp: Timestamp, movement: LedgerMovement) {
        if movement.is_empty() {
            return;
        }
        let balances: Vec<AccountBalanceEvent> = movement
            .balances
            .iter()
            .map(|b| AccountBalanceEvent {
                account: b.account.clone(),
                balance: b.balance.clone(),
            })
            .collect();
        self.emit(timestamp, EventPayload::LedgerMovement(movement));
        for balance in balances {
            self.emit(timestamp, EventPayload::AccountBalance(balance));
        }
    }

    pub fn events(&self) -> &[Event] {
        &self.events
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Hand every collected event to the caller. Ids keep counting.
    pub fn drain(&mut self) -> Vec<Event> {
        std::mem::take(&mut self.events)
    }
}
