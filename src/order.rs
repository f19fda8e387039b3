//! Orders, order instructions and rejection reasons.
//!
//! An `Order` is owned by the book while it is live. Everything that reaches
//! the engine from outside arrives as one of the instruction structs below and
//! is validated before the book sees it.

use crate::trade::Trade;
use crate::types::{MarketId, OrderId, PartyId, Price, Side, Timestamp};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Order time in force options.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum TimeInForce {
    /// Good till cancelled.
    GTC,
    /// Good till a block time, then expired.
    GTT,
    /// Immediate or cancel. Fill what is possible, cancel the rest.
    IOC,
    /// Fill or kill. Fill entirely or not at all.
    FOK,
    /// Good for auction. Cancelled when the auction uncrosses.
    GFA,
    /// Good for normal trading. Rejected during auctions.
    GFN,
}

impl TimeInForce {
    /// Whether an unfilled remainder may rest on the book.
    pub fn rests(&self) -> bool {
        matches!(self, TimeInForce::GTC | TimeInForce::GTT | TimeInForce::GFA | TimeInForce::GFN)
    }

    pub fn allowed_in_auction(&self) -> bool {
        matches!(self, TimeInForce::GTC | TimeInForce::GTT | TimeInForce::GFA)
    }

    pub fn allowed_in_continuous(&self) -> bool {
        !matches!(self, TimeInForce::GFA)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderType {
    Limit,
    Market,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderStatus {
    Active,
    Filled,
    /// Terminal: an IOC or market order that traded and had its remainder cancelled.
    PartiallyFilled,
    Cancelled,
    Expired,
    Stopped,
    /// Pegged order held out of the book until its reference is usable.
    Parked,
    Rejected,
}

impl OrderStatus {
    pub fn is_live(&self) -> bool {
        matches!(self, OrderStatus::Active | OrderStatus::Parked)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum PegReference {
    BestBid,
    BestAsk,
    Mid,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeggedOrder {
    pub reference: PegReference,
    pub offset: Decimal,
}

impl PeggedOrder {
    pub fn validate(&self, side: Side) -> Result<(), OrderError> {
        if self.offset.is_sign_negative() {
            return Err(OrderError::InvalidPeggedOrder);
        }
        match (side, self.reference) {
            (_, PegReference::Mid) if self.offset.is_zero() => Err(OrderError::InvalidPeggedOrder),
            (Side::Buy, PegReference::BestAsk) if self.offset.is_zero() => Err(OrderError::InvalidPeggedOrder),
            (Side::Sell, PegReference::BestBid) if self.offset.is_zero() => Err(OrderError::InvalidPeggedOrder),
            _ => Ok(()),
        }
    }

    /// Price for `side` given the reference value. None when it would not be positive.
    pub fn price_from(&self, side: Side, reference: Decimal) -> Option<Price> {
        match side {
            Side::Buy => Price::new(reference - self.offset),
            Side::Sell => Price::new(reference + self.offset),
        }
    }
}

/// Iceberg instructions carried by a submission.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct IcebergOpts {
    pub peak_size: u64,
    pub minimum_visible_size: u64,
}

impl IcebergOpts {
    pub fn validate(&self) -> Result<(), OrderError> {
        if self.peak_size == 0 || self.minimum_visible_size == 0 || self.minimum_visible_size > self.peak_size {
            return Err(OrderError::InvalidIcebergOrder);
        }
        Ok(())
    }
}

/// Live iceberg state. The order's `remaining` is the visible peak, the rest
/// waits in `reserved_remaining` until a refresh brings it onto the book.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct IcebergOrder {
    pub peak_size: u64,
    pub minimum_visible_size: u64,
    pub reserved_remaining: u64,
}

impl From<IcebergOpts> for IcebergOrder {
    fn from(opts: IcebergOpts) -> Self {
        Self {
            peak_size: opts.peak_size,
            minimum_visible_size: opts.minimum_visible_size,
            reserved_remaining: 0,
        }
    }
}

/// Largest size an order may carry. Positions are signed 64-bit.
pub const MAX_ORDER_SIZE: u64 = i64::MAX as u64;

/// Stable rejection and stop reasons. Serialized into events as-is, so the
/// variant names are part of the output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
pub enum OrderError {
    #[error("market is not accepting orders")]
    MarketClosed,
    #[error("order size must be positive, at least the market minimum and fit a position")]
    InvalidSize,
    #[error("price must be positive")]
    InvalidPrice,
    #[error("price is not a multiple of the tick size")]
    PriceNotOnTick,
    #[error("limit orders need a price, market orders must not have one")]
    PriceMismatch,
    #[error("time in force not allowed for this order type")]
    InvalidTimeInForce,
    #[error("time in force not allowed during an auction")]
    TimeInForceNotAllowedInAuction,
    #[error("good-for-auction order outside an auction")]
    GfaOutsideAuction,
    #[error("market orders are not accepted during an auction")]
    MarketOrderInAuction,
    #[error("expiry must be set for GTT only and lie in the future")]
    InvalidExpiration,
    #[error("invalid pegged order")]
    InvalidPeggedOrder,
    #[error("order would trade with another order from the same party")]
    SelfTrading,
    #[error("insufficient collateral to cover margin")]
    InsufficientMargin,
    #[error("insufficient collateral to pay fees")]
    InsufficientFundsToPayFees,
    #[error("order triggered a price monitoring auction")]
    AuctionTriggered,
    #[error("order not found")]
    OrderNotFound,
    #[error("order belongs to another party")]
    NotOrderOwner,
    #[error("amendment would leave no remaining size")]
    InvalidSizeAmendment,
    #[error("amendment changes nothing or changes a fixed field")]
    InvalidAmendment,
    #[error("party was closed out")]
    ClosedOut,
    #[error("iceberg peaks must be positive with the minimum visible size within the peak")]
    InvalidIcebergOrder,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Order {
    pub id: OrderId,
    pub market: MarketId,
    pub party: PartyId,
    pub side: Side,
    pub order_type: OrderType,
    pub time_in_force: TimeInForce,
    pub price: Option<Price>,
    pub size: u64,
    pub remaining: u64,
    pub status: OrderStatus,
    pub reason: Option<OrderError>,
    pub peg: Option<PeggedOrder>,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
    pub expires_at: Option<Timestamp>,
    pub reference: String,
    pub version: u32,
    #[serde(default)]
    pub iceberg: Option<IcebergOrder>,
}

impl Order {
    /// Visible plus hidden size still to trade.
    pub fn true_remaining(&self) -> u64 {
        let reserved = self.iceberg.map_or(0, |i| i.reserved_remaining);
        self.remaining.saturating_add(reserved)
    }

    pub fn filled(&self) -> u64 {
        self.size.saturating_sub(self.true_remaining())
    }

    /// The visible peak dropped under its minimum with hidden volume left to show.
    pub fn iceberg_needs_refresh(&self) -> bool {
        self.iceberg
            .map_or(false, |i| i.reserved_remaining > 0 && self.remaining < i.minimum_visible_size)
    }

    /// Trade the whole iceberg at once, hidden volume included.
    pub fn unhide(&mut self) {
        if let Some(iceberg) = &mut self.iceberg {
            self.remaining = self.remaining.saturating_add(iceberg.reserved_remaining);
            iceberg.reserved_remaining = 0;
        }
    }

    /// Cut the visible size back to the peak, or top it up from the reserve.
    pub fn set_iceberg_peaks(&mut self) {
        let Some(iceberg) = &mut self.iceberg else { return };
        if iceberg.reserved_remaining == 0 && self.remaining > iceberg.peak_size {
            iceberg.reserved_remaining = self.remaining - iceberg.peak_size;
            self.remaining = iceberg.peak_size;
            return;
        }
        let refill = iceberg
            .peak_size
            .saturating_sub(self.remaining)
            .min(iceberg.reserved_remaining);
        self.remaining += refill;
        iceberg.reserved_remaining -= refill;
    }

    pub fn is_pegged(&self) -> bool {
        self.peg.is_some()
    }

    pub fn is_live(&self) -> bool {
        self.status.is_live()
    }

    /// Whether this order crosses a resting order at `price`. Market orders cross anything.
    pub fn crosses(&self, price: Price) -> bool {
        match (self.side, self.price) {
            (_, None) => true,
            (Side::Buy, Some(limit)) => limit >= price,
            (Side::Sell, Some(limit)) => limit <= price,
        }
    }

    pub fn finish(&mut self, status: OrderStatus, reason: Option<OrderError>, now: Timestamp) {
        self.status = status;
        self.reason = reason;
        self.updated_at = now;
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderSubmission {
    pub market: MarketId,
    pub side: Side,
    pub order_type: OrderType,
    pub time_in_force: TimeInForce,
    pub price: Option<Decimal>,
    pub size: u64,
    #[serde(default)]
    pub expires_at: Option<Timestamp>,
    #[serde(default)]
    pub peg: Option<PeggedOrder>,
    #[serde(default)]
    pub iceberg: Option<IcebergOpts>,
    #[serde(default)]
    pub reference: String,
}

impl OrderSubmission {
    pub fn limit(market: MarketId, side: Side, price: Decimal, size: u64, time_in_force: TimeInForce) -> Self {
        Self {
            market,
            side,
            order_type: OrderType::Limit,
            time_in_force,
            price: Some(price),
            size,
            expires_at: None,
            peg: None,
            iceberg: None,
            reference: String::new(),
        }
    }

    pub fn market(market: MarketId, side: Side, size: u64, time_in_force: TimeInForce) -> Self {
        Self {
            market,
            side,
            order_type: OrderType::Market,
            time_in_force,
            price: None,
            size,
            expires_at: None,
            peg: None,
            iceberg: None,
            reference: String::new(),
        }
    }

    pub fn pegged(market: MarketId, side: Side, size: u64, peg: PeggedOrder) -> Self {
        Self {
            market,
            side,
            order_type: OrderType::Limit,
            time_in_force: TimeInForce::GTC,
            price: None,
            size,
            expires_at: None,
            peg: Some(peg),
            iceberg: None,
            reference: String::new(),
        }
    }

    pub fn with_iceberg(mut self, peak_size: u64, minimum_visible_size: u64) -> Self {
        self.iceberg = Some(IcebergOpts {
            peak_size,
            minimum_visible_size,
        });
        self
    }

    pub fn with_expiry(mut self, expires_at: Timestamp) -> Self {
        self.expires_at = Some(expires_at);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderAmendment {
    pub market: MarketId,
    pub order_id: OrderId,
    #[serde(default)]
    pub price: Option<Decimal>,
    #[serde(default)]
    pub size_delta: i64,
    #[serde(default)]
    pub expires_at: Option<Timestamp>,
    #[serde(default)]
    pub time_in_force: Option<TimeInForce>,
    #[serde(default)]
    pub peg_offset: Option<Decimal>,
    #[serde(default)]
    pub peg_reference: Option<PegReference>,
}

impl OrderAmendment {
    pub fn is_noop(&self) -> bool {
        self.price.is_none()
            && self.size_delta == 0
            && self.expires_at.is_none()
            && self.time_in_force.is_none()
            && self.peg_offset.is_none()
            && self.peg_reference.is_none()
    }
}

/// Both fields optional: no order id cancels every order of the party in the
/// market, no market cancels across all markets.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderCancellation {
    #[serde(default)]
    pub market: Option<MarketId>,
    #[serde(default)]
    pub order_id: Option<OrderId>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderConfirmation {
    pub order: Order,
    pub trades: Vec<Trade>,
    pub passive_orders_affected: Vec<Order>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderCancellationConfirmation {
    pub order: Order,
}
