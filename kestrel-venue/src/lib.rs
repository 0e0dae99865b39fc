//! Venue-agnostic traits and event types used by the rest of the bridge.
//!
//! A concrete venue integration implements [`VenueSession`] (the live
//! connection) and [`HistoricalSource`] (the one-shot backfill fetch). The
//! bridge consumes both through these seams only; connection management,
//! authentication, and the order-routing protocol stay inside the
//! implementation.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use kestrel_core::{
    AccountState, InstrumentId, Order, OrderRef, PositionLeg, Price, Quantity, VenueOrderId,
};

pub mod wire;

pub use wire::{HistoryRow, LiveBarFrame};

/// Convenience alias for venue results.
pub type VenueResult<T> = Result<T, VenueError>;

/// Common error type returned by venue integrations.
#[derive(Debug, Error)]
pub enum VenueError {
    /// Transport-level failures (network, timeouts, etc.).
    #[error("transport error: {0}")]
    Transport(String),
    /// Authentication failed or credentials are missing.
    #[error("authentication failed: {0}")]
    Authentication(String),
    /// The request parameters are invalid for the target venue.
    #[error("invalid request: {0}")]
    InvalidRequest(String),
    /// Wraps serialization or parsing errors.
    #[error("serialization error: {0}")]
    Serialization(String),
    /// The venue responded with a business error (e.g. insufficient margin).
    #[error("venue error: {0}")]
    Venue(String),
    /// A catch-all branch for other issues.
    #[error("unexpected error: {0}")]
    Other(String),
}

/// Lifecycle acknowledgements a venue sends about a working order.
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderEventKind {
    Accepted,
    Rejected,
    Cancelled,
    Expired,
}

/// Order acknowledgement keyed by the local reference the order was sent with.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct OrderReport {
    pub order: OrderRef,
    pub venue_order_id: Option<VenueOrderId>,
    pub kind: OrderEventKind,
}

/// Execution report for a working order.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct TradeReport {
    pub order: OrderRef,
    pub volume: Quantity,
    pub price: Price,
    pub traded_at: chrono::DateTime<chrono::Utc>,
}

/// Everything the bridge consumes from a venue connection, as one tagged enum.
///
/// Dispatch happens on the variant; event kinds the bridge does not consume
/// (ticks, contract definitions, venue log lines) are simply not represented
/// and must be swallowed by the session implementation.
#[derive(Clone, Debug, PartialEq)]
pub enum VenueEvent {
    /// A finished live bar for one instrument.
    Bar(LiveBarFrame),
    /// Full account snapshot (balance and available funds).
    Account(AccountState),
    /// Full position snapshot as directional legs, replacing the previous one.
    Positions(Vec<PositionLeg>),
    /// Order lifecycle acknowledgement.
    Order(OrderReport),
    /// Execution report.
    Trade(TradeReport),
}

/// The live venue connection.
///
/// Implementations are expected to buffer incoming events internally;
/// `next_event` drains that buffer without blocking when it is empty.
#[async_trait]
pub trait VenueSession: Send + Sync {
    /// Human-friendly name of the integration used for logging purposes.
    fn name(&self) -> &str;

    /// Request live bars for an instrument.
    async fn subscribe(&self, instrument: &InstrumentId) -> VenueResult<()>;

    /// Fetch the next buffered event in FIFO order, `None` when idle.
    async fn next_event(&self) -> VenueResult<Option<VenueEvent>>;

    /// Hand an order to the venue. Acknowledgements arrive as events.
    async fn submit_order(&self, order: &Order) -> VenueResult<()>;

    /// Request cancellation of a working order.
    async fn cancel_order(&self, order: &Order) -> VenueResult<()>;
}

/// One-shot source of historical bars used to seed a feed before going live.
#[async_trait]
pub trait HistoricalSource: Send + Sync {
    /// Fetch up to `count` most recent rows for the instrument, oldest first.
    async fn fetch(&self, instrument: &InstrumentId, count: usize) -> VenueResult<Vec<HistoryRow>>;
}
