//! Fundamental data types shared across the kestrel workspace.

use std::fmt;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Alias for price precision.
pub type Price = Decimal;
/// Alias for volume precision.
pub type Quantity = Decimal;

/// Identifier assigned to an order by the venue, once known.
pub type VenueOrderId = String;

/// Instrument identifier in `code.VENUE` form (e.g. `rb2110.SHFE`).
///
/// The venue part is optional; live market data frequently names the bare
/// contract code only, so [`InstrumentId::code`] is the comparison key used
/// when matching frames against a configured instrument.
#[derive(Clone, Debug, Deserialize, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize)]
#[serde(transparent)]
pub struct InstrumentId(String);

impl InstrumentId {
    pub fn new(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    /// The full identifier, venue suffix included when present.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The bare contract code (everything before the first `.`).
    #[must_use]
    pub fn code(&self) -> &str {
        self.0.split('.').next().unwrap_or(&self.0)
    }

    /// The venue suffix, when the identifier carries one.
    #[must_use]
    pub fn venue(&self) -> Option<&str> {
        self.0.split_once('.').map(|(_, venue)| venue)
    }
}

impl fmt::Display for InstrumentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for InstrumentId {
    fn from(raw: &str) -> Self {
        Self(raw.to_string())
    }
}

impl From<String> for InstrumentId {
    fn from(raw: String) -> Self {
        Self(raw)
    }
}

/// The side of an order.
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub enum Side {
    /// Buy the instrument.
    Buy,
    /// Sell the instrument.
    Sell,
}

/// Direction of a venue-reported position leg.
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    Long,
    Short,
}

impl Direction {
    /// Apply the leg sign to a volume: long counts positive, short negative.
    #[must_use]
    pub fn signed(self, volume: Quantity) -> Quantity {
        match self {
            Self::Long => volume,
            Self::Short => -volume,
        }
    }
}

/// One directional position report for an instrument, as the venue sends it.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct PositionLeg {
    pub instrument: InstrumentId,
    pub direction: Direction,
    pub volume: Quantity,
    pub price: Price,
}

/// Net position derived from venue leg reports.
///
/// `size` is signed: positive means net long, negative net short. The stored
/// price is exact when at most one leg was nonzero in the source snapshot and
/// an approximation otherwise.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct Position {
    pub instrument: InstrumentId,
    pub size: Quantity,
    pub price: Price,
}

impl Position {
    /// A zero-size position for the given instrument.
    #[must_use]
    pub fn flat(instrument: InstrumentId) -> Self {
        Self {
            instrument,
            size: Decimal::ZERO,
            price: Decimal::ZERO,
        }
    }

    #[must_use]
    pub fn is_flat(&self) -> bool {
        self.size.is_zero()
    }

    #[must_use]
    pub fn is_long(&self) -> bool {
        self.size > Decimal::ZERO
    }

    #[must_use]
    pub fn is_short(&self) -> bool {
        self.size < Decimal::ZERO
    }
}

/// Latest account snapshot pushed by the venue.
///
/// `available` backs the broker's cash query and `balance` its value query.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct AccountState {
    pub balance: Price,
    pub available: Price,
    pub updated_at: DateTime<Utc>,
}

/// Locally assigned order reference, unique within one broker instance.
#[derive(Clone, Copy, Debug, Deserialize, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize)]
#[serde(transparent)]
pub struct OrderRef(pub u64);

impl fmt::Display for OrderRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Lifecycle states an order moves through.
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub enum OrderStatus {
    /// Built locally, nothing sent yet.
    Created,
    /// Handed to the venue session, no acknowledgement yet.
    Submitted,
    /// Acknowledged and working at the venue.
    Accepted,
    /// Refused by the venue.
    Rejected,
    /// Cancelled before completion.
    Cancelled,
    /// Lapsed at the venue without executing.
    Expired,
    /// Some volume executed, remainder still working.
    PartiallyFilled,
    /// All requested volume executed.
    Filled,
}

impl OrderStatus {
    /// Terminal states admit no further transitions in practice.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            Self::Rejected | Self::Cancelled | Self::Expired | Self::Filled
        )
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Submitted => "submitted",
            Self::Accepted => "accepted",
            Self::Rejected => "rejected",
            Self::Cancelled => "cancelled",
            Self::Expired => "expired",
            Self::PartiallyFilled => "partially_filled",
            Self::Filled => "filled",
        }
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An order tracked by the broker, retained for audit after completion.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct Order {
    pub id: OrderRef,
    pub venue_order_id: Option<VenueOrderId>,
    pub instrument: InstrumentId,
    pub side: Side,
    pub price: Option<Price>,
    pub requested_size: Quantity,
    pub filled_size: Quantity,
    pub avg_fill_price: Option<Price>,
    pub status: OrderStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Order {
    /// Build a fresh order in [`OrderStatus::Created`].
    #[must_use]
    pub fn new(
        id: OrderRef,
        instrument: InstrumentId,
        side: Side,
        requested_size: Quantity,
        price: Option<Price>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id,
            venue_order_id: None,
            instrument,
            side,
            price,
            requested_size,
            filled_size: Decimal::ZERO,
            avg_fill_price: None,
            status: OrderStatus::Created,
            created_at: now,
            updated_at: now,
        }
    }

    /// Volume still outstanding.
    #[must_use]
    pub fn remaining(&self) -> Quantity {
        (self.requested_size - self.filled_size).max(Decimal::ZERO)
    }

    /// Record an execution, keeping a volume-weighted average fill price.
    ///
    /// Moves the order to `PartiallyFilled` until the filled volume reaches
    /// the requested volume, then to `Filled`.
    pub fn apply_fill(&mut self, volume: Quantity, price: Price, at: DateTime<Utc>) {
        let prior_notional = self.avg_fill_price.unwrap_or(Decimal::ZERO) * self.filled_size;
        self.filled_size += volume;
        if self.filled_size > Decimal::ZERO {
            self.avg_fill_price = Some((prior_notional + price * volume) / self.filled_size);
        }
        self.status = if self.filled_size >= self.requested_size {
            OrderStatus::Filled
        } else {
            OrderStatus::PartiallyFilled
        };
        self.updated_at = at;
    }
}

/// Feed lifecycle announcements surfaced to the driving loop.
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub enum FeedStatus {
    /// Serving backfilled history, not yet caught up.
    Delayed,
    /// Caught up and streaming venue bars.
    Live,
    /// The feed will deliver no further bars.
    Disconnected,
}

impl fmt::Display for FeedStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Delayed => "delayed",
            Self::Live => "live",
            Self::Disconnected => "disconnected",
        };
        f.write_str(label)
    }
}

/// Aggregated OHLCV bar, normalized from either backfill rows or live frames.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct Bar {
    pub instrument: InstrumentId,
    pub timestamp: DateTime<Utc>,
    pub open: Price,
    pub high: Price,
    pub low: Price,
    pub close: Price,
    pub volume: Quantity,
    pub open_interest: Quantity,
}
