//! Deterministic in-process venue for driving the bridge in tests and
//! demos.
//!
//! [`SimSession`] implements the live-session seam over a scripted event
//! queue: tests push [`VenueEvent`]s through a cloned [`SimHandle`] and the
//! store's pump drains them exactly as it would a real connection. Order
//! submissions and cancel requests are recorded for assertions instead of
//! being routed anywhere. [`StaticHistory`] serves canned backfill rows.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{NaiveDate, NaiveDateTime, Utc};
use parking_lot::Mutex;
use rust_decimal::Decimal;

use kestrel_core::{
    AccountState, Direction, InstrumentId, Order, OrderRef, PositionLeg, Price, Quantity,
};
use kestrel_venue::wire::{HistoryRow, LiveBarFrame};
use kestrel_venue::{HistoricalSource, VenueError, VenueEvent, VenueResult, VenueSession};

#[derive(Default)]
struct SimState {
    events: Mutex<VecDeque<VenueEvent>>,
    subscriptions: Mutex<Vec<InstrumentId>>,
    submitted: Mutex<Vec<Order>>,
    cancel_requests: Mutex<Vec<OrderRef>>,
}

/// Scripted venue session.
///
/// Constructed together with its [`SimHandle`]; the session side is handed
/// to the store while the handle stays with the test to script traffic and
/// inspect what the bridge sent.
pub struct SimSession {
    state: Arc<SimState>,
}

impl SimSession {
    #[must_use]
    pub fn new() -> (Self, SimHandle) {
        let state = Arc::new(SimState::default());
        (
            Self {
                state: Arc::clone(&state),
            },
            SimHandle { state },
        )
    }
}

#[async_trait]
impl VenueSession for SimSession {
    fn name(&self) -> &str {
        "sim"
    }

    async fn subscribe(&self, instrument: &InstrumentId) -> VenueResult<()> {
        self.state.subscriptions.lock().push(instrument.clone());
        Ok(())
    }

    async fn next_event(&self) -> VenueResult<Option<VenueEvent>> {
        Ok(self.state.events.lock().pop_front())
    }

    async fn submit_order(&self, order: &Order) -> VenueResult<()> {
        self.state.submitted.lock().push(order.clone());
        Ok(())
    }

    async fn cancel_order(&self, order: &Order) -> VenueResult<()> {
        self.state.cancel_requests.lock().push(order.id);
        Ok(())
    }
}

/// Test-side handle onto a [`SimSession`].
#[derive(Clone)]
pub struct SimHandle {
    state: Arc<SimState>,
}

impl SimHandle {
    /// Queue an event for the pump to drain.
    pub fn push(&self, event: VenueEvent) {
        self.state.events.lock().push_back(event);
    }

    /// Queue several events in order.
    pub fn push_all(&self, events: impl IntoIterator<Item = VenueEvent>) {
        let mut queue = self.state.events.lock();
        queue.extend(events);
    }

    /// Instruments the bridge subscribed, in call order.
    #[must_use]
    pub fn subscriptions(&self) -> Vec<InstrumentId> {
        self.state.subscriptions.lock().clone()
    }

    /// Orders the bridge handed to the venue, in call order.
    #[must_use]
    pub fn submitted_orders(&self) -> Vec<Order> {
        self.state.submitted.lock().clone()
    }

    /// References the bridge asked to cancel, in call order.
    #[must_use]
    pub fn cancel_requests(&self) -> Vec<OrderRef> {
        self.state.cancel_requests.lock().clone()
    }

    /// Events still waiting to be drained.
    #[must_use]
    pub fn pending_events(&self) -> usize {
        self.state.events.lock().len()
    }
}

/// Canned backfill source keyed by instrument.
#[derive(Default)]
pub struct StaticHistory {
    rows: HashMap<InstrumentId, Vec<HistoryRow>>,
    failing: bool,
}

impl StaticHistory {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Serve these rows (oldest first) for an instrument.
    #[must_use]
    pub fn with_rows(mut self, instrument: impl Into<InstrumentId>, rows: Vec<HistoryRow>) -> Self {
        self.rows.insert(instrument.into(), rows);
        self
    }

    /// A source whose every fetch fails, for exercising backfill aborts.
    #[must_use]
    pub fn failing() -> Self {
        Self {
            rows: HashMap::new(),
            failing: true,
        }
    }
}

#[async_trait]
impl HistoricalSource for StaticHistory {
    async fn fetch(&self, instrument: &InstrumentId, count: usize) -> VenueResult<Vec<HistoryRow>> {
        if self.failing {
            return Err(VenueError::Transport("history source offline".into()));
        }
        let rows = self.rows.get(instrument).cloned().unwrap_or_default();
        let start = rows.len().saturating_sub(count);
        Ok(rows[start..].to_vec())
    }
}

/// The trading day all sample timestamps fall on.
#[must_use]
pub fn sample_datetime(hour: u32, minute: u32) -> NaiveDateTime {
    NaiveDate::from_ymd_opt(2021, 6, 15)
        .and_then(|d| d.and_hms_opt(hour, minute, 0))
        .unwrap_or_default()
}

/// One minute bar of backfill for `instrument` at 09:`minute`.
#[must_use]
pub fn sample_history_row(instrument: &str, minute: u32) -> HistoryRow {
    HistoryRow {
        instrument: instrument.into(),
        datetime: sample_datetime(9, minute),
        open: Decimal::from(5100),
        high: Decimal::from(5110),
        low: Decimal::from(5095),
        close: Decimal::from(5100 + i64::from(minute)),
        volume: Decimal::from(1000),
        open_interest: Decimal::from(120_000),
    }
}

/// A live frame for `local_symbol` at 09:`minute`.
#[must_use]
pub fn sample_live_frame(local_symbol: &str, minute: u32) -> LiveBarFrame {
    let symbol = local_symbol
        .split('.')
        .next()
        .unwrap_or(local_symbol)
        .to_string();
    LiveBarFrame {
        local_symbol: local_symbol.into(),
        symbol,
        datetime: sample_datetime(9, minute),
        open_price: Decimal::from(5100),
        high_price: Decimal::from(5110),
        low_price: Decimal::from(5095),
        close_price: Decimal::from(5100 + i64::from(minute)),
        volume: Decimal::from(500),
        open_interest: Decimal::from(120_100),
    }
}

/// An account snapshot with the given funds.
#[must_use]
pub fn sample_account(available: i64, balance: i64) -> AccountState {
    AccountState {
        balance: Decimal::from(balance),
        available: Decimal::from(available),
        updated_at: Utc::now(),
    }
}

/// A directional position leg.
#[must_use]
pub fn sample_leg(
    instrument: &str,
    direction: Direction,
    volume: impl Into<Quantity>,
    price: impl Into<Price>,
) -> PositionLeg {
    PositionLeg {
        instrument: InstrumentId::from(instrument),
        direction,
        volume: volume.into(),
        price: price.into(),
    }
}
