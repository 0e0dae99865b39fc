//! Broker-side state the strategy loop consults: cash and value from the
//! latest account push, net positions reconciled from leg reports, and an
//! order ledger whose every transition lands in a pollable notification
//! queue.
//!
//! The broker holds no connection of its own. The store's event pump feeds
//! it venue reports; the strategy reads cloned snapshots, so neither side
//! ever observes a torn update.

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use rust_decimal::Decimal;
use thiserror::Error;

use kestrel_core::{
    AccountState, InstrumentId, Order, OrderRef, Position, PositionLeg, Price, Quantity, Side,
    VenueOrderId,
};

mod ledger;
mod positions;

pub use ledger::{Notification, NotificationQueue, OrderLedger};
pub use positions::PositionTable;

/// Convenience alias for broker results.
pub type BrokerResult<T> = Result<T, BrokerError>;

/// Errors raised by the broker's bookkeeping.
///
/// These surface integration defects. Venue hiccups never appear here;
/// they are routed through feed status notifications instead.
#[derive(Debug, Error)]
pub enum BrokerError {
    /// A transition referenced an order this broker never created.
    #[error("unknown order reference {0}")]
    UnknownOrder(OrderRef),
}

/// Synchronous, pollable view of the venue's asynchronous account state.
#[derive(Debug, Default)]
pub struct Broker {
    account: RwLock<Option<AccountState>>,
    positions: Mutex<PositionTable>,
    ledger: Mutex<OrderLedger>,
    notifications: NotificationQueue,
}

impl Broker {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the cached account snapshot.
    pub fn update_account(&self, state: AccountState) {
        *self.account.write() = Some(state);
    }

    /// The latest account snapshot, if one has arrived yet.
    #[must_use]
    pub fn account(&self) -> Option<AccountState> {
        self.account.read().clone()
    }

    /// Available funds from the latest account push, zero before the first.
    #[must_use]
    pub fn cash(&self) -> Price {
        self.account
            .read()
            .as_ref()
            .map_or(Decimal::ZERO, |state| state.available)
    }

    /// Total balance from the latest account push, zero before the first.
    #[must_use]
    pub fn value(&self) -> Price {
        self.account
            .read()
            .as_ref()
            .map_or(Decimal::ZERO, |state| state.balance)
    }

    /// Rebuild net positions from a full leg snapshot.
    pub fn apply_position_snapshot(&self, legs: &[PositionLeg]) {
        self.positions.lock().apply_snapshot(legs);
    }

    /// Cloned net position for an instrument, flat when none is held.
    #[must_use]
    pub fn position(&self, instrument: &InstrumentId) -> Position {
        self.positions.lock().get(instrument)
    }

    /// Cloned view of every held position.
    #[must_use]
    pub fn positions(&self) -> Vec<Position> {
        self.positions.lock().snapshot()
    }

    /// Build a new order in `Created`; nothing is notified until it moves.
    pub fn create_order(
        &self,
        instrument: InstrumentId,
        side: Side,
        requested_size: Quantity,
        price: Option<Price>,
    ) -> Order {
        self.ledger
            .lock()
            .create(instrument, side, requested_size, price)
    }

    pub fn submit(&self, id: OrderRef) -> BrokerResult<Order> {
        let order = self.ledger.lock().submit(id)?;
        self.notify(order)
    }

    pub fn accept(&self, id: OrderRef, venue_order_id: Option<VenueOrderId>) -> BrokerResult<Order> {
        let order = self.ledger.lock().accept(id, venue_order_id)?;
        self.notify(order)
    }

    pub fn reject(&self, id: OrderRef) -> BrokerResult<Order> {
        let order = self.ledger.lock().reject(id)?;
        self.notify(order)
    }

    pub fn cancel(&self, id: OrderRef) -> BrokerResult<Order> {
        let order = self.ledger.lock().cancel(id)?;
        self.notify(order)
    }

    pub fn expire(&self, id: OrderRef) -> BrokerResult<Order> {
        let order = self.ledger.lock().expire(id)?;
        self.notify(order)
    }

    pub fn fill(
        &self,
        id: OrderRef,
        volume: Quantity,
        price: Price,
        at: DateTime<Utc>,
    ) -> BrokerResult<Order> {
        let order = self.ledger.lock().fill(id, volume, price, at)?;
        self.notify(order)
    }

    /// Snapshot of one tracked order.
    pub fn order(&self, id: OrderRef) -> BrokerResult<Order> {
        self.ledger.lock().get(id)
    }

    /// Snapshots of every tracked order.
    #[must_use]
    pub fn orders(&self) -> Vec<Order> {
        self.ledger.lock().snapshot()
    }

    /// Dequeue the oldest notification, `None` when the queue is empty.
    pub fn next_notification(&self) -> Option<Notification> {
        self.notifications.pop()
    }

    /// Drain snapshots up to the next boundary marker.
    pub fn drain_tick(&self) -> Vec<Order> {
        self.notifications.drain_tick()
    }

    /// Close the current notification generation. Call once per strategy
    /// tick.
    pub fn on_tick(&self) {
        self.notifications.mark_boundary();
    }

    fn notify(&self, order: Order) -> BrokerResult<Order> {
        self.notifications.push_order(order.clone());
        Ok(order)
    }
}
