//! Order lifecycle tracking and the notification queue the strategy drains.

use std::collections::{HashMap, VecDeque};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tracing::info;

use kestrel_core::{
    InstrumentId, Order, OrderRef, OrderStatus, Price, Quantity, Side, VenueOrderId,
};

use crate::{BrokerError, BrokerResult};

/// One entry in the notification stream.
#[derive(Clone, Debug, PartialEq)]
pub enum Notification {
    /// Immutable snapshot of an order taken right after a transition.
    Order(Order),
    /// Everything before this marker belongs to an earlier strategy tick.
    Boundary,
}

/// FIFO queue of order snapshots with per-tick boundary markers.
///
/// Appended by whichever context applies transitions, drained one entry per
/// call by the strategy loop. Popping never blocks; an empty queue reads as
/// `None`.
#[derive(Debug, Default)]
pub struct NotificationQueue {
    inner: Mutex<VecDeque<Notification>>,
}

impl NotificationQueue {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an order snapshot.
    pub fn push_order(&self, order: Order) {
        self.inner.lock().push_back(Notification::Order(order));
    }

    /// Append the end-of-tick marker.
    pub fn mark_boundary(&self) {
        self.inner.lock().push_back(Notification::Boundary);
    }

    /// Dequeue the oldest entry, `None` when nothing is queued.
    pub fn pop(&self) -> Option<Notification> {
        self.inner.lock().pop_front()
    }

    /// Drain order snapshots up to (and consuming) the next boundary.
    ///
    /// Entries queued after that boundary stay untouched for later ticks.
    pub fn drain_tick(&self) -> Vec<Order> {
        let mut inner = self.inner.lock();
        let mut orders = Vec::new();
        while let Some(entry) = inner.pop_front() {
            match entry {
                Notification::Order(order) => orders.push(order),
                Notification::Boundary => break,
            }
        }
        orders
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.lock().is_empty()
    }
}

/// Every order this broker ever created, keyed by local reference.
///
/// Orders are never removed; terminal orders stay for audit. Transition
/// methods do not police ordering: the venue integration is trusted to call
/// them in causally correct order, and only an unknown reference is an
/// error.
#[derive(Debug)]
pub struct OrderLedger {
    orders: HashMap<OrderRef, Order>,
    next_ref: u64,
}

impl Default for OrderLedger {
    fn default() -> Self {
        Self::new()
    }
}

impl OrderLedger {
    #[must_use]
    pub fn new() -> Self {
        Self {
            orders: HashMap::new(),
            next_ref: 1,
        }
    }

    /// Build and store a fresh order, returning its snapshot.
    pub fn create(
        &mut self,
        instrument: InstrumentId,
        side: Side,
        requested_size: Quantity,
        price: Option<Price>,
    ) -> Order {
        let id = OrderRef(self.next_ref);
        self.next_ref += 1;
        let order = Order::new(id, instrument, side, requested_size, price);
        self.orders.insert(id, order.clone());
        order
    }

    /// Snapshot of a tracked order.
    pub fn get(&self, id: OrderRef) -> BrokerResult<Order> {
        self.orders
            .get(&id)
            .cloned()
            .ok_or(BrokerError::UnknownOrder(id))
    }

    /// Snapshots of every tracked order, in no particular order.
    #[must_use]
    pub fn snapshot(&self) -> Vec<Order> {
        self.orders.values().cloned().collect()
    }

    pub fn submit(&mut self, id: OrderRef) -> BrokerResult<Order> {
        self.set_status(id, OrderStatus::Submitted)
    }

    /// Mark accepted, recording the venue's id when it is first learned.
    pub fn accept(
        &mut self,
        id: OrderRef,
        venue_order_id: Option<VenueOrderId>,
    ) -> BrokerResult<Order> {
        let order = self.get_mut(id)?;
        if let Some(venue_id) = venue_order_id {
            order.venue_order_id = Some(venue_id);
        }
        order.status = OrderStatus::Accepted;
        order.updated_at = Utc::now();
        Ok(order.clone())
    }

    pub fn reject(&mut self, id: OrderRef) -> BrokerResult<Order> {
        self.set_status(id, OrderStatus::Rejected)
    }

    pub fn cancel(&mut self, id: OrderRef) -> BrokerResult<Order> {
        self.set_status(id, OrderStatus::Cancelled)
    }

    pub fn expire(&mut self, id: OrderRef) -> BrokerResult<Order> {
        self.set_status(id, OrderStatus::Expired)
    }

    /// Record an execution; the order's own fill math decides between
    /// partial and complete.
    pub fn fill(
        &mut self,
        id: OrderRef,
        volume: Quantity,
        price: Price,
        at: DateTime<Utc>,
    ) -> BrokerResult<Order> {
        let order = self.get_mut(id)?;
        order.apply_fill(volume, price, at);
        if order.status == OrderStatus::Filled {
            info!(order = %id, price = %price, "order completely filled");
        }
        Ok(order.clone())
    }

    fn set_status(&mut self, id: OrderRef, status: OrderStatus) -> BrokerResult<Order> {
        let order = self.get_mut(id)?;
        order.status = status;
        order.updated_at = Utc::now();
        Ok(order.clone())
    }

    fn get_mut(&mut self, id: OrderRef) -> BrokerResult<&mut Order> {
        self.orders.get_mut(&id).ok_or(BrokerError::UnknownOrder(id))
    }
}
