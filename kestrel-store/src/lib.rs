//! The store owns the venue connection and turns its event stream into the
//! queues and caches the rest of the bridge reads.
//!
//! Exactly one live connection exists per store because [`Store::connect`]
//! consumes the session by value; there is no global registry to reach
//! around it. A spawned pump task drains [`VenueEvent`]s and dispatches on
//! the variant: bars go to the per-instrument router, account and position
//! snapshots into the broker's caches, order and trade reports into the
//! order ledger. Startup blocks only behind [`Store::wait_until_ready`],
//! which is bounded by a configured timeout.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, error, info, warn};

use kestrel_broker::{Broker, BrokerError};
use kestrel_core::{InstrumentId, Order, OrderRef, Price, Quantity, Side};
use kestrel_feed::{BackfillItem, BarFeed, FeedConfig, FeedError, FeedRouter, DEFAULT_BACKFILL};
use kestrel_venue::wire::default_venue_offset;
use kestrel_venue::{HistoricalSource, OrderEventKind, VenueError, VenueEvent, VenueSession};

/// Convenience alias for store results.
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors surfaced by the store's coordination layer.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The venue never delivered an account snapshot inside the bound.
    #[error("no account snapshot within {0:?}")]
    StartupTimeout(Duration),
    #[error(transparent)]
    Venue(#[from] VenueError),
    #[error(transparent)]
    Feed(#[from] FeedError),
    #[error(transparent)]
    Broker(#[from] BrokerError),
}

/// Settings the store is constructed with.
///
/// The opaque venue connect parameters live with the session integration;
/// only knobs the bridge itself consumes appear here.
#[derive(Clone, Debug)]
pub struct StoreConfig {
    /// Offset used to resolve the venue's naive bar timestamps.
    pub venue_offset: chrono::FixedOffset,
    /// Upper bound on waiting for the first account snapshot.
    pub startup_timeout: Duration,
    /// Backfill depth handed to feeds built via [`Store::feed_config`].
    pub default_backfill: usize,
    /// Seed and refresh broker positions from venue leg snapshots.
    pub use_positions: bool,
    /// Pump idle backoff between empty event pulls.
    pub poll_backoff: Duration,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            venue_offset: default_venue_offset(),
            startup_timeout: Duration::from_secs(30),
            default_backfill: DEFAULT_BACKFILL,
            use_positions: true,
            poll_backoff: Duration::from_millis(200),
        }
    }
}

/// Cooperative stop flag shared between the store and its pump task.
#[derive(Clone, Debug, Default)]
pub struct ShutdownSignal {
    flag: Arc<AtomicBool>,
    notify: Arc<Notify>,
}

impl ShutdownSignal {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn trigger(&self) {
        self.flag.store(true, Ordering::SeqCst);
        self.notify.notify_waiters();
    }

    #[must_use]
    pub fn triggered(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    /// Sleep for `duration` unless interrupted; returns false when the
    /// signal fired first.
    pub async fn sleep(&self, duration: Duration) -> bool {
        tokio::select! {
            () = tokio::time::sleep(duration) => true,
            () = self.notify.notified() => false,
        }
    }
}

/// One-shot latch tripped by the first account snapshot.
#[derive(Debug, Default)]
struct ReadyGate {
    ready: AtomicBool,
    notify: Notify,
}

impl ReadyGate {
    fn trip(&self) {
        if !self.ready.swap(true, Ordering::SeqCst) {
            self.notify.notify_waiters();
        }
    }

    fn is_ready(&self) -> bool {
        self.ready.load(Ordering::SeqCst)
    }

    async fn wait(&self) {
        loop {
            // Register before checking so a trip between the check and the
            // await cannot be missed.
            let notified = self.notify.notified();
            if self.is_ready() {
                return;
            }
            notified.await;
        }
    }
}

struct PumpContext {
    session: Arc<dyn VenueSession>,
    broker: Arc<Broker>,
    router: Arc<Mutex<FeedRouter>>,
    ready: Arc<ReadyGate>,
    shutdown: ShutdownSignal,
    backoff: Duration,
    apply_positions: bool,
}

/// Coordinator owning the venue connection, the bar router, and the broker.
pub struct Store {
    session: Arc<dyn VenueSession>,
    history: Arc<dyn HistoricalSource>,
    broker: Arc<Broker>,
    router: Arc<Mutex<FeedRouter>>,
    config: StoreConfig,
    ready: Arc<ReadyGate>,
    shutdown: ShutdownSignal,
    pump: Mutex<Option<JoinHandle<()>>>,
}

impl Store {
    /// Take ownership of the venue connection and start the event pump.
    ///
    /// Consuming the session by value is what enforces "one connection per
    /// store": nothing else can pull events from it afterwards. Must be
    /// called within a tokio runtime.
    pub fn connect<S, H>(session: S, history: H, config: StoreConfig) -> Self
    where
        S: VenueSession + 'static,
        H: HistoricalSource + 'static,
    {
        let session: Arc<dyn VenueSession> = Arc::new(session);
        let history: Arc<dyn HistoricalSource> = Arc::new(history);
        let broker = Arc::new(Broker::new());
        let router = Arc::new(Mutex::new(FeedRouter::new()));
        let ready = Arc::new(ReadyGate::default());
        let shutdown = ShutdownSignal::new();

        let pump = tokio::spawn(run_pump(PumpContext {
            session: Arc::clone(&session),
            broker: Arc::clone(&broker),
            router: Arc::clone(&router),
            ready: Arc::clone(&ready),
            shutdown: shutdown.clone(),
            backoff: config.poll_backoff,
            apply_positions: config.use_positions,
        }));

        Self {
            session,
            history,
            broker,
            router,
            config,
            ready,
            shutdown,
            pump: Mutex::new(Some(pump)),
        }
    }

    /// The broker this store feeds.
    #[must_use]
    pub fn broker(&self) -> Arc<Broker> {
        Arc::clone(&self.broker)
    }

    /// Whether the first account snapshot has arrived.
    #[must_use]
    pub fn is_ready(&self) -> bool {
        self.ready.is_ready()
    }

    /// Block until the first account snapshot arrives, bounded by the
    /// configured startup timeout.
    pub async fn wait_until_ready(&self) -> StoreResult<()> {
        if timeout(self.config.startup_timeout, self.ready.wait())
            .await
            .is_err()
        {
            return Err(StoreError::StartupTimeout(self.config.startup_timeout));
        }
        Ok(())
    }

    /// A feed configuration seeded with this store's venue offset and
    /// default backfill depth.
    #[must_use]
    pub fn feed_config(&self, instrument: impl Into<InstrumentId>) -> FeedConfig {
        FeedConfig::new(instrument)
            .with_backfill(self.config.default_backfill)
            .with_venue_offset(self.config.venue_offset)
    }

    /// Subscribe the instrument, kick off its backfill fetch, and hand back
    /// the feed.
    ///
    /// The fetch runs in its own task; rows and the terminating marker
    /// arrive on the feed's backfill queue in order, so the feed never
    /// blocks on the fetch being in flight.
    pub async fn register_feed(&self, config: FeedConfig) -> StoreResult<BarFeed> {
        let live_rx = self.router.lock().register(config.instrument.clone())?;
        if let Err(err) = self.session.subscribe(&config.instrument).await {
            self.router.lock().deregister(&config.instrument);
            return Err(err.into());
        }
        info!(instrument = %config.instrument, backfill = config.backfill, "feed registered");

        let (backfill_tx, backfill_rx) = mpsc::unbounded_channel();
        let history = Arc::clone(&self.history);
        let instrument = config.instrument.clone();
        let count = config.backfill;
        tokio::spawn(async move {
            match history.fetch(&instrument, count).await {
                Ok(rows) => {
                    debug!(instrument = %instrument, rows = rows.len(), "backfill fetched");
                    for row in rows {
                        if backfill_tx.send(BackfillItem::Row(row)).is_err() {
                            return;
                        }
                    }
                    let _ = backfill_tx.send(BackfillItem::End);
                }
                Err(err) => {
                    warn!(instrument = %instrument, error = %err, "backfill fetch failed");
                    let _ = backfill_tx.send(BackfillItem::Aborted);
                }
            }
        });

        Ok(BarFeed::new(config, backfill_rx, live_rx))
    }

    /// Create, record, and hand an order to the venue.
    ///
    /// The returned snapshot is `Submitted`; later lifecycle moves arrive
    /// through the pump as the venue acknowledges. A transport failure
    /// rejects the order locally so the strategy sees a terminal state.
    pub async fn place_order(
        &self,
        instrument: InstrumentId,
        side: Side,
        size: Quantity,
        price: Option<Price>,
    ) -> StoreResult<Order> {
        let created = self.broker.create_order(instrument, side, size, price);
        let submitted = self.broker.submit(created.id)?;
        if let Err(err) = self.session.submit_order(&submitted).await {
            self.broker.reject(created.id)?;
            return Err(err.into());
        }
        Ok(submitted)
    }

    /// Ask the venue to cancel a tracked order.
    ///
    /// The cancelled transition itself arrives as a venue report.
    pub async fn cancel_order(&self, id: OrderRef) -> StoreResult<()> {
        let order = self.broker.order(id)?;
        self.session.cancel_order(&order).await?;
        Ok(())
    }

    /// Stop the pump and close every registered feed queue.
    pub async fn shutdown(&self) {
        self.shutdown.trigger();
        let handle = self.pump.lock().take();
        if let Some(handle) = handle {
            if let Err(err) = handle.await {
                debug!(error = %err, "pump task did not join cleanly");
            }
        }
        self.router.lock().clear();
        info!("store shut down");
    }
}

impl Drop for Store {
    fn drop(&mut self) {
        self.shutdown.trigger();
    }
}

async fn run_pump(ctx: PumpContext) {
    info!(venue = ctx.session.name(), "venue event pump started");
    while !ctx.shutdown.triggered() {
        match ctx.session.next_event().await {
            Ok(Some(event)) => dispatch(&ctx, event),
            Ok(None) => {
                ctx.shutdown.sleep(ctx.backoff).await;
            }
            Err(err) => {
                warn!(error = %err, "venue event pull failed");
                ctx.shutdown.sleep(ctx.backoff).await;
            }
        }
    }
    info!("venue event pump stopped");
}

fn dispatch(ctx: &PumpContext, event: VenueEvent) {
    match event {
        VenueEvent::Bar(frame) => ctx.router.lock().route(frame),
        VenueEvent::Account(state) => {
            ctx.broker.update_account(state);
            ctx.ready.trip();
        }
        VenueEvent::Positions(legs) => {
            if ctx.apply_positions {
                ctx.broker.apply_position_snapshot(&legs);
            } else {
                debug!(legs = legs.len(), "position snapshots disabled, ignoring");
            }
        }
        VenueEvent::Order(report) => {
            let applied = match report.kind {
                OrderEventKind::Accepted => ctx.broker.accept(report.order, report.venue_order_id),
                OrderEventKind::Rejected => ctx.broker.reject(report.order),
                OrderEventKind::Cancelled => ctx.broker.cancel(report.order),
                OrderEventKind::Expired => ctx.broker.expire(report.order),
            };
            if let Err(err) = applied {
                // An unknown reference is an integration defect; the pump
                // itself keeps running.
                error!(error = %err, kind = ?report.kind, "venue order report for untracked order");
            }
        }
        VenueEvent::Trade(trade) => {
            if let Err(err) =
                ctx.broker
                    .fill(trade.order, trade.volume, trade.price, trade.traded_at)
            {
                error!(error = %err, "venue trade report for untracked order");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_defaults_are_bounded() {
        let config = StoreConfig::default();
        assert_eq!(config.startup_timeout, Duration::from_secs(30));
        assert_eq!(config.default_backfill, DEFAULT_BACKFILL);
        assert!(config.use_positions);
    }

    #[tokio::test]
    async fn ready_gate_wakes_pending_waiters() {
        let gate = Arc::new(ReadyGate::default());
        let waiter = {
            let gate = Arc::clone(&gate);
            tokio::spawn(async move { gate.wait().await })
        };
        gate.trip();
        timeout(Duration::from_secs(1), waiter)
            .await
            .expect("waiter should wake")
            .expect("waiter should not panic");
        assert!(gate.is_ready());
    }

    #[tokio::test]
    async fn ready_gate_is_immediate_once_tripped() {
        let gate = ReadyGate::default();
        gate.trip();
        gate.trip();
        timeout(Duration::from_millis(50), gate.wait())
            .await
            .expect("wait should return at once");
    }

    #[tokio::test]
    async fn shutdown_signal_interrupts_sleep() {
        let signal = ShutdownSignal::new();
        let sleeper = {
            let signal = signal.clone();
            tokio::spawn(async move { signal.sleep(Duration::from_secs(30)).await })
        };
        tokio::task::yield_now().await;
        signal.trigger();
        let completed = timeout(Duration::from_secs(1), sleeper)
            .await
            .expect("sleep should be interrupted")
            .expect("sleeper should not panic");
        assert!(!completed);
    }
}
