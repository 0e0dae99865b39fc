//! Per-instrument bar feeds that splice a one-shot backfill onto a live
//! stream.
//!
//! A [`BarFeed`] starts in backfill, drains the historical batch exactly
//! once, then switches to its live queue. Delivered timestamps are strictly
//! increasing per feed: anything at or below the high-water mark is dropped,
//! so replaying overlap between the backfill tail and the first live bars
//! never produces duplicates. Polling is non-blocking throughout; "nothing
//! yet" and "never again" are distinct results.

use std::collections::VecDeque;

use chrono::{DateTime, FixedOffset, Utc};
use tokio::sync::mpsc::{error::TryRecvError, UnboundedReceiver};
use tracing::{debug, info};

use kestrel_core::{Bar, FeedStatus, InstrumentId};
use kestrel_venue::wire::{default_venue_offset, HistoryRow, LiveBarFrame};

mod router;

pub use router::{FeedError, FeedResult, FeedRouter};

/// Backfill rows arrive ahead of this many live bars by default.
pub const DEFAULT_BACKFILL: usize = 100;

/// Items the backfill fetch task places on a feed's historical queue.
///
/// The queue carries its own termination markers so the feed can tell a
/// finished batch from a failed fetch without consulting the source again.
#[derive(Clone, Debug)]
pub enum BackfillItem {
    /// One historical row, oldest first.
    Row(HistoryRow),
    /// The batch is complete; nothing historical follows.
    End,
    /// The fetch failed; the feed should report a disconnect and close.
    Aborted,
}

/// Lifecycle stage of a feed.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum FeedPhase {
    /// Draining the historical batch.
    Backfill,
    /// Draining the live queue.
    Live,
    /// Terminal; the feed will never deliver again.
    Over,
}

/// Result of a single [`BarFeed::poll`].
#[derive(Clone, Debug, PartialEq)]
pub enum FeedPoll {
    /// A bar was delivered and advanced the feed's high-water mark.
    Bar(Bar),
    /// Nothing available right now; poll again on the next tick.
    Pending,
    /// The feed is over; no further bars will ever arrive.
    Closed,
}

/// Settings for one feed registration.
#[derive(Clone, Debug)]
pub struct FeedConfig {
    pub instrument: InstrumentId,
    pub backfill: usize,
    pub historical_only: bool,
    pub venue_offset: FixedOffset,
}

impl FeedConfig {
    pub fn new(instrument: impl Into<InstrumentId>) -> Self {
        Self {
            instrument: instrument.into(),
            backfill: DEFAULT_BACKFILL,
            historical_only: false,
            venue_offset: default_venue_offset(),
        }
    }

    /// Deliver the backfill only, closing instead of going live.
    #[must_use]
    pub fn historical_only(mut self) -> Self {
        self.historical_only = true;
        self
    }

    /// Number of historical rows to request before going live.
    #[must_use]
    pub fn with_backfill(mut self, count: usize) -> Self {
        self.backfill = count;
        self
    }

    /// Offset used to resolve the venue's naive timestamps.
    #[must_use]
    pub fn with_venue_offset(mut self, offset: FixedOffset) -> Self {
        self.venue_offset = offset;
        self
    }
}

/// Pull-based bar source for one instrument.
///
/// Owned and polled by the strategy loop; fed by the backfill fetch task and
/// the store's bar router on their own tasks. Status announcements
/// (`delayed` on creation, then `live` or `disconnected` exactly once) queue
/// up in order and drain through [`BarFeed::take_status`].
pub struct BarFeed {
    config: FeedConfig,
    phase: FeedPhase,
    last_delivered: Option<DateTime<Utc>>,
    backfill_rx: UnboundedReceiver<BackfillItem>,
    live_rx: UnboundedReceiver<LiveBarFrame>,
    statuses: VecDeque<FeedStatus>,
}

impl BarFeed {
    /// Build a feed over its two input queues.
    #[must_use]
    pub fn new(
        config: FeedConfig,
        backfill_rx: UnboundedReceiver<BackfillItem>,
        live_rx: UnboundedReceiver<LiveBarFrame>,
    ) -> Self {
        let mut statuses = VecDeque::new();
        statuses.push_back(FeedStatus::Delayed);
        Self {
            config,
            phase: FeedPhase::Backfill,
            last_delivered: None,
            backfill_rx,
            live_rx,
            statuses,
        }
    }

    #[must_use]
    pub fn instrument(&self) -> &InstrumentId {
        &self.config.instrument
    }

    #[must_use]
    pub fn phase(&self) -> FeedPhase {
        self.phase
    }

    /// Timestamp of the most recently delivered bar, if any.
    #[must_use]
    pub fn last_delivered(&self) -> Option<DateTime<Utc>> {
        self.last_delivered
    }

    #[must_use]
    pub fn is_over(&self) -> bool {
        self.phase == FeedPhase::Over
    }

    /// Dequeue the oldest unseen status announcement.
    pub fn take_status(&mut self) -> Option<FeedStatus> {
        self.statuses.pop_front()
    }

    /// Pull the next bar without blocking.
    ///
    /// Stale, duplicate, and mismatched-instrument input is dropped inside
    /// the loop and never surfaces; the caller only ever sees a delivered
    /// bar, `Pending`, or `Closed`.
    pub fn poll(&mut self) -> FeedPoll {
        loop {
            match self.phase {
                FeedPhase::Over => return FeedPoll::Closed,
                FeedPhase::Backfill => match self.backfill_rx.try_recv() {
                    Ok(BackfillItem::Row(row)) => {
                        if row.instrument != self.config.instrument.as_str() {
                            debug!(
                                instrument = %self.config.instrument,
                                got = %row.instrument,
                                "dropping bar for foreign instrument"
                            );
                            continue;
                        }
                        let bar = row.into_bar(self.config.venue_offset);
                        if self.admit(&bar) {
                            return FeedPoll::Bar(bar);
                        }
                    }
                    Ok(BackfillItem::End) => {
                        if self.config.historical_only {
                            self.close(FeedStatus::Disconnected);
                            return FeedPoll::Closed;
                        }
                        self.phase = FeedPhase::Live;
                        self.statuses.push_back(FeedStatus::Live);
                        info!(instrument = %self.config.instrument, "backfill complete, feed live");
                    }
                    Ok(BackfillItem::Aborted) => {
                        self.close(FeedStatus::Disconnected);
                        return FeedPoll::Closed;
                    }
                    Err(TryRecvError::Empty) => return FeedPoll::Pending,
                    Err(TryRecvError::Disconnected) => {
                        self.close(FeedStatus::Disconnected);
                        return FeedPoll::Closed;
                    }
                },
                FeedPhase::Live => match self.live_rx.try_recv() {
                    Ok(frame) => {
                        if frame.symbol != self.config.instrument.code() {
                            debug!(
                                instrument = %self.config.instrument,
                                got = %frame.symbol,
                                "dropping bar for foreign instrument"
                            );
                            continue;
                        }
                        let bar = frame.into_bar(self.config.venue_offset);
                        if self.admit(&bar) {
                            return FeedPoll::Bar(bar);
                        }
                    }
                    Err(TryRecvError::Empty) => return FeedPoll::Pending,
                    Err(TryRecvError::Disconnected) => {
                        self.close(FeedStatus::Disconnected);
                        return FeedPoll::Closed;
                    }
                },
            }
        }
    }

    /// Enforce strict timestamp ordering; returns false for dropped bars.
    fn admit(&mut self, bar: &Bar) -> bool {
        if let Some(last) = self.last_delivered {
            if bar.timestamp <= last {
                debug!(
                    instrument = %self.config.instrument,
                    timestamp = %bar.timestamp,
                    high_water = %last,
                    "dropping stale bar"
                );
                return false;
            }
        }
        self.last_delivered = Some(bar.timestamp);
        true
    }

    fn close(&mut self, status: FeedStatus) {
        self.phase = FeedPhase::Over;
        self.statuses.push_back(status);
        info!(instrument = %self.config.instrument, status = %status, "feed closed");
    }
}
