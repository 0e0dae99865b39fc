//! Fan-out of live bar frames to per-instrument feed queues.

use std::collections::HashMap;

use thiserror::Error;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tracing::{debug, warn};

use kestrel_core::InstrumentId;
use kestrel_venue::wire::LiveBarFrame;

/// Convenience alias for feed results.
pub type FeedResult<T> = Result<T, FeedError>;

/// Errors raised during feed registration.
#[derive(Debug, Error)]
pub enum FeedError {
    /// Each instrument gets exactly one live queue.
    #[error("a feed for {0} is already registered")]
    AlreadyRegistered(InstrumentId),
}

/// Maps each registered instrument to the sending half of its live queue.
///
/// The single producer (the store's event pump) routes frames by their
/// routing key; frames for instruments nobody registered are dropped with a
/// warning, matching how stale bars are treated elsewhere.
#[derive(Debug, Default)]
pub struct FeedRouter {
    channels: HashMap<InstrumentId, UnboundedSender<LiveBarFrame>>,
}

impl FeedRouter {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create the live queue for an instrument, handing back the draining
    /// half.
    pub fn register(
        &mut self,
        instrument: InstrumentId,
    ) -> FeedResult<UnboundedReceiver<LiveBarFrame>> {
        if self.channels.contains_key(&instrument) {
            return Err(FeedError::AlreadyRegistered(instrument));
        }
        let (tx, rx) = mpsc::unbounded_channel();
        self.channels.insert(instrument, tx);
        Ok(rx)
    }

    /// Drop an instrument's queue; its feed observes closure on next poll.
    pub fn deregister(&mut self, instrument: &InstrumentId) -> bool {
        self.channels.remove(instrument).is_some()
    }

    /// Deliver a frame to its instrument's queue.
    pub fn route(&self, frame: LiveBarFrame) {
        let key = frame.routing_key();
        match self.channels.get(&key) {
            Some(tx) => {
                if tx.send(frame).is_err() {
                    debug!(instrument = %key, "feed receiver dropped, discarding bar");
                }
            }
            None => {
                warn!(instrument = %key, "no feed registered, discarding bar");
            }
        }
    }

    /// Drop every queue, closing all registered feeds.
    pub fn clear(&mut self) {
        self.channels.clear();
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.channels.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use rust_decimal::Decimal;

    fn frame(local_symbol: &str) -> LiveBarFrame {
        LiveBarFrame {
            local_symbol: local_symbol.into(),
            symbol: local_symbol.split('.').next().unwrap_or(local_symbol).into(),
            datetime: NaiveDate::from_ymd_opt(2021, 6, 15)
                .unwrap()
                .and_hms_opt(9, 1, 0)
                .unwrap(),
            open_price: Decimal::from(5100),
            high_price: Decimal::from(5110),
            low_price: Decimal::from(5095),
            close_price: Decimal::from(5105),
            volume: Decimal::from(500),
            open_interest: Decimal::ZERO,
        }
    }

    #[test]
    fn routes_frames_to_the_registered_queue() {
        let mut router = FeedRouter::new();
        let mut rb = router.register(InstrumentId::from("rb2110.SHFE")).unwrap();
        let mut hc = router.register(InstrumentId::from("hc2110.SHFE")).unwrap();

        router.route(frame("rb2110.SHFE"));
        router.route(frame("rb2110.SHFE"));
        router.route(frame("hc2110.SHFE"));

        assert_eq!(rb.try_recv().unwrap().local_symbol, "rb2110.SHFE");
        assert_eq!(rb.try_recv().unwrap().local_symbol, "rb2110.SHFE");
        assert!(rb.try_recv().is_err());
        assert_eq!(hc.try_recv().unwrap().local_symbol, "hc2110.SHFE");
    }

    #[test]
    fn duplicate_registration_is_rejected() {
        let mut router = FeedRouter::new();
        let _rx = router.register(InstrumentId::from("rb2110.SHFE")).unwrap();
        let err = router.register(InstrumentId::from("rb2110.SHFE")).unwrap_err();
        assert!(matches!(err, FeedError::AlreadyRegistered(_)));
    }

    #[test]
    fn unrouted_frames_are_dropped_silently() {
        let router = FeedRouter::new();
        // Must not panic or error; the frame simply disappears.
        router.route(frame("ni2109.SHFE"));
    }

    #[test]
    fn deregister_closes_the_feed_queue() {
        let mut router = FeedRouter::new();
        let mut rx = router.register(InstrumentId::from("rb2110.SHFE")).unwrap();
        assert!(router.deregister(&InstrumentId::from("rb2110.SHFE")));
        assert!(!router.deregister(&InstrumentId::from("rb2110.SHFE")));
        assert!(matches!(
            rx.try_recv(),
            Err(mpsc::error::TryRecvError::Disconnected)
        ));
    }
}
