use std::time::Duration;

use anyhow::{anyhow, bail, Result};
use chrono::Utc;
use rust_decimal::Decimal;
use tokio::time::timeout;

use kestrel_core::{Bar, Direction, FeedStatus, InstrumentId, OrderRef, OrderStatus, Side};
use kestrel_feed::{BarFeed, FeedPhase, FeedPoll};
use kestrel_sim::{
    sample_account, sample_history_row, sample_leg, sample_live_frame, SimSession, StaticHistory,
};
use kestrel_store::{Store, StoreConfig, StoreError};
use kestrel_venue::{OrderEventKind, OrderReport, TradeReport, VenueEvent};

const SYMBOL: &str = "rb2110.SHFE";

const POLL: Duration = Duration::from_millis(5);
const DEADLINE: Duration = Duration::from_secs(5);

fn test_config() -> StoreConfig {
    StoreConfig {
        startup_timeout: Duration::from_secs(2),
        poll_backoff: POLL,
        ..StoreConfig::default()
    }
}

async fn wait_until<F>(mut condition: F, what: &str) -> Result<()>
where
    F: FnMut() -> bool,
{
    timeout(DEADLINE, async {
        while !condition() {
            tokio::time::sleep(POLL).await;
        }
    })
    .await
    .map_err(|_| anyhow!("timed out waiting for {what}"))
}

async fn next_bar(feed: &mut BarFeed) -> Result<Bar> {
    timeout(DEADLINE, async {
        loop {
            match feed.poll() {
                FeedPoll::Bar(bar) => return Ok(bar),
                FeedPoll::Pending => tokio::time::sleep(POLL).await,
                FeedPoll::Closed => bail!("feed closed while a bar was expected"),
            }
        }
    })
    .await
    .map_err(|_| anyhow!("timed out waiting for a bar"))?
}

async fn wait_closed(feed: &mut BarFeed) -> Result<()> {
    timeout(DEADLINE, async {
        loop {
            match feed.poll() {
                FeedPoll::Closed => return Ok(()),
                FeedPoll::Bar(_) | FeedPoll::Pending => tokio::time::sleep(POLL).await,
            }
        }
    })
    .await
    .map_err(|_| anyhow!("timed out waiting for the feed to close"))?
}

#[tokio::test(flavor = "multi_thread")]
async fn startup_times_out_without_an_account_snapshot() {
    let (session, _handle) = SimSession::new();
    let config = StoreConfig {
        startup_timeout: Duration::from_millis(100),
        ..test_config()
    };
    let store = Store::connect(session, StaticHistory::new(), config);

    let err = store.wait_until_ready().await.unwrap_err();
    assert!(matches!(err, StoreError::StartupTimeout(_)));
    assert!(!store.is_ready());
    store.shutdown().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn first_account_snapshot_makes_the_store_ready() -> Result<()> {
    let _ = tracing_subscriber::fmt::try_init();
    let (session, handle) = SimSession::new();
    let store = Store::connect(session, StaticHistory::new(), test_config());

    handle.push(VenueEvent::Account(sample_account(80_000, 100_000)));
    store.wait_until_ready().await?;
    assert!(store.is_ready());

    let broker = store.broker();
    assert_eq!(broker.cash(), Decimal::from(80_000));
    assert_eq!(broker.value(), Decimal::from(100_000));

    store.shutdown().await;
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn feed_replays_backfill_then_delivers_live_bars() -> Result<()> {
    let (session, handle) = SimSession::new();
    let history = StaticHistory::new().with_rows(
        SYMBOL,
        (1..=3).map(|minute| sample_history_row(SYMBOL, minute)).collect(),
    );
    let store = Store::connect(session, history, test_config());

    let mut feed = store.register_feed(store.feed_config(SYMBOL)).await?;
    assert_eq!(handle.subscriptions(), vec![InstrumentId::from(SYMBOL)]);
    assert_eq!(feed.take_status(), Some(FeedStatus::Delayed));

    let mut bars = Vec::new();
    for _ in 0..3 {
        bars.push(next_bar(&mut feed).await?);
    }
    assert!(bars.windows(2).all(|w| w[0].timestamp < w[1].timestamp));

    // The live switch happens on the poll that consumes the end marker.
    handle.push(VenueEvent::Bar(sample_live_frame(SYMBOL, 10)));
    let live = next_bar(&mut feed).await?;
    assert!(live.timestamp > bars[2].timestamp);
    assert_eq!(feed.take_status(), Some(FeedStatus::Live));
    assert_eq!(feed.take_status(), None);

    store.shutdown().await;
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn backfill_failure_disconnects_the_feed() -> Result<()> {
    let (session, _handle) = SimSession::new();
    let store = Store::connect(session, StaticHistory::failing(), test_config());

    let mut feed = store.register_feed(store.feed_config(SYMBOL)).await?;
    wait_closed(&mut feed).await?;

    assert_eq!(feed.take_status(), Some(FeedStatus::Delayed));
    assert_eq!(feed.take_status(), Some(FeedStatus::Disconnected));
    assert_eq!(feed.take_status(), None);

    store.shutdown().await;
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn order_round_trip_reaches_filled() -> Result<()> {
    let _ = tracing_subscriber::fmt::try_init();
    let (session, handle) = SimSession::new();
    let store = Store::connect(session, StaticHistory::new(), test_config());
    handle.push(VenueEvent::Account(sample_account(80_000, 100_000)));
    store.wait_until_ready().await?;

    let submitted = store
        .place_order(
            InstrumentId::from(SYMBOL),
            Side::Buy,
            Decimal::from(2),
            Some(Decimal::from(5105)),
        )
        .await?;
    assert_eq!(submitted.status, OrderStatus::Submitted);
    assert_eq!(handle.submitted_orders().len(), 1);

    let broker = store.broker();
    let id = submitted.id;
    handle.push(VenueEvent::Order(OrderReport {
        order: id,
        venue_order_id: Some("V-77".into()),
        kind: OrderEventKind::Accepted,
    }));
    wait_until(
        || matches!(broker.order(id), Ok(order) if order.status == OrderStatus::Accepted),
        "venue acceptance",
    )
    .await?;

    handle.push(VenueEvent::Trade(TradeReport {
        order: id,
        volume: Decimal::from(2),
        price: Decimal::from(5105),
        traded_at: Utc::now(),
    }));
    wait_until(
        || matches!(broker.order(id), Ok(order) if order.status == OrderStatus::Filled),
        "the fill",
    )
    .await?;

    let filled = broker.order(id)?;
    assert_eq!(filled.filled_size, Decimal::from(2));
    assert_eq!(filled.avg_fill_price, Some(Decimal::from(5105)));
    assert_eq!(filled.venue_order_id.as_deref(), Some("V-77"));

    broker.on_tick();
    let statuses: Vec<OrderStatus> = broker
        .drain_tick()
        .into_iter()
        .map(|order| order.status)
        .collect();
    assert_eq!(
        statuses,
        vec![
            OrderStatus::Submitted,
            OrderStatus::Accepted,
            OrderStatus::Filled
        ]
    );

    store.shutdown().await;
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn cancel_requests_reach_the_venue() -> Result<()> {
    let (session, handle) = SimSession::new();
    let store = Store::connect(session, StaticHistory::new(), test_config());
    handle.push(VenueEvent::Account(sample_account(80_000, 100_000)));
    store.wait_until_ready().await?;

    let submitted = store
        .place_order(InstrumentId::from(SYMBOL), Side::Sell, Decimal::ONE, None)
        .await?;
    store.cancel_order(submitted.id).await?;
    assert_eq!(handle.cancel_requests(), vec![submitted.id]);

    let broker = store.broker();
    handle.push(VenueEvent::Order(OrderReport {
        order: submitted.id,
        venue_order_id: None,
        kind: OrderEventKind::Cancelled,
    }));
    wait_until(
        || {
            matches!(
                broker.order(submitted.id),
                Ok(order) if order.status == OrderStatus::Cancelled
            )
        },
        "the cancel acknowledgement",
    )
    .await?;

    store.shutdown().await;
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn untracked_order_reports_do_not_stop_the_pump() -> Result<()> {
    let _ = tracing_subscriber::fmt::try_init();
    let (session, handle) = SimSession::new();
    let store = Store::connect(session, StaticHistory::new(), test_config());

    // Reports for a reference the ledger never issued, then a valid snapshot.
    handle.push_all([
        VenueEvent::Order(OrderReport {
            order: OrderRef(999),
            venue_order_id: Some("V-99".into()),
            kind: OrderEventKind::Accepted,
        }),
        VenueEvent::Trade(TradeReport {
            order: OrderRef(999),
            volume: Decimal::ONE,
            price: Decimal::from(5105),
            traded_at: Utc::now(),
        }),
        VenueEvent::Account(sample_account(80_000, 100_000)),
    ]);

    store.wait_until_ready().await?;
    let broker = store.broker();
    assert_eq!(broker.cash(), Decimal::from(80_000));
    assert_eq!(broker.value(), Decimal::from(100_000));
    assert!(broker.order(OrderRef(999)).is_err());

    store.shutdown().await;
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn position_snapshots_flow_into_the_broker() -> Result<()> {
    let (session, handle) = SimSession::new();
    let store = Store::connect(session, StaticHistory::new(), test_config());
    handle.push(VenueEvent::Account(sample_account(80_000, 100_000)));
    store.wait_until_ready().await?;

    handle.push(VenueEvent::Positions(vec![
        sample_leg(SYMBOL, Direction::Long, Decimal::from(5), Decimal::from(100)),
        sample_leg(SYMBOL, Direction::Short, Decimal::from(2), Decimal::from(90)),
    ]));

    let broker = store.broker();
    let instrument = InstrumentId::from(SYMBOL);
    wait_until(
        || broker.position(&instrument).size == Decimal::from(3),
        "the position snapshot",
    )
    .await?;
    assert_eq!(broker.position(&instrument).price, Decimal::from(100));

    store.shutdown().await;
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn position_snapshots_are_ignored_when_disabled() -> Result<()> {
    let (session, handle) = SimSession::new();
    let config = StoreConfig {
        use_positions: false,
        ..test_config()
    };
    let store = Store::connect(session, StaticHistory::new(), config);
    handle.push(VenueEvent::Account(sample_account(80_000, 100_000)));
    store.wait_until_ready().await?;

    handle.push(VenueEvent::Positions(vec![sample_leg(
        SYMBOL,
        Direction::Long,
        Decimal::from(5),
        Decimal::from(100),
    )]));
    wait_until(|| handle.pending_events() == 0, "the pump to drain").await?;

    let broker = store.broker();
    assert!(broker.position(&InstrumentId::from(SYMBOL)).is_flat());
    assert!(broker.positions().is_empty());

    store.shutdown().await;
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn shutdown_disconnects_live_feeds() -> Result<()> {
    let (session, _handle) = SimSession::new();
    let store = Store::connect(session, StaticHistory::new(), test_config());

    let mut feed = store.register_feed(store.feed_config(SYMBOL)).await?;
    wait_until(
        || {
            let _ = feed.poll();
            feed.phase() == FeedPhase::Live
        },
        "the live switch",
    )
    .await?;

    store.shutdown().await;
    wait_closed(&mut feed).await?;

    assert_eq!(feed.take_status(), Some(FeedStatus::Delayed));
    assert_eq!(feed.take_status(), Some(FeedStatus::Live));
    assert_eq!(feed.take_status(), Some(FeedStatus::Disconnected));
    assert_eq!(feed.take_status(), None);
    Ok(())
}
