use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde_json::json;

use super::*;
use crate::domain::ConnectionQuality;
use crate::error::Error;
use crate::testkit::config;
use crate::testkit::transport::{FrameOp, MockFeed, OpenOutcome};

fn manager(feed: &MockFeed) -> FeedManager {
    FeedManager::new(config::feed(), feed.factory())
}

fn key(feed: FeedType, symbol: &str) -> SubscriptionKey {
    SubscriptionKey::new(feed, Some(symbol))
}

/// Record every event except periodic health reports.
fn lifecycle_events(manager: &FeedManager) -> Arc<Mutex<Vec<ConnectionEvent>>> {
    let log = Arc::new(Mutex::new(Vec::new()));
    let sink = log.clone();
    manager.on_any(move |event| {
        if !matches!(event, ConnectionEvent::Health(_)) {
            sink.lock().push(event.clone());
        }
    });
    log
}

/// Let spawned tasks run without moving the clock.
async fn settle() {
    for _ in 0..20 {
        tokio::task::yield_now().await;
    }
}

#[tokio::test(start_paused = true)]
async fn subscribe_before_connect_opens_session_and_sends() {
    let feed = MockFeed::new();
    let manager = manager(&feed);

    let btc = manager
        .subscribe(FeedType::Ticker, Some("btcusdt"), |_| {})
        .await;
    settle().await;

    assert_eq!(btc, key(FeedType::Ticker, "BTCUSDT"));
    assert_eq!(feed.sessions(), 1);
    assert_eq!(feed.subscribed_in(1), vec![btc]);
    let status = manager.connection_status();
    assert!(status.connected);
    assert_eq!(status.phase, ConnectionPhase::Connected);
    assert_eq!(status.quality, ConnectionQuality::Excellent);
}

#[tokio::test(start_paused = true)]
async fn connect_is_idempotent() {
    let feed = MockFeed::new();
    let manager = manager(&feed);

    manager.connect().await.unwrap();
    manager.connect().await.unwrap();
    manager.subscribe(FeedType::Trades, None, |_| {}).await;

    assert_eq!(feed.open_attempts(), 1);
}

#[tokio::test(start_paused = true)]
async fn resubscribing_replaces_handler_without_second_frame() {
    let feed = MockFeed::new();
    let manager = manager(&feed);
    let seen = Arc::new(Mutex::new(Vec::new()));

    manager
        .subscribe(FeedType::Ticker, Some("ETHUSDT"), |_| panic!("replaced"))
        .await;
    let sink = seen.clone();
    manager
        .subscribe(FeedType::Ticker, Some("ethusdt"), move |update| {
            sink.lock().push(update.data.clone());
        })
        .await;
    settle().await;

    assert_eq!(feed.subscribed_in(1).len(), 1);
    feed.push_update("ticker", Some("ETHUSDT"), json!({"last": 3150.5}));
    settle().await;
    assert_eq!(*seen.lock(), vec![json!({"last": 3150.5})]);
}

#[tokio::test(start_paused = true)]
async fn routes_updates_and_drops_bad_frames() {
    let feed = MockFeed::new();
    let manager = manager(&feed);
    let exact = Arc::new(Mutex::new(0u32));
    let wide = Arc::new(Mutex::new(0u32));

    let sink = exact.clone();
    manager
        .subscribe(FeedType::Trades, Some("BTCUSDT"), move |_| *sink.lock() += 1)
        .await;
    let sink = wide.clone();
    manager
        .subscribe(FeedType::Trades, None, move |_| *sink.lock() += 1)
        .await;
    manager
        .subscribe(FeedType::Ticker, Some("BTCUSDT"), |_| panic!("handler bug"))
        .await;

    feed.push("not json");
    feed.push(r#"{"channel":"heartbeat"}"#);
    feed.push(r#"{"channel":"weather","data":{}}"#);
    feed.push_update("ticker", Some("BTCUSDT"), json!({}));
    feed.push_update("trades", Some("BTCUSDT"), json!({"px": 1}));
    feed.push_update("trades", Some("SOLUSDT"), json!({"px": 2}));
    settle().await;

    assert_eq!(*exact.lock(), 1);
    assert_eq!(*wide.lock(), 2);
    assert_eq!(feed.sessions(), 1);
    assert!(manager.connection_status().connected);
}

#[tokio::test(start_paused = true)]
async fn unsubscribe_sends_frame_and_skips_replay() {
    let feed = MockFeed::new();
    let manager = manager(&feed);
    let btc = manager
        .subscribe(FeedType::Ticker, Some("BTCUSDT"), |_| {})
        .await;
    let eth = manager
        .subscribe(FeedType::Ticker, Some("ETHUSDT"), |_| {})
        .await;
    settle().await;

    assert!(manager.unsubscribe(&btc));
    assert!(!manager.unsubscribe(&btc));
    settle().await;

    let last = feed.frames().pop().unwrap();
    assert_eq!(last.op, FrameOp::Unsubscribe);
    assert_eq!(last.key, btc);

    feed.drop_session();
    tokio::time::sleep(Duration::from_millis(1_100)).await;
    assert_eq!(feed.subscribed_in(2), vec![eth]);
}

#[tokio::test(start_paused = true)]
async fn reconnects_with_backoff_and_replays_in_order() {
    let feed = MockFeed::new();
    let manager = manager(&feed);
    let events = lifecycle_events(&manager);

    let a = manager.subscribe(FeedType::Ticker, Some("AAA"), |_| {}).await;
    let b = manager.subscribe(FeedType::Trades, Some("BBB"), |_| {}).await;
    let c = manager.subscribe(FeedType::Candles, Some("CCC"), |_| {}).await;
    let d = manager.subscribe(FeedType::Funding, None, |_| {}).await;
    manager.unsubscribe(&b);
    settle().await;
    events.lock().clear();

    feed.refuse_next(2);
    feed.fail_session("connection reset");
    settle().await;
    assert_eq!(
        manager.connection_status().phase,
        ConnectionPhase::Reconnecting
    );

    // Attempts at +1s, +3s (1 + 2) and +7s (1 + 2 + 4).
    tokio::time::sleep(Duration::from_millis(6_900)).await;
    assert_eq!(feed.sessions(), 1);
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(feed.sessions(), 2);

    assert_eq!(feed.subscribed_in(2), vec![a, c, d]);
    let status = manager.connection_status();
    assert!(status.connected);
    assert_eq!(status.reconnect_attempts, 0);

    let events = events.lock().clone();
    let names: Vec<&str> = events.iter().map(ConnectionEvent::name).collect();
    assert_eq!(
        names,
        vec![
            "disconnected",
            "reconnecting",
            "error",
            "reconnecting",
            "error",
            "reconnecting",
            "connected",
        ]
    );
    let delays: Vec<Duration> = events
        .iter()
        .filter_map(|e| match e {
            ConnectionEvent::Reconnecting { delay, .. } => Some(*delay),
            _ => None,
        })
        .collect();
    assert_eq!(
        delays,
        vec![
            Duration::from_secs(1),
            Duration::from_secs(2),
            Duration::from_secs(4)
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn failed_replay_does_not_block_the_rest() {
    let feed = MockFeed::new();
    let manager = manager(&feed);
    let a = manager.subscribe(FeedType::Ticker, Some("AAA"), |_| {}).await;
    let b = manager.subscribe(FeedType::Ticker, Some("BBB"), |_| {}).await;
    let c = manager.subscribe(FeedType::Ticker, Some("CCC"), |_| {}).await;
    settle().await;

    feed.fail_subscribe(b.clone());
    feed.drop_session();
    tokio::time::sleep(Duration::from_millis(1_100)).await;

    assert_eq!(feed.subscribed_in(2), vec![a, b, c]);
    assert!(manager.connection_status().connected);
}

#[tokio::test(start_paused = true)]
async fn max_attempts_fires_terminal_event_once() {
    let feed = MockFeed::new();
    let manager = manager(&feed);
    let events = lifecycle_events(&manager);
    manager.connect().await.unwrap();

    feed.refuse_next(10);
    feed.drop_session();
    tokio::time::sleep(Duration::from_secs(120)).await;

    // One initial handshake plus three retries.
    assert_eq!(feed.open_attempts(), 4);
    let terminal: Vec<ConnectionEvent> = events
        .lock()
        .iter()
        .filter(|e| matches!(e, ConnectionEvent::MaxAttemptsReached { .. }))
        .cloned()
        .collect();
    assert_eq!(
        terminal,
        vec![ConnectionEvent::MaxAttemptsReached { attempts: 3 }]
    );

    let status = manager.connection_status();
    assert_eq!(status.phase, ConnectionPhase::Disconnected);
    assert_eq!(status.quality, ConnectionQuality::Disconnected);
    assert_eq!(status.reconnect_attempts, 3);
}

#[tokio::test(start_paused = true)]
async fn connect_after_giving_up_starts_a_fresh_cycle() {
    let feed = MockFeed::new();
    let manager = manager(&feed);
    manager.connect().await.unwrap();
    feed.refuse_next(3);
    feed.drop_session();
    tokio::time::sleep(Duration::from_secs(60)).await;
    assert_eq!(
        manager.connection_status().phase,
        ConnectionPhase::Disconnected
    );

    manager.connect().await.unwrap();
    assert!(manager.connection_status().connected);
    assert_eq!(feed.sessions(), 2);
}

#[tokio::test(start_paused = true)]
async fn initial_failure_returns_error_and_schedules_reconnect() {
    let feed = MockFeed::new();
    feed.refuse_next(1);
    let manager = manager(&feed);

    let result = manager.connect().await;
    assert!(matches!(result, Err(Error::Connection(_))));
    assert_eq!(
        manager.connection_status().phase,
        ConnectionPhase::Reconnecting
    );

    tokio::time::sleep(Duration::from_millis(1_100)).await;
    assert!(manager.connection_status().connected);
}

#[tokio::test(start_paused = true)]
async fn failed_connect_after_giving_up_gets_full_retry_budget() {
    let feed = MockFeed::new();
    let manager = manager(&feed);
    manager.connect().await.unwrap();
    feed.refuse_next(3);
    feed.drop_session();
    tokio::time::sleep(Duration::from_secs(60)).await;

    feed.refuse_next(2);
    assert!(manager.connect().await.is_err());
    assert_eq!(manager.connection_status().reconnect_attempts, 0);

    // Retries at +1s (refused) and +3s (accepted).
    tokio::time::sleep(Duration::from_millis(3_100)).await;
    assert!(manager.connection_status().connected);
}

#[tokio::test(start_paused = true)]
async fn hung_handshake_times_out() {
    let feed = MockFeed::new().with_opens(vec![OpenOutcome::Hang]);
    let manager = manager(&feed);

    let result = manager.connect().await;
    assert!(matches!(result, Err(Error::HandshakeTimeout(_))));

    tokio::time::sleep(Duration::from_millis(1_100)).await;
    assert!(manager.connection_status().connected);
}

#[tokio::test(start_paused = true)]
async fn health_classifies_silence_and_forces_reconnect() {
    let feed = MockFeed::new();
    let manager = manager(&feed);
    let reports = Arc::new(Mutex::new(Vec::new()));
    let sink = reports.clone();
    manager.on(EventTopic::Health, move |event| {
        if let ConnectionEvent::Health(snapshot) = event {
            sink.lock().push(snapshot.clone());
        }
    });
    let events = lifecycle_events(&manager);
    manager.connect().await.unwrap();

    tokio::time::sleep(Duration::from_millis(20_500)).await;
    {
        let reports = reports.lock();
        let quality_at = |secs: u64| {
            reports
                .iter()
                .find(|r| r.last_update_ms == Some(secs * 1_000))
                .map(|r| r.quality)
        };
        assert_eq!(quality_at(3), Some(ConnectionQuality::Excellent));
        assert_eq!(quality_at(10), Some(ConnectionQuality::Good));
        assert_eq!(quality_at(20), Some(ConnectionQuality::Poor));
    }
    assert_eq!(manager.connection_status().quality, ConnectionQuality::Poor);

    // Threshold reached at 30s of silence; reconnect follows one backoff later.
    tokio::time::sleep(Duration::from_millis(10_000)).await;
    assert!(reports
        .lock()
        .iter()
        .any(|r| r.connected && r.quality == ConnectionQuality::Disconnected));
    tokio::time::sleep(Duration::from_millis(1_100)).await;
    assert_eq!(feed.sessions(), 2);
    assert_eq!(feed.closes(), 1);
    assert!(events
        .lock()
        .iter()
        .any(|e| matches!(e, ConnectionEvent::Disconnected { .. })));
}

#[tokio::test(start_paused = true)]
async fn inbound_traffic_keeps_quality_excellent() {
    let feed = MockFeed::new();
    let manager = manager(&feed);
    manager.connect().await.unwrap();

    for _ in 0..10 {
        tokio::time::sleep(Duration::from_secs(4)).await;
        feed.push(r#"{"channel":"heartbeat"}"#);
        settle().await;
    }

    assert_eq!(
        manager.connection_status().quality,
        ConnectionQuality::Excellent
    );
    assert_eq!(feed.sessions(), 1);
}

#[tokio::test(start_paused = true)]
async fn disconnect_tears_down_everything() {
    let feed = MockFeed::new();
    let manager = manager(&feed);
    let events = lifecycle_events(&manager);
    manager
        .subscribe(FeedType::Ticker, Some("BTCUSDT"), |_| {})
        .await;
    settle().await;

    manager.disconnect().await;

    assert_eq!(feed.closes(), 1);
    assert!(manager.subscriptions().is_empty());
    let status = manager.connection_status();
    assert!(!status.connected);
    assert_eq!(status.phase, ConnectionPhase::Disconnected);
    assert!(matches!(
        events.lock().last(),
        Some(ConnectionEvent::Disconnected { .. })
    ));

    tokio::time::sleep(Duration::from_secs(120)).await;
    assert_eq!(feed.open_attempts(), 1);
}

#[tokio::test(start_paused = true)]
async fn disconnect_cancels_pending_reconnect() {
    let feed = MockFeed::new();
    let manager = manager(&feed);
    manager.connect().await.unwrap();
    feed.drop_session();
    settle().await;
    assert_eq!(
        manager.connection_status().phase,
        ConnectionPhase::Reconnecting
    );

    manager.disconnect().await;
    tokio::time::sleep(Duration::from_secs(60)).await;

    assert_eq!(feed.open_attempts(), 1);
}

#[tokio::test(start_paused = true)]
async fn removed_listener_stops_receiving() {
    let feed = MockFeed::new();
    let manager = manager(&feed);
    let count = Arc::new(Mutex::new(0u32));
    let sink = count.clone();
    let id = manager.on(EventTopic::Connected, move |_| *sink.lock() += 1);

    manager.connect().await.unwrap();
    assert!(manager.remove_listener(id));
    feed.drop_session();
    tokio::time::sleep(Duration::from_millis(1_100)).await;

    assert_eq!(feed.sessions(), 2);
    assert_eq!(*count.lock(), 1);
}
