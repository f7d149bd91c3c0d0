//! Reconnection Integration Tests
//!
//! Tests backoff scheduling after unexpected drops, recovery, terminal
//! failure, drops while nobody is subscribed, and teardown while a
//! reconnect is pending.

#![allow(clippy::unwrap_used, clippy::expect_used)]

mod common;

use std::time::Duration;

use common::{Recorder, harness, harness_with, price, settle};
use market_stream::{
    ConnectionState, LifecycleEvent, PoolConfig, PriceUpdate, ReconnectConfig, TeardownReason,
    TransportError,
};

fn scheduled_delays(events: &[LifecycleEvent]) -> Vec<(u32, Duration)> {
    events
        .iter()
        .filter_map(|e| match e {
            LifecycleEvent::ReconnectScheduled { attempt, delay, .. } => Some((*attempt, *delay)),
            _ => None,
        })
        .collect()
}

#[tokio::test(start_paused = true)]
async fn drop_schedules_reconnect_and_recovers() {
    let h = harness();
    let seen = Recorder::new();
    let _subscription = h.pool.subscribe("btcusdt", seen.clone()).unwrap();
    settle().await;

    h.connector.drop_session("btcusdt");
    settle().await;

    assert_eq!(
        h.pool.connection_state("btcusdt"),
        Some(ConnectionState::Reconnecting)
    );
    assert!(h.pool.stats().is_degraded());
    assert_eq!(
        scheduled_delays(&h.sink.events()),
        vec![(1, Duration::from_secs(1))]
    );

    tokio::time::sleep(Duration::from_millis(1_100)).await;

    assert_eq!(h.connector.connects(), 2);
    let stats = h.pool.stats();
    assert_eq!(stats.connections[0].state, ConnectionState::Open);
    assert_eq!(stats.connections[0].reconnect_attempts, 0);
    assert_eq!(stats.connections[0].subscribers, 1);
    assert_eq!(stats.connections_created, 1);

    // Subscribers carry over to the new session.
    h.connector.push_trade("btcusdt", "3.25");
    settle().await;
    assert_eq!(seen.ticks(), vec![(price("3.25"), false)]);
}

#[tokio::test(start_paused = true)]
async fn backoff_doubles_until_attempts_are_exhausted() {
    let h = harness();
    let seen = Recorder::new();
    h.connector.fail_all_connects(true);

    let _subscription = h.pool.subscribe("btcusdt", seen.clone()).unwrap();
    tokio::time::sleep(Duration::from_secs(60)).await;

    let events = h.sink.events();
    assert_eq!(
        scheduled_delays(&events),
        vec![
            (1, Duration::from_secs(1)),
            (2, Duration::from_secs(2)),
            (3, Duration::from_secs(4)),
            (4, Duration::from_secs(8)),
        ]
    );
    assert_eq!(
        h.sink
            .count(|e| matches!(e, LifecycleEvent::Failed { attempts: 5, .. })),
        1
    );
    assert_eq!(h.connector.connects(), 5);

    // The failed connection leaves the pool and its subscribers hear about it.
    assert_eq!(h.pool.connection_state("btcusdt"), None);
    let updates = seen.updates();
    assert_eq!(updates.len(), 1);
    assert!(updates[0].is_terminal());
}

#[tokio::test(start_paused = true)]
async fn subscribe_after_failure_starts_fresh() {
    let h = harness();
    h.connector.fail_all_connects(true);
    let _old = h.pool.subscribe("btcusdt", Recorder::new()).unwrap();
    tokio::time::sleep(Duration::from_secs(60)).await;
    assert_eq!(h.pool.stats().active_connections, 0);

    h.connector.fail_all_connects(false);
    let _new = h.pool.subscribe("btcusdt", Recorder::new()).unwrap();
    settle().await;

    let stats = h.pool.stats();
    assert_eq!(stats.connections_created, 2);
    assert_eq!(stats.connections[0].state, ConnectionState::Open);
}

#[tokio::test(start_paused = true)]
async fn delays_are_capped() {
    let config = PoolConfig {
        reconnect: ReconnectConfig {
            initial_delay: Duration::from_secs(10),
            max_delay: Duration::from_secs(15),
            multiplier: 3.0,
            jitter_factor: 0.0,
            max_attempts: 4,
        },
        ..PoolConfig::default()
    };
    let h = harness_with(config);
    h.connector.fail_all_connects(true);

    let _subscription = h.pool.subscribe("btcusdt", Recorder::new()).unwrap();
    tokio::time::sleep(Duration::from_secs(120)).await;

    assert_eq!(
        scheduled_delays(&h.sink.events()),
        vec![
            (1, Duration::from_secs(10)),
            (2, Duration::from_secs(15)),
            (3, Duration::from_secs(15)),
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn success_resets_the_failure_count() {
    let h = harness();
    let _subscription = h.pool.subscribe("btcusdt", Recorder::new()).unwrap();
    settle().await;

    // Two failed reconnects, then one that sticks.
    h.connector.fail_next_connects(2);
    h.connector.drop_session("btcusdt");
    tokio::time::sleep(Duration::from_secs(10)).await;
    assert_eq!(h.pool.connection_state("btcusdt"), Some(ConnectionState::Open));

    h.connector.drop_session("btcusdt");
    settle().await;

    let delays = scheduled_delays(&h.sink.events());
    assert_eq!(
        delays,
        vec![
            (1, Duration::from_secs(1)),
            (2, Duration::from_secs(2)),
            (3, Duration::from_secs(4)),
            (1, Duration::from_secs(1)),
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn connect_timeout_counts_as_failure() {
    let h = harness();
    h.connector.hang_connects(true);

    let _subscription = h.pool.subscribe("btcusdt", Recorder::new()).unwrap();
    tokio::time::sleep(Duration::from_millis(10_100)).await;

    assert!(h.sink.events().iter().any(|e| matches!(
        e,
        LifecycleEvent::Disconnected {
            error: TransportError::ConnectTimeout(_),
            ..
        }
    )));
    assert_eq!(
        h.pool.connection_state("btcusdt"),
        Some(ConnectionState::Reconnecting)
    );
}

#[tokio::test(start_paused = true)]
async fn drop_without_subscribers_tears_down() {
    let h = harness();
    let subscription = h.pool.subscribe("btcusdt", Recorder::new()).unwrap();
    settle().await;
    subscription.unsubscribe();

    h.connector.drop_session("btcusdt");
    settle().await;

    assert_eq!(h.pool.stats().active_connections, 0);
    assert!(scheduled_delays(&h.sink.events()).is_empty());
    assert_eq!(
        h.sink.count(|e| matches!(
            e,
            LifecycleEvent::TornDown {
                reason: TeardownReason::DroppedWithoutSubscribers,
                ..
            }
        )),
        1
    );

    // The cancelled grace timer must not fire later.
    tokio::time::sleep(Duration::from_secs(10)).await;
    assert_eq!(h.sink.count(|e| matches!(e, LifecycleEvent::TornDown { .. })), 1);
}

#[tokio::test(start_paused = true)]
async fn subscribe_during_reconnect_waits_for_new_session() {
    let h = harness();
    let first = Recorder::new();
    let _first = h.pool.subscribe("btcusdt", first.clone()).unwrap();
    settle().await;
    h.connector.push_trade("btcusdt", "7");
    settle().await;

    h.connector.drop_session("btcusdt");
    settle().await;

    let late = Recorder::new();
    let _late = h.pool.subscribe("btcusdt", late.clone()).unwrap();
    assert_eq!(late.ticks(), vec![(price("7"), true)]);

    tokio::time::sleep(Duration::from_millis(1_100)).await;
    h.connector.push_trade("btcusdt", "8");
    settle().await;

    assert_eq!(late.ticks(), vec![(price("7"), true), (price("8"), false)]);
    assert_eq!(first.ticks(), vec![(price("7"), false), (price("8"), false)]);
    assert_eq!(h.connector.connects(), 2);
    assert!(
        !first
            .updates()
            .iter()
            .any(PriceUpdate::is_terminal)
    );
}

#[tokio::test(start_paused = true)]
async fn connector_panic_backs_off_to_failure() {
    let h = harness();
    let seen = Recorder::new();
    h.connector.panic_connects(true);

    let _subscription = h.pool.subscribe("btcusdt", seen.clone()).unwrap();
    tokio::time::sleep(Duration::from_secs(60)).await;

    assert_eq!(h.connector.connects(), 5);
    assert_eq!(
        h.sink.count(|e| matches!(
            e,
            LifecycleEvent::Disconnected {
                error: TransportError::Panicked(_),
                ..
            }
        )),
        5
    );
    assert_eq!(scheduled_delays(&h.sink.events()).len(), 4);
    assert_eq!(h.pool.connection_state("btcusdt"), None);

    let updates = seen.updates();
    assert_eq!(updates.len(), 1);
    assert!(updates[0].is_terminal());
}

#[tokio::test(start_paused = true)]
async fn connector_panic_recovers_when_it_stops() {
    let h = harness();
    h.connector.panic_connects(true);
    let _subscription = h.pool.subscribe("btcusdt", Recorder::new()).unwrap();
    settle().await;
    assert_eq!(
        h.pool.connection_state("btcusdt"),
        Some(ConnectionState::Reconnecting)
    );

    h.connector.panic_connects(false);
    tokio::time::sleep(Duration::from_millis(1_100)).await;

    assert_eq!(h.pool.connection_state("btcusdt"), Some(ConnectionState::Open));
    assert_eq!(h.connector.connects(), 2);
}

fn connecting_events(h: &common::Harness) -> usize {
    h.sink
        .count(|e| matches!(e, LifecycleEvent::Connecting { .. }))
}

#[tokio::test(start_paused = true)]
async fn disconnect_all_cancels_pending_reconnect() {
    let h = harness();
    let seen = Recorder::new();
    let _subscription = h.pool.subscribe("btcusdt", seen.clone()).unwrap();
    settle().await;

    h.connector.drop_session("btcusdt");
    settle().await;
    assert_eq!(
        h.pool.connection_state("btcusdt"),
        Some(ConnectionState::Reconnecting)
    );
    assert_eq!(connecting_events(&h), 1);

    h.pool.disconnect_all();
    tokio::time::sleep(Duration::from_secs(60)).await;

    assert_eq!(h.connector.connects(), 1);
    assert_eq!(connecting_events(&h), 1);
    assert_eq!(h.pool.stats().active_connections, 0);
    assert!(!seen.updates().iter().any(PriceUpdate::is_terminal));
}

#[tokio::test(start_paused = true)]
async fn grace_expiry_cancels_pending_reconnect() {
    let config = PoolConfig {
        grace_period: Duration::from_secs(2),
        reconnect: ReconnectConfig {
            initial_delay: Duration::from_secs(10),
            ..ReconnectConfig::default()
        },
        ..PoolConfig::default()
    };
    let h = harness_with(config);
    let subscription = h.pool.subscribe("btcusdt", Recorder::new()).unwrap();
    settle().await;

    h.connector.drop_session("btcusdt");
    settle().await;
    assert_eq!(
        scheduled_delays(&h.sink.events()),
        vec![(1, Duration::from_secs(10))]
    );

    subscription.unsubscribe();
    tokio::time::sleep(Duration::from_secs(60)).await;

    assert_eq!(
        h.sink.count(|e| matches!(
            e,
            LifecycleEvent::TornDown {
                reason: TeardownReason::GracePeriodExpired,
                ..
            }
        )),
        1
    );
    assert_eq!(h.connector.connects(), 1);
    assert_eq!(connecting_events(&h), 1);
    assert_eq!(h.pool.connection_state("btcusdt"), None);
}
