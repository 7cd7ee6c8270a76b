//! Connectivity monitor behavior: verified probes, settle delay, nudges.

use std::sync::Arc;
use std::time::Duration;

use opsdesk_sync::remote::mock::MockRemote;
use opsdesk_sync::{ConnectivityMonitor, EventBus, SyncConfig, SyncEvent};
use tokio::sync::mpsc;

fn make_monitor(
    remote: &MockRemote,
    events: &EventBus,
) -> (ConnectivityMonitor, mpsc::Receiver<()>) {
    let config = SyncConfig {
        settle_delay: Duration::from_secs(2),
        ..SyncConfig::default()
    };
    ConnectivityMonitor::new(Arc::new(remote.clone()), &config, events.clone())
}

#[tokio::test(start_paused = true)]
async fn monitor_starts_offline() {
    let remote = MockRemote::new();
    let (monitor, _nudges) = make_monitor(&remote, &EventBus::default());

    assert!(!monitor.is_online());
}

#[tokio::test(start_paused = true)]
async fn successful_probe_brings_the_monitor_online() {
    let remote = MockRemote::new();
    let (monitor, _nudges) = make_monitor(&remote, &EventBus::default());

    monitor.probe_now().await;

    assert!(monitor.is_online());
}

#[tokio::test(start_paused = true)]
async fn unhealthy_database_keeps_the_monitor_offline() {
    let remote = MockRemote::new();
    // The service answers but reports its own database as down.
    remote.set_database_ok(false);
    let (monitor, _nudges) = make_monitor(&remote, &EventBus::default());

    monitor.probe_now().await;

    assert!(!monitor.is_online());
}

#[tokio::test(start_paused = true)]
async fn unreachable_remote_keeps_the_monitor_offline() {
    let remote = MockRemote::new();
    remote.set_reachable(false);
    let (monitor, _nudges) = make_monitor(&remote, &EventBus::default());

    monitor.probe_now().await;

    assert!(!monitor.is_online());
}

#[tokio::test(start_paused = true)]
async fn network_loss_takes_effect_immediately() {
    let remote = MockRemote::new();
    let (monitor, _nudges) = make_monitor(&remote, &EventBus::default());
    monitor.probe_now().await;
    assert!(monitor.is_online());

    monitor.set_network_available(false).await;

    assert!(!monitor.is_online());
}

#[tokio::test(start_paused = true)]
async fn network_return_is_verified_before_being_trusted() {
    let remote = MockRemote::new();
    let (monitor, _nudges) = make_monitor(&remote, &EventBus::default());
    monitor.set_network_available(false).await;
    remote.set_database_ok(false);

    // The platform says the network is back, but the backend is not ready.
    monitor.set_network_available(true).await;
    assert!(!monitor.is_online());

    remote.set_database_ok(true);
    monitor.set_network_available(true).await;
    assert!(monitor.is_online());
}

#[tokio::test(start_paused = true)]
async fn settle_delay_defers_the_online_verdict() {
    let remote = MockRemote::new();
    let (monitor, _nudges) = make_monitor(&remote, &EventBus::default());

    let probe = {
        let monitor = monitor.clone();
        tokio::spawn(async move { monitor.probe_now().await })
    };
    tokio::task::yield_now().await;

    // 1.9 s into a 2 s settle window: still offline.
    tokio::time::advance(Duration::from_millis(1900)).await;
    assert!(!monitor.is_online());

    tokio::time::advance(Duration::from_millis(200)).await;
    probe.await.unwrap();
    assert!(monitor.is_online());
}

#[tokio::test(start_paused = true)]
async fn network_drop_during_settle_cancels_the_online_verdict() {
    let remote = MockRemote::new();
    let (monitor, _nudges) = make_monitor(&remote, &EventBus::default());

    let probe = {
        let monitor = monitor.clone();
        tokio::spawn(async move { monitor.probe_now().await })
    };
    tokio::task::yield_now().await;

    // The link flaps again before the settle window closes.
    monitor.set_network_available(false).await;
    probe.await.unwrap();

    assert!(!monitor.is_online());
}

#[tokio::test(start_paused = true)]
async fn reconnect_sends_exactly_one_nudge() {
    let remote = MockRemote::new();
    let (monitor, mut nudges) = make_monitor(&remote, &EventBus::default());

    monitor.probe_now().await;
    assert!(monitor.is_online());

    nudges.try_recv().expect("one nudge after the transition");
    assert!(nudges.try_recv().is_err());

    // Staying online produces no further nudges.
    monitor.probe_now().await;
    assert!(nudges.try_recv().is_err());

    // A full offline/online round trip produces exactly one more.
    monitor.set_network_available(false).await;
    monitor.set_network_available(true).await;
    nudges.try_recv().expect("one nudge after the second transition");
    assert!(nudges.try_recv().is_err());
}

#[tokio::test(start_paused = true)]
async fn undelivered_nudges_coalesce() {
    let remote = MockRemote::new();
    let (monitor, mut nudges) = make_monitor(&remote, &EventBus::default());

    // Two transitions with nobody draining the channel.
    monitor.probe_now().await;
    monitor.set_network_available(false).await;
    monitor.set_network_available(true).await;

    nudges.try_recv().expect("coalesced nudge");
    assert!(nudges.try_recv().is_err());
}

#[tokio::test(start_paused = true)]
async fn transitions_publish_connectivity_events() {
    let remote = MockRemote::new();
    let events = EventBus::default();
    let (monitor, _nudges) = make_monitor(&remote, &events);
    let mut rx = events.subscribe();

    monitor.probe_now().await;
    monitor.set_network_available(false).await;

    match rx.recv().await.unwrap() {
        SyncEvent::ConnectivityChanged { online } => assert!(online),
        other => panic!("expected ConnectivityChanged, got {other:?}"),
    }
    match rx.recv().await.unwrap() {
        SyncEvent::ConnectivityChanged { online } => assert!(!online),
        other => panic!("expected ConnectivityChanged, got {other:?}"),
    }
}

#[tokio::test(start_paused = true)]
async fn repeated_probes_do_not_republish_the_same_verdict() {
    let remote = MockRemote::new();
    let events = EventBus::default();
    let (monitor, _nudges) = make_monitor(&remote, &events);

    monitor.probe_now().await;
    let mut rx = events.subscribe();
    monitor.probe_now().await;
    monitor.probe_now().await;

    assert!(rx.try_recv().is_err());
}
