//! Connectivity monitoring.
//!
//! The monitor owns the engine's single source of truth for "are we
//! online": a `watch` channel that flips only on real transitions. A
//! device is online when the platform reports a network *and* the remote
//! service answers its health probe with a healthy database. Browser-style
//! online flags alone are not trusted; a captive portal or a dead backend
//! database keeps the engine offline.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info};

use crate::config::SyncConfig;
use crate::events::{EventBus, SyncEvent};
use crate::remote::RemoteService;

/// Watches connectivity and nudges the service loop when it returns.
#[derive(Clone)]
pub struct ConnectivityMonitor {
    inner: Arc<MonitorInner>,
}

struct MonitorInner {
    online_tx: watch::Sender<bool>,
    network_available: AtomicBool,
    remote: Arc<dyn RemoteService>,
    probe_interval: Duration,
    settle_delay: Duration,
    nudges: mpsc::Sender<()>,
    events: EventBus,
    // Serializes transitions so a drop during the settle window wins.
    transition: tokio::sync::Mutex<()>,
}

impl ConnectivityMonitor {
    /// Creates the monitor and the nudge receiver the service loop
    /// listens on. The monitor starts offline until a probe succeeds.
    pub fn new(
        remote: Arc<dyn RemoteService>,
        config: &SyncConfig,
        events: EventBus,
    ) -> (Self, mpsc::Receiver<()>) {
        let (online_tx, _) = watch::channel(false);
        // Capacity 1: a pending nudge coalesces with the next one.
        let (nudge_tx, nudge_rx) = mpsc::channel(1);
        let inner = Arc::new(MonitorInner {
            online_tx,
            network_available: AtomicBool::new(true),
            remote,
            probe_interval: config.probe_interval,
            settle_delay: config.settle_delay,
            nudges: nudge_tx,
            events,
            transition: tokio::sync::Mutex::new(()),
        });
        (Self { inner }, nudge_rx)
    }

    /// Spawns the background probe loop. The first probe runs immediately.
    pub fn spawn_probe_loop(&self) -> JoinHandle<()> {
        let inner = self.inner.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(inner.probe_interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                inner.probe_once().await;
            }
        })
    }

    /// Runs a single probe right now, outside the regular cadence.
    pub async fn probe_now(&self) {
        self.inner.probe_once().await;
    }

    /// Current verdict without waiting for anything.
    pub fn is_online(&self) -> bool {
        *self.inner.online_tx.borrow()
    }

    /// Subscribes to connectivity transitions.
    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.inner.online_tx.subscribe()
    }

    /// Feeds a platform network event into the monitor.
    ///
    /// `false` takes effect immediately; `true` is verified with a probe
    /// before the engine believes it.
    pub async fn set_network_available(&self, available: bool) {
        self.inner
            .network_available
            .store(available, Ordering::SeqCst);
        if available {
            self.inner.probe_once().await;
        } else {
            self.inner.publish(false).await;
        }
    }
}

impl MonitorInner {
    async fn probe_once(&self) {
        let online = if !self.network_available.load(Ordering::SeqCst) {
            false
        } else {
            match self.remote.health().await {
                Ok(status) => status.is_healthy(),
                Err(e) => {
                    debug!("health probe failed: {e}");
                    false
                }
            }
        };
        self.publish(online).await;
    }

    async fn publish(&self, online: bool) {
        let _guard = self.transition.lock().await;
        if *self.online_tx.borrow() == online {
            return;
        }
        if online {
            // Connections flap when they first come back. Let the link
            // settle, and bail if the network dropped again meanwhile.
            tokio::time::sleep(self.settle_delay).await;
            if !self.network_available.load(Ordering::SeqCst) {
                return;
            }
            self.online_tx.send_replace(true);
            self.events
                .publish(SyncEvent::ConnectivityChanged { online: true });
            info!("connectivity restored, sync window open");
            // At most one nudge per offline-to-online transition.
            let _ = self.nudges.try_send(());
        } else {
            self.online_tx.send_replace(false);
            self.events
                .publish(SyncEvent::ConnectivityChanged { online: false });
            info!("connectivity lost, queueing local changes");
        }
    }
}
