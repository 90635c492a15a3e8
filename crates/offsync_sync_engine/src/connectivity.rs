//! Reachability tracking with edge-triggered reconnect events.
//!
//! The monitor is fed by whatever signal the platform offers, through
//! [`ConnectivityMonitor::set_reachable`] or a [`ReachabilityProbe`] polled by
//! [`spawn_probe_loop`]. It is advisory only: the drain engine still treats
//! every failed write as a failure to retry.

use crate::listeners::{Registry, Subscription};
use async_trait::async_trait;
use offsync_core::now_millis;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

const EVENT_CAPACITY: usize = 16;

/// Shortest interval accepted by [`spawn_probe_loop`].
pub const MIN_PROBE_INTERVAL: Duration = Duration::from_millis(100);

/// Emitted on each unreachable to reachable transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectEvent {
    /// When reachability came back (unix millis).
    pub at: u64,
    /// How long the link was down, in millis.
    pub offline_for_ms: u64,
}

struct LinkState {
    reachable: bool,
    was_unreachable: bool,
    offline_since: u64,
}

/// Tracks whether the remote endpoint is believed reachable.
pub struct ConnectivityMonitor {
    state: Mutex<LinkState>,
    changes: Registry<bool>,
    reconnects: Registry<ReconnectEvent>,
    reconnect_tx: broadcast::Sender<ReconnectEvent>,
}

impl ConnectivityMonitor {
    /// Creates a monitor. Starting unreachable arms the first reconnect event.
    pub fn new(initially_reachable: bool) -> Self {
        let (reconnect_tx, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            state: Mutex::new(LinkState {
                reachable: initially_reachable,
                was_unreachable: !initially_reachable,
                offline_since: now_millis(),
            }),
            changes: Registry::new(),
            reconnects: Registry::new(),
            reconnect_tx,
        }
    }

    /// Returns the current reachability.
    pub fn is_reachable(&self) -> bool {
        self.state.lock().reachable
    }

    /// Records a reachability signal. Returns true if the value changed.
    ///
    /// Change subscribers fire on every change; reconnect subscribers and
    /// [`ConnectivityMonitor::reconnect_events`] only when reachability
    /// returns after having been lost.
    pub fn set_reachable(&self, reachable: bool) -> bool {
        let reconnect = {
            let mut state = self.state.lock();
            if state.reachable == reachable {
                return false;
            }
            state.reachable = reachable;

            if !reachable {
                state.was_unreachable = true;
                state.offline_since = now_millis();
                None
            } else if state.was_unreachable {
                state.was_unreachable = false;
                let at = now_millis();
                Some(ReconnectEvent {
                    at,
                    offline_for_ms: at.saturating_sub(state.offline_since),
                })
            } else {
                None
            }
        };

        if reachable {
            tracing::info!("endpoint reachable");
        } else {
            tracing::info!("endpoint unreachable");
        }

        self.changes.emit(&reachable);
        if let Some(event) = reconnect {
            tracing::debug!(offline_for_ms = event.offline_for_ms, "reconnected");
            self.reconnects.emit(&event);
            // No receivers is fine.
            let _ = self.reconnect_tx.send(event);
        }
        true
    }

    /// Calls `callback` with the new value on every reachability change.
    pub fn subscribe(&self, callback: impl Fn(bool) + Send + Sync + 'static) -> Subscription {
        self.changes.add(callback)
    }

    /// Calls `callback` on each unreachable to reachable transition.
    pub fn on_reconnect(
        &self,
        callback: impl Fn(ReconnectEvent) + Send + Sync + 'static,
    ) -> Subscription {
        self.reconnects.add(callback)
    }

    /// Receiver of reconnect events for async consumers.
    pub fn reconnect_events(&self) -> broadcast::Receiver<ReconnectEvent> {
        self.reconnect_tx.subscribe()
    }

    /// Number of registered callbacks, change and reconnect combined.
    pub fn subscriber_count(&self) -> usize {
        self.changes.len() + self.reconnects.len()
    }
}

impl Default for ConnectivityMonitor {
    fn default() -> Self {
        Self::new(true)
    }
}

/// An active reachability check, for platforms without a push signal.
#[async_trait]
pub trait ReachabilityProbe: Send + Sync {
    /// Returns true if the remote endpoint answered.
    async fn probe(&self) -> bool;
}

/// Polls `probe` every `interval` and feeds the result into `monitor` until
/// `cancel` fires. The first probe runs immediately. Intervals below
/// [`MIN_PROBE_INTERVAL`] are raised to it.
pub fn spawn_probe_loop<R>(
    monitor: Arc<ConnectivityMonitor>,
    probe: Arc<R>,
    interval: Duration,
    cancel: CancellationToken,
) -> JoinHandle<()>
where
    R: ReachabilityProbe + ?Sized + 'static,
{
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval.max(MIN_PROBE_INTERVAL));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                () = cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }

            let reachable = tokio::select! {
                biased;
                () = cancel.cancelled() => break,
                reachable = probe.probe() => reachable,
            };
            monitor.set_reachable(reachable);
        }

        tracing::debug!("probe loop stopped");
    })
}
