//! Background task that drains the queue when connectivity returns.

use crate::config::SyncConfig;
use crate::connectivity::ConnectivityMonitor;
use crate::endpoint::RemoteEndpoint;
use crate::engine::SyncEngine;
use offsync_storage::KvStore;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tokio::time::{Instant, Interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

/// Spawns the auto-sync task.
///
/// The task wakes on every reconnect edge from `monitor` and, when
/// `config.sync_interval` is set and non-zero, periodically. Each wake-up drains the queue
/// if the endpoint is reachable and something is pending; a wake-up while a
/// pass is already running is dropped. The task exits when `cancel` fires,
/// cancelling the running pass at its next record or backoff.
pub fn spawn_auto_sync<P, S, E>(
    engine: Arc<SyncEngine<P, S, E>>,
    monitor: Arc<ConnectivityMonitor>,
    config: &SyncConfig,
    cancel: CancellationToken,
) -> JoinHandle<()>
where
    P: Serialize + DeserializeOwned + Send + Sync + 'static,
    S: KvStore + 'static,
    E: RemoteEndpoint<P> + 'static,
{
    // Subscribe before spawning so no edge between now and the first poll is lost.
    let mut reconnects = monitor.reconnect_events();
    let mut ticker = config.sync_interval.filter(|p| !p.is_zero()).map(|period| {
        let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        ticker
    });

    tokio::spawn(async move {
        loop {
            let trigger = tokio::select! {
                biased;
                () = cancel.cancelled() => break,
                event = reconnects.recv() => match event {
                    Ok(_) => "reconnect",
                    Err(RecvError::Lagged(missed)) => {
                        tracing::debug!(missed, "reconnect events lagged");
                        "reconnect"
                    }
                    Err(RecvError::Closed) => break,
                },
                () = next_tick(&mut ticker) => "interval",
            };

            if !monitor.is_reachable() {
                continue;
            }

            match engine.pending_count() {
                Ok(0) => continue,
                Ok(pending) => tracing::debug!(trigger, pending, "auto-sync triggered"),
                Err(e) => {
                    tracing::warn!(error = %e, "cannot count pending writes");
                    continue;
                }
            }

            if let Some(outcome) = engine.try_drain(&cancel, None).await {
                tracing::info!(
                    trigger,
                    synced = outcome.synced,
                    failed = outcome.failed,
                    "auto-sync pass complete"
                );
            }
        }

        tracing::debug!("auto-sync stopped");
    })
}

async fn next_tick(ticker: &mut Option<Interval>) {
    match ticker {
        Some(ticker) => {
            ticker.tick().await;
        }
        None => std::future::pending().await,
    }
}
