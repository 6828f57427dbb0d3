//! Periodic liveness sweep over the room registry.

use std::sync::Arc;
use std::time::Duration;

use metrics::counter;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::metrics::CONNECTIONS_EVICTED_TOTAL;
use crate::registry::RoomRegistry;

/// Evict closed connections every `interval` until `token` is cancelled.
pub async fn run_sweep(registry: Arc<RoomRegistry>, interval: Duration, token: CancellationToken) {
    let mut ticker = tokio::time::interval(interval.max(Duration::from_millis(1)));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let _ = ticker.tick().await;

    loop {
        tokio::select! {
            biased;
            () = token.cancelled() => break,
            _ = ticker.tick() => {
                let evicted = registry.sweep_disconnected();
                if evicted.is_empty() {
                    continue;
                }
                counter!(CONNECTIONS_EVICTED_TOTAL).increment(evicted.len() as u64);
                for id in &evicted {
                    info!(conn_id = %id, "evicted disconnected client");
                }
                info!(evicted = evicted.len(), connections = registry.count(), "liveness sweep");
            }
        }
    }
    debug!("liveness sweep stopped");
}
