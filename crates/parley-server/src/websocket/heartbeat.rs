//! Heartbeat liveness monitoring.
//!
//! One task probes every connection on a fixed interval. A connection that
//! has not shown any traffic since the previous probe is reaped on the next
//! tick, so a dead socket lingers for at most two intervals.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::{self, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::broadcast::Hub;

/// Totals accumulated by [`run_heartbeat`] before it was cancelled.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct HeartbeatStats {
    /// Sweeps performed.
    pub sweeps: u64,
    /// Connections reaped across all sweeps.
    pub reaped: u64,
}

/// Run heartbeat sweeps until `cancel` fires.
pub async fn run_heartbeat(
    hub: Arc<Hub>,
    interval: Duration,
    cancel: CancellationToken,
) -> HeartbeatStats {
    let mut ticker = time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // Skip the immediate first tick
    let _ = ticker.tick().await;

    let mut stats = HeartbeatStats::default();
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let sweep = hub.sweep_heartbeat();
                stats.sweeps += 1;
                stats.reaped += sweep.reaped.len() as u64;
                debug!(probed = sweep.probed, reaped = sweep.reaped.len(), "heartbeat sweep");
            }
            () = cancel.cancelled() => {
                debug!(sweeps = stats.sweeps, "heartbeat stopped");
                return stats;
            }
        }
    }
}
