use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::services::security::SecurityManager;

/// Spawns the periodic sweep of expired security sessions.
///
/// The task runs until `shutdown` is cancelled.
///
/// # Arguments
///
/// * `manager` - The security service to sweep.
/// * `period` - Time between sweeps.
/// * `shutdown` - Cancelled when the server stops.
pub fn spawn_sweeper(
    manager: Arc<SecurityManager>,
    period: Duration,
    shutdown: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // The first tick completes immediately.
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    tracing::info!("🛑 Session sweeper stopped");
                    break;
                }
                _ = ticker.tick() => {
                    let removed = manager.sweep();
                    tracing::debug!("🧹 Scheduled sweep removed {} sessions", removed);
                }
            }
        }
    })
}
