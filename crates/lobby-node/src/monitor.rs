use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::state::AppState;

/// Periodic lobby heartbeat and execution-node timeout sweep.
pub fn spawn_node_monitor(state: AppState, shutdown: CancellationToken) -> JoinHandle<()> {
    let period = state.config.monitor_interval();

    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick completes immediately.
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {},
            }

            let evicted = {
                let mut lobby = state.lobby.write().await;
                lobby.heartbeat();
                lobby.check_timeouts()
            };
            if !evicted.is_empty() {
                tracing::info!(count = evicted.len(), "Execution nodes evicted");
            }
        }
        tracing::info!("Node monitor stopped");
    })
}
