use tokio::task::JoinHandle;
use tokio_stream::StreamExt;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;
use tokio_util::sync::CancellationToken;

use crate::state::AppState;

/// Background task that applies every bus record to the local replica and
/// delivers the resulting notifications to this node's clients.
///
/// The subscription is taken before this returns, so records published after the
/// call are never missed.
pub fn spawn_replication(state: AppState, shutdown: CancellationToken) -> JoinHandle<()> {
    let mut records = BroadcastStream::new(state.bus.subscribe());

    tokio::spawn(async move {
        loop {
            let next = tokio::select! {
                _ = shutdown.cancelled() => break,
                next = records.next() => next,
            };
            let envelope = match next {
                Some(Ok(envelope)) => envelope,
                Some(Err(BroadcastStreamRecvError::Lagged(n))) => {
                    tracing::warn!("Replication subscriber lagged by {n} records");
                    continue;
                },
                None => {
                    tracing::info!("Bus closed, stopping replication");
                    break;
                },
            };

            let outbound = {
                let mut lobby = state.lobby.write().await;
                lobby.apply(&envelope)
            };
            if !outbound.is_empty() {
                state.hub.read().await.deliver(&outbound);
            }
        }
    })
}
