use tokio::sync::broadcast;

use lobby_core::net::bus::BusEnvelope;
use lobby_core::net::protocol::ProtocolError;

/// Default capacity of the in-process bus channel.
const DEFAULT_BUS_CAPACITY: usize = 1024;

#[derive(Debug)]
pub enum BusError {
    /// The transport is shut down and accepts no more records.
    Closed,
    Encode(ProtocolError),
    /// The networked transport could not be reached or subscribed.
    Connect(String),
}

impl std::fmt::Display for BusError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Closed => write!(f, "bus closed"),
            Self::Encode(e) => write!(f, "failed to encode bus record: {e}"),
            Self::Connect(e) => write!(f, "bus connection failed: {e}"),
        }
    }
}

impl std::error::Error for BusError {}

impl From<ProtocolError> for BusError {
    fn from(e: ProtocolError) -> Self {
        Self::Encode(e)
    }
}

/// Topic-addressed publish/subscribe transport shared by every lobby node.
///
/// Implementations deliver each published record to every subscriber, including
/// subscribers in the publishing process. Echo suppression is the subscriber's job.
pub trait MessageBus: Send + Sync {
    fn publish(&self, envelope: BusEnvelope) -> Result<(), BusError>;

    /// Receive every record published after this call.
    fn subscribe(&self) -> broadcast::Receiver<BusEnvelope>;
}

/// In-process bus backed by a tokio broadcast channel. Several lobby nodes in one
/// process (tests, single-host deployments) share one `LocalBus` to replicate.
pub struct LocalBus {
    tx: broadcast::Sender<BusEnvelope>,
}

impl Default for LocalBus {
    fn default() -> Self {
        Self::new()
    }
}

impl LocalBus {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_BUS_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl MessageBus for LocalBus {
    fn publish(&self, envelope: BusEnvelope) -> Result<(), BusError> {
        // No subscribers is not an error: there is nobody to converge with.
        if self.tx.send(envelope).is_err() {
            tracing::debug!("Bus record dropped, no subscribers");
        }
        Ok(())
    }

    fn subscribe(&self) -> broadcast::Receiver<BusEnvelope> {
        self.tx.subscribe()
    }
}
