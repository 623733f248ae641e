//! NATS transport for deployments with more than one lobby node.
//!
//! Each envelope is published as JSON on `<prefix>.<topic>`. Every node
//! subscribes to `<prefix>.>`; NATS echoes a connection's own publications back
//! to it, which matches the delivery contract of [`MessageBus`].

use bytes::Bytes;
use futures::StreamExt;
use tokio::sync::{broadcast, mpsc};

use lobby_core::net::bus::BusEnvelope;
use lobby_core::net::protocol::ProtocolError;

use crate::bus::{BusError, MessageBus};

pub struct NatsBus {
    outgoing: mpsc::UnboundedSender<(String, Bytes)>,
    incoming: broadcast::Sender<BusEnvelope>,
    prefix: String,
}

impl NatsBus {
    /// Connect, subscribe to the deployment's subjects, and start the publisher
    /// and subscriber tasks. Records published after this returns are delivered.
    pub async fn connect(url: &str, prefix: &str, capacity: usize) -> Result<Self, BusError> {
        let client = async_nats::connect(url)
            .await
            .map_err(|e| BusError::Connect(e.to_string()))?;
        let subscriber = client
            .subscribe(wildcard_subject(prefix))
            .await
            .map_err(|e| BusError::Connect(e.to_string()))?;
        tracing::info!(%url, %prefix, "Connected to NATS bus");

        let (incoming, _) = broadcast::channel(capacity);
        let (outgoing, queued) = mpsc::unbounded_channel();
        tokio::spawn(run_publisher(client, queued));
        tokio::spawn(run_subscriber(subscriber, incoming.clone()));

        Ok(Self {
            outgoing,
            incoming,
            prefix: prefix.to_string(),
        })
    }
}

impl MessageBus for NatsBus {
    fn publish(&self, envelope: BusEnvelope) -> Result<(), BusError> {
        let subject = subject_for(&self.prefix, &envelope.topic);
        let payload = encode_wire(&envelope)?;
        self.outgoing
            .send((subject, payload))
            .map_err(|_| BusError::Closed)
    }

    fn subscribe(&self) -> broadcast::Receiver<BusEnvelope> {
        self.incoming.subscribe()
    }
}

/// Publishes queued records in order; exits once the bus is dropped.
async fn run_publisher(
    client: async_nats::Client,
    mut queued: mpsc::UnboundedReceiver<(String, Bytes)>,
) {
    while let Some((subject, payload)) = queued.recv().await {
        if let Err(e) = client.publish(subject.clone(), payload).await {
            tracing::warn!(%subject, error = %e, "Failed to publish bus record");
        }
    }
    if let Err(e) = client.flush().await {
        tracing::warn!(error = %e, "Failed to flush NATS client");
    }
    tracing::info!("NATS publisher stopped");
}

async fn run_subscriber(
    mut subscriber: async_nats::Subscriber,
    incoming: broadcast::Sender<BusEnvelope>,
) {
    while let Some(message) = subscriber.next().await {
        match decode_wire(&message.payload) {
            Ok(envelope) => {
                if incoming.send(envelope).is_err() {
                    tracing::debug!("Bus record dropped, no subscribers");
                }
            },
            Err(e) => {
                tracing::warn!(subject = %message.subject, error = %e, "Dropping malformed bus record");
            },
        }
    }
    tracing::info!("NATS subscription ended");
}

pub fn subject_for(prefix: &str, topic: &str) -> String {
    format!("{prefix}.{topic}")
}

pub fn wildcard_subject(prefix: &str) -> String {
    format!("{prefix}.>")
}

pub fn encode_wire(envelope: &BusEnvelope) -> Result<Bytes, ProtocolError> {
    serde_json::to_vec(envelope)
        .map(Bytes::from)
        .map_err(|e| ProtocolError::SerializeError(e.to_string()))
}

pub fn decode_wire(payload: &[u8]) -> Result<BusEnvelope, ProtocolError> {
    serde_json::from_slice(payload).map_err(|e| ProtocolError::DeserializeError(e.to_string()))
}
