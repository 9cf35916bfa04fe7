use prometheus_client::{
    encoding::{EncodeLabelSet, EncodeLabelValue},
    metrics::{counter::Counter, family::Family},
    registry::Registry,
};

#[derive(Clone, Copy, Debug, Hash, PartialEq, Eq, EncodeLabelValue)]
pub enum Topic {
    Signatures,
    Proofs,
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelValue)]
pub enum Status {
    /// Handed to the transport (published) or to the worker pool (received).
    Success,
    /// The transport refused the message.
    Failure,
    /// Larger than the largest envelope.
    Oversized,
    /// Undecodable envelope or payload, or a field over its limit.
    Malformed,
    /// The envelope names a sender other than the authenticated peer.
    Spoofed,
    /// The worker pool had no room.
    Dropped,
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct Label {
    pub topic: Topic,
    pub status: Status,
}

impl Label {
    pub fn new(topic: Topic, status: Status) -> Self {
        Self { topic, status }
    }
}

/// Metrics for the [Engine](super::Engine)
#[derive(Default)]
pub struct Metrics {
    /// Number of published messages by status
    pub published: Family<Label, Counter>,
    /// Number of received messages by status
    pub received: Family<Label, Counter>,
}

impl Metrics {
    pub fn init(registry: &mut Registry) -> Self {
        let metrics = Self::default();
        registry.register(
            "published",
            "Number of published messages by status",
            metrics.published.clone(),
        );
        registry.register(
            "received",
            "Number of received messages by status",
            metrics.received.clone(),
        );
        metrics
    }

    pub fn publish(&self, topic: Topic, status: Status) {
        self.published.get_or_create(&Label::new(topic, status)).inc();
    }

    pub fn receive(&self, topic: Topic, status: Status) {
        self.received.get_or_create(&Label::new(topic, status)).inc();
    }
}
