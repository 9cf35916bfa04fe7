use crate::Channel;
use prometheus_client::{
    encoding::{EncodeLabelSet, EncodeLabelValue},
    metrics::{counter::Counter, family::Family},
    registry::Registry,
};

/// What happened to a message sent to one recipient.
#[derive(Clone, Copy, Debug, Hash, PartialEq, Eq, EncodeLabelValue)]
pub enum Outcome {
    Delivered,
    /// The link dropped it.
    Lost,
    /// The recipient stopped reading.
    Closed,
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct ChannelLabel {
    pub channel: Channel,
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct OutcomeLabel {
    pub channel: Channel,
    pub outcome: Outcome,
}

#[derive(Clone, Default)]
pub struct Metrics {
    /// Messages put on a link, per recipient
    pub sent: Family<ChannelLabel, Counter>,
    /// Messages that left a link, by outcome
    pub outcomes: Family<OutcomeLabel, Counter>,
}

impl Metrics {
    pub fn init(registry: &mut Registry) -> Self {
        let metrics = Self::default();
        registry.register(
            "messages_sent",
            "Messages put on a link",
            metrics.sent.clone(),
        );
        registry.register(
            "messages_outcome",
            "Messages that left a link, by outcome",
            metrics.outcomes.clone(),
        );
        metrics
    }

    pub fn sent(&self, channel: Channel) {
        self.sent.get_or_create(&ChannelLabel { channel }).inc();
    }

    pub fn outcome(&self, channel: Channel, outcome: Outcome) {
        self.outcomes
            .get_or_create(&OutcomeLabel { channel, outcome })
            .inc();
    }
}
