use prometheus_client::{
    encoding::{EncodeLabelSet, EncodeLabelValue},
    metrics::{counter::Counter, family::Family},
    registry::Registry,
};

/// Result of a recovery round.
#[derive(Clone, Copy, Debug, Hash, PartialEq, Eq, EncodeLabelValue)]
pub enum Round {
    /// No peer was connected.
    Skipped,
    /// Nothing was missing.
    Idle,
    Completed,
    Timeout,
    Failed,
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct RoundLabel {
    pub outcome: Round,
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelValue)]
pub enum Entity {
    Signature,
    Proof,
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct EntityLabel {
    pub entity: Entity,
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelValue)]
pub enum Serve {
    Served,
    RateLimited,
    Failed,
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct ServeLabel {
    pub status: Serve,
}

/// Metrics for the [Engine](super::Engine)
#[derive(Default)]
pub struct Metrics {
    /// Number of rounds by outcome
    pub rounds: Family<RoundLabel, Counter>,
    /// Number of items recovered (accepted by the processor)
    pub recovered: Family<EntityLabel, Counter>,
    /// Number of requests served by status
    pub served: Family<ServeLabel, Counter>,
    /// Number of undecodable messages
    pub malformed: Counter,
}

impl Metrics {
    pub fn init(registry: &mut Registry) -> Self {
        let metrics = Self::default();
        registry.register(
            "rounds",
            "Number of rounds by outcome",
            metrics.rounds.clone(),
        );
        registry.register(
            "recovered",
            "Number of items recovered",
            metrics.recovered.clone(),
        );
        registry.register(
            "served",
            "Number of requests served by status",
            metrics.served.clone(),
        );
        registry.register(
            "malformed",
            "Number of undecodable messages",
            metrics.malformed.clone(),
        );
        metrics
    }

    pub fn round(&self, outcome: Round) {
        self.rounds.get_or_create(&RoundLabel { outcome }).inc();
    }

    pub fn recovered(&self, entity: Entity) {
        self.recovered.get_or_create(&EntityLabel { entity }).inc();
    }

    pub fn served(&self, status: Serve) {
        self.served.get_or_create(&ServeLabel { status }).inc();
    }
}
