use crate::{Error, Kind};
use prometheus_client::{
    encoding::{EncodeLabelSet, EncodeLabelValue},
    metrics::{counter::Counter, family::Family},
    registry::Registry,
};

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelValue)]
pub enum Entity {
    Signature,
    Proof,
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelValue)]
pub enum Outcome {
    Processed,
    Duplicate,
    NotFound,
    Invalid,
    Failed,
}

impl<T> From<&Result<T, Error>> for Outcome {
    fn from(result: &Result<T, Error>) -> Self {
        match result {
            Ok(_) => Self::Processed,
            Err(err) => match err.kind() {
                Kind::AlreadyExists => Self::Duplicate,
                Kind::NotFound => Self::NotFound,
                Kind::Invalid => Self::Invalid,
                Kind::Unavailable | Kind::Internal => Self::Failed,
            },
        }
    }
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct Label {
    pub entity: Entity,
    pub outcome: Outcome,
}

/// Metrics for the [Processor](super::Processor).
#[derive(Default)]
pub struct Metrics {
    /// Processed entities by outcome
    pub processed: Family<Label, Counter>,
}

impl Metrics {
    pub fn init(registry: &mut Registry) -> Self {
        let metrics = Self::default();
        registry.register(
            "processed",
            "Processed signatures and proofs by outcome",
            metrics.processed.clone(),
        );
        metrics
    }

    pub fn record<T>(&self, entity: Entity, result: &Result<T, Error>) {
        self.processed
            .get_or_create(&Label {
                entity,
                outcome: result.into(),
            })
            .inc();
    }
}
