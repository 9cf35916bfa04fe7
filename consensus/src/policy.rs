//! Decide when accumulated signatures should be turned into a proof.

use crate::{signature_map::SignatureMap, types::ValidatorSet};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Decides whether a request is ready for aggregation.
///
/// Implementations must be pure: the answer depends only on the inputs.
pub trait Policy: Send + Sync + 'static {
    fn should_aggregate(&self, map: &SignatureMap, set: &ValidatorSet) -> bool;
}

/// Aggregate as soon as the quorum threshold is reached.
#[derive(Clone, Copy, Debug, Default)]
pub struct LowLatency;

impl Policy for LowLatency {
    fn should_aggregate(&self, map: &SignatureMap, set: &ValidatorSet) -> bool {
        map.threshold_reached(set.quorum_threshold())
    }
}

/// Aggregate once the quorum threshold is reached and at most `max_unsigners` active
/// validators have not signed.
///
/// Simple proofs get cheaper to verify on chain as fewer non-signers must be listed.
#[derive(Clone, Copy, Debug)]
pub struct LowCost {
    pub max_unsigners: u32,
}

impl Policy for LowCost {
    fn should_aggregate(&self, map: &SignatureMap, set: &ValidatorSet) -> bool {
        if !map.threshold_reached(set.quorum_threshold()) {
            return false;
        }
        // Inactive signers (possible through local submissions) do not reduce the count.
        let signed = map
            .signed()
            .iter()
            .filter(|index| set.validator(*index).is_some_and(|v| v.is_active))
            .count();
        let signed = u32::try_from(signed).unwrap_or(u32::MAX);
        let unsigners = set.active_count().saturating_sub(signed);
        unsigners <= self.max_unsigners
    }
}

/// Policy selection as written in node configuration.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Config {
    LowLatency,
    LowCost { max_unsigners: u32 },
}

impl Default for Config {
    fn default() -> Self {
        Self::LowLatency
    }
}

impl Config {
    pub fn build(&self) -> Arc<dyn Policy> {
        match self {
            Self::LowLatency => Arc::new(LowLatency),
            Self::LowCost { max_unsigners } => Arc::new(LowCost {
                max_unsigners: *max_unsigners,
            }),
        }
    }
}
