//! Turn individual signatures into a proof of quorum, and verify such proofs.
//!
//! The [Aggregator] trait hides the proof system. [simple::Simple] sums the signatures and
//! public keys of the signers; other backends (such as a zero-knowledge circuit) can be
//! added to a [Registry] by the embedder and are selected by [VerificationType].

use crate::types::{AggregationProof, ExtraData, Signature, ValidatorSet, VerificationType, VotingPower};
use relay_cryptography::KeyTag;
use relay_utils::codec;
use std::{collections::HashMap, sync::Arc};
use thiserror::Error;

pub mod simple;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    #[error("no valid signatures")]
    NoSignatures,
    #[error("quorum not reached: {have} < {need}")]
    QuorumNotReached {
        have: VotingPower,
        need: VotingPower,
    },
    #[error("signer {0} is not an eligible validator")]
    IneligibleSigner(u32),
    #[error("aggregate public key does not match signers")]
    KeyMismatch,
    #[error("proof is for epoch {proof}, validator set is for epoch {set}")]
    EpochMismatch { proof: u64, set: u64 },
    #[error("proof key tag does not match")]
    KeyTagMismatch,
    #[error("wrong verification type: {0:?}")]
    VerificationTypeMismatch(VerificationType),
    #[error("malformed proof: {0}")]
    Codec(#[from] codec::Error),
    #[error(transparent)]
    Crypto(#[from] relay_cryptography::Error),
}

/// Produces and checks proofs that a quorum of validators signed a message hash.
pub trait Aggregator: Send + Sync + 'static {
    /// The proof system implemented.
    fn verification_type(&self) -> VerificationType;

    /// Builds a proof from `signatures` over `message_hash`.
    ///
    /// Signatures from unknown or ineligible validators and repeated signers are ignored.
    /// Fails if the remaining signers do not reach the quorum threshold.
    fn aggregate(
        &self,
        set: &ValidatorSet,
        key_tag: KeyTag,
        message_hash: &[u8],
        signatures: &[Signature],
    ) -> Result<AggregationProof, Error>;

    /// Checks that `proof` shows a quorum of `set` signed under `key_tag`.
    fn verify(
        &self,
        set: &ValidatorSet,
        key_tag: KeyTag,
        proof: &AggregationProof,
    ) -> Result<(), Error>;

    /// Values the settlement contracts need to verify proofs for `set`.
    fn generate_extra_data(
        &self,
        set: &ValidatorSet,
        key_tags: &[KeyTag],
    ) -> Result<Vec<ExtraData>, Error>;
}

/// Available [Aggregator]s by [VerificationType].
#[derive(Clone)]
pub struct Registry {
    aggregators: HashMap<VerificationType, Arc<dyn Aggregator>>,
}

impl Registry {
    /// Creates a registry holding only the [simple::Simple] aggregator.
    pub fn new() -> Self {
        let mut registry = Self {
            aggregators: HashMap::new(),
        };
        registry.register(Arc::new(simple::Simple::default()));
        registry
    }

    /// Adds `aggregator`, replacing any previous one for the same verification type.
    pub fn register(&mut self, aggregator: Arc<dyn Aggregator>) {
        self.aggregators
            .insert(aggregator.verification_type(), aggregator);
    }

    pub fn get(&self, verification_type: VerificationType) -> Option<&Arc<dyn Aggregator>> {
        self.aggregators.get(&verification_type)
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registry_defaults() {
        let registry = Registry::default();
        let simple = registry.get(VerificationType::Simple).unwrap();
        assert_eq!(simple.verification_type(), VerificationType::Simple);
        assert!(registry.get(VerificationType::Zk).is_none());
    }
}
