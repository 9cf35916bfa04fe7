//! Local roles built on the processor: signing and aggregating.

use crate::types::{AggregationProof, Signature};
use std::future::Future;

pub mod aggregator;
pub mod signer;

/// Sends locally produced items to peers.
pub trait Broadcaster: Clone + Send + Sync + 'static {
    /// Gossips a signature on the signature topic.
    fn broadcast_signature(&mut self, signature: Signature) -> impl Future<Output = ()> + Send;

    /// Gossips a proof on the proof topic.
    fn broadcast_proof(&mut self, proof: AggregationProof) -> impl Future<Output = ()> + Send;
}
