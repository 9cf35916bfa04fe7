//! Persistence of validator sets, signatures, and proofs.
//!
//! The [Repository] contract is implemented by the embedder; [memory::Memory] is a
//! volatile implementation for tests and simulations.
//!
//! Implementations must report a missing item as [Error::NotFound] and an attempt to
//! overwrite a write-once item as [Error::AlreadyExists], never as [Error::Backend]. The
//! processor relies on this to deduplicate.

use crate::{
    signature_map::SignatureMap,
    types::{AggregationProof, Epoch, RequestId, Signature, SignatureRequest, Validator, ValidatorSet},
};
use relay_cryptography::KeyTag;
use std::{future::Future, sync::Arc};
use thiserror::Error;

pub mod memory;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    #[error("not found")]
    NotFound,
    #[error("already exists")]
    AlreadyExists,
    #[error("backend failure: {0}")]
    Backend(String),
}

/// Storage used by the processor and the recovery server.
pub trait Repository: Clone + Send + Sync + 'static {
    fn validator_set(
        &self,
        epoch: Epoch,
    ) -> impl Future<Output = Result<Arc<ValidatorSet>, Error>> + Send;

    /// The most recent epoch with a stored validator set.
    fn latest_epoch(&self) -> impl Future<Output = Result<Epoch, Error>> + Send;

    /// Finds the validator that registered `on_chain` under `key_tag` in `epoch`, returning
    /// its index in the validator set.
    fn validator_by_key(
        &self,
        epoch: Epoch,
        key_tag: KeyTag,
        on_chain: &[u8],
    ) -> impl Future<Output = Result<(u32, Validator), Error>> + Send;

    fn signature(
        &self,
        request_id: RequestId,
        index: u32,
    ) -> impl Future<Output = Result<Signature, Error>> + Send;

    /// All stored signatures for `request_id` by validator index (empty if none).
    fn signatures(
        &self,
        request_id: RequestId,
    ) -> impl Future<Output = Result<Vec<(u32, Signature)>, Error>> + Send;

    /// Stores the signature of validator `index`. Write-once.
    fn save_signature(
        &self,
        index: u32,
        signature: &Signature,
    ) -> impl Future<Output = Result<(), Error>> + Send;

    fn signature_map(
        &self,
        request_id: RequestId,
    ) -> impl Future<Output = Result<SignatureMap, Error>> + Send;

    /// Stores `map`, replacing any previous version.
    fn save_signature_map(&self, map: &SignatureMap)
        -> impl Future<Output = Result<(), Error>> + Send;

    /// Records a request the first time a signature for it is seen. Write-once.
    fn save_signature_request(
        &self,
        request: &SignatureRequest,
    ) -> impl Future<Output = Result<(), Error>> + Send;

    fn signature_request(
        &self,
        request_id: RequestId,
    ) -> impl Future<Output = Result<SignatureRequest, Error>> + Send;

    /// Requests from `min_epoch` onward that have no proof yet, oldest epoch first.
    fn pending_requests(
        &self,
        min_epoch: Epoch,
        limit: usize,
    ) -> impl Future<Output = Result<Vec<SignatureRequest>, Error>> + Send;

    fn aggregation_proof(
        &self,
        request_id: RequestId,
    ) -> impl Future<Output = Result<AggregationProof, Error>> + Send;

    /// Stores a proof. Write-once: the first proof for a request wins.
    fn save_aggregation_proof(
        &self,
        proof: &AggregationProof,
    ) -> impl Future<Output = Result<(), Error>> + Send;
}
