//! A volatile [Repository] backed by in-memory maps.

use super::{Error, Repository};
use crate::{
    signature_map::SignatureMap,
    types::{AggregationProof, Epoch, RequestId, Signature, SignatureRequest, Validator, ValidatorSet},
};
use relay_cryptography::KeyTag;
use std::{
    collections::{btree_map, hash_map, BTreeMap, HashMap},
    sync::{Arc, Mutex, MutexGuard},
};

#[derive(Default)]
struct State {
    validator_sets: BTreeMap<Epoch, Arc<ValidatorSet>>,
    signatures: HashMap<RequestId, BTreeMap<u32, Signature>>,
    maps: HashMap<RequestId, SignatureMap>,
    requests: HashMap<RequestId, SignatureRequest>,
    proofs: HashMap<RequestId, AggregationProof>,
}

/// Clones share the same underlying state.
#[derive(Clone, Default)]
pub struct Memory {
    state: Arc<Mutex<State>>,
}

impl Memory {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> Result<MutexGuard<'_, State>, Error> {
        self.state
            .lock()
            .map_err(|_| Error::Backend("state lock poisoned".into()))
    }

    /// Stores the validator set for its epoch, replacing any previous one.
    pub fn insert_validator_set(&self, set: ValidatorSet) -> Result<(), Error> {
        self.state()?
            .validator_sets
            .insert(set.epoch(), Arc::new(set));
        Ok(())
    }
}

impl Repository for Memory {
    async fn validator_set(&self, epoch: Epoch) -> Result<Arc<ValidatorSet>, Error> {
        self.state()?
            .validator_sets
            .get(&epoch)
            .cloned()
            .ok_or(Error::NotFound)
    }

    async fn latest_epoch(&self) -> Result<Epoch, Error> {
        self.state()?
            .validator_sets
            .last_key_value()
            .map(|(epoch, _)| *epoch)
            .ok_or(Error::NotFound)
    }

    async fn validator_by_key(
        &self,
        epoch: Epoch,
        key_tag: KeyTag,
        on_chain: &[u8],
    ) -> Result<(u32, Validator), Error> {
        let set = self.validator_set(epoch).await?;
        set.find_by_key(key_tag, on_chain)
            .map(|(index, validator)| (index, validator.clone()))
            .ok_or(Error::NotFound)
    }

    async fn signature(&self, request_id: RequestId, index: u32) -> Result<Signature, Error> {
        self.state()?
            .signatures
            .get(&request_id)
            .and_then(|signatures| signatures.get(&index))
            .cloned()
            .ok_or(Error::NotFound)
    }

    async fn signatures(&self, request_id: RequestId) -> Result<Vec<(u32, Signature)>, Error> {
        Ok(self
            .state()?
            .signatures
            .get(&request_id)
            .map(|signatures| {
                signatures
                    .iter()
                    .map(|(index, signature)| (*index, signature.clone()))
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn save_signature(&self, index: u32, signature: &Signature) -> Result<(), Error> {
        let mut state = self.state()?;
        match state
            .signatures
            .entry(signature.request_id)
            .or_default()
            .entry(index)
        {
            btree_map::Entry::Occupied(_) => Err(Error::AlreadyExists),
            btree_map::Entry::Vacant(entry) => {
                entry.insert(signature.clone());
                Ok(())
            }
        }
    }

    async fn signature_map(&self, request_id: RequestId) -> Result<SignatureMap, Error> {
        self.state()?
            .maps
            .get(&request_id)
            .cloned()
            .ok_or(Error::NotFound)
    }

    async fn save_signature_map(&self, map: &SignatureMap) -> Result<(), Error> {
        self.state()?.maps.insert(map.request_id(), map.clone());
        Ok(())
    }

    async fn save_signature_request(&self, request: &SignatureRequest) -> Result<(), Error> {
        match self.state()?.requests.entry(request.request_id) {
            hash_map::Entry::Occupied(_) => Err(Error::AlreadyExists),
            hash_map::Entry::Vacant(entry) => {
                entry.insert(request.clone());
                Ok(())
            }
        }
    }

    async fn signature_request(&self, request_id: RequestId) -> Result<SignatureRequest, Error> {
        self.state()?
            .requests
            .get(&request_id)
            .cloned()
            .ok_or(Error::NotFound)
    }

    async fn pending_requests(
        &self,
        min_epoch: Epoch,
        limit: usize,
    ) -> Result<Vec<SignatureRequest>, Error> {
        let state = self.state()?;
        let mut pending: Vec<_> = state
            .requests
            .values()
            .filter(|request| request.epoch >= min_epoch)
            .filter(|request| !state.proofs.contains_key(&request.request_id))
            .cloned()
            .collect();
        pending.sort_by(|a, b| (a.epoch, a.request_id).cmp(&(b.epoch, b.request_id)));
        pending.truncate(limit);
        Ok(pending)
    }

    async fn aggregation_proof(&self, request_id: RequestId) -> Result<AggregationProof, Error> {
        self.state()?
            .proofs
            .get(&request_id)
            .cloned()
            .ok_or(Error::NotFound)
    }

    async fn save_aggregation_proof(&self, proof: &AggregationProof) -> Result<(), Error> {
        match self.state()?.proofs.entry(proof.request_id()) {
            hash_map::Entry::Occupied(_) => Err(Error::AlreadyExists),
            hash_map::Entry::Vacant(entry) => {
                entry.insert(proof.clone());
                Ok(())
            }
        }
    }
}
