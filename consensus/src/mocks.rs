//! Validator sets with known keys, a recording [application::Broadcaster], and a
//! [Repository] that fails on demand.

use crate::{
    aggregator,
    application,
    processor::{self, Processor, DEFAULT_LOCK_SHARDS},
    signature_map::SignatureMap,
    storage::{self, memory::Memory, Repository},
    types::{
        Address, AggregationProof, Epoch, RequestId, Signature, SignatureRequest, Validator,
        ValidatorKey, ValidatorSet, VotingPower,
    },
};
use prometheus_client::registry::Registry;
use rand::{rngs::StdRng, SeedableRng};
use relay_cryptography::{KeyTag, KeyType, PrivateKey};
use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc, Mutex,
};

/// Epoch used by every [Fixture].
pub const EPOCH: Epoch = 1;

/// A validator set whose private keys are known.
///
/// Validator `i` has operator address `[i + 1; 20]`, so `keys[i]` signs for the validator
/// at index `i` of `set`.
pub struct Fixture {
    pub key_tag: KeyTag,
    pub keys: Vec<PrivateKey>,
    pub set: ValidatorSet,
}

impl Fixture {
    /// Creates a set of active validators with the given voting powers.
    pub fn new(key_type: KeyType, powers: &[VotingPower], quorum_threshold: VotingPower) -> Self {
        Self::with_inactive(key_type, powers, quorum_threshold, &[])
    }

    /// Creates a set where the validators at `inactive` are not active.
    pub fn with_inactive(
        key_type: KeyType,
        powers: &[VotingPower],
        quorum_threshold: VotingPower,
        inactive: &[usize],
    ) -> Self {
        assert!(powers.len() < 255, "operator addresses are derived from a byte");
        let key_tag = KeyTag::new(key_type, 1).expect("valid tag");
        let mut rng = StdRng::seed_from_u64(0);
        let keys: Vec<_> = powers
            .iter()
            .map(|_| PrivateKey::generate(key_type, &mut rng))
            .collect();
        let validators = powers
            .iter()
            .zip(&keys)
            .enumerate()
            .map(|(i, (power, key))| Validator {
                operator: Address([i as u8 + 1; 20]),
                voting_power: *power,
                is_active: !inactive.contains(&i),
                keys: vec![ValidatorKey {
                    tag: key_tag,
                    payload: key.public_key().on_chain().into(),
                }],
                vaults: Vec::new(),
            })
            .collect();
        Self {
            key_tag,
            keys,
            set: ValidatorSet::new(EPOCH, key_tag, quorum_threshold, validators),
        }
    }

    /// Signs `message` with the key of validator `index`.
    pub fn sign(&self, index: usize, message: &[u8]) -> Signature {
        let key = &self.keys[index];
        let (signature, message_hash) = key.sign(message).expect("sign");
        Signature::new(
            self.key_tag,
            self.set.epoch(),
            message_hash.into(),
            signature.into(),
            key.public_key().raw().into(),
        )
    }

    /// A repository holding the fixture's validator set.
    pub fn repository(&self) -> Memory {
        let repository = Memory::new();
        repository
            .insert_validator_set(self.set.clone())
            .expect("insert validator set");
        repository
    }

    /// A processor over a fresh [Fixture::repository].
    pub fn processor(&self) -> Processor<Memory> {
        self.processor_with(self.repository())
    }

    /// A processor over `repository`, which must already hold the fixture's validator set.
    pub fn processor_with<R: Repository>(&self, repository: R) -> Processor<R> {
        Processor::new(
            processor::Config {
                repository,
                aggregators: aggregator::Registry::default(),
                lock_shards: DEFAULT_LOCK_SHARDS,
            },
            &mut Registry::default(),
        )
    }
}

/// Records everything broadcast through it. Clones share the record.
#[derive(Clone, Default)]
pub struct Broadcaster {
    signatures: Arc<Mutex<Vec<Signature>>>,
    proofs: Arc<Mutex<Vec<AggregationProof>>>,
}

impl Broadcaster {
    pub fn signatures(&self) -> Vec<Signature> {
        self.signatures.lock().unwrap().clone()
    }

    pub fn proofs(&self) -> Vec<AggregationProof> {
        self.proofs.lock().unwrap().clone()
    }
}

impl application::Broadcaster for Broadcaster {
    async fn broadcast_signature(&mut self, signature: Signature) {
        self.signatures.lock().unwrap().push(signature);
    }

    async fn broadcast_proof(&mut self, proof: AggregationProof) {
        self.proofs.lock().unwrap().push(proof);
    }
}

/// A [Memory] repository whose next `n` signature map writes fail with a backend error.
#[derive(Clone, Default)]
pub struct Flaky {
    pub inner: Memory,
    map_failures: Arc<AtomicUsize>,
}

impl Flaky {
    pub fn new(inner: Memory) -> Self {
        Self {
            inner,
            map_failures: Arc::default(),
        }
    }

    pub fn fail_map_writes(&self, n: usize) {
        self.map_failures.store(n, Ordering::SeqCst);
    }
}

impl Repository for Flaky {
    async fn validator_set(&self, epoch: Epoch) -> Result<Arc<ValidatorSet>, storage::Error> {
        self.inner.validator_set(epoch).await
    }

    async fn latest_epoch(&self) -> Result<Epoch, storage::Error> {
        self.inner.latest_epoch().await
    }

    async fn validator_by_key(
        &self,
        epoch: Epoch,
        key_tag: KeyTag,
        on_chain: &[u8],
    ) -> Result<(u32, Validator), storage::Error> {
        self.inner.validator_by_key(epoch, key_tag, on_chain).await
    }

    async fn signature(
        &self,
        request_id: RequestId,
        index: u32,
    ) -> Result<Signature, storage::Error> {
        self.inner.signature(request_id, index).await
    }

    async fn signatures(
        &self,
        request_id: RequestId,
    ) -> Result<Vec<(u32, Signature)>, storage::Error> {
        self.inner.signatures(request_id).await
    }

    async fn save_signature(
        &self,
        index: u32,
        signature: &Signature,
    ) -> Result<(), storage::Error> {
        self.inner.save_signature(index, signature).await
    }

    async fn signature_map(&self, request_id: RequestId) -> Result<SignatureMap, storage::Error> {
        self.inner.signature_map(request_id).await
    }

    async fn save_signature_map(&self, map: &SignatureMap) -> Result<(), storage::Error> {
        let failing = self
            .map_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(storage::Error::Backend("injected failure".into()));
        }
        self.inner.save_signature_map(map).await
    }

    async fn save_signature_request(
        &self,
        request: &SignatureRequest,
    ) -> Result<(), storage::Error> {
        self.inner.save_signature_request(request).await
    }

    async fn signature_request(
        &self,
        request_id: RequestId,
    ) -> Result<SignatureRequest, storage::Error> {
        self.inner.signature_request(request_id).await
    }

    async fn pending_requests(
        &self,
        min_epoch: Epoch,
        limit: usize,
    ) -> Result<Vec<SignatureRequest>, storage::Error> {
        self.inner.pending_requests(min_epoch, limit).await
    }

    async fn aggregation_proof(
        &self,
        request_id: RequestId,
    ) -> Result<AggregationProof, storage::Error> {
        self.inner.aggregation_proof(request_id).await
    }

    async fn save_aggregation_proof(
        &self,
        proof: &AggregationProof,
    ) -> Result<(), storage::Error> {
        self.inner.save_aggregation_proof(proof).await
    }
}
