//! Validate, deduplicate, persist, and announce signatures and proofs.
//!
//! The [Processor] is the only component that decides whether a signature or proof is
//! valid and new. Gossip handlers, the recovery client, and the local applications all
//! submit through it, so an item is counted once no matter how often or by which path it
//! arrives.
//!
//! For every accepted item, verification happens before persistence and persistence happens
//! before the event is published: subscribers never observe state that is not stored.

use crate::{
    aggregator::{self, Aggregator},
    events::{Event, Publisher, SignatureProcessed},
    signature_map::SignatureMap,
    storage::{self, Repository},
    types::{AggregationProof, Epoch, RequestId, Signature, SignatureRequest, ValidatorSet, VerificationType},
    Error, Kind,
};
use prometheus_client::registry::Registry;
use relay_cryptography::PublicKey;
use relay_utils::Backpressure;
use std::{
    collections::HashSet,
    sync::{Arc, Mutex, PoisonError},
};
use tokio::sync::mpsc;
use tracing::{debug, trace, warn};

mod locks;
use locks::Locks;
mod metrics;
use metrics::{Entity, Metrics};

/// Default number of request lock shards.
pub const DEFAULT_LOCK_SHARDS: usize = 1024;

/// Configuration for the [Processor].
pub struct Config<R: Repository> {
    pub repository: R,

    /// Aggregators used to verify proofs, by verification type.
    pub aggregators: aggregator::Registry,

    /// Number of shards in the per-request lock table.
    pub lock_shards: usize,
}

/// Where a signature came from.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Origin {
    /// Produced by this node. Skips the activity, duplicate, and cryptographic checks.
    Local,
    /// Received from a peer (over gossip or recovery).
    Remote,
}

/// Progress of a request toward a stored proof.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Status {
    Unknown,
    Collecting,
    QuorumReached,
    ProofPending,
    ProofVerified,
}

/// Entry point for signatures and proofs. Clones share all state.
#[derive(Clone)]
pub struct Processor<R: Repository> {
    repository: R,
    aggregators: Arc<aggregator::Registry>,
    locks: Arc<Locks>,
    in_flight: Arc<Mutex<HashSet<RequestId>>>,
    events: Publisher<Event>,
    metrics: Arc<Metrics>,
}

impl<R: Repository> Processor<R> {
    pub fn new(cfg: Config<R>, registry: &mut Registry) -> Self {
        let metrics = Arc::new(Metrics::init(registry));
        let events = Publisher::new(registry.sub_registry_with_prefix("events"));
        Self {
            repository: cfg.repository,
            aggregators: Arc::new(cfg.aggregators),
            locks: Arc::new(Locks::new(cfg.lock_shards)),
            in_flight: Arc::new(Mutex::new(HashSet::new())),
            events,
            metrics,
        }
    }

    pub fn repository(&self) -> &R {
        &self.repository
    }

    pub fn aggregator(&self, verification_type: VerificationType) -> Option<Arc<dyn Aggregator>> {
        self.aggregators.get(verification_type).cloned()
    }

    /// Subscribes to processor events.
    pub fn subscribe(&self, capacity: usize, backpressure: Backpressure) -> mpsc::Receiver<Event> {
        self.events.subscribe(capacity, backpressure)
    }

    /// Validates and records a signature, returning the updated signature map.
    ///
    /// Fails with [Error::ValidatorNotFound] if no validator of the signature's epoch
    /// registered its public key, and with [Error::AlreadyExists] if the validator is
    /// already counted for the request. Remote signatures must also come from an active
    /// validator and pass verification.
    pub async fn process_signature(
        &self,
        signature: Signature,
        origin: Origin,
    ) -> Result<SignatureMap, Error> {
        let request_id = signature.request_id;
        let result = self.handle_signature(signature, origin).await;
        self.metrics.record(Entity::Signature, &result);
        if let Err(err) = &result {
            match err.kind() {
                Kind::AlreadyExists => trace!(?request_id, "duplicate signature"),
                Kind::NotFound | Kind::Invalid => {
                    debug!(?request_id, ?origin, ?err, "rejected signature")
                }
                Kind::Unavailable | Kind::Internal => {
                    warn!(?request_id, ?err, "failed to process signature")
                }
            }
        }
        result
    }

    async fn handle_signature(
        &self,
        signature: Signature,
        origin: Origin,
    ) -> Result<SignatureMap, Error> {
        let request_id = signature.request_id;
        let epoch = signature.epoch;
        if RequestId::new(signature.key_tag, epoch, &signature.message_hash) != request_id {
            return Err(Error::RequestIdMismatch);
        }
        let key_type = signature.key_tag.key_type()?;
        let public_key = PublicKey::from_raw(key_type, &signature.public_key)?;
        let (index, validator) = match self
            .repository
            .validator_by_key(epoch, signature.key_tag, &public_key.on_chain())
            .await
        {
            Ok(found) => found,
            Err(storage::Error::NotFound) => return Err(Error::ValidatorNotFound),
            Err(err) => return Err(err.into()),
        };

        match origin {
            Origin::Remote => {
                if !validator.is_active {
                    return Err(Error::ValidatorInactive);
                }
                match self.repository.signature_map(request_id).await {
                    Ok(map) if map.signed().contains(index) => return Err(Error::AlreadyExists),
                    Ok(_) | Err(storage::Error::NotFound) => {}
                    Err(err) => return Err(err.into()),
                }
                public_key.verify_with_hash(&signature.message_hash, &signature.signature)?;
            }
            Origin::Local => {
                debug!(?request_id, index, "accepting own signature without verification");
            }
        }

        let set = self.validator_set(epoch).await?;
        let map = {
            let _guard = self.locks.lock(&request_id).await;
            let (mut map, created) = match self.repository.signature_map(request_id).await {
                Ok(map) => (map, false),
                Err(storage::Error::NotFound) => {
                    (SignatureMap::new(request_id, epoch, set.len()), true)
                }
                Err(err) => return Err(err.into()),
            };
            map.set_validator_present(index, validator.voting_power)?;
            if created {
                match self
                    .repository
                    .save_signature_request(&SignatureRequest::from(&signature))
                    .await
                {
                    Ok(()) | Err(storage::Error::AlreadyExists) => {}
                    Err(err) => return Err(err.into()),
                }
            }
            // The map decides what is counted. A signature stored by an attempt that failed
            // before its map was saved is left in place.
            match self.repository.save_signature(index, &signature).await {
                Ok(()) | Err(storage::Error::AlreadyExists) => {}
                Err(err) => return Err(err.into()),
            }
            self.repository.save_signature_map(&map).await?;
            map
        };

        let quorum_reached = map.threshold_reached(set.quorum_threshold());
        trace!(?request_id, index, voting_power = ?map.voting_power(), quorum_reached, "signature processed");
        self.events
            .publish(Event::SignatureProcessed(SignatureProcessed {
                signature,
                validator_index: index,
                map: map.clone(),
                quorum_reached,
            }))
            .await;
        Ok(map)
    }

    /// Verifies and stores a proof. The first valid proof for a request wins; later ones
    /// fail with [Error::AlreadyExists].
    pub async fn process_aggregation_proof(&self, proof: AggregationProof) -> Result<(), Error> {
        let request_id = proof.request_id();
        let result = self.handle_proof(proof).await;
        self.metrics.record(Entity::Proof, &result);
        if let Err(err) = &result {
            match err.kind() {
                Kind::AlreadyExists => trace!(?request_id, "duplicate proof"),
                Kind::NotFound | Kind::Invalid => debug!(?request_id, ?err, "rejected proof"),
                Kind::Unavailable | Kind::Internal => {
                    warn!(?request_id, ?err, "failed to process proof")
                }
            }
        }
        result
    }

    async fn handle_proof(&self, proof: AggregationProof) -> Result<(), Error> {
        let request_id = proof.request_id();
        match self.repository.aggregation_proof(request_id).await {
            Ok(_) => return Err(Error::AlreadyExists),
            Err(storage::Error::NotFound) => {}
            Err(err) => return Err(err.into()),
        }

        let set = self.validator_set(proof.epoch).await?;
        let aggregator = self
            .aggregators
            .get(proof.verification_type)
            .ok_or(Error::UnsupportedVerificationType(proof.verification_type))?;
        aggregator
            .verify(&set, proof.key_tag, &proof)
            .map_err(Error::InvalidProof)?;

        {
            let _guard = self.locks.lock(&request_id).await;
            self.repository.save_aggregation_proof(&proof).await?;
        }
        self.end_aggregation(&request_id);
        debug!(?request_id, epoch = proof.epoch, "proof verified");
        self.events
            .publish(Event::AggregationProofReady(proof))
            .await;
        Ok(())
    }

    /// Derives the lifecycle state of a request.
    pub async fn status(&self, request_id: RequestId) -> Result<Status, Error> {
        match self.repository.aggregation_proof(request_id).await {
            Ok(_) => return Ok(Status::ProofVerified),
            Err(storage::Error::NotFound) => {}
            Err(err) => return Err(err.into()),
        }
        if self.in_flight().contains(&request_id) {
            return Ok(Status::ProofPending);
        }
        let map = match self.repository.signature_map(request_id).await {
            Ok(map) => map,
            Err(storage::Error::NotFound) => return Ok(Status::Unknown),
            Err(err) => return Err(err.into()),
        };
        let set = self.validator_set(map.epoch()).await?;
        if map.threshold_reached(set.quorum_threshold()) {
            Ok(Status::QuorumReached)
        } else {
            Ok(Status::Collecting)
        }
    }

    /// Marks a request as being aggregated. Returns false if it already was.
    pub fn begin_aggregation(&self, request_id: RequestId) -> bool {
        self.in_flight().insert(request_id)
    }

    /// Clears the mark set by [Processor::begin_aggregation].
    pub fn end_aggregation(&self, request_id: &RequestId) {
        self.in_flight().remove(request_id);
    }

    fn in_flight(&self) -> std::sync::MutexGuard<'_, HashSet<RequestId>> {
        self.in_flight.lock().unwrap_or_else(PoisonError::into_inner)
    }

    async fn validator_set(&self, epoch: Epoch) -> Result<Arc<ValidatorSet>, Error> {
        match self.repository.validator_set(epoch).await {
            Ok(set) => Ok(set),
            Err(storage::Error::NotFound) => Err(Error::ValidatorSetNotFound(epoch)),
            Err(err) => Err(err.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        aggregator::simple::Simple,
        mocks::{Fixture, Flaky},
    };
    use bytes::Bytes;
    use relay_cryptography::{KeyType, PrivateKey};
    use rand::{rngs::StdRng, SeedableRng};
    use std::time::Duration;

    const MESSAGE: &[u8] = b"header";

    fn proof(fixture: &Fixture, indices: &[usize]) -> AggregationProof {
        let signatures: Vec<_> = indices.iter().map(|i| fixture.sign(*i, MESSAGE)).collect();
        Simple::default()
            .aggregate(
                &fixture.set,
                fixture.key_tag,
                &signatures[0].message_hash,
                &signatures,
            )
            .unwrap()
    }

    #[tokio::test]
    async fn test_quorum_progression() {
        let fixture = Fixture::new(KeyType::BlsBn254, &[101, 201, 301], 400);
        let processor = fixture.processor();
        let first = fixture.sign(2, MESSAGE);
        let id = first.request_id;
        assert_eq!(processor.status(id).await.unwrap(), Status::Unknown);

        let map = processor
            .process_signature(first, Origin::Remote)
            .await
            .unwrap();
        assert!(!map.threshold_reached(400));
        assert_eq!(processor.status(id).await.unwrap(), Status::Collecting);

        let map = processor
            .process_signature(fixture.sign(1, MESSAGE), Origin::Remote)
            .await
            .unwrap();
        assert_eq!(map.voting_power(), 502);
        assert_eq!(processor.status(id).await.unwrap(), Status::QuorumReached);

        assert!(processor.begin_aggregation(id));
        assert!(!processor.begin_aggregation(id));
        assert_eq!(processor.status(id).await.unwrap(), Status::ProofPending);

        processor
            .process_aggregation_proof(proof(&fixture, &[1, 2]))
            .await
            .unwrap();
        assert_eq!(processor.status(id).await.unwrap(), Status::ProofVerified);
        assert!(processor.begin_aggregation(id));
    }

    #[tokio::test]
    async fn test_duplicate_signature() {
        let fixture = Fixture::new(KeyType::Bls12381, &[10, 20], 30);
        let processor = fixture.processor();
        let signature = fixture.sign(0, MESSAGE);
        processor
            .process_signature(signature.clone(), Origin::Remote)
            .await
            .unwrap();
        let before = processor
            .repository()
            .signature_map(signature.request_id)
            .await
            .unwrap();

        let err = processor
            .process_signature(signature.clone(), Origin::Remote)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::AlreadyExists));

        // Local submissions skip the duplicate lookup but not the signature map.
        let err = processor
            .process_signature(signature.clone(), Origin::Local)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), Kind::AlreadyExists);

        let after = processor
            .repository()
            .signature_map(signature.request_id)
            .await
            .unwrap();
        assert_eq!(before, after);
    }

    #[tokio::test]
    async fn test_unknown_validator_creates_nothing() {
        let fixture = Fixture::new(KeyType::BlsBn254, &[10, 20], 30);
        let processor = fixture.processor();

        let outsider = PrivateKey::generate(KeyType::BlsBn254, &mut StdRng::seed_from_u64(99));
        let (signature, hash) = outsider.sign(MESSAGE).unwrap();
        let signature = Signature::new(
            fixture.key_tag,
            fixture.set.epoch(),
            hash.into(),
            signature.into(),
            outsider.public_key().raw().into(),
        );
        let id = signature.request_id;

        let err = processor
            .process_signature(signature, Origin::Remote)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::ValidatorNotFound));
        assert_eq!(
            processor.repository().signature_map(id).await,
            Err(storage::Error::NotFound)
        );
        assert_eq!(processor.status(id).await.unwrap(), Status::Unknown);
    }

    #[tokio::test]
    async fn test_inactive_validator() {
        let fixture = Fixture::with_inactive(KeyType::BlsBn254, &[10, 20], 10, &[0]);
        let processor = fixture.processor();
        let err = processor
            .process_signature(fixture.sign(0, MESSAGE), Origin::Remote)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::ValidatorInactive));

        // A node trusts its own signatures.
        processor
            .process_signature(fixture.sign(0, MESSAGE), Origin::Local)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_invalid_signature() {
        let fixture = Fixture::new(KeyType::BlsBn254, &[10, 20], 30);
        let processor = fixture.processor();
        let genuine = fixture.sign(0, MESSAGE);
        let other = fixture.sign(0, b"other");
        let forged = Signature::new(
            genuine.key_tag,
            genuine.epoch,
            genuine.message_hash.clone(),
            other.signature,
            genuine.public_key.clone(),
        );
        let err = processor
            .process_signature(forged, Origin::Remote)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvalidSignature));

        let mut garbage = genuine.clone();
        garbage.signature = Bytes::from_static(&[0xff; 64]);
        let err = processor
            .process_signature(garbage, Origin::Remote)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Malformed(_)));

        let mut mismatched = genuine;
        mismatched.epoch += 1;
        let err = processor
            .process_signature(mismatched, Origin::Remote)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::RequestIdMismatch));
    }

    #[tokio::test]
    async fn test_failed_map_write_is_retried() {
        let fixture = Fixture::new(KeyType::BlsBn254, &[101, 201, 301], 400);
        let repository = Flaky::new(fixture.repository());
        let processor = fixture.processor_with(repository.clone());
        let signature = fixture.sign(2, MESSAGE);
        let id = signature.request_id;

        repository.fail_map_writes(1);
        let err = processor
            .process_signature(signature.clone(), Origin::Remote)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), Kind::Internal);
        assert!(repository.signature(id, 2).await.is_ok());
        assert_eq!(
            repository.signature_map(id).await,
            Err(storage::Error::NotFound)
        );

        // Redelivery counts the signature that was stored but never counted.
        let map = processor
            .process_signature(signature.clone(), Origin::Remote)
            .await
            .unwrap();
        assert_eq!(map.voting_power(), 301);
        let err = processor
            .process_signature(signature, Origin::Remote)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), Kind::AlreadyExists);

        let map = processor
            .process_signature(fixture.sign(1, MESSAGE), Origin::Remote)
            .await
            .unwrap();
        assert_eq!(map.voting_power(), 502);
        assert!(map.threshold_reached(400));
        assert_eq!(processor.status(id).await.unwrap(), Status::QuorumReached);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_delivery_counts_once() {
        let fixture = Fixture::new(KeyType::BlsBn254, &[10, 20, 30], 60);
        let processor = fixture.processor();
        let signatures: Vec<_> = (0..3).map(|i| fixture.sign(i, MESSAGE)).collect();
        let id = signatures[0].request_id;

        let mut handles = Vec::new();
        for _ in 0..8 {
            for signature in &signatures {
                let processor = processor.clone();
                let signature = signature.clone();
                handles.push(tokio::spawn(async move {
                    processor.process_signature(signature, Origin::Remote).await
                }));
            }
        }
        let mut accepted = 0;
        for handle in handles {
            match handle.await.unwrap() {
                Ok(_) => accepted += 1,
                Err(err) => assert_eq!(err.kind(), Kind::AlreadyExists),
            }
        }
        assert_eq!(accepted, 3);

        let map = processor.repository().signature_map(id).await.unwrap();
        assert_eq!(map.voting_power(), 60);
        assert_eq!(map.signed().cardinality(), 3);
    }

    #[tokio::test]
    async fn test_events_follow_persistence() {
        let fixture = Fixture::new(KeyType::BlsBn254, &[10, 20], 30);
        let processor = fixture.processor();
        let mut events = processor.subscribe(8, Backpressure::Block(Duration::from_secs(1)));

        let signature = fixture.sign(1, MESSAGE);
        processor
            .process_signature(signature.clone(), Origin::Remote)
            .await
            .unwrap();
        let Some(Event::SignatureProcessed(processed)) = events.recv().await else {
            panic!("expected signature event");
        };
        assert_eq!(processed.validator_index, 1);
        assert!(!processed.quorum_reached);
        assert!(processor
            .repository()
            .signature(signature.request_id, 1)
            .await
            .is_ok());

        let proof = proof(&fixture, &[0, 1]);
        processor
            .process_aggregation_proof(proof.clone())
            .await
            .unwrap();
        let Some(Event::AggregationProofReady(ready)) = events.recv().await else {
            panic!("expected proof event");
        };
        assert_eq!(ready, proof);
    }

    #[tokio::test]
    async fn test_proof_rejections() {
        let fixture = Fixture::new(KeyType::Bls12381, &[10, 20, 30], 40);
        let processor = fixture.processor();
        let proof = proof(&fixture, &[1, 2]);

        let mut tampered = proof.clone();
        tampered.proof = Bytes::from_static(b"junk");
        let err = processor
            .process_aggregation_proof(tampered)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvalidProof(_)));

        let mut zk = proof.clone();
        zk.verification_type = VerificationType::Zk;
        let err = processor.process_aggregation_proof(zk).await.unwrap_err();
        assert!(matches!(err, Error::UnsupportedVerificationType(_)));

        let mut future = proof.clone();
        future.epoch += 1;
        let err = processor
            .process_aggregation_proof(future)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::ValidatorSetNotFound(_)));

        processor
            .process_aggregation_proof(proof.clone())
            .await
            .unwrap();
        let err = processor
            .process_aggregation_proof(proof)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::AlreadyExists));
    }
}
