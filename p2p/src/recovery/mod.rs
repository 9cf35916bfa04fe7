//! Fill the gaps left by best-effort gossip.
//!
//! Every period, the [Engine] lists the pending requests (those without a proof) within its
//! epoch window, computes which eligible validators' signatures are still missing, and asks a
//! single randomly chosen connected peer for them ([wire::Request::WantSignatures]) and for
//! the proofs ([wire::Request::WantProofs]). Everything returned is re-validated by the
//! processor exactly as if it had arrived over gossip.
//!
//! A round with no connected peer is skipped without touching any state. A round that
//! exceeds its timeout, or whose peer refuses or fails, is abandoned and the next period
//! starts over.
//!
//! The same engine answers requests from peers out of its repository, bounding each
//! response and rate-limiting each peer.

use crate::PeerId;
use relay_consensus::storage;
use thiserror::Error;

mod config;
pub use config::Config;
mod engine;
pub use engine::Engine;
mod metrics;
pub use metrics::Round;
mod server;
pub mod wire;

#[derive(Error, Debug)]
pub enum Error {
    #[error("send failed: {0}")]
    Send(String),
    #[error("peer unreachable: {0:?}")]
    Unreachable(PeerId),
    #[error("peer refused request: {0:?}")]
    Refused(PeerId),
    #[error("request canceled")]
    Canceled,
    #[error("unexpected response")]
    UnexpectedResponse,
    #[error("storage: {0}")]
    Storage(#[from] storage::Error),
    #[error("processor: {0}")]
    Processor(relay_consensus::Error),
}

#[cfg(test)]
mod tests {
    use super::{
        engine::Wants,
        metrics::{Entity, EntityLabel, RoundLabel, Serve, ServeLabel},
        *,
    };
    use crate::{
        simulated::network::{self, Connected, Link, Network, Oracle},
        Channel,
    };
    use governor::Quota;
    use prometheus_client::registry::Registry;
    use relay_consensus::{
        aggregator::{simple::Simple, Aggregator},
        mocks::Fixture,
        processor::{Origin, Processor, Status},
        storage::{memory::Memory, Repository},
        types::Limits,
    };
    use relay_cryptography::KeyType;
    use relay_utils::{Bitmap, Signaler};
    use std::{num::NonZeroU32, time::Duration};

    const RECOVERY: Channel = 2;
    const MESSAGE: &[u8] = b"validator set header";

    fn peer(i: u8) -> PeerId {
        PeerId::new([i; 32])
    }

    fn network() -> Oracle {
        let (network, oracle) = Network::new(
            network::Config {
                max_message_len: 2 << 20,
                mailbox_size: 1024,
                seed: 0,
            },
            &mut Registry::default(),
        );
        tokio::spawn(network.run());
        oracle
    }

    fn connect(oracle: &Oracle, a: PeerId, b: PeerId) {
        let link = Link {
            latency: Duration::from_millis(1),
            success_rate: 1.0,
        };
        oracle.link(a, b, link).unwrap();
        oracle.link(b, a, link).unwrap();
    }

    fn engine(
        processor: &Processor<Memory>,
        peers: Connected,
        quota: Quota,
    ) -> Engine<Memory, Connected> {
        Engine::new(
            Config {
                processor: processor.clone(),
                peers,
                limits: Limits::default(),
                period: Duration::from_millis(20),
                round_timeout: Duration::from_millis(500),
                epoch_window: 2,
                max_requests: 16,
                max_response_items: 64,
                serve_quota: quota,
            },
            &mut Registry::default(),
        )
    }

    fn generous() -> Quota {
        Quota::per_second(NonZeroU32::new(1_000).unwrap())
    }

    fn rounds(engine: &Engine<Memory, Connected>, outcome: Round) -> u64 {
        engine
            .metrics
            .rounds
            .get_or_create(&RoundLabel { outcome })
            .get()
    }

    /// A processor holding every signature of `fixture` and the resulting proof.
    async fn complete(fixture: &Fixture) -> Processor<Memory> {
        let processor = fixture.processor();
        let signatures: Vec<_> = (0..fixture.keys.len())
            .map(|index| fixture.sign(index, MESSAGE))
            .collect();
        for signature in &signatures {
            processor
                .process_signature(signature.clone(), Origin::Remote)
                .await
                .unwrap();
        }
        let proof = Simple::default()
            .aggregate(
                &fixture.set,
                fixture.key_tag,
                &signatures[0].message_hash,
                &signatures,
            )
            .unwrap();
        processor.process_aggregation_proof(proof).await.unwrap();
        processor
    }

    #[tokio::test]
    async fn test_skips_without_peers() {
        let fixture = Fixture::new(KeyType::BlsBn254, &[101, 201, 301], 400);
        let processor = fixture.processor();
        let signature = fixture.sign(2, MESSAGE);
        processor
            .process_signature(signature.clone(), Origin::Remote)
            .await
            .unwrap();

        let oracle = network();
        let (mut sender, _receiver) = oracle.register(peer(0), RECOVERY).unwrap();
        let mut engine = engine(&processor, oracle.peers(peer(0)), generous());
        assert_eq!(engine.sync(&mut sender).await, Round::Skipped);
        assert_eq!(rounds(&engine, Round::Skipped), 1);

        let map = processor
            .repository()
            .signature_map(signature.request_id)
            .await
            .unwrap();
        assert_eq!(map.signed().cardinality(), 1);
        assert_eq!(map.voting_power(), 301);
        assert_eq!(
            processor.status(signature.request_id).await.unwrap(),
            Status::Collecting
        );
    }

    #[tokio::test]
    async fn test_idle_without_pending() {
        let fixture = Fixture::new(KeyType::BlsBn254, &[101, 201, 301], 400);
        let processor = complete(&fixture).await;
        let oracle = network();
        let (mut sender, _receiver) = oracle.register(peer(0), RECOVERY).unwrap();
        let _other = oracle.register(peer(1), RECOVERY).unwrap();
        connect(&oracle, peer(0), peer(1));
        let mut engine = engine(&processor, oracle.peers(peer(0)), generous());
        assert_eq!(engine.sync(&mut sender).await, Round::Idle);
    }

    #[tokio::test]
    async fn test_wants_only_eligible() {
        let fixture = Fixture::with_inactive(KeyType::BlsBn254, &[101, 201, 301, 50], 400, &[1]);
        let processor = fixture.processor();
        let signature = fixture.sign(0, MESSAGE);
        processor
            .process_signature(signature.clone(), Origin::Local)
            .await
            .unwrap();

        let oracle = network();
        let engine = engine(&processor, oracle.peers(peer(0)), generous());
        let wants = engine.wants().await.unwrap();
        let expected: Bitmap = [2, 3].into_iter().collect();
        assert_eq!(
            wants,
            Wants {
                signatures: vec![(signature.request_id, expected)],
                proofs: vec![signature.request_id],
            }
        );
    }

    #[tokio::test]
    async fn test_recovers_signatures_and_proof() {
        let fixture = Fixture::new(KeyType::BlsBn254, &[101, 201, 301], 400);
        let oracle = network();
        connect(&oracle, peer(0), peer(1));
        let (_signaler, stopped) = Signaler::new();

        // Peer 0 has everything.
        let full = complete(&fixture).await;
        let server = engine(&full, oracle.peers(peer(0)), generous());
        let (sender, receiver) = oracle.register(peer(0), RECOVERY).unwrap();
        server.serve(sender, receiver, stopped.clone());

        // Peer 1 only saw one signature.
        let partial = fixture.processor();
        let signature = fixture.sign(2, MESSAGE);
        partial
            .process_signature(signature.clone(), Origin::Remote)
            .await
            .unwrap();
        let mut client = engine(&partial, oracle.peers(peer(1)), generous());
        let (mut sender, receiver) = oracle.register(peer(1), RECOVERY).unwrap();
        client.serve(sender.clone(), receiver, stopped);

        assert_eq!(client.sync(&mut sender).await, Round::Completed);
        assert_eq!(
            partial.status(signature.request_id).await.unwrap(),
            Status::ProofVerified
        );
        let map = partial
            .repository()
            .signature_map(signature.request_id)
            .await
            .unwrap();
        assert_eq!(map.voting_power(), 603);
        let recovered = |entity| {
            client
                .metrics
                .recovered
                .get_or_create(&EntityLabel { entity })
                .get()
        };
        assert_eq!(recovered(Entity::Signature), 2);
        assert_eq!(recovered(Entity::Proof), 1);
        assert_eq!(
            server
                .metrics
                .served
                .get_or_create(&ServeLabel {
                    status: Serve::Served
                })
                .get(),
            2
        );

        // Nothing is left to ask for.
        assert_eq!(client.sync(&mut sender).await, Round::Idle);
    }

    #[tokio::test]
    async fn test_rate_limited_round_fails() {
        let fixture = Fixture::new(KeyType::BlsBn254, &[101, 201, 301], 400);
        let oracle = network();
        connect(&oracle, peer(0), peer(1));
        let (_signaler, stopped) = Signaler::new();

        let full = complete(&fixture).await;
        let strict = Quota::per_hour(NonZeroU32::new(1).unwrap());
        let server = engine(&full, oracle.peers(peer(0)), strict);
        let (sender, receiver) = oracle.register(peer(0), RECOVERY).unwrap();
        server.serve(sender, receiver, stopped.clone());

        let partial = fixture.processor();
        let signature = fixture.sign(2, MESSAGE);
        partial
            .process_signature(signature.clone(), Origin::Remote)
            .await
            .unwrap();
        let mut client = engine(&partial, oracle.peers(peer(1)), generous());
        let (mut sender, receiver) = oracle.register(peer(1), RECOVERY).unwrap();
        client.serve(sender.clone(), receiver, stopped);

        // The signature request is served, the proof request is refused.
        assert_eq!(client.sync(&mut sender).await, Round::Failed);
        assert_eq!(
            server
                .metrics
                .served
                .get_or_create(&ServeLabel {
                    status: Serve::RateLimited
                })
                .get(),
            1
        );
        assert_eq!(
            partial.status(signature.request_id).await.unwrap(),
            Status::QuorumReached
        );
    }

    #[tokio::test]
    async fn test_round_times_out() {
        let fixture = Fixture::new(KeyType::BlsBn254, &[101, 201, 301], 400);
        let oracle = network();
        connect(&oracle, peer(0), peer(1));
        let (_signaler, stopped) = Signaler::new();

        // Peer 0 listens but never answers.
        let _silent = oracle.register(peer(0), RECOVERY).unwrap();

        let partial = fixture.processor();
        partial
            .process_signature(fixture.sign(2, MESSAGE), Origin::Remote)
            .await
            .unwrap();
        let mut client = engine(&partial, oracle.peers(peer(1)), generous());
        let (mut sender, receiver) = oracle.register(peer(1), RECOVERY).unwrap();
        client.serve(sender.clone(), receiver, stopped);

        assert_eq!(client.sync(&mut sender).await, Round::Timeout);
        assert_eq!(rounds(&client, Round::Timeout), 1);
    }

    #[tokio::test]
    async fn test_periodic_rounds() {
        let fixture = Fixture::new(KeyType::Bls12381, &[100, 100, 100], 200);
        let oracle = network();
        connect(&oracle, peer(0), peer(1));
        let (signaler, stopped) = Signaler::new();

        let full = complete(&fixture).await;
        let server = engine(&full, oracle.peers(peer(0)), generous());
        let server = server.start(oracle.register(peer(0), RECOVERY).unwrap(), stopped.clone());

        let partial = fixture.processor();
        let signature = fixture.sign(0, MESSAGE);
        partial
            .process_signature(signature.clone(), Origin::Remote)
            .await
            .unwrap();
        let client = engine(&partial, oracle.peers(peer(1)), generous());
        let client = client.start(oracle.register(peer(1), RECOVERY).unwrap(), stopped);

        let mut status = Status::Collecting;
        for _ in 0..200 {
            status = partial.status(signature.request_id).await.unwrap();
            if status == Status::ProofVerified {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(status, Status::ProofVerified);

        let _ = signaler.signal(0);
        server.await.unwrap();
        client.await.unwrap();
    }
}
