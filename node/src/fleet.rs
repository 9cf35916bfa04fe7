//! A fleet of nodes running on a [simulated](relay_p2p::simulated) network.
//!
//! Node `i` holds the key of validator `i` (operator address `[i + 1; 20]`) of a single
//! epoch's validator set, and the first `aggregators` nodes also aggregate. Nodes start
//! unlinked; call [Fleet::connect] or [Fleet::connect_all] to let messages flow.

use crate::{Channels, Config as NodeConfig, Error, Node, PROOFS, RECOVERY, SIGNATURES};
use bytes::Bytes;
use prometheus_client::registry::Registry;
use rand::{rngs::StdRng, SeedableRng};
use relay_consensus::{
    application::signer::Signer,
    processor::{Processor, Status},
    storage::memory::Memory,
    types::{
        Address, Epoch, RequestId, Signature, Validator, ValidatorKey, ValidatorSet, VotingPower,
    },
};
use relay_cryptography::{KeyTag, KeyType, PrivateKey};
use relay_p2p::{
    dissemination::Mailbox,
    simulated::network::{self, Link, Oracle},
    PeerId,
};
use relay_utils::Signal;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info};

/// Epoch of the fleet's validator set.
pub const EPOCH: Epoch = 1;

/// Configuration for a [Fleet].
#[derive(Clone, Debug)]
pub struct Config {
    /// Key scheme of every validator.
    pub key_type: KeyType,

    /// Voting power of each validator (one node per validator).
    pub powers: Vec<VotingPower>,

    /// Voting power required for a proof.
    pub quorum_threshold: VotingPower,

    /// Number of nodes (the first ones) that also aggregate.
    pub aggregators: usize,

    /// Settings shared by every node. Aggregators use its `aggregator` section, or the
    /// defaults if it has none.
    pub node: NodeConfig,

    /// Link used by [Fleet::connect].
    pub link: Link,

    /// Seed for key generation and link failures.
    pub seed: u64,
}

/// A node of the [Fleet].
pub struct Member {
    pub identity: PeerId,
    pub processor: Processor<Memory>,
    pub signer: Signer<Memory, Mailbox>,
    handles: Vec<JoinHandle<()>>,
}

pub struct Fleet {
    pub key_tag: KeyTag,
    pub set: ValidatorSet,
    pub members: Vec<Member>,
    oracle: Oracle,
    link: Link,
}

impl Fleet {
    /// Starts every node of the fleet. All of them stop once `stopped` resolves.
    pub fn start(cfg: Config, registry: &mut Registry, stopped: Signal) -> Result<Self, Error> {
        if cfg.powers.len() >= usize::from(u8::MAX) {
            return Err(Error::InvalidConfig("fleet supports at most 254 nodes"));
        }
        let key_tag = KeyTag::new(cfg.key_type, 1)?;
        let mut rng = StdRng::seed_from_u64(cfg.seed);
        let keys: Vec<_> = cfg
            .powers
            .iter()
            .map(|_| PrivateKey::generate(cfg.key_type, &mut rng))
            .collect();
        let validators = cfg
            .powers
            .iter()
            .zip(&keys)
            .enumerate()
            .map(|(i, (power, key))| Validator {
                operator: Address([i as u8 + 1; 20]),
                voting_power: *power,
                is_active: true,
                keys: vec![ValidatorKey {
                    tag: key_tag,
                    payload: Bytes::from(key.public_key().on_chain()),
                }],
                vaults: Vec::new(),
            })
            .collect();
        let set = ValidatorSet::new(EPOCH, key_tag, cfg.quorum_threshold, validators);

        let (network, oracle) = network::Network::new(
            network::Config {
                max_message_len: cfg.node.limits.proof + (1 << 16),
                mailbox_size: cfg.node.dissemination.mailbox_size,
                seed: cfg.seed,
            },
            registry.sub_registry_with_prefix("network"),
        );
        tokio::spawn(network.run());

        let mut members = Vec::with_capacity(keys.len());
        for (i, key) in keys.into_iter().enumerate() {
            let identity = PeerId::from_public_key(&key.public_key().raw());
            let repository = Memory::new();
            repository.insert_validator_set(set.clone())?;

            let aggregating = i < cfg.aggregators;
            let mut node_cfg = cfg.node.clone();
            if aggregating {
                node_cfg.aggregator.get_or_insert_with(Default::default);
            } else {
                node_cfg.aggregator = None;
            }
            let (node, signer) = Node::new(
                &node_cfg,
                identity,
                repository,
                oracle.peers(identity),
                [(key_tag, key)],
                registry.sub_registry_with_prefix(format!("node_{i}")),
            )?;
            let processor = node.processor().clone();
            let channels = Channels {
                signatures: oracle.register(identity, SIGNATURES)?,
                proofs: oracle.register(identity, PROOFS)?,
                recovery: oracle.register(identity, RECOVERY)?,
            };
            let handles = node.start(channels, stopped.clone());
            debug!(index = i, ?identity, aggregating, "member started");
            members.push(Member {
                identity,
                processor,
                signer,
                handles,
            });
        }
        info!(nodes = members.len(), %key_tag, "fleet started");
        Ok(Self {
            key_tag,
            set,
            members,
            oracle,
            link: cfg.link,
        })
    }

    /// Links nodes `a` and `b` in both directions.
    pub fn connect(&self, a: usize, b: usize) -> Result<(), Error> {
        let (a, b) = (self.members[a].identity, self.members[b].identity);
        self.oracle.link(a, b, self.link)?;
        self.oracle.link(b, a, self.link)?;
        Ok(())
    }

    /// Links every pair of nodes.
    pub fn connect_all(&self) -> Result<(), Error> {
        for a in 0..self.members.len() {
            for b in a + 1..self.members.len() {
                self.connect(a, b)?;
            }
        }
        Ok(())
    }

    /// Has node `index` sign `message` for the fleet's epoch.
    pub async fn sign(&mut self, index: usize, message: &[u8]) -> Result<Signature, Error> {
        let key_tag = self.key_tag;
        Ok(self.members[index]
            .signer
            .sign(key_tag, EPOCH, message)
            .await?)
    }

    /// The status of `request_id` on every node.
    pub async fn statuses(&self, request_id: RequestId) -> Vec<Status> {
        let mut statuses = Vec::with_capacity(self.members.len());
        for member in &self.members {
            let status = member
                .processor
                .status(request_id)
                .await
                .unwrap_or(Status::Unknown);
            statuses.push(status);
        }
        statuses
    }

    /// Waits until every node verified a proof for `request_id`, polling every `interval`
    /// up to `attempts` times. Returns whether they all did.
    pub async fn wait_for_proof(
        &self,
        request_id: RequestId,
        interval: Duration,
        attempts: usize,
    ) -> bool {
        for _ in 0..attempts {
            let statuses = self.statuses(request_id).await;
            if statuses.iter().all(|status| *status == Status::ProofVerified) {
                return true;
            }
            tokio::time::sleep(interval).await;
        }
        false
    }

    /// Waits for every node to stop.
    pub async fn join(self) {
        for member in self.members {
            for handle in member.handles {
                let _ = handle.await;
            }
        }
    }
}
