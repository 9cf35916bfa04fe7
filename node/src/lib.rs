//! Run a relay node: sign, gossip, recover, and aggregate validator signatures.
//!
//! A [Node] wires one [Processor] to the engines that feed it:
//!
//! * [dissemination] gossips locally produced signatures and proofs, and hands everything
//!   received to the processor.
//! * [recovery] periodically asks a random peer for whatever gossip missed.
//! * The [Aggregator] (only when configured) turns requests that reached quorum into proofs.
//! * The [Signer] signs messages with the node's keys.
//!
//! Each engine talks over its own channel (see [SIGNATURES], [PROOFS] and [RECOVERY]).
//!
//! [dissemination]: relay_p2p::dissemination
//! [recovery]: relay_p2p::recovery

use prometheus_client::registry::Registry;
use relay_consensus::{
    application::{aggregator::Aggregator, signer::Signer},
    processor::Processor,
    storage::Repository,
};
use relay_cryptography::{KeyTag, PrivateKey};
use relay_p2p::{dissemination, recovery, Channel, PeerId, Peers, Receiver, Sender};
use relay_utils::Signal;
use thiserror::Error;
use tokio::task::JoinHandle;
use tracing::info;

mod config;
pub use config::{
    AggregatorConfig, BackpressureConfig, Config, DisseminationConfig, ProcessorConfig,
    RecoveryConfig,
};
pub mod fleet;

/// Channel gossiping signatures.
pub const SIGNATURES: Channel = 0;
/// Channel gossiping proofs.
pub const PROOFS: Channel = 1;
/// Channel carrying recovery requests and responses.
pub const RECOVERY: Channel = 2;

#[derive(Error, Debug)]
pub enum Error {
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
    #[error("yaml: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("invalid config: {0}")]
    InvalidConfig(&'static str),
    #[error("cryptography: {0}")]
    Cryptography(#[from] relay_cryptography::Error),
    #[error("consensus: {0}")]
    Consensus(#[from] relay_consensus::Error),
    #[error("storage: {0}")]
    Storage(#[from] relay_consensus::storage::Error),
    #[error("network: {0}")]
    Network(#[from] relay_p2p::simulated::Error),
}

/// The transport channels a [Node] runs on.
pub struct Channels<S: Sender, Rc: Receiver> {
    pub signatures: (S, Rc),
    pub proofs: (S, Rc),
    pub recovery: (S, Rc),
}

/// A relay node, ready to [start](Node::start).
pub struct Node<R: Repository, P: Peers> {
    processor: Processor<R>,
    dissemination: dissemination::Engine<R>,
    recovery: recovery::Engine<R, P>,
    aggregator: Option<Aggregator<R, dissemination::Mailbox>>,
}

impl<R: Repository, P: Peers> Node<R, P> {
    /// Builds every engine of the node and returns it along with a [Signer] that
    /// broadcasts through it.
    ///
    /// Metrics are registered under a prefix per engine.
    pub fn new(
        cfg: &Config,
        identity: PeerId,
        repository: R,
        peers: P,
        keys: impl IntoIterator<Item = (KeyTag, PrivateKey)>,
        registry: &mut Registry,
    ) -> Result<(Self, Signer<R, dissemination::Mailbox>), Error> {
        cfg.validate()?;
        let processor = Processor::new(
            cfg.processor(repository),
            registry.sub_registry_with_prefix("processor"),
        );
        let (dissemination, mailbox) = dissemination::Engine::new(
            cfg.dissemination(processor.clone(), identity),
            registry.sub_registry_with_prefix("dissemination"),
        );
        let recovery = recovery::Engine::new(
            cfg.recovery(processor.clone(), peers)?,
            registry.sub_registry_with_prefix("recovery"),
        );
        let aggregator = cfg
            .aggregator()
            .map(|aggregator| Aggregator::new(processor.clone(), mailbox.clone(), aggregator));
        let signer = Signer::new(processor.clone(), mailbox, keys);
        Ok((
            Self {
                processor,
                dissemination,
                recovery,
                aggregator,
            },
            signer,
        ))
    }

    pub fn processor(&self) -> &Processor<R> {
        &self.processor
    }

    /// Starts every engine. Each stops once `stopped` resolves.
    pub fn start<S: Sender, Rc: Receiver>(
        self,
        channels: Channels<S, Rc>,
        stopped: Signal,
    ) -> Vec<JoinHandle<()>> {
        let aggregating = self.aggregator.is_some();
        let mut handles = vec![
            self.dissemination
                .start(channels.signatures, channels.proofs, stopped.clone()),
            self.recovery.start(channels.recovery, stopped.clone()),
        ];
        if let Some(aggregator) = self.aggregator {
            handles.push(tokio::spawn(aggregator.run(stopped)));
        }
        info!(aggregating, "node started");
        handles
    }
}
