//! Implementation of a `simulated` network.

use super::{
    metrics::{Metrics, Outcome},
    Error,
};
use crate::{Channel, Message, PeerId, Recipients};
use bytes::Bytes;
use prometheus_client::registry::Registry;
use rand::{rngs::StdRng, Rng, SeedableRng};
use std::{
    collections::{BTreeMap, HashMap},
    sync::{Arc, Mutex, PoisonError},
    time::Duration,
};
use tokio::sync::{mpsc, oneshot};
use tracing::debug;

type Task = (Channel, PeerId, Recipients, Bytes, oneshot::Sender<Vec<PeerId>>);

/// Configuration for a `simulated` network.
#[derive(Clone, Copy, Debug)]
pub struct Config {
    /// Largest message a [Sender] accepts.
    pub max_message_len: usize,

    /// Messages buffered per registered channel before deliveries wait.
    pub mailbox_size: usize,

    /// Seed for link failures.
    pub seed: u64,
}

/// Describes a connection between two peers.
///
/// Links are unidirectional (and must be set up in both directions
/// for a bidirectional connection).
#[derive(Clone, Copy, Debug)]
pub struct Link {
    /// Delay before a message is delivered.
    pub latency: Duration,

    /// Probability of a message being delivered successfully (in range [0,1]).
    pub success_rate: f64,
}

#[derive(Default)]
struct State {
    links: HashMap<PeerId, HashMap<PeerId, Link>>,
    agents: BTreeMap<PeerId, HashMap<Channel, mpsc::Sender<Message>>>,
}

fn lock(state: &Mutex<State>) -> std::sync::MutexGuard<'_, State> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Implementation of a `simulated` network.
pub struct Network {
    receiver: mpsc::UnboundedReceiver<Task>,
    state: Arc<Mutex<State>>,
    rng: StdRng,
    metrics: Metrics,
}

impl Network {
    /// Create a new simulated network and the [Oracle] used to configure it.
    pub fn new(cfg: Config, registry: &mut Registry) -> (Self, Oracle) {
        let (sender, receiver) = mpsc::unbounded_channel();
        let metrics = Metrics::init(registry);
        let state = Arc::new(Mutex::new(State::default()));
        let oracle = Oracle {
            cfg,
            sender,
            state: state.clone(),
        };
        let network = Self {
            receiver,
            state,
            rng: StdRng::seed_from_u64(cfg.seed),
            metrics,
        };
        (network, oracle)
    }

    /// Run the simulated network until every [Oracle] and [Sender] is dropped.
    pub async fn run(mut self) {
        while let Some((channel, origin, recipients, message, reply)) = self.receiver.recv().await
        {
            let mut sent = Vec::new();
            {
                let state = lock(&self.state);

                // Collect recipients
                let recipients = match recipients {
                    Recipients::All => state.agents.keys().copied().collect(),
                    Recipients::Some(peers) => peers,
                    Recipients::One(peer) => vec![peer],
                };

                for recipient in recipients {
                    // Skip self
                    if recipient == origin {
                        continue;
                    }

                    // Determine if there is a link between the sender and recipient
                    let Some(link) = state
                        .links
                        .get(&origin)
                        .and_then(|links| links.get(&recipient))
                    else {
                        debug!(?recipient, reason = "no link", "dropping message");
                        continue;
                    };

                    // Determine if the recipient listens on the channel
                    let Some(mailbox) = state
                        .agents
                        .get(&recipient)
                        .and_then(|channels| channels.get(&channel))
                    else {
                        debug!(?recipient, channel, reason = "missing channel", "dropping message");
                        continue;
                    };

                    self.metrics.sent(channel);
                    let should_deliver = self.rng.gen_bool(link.success_rate);
                    let latency = link.latency;
                    let mailbox = mailbox.clone();
                    let message = message.clone();
                    let metrics = self.metrics.clone();
                    tokio::spawn(async move {
                        tokio::time::sleep(latency).await;
                        if !should_deliver {
                            debug!(?recipient, channel, "link lost message");
                            metrics.outcome(channel, Outcome::Lost);
                            return;
                        }
                        if mailbox.send((origin, message)).await.is_err() {
                            debug!(?origin, ?recipient, channel, "recipient closed");
                            metrics.outcome(channel, Outcome::Closed);
                            return;
                        }
                        metrics.outcome(channel, Outcome::Delivered);
                    });
                    sent.push(recipient);
                }
            }

            // This can only fail if the sender exited.
            let _ = reply.send(sent);
        }
    }
}

/// Registers peers and manages links of a running [Network].
#[derive(Clone)]
pub struct Oracle {
    cfg: Config,
    sender: mpsc::UnboundedSender<Task>,
    state: Arc<Mutex<State>>,
}

impl Oracle {
    /// Register `peer` on `channel`.
    ///
    /// By default, the peer will not be linked to any other peers.
    pub fn register(&self, peer: PeerId, channel: Channel) -> Result<(Sender, Receiver), Error> {
        let mut state = lock(&self.state);
        let entry = state.agents.entry(peer).or_default();
        if entry.contains_key(&channel) {
            return Err(Error::ChannelAlreadyRegistered(channel));
        }
        let (sender, receiver) = mpsc::channel(self.cfg.mailbox_size.max(1));
        entry.insert(channel, sender);
        Ok((
            Sender {
                channel,
                max_size: self.cfg.max_message_len,
                me: peer,
                network: self.sender.clone(),
            },
            Receiver { receiver },
        ))
    }

    /// Create a unidirectional link between two peers.
    ///
    /// Link can be called multiple times for the same sender/receiver. The latest
    /// setting will be used.
    pub fn link(&self, sender: PeerId, receiver: PeerId, link: Link) -> Result<(), Error> {
        if sender == receiver {
            return Err(Error::LinkingSelf);
        }
        if !(0.0..=1.0).contains(&link.success_rate) {
            return Err(Error::InvalidSuccessRate(link.success_rate));
        }
        lock(&self.state)
            .links
            .entry(sender)
            .or_default()
            .insert(receiver, link);
        Ok(())
    }

    /// Remove the link from `sender` to `receiver`, if any.
    pub fn unlink(&self, sender: PeerId, receiver: PeerId) {
        if let Some(links) = lock(&self.state).links.get_mut(&sender) {
            links.remove(&receiver);
        }
    }

    /// The view of connected peers from `peer`.
    pub fn peers(&self, peer: PeerId) -> Connected {
        Connected {
            me: peer,
            state: self.state.clone(),
        }
    }
}

/// Implementation of [crate::Peers] for the simulated network.
///
/// A peer counts as connected if there is a link to it and it registered any channel.
#[derive(Clone)]
pub struct Connected {
    me: PeerId,
    state: Arc<Mutex<State>>,
}

impl crate::Peers for Connected {
    async fn connected(&self) -> Vec<PeerId> {
        let state = lock(&self.state);
        let Some(links) = state.links.get(&self.me) else {
            return Vec::new();
        };
        let mut peers: Vec<_> = links
            .keys()
            .filter(|peer| state.agents.contains_key(*peer))
            .copied()
            .collect();
        peers.sort();
        peers
    }
}

/// Implementation of a [crate::Sender] for the simulated network.
///
/// All messages are delivered at the same priority.
#[derive(Clone, Debug)]
pub struct Sender {
    channel: Channel,
    max_size: usize,
    me: PeerId,
    network: mpsc::UnboundedSender<Task>,
}

impl crate::Sender for Sender {
    type Error = Error;

    async fn send(
        &mut self,
        recipients: Recipients,
        message: Bytes,
        _priority: bool,
    ) -> Result<Vec<PeerId>, Error> {
        // Check message size
        if message.len() > self.max_size {
            return Err(Error::MessageTooLarge(message.len()));
        }

        let (sender, receiver) = oneshot::channel();
        self.network
            .send((self.channel, self.me, recipients, message, sender))
            .map_err(|_| Error::NetworkClosed)?;
        receiver.await.map_err(|_| Error::NetworkClosed)
    }
}

/// Implementation of a [crate::Receiver] for the simulated network.
#[derive(Debug)]
pub struct Receiver {
    receiver: mpsc::Receiver<Message>,
}

impl crate::Receiver for Receiver {
    type Error = Error;

    async fn recv(&mut self) -> Result<Message, Error> {
        self.receiver.recv().await.ok_or(Error::NetworkClosed)
    }
}
