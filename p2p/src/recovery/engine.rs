use super::{
    metrics::{Entity, Metrics, Round},
    server::Server,
    wire::{self, Message, Payload, Request, Response},
    Config, Error,
};
use crate::{PeerId, Peers, Receiver, Recipients, Sender};
use prometheus_client::registry::Registry;
use rand::{rngs::StdRng, seq::SliceRandom, SeedableRng};
use relay_consensus::{
    processor::{Origin, Processor},
    storage::{self, Repository},
    types::{Epoch, RequestId, ValidatorSet},
    Kind,
};
use relay_utils::{codec::Encode, Bitmap, Signal};
use std::{
    collections::{HashMap, HashSet},
    future::Future,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
    time::Duration,
};
use tokio::{
    sync::oneshot,
    task::JoinHandle,
    time::{interval, MissedTickBehavior},
};
use tracing::{debug, info, trace, warn};

/// What this node is missing.
#[derive(Debug, Default, PartialEq, Eq)]
pub(super) struct Wants {
    /// Missing signatures of eligible validators, by request.
    pub signatures: Vec<(RequestId, Bitmap)>,
    /// Requests without a proof.
    pub proofs: Vec<RequestId>,
}

impl Wants {
    fn is_empty(&self) -> bool {
        self.signatures.is_empty() && self.proofs.is_empty()
    }
}

/// Periodically fills gaps left by gossip from a random connected peer, and serves peers
/// doing the same.
pub struct Engine<R: Repository, P: Peers> {
    processor: Processor<R>,
    peers: P,
    period: Duration,
    round_timeout: Duration,
    epoch_window: u64,
    max_requests: usize,
    rng: StdRng,
    pending: Pending,
    server: Server<R>,
    pub(super) metrics: Arc<Metrics>,
}

impl<R: Repository, P: Peers> Engine<R, P> {
    pub fn new(cfg: Config<R, P>, registry: &mut Registry) -> Self {
        let metrics = Arc::new(Metrics::init(registry));
        let pending = Pending::default();
        let codec = wire::Config {
            limits: cfg.limits,
            max_items: cfg.max_response_items,
        };
        let server = Server::new(
            cfg.processor.repository().clone(),
            cfg.serve_quota,
            codec,
            pending.clone(),
            metrics.clone(),
        );
        Self {
            processor: cfg.processor,
            peers: cfg.peers,
            period: cfg.period,
            round_timeout: cfg.round_timeout,
            epoch_window: cfg.epoch_window,
            max_requests: cfg.max_requests,
            rng: StdRng::from_entropy(),
            pending,
            server,
            metrics,
        }
    }

    /// Starts serving peers and running a round every period.
    pub fn start<S: Sender, Rc: Receiver>(
        self,
        network: (S, Rc),
        stopped: Signal,
    ) -> JoinHandle<()> {
        tokio::spawn(self.run(network, stopped))
    }

    async fn run<S: Sender, Rc: Receiver>(mut self, network: (S, Rc), mut stopped: Signal) {
        let (mut sender, receiver) = network;
        let server = self.serve(sender.clone(), receiver, stopped.clone());
        info!(period = ?self.period, timeout = ?self.round_timeout, "recovery started");

        let mut ticker = interval(self.period.max(Duration::from_millis(1)));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = &mut stopped => break,
                _ = ticker.tick() => {
                    tokio::select! {
                        _ = &mut stopped => break,
                        _ = self.sync(&mut sender) => {},
                    }
                },
            }
        }
        debug!("shutdown");
        let _ = server.await;
    }

    /// Spawns the task reading the recovery channel.
    pub(super) fn serve<S: Sender, Rc: Receiver>(
        &self,
        sender: S,
        receiver: Rc,
        stopped: Signal,
    ) -> JoinHandle<()> {
        tokio::spawn(self.server.clone().run(sender, receiver, stopped))
    }

    /// Runs one round under the round timeout and records its outcome.
    pub(super) async fn sync<S: Sender>(&mut self, sender: &mut S) -> Round {
        let outcome = match tokio::time::timeout(self.round_timeout, self.round(sender)).await {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(err)) => {
                warn!(?err, "round failed");
                Round::Failed
            }
            Err(_) => {
                warn!(timeout = ?self.round_timeout, "round timed out");
                Round::Timeout
            }
        };
        trace!(?outcome, "round finished");
        self.metrics.round(outcome);
        outcome
    }

    async fn round<S: Sender>(&mut self, sender: &mut S) -> Result<Round, Error> {
        let peers = self.peers.connected().await;
        let Some(peer) = peers.choose(&mut self.rng).copied() else {
            debug!("no connected peers, skipping round");
            return Ok(Round::Skipped);
        };
        let wants = self.wants().await?;
        if wants.is_empty() {
            return Ok(Round::Idle);
        }
        debug!(
            ?peer,
            signatures = wants.signatures.len(),
            proofs = wants.proofs.len(),
            "requesting missing items"
        );

        if !wants.signatures.is_empty() {
            let wanted: HashMap<_, _> = wants.signatures.iter().cloned().collect();
            let response = self
                .request(sender, peer, Request::WantSignatures(wants.signatures))
                .await?;
            let Response::Signatures(groups) = response else {
                return Err(Error::UnexpectedResponse);
            };
            for (request_id, items) in groups {
                let Some(bitmap) = wanted.get(&request_id) else {
                    continue;
                };
                for (index, signature) in items {
                    if !bitmap.contains(index) || signature.request_id != request_id {
                        continue;
                    }
                    let processor = self.processor.clone();
                    let result = Self::detached(async move {
                        processor
                            .process_signature(signature, Origin::Remote)
                            .await
                            .map(|_| ())
                    })
                    .await?;
                    if self.accepted(result)? {
                        self.metrics.recovered(Entity::Signature);
                    }
                }
            }
        }

        let wanted: HashSet<_> = wants.proofs.iter().copied().collect();
        let response = self
            .request(sender, peer, Request::WantProofs(wants.proofs))
            .await?;
        let Response::Proofs(proofs) = response else {
            return Err(Error::UnexpectedResponse);
        };
        for proof in proofs {
            if !wanted.contains(&proof.request_id()) {
                continue;
            }
            let processor = self.processor.clone();
            let result =
                Self::detached(async move { processor.process_aggregation_proof(proof).await })
                    .await?;
            if self.accepted(result)? {
                self.metrics.recovered(Entity::Proof);
            }
        }
        Ok(Round::Completed)
    }

    /// Runs processor work on its own task so that a round timing out cannot interrupt it
    /// between storage writes.
    async fn detached<F>(work: F) -> Result<Result<(), relay_consensus::Error>, Error>
    where
        F: Future<Output = Result<(), relay_consensus::Error>> + Send + 'static,
    {
        tokio::spawn(work).await.map_err(|_| Error::Canceled)
    }

    /// Returns whether a recovered item was new. Only local failures abort the round.
    fn accepted(&self, result: Result<(), relay_consensus::Error>) -> Result<bool, Error> {
        match result {
            Ok(()) => Ok(true),
            Err(err) => match err.kind() {
                Kind::Internal => Err(Error::Processor(err)),
                _ => Ok(false),
            },
        }
    }

    /// Lists the signatures and proofs still missing for pending requests.
    pub(super) async fn wants(&self) -> Result<Wants, Error> {
        let repository = self.processor.repository();
        let latest = match repository.latest_epoch().await {
            Ok(epoch) => epoch,
            Err(storage::Error::NotFound) => return Ok(Wants::default()),
            Err(err) => return Err(err.into()),
        };
        let min_epoch = latest.saturating_sub(self.epoch_window);
        let requests = repository
            .pending_requests(min_epoch, self.max_requests)
            .await?;

        let mut sets: HashMap<Epoch, Arc<ValidatorSet>> = HashMap::new();
        let mut wants = Wants::default();
        for request in requests {
            wants.proofs.push(request.request_id);

            let set = match sets.get(&request.epoch) {
                Some(set) => set.clone(),
                None => match repository.validator_set(request.epoch).await {
                    Ok(set) => {
                        sets.insert(request.epoch, set.clone());
                        set
                    }
                    Err(storage::Error::NotFound) => continue,
                    Err(err) => return Err(err.into()),
                },
            };
            let map = match repository.signature_map(request.request_id).await {
                Ok(map) => map,
                Err(storage::Error::NotFound) => continue,
                Err(err) => return Err(err.into()),
            };
            let missing: Bitmap = map
                .missing_validators()
                .iter()
                .filter(|index| set.is_eligible(*index, request.key_tag))
                .collect();
            if !missing.is_empty() {
                wants.signatures.push((request.request_id, missing));
            }
        }
        Ok(wants)
    }

    async fn request<S: Sender>(
        &self,
        sender: &mut S,
        peer: PeerId,
        request: Request,
    ) -> Result<Response, Error> {
        let mut waiter = self.pending.register(peer);
        let message = Message {
            id: waiter.id,
            payload: Payload::Request(request),
        };
        let sent = sender
            .send(Recipients::One(peer), message.encode(), false)
            .await
            .map_err(|err| Error::Send(err.to_string()))?;
        if sent.is_empty() {
            return Err(Error::Unreachable(peer));
        }
        match (&mut waiter.receiver).await {
            Ok(Some(response)) => Ok(response),
            Ok(None) => Err(Error::Refused(peer)),
            Err(_) => Err(Error::Canceled),
        }
    }
}

#[derive(Default)]
struct PendingState {
    next: u64,
    waiting: HashMap<u64, (PeerId, oneshot::Sender<Option<Response>>)>,
}

/// Requests awaiting a response, by message ID.
#[derive(Clone, Default)]
pub(super) struct Pending {
    state: Arc<Mutex<PendingState>>,
}

impl Pending {
    fn lock(&self) -> MutexGuard<'_, PendingState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn register(&self, peer: PeerId) -> Waiter {
        let (sender, receiver) = oneshot::channel();
        let mut state = self.lock();
        let id = state.next;
        state.next = state.next.wrapping_add(1);
        state.waiting.insert(id, (peer, sender));
        Waiter {
            id,
            receiver,
            pending: self.clone(),
        }
    }

    /// Delivers a response (or `None` for a refusal) if `peer` was asked under `id`.
    pub(super) fn resolve(&self, peer: PeerId, id: u64, response: Option<Response>) -> bool {
        let mut state = self.lock();
        if !matches!(state.waiting.get(&id), Some((expected, _)) if *expected == peer) {
            return false;
        }
        let Some((_, sender)) = state.waiting.remove(&id) else {
            return false;
        };
        sender.send(response).is_ok()
    }
}

/// Removes its entry from [Pending] when dropped (including when a round times out).
struct Waiter {
    id: u64,
    receiver: oneshot::Receiver<Option<Response>>,
    pending: Pending,
}

impl Drop for Waiter {
    fn drop(&mut self) {
        self.pending.lock().waiting.remove(&self.id);
    }
}
