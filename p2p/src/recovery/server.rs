use super::{
    engine::Pending,
    metrics::{Metrics, Serve},
    wire::{self, Message, Payload, Request, Response},
};
use crate::{PeerId, Receiver, Recipients, Sender};
use bytes::Bytes;
use governor::{clock::DefaultClock, state::keyed::HashMapStateStore, Quota, RateLimiter};
use relay_consensus::storage::{self, Repository};
use relay_utils::{
    codec::{Decode, Encode},
    Signal,
};
use std::sync::Arc;
use tracing::{debug, trace, warn};

type Limiter = RateLimiter<PeerId, HashMapStateStore<PeerId>, DefaultClock>;

/// Reads the recovery channel: answers requests from the repository and hands responses to
/// the rounds waiting for them.
#[derive(Clone)]
pub(super) struct Server<R: Repository> {
    repository: R,
    limiter: Arc<Limiter>,
    codec: wire::Config,
    pending: Pending,
    metrics: Arc<Metrics>,
}

impl<R: Repository> Server<R> {
    pub(super) fn new(
        repository: R,
        quota: Quota,
        codec: wire::Config,
        pending: Pending,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self {
            repository,
            limiter: Arc::new(RateLimiter::hashmap(quota)),
            codec,
            pending,
            metrics,
        }
    }

    pub(super) async fn run<S: Sender, Rc: Receiver>(
        self,
        mut sender: S,
        mut receiver: Rc,
        mut stopped: Signal,
    ) {
        loop {
            tokio::select! {
                _ = &mut stopped => break,
                message = receiver.recv() => {
                    let (peer, message) = match message {
                        Ok(message) => message,
                        Err(err) => {
                            debug!(?err, "receiver closed");
                            break;
                        }
                    };
                    self.handle(&mut sender, peer, message).await;
                },
            }
        }
    }

    async fn handle<S: Sender>(&self, sender: &mut S, peer: PeerId, message: Bytes) {
        let message = match Message::decode_cfg(message, &self.codec) {
            Ok(message) => message,
            Err(err) => {
                debug!(?peer, ?err, "malformed message");
                self.metrics.malformed.inc();
                return;
            }
        };
        match message.payload {
            Payload::Request(request) => self.serve(sender, peer, message.id, request).await,
            Payload::Response(response) => {
                if !self.pending.resolve(peer, message.id, Some(response)) {
                    trace!(?peer, id = message.id, "unexpected response");
                }
            }
            Payload::Error => {
                self.pending.resolve(peer, message.id, None);
            }
        }
    }

    async fn serve<S: Sender>(&self, sender: &mut S, peer: PeerId, id: u64, request: Request) {
        let payload = if self.limiter.check_key(&peer).is_err() {
            debug!(?peer, "rate limited");
            self.metrics.served(Serve::RateLimited);
            Payload::Error
        } else {
            match self.respond(request).await {
                Ok(response) => {
                    trace!(?peer, id, items = response.items(), "serving");
                    self.metrics.served(Serve::Served);
                    Payload::Response(response)
                }
                Err(err) => {
                    warn!(?peer, ?err, "failed to serve");
                    self.metrics.served(Serve::Failed);
                    Payload::Error
                }
            }
        };
        let message = Message { id, payload }.encode();
        if let Err(err) = sender.send(Recipients::One(peer), message, false).await {
            debug!(?peer, ?err, "failed to respond");
        }
    }

    /// Collects at most `max_items` stored items matching `request`.
    async fn respond(&self, request: Request) -> Result<Response, storage::Error> {
        let mut remaining = self.codec.max_items;
        match request {
            Request::WantSignatures(wants) => {
                let mut groups = Vec::new();
                for (request_id, wanted) in wants {
                    if remaining == 0 {
                        break;
                    }
                    let items: Vec<_> = self
                        .repository
                        .signatures(request_id)
                        .await?
                        .into_iter()
                        .filter(|(index, _)| wanted.contains(*index))
                        .take(remaining)
                        .collect();
                    if items.is_empty() {
                        continue;
                    }
                    remaining -= items.len();
                    groups.push((request_id, items));
                }
                Ok(Response::Signatures(groups))
            }
            Request::WantProofs(request_ids) => {
                let mut proofs = Vec::new();
                for request_id in request_ids.into_iter().take(remaining) {
                    match self.repository.aggregation_proof(request_id).await {
                        Ok(proof) => proofs.push(proof),
                        Err(storage::Error::NotFound) => {}
                        Err(err) => return Err(err),
                    }
                }
                Ok(Response::Proofs(proofs))
            }
        }
    }
}
