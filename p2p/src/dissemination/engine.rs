use super::{
    ingress::{Mailbox, Message},
    metrics::{Metrics, Status, Topic},
    Config,
};
use crate::{
    pool::{self, Pool},
    wire::{Envelope, MAX_ENVELOPE_SIZE},
    PeerId, Receiver, Recipients, Sender,
};
use bytes::Bytes;
use prometheus_client::registry::Registry;
use relay_consensus::{
    processor::{Origin, Processor},
    storage::Repository,
    types::{AggregationProof, Limits, Signature},
};
use relay_utils::{
    codec::{Decode, Encode, Read},
    unix_millis, Signal,
};
use std::{sync::Arc, time::SystemTime};
use tokio::{sync::mpsc, task::JoinHandle};
use tracing::{debug, info, trace, warn};

/// Publishes local signatures and proofs and feeds received ones to the processor.
///
/// Each inbound topic is served by its own task, which only checks sizes, decodes, and
/// authenticates the envelope before handing the item to the worker pool.
pub struct Engine<R: Repository> {
    identity: PeerId,
    mailbox: mpsc::Receiver<Message>,
    inbound: Inbound<R>,
}

impl<R: Repository> Engine<R> {
    /// Creates a new engine and the mailbox used to publish through it.
    ///
    /// Must be called within a tokio runtime (the worker pool starts immediately).
    pub fn new(cfg: Config<R>, registry: &mut Registry) -> (Self, Mailbox) {
        let (sender, mailbox) = mpsc::channel(cfg.mailbox_size.max(1));
        let metrics = Arc::new(Metrics::init(registry));
        let pool = Pool::new(cfg.pool, registry.sub_registry_with_prefix("pool"));
        let engine = Self {
            identity: cfg.identity,
            mailbox,
            inbound: Inbound {
                processor: cfg.processor,
                limits: cfg.limits,
                pool,
                metrics,
            },
        };
        (engine, Mailbox::new(sender))
    }

    /// Starts the engine on the signature and proof topics.
    pub fn start<S: Sender, Rc: Receiver>(
        self,
        signatures: (S, Rc),
        proofs: (S, Rc),
        stopped: Signal,
    ) -> JoinHandle<()> {
        tokio::spawn(self.run(signatures, proofs, stopped))
    }

    async fn run<S: Sender, Rc: Receiver>(
        mut self,
        signatures: (S, Rc),
        proofs: (S, Rc),
        mut stopped: Signal,
    ) {
        let (mut signature_sender, signature_receiver) = signatures;
        let (mut proof_sender, proof_receiver) = proofs;
        let signature_handler = tokio::spawn(self.inbound.clone().run(
            Topic::Signatures,
            signature_receiver,
            stopped.clone(),
        ));
        let proof_handler = tokio::spawn(self.inbound.clone().run(
            Topic::Proofs,
            proof_receiver,
            stopped.clone(),
        ));
        info!(identity = ?self.identity, "dissemination started");

        loop {
            tokio::select! {
                _ = &mut stopped => {
                    debug!("shutdown");
                    break;
                },
                message = self.mailbox.recv() => {
                    let Some(message) = message else {
                        debug!("mailbox closed");
                        break;
                    };
                    match message {
                        Message::Signature(signature) => {
                            self.publish(
                                &mut signature_sender,
                                Topic::Signatures,
                                signature.encode(),
                                false,
                            )
                            .await;
                        }
                        Message::Proof(proof) => {
                            self.publish(&mut proof_sender, Topic::Proofs, proof.encode(), true)
                                .await;
                        }
                    }
                },
            }
        }

        let _ = signature_handler.await;
        let _ = proof_handler.await;
    }

    #[cfg(test)]
    pub(super) fn inbound_metrics(&self) -> Arc<Metrics> {
        self.inbound.metrics.clone()
    }

    async fn publish<S: Sender>(
        &self,
        sender: &mut S,
        topic: Topic,
        payload: Bytes,
        priority: bool,
    ) {
        let envelope = Envelope {
            sender: self.identity,
            timestamp: unix_millis(SystemTime::now()),
            payload,
        };
        match sender
            .send(Recipients::All, envelope.encode(), priority)
            .await
        {
            Ok(peers) => {
                trace!(?topic, peers = peers.len(), "published");
                self.inbound.metrics.publish(topic, Status::Success);
            }
            Err(err) => {
                warn!(?topic, ?err, "failed to publish");
                self.inbound.metrics.publish(topic, Status::Failure);
            }
        }
    }
}

/// Handles one inbound topic.
#[derive(Clone)]
struct Inbound<R: Repository> {
    processor: Processor<R>,
    limits: Limits,
    pool: Pool,
    metrics: Arc<Metrics>,
}

impl<R: Repository> Inbound<R> {
    async fn run<Rc: Receiver>(self, topic: Topic, mut receiver: Rc, mut stopped: Signal) {
        loop {
            tokio::select! {
                _ = &mut stopped => break,
                message = receiver.recv() => {
                    let (peer, message) = match message {
                        Ok(message) => message,
                        Err(err) => {
                            debug!(?topic, ?err, "receiver closed");
                            break;
                        }
                    };
                    self.handle(topic, peer, message).await;
                },
            }
        }
    }

    async fn handle(&self, topic: Topic, peer: PeerId, message: Bytes) {
        if message.len() > MAX_ENVELOPE_SIZE {
            debug!(?topic, ?peer, size = message.len(), "oversized message");
            self.metrics.receive(topic, Status::Oversized);
            return;
        }
        let envelope = match Envelope::decode_cfg(message, &MAX_ENVELOPE_SIZE) {
            Ok(envelope) => envelope,
            Err(err) => {
                debug!(?topic, ?peer, ?err, "malformed envelope");
                self.metrics.receive(topic, Status::Malformed);
                return;
            }
        };
        if envelope.sender != peer {
            debug!(?topic, ?peer, claimed = ?envelope.sender, "sender mismatch");
            self.metrics.receive(topic, Status::Spoofed);
            return;
        }

        let processor = self.processor.clone();
        let submitted = match topic {
            Topic::Signatures => {
                let Some(signature) = self.decode::<Signature>(topic, &peer, envelope.payload)
                else {
                    return;
                };
                self.pool
                    .submit(async move {
                        let _ = processor
                            .process_signature(signature, Origin::Remote)
                            .await;
                    })
                    .await
            }
            Topic::Proofs => {
                let Some(proof) = self.decode::<AggregationProof>(topic, &peer, envelope.payload)
                else {
                    return;
                };
                self.pool
                    .submit(async move {
                        let _ = processor.process_aggregation_proof(proof).await;
                    })
                    .await
            }
        };
        match submitted {
            Ok(()) => self.metrics.receive(topic, Status::Success),
            Err(pool::Error::Closed) => {
                warn!(?topic, "worker pool closed");
                self.metrics.receive(topic, Status::Dropped);
            }
            Err(err) => {
                debug!(?topic, ?peer, ?err, "dropped message");
                self.metrics.receive(topic, Status::Dropped);
            }
        }
    }

    fn decode<T: Read<Cfg = Limits>>(
        &self,
        topic: Topic,
        peer: &PeerId,
        payload: Bytes,
    ) -> Option<T> {
        match T::decode_cfg(payload, &self.limits) {
            Ok(item) => Some(item),
            Err(err) => {
                debug!(?topic, ?peer, ?err, "malformed payload");
                self.metrics.receive(topic, Status::Malformed);
                None
            }
        }
    }
}
