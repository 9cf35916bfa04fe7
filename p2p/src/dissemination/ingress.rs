use relay_consensus::{
    application::Broadcaster,
    types::{AggregationProof, Signature},
};
use tokio::sync::mpsc;
use tracing::warn;

/// Message types that can be sent to the `Mailbox`
pub enum Message {
    /// Publish a signature on the signature topic.
    Signature(Signature),

    /// Publish a proof on the proof topic.
    Proof(AggregationProof),
}

/// Ingress mailbox for [Engine](super::Engine).
#[derive(Clone)]
pub struct Mailbox {
    sender: mpsc::Sender<Message>,
}

impl Mailbox {
    pub(super) fn new(sender: mpsc::Sender<Message>) -> Self {
        Self { sender }
    }
}

impl Broadcaster for Mailbox {
    async fn broadcast_signature(&mut self, signature: Signature) {
        if self.sender.send(Message::Signature(signature)).await.is_err() {
            warn!("dissemination engine stopped, signature not published");
        }
    }

    async fn broadcast_proof(&mut self, proof: AggregationProof) {
        if self.sender.send(Message::Proof(proof)).await.is_err() {
            warn!("dissemination engine stopped, proof not published");
        }
    }
}
