//! Fan-out of processor events to independent listeners.
//!
//! Each subscriber gets its own bounded queue and chooses what happens when it falls
//! behind: wait (up to a timeout) or drop the event. A slow subscriber never holds up
//! other subscribers for longer than its own timeout.

use crate::{
    signature_map::SignatureMap,
    types::{AggregationProof, Signature},
};
use prometheus_client::{metrics::counter::Counter, registry::Registry};
use relay_utils::Backpressure;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::{debug, trace};

/// A signature accepted by the processor.
#[derive(Clone, Debug)]
pub struct SignatureProcessed {
    pub signature: Signature,
    pub validator_index: u32,
    /// The signature map after the signature was recorded.
    pub map: SignatureMap,
    pub quorum_reached: bool,
}

#[derive(Clone, Debug)]
pub enum Event {
    SignatureProcessed(SignatureProcessed),
    AggregationProofReady(AggregationProof),
}

struct Subscriber<T> {
    sender: mpsc::Sender<T>,
    backpressure: Backpressure,
}

#[derive(Clone, Default)]
struct Metrics {
    dropped: Counter,
    timed_out: Counter,
}

/// Publishes values to every subscriber.
#[derive(Clone)]
pub struct Publisher<T> {
    subscribers: Arc<Mutex<Vec<Subscriber<T>>>>,
    metrics: Metrics,
}

impl<T: Clone + Send + 'static> Publisher<T> {
    pub fn new(registry: &mut Registry) -> Self {
        let metrics = Metrics::default();
        registry.register(
            "dropped",
            "Events dropped because a subscriber queue was full",
            metrics.dropped.clone(),
        );
        registry.register(
            "timed_out",
            "Events dropped after waiting for a subscriber queue",
            metrics.timed_out.clone(),
        );
        Self {
            subscribers: Arc::new(Mutex::new(Vec::new())),
            metrics,
        }
    }

    /// Registers a subscriber with a queue of `capacity` events (at least one).
    pub fn subscribe(&self, capacity: usize, backpressure: Backpressure) -> mpsc::Receiver<T> {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        self.subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Subscriber {
                sender,
                backpressure,
            });
        receiver
    }

    /// Delivers `value` to all subscribers, forgetting those that hung up.
    pub async fn publish(&self, value: T) {
        let targets: Vec<_> = {
            let mut subscribers = self
                .subscribers
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            subscribers.retain(|subscriber| !subscriber.sender.is_closed());
            subscribers
                .iter()
                .map(|subscriber| (subscriber.sender.clone(), subscriber.backpressure))
                .collect()
        };

        for (sender, backpressure) in targets {
            match backpressure {
                Backpressure::Drop => {
                    if let Err(TrySendError::Full(_)) = sender.try_send(value.clone()) {
                        trace!("subscriber full, dropping event");
                        self.metrics.dropped.inc();
                    }
                }
                Backpressure::Block(timeout) => {
                    if tokio::time::timeout(timeout, sender.send(value.clone()))
                        .await
                        .is_err()
                    {
                        debug!(?timeout, "subscriber did not accept event in time");
                        self.metrics.timed_out.inc();
                    }
                }
            }
        }
    }

    pub fn subscribers(&self) -> usize {
        self.subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}
