use super::Broadcaster;
use crate::{
    events::{Event, SignatureProcessed},
    policy::Policy,
    processor::Processor,
    storage::{self, Repository},
    types::{AggregationProof, SignatureRequest, ValidatorSet, VerificationType},
    Error, Kind,
};
use relay_utils::{Backpressure, Signal};
use std::{collections::BTreeSet, sync::Arc, time::Duration};
use tokio::{
    sync::mpsc,
    time::{interval, MissedTickBehavior},
};
use tracing::{debug, info, trace, warn};

/// Configuration for the [Aggregator].
pub struct Config {
    /// Decides when a request is ready.
    pub policy: Arc<dyn Policy>,

    /// Proof system to produce.
    pub verification_type: VerificationType,

    /// Number of processor events buffered for the aggregator.
    pub mailbox_size: usize,

    /// How long the processor waits for space in the mailbox before dropping an event.
    pub mailbox_timeout: Duration,

    /// How often requests without a proof are checked again, in case the event that made
    /// one ready was dropped.
    pub recheck_interval: Duration,

    /// Maximum number of requests looked at per recheck.
    pub max_recheck: usize,
}

/// Turns requests that reached quorum into proofs and shares them.
pub struct Aggregator<R: Repository, B: Broadcaster> {
    processor: Processor<R>,
    broadcaster: B,
    policy: Arc<dyn Policy>,
    verification_type: VerificationType,
    events: mpsc::Receiver<Event>,
    recheck_interval: Duration,
    max_recheck: usize,
}

impl<R: Repository, B: Broadcaster> Aggregator<R, B> {
    pub fn new(processor: Processor<R>, broadcaster: B, cfg: Config) -> Self {
        let events = processor.subscribe(
            cfg.mailbox_size,
            Backpressure::Block(cfg.mailbox_timeout),
        );
        Self {
            processor,
            broadcaster,
            policy: cfg.policy,
            verification_type: cfg.verification_type,
            events,
            recheck_interval: cfg.recheck_interval,
            max_recheck: cfg.max_recheck,
        }
    }

    /// Handles processor events until `stopped` fires or the processor is dropped.
    pub async fn run(mut self, mut stopped: Signal) {
        info!(verification_type = ?self.verification_type, "aggregator started");
        let mut recheck = interval(self.recheck_interval.max(Duration::from_millis(1)));
        recheck.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = &mut stopped => {
                    debug!("shutdown");
                    break;
                },
                event = self.events.recv() => {
                    let Some(event) = event else {
                        debug!("processor closed");
                        break;
                    };
                    let Event::SignatureProcessed(processed) = event else {
                        continue;
                    };
                    let result = self.handle(processed).await;
                    Self::report(result);
                },
                _ = recheck.tick() => {
                    if let Err(err) = self.recheck().await {
                        warn!(?err, "recheck failed");
                    }
                },
            }
        }
    }

    fn report(result: Result<(), Error>) {
        if let Err(err) = result {
            match err.kind() {
                Kind::AlreadyExists | Kind::Unavailable => debug!(?err, "aggregation skipped"),
                _ => warn!(?err, "aggregation failed"),
            }
        }
    }

    async fn handle(&mut self, processed: SignatureProcessed) -> Result<(), Error> {
        if !processed.quorum_reached {
            return Ok(());
        }
        self.try_aggregate(SignatureRequest::from(&processed.signature))
            .await
    }

    /// Looks again at the requests of the latest two epochs that still lack a proof.
    async fn recheck(&mut self) -> Result<(), Error> {
        let repository = self.processor.repository();
        let latest = match repository.latest_epoch().await {
            Ok(epoch) => epoch,
            Err(storage::Error::NotFound) => return Ok(()),
            Err(err) => return Err(err.into()),
        };
        let requests = repository
            .pending_requests(latest.saturating_sub(1), self.max_recheck)
            .await?;
        trace!(requests = requests.len(), "rechecking pending requests");
        for request in requests {
            let result = self.try_aggregate(request).await;
            Self::report(result);
        }
        Ok(())
    }

    /// Aggregates `request` if the policy accepts its current signature map and no proof
    /// exists or is being produced.
    async fn try_aggregate(&mut self, request: SignatureRequest) -> Result<(), Error> {
        let request_id = request.request_id;
        let repository = self.processor.repository();
        let map = match repository.signature_map(request_id).await {
            Ok(map) => map,
            Err(storage::Error::NotFound) => return Ok(()),
            Err(err) => return Err(err.into()),
        };
        let set = match repository.validator_set(map.epoch()).await {
            Ok(set) => set,
            Err(storage::Error::NotFound) => {
                return Err(Error::ValidatorSetNotFound(map.epoch()))
            }
            Err(err) => return Err(err.into()),
        };
        if !self.policy.should_aggregate(&map, &set) {
            return Ok(());
        }
        match repository.aggregation_proof(request_id).await {
            Ok(_) => return Ok(()),
            Err(storage::Error::NotFound) => {}
            Err(err) => return Err(err.into()),
        }
        if !self.processor.begin_aggregation(request_id) {
            return Ok(());
        }

        let signers: BTreeSet<u32> = map.signed().iter().collect();
        let proof = match self.aggregate(&request, &signers, &set).await {
            Ok(proof) => proof,
            Err(err) => {
                self.processor.end_aggregation(&request_id);
                return Err(err);
            }
        };
        info!(?request_id, epoch = proof.epoch, "proof produced");
        self.broadcaster.broadcast_proof(proof).await;
        Ok(())
    }

    /// Aggregates the stored signatures of the validators in `signers`.
    async fn aggregate(
        &self,
        request: &SignatureRequest,
        signers: &BTreeSet<u32>,
        set: &ValidatorSet,
    ) -> Result<AggregationProof, Error> {
        let aggregator = self
            .processor
            .aggregator(self.verification_type)
            .ok_or(Error::UnsupportedVerificationType(self.verification_type))?;
        let signatures: Vec<_> = self
            .processor
            .repository()
            .signatures(request.request_id)
            .await?
            .into_iter()
            .filter(|(index, _)| signers.contains(index))
            .map(|(_, signature)| signature)
            .collect();
        let proof = aggregator
            .aggregate(set, request.key_tag, &request.message_hash, &signatures)
            .map_err(Error::Aggregation)?;
        self.processor
            .process_aggregation_proof(proof.clone())
            .await?;
        Ok(proof)
    }
}
