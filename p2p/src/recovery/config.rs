use crate::Peers;
use governor::Quota;
use relay_consensus::{processor::Processor, storage::Repository, types::Limits};
use std::time::Duration;

/// Configuration for the [Engine](super::Engine).
pub struct Config<R: Repository, P: Peers> {
    /// Re-validates everything recovered and serves from its repository.
    pub processor: Processor<R>,

    /// Source of candidate peers for each round.
    pub peers: P,

    /// Field limits applied when decoding messages.
    pub limits: Limits,

    /// Time between the start of consecutive rounds.
    pub period: Duration,

    /// Time allowed for a single round (independent of `period`).
    pub round_timeout: Duration,

    /// Number of epochs before the latest that are still synced.
    pub epoch_window: u64,

    /// Pending requests considered per round.
    pub max_requests: usize,

    /// Items served per request (and accepted per response).
    pub max_response_items: usize,

    /// Rate at which each peer may send requests.
    pub serve_quota: Quota,
}
