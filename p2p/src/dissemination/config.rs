use crate::{pool, PeerId};
use relay_consensus::{processor::Processor, storage::Repository, types::Limits};

/// Configuration for the [Engine](super::Engine).
pub struct Config<R: Repository> {
    /// Receives everything decoded from the network.
    pub processor: Processor<R>,

    /// This node's identity on the transport (stamped on published envelopes).
    pub identity: PeerId,

    /// Field limits applied when decoding payloads.
    pub limits: Limits,

    /// The maximum size of the mailbox backlog.
    pub mailbox_size: usize,

    /// Workers verifying received items.
    pub pool: pool::Config,
}
