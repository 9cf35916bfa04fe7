//! Best-effort gossip of signatures and proofs.
//!
//! Two topics carry [relay_consensus::types::Signature]s and
//! [relay_consensus::types::AggregationProof]s, each wrapped in a [crate::wire::Envelope]
//! naming the publisher. Publishing is fire-and-forget: nothing is acknowledged or retried,
//! and gaps are filled by [crate::recovery].
//!
//! On receipt, a message is rejected if it is larger than
//! [crate::wire::MAX_ENVELOPE_SIZE], if the envelope's sender is not the authenticated
//! peer, or if any payload field exceeds its [relay_consensus::types::Limits]. Accepted
//! items are queued on a bounded [crate::pool::Pool] and processed as remote submissions.

mod config;
pub use config::Config;
mod engine;
pub use engine::Engine;
mod ingress;
pub use ingress::{Mailbox, Message};
mod metrics;
