//! Send messages between arbitrary peers with configurable latency and drop rate.
//!
//! Used by tests and by local simulations of a relay fleet. Peers are registered per
//! channel through the [network::Oracle], and messages only flow over links the oracle
//! created.

mod metrics;
pub mod network;

use crate::Channel;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("message too large: {0}")]
    MessageTooLarge(usize),
    #[error("network closed")]
    NetworkClosed,
    #[error("not valid to link self")]
    LinkingSelf,
    #[error("invalid success rate (must be in [0, 1]): {0}")]
    InvalidSuccessRate(f64),
    #[error("channel already registered: {0}")]
    ChannelAlreadyRegistered(Channel),
}
