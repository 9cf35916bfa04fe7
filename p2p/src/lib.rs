//! Gossip signatures and proofs between relay nodes and recover what gossip missed.
//!
//! The crate is written against a small set of transport traits ([Sender], [Receiver],
//! [Peers]) so that the same engines run over an authenticated production transport or the
//! in-memory [simulated] network.
//!
//! * [dissemination] publishes locally produced signatures and proofs on two topics and feeds
//!   everything received into the [relay_consensus::processor::Processor].
//! * [recovery] periodically asks a random connected peer for the signatures and proofs this
//!   node is still missing, and answers the same questions for other peers.
//!
//! Transports must authenticate the peer a message came from. Engines trust the [PeerId]
//! reported by [Receiver::recv] and never the identity claimed inside a payload.

use bytes::{Buf, BufMut, Bytes};
use relay_utils::codec::{self, EncodeSize, Read, Write};
use std::{error::Error as StdError, fmt, future::Future};

pub mod dissemination;
pub mod pool;
pub mod recovery;
pub mod simulated;
pub mod wire;

/// Identity of a peer on the transport.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PeerId([u8; 32]);

impl PeerId {
    pub const fn new(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Derives the identity of the holder of `public_key` (its SHA-256).
    pub fn from_public_key(public_key: &[u8]) -> Self {
        Self(relay_cryptography::sha256(public_key))
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl fmt::Debug for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", relay_utils::hex(&self.0[..8]))
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", relay_utils::hex(&self.0))
    }
}

impl Write for PeerId {
    fn write(&self, buf: &mut impl BufMut) {
        self.0.write(buf);
    }
}

impl EncodeSize for PeerId {
    fn encode_size(&self) -> usize {
        32
    }
}

impl Read for PeerId {
    type Cfg = ();

    fn read_cfg(buf: &mut impl Buf, _: &()) -> Result<Self, codec::Error> {
        Ok(Self(<[u8; 32]>::read_cfg(buf, &())?))
    }
}

/// Tuple representing a message received from a given peer.
///
/// The peer is authenticated by the transport.
pub type Message = (PeerId, Bytes);

/// Alias for identifying communication channels.
pub type Channel = u32;

/// Enum indicating the set of recipients to send a message to.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Recipients {
    All,
    Some(Vec<PeerId>),
    One(PeerId),
}

/// Interface for sending messages to a set of recipients.
pub trait Sender: Clone + fmt::Debug + Send + Sync + 'static {
    /// Error that can occur when sending a message.
    type Error: fmt::Debug + StdError + Send + Sync;

    /// Send a message to a set of recipients, returning the peers it was sent to.
    ///
    /// Delivery is best-effort.
    fn send(
        &mut self,
        recipients: Recipients,
        message: Bytes,
        priority: bool,
    ) -> impl Future<Output = Result<Vec<PeerId>, Self::Error>> + Send;
}

/// Interface for receiving messages from arbitrary peers.
pub trait Receiver: fmt::Debug + Send + 'static {
    /// Error that can occur when receiving a message.
    type Error: fmt::Debug + StdError + Send + Sync;

    /// Receive a message from an arbitrary peer.
    fn recv(&mut self) -> impl Future<Output = Result<Message, Self::Error>> + Send;
}

/// Interface for listing the peers currently reachable.
pub trait Peers: Clone + Send + Sync + 'static {
    fn connected(&self) -> impl Future<Output = Vec<PeerId>> + Send;
}
