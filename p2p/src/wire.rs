//! Outer framing of gossip messages.

use crate::PeerId;
use bytes::{Buf, BufMut, Bytes};
use relay_utils::codec::{self, EncodeSize, Read, ReadExt, Write};

/// Largest encoded [Envelope] accepted from the network (1 MiB + 1 KiB).
pub const MAX_ENVELOPE_SIZE: usize = (1 << 20) + (1 << 10);

/// A topic message: who published it, when, and the topic-specific payload.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Envelope {
    pub sender: PeerId,
    /// Milliseconds since the Unix epoch at publication.
    pub timestamp: u64,
    pub payload: Bytes,
}

impl Write for Envelope {
    fn write(&self, buf: &mut impl BufMut) {
        self.sender.write(buf);
        self.timestamp.write(buf);
        self.payload.write(buf);
    }
}

impl EncodeSize for Envelope {
    fn encode_size(&self) -> usize {
        self.sender.encode_size() + self.timestamp.encode_size() + self.payload.encode_size()
    }
}

impl Read for Envelope {
    /// Maximum payload length.
    type Cfg = usize;

    fn read_cfg(buf: &mut impl Buf, max_payload: &usize) -> Result<Self, codec::Error> {
        let sender = PeerId::read(buf)?;
        let timestamp = u64::read(buf)?;
        let payload = Bytes::read_cfg(buf, max_payload)?;
        Ok(Self {
            sender,
            timestamp,
            payload,
        })
    }
}
