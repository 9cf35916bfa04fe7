//! Messages exchanged by recovery peers.
//!
//! Requests and responses share one channel. A response carries the `id` of the request it
//! answers.

use bytes::{Buf, BufMut};
use relay_consensus::types::{AggregationProof, Limits, RequestId, Signature};
use relay_utils::{
    bitmap::MAX_CONTAINERS,
    codec::{self, read_len, EncodeSize, Read, ReadExt, Write},
    Bitmap,
};

/// Bounds applied when decoding a [Message].
#[derive(Clone, Copy, Debug)]
pub struct Config {
    pub limits: Limits,

    /// Maximum entries in a request and maximum items in a response.
    pub max_items: usize,
}

/// Represents a message sent between peers.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Message {
    /// Responses have the same ID as the request they are responding to.
    pub id: u64,
    pub payload: Payload,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Payload {
    Request(Request),
    Response(Response),
    /// The peer could not serve the request.
    ///
    /// This allows the requester to give up without waiting for its timeout.
    Error,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Request {
    /// For each request, the validator indices whose signatures are still needed.
    WantSignatures(Vec<(RequestId, Bitmap)>),
    WantProofs(Vec<RequestId>),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Response {
    /// For each request, the stored signatures by validator index.
    Signatures(Vec<(RequestId, Vec<(u32, Signature)>)>),
    Proofs(Vec<AggregationProof>),
}

impl Response {
    /// Number of signatures or proofs carried.
    pub fn items(&self) -> usize {
        match self {
            Self::Signatures(groups) => groups.iter().map(|(_, items)| items.len()).sum(),
            Self::Proofs(proofs) => proofs.len(),
        }
    }
}

impl Write for Message {
    fn write(&self, buf: &mut impl BufMut) {
        self.id.write(buf);
        self.payload.write(buf);
    }
}

impl EncodeSize for Message {
    fn encode_size(&self) -> usize {
        self.id.encode_size() + self.payload.encode_size()
    }
}

impl Read for Message {
    type Cfg = Config;

    fn read_cfg(buf: &mut impl Buf, cfg: &Config) -> Result<Self, codec::Error> {
        let id = u64::read(buf)?;
        let payload = Payload::read_cfg(buf, cfg)?;
        Ok(Self { id, payload })
    }
}

impl Write for Payload {
    fn write(&self, buf: &mut impl BufMut) {
        match self {
            Self::Request(Request::WantSignatures(wants)) => {
                0u8.write(buf);
                wants.write(buf);
            }
            Self::Request(Request::WantProofs(ids)) => {
                1u8.write(buf);
                ids.write(buf);
            }
            Self::Response(Response::Signatures(groups)) => {
                2u8.write(buf);
                groups.write(buf);
            }
            Self::Response(Response::Proofs(proofs)) => {
                3u8.write(buf);
                proofs.write(buf);
            }
            Self::Error => 4u8.write(buf),
        }
    }
}

impl EncodeSize for Payload {
    fn encode_size(&self) -> usize {
        1 + match self {
            Self::Request(Request::WantSignatures(wants)) => wants.encode_size(),
            Self::Request(Request::WantProofs(ids)) => ids.encode_size(),
            Self::Response(Response::Signatures(groups)) => groups.encode_size(),
            Self::Response(Response::Proofs(proofs)) => proofs.encode_size(),
            Self::Error => 0,
        }
    }
}

impl Read for Payload {
    type Cfg = Config;

    fn read_cfg(buf: &mut impl Buf, cfg: &Config) -> Result<Self, codec::Error> {
        match u8::read(buf)? {
            0 => Ok(Self::Request(Request::WantSignatures(Vec::read_cfg(
                buf,
                &(cfg.max_items, ((), MAX_CONTAINERS)),
            )?))),
            1 => Ok(Self::Request(Request::WantProofs(Vec::read_cfg(
                buf,
                &(cfg.max_items, ()),
            )?))),
            2 => Ok(Self::Response(Response::Signatures(read_signatures(
                buf, cfg,
            )?))),
            3 => Ok(Self::Response(Response::Proofs(Vec::read_cfg(
                buf,
                &(cfg.max_items, cfg.limits),
            )?))),
            4 => Ok(Self::Error),
            _ => Err(codec::Error::Invalid("recovery::Payload", "unknown type")),
        }
    }
}

/// Reads grouped signatures, bounding the total across groups by `max_items`.
fn read_signatures(
    buf: &mut impl Buf,
    cfg: &Config,
) -> Result<Vec<(RequestId, Vec<(u32, Signature)>)>, codec::Error> {
    let groups = read_len(buf, cfg.max_items)?;
    let mut remaining = cfg.max_items;
    let mut result = Vec::with_capacity(groups);
    for _ in 0..groups {
        let request_id = RequestId::read(buf)?;
        let count = read_len(buf, remaining)?;
        remaining -= count;
        let mut items = Vec::with_capacity(count);
        for _ in 0..count {
            let index = u32::read(buf)?;
            items.push((index, Signature::read_cfg(buf, &cfg.limits)?));
        }
        result.push((request_id, items));
    }
    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use relay_consensus::mocks::Fixture;
    use relay_cryptography::KeyType;
    use relay_utils::codec::{Decode, Encode};

    fn config(max_items: usize) -> Config {
        Config {
            limits: Limits::default(),
            max_items,
        }
    }

    #[test]
    fn test_codec() {
        let fixture = Fixture::new(KeyType::Bls12381, &[1, 1, 1], 2);
        let first = fixture.sign(0, b"message");
        let second = fixture.sign(2, b"message");
        let mut wanted = Bitmap::new();
        wanted.add(1);
        wanted.add(2);

        let messages = [
            Message {
                id: 1,
                payload: Payload::Request(Request::WantSignatures(vec![(
                    first.request_id,
                    wanted,
                )])),
            },
            Message {
                id: 2,
                payload: Payload::Request(Request::WantProofs(vec![first.request_id])),
            },
            Message {
                id: 3,
                payload: Payload::Response(Response::Signatures(vec![(
                    first.request_id,
                    vec![(0, first), (2, second)],
                )])),
            },
            Message {
                id: 4,
                payload: Payload::Error,
            },
        ];
        for message in messages {
            let decoded = Message::decode_cfg(message.encode(), &config(8)).unwrap();
            assert_eq!(decoded, message);
        }
    }

    #[test]
    fn test_item_limits() {
        let fixture = Fixture::new(KeyType::Bls12381, &[1, 1, 1], 2);
        let signature = |index: usize| (index as u32, fixture.sign(index, b"message"));
        let id = fixture.sign(0, b"message").request_id;

        // Three signatures split over two groups exceed a total of two.
        let message = Message {
            id: 1,
            payload: Payload::Response(Response::Signatures(vec![
                (id, vec![signature(0), signature(1)]),
                (id, vec![signature(2)]),
            ])),
        };
        assert_eq!(
            Message::decode_cfg(message.encode(), &config(2)),
            Err(codec::Error::LengthExceeded(1, 0))
        );
        assert!(Message::decode_cfg(message.encode(), &config(3)).is_ok());

        let message = Message {
            id: 1,
            payload: Payload::Request(Request::WantProofs(vec![id; 3])),
        };
        assert_eq!(
            Message::decode_cfg(message.encode(), &config(2)),
            Err(codec::Error::LengthExceeded(3, 2))
        );
    }

    #[test]
    fn test_unknown_payload() {
        let mut encoded = Message {
            id: 9,
            payload: Payload::Error,
        }
        .encode()
        .to_vec();
        encoded[8] = 5;
        assert!(matches!(
            Message::decode_cfg(&encoded[..], &config(1)),
            Err(codec::Error::Invalid(_, _))
        ));
    }
}
