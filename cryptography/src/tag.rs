use crate::{Error, HashStrategy};
use bytes::{Buf, BufMut};
use relay_utils::codec::{self, EncodeSize, Read, ReadExt, Write};
use std::fmt;

/// Signature algorithm of a key.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(u8)]
pub enum KeyType {
    BlsBn254 = 0,
    EcdsaSecp256k1 = 1,
    Bls12381 = 2,
}

impl KeyType {
    /// Returns true if signatures of this type can be summed into an aggregate.
    pub fn is_aggregatable(self) -> bool {
        matches!(self, KeyType::BlsBn254 | KeyType::Bls12381)
    }

    /// The message-to-curve mapping used by this type (pairing types only).
    pub fn hash_strategy(self) -> Option<HashStrategy> {
        match self {
            KeyType::BlsBn254 => Some(HashStrategy::TryAndIncrement),
            KeyType::Bls12381 => Some(HashStrategy::HashToCurve),
            KeyType::EcdsaSecp256k1 => None,
        }
    }
}

impl TryFrom<u8> for KeyType {
    type Error = Error;

    fn try_from(value: u8) -> Result<Self, Error> {
        match value {
            0 => Ok(KeyType::BlsBn254),
            1 => Ok(KeyType::EcdsaSecp256k1),
            2 => Ok(KeyType::Bls12381),
            other => Err(Error::UnknownKeyType(other)),
        }
    }
}

impl fmt::Display for KeyType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KeyType::BlsBn254 => write!(f, "bls-bn254"),
            KeyType::EcdsaSecp256k1 => write!(f, "ecdsa-secp256k1"),
            KeyType::Bls12381 => write!(f, "bls12-381"),
        }
    }
}

/// Identifies a key by algorithm (high nibble) and slot (low nibble).
///
/// The value `0x00` is reserved to mean "no key".
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct KeyTag(u8);

impl KeyTag {
    /// The reserved "no key" tag.
    pub const NONE: KeyTag = KeyTag(0);

    /// Creates a tag for `slot` (0..16) of `key_type`.
    pub fn new(key_type: KeyType, slot: u8) -> Result<Self, Error> {
        let value = (key_type as u8) << 4 | slot;
        if slot > 0x0f || value == 0 {
            return Err(Error::InvalidKeyTag(value));
        }
        Ok(Self(value))
    }

    /// Wraps a raw tag byte without validation.
    pub const fn from_u8(value: u8) -> Self {
        Self(value)
    }

    /// The raw tag byte.
    pub const fn get(&self) -> u8 {
        self.0
    }

    pub fn is_none(&self) -> bool {
        self.0 == 0
    }

    /// The algorithm encoded in the tag.
    pub fn key_type(&self) -> Result<KeyType, Error> {
        if self.is_none() {
            return Err(Error::InvalidKeyTag(self.0));
        }
        KeyType::try_from(self.0 >> 4)
    }

    /// The key slot encoded in the tag.
    pub fn slot(&self) -> u8 {
        self.0 & 0x0f
    }
}

impl fmt::Debug for KeyTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "KeyTag({:#04x})", self.0)
    }
}

impl fmt::Display for KeyTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.key_type() {
            Ok(key_type) => write!(f, "{}/{}", key_type, self.slot()),
            Err(_) => write!(f, "{:#04x}", self.0),
        }
    }
}

impl Write for KeyTag {
    fn write(&self, buf: &mut impl BufMut) {
        self.0.write(buf);
    }
}

impl EncodeSize for KeyTag {
    fn encode_size(&self) -> usize {
        1
    }
}

impl Read for KeyTag {
    type Cfg = ();

    /// Rejects the reserved tag and tags of unknown key types.
    fn read_cfg(buf: &mut impl Buf, _: &()) -> Result<Self, codec::Error> {
        let tag = Self(u8::read(buf)?);
        tag.key_type()
            .map_err(|_| codec::Error::Invalid("KeyTag", "unknown key type"))?;
        Ok(tag)
    }
}
