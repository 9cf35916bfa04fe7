use crate::{bls12381, bn254, secp256k1, Aggregatable, Error, KeyType, Signer, Verifier};
use rand::{CryptoRng, RngCore};
use std::fmt;

/// A secret key of any supported type.
#[derive(Clone, Debug)]
pub enum PrivateKey {
    Bn254(bn254::PrivateKey),
    Bls12381(bls12381::PrivateKey),
    Secp256k1(secp256k1::PrivateKey),
}

impl PrivateKey {
    /// Generates a random key of `key_type`.
    pub fn generate<R: RngCore + CryptoRng>(key_type: KeyType, rng: &mut R) -> Self {
        match key_type {
            KeyType::BlsBn254 => Self::Bn254(bn254::PrivateKey::random(rng)),
            KeyType::Bls12381 => Self::Bls12381(bls12381::PrivateKey::random(rng)),
            KeyType::EcdsaSecp256k1 => Self::Secp256k1(secp256k1::PrivateKey::random(rng)),
        }
    }

    /// Decodes a key of `key_type` from its 32-byte big-endian scalar.
    pub fn from_bytes(key_type: KeyType, bytes: &[u8]) -> Result<Self, Error> {
        Ok(match key_type {
            KeyType::BlsBn254 => Self::Bn254(bn254::PrivateKey::from_bytes(bytes)?),
            KeyType::Bls12381 => Self::Bls12381(bls12381::PrivateKey::from_bytes(bytes)?),
            KeyType::EcdsaSecp256k1 => {
                Self::Secp256k1(secp256k1::PrivateKey::from_bytes(bytes)?)
            }
        })
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        match self {
            Self::Bn254(key) => key.to_bytes(),
            Self::Bls12381(key) => key.to_bytes(),
            Self::Secp256k1(key) => key.to_bytes(),
        }
    }

    pub fn key_type(&self) -> KeyType {
        match self {
            Self::Bn254(_) => KeyType::BlsBn254,
            Self::Bls12381(_) => KeyType::Bls12381,
            Self::Secp256k1(_) => KeyType::EcdsaSecp256k1,
        }
    }

    pub fn public_key(&self) -> PublicKey {
        match self {
            Self::Bn254(key) => PublicKey::Bn254(key.public_key()),
            Self::Bls12381(key) => PublicKey::Bls12381(key.public_key()),
            Self::Secp256k1(key) => PublicKey::Secp256k1(key.public_key()),
        }
    }

    /// Signs `message`, returning `(signature, message_hash)`.
    pub fn sign(&self, message: &[u8]) -> Result<(Vec<u8>, Vec<u8>), Error> {
        match self {
            Self::Bn254(key) => key.sign(message),
            Self::Bls12381(key) => key.sign(message),
            Self::Secp256k1(key) => key.sign(message),
        }
    }

    /// Signs a precomputed message hash.
    pub fn sign_hash(&self, message_hash: &[u8]) -> Result<Vec<u8>, Error> {
        match self {
            Self::Bn254(key) => key.sign_hash(message_hash).map(|s| s.to_bytes()),
            Self::Bls12381(key) => key.sign_hash(message_hash).map(|s| s.to_bytes()),
            Self::Secp256k1(key) => key.sign_hash(message_hash),
        }
    }
}

/// A public key of any supported type.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PublicKey {
    Bn254(bn254::PublicKey),
    Bls12381(bls12381::PublicKey),
    Secp256k1(secp256k1::PublicKey),
}

impl PublicKey {
    /// Decodes the full encoding of a `key_type` key.
    pub fn from_raw(key_type: KeyType, bytes: &[u8]) -> Result<Self, Error> {
        Ok(match key_type {
            KeyType::BlsBn254 => Self::Bn254(bn254::PublicKey::from_raw(bytes)?),
            KeyType::Bls12381 => Self::Bls12381(bls12381::PublicKey::from_raw(bytes)?),
            KeyType::EcdsaSecp256k1 => Self::Secp256k1(secp256k1::PublicKey::from_raw(bytes)?),
        })
    }

    /// Decodes the text encoding produced by [fmt::Display].
    pub fn from_text(key_type: KeyType, text: &str) -> Result<Self, Error> {
        let bytes = relay_utils::from_hex_formatted(text).ok_or(Error::Malformed("hex"))?;
        Self::from_raw(key_type, &bytes)
    }

    pub fn key_type(&self) -> KeyType {
        match self {
            Self::Bn254(_) => KeyType::BlsBn254,
            Self::Bls12381(_) => KeyType::Bls12381,
            Self::Secp256k1(_) => KeyType::EcdsaSecp256k1,
        }
    }

    /// Hashes `message` the way this key's scheme signs it.
    pub fn hash_message(&self, message: &[u8]) -> Vec<u8> {
        match self {
            Self::Bn254(_) => bn254::PublicKey::hash_message(message),
            Self::Bls12381(_) => bls12381::PublicKey::hash_message(message),
            Self::Secp256k1(_) => secp256k1::PublicKey::hash_message(message),
        }
    }

    pub fn verify(&self, message: &[u8], signature: &[u8]) -> Result<(), Error> {
        match self {
            Self::Bn254(key) => key.verify(message, signature),
            Self::Bls12381(key) => key.verify(message, signature),
            Self::Secp256k1(key) => key.verify(message, signature),
        }
    }

    pub fn verify_with_hash(&self, message_hash: &[u8], signature: &[u8]) -> Result<(), Error> {
        match self {
            Self::Bn254(key) => key.verify_with_hash(message_hash, signature),
            Self::Bls12381(key) => key.verify_with_hash(message_hash, signature),
            Self::Secp256k1(key) => key.verify_with_hash(message_hash, signature),
        }
    }

    pub fn on_chain(&self) -> Vec<u8> {
        match self {
            Self::Bn254(key) => key.on_chain(),
            Self::Bls12381(key) => key.on_chain(),
            Self::Secp256k1(key) => key.on_chain(),
        }
    }

    pub fn raw(&self) -> Vec<u8> {
        match self {
            Self::Bn254(key) => key.raw(),
            Self::Bls12381(key) => key.raw(),
            Self::Secp256k1(key) => key.raw(),
        }
    }

    /// Sums pairing keys of a single type.
    pub fn aggregate<'a>(keys: impl IntoIterator<Item = &'a PublicKey>) -> Result<Self, Error> {
        let mut keys = keys.into_iter().peekable();
        let key_type = keys.peek().ok_or(Error::EmptyAggregate)?.key_type();
        match key_type {
            KeyType::BlsBn254 => {
                let keys = keys
                    .map(|key| match key {
                        Self::Bn254(key) => Ok(key),
                        _ => Err(Error::MixedKeyTypes),
                    })
                    .collect::<Result<Vec<_>, _>>()?;
                bn254::PublicKey::aggregate(keys).map(Self::Bn254)
            }
            KeyType::Bls12381 => {
                let keys = keys
                    .map(|key| match key {
                        Self::Bls12381(key) => Ok(key),
                        _ => Err(Error::MixedKeyTypes),
                    })
                    .collect::<Result<Vec<_>, _>>()?;
                bls12381::PublicKey::aggregate(keys).map(Self::Bls12381)
            }
            KeyType::EcdsaSecp256k1 => Err(Error::NotAggregatable(key_type)),
        }
    }
}

impl fmt::Display for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bn254(key) => fmt::Display::fmt(key, f),
            Self::Bls12381(key) => fmt::Display::fmt(key, f),
            Self::Secp256k1(key) => fmt::Display::fmt(key, f),
        }
    }
}

/// Sums encoded signatures of `key_type` into an encoded aggregate signature.
pub fn aggregate_signatures<S: AsRef<[u8]>>(
    key_type: KeyType,
    signatures: impl IntoIterator<Item = S>,
) -> Result<Vec<u8>, Error> {
    match key_type {
        KeyType::BlsBn254 => {
            let signatures = signatures
                .into_iter()
                .map(|s| bn254::Signature::from_bytes(s.as_ref()))
                .collect::<Result<Vec<_>, _>>()?;
            bn254::Signature::aggregate(&signatures).map(|s| s.to_bytes())
        }
        KeyType::Bls12381 => {
            let signatures = signatures
                .into_iter()
                .map(|s| bls12381::Signature::from_bytes(s.as_ref()))
                .collect::<Result<Vec<_>, _>>()?;
            bls12381::Signature::aggregate(&signatures).map(|s| s.to_bytes())
        }
        KeyType::EcdsaSecp256k1 => Err(Error::NotAggregatable(key_type)),
    }
}

/// Sums on-chain encoded keys of `key_type` into the on-chain encoding of their aggregate.
pub fn aggregate_on_chain_keys<K: AsRef<[u8]>>(
    key_type: KeyType,
    keys: impl IntoIterator<Item = K>,
) -> Result<Vec<u8>, Error> {
    match key_type {
        KeyType::BlsBn254 => bn254::aggregate_on_chain_keys(keys),
        KeyType::Bls12381 => bls12381::aggregate_on_chain_keys(keys),
        KeyType::EcdsaSecp256k1 => Err(Error::NotAggregatable(key_type)),
    }
}
