//! Sign, verify, and aggregate validator signatures.
//!
//! Three schemes are supported, selected at runtime by a [KeyTag]:
//!
//! - [bn254]: BLS signatures over BN254 (message mapped with try-and-increment).
//! - [bls12381]: BLS signatures over BLS12-381 (message mapped with standard hash-to-curve).
//! - [secp256k1]: ECDSA signatures, used for on-chain authorization only (never aggregated).
//!
//! Both pairing schemes place signatures (and message points) in G1 and use G2 for the
//! verification key. Public keys carry both representations: G1 is what the settlement
//! contracts store, G2 is what the pairing check needs.
//!
//! # Example
//!
//! ```
//! use relay_cryptography::{KeyTag, KeyType, PrivateKey};
//! use rand::{rngs::StdRng, SeedableRng};
//!
//! let tag = KeyTag::new(KeyType::Bls12381, 1).unwrap();
//! let signer = PrivateKey::generate(tag.key_type().unwrap(), &mut StdRng::seed_from_u64(0));
//! let (signature, hash) = signer.sign(b"header").unwrap();
//! let public = signer.public_key();
//! public.verify(b"header", &signature).unwrap();
//! public.verify_with_hash(&hash, &signature).unwrap();
//! ```

use thiserror::Error;

pub mod bls12381;
pub mod bn254;
mod keys;
pub use keys::{aggregate_on_chain_keys, aggregate_signatures, PrivateKey, PublicKey};
pub mod secp256k1;
mod tag;
pub use tag::{KeyTag, KeyType};

/// Errors produced by the signature schemes.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// Input could not be decoded or processed (wrong length, not on curve, wrong subgroup).
    #[error("malformed input: {0}")]
    Malformed(&'static str),
    /// The input was well formed and the check completed, but did not pass.
    #[error("invalid signature")]
    InvalidSignature,
    #[error("point at infinity")]
    PointAtInfinity,
    #[error("unknown key type: {0}")]
    UnknownKeyType(u8),
    #[error("invalid key tag: {0:#04x}")]
    InvalidKeyTag(u8),
    #[error("{0} keys cannot be aggregated")]
    NotAggregatable(KeyType),
    #[error("cannot aggregate an empty set")]
    EmptyAggregate,
    #[error("mixed key types")]
    MixedKeyTypes,
    #[error("hash strategy {0:?} is not supported by {1}")]
    UnsupportedHashStrategy(HashStrategy, KeyType),
}

impl Error {
    /// Returns true if the error came from decoding or computation rather than from a
    /// completed check that failed.
    pub fn is_malformed(&self) -> bool {
        !matches!(self, Error::InvalidSignature)
    }
}

/// How a message hash is mapped onto a curve point.
///
/// The two strategies are not interoperable: a signature produced under one never verifies
/// under the other, so each curve uses exactly one ([KeyType::hash_strategy]).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum HashStrategy {
    /// Interpret the hash as an x-coordinate and search upward for a point on the curve.
    TryAndIncrement,
    /// Standard hash-to-curve (SSWU, random oracle) with a fixed domain separation tag.
    HashToCurve,
}

/// Produces signatures.
pub trait Signer: Clone + Send + Sync + 'static {
    type PublicKey: Verifier;

    /// Returns the public key of the signer.
    fn public_key(&self) -> Self::PublicKey;

    /// Signs `message`, returning the encoded signature and the message hash that was signed.
    fn sign(&self, message: &[u8]) -> Result<(Vec<u8>, Vec<u8>), Error>;
}

/// Verifies signatures.
pub trait Verifier: Clone + Send + Sync + 'static {
    /// Hashes `message` the way [Signer::sign] does before signing.
    fn hash_message(message: &[u8]) -> Vec<u8>;

    /// Verifies a signature over a precomputed message hash.
    fn verify_with_hash(&self, message_hash: &[u8], signature: &[u8]) -> Result<(), Error>;

    /// Verifies a signature over `message`.
    fn verify(&self, message: &[u8], signature: &[u8]) -> Result<(), Error> {
        self.verify_with_hash(&Self::hash_message(message), signature)
    }

    /// Fixed-width encoding stored by the settlement contracts.
    fn on_chain(&self) -> Vec<u8>;

    /// Full encoding, sufficient to verify signatures.
    fn raw(&self) -> Vec<u8>;
}

/// Points that can be summed into an aggregate.
///
/// Aggregation is elliptic-curve addition, so the result does not depend on the order of
/// the inputs.
pub trait Aggregatable: Sized {
    /// Sums all items. Fails on an empty input or if the sum is the point at infinity.
    fn aggregate<'a>(items: impl IntoIterator<Item = &'a Self>) -> Result<Self, Error>
    where
        Self: 'a;

    /// Returns the additive inverse.
    fn negate(&self) -> Self;
}

/// Keccak-256 digest.
pub fn keccak256(message: &[u8]) -> [u8; 32] {
    use sha3::{Digest, Keccak256};
    Keccak256::digest(message).into()
}

/// SHA-256 digest.
pub fn sha256(message: &[u8]) -> [u8; 32] {
    use sha2::{Digest, Sha256};
    Sha256::digest(message).into()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_digests() {
        assert_eq!(
            relay_utils::hex(&keccak256(b"")),
            "c5d2460186f7233c927e7db2dcc703c0e500b653ca82273b7bfad8045d85a470"
        );
        assert_eq!(
            relay_utils::hex(&sha256(b"")),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }

    #[test]
    fn test_error_classification() {
        assert!(!Error::InvalidSignature.is_malformed());
        assert!(Error::Malformed("signature").is_malformed());
        assert!(Error::PointAtInfinity.is_malformed());
    }
}
