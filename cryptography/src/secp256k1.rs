//! ECDSA signatures over secp256k1.
//!
//! These keys authorize on-chain actions and are never aggregated. Messages are hashed with
//! Keccak-256 and signed deterministically ([RFC 6979](https://datatracker.ietf.org/doc/html/rfc6979));
//! signatures are low-s normalized ([BIP 62](https://github.com/bitcoin/bips/blob/master/bip-0062.mediawiki#low-s-values-in-signatures))
//! and carry a trailing recovery byte.
//!
//! # Encodings
//!
//! | item | bytes | layout |
//! |---|---|---|
//! | private key | 32 | big-endian scalar |
//! | signature | 65 | `r ‖ s ‖ v` with `v ∈ {0, 1}` |
//! | raw public key | 33 | SEC1 compressed point |
//! | on-chain public key | 20 | Ethereum address |

use crate::{keccak256, Error, Signer, Verifier};
use k256::ecdsa::{signature::hazmat::PrehashVerifier, Signature, SigningKey, VerifyingKey};
use rand::{CryptoRng, RngCore};
use std::fmt;

pub const PRIVATE_KEY_LENGTH: usize = 32;
pub const MESSAGE_HASH_LENGTH: usize = 32;
pub const SIGNATURE_LENGTH: usize = 65;
pub const RAW_PUBLIC_KEY_LENGTH: usize = 33;
pub const ON_CHAIN_PUBLIC_KEY_LENGTH: usize = 20;

/// secp256k1 secret key.
#[derive(Clone)]
pub struct PrivateKey {
    signer: SigningKey,
}

impl PrivateKey {
    pub fn random<R: RngCore + CryptoRng>(rng: &mut R) -> Self {
        Self {
            signer: SigningKey::random(rng),
        }
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, Error> {
        if bytes.len() != PRIVATE_KEY_LENGTH {
            return Err(Error::Malformed("private key length"));
        }
        let signer = SigningKey::from_slice(bytes).map_err(|_| Error::Malformed("private key"))?;
        Ok(Self { signer })
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        self.signer.to_bytes().to_vec()
    }

    /// Signs a precomputed Keccak-256 message hash.
    pub fn sign_hash(&self, message_hash: &[u8]) -> Result<Vec<u8>, Error> {
        if message_hash.len() != MESSAGE_HASH_LENGTH {
            return Err(Error::Malformed("message hash"));
        }
        let (signature, recovery) = self
            .signer
            .sign_prehash_recoverable(message_hash)
            .map_err(|_| Error::Malformed("signing failed"))?;
        let mut out = Vec::with_capacity(SIGNATURE_LENGTH);
        out.extend_from_slice(&signature.to_bytes());
        out.push(recovery.to_byte());
        Ok(out)
    }
}

impl Signer for PrivateKey {
    type PublicKey = PublicKey;

    fn public_key(&self) -> PublicKey {
        PublicKey {
            verifier: self.signer.verifying_key().to_owned(),
        }
    }

    fn sign(&self, message: &[u8]) -> Result<(Vec<u8>, Vec<u8>), Error> {
        let message_hash = keccak256(message);
        Ok((self.sign_hash(&message_hash)?, message_hash.to_vec()))
    }
}

impl fmt::Debug for PrivateKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("secp256k1::PrivateKey([REDACTED])")
    }
}

/// secp256k1 public key.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PublicKey {
    verifier: VerifyingKey,
}

impl PublicKey {
    pub fn from_raw(bytes: &[u8]) -> Result<Self, Error> {
        if bytes.len() != RAW_PUBLIC_KEY_LENGTH {
            return Err(Error::Malformed("public key length"));
        }
        let verifier =
            VerifyingKey::from_sec1_bytes(bytes).map_err(|_| Error::Malformed("public key"))?;
        Ok(Self { verifier })
    }
}

impl Verifier for PublicKey {
    fn hash_message(message: &[u8]) -> Vec<u8> {
        keccak256(message).to_vec()
    }

    fn verify_with_hash(&self, message_hash: &[u8], signature: &[u8]) -> Result<(), Error> {
        if message_hash.len() != MESSAGE_HASH_LENGTH {
            return Err(Error::Malformed("message hash"));
        }
        if signature.len() != SIGNATURE_LENGTH || signature[SIGNATURE_LENGTH - 1] > 1 {
            return Err(Error::Malformed("signature"));
        }
        let parsed = Signature::from_slice(&signature[..SIGNATURE_LENGTH - 1])
            .map_err(|_| Error::Malformed("signature"))?;
        if parsed.normalize_s().is_some() {
            return Err(Error::Malformed("signature not normalized"));
        }
        self.verifier
            .verify_prehash(message_hash, &parsed)
            .map_err(|_| Error::InvalidSignature)
    }

    /// The Ethereum address of the key.
    fn on_chain(&self) -> Vec<u8> {
        let point = self.verifier.to_encoded_point(false);
        keccak256(&point.as_bytes()[1..])[12..].to_vec()
    }

    fn raw(&self) -> Vec<u8> {
        self.verifier.to_encoded_point(true).as_bytes().to_vec()
    }
}

impl fmt::Display for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", relay_utils::hex(&self.raw()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::{rngs::StdRng, SeedableRng};

    #[test]
    fn test_sign_verify() {
        let key = PrivateKey::random(&mut StdRng::seed_from_u64(0));
        let public = key.public_key();
        let (signature, hash) = key.sign(b"message").unwrap();
        assert_eq!(signature.len(), SIGNATURE_LENGTH);
        public.verify(b"message", &signature).unwrap();
        public.verify_with_hash(&hash, &signature).unwrap();
        assert_eq!(public.verify(b"other", &signature), Err(Error::InvalidSignature));
    }

    #[test]
    fn test_known_address() {
        // Private key 1 controls the well-known address 0x7e5f...bdf.
        let mut bytes = [0u8; 32];
        bytes[31] = 1;
        let key = PrivateKey::from_bytes(&bytes).unwrap();
        assert_eq!(
            relay_utils::hex(&key.public_key().on_chain()),
            "7e5f4552091a69125d5dfcb7b8c2659029395bdf"
        );
    }

    #[test]
    fn test_encodings() {
        let key = PrivateKey::random(&mut StdRng::seed_from_u64(1));
        let public = key.public_key();
        assert_eq!(PublicKey::from_raw(&public.raw()).unwrap(), public);
        let restored = PrivateKey::from_bytes(&key.to_bytes()).unwrap();
        assert_eq!(restored.public_key(), public);
    }

    #[test]
    fn test_rejects_bad_recovery_byte() {
        let key = PrivateKey::random(&mut StdRng::seed_from_u64(2));
        let (mut signature, hash) = key.sign(b"message").unwrap();
        signature[SIGNATURE_LENGTH - 1] = 4;
        assert!(key
            .public_key()
            .verify_with_hash(&hash, &signature)
            .unwrap_err()
            .is_malformed());
    }
}
