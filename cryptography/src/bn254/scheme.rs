use super::hash::hash_to_g1;
use crate::{keccak256, Aggregatable, Error, HashStrategy, Signer, Verifier};
use ark_bn254::{Bn254, Fq, Fr, G1Affine, G1Projective, G2Affine, G2Projective};
use ark_ec::{pairing::Pairing, AffineRepr, CurveGroup};
use ark_ff::{BigInteger, One, PrimeField, Zero};
use ark_serialize::{CanonicalDeserialize, CanonicalSerialize};
use rand::{CryptoRng, RngCore};
use std::fmt;
use zeroize::Zeroize;

pub const PRIVATE_KEY_LENGTH: usize = 32;
pub const MESSAGE_HASH_LENGTH: usize = 32;
pub const SIGNATURE_LENGTH: usize = 64;
pub const ON_CHAIN_PUBLIC_KEY_LENGTH: usize = 64;
pub const RAW_PUBLIC_KEY_LENGTH: usize = G1_COMPRESSED_LENGTH + G2_COMPRESSED_LENGTH;

const G1_COMPRESSED_LENGTH: usize = 32;
const G2_COMPRESSED_LENGTH: usize = 64;
const FIELD_LENGTH: usize = 32;
const STRATEGY: HashStrategy = HashStrategy::TryAndIncrement;

/// Decodes a canonical big-endian base field element.
fn decode_fq(bytes: &[u8]) -> Result<Fq, Error> {
    let value = Fq::from_be_bytes_mod_order(bytes);
    if value.into_bigint().to_bytes_be() != bytes {
        return Err(Error::Malformed("non-canonical field element"));
    }
    Ok(value)
}

fn encode_g1(point: &G1Affine) -> Vec<u8> {
    let mut out = Vec::with_capacity(2 * FIELD_LENGTH);
    out.extend_from_slice(&point.x.into_bigint().to_bytes_be());
    out.extend_from_slice(&point.y.into_bigint().to_bytes_be());
    out
}

/// Decodes a big-endian `x ‖ y` G1 point, rejecting the point at infinity.
fn decode_g1(bytes: &[u8]) -> Result<G1Affine, Error> {
    if bytes.len() != 2 * FIELD_LENGTH {
        return Err(Error::Malformed("G1 point length"));
    }
    let x = decode_fq(&bytes[..FIELD_LENGTH])?;
    let y = decode_fq(&bytes[FIELD_LENGTH..])?;
    if x.is_zero() && y.is_zero() {
        return Err(Error::PointAtInfinity);
    }
    let point = G1Affine::new_unchecked(x, y);
    if !point.is_on_curve() || !point.is_in_correct_subgroup_assuming_on_curve() {
        return Err(Error::Malformed("G1 point not in group"));
    }
    Ok(point)
}

/// Decodes an on-chain encoded public key (its G1 half only).
fn decode_on_chain_key(bytes: &[u8]) -> Result<G1Affine, Error> {
    decode_g1(bytes)
}

/// Sums on-chain encoded public keys into the on-chain encoding of their aggregate.
pub fn aggregate_on_chain_keys<K: AsRef<[u8]>>(
    keys: impl IntoIterator<Item = K>,
) -> Result<Vec<u8>, Error> {
    let mut sum = G1Projective::zero();
    let mut count = 0usize;
    for key in keys {
        sum += decode_on_chain_key(key.as_ref())?;
        count += 1;
    }
    if count == 0 {
        return Err(Error::EmptyAggregate);
    }
    if sum.is_zero() {
        return Err(Error::PointAtInfinity);
    }
    Ok(encode_g1(&sum.into_affine()))
}

/// Returns true if `e(a₁, a₂) · e(b₁, b₂) == 1`.
fn pairing_check(a: (G1Affine, G2Affine), b: (G1Affine, G2Affine)) -> bool {
    Bn254::multi_pairing([a.0, b.0], [a.1, b.1]).0.is_one()
}

/// BN254 secret key.
#[derive(Clone)]
pub struct PrivateKey {
    scalar: Fr,
}

impl PrivateKey {
    /// Generates a random non-zero key.
    pub fn random<R: RngCore + CryptoRng>(rng: &mut R) -> Self {
        loop {
            let mut ikm = [0u8; 64];
            rng.fill_bytes(&mut ikm);
            let scalar = Fr::from_le_bytes_mod_order(&ikm);
            ikm.zeroize();
            if !scalar.is_zero() {
                return Self { scalar };
            }
        }
    }

    /// Decodes a canonical big-endian scalar.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, Error> {
        if bytes.len() != PRIVATE_KEY_LENGTH {
            return Err(Error::Malformed("private key length"));
        }
        let scalar = Fr::from_be_bytes_mod_order(bytes);
        if scalar.is_zero() || scalar.into_bigint().to_bytes_be() != bytes {
            return Err(Error::Malformed("private key"));
        }
        Ok(Self { scalar })
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        self.scalar.into_bigint().to_bytes_be()
    }

    /// Signs a precomputed Keccak-256 message hash.
    pub fn sign_hash(&self, message_hash: &[u8]) -> Result<Signature, Error> {
        let point = hash_to_g1(STRATEGY, message_hash)?;
        Ok(Signature((point * self.scalar).into_affine()))
    }
}

impl Signer for PrivateKey {
    type PublicKey = PublicKey;

    fn public_key(&self) -> PublicKey {
        PublicKey {
            g1: (G1Affine::generator() * self.scalar).into_affine(),
            g2: (G2Affine::generator() * self.scalar).into_affine(),
        }
    }

    fn sign(&self, message: &[u8]) -> Result<(Vec<u8>, Vec<u8>), Error> {
        let message_hash = keccak256(message);
        let signature = self.sign_hash(&message_hash)?;
        Ok((signature.to_bytes(), message_hash.to_vec()))
    }
}

impl Drop for PrivateKey {
    fn drop(&mut self) {
        self.scalar.zeroize();
    }
}

impl fmt::Debug for PrivateKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("bn254::PrivateKey([REDACTED])")
    }
}

/// BN254 signature (a G1 point).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Signature(G1Affine);

impl Signature {
    pub fn to_bytes(&self) -> Vec<u8> {
        encode_g1(&self.0)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, Error> {
        if bytes.len() != SIGNATURE_LENGTH {
            return Err(Error::Malformed("signature length"));
        }
        decode_g1(bytes).map(Self)
    }
}

impl Aggregatable for Signature {
    fn aggregate<'a>(items: impl IntoIterator<Item = &'a Self>) -> Result<Self, Error> {
        let mut sum = G1Projective::zero();
        let mut count = 0usize;
        for item in items {
            sum += item.0;
            count += 1;
        }
        if count == 0 {
            return Err(Error::EmptyAggregate);
        }
        if sum.is_zero() {
            return Err(Error::PointAtInfinity);
        }
        Ok(Self(sum.into_affine()))
    }

    fn negate(&self) -> Self {
        Self(-self.0)
    }
}

/// BN254 public key (the same secret in G1 and G2).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PublicKey {
    g1: G1Affine,
    g2: G2Affine,
}

impl PublicKey {
    /// Decodes a raw key, checking both halves encode the same secret.
    pub fn from_raw(bytes: &[u8]) -> Result<Self, Error> {
        if bytes.len() != RAW_PUBLIC_KEY_LENGTH {
            return Err(Error::Malformed("public key length"));
        }
        let g1 = G1Affine::deserialize_compressed(&bytes[..G1_COMPRESSED_LENGTH])
            .map_err(|_| Error::Malformed("public key G1"))?;
        let g2 = G2Affine::deserialize_compressed(&bytes[G1_COMPRESSED_LENGTH..])
            .map_err(|_| Error::Malformed("public key G2"))?;
        if g1.is_zero() || g2.is_zero() {
            return Err(Error::PointAtInfinity);
        }
        if !pairing_check((g1, G2Affine::generator()), (-G1Affine::generator(), g2)) {
            return Err(Error::Malformed("public key halves differ"));
        }
        Ok(Self { g1, g2 })
    }

    /// Verifies a parsed signature over a precomputed message hash.
    pub fn verify_signature(&self, message_hash: &[u8], signature: &Signature) -> Result<(), Error> {
        let point = hash_to_g1(STRATEGY, message_hash)?;
        if !pairing_check((point, self.g2), (-signature.0, G2Affine::generator())) {
            return Err(Error::InvalidSignature);
        }
        Ok(())
    }
}

impl Verifier for PublicKey {
    fn hash_message(message: &[u8]) -> Vec<u8> {
        keccak256(message).to_vec()
    }

    fn verify_with_hash(&self, message_hash: &[u8], signature: &[u8]) -> Result<(), Error> {
        let signature = Signature::from_bytes(signature)?;
        self.verify_signature(message_hash, &signature)
    }

    fn on_chain(&self) -> Vec<u8> {
        encode_g1(&self.g1)
    }

    fn raw(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(RAW_PUBLIC_KEY_LENGTH);
        // Serializing into a vector cannot fail.
        self.g1.serialize_compressed(&mut out).unwrap_or_default();
        self.g2.serialize_compressed(&mut out).unwrap_or_default();
        out
    }
}

impl Aggregatable for PublicKey {
    fn aggregate<'a>(items: impl IntoIterator<Item = &'a Self>) -> Result<Self, Error> {
        let mut g1 = G1Projective::zero();
        let mut g2 = G2Projective::zero();
        let mut count = 0usize;
        for item in items {
            g1 += item.g1;
            g2 += item.g2;
            count += 1;
        }
        if count == 0 {
            return Err(Error::EmptyAggregate);
        }
        if g1.is_zero() || g2.is_zero() {
            return Err(Error::PointAtInfinity);
        }
        Ok(Self {
            g1: g1.into_affine(),
            g2: g2.into_affine(),
        })
    }

    fn negate(&self) -> Self {
        Self {
            g1: -self.g1,
            g2: -self.g2,
        }
    }
}

impl fmt::Display for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", relay_utils::hex(&self.raw()))
    }
}
