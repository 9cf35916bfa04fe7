use crate::{sha256, Aggregatable, Error, HashStrategy, KeyType, Signer, Verifier};
use blst::{
    blst_bendian_from_scalar, blst_final_exp, blst_fp12, blst_fp12_is_one, blst_fp12_mul,
    blst_hash_to_g1, blst_keygen_v3, blst_miller_loop, blst_p1, blst_p1_add_or_double,
    blst_p1_affine, blst_p1_cneg, blst_p1_compress, blst_p1_deserialize, blst_p1_from_affine,
    blst_p1_in_g1, blst_p1_is_equal, blst_p1_is_inf, blst_p1_mult, blst_p1_serialize,
    blst_p1_to_affine, blst_p1_uncompress, blst_p2, blst_p2_add_or_double, blst_p2_affine,
    blst_p2_cneg, blst_p2_compress, blst_p2_from_affine, blst_p2_in_g2, blst_p2_is_equal,
    blst_p2_is_inf, blst_p2_mult, blst_p2_to_affine, blst_p2_uncompress, blst_scalar,
    blst_scalar_fr_check, blst_scalar_from_bendian, BLS12_381_G1, BLS12_381_G2, BLST_ERROR,
};
use rand::{CryptoRng, RngCore};
use std::{fmt, ptr};
use zeroize::Zeroize;

pub const PRIVATE_KEY_LENGTH: usize = 32;
pub const MESSAGE_HASH_LENGTH: usize = 32;
pub const SIGNATURE_LENGTH: usize = 96;
pub const RAW_PUBLIC_KEY_LENGTH: usize = G1_COMPRESSED_LENGTH + G2_COMPRESSED_LENGTH;
pub const ON_CHAIN_PUBLIC_KEY_LENGTH: usize = 2 * PADDED_FIELD_LENGTH;

/// Domain separation tag for hashing messages onto G1.
pub const DST: &[u8] = b"BLS_SIG_BLS12381G1_XMD:SHA-256_SSWU_RO_NUL_";

const G1_COMPRESSED_LENGTH: usize = 48;
const G2_COMPRESSED_LENGTH: usize = 96;
const FIELD_LENGTH: usize = 48;
const PADDED_FIELD_LENGTH: usize = 64;
const SCALAR_BITS: usize = 255;
const STRATEGY: HashStrategy = HashStrategy::HashToCurve;

/// Maps a message hash onto G1.
///
/// Only [HashStrategy::HashToCurve] is available on BLS12-381.
pub fn hash_to_g1(strategy: HashStrategy, message_hash: &[u8]) -> Result<blst_p1, Error> {
    if strategy != HashStrategy::HashToCurve {
        return Err(Error::UnsupportedHashStrategy(strategy, KeyType::Bls12381));
    }
    if message_hash.len() != MESSAGE_HASH_LENGTH {
        return Err(Error::Malformed("message hash"));
    }
    let mut point = blst_p1::default();
    unsafe {
        blst_hash_to_g1(
            &mut point,
            message_hash.as_ptr(),
            message_hash.len(),
            DST.as_ptr(),
            DST.len(),
            ptr::null(),
            0,
        );
        if blst_p1_is_inf(&point) {
            return Err(Error::PointAtInfinity);
        }
    }
    Ok(point)
}

fn generator_g1() -> blst_p1 {
    let mut point = blst_p1::default();
    unsafe { blst_p1_from_affine(&mut point, &BLS12_381_G1) };
    point
}

fn generator_g2() -> blst_p2 {
    let mut point = blst_p2::default();
    unsafe { blst_p2_from_affine(&mut point, &BLS12_381_G2) };
    point
}

/// Returns true if `e(a₁, a₂) · e(b₁, b₂) == 1`.
fn pairing_check(a: (&blst_p1, &blst_p2), b: (&blst_p1, &blst_p2)) -> bool {
    let mut a1 = blst_p1_affine::default();
    let mut a2 = blst_p2_affine::default();
    let mut b1 = blst_p1_affine::default();
    let mut b2 = blst_p2_affine::default();
    let mut left = blst_fp12::default();
    let mut right = blst_fp12::default();
    let mut result = blst_fp12::default();
    unsafe {
        blst_p1_to_affine(&mut a1, a.0);
        blst_p2_to_affine(&mut a2, a.1);
        blst_p1_to_affine(&mut b1, b.0);
        blst_p2_to_affine(&mut b2, b.1);
        blst_miller_loop(&mut left, &a2, &a1);
        blst_miller_loop(&mut right, &b2, &b1);
        blst_fp12_mul(&mut left, &left, &right);
        blst_final_exp(&mut result, &left);
        blst_fp12_is_one(&result)
    }
}

fn decode_g1_uncompressed(bytes: &[u8]) -> Result<blst_p1, Error> {
    let mut affine = blst_p1_affine::default();
    let mut point = blst_p1::default();
    unsafe {
        if blst_p1_deserialize(&mut affine, bytes.as_ptr()) != BLST_ERROR::BLST_SUCCESS {
            return Err(Error::Malformed("G1 point"));
        }
        blst_p1_from_affine(&mut point, &affine);
        if blst_p1_is_inf(&point) {
            return Err(Error::PointAtInfinity);
        }
        if !blst_p1_in_g1(&point) {
            return Err(Error::Malformed("G1 point not in group"));
        }
    }
    Ok(point)
}

fn encode_g1_uncompressed(point: &blst_p1) -> [u8; 2 * FIELD_LENGTH] {
    let mut out = [0u8; 2 * FIELD_LENGTH];
    unsafe { blst_p1_serialize(out.as_mut_ptr(), point) };
    out
}

/// Encodes a G1 key with each coordinate left-padded to 64 bytes.
fn encode_on_chain_key(point: &blst_p1) -> Vec<u8> {
    let uncompressed = encode_g1_uncompressed(point);
    let padding = PADDED_FIELD_LENGTH - FIELD_LENGTH;
    let mut out = vec![0u8; ON_CHAIN_PUBLIC_KEY_LENGTH];
    out[padding..PADDED_FIELD_LENGTH].copy_from_slice(&uncompressed[..FIELD_LENGTH]);
    out[PADDED_FIELD_LENGTH + padding..].copy_from_slice(&uncompressed[FIELD_LENGTH..]);
    out
}

fn decode_on_chain_key(bytes: &[u8]) -> Result<blst_p1, Error> {
    if bytes.len() != ON_CHAIN_PUBLIC_KEY_LENGTH {
        return Err(Error::Malformed("on-chain key length"));
    }
    let padding = PADDED_FIELD_LENGTH - FIELD_LENGTH;
    let (x, y) = bytes.split_at(PADDED_FIELD_LENGTH);
    if x[..padding].iter().chain(&y[..padding]).any(|b| *b != 0) {
        return Err(Error::Malformed("on-chain key padding"));
    }
    let mut uncompressed = [0u8; 2 * FIELD_LENGTH];
    uncompressed[..FIELD_LENGTH].copy_from_slice(&x[padding..]);
    uncompressed[FIELD_LENGTH..].copy_from_slice(&y[padding..]);
    decode_g1_uncompressed(&uncompressed)
}

/// Sums on-chain encoded public keys into the on-chain encoding of their aggregate.
pub fn aggregate_on_chain_keys<K: AsRef<[u8]>>(
    keys: impl IntoIterator<Item = K>,
) -> Result<Vec<u8>, Error> {
    let mut keys = keys.into_iter();
    let first = keys.next().ok_or(Error::EmptyAggregate)?;
    let mut sum = decode_on_chain_key(first.as_ref())?;
    for key in keys {
        add_g1(&mut sum, &decode_on_chain_key(key.as_ref())?);
    }
    if unsafe { blst_p1_is_inf(&sum) } {
        return Err(Error::PointAtInfinity);
    }
    Ok(encode_on_chain_key(&sum))
}

fn add_g1(sum: &mut blst_p1, point: &blst_p1) {
    let out: *mut blst_p1 = sum;
    unsafe { blst_p1_add_or_double(out, out, point) };
}

fn add_g2(sum: &mut blst_p2, point: &blst_p2) {
    let out: *mut blst_p2 = sum;
    unsafe { blst_p2_add_or_double(out, out, point) };
}

/// BLS12-381 secret key.
#[derive(Clone)]
pub struct PrivateKey {
    scalar: blst_scalar,
}

impl PrivateKey {
    /// Generates a random key.
    pub fn random<R: RngCore + CryptoRng>(rng: &mut R) -> Self {
        let mut ikm = [0u8; 64];
        rng.fill_bytes(&mut ikm);
        let mut scalar = blst_scalar::default();
        unsafe { blst_keygen_v3(&mut scalar, ikm.as_ptr(), ikm.len(), ptr::null(), 0) };
        ikm.zeroize();
        Self { scalar }
    }

    /// Decodes a canonical big-endian scalar.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, Error> {
        if bytes.len() != PRIVATE_KEY_LENGTH {
            return Err(Error::Malformed("private key length"));
        }
        let mut scalar = blst_scalar::default();
        unsafe {
            blst_scalar_from_bendian(&mut scalar, bytes.as_ptr());
            if !blst_scalar_fr_check(&scalar) {
                return Err(Error::Malformed("private key"));
            }
        }
        if scalar.b.iter().all(|b| *b == 0) {
            return Err(Error::Malformed("private key"));
        }
        Ok(Self { scalar })
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = vec![0u8; PRIVATE_KEY_LENGTH];
        unsafe { blst_bendian_from_scalar(out.as_mut_ptr(), &self.scalar) };
        out
    }

    /// Signs a precomputed SHA-256 message hash.
    pub fn sign_hash(&self, message_hash: &[u8]) -> Result<Signature, Error> {
        let point = hash_to_g1(STRATEGY, message_hash)?;
        let mut signature = blst_p1::default();
        unsafe { blst_p1_mult(&mut signature, &point, self.scalar.b.as_ptr(), SCALAR_BITS) };
        Ok(Signature(signature))
    }
}

impl Signer for PrivateKey {
    type PublicKey = PublicKey;

    fn public_key(&self) -> PublicKey {
        let mut g1 = blst_p1::default();
        let mut g2 = blst_p2::default();
        unsafe {
            blst_p1_mult(&mut g1, &generator_g1(), self.scalar.b.as_ptr(), SCALAR_BITS);
            blst_p2_mult(&mut g2, &generator_g2(), self.scalar.b.as_ptr(), SCALAR_BITS);
        }
        PublicKey { g1, g2 }
    }

    fn sign(&self, message: &[u8]) -> Result<(Vec<u8>, Vec<u8>), Error> {
        let message_hash = sha256(message);
        let signature = self.sign_hash(&message_hash)?;
        Ok((signature.to_bytes(), message_hash.to_vec()))
    }
}

impl Drop for PrivateKey {
    fn drop(&mut self) {
        self.scalar.b.zeroize();
    }
}

impl fmt::Debug for PrivateKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("bls12381::PrivateKey([REDACTED])")
    }
}

/// BLS12-381 signature (a G1 point).
#[derive(Clone, Copy)]
pub struct Signature(blst_p1);

impl Signature {
    pub fn to_bytes(&self) -> Vec<u8> {
        encode_g1_uncompressed(&self.0).to_vec()
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, Error> {
        if bytes.len() != SIGNATURE_LENGTH {
            return Err(Error::Malformed("signature length"));
        }
        decode_g1_uncompressed(bytes).map(Self)
    }
}

impl PartialEq for Signature {
    fn eq(&self, other: &Self) -> bool {
        unsafe { blst_p1_is_equal(&self.0, &other.0) }
    }
}

impl Eq for Signature {}

impl fmt::Debug for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Signature({})", relay_utils::hex(&self.to_bytes()))
    }
}

impl Aggregatable for Signature {
    fn aggregate<'a>(items: impl IntoIterator<Item = &'a Self>) -> Result<Self, Error> {
        let mut items = items.into_iter();
        let mut sum = items.next().ok_or(Error::EmptyAggregate)?.0;
        for item in items {
            add_g1(&mut sum, &item.0);
        }
        if unsafe { blst_p1_is_inf(&sum) } {
            return Err(Error::PointAtInfinity);
        }
        Ok(Self(sum))
    }

    fn negate(&self) -> Self {
        let mut point = self.0;
        unsafe { blst_p1_cneg(&mut point, true) };
        Self(point)
    }
}

/// BLS12-381 public key (the same secret in G1 and G2).
#[derive(Clone, Copy)]
pub struct PublicKey {
    g1: blst_p1,
    g2: blst_p2,
}

impl PublicKey {
    /// Decodes a raw key, checking both halves encode the same secret.
    pub fn from_raw(bytes: &[u8]) -> Result<Self, Error> {
        if bytes.len() != RAW_PUBLIC_KEY_LENGTH {
            return Err(Error::Malformed("public key length"));
        }
        let mut g1 = blst_p1::default();
        let mut g2 = blst_p2::default();
        unsafe {
            let mut affine = blst_p1_affine::default();
            if blst_p1_uncompress(&mut affine, bytes.as_ptr()) != BLST_ERROR::BLST_SUCCESS {
                return Err(Error::Malformed("public key G1"));
            }
            blst_p1_from_affine(&mut g1, &affine);
            let mut affine = blst_p2_affine::default();
            if blst_p2_uncompress(&mut affine, bytes[G1_COMPRESSED_LENGTH..].as_ptr())
                != BLST_ERROR::BLST_SUCCESS
            {
                return Err(Error::Malformed("public key G2"));
            }
            blst_p2_from_affine(&mut g2, &affine);
            if blst_p1_is_inf(&g1) || blst_p2_is_inf(&g2) {
                return Err(Error::PointAtInfinity);
            }
            if !blst_p1_in_g1(&g1) || !blst_p2_in_g2(&g2) {
                return Err(Error::Malformed("public key not in group"));
            }
        }
        let mut negated = generator_g1();
        unsafe { blst_p1_cneg(&mut negated, true) };
        if !pairing_check((&g1, &generator_g2()), (&negated, &g2)) {
            return Err(Error::Malformed("public key halves differ"));
        }
        Ok(Self { g1, g2 })
    }

    /// Verifies a parsed signature over a precomputed message hash.
    pub fn verify_signature(&self, message_hash: &[u8], signature: &Signature) -> Result<(), Error> {
        let point = hash_to_g1(STRATEGY, message_hash)?;
        let negated = signature.negate();
        if !pairing_check((&point, &self.g2), (&negated.0, &generator_g2())) {
            return Err(Error::InvalidSignature);
        }
        Ok(())
    }
}

impl Verifier for PublicKey {
    fn hash_message(message: &[u8]) -> Vec<u8> {
        sha256(message).to_vec()
    }

    fn verify_with_hash(&self, message_hash: &[u8], signature: &[u8]) -> Result<(), Error> {
        let signature = Signature::from_bytes(signature)?;
        self.verify_signature(message_hash, &signature)
    }

    fn on_chain(&self) -> Vec<u8> {
        encode_on_chain_key(&self.g1)
    }

    fn raw(&self) -> Vec<u8> {
        let mut out = vec![0u8; RAW_PUBLIC_KEY_LENGTH];
        unsafe {
            blst_p1_compress(out.as_mut_ptr(), &self.g1);
            blst_p2_compress(out[G1_COMPRESSED_LENGTH..].as_mut_ptr(), &self.g2);
        }
        out
    }
}

impl Aggregatable for PublicKey {
    fn aggregate<'a>(items: impl IntoIterator<Item = &'a Self>) -> Result<Self, Error> {
        let mut items = items.into_iter();
        let first = items.next().ok_or(Error::EmptyAggregate)?;
        let (mut g1, mut g2) = (first.g1, first.g2);
        for item in items {
            add_g1(&mut g1, &item.g1);
            add_g2(&mut g2, &item.g2);
        }
        if unsafe { blst_p1_is_inf(&g1) || blst_p2_is_inf(&g2) } {
            return Err(Error::PointAtInfinity);
        }
        Ok(Self { g1, g2 })
    }

    fn negate(&self) -> Self {
        let (mut g1, mut g2) = (self.g1, self.g2);
        unsafe {
            blst_p1_cneg(&mut g1, true);
            blst_p2_cneg(&mut g2, true);
        }
        Self { g1, g2 }
    }
}

impl PartialEq for PublicKey {
    fn eq(&self, other: &Self) -> bool {
        unsafe { blst_p1_is_equal(&self.g1, &other.g1) && blst_p2_is_equal(&self.g2, &other.g2) }
    }
}

impl Eq for PublicKey {}

impl fmt::Debug for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PublicKey({self})")
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

    fn keys(count: u64) -> Vec<PrivateKey> {
        (0..count)
            .map(|seed| PrivateKey::random(&mut StdRng::seed_from_u64(seed)))
            .collect()
    }

    #[test]
    fn test_sign_verify() {
        let key = &keys(1)[0];
        let public = key.public_key();
        let (signature, hash) = key.sign(b"message").unwrap();
        assert_eq!(signature.len(), SIGNATURE_LENGTH);
        assert_eq!(hash, sha256(b"message").to_vec());
        public.verify(b"message", &signature).unwrap();
        public.verify_with_hash(&hash, &signature).unwrap();
    }

    #[test]
    fn test_invalid_vs_malformed() {
        let keys = keys(2);
        let (signature, hash) = keys[0].sign(b"message").unwrap();
        assert_eq!(
            keys[1].public_key().verify_with_hash(&hash, &signature),
            Err(Error::InvalidSignature)
        );
        let error = keys[0]
            .public_key()
            .verify_with_hash(&hash, &signature[..SIGNATURE_LENGTH - 1])
            .unwrap_err();
        assert!(error.is_malformed());
        let mut corrupted = signature.clone();
        corrupted[SIGNATURE_LENGTH - 1] ^= 1;
        assert!(keys[0]
            .public_key()
            .verify_with_hash(&hash, &corrupted)
            .unwrap_err()
            .is_malformed());
    }

    #[test]
    fn test_key_encodings() {
        let key = &keys(1)[0];
        let public = key.public_key();
        let raw = public.raw();
        assert_eq!(raw.len(), RAW_PUBLIC_KEY_LENGTH);
        assert_eq!(PublicKey::from_raw(&raw).unwrap(), public);

        let on_chain = public.on_chain();
        assert_eq!(on_chain.len(), ON_CHAIN_PUBLIC_KEY_LENGTH);
        assert!(on_chain[..16].iter().all(|b| *b == 0));
        let decoded = decode_on_chain_key(&on_chain).unwrap();
        assert!(unsafe { blst_p1_is_equal(&decoded, &public.g1) });

        let restored = PrivateKey::from_bytes(&key.to_bytes()).unwrap();
        assert_eq!(restored.public_key(), public);
    }

    #[test]
    fn test_on_chain_padding_enforced() {
        let mut on_chain = keys(1)[0].public_key().on_chain();
        on_chain[0] = 1;
        assert_eq!(
            decode_on_chain_key(&on_chain),
            Err(Error::Malformed("on-chain key padding"))
        );
    }

    #[test]
    fn test_mismatched_raw_halves() {
        let keys = keys(2);
        let first = keys[0].public_key().raw();
        let second = keys[1].public_key().raw();
        let mut mixed = first[..G1_COMPRESSED_LENGTH].to_vec();
        mixed.extend_from_slice(&second[G1_COMPRESSED_LENGTH..]);
        assert_eq!(
            PublicKey::from_raw(&mixed),
            Err(Error::Malformed("public key halves differ"))
        );
    }

    #[test]
    fn test_aggregate_commutes() {
        let keys = keys(4);
        let hash = sha256(b"header");
        let signatures: Vec<Signature> = keys.iter().map(|k| k.sign_hash(&hash).unwrap()).collect();
        let publics: Vec<PublicKey> = keys.iter().map(|k| k.public_key()).collect();

        let forward = Signature::aggregate(&signatures).unwrap();
        let backward = Signature::aggregate(signatures.iter().rev()).unwrap();
        assert_eq!(forward, backward);

        let aggregate_key = PublicKey::aggregate(&publics).unwrap();
        aggregate_key.verify_signature(&hash, &forward).unwrap();
        let partial = Signature::aggregate(&signatures[..3]).unwrap();
        assert_eq!(
            aggregate_key.verify_signature(&hash, &partial),
            Err(Error::InvalidSignature)
        );
    }

    #[test]
    fn test_aggregate_on_chain_keys() {
        let publics: Vec<PublicKey> = keys(3).iter().map(|k| k.public_key()).collect();
        let expected = PublicKey::aggregate(&publics).unwrap().on_chain();
        let on_chain: Vec<Vec<u8>> = publics.iter().map(|p| p.on_chain()).collect();
        assert_eq!(aggregate_on_chain_keys(&on_chain).unwrap(), expected);
    }

    #[test]
    fn test_negate_cancels() {
        let signature = keys(1)[0].sign_hash(&sha256(b"m")).unwrap();
        assert_eq!(
            Signature::aggregate([&signature, &signature.negate()]),
            Err(Error::PointAtInfinity)
        );
    }

    #[test]
    fn test_rejects_try_and_increment() {
        assert!(matches!(
            hash_to_g1(HashStrategy::TryAndIncrement, &[0u8; 32]),
            Err(Error::UnsupportedHashStrategy(_, KeyType::Bls12381))
        ));
    }
}
