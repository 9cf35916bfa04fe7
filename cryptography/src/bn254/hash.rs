use crate::{Error, HashStrategy, KeyType};
use ark_bn254::{Fq, G1Affine};
use ark_ff::{BigInt, BigInteger, Field, One, PrimeField};
use std::sync::OnceLock;

/// Square-root exponent `(p + 1) / 4` (valid because `p ≡ 3 mod 4`).
fn sqrt_exponent() -> &'static [u64; 4] {
    static EXPONENT: OnceLock<[u64; 4]> = OnceLock::new();
    EXPONENT.get_or_init(|| {
        let mut exponent = Fq::MODULUS;
        exponent.add_with_carry(&BigInt::from(1u64));
        exponent.div2();
        exponent.div2();
        exponent.0
    })
}

/// Maps a 32-byte message hash onto G1.
///
/// Only [HashStrategy::TryAndIncrement] is available on BN254.
pub fn hash_to_g1(strategy: HashStrategy, digest: &[u8]) -> Result<G1Affine, Error> {
    match strategy {
        HashStrategy::TryAndIncrement => try_and_increment(digest),
        HashStrategy::HashToCurve => Err(Error::UnsupportedHashStrategy(
            strategy,
            KeyType::BlsBn254,
        )),
    }
}

fn try_and_increment(digest: &[u8]) -> Result<G1Affine, Error> {
    if digest.len() != super::MESSAGE_HASH_LENGTH {
        return Err(Error::Malformed("message hash"));
    }
    let three = Fq::from(3u64);
    let exponent = sqrt_exponent();
    let mut x = Fq::from_be_bytes_mod_order(digest);
    loop {
        let rhs = x.square() * x + three;
        let y = rhs.pow(exponent);
        if y.square() == rhs {
            // The cofactor of G1 is one, so every curve point is in the subgroup.
            return Ok(G1Affine::new_unchecked(x, y));
        }
        x += Fq::one();
    }
}
