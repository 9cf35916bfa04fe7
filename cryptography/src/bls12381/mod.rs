//! BLS signatures over BLS12-381.
//!
//! Signatures and message points live in G1 (the "minimal signature size" variant), verification
//! keys in G2. Messages are hashed with SHA-256 and mapped onto G1 with the standard
//! hash-to-curve suite under [DST].
//!
//! # Encodings
//!
//! | item | bytes | layout |
//! |---|---|---|
//! | private key | 32 | big-endian scalar |
//! | signature | 96 | uncompressed G1 |
//! | raw public key | 144 | compressed G1 (48) ‖ compressed G2 (96) |
//! | on-chain public key | 128 | G1 `x ‖ y`, each coordinate left-padded to 64 bytes |

mod scheme;
pub use scheme::{
    aggregate_on_chain_keys, hash_to_g1, PrivateKey, PublicKey, Signature, DST, MESSAGE_HASH_LENGTH,
    ON_CHAIN_PUBLIC_KEY_LENGTH, PRIVATE_KEY_LENGTH, RAW_PUBLIC_KEY_LENGTH, SIGNATURE_LENGTH,
};
