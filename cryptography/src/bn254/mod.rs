//! BLS signatures over BN254.
//!
//! Signatures and message points live in G1, verification keys in G2. Messages are hashed
//! with Keccak-256 and mapped onto G1 with try-and-increment, matching the settlement
//! contracts' on-chain verifier.
//!
//! # Encodings
//!
//! | item | bytes | layout |
//! |---|---|---|
//! | private key | 32 | big-endian scalar |
//! | signature | 64 | big-endian `x ‖ y` of the G1 point |
//! | raw public key | 96 | compressed G1 (32) ‖ compressed G2 (64) |
//! | on-chain public key | 64 | big-endian `x ‖ y` of the G1 key |

mod hash;
pub use hash::hash_to_g1;
mod scheme;
pub use scheme::{
    aggregate_on_chain_keys, PrivateKey, PublicKey, Signature, MESSAGE_HASH_LENGTH, ON_CHAIN_PUBLIC_KEY_LENGTH,
    PRIVATE_KEY_LENGTH, RAW_PUBLIC_KEY_LENGTH, SIGNATURE_LENGTH,
};
