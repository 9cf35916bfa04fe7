//! Collect validator signatures into quorum proofs exactly once.
//!
//! # Overview
//!
//! Validators sign a message (typically a validator set header) and gossip their
//! signatures. Every node runs each signature it receives through the [processor::Processor],
//! which checks it, records it in the request's [signature_map::SignatureMap], and emits an
//! [events::Event]. Aggregator nodes react to those events: once their
//! [policy::Policy] says the request is ready, they combine the stored signatures into an
//! [types::AggregationProof] with an [aggregator::Aggregator] and gossip the proof. Every
//! node verifies and stores the first valid proof it sees for a request.
//!
//! # Request lifecycle
//!
//! ```text
//! Unknown -> Collecting -> QuorumReached -> ProofPending -> ProofVerified
//! ```
//!
//! A request is `Unknown` until its first signature is accepted and `Collecting` until the
//! accumulated voting power meets the epoch's quorum threshold. An aggregator marks it
//! `ProofPending` while it builds a proof, and it becomes `ProofVerified` once a proof is
//! stored.
//!
//! # Deduplication
//!
//! Signatures and proofs may arrive more than once (over gossip, over recovery, or both
//! concurrently). Work on a single request is serialized by a sharded lock table, and a
//! validator is counted at most once per request. Duplicates surface as
//! [Error::AlreadyExists], which callers treat as a successful no-op.

use relay_cryptography::KeyTag;
use thiserror::Error;

pub mod aggregator;
pub mod application;
pub mod events;
pub mod policy;
pub mod processor;
pub mod signature_map;
pub mod storage;
pub mod types;

#[cfg(any(test, feature = "mocks"))]
pub mod mocks;

/// How callers should treat an [Error].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Kind {
    /// Something referenced is absent. Usually nothing to do.
    NotFound,
    /// The item was already processed. Treat as success.
    AlreadyExists,
    /// The item is permanently rejected. Never retry the same payload.
    Invalid,
    /// A transient condition. Retry on the next cycle.
    Unavailable,
    /// A local failure (storage or invariant violation).
    Internal,
}

#[derive(Error, Debug)]
pub enum Error {
    #[error("validator not found")]
    ValidatorNotFound,
    #[error("validator inactive")]
    ValidatorInactive,
    #[error("no validator set for epoch {0}")]
    ValidatorSetNotFound(types::Epoch),
    #[error("already exists")]
    AlreadyExists,
    #[error("invalid signature")]
    InvalidSignature,
    #[error("malformed: {0}")]
    Malformed(relay_cryptography::Error),
    #[error("request id does not match contents")]
    RequestIdMismatch,
    #[error("invalid proof: {0}")]
    InvalidProof(aggregator::Error),
    #[error("no aggregator for {0:?}")]
    UnsupportedVerificationType(types::VerificationType),
    #[error("aggregation failed: {0}")]
    Aggregation(aggregator::Error),
    #[error("signature map: {0}")]
    SignatureMap(signature_map::Error),
    #[error("no signing key for {0}")]
    MissingKey(KeyTag),
    #[error("storage: {0}")]
    Storage(storage::Error),
}

impl Error {
    pub fn kind(&self) -> Kind {
        match self {
            Error::ValidatorNotFound | Error::ValidatorSetNotFound(_) | Error::MissingKey(_) => {
                Kind::NotFound
            }
            Error::AlreadyExists => Kind::AlreadyExists,
            Error::ValidatorInactive
            | Error::InvalidSignature
            | Error::Malformed(_)
            | Error::RequestIdMismatch
            | Error::InvalidProof(_)
            | Error::UnsupportedVerificationType(_) => Kind::Invalid,
            Error::Aggregation(aggregator::Error::QuorumNotReached { .. })
            | Error::Aggregation(aggregator::Error::NoSignatures) => Kind::Unavailable,
            Error::Aggregation(_) => Kind::Internal,
            Error::SignatureMap(signature_map::Error::AlreadyExists(_)) => Kind::AlreadyExists,
            Error::SignatureMap(signature_map::Error::IndexOutOfRange(..)) => Kind::Invalid,
            Error::SignatureMap(signature_map::Error::Overflow) => Kind::Internal,
            Error::Storage(storage::Error::NotFound) => Kind::NotFound,
            Error::Storage(storage::Error::AlreadyExists) => Kind::AlreadyExists,
            Error::Storage(storage::Error::Backend(_)) => Kind::Internal,
        }
    }
}

impl From<relay_cryptography::Error> for Error {
    fn from(err: relay_cryptography::Error) -> Self {
        match err {
            relay_cryptography::Error::InvalidSignature => Error::InvalidSignature,
            err => Error::Malformed(err),
        }
    }
}

impl From<storage::Error> for Error {
    fn from(err: storage::Error) -> Self {
        match err {
            storage::Error::AlreadyExists => Error::AlreadyExists,
            err => Error::Storage(err),
        }
    }
}

impl From<signature_map::Error> for Error {
    fn from(err: signature_map::Error) -> Self {
        match err {
            signature_map::Error::AlreadyExists(_) => Error::AlreadyExists,
            err => Error::SignatureMap(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kinds() {
        assert_eq!(
            Error::from(relay_cryptography::Error::InvalidSignature).kind(),
            Kind::Invalid
        );
        assert!(matches!(
            Error::from(relay_cryptography::Error::PointAtInfinity),
            Error::Malformed(_)
        ));
        assert!(matches!(
            Error::from(storage::Error::AlreadyExists),
            Error::AlreadyExists
        ));
        assert_eq!(Error::from(storage::Error::NotFound).kind(), Kind::NotFound);
        assert_eq!(
            Error::from(storage::Error::Backend("disk".into())).kind(),
            Kind::Internal
        );
        assert_eq!(
            Error::from(signature_map::Error::AlreadyExists(1)).kind(),
            Kind::AlreadyExists
        );
        assert_eq!(
            Error::Aggregation(aggregator::Error::QuorumNotReached { have: 1, need: 2 }).kind(),
            Kind::Unavailable
        );
    }
}
