//! Proofs that carry the summed signature and public key of the signers.
//!
//! # Format
//!
//! A proof is the concatenation of (each field length-prefixed):
//!
//! ```text
//! aggregate signature || aggregate raw public key || signer bitmap
//! ```
//!
//! Verification recomputes the aggregate on-chain key of the validators in the bitmap and
//! checks that it matches the key in the proof, so a proof cannot claim signers that did
//! not contribute. It then runs a single pairing check of the aggregate signature against
//! the aggregate key.

use super::{Aggregator, Error};
use crate::types::{
    AggregationProof, ExtraData, Limits, Signature, ValidatorSet, VerificationType, VotingPower,
};
use bytes::{Buf, BufMut, Bytes};
use relay_cryptography::{
    aggregate_on_chain_keys, aggregate_signatures, keccak256, KeyTag, KeyType, PublicKey,
};
use relay_utils::{
    bitmap::MAX_CONTAINERS,
    codec::{self, Decode, Encode, EncodeSize, Read, Write},
    Bitmap,
};
use tracing::debug;

/// Extra-data name for the number of eligible validators.
const VALIDATORS_COUNT: &[u8] = b"relay.simple.validators_count";

/// Extra-data name for the Keccak-256 of the aggregate on-chain key.
const AGGREGATED_KEY: &[u8] = b"relay.simple.aggregated_key";

/// Decoded contents of a simple proof.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Proof {
    pub signature: Bytes,
    pub public_key: Bytes,
    pub signers: Bitmap,
}

impl Write for Proof {
    fn write(&self, buf: &mut impl BufMut) {
        self.signature.write(buf);
        self.public_key.write(buf);
        self.signers.write(buf);
    }
}

impl EncodeSize for Proof {
    fn encode_size(&self) -> usize {
        self.signature.encode_size() + self.public_key.encode_size() + self.signers.encode_size()
    }
}

impl Read for Proof {
    type Cfg = Limits;

    fn read_cfg(buf: &mut impl Buf, limits: &Limits) -> Result<Self, codec::Error> {
        let signature = Bytes::read_cfg(buf, &limits.signature)?;
        let public_key = Bytes::read_cfg(buf, &limits.public_key)?;
        let signers = Bitmap::read_cfg(buf, &MAX_CONTAINERS)?;
        Ok(Self {
            signature,
            public_key,
            signers,
        })
    }
}

/// Aggregates by elliptic-curve addition.
#[derive(Clone, Debug, Default)]
pub struct Simple {
    limits: Limits,
}

impl Simple {
    pub fn new(limits: Limits) -> Self {
        Self { limits }
    }
}

fn pairing_key_type(key_tag: KeyTag) -> Result<KeyType, Error> {
    let key_type = key_tag.key_type()?;
    if !key_type.is_aggregatable() {
        return Err(relay_cryptography::Error::NotAggregatable(key_type).into());
    }
    Ok(key_type)
}

fn extra_data_key(name: &[u8], key_tag: KeyTag) -> [u8; 32] {
    let mut preimage = name.to_vec();
    preimage.push(key_tag.get());
    keccak256(&preimage)
}

impl Aggregator for Simple {
    fn verification_type(&self) -> VerificationType {
        VerificationType::Simple
    }

    fn aggregate(
        &self,
        set: &ValidatorSet,
        key_tag: KeyTag,
        message_hash: &[u8],
        signatures: &[Signature],
    ) -> Result<AggregationProof, Error> {
        let key_type = pairing_key_type(key_tag)?;

        let mut signers = Bitmap::new();
        let mut voting_power: VotingPower = 0;
        let mut parts = Vec::with_capacity(signatures.len());
        let mut keys = Vec::with_capacity(signatures.len());
        for signature in signatures {
            if signature.key_tag != key_tag
                || signature.epoch != set.epoch()
                || signature.message_hash.as_ref() != message_hash
            {
                debug!(request_id = ?signature.request_id, "skipping signature for another request");
                continue;
            }
            let Ok(public_key) = PublicKey::from_raw(key_type, &signature.public_key) else {
                debug!(request_id = ?signature.request_id, "skipping signature with malformed key");
                continue;
            };
            let Some((index, validator)) = set.find_by_key(key_tag, &public_key.on_chain()) else {
                continue;
            };
            if !set.is_eligible(index, key_tag) || !signers.add(index) {
                continue;
            }
            voting_power = voting_power.saturating_add(validator.voting_power);
            parts.push(signature.signature.clone());
            keys.push(public_key);
        }
        if signers.is_empty() {
            return Err(Error::NoSignatures);
        }
        if voting_power < set.quorum_threshold() {
            return Err(Error::QuorumNotReached {
                have: voting_power,
                need: set.quorum_threshold(),
            });
        }

        let proof = Proof {
            signature: aggregate_signatures(key_type, &parts)?.into(),
            public_key: PublicKey::aggregate(&keys)?.raw().into(),
            signers,
        };
        let proof = AggregationProof {
            key_tag,
            epoch: set.epoch(),
            message_hash: Bytes::copy_from_slice(message_hash),
            verification_type: VerificationType::Simple,
            proof: proof.encode(),
        };

        // A bad individual signature would poison the aggregate.
        self.verify(set, key_tag, &proof)?;
        Ok(proof)
    }

    fn verify(
        &self,
        set: &ValidatorSet,
        key_tag: KeyTag,
        proof: &AggregationProof,
    ) -> Result<(), Error> {
        if proof.verification_type != VerificationType::Simple {
            return Err(Error::VerificationTypeMismatch(proof.verification_type));
        }
        if proof.key_tag != key_tag {
            return Err(Error::KeyTagMismatch);
        }
        if proof.epoch != set.epoch() {
            return Err(Error::EpochMismatch {
                proof: proof.epoch,
                set: set.epoch(),
            });
        }
        let key_type = pairing_key_type(key_tag)?;
        let decoded = Proof::decode_cfg(proof.proof.clone(), &self.limits)?;
        if decoded.signers.is_empty() {
            return Err(Error::NoSignatures);
        }

        let mut voting_power: VotingPower = 0;
        let mut keys = Vec::new();
        for index in decoded.signers.iter() {
            let validator = set
                .validator(index)
                .filter(|validator| validator.is_active)
                .ok_or(Error::IneligibleSigner(index))?;
            let key = validator
                .key(key_tag)
                .ok_or(Error::IneligibleSigner(index))?;
            voting_power = voting_power.saturating_add(validator.voting_power);
            keys.push(key);
        }
        if voting_power < set.quorum_threshold() {
            return Err(Error::QuorumNotReached {
                have: voting_power,
                need: set.quorum_threshold(),
            });
        }

        let expected = aggregate_on_chain_keys(key_type, &keys)?;
        let public_key = PublicKey::from_raw(key_type, &decoded.public_key)?;
        if public_key.on_chain() != expected {
            return Err(Error::KeyMismatch);
        }
        public_key.verify_with_hash(&proof.message_hash, &decoded.signature)?;
        Ok(())
    }

    fn generate_extra_data(
        &self,
        set: &ValidatorSet,
        key_tags: &[KeyTag],
    ) -> Result<Vec<ExtraData>, Error> {
        let mut extra = Vec::new();
        for key_tag in key_tags {
            let key_type = key_tag.key_type()?;
            if !key_type.is_aggregatable() {
                continue;
            }
            let keys: Vec<&[u8]> = set
                .eligible(*key_tag)
                .filter_map(|index| set.validator(index).and_then(|v| v.key(*key_tag)))
                .collect();

            let mut count = [0u8; 32];
            count[28..].copy_from_slice(&(keys.len() as u32).to_be_bytes());
            extra.push(ExtraData {
                key: extra_data_key(VALIDATORS_COUNT, *key_tag),
                value: count,
            });

            if keys.is_empty() {
                continue;
            }
            let aggregate = aggregate_on_chain_keys(key_type, &keys)?;
            extra.push(ExtraData {
                key: extra_data_key(AGGREGATED_KEY, *key_tag),
                value: keccak256(&aggregate),
            });
        }
        Ok(extra)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mocks::Fixture;
    use test_case::test_case;

    const MESSAGE: &[u8] = b"validator set header";

    fn signatures(fixture: &Fixture, indices: &[usize]) -> Vec<Signature> {
        indices.iter().map(|i| fixture.sign(*i, MESSAGE)).collect()
    }

    #[test_case(KeyType::BlsBn254)]
    #[test_case(KeyType::Bls12381)]
    fn test_aggregate_and_verify(key_type: KeyType) {
        let fixture = Fixture::new(key_type, &[101, 201, 301], 400);
        let signatures = signatures(&fixture, &[2, 1]);
        let hash = signatures[0].message_hash.clone();
        let simple = Simple::default();

        let proof = simple
            .aggregate(&fixture.set, fixture.key_tag, &hash, &signatures)
            .unwrap();
        assert_eq!(proof.request_id(), signatures[0].request_id);
        simple.verify(&fixture.set, fixture.key_tag, &proof).unwrap();

        let decoded = Proof::decode_cfg(proof.proof.clone(), &Limits::default()).unwrap();
        assert_eq!(decoded.signers.iter().collect::<Vec<_>>(), vec![1, 2]);
    }

    #[test_case(KeyType::BlsBn254)]
    #[test_case(KeyType::Bls12381)]
    fn test_order_independent(key_type: KeyType) {
        let fixture = Fixture::new(key_type, &[1, 1, 1, 1], 3);
        let forward = signatures(&fixture, &[0, 1, 2, 3]);
        let backward = signatures(&fixture, &[3, 1, 0, 2]);
        let hash = forward[0].message_hash.clone();
        let simple = Simple::default();

        let a = simple
            .aggregate(&fixture.set, fixture.key_tag, &hash, &forward)
            .unwrap();
        let b = simple
            .aggregate(&fixture.set, fixture.key_tag, &hash, &backward)
            .unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_quorum_not_reached() {
        let fixture = Fixture::new(KeyType::BlsBn254, &[101, 201, 301], 400);
        let signatures = signatures(&fixture, &[2]);
        let hash = signatures[0].message_hash.clone();
        let result = Simple::default().aggregate(&fixture.set, fixture.key_tag, &hash, &signatures);
        assert_eq!(
            result,
            Err(Error::QuorumNotReached {
                have: 301,
                need: 400
            })
        );
    }

    #[test]
    fn test_skips_duplicates_and_inactive() {
        let fixture = Fixture::with_inactive(KeyType::BlsBn254, &[100, 100, 100], 200, &[0]);
        let signatures = signatures(&fixture, &[0, 1, 1, 2]);
        let hash = signatures[0].message_hash.clone();
        let proof = Simple::default()
            .aggregate(&fixture.set, fixture.key_tag, &hash, &signatures)
            .unwrap();
        let decoded = Proof::decode_cfg(proof.proof, &Limits::default()).unwrap();
        assert_eq!(decoded.signers.iter().collect::<Vec<_>>(), vec![1, 2]);
    }

    #[test]
    fn test_rejects_inflated_signers() {
        let fixture = Fixture::new(KeyType::BlsBn254, &[100, 100, 100], 200);
        let signatures = signatures(&fixture, &[0, 1]);
        let hash = signatures[0].message_hash.clone();
        let simple = Simple::default();
        let mut proof = simple
            .aggregate(&fixture.set, fixture.key_tag, &hash, &signatures)
            .unwrap();

        let mut decoded = Proof::decode_cfg(proof.proof.clone(), &Limits::default()).unwrap();
        decoded.signers.add(2);
        proof.proof = decoded.encode();
        assert_eq!(
            simple.verify(&fixture.set, fixture.key_tag, &proof),
            Err(Error::KeyMismatch)
        );
    }

    #[test]
    fn test_rejects_wrong_message() {
        let fixture = Fixture::new(KeyType::Bls12381, &[100, 100], 200);
        let signatures = signatures(&fixture, &[0, 1]);
        let hash = signatures[0].message_hash.clone();
        let simple = Simple::default();
        let mut proof = simple
            .aggregate(&fixture.set, fixture.key_tag, &hash, &signatures)
            .unwrap();
        proof.message_hash = Bytes::from_static(&[7; 32]);
        assert_eq!(
            simple.verify(&fixture.set, fixture.key_tag, &proof),
            Err(Error::Crypto(relay_cryptography::Error::InvalidSignature))
        );
    }

    #[test]
    fn test_rejects_other_epoch() {
        let fixture = Fixture::new(KeyType::BlsBn254, &[100], 100);
        let signatures = signatures(&fixture, &[0]);
        let hash = signatures[0].message_hash.clone();
        let simple = Simple::default();
        let mut proof = simple
            .aggregate(&fixture.set, fixture.key_tag, &hash, &signatures)
            .unwrap();
        proof.epoch += 1;
        assert!(matches!(
            simple.verify(&fixture.set, fixture.key_tag, &proof),
            Err(Error::EpochMismatch { .. })
        ));
    }

    #[test]
    fn test_ecdsa_not_aggregatable() {
        let fixture = Fixture::new(KeyType::EcdsaSecp256k1, &[100], 100);
        let signatures = signatures(&fixture, &[0]);
        let hash = signatures[0].message_hash.clone();
        assert_eq!(
            Simple::default().aggregate(&fixture.set, fixture.key_tag, &hash, &signatures),
            Err(Error::Crypto(relay_cryptography::Error::NotAggregatable(
                KeyType::EcdsaSecp256k1
            )))
        );
    }

    #[test]
    fn test_extra_data() {
        let fixture = Fixture::with_inactive(KeyType::BlsBn254, &[1, 1, 1], 2, &[1]);
        let extra = Simple::default()
            .generate_extra_data(&fixture.set, &[fixture.key_tag])
            .unwrap();
        assert_eq!(extra.len(), 2);
        assert_eq!(extra[0].value[31], 2);

        let active: Vec<&[u8]> = [0u32, 2]
            .iter()
            .map(|i| fixture.set.validator(*i).unwrap().key(fixture.key_tag).unwrap())
            .collect();
        let expected = aggregate_on_chain_keys(KeyType::BlsBn254, &active).unwrap();
        assert_eq!(extra[1].value, keccak256(&expected));
        assert_ne!(extra[0].key, extra[1].key);
    }
}
