//! Validators, signatures, and proofs exchanged between nodes.

use bytes::{Buf, BufMut, Bytes};
use relay_cryptography::{sha256, KeyTag};
use relay_utils::codec::{self, EncodeSize, Read, ReadExt, Write};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Period during which a validator set is fixed.
pub type Epoch = u64;

/// Stake-weighted influence of a validator.
pub type VotingPower = u128;

/// Layout version of [ValidatorSet].
pub const VALIDATOR_SET_VERSION: u8 = 1;

/// An operator or vault address.
#[derive(Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Address(pub [u8; 20]);

impl fmt::Debug for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", relay_utils::hex(&self.0))
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Identifies a signable message: `sha256(key_tag || epoch || message_hash)`.
///
/// Signatures and proofs for the same message, epoch, and key tag share a [RequestId].
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RequestId([u8; 32]);

impl RequestId {
    pub fn new(key_tag: KeyTag, epoch: Epoch, message_hash: &[u8]) -> Self {
        let mut preimage = Vec::with_capacity(1 + 8 + message_hash.len());
        preimage.push(key_tag.get());
        preimage.extend_from_slice(&epoch.to_be_bytes());
        preimage.extend_from_slice(message_hash);
        Self(sha256(&preimage))
    }

    pub const fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Maps the identifier onto one of `shards` buckets.
    pub fn shard(&self, shards: usize) -> usize {
        let mut prefix = [0u8; 8];
        prefix.copy_from_slice(&self.0[..8]);
        (u64::from_be_bytes(prefix) % shards.max(1) as u64) as usize
    }
}

impl fmt::Debug for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", relay_utils::hex(&self.0))
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

impl Write for RequestId {
    fn write(&self, buf: &mut impl BufMut) {
        self.0.write(buf);
    }
}

impl EncodeSize for RequestId {
    fn encode_size(&self) -> usize {
        32
    }
}

impl Read for RequestId {
    type Cfg = ();

    fn read_cfg(buf: &mut impl Buf, _: &()) -> Result<Self, codec::Error> {
        Ok(Self(<[u8; 32]>::read(buf)?))
    }
}

/// A validator key registered on chain under a [KeyTag].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ValidatorKey {
    pub tag: KeyTag,
    /// On-chain encoding of the public key.
    pub payload: Bytes,
}

/// A vault delegating stake to a validator.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Vault {
    pub address: Address,
    pub voting_power: VotingPower,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Validator {
    pub operator: Address,
    pub voting_power: VotingPower,
    pub is_active: bool,
    pub keys: Vec<ValidatorKey>,
    pub vaults: Vec<Vault>,
}

impl Validator {
    /// Returns the on-chain key registered under `tag`, if any.
    pub fn key(&self, tag: KeyTag) -> Option<&[u8]> {
        self.keys
            .iter()
            .find(|key| key.tag == tag)
            .map(|key| key.payload.as_ref())
    }
}

/// Validators of a single epoch.
///
/// Validators are sorted by operator address on construction, so the position of a
/// validator (its index) is stable for the epoch. The set is immutable once built.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ValidatorSet {
    version: u8,
    epoch: Epoch,
    required_key_tag: KeyTag,
    quorum_threshold: VotingPower,
    total_voting_power: VotingPower,
    validators: Vec<Validator>,
}

impl ValidatorSet {
    /// Builds the set for `epoch`.
    ///
    /// Voting power is taken as given: any per-validator cap must already be applied.
    pub fn new(
        epoch: Epoch,
        required_key_tag: KeyTag,
        quorum_threshold: VotingPower,
        mut validators: Vec<Validator>,
    ) -> Self {
        validators.sort_by(|a, b| a.operator.cmp(&b.operator));
        let total_voting_power = validators
            .iter()
            .filter(|v| v.is_active)
            .fold(0, |acc: VotingPower, v| acc.saturating_add(v.voting_power));
        Self {
            version: VALIDATOR_SET_VERSION,
            epoch,
            required_key_tag,
            quorum_threshold,
            total_voting_power,
            validators,
        }
    }

    pub fn version(&self) -> u8 {
        self.version
    }

    pub fn epoch(&self) -> Epoch {
        self.epoch
    }

    pub fn required_key_tag(&self) -> KeyTag {
        self.required_key_tag
    }

    /// Minimum accumulated voting power for a proof (absolute units).
    pub fn quorum_threshold(&self) -> VotingPower {
        self.quorum_threshold
    }

    /// Sum of the voting power of active validators.
    pub fn total_voting_power(&self) -> VotingPower {
        self.total_voting_power
    }

    pub fn validators(&self) -> &[Validator] {
        &self.validators
    }

    pub fn len(&self) -> u32 {
        self.validators.len() as u32
    }

    pub fn is_empty(&self) -> bool {
        self.validators.is_empty()
    }

    pub fn validator(&self, index: u32) -> Option<&Validator> {
        self.validators.get(index as usize)
    }

    /// Finds the validator that registered `on_chain` under `tag`.
    pub fn find_by_key(&self, tag: KeyTag, on_chain: &[u8]) -> Option<(u32, &Validator)> {
        self.validators
            .iter()
            .enumerate()
            .find(|(_, v)| v.key(tag) == Some(on_chain))
            .map(|(index, v)| (index as u32, v))
    }

    /// Number of active validators.
    pub fn active_count(&self) -> u32 {
        self.validators.iter().filter(|v| v.is_active).count() as u32
    }

    /// Returns true if the validator at `index` can count toward a quorum for `tag`: it
    /// must be active and hold a key under `tag`.
    pub fn is_eligible(&self, index: u32, tag: KeyTag) -> bool {
        self.validator(index)
            .is_some_and(|v| v.is_active && v.key(tag).is_some())
    }

    /// Indices of all validators eligible for `tag`.
    pub fn eligible(&self, tag: KeyTag) -> impl Iterator<Item = u32> + '_ {
        (0..self.len()).filter(move |index| self.is_eligible(*index, tag))
    }
}

/// Maximum field lengths accepted when decoding untrusted payloads.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Limits {
    pub public_key: usize,
    pub signature: usize,
    pub message_hash: usize,
    pub proof: usize,
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            public_key: 144,
            signature: 96,
            message_hash: 64,
            proof: 1 << 20,
        }
    }
}

/// A validator's signature over a message hash.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Signature {
    pub request_id: RequestId,
    pub key_tag: KeyTag,
    pub epoch: Epoch,
    pub message_hash: Bytes,
    pub signature: Bytes,
    /// Full (raw) encoding of the signer's public key.
    pub public_key: Bytes,
}

impl Signature {
    /// Creates a signature, deriving its [RequestId].
    pub fn new(
        key_tag: KeyTag,
        epoch: Epoch,
        message_hash: Bytes,
        signature: Bytes,
        public_key: Bytes,
    ) -> Self {
        Self {
            request_id: RequestId::new(key_tag, epoch, &message_hash),
            key_tag,
            epoch,
            message_hash,
            signature,
            public_key,
        }
    }
}

impl Write for Signature {
    fn write(&self, buf: &mut impl BufMut) {
        self.request_id.write(buf);
        self.key_tag.write(buf);
        self.epoch.write(buf);
        self.message_hash.write(buf);
        self.public_key.write(buf);
        self.signature.write(buf);
    }
}

impl EncodeSize for Signature {
    fn encode_size(&self) -> usize {
        self.request_id.encode_size()
            + self.key_tag.encode_size()
            + self.epoch.encode_size()
            + self.message_hash.encode_size()
            + self.public_key.encode_size()
            + self.signature.encode_size()
    }
}

impl Read for Signature {
    type Cfg = Limits;

    fn read_cfg(buf: &mut impl Buf, limits: &Limits) -> Result<Self, codec::Error> {
        let request_id = RequestId::read(buf)?;
        let key_tag = KeyTag::read(buf)?;
        let epoch = Epoch::read(buf)?;
        let message_hash = Bytes::read_cfg(buf, &limits.message_hash)?;
        let public_key = Bytes::read_cfg(buf, &limits.public_key)?;
        let signature = Bytes::read_cfg(buf, &limits.signature)?;
        Ok(Self {
            request_id,
            key_tag,
            epoch,
            message_hash,
            signature,
            public_key,
        })
    }
}

/// Proof system used to produce an [AggregationProof].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum VerificationType {
    Zk = 0,
    Simple = 1,
}

impl Write for VerificationType {
    fn write(&self, buf: &mut impl BufMut) {
        (*self as u8).write(buf);
    }
}

impl EncodeSize for VerificationType {
    fn encode_size(&self) -> usize {
        1
    }
}

impl Read for VerificationType {
    type Cfg = ();

    fn read_cfg(buf: &mut impl Buf, _: &()) -> Result<Self, codec::Error> {
        match u8::read(buf)? {
            0 => Ok(Self::Zk),
            1 => Ok(Self::Simple),
            _ => Err(codec::Error::Invalid("VerificationType", "unknown")),
        }
    }
}

/// Proof that a quorum of an epoch's validators signed a message hash.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AggregationProof {
    pub key_tag: KeyTag,
    pub epoch: Epoch,
    pub message_hash: Bytes,
    pub verification_type: VerificationType,
    pub proof: Bytes,
}

impl AggregationProof {
    pub fn request_id(&self) -> RequestId {
        RequestId::new(self.key_tag, self.epoch, &self.message_hash)
    }
}

impl Write for AggregationProof {
    fn write(&self, buf: &mut impl BufMut) {
        self.key_tag.write(buf);
        self.epoch.write(buf);
        self.message_hash.write(buf);
        self.verification_type.write(buf);
        self.proof.write(buf);
    }
}

impl EncodeSize for AggregationProof {
    fn encode_size(&self) -> usize {
        self.key_tag.encode_size()
            + self.epoch.encode_size()
            + self.message_hash.encode_size()
            + self.verification_type.encode_size()
            + self.proof.encode_size()
    }
}

impl Read for AggregationProof {
    type Cfg = Limits;

    fn read_cfg(buf: &mut impl Buf, limits: &Limits) -> Result<Self, codec::Error> {
        let key_tag = KeyTag::read(buf)?;
        let epoch = Epoch::read(buf)?;
        let message_hash = Bytes::read_cfg(buf, &limits.message_hash)?;
        let verification_type = VerificationType::read(buf)?;
        let proof = Bytes::read_cfg(buf, &limits.proof)?;
        Ok(Self {
            key_tag,
            epoch,
            message_hash,
            verification_type,
            proof,
        })
    }
}

/// A message this node has seen signatures for.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SignatureRequest {
    pub request_id: RequestId,
    pub key_tag: KeyTag,
    pub epoch: Epoch,
    pub message_hash: Bytes,
}

impl From<&Signature> for SignatureRequest {
    fn from(signature: &Signature) -> Self {
        Self {
            request_id: signature.request_id,
            key_tag: signature.key_tag,
            epoch: signature.epoch,
            message_hash: signature.message_hash.clone(),
        }
    }
}

/// A key/value pair the settlement contracts need alongside a validator set header.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ExtraData {
    pub key: [u8; 32],
    pub value: [u8; 32],
}

#[cfg(test)]
mod tests {
    use super::*;
    use relay_cryptography::KeyType;
    use relay_utils::codec::{Decode, Encode};

    fn tag() -> KeyTag {
        KeyTag::new(KeyType::BlsBn254, 1).unwrap()
    }

    fn validator(operator: u8, power: VotingPower, active: bool) -> Validator {
        Validator {
            operator: Address([operator; 20]),
            voting_power: power,
            is_active: active,
            keys: vec![ValidatorKey {
                tag: tag(),
                payload: Bytes::from(vec![operator; 64]),
            }],
            vaults: Vec::new(),
        }
    }

    #[test]
    fn test_request_id_binds_inputs() {
        let base = RequestId::new(tag(), 1, b"hash");
        assert_eq!(base, RequestId::new(tag(), 1, b"hash"));
        assert_ne!(base, RequestId::new(tag(), 2, b"hash"));
        assert_ne!(base, RequestId::new(tag(), 1, b"other"));
        let other_tag = KeyTag::new(KeyType::BlsBn254, 2).unwrap();
        assert_ne!(base, RequestId::new(other_tag, 1, b"hash"));
    }

    #[test]
    fn test_shard_in_range() {
        let id = RequestId::new(tag(), 7, b"hash");
        for shards in [1, 2, 3, 1024] {
            assert!(id.shard(shards) < shards);
        }
        assert_eq!(id.shard(0), 0);
    }

    #[test]
    fn test_validator_set_sorted_and_totals() {
        let set = ValidatorSet::new(
            3,
            tag(),
            100,
            vec![
                validator(3, 30, true),
                validator(1, 10, true),
                validator(2, 20, false),
            ],
        );
        let operators: Vec<_> = set.validators().iter().map(|v| v.operator.0[0]).collect();
        assert_eq!(operators, vec![1, 2, 3]);
        assert_eq!(set.total_voting_power(), 40);
        assert_eq!(set.active_count(), 2);
        assert_eq!(set.version(), VALIDATOR_SET_VERSION);

        let (index, found) = set.find_by_key(tag(), &[3; 64]).unwrap();
        assert_eq!(index, 2);
        assert_eq!(found.voting_power, 30);
        assert!(set.find_by_key(tag(), &[9; 64]).is_none());
    }

    #[test]
    fn test_eligibility() {
        let mut keyless = validator(4, 40, true);
        keyless.keys.clear();
        let set = ValidatorSet::new(
            1,
            tag(),
            10,
            vec![validator(1, 10, true), validator(2, 20, false), keyless],
        );
        assert!(set.is_eligible(0, tag()));
        assert!(!set.is_eligible(1, tag()));
        assert!(!set.is_eligible(2, tag()));
        assert!(!set.is_eligible(3, tag()));
        assert_eq!(set.eligible(tag()).collect::<Vec<_>>(), vec![0]);
    }

    #[test]
    fn test_signature_rejects_oversized_fields() {
        let signature = Signature::new(
            tag(),
            1,
            Bytes::from_static(&[1; 32]),
            Bytes::from(vec![2; 64]),
            Bytes::from(vec![3; 96]),
        );
        let encoded = signature.encode();
        assert_eq!(
            Signature::decode_cfg(encoded.clone(), &Limits::default()).unwrap(),
            signature
        );

        let tight = Limits {
            public_key: 95,
            ..Limits::default()
        };
        assert_eq!(
            Signature::decode_cfg(encoded, &tight),
            Err(codec::Error::LengthExceeded(96, 95))
        );
    }

    #[test]
    fn test_proof_unknown_verification_type() {
        let proof = AggregationProof {
            key_tag: tag(),
            epoch: 1,
            message_hash: Bytes::from_static(&[1; 32]),
            verification_type: VerificationType::Simple,
            proof: Bytes::from_static(b"proof"),
        };
        let mut encoded = proof.encode().to_vec();
        // key tag (1) + epoch (8) + hash length (1) + hash (32)
        encoded[42] = 9;
        assert!(AggregationProof::decode_cfg(&encoded[..], &Limits::default()).is_err());
        assert_eq!(proof.request_id(), RequestId::new(tag(), 1, &[1; 32]));
    }
}
