//! Track which validators signed a request and the voting power they represent.

use crate::types::{Epoch, RequestId, VotingPower};
use relay_utils::Bitmap;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    #[error("validator index {0} out of range (total {1})")]
    IndexOutOfRange(u32, u32),
    #[error("validator {0} already signed")]
    AlreadyExists(u32),
    #[error("voting power overflow")]
    Overflow,
}

/// Signatures accumulated for one [RequestId].
///
/// `voting_power` is always the sum of the voting power of the validators in `signed`,
/// and each validator is counted at most once.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SignatureMap {
    request_id: RequestId,
    epoch: Epoch,
    signed: Bitmap,
    voting_power: VotingPower,
    total_validators: u32,
}

impl SignatureMap {
    pub fn new(request_id: RequestId, epoch: Epoch, total_validators: u32) -> Self {
        Self {
            request_id,
            epoch,
            signed: Bitmap::new(),
            voting_power: 0,
            total_validators,
        }
    }

    /// Records that validator `index` signed, adding `voting_power` to the total.
    ///
    /// A validator that already signed is rejected with [Error::AlreadyExists] and leaves
    /// the map unchanged.
    pub fn set_validator_present(
        &mut self,
        index: u32,
        voting_power: VotingPower,
    ) -> Result<(), Error> {
        if index >= self.total_validators {
            return Err(Error::IndexOutOfRange(index, self.total_validators));
        }
        if self.signed.contains(index) {
            return Err(Error::AlreadyExists(index));
        }
        let total = self
            .voting_power
            .checked_add(voting_power)
            .ok_or(Error::Overflow)?;
        self.signed.add(index);
        self.voting_power = total;
        Ok(())
    }

    pub fn threshold_reached(&self, quorum_threshold: VotingPower) -> bool {
        self.voting_power >= quorum_threshold
    }

    /// Validators in `[0, total_validators)` that have not signed.
    pub fn missing_validators(&self) -> Bitmap {
        self.signed.complement(self.total_validators)
    }

    pub fn signed(&self) -> &Bitmap {
        &self.signed
    }

    pub fn voting_power(&self) -> VotingPower {
        self.voting_power
    }

    pub fn total_validators(&self) -> u32 {
        self.total_validators
    }

    pub fn request_id(&self) -> RequestId {
        self.request_id
    }

    pub fn epoch(&self) -> Epoch {
        self.epoch
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::{rngs::StdRng, Rng, SeedableRng};
    use relay_cryptography::{KeyTag, KeyType};

    fn map(total: u32) -> SignatureMap {
        let tag = KeyTag::new(KeyType::BlsBn254, 1).unwrap();
        SignatureMap::new(RequestId::new(tag, 1, &[0; 32]), 1, total)
    }

    #[test]
    fn test_quorum_scenario() {
        // Powers {101, 201, 301} with a threshold of 400.
        let mut map = map(3);
        map.set_validator_present(2, 301).unwrap();
        assert!(!map.threshold_reached(400));
        map.set_validator_present(1, 201).unwrap();
        assert!(map.threshold_reached(400));
        assert_eq!(map.voting_power(), 502);
        assert_eq!(map.missing_validators().iter().collect::<Vec<_>>(), vec![0]);
    }

    #[test]
    fn test_duplicate_rejected_without_change() {
        let mut map = map(3);
        map.set_validator_present(0, 10).unwrap();
        let before = map.clone();
        assert_eq!(map.set_validator_present(0, 10), Err(Error::AlreadyExists(0)));
        assert_eq!(map, before);
    }

    #[test]
    fn test_out_of_range() {
        let mut map = map(3);
        assert_eq!(
            map.set_validator_present(3, 10),
            Err(Error::IndexOutOfRange(3, 3))
        );
        assert!(map.signed().is_empty());
    }

    #[test]
    fn test_overflow_leaves_map_unchanged() {
        let mut map = map(2);
        map.set_validator_present(0, VotingPower::MAX).unwrap();
        assert_eq!(map.set_validator_present(1, 1), Err(Error::Overflow));
        assert!(!map.signed().contains(1));
        assert_eq!(map.voting_power(), VotingPower::MAX);
    }

    #[test]
    fn test_power_matches_signers() {
        let mut rng = StdRng::seed_from_u64(0);
        let powers: Vec<VotingPower> = (0..64).map(|_| rng.gen_range(1..1_000)).collect();
        let mut map = map(powers.len() as u32);
        let mut reached = false;
        for _ in 0..200 {
            let index = rng.gen_range(0..powers.len() as u32);
            let _ = map.set_validator_present(index, powers[index as usize]);

            let expected: VotingPower = map.signed().iter().map(|i| powers[i as usize]).sum();
            assert_eq!(map.voting_power(), expected);

            // Once reached, the threshold stays reached.
            let now = map.threshold_reached(10_000);
            assert!(!reached || now);
            reached = now;
        }
        assert_eq!(
            map.signed().cardinality() + map.missing_validators().cardinality(),
            powers.len() as u64
        );
    }
}
