//! Compressed set of validator indices.
//!
//! The 32-bit index space is split into chunks of 2^16 values. Each non-empty chunk is stored
//! in a container chosen by density:
//!
//! - **Array containers** hold the sorted low 16 bits of each member (sparse chunks).
//! - **Bitmap containers** hold a fixed 8 KiB bit array (dense chunks).
//!
//! Containers are kept canonical (no empty containers, arrays below the density threshold,
//! bitmaps at or above it) so that two bitmaps with the same members are always equal and
//! serialize to the same bytes.
//!
//! # Example
//!
//! ```
//! use relay_utils::Bitmap;
//!
//! let mut signed = Bitmap::new();
//! signed.add(0);
//! signed.add(2);
//!
//! let missing = signed.complement(4);
//! assert_eq!(missing.iter().collect::<Vec<_>>(), vec![1, 3]);
//! ```

use crate::codec::{at_least, read_len, varint, EncodeSize, Error, Read, ReadExt, Write};
use bytes::{Buf, BufMut, Bytes};
use std::fmt;
use std::ops::Range;

/// At or above this cardinality a bitmap container is smaller than an array container.
const ARRAY_TO_BITMAP_THRESHOLD: usize = 4096;

/// Number of 64-bit words in a bitmap container (2^16 bits).
const BITMAP_WORDS: usize = 1024;

const CONTAINER_TYPE_ARRAY: u8 = 0;
const CONTAINER_TYPE_BITMAP: u8 = 1;

/// Maximum number of containers (the whole 32-bit index space).
pub const MAX_CONTAINERS: usize = 1 << 16;

#[derive(Clone, PartialEq, Eq, Hash)]
enum Container {
    Array(Vec<u16>),
    Bitmap(Box<[u64; BITMAP_WORDS]>),
}

impl Container {
    fn len(&self) -> usize {
        match self {
            Self::Array(values) => values.len(),
            Self::Bitmap(words) => words.iter().map(|w| w.count_ones() as usize).sum(),
        }
    }

    fn contains(&self, value: u16) -> bool {
        match self {
            Self::Array(values) => values.binary_search(&value).is_ok(),
            Self::Bitmap(words) => words[value as usize / 64] & (1u64 << (value % 64)) != 0,
        }
    }

    /// Inserts `value`, returning false if it was already present.
    fn insert(&mut self, value: u16) -> bool {
        match self {
            Self::Array(values) => match values.binary_search(&value) {
                Ok(_) => return false,
                Err(position) => values.insert(position, value),
            },
            Self::Bitmap(words) => {
                let word = &mut words[value as usize / 64];
                let mask = 1u64 << (value % 64);
                if *word & mask != 0 {
                    return false;
                }
                *word |= mask;
            }
        }
        self.normalize();
        true
    }

    fn to_words(&self) -> Box<[u64; BITMAP_WORDS]> {
        match self {
            Self::Array(values) => {
                let mut words = Box::new([0u64; BITMAP_WORDS]);
                for &value in values {
                    words[value as usize / 64] |= 1u64 << (value % 64);
                }
                words
            }
            Self::Bitmap(words) => words.clone(),
        }
    }

    /// Toggles every value in `[start, end]`.
    fn flip(&mut self, start: u16, end: u16) {
        let mut words = self.to_words();
        for value in start..=end {
            words[value as usize / 64] ^= 1u64 << (value % 64);
        }
        *self = Self::Bitmap(words);
        self.normalize();
    }

    /// Switches representation if the cardinality crossed the density threshold.
    fn normalize(&mut self) {
        let len = self.len();
        match self {
            Self::Array(values) if len >= ARRAY_TO_BITMAP_THRESHOLD => {
                let mut words = Box::new([0u64; BITMAP_WORDS]);
                for &value in values.iter() {
                    words[value as usize / 64] |= 1u64 << (value % 64);
                }
                *self = Self::Bitmap(words);
            }
            Self::Bitmap(_) if len < ARRAY_TO_BITMAP_THRESHOLD => {
                *self = Self::Array(self.iter().collect());
            }
            _ => {}
        }
    }

    fn iter(&self) -> Box<dyn Iterator<Item = u16> + '_> {
        match self {
            Self::Array(values) => Box::new(values.iter().copied()),
            Self::Bitmap(words) => Box::new(words.iter().enumerate().flat_map(|(index, &word)| {
                (0..64u16)
                    .filter(move |bit| word & (1u64 << bit) != 0)
                    .map(move |bit| index as u16 * 64 + bit)
            })),
        }
    }
}

/// A set of `u32` indices.
#[derive(Clone, Default, PartialEq, Eq, Hash)]
pub struct Bitmap {
    containers: Vec<(u16, Container)>,
}

impl Bitmap {
    /// Creates an empty bitmap.
    pub const fn new() -> Self {
        Self {
            containers: Vec::new(),
        }
    }

    const fn split(value: u32) -> (u16, u16) {
        ((value >> 16) as u16, value as u16)
    }

    fn find(&self, high: u16) -> Result<usize, usize> {
        self.containers.binary_search_by_key(&high, |(key, _)| *key)
    }

    /// Adds `index` to the set, returning false if it was already present.
    pub fn add(&mut self, index: u32) -> bool {
        let (high, low) = Self::split(index);
        match self.find(high) {
            Ok(position) => self.containers[position].1.insert(low),
            Err(position) => {
                self.containers
                    .insert(position, (high, Container::Array(vec![low])));
                true
            }
        }
    }

    /// Returns true if `index` is in the set.
    pub fn contains(&self, index: u32) -> bool {
        let (high, low) = Self::split(index);
        match self.find(high) {
            Ok(position) => self.containers[position].1.contains(low),
            Err(_) => false,
        }
    }

    /// Number of indices in the set.
    pub fn cardinality(&self) -> u64 {
        self.containers
            .iter()
            .map(|(_, container)| container.len() as u64)
            .sum()
    }

    /// Returns true if the set is empty.
    pub fn is_empty(&self) -> bool {
        self.containers.is_empty()
    }

    /// Toggles membership of every index in `range`.
    pub fn flip_range(&mut self, range: Range<u32>) {
        if range.is_empty() {
            return;
        }
        let last = range.end - 1;
        let (first_high, first_low) = Self::split(range.start);
        let (last_high, last_low) = Self::split(last);
        for high in first_high..=last_high {
            let start = if high == first_high { first_low } else { 0 };
            let end = if high == last_high { last_low } else { u16::MAX };
            match self.find(high) {
                Ok(position) => {
                    let container = &mut self.containers[position].1;
                    container.flip(start, end);
                    if container.len() == 0 {
                        self.containers.remove(position);
                    }
                }
                Err(position) => {
                    let mut container = Container::Array(Vec::new());
                    container.flip(start, end);
                    self.containers.insert(position, (high, container));
                }
            }
        }
    }

    /// Returns the indices in `[0, n)` that are not in the set.
    pub fn complement(&self, n: u32) -> Self {
        let mut missing = self.clone();
        missing.flip_range(0..n);

        // Members at or above `n` were untouched by the flip and must not leak through.
        missing.containers.retain_mut(|(high, container)| {
            let base = (*high as u32) << 16;
            if base >= n {
                return false;
            }
            if container.iter().any(|low| (base | low as u32) >= n) {
                let kept: Vec<u16> = container
                    .iter()
                    .filter(|&low| (base | low as u32) < n)
                    .collect();
                *container = Container::Array(kept);
                container.normalize();
            }
            container.len() > 0
        });
        missing
    }

    /// Iterates over the set in ascending order.
    pub fn iter(&self) -> impl Iterator<Item = u32> + '_ {
        self.containers.iter().flat_map(|(high, container)| {
            let base = (*high as u32) << 16;
            container.iter().map(move |low| base | low as u32)
        })
    }

    /// Serializes the bitmap.
    pub fn to_bytes(&self) -> Bytes {
        crate::codec::Encode::encode(self)
    }

    /// Deserializes a bitmap produced by [Bitmap::to_bytes].
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, Error> {
        crate::codec::Decode::decode_cfg(bytes, &MAX_CONTAINERS)
    }
}

impl FromIterator<u32> for Bitmap {
    fn from_iter<I: IntoIterator<Item = u32>>(iter: I) -> Self {
        let mut bitmap = Self::new();
        for index in iter {
            bitmap.add(index);
        }
        bitmap
    }
}

impl fmt::Debug for Bitmap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.iter()).finish()
    }
}

impl Write for Container {
    fn write(&self, buf: &mut impl BufMut) {
        match self {
            Self::Array(values) => {
                CONTAINER_TYPE_ARRAY.write(buf);
                varint::write(values.len() as u64, buf);
                for value in values {
                    value.write(buf);
                }
            }
            Self::Bitmap(words) => {
                CONTAINER_TYPE_BITMAP.write(buf);
                for word in words.iter() {
                    word.write(buf);
                }
            }
        }
    }
}

impl EncodeSize for Container {
    fn encode_size(&self) -> usize {
        match self {
            Self::Array(values) => 1 + varint::size(values.len() as u64) + values.len() * 2,
            Self::Bitmap(_) => 1 + BITMAP_WORDS * 8,
        }
    }
}

impl Read for Container {
    type Cfg = ();

    fn read_cfg(buf: &mut impl Buf, _: &()) -> Result<Self, Error> {
        let container = match u8::read(buf)? {
            CONTAINER_TYPE_ARRAY => {
                let len = read_len(buf, ARRAY_TO_BITMAP_THRESHOLD - 1)?;
                at_least(buf, len * 2)?;
                let mut values = Vec::with_capacity(len);
                for _ in 0..len {
                    let value = u16::read(buf)?;
                    if values.last().is_some_and(|last| *last >= value) {
                        return Err(Error::Invalid("Bitmap", "array values not ascending"));
                    }
                    values.push(value);
                }
                Self::Array(values)
            }
            CONTAINER_TYPE_BITMAP => {
                at_least(buf, BITMAP_WORDS * 8)?;
                let mut words = Box::new([0u64; BITMAP_WORDS]);
                for word in words.iter_mut() {
                    *word = u64::read(buf)?;
                }
                let container = Self::Bitmap(words);
                if container.len() < ARRAY_TO_BITMAP_THRESHOLD {
                    return Err(Error::Invalid("Bitmap", "sparse bitmap container"));
                }
                container
            }
            _ => return Err(Error::Invalid("Bitmap", "unknown container type")),
        };
        if container.len() == 0 {
            return Err(Error::Invalid("Bitmap", "empty container"));
        }
        Ok(container)
    }
}

impl Write for Bitmap {
    fn write(&self, buf: &mut impl BufMut) {
        varint::write(self.containers.len() as u64, buf);
        for (high, container) in &self.containers {
            high.write(buf);
            container.write(buf);
        }
    }
}

impl EncodeSize for Bitmap {
    fn encode_size(&self) -> usize {
        varint::size(self.containers.len() as u64)
            + self
                .containers
                .iter()
                .map(|(_, container)| 2 + container.encode_size())
                .sum::<usize>()
    }
}

/// `Cfg` is the maximum number of containers accepted.
impl Read for Bitmap {
    type Cfg = usize;

    fn read_cfg(buf: &mut impl Buf, max_containers: &usize) -> Result<Self, Error> {
        let count = read_len(buf, (*max_containers).min(MAX_CONTAINERS))?;
        let mut containers: Vec<(u16, Container)> = Vec::with_capacity(count.min(buf.remaining()));
        for _ in 0..count {
            let high = u16::read(buf)?;
            if containers.last().is_some_and(|(last, _)| *last >= high) {
                return Err(Error::Invalid("Bitmap", "container keys not ascending"));
            }
            containers.push((high, Container::read(buf)?));
        }
        Ok(Self { containers })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{Decode, Encode};
    use rand::{rngs::StdRng, Rng, SeedableRng};
    use test_case::test_case;

    #[test]
    fn test_add_contains_cardinality() {
        let mut bitmap = Bitmap::new();
        assert!(bitmap.is_empty());
        assert!(bitmap.add(5));
        assert!(bitmap.add(70_000));
        assert!(!bitmap.add(5));
        assert!(bitmap.contains(5));
        assert!(bitmap.contains(70_000));
        assert!(!bitmap.contains(6));
        assert_eq!(bitmap.cardinality(), 2);
        assert_eq!(bitmap.iter().collect::<Vec<_>>(), vec![5, 70_000]);
    }

    #[test]
    fn test_clone_is_independent() {
        let mut original = Bitmap::from_iter([1, 2, 3]);
        let copy = original.clone();
        original.add(4);
        assert_eq!(copy.cardinality(), 3);
        assert_eq!(original.cardinality(), 4);
    }

    #[test]
    fn test_dense_container_conversion() {
        let mut bitmap = Bitmap::new();
        for index in 0..ARRAY_TO_BITMAP_THRESHOLD as u32 {
            bitmap.add(index * 2);
        }
        assert!(matches!(bitmap.containers[0].1, Container::Bitmap(_)));
        assert_eq!(bitmap.cardinality(), ARRAY_TO_BITMAP_THRESHOLD as u64);
        for index in 0..ARRAY_TO_BITMAP_THRESHOLD as u32 {
            assert!(bitmap.contains(index * 2));
            assert!(!bitmap.contains(index * 2 + 1));
        }
    }

    #[test_case(0, &[]; "empty range")]
    #[test_case(5, &[0, 2, 4]; "partial")]
    #[test_case(3, &[0, 2]; "members beyond range")]
    fn test_complement(n: u32, expected: &[u32]) {
        let bitmap = Bitmap::from_iter([1, 3]);
        let missing = bitmap.complement(n);
        assert_eq!(missing.iter().collect::<Vec<_>>(), expected);
    }

    #[test]
    fn test_complement_full_and_empty() {
        let n = 100_000;
        let empty = Bitmap::new();
        let full = empty.complement(n);
        assert_eq!(full.cardinality(), n as u64);
        assert!(full.complement(n).is_empty());
        assert_eq!(full, Bitmap::from_iter(0..n));
    }

    #[test]
    fn test_flip_range_twice_restores() {
        let mut bitmap = Bitmap::from_iter([3, 65_535, 65_536, 200_000]);
        let original = bitmap.clone();
        bitmap.flip_range(2..70_000);
        assert!(!bitmap.contains(3));
        assert!(bitmap.contains(2));
        assert!(!bitmap.contains(65_536));
        assert!(bitmap.contains(200_000));
        bitmap.flip_range(2..70_000);
        assert_eq!(bitmap, original);
    }

    #[test]
    fn test_round_trip_empty_sparse_and_full() {
        let mut rng = StdRng::seed_from_u64(0);
        let sparse: Bitmap = (0..500).map(|_| rng.gen_range(0..1_000_000)).collect();
        let full = Bitmap::new().complement(70_000);
        for bitmap in [Bitmap::new(), sparse, full] {
            let decoded = Bitmap::from_bytes(&bitmap.to_bytes()).unwrap();
            assert_eq!(decoded, bitmap);
            assert_eq!(bitmap.encode().len(), bitmap.encode_size());
        }
    }

    #[test]
    fn test_decode_rejects_unsorted_containers() {
        let mut buf = Vec::new();
        varint::write(2, &mut buf);
        for high in [1u16, 0] {
            high.write(&mut buf);
            Container::Array(vec![1]).write(&mut buf);
        }
        assert!(matches!(
            Bitmap::from_bytes(&buf),
            Err(Error::Invalid("Bitmap", _))
        ));
    }

    #[test]
    fn test_decode_rejects_empty_container() {
        let mut buf = Vec::new();
        varint::write(1, &mut buf);
        0u16.write(&mut buf);
        Container::Array(vec![]).write(&mut buf);
        assert!(matches!(
            Bitmap::from_bytes(&buf),
            Err(Error::Invalid("Bitmap", "empty container"))
        ));
    }

    #[test]
    fn test_decode_respects_container_limit() {
        let bitmap = Bitmap::from_iter([0, 1 << 16, 2 << 16]);
        assert_eq!(
            Bitmap::decode_cfg(bitmap.encode(), &2),
            Err(Error::LengthExceeded(3, 2))
        );
    }
}
