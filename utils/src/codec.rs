//! Serialize structured data into compact binary encodings.
//!
//! Every variable-length value is prefixed with a varint length that is checked against a
//! caller-supplied maximum before any allocation occurs, so decoding untrusted input never
//! allocates more than the configured bounds allow.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use thiserror::Error;

/// Errors that can occur when decoding.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    #[error("unexpected end of buffer")]
    EndOfBuffer,
    #[error("extra data found: {0} bytes")]
    ExtraData(usize),
    #[error("length exceeded: {0} > {1}")]
    LengthExceeded(usize, usize),
    #[error("invalid varint")]
    InvalidVarint,
    #[error("invalid bool")]
    InvalidBool,
    #[error("invalid {0}: {1}")]
    Invalid(&'static str, &'static str),
}

/// Types that can be written to a buffer.
pub trait Write {
    /// Encodes this value by writing to a buffer.
    fn write(&self, buf: &mut impl BufMut);
}

/// Types that know their exact encoded length.
pub trait EncodeSize {
    /// Returns the number of bytes [Write::write] will produce.
    fn encode_size(&self) -> usize;
}

/// Types that can be read from a buffer.
///
/// `Cfg` bounds the decoding of untrusted data (for example, the maximum length of a byte
/// field). Use `()` for types that need no configuration.
pub trait Read: Sized {
    type Cfg: Clone + Send + Sync + 'static;

    /// Reads a value from the buffer, consuming exactly the bytes it needs.
    fn read_cfg(buf: &mut impl Buf, cfg: &Self::Cfg) -> Result<Self, Error>;
}

/// Types that can be encoded into a standalone buffer.
pub trait Encode: Write + EncodeSize {
    fn encode(&self) -> Bytes {
        let len = self.encode_size();
        let mut buffer = BytesMut::with_capacity(len);
        self.write(&mut buffer);
        debug_assert_eq!(buffer.len(), len, "write() did not write expected bytes");
        buffer.freeze()
    }
}

impl<T: Write + EncodeSize> Encode for T {}

/// Types that can be decoded from a buffer that must be fully consumed.
pub trait Decode: Read {
    fn decode_cfg(mut buf: impl Buf, cfg: &Self::Cfg) -> Result<Self, Error> {
        let result = Self::read_cfg(&mut buf, cfg)?;
        let remaining = buf.remaining();
        if remaining > 0 {
            return Err(Error::ExtraData(remaining));
        }
        Ok(result)
    }
}

impl<T: Read> Decode for T {}

/// Ergonomic read for types without configuration.
pub trait ReadExt: Read<Cfg = ()> {
    fn read(buf: &mut impl Buf) -> Result<Self, Error> {
        Self::read_cfg(buf, &())
    }
}

impl<T: Read<Cfg = ()>> ReadExt for T {}

/// Ergonomic decode for types without configuration.
pub trait DecodeExt: Read<Cfg = ()> {
    fn decode(buf: impl Buf) -> Result<Self, Error> {
        Self::decode_cfg(buf, &())
    }
}

impl<T: Read<Cfg = ()>> DecodeExt for T {}

/// Returns an error if the buffer holds fewer than `len` bytes.
#[inline]
pub fn at_least(buf: &impl Buf, len: usize) -> Result<(), Error> {
    if buf.remaining() < len {
        return Err(Error::EndOfBuffer);
    }
    Ok(())
}

/// Reads a varint length prefix and checks it against `max`.
#[inline]
pub fn read_len(buf: &mut impl Buf, max: usize) -> Result<usize, Error> {
    let len = usize::try_from(varint::read(buf)?).map_err(|_| Error::InvalidVarint)?;
    if len > max {
        return Err(Error::LengthExceeded(len, max));
    }
    Ok(len)
}

/// LEB128 encoding of unsigned integers.
pub mod varint {
    use super::Error;
    use bytes::{Buf, BufMut};

    const DATA_BITS: u32 = 7;
    const DATA_MASK: u8 = 0x7f;
    const CONTINUATION: u8 = 0x80;
    const MAX_BYTES: usize = 10;

    /// Writes `value` as a varint.
    pub fn write(mut value: u64, buf: &mut impl BufMut) {
        while value >= CONTINUATION as u64 {
            buf.put_u8((value as u8 & DATA_MASK) | CONTINUATION);
            value >>= DATA_BITS;
        }
        buf.put_u8(value as u8);
    }

    /// Returns the number of bytes `value` occupies as a varint.
    pub fn size(value: u64) -> usize {
        let bits = 64 - value.leading_zeros() as usize;
        bits.max(1).div_ceil(DATA_BITS as usize)
    }

    /// Reads a canonically encoded varint.
    pub fn read(buf: &mut impl Buf) -> Result<u64, Error> {
        let mut value = 0u64;
        for index in 0..MAX_BYTES {
            if !buf.has_remaining() {
                return Err(Error::EndOfBuffer);
            }
            let byte = buf.get_u8();
            let shift = index as u32 * DATA_BITS;

            // The tenth byte may only carry the final bit of a u64.
            if index == MAX_BYTES - 1 && byte > 1 {
                return Err(Error::InvalidVarint);
            }
            value |= ((byte & DATA_MASK) as u64) << shift;
            if byte & CONTINUATION == 0 {
                // Reject trailing zero bytes (non-canonical encodings).
                if byte == 0 && index > 0 {
                    return Err(Error::InvalidVarint);
                }
                return Ok(value);
            }
        }
        Err(Error::InvalidVarint)
    }
}

macro_rules! impl_primitive {
    ($type:ty, $put:ident, $get:ident) => {
        impl Write for $type {
            #[inline]
            fn write(&self, buf: &mut impl BufMut) {
                buf.$put(*self);
            }
        }

        impl EncodeSize for $type {
            #[inline]
            fn encode_size(&self) -> usize {
                std::mem::size_of::<$type>()
            }
        }

        impl Read for $type {
            type Cfg = ();

            #[inline]
            fn read_cfg(buf: &mut impl Buf, _: &()) -> Result<Self, Error> {
                at_least(buf, std::mem::size_of::<$type>())?;
                Ok(buf.$get())
            }
        }
    };
}

impl_primitive!(u8, put_u8, get_u8);
impl_primitive!(u16, put_u16, get_u16);
impl_primitive!(u32, put_u32, get_u32);
impl_primitive!(u64, put_u64, get_u64);
impl_primitive!(u128, put_u128, get_u128);

impl Write for bool {
    #[inline]
    fn write(&self, buf: &mut impl BufMut) {
        buf.put_u8(u8::from(*self));
    }
}

impl EncodeSize for bool {
    #[inline]
    fn encode_size(&self) -> usize {
        1
    }
}

impl Read for bool {
    type Cfg = ();

    #[inline]
    fn read_cfg(buf: &mut impl Buf, _: &()) -> Result<Self, Error> {
        match u8::read(buf)? {
            0 => Ok(false),
            1 => Ok(true),
            _ => Err(Error::InvalidBool),
        }
    }
}

impl<const N: usize> Write for [u8; N] {
    #[inline]
    fn write(&self, buf: &mut impl BufMut) {
        buf.put_slice(self);
    }
}

impl<const N: usize> EncodeSize for [u8; N] {
    #[inline]
    fn encode_size(&self) -> usize {
        N
    }
}

impl<const N: usize> Read for [u8; N] {
    type Cfg = ();

    #[inline]
    fn read_cfg(buf: &mut impl Buf, _: &()) -> Result<Self, Error> {
        at_least(buf, N)?;
        let mut out = [0u8; N];
        buf.copy_to_slice(&mut out);
        Ok(out)
    }
}

impl Write for Bytes {
    #[inline]
    fn write(&self, buf: &mut impl BufMut) {
        varint::write(self.len() as u64, buf);
        buf.put_slice(self);
    }
}

impl EncodeSize for Bytes {
    #[inline]
    fn encode_size(&self) -> usize {
        varint::size(self.len() as u64) + self.len()
    }
}

/// `Cfg` is the maximum number of bytes accepted.
impl Read for Bytes {
    type Cfg = usize;

    #[inline]
    fn read_cfg(buf: &mut impl Buf, max: &usize) -> Result<Self, Error> {
        let len = read_len(buf, *max)?;
        at_least(buf, len)?;
        Ok(buf.copy_to_bytes(len))
    }
}

impl<T: Write> Write for Vec<T> {
    #[inline]
    fn write(&self, buf: &mut impl BufMut) {
        varint::write(self.len() as u64, buf);
        for item in self {
            item.write(buf);
        }
    }
}

impl<T: EncodeSize> EncodeSize for Vec<T> {
    #[inline]
    fn encode_size(&self) -> usize {
        varint::size(self.len() as u64) + self.iter().map(EncodeSize::encode_size).sum::<usize>()
    }
}

/// `Cfg` is the maximum number of items and the configuration of each item.
impl<T: Read> Read for Vec<T> {
    type Cfg = (usize, T::Cfg);

    fn read_cfg(buf: &mut impl Buf, (max, cfg): &Self::Cfg) -> Result<Self, Error> {
        let len = read_len(buf, *max)?;

        // Every item occupies at least one byte, so never reserve more than remains.
        let mut items = Vec::with_capacity(len.min(buf.remaining()));
        for _ in 0..len {
            items.push(T::read_cfg(buf, cfg)?);
        }
        Ok(items)
    }
}

impl<A: Write, B: Write> Write for (A, B) {
    #[inline]
    fn write(&self, buf: &mut impl BufMut) {
        self.0.write(buf);
        self.1.write(buf);
    }
}

impl<A: EncodeSize, B: EncodeSize> EncodeSize for (A, B) {
    #[inline]
    fn encode_size(&self) -> usize {
        self.0.encode_size() + self.1.encode_size()
    }
}

impl<A: Read, B: Read> Read for (A, B) {
    type Cfg = (A::Cfg, B::Cfg);

    #[inline]
    fn read_cfg(buf: &mut impl Buf, (a, b): &Self::Cfg) -> Result<Self, Error> {
        Ok((A::read_cfg(buf, a)?, B::read_cfg(buf, b)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test_case(0, 1; "zero")]
    #[test_case(127, 1; "one byte max")]
    #[test_case(128, 2; "two bytes min")]
    #[test_case(16_383, 2; "two bytes max")]
    #[test_case(u32::MAX as u64, 5; "u32 max")]
    #[test_case(u64::MAX, 10; "u64 max")]
    fn test_varint(value: u64, size: usize) {
        let mut buf = BytesMut::new();
        varint::write(value, &mut buf);
        assert_eq!(buf.len(), size);
        assert_eq!(varint::size(value), size);
        let mut reader = buf.freeze();
        assert_eq!(varint::read(&mut reader).unwrap(), value);
        assert!(!reader.has_remaining());
    }

    #[test]
    fn test_varint_rejects_non_canonical() {
        let mut buf: &[u8] = &[0x80, 0x00];
        assert_eq!(varint::read(&mut buf), Err(Error::InvalidVarint));
    }

    #[test]
    fn test_varint_rejects_overflow() {
        let mut buf: &[u8] = &[0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0x02];
        assert_eq!(varint::read(&mut buf), Err(Error::InvalidVarint));
        let mut buf: &[u8] = &[0xff; 11];
        assert_eq!(varint::read(&mut buf), Err(Error::InvalidVarint));
    }

    #[test]
    fn test_varint_truncated() {
        let mut buf: &[u8] = &[0x80];
        assert_eq!(varint::read(&mut buf), Err(Error::EndOfBuffer));
    }

    #[test]
    fn test_bytes_limit_checked_before_read() {
        let value = Bytes::from(vec![7u8; 300]);
        let encoded = value.encode();
        assert_eq!(Bytes::decode_cfg(encoded.clone(), &300).unwrap(), value);

        // The length prefix alone is enough to reject the field.
        let prefix = encoded.slice(..varint::size(300));
        assert_eq!(
            Bytes::decode_cfg(prefix, &299),
            Err(Error::LengthExceeded(300, 299))
        );
    }

    #[test]
    fn test_extra_data() {
        let mut encoded = BytesMut::new();
        7u32.write(&mut encoded);
        encoded.put_u8(0);
        assert_eq!(u32::decode(encoded.freeze()), Err(Error::ExtraData(1)));
    }

    #[test]
    fn test_vec_limit() {
        let values: Vec<u16> = vec![1, 2, 3];
        let encoded = values.encode();
        assert_eq!(Vec::<u16>::decode_cfg(encoded.clone(), &(3, ())).unwrap(), values);
        assert_eq!(
            Vec::<u16>::decode_cfg(encoded, &(2, ())),
            Err(Error::LengthExceeded(3, 2))
        );
    }

    #[test]
    fn test_bool() {
        assert!(bool::decode(true.encode()).unwrap());
        assert!(!bool::decode(false.encode()).unwrap());
        assert_eq!(bool::decode(Bytes::from_static(&[2])), Err(Error::InvalidBool));
    }

    #[test]
    fn test_tuple_and_array() {
        let value: ([u8; 4], u64) = ([1, 2, 3, 4], 99);
        let encoded = value.encode();
        assert_eq!(encoded.len(), 12);
        assert_eq!(<([u8; 4], u64)>::decode_cfg(encoded, &((), ())).unwrap(), value);
    }
}
