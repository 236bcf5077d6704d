//! The length-prefixed binary codec.
//!
//! Integers are little-endian; vectors and strings carry a `u32` element
//! count. Decoding never reads past the input and never allocates more than
//! the input could possibly describe.

use bytes::{BufMut, BytesMut};
use thiserror::Error;

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecodeError {
    #[error("unexpected end of input")]
    UnexpectedEof,
    #[error("length prefix exceeds remaining input")]
    BadLength,
    #[error("invalid value for {0}")]
    BadValue(&'static str),
}

/// Serializes a value into the shared binary form.
pub trait Encode {
    fn encode(&self, buf: &mut BytesMut);

    fn encoded_size(&self) -> usize {
        let mut buf = BytesMut::new();
        self.encode(&mut buf);
        buf.len()
    }

    fn encode_to_vec(&self) -> Vec<u8> {
        let mut buf = BytesMut::new();
        self.encode(&mut buf);
        buf.to_vec()
    }
}

/// Deserializes a value, consuming exactly the bytes it owns.
pub trait Decode: Sized {
    fn decode(buf: &mut &[u8]) -> Result<Self, DecodeError>;

    /// Decodes from a slice that must be fully consumed.
    fn decode_all(mut buf: &[u8]) -> Result<Self, DecodeError> {
        let value = Self::decode(&mut buf)?;
        if buf.is_empty() {
            Ok(value)
        } else {
            Err(DecodeError::BadLength)
        }
    }
}

/// Splits `n` bytes off the front of `buf`.
pub fn take<'a>(buf: &mut &'a [u8], n: usize) -> Result<&'a [u8], DecodeError> {
    if buf.len() < n {
        return Err(DecodeError::UnexpectedEof);
    }
    let (head, tail) = buf.split_at(n);
    *buf = tail;
    Ok(head)
}

macro_rules! impl_int {
    ($t:ty, $put:ident, $n:expr) => {
        impl Encode for $t {
            fn encode(&self, buf: &mut BytesMut) {
                buf.$put(*self);
            }

            fn encoded_size(&self) -> usize {
                $n
            }
        }

        impl Decode for $t {
            fn decode(buf: &mut &[u8]) -> Result<Self, DecodeError> {
                let bytes = take(buf, $n)?;
                let mut raw = [0u8; $n];
                raw.copy_from_slice(bytes);
                Ok(<$t>::from_le_bytes(raw))
            }
        }
    };
}

impl_int!(u8, put_u8, 1);
impl_int!(u16, put_u16_le, 2);
impl_int!(u32, put_u32_le, 4);
impl_int!(u64, put_u64_le, 8);
impl_int!(i32, put_i32_le, 4);
impl_int!(i64, put_i64_le, 8);

impl Encode for Vec<u8> {
    fn encode(&self, buf: &mut BytesMut) {
        (self.len() as u32).encode(buf);
        buf.put_slice(self);
    }

    fn encoded_size(&self) -> usize {
        4 + self.len()
    }
}

impl Decode for Vec<u8> {
    fn decode(buf: &mut &[u8]) -> Result<Self, DecodeError> {
        let len = u32::decode(buf)? as usize;
        if len > buf.len() {
            return Err(DecodeError::BadLength);
        }
        Ok(take(buf, len)?.to_vec())
    }
}

impl Encode for String {
    fn encode(&self, buf: &mut BytesMut) {
        (self.len() as u32).encode(buf);
        buf.put_slice(self.as_bytes());
    }

    fn encoded_size(&self) -> usize {
        4 + self.len()
    }
}

impl Decode for String {
    fn decode(buf: &mut &[u8]) -> Result<Self, DecodeError> {
        let len = u32::decode(buf)? as usize;
        if len > buf.len() {
            return Err(DecodeError::BadLength);
        }
        let bytes = take(buf, len)?;
        String::from_utf8(bytes.to_vec()).map_err(|_| DecodeError::BadValue("utf8 string"))
    }
}

// Vec<u8> is specialized above; a blanket impl would conflict, so the
// generic vector codec lives behind explicit helpers.
pub fn encode_vec<T: Encode>(items: &[T], buf: &mut BytesMut) {
    (items.len() as u32).encode(buf);
    for item in items {
        item.encode(buf);
    }
}

pub fn decode_vec<T: Decode>(buf: &mut &[u8]) -> Result<Vec<T>, DecodeError> {
    let len = u32::decode(buf)? as usize;
    if len > buf.len() {
        // every element costs at least one byte
        return Err(DecodeError::BadLength);
    }
    let mut items = Vec::with_capacity(len);
    for _ in 0..len {
        items.push(T::decode(buf)?);
    }
    Ok(items)
}

pub fn encoded_vec_size<T: Encode>(items: &[T]) -> usize {
    4 + items.iter().map(Encode::encoded_size).sum::<usize>()
}
