use std::fmt;
use std::str::FromStr;

use crate::serialize::{take, Decode, DecodeError, Encode};
use bytes::{BufMut, BytesMut};

/// The 256-bit hash.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct H256(pub [u8; 32]);

impl H256 {
    pub const fn zero() -> Self {
        H256([0u8; 32])
    }

    pub fn is_zero(&self) -> bool {
        self.0.iter().all(|b| *b == 0)
    }

    /// Hash with `value` in its trailing 8 bytes; handy for fixtures.
    pub fn from_u64(value: u64) -> Self {
        let mut inner = [0u8; 32];
        inner[24..].copy_from_slice(&value.to_be_bytes());
        H256(inner)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn from_slice(slice: &[u8]) -> Option<Self> {
        if slice.len() != 32 {
            return None;
        }
        let mut inner = [0u8; 32];
        inner.copy_from_slice(slice);
        Some(H256(inner))
    }
}

impl fmt::Display for H256 {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let mut hex = [0u8; 64];
        faster_hex::hex_encode(&self.0, &mut hex).map_err(|_| fmt::Error)?;
        f.write_str(unsafe { std::str::from_utf8_unchecked(&hex) })
    }
}

impl fmt::Debug for H256 {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "H256(0x{self})")
    }
}

impl FromStr for H256 {
    type Err = faster_hex::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.strip_prefix("0x").unwrap_or(s);
        let mut inner = [0u8; 32];
        faster_hex::hex_decode(s.as_bytes(), &mut inner)?;
        Ok(H256(inner))
    }
}

impl From<[u8; 32]> for H256 {
    fn from(inner: [u8; 32]) -> Self {
        H256(inner)
    }
}

impl Encode for H256 {
    fn encode(&self, buf: &mut BytesMut) {
        buf.put_slice(&self.0);
    }

    fn encoded_size(&self) -> usize {
        32
    }
}

impl Decode for H256 {
    fn decode(buf: &mut &[u8]) -> Result<Self, DecodeError> {
        let bytes = take(buf, 32)?;
        Ok(H256::from_slice(bytes).expect("slice length checked"))
    }
}
