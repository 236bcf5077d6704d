use crate::serialize::{Decode, DecodeError, Encode};
use crate::H256;
use bytes::BytesMut;
use std::fmt;

/// Hard cap on the inv vector a single wire message may carry.
pub const MAX_INV_COUNT_WIRE: usize = 1024 * 8;
/// Lower bound used as the default per-round tx-inv quota.
pub const MIN_INV_COUNT_WIRE: usize = 1024;

/// What an [`Inv`] announces.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
#[repr(u32)]
pub enum InvKind {
    Error = 0,
    Tx = 1,
    Block = 2,
}

impl InvKind {
    pub fn from_u32(raw: u32) -> Option<Self> {
        match raw {
            0 => Some(InvKind::Error),
            1 => Some(InvKind::Tx),
            2 => Some(InvKind::Block),
            _ => None,
        }
    }
}

/// A typed hash announcement: peers offer content by inv and fetch it back
/// by inv. Ordered by `(kind, hash)`.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Inv {
    pub kind: InvKind,
    pub hash: H256,
}

impl Inv {
    pub fn new(kind: InvKind, hash: H256) -> Self {
        Inv { kind, hash }
    }

    pub fn tx(hash: H256) -> Self {
        Inv::new(InvKind::Tx, hash)
    }

    pub fn block(hash: H256) -> Self {
        Inv::new(InvKind::Block, hash)
    }
}

impl fmt::Display for Inv {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "[{}] {}", self.kind as u32, self.hash)
    }
}

impl fmt::Debug for Inv {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "Inv({self})")
    }
}

impl Encode for Inv {
    fn encode(&self, buf: &mut BytesMut) {
        (self.kind as u32).encode(buf);
        self.hash.encode(buf);
    }

    fn encoded_size(&self) -> usize {
        4 + 32
    }
}

impl Decode for Inv {
    fn decode(buf: &mut &[u8]) -> Result<Self, DecodeError> {
        let kind = InvKind::from_u32(u32::decode(buf)?).ok_or(DecodeError::BadValue("inv kind"))?;
        let hash = H256::decode(buf)?;
        Ok(Inv { kind, hash })
    }
}
