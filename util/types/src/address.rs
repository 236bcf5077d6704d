//! Destinations and their address string form.
//!
//! An address is `prefix || base32(payload)` where the prefix character
//! selects the destination class and the base32 tail embeds a CRC-24Q
//! checksum (56 characters for the 32-byte payload).

use std::fmt;
use std::str::FromStr;

use crate::serialize::{Decode, DecodeError, Encode};
use crate::H256;
use bytes::BytesMut;
use forknet_hash::{base32_decode, base32_encode};
use thiserror::Error;

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddressError {
    #[error("empty address")]
    Empty,
    #[error("unknown address prefix")]
    BadPrefix,
    #[error("invalid base32 payload")]
    BadPayload,
}

/// Who an output pays.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Debug)]
pub struct Destination {
    pub prefix: u8,
    pub data: H256,
}

impl Destination {
    pub const PREFIX_NULL: u8 = 0;
    pub const PREFIX_PUBKEY: u8 = 1;
    pub const PREFIX_TEMPLATE: u8 = 2;
    pub const PREFIX_MAX: u8 = 3;

    pub fn new_pubkey(data: H256) -> Self {
        Destination {
            prefix: Self::PREFIX_PUBKEY,
            data,
        }
    }

    pub fn new_template(data: H256) -> Self {
        Destination {
            prefix: Self::PREFIX_TEMPLATE,
            data,
        }
    }

    pub fn is_null(&self) -> bool {
        self.prefix == Self::PREFIX_NULL && self.data.is_zero()
    }
}

impl fmt::Display for Destination {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "{}{}",
            char::from(b'0' + self.prefix),
            base32_encode(self.data.as_bytes())
        )
    }
}

impl FromStr for Destination {
    type Err = AddressError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut chars = s.bytes();
        let prefix_char = chars.next().ok_or(AddressError::Empty)?;
        if !(b'0'..b'0' + Destination::PREFIX_MAX).contains(&prefix_char) {
            return Err(AddressError::BadPrefix);
        }
        let payload = base32_decode(&s[1..]).ok_or(AddressError::BadPayload)?;
        Ok(Destination {
            prefix: prefix_char - b'0',
            data: H256(payload),
        })
    }
}

impl Encode for Destination {
    fn encode(&self, buf: &mut BytesMut) {
        self.prefix.encode(buf);
        self.data.encode(buf);
    }

    fn encoded_size(&self) -> usize {
        1 + 32
    }
}

impl Decode for Destination {
    fn decode(buf: &mut &[u8]) -> Result<Self, DecodeError> {
        let prefix = u8::decode(buf)?;
        if prefix >= Destination::PREFIX_MAX {
            return Err(DecodeError::BadValue("destination prefix"));
        }
        let data = H256::decode(buf)?;
        Ok(Destination { prefix, data })
    }
}
