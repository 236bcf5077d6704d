use bitflags::bitflags;
use bytes::{BufMut, BytesMut};
use forknet_types::serialize::{decode_vec, encode_vec, take};
use forknet_types::{
    Block, BlockLocator, Decode, DecodeError, Encode, Inv, Transaction, H256, MAX_INV_COUNT_WIRE,
};
use std::fmt;
use std::net::{IpAddr, Ipv6Addr, SocketAddr};

use crate::header::{Channel, DataCommand, NetworkCommand};

/// Version of the protocol this crate speaks.
pub const PROTOCOL_VERSION: u32 = 1;

bitflags! {
    /// Services a peer announces in its `Hello`.
    #[derive(Clone, Copy, PartialEq, Eq, Debug, Default)]
    pub struct ServiceFlags: u64 {
        const NODE_NETWORK = 1;
        const NODE_DELEGATED = 1 << 1;
    }
}

/// A peer endpoint in its 18-byte wire form: IPv6-mapped address plus a
/// big-endian port.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, Default)]
pub struct Endpoint(pub [u8; 18]);

impl Endpoint {
    pub fn to_socket_addr(self) -> SocketAddr {
        let mut ip = [0u8; 16];
        ip.copy_from_slice(&self.0[..16]);
        let port = u16::from_be_bytes([self.0[16], self.0[17]]);
        let v6 = Ipv6Addr::from(ip);
        match v6.to_ipv4_mapped() {
            Some(v4) => SocketAddr::new(IpAddr::V4(v4), port),
            None => SocketAddr::new(IpAddr::V6(v6), port),
        }
    }
}

impl From<SocketAddr> for Endpoint {
    fn from(addr: SocketAddr) -> Self {
        let v6 = match addr.ip() {
            IpAddr::V4(v4) => v4.to_ipv6_mapped(),
            IpAddr::V6(v6) => v6,
        };
        let mut raw = [0u8; 18];
        raw[..16].copy_from_slice(&v6.octets());
        raw[16..].copy_from_slice(&addr.port().to_be_bytes());
        Endpoint(raw)
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.to_socket_addr())
    }
}

impl Encode for Endpoint {
    fn encode(&self, buf: &mut BytesMut) {
        buf.put_slice(&self.0);
    }

    fn encoded_size(&self) -> usize {
        18
    }
}

impl Decode for Endpoint {
    fn decode(buf: &mut &[u8]) -> Result<Self, DecodeError> {
        let bytes = take(buf, 18)?;
        let mut raw = [0u8; 18];
        raw.copy_from_slice(bytes);
        Ok(Endpoint(raw))
    }
}

/// Announced address of a peer.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Default)]
pub struct PeerAddress {
    pub service: ServiceFlags,
    pub endpoint: Endpoint,
}

impl PeerAddress {
    pub fn new(service: ServiceFlags, endpoint: Endpoint) -> Self {
        PeerAddress { service, endpoint }
    }
}

impl fmt::Display for PeerAddress {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.endpoint)
    }
}

impl Encode for PeerAddress {
    fn encode(&self, buf: &mut BytesMut) {
        self.service.bits().encode(buf);
        self.endpoint.encode(buf);
    }

    fn encoded_size(&self) -> usize {
        8 + 18
    }
}

impl Decode for PeerAddress {
    fn decode(buf: &mut &[u8]) -> Result<Self, DecodeError> {
        Ok(PeerAddress {
            service: ServiceFlags::from_bits_retain(u64::decode(buf)?),
            endpoint: Endpoint::decode(buf)?,
        })
    }
}

/// The handshake payload. A peer announcing a different genesis hash is
/// speaking a different network and is rejected; the time delta feeds the
/// per-peer clock-skew estimate.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct Hello {
    pub version: u32,
    pub service: ServiceFlags,
    pub timestamp: i64,
    pub nonce: u64,
    pub sub_version: String,
    pub starting_height: u32,
    pub genesis_hash: H256,
}

impl Hello {
    /// Offset of the peer clock relative to `local_now` (seconds).
    pub fn time_offset(&self, local_now: i64) -> i64 {
        self.timestamp - local_now
    }

    pub fn same_network(&self, genesis: &H256) -> bool {
        self.genesis_hash == *genesis
    }
}

impl Encode for Hello {
    fn encode(&self, buf: &mut BytesMut) {
        self.version.encode(buf);
        self.service.bits().encode(buf);
        self.timestamp.encode(buf);
        self.nonce.encode(buf);
        self.sub_version.encode(buf);
        self.starting_height.encode(buf);
        self.genesis_hash.encode(buf);
    }
}

impl Decode for Hello {
    fn decode(buf: &mut &[u8]) -> Result<Self, DecodeError> {
        Ok(Hello {
            version: u32::decode(buf)?,
            service: ServiceFlags::from_bits_retain(u64::decode(buf)?),
            timestamp: i64::decode(buf)?,
            nonce: u64::decode(buf)?,
            sub_version: String::decode(buf)?,
            starting_height: u32::decode(buf)?,
            genesis_hash: H256::decode(buf)?,
        })
    }
}

/// Sub-type discriminator of a [`MsgRsp`].
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
#[repr(u32)]
pub enum MsgRspSubType {
    Non = 0,
    TxInv = 1,
}

impl MsgRspSubType {
    pub fn from_u32(raw: u32) -> Option<Self> {
        match raw {
            0 => Some(MsgRspSubType::Non),
            1 => Some(MsgRspSubType::TxInv),
            _ => None,
        }
    }
}

/// Result code of a [`MsgRsp`].
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
#[repr(u64)]
pub enum MsgRspResult {
    GetBlocksOk = 0,
    GetBlocksEmpty = 1,
    GetBlocksEqual = 2,
    TxInvReceived = 3,
    TxInvComplete = 4,
}

impl MsgRspResult {
    pub fn from_u64(raw: u64) -> Option<Self> {
        match raw {
            0 => Some(MsgRspResult::GetBlocksOk),
            1 => Some(MsgRspResult::GetBlocksEmpty),
            2 => Some(MsgRspResult::GetBlocksEqual),
            3 => Some(MsgRspResult::TxInvReceived),
            4 => Some(MsgRspResult::TxInvComplete),
            _ => None,
        }
    }
}

/// Lightweight acknowledgement of an earlier request message.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct MsgRsp {
    pub req_msg_type: u32,
    pub req_msg_sub_type: u32,
    pub result: u64,
}

impl MsgRsp {
    pub fn new(command: DataCommand, sub_type: MsgRspSubType, result: MsgRspResult) -> Self {
        MsgRsp {
            req_msg_type: command as u32,
            req_msg_sub_type: sub_type as u32,
            result: result as u64,
        }
    }
}

impl Encode for MsgRsp {
    fn encode(&self, buf: &mut BytesMut) {
        self.req_msg_type.encode(buf);
        self.req_msg_sub_type.encode(buf);
        self.result.encode(buf);
    }

    fn encoded_size(&self) -> usize {
        4 + 4 + 8
    }
}

impl Decode for MsgRsp {
    fn decode(buf: &mut &[u8]) -> Result<Self, DecodeError> {
        Ok(MsgRsp {
            req_msg_type: u32::decode(buf)?,
            req_msg_sub_type: u32::decode(buf)?,
            result: u64::decode(buf)?,
        })
    }
}

/// Every message either side of a connection may send.
///
/// Data-channel payloads open with the 256-bit fork id the message refers
/// to; inv vectors are capped at [`MAX_INV_COUNT_WIRE`] at decode time.
#[derive(Clone, PartialEq, Debug)]
pub enum Message {
    Hello(Hello),
    HelloAck(Hello),
    GetAddress,
    Address(Vec<PeerAddress>),
    Ping,
    Pong,
    Subscribe { fork: H256, forks: Vec<H256> },
    Unsubscribe { fork: H256, forks: Vec<H256> },
    GetBlocks { fork: H256, locator: BlockLocator },
    GetData { fork: H256, invs: Vec<Inv> },
    Inv { fork: H256, invs: Vec<Inv> },
    Tx { fork: H256, tx: Transaction },
    Block { fork: H256, block: Block },
    GetFail { fork: H256, invs: Vec<Inv> },
    MsgRsp { fork: H256, rsp: MsgRsp },
}

impl Message {
    pub fn channel(&self) -> Channel {
        match self {
            Message::Hello(_)
            | Message::HelloAck(_)
            | Message::GetAddress
            | Message::Address(_)
            | Message::Ping
            | Message::Pong => Channel::Network,
            _ => Channel::Data,
        }
    }

    pub fn command(&self) -> u8 {
        match self {
            Message::Hello(_) => NetworkCommand::Hello as u8,
            Message::HelloAck(_) => NetworkCommand::HelloAck as u8,
            Message::GetAddress => NetworkCommand::GetAddress as u8,
            Message::Address(_) => NetworkCommand::Address as u8,
            Message::Ping => NetworkCommand::Ping as u8,
            Message::Pong => NetworkCommand::Pong as u8,
            Message::Subscribe { .. } => DataCommand::Subscribe as u8,
            Message::Unsubscribe { .. } => DataCommand::Unsubscribe as u8,
            Message::GetBlocks { .. } => DataCommand::GetBlocks as u8,
            Message::GetData { .. } => DataCommand::GetData as u8,
            Message::Inv { .. } => DataCommand::Inv as u8,
            Message::Tx { .. } => DataCommand::Tx as u8,
            Message::Block { .. } => DataCommand::Block as u8,
            Message::GetFail { .. } => DataCommand::GetFail as u8,
            Message::MsgRsp { .. } => DataCommand::MsgRsp as u8,
        }
    }

    pub fn encode_payload(&self, buf: &mut BytesMut) {
        match self {
            Message::Hello(hello) | Message::HelloAck(hello) => hello.encode(buf),
            Message::GetAddress | Message::Ping | Message::Pong => {}
            Message::Address(addresses) => encode_vec(addresses, buf),
            Message::Subscribe { fork, forks } | Message::Unsubscribe { fork, forks } => {
                fork.encode(buf);
                encode_vec(forks, buf);
            }
            Message::GetBlocks { fork, locator } => {
                fork.encode(buf);
                locator.encode(buf);
            }
            Message::GetData { fork, invs }
            | Message::Inv { fork, invs }
            | Message::GetFail { fork, invs } => {
                fork.encode(buf);
                encode_vec(invs, buf);
            }
            Message::Tx { fork, tx } => {
                fork.encode(buf);
                tx.encode(buf);
            }
            Message::Block { fork, block } => {
                fork.encode(buf);
                block.encode(buf);
            }
            Message::MsgRsp { fork, rsp } => {
                fork.encode(buf);
                rsp.encode(buf);
            }
        }
    }

    fn decode_invs(buf: &mut &[u8]) -> Result<Vec<Inv>, DecodeError> {
        let invs: Vec<Inv> = decode_vec(buf)?;
        if invs.len() > MAX_INV_COUNT_WIRE {
            return Err(DecodeError::BadValue("inv count overflow"));
        }
        Ok(invs)
    }

    pub fn decode_network(command: NetworkCommand, mut payload: &[u8]) -> Result<Self, DecodeError> {
        let buf = &mut payload;
        let message = match command {
            NetworkCommand::Hello => Message::Hello(Hello::decode(buf)?),
            NetworkCommand::HelloAck => Message::HelloAck(Hello::decode(buf)?),
            NetworkCommand::GetAddress => Message::GetAddress,
            NetworkCommand::Address => Message::Address(decode_vec(buf)?),
            NetworkCommand::Ping => Message::Ping,
            NetworkCommand::Pong => Message::Pong,
        };
        if buf.is_empty() {
            Ok(message)
        } else {
            Err(DecodeError::BadLength)
        }
    }

    pub fn decode_data(command: DataCommand, mut payload: &[u8]) -> Result<Self, DecodeError> {
        let buf = &mut payload;
        let fork = H256::decode(buf)?;
        let message = match command {
            DataCommand::Subscribe => Message::Subscribe {
                fork,
                forks: decode_vec(buf)?,
            },
            DataCommand::Unsubscribe => Message::Unsubscribe {
                fork,
                forks: decode_vec(buf)?,
            },
            DataCommand::GetBlocks => Message::GetBlocks {
                fork,
                locator: BlockLocator::decode(buf)?,
            },
            DataCommand::GetData => Message::GetData {
                fork,
                invs: Self::decode_invs(buf)?,
            },
            DataCommand::Inv => Message::Inv {
                fork,
                invs: Self::decode_invs(buf)?,
            },
            DataCommand::Tx => Message::Tx {
                fork,
                tx: Transaction::decode(buf)?,
            },
            DataCommand::Block => Message::Block {
                fork,
                block: Block::decode(buf)?,
            },
            DataCommand::GetFail => Message::GetFail {
                fork,
                invs: Self::decode_invs(buf)?,
            },
            DataCommand::MsgRsp => Message::MsgRsp {
                fork,
                rsp: MsgRsp::decode(buf)?,
            },
        };
        if buf.is_empty() {
            Ok(message)
        } else {
            Err(DecodeError::BadLength)
        }
    }
}
