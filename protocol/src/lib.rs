//! The peer-to-peer wire protocol.
//!
//! Length-framed binary messages with a 16-byte header carrying two
//! checksums: CRC-32 over the payload and CRC-24Q over the header itself.
//! Peer-facing business logic consumes the [`PeerEvent`]/[`OutgoingEvent`]
//! sums rather than raw frames.

mod codec;
mod events;
mod header;
mod messages;
mod role;

pub use codec::{MessageCodec, ProtoError};
pub use events::{Bonus, CloseReason, OutgoingEvent, PeerEvent, PeerNet};
pub use header::{
    Channel, DataCommand, MessageHeader, NetworkCommand, MESSAGE_HEADER_SIZE,
    MESSAGE_PAYLOAD_MAX_SIZE,
};
pub use messages::{
    Endpoint, Hello, Message, MsgRsp, MsgRspResult, MsgRspSubType, PeerAddress, ServiceFlags,
    PROTOCOL_VERSION,
};
pub use role::NodeRole;
