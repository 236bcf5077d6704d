//! Events exchanged between the transport and the network channel.
//!
//! The transport turns frames into [`PeerEvent`]s; the channel answers with
//! [`OutgoingEvent`]s. Two sums cover every exchange, so adding a message
//! means the compiler walks every handler.

use forknet_types::{Block, BlockLocator, Inv, PeerNonce, Transaction, H256};

use crate::messages::{MsgRsp, PeerAddress};

/// Why a peer connection is being closed. Whether the transport also bans
/// the address is its own decision.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum CloseReason {
    DdosAttack,
    ResponseFailure,
    ProtocolError,
}

/// Positive feedback routed to the transport's endpoint manager.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Bonus {
    VitalData,
    MajorData,
}

/// Something a peer did.
#[derive(Clone, PartialEq, Debug)]
pub enum PeerEvent {
    Active {
        nonce: PeerNonce,
        addr: PeerAddress,
    },
    Deactive {
        nonce: PeerNonce,
    },
    Subscribe {
        nonce: PeerNonce,
        fork: H256,
        forks: Vec<H256>,
    },
    Unsubscribe {
        nonce: PeerNonce,
        fork: H256,
        forks: Vec<H256>,
    },
    Inv {
        nonce: PeerNonce,
        fork: H256,
        invs: Vec<Inv>,
    },
    GetData {
        nonce: PeerNonce,
        fork: H256,
        invs: Vec<Inv>,
    },
    GetBlocks {
        nonce: PeerNonce,
        fork: H256,
        locator: BlockLocator,
    },
    Tx {
        nonce: PeerNonce,
        fork: H256,
        tx: Transaction,
    },
    Block {
        nonce: PeerNonce,
        fork: H256,
        block: Block,
    },
    GetFail {
        nonce: PeerNonce,
        fork: H256,
        invs: Vec<Inv>,
    },
    MsgRsp {
        nonce: PeerNonce,
        fork: H256,
        rsp: MsgRsp,
    },
}

/// Something we want the transport to do.
#[derive(Clone, PartialEq, Debug)]
pub enum OutgoingEvent {
    Subscribe {
        nonce: PeerNonce,
        fork: H256,
        forks: Vec<H256>,
    },
    Unsubscribe {
        nonce: PeerNonce,
        fork: H256,
        forks: Vec<H256>,
    },
    GetBlocks {
        nonce: PeerNonce,
        fork: H256,
        locator: BlockLocator,
    },
    GetData {
        nonce: PeerNonce,
        fork: H256,
        invs: Vec<Inv>,
    },
    Inv {
        nonce: PeerNonce,
        fork: H256,
        invs: Vec<Inv>,
    },
    Tx {
        nonce: PeerNonce,
        fork: H256,
        tx: Transaction,
    },
    Block {
        nonce: PeerNonce,
        fork: H256,
        block: Block,
    },
    GetFail {
        nonce: PeerNonce,
        fork: H256,
        invs: Vec<Inv>,
    },
    MsgRsp {
        nonce: PeerNonce,
        fork: H256,
        rsp: MsgRsp,
    },
    /// Close the connection with a misbehavior reason.
    Close {
        nonce: PeerNonce,
        reason: CloseReason,
    },
    /// Reward the peer for useful data.
    Reward {
        nonce: PeerNonce,
        bonus: Bonus,
    },
}

impl OutgoingEvent {
    pub fn nonce(&self) -> PeerNonce {
        match self {
            OutgoingEvent::Subscribe { nonce, .. }
            | OutgoingEvent::Unsubscribe { nonce, .. }
            | OutgoingEvent::GetBlocks { nonce, .. }
            | OutgoingEvent::GetData { nonce, .. }
            | OutgoingEvent::Inv { nonce, .. }
            | OutgoingEvent::Tx { nonce, .. }
            | OutgoingEvent::Block { nonce, .. }
            | OutgoingEvent::GetFail { nonce, .. }
            | OutgoingEvent::MsgRsp { nonce, .. }
            | OutgoingEvent::Close { nonce, .. }
            | OutgoingEvent::Reward { nonce, .. } => *nonce,
        }
    }
}

/// The transport seam: the network channel pushes outgoing events through
/// this, never blocking on I/O.
pub trait PeerNet: Send + Sync {
    fn dispatch_event(&self, event: OutgoingEvent);
}
