//! Core data types of the forknet node.
//!
//! Everything that crosses a crate boundary lives here: the 256-bit hash,
//! inventory identifiers, transactions, blocks, destinations with their
//! string address form, chain-update records, and the length-prefixed binary
//! codec they all share.

mod address;
mod block;
mod chain;
mod hash;
mod inv;
pub mod serialize;
mod transaction;

pub use address::{AddressError, Destination};
pub use block::{Block, BlockEx, BlockLocator, BlockType, TxContext};
pub use chain::{BlockChainUpdate, BlockLocation, ForkTip, TxSetChange, TxUnspent};
pub use hash::H256;
pub use inv::{Inv, InvKind, MAX_INV_COUNT_WIRE, MIN_INV_COUNT_WIRE};
pub use serialize::{Decode, DecodeError, Encode};
pub use transaction::{AssembledTx, OutPoint, Transaction, TxIn, TxOut, TxType};

/// Peer identifier assigned by the transport layer.
pub type PeerNonce = u64;
