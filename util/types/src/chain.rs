//! Records exchanged with the chain collaborator.

use std::collections::{HashMap, HashSet};

use crate::{AssembledTx, BlockEx, OutPoint, TxIn, TxOut, H256};

/// Tip of one fork.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct ForkTip {
    pub hash: H256,
    pub height: u32,
    pub timestamp: u32,
    pub mint_type: u16,
}

/// Where a block sits on chain.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct BlockLocation {
    pub fork: H256,
    pub height: u32,
    /// Successor on the same fork, when one exists.
    pub next: Option<H256>,
}

/// An unspent output, keyed by its outpoint.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct TxUnspent {
    pub out: OutPoint,
    pub output: TxOut,
}

impl TxUnspent {
    pub fn new(out: OutPoint, output: TxOut) -> Self {
        TxUnspent { out, output }
    }
}

/// One tip movement of one fork: blocks that joined the active chain
/// (newest first) and blocks that left it (newest first).
#[derive(Clone, Debug, Default)]
pub struct BlockChainUpdate {
    pub fork: H256,
    pub last_block_hash: H256,
    pub last_block_height: u32,
    pub last_block_time: u32,
    pub added: Vec<BlockEx>,
    pub removed: Vec<BlockEx>,
    /// Transactions present on both sides of the reorg.
    pub tx_update: HashSet<H256>,
}

/// What the pool did in response to a [`BlockChainUpdate`]; consumed by the
/// wallet/service layer.
#[derive(Clone, Debug, Default)]
pub struct TxSetChange {
    pub fork: H256,
    /// txid -> confirmed height, or -1 when the tx returned to the pool.
    pub tx_update: HashMap<H256, i32>,
    pub tx_add_new: Vec<AssembledTx>,
    /// Children first; each entry carries the inputs it released.
    pub tx_remove: Vec<(H256, Vec<TxIn>)>,
}
