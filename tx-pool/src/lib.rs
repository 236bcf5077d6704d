//! The transaction pool.
//!
//! An ordered, UTXO-consistent set of unconfirmed transactions per fork.
//! Admission resolves inputs against pending state first and the chain
//! second, validates through the consensus rules, and keeps a spent-map so
//! no two pooled transactions ever contend for an outpoint. The pool
//! reconciles itself against every tip movement and keeps a pre-arranged
//! block template per fork head.

mod component;
mod persist;
mod pool;
#[cfg(test)]
mod tests;

use std::collections::HashSet;
use std::path::PathBuf;

use forknet_types::{AssembledTx, Destination, H256};
use serde::{Deserialize, Serialize};

pub use component::cache::TxCache;
pub use component::entry::{PooledTx, TxLink};
pub use component::view::{Spent, TxPoolView};
pub use persist::TxPoolData;
pub use pool::TxPool;

/// Ceiling of a serialized block.
pub const MAX_BLOCK_SIZE: usize = 0x20_0000;
const MAX_BLOCK_SIZE_EXCEPT_TX: usize = 512;
/// Byte budget available to transactions inside one block.
pub const MAX_BLOCK_TX_SIZE: usize = MAX_BLOCK_SIZE - MAX_BLOCK_SIZE_EXCEPT_TX;

/// How many recent heights of block templates each fork retains.
pub const CACHE_HEIGHT_INTERVAL: u32 = 23;

/// Pool configuration, embeddable in an outer app config.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PoolConfig {
    /// Directory the pool persists itself under.
    pub data_dir: PathBuf,
}

/// Destination-scoped walk over pooled transactions; `found_tx` returning
/// false aborts the walk.
pub trait TxFilter {
    fn dests(&self) -> &HashSet<Destination>;

    fn found_tx(&mut self, fork: &H256, tx: &AssembledTx) -> bool;
}
