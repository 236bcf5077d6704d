//! Collaborator contracts.
//!
//! The sync and pool crates talk to the block store, the consensus rules and
//! the submission pipeline exclusively through these traits; production
//! implementations live outside this workspace slice, tests supply
//! in-memory doubles.

use forknet_error::Errno;
use forknet_types::{
    Block, BlockLocation, BlockLocator, ForkTip, PeerNonce, Transaction, TxIn, TxOut, H256,
};

/// Read access to the block store and the on-chain UTXO index.
pub trait BlockChain: Send + Sync {
    fn exists(&self, hash: &H256) -> bool;

    fn exists_tx(&self, txid: &H256) -> bool;

    fn get_block(&self, hash: &H256) -> Option<Block>;

    fn get_transaction(&self, txid: &H256) -> Option<Transaction>;

    /// Tip of `fork`, if the fork is known.
    fn get_fork_tip(&self, fork: &H256) -> Option<ForkTip>;

    /// Every fork the node currently tracks, with its tip.
    fn list_forks(&self) -> Vec<(H256, ForkTip)>;

    fn get_block_location(&self, hash: &H256) -> Option<BlockLocation>;

    /// Builds a locator for `fork` walking back from `depth`; rewrites
    /// `depth` to where the walk stopped so the next call resumes deeper.
    fn get_block_locator(&self, fork: &H256, depth: &mut H256, max: usize) -> Option<BlockLocator>;

    /// Resolves `locator` against `fork` and returns up to `max` successive
    /// block hashes past the common ancestor.
    fn get_block_inv(
        &self,
        fork: &H256,
        locator: &BlockLocator,
        max: usize,
    ) -> Result<Vec<H256>, Errno>;

    /// Fills `outputs[i]` with the chain UTXO behind `inputs[i]` for every
    /// slot still null; slots already resolved by the caller are left alone.
    fn get_tx_unspent(
        &self,
        fork: &H256,
        inputs: &[TxIn],
        outputs: &mut [TxOut],
    ) -> Result<(), Errno>;

    /// Whether `block` is NOT a duplicate mint at its height on `fork`.
    fn verify_repeat_block(&self, fork: &H256, block: &Block) -> bool;
}

/// The consensus rule set, as far as the pool needs it.
pub trait CoreProtocol: Send + Sync {
    fn genesis_block_hash(&self) -> H256;

    /// Context-free checks.
    fn validate_transaction(&self, tx: &Transaction, fork_height: u32) -> Result<(), Errno>;

    /// Full check against resolved inputs.
    fn verify_transaction(
        &self,
        tx: &Transaction,
        prev_outputs: &[TxOut],
        fork_height: u32,
        fork: &H256,
    ) -> Result<(), Errno>;
}

/// Submission pipeline shared by the miner and the network channel.
/// Idempotent: resubmitting a known object yields `Errno::AlreadyHave`.
pub trait Dispatcher: Send + Sync {
    fn add_new_block(&self, block: &Block, source: PeerNonce) -> Result<(), Errno>;

    fn add_new_tx(&self, tx: &Transaction, source: PeerNonce) -> Result<(), Errno>;
}
