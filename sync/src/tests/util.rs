//! In-memory collaborators for sync tests: a linear single-fork chain, a
//! recording transport, and a dispatcher wired to the real pool.

use std::collections::HashMap;
use std::sync::Arc;

use forknet_error::Errno;
use forknet_protocol::{OutgoingEvent, PeerNet};
use forknet_traits::{BlockChain, CoreProtocol, Dispatcher};
use forknet_tx_pool::TxPool;
use forknet_types::{
    Block, BlockLocation, BlockLocator, BlockType, ForkTip, OutPoint, PeerNonce, Transaction,
    TxIn, TxOut, H256,
};
use parking_lot::{Mutex, RwLock};

pub fn genesis_block() -> Block {
    Block {
        typ: BlockType::Genesis,
        timestamp: 1,
        height: 0,
        ..Default::default()
    }
}

/// A block extending `prev` at `height`; `salt` varies the hash.
pub fn make_block(height: u32, prev: H256, salt: u32) -> Block {
    Block {
        typ: BlockType::Primary,
        timestamp: 1_000 + salt,
        height,
        prev,
        ..Default::default()
    }
}

struct ChainInner {
    blocks: HashMap<H256, Block>,
    order: Vec<H256>,
    txs: HashMap<H256, Transaction>,
    utxo: HashMap<OutPoint, TxOut>,
    repeat_heights: Vec<u32>,
}

/// A linear chain of one fork.
pub struct MockChain {
    pub genesis: H256,
    inner: RwLock<ChainInner>,
}

impl MockChain {
    pub fn new() -> Arc<Self> {
        let genesis = genesis_block();
        let hash = genesis.hash();
        let mut blocks = HashMap::new();
        blocks.insert(hash, genesis);
        Arc::new(MockChain {
            genesis: hash,
            inner: RwLock::new(ChainInner {
                blocks,
                order: vec![hash],
                txs: HashMap::new(),
                utxo: HashMap::new(),
                repeat_heights: Vec::new(),
            }),
        })
    }

    pub fn append(&self, block: Block) {
        let hash = block.hash();
        let mut inner = self.inner.write();
        for tx in &block.txs {
            inner.txs.insert(tx.hash(), tx.clone());
        }
        inner.blocks.insert(hash, block);
        inner.order.push(hash);
    }

    pub fn add_utxo(&self, point: OutPoint, output: TxOut) {
        self.inner.write().utxo.insert(point, output);
        self.inner
            .write()
            .txs
            .insert(point.hash, Transaction::default());
    }

    pub fn mark_repeat_height(&self, height: u32) {
        self.inner.write().repeat_heights.push(height);
    }

    pub fn tip_hash(&self) -> H256 {
        *self.inner.read().order.last().expect("genesis present")
    }
}

impl BlockChain for MockChain {
    fn exists(&self, hash: &H256) -> bool {
        self.inner.read().blocks.contains_key(hash)
    }

    fn exists_tx(&self, txid: &H256) -> bool {
        self.inner.read().txs.contains_key(txid)
    }

    fn get_block(&self, hash: &H256) -> Option<Block> {
        self.inner.read().blocks.get(hash).cloned()
    }

    fn get_transaction(&self, txid: &H256) -> Option<Transaction> {
        self.inner.read().txs.get(txid).cloned()
    }

    fn get_fork_tip(&self, fork: &H256) -> Option<ForkTip> {
        if *fork != self.genesis {
            return None;
        }
        let inner = self.inner.read();
        let hash = *inner.order.last()?;
        let block = inner.blocks.get(&hash)?;
        Some(ForkTip {
            hash,
            height: block.height,
            timestamp: block.timestamp,
            mint_type: 0,
        })
    }

    fn list_forks(&self) -> Vec<(H256, ForkTip)> {
        self.get_fork_tip(&self.genesis)
            .map(|tip| vec![(self.genesis, tip)])
            .unwrap_or_default()
    }

    fn get_block_location(&self, hash: &H256) -> Option<BlockLocation> {
        let inner = self.inner.read();
        let index = inner.order.iter().position(|cur| cur == hash)?;
        Some(BlockLocation {
            fork: self.genesis,
            height: inner.blocks[hash].height,
            next: inner.order.get(index + 1).copied(),
        })
    }

    fn get_block_locator(&self, fork: &H256, _depth: &mut H256, _max: usize) -> Option<BlockLocator> {
        if *fork != self.genesis {
            return None;
        }
        Some(BlockLocator::new(vec![self.tip_hash()]))
    }

    fn get_block_inv(
        &self,
        fork: &H256,
        locator: &BlockLocator,
        max: usize,
    ) -> Result<Vec<H256>, Errno> {
        if *fork != self.genesis {
            return Err(Errno::NotFound);
        }
        let inner = self.inner.read();
        let start = locator
            .blocks
            .iter()
            .filter_map(|hash| inner.order.iter().position(|cur| cur == hash))
            .max()
            .unwrap_or(0);
        Ok(inner
            .order
            .iter()
            .skip(start + 1)
            .take(max)
            .copied()
            .collect())
    }

    fn get_tx_unspent(
        &self,
        _fork: &H256,
        inputs: &[TxIn],
        outputs: &mut [TxOut],
    ) -> Result<(), Errno> {
        let inner = self.inner.read();
        for (i, txin) in inputs.iter().enumerate() {
            if outputs[i].is_null() {
                if let Some(output) = inner.utxo.get(&txin.prev_out) {
                    outputs[i] = *output;
                }
            }
        }
        Ok(())
    }

    fn verify_repeat_block(&self, _fork: &H256, block: &Block) -> bool {
        !self.inner.read().repeat_heights.contains(&block.height)
    }
}

pub struct MockCore {
    pub genesis: H256,
}

impl CoreProtocol for MockCore {
    fn genesis_block_hash(&self) -> H256 {
        self.genesis
    }

    fn validate_transaction(&self, _tx: &Transaction, _fork_height: u32) -> Result<(), Errno> {
        Ok(())
    }

    fn verify_transaction(
        &self,
        tx: &Transaction,
        prev_outputs: &[TxOut],
        _fork_height: u32,
        _fork: &H256,
    ) -> Result<(), Errno> {
        let value_in: u64 = prev_outputs.iter().map(|output| output.amount).sum();
        if value_in < tx.amount + tx.tx_fee {
            return Err(Errno::TransactionInvalid);
        }
        Ok(())
    }
}

/// Records everything the channel wants sent.
#[derive(Default)]
pub struct MockPeerNet {
    events: Mutex<Vec<OutgoingEvent>>,
}

impl MockPeerNet {
    pub fn take(&self) -> Vec<OutgoingEvent> {
        std::mem::take(&mut *self.events.lock())
    }
}

impl PeerNet for MockPeerNet {
    fn dispatch_event(&self, event: OutgoingEvent) {
        self.events.lock().push(event);
    }
}

/// Accepts blocks onto the mock chain and txs into the real pool, the way
/// the production dispatcher fans out.
pub struct MockDispatcher {
    chain: Arc<MockChain>,
    pool: Arc<TxPool>,
}

impl MockDispatcher {
    pub fn new(chain: Arc<MockChain>, pool: Arc<TxPool>) -> Self {
        MockDispatcher { chain, pool }
    }
}

impl Dispatcher for MockDispatcher {
    fn add_new_block(&self, block: &Block, _source: PeerNonce) -> Result<(), Errno> {
        let hash = block.hash();
        if self.chain.exists(&hash) {
            return Err(Errno::AlreadyHave);
        }
        if !self.chain.exists(&block.prev) {
            return Err(Errno::MissingPrev);
        }
        self.chain.append(block.clone());
        Ok(())
    }

    fn add_new_tx(&self, tx: &Transaction, _source: PeerNonce) -> Result<(), Errno> {
        self.pool.push(tx.clone()).map(|_| ())
    }
}
