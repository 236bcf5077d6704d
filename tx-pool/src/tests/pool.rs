use std::collections::HashSet;
use std::sync::Arc;

use forknet_error::Errno;
use forknet_types::{
    AssembledTx, Block, BlockChainUpdate, BlockEx, BlockType, Destination, ForkTip, OutPoint,
    Transaction, TxContext, TxIn, TxOut, TxUnspent, H256,
};

use crate::tests::dummy::{DummyChain, DummyCore};
use crate::{PoolConfig, TxFilter, TxPool, MAX_BLOCK_TX_SIZE};

fn dest(n: u64) -> Destination {
    Destination::new_pubkey(H256::from_u64(n))
}

fn build_tx(anchor: H256, inputs: Vec<(H256, u8)>, to: Destination, amount: u64, fee: u64) -> Transaction {
    Transaction {
        timestamp: 100,
        hash_anchor: anchor,
        inputs: inputs
            .into_iter()
            .map(|(hash, n)| TxIn::new(OutPoint::new(hash, n)))
            .collect(),
        send_to: to,
        amount,
        tx_fee: fee,
        ..Default::default()
    }
}

struct Fixture {
    pool: TxPool,
    chain: Arc<DummyChain>,
    core: Arc<DummyCore>,
    fork: H256,
    _dir: tempfile::TempDir,
}

fn fixture() -> Fixture {
    let fork = H256::from_u64(1);
    let tip = ForkTip {
        hash: fork,
        height: 0,
        timestamp: 100,
        mint_type: 0,
    };
    let chain = Arc::new(DummyChain::with_fork(fork, tip));
    let core = Arc::new(DummyCore::new(fork));
    let dir = tempfile::tempdir().unwrap();
    let config = PoolConfig {
        data_dir: dir.path().to_path_buf(),
    };
    let pool = TxPool::new(&config, core.clone(), chain.clone()).unwrap();
    Fixture {
        pool,
        chain,
        core,
        fork,
        _dir: dir,
    }
}

#[test]
fn push_then_get_roundtrip() {
    let f = fixture();
    let funding = OutPoint::new(H256::from_u64(900), 0);
    f.chain.add_utxo(funding, TxOut::new(dest(7), 100, 0));

    let tx = build_tx(f.fork, vec![(funding.hash, 0)], dest(1), 90, 10);
    let txid = tx.hash();

    let (fork, dest_in, value_in) = f.pool.push(tx.clone()).unwrap();
    assert_eq!(fork, f.fork);
    assert_eq!(dest_in, dest(7));
    assert_eq!(value_in, 100);

    assert!(f.pool.exists(&txid));
    assert_eq!(f.pool.get(&txid).unwrap(), tx);
    assert_eq!(f.pool.count(&f.fork), 1);
    assert_eq!(f.pool.list_tx(&f.fork), vec![txid]);

    // pushing again is idempotent
    assert_eq!(f.pool.push(tx), Err(Errno::AlreadyHave));
}

#[test]
fn push_rejects_mint_and_unknown_anchor() {
    let f = fixture();

    let mut mint = build_tx(f.fork, vec![], dest(1), 5, 0);
    mint.typ = forknet_types::TxType::Work;
    assert_eq!(f.pool.push(mint), Err(Errno::TransactionInvalid));

    let funding = OutPoint::new(H256::from_u64(900), 0);
    f.chain.add_utxo(funding, TxOut::new(dest(7), 100, 0));
    let stray = build_tx(H256::from_u64(404), vec![(funding.hash, 0)], dest(1), 90, 10);
    assert_eq!(f.pool.push(stray), Err(Errno::TransactionInvalid));
}

#[test]
fn conflicting_input_is_rejected() {
    let f = fixture();
    let funding = OutPoint::new(H256::from_u64(900), 0);
    f.chain.add_utxo(funding, TxOut::new(dest(7), 100, 0));

    let tx1 = build_tx(f.fork, vec![(funding.hash, 0)], dest(1), 90, 10);
    f.pool.push(tx1).unwrap();

    let tx2 = build_tx(f.fork, vec![(funding.hash, 0)], dest(2), 50, 10);
    assert_eq!(f.pool.push(tx2), Err(Errno::TransactionConflictingInput));
}

#[test]
fn missing_prev_is_reported() {
    let f = fixture();
    let tx = build_tx(f.fork, vec![(H256::from_u64(555), 0)], dest(1), 90, 10);
    assert_eq!(f.pool.push(tx), Err(Errno::MissingPrev));
}

#[test]
fn chained_spend_and_pop_cascade() {
    let f = fixture();
    let funding = OutPoint::new(H256::from_u64(900), 0);
    f.chain.add_utxo(funding, TxOut::new(dest(7), 100, 0));

    let tx1 = build_tx(f.fork, vec![(funding.hash, 0)], dest(1), 100, 0);
    let tx1_id = tx1.hash();
    f.pool.push(tx1).unwrap();

    let tx2 = build_tx(f.fork, vec![(tx1_id, 0)], dest(2), 100, 0);
    let tx2_id = tx2.hash();
    f.pool.push(tx2).unwrap();

    assert_eq!(f.pool.list_tx(&f.fork), vec![tx1_id, tx2_id]);

    f.pool.pop(&tx1_id);
    assert!(!f.pool.exists(&tx1_id));
    assert!(!f.pool.exists(&tx2_id));
    assert_eq!(f.pool.count(&f.fork), 0);
}

#[test]
fn list_fork_unspent_overlays_pool_state() {
    let f = fixture();
    let funding = OutPoint::new(H256::from_u64(900), 0);
    f.chain.add_utxo(funding, TxOut::new(dest(7), 100, 0));
    let untouched = OutPoint::new(H256::from_u64(901), 0);
    f.chain.add_utxo(untouched, TxOut::new(dest(7), 33, 0));

    // spends `funding`, pays 90 to dest(1), change 5 back to dest(7)
    let tx = build_tx(f.fork, vec![(funding.hash, 0)], dest(1), 90, 5);
    let txid = tx.hash();
    f.pool.push(tx).unwrap();

    let on_chain = vec![
        TxUnspent::new(funding, TxOut::new(dest(7), 100, 0)),
        TxUnspent::new(untouched, TxOut::new(dest(7), 33, 0)),
    ];
    let unspent = f
        .pool
        .list_fork_unspent(&f.fork, &dest(7), 0, &on_chain)
        .unwrap();

    let points: HashSet<OutPoint> = unspent.iter().map(|u| u.out).collect();
    assert!(!points.contains(&funding), "spent in pool");
    assert!(points.contains(&untouched));
    assert!(points.contains(&OutPoint::new(txid, 1)), "pool change");
}

struct CollectFilter {
    dests: HashSet<Destination>,
    seen: Vec<H256>,
    abort_after: usize,
}

impl TxFilter for CollectFilter {
    fn dests(&self) -> &HashSet<Destination> {
        &self.dests
    }

    fn found_tx(&mut self, _fork: &H256, tx: &AssembledTx) -> bool {
        self.seen.push(tx.tx.hash());
        self.seen.len() < self.abort_after
    }
}

#[test]
fn filter_tx_matches_and_aborts() {
    let f = fixture();
    let funding = OutPoint::new(H256::from_u64(900), 0);
    f.chain.add_utxo(funding, TxOut::new(dest(7), 100, 0));
    let tx = build_tx(f.fork, vec![(funding.hash, 0)], dest(1), 90, 10);
    let txid = tx.hash();
    f.pool.push(tx).unwrap();

    let mut filter = CollectFilter {
        dests: [dest(1)].into_iter().collect(),
        seen: Vec::new(),
        abort_after: usize::MAX,
    };
    assert!(f.pool.filter_tx(&f.fork, &mut filter));
    assert_eq!(filter.seen, vec![txid]);

    let mut aborting = CollectFilter {
        dests: [dest(1)].into_iter().collect(),
        seen: Vec::new(),
        abort_after: 1,
    };
    assert!(!f.pool.filter_tx(&f.fork, &mut aborting));
}

fn block_with(height: u32, txs: Vec<(Transaction, TxContext)>) -> BlockEx {
    let (txs, contexts): (Vec<_>, Vec<_>) = txs.into_iter().unzip();
    let block = Block {
        typ: BlockType::Primary,
        height,
        timestamp: 1_000,
        txs,
        ..Default::default()
    };
    BlockEx::new(block, contexts)
}

#[test]
fn synchronize_confirms_pooled_tx() {
    let f = fixture();
    let funding = OutPoint::new(H256::from_u64(900), 0);
    f.chain.add_utxo(funding, TxOut::new(dest(7), 100, 0));
    let tx = build_tx(f.fork, vec![(funding.hash, 0)], dest(1), 90, 10);
    let txid = tx.hash();
    f.pool.push(tx.clone()).unwrap();

    let head = block_with(
        1,
        vec![(
            tx,
            TxContext {
                dest_in: dest(7),
                value_in: 100,
            },
        )],
    );
    let head_hash = head.block.hash();
    let update = BlockChainUpdate {
        fork: f.fork,
        last_block_hash: head_hash,
        last_block_height: 1,
        last_block_time: 1_000,
        added: vec![head],
        ..Default::default()
    };

    let change = f.pool.synchronize_blockchain(&update);
    assert!(!f.pool.exists(&txid));
    assert_eq!(change.tx_update.get(&txid), Some(&1));
    assert!(change.tx_remove.is_empty());

    // template for the new head is cached and empty
    let (vtx, fee) = f
        .pool
        .arrange_block_tx(&f.fork, &head_hash, 1_000, MAX_BLOCK_TX_SIZE)
        .unwrap();
    assert!(vtx.is_empty());
    assert_eq!(fee, 0);
}

#[test]
fn synchronize_evicts_conflicts_children_first() {
    let f = fixture();
    let funding = OutPoint::new(H256::from_u64(900), 0);
    f.chain.add_utxo(funding, TxOut::new(dest(7), 100, 0));

    let pool_tx = build_tx(f.fork, vec![(funding.hash, 0)], dest(1), 100, 0);
    let pool_tx_id = pool_tx.hash();
    f.pool.push(pool_tx).unwrap();
    let child = build_tx(f.fork, vec![(pool_tx_id, 0)], dest(2), 100, 0);
    let child_id = child.hash();
    f.pool.push(child).unwrap();

    // a block confirms a different spend of `funding`
    let rival = build_tx(f.fork, vec![(funding.hash, 0)], dest(3), 100, 0);
    let head = block_with(
        1,
        vec![(
            rival.clone(),
            TxContext {
                dest_in: dest(7),
                value_in: 100,
            },
        )],
    );
    let update = BlockChainUpdate {
        fork: f.fork,
        last_block_hash: head.block.hash(),
        last_block_height: 1,
        last_block_time: 1_000,
        added: vec![head],
        ..Default::default()
    };

    let change = f.pool.synchronize_blockchain(&update);
    assert!(!f.pool.exists(&pool_tx_id));
    assert!(!f.pool.exists(&child_id));

    let removed: Vec<H256> = change.tx_remove.iter().map(|(txid, _)| *txid).collect();
    assert_eq!(removed, vec![child_id, pool_tx_id]);
    assert_eq!(
        change.tx_add_new.iter().map(|a| a.tx.hash()).collect::<Vec<_>>(),
        vec![rival.hash()]
    );
}

#[test]
fn synchronize_rollback_repushes_or_drops() {
    let f = fixture();
    let funding_a = OutPoint::new(H256::from_u64(900), 0);
    f.chain.add_utxo(funding_a, TxOut::new(dest(7), 100, 0));
    let funding_b = OutPoint::new(H256::from_u64(901), 0);
    f.chain.add_utxo(funding_b, TxOut::new(dest(7), 60, 0));

    let revived = build_tx(f.fork, vec![(funding_a.hash, 0)], dest(1), 90, 10);
    let revived_id = revived.hash();
    let doomed = build_tx(f.fork, vec![(funding_b.hash, 0)], dest(2), 50, 10);
    let doomed_id = doomed.hash();
    f.core.reject(doomed_id);

    let gone = block_with(
        2,
        vec![
            (
                revived.clone(),
                TxContext {
                    dest_in: dest(7),
                    value_in: 100,
                },
            ),
            (
                doomed,
                TxContext {
                    dest_in: dest(7),
                    value_in: 60,
                },
            ),
        ],
    );
    let new_head = block_with(2, Vec::new());
    let new_head_hash = new_head.block.hash();

    let update = BlockChainUpdate {
        fork: f.fork,
        last_block_hash: new_head_hash,
        last_block_height: 2,
        last_block_time: 1_000,
        added: vec![new_head],
        removed: vec![gone],
        ..Default::default()
    };

    let change = f.pool.synchronize_blockchain(&update);

    // the valid tx returned to the pool
    assert!(f.pool.exists(&revived_id));
    assert_eq!(change.tx_update.get(&revived_id), Some(&-1));

    // the rejected one was dropped and reported
    assert!(!f.pool.exists(&doomed_id));
    assert!(change.tx_remove.iter().any(|(txid, _)| *txid == doomed_id));

    // the fresh template contains the revived tx
    let (vtx, _) = f
        .pool
        .arrange_block_tx(&f.fork, &new_head_hash, 1_000, MAX_BLOCK_TX_SIZE)
        .unwrap();
    assert_eq!(vtx.iter().map(|tx| tx.hash()).collect::<Vec<_>>(), vec![revived_id]);
}

#[test]
fn fetch_inputs_resolves_pool_before_chain() {
    let f = fixture();
    let funding = OutPoint::new(H256::from_u64(900), 0);
    f.chain.add_utxo(funding, TxOut::new(dest(7), 100, 0));

    let tx1 = build_tx(f.fork, vec![(funding.hash, 0)], dest(7), 100, 0);
    let tx1_id = tx1.hash();
    f.pool.push(tx1).unwrap();

    let spender = build_tx(f.fork, vec![(tx1_id, 0)], dest(2), 100, 0);
    let inputs = f.pool.fetch_inputs(&f.fork, &spender).unwrap();
    assert_eq!(inputs.len(), 1);
    assert_eq!(inputs[0].amount, 100);
    assert_eq!(inputs[0].dest, dest(7));

    // an input already spent in pool is refused
    let double = build_tx(f.fork, vec![(funding.hash, 0)], dest(2), 10, 0);
    assert_eq!(
        f.pool.fetch_inputs(&f.fork, &double),
        Err(Errno::TransactionConflictingInput)
    );
}

#[test]
fn save_and_load_restores_pool() {
    let fork = H256::from_u64(1);
    let tip = ForkTip {
        hash: fork,
        height: 0,
        timestamp: 100,
        mint_type: 0,
    };
    let chain = Arc::new(DummyChain::with_fork(fork, tip));
    let core = Arc::new(DummyCore::new(fork));
    let dir = tempfile::tempdir().unwrap();
    let config = PoolConfig {
        data_dir: dir.path().to_path_buf(),
    };

    let funding = OutPoint::new(H256::from_u64(900), 0);
    chain.add_utxo(funding, TxOut::new(dest(7), 100, 0));
    let tx = build_tx(fork, vec![(funding.hash, 0)], dest(1), 90, 10);
    let txid = tx.hash();

    {
        let pool = TxPool::new(&config, core.clone(), chain.clone()).unwrap();
        pool.push(tx).unwrap();
        pool.save_data().unwrap();
    }

    let pool = TxPool::new(&config, core, chain).unwrap();
    pool.load_data().unwrap();
    assert!(pool.exists(&txid));
    assert_eq!(pool.count(&fork), 1);
}
