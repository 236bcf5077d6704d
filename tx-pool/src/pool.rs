use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;

use forknet_error::Errno;
use forknet_logger::{debug, error, trace};
use forknet_traits::{BlockChain, CoreProtocol};
use forknet_types::{
    AssembledTx, BlockChainUpdate, Destination, OutPoint, Transaction, TxIn, TxOut, TxSetChange,
    TxUnspent, H256,
};
use parking_lot::RwLock;

use crate::component::cache::TxCache;
use crate::component::entry::{PooledTx, SEQ_COUNTER_SHIFT};
use crate::component::view::TxPoolView;
use crate::persist::TxPoolData;
use crate::{PoolConfig, TxFilter, CACHE_HEIGHT_INTERVAL, MAX_BLOCK_SIZE, MAX_BLOCK_TX_SIZE};

#[derive(Default)]
struct PoolInner {
    views: HashMap<H256, TxPoolView>,
    caches: HashMap<H256, TxCache>,
    last_sequence_number: u64,
}

impl PoolInner {
    /// Counter-boundary sequence numbers only; the slot bits below are
    /// handed out by the view. The counter restarts once the pool drains.
    fn next_sequence_number(&mut self) -> u64 {
        if self.views.values().all(TxPoolView::is_empty) {
            self.last_sequence_number = 0;
        }
        self.last_sequence_number += 1;
        self.last_sequence_number << SEQ_COUNTER_SHIFT
    }

    fn find_fork(&self, txid: &H256) -> Option<H256> {
        self.views
            .iter()
            .find(|(_, view)| view.exists(txid))
            .map(|(fork, _)| *fork)
    }
}

/// The pool. Writers (`push`, `pop`, `synchronize_blockchain`) and readers
/// share one `RwLock`; nothing here blocks on I/O while holding it.
pub struct TxPool {
    inner: RwLock<PoolInner>,
    data: TxPoolData,
    core: Arc<dyn CoreProtocol>,
    chain: Arc<dyn BlockChain>,
}

impl TxPool {
    pub fn new(
        config: &PoolConfig,
        core: Arc<dyn CoreProtocol>,
        chain: Arc<dyn BlockChain>,
    ) -> Result<Self, Errno> {
        let data = TxPoolData::initialize(&config.data_dir)?;
        Ok(TxPool {
            inner: RwLock::new(PoolInner::default()),
            data,
            core,
            chain,
        })
    }

    /// Restores the persisted pool and primes a block template per fork.
    pub fn load_data(&self) -> Result<(), Errno> {
        let entries = self.data.load()?;
        let mut inner = self.inner.write();

        for (fork, (txid, assembled)) in entries {
            let seq = inner.next_sequence_number();
            let view = inner.views.entry(fork).or_default();
            let entry = PooledTx::new(assembled, seq);
            if entry.txid != txid {
                error!("load: txid mismatch, stored: {txid}, computed: {}", entry.txid);
                continue;
            }
            if !view.add_entry(entry) {
                error!("load: add entry fail, txid: {txid}");
            }
        }

        for (fork, tip) in self.chain.list_forks() {
            let view = inner.views.entry(fork).or_default();
            view.set_last_block(tip.hash, tip.timestamp);
            let (vtx, _) = view.arrange_block_tx(tip.timestamp, MAX_BLOCK_SIZE);
            inner
                .caches
                .entry(fork)
                .or_insert_with(|| TxCache::new(CACHE_HEIGHT_INTERVAL))
                .add_new(tip.hash, vtx);
        }
        Ok(())
    }

    /// Persists every pooled transaction in global sequence order.
    pub fn save_data(&self) -> Result<(), Errno> {
        let inner = self.inner.read();
        let mut sorted: BTreeMap<u64, (H256, (H256, AssembledTx))> = BTreeMap::new();
        for (fork, view) in &inner.views {
            for entry in view.iter() {
                sorted.insert(
                    entry.sequence_number,
                    (*fork, (entry.txid, entry.assembled.clone())),
                );
            }
        }
        let entries: Vec<_> = sorted.into_values().collect();
        self.data.save(&entries)
    }

    pub fn clear(&self) {
        let mut inner = self.inner.write();
        inner.views.clear();
        inner.caches.clear();
    }

    pub fn exists(&self, txid: &H256) -> bool {
        self.inner.read().find_fork(txid).is_some()
    }

    pub fn count(&self, fork: &H256) -> usize {
        self.inner
            .read()
            .views
            .get(fork)
            .map(TxPoolView::count)
            .unwrap_or(0)
    }

    pub fn get(&self, txid: &H256) -> Option<Transaction> {
        self.get_assembled(txid).map(|assembled| assembled.tx)
    }

    pub fn get_assembled(&self, txid: &H256) -> Option<AssembledTx> {
        let inner = self.inner.read();
        inner
            .views
            .values()
            .find_map(|view| view.get(txid))
            .map(|entry| entry.assembled.clone())
    }

    /// Admits `tx`, returning the fork it landed on, who paid, and the
    /// total input value.
    pub fn push(&self, tx: Transaction) -> Result<(H256, Destination, u64), Errno> {
        let txid = tx.hash();
        let mut inner = self.inner.write();

        if inner.find_fork(&txid).is_some() {
            debug!("push: tx existed, txid: {txid}");
            return Err(Errno::AlreadyHave);
        }
        if tx.is_mint() {
            debug!("push: tx is mint, txid: {txid}");
            return Err(Errno::TransactionInvalid);
        }
        let location = match self.chain.get_block_location(&tx.hash_anchor) {
            Some(location) => location,
            None => {
                debug!(
                    "push: anchor not found, txid: {txid}, anchor: {}",
                    tx.hash_anchor
                );
                return Err(Errno::TransactionInvalid);
            }
        };
        let fork = location.fork;
        let tip = match self.chain.get_fork_tip(&fork) {
            Some(tip) => tip,
            None => {
                debug!("push: get fork tip fail, txid: {txid}, fork: {fork}");
                return Err(Errno::TransactionInvalid);
            }
        };

        let seq = inner.next_sequence_number();
        let view = inner.views.entry(fork).or_default();
        match add_new(&*self.core, &*self.chain, view, seq, txid, tx, &fork, tip.height) {
            Ok(()) => {
                let entry = view.get(&txid).ok_or(Errno::NotFound)?;
                trace!("push success, txid: {txid}");
                Ok((fork, entry.dest_in(), entry.value_in()))
            }
            Err(err) => {
                trace!("push fail, err: {err}, txid: {txid}");
                Err(err)
            }
        }
    }

    /// Removes `txid` and every pooled descendant spending its outputs.
    pub fn pop(&self, txid: &H256) {
        let mut inner = self.inner.write();
        let fork = match inner.find_fork(txid) {
            Some(fork) => fork,
            None => {
                error!("pop: find fail, txid: {txid}");
                return;
            }
        };
        if let Some(view) = inner.views.get_mut(&fork) {
            view.remove(txid);
            let mut involved = BTreeMap::new();
            view.invalidate_spent(OutPoint::new(*txid, 0), &mut involved);
            view.invalidate_spent(OutPoint::new(*txid, 1), &mut involved);
            trace!("pop success, txid: {txid}, descendants: {}", involved.len());
        }
    }

    /// Pooled tx ids of `fork` in sequence order.
    pub fn list_tx(&self, fork: &H256) -> Vec<H256> {
        let inner = self.inner.read();
        inner
            .views
            .get(fork)
            .map(|view| view.seq_ids().copied().collect())
            .unwrap_or_default()
    }

    /// Like [`TxPool::list_tx`], with serialized sizes.
    pub fn list_tx_with_size(&self, fork: &H256) -> Vec<(H256, usize)> {
        let inner = self.inner.read();
        let mut out = Vec::new();
        if let Some(view) = inner.views.get(fork) {
            for txid in view.seq_ids() {
                if let Some(entry) = view.get(txid) {
                    out.push((*txid, entry.serialized_size));
                }
            }
        }
        out
    }

    /// Overlays pool state onto a chain-UTXO slice: chain unspents consumed
    /// by the pool disappear, pool-made unspents owned by `dest` append,
    /// until `max` (0 = unlimited).
    pub fn list_fork_unspent(
        &self,
        fork: &H256,
        dest: &Destination,
        max: usize,
        unspent_on_chain: &[TxUnspent],
    ) -> Option<Vec<TxUnspent>> {
        let inner = self.inner.read();
        let view = inner.views.get(fork)?;

        let mut out = Vec::new();
        let mut exclude: HashSet<OutPoint> = HashSet::new();
        for unspent in unspent_on_chain {
            if max != 0 && out.len() >= max {
                return Some(out);
            }
            if !view.is_spent(&unspent.out) {
                exclude.insert(unspent.out);
                out.push(*unspent);
            }
        }
        let remaining = if max != 0 { max - out.len() } else { 0 };
        view.list_unspent(dest, &exclude, remaining, &mut out);
        Some(out)
    }

    /// Walks the fork's pool, reporting every tx touching one of the
    /// filter's destinations. Aborts (returning false) when `found_tx`
    /// says to stop.
    pub fn filter_tx(&self, fork: &H256, filter: &mut dyn TxFilter) -> bool {
        let inner = self.inner.read();
        let view = match inner.views.get(fork) {
            Some(view) => view,
            None => return true,
        };
        for entry in view.iter() {
            if filter.dests().contains(&entry.tx().send_to)
                || filter.dests().contains(&entry.dest_in())
            {
                if !filter.found_tx(fork, &entry.assembled) {
                    debug!("filter_tx: found_tx fail, txid: {}", entry.txid);
                    return false;
                }
            }
        }
        true
    }

    /// The block template for building on `prev`. Served from the per-fork
    /// cache when warm; computed from the live pool (and cached) otherwise.
    pub fn arrange_block_tx(
        &self,
        fork: &H256,
        prev: &H256,
        block_time: u32,
        max_size: usize,
    ) -> Option<(Vec<Transaction>, u64)> {
        {
            let inner = self.inner.read();
            if let Some(vtx) = inner
                .caches
                .get(fork)
                .and_then(|cache| cache.retrieve(prev))
            {
                let fee = vtx.iter().map(|tx| tx.tx_fee).sum();
                return Some((vtx.clone(), fee));
            }
        }

        let mut inner = self.inner.write();
        let (vtx, fee) = inner.views.get(fork)?.arrange_block_tx(block_time, max_size);
        inner
            .caches
            .entry(*fork)
            .or_insert_with(|| TxCache::new(CACHE_HEIGHT_INTERVAL))
            .add_new(*prev, vtx.clone());
        Some((vtx, fee))
    }

    /// Resolves the prev-outputs of `tx`, pool state taking priority over
    /// chain. All resolved outputs must pay the same destination.
    pub fn fetch_inputs(&self, fork: &H256, tx: &Transaction) -> Result<Vec<TxOut>, Errno> {
        let inner = self.inner.read();
        let view = inner.views.get(fork);

        let mut unspent = vec![TxOut::default(); tx.inputs.len()];
        if let Some(view) = view {
            for (i, point) in tx.input_pts().enumerate() {
                if view.is_spent(&point) {
                    error!(
                        "fetch_inputs: prevout is spent, txid: {}, prevout: [{}]:{}",
                        tx.hash(),
                        point.n,
                        point.hash
                    );
                    return Err(Errno::TransactionConflictingInput);
                }
                if let Some(output) = view.get_unspent(&point) {
                    unspent[i] = output;
                }
            }
        }

        self.chain.get_tx_unspent(fork, &tx.inputs, &mut unspent)?;

        let mut dest_in = Destination::default();
        for (i, output) in unspent.iter().enumerate() {
            if output.is_null() {
                error!(
                    "fetch_inputs: unspent not found, txid: {}, input: {}",
                    tx.hash(),
                    i
                );
                return Err(Errno::NotFound);
            }
            if dest_in.is_null() {
                dest_in = output.dest;
            } else if dest_in != output.dest {
                error!(
                    "fetch_inputs: input destinations differ, {} vs {}",
                    dest_in, output.dest
                );
                return Err(Errno::TransactionInvalid);
            }
        }
        Ok(unspent)
    }

    /// Reconciles the pool with a tip movement and refreshes the block
    /// template for the new head.
    pub fn synchronize_blockchain(&self, update: &BlockChainUpdate) -> TxSetChange {
        let mut change = TxSetChange {
            fork: update.fork,
            ..Default::default()
        };

        let mut inner = self.inner.write();
        inner.views.entry(update.fork).or_default();
        let mut involved: BTreeMap<u64, PooledTx> = BTreeMap::new();

        // Added blocks, oldest to newest: confirmed txs leave the pool,
        // double spends drag their descendants out with them.
        for block_ex in update.added.iter().rev() {
            let block = &block_ex.block;
            let height = block.height as i32;
            if block.tx_mint.amount != 0 {
                change
                    .tx_add_new
                    .push(AssembledTx::new(block.tx_mint.clone(), height, Destination::default(), 0));
            }
            for (i, tx) in block.txs.iter().enumerate() {
                let txid = tx.hash();
                if update.tx_update.contains(&txid) {
                    change.tx_update.insert(txid, height);
                    continue;
                }
                let view = inner.views.get_mut(&update.fork).expect("view created above");
                if view.exists(&txid) {
                    view.remove(&txid);
                    change.tx_update.insert(txid, height);
                } else {
                    for point in tx.input_pts() {
                        view.invalidate_spent(point, &mut involved);
                    }
                    let context = block_ex.tx_contexts.get(i).copied().unwrap_or_default();
                    change.tx_add_new.push(AssembledTx::new(
                        tx.clone(),
                        height,
                        context.dest_in,
                        context.value_in,
                    ));
                }
            }
        }

        // Removed blocks, newest to oldest: their txs try to re-enter the
        // pool; failures are dropped along with whatever spent them.
        let mut removed_tail: Vec<(H256, Vec<TxIn>)> = Vec::new();
        for block_ex in update.removed.iter().rev() {
            let block = &block_ex.block;
            for tx in &block.txs {
                let txid = tx.hash();
                if update.tx_update.contains(&txid) {
                    continue;
                }
                let seq = inner.next_sequence_number();
                let view = inner.views.get_mut(&update.fork).expect("view created above");
                let spent0 = view.get_spent(&OutPoint::new(txid, 0));
                let spent1 = view.get_spent(&OutPoint::new(txid, 1));
                match add_new(
                    &*self.core,
                    &*self.chain,
                    view,
                    seq,
                    txid,
                    tx.clone(),
                    &update.fork,
                    update.last_block_height,
                ) {
                    Ok(()) => {
                        if let Some(spender) = spent0 {
                            view.set_spent(OutPoint::new(txid, 0), spender);
                        }
                        if let Some(spender) = spent1 {
                            view.set_spent(OutPoint::new(txid, 1), spender);
                        }
                        change.tx_update.insert(txid, -1);
                    }
                    Err(_) => {
                        view.invalidate_spent(OutPoint::new(txid, 0), &mut involved);
                        view.invalidate_spent(OutPoint::new(txid, 1), &mut involved);
                        removed_tail.push((txid, tx.inputs.clone()));
                    }
                }
            }
            if block.tx_mint.amount != 0 {
                let mint_txid = block.tx_mint.hash();
                let view = inner.views.get_mut(&update.fork).expect("view created above");
                view.invalidate_spent(OutPoint::new(mint_txid, 0), &mut involved);
                removed_tail.push((mint_txid, block.tx_mint.inputs.clone()));
            }
        }

        // children first
        for entry in involved.values().rev() {
            change
                .tx_remove
                .push((entry.txid, entry.tx().inputs.clone()));
        }
        change.tx_remove.extend(removed_tail.into_iter().rev());

        if let Some(head) = update.added.first() {
            let head_hash = head.block.hash();
            let head_time = head.block.timestamp;
            let view = inner.views.get_mut(&update.fork).expect("view created above");
            view.set_last_block(head_hash, head_time);
            let (vtx, _) = view.arrange_block_tx(head_time, MAX_BLOCK_TX_SIZE);
            let cache = inner
                .caches
                .entry(update.fork)
                .or_insert_with(|| TxCache::new(CACHE_HEIGHT_INTERVAL));
            if let Some(stale) = update.removed.first() {
                cache.remove(&stale.block.hash());
            }
            cache.add_new(head_hash, vtx);
        }

        change
    }
}

/// Validates `tx` against pending state, chain UTXO, and the consensus
/// rules, then takes it into `view` under `seq`.
#[allow(clippy::too_many_arguments)]
fn add_new(
    core: &dyn CoreProtocol,
    chain: &dyn BlockChain,
    view: &mut TxPoolView,
    seq: u64,
    txid: H256,
    tx: Transaction,
    fork: &H256,
    fork_height: u32,
) -> Result<(), Errno> {
    if tx.inputs.is_empty() {
        return Err(Errno::TransactionInvalid);
    }

    let mut prev_outputs = vec![TxOut::default(); tx.inputs.len()];
    for (i, point) in tx.input_pts().enumerate() {
        if view.is_spent(&point) {
            trace!(
                "add_new: tx input is spent, txid: {txid}, prevout: [{}]:{}",
                point.n,
                point.hash
            );
            return Err(Errno::TransactionConflictingInput);
        }
        if let Some(output) = view.get_unspent(&point) {
            prev_outputs[i] = output;
        }
    }

    chain.get_tx_unspent(fork, &tx.inputs, &mut prev_outputs)?;

    let mut value_in = 0u64;
    for (i, output) in prev_outputs.iter().enumerate() {
        if output.is_null() {
            let prev_txid = tx.inputs[i].prev_out.hash;
            if !view.exists(&prev_txid) && !chain.exists_tx(&prev_txid) {
                trace!("add_new: missing prev tx, txid: {txid}, prev: {prev_txid}");
                return Err(Errno::MissingPrev);
            }
            trace!(
                "add_new: unspent not found, txid: {txid}, prevout: [{}]:{}",
                tx.inputs[i].prev_out.n,
                prev_txid
            );
            return Err(Errno::TransactionConflictingInput);
        }
        value_in += output.amount;
    }

    core.verify_transaction(&tx, &prev_outputs, fork_height, fork)?;

    let dest_in = prev_outputs[0].dest;
    let entry = PooledTx::new(AssembledTx::new(tx, -1, dest_in, value_in), seq);
    if !view.add_entry(entry) {
        trace!("add_new: view add entry fail, txid: {txid}");
        return Err(Errno::NotFound);
    }
    Ok(())
}
