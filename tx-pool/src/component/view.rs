use std::collections::{BTreeMap, HashMap, HashSet};

use forknet_logger::{error, trace};
use forknet_types::{Destination, OutPoint, Transaction, TxOut, TxUnspent, H256};

use crate::component::entry::{PooledTx, TxLink, SEQ_COUNTER_SHIFT, SEQ_SLOT_MASK};

/// Fate of an outpoint inside the pool.
#[derive(Clone, Debug, PartialEq)]
pub enum Spent {
    /// Consumed by the pooled transaction with this hash.
    Spent(H256),
    /// Produced by a pooled transaction and still available.
    Unspent(TxOut),
}

impl Spent {
    pub fn is_spent(&self) -> bool {
        matches!(self, Spent::Spent(_))
    }
}

/// The tx-link multi-index: unique by hash, ordered by sequence number and
/// by (kind, sequence).
#[derive(Default, Debug)]
struct TxLinkSet {
    by_hash: HashMap<H256, TxLink>,
    by_seq: BTreeMap<u64, H256>,
    by_kind: BTreeMap<(u16, u64), H256>,
}

impl TxLinkSet {
    fn insert(&mut self, link: TxLink) -> bool {
        if self.by_hash.contains_key(&link.hash) || self.by_seq.contains_key(&link.sequence_number)
        {
            return false;
        }
        self.by_seq.insert(link.sequence_number, link.hash);
        self.by_kind.insert((link.kind, link.sequence_number), link.hash);
        self.by_hash.insert(link.hash, link);
        true
    }

    fn remove(&mut self, hash: &H256) -> Option<TxLink> {
        let link = self.by_hash.remove(hash)?;
        self.by_seq.remove(&link.sequence_number);
        self.by_kind.remove(&(link.kind, link.sequence_number));
        Some(link)
    }

    fn contains(&self, hash: &H256) -> bool {
        self.by_hash.contains_key(hash)
    }

    fn get_seq(&self, seq: u64) -> Option<&H256> {
        self.by_seq.get(&seq)
    }

    fn len(&self) -> usize {
        self.by_hash.len()
    }
}

/// UTXO-consistent pending state of one fork.
///
/// Invariants: every input of every entry points at a `Spent::Spent` record
/// naming that entry; every unconsumed output 0/1 of every entry has a
/// `Spent::Unspent` record; nothing appears in the spent map without its
/// transaction appearing in the link index (or on chain).
#[derive(Default, Debug)]
pub struct TxPoolView {
    txs: HashMap<H256, PooledTx>,
    links: TxLinkSet,
    spent: HashMap<OutPoint, Spent>,
    last_block_hash: H256,
    last_block_time: u32,
}

impl TxPoolView {
    pub fn count(&self) -> usize {
        self.links.len()
    }

    pub fn is_empty(&self) -> bool {
        self.links.len() == 0
    }

    pub fn exists(&self, txid: &H256) -> bool {
        self.links.contains(txid)
    }

    pub fn get(&self, txid: &H256) -> Option<&PooledTx> {
        self.txs.get(txid)
    }

    pub fn get_by_seq(&self, seq: u64) -> Option<&PooledTx> {
        self.links.get_seq(seq).and_then(|hash| self.txs.get(hash))
    }

    pub fn is_spent(&self, out: &OutPoint) -> bool {
        matches!(self.spent.get(out), Some(spent) if spent.is_spent())
    }

    /// The pending unspent output behind `out`, if any.
    pub fn get_unspent(&self, out: &OutPoint) -> Option<TxOut> {
        match self.spent.get(out) {
            Some(Spent::Unspent(output)) if !output.is_null() => Some(*output),
            _ => None,
        }
    }

    /// The pooled spender of `out`, if any.
    pub fn get_spent(&self, out: &OutPoint) -> Option<H256> {
        match self.spent.get(out) {
            Some(Spent::Spent(txid)) => Some(*txid),
            _ => None,
        }
    }

    pub fn set_spent(&mut self, out: OutPoint, spender: H256) {
        self.spent.insert(out, Spent::Spent(spender));
    }

    /// Rewrites `out` as available again, or forgets it when its producing
    /// transaction is not pooled.
    pub fn set_unspent(&mut self, out: &OutPoint) {
        match self.txs.get(&out.hash) {
            Some(entry) => {
                let output = entry.assembled.output(out.n);
                self.spent.insert(*out, Spent::Unspent(output));
            }
            None => {
                self.spent.remove(out);
            }
        }
    }

    pub fn last_block(&self) -> (H256, u32) {
        (self.last_block_hash, self.last_block_time)
    }

    pub fn set_last_block(&mut self, hash: H256, time: u32) {
        self.last_block_hash = hash;
        self.last_block_time = time;
    }

    /// Inventory of pooled tx hashes in sequence order.
    pub fn seq_ids(&self) -> impl Iterator<Item = &H256> {
        self.links.by_seq.values()
    }

    /// Hash-index walk.
    pub fn iter(&self) -> impl Iterator<Item = &PooledTx> {
        self.links.by_hash.keys().filter_map(|hash| self.txs.get(hash))
    }

    /// Entries ordered by descending miner score: kind descending, then
    /// sequence ascending (see [`TxLink::score`]).
    pub fn iter_by_score(&self) -> impl Iterator<Item = &PooledTx> + '_ {
        let mut kinds: Vec<u16> = self
            .links
            .by_kind
            .keys()
            .map(|(kind, _)| *kind)
            .collect();
        kinds.dedup();
        kinds.reverse();
        kinds.into_iter().flat_map(move |kind| {
            self.links
                .by_kind
                .range((kind, 0)..=(kind, u64::MAX))
                .filter_map(move |(_, hash)| self.txs.get(hash))
        })
    }

    /// Takes ownership of `entry` and indexes it. On failure the view is
    /// left without the entry.
    pub fn add_entry(&mut self, entry: PooledTx) -> bool {
        let txid = entry.txid;
        self.txs.insert(txid, entry);
        if self.add_new(&txid) {
            true
        } else {
            self.txs.remove(&txid);
            self.links.remove(&txid);
            false
        }
    }

    /// Indexes the entry stored under `txid`. The entry's sequence number
    /// may be rewritten to slot it before its pooled spenders; ancestors
    /// already pooled with later sequence numbers are re-slotted
    /// recursively.
    fn add_new(&mut self, txid: &H256) -> bool {
        if !self.add_tx_index(txid) {
            error!("add_new: add tx index fail, txid: {txid}");
            return false;
        }

        let (inputs, outputs) = {
            let entry = match self.txs.get(txid) {
                Some(entry) => entry,
                None => return false,
            };
            let inputs: Vec<OutPoint> = entry.input_pts().collect();
            let outputs = [entry.assembled.output(0), entry.assembled.output(1)];
            (inputs, outputs)
        };

        for prev in &inputs {
            self.spent.insert(*prev, Spent::Spent(*txid));
        }
        for (n, output) in outputs.iter().enumerate() {
            if !output.is_null() {
                self.spent
                    .insert(OutPoint::new(*txid, n as u8), Spent::Unspent(*output));
            }
        }

        // Re-slot pooled ancestors that currently sort after this entry.
        let mut pending: Vec<(H256, u64)> = {
            let seq = self.txs[txid].sequence_number;
            inputs.iter().map(|prev| (prev.hash, seq)).collect()
        };
        let mut i = 0;
        while i < pending.len() {
            let (prev_txid, child_seq) = pending[i];
            i += 1;
            let needs_reindex = match self.txs.get(&prev_txid) {
                Some(prev) => prev.sequence_number > child_seq,
                None => false,
            };
            if needs_reindex {
                if !self.add_tx_index(&prev_txid) {
                    error!("add_new: add prev tx index fail, txid: {prev_txid}");
                    return false;
                }
                let prev = &self.txs[&prev_txid];
                let prev_seq = prev.sequence_number;
                pending.extend(prev.input_pts().map(|point| (point.hash, prev_seq)));
            }
        }
        true
    }

    /// (Re)indexes `txid`, choosing a sequence number that sorts it before
    /// any pooled transaction spending one of its outputs.
    fn add_tx_index(&mut self, txid: &H256) -> bool {
        self.links.remove(txid);

        // earliest pooled spender of either output
        let mut min_next: Option<(H256, u64)> = None;
        for n in 0..2u8 {
            if let Some(next_txid) = self.get_spent(&OutPoint::new(*txid, n)) {
                let next = match self.txs.get(&next_txid) {
                    Some(next) => next,
                    None => {
                        error!("add_tx_index: find next tx fail, txid: {next_txid}");
                        return false;
                    }
                };
                if min_next
                    .map(|(_, seq)| seq > next.sequence_number)
                    .unwrap_or(true)
                {
                    min_next = Some((next_txid, next.sequence_number));
                }
            }
        }

        if let Some((min_hash, min_seq)) = min_next {
            // The slot pool belongs to the counter-boundary entry above the
            // earliest spender; a spender that is itself slot-allocated
            // borrows from that root.
            let root_hash = if min_seq & SEQ_SLOT_MASK != 0 {
                let root_seq = ((min_seq >> SEQ_COUNTER_SHIFT) + 1) << SEQ_COUNTER_SHIFT;
                self.links.get_seq(root_seq).copied()
            } else {
                Some(min_hash)
            };
            match root_hash.and_then(|hash| self.txs.get_mut(&hash)) {
                Some(root) => {
                    if root.next_sequence_number == 0 {
                        root.next_sequence_number = root.sequence_number - 1;
                    }
                    let new_seq = root.next_sequence_number;
                    root.next_sequence_number -= 1;
                    if self.links.get_seq(new_seq).is_some() {
                        error!("add_tx_index: new sequence in use, seq: {new_seq}");
                        return false;
                    }
                    self.txs.get_mut(txid).expect("entry present").sequence_number = new_seq;
                }
                None => {
                    // no root entry to borrow from; scan down for a free slot
                    let mut idle = min_seq.wrapping_sub(1);
                    let mut found = false;
                    while idle & SEQ_SLOT_MASK != 0 {
                        if self.links.get_seq(idle).is_none() {
                            found = true;
                            break;
                        }
                        idle -= 1;
                    }
                    if !found {
                        error!("add_tx_index: find idle sequence fail, below: {min_seq}");
                        return false;
                    }
                    self.txs.get_mut(txid).expect("entry present").sequence_number = idle;
                }
            }
        } else if self
            .links
            .get_seq(self.txs[txid].sequence_number)
            .is_some()
        {
            error!(
                "add_tx_index: sequence in use, seq: {}",
                self.txs[txid].sequence_number
            );
            return false;
        }

        let link = TxLink::new(&self.txs[txid]);
        self.links.insert(link)
    }

    /// Drops `txid`, releasing the outpoints it consumed. Spenders of its
    /// outputs are NOT touched; see [`TxPoolView::invalidate_spent`].
    pub fn remove(&mut self, txid: &H256) -> Option<PooledTx> {
        self.links.remove(txid)?;
        let entry = self.txs.remove(txid)?;
        for point in entry.input_pts() {
            self.set_unspent(&point);
        }
        trace!(
            "remove: link index erase, txid: {txid}, seq: {}",
            entry.sequence_number
        );
        Some(entry)
    }

    /// Erases the pooled spender of `out` and, transitively, every pooled
    /// descendant. Removed entries land in `involved` keyed by their
    /// sequence number, children carrying higher keys than parents spending
    /// the same chain of slots get visited exactly once.
    pub fn invalidate_spent(&mut self, out: OutPoint, involved: &mut BTreeMap<u64, PooledTx>) {
        let mut points = vec![out];
        let mut i = 0;
        while i < points.len() {
            let point = points[i];
            i += 1;
            let next_txid = match self.get_spent(&point) {
                Some(txid) if self.txs.contains_key(&txid) => txid,
                _ => {
                    self.spent.remove(&point);
                    continue;
                }
            };
            self.links.remove(&next_txid);
            let next = self.txs.remove(&next_txid).expect("checked above");
            for txin_point in next.input_pts() {
                self.set_unspent(&txin_point);
            }
            for n in 0..2u8 {
                let own = OutPoint::new(next_txid, n);
                if self.is_spent(&own) {
                    points.push(own);
                } else {
                    self.spent.remove(&own);
                }
            }
            involved.insert(next.sequence_number, next);
        }
    }

    /// Pool-only unspents owned by `dest`, skipping `exclude`, up to `max`
    /// (0 = no limit).
    pub fn list_unspent(
        &self,
        dest: &Destination,
        exclude: &HashSet<OutPoint>,
        max: usize,
        out: &mut Vec<TxUnspent>,
    ) {
        let mut count = 0usize;
        for (point, spent) in &self.spent {
            if max != 0 && count >= max {
                break;
            }
            if let Spent::Unspent(output) = spent {
                if !output.is_null() && output.dest == *dest && !exclude.contains(point) {
                    out.push(TxUnspent::new(*point, *output));
                    count += 1;
                }
            }
        }
    }

    /// One deterministic pass over the pool in sequence order, packing
    /// transactions into a block template.
    ///
    /// A transaction later than `block_time` is unfit; so is anything
    /// depending on an unfit ancestor (no orphan tx inside one block). The
    /// walk stops at the first entry that would overflow `max_size`.
    pub fn arrange_block_tx(&self, block_time: u32, max_size: usize) -> (Vec<Transaction>, u64) {
        let mut vtx = Vec::new();
        let mut total_fee = 0u64;
        let mut total_size = 0usize;
        let mut unfit: HashSet<H256> = HashSet::new();

        for hash in self.links.by_seq.values() {
            let entry = match self.txs.get(hash) {
                Some(entry) => entry,
                None => continue,
            };
            if entry.tx().timestamp > block_time {
                unfit.insert(*hash);
                continue;
            }
            if !unfit.is_empty()
                && entry
                    .input_pts()
                    .any(|point| unfit.contains(&point.hash))
            {
                unfit.insert(*hash);
                continue;
            }
            if total_size + entry.serialized_size > max_size {
                break;
            }
            total_size += entry.serialized_size;
            total_fee += entry.tx().tx_fee;
            vtx.push(entry.tx().clone());
        }
        (vtx, total_fee)
    }

    pub fn clear(&mut self) {
        self.txs.clear();
        self.links = TxLinkSet::default();
        self.spent.clear();
    }
}
