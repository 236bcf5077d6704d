use forknet_types::{AssembledTx, Destination, Encode, OutPoint, Transaction, H256};

/// Bits of the sequence number that hold the dependency slot.
pub(crate) const SEQ_SLOT_MASK: u64 = 0xFF_FFFF;
/// Shift of the pool counter above the slot bits.
pub(crate) const SEQ_COUNTER_SHIFT: u32 = 24;

/// A pool entry.
///
/// `sequence_number` is the pool's strict order: the upper 40 bits come
/// from a monotonic counter, the lower 24 encode the dependency slot that
/// lets parents sort before the children that spend them.
/// `next_sequence_number` is the counter a slot-owning entry hands out to
/// late-arriving ancestors.
#[derive(Clone, Debug)]
pub struct PooledTx {
    pub txid: H256,
    pub assembled: AssembledTx,
    pub sequence_number: u64,
    pub serialized_size: usize,
    pub next_sequence_number: u64,
}

impl PooledTx {
    pub fn new(assembled: AssembledTx, sequence_number: u64) -> Self {
        let txid = assembled.tx.hash();
        let serialized_size = assembled.tx.encoded_size();
        PooledTx {
            txid,
            assembled,
            sequence_number,
            serialized_size,
            next_sequence_number: 0,
        }
    }

    pub fn tx(&self) -> &Transaction {
        &self.assembled.tx
    }

    pub fn dest_in(&self) -> Destination {
        self.assembled.dest_in
    }

    pub fn value_in(&self) -> u64 {
        self.assembled.value_in
    }

    pub fn input_pts(&self) -> impl Iterator<Item = OutPoint> + '_ {
        self.assembled.tx.input_pts()
    }
}

/// Secondary-index record of one pool entry.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct TxLink {
    pub hash: H256,
    pub sequence_number: u64,
    pub kind: u16,
}

impl TxLink {
    pub fn new(entry: &PooledTx) -> Self {
        TxLink {
            hash: entry.txid,
            sequence_number: entry.sequence_number,
            kind: entry.tx().typ as u16,
        }
    }

    /// Miner-preference score. Higher kind dominates; within a kind,
    /// earlier entries score higher, so ordering by descending score equals
    /// ordering by (kind desc, sequence asc) without touching floats.
    pub fn score(&self) -> f64 {
        f64::from(self.kind) + 1.0 / (self.sequence_number as f64 + 1.0)
    }
}
