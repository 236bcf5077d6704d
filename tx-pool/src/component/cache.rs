use std::collections::BTreeMap;

use forknet_types::{Block, Transaction, H256};

/// Pre-arranged block templates keyed by the parent block hash.
///
/// Because block hashes lead with their height, the highest map key names
/// the newest height; everything more than `height_interval` heights below
/// it is dropped on insert.
#[derive(Clone, Debug, Default)]
pub struct TxCache {
    height_interval: u32,
    cache: BTreeMap<H256, Vec<Transaction>>,
}

impl TxCache {
    pub fn new(height_interval: u32) -> Self {
        TxCache {
            height_interval,
            cache: BTreeMap::new(),
        }
    }

    pub fn exists(&self, hash: &H256) -> bool {
        self.cache.contains_key(hash)
    }

    pub fn add_new(&mut self, hash: H256, vtx: Vec<Transaction>) {
        self.cache.insert(hash, vtx);

        let upper_height = self
            .cache
            .keys()
            .next_back()
            .map(Block::height_of_hash)
            .expect("just inserted");
        if upper_height > self.height_interval {
            let lower_height = upper_height - (self.height_interval - 1);
            self.cache
                .retain(|hash, _| Block::height_of_hash(hash) >= lower_height);
        }
    }

    pub fn retrieve(&self, hash: &H256) -> Option<&Vec<Transaction>> {
        self.cache.get(hash)
    }

    pub fn remove(&mut self, hash: &H256) {
        self.cache.remove(hash);
    }

    pub fn clear(&mut self) {
        self.cache.clear();
    }
}
