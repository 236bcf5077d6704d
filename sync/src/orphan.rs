use std::collections::{HashMap, HashSet};

use forknet_types::H256;

/// Parent → children multimap of objects whose predecessor has not been
/// seen yet.
#[derive(Default, Debug)]
pub struct OrphanPool {
    by_prev: HashMap<H256, Vec<H256>>,
    len: usize,
}

impl OrphanPool {
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn add_new(&mut self, prev: H256, hash: H256) {
        self.by_prev.entry(prev).or_default().push(hash);
        self.len += 1;
    }

    /// Drops every edge pointing at `hash` (under any parent).
    pub fn remove(&mut self, hash: &H256) {
        let mut removed = 0;
        self.by_prev.retain(|_, children| {
            let before = children.len();
            children.retain(|child| child != hash);
            removed += before - children.len();
            !children.is_empty()
        });
        self.len -= removed;
    }

    /// Children waiting on `prev`.
    pub fn get_next(&self, prev: &H256) -> Vec<H256> {
        self.by_prev.get(prev).cloned().unwrap_or_default()
    }

    /// Like [`OrphanPool::get_next`], filtered through `seen` so a hash is
    /// yielded at most once across calls sharing the set.
    pub fn get_next_dedup(&self, prev: &H256, seen: &mut HashSet<H256>) -> Vec<H256> {
        match self.by_prev.get(prev) {
            Some(children) => children
                .iter()
                .filter(|child| seen.insert(**child))
                .copied()
                .collect(),
            None => Vec::new(),
        }
    }

    pub fn remove_next(&mut self, prev: &H256) {
        if let Some(children) = self.by_prev.remove(prev) {
            self.len -= children.len();
        }
    }

    /// Removes the whole branch reachable from `root` and returns it.
    /// A visited set keeps adversarial parent cycles from looping.
    pub fn remove_branch(&mut self, root: &H256) -> Vec<H256> {
        let mut seen: HashSet<H256> = HashSet::new();
        let mut branch = self.get_next_dedup(root, &mut seen);
        self.remove_next(root);

        let mut i = 0;
        while i < branch.len() {
            let hash = branch[i];
            let next = self.get_next_dedup(&hash, &mut seen);
            branch.extend(next);
            self.remove_next(&hash);
            i += 1;
        }
        branch
    }
}
