use std::collections::HashSet;

use forknet_types::H256;

use crate::orphan::OrphanPool;

fn h(n: u64) -> H256 {
    H256::from_u64(n)
}

#[test]
fn add_and_get_next() {
    let mut pool = OrphanPool::default();
    pool.add_new(h(1), h(2));
    pool.add_new(h(1), h(3));
    pool.add_new(h(2), h(4));

    assert_eq!(pool.len(), 3);
    assert_eq!(pool.get_next(&h(1)), vec![h(2), h(3)]);
    assert!(pool.get_next(&h(9)).is_empty());
}

#[test]
fn remove_erases_all_edges_to_hash() {
    let mut pool = OrphanPool::default();
    pool.add_new(h(1), h(5));
    pool.add_new(h(2), h(5));
    pool.add_new(h(1), h(6));

    pool.remove(&h(5));
    assert_eq!(pool.len(), 1);
    assert_eq!(pool.get_next(&h(1)), vec![h(6)]);
    assert!(pool.get_next(&h(2)).is_empty());
}

#[test]
fn remove_branch_returns_descendants() {
    let mut pool = OrphanPool::default();
    // 1 -> 2 -> 4, 1 -> 3
    pool.add_new(h(1), h(2));
    pool.add_new(h(1), h(3));
    pool.add_new(h(2), h(4));

    let branch = pool.remove_branch(&h(1));
    let set: HashSet<H256> = branch.into_iter().collect();
    assert_eq!(set, HashSet::from_iter([h(2), h(3), h(4)]));
    assert!(pool.is_empty());
}

#[test]
fn remove_branch_survives_cycles() {
    let mut pool = OrphanPool::default();
    // a malicious peer can claim contradictory parents
    pool.add_new(h(1), h(2));
    pool.add_new(h(2), h(1));
    pool.add_new(h(2), h(3));

    let branch = pool.remove_branch(&h(1));
    let set: HashSet<H256> = branch.into_iter().collect();
    assert_eq!(set, HashSet::from_iter([h(1), h(2), h(3)]));
    assert!(pool.is_empty());
}

#[test]
fn get_next_dedup_shares_the_seen_set() {
    let mut pool = OrphanPool::default();
    pool.add_new(h(1), h(2));
    pool.add_new(h(3), h(2));

    let mut seen = HashSet::new();
    assert_eq!(pool.get_next_dedup(&h(1), &mut seen), vec![h(2)]);
    assert!(pool.get_next_dedup(&h(3), &mut seen).is_empty());
}
