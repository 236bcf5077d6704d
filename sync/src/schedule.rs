use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};

use forknet_logger::{debug, warn};
use forknet_systemtime::unix_time;
use forknet_types::{Block, Inv, InvKind, PeerNonce, Transaction, H256};
use forknet_util::LinkedHashSet;
use thiserror::Error;

use crate::orphan::OrphanPool;

/// Global cap on tracked invs per fork.
pub const MAX_INV_COUNT: usize = 1024 * 256;
/// Per-peer cap on pending block invs.
pub const MAX_PEER_BLOCK_INV_COUNT: usize = 1024;
/// Per-peer cap on pending tx invs.
pub const MAX_PEER_TX_INV_COUNT: usize = 1024 * 256;
/// Fetch attempts before an inv is abandoned.
pub const MAX_REGETDATA_COUNT: u32 = 10;
/// Seconds a re-requested inv may sit unanswered.
pub const MAX_INV_WAIT_TIME: u64 = 3600;
/// Seconds a received object may sit unconsumed.
pub const MAX_OBJ_WAIT_TIME: u64 = 7200;
/// Shortened clear time of repeat-mint blocks.
pub const MAX_REPEAT_BLOCK_TIME: u64 = 180;
/// Repeat mints from one peer at one height that trigger misbehavior.
pub const MAX_REPEAT_BLOCK_COUNT: usize = 4;

/// The peer made no progress and cannot: its inventory is fully received
/// yet saturated. The caller should treat it as misbehaving.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("peer inventory saturated without progress")]
pub struct ScheduleFault;

/// Outcome of one block scheduling round.
#[derive(Debug, Default, PartialEq)]
pub struct BlockInvPlan {
    pub invs: Vec<Inv>,
    /// The peer is idle and its get-blocks pacing allows another locator
    /// roundtrip.
    pub missing_prev: bool,
    /// The peer advertised no blocks at all.
    pub empty: bool,
}

/// Outcome of one tx scheduling round.
#[derive(Debug, Default, PartialEq)]
pub struct TxInvPlan {
    pub invs: Vec<Inv>,
    /// Everything the peer advertised has been received.
    pub received_all: bool,
}

#[derive(Debug)]
enum InvObject {
    Block(Box<Block>),
    Tx(Transaction),
}

#[derive(Debug, Default)]
struct InvState {
    assigned: Option<PeerNonce>,
    received: Option<InvObject>,
    known_peers: HashSet<PeerNonce>,
    recv_inv_time: u64,
    recv_obj_time: u64,
    clear_obj_time: u64,
    get_data_count: u32,
    repeat_mint_block: bool,
}

impl InvState {
    fn is_received(&self) -> bool {
        self.received.is_some()
    }

    fn inv_expired(&self, now: u64) -> bool {
        self.get_data_count >= MAX_REGETDATA_COUNT
            || (self.get_data_count >= 1 && now.saturating_sub(self.recv_inv_time) >= MAX_INV_WAIT_TIME)
            || now.saturating_sub(self.recv_inv_time) >= MAX_INV_WAIT_TIME * 12
    }
}

#[derive(Debug, Default)]
struct InvPeerKindState {
    known: LinkedHashSet<H256>,
    assigned: HashSet<H256>,
    next_get_blocks_time: u64,
    repeat: HashMap<u32, HashSet<H256>>,
}

/// Per-peer inventory bookkeeping within one fork.
#[derive(Debug, Default)]
struct InvPeer {
    // index 0: tx, index 1: block
    kinds: [InvPeerKindState; 2],
    locator_depth: H256,
    inv_height: i64,
    inv_block: H256,
}

fn kind_index(kind: InvKind) -> usize {
    match kind {
        InvKind::Block => 1,
        _ => 0,
    }
}

impl InvPeer {
    fn known(&self, kind: InvKind) -> &LinkedHashSet<H256> {
        &self.kinds[kind_index(kind)].known
    }

    fn count(&self, kind: InvKind) -> usize {
        self.kinds[kind_index(kind)].known.len()
    }

    fn is_empty(&self, kind: InvKind) -> bool {
        self.kinds[kind_index(kind)].known.is_empty()
    }

    fn known_invs(&self) -> Vec<Inv> {
        let mut invs: Vec<Inv> = self.kinds[1]
            .known
            .iter()
            .map(|hash| Inv::block(*hash))
            .collect();
        invs.extend(self.kinds[0].known.iter().map(|hash| Inv::tx(*hash)));
        invs
    }

    /// Appends the inv at the back, moving it there when already known.
    fn add_new_inv(&mut self, inv: &Inv) {
        let state = &mut self.kinds[kind_index(inv.kind)];
        state.known.remove(&inv.hash);
        state.known.insert(inv.hash);
    }

    fn remove_inv(&mut self, inv: &Inv) {
        let state = &mut self.kinds[kind_index(inv.kind)];
        state.known.remove(&inv.hash);
        state.assigned.remove(&inv.hash);
        if inv.kind == InvKind::Block {
            let height = Block::height_of_hash(&inv.hash);
            if let Some(set) = state.repeat.get_mut(&height) {
                set.remove(&inv.hash);
                if set.is_empty() {
                    state.repeat.remove(&height);
                }
            }
        }
    }

    fn known_inv_exists(&self, inv: &Inv) -> bool {
        self.kinds[kind_index(inv.kind)].known.contains(&inv.hash)
    }

    fn assign(&mut self, inv: &Inv) {
        self.kinds[kind_index(inv.kind)].assigned.insert(inv.hash);
    }

    fn completed(&mut self, inv: &Inv) {
        self.kinds[kind_index(inv.kind)].assigned.remove(&inv.hash);
    }

    fn is_assigned(&self) -> bool {
        !self.kinds[0].assigned.is_empty() || !self.kinds[1].assigned.is_empty()
    }

    fn locator_inv_block(&self) -> Option<(u32, H256)> {
        if self.inv_height <= 0 || self.inv_block.is_zero() {
            None
        } else {
            Some((self.inv_height as u32, self.inv_block))
        }
    }

    fn set_locator_inv_block(&mut self, height: u32, hash: H256, next: Option<H256>) {
        if i64::from(height) >= self.inv_height {
            self.inv_height = i64::from(height);
            self.inv_block = hash;
        } else if next.is_none() && self.inv_block.is_zero() {
            self.inv_height = i64::from(height);
            self.inv_block = hash;
        } else {
            self.inv_height -= 1;
            self.inv_block = H256::zero();
        }
    }

    fn set_next_get_blocks_time(&mut self, wait: u64) {
        self.kinds[kind_index(InvKind::Block)].next_get_blocks_time = unix_time() + wait;
    }

    fn check_next_get_blocks_time(&self) -> bool {
        unix_time() >= self.kinds[kind_index(InvKind::Block)].next_get_blocks_time
    }

    /// Records a repeat mint; returns how many distinct repeats this peer
    /// has produced at that height.
    fn add_repeat_block(&mut self, hash: &H256) -> usize {
        if !self.known_inv_exists(&Inv::block(*hash)) {
            return 0;
        }
        let height = Block::height_of_hash(hash);
        let set = self.kinds[kind_index(InvKind::Block)]
            .repeat
            .entry(height)
            .or_default();
        set.insert(*hash);
        set.len()
    }
}

/// Per-fork inventory scheduler.
///
/// Tracks which peer advertised which object, hands out at most one batch
/// of fetch work per peer per round, expires stale invs lazily at schedule
/// time, and keeps the orphan indexes that let the channel stitch chains
/// back together. Never touches I/O; thread safety is the caller's lock.
#[derive(Default, Debug)]
pub struct Schedule {
    orphan_block: OrphanPool,
    orphan_tx: OrphanPool,
    peers: HashMap<PeerNonce, InvPeer>,
    states: BTreeMap<Inv, InvState>,
    miss_prev_tx: BTreeSet<Inv>,
    // ref block -> (fork, block); index only, consumed by consensus
    ref_blocks: Vec<(H256, (H256, H256))>,
    // height -> (hash, source): 1 = received from peers, 0 = mined locally
    height_blocks: BTreeMap<u32, Vec<(H256, u8)>>,
    local_pow_blocks: BTreeMap<u32, Block>,
}

impl Schedule {
    pub fn new() -> Self {
        Schedule::default()
    }

    pub fn exists(&self, inv: &Inv) -> bool {
        self.states.contains_key(inv)
    }

    pub fn add_peer(&mut self, nonce: PeerNonce) {
        self.peers.entry(nonce).or_default();
    }

    /// True when the inv is already tracked; additionally queues it as a
    /// missing prerequisite while its body has not arrived.
    pub fn check_prev_tx_inv(&mut self, inv: Inv) -> bool {
        match self.states.get(&inv) {
            Some(state) => {
                if !state.is_received() {
                    self.miss_prev_tx.insert(inv);
                }
                true
            }
            None => {
                self.miss_prev_tx.insert(inv);
                false
            }
        }
    }

    pub fn get_known_peers(&self, inv: &Inv) -> HashSet<PeerNonce> {
        self.states
            .get(inv)
            .map(|state| state.known_peers.clone())
            .unwrap_or_default()
    }

    /// Unregisters a peer. Invs only it knew disappear; invs it was
    /// fetching are unassigned, and the other peers that know them are
    /// returned for rescheduling.
    pub fn remove_peer(&mut self, nonce: PeerNonce) -> HashSet<PeerNonce> {
        let mut sched_peers = HashSet::new();
        let peer = match self.peers.remove(&nonce) {
            Some(peer) => peer,
            None => return sched_peers,
        };
        for inv in peer.known_invs() {
            if let Some(state) = self.states.get_mut(&inv) {
                state.known_peers.remove(&nonce);
                if state.known_peers.is_empty() {
                    self.remove_orphan(&inv);
                    self.miss_prev_tx.remove(&inv);
                    self.states.remove(&inv);
                } else if state.assigned == Some(nonce) {
                    state.assigned = None;
                    state.received = None;
                    sched_peers.extend(state.known_peers.iter().copied());
                }
            }
        }
        sched_peers
    }

    /// Whether peer `nonce` may take one more inv of `kind` without
    /// blowing a cap.
    pub fn check_add_inv_idle_location(&mut self, nonce: PeerNonce, kind: InvKind) -> bool {
        if self.states.len() >= MAX_INV_COUNT {
            return false;
        }
        let cap = if kind == InvKind::Tx {
            MAX_PEER_TX_INV_COUNT
        } else {
            MAX_PEER_BLOCK_INV_COUNT
        };
        self.peers.entry(nonce).or_default().count(kind) < cap
    }

    pub fn add_new_inv(&mut self, inv: Inv, nonce: PeerNonce) -> bool {
        if !self.check_add_inv_idle_location(nonce, inv.kind) {
            return false;
        }
        let state = self.states.entry(inv).or_default();
        state.known_peers.insert(nonce);
        if state.recv_inv_time == 0 {
            state.recv_inv_time = unix_time();
        }
        self.peers.entry(nonce).or_default().add_new_inv(&inv);
        true
    }

    /// Forgets the inv everywhere. Returns the peers that knew it, or
    /// `None` when it was not tracked.
    pub fn remove_inv(&mut self, inv: &Inv) -> Option<HashSet<PeerNonce>> {
        let state = self.states.remove(inv)?;
        for nonce in &state.known_peers {
            if let Some(peer) = self.peers.get_mut(nonce) {
                peer.remove_inv(inv);
            }
        }
        if state.is_received() {
            if let Some(InvObject::Block(block)) = &state.received {
                if block.is_primary() && block.is_proof_of_work() {
                    self.remove_height_block(block.height, &inv.hash);
                }
            }
            self.remove_orphan(inv);
        }
        self.miss_prev_tx.remove(inv);
        Some(state.known_peers)
    }

    /// Stores a block body. Succeeds only when `nonce` holds the
    /// assignment and nothing has been received yet; returns the other
    /// peers to reschedule.
    pub fn receive_block(
        &mut self,
        nonce: PeerNonce,
        hash: &H256,
        block: Block,
    ) -> Option<HashSet<PeerNonce>> {
        let inv = Inv::block(*hash);
        let state = self.states.get_mut(&inv)?;
        if state.assigned != Some(nonce) || state.is_received() {
            return None;
        }
        let is_pow = block.is_primary() && block.is_proof_of_work();
        let height = block.height;
        state.received = Some(InvObject::Block(Box::new(block)));
        state.recv_obj_time = unix_time();
        state.clear_obj_time = unix_time() + MAX_OBJ_WAIT_TIME;
        let sched_peers = state.known_peers.clone();
        if let Some(peer) = self.peers.get_mut(&nonce) {
            peer.completed(&inv);
        }
        if is_pow {
            self.height_blocks
                .entry(height)
                .or_default()
                .push((*hash, 1));
        }
        Some(sched_peers)
    }

    pub fn receive_tx(
        &mut self,
        nonce: PeerNonce,
        txid: &H256,
        tx: Transaction,
    ) -> Option<HashSet<PeerNonce>> {
        let inv = Inv::tx(*txid);
        let state = self.states.get_mut(&inv)?;
        if state.assigned != Some(nonce) || state.is_received() {
            return None;
        }
        state.received = Some(InvObject::Tx(tx));
        state.recv_obj_time = unix_time();
        state.clear_obj_time = unix_time() + MAX_OBJ_WAIT_TIME;
        let sched_peers = state.known_peers.clone();
        if let Some(peer) = self.peers.get_mut(&nonce) {
            peer.completed(&inv);
        }
        self.miss_prev_tx.remove(&inv);
        Some(sched_peers)
    }

    /// The received block body and the peer that supplied it.
    pub fn get_block(&self, hash: &H256) -> Option<(&Block, PeerNonce)> {
        let state = self.states.get(&Inv::block(*hash))?;
        match (&state.received, state.assigned) {
            (Some(InvObject::Block(block)), Some(nonce)) => Some((block.as_ref(), nonce)),
            _ => None,
        }
    }

    pub fn get_transaction(&self, txid: &H256) -> Option<(&Transaction, PeerNonce)> {
        let state = self.states.get(&Inv::tx(*txid))?;
        match (&state.received, state.assigned) {
            (Some(InvObject::Tx(tx)), Some(nonce)) => Some((tx, nonce)),
            _ => None,
        }
    }

    pub fn add_orphan_block_prev(&mut self, hash: &H256, prev: &H256) {
        self.orphan_block.add_new(*prev, *hash);
    }

    pub fn add_orphan_tx_prev(&mut self, txid: &H256, prev: &H256) {
        self.orphan_tx.add_new(*prev, *txid);
    }

    pub fn get_next_block(&self, hash: &H256) -> Vec<H256> {
        self.orphan_block.get_next(hash)
    }

    pub fn get_next_tx(&self, txid: &H256, seen: &mut HashSet<H256>) -> Vec<H256> {
        self.orphan_tx.get_next_dedup(txid, seen)
    }

    /// Deletes the block inv and everything reachable from it through the
    /// orphan index; returns the peers that supplied any of it.
    pub fn invalidate_block(&mut self, hash: &H256) -> HashSet<PeerNonce> {
        let mut misbehave = HashSet::new();
        for invalid in self.orphan_block.remove_branch(hash) {
            let inv = Inv::block(invalid);
            if let Some(state) = self.states.remove(&inv) {
                for nonce in &state.known_peers {
                    if let Some(peer) = self.peers.get_mut(nonce) {
                        peer.remove_inv(&inv);
                    }
                }
                misbehave.extend(state.known_peers);
            }
        }
        if let Some(known) = self.remove_inv(&Inv::block(*hash)) {
            misbehave.extend(known);
        }
        misbehave
    }

    pub fn invalidate_tx(&mut self, txid: &H256) -> HashSet<PeerNonce> {
        let mut misbehave = HashSet::new();
        for invalid in self.orphan_tx.remove_branch(txid) {
            let inv = Inv::tx(invalid);
            if let Some(state) = self.states.remove(&inv) {
                for nonce in &state.known_peers {
                    if let Some(peer) = self.peers.get_mut(nonce) {
                        peer.remove_inv(&inv);
                    }
                }
                self.miss_prev_tx.remove(&inv);
                misbehave.extend(state.known_peers);
            }
        }
        if let Some(known) = self.remove_inv(&Inv::tx(*txid)) {
            misbehave.extend(known);
        }
        misbehave
    }

    /// Picks up to `max` block invs for the peer to fetch.
    pub fn schedule_block_inv(
        &mut self,
        nonce: PeerNonce,
        max: usize,
    ) -> Result<BlockInvPlan, ScheduleFault> {
        let mut plan = BlockInvPlan {
            empty: true,
            ..Default::default()
        };
        if !self.peers.contains_key(&nonce) {
            return Ok(plan);
        }
        plan.empty = self.peers[&nonce].is_empty(InvKind::Block);
        if self.peers[&nonce].is_assigned() {
            return Ok(plan);
        }

        let (invs, received_all, progressed) = self.schedule_known_inv(nonce, InvKind::Block, max);
        plan.invs = invs;
        if !progressed {
            if received_all
                && self.peers[&nonce].check_next_get_blocks_time()
                && self.check_add_inv_idle_location(nonce, InvKind::Block)
            {
                plan.missing_prev = true;
            }
            if received_all && self.peers[&nonce].count(InvKind::Block) >= MAX_PEER_BLOCK_INV_COUNT
            {
                return Err(ScheduleFault);
            }
        } else if plan.empty && self.peers[&nonce].check_next_get_blocks_time() {
            plan.missing_prev = true;
        }
        Ok(plan)
    }

    /// Picks up to `max` tx invs, missing-prerequisite invs first.
    pub fn schedule_tx_inv(
        &mut self,
        nonce: PeerNonce,
        max: usize,
    ) -> Result<TxInvPlan, ScheduleFault> {
        let mut plan = TxInvPlan::default();
        if !self.peers.contains_key(&nonce) || self.peers[&nonce].is_assigned() {
            return Ok(plan);
        }
        let (invs, received_all, progressed) = self.schedule_known_inv(nonce, InvKind::Tx, max);
        plan.invs = invs;
        plan.received_all = received_all;
        if !progressed {
            if received_all && self.peers[&nonce].count(InvKind::Tx) >= MAX_PEER_TX_INV_COUNT {
                return Err(ScheduleFault);
            }
        } else if self.peers[&nonce].is_empty(InvKind::Tx) {
            plan.received_all = true;
        }
        Ok(plan)
    }

    /// Walks the peer's inv list in arrival order, assigning idle entries
    /// and expiring stale ones. Returns `(assigned, received_all,
    /// progressed)` where `progressed` is false only when nothing could be
    /// assigned from a non-empty list.
    fn schedule_known_inv(
        &mut self,
        nonce: PeerNonce,
        kind: InvKind,
        max: usize,
    ) -> (Vec<Inv>, bool, bool) {
        let now = unix_time();
        let mut invs: Vec<Inv> = Vec::new();
        let mut remove_inv: BTreeSet<Inv> = BTreeSet::new();
        let mut remove_peer_inv: Vec<Inv> = Vec::new();
        let mut received = 0usize;

        let Schedule {
            peers,
            states,
            miss_prev_tx,
            ..
        } = self;
        let peer = match peers.get_mut(&nonce) {
            Some(peer) => peer,
            None => return (invs, false, true),
        };

        if kind == InvKind::Tx && !miss_prev_tx.is_empty() {
            let mut drop_missing: Vec<Inv> = Vec::new();
            for inv in miss_prev_tx.iter() {
                match states.get_mut(inv) {
                    Some(state) => {
                        if state.assigned.is_none() && peer.known_inv_exists(inv) {
                            if state.inv_expired(now) {
                                debug!(
                                    "schedule_known_inv: inv timeout, peer nonce: {nonce}, inv: {inv}, getcount: {}, waittime: {}",
                                    state.get_data_count,
                                    now.saturating_sub(state.recv_inv_time)
                                );
                                remove_inv.insert(*inv);
                                continue;
                            }
                            state.assigned = Some(nonce);
                            state.get_data_count += 1;
                            peer.assign(inv);
                            invs.push(*inv);
                            if invs.len() >= max {
                                break;
                            }
                        }
                    }
                    None => drop_missing.push(*inv),
                }
            }
            for inv in drop_missing {
                miss_prev_tx.remove(&inv);
            }
        }

        let assigned_before = invs.len();
        if invs.len() < max {
            for hash in peer.known(kind).iter() {
                let inv = Inv::new(kind, *hash);
                match states.get_mut(&inv) {
                    Some(state) => {
                        if state.assigned.is_none() {
                            if state.inv_expired(now) {
                                debug!(
                                    "schedule_known_inv: inv timeout, peer nonce: {nonce}, inv: {inv}, getcount: {}, waittime: {}",
                                    state.get_data_count,
                                    now.saturating_sub(state.recv_inv_time)
                                );
                                remove_inv.insert(inv);
                                continue;
                            }
                            state.assigned = Some(nonce);
                            state.get_data_count += 1;
                            invs.push(inv);
                            if invs.len() >= max {
                                break;
                            }
                        } else if state.is_received() {
                            if now >= state.clear_obj_time {
                                debug!(
                                    "schedule_known_inv: object timeout, peer nonce: {nonce}, inv: {inv}, waittime: {}",
                                    now.saturating_sub(state.recv_obj_time)
                                );
                                remove_inv.insert(inv);
                                continue;
                            }
                            received += 1;
                        }
                    }
                    None => remove_peer_inv.push(inv),
                }
            }
            // the walk above cannot touch the peer's assigned-set; do it now
            for inv in &invs[assigned_before..] {
                peer.assign(inv);
            }
        }

        for inv in &remove_inv {
            self.remove_inv(inv);
        }
        if let Some(peer) = self.peers.get_mut(&nonce) {
            for inv in &remove_peer_inv {
                peer.remove_inv(inv);
            }
        }

        let list_len = self.peers[&nonce].count(kind);
        let received_all = received == list_len && received != 0;
        let progressed = !invs.is_empty() || list_len == 0;
        (invs, received_all, progressed)
    }

    /// Unassigns an inv a peer failed to deliver. When the peer was the
    /// only knower the inv is dropped entirely.
    pub fn cancel_assigned_inv(&mut self, nonce: PeerNonce, inv: &Inv) -> bool {
        let state = match self.states.get_mut(inv) {
            Some(state) => state,
            None => {
                warn!("cancel_assigned_inv: find inv fail, peer nonce: {nonce}, inv: {inv}");
                return false;
            }
        };
        if state.assigned != Some(nonce) {
            warn!("cancel_assigned_inv: not assigned to peer, peer nonce: {nonce}, inv: {inv}");
            return false;
        }
        if !state.is_received() {
            state.assigned = None;
            state.known_peers.remove(&nonce);
            if state.known_peers.is_empty() {
                self.remove_orphan(inv);
                self.miss_prev_tx.remove(inv);
                self.states.remove(inv);
            }
        }
        match self.peers.get_mut(&nonce) {
            Some(peer) => {
                peer.remove_inv(inv);
                true
            }
            None => {
                warn!("cancel_assigned_inv: find peer fail, peer nonce: {nonce}, inv: {inv}");
                false
            }
        }
    }

    pub fn get_locator_depth(&self, nonce: PeerNonce) -> Option<H256> {
        self.peers.get(&nonce).map(|peer| peer.locator_depth)
    }

    pub fn set_locator_depth(&mut self, nonce: PeerNonce, depth: H256) {
        self.peers.entry(nonce).or_default().locator_depth = depth;
    }

    /// Highest shared on-chain block discovered for this peer.
    pub fn get_locator_inv_block(&self, nonce: PeerNonce) -> Option<(u32, H256)> {
        self.peers.get(&nonce).and_then(InvPeer::locator_inv_block)
    }

    pub fn set_locator_inv_block(
        &mut self,
        nonce: PeerNonce,
        height: u32,
        hash: H256,
        next: Option<H256>,
    ) {
        self.peers
            .entry(nonce)
            .or_default()
            .set_locator_inv_block(height, hash, next);
    }

    /// Clears the recorded locator so the next roundtrip sends a full
    /// locator again.
    pub fn reset_locator_inv_block(&mut self, nonce: PeerNonce) {
        self.set_locator_inv_block(nonce, 0, H256::zero(), Some(H256::from_u64(1)));
    }

    pub fn set_next_get_blocks_time(&mut self, nonce: PeerNonce, wait: u64) {
        self.peers.entry(nonce).or_default().set_next_get_blocks_time(wait);
    }

    /// Flags a received block as a duplicate mint; false once the peer has
    /// produced [`MAX_REPEAT_BLOCK_COUNT`] of them at one height.
    pub fn set_repeat_block(&mut self, nonce: PeerNonce, hash: &H256) -> bool {
        if let Some(state) = self.states.get_mut(&Inv::block(*hash)) {
            state.repeat_mint_block = true;
            state.clear_obj_time = unix_time() + MAX_REPEAT_BLOCK_TIME;
        }
        self.peers.entry(nonce).or_default().add_repeat_block(hash) < MAX_REPEAT_BLOCK_COUNT
    }

    pub fn is_repeat_block(&self, hash: &H256) -> bool {
        self.states
            .get(&Inv::block(*hash))
            .map(|state| state.is_received() && state.repeat_mint_block)
            .unwrap_or(false)
    }

    /// Postpones the clear time of a tracked inv.
    pub fn set_delayed_clear(&mut self, inv: &Inv, delay: u64) -> bool {
        match self.states.get_mut(inv) {
            Some(state) => {
                state.clear_obj_time = unix_time() + delay;
                true
            }
            None => false,
        }
    }

    pub fn add_ref_block(&mut self, ref_block: &H256, fork: &H256, block: &H256) {
        self.ref_blocks.push((*ref_block, (*fork, *block)));
    }

    pub fn remove_ref_block(&mut self, block: &H256) {
        self.ref_blocks.retain(|(_, (_, hash))| hash != block);
    }

    pub fn get_next_ref_block(&self, ref_block: &H256) -> Vec<(H256, H256)> {
        self.ref_blocks
            .iter()
            .filter(|(key, _)| key == ref_block)
            .map(|(_, pair)| *pair)
            .collect()
    }

    /// Caches a locally mined primary PoW block under its height, evicting
    /// heights below `height - 32`. Returns whether the block was first at
    /// its height, or `None` when the height is already occupied locally.
    pub fn add_cache_local_pow_block(&mut self, block: Block) -> Option<bool> {
        let height = block.height;

        if let Some(floor) = height.checked_sub(32) {
            let stale: Vec<(u32, H256)> = self
                .local_pow_blocks
                .range(..=floor)
                .map(|(cached_height, cached)| (*cached_height, cached.hash()))
                .collect();
            for (cached_height, hash) in stale {
                self.remove_height_block(cached_height, &hash);
                self.local_pow_blocks.remove(&cached_height);
            }
        }

        if self.local_pow_blocks.contains_key(&height) {
            return None;
        }
        let hash = block.hash();
        self.local_pow_blocks.insert(height, block);
        let slot = self.height_blocks.entry(height).or_default();
        let first = slot.is_empty();
        slot.push((hash, 0));
        Some(first)
    }

    pub fn check_cache_local_pow_block(&self, height: u32) -> bool {
        self.local_pow_blocks.contains_key(&height)
    }

    pub fn get_cache_local_pow_block(&self, hash: &H256) -> Option<&Block> {
        let height = Block::height_of_hash(hash);
        self.local_pow_blocks
            .get(&height)
            .filter(|block| block.hash() == *hash)
    }

    pub fn remove_cache_local_pow_block(&mut self, hash: &H256) {
        let height = Block::height_of_hash(hash);
        if let Some(block) = self.local_pow_blocks.get(&height) {
            if block.hash() == *hash {
                self.remove_height_block(height, hash);
                self.local_pow_blocks.remove(&height);
            }
        }
    }

    /// First PoW block seen at the hash's height, local or received.
    pub fn get_cache_pow_block(&self, hash: &H256) -> Option<Block> {
        let height = Block::height_of_hash(hash);
        let slot = self.height_blocks.get(&height)?;
        let (first_hash, source) = slot.first()?;
        if *source == 1 {
            if first_hash == hash {
                return self.get_block(hash).map(|(block, _)| block.clone());
            }
            None
        } else {
            self.get_cache_local_pow_block(hash).cloned()
        }
    }

    pub fn get_first_cache_pow_block(&self, height: u32) -> Option<H256> {
        self.height_blocks
            .get(&height)
            .and_then(|slot| slot.first())
            .map(|(hash, _)| *hash)
    }

    fn remove_height_block(&mut self, height: u32, hash: &H256) {
        if let Some(slot) = self.height_blocks.get_mut(&height) {
            slot.retain(|(cached, _)| cached != hash);
            if slot.is_empty() {
                self.height_blocks.remove(&height);
            }
        }
    }

    fn remove_orphan(&mut self, inv: &Inv) {
        match inv.kind {
            InvKind::Tx => self.orphan_tx.remove(&inv.hash),
            InvKind::Block => {
                self.orphan_block.remove(&inv.hash);
                self.remove_ref_block(&inv.hash);
            }
            InvKind::Error => {}
        }
    }
}
