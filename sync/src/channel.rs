use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use forknet_channel::{unbounded, RecvTimeoutError, Sender};
use forknet_error::Errno;
use forknet_logger::{debug, error, trace, warn};
use forknet_protocol::{
    Bonus, CloseReason, DataCommand, MsgRsp, MsgRspResult, MsgRspSubType, NodeRole, OutgoingEvent,
    PeerAddress, PeerEvent, PeerNet, ServiceFlags,
};
use forknet_systemtime::unix_time;
use forknet_traits::{BlockChain, CoreProtocol, Dispatcher};
use forknet_tx_pool::TxPool;
use forknet_types::{
    Block, BlockLocator, Inv, InvKind, PeerNonce, Transaction, H256, MAX_INV_COUNT_WIRE,
    MIN_INV_COUNT_WIRE,
};
use parking_lot::{Mutex, RwLock};

use crate::peer::{CheckSynTxInv, NetChannelPeer};
use crate::schedule::{Schedule, MAX_PEER_BLOCK_INV_COUNT};

/// Longest hash trail a get-blocks answer may carry.
pub const MAX_GETBLOCKS_COUNT: usize = 128;
/// Default seconds between get-blocks roundtrips to one peer.
pub const GET_BLOCKS_INTERVAL_DEF_TIME: u64 = 120;
/// Idle interval once a peer reported our chains equal.
pub const GET_BLOCKS_INTERVAL_EQUAL_TIME: u64 = 600;
/// Coalescing delay of the push-tx timer while work is pending.
pub const PUSHTX_TIMEOUT: Duration = Duration::from_secs(1);
/// Push-tx timer period when every fork is fully announced.
pub const SYNTXINV_TIMEOUT: Duration = Duration::from_secs(60);

/// Invs handed to one peer per tx scheduling round.
const MAX_PEER_SCHED_COUNT: usize = 8;

enum TimerSignal {
    Kick,
    Stop,
}

#[derive(Default)]
struct PeerTable {
    peers: HashMap<PeerNonce, NetChannelPeer>,
    unsync: HashMap<H256, HashSet<PeerNonce>>,
}

#[derive(Default)]
struct PushTxState {
    pending: HashSet<H256>,
}

/// The network channel: every peer event funnels through here and turns
/// into schedule mutations, pool pushes, chain submissions, broadcasts or
/// misbehavior reports.
///
/// Lock order is `scheds`, then `push_tx`, then `peer_table`; a lock is
/// never taken while holding one that comes later in that order.
pub struct NetChannel {
    role: NodeRole,
    genesis: H256,
    peer_net: Arc<dyn PeerNet>,
    chain: Arc<dyn BlockChain>,
    tx_pool: Arc<TxPool>,
    dispatcher: Arc<dyn Dispatcher>,
    scheds: Mutex<HashMap<H256, Schedule>>,
    peer_table: RwLock<PeerTable>,
    push_tx: Mutex<PushTxState>,
    timer: Mutex<Option<(Sender<TimerSignal>, thread::JoinHandle<()>)>>,
}

impl NetChannel {
    pub fn new(
        role: NodeRole,
        peer_net: Arc<dyn PeerNet>,
        core: Arc<dyn CoreProtocol>,
        chain: Arc<dyn BlockChain>,
        tx_pool: Arc<TxPool>,
        dispatcher: Arc<dyn Dispatcher>,
    ) -> NetChannel {
        NetChannel {
            role,
            genesis: core.genesis_block_hash(),
            peer_net,
            chain,
            tx_pool,
            dispatcher,
            scheds: Mutex::new(HashMap::new()),
            peer_table: RwLock::new(PeerTable::default()),
            push_tx: Mutex::new(PushTxState::default()),
            timer: Mutex::new(None),
        }
    }

    /// Spawns the push-tx timer thread.
    pub fn start(self: &Arc<Self>) {
        let (sender, receiver) = unbounded();
        let this = Arc::clone(self);
        let handle = thread::Builder::new()
            .name("push-tx".to_string())
            .spawn(move || {
                let mut interval = SYNTXINV_TIMEOUT;
                loop {
                    match receiver.recv_timeout(interval) {
                        Ok(TimerSignal::Stop) | Err(RecvTimeoutError::Disconnected) => break,
                        Ok(TimerSignal::Kick) | Err(RecvTimeoutError::Timeout) => {
                            interval = this.push_tx_cycle();
                        }
                    }
                }
            })
            .expect("spawn push-tx timer thread");
        *self.timer.lock() = Some((sender, handle));
    }

    /// Cancels the timer, joins it, and drops all per-fork state.
    pub fn stop(&self) {
        let timer = self.timer.lock().take();
        if let Some((sender, handle)) = timer {
            let _ = sender.send(TimerSignal::Stop);
            let _ = handle.join();
        }
        self.push_tx.lock().pending.clear();
        self.scheds.lock().clear();
    }

    /// Height of the primary fork tip.
    pub fn primary_chain_height(&self) -> u32 {
        self.chain
            .get_fork_tip(&self.genesis)
            .map(|tip| tip.height)
            .unwrap_or(0)
    }

    /// A fork is synchronized when no connected peer still owes us data
    /// on it.
    pub fn is_fork_synchronized(&self, fork: &H256) -> bool {
        let table = self.peer_table.read();
        table
            .unsync
            .get(fork)
            .map(HashSet::is_empty)
            .unwrap_or(true)
    }

    /// Starts tracking `fork` and announces the subscription to every
    /// connected peer, unless the node role keeps the fork out of scope.
    pub fn subscribe_fork(&self, fork: &H256, _nonce: PeerNonce) {
        {
            let mut scheds = self.scheds.lock();
            if scheds.contains_key(fork) {
                debug!("subscribe_fork: schedule exists, fork: {fork}");
                return;
            }
            scheds.insert(*fork, Schedule::new());
            debug!("subscribe_fork: schedule created, fork: {fork}");
        }

        if !self.role.is_fork_in_scope(fork, &self.genesis) {
            debug!("subscribe_fork: fork out of role scope, fork: {fork}");
            return;
        }
        if *fork == self.genesis {
            return;
        }

        let nonces: Vec<PeerNonce> = self.peer_table.read().peers.keys().copied().collect();
        for nonce in nonces {
            self.peer_net.dispatch_event(OutgoingEvent::Subscribe {
                nonce,
                fork: self.genesis,
                forks: vec![*fork],
            });
            let mut scheds = self.scheds.lock();
            if let Some(sched) = scheds.get_mut(fork) {
                self.dispatch_get_blocks(nonce, fork, sched);
            }
        }
        self.broadcast_tx_inv(fork);
    }

    pub fn unsubscribe_fork(&self, fork: &H256) {
        if self.scheds.lock().remove(fork).is_none() {
            debug!("unsubscribe_fork: schedule missing, fork: {fork}");
            return;
        }
        let nonces: Vec<PeerNonce> = self.peer_table.read().peers.keys().copied().collect();
        for nonce in nonces {
            self.peer_net.dispatch_event(OutgoingEvent::Unsubscribe {
                nonce,
                fork: self.genesis,
                forks: vec![*fork],
            });
        }
    }

    /// Feeds a locally mined primary PoW block into the height cache;
    /// true when it was the first block seen at its height.
    pub fn add_cache_local_pow_block(&self, block: Block) -> Result<bool, Errno> {
        let mut scheds = self.scheds.lock();
        let sched = scheds.get_mut(&self.genesis).ok_or(Errno::NotFound)?;
        sched.add_cache_local_pow_block(block).ok_or(Errno::AlreadyHave)
    }

    pub fn is_local_cache_pow_block(&self, height: u32) -> bool {
        self.scheds
            .lock()
            .get(&self.genesis)
            .map(|sched| sched.check_cache_local_pow_block(height))
            .unwrap_or(false)
    }

    /// Announces a freshly connected block to every subscribed peer that
    /// is not already known to hold it.
    pub fn broadcast_block_inv(&self, fork: &H256, hash: &H256) {
        let known = {
            let scheds = self.scheds.lock();
            match scheds.get(fork) {
                Some(sched) => sched.get_known_peers(&Inv::block(*hash)),
                None => return,
            }
        };
        let targets: Vec<PeerNonce> = {
            let table = self.peer_table.read();
            table
                .peers
                .iter()
                .filter(|(nonce, peer)| !known.contains(nonce) && peer.is_subscribed(fork))
                .map(|(nonce, _)| *nonce)
                .collect()
        };
        for nonce in targets {
            self.peer_net.dispatch_event(OutgoingEvent::Inv {
                nonce,
                fork: *fork,
                invs: vec![Inv::block(*hash)],
            });
        }
    }

    /// Queues `fork` for the coalesced tx-inv push and nudges the timer.
    pub fn broadcast_tx_inv(&self, fork: &H256) {
        self.push_tx.lock().pending.insert(*fork);
        if let Some((sender, _)) = &*self.timer.lock() {
            let _ = sender.send(TimerSignal::Kick);
        }
    }

    /// One push-tx round over every pending fork; returns how long the
    /// timer should sleep before the next one.
    pub(crate) fn push_tx_cycle(&self) -> Duration {
        let forks: Vec<H256> = self.push_tx.lock().pending.iter().copied().collect();
        let mut complete = true;
        for fork in &forks {
            if !self.push_tx_inv(fork) {
                complete = false;
            }
        }
        if complete {
            SYNTXINV_TIMEOUT
        } else {
            PUSHTX_TIMEOUT
        }
    }

    /// Entry point for everything the transport delivers.
    pub fn handle_event(&self, event: PeerEvent) {
        match event {
            PeerEvent::Active { nonce, addr } => self.handle_active(nonce, addr),
            PeerEvent::Deactive { nonce } => self.handle_deactive(nonce),
            PeerEvent::Subscribe { nonce, fork, forks } => {
                self.handle_subscribe(nonce, &fork, forks)
            }
            PeerEvent::Unsubscribe { nonce, fork, forks } => {
                self.handle_unsubscribe(nonce, &fork, forks)
            }
            PeerEvent::Inv { nonce, fork, invs } => self.handle_inv(nonce, &fork, invs),
            PeerEvent::GetData { nonce, fork, invs } => self.handle_get_data(nonce, &fork, invs),
            PeerEvent::GetBlocks {
                nonce,
                fork,
                locator,
            } => self.handle_get_blocks(nonce, &fork, locator),
            PeerEvent::Tx { nonce, fork, tx } => self.handle_tx(nonce, &fork, tx),
            PeerEvent::Block { nonce, fork, block } => self.handle_block(nonce, &fork, block),
            PeerEvent::GetFail { nonce, fork, invs } => self.handle_get_fail(nonce, &fork, invs),
            PeerEvent::MsgRsp { nonce, fork, rsp } => self.handle_msg_rsp(nonce, &fork, rsp),
        }
    }

    fn handle_active(&self, nonce: PeerNonce, addr: PeerAddress) {
        let service = addr.service;
        {
            let mut table = self.peer_table.write();
            table
                .peers
                .insert(nonce, NetChannelPeer::new(service, addr, self.genesis));
            table.unsync.entry(self.genesis).or_default().insert(nonce);
        }
        debug!("peer active: {nonce}, addr: {addr}");

        if service.contains(ServiceFlags::NODE_NETWORK) {
            if self.role != NodeRole::Fork {
                {
                    let mut scheds = self.scheds.lock();
                    if let Some(sched) = scheds.get_mut(&self.genesis) {
                        let genesis = self.genesis;
                        self.dispatch_get_blocks(nonce, &genesis, sched);
                    }
                }
                self.broadcast_tx_inv(&self.genesis);
            } else {
                debug!("peer active: fork node skips primary sync with peer {nonce}");
            }

            let forks: Vec<H256> = {
                let scheds = self.scheds.lock();
                scheds
                    .keys()
                    .filter(|fork| **fork != self.genesis)
                    .copied()
                    .collect()
            };
            if !forks.is_empty() {
                self.peer_net.dispatch_event(OutgoingEvent::Subscribe {
                    nonce,
                    fork: self.genesis,
                    forks,
                });
            }
        }
    }

    fn handle_deactive(&self, nonce: PeerNonce) {
        {
            let mut scheds = self.scheds.lock();
            let forks: Vec<H256> = scheds.keys().copied().collect();
            for fork in forks {
                if let Some(sched) = scheds.get_mut(&fork) {
                    let sched_peers = sched.remove_peer(nonce);
                    for nonce_sched in sched_peers {
                        self.schedule_peer_inv(nonce_sched, &fork, sched);
                    }
                }
            }
        }
        {
            let mut table = self.peer_table.write();
            if let Some(peer) = table.peers.remove(&nonce) {
                debug!(
                    "peer deactive: {nonce}, addr: {}, service: {:?}",
                    peer.address, peer.service
                );
                for fork in peer.subscribed.keys() {
                    if let Some(set) = table.unsync.get_mut(fork) {
                        set.remove(&nonce);
                    }
                }
            }
        }
    }

    fn handle_subscribe(&self, nonce: PeerNonce, fork: &H256, forks: Vec<H256>) {
        debug!("peer subscribe: {nonce}, fork: {fork}");
        if *fork != self.genesis {
            self.dispatch_misbehave(nonce, CloseReason::DdosAttack, "subscribe off-primary");
            return;
        }
        let mut accepted: Vec<H256> = Vec::new();
        {
            let mut table = self.peer_table.write();
            let PeerTable { peers, unsync } = &mut *table;
            if let Some(peer) = peers.get_mut(&nonce) {
                for hash in &forks {
                    if self.role == NodeRole::Consensus && *hash != self.genesis {
                        continue;
                    }
                    peer.subscribe(*hash);
                    unsync.entry(*hash).or_default().insert(nonce);
                    accepted.push(*hash);
                }
            }
        }
        let mut scheds = self.scheds.lock();
        for hash in accepted {
            if let Some(sched) = scheds.get_mut(&hash) {
                self.dispatch_get_blocks(nonce, &hash, sched);
            }
        }
    }

    fn handle_unsubscribe(&self, nonce: PeerNonce, fork: &H256, forks: Vec<H256>) {
        debug!("peer unsubscribe: {nonce}, fork: {fork}");
        if *fork != self.genesis {
            self.dispatch_misbehave(nonce, CloseReason::DdosAttack, "unsubscribe off-primary");
            return;
        }
        let mut table = self.peer_table.write();
        let PeerTable { peers, unsync } = &mut *table;
        if let Some(peer) = peers.get_mut(&nonce) {
            for hash in &forks {
                peer.unsubscribe(hash);
                if let Some(set) = unsync.get_mut(hash) {
                    set.remove(&nonce);
                }
            }
        }
    }

    fn handle_inv(&self, nonce: PeerNonce, fork: &H256, invs: Vec<Inv>) {
        if invs.len() > MAX_INV_COUNT_WIRE {
            self.dispatch_misbehave(nonce, CloseReason::DdosAttack, "inv count overflow");
            return;
        }

        let mut scheds = self.scheds.lock();
        let sched = match scheds.get_mut(fork) {
            Some(sched) => sched,
            None => {
                self.dispatch_misbehave(nonce, CloseReason::DdosAttack, "inv on unknown fork");
                return;
            }
        };
        sched.add_peer(nonce);

        let mut tx_hashes: Vec<H256> = Vec::new();
        let mut block_inv_add = 0usize;
        let mut block_inv_exist = 0usize;
        let mut last_height: Option<u32> = None;
        for inv in &invs {
            match inv.kind {
                InvKind::Tx => {
                    tx_hashes.push(inv.hash);
                    if !self.tx_pool.exists(&inv.hash) && !self.chain.exists_tx(&inv.hash) {
                        if sched.add_new_inv(*inv, nonce) {
                            trace!("inv: add tx inv success, peer: {nonce}, txid: {}", inv.hash);
                        } else {
                            trace!("inv: add tx inv fail, peer: {nonce}, txid: {}", inv.hash);
                        }
                    }
                }
                InvKind::Block => match self.chain.get_block_location(&inv.hash) {
                    Some(location) => {
                        sched.set_locator_inv_block(
                            nonce,
                            location.height,
                            inv.hash,
                            location.next,
                        );
                        block_inv_exist += 1;
                    }
                    None => {
                        let tip_height = match last_height {
                            Some(height) => height,
                            None => match self.chain.get_fork_tip(fork) {
                                Some(tip) => {
                                    last_height = Some(tip.height);
                                    tip.height
                                }
                                None => {
                                    error!("inv: get fork tip fail, peer: {nonce}, fork: {fork}");
                                    drop(scheds);
                                    self.dispatch_misbehave(
                                        nonce,
                                        CloseReason::DdosAttack,
                                        "inv without local tip",
                                    );
                                    return;
                                }
                            },
                        };
                        let block_height = Block::height_of_hash(&inv.hash);
                        if block_height as usize
                            > tip_height as usize + MAX_PEER_BLOCK_INV_COUNT / 2
                        {
                            trace!(
                                "inv: block height too high, peer: {nonce}, last: {tip_height}, height: {block_height}"
                            );
                        } else if sched.add_new_inv(*inv, nonce) {
                            block_inv_add += 1;
                        }
                    }
                },
                InvKind::Error => {}
            }
        }

        if !tx_hashes.is_empty() {
            trace!(
                "inv: recv tx inv and reply, count: {}, peer: {nonce}, fork: {fork}",
                tx_hashes.len()
            );
            let now = unix_time();
            {
                let mut table = self.peer_table.write();
                if let Some(state) = table
                    .peers
                    .get_mut(&nonce)
                    .and_then(|peer| peer.fork_state_mut(fork))
                {
                    state.add_known_tx(&tx_hashes, 0, now);
                    state.wait_get_tx_complete = true;
                }
            }
            self.peer_net.dispatch_event(OutgoingEvent::MsgRsp {
                nonce,
                fork: *fork,
                rsp: MsgRsp::new(
                    DataCommand::Inv,
                    MsgRspSubType::TxInv,
                    MsgRspResult::TxInvReceived,
                ),
            });
        }

        if block_inv_exist == MAX_GETBLOCKS_COUNT {
            sched.set_next_get_blocks_time(nonce, 0);
        } else if block_inv_add == MAX_GETBLOCKS_COUNT {
            sched.set_next_get_blocks_time(nonce, GET_BLOCKS_INTERVAL_DEF_TIME / 2);
        }
        self.schedule_peer_inv(nonce, fork, sched);
    }

    fn handle_get_data(&self, nonce: PeerNonce, fork: &H256, invs: Vec<Inv>) {
        let mut failed: Vec<Inv> = Vec::new();
        for inv in invs {
            match inv.kind {
                InvKind::Tx => {
                    let tx = self
                        .tx_pool
                        .get(&inv.hash)
                        .or_else(|| self.chain.get_transaction(&inv.hash));
                    match tx {
                        Some(tx) => {
                            trace!("get data: tx found, peer: {nonce}, txid: {}", inv.hash);
                            self.peer_net.dispatch_event(OutgoingEvent::Tx {
                                nonce,
                                fork: *fork,
                                tx,
                            });
                        }
                        None => {
                            error!("get data: tx missing, txid: {}", inv.hash);
                            failed.push(inv);
                        }
                    }
                }
                InvKind::Block => match self.chain.get_block(&inv.hash) {
                    Some(block) => {
                        trace!("get data: block found, peer: {nonce}, block: {}", inv.hash);
                        self.peer_net.dispatch_event(OutgoingEvent::Block {
                            nonce,
                            fork: *fork,
                            block,
                        });
                    }
                    None => {
                        error!("get data: block missing, block: {}", inv.hash);
                        failed.push(inv);
                    }
                },
                InvKind::Error => {
                    error!("get data: bad inv kind, hash: {}", inv.hash);
                    failed.push(inv);
                }
            }
        }
        if !failed.is_empty() {
            self.peer_net.dispatch_event(OutgoingEvent::GetFail {
                nonce,
                fork: *fork,
                invs: failed,
            });
        }
        let now = unix_time();
        let mut table = self.peer_table.write();
        if let Some(state) = table
            .peers
            .get_mut(&nonce)
            .and_then(|peer| peer.fork_state_mut(fork))
        {
            state.set_peer_get_data_time(now);
        }
    }

    fn handle_get_blocks(&self, nonce: PeerNonce, fork: &H256, locator: BlockLocator) {
        if !self.role.is_fork_in_scope(fork, &self.genesis) {
            trace!("get blocks: fork out of role scope, peer: {nonce}, fork: {fork}");
            return;
        }
        if locator.blocks.is_empty() {
            error!("get blocks: empty locator, peer: {nonce}");
            return;
        }
        let hashes = match self.chain.get_block_inv(fork, &locator, MAX_GETBLOCKS_COUNT) {
            Ok(hashes) => hashes,
            Err(err) => {
                error!("get blocks: get block inv fail: {err}");
                return;
            }
        };
        if hashes.is_empty() {
            let mut result = MsgRspResult::GetBlocksEmpty;
            if let Some(tip) = self.chain.get_fork_tip(fork) {
                if locator.blocks.contains(&tip.hash) {
                    result = MsgRspResult::GetBlocksEqual;
                }
            }
            self.peer_net.dispatch_event(OutgoingEvent::MsgRsp {
                nonce,
                fork: *fork,
                rsp: MsgRsp::new(DataCommand::GetBlocks, MsgRspSubType::Non, result),
            });
        } else {
            self.peer_net.dispatch_event(OutgoingEvent::Inv {
                nonce,
                fork: *fork,
                invs: hashes.into_iter().map(Inv::block).collect(),
            });
        }
    }

    fn handle_tx(&self, nonce: PeerNonce, fork: &H256, tx: Transaction) {
        if !self.role.is_fork_in_scope(fork, &self.genesis) {
            trace!("tx: fork out of role scope, peer: {nonce}, fork: {fork}");
            return;
        }
        let txid = tx.hash();

        let mut scheds = self.scheds.lock();
        let sched = match scheds.get_mut(fork) {
            Some(sched) => sched,
            None => {
                self.dispatch_misbehave(nonce, CloseReason::DdosAttack, "tx on unknown fork");
                return;
            }
        };

        let mut sched_peers = match sched.receive_tx(nonce, &txid, tx.clone()) {
            Some(peers) => peers,
            None => {
                debug!("tx: receive fail, txid: {txid}");
                return;
            }
        };
        trace!("tx: receive success, peer: {nonce}, txid: {txid}");

        if tx.is_mint() {
            debug!("tx: mint outside block dropped, peer: {nonce}, txid: {txid}");
            sched.remove_inv(&Inv::tx(txid));
            return;
        }

        let mut misbehave = HashSet::new();
        match self.chain.get_block_location(&tx.hash_anchor) {
            Some(location) if location.fork == *fork => {
                self.add_new_tx(fork, txid, sched, &mut sched_peers, &mut misbehave);
            }
            _ => {
                debug!("tx: anchor unresolved, txid: {txid}, anchor: {}", tx.hash_anchor);
                misbehave.extend(sched.invalidate_tx(&txid));
            }
        }
        self.post_add_new(fork, sched, &sched_peers, &misbehave);
    }

    fn handle_block(&self, nonce: PeerNonce, fork: &H256, block: Block) {
        if !self.role.is_fork_in_scope(fork, &self.genesis) {
            trace!("block: fork out of role scope, peer: {nonce}, fork: {fork}");
            return;
        }
        let hash = block.hash();
        let prev = block.prev;

        let mut broadcasts: Vec<H256> = Vec::new();
        {
            let mut scheds = self.scheds.lock();
            let sched = match scheds.get_mut(fork) {
                Some(sched) => sched,
                None => {
                    self.dispatch_misbehave(nonce, CloseReason::DdosAttack, "block on unknown fork");
                    return;
                }
            };

            let mut sched_peers = match sched.receive_block(nonce, &hash, block) {
                Some(peers) => peers,
                None => {
                    debug!("block: receive fail, block: {hash}");
                    return;
                }
            };
            trace!(
                "block: receive success, peer: {nonce}, height: {}, block: {hash}",
                Block::height_of_hash(&hash)
            );

            let mut misbehave = HashSet::new();
            match self.chain.get_block_location(&prev) {
                Some(location) => {
                    if location.fork == *fork {
                        broadcasts = self.add_new_block(
                            fork,
                            &hash,
                            sched,
                            &mut sched_peers,
                            &mut misbehave,
                        );
                    } else {
                        debug!(
                            "block: prev on another fork, prev fork: {}, fork: {fork}, prev: {prev}",
                            location.fork
                        );
                        misbehave.extend(sched.invalidate_block(&hash));
                    }
                }
                None => {
                    sched.add_orphan_block_prev(&hash, &prev);
                    if let Some((first, first_prev)) = self.check_prev_block(&hash, sched) {
                        if let Some(location) = self.chain.get_block_location(&first_prev) {
                            if location.fork == *fork {
                                broadcasts = self.add_new_block(
                                    fork,
                                    &first,
                                    sched,
                                    &mut sched_peers,
                                    &mut misbehave,
                                );
                            } else {
                                debug!(
                                    "block: ancestor prev on another fork, prev fork: {}, fork: {fork}",
                                    location.fork
                                );
                                misbehave.extend(sched.invalidate_block(&first));
                            }
                        }
                    }
                }
            }
            self.post_add_new(fork, sched, &sched_peers, &misbehave);
        }

        for hash_new in broadcasts {
            self.broadcast_block_inv(fork, &hash_new);
        }
    }

    fn handle_get_fail(&self, nonce: PeerNonce, fork: &H256, invs: Vec<Inv>) {
        let mut scheds = self.scheds.lock();
        let sched = match scheds.get_mut(fork) {
            Some(sched) => sched,
            None => {
                self.dispatch_misbehave(nonce, CloseReason::DdosAttack, "get fail on unknown fork");
                return;
            }
        };
        for inv in invs {
            trace!("get fail: peer: {nonce}, inv: {inv}");
            sched.cancel_assigned_inv(nonce, &inv);
        }
    }

    fn handle_msg_rsp(&self, nonce: PeerNonce, fork: &H256, rsp: MsgRsp) {
        if rsp.req_msg_type == DataCommand::Inv as u32 {
            if rsp.req_msg_sub_type != MsgRspSubType::TxInv as u32 {
                error!("msg rsp: inv sub type error, peer: {nonce}, sub: {}", rsp.req_msg_sub_type);
                self.dispatch_misbehave(nonce, CloseReason::ProtocolError, "bad inv rsp sub type");
                return;
            }
            let complete = match MsgRspResult::from_u64(rsp.result) {
                Some(MsgRspResult::TxInvReceived) => false,
                Some(MsgRspResult::TxInvComplete) => true,
                _ => {
                    error!("msg rsp: inv result error, peer: {nonce}, result: {}", rsp.result);
                    self.dispatch_misbehave(nonce, CloseReason::ProtocolError, "bad inv rsp result");
                    return;
                }
            };
            let now = unix_time();
            let reset = {
                let mut table = self.peer_table.write();
                match table
                    .peers
                    .get_mut(&nonce)
                    .and_then(|peer| peer.fork_state_mut(fork))
                {
                    Some(state) => {
                        state.reset_tx_inv_syn_status(complete, now);
                        true
                    }
                    None => false,
                }
            };
            if reset {
                trace!(
                    "msg rsp: tx inv {} by peer {nonce}, fork: {fork}",
                    if complete { "completed" } else { "received" }
                );
                if complete {
                    self.broadcast_tx_inv(fork);
                }
            } else {
                error!("msg rsp: peer not found, peer: {nonce}, fork: {fork}");
            }
        } else if rsp.req_msg_type == DataCommand::GetBlocks as u32 {
            let mut scheds = self.scheds.lock();
            let sched = match scheds.get_mut(fork) {
                Some(sched) => sched,
                None => {
                    self.dispatch_misbehave(nonce, CloseReason::DdosAttack, "msg rsp on unknown fork");
                    return;
                }
            };
            match MsgRspResult::from_u64(rsp.result) {
                Some(MsgRspResult::GetBlocksEmpty) => {
                    if sched.get_locator_inv_block(nonce).is_some() {
                        sched.reset_locator_inv_block(nonce);
                    }
                    self.dispatch_get_blocks(nonce, fork, sched);
                }
                Some(MsgRspResult::GetBlocksEqual) => {
                    trace!("msg rsp: chains equal, peer: {nonce}, fork: {fork}");
                    sched.set_next_get_blocks_time(nonce, GET_BLOCKS_INTERVAL_EQUAL_TIME);
                    self.schedule_peer_inv(nonce, fork, sched);
                }
                _ => {
                    error!(
                        "msg rsp: get blocks result error, peer: {nonce}, result: {}",
                        rsp.result
                    );
                    drop(scheds);
                    self.dispatch_misbehave(
                        nonce,
                        CloseReason::ProtocolError,
                        "bad get blocks rsp result",
                    );
                }
            }
        } else {
            error!("msg rsp: req type error, peer: {nonce}, type: {}", rsp.req_msg_type);
            self.dispatch_misbehave(nonce, CloseReason::ProtocolError, "bad rsp req type");
        }
    }

    /// One scheduling round for one peer: blocks take precedence; a peer
    /// with nothing to fetch may trigger a get-blocks roundtrip or a
    /// tx-inv-complete acknowledgement.
    fn schedule_peer_inv(&self, nonce: PeerNonce, fork: &H256, sched: &mut Schedule) {
        let mut get_data: Vec<Inv> = Vec::new();
        match sched.schedule_block_inv(nonce, 1) {
            Ok(plan) => {
                if plan.missing_prev {
                    self.dispatch_get_blocks(nonce, fork, sched);
                } else if plan.invs.is_empty() {
                    match sched.schedule_tx_inv(nonce, MAX_PEER_SCHED_COUNT) {
                        Ok(tx_plan) => {
                            get_data = tx_plan.invs;
                            if tx_plan.received_all {
                                self.acknowledge_tx_complete(nonce, fork);
                            }
                        }
                        Err(_) => {
                            self.dispatch_misbehave(
                                nonce,
                                CloseReason::DdosAttack,
                                "schedule tx inv fail",
                            );
                        }
                    }
                } else {
                    get_data = plan.invs;
                    sched.set_next_get_blocks_time(nonce, 0);
                }
                self.set_peer_sync_status(nonce, fork, plan.empty);
            }
            Err(_) => {
                self.dispatch_misbehave(nonce, CloseReason::DdosAttack, "schedule block inv fail");
            }
        }
        if !get_data.is_empty() {
            trace!(
                "schedule peer inv: send getdata, peer: {nonce}, count: {}",
                get_data.len()
            );
            self.peer_net.dispatch_event(OutgoingEvent::GetData {
                nonce,
                fork: *fork,
                invs: get_data,
            });
        }
    }

    /// When the peer pushed tx invs at us and we have now fetched them
    /// all, close its round with `TxInvComplete`.
    fn acknowledge_tx_complete(&self, nonce: PeerNonce, fork: &H256) {
        let waiting = {
            let mut table = self.peer_table.write();
            match table
                .peers
                .get_mut(&nonce)
                .and_then(|peer| peer.fork_state_mut(fork))
            {
                Some(state) if state.wait_get_tx_complete => {
                    state.wait_get_tx_complete = false;
                    true
                }
                _ => false,
            }
        };
        if waiting {
            trace!("tx inv complete, peer: {nonce}, fork: {fork}");
            self.peer_net.dispatch_event(OutgoingEvent::MsgRsp {
                nonce,
                fork: *fork,
                rsp: MsgRsp::new(
                    DataCommand::Inv,
                    MsgRspSubType::TxInv,
                    MsgRspResult::TxInvComplete,
                ),
            });
        }
    }

    fn dispatch_get_blocks(&self, nonce: PeerNonce, fork: &H256, sched: &mut Schedule) {
        if sched.check_add_inv_idle_location(nonce, InvKind::Block) {
            let locator = match sched.get_locator_inv_block(nonce) {
                Some((height, hash)) => {
                    trace!(
                        "dispatch get blocks: peer: {nonce}, locator height: {height}, block: {hash}"
                    );
                    sched.set_locator_depth(nonce, H256::zero());
                    BlockLocator::new(vec![hash])
                }
                None => {
                    let mut depth = sched.get_locator_depth(nonce).unwrap_or_default();
                    match self.chain.get_block_locator(fork, &mut depth, MAX_GETBLOCKS_COUNT - 1) {
                        Some(locator) => {
                            sched.set_locator_depth(nonce, depth);
                            locator
                        }
                        None => BlockLocator::default(),
                    }
                }
            };
            if !locator.blocks.is_empty() {
                self.peer_net.dispatch_event(OutgoingEvent::GetBlocks {
                    nonce,
                    fork: *fork,
                    locator,
                });
                sched.set_next_get_blocks_time(nonce, GET_BLOCKS_INTERVAL_DEF_TIME);
            }
        } else {
            sched.set_next_get_blocks_time(nonce, GET_BLOCKS_INTERVAL_DEF_TIME);
        }
    }

    /// Walks orphan children of received-but-unlinked blocks back to the
    /// earliest received ancestor. `Some` when an earlier start was found.
    fn check_prev_block(&self, hash: &H256, sched: &Schedule) -> Option<(H256, H256)> {
        let mut hash_block = *hash;
        let mut first = *hash;
        let mut prev = H256::zero();
        loop {
            let prev_hash = match sched.get_block(&hash_block) {
                Some((block, _)) => block.prev,
                None => break,
            };
            first = hash_block;
            prev = prev_hash;

            let next = sched.get_next_block(&prev_hash);
            if !next.contains(&hash_block) {
                break;
            }
            hash_block = prev_hash;
        }
        if first != *hash {
            Some((first, prev))
        } else {
            None
        }
    }

    /// Submits the received block and every orphan descendant that
    /// becomes connectable. Returns the hashes accepted (for broadcast).
    fn add_new_block(
        &self,
        fork: &H256,
        hash: &H256,
        sched: &mut Schedule,
        sched_peers: &mut HashSet<PeerNonce>,
        misbehave: &mut HashSet<PeerNonce>,
    ) -> Vec<H256> {
        let mut added: Vec<H256> = Vec::new();
        let mut queue = vec![*hash];
        let mut index = 0;
        while index < queue.len() {
            let hash_block = queue[index];
            index += 1;
            let (block, sender) = match sched.get_block(&hash_block) {
                Some((block, sender)) => (block.clone(), sender),
                None => {
                    debug!("add new block: sched get block fail, block: {hash_block}");
                    continue;
                }
            };

            if !sched.is_repeat_block(&hash_block)
                && !self.chain.verify_repeat_block(fork, &block)
            {
                debug!(
                    "add new block: repeat mint, peer: {sender}, height: {}, block: {hash_block}",
                    block.height
                );
                if !sched.set_repeat_block(sender, &hash_block) {
                    debug!("add new block: repeated repeats, peer: {sender}, block: {hash_block}");
                    misbehave.insert(sender);
                }
                return added;
            }

            match self.dispatcher.add_new_block(&block, sender) {
                Ok(()) => {
                    debug!(
                        "add new block success, peer: {sender}, height: {}, block: {hash_block}",
                        block.height
                    );
                    self.connect_block_txs(fork, &block, sched, sched_peers, misbehave);

                    if let Some(location) = self.chain.get_block_location(&hash_block) {
                        sched.set_locator_inv_block(
                            sender,
                            location.height,
                            hash_block,
                            location.next,
                        );
                    }
                    queue.extend(sched.get_next_block(&hash_block));
                    if let Some(known) = sched.remove_inv(&Inv::block(hash_block)) {
                        sched_peers.extend(known);
                    }
                    self.peer_net.dispatch_event(OutgoingEvent::Reward {
                        nonce: sender,
                        bonus: Bonus::VitalData,
                    });
                    added.push(hash_block);
                }
                Err(Errno::AlreadyHave) => {
                    debug!("add new block: already have, peer: {sender}, block: {hash_block}");
                    queue.extend(sched.get_next_block(&hash_block));
                    if let Some(known) = sched.remove_inv(&Inv::block(hash_block)) {
                        sched_peers.extend(known);
                    }
                }
                Err(err) => {
                    debug!("add new block fail, peer: {sender}, block: {hash_block}, err: {err}");
                    misbehave.extend(sched.invalidate_block(&hash_block));
                }
            }
        }
        added
    }

    /// A connected block settles its transactions: orphan tx chains
    /// hanging off them are retried and their invs dropped.
    fn connect_block_txs(
        &self,
        fork: &H256,
        block: &Block,
        sched: &mut Schedule,
        sched_peers: &mut HashSet<PeerNonce>,
        misbehave: &mut HashSet<PeerNonce>,
    ) {
        let mint_txid = block.tx_mint.hash();
        self.settle_block_tx(fork, &mint_txid, sched, sched_peers, misbehave);
        for tx in &block.txs {
            let txid = tx.hash();
            self.settle_block_tx(fork, &txid, sched, sched_peers, misbehave);
        }
    }

    fn settle_block_tx(
        &self,
        fork: &H256,
        txid: &H256,
        sched: &mut Schedule,
        sched_peers: &mut HashSet<PeerNonce>,
        misbehave: &mut HashSet<PeerNonce>,
    ) {
        let mut seen = HashSet::new();
        let next = sched.get_next_tx(txid, &mut seen);
        if !next.is_empty() {
            let mut prev_sched = HashSet::new();
            let mut prev_misbehave = HashSet::new();
            for hash in next {
                self.add_new_tx(fork, hash, sched, &mut prev_sched, &mut prev_misbehave);
            }
            misbehave.extend(prev_misbehave);
        }
        if let Some(known) = sched.remove_inv(&Inv::tx(*txid)) {
            trace!("settle block tx: remove tx inv, txid: {txid}");
            sched_peers.extend(known);
        }
    }

    /// Submits a received tx and every orphan descendant that becomes
    /// connectable; broadcasts when anything landed in the pool.
    fn add_new_tx(
        &self,
        fork: &H256,
        txid: H256,
        sched: &mut Schedule,
        sched_peers: &mut HashSet<PeerNonce>,
        misbehave: &mut HashSet<PeerNonce>,
    ) {
        let mut seen: HashSet<H256> = HashSet::new();
        let mut queue = vec![txid];
        let mut index = 0;
        let mut added = 0usize;
        while index < queue.len() {
            let hash_tx = queue[index];
            index += 1;
            let (tx, sender) = match sched.get_transaction(&hash_tx) {
                Some((tx, sender)) => (tx.clone(), sender),
                None => continue,
            };

            if !self.check_prev_tx(&tx, sched, sched_peers) {
                continue;
            }

            if self.tx_pool.exists(&hash_tx) || self.chain.exists_tx(&hash_tx) {
                debug!("add new tx: already known, peer: {sender}, txid: {hash_tx}");
                queue.extend(sched.get_next_tx(&hash_tx, &mut seen));
                if let Some(known) = sched.remove_inv(&Inv::tx(hash_tx)) {
                    sched_peers.extend(known);
                }
                continue;
            }

            match self.dispatcher.add_new_tx(&tx, sender) {
                Ok(()) => {
                    debug!("add new tx success, peer: {sender}, txid: {hash_tx}");
                    queue.extend(sched.get_next_tx(&hash_tx, &mut seen));
                    if let Some(known) = sched.remove_inv(&Inv::tx(hash_tx)) {
                        sched_peers.extend(known);
                    }
                    self.peer_net.dispatch_event(OutgoingEvent::Reward {
                        nonce: sender,
                        bonus: Bonus::MajorData,
                    });
                    added += 1;
                }
                Err(Errno::MissingPrev) => {
                    debug!("add new tx: missing prev, peer: {sender}, txid: {hash_tx}");
                }
                Err(Errno::TransactionConflictingInput) | Err(Errno::AlreadyHave) => {
                    debug!("add new tx: drop inv, peer: {sender}, txid: {hash_tx}");
                    if let Some(known) = sched.remove_inv(&Inv::tx(hash_tx)) {
                        sched_peers.extend(known);
                    }
                }
                Err(err) => {
                    debug!("add new tx fail, invalidate, peer: {sender}, txid: {hash_tx}, err: {err}");
                    misbehave.extend(sched.invalidate_tx(&hash_tx));
                }
            }
        }
        if added > 0 {
            self.broadcast_tx_inv(fork);
        }
    }

    /// True when every ancestor tx is resolvable; otherwise records orphan
    /// edges and queues the missing parents as invs on the peers that
    /// could serve them.
    fn check_prev_tx(
        &self,
        tx: &Transaction,
        sched: &mut Schedule,
        sched_peers: &HashSet<PeerNonce>,
    ) -> bool {
        let mut missing: HashSet<H256> = HashSet::new();
        for point in tx.input_pts() {
            if !missing.contains(&point.hash)
                && !self.tx_pool.exists(&point.hash)
                && !self.chain.exists_tx(&point.hash)
            {
                missing.insert(point.hash);
            }
        }
        if missing.is_empty() {
            return true;
        }

        let txid = tx.hash();
        trace!("check prev tx: missing prev, txid: {txid}");
        for prev in &missing {
            sched.add_orphan_tx_prev(&txid, prev);
            let inv = Inv::tx(*prev);
            if !sched.check_prev_tx_inv(inv) {
                for nonce in sched_peers {
                    if sched.add_new_inv(inv, *nonce) {
                        trace!("check prev tx: queued prev inv, peer: {nonce}, prev: {prev}");
                    }
                }
            }
        }
        false
    }

    fn post_add_new(
        &self,
        fork: &H256,
        sched: &mut Schedule,
        sched_peers: &HashSet<PeerNonce>,
        misbehave: &HashSet<PeerNonce>,
    ) {
        for nonce in sched_peers {
            if !misbehave.contains(nonce) {
                self.schedule_peer_inv(*nonce, fork, sched);
            }
        }
        for nonce in misbehave {
            self.dispatch_misbehave(*nonce, CloseReason::DdosAttack, "post add new");
        }
    }

    fn set_peer_sync_status(&self, nonce: PeerNonce, fork: &H256, sync: bool) {
        let mut rebroadcast = false;
        {
            let mut table = self.peer_table.write();
            let PeerTable { peers, unsync } = &mut *table;
            let inverted = peers
                .get_mut(&nonce)
                .and_then(|peer| peer.set_sync_status(fork, sync));
            match inverted {
                Some(true) => {
                    if sync {
                        unsync.entry(*fork).or_default().remove(&nonce);
                        rebroadcast = true;
                    } else {
                        unsync.entry(*fork).or_default().insert(nonce);
                    }
                }
                _ => {}
            }
        }
        if rebroadcast {
            self.broadcast_tx_inv(fork);
        }
    }

    /// Announces pending pool txs of `fork` to every peer whose last
    /// round has been acknowledged. False when any round saturated (more
    /// to send soon).
    fn push_tx_inv(&self, fork: &H256) -> bool {
        let now = unix_time();
        let mut timeouts: Vec<PeerNonce> = Vec::new();
        let mut allow = false;
        {
            let table = self.peer_table.read();
            for (nonce, peer) in &table.peers {
                if let Some(state) = peer.fork_state(fork) {
                    match state.check_syn_tx_inv_status(now) {
                        CheckSynTxInv::WaitSyn => {}
                        CheckSynTxInv::WaitTimeout => timeouts.push(*nonce),
                        CheckSynTxInv::AllowSyn => allow = true,
                    }
                }
            }
        }
        for nonce in &timeouts {
            self.dispatch_misbehave(
                *nonce,
                CloseReason::ResponseFailure,
                "wait tx inv response timeout",
            );
        }
        if !allow {
            return true;
        }

        let pool_txids = self.tx_pool.list_tx(fork);
        if pool_txids.is_empty() {
            return true;
        }

        let mut complete = true;
        let mut events: Vec<(PeerNonce, Vec<Inv>)> = Vec::new();
        let mut late: Vec<PeerNonce> = Vec::new();
        {
            let mut table = self.peer_table.write();
            for (nonce, peer) in table.peers.iter_mut() {
                if let Some(state) = peer.fork_state_mut(fork) {
                    match state.make_tx_inv(&pool_txids, now) {
                        None => late.push(*nonce),
                        Some(invs) if !invs.is_empty() => {
                            if invs.len() >= MIN_INV_COUNT_WIRE {
                                complete = false;
                            }
                            events.push((*nonce, invs));
                        }
                        Some(_) => {}
                    }
                }
            }
        }
        for nonce in late {
            self.dispatch_misbehave(
                nonce,
                CloseReason::ResponseFailure,
                "wait tx inv response timeout",
            );
        }
        for (nonce, invs) in events {
            trace!("push tx inv: send, peer: {nonce}, count: {}", invs.len());
            self.peer_net.dispatch_event(OutgoingEvent::Inv {
                nonce,
                fork: *fork,
                invs,
            });
        }
        complete
    }

    fn dispatch_misbehave(&self, nonce: PeerNonce, reason: CloseReason, caller: &str) {
        warn!("misbehave: peer: {nonce}, reason: {reason:?}, at: {caller}");
        self.peer_net
            .dispatch_event(OutgoingEvent::Close { nonce, reason });
    }
}
