use std::collections::HashMap;

use forknet_protocol::{PeerAddress, ServiceFlags};
use forknet_types::{Inv, H256, MAX_INV_COUNT_WIRE, MIN_INV_COUNT_WIRE};
use lru::LruCache;

/// Seconds after which an announced txid may be forgotten.
pub(crate) const KNOWNINV_EXPIRED_TIME: u64 = 1200;
/// Soft bound of the per-(peer, fork) known-tx cache.
pub(crate) const KNOWNINV_MAX_COUNT: usize = 65536;

/// No tx-inv acknowledgement within this window is a timeout.
pub(crate) const SYNTXINV_RECEIVE_TIMEOUT: u64 = 1200;
/// A peer may take this long to finish fetching an inv round.
pub(crate) const SYNTXINV_COMPLETE_TIMEOUT: u64 = 3600 * 5;
/// A get-data inside this window proves the peer is still fetching.
pub(crate) const SYNTXINV_GETDATA_TIMEOUT: u64 = 600;

/// Where a peer stands in the coalesced tx-inv handshake.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub(crate) enum SynTxInvStatus {
    Init,
    WaitPeerReceived,
    WaitPeerComplete,
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub(crate) enum CheckSynTxInv {
    WaitSyn,
    WaitTimeout,
    AllowSyn,
}

/// Per-(peer, fork) channel state.
pub(crate) struct PeerForkState {
    pub synchronized: bool,
    pub status: SynTxInvStatus,
    send_time: u64,
    recv_time: u64,
    prev_get_data_time: u64,
    single_syn_tx_inv_count: usize,
    pub wait_get_tx_complete: bool,
    known_tx: LruCache<H256, u64>,
    cache_syn_tx_count: usize,
}

impl Default for PeerForkState {
    fn default() -> Self {
        PeerForkState {
            synchronized: false,
            status: SynTxInvStatus::Init,
            send_time: 0,
            recv_time: 0,
            prev_get_data_time: 0,
            single_syn_tx_inv_count: MIN_INV_COUNT_WIRE,
            wait_get_tx_complete: false,
            known_tx: LruCache::new(KNOWNINV_MAX_COUNT + MAX_INV_COUNT_WIRE * 2),
            cache_syn_tx_count: KNOWNINV_MAX_COUNT,
        }
    }
}

impl PeerForkState {
    pub fn is_known_tx(&self, txid: &H256) -> bool {
        self.known_tx.contains(txid)
    }

    /// Remembers announced txids and sweeps expired ones. The cache stays
    /// within `cache_syn_tx_count + 2 * MAX_INV_COUNT_WIRE` entries, so
    /// memory is bounded by the peer-tx-inv cap.
    pub fn add_known_tx(&mut self, txids: &[H256], total_syn_count: usize, now: u64) {
        self.cache_syn_tx_count = total_syn_count.max(KNOWNINV_MAX_COUNT);
        for txid in txids {
            self.known_tx.put(*txid, now);
        }
        self.clear_expired_tx(now);
    }

    fn clear_expired_tx(&mut self, now: u64) {
        let expired_at = now.saturating_sub(KNOWNINV_EXPIRED_TIME);
        let ctrl_count = self.cache_syn_tx_count + MAX_INV_COUNT_WIRE * 2;
        while self.known_tx.len() > ctrl_count {
            let oldest_expired = self
                .known_tx
                .peek_lru()
                .map(|(_, stamp)| *stamp <= expired_at)
                .unwrap_or(false);
            if !oldest_expired {
                break;
            }
            self.known_tx.pop_lru();
        }
    }

    pub fn set_peer_get_data_time(&mut self, now: u64) {
        self.prev_get_data_time = now;
    }

    pub fn check_syn_tx_inv_status(&self, now: u64) -> CheckSynTxInv {
        match self.status {
            SynTxInvStatus::Init => CheckSynTxInv::AllowSyn,
            SynTxInvStatus::WaitPeerReceived => {
                if now.saturating_sub(self.send_time) >= SYNTXINV_RECEIVE_TIMEOUT {
                    CheckSynTxInv::WaitTimeout
                } else {
                    CheckSynTxInv::WaitSyn
                }
            }
            SynTxInvStatus::WaitPeerComplete => {
                if now.saturating_sub(self.recv_time) >= SYNTXINV_COMPLETE_TIMEOUT
                    && now.saturating_sub(self.prev_get_data_time) >= SYNTXINV_GETDATA_TIMEOUT
                {
                    CheckSynTxInv::WaitTimeout
                } else {
                    CheckSynTxInv::WaitSyn
                }
            }
        }
    }

    /// Handles the peer's tx-inv acknowledgement: `received` opens the
    /// fetching window, `complete` re-arms the next round.
    pub fn reset_tx_inv_syn_status(&mut self, complete: bool, now: u64) {
        self.status = if complete {
            SynTxInvStatus::Init
        } else {
            SynTxInvStatus::WaitPeerComplete
        };
        self.recv_time = now;
    }

    /// Builds the next tx-inv batch from `pool_txids`, skipping what the
    /// peer already knows. `None` reports a handshake timeout.
    pub fn make_tx_inv(&mut self, pool_txids: &[H256], now: u64) -> Option<Vec<Inv>> {
        match self.check_syn_tx_inv_status(now) {
            CheckSynTxInv::WaitSyn => Some(Vec::new()),
            CheckSynTxInv::WaitTimeout => None,
            CheckSynTxInv::AllowSyn => {
                let mut invs = Vec::new();
                let mut announced = Vec::new();
                for txid in pool_txids {
                    if invs.len() >= self.single_syn_tx_inv_count {
                        break;
                    }
                    if !self.is_known_tx(txid) {
                        invs.push(Inv::tx(*txid));
                        announced.push(*txid);
                    }
                }
                self.add_known_tx(&announced, pool_txids.len(), now);
                if !invs.is_empty() {
                    self.status = SynTxInvStatus::WaitPeerReceived;
                    self.send_time = now;
                }
                Some(invs)
            }
        }
    }
}

/// Everything the channel remembers about one connected peer.
pub(crate) struct NetChannelPeer {
    pub service: ServiceFlags,
    pub address: PeerAddress,
    pub subscribed: HashMap<H256, PeerForkState>,
}

impl NetChannelPeer {
    /// A fresh peer is implicitly subscribed to the primary fork.
    pub fn new(service: ServiceFlags, address: PeerAddress, primary: H256) -> Self {
        let mut subscribed = HashMap::new();
        subscribed.insert(primary, PeerForkState::default());
        NetChannelPeer {
            service,
            address,
            subscribed,
        }
    }

    pub fn is_subscribed(&self, fork: &H256) -> bool {
        self.subscribed.contains_key(fork)
    }

    pub fn subscribe(&mut self, fork: H256) {
        self.subscribed.entry(fork).or_default();
    }

    pub fn unsubscribe(&mut self, fork: &H256) {
        self.subscribed.remove(fork);
    }

    /// Returns whether the flag actually flipped.
    pub fn set_sync_status(&mut self, fork: &H256, sync: bool) -> Option<bool> {
        let state = self.subscribed.get_mut(fork)?;
        let inverted = state.synchronized != sync;
        state.synchronized = sync;
        Some(inverted)
    }

    pub fn fork_state_mut(&mut self, fork: &H256) -> Option<&mut PeerForkState> {
        self.subscribed.get_mut(fork)
    }

    pub fn fork_state(&self, fork: &H256) -> Option<&PeerForkState> {
        self.subscribed.get(fork)
    }
}
