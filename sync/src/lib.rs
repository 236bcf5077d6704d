//! The peer synchronization core.
//!
//! [`Schedule`] tracks, per fork, which peer advertised which object and
//! decides who fetches what; [`NetChannel`] is the event pump translating
//! peer messages into scheduler calls, pool pushes, chain submissions and
//! outbound broadcasts. Node roles filter which forks either will touch.

mod channel;
mod net_time_checker;
mod orphan;
mod peer;
mod schedule;
#[cfg(test)]
mod tests;

use forknet_protocol::NodeRole;
use serde::{Deserialize, Serialize};

pub use channel::{NetChannel, GET_BLOCKS_INTERVAL_DEF_TIME, GET_BLOCKS_INTERVAL_EQUAL_TIME,
    MAX_GETBLOCKS_COUNT, PUSHTX_TIMEOUT, SYNTXINV_TIMEOUT};
pub use net_time_checker::{NetTimeChecker, TOLERANT_OFFSET};
pub use orphan::OrphanPool;
pub use schedule::{
    BlockInvPlan, Schedule, ScheduleFault, TxInvPlan, MAX_INV_COUNT, MAX_INV_WAIT_TIME,
    MAX_OBJ_WAIT_TIME, MAX_PEER_BLOCK_INV_COUNT, MAX_PEER_TX_INV_COUNT, MAX_REGETDATA_COUNT,
    MAX_REPEAT_BLOCK_COUNT, MAX_REPEAT_BLOCK_TIME,
};

/// Node-level knobs of the sync subsystem, embeddable in an outer app
/// config. The role is immutable once the channel is built.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct NodeConfig {
    /// Network magic stamped on every frame.
    pub magic: u32,
    /// Which slice of the fork space this node serves.
    pub role: NodeRole,
}
