use forknet_types::H256;
use serde::{Deserialize, Serialize};

/// What slice of the fork space this node serves. Immutable after init.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeRole {
    /// Serves the primary fork and every biz fork.
    Backbone,
    /// Serves biz forks only; primary-fork traffic is silently ignored.
    Fork,
    /// Serves the primary fork only; biz-fork traffic is silently ignored.
    Consensus,
}

impl NodeRole {
    /// Whether messages referencing `fork` are in scope for this role.
    /// `genesis` identifies the primary fork.
    pub fn is_fork_in_scope(self, fork: &H256, genesis: &H256) -> bool {
        match self {
            NodeRole::Backbone => true,
            NodeRole::Fork => fork != genesis,
            NodeRole::Consensus => fork == genesis,
        }
    }
}

impl Default for NodeRole {
    fn default() -> Self {
        NodeRole::Backbone
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scope_matrix() {
        let genesis = H256::from_u64(1);
        let biz = H256::from_u64(2);

        assert!(NodeRole::Backbone.is_fork_in_scope(&genesis, &genesis));
        assert!(NodeRole::Backbone.is_fork_in_scope(&biz, &genesis));

        assert!(!NodeRole::Fork.is_fork_in_scope(&genesis, &genesis));
        assert!(NodeRole::Fork.is_fork_in_scope(&biz, &genesis));

        assert!(NodeRole::Consensus.is_fork_in_scope(&genesis, &genesis));
        assert!(!NodeRole::Consensus.is_fork_in_scope(&biz, &genesis));
    }
}
