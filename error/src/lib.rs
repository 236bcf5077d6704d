//! The closed error enumeration shared by the node core.
//!
//! Components either succeed, return one of these, or log-and-return a
//! `Sys*` value; nothing in the core panics on a collaborator failure.

use thiserror::Error;

/// Outcome code of block/transaction admission and the collaborator calls
/// backing it.
///
/// `AlreadyHave` is an idempotent success signal, not a fault; see the
/// translation rules on the network channel for how each value is handled.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Errno {
    /// The referenced prior object is unknown: a block missing its parent,
    /// or a tx input whose ancestor tx is nowhere to be found.
    #[error("missing previous object")]
    MissingPrev,
    /// Structural misclassification, e.g. an origin block submitted through
    /// the add-block path.
    #[error("invalid block type")]
    BlockTypeInvalid,
    /// Validation failed or an input is misspent.
    #[error("invalid transaction")]
    TransactionInvalid,
    /// Two pool transactions attempt to spend the same outpoint.
    #[error("conflicting transaction input")]
    TransactionConflictingInput,
    /// The object is already known.
    #[error("already have")]
    AlreadyHave,
    /// A database collaborator failed.
    #[error("database error")]
    SysDatabase,
    /// A storage collaborator failed.
    #[error("storage error")]
    SysStorage,
    /// Lookup miss.
    #[error("not found")]
    NotFound,
}

impl Errno {
    /// Whether the value reports a collaborator failure rather than a
    /// verdict about the object itself.
    pub fn is_sys(self) -> bool {
        matches!(self, Errno::SysDatabase | Errno::SysStorage)
    }
}

#[cfg(test)]
mod tests {
    use super::Errno;

    #[test]
    fn display_is_stable() {
        assert_eq!(Errno::MissingPrev.to_string(), "missing previous object");
        assert_eq!(Errno::AlreadyHave.to_string(), "already have");
    }

    #[test]
    fn sys_partition() {
        assert!(Errno::SysDatabase.is_sys());
        assert!(Errno::SysStorage.is_sys());
        assert!(!Errno::TransactionInvalid.is_sys());
    }
}
