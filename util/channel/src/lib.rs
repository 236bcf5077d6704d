//! Re-exports the channel implementation the whole workspace agrees on, so a
//! future swap touches one crate.

pub use crossbeam_channel::{
    bounded, select, unbounded, Receiver, RecvError, RecvTimeoutError, SendError, Sender,
    TryRecvError, TrySendError,
};
