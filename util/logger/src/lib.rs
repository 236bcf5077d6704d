//! The logging facade.
//!
//! Crates log through these macros rather than depending on `log` directly;
//! the binary (out of scope here) decides the sink and filter.

pub use log::{debug, error, info, log_enabled, trace, warn, Level};
