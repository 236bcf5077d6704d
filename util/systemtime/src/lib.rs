//! Wall-clock access for the workspace.
//!
//! All timestamp reads go through this crate so tests can pin time with the
//! `enable_faketime` feature instead of sleeping.

use std::time::{SystemTime, UNIX_EPOCH};

#[cfg(feature = "enable_faketime")]
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
#[cfg(feature = "enable_faketime")]
use std::sync::{Mutex, MutexGuard, OnceLock};

fn system_time_as_millis() -> u64 {
    let duration = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("SystemTime before UNIX EPOCH");
    duration.as_secs() * 1000 + u64::from(duration.subsec_millis())
}

/// Current unix time in milliseconds.
#[cfg(not(feature = "enable_faketime"))]
pub fn unix_time_as_millis() -> u64 {
    system_time_as_millis()
}

/// Current unix time in seconds.
pub fn unix_time() -> u64 {
    unix_time_as_millis() / 1000
}

#[cfg(feature = "enable_faketime")]
static FAKETIME_ENABLED: AtomicBool = AtomicBool::new(false);
#[cfg(feature = "enable_faketime")]
static FAKETIME_MILLIS: AtomicU64 = AtomicU64::new(0);

#[cfg(feature = "enable_faketime")]
fn faketime_lock() -> &'static Mutex<()> {
    static LOCK: OnceLock<Mutex<()>> = OnceLock::new();
    LOCK.get_or_init(|| Mutex::new(()))
}

/// Current unix time in milliseconds, honoring an active fake clock.
#[cfg(feature = "enable_faketime")]
pub fn unix_time_as_millis() -> u64 {
    if FAKETIME_ENABLED.load(Ordering::SeqCst) {
        FAKETIME_MILLIS.load(Ordering::SeqCst)
    } else {
        system_time_as_millis()
    }
}

/// Holds the fake clock active; restores the real clock on drop. Tests using
/// it are serialized through a process-wide lock.
#[cfg(feature = "enable_faketime")]
pub struct FaketimeGuard {
    _guard: MutexGuard<'static, ()>,
}

#[cfg(feature = "enable_faketime")]
impl FaketimeGuard {
    /// Pins the clock at `millis`.
    pub fn set_faketime(&self, millis: u64) {
        FAKETIME_MILLIS.store(millis, Ordering::SeqCst);
        FAKETIME_ENABLED.store(true, Ordering::SeqCst);
    }
}

#[cfg(feature = "enable_faketime")]
impl Drop for FaketimeGuard {
    fn drop(&mut self) {
        FAKETIME_ENABLED.store(false, Ordering::SeqCst);
    }
}

/// Takes control of the clock for the current test.
#[cfg(feature = "enable_faketime")]
pub fn faketime() -> FaketimeGuard {
    let guard = faketime_lock()
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner());
    FaketimeGuard { _guard: guard }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn realtime_is_monotonic_enough() {
        let a = unix_time_as_millis();
        let b = unix_time_as_millis();
        assert!(b >= a);
        assert_eq!(unix_time(), unix_time_as_millis() / 1000);
    }

    #[cfg(feature = "enable_faketime")]
    #[test]
    fn faketime_pins_the_clock() {
        let guard = faketime();
        guard.set_faketime(42_000);
        assert_eq!(unix_time_as_millis(), 42_000);
        assert_eq!(unix_time(), 42);
        drop(guard);
        assert!(unix_time_as_millis() > 42_000);
    }
}
