//! Cooperative progress reporting and cancellation.
//!
//! Algorithms poll a [`Monitor`] at bounded intervals (per row scan, per
//! outlet, per relaxation sweep) and abort with `Error::Canceled` when it
//! signals a stop. Inner graph walks check the flag wherever iteration
//! bounds are large, so cancellation latency stays proportional to a single
//! raster pass.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Progress/cancellation hook passed to every long-running algorithm.
pub trait Monitor: Sync {
    /// True when the caller has requested an abort.
    fn is_canceled(&self) -> bool {
        false
    }

    /// Report progress as `current` out of `total` units. Returning `false`
    /// requests an abort, same as `is_canceled`.
    fn report_progress(&self, current: usize, total: usize) -> bool {
        let _ = (current, total);
        !self.is_canceled()
    }
}

/// Monitor that never cancels and discards progress.
#[derive(Debug, Clone, Copy, Default)]
pub struct Silent;

impl Monitor for Silent {}

/// Monitor backed by a shared atomic flag, for cancellation from another
/// thread (e.g. a UI button).
#[derive(Debug, Clone, Default)]
pub struct CancelFlag {
    flag: Arc<AtomicBool>,
}

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation. Polling algorithms abort at their next check.
    pub fn cancel(&self) {
        self.flag.store(true, Ordering::Relaxed);
    }

    /// A clonable handle sharing the same flag.
    pub fn handle(&self) -> Self {
        Self {
            flag: Arc::clone(&self.flag),
        }
    }
}

impl Monitor for CancelFlag {
    fn is_canceled(&self) -> bool {
        self.flag.load(Ordering::Relaxed)
    }
}
