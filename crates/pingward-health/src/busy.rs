//! Single-flight flag shared by the drain and sweep loops.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// A flag that at most one task can hold at a time.
#[derive(Debug, Clone, Default)]
pub(crate) struct BusyFlag(Arc<AtomicBool>);

impl BusyFlag {
    /// Claim the flag, or `None` if another task holds it.
    pub(crate) fn try_enter(&self) -> Option<BusyGuard> {
        self.0
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| BusyGuard(self.0.clone()))
    }

    pub(crate) fn is_set(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

/// Releases the flag on drop, including when the holder panics.
#[derive(Debug)]
pub(crate) struct BusyGuard(Arc<AtomicBool>);

impl Drop for BusyGuard {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}
