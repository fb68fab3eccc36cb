//! Sleep tracking for the duplicate-last-sample fast path
//!
//! A profiled thread brackets its blocking waits with [`ThreadActivity::sleep`]
//! and [`ThreadActivity::wake`]. While it stays asleep its stack cannot
//! change, so after one real sample the sampler may repeat that sample
//! instead of suspending the thread again.

use std::sync::atomic::{AtomicU8, Ordering};

const AWAKE: u8 = 0;
/// Asleep, but no sample has been taken since it fell asleep
const SLEEPING_NOT_OBSERVED: u8 = 1;
/// Asleep, and the sampler has already captured the sleeping stack
const SLEEPING_OBSERVED: u8 = 2;

/// Sleep state shared between a profiled thread and the sampler
#[derive(Debug, Default)]
pub struct ThreadActivity {
    state: AtomicU8,
}

impl ThreadActivity {
    #[must_use]
    pub fn new() -> Self {
        Self { state: AtomicU8::new(AWAKE) }
    }

    /// Called by the profiled thread right before it blocks
    pub fn sleep(&self) {
        self.state.store(SLEEPING_NOT_OBSERVED, Ordering::Release);
    }

    /// Called by the profiled thread right after it unblocks
    pub fn wake(&self) {
        self.state.store(AWAKE, Ordering::Release);
    }

    /// Marks the thread asleep until the returned guard is dropped
    #[must_use = "the thread is marked awake again when the guard drops"]
    pub fn sleep_scope(&self) -> SleepScope<'_> {
        self.sleep();
        SleepScope { activity: self }
    }

    #[must_use]
    pub fn is_sleeping(&self) -> bool {
        self.state.load(Ordering::Acquire) != AWAKE
    }

    /// Whether the sampler may repeat this thread's last sample
    ///
    /// The first call after the thread falls asleep returns false and
    /// records that the sleeping stack is about to be sampled; later calls
    /// return true until the thread wakes.
    pub fn can_duplicate_last_sample(&self) -> bool {
        match self.state.compare_exchange(
            SLEEPING_NOT_OBSERVED,
            SLEEPING_OBSERVED,
            Ordering::AcqRel,
            Ordering::Acquire,
        ) {
            Ok(_) => false,
            Err(current) => current == SLEEPING_OBSERVED,
        }
    }
}

/// Guard returned by [`ThreadActivity::sleep_scope`]
#[derive(Debug)]
pub struct SleepScope<'a> {
    activity: &'a ThreadActivity,
}

impl Drop for SleepScope<'_> {
    fn drop(&mut self) {
        self.activity.wake();
    }
}
