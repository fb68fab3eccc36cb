//! Per-thread sampling protocol
//!
//! ```text
//! timestamp ─▶ memory (first thread only) ─▶ suspend ─▶ read context
//!                                               │            │
//!                                          fail: skip   fail: resume, skip
//!                                                            │
//!                                            record sample ─▶ resume
//! ```
//!
//! While the target is suspended it may hold any lock in the process,
//! including the allocator's. Nothing between `suspend` and `resume`
//! allocates or logs; the sample buffer is preallocated for this reason.

use std::time::Instant;

use haltprof_common::RawContext;
use log::trace;

use super::snapshot::{MemoryReading, RegisterSnapshot};
use crate::buffer::SampleBuffer;
use crate::memory::MemoryProbe;
use crate::platform::SuspendBackend;
use crate::registry::ThreadRecord;

/// What happened to one sampling attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SampleOutcome {
    /// A full sample was written to the buffer
    Recorded,
    /// The thread has no OS handle; nothing was attempted
    NoHandle,
    /// The suspend request failed; the thread kept running
    SuspendFailed,
    /// Suspended, but the context could not be read; the thread was resumed
    ContextUnavailable,
}

/// A suspended thread, resumed exactly once when dropped
///
/// The only way to suspend a thread inside the sampler, so every early
/// return after a successful suspend still resumes it.
pub struct SuspendGuard<'a, B: SuspendBackend> {
    backend: &'a B,
    handle: &'a B::Handle,
}

impl<'a, B: SuspendBackend> SuspendGuard<'a, B> {
    /// Suspend the thread; `None` if the request failed
    pub fn suspend(backend: &'a B, handle: &'a B::Handle) -> Option<Self> {
        if backend.suspend(handle) {
            Some(Self { backend, handle })
        } else {
            None
        }
    }

    /// Confirm the thread has stopped and read its registers
    #[must_use]
    pub fn read_context(&self) -> Option<RawContext> {
        self.backend.read_context(self.handle)
    }
}

impl<B: SuspendBackend> Drop for SuspendGuard<'_, B> {
    fn drop(&mut self) {
        self.backend.resume(self.handle);
    }
}

/// Suspend one thread, capture its registers into `buffer`, resume it
///
/// `memory` is `Some` only for the first thread sampled in an iteration with
/// the memory feature on; every other sample reports zero.
pub fn sample_thread<B: SuspendBackend>(
    backend: &B,
    record: &ThreadRecord<B::Handle>,
    memory: Option<&dyn MemoryProbe>,
    buffer: &mut SampleBuffer,
    start_time: Instant,
) -> SampleOutcome {
    let Some(handle) = record.handle() else {
        trace!("{} has no thread handle", record.tid());
        return SampleOutcome::NoHandle;
    };

    // Before suspending, so a slow suspend cannot skew the sample time
    let timestamp = Instant::now();

    let memory = memory.map_or_else(MemoryReading::default, |probe| MemoryReading {
        resident: probe.resident_bytes(),
        unique: probe.unique_bytes(),
    });

    let outcome = {
        let Some(suspended) = SuspendGuard::suspend(backend, handle) else {
            trace!("Suspend of {} failed", record.tid());
            return SampleOutcome::SuspendFailed;
        };

        match suspended.read_context().and_then(|ctx| Some((ctx.registers()?, ctx))) {
            Some((registers, context)) => {
                let snapshot =
                    RegisterSnapshot::new(timestamp, record.tid(), registers, context, memory);
                buffer.add_sample(&snapshot, start_time);
                SampleOutcome::Recorded
            }
            None => SampleOutcome::ContextUnavailable,
        }
        // `suspended` drops here: the thread resumes
    };

    if outcome == SampleOutcome::ContextUnavailable {
        trace!("Context of {} unavailable; resumed without a sample", record.tid());
    }
    outcome
}
