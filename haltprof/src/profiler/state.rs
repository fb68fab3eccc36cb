//! Shared profiler state behind one mutex
//!
//! The thread registry, the active session's buffer and pause flag, and the
//! activity generation are all guarded by the same lock. The sampler holds
//! it for a whole iteration, so start/stop requests only ever land between
//! iterations.

use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Instant;

use crate::buffer::SampleBuffer;
use crate::domain::Generation;
use crate::registry::{RegistrationId, ThreadRegistry};
use crate::sampling::SamplerThread;

use super::session::{SessionSettings, SessionStats};

/// Lock-protected state shared by the session owner and the sampler thread
#[derive(Debug)]
pub struct SharedState<H> {
    inner: Mutex<ProfilerState<H>>,
}

impl<H> Default for SharedState<H> {
    fn default() -> Self {
        Self { inner: Mutex::new(ProfilerState::new()) }
    }
}

impl<H> SharedState<H> {
    /// Take the state lock
    ///
    /// A panic while the lock was held leaves the registry and buffer
    /// readable, so a poisoned lock is recovered rather than propagated.
    pub fn lock(&self) -> MutexGuard<'_, ProfilerState<H>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// The running session's private state
#[derive(Debug)]
pub struct ActiveSession {
    pub(crate) start_time: Instant,
    pub(crate) settings: SessionSettings,
    pub(crate) buffer: SampleBuffer,
    pub(crate) paused: bool,
    pub(crate) stats: SessionStats,
    pub(crate) sampler: Option<SamplerThread>,
}

/// Everything the sampler reads or writes during one iteration
pub struct SamplingView<'a, H> {
    pub threads: &'a mut ThreadRegistry<H>,
    pub buffer: &'a mut SampleBuffer,
    pub stats: &'a mut SessionStats,
    pub start_time: Instant,
    pub paused: bool,
    pub memory_enabled: bool,
}

#[derive(Debug)]
pub struct ProfilerState<H> {
    generation: Generation,
    pub(crate) threads: ThreadRegistry<H>,
    pub(crate) session: Option<ActiveSession>,
}

impl<H> ProfilerState<H> {
    fn new() -> Self {
        Self { generation: Generation::default(), threads: ThreadRegistry::new(), session: None }
    }

    /// The live activity generation
    #[must_use]
    pub fn generation(&self) -> Generation {
        self.generation
    }

    /// Advance the generation; any sampler bound to an older one will exit
    /// at its next iteration
    pub fn advance_generation(&mut self) -> Generation {
        self.generation = self.generation.next();
        self.generation
    }

    #[must_use]
    pub fn is_active(&self) -> bool {
        self.session.is_some()
    }

    #[must_use]
    pub fn is_paused(&self) -> bool {
        self.session.as_ref().is_some_and(|session| session.paused)
    }

    #[must_use]
    pub fn threads(&self) -> &ThreadRegistry<H> {
        &self.threads
    }

    /// The active session's buffer
    #[must_use]
    pub fn buffer(&self) -> Option<&SampleBuffer> {
        self.session.as_ref().map(|session| &session.buffer)
    }

    /// Split borrows of everything one sampling iteration touches
    pub fn sampling_view(&mut self) -> Option<SamplingView<'_, H>> {
        let session = self.session.as_mut()?;
        Some(SamplingView {
            threads: &mut self.threads,
            buffer: &mut session.buffer,
            stats: &mut session.stats,
            start_time: session.start_time,
            paused: session.paused,
            memory_enabled: session.settings.memory,
        })
    }

    /// Unregister a thread: deferred while a session may still reference it
    pub(crate) fn unregister(&mut self, id: RegistrationId) {
        if self.session.is_some() {
            self.threads.mark_pending_delete(id);
        } else {
            self.threads.remove(id);
        }
    }
}
