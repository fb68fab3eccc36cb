//! # Profiler
//!
//! [`Profiler`] owns the shared state, the suspension backend and the
//! session lifecycle. Every method locks the shared state once; worker
//! joins happen after the lock is released.
//!
//! ```text
//!   register_thread ──▶ ThreadRegistry ◀── sampler iteration ──┐
//!                             ▲                                │
//!   start ── bump generation ─┤                           SampleBuffer
//!   stop  ── bump generation ─┘── take buffer ──▶ SessionData  │
//!                                      ▲                       │
//!                                      └───────────────────────┘
//! ```

mod session;
mod state;

use std::sync::Arc;
use std::time::Instant;

use log::{info, warn};

use crate::buffer::SampleBuffer;
use crate::domain::{Generation, SamplerError, Tid};
use crate::memory::{MemoryProbe, ProcessMemory};
use crate::platform::{current_tid, NativeBackend, SuspendBackend};
use crate::registry::{thread_selected, RegistrationId, SleepScope, ThreadActivity};
use crate::sampling::{SamplerContext, SamplerThread, SystemTimer, TimerResolution};

pub use session::{SessionData, SessionSettings, SessionStats, SessionThread};
pub use state::{ActiveSession, ProfilerState, SamplingView, SharedState};

/// Session owner for one suspension backend
pub struct Profiler<B: SuspendBackend> {
    shared: Arc<SharedState<B::Handle>>,
    backend: Arc<B>,
    memory: Arc<dyn MemoryProbe>,
    timer: Arc<dyn TimerResolution>,
}

impl Profiler<NativeBackend> {
    /// A profiler on this platform's suspension backend
    ///
    /// # Errors
    /// Fails if the backend cannot be set up (handler install, another
    /// backend already active, unsupported platform).
    pub fn native() -> Result<Self, SamplerError> {
        Ok(Self::new(NativeBackend::new()?))
    }
}

impl<B: SuspendBackend> Profiler<B> {
    /// A profiler using the OS memory probe and system timer
    #[must_use]
    pub fn new(backend: B) -> Self {
        Self::with_parts(backend, Arc::new(ProcessMemory), Arc::new(SystemTimer))
    }

    #[must_use]
    pub fn with_parts(
        backend: B,
        memory: Arc<dyn MemoryProbe>,
        timer: Arc<dyn TimerResolution>,
    ) -> Self {
        Self { shared: Arc::new(SharedState::default()), backend: Arc::new(backend), memory, timer }
    }

    #[must_use]
    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// The state shared with the sampler thread
    #[must_use]
    pub fn shared(&self) -> &Arc<SharedState<B::Handle>> {
        &self.shared
    }

    /// Add a thread to the registry, after any already registered
    ///
    /// A thread whose handle cannot be acquired is still registered; it is
    /// skipped by the sampler.
    pub fn register_thread(&self, tid: Tid, name: impl Into<String>) -> Registration<B::Handle> {
        let name = name.into();
        let handle = match self.backend.acquire(tid) {
            Ok(handle) => Some(handle),
            Err(error) => {
                warn!("Registering {tid} ({name}) without a handle: {error}");
                None
            }
        };
        let activity = Arc::new(ThreadActivity::new());

        let mut state = self.shared.lock();
        let has_profile = state
            .session
            .as_ref()
            .is_some_and(|session| thread_selected(&name, &session.settings.filters));
        let id = state.threads.register(tid, name, handle, Arc::clone(&activity), has_profile);
        drop(state);

        Registration { shared: Arc::clone(&self.shared), id, tid, activity }
    }

    /// Register the calling thread
    pub fn register_current_thread(&self, name: impl Into<String>) -> Registration<B::Handle> {
        self.register_thread(current_tid(), name)
    }

    /// Start a session and its sampler thread
    ///
    /// # Errors
    /// [`SamplerError::AlreadyRunning`] if a session is active;
    /// [`SamplerError::SpawnFailed`] if the sampler thread cannot be created,
    /// in which case no session is left behind.
    pub fn start(&self, settings: SessionSettings) -> Result<Generation, SamplerError> {
        let mut state = self.shared.lock();
        if state.is_active() {
            return Err(SamplerError::AlreadyRunning);
        }

        let generation = state.advance_generation();
        let interval = settings.interval();
        state.threads.apply_filters(&settings.filters);
        state.session = Some(ActiveSession {
            start_time: Instant::now(),
            buffer: SampleBuffer::new(settings.entries),
            settings,
            paused: false,
            stats: SessionStats::default(),
            sampler: None,
        });

        match SamplerThread::spawn(&*state, self.context(), interval, Arc::clone(&self.timer)) {
            Ok(sampler) => {
                if let Some(session) = state.session.as_mut() {
                    session.sampler = Some(sampler);
                }
            }
            Err(error) => {
                state.session = None;
                state.threads.clear_profiles();
                return Err(error);
            }
        }

        let profiled = state.threads.iter().filter(|record| record.has_profile()).count();
        info!("Session {generation} started: {profiled} thread(s), every {interval}");
        Ok(generation)
    }

    /// Stop the session, wait for the sampler to exit and hand back its data
    ///
    /// # Errors
    /// [`SamplerError::NotRunning`] if no session is active.
    pub fn stop(&self) -> Result<SessionData, SamplerError> {
        let (mut session, threads, generation) = {
            let mut state = self.shared.lock();
            let Some(mut session) = state.session.take() else {
                return Err(SamplerError::NotRunning);
            };
            let generation = session
                .sampler
                .as_ref()
                .map_or_else(|| state.generation(), SamplerThread::generation);
            if let Some(sampler) = session.sampler.as_mut() {
                sampler.stop(&mut *state);
            }

            let threads = state
                .threads
                .iter()
                .map(|record| SessionThread {
                    tid: record.tid(),
                    name: record.name().to_string(),
                    profiled: record.has_profile(),
                })
                .collect::<Vec<_>>();
            let discarded = state.threads.discard_pending_deletes();
            state.threads.clear_profiles();
            if discarded > 0 {
                info!("Dropped {discarded} unregistered thread(s)");
            }
            (session, threads, generation)
        };

        // Joins the worker; the lock is free so its last iteration can run
        drop(session.sampler.take());

        let duration = session.start_time.elapsed();
        info!(
            "Session {generation} stopped after {:.1}s: {} sample(s), {} duplicate(s)",
            duration.as_secs_f64(),
            session.stats.samples,
            session.stats.duplicates
        );
        Ok(SessionData {
            generation,
            settings: session.settings,
            buffer: session.buffer,
            stats: session.stats,
            duration,
            threads,
        })
    }

    /// Keep the sampler running but stop taking samples
    ///
    /// # Errors
    /// [`SamplerError::NotRunning`] if no session is active.
    pub fn pause(&self) -> Result<(), SamplerError> {
        self.set_paused(true)
    }

    /// # Errors
    /// [`SamplerError::NotRunning`] if no session is active.
    pub fn resume(&self) -> Result<(), SamplerError> {
        self.set_paused(false)
    }

    fn set_paused(&self, paused: bool) -> Result<(), SamplerError> {
        let mut state = self.shared.lock();
        let session = state.session.as_mut().ok_or(SamplerError::NotRunning)?;
        session.paused = paused;
        Ok(())
    }

    /// Record a named marker in the active session's buffer
    ///
    /// # Errors
    /// [`SamplerError::NotRunning`] if no session is active.
    pub fn add_marker(&self, name: impl Into<String>) -> Result<(), SamplerError> {
        let mut state = self.shared.lock();
        let session = state.session.as_mut().ok_or(SamplerError::NotRunning)?;
        session.buffer.add_marker(name, session.start_time);
        Ok(())
    }

    #[must_use]
    pub fn is_active(&self) -> bool {
        self.shared.lock().is_active()
    }

    #[must_use]
    pub fn is_paused(&self) -> bool {
        self.shared.lock().is_paused()
    }

    #[must_use]
    pub fn generation(&self) -> Generation {
        self.shared.lock().generation()
    }

    /// Counters of the active session so far
    #[must_use]
    pub fn stats(&self) -> Option<SessionStats> {
        self.shared.lock().session.as_ref().map(|session| session.stats)
    }

    /// Inspect the active session's buffer under the lock
    pub fn with_buffer<R>(&self, f: impl FnOnce(&SampleBuffer) -> R) -> Option<R> {
        self.shared.lock().buffer().map(f)
    }

    fn context(&self) -> SamplerContext<B> {
        SamplerContext {
            shared: Arc::clone(&self.shared),
            backend: Arc::clone(&self.backend),
            memory: Arc::clone(&self.memory),
        }
    }
}

impl<B: SuspendBackend> Drop for Profiler<B> {
    fn drop(&mut self) {
        if self.is_active() {
            if let Err(error) = self.stop() {
                warn!("Failed to stop session on drop: {error}");
            }
        }
    }
}

/// A registered thread; unregisters when dropped
///
/// While a session is running the record is only marked for deletion and
/// removed when the session stops.
pub struct Registration<H> {
    shared: Arc<SharedState<H>>,
    id: RegistrationId,
    tid: Tid,
    activity: Arc<ThreadActivity>,
}

impl<H> Registration<H> {
    #[must_use]
    pub fn id(&self) -> RegistrationId {
        self.id
    }

    #[must_use]
    pub fn tid(&self) -> Tid {
        self.tid
    }

    /// Sleep tracker the registered thread reports its blocking waits to
    #[must_use]
    pub fn activity(&self) -> &ThreadActivity {
        &self.activity
    }

    /// Shorthand for `activity().sleep_scope()`
    #[must_use = "the thread is marked awake again when the guard drops"]
    pub fn sleep_scope(&self) -> SleepScope<'_> {
        self.activity.sleep_scope()
    }
}

impl<H> Drop for Registration<H> {
    fn drop(&mut self) {
        self.shared.lock().unregister(self.id);
    }
}

impl<H> std::fmt::Debug for Registration<H> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Registration").field("id", &self.id).field("tid", &self.tid).finish()
    }
}
