//! Sampler control loop
//!
//! One background thread per session. Each iteration runs entirely under
//! the shared state lock:
//!
//! 1. Exit if the live generation is no longer the one this loop was bound to
//! 2. Drop expired markers from the buffer
//! 3. Unless paused, sample every eligible thread in registration order
//!
//! The lock is released before sleeping for the interval, so a stop request
//! waits for at most one iteration and never for a sleep.

use std::io;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Instant;

use log::{debug, info, warn};

use super::protocol::{sample_thread, SampleOutcome};
use super::timer::{tune_sampler_thread, TimerNegotiator, TimerResolution};
use crate::domain::{Generation, SamplerError, SamplingInterval};
use crate::memory::MemoryProbe;
use crate::platform::SuspendBackend;
use crate::profiler::{ProfilerState, SamplingView, SharedState};

const THREAD_NAME: &str = "haltprof-sampler";

/// What the worker thread needs, passed in explicitly at spawn
pub struct SamplerContext<B: SuspendBackend> {
    pub shared: Arc<SharedState<B::Handle>>,
    pub backend: Arc<B>,
    pub memory: Arc<dyn MemoryProbe>,
}

impl<B: SuspendBackend> Clone for SamplerContext<B> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
            backend: Arc::clone(&self.backend),
            memory: Arc::clone(&self.memory),
        }
    }
}

/// Advances the generation past a sampler's own, if it is still live
type Retire = Box<dyn FnOnce() + Send>;

/// Handle to a running control loop
///
/// Created and stopped with the state lock held (both take the locked
/// [`ProfilerState`]). Dropping it joins the worker, so it must be dropped
/// after the lock is released. A sampler dropped without [`stop`] retires
/// its own generation first.
///
/// [`stop`]: SamplerThread::stop
pub struct SamplerThread {
    generation: Generation,
    interval: SamplingInterval,
    timer: TimerNegotiator,
    worker: Option<JoinHandle<()>>,
    retire: Option<Retire>,
    stopped: bool,
}

impl SamplerThread {
    /// Negotiate the timer and start a loop bound to the live generation
    ///
    /// # Errors
    /// Returns [`SamplerError::SpawnFailed`] if the OS refuses to create the
    /// worker thread; the timer request is undone first.
    pub fn spawn<B: SuspendBackend>(
        state: &ProfilerState<B::Handle>,
        ctx: SamplerContext<B>,
        interval: SamplingInterval,
        timer: Arc<dyn TimerResolution>,
    ) -> Result<Self, SamplerError> {
        let generation = state.generation();
        let shared = Arc::downgrade(&ctx.shared);
        let retire: Retire = Box::new(move || {
            if let Some(shared) = shared.upgrade() {
                let mut state = shared.lock();
                if state.generation() == generation {
                    state.advance_generation();
                }
            }
        });

        Self::start(generation, interval, timer, retire, move || {
            thread::Builder::new()
                .name(THREAD_NAME.to_string())
                .spawn(move || run(&ctx, generation, interval))
        })
    }

    fn start(
        generation: Generation,
        interval: SamplingInterval,
        timer: Arc<dyn TimerResolution>,
        retire: Retire,
        launch: impl FnOnce() -> io::Result<JoinHandle<()>>,
    ) -> Result<Self, SamplerError> {
        let mut timer = TimerNegotiator::engage(timer, interval);
        match launch() {
            Ok(worker) => Ok(Self {
                generation,
                interval,
                timer,
                worker: Some(worker),
                retire: Some(retire),
                stopped: false,
            }),
            Err(error) => {
                timer.release();
                Err(SamplerError::SpawnFailed(error))
            }
        }
    }

    /// Advance the generation past this loop's and restore the timer
    ///
    /// Calling it again does nothing; the generation only moves once.
    pub fn stop<H>(&mut self, state: &mut ProfilerState<H>) {
        if self.stopped {
            return;
        }
        self.stopped = true;
        self.retire = None;
        if state.generation() == self.generation {
            state.advance_generation();
        }
        self.timer.release();
        debug!("Sampler for {} told to stop", self.generation);
    }

    #[must_use]
    pub fn generation(&self) -> Generation {
        self.generation
    }

    #[must_use]
    pub fn interval(&self) -> SamplingInterval {
        self.interval
    }
}

impl Drop for SamplerThread {
    fn drop(&mut self) {
        if !self.stopped {
            // Takes the state lock
            if let Some(retire) = self.retire.take() {
                retire();
            }
            self.stopped = true;
            debug!("Sampler for {} retired on drop", self.generation);
        }
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                warn!("Sampler thread for {} panicked", self.generation);
            }
        }
        self.timer.release();
    }
}

impl std::fmt::Debug for SamplerThread {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SamplerThread")
            .field("generation", &self.generation)
            .field("interval", &self.interval)
            .field("stopped", &self.stopped)
            .finish_non_exhaustive()
    }
}

fn run<B: SuspendBackend>(ctx: &SamplerContext<B>, generation: Generation, interval: SamplingInterval) {
    tune_sampler_thread(interval);
    info!("Sampler for {generation} running every {interval}");

    loop {
        {
            let mut state = ctx.shared.lock();
            if state.generation() != generation {
                break;
            }
            if let Some(view) = state.sampling_view() {
                sample_iteration(ctx.backend.as_ref(), ctx.memory.as_ref(), view);
            }
        }
        thread::sleep(interval.as_duration());
    }

    info!("Sampler for {generation} exited");
}

fn sample_iteration<B: SuspendBackend>(
    backend: &B,
    memory: &dyn MemoryProbe,
    view: SamplingView<'_, B::Handle>,
) {
    let SamplingView { threads, buffer, stats, start_time, paused, memory_enabled } = view;

    buffer.delete_expired_stored_markers();
    stats.iterations += 1;
    if paused {
        return;
    }

    let mut first = true;
    for record in threads.iter_mut() {
        if !record.is_eligible() {
            continue;
        }

        if record.activity().can_duplicate_last_sample()
            && buffer.duplicate_last_sample(record.tid(), start_time)
        {
            stats.duplicates += 1;
            continue;
        }

        record.update_responsiveness(Instant::now());
        let probe = (first && memory_enabled).then_some(memory);
        first = false;

        match sample_thread(backend, record, probe, buffer, start_time) {
            SampleOutcome::Recorded => stats.samples += 1,
            SampleOutcome::NoHandle => stats.missing_handles += 1,
            SampleOutcome::SuspendFailed => stats.suspend_failures += 1,
            SampleOutcome::ContextUnavailable => stats.context_failures += 1,
        }
    }
}
