//! # haltprof - Suspend-and-Sample Thread Profiler Core
//!
//! haltprof is the sampling engine of a statistical profiler. A background
//! sampler thread wakes at a fixed interval, briefly stops each registered
//! application thread, copies its registers (program counter, stack pointer,
//! frame pointer and the full general-purpose register file), and lets it
//! run again. Threads that are known to be asleep get their previous sample
//! repeated instead of being stopped again.
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                     Profiled Application                        │
//! │    register_thread()  ·  sleep_scope()  ·  start() / stop()     │
//! └───────────────────────┬─────────────────────────────────────────┘
//!                         │
//!                         ▼
//! ┌─────────────────────────────────────────────────────────────────┐
//! │             SharedState: one Mutex<ProfilerState>               │
//! │   generation  ·  ThreadRegistry  ·  SampleBuffer  ·  paused     │
//! └───────────────────────┬─────────────────────────────────────────┘
//!                         │ locked for a whole iteration
//!                         ▼
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                 SamplerThread (one per session)                 │
//! │                                                                 │
//! │  generation check ─▶ expire markers ─▶ for each eligible thread │
//! │                                          │                      │
//! │                duplicate fast path ◀─────┤                      │
//! │                                          ▼                      │
//! │     timestamp ─▶ memory ─▶ SuspendGuard ─▶ read context ─▶ add  │
//! │                                                                 │
//! │  unlock ─▶ sleep(interval)                                      │
//! └───────────────────────┬─────────────────────────────────────────┘
//!                         │ SuspendBackend
//!                         ▼
//! ┌─────────────────────────────────────────────────────────────────┐
//! │  Linux: SIGPROF + tgkill, handler parks on a semaphore          │
//! │  Windows: SuspendThread / GetThreadContext / ResumeThread       │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Module Structure
//!
//! - [`profiler`]: [`Profiler`], the session owner. Start, stop, pause,
//!   markers and thread registration
//! - [`sampling`]: the control loop, the per-thread suspend protocol and
//!   timer resolution negotiation
//! - [`platform`]: the [`platform::SuspendBackend`] trait and the per-OS
//!   backends
//! - [`registry`]: registered threads and their sleep trackers
//! - [`buffer`]: the bounded sample ring with stored markers
//! - [`memory`]: whole-process resident and unique set size
//! - [`report`]: human-readable and JSON session summaries
//! - [`cli`]: arguments of the demo binary
//! - [`domain`]: newtypes and error enums
//!
//! ## Shutdown
//!
//! There is no cancellation flag. Each sampler is bound to the activity
//! generation that was live when it was spawned and exits at the first
//! iteration that sees a different one. Stopping a session advances the
//! generation under the lock and then joins the sampler, so no suspend
//! outlives [`Profiler::stop`].
//!
//! ## Typical Usage
//!
//! ```no_run
//! use haltprof::{Profiler, SessionSettings};
//!
//! # fn main() -> Result<(), haltprof::domain::SamplerError> {
//! let profiler = Profiler::native()?;
//! let worker = std::thread::spawn(|| { /* ... */ });
//! let _me = profiler.register_current_thread("main");
//!
//! profiler.start(SessionSettings { interval_ms: 1.0, ..Default::default() })?;
//! // ... run the workload ...
//! let data = profiler.stop()?;
//! println!("{} samples", data.buffer.len());
//! # worker.join().ok();
//! # Ok(())
//! # }
//! ```

pub mod buffer;
pub mod cli;
pub mod domain;
pub mod memory;
pub mod platform;
pub mod profiler;
pub mod registry;
pub mod report;
pub mod sampling;

pub use profiler::{Profiler, Registration, SessionData, SessionSettings};
