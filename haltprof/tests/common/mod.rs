//! Shared test doubles: a scripted suspension backend, a memory probe and a
//! timer that count what the sampler asks of them

#![allow(dead_code)]

use std::collections::HashSet;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use haltprof::domain::{BackendError, SamplingInterval, Tid};
use haltprof::platform::SuspendBackend;
use haltprof::sampling::TimerResolution;
use haltprof::memory::MemoryProbe;
use haltprof::{Profiler, SessionSettings};
use haltprof_common::{RawContext, RegisterLayout};

pub const RESIDENT: u64 = 64 * 1024 * 1024;
pub const UNIQUE: u64 = 16 * 1024 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Event {
    Suspend(Tid),
    SuspendRefused(Tid),
    Read(Tid),
    ReadFailed(Tid),
    Resume(Tid),
}

#[derive(Default)]
struct Script {
    events: Vec<Event>,
    suspended: HashSet<Tid>,
    fail_suspend: HashSet<Tid>,
    fail_read: HashSet<Tid>,
    /// Resumes of a thread that was not suspended
    unpaired_resumes: u32,
}

/// Backend whose handles are plain tids and whose failures are scripted
#[derive(Default)]
pub struct MockBackend {
    script: Mutex<Script>,
    missing: HashSet<Tid>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl MockBackend {
    /// Threads in `missing` fail handle acquisition
    pub fn with_missing(missing: &[Tid]) -> Self {
        Self { missing: missing.iter().copied().collect(), ..Self::default() }
    }

    pub fn fail_suspend(&self, tid: Tid) {
        lock(&self.script).fail_suspend.insert(tid);
    }

    pub fn fail_read(&self, tid: Tid) {
        lock(&self.script).fail_read.insert(tid);
    }

    pub fn events(&self) -> Vec<Event> {
        lock(&self.script).events.clone()
    }

    pub fn count(&self, wanted: impl Fn(&Event) -> bool) -> usize {
        lock(&self.script).events.iter().filter(|event| wanted(event)).count()
    }

    pub fn suspends(&self) -> usize {
        self.count(|event| matches!(event, Event::Suspend(_)))
    }

    pub fn resumes(&self) -> usize {
        self.count(|event| matches!(event, Event::Resume(_)))
    }

    pub fn suspends_of(&self, tid: Tid) -> usize {
        self.count(|event| *event == Event::Suspend(tid))
    }

    pub fn resumes_of(&self, tid: Tid) -> usize {
        self.count(|event| *event == Event::Resume(tid))
    }

    pub fn touched(&self, tid: Tid) -> bool {
        self.count(|event| {
            matches!(event,
                Event::Suspend(t) | Event::SuspendRefused(t) | Event::Read(t)
                | Event::ReadFailed(t) | Event::Resume(t) if *t == tid)
        }) > 0
    }

    /// Threads currently left suspended
    pub fn still_suspended(&self) -> usize {
        lock(&self.script).suspended.len()
    }

    pub fn unpaired_resumes(&self) -> u32 {
        lock(&self.script).unpaired_resumes
    }

    /// The pc reported for a thread: its tid times 0x1000
    pub fn pc_of(tid: Tid) -> u64 {
        u64::from(tid.0) * 0x1000
    }
}

impl SuspendBackend for MockBackend {
    type Handle = Tid;

    fn acquire(&self, tid: Tid) -> Result<Tid, BackendError> {
        if self.missing.contains(&tid) {
            Err(BackendError::NoSuchThread(tid))
        } else {
            Ok(tid)
        }
    }

    fn suspend(&self, handle: &Tid) -> bool {
        let mut script = lock(&self.script);
        if script.fail_suspend.contains(handle) {
            script.events.push(Event::SuspendRefused(*handle));
            return false;
        }
        script.events.push(Event::Suspend(*handle));
        script.suspended.insert(*handle);
        true
    }

    fn read_context(&self, handle: &Tid) -> Option<RawContext> {
        let mut script = lock(&self.script);
        if script.fail_read.contains(handle) {
            script.events.push(Event::ReadFailed(*handle));
            return None;
        }
        script.events.push(Event::Read(*handle));
        let mut slots = [0_u64; 23];
        slots[16] = Self::pc_of(*handle);
        slots[15] = 0x7ffd_0000;
        slots[10] = 0x7ffd_0040;
        Some(RawContext::from_slots(RegisterLayout::LinuxX86_64, &slots))
    }

    fn resume(&self, handle: &Tid) {
        let mut script = lock(&self.script);
        script.events.push(Event::Resume(*handle));
        if !script.suspended.remove(handle) {
            script.unpaired_resumes += 1;
        }
    }
}

/// Fixed memory readings with a call counter
#[derive(Default)]
pub struct MockProbe {
    pub reads: AtomicU32,
}

impl MemoryProbe for MockProbe {
    fn resident_bytes(&self) -> u64 {
        self.reads.fetch_add(1, Ordering::SeqCst);
        RESIDENT
    }

    fn unique_bytes(&self) -> u64 {
        UNIQUE
    }
}

/// Counts timer requests and remembers the last interval asked for
#[derive(Default)]
pub struct CountingTimer {
    pub begins: AtomicU32,
    pub ends: AtomicU32,
    pub last_ms: AtomicU32,
}

impl TimerResolution for CountingTimer {
    fn begin(&self, interval: SamplingInterval) {
        self.begins.fetch_add(1, Ordering::SeqCst);
        self.last_ms.store(interval.as_millis(), Ordering::SeqCst);
    }

    fn end(&self, interval: SamplingInterval) {
        self.ends.fetch_add(1, Ordering::SeqCst);
        self.last_ms.store(interval.as_millis(), Ordering::SeqCst);
    }
}

pub struct Harness {
    pub profiler: Profiler<MockBackend>,
    pub probe: Arc<MockProbe>,
    pub timer: Arc<CountingTimer>,
}

impl Harness {
    pub fn new(backend: MockBackend) -> Self {
        let probe = Arc::new(MockProbe::default());
        let timer = Arc::new(CountingTimer::default());
        let profiler = Profiler::with_parts(backend, probe.clone(), timer.clone());
        Self { profiler, probe, timer }
    }

    pub fn backend(&self) -> &MockBackend {
        self.profiler.backend()
    }

    /// Block until the session has run at least `n` iterations
    pub fn wait_iterations(&self, n: u64) {
        wait_until(|| self.profiler.stats().is_some_and(|stats| stats.iterations >= n));
    }
}

pub fn settings(interval_ms: f64) -> SessionSettings {
    SessionSettings { interval_ms, ..SessionSettings::default() }
}

/// Poll `done` every millisecond, failing the test after five seconds
pub fn wait_until(mut done: impl FnMut() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(5);
    while !done() {
        assert!(Instant::now() < deadline, "condition not reached in time");
        std::thread::sleep(Duration::from_millis(1));
    }
}
