//! Signal-based thread suspension for Linux
//!
//! Linux has no "suspend that thread" system call, so the target suspends
//! itself: the sampler sends `SIGPROF` with `tgkill`, and the handler (running
//! on the target thread) copies its interrupted registers into a shared slot
//! and parks until the sampler lets it go.
//!
//! ```text
//!  sampler thread                     target thread (in signal handler)
//!  ──────────────                     ─────────────────────────────────
//!  target = tid, tgkill(SIGPROF) ───▶ claim slot (target: tid → CLAIMED)
//!                                     copy ucontext registers
//!  wait(parked)  ◀─────────────────── post(parked)
//!  read registers                     wait(released)
//!  post(released) ──────────────────▶
//!  wait(left)    ◀─────────────────── post(left), return from handler
//! ```
//!
//! Only `sem_post`/`sem_wait`, atomics and plain stores run inside the
//! handler.

#![allow(unsafe_code)] // sigaction, tgkill and sem_* are FFI

use std::cell::UnsafeCell;
use std::io;
use std::mem::MaybeUninit;
use std::path::Path;
use std::ptr;
use std::sync::atomic::{AtomicBool, AtomicI32, AtomicPtr, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use haltprof_common::{RawContext, RegisterLayout};
use log::{debug, warn};

use super::SuspendBackend;
use crate::domain::{BackendError, Tid};

/// Signal used to interrupt profiled threads
const SAMPLE_SIGNAL: libc::c_int = libc::SIGPROF;

/// How long to wait for the target to enter the handler
///
/// A thread that exits (or blocks `SIGPROF`) after `tgkill` succeeds never
/// runs the handler. Past this bound the signal is disarmed and the read
/// fails instead of wedging the sampler.
const DELIVERY_TIMEOUT: Duration = Duration::from_millis(100);

/// Sleep between checks while waiting for the target to park
const PARK_POLL: Duration = Duration::from_micros(20);

/// `target` value: no signal armed
const TARGET_NONE: i32 = 0;
/// `target` value: handler owns the slot and is parked (or about to park)
const TARGET_CLAIMED: i32 = -1;

/// The one slot shared between the active backend and the signal handler
static SLOT: AtomicPtr<SuspendSlot> = AtomicPtr::new(ptr::null_mut());

/// Kernel thread id of the calling thread
#[must_use]
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
pub fn current_tid() -> Tid {
    // SAFETY: gettid has no preconditions
    let tid = unsafe { libc::syscall(libc::SYS_gettid) };
    Tid(tid as u32)
}

// ============================================================================
// Semaphores
// ============================================================================

/// Unnamed POSIX semaphore at a fixed address
struct Semaphore(UnsafeCell<libc::sem_t>);

// SAFETY: sem_* operations on an initialized semaphore are thread-safe
unsafe impl Sync for Semaphore {}

impl Semaphore {
    fn zeroed() -> Self {
        // SAFETY: sem_t is a plain C union; all-zero is a valid bit pattern
        // and it is initialized with sem_init before use.
        Semaphore(UnsafeCell::new(unsafe { MaybeUninit::zeroed().assume_init() }))
    }

    /// Must be called once the semaphore is at its final address
    fn init(&self) -> io::Result<()> {
        // SAFETY: the pointer is valid and the semaphore is not yet in use
        if unsafe { libc::sem_init(self.0.get(), 0, 0) } != 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }

    fn post(&self) {
        // SAFETY: initialized by `init`; sem_post is async-signal-safe
        unsafe {
            libc::sem_post(self.0.get());
        }
    }

    fn wait(&self) {
        // SAFETY: initialized by `init`
        while unsafe { libc::sem_wait(self.0.get()) } != 0 {
            // EINTR: retry. sem_wait has no other failure mode for a valid
            // semaphore.
        }
    }

    fn try_wait(&self) -> bool {
        // SAFETY: initialized by `init`
        unsafe { libc::sem_trywait(self.0.get()) == 0 }
    }

    /// Returns false if `timeout` elapsed without a post
    ///
    /// Polls against a monotonic deadline: `sem_timedwait` only takes
    /// `CLOCK_REALTIME`, which can step.
    fn wait_timeout(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        loop {
            if self.try_wait() {
                return true;
            }
            if Instant::now() >= deadline {
                return false;
            }
            thread::sleep(PARK_POLL);
        }
    }
}

impl Drop for Semaphore {
    fn drop(&mut self) {
        // SAFETY: no thread waits on the semaphore once its slot is dropped
        unsafe {
            libc::sem_destroy(self.0.get());
        }
    }
}

// ============================================================================
// Suspend slot
// ============================================================================

struct SuspendSlot {
    /// TID the armed signal is meant for, or TARGET_NONE / TARGET_CLAIMED
    target: AtomicI32,
    /// Sampler-side bookkeeping: signal sent, `parked` not yet consumed
    awaiting_park: AtomicBool,
    /// Written by the handler before posting `parked`
    context: UnsafeCell<RawContext>,
    parked: Semaphore,
    released: Semaphore,
    left: Semaphore,
}

// SAFETY: `context` is only written by the handler before `parked` is posted
// and only read by the sampler after consuming it.
unsafe impl Sync for SuspendSlot {}

impl SuspendSlot {
    fn boxed() -> Result<Box<Self>, BackendError> {
        let slot = Box::new(SuspendSlot {
            target: AtomicI32::new(TARGET_NONE),
            awaiting_park: AtomicBool::new(false),
            context: UnsafeCell::new(RawContext::empty()),
            parked: Semaphore::zeroed(),
            released: Semaphore::zeroed(),
            left: Semaphore::zeroed(),
        });
        for sem in [&slot.parked, &slot.released, &slot.left] {
            sem.init().map_err(BackendError::SemaphoreInitFailed)?;
        }
        Ok(slot)
    }
}

// ============================================================================
// Signal handler
// ============================================================================

extern "C" fn on_sample_signal(
    _sig: libc::c_int,
    _info: *mut libc::siginfo_t,
    ucontext: *mut libc::c_void,
) {
    // SAFETY: __errno_location always returns the calling thread's errno
    let saved_errno = unsafe { *libc::__errno_location() };

    let slot = SLOT.load(Ordering::Acquire);
    if !slot.is_null() {
        // SAFETY: the slot stays allocated while any signal may be armed
        let slot = unsafe { &*slot };
        #[allow(clippy::cast_possible_truncation)]
        // SAFETY: gettid has no preconditions
        let tid = unsafe { libc::syscall(libc::SYS_gettid) } as i32;

        if slot
            .target
            .compare_exchange(tid, TARGET_CLAIMED, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
        {
            // SAFETY: the kernel passes a valid ucontext_t to SA_SIGINFO
            // handlers; the slot's context is ours until `parked` is posted
            unsafe {
                *slot.context.get() = capture_registers(ucontext.cast_const());
            }
            slot.parked.post();
            slot.released.wait();
            slot.left.post();
        }
    }

    // SAFETY: see above
    unsafe {
        *libc::__errno_location() = saved_errno;
    }
}

/// Copy the general-purpose registers out of a signal frame
///
/// General registers are captured in full; control registers alone are
/// not enough for unwinders on 64-bit targets.
#[cfg(target_arch = "x86_64")]
#[allow(clippy::cast_sign_loss)]
unsafe fn capture_registers(ucontext: *const libc::c_void) -> RawContext {
    let uc = &*ucontext.cast::<libc::ucontext_t>();
    let mut ctx = RawContext::from_slots(RegisterLayout::LinuxX86_64, &[]);
    for (index, value) in uc.uc_mcontext.gregs.iter().enumerate() {
        ctx.set(index, *value as u64);
    }
    ctx
}

#[cfg(target_arch = "x86")]
#[allow(clippy::cast_sign_loss)]
unsafe fn capture_registers(ucontext: *const libc::c_void) -> RawContext {
    let uc = &*ucontext.cast::<libc::ucontext_t>();
    let mut ctx = RawContext::from_slots(RegisterLayout::LinuxX86, &[]);
    for (index, value) in uc.uc_mcontext.gregs.iter().enumerate() {
        ctx.set(index, u64::from(*value as u32));
    }
    ctx
}

#[cfg(target_arch = "aarch64")]
unsafe fn capture_registers(ucontext: *const libc::c_void) -> RawContext {
    let mc = &(*ucontext.cast::<libc::ucontext_t>()).uc_mcontext;
    let mut ctx = RawContext::from_slots(RegisterLayout::LinuxAarch64, &mc.regs);
    ctx.set(31, mc.sp);
    ctx.set(32, mc.pc);
    ctx.set(33, mc.pstate);
    ctx
}

#[cfg(not(any(target_arch = "x86_64", target_arch = "x86", target_arch = "aarch64")))]
unsafe fn capture_registers(_ucontext: *const libc::c_void) -> RawContext {
    RawContext::empty()
}

// ============================================================================
// Backend
// ============================================================================

/// Handle to a thread of this process
///
/// Linux TIDs need no open/close; the handle only records that the thread
/// existed when it registered.
#[derive(Debug)]
pub struct ThreadHandle {
    tid: libc::pid_t,
}

impl ThreadHandle {
    #[must_use]
    #[allow(clippy::cast_sign_loss)]
    pub fn tid(&self) -> Tid {
        Tid(self.tid as u32)
    }
}

/// `SIGPROF`-based suspension backend
///
/// Only one may exist per process: the signal handler is process-wide.
pub struct SignalBackend {
    pid: libc::pid_t,
    old_action: libc::sigaction,
    /// A signal was disarmed after timing out and may still be pending
    stray_signal: AtomicBool,
}

impl SignalBackend {
    /// Install the `SIGPROF` handler
    ///
    /// # Errors
    /// - [`BackendError::Busy`] if another backend is alive
    /// - [`BackendError::SignalInstallFailed`] if `sigaction` fails
    pub fn new() -> Result<Self, BackendError> {
        let raw = Box::into_raw(SuspendSlot::boxed()?);
        if SLOT
            .compare_exchange(ptr::null_mut(), raw, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            // SAFETY: `raw` came from Box::into_raw above and was never shared
            drop(unsafe { Box::from_raw(raw) });
            return Err(BackendError::Busy);
        }

        match install_handler() {
            Ok(old_action) => {
                // SAFETY: getpid has no preconditions
                let pid = unsafe { libc::getpid() };
                debug!("SIGPROF handler installed for pid {pid}");
                Ok(Self { pid, old_action, stray_signal: AtomicBool::new(false) })
            }
            Err(error) => {
                SLOT.store(ptr::null_mut(), Ordering::Release);
                // SAFETY: the handler was never installed, so nothing else
                // can hold the slot
                drop(unsafe { Box::from_raw(raw) });
                Err(BackendError::SignalInstallFailed { signal: "SIGPROF", error })
            }
        }
    }

    fn slot(&self) -> &SuspendSlot {
        // SAFETY: SLOT is non-null and unchanged for the backend's lifetime
        unsafe { &*SLOT.load(Ordering::Acquire) }
    }

    /// Consume the handler's `parked` post for `tid`
    ///
    /// Returns false if the signal was never delivered; the slot is then
    /// disarmed so a late delivery is ignored.
    fn await_park(&self, slot: &SuspendSlot, tid: libc::pid_t) -> bool {
        if !slot.awaiting_park.swap(false, Ordering::AcqRel) {
            return slot.target.load(Ordering::Acquire) == TARGET_CLAIMED;
        }
        if slot.parked.wait_timeout(DELIVERY_TIMEOUT) {
            return true;
        }
        if slot
            .target
            .compare_exchange(tid, TARGET_NONE, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
        {
            self.stray_signal.store(true, Ordering::Release);
            warn!("SIGPROF to TID:{tid} not delivered within {DELIVERY_TIMEOUT:?}");
            return false;
        }
        // Claimed just after the timeout; the post is imminent
        slot.parked.wait();
        true
    }
}

fn install_handler() -> io::Result<libc::sigaction> {
    // SAFETY: both structs are zero-initialized C PODs filled in before use
    unsafe {
        let mut action: libc::sigaction = MaybeUninit::zeroed().assume_init();
        action.sa_sigaction = on_sample_signal
            as extern "C" fn(libc::c_int, *mut libc::siginfo_t, *mut libc::c_void)
            as libc::sighandler_t;
        action.sa_flags = libc::SA_SIGINFO | libc::SA_RESTART;
        libc::sigemptyset(&mut action.sa_mask);

        let mut old_action: libc::sigaction = MaybeUninit::zeroed().assume_init();
        if libc::sigaction(SAMPLE_SIGNAL, &action, &mut old_action) != 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(old_action)
    }
}

impl SuspendBackend for SignalBackend {
    type Handle = ThreadHandle;

    #[allow(clippy::cast_possible_wrap)]
    fn acquire(&self, tid: Tid) -> Result<Self::Handle, BackendError> {
        let task = format!("/proc/self/task/{}", tid.0);
        if !Path::new(&task).exists() {
            return Err(BackendError::NoSuchThread(tid));
        }
        Ok(ThreadHandle { tid: tid.0 as libc::pid_t })
    }

    fn suspend(&self, handle: &Self::Handle) -> bool {
        if handle.tid() == current_tid() {
            // The handler would park the only thread able to release it
            return false;
        }
        let slot = self.slot();
        slot.target.store(handle.tid, Ordering::Release);
        slot.awaiting_park.store(true, Ordering::Release);

        // SAFETY: plain syscall on integer arguments
        let rc = unsafe {
            libc::syscall(libc::SYS_tgkill, self.pid, handle.tid, SAMPLE_SIGNAL)
        };
        if rc != 0 {
            slot.awaiting_park.store(false, Ordering::Release);
            slot.target.store(TARGET_NONE, Ordering::Release);
            debug!("tgkill TID:{} failed: {}", handle.tid, io::Error::last_os_error());
            return false;
        }
        true
    }

    fn read_context(&self, handle: &Self::Handle) -> Option<RawContext> {
        let slot = self.slot();
        if !self.await_park(slot, handle.tid) {
            return None;
        }
        // SAFETY: the handler finished writing before posting `parked` and
        // stays parked until `released` is posted
        let context = unsafe { *slot.context.get() };
        if context.layout().is_empty() {
            return None;
        }
        Some(context)
    }

    fn resume(&self, handle: &Self::Handle) {
        let slot = self.slot();
        if !self.await_park(slot, handle.tid) {
            return;
        }
        slot.released.post();
        slot.left.wait();
        slot.target.store(TARGET_NONE, Ordering::Release);
    }
}

impl Drop for SignalBackend {
    fn drop(&mut self) {
        if self.stray_signal.load(Ordering::Acquire) {
            // Restoring SIGPROF's default action would let a late signal
            // terminate the process. The disarmed slot ignores it instead.
            warn!("Leaving SIGPROF handler installed: an undelivered signal may be pending");
            return;
        }
        // SAFETY: `old_action` was returned by sigaction in `new`
        unsafe {
            libc::sigaction(SAMPLE_SIGNAL, &self.old_action, ptr::null_mut());
        }
        let raw = SLOT.swap(ptr::null_mut(), Ordering::AcqRel);
        if !raw.is_null() {
            // SAFETY: produced by Box::into_raw in `new`; our handler is no
            // longer installed and every armed signal has been released
            drop(unsafe { Box::from_raw(raw) });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    // SignalBackend is process-wide; serialize the tests that create one
    static BACKEND_LOCK: Mutex<()> = Mutex::new(());

    fn semaphore() -> Arc<Semaphore> {
        let semaphore = Arc::new(Semaphore::zeroed());
        semaphore.init().unwrap();
        semaphore
    }

    #[test]
    fn test_wait_timeout_takes_pending_post() {
        let semaphore = semaphore();
        semaphore.post();
        assert!(semaphore.wait_timeout(Duration::from_millis(20)));
        assert!(!semaphore.try_wait());
    }

    #[test]
    fn test_wait_timeout_gives_up_without_post() {
        let semaphore = semaphore();
        let started = Instant::now();
        assert!(!semaphore.wait_timeout(Duration::from_millis(20)));
        let waited = started.elapsed();
        assert!(waited >= Duration::from_millis(20));
        assert!(waited < Duration::from_secs(1));
    }

    #[test]
    fn test_wait_timeout_sees_post_from_another_thread() {
        let semaphore = semaphore();
        let poster = {
            let semaphore = Arc::clone(&semaphore);
            thread::spawn(move || {
                thread::sleep(Duration::from_millis(5));
                semaphore.post();
            })
        };
        assert!(semaphore.wait_timeout(Duration::from_secs(5)));
        poster.join().unwrap();
    }

    #[test]
    fn test_acquire_unknown_thread_fails() {
        let _guard = BACKEND_LOCK.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        let backend = SignalBackend::new().expect("install handler");
        let result = backend.acquire(Tid(u32::MAX - 1));
        assert!(matches!(result, Err(BackendError::NoSuchThread(_))));
    }

    #[test]
    fn test_second_backend_is_busy() {
        let _guard = BACKEND_LOCK.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        let first = SignalBackend::new().expect("install handler");
        assert!(matches!(SignalBackend::new(), Err(BackendError::Busy)));
        drop(first);
        assert!(SignalBackend::new().is_ok());
    }

    #[test]
    fn test_refuses_to_suspend_calling_thread() {
        let _guard = BACKEND_LOCK.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        let backend = SignalBackend::new().expect("install handler");
        let handle = backend.acquire(current_tid()).expect("own thread exists");
        assert!(!backend.suspend(&handle));
    }

    #[test]
    fn test_suspend_read_resume_spinning_thread() {
        let _guard = BACKEND_LOCK.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        let backend = SignalBackend::new().expect("install handler");

        let running = Arc::new(AtomicBool::new(true));
        let (tid_tx, tid_rx) = std::sync::mpsc::channel();
        let spinner = {
            let running = Arc::clone(&running);
            std::thread::spawn(move || {
                tid_tx.send(current_tid()).unwrap();
                let mut counter = 0u64;
                while running.load(Ordering::Relaxed) {
                    counter = counter.wrapping_add(1);
                    std::hint::black_box(counter);
                }
            })
        };
        let tid = tid_rx.recv().unwrap();
        let handle = backend.acquire(tid).expect("spinner exists");

        for _ in 0..5 {
            assert!(backend.suspend(&handle));
            let context = backend.read_context(&handle);
            backend.resume(&handle);

            #[cfg(any(target_arch = "x86_64", target_arch = "aarch64"))]
            {
                let regs = context.expect("context").registers().expect("registers");
                assert!(!regs.pc.is_null());
                assert!(!regs.sp.is_null());
            }
            #[cfg(not(any(target_arch = "x86_64", target_arch = "aarch64")))]
            let _ = context;
        }

        running.store(false, Ordering::Relaxed);
        spinner.join().unwrap();
    }
}
