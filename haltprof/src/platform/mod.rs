//! Thread suspension backends
//!
//! The sampler is written once against [`SuspendBackend`]; each OS supplies
//! its own way of stopping a thread and reading its registers:
//!
//! - **Linux** ([`linux::SignalBackend`]): `tgkill` delivers `SIGPROF`, the
//!   handler parks the target on a semaphore after copying its registers
//! - **Windows** (`windows::Win32Backend`): `SuspendThread`,
//!   `GetThreadContext`, `ResumeThread`
//!
//! Other targets get [`UnsupportedBackend`], whose constructor fails.

use haltprof_common::RawContext;

use crate::domain::{BackendError, Tid};

#[cfg(target_os = "linux")]
pub mod linux;
#[cfg(windows)]
pub mod windows;

#[cfg(target_os = "linux")]
pub use linux::{current_tid, SignalBackend as NativeBackend};
#[cfg(windows)]
pub use windows::{current_tid, Win32Backend as NativeBackend};
#[cfg(not(any(target_os = "linux", windows)))]
pub use UnsupportedBackend as NativeBackend;

/// The capability a platform must provide for sampling other threads
///
/// Thread handles are released by dropping them. Every `suspend` that
/// returns `true` must be followed by exactly one `resume` on the same
/// handle; [`crate::sampling::SuspendGuard`] enforces that pairing.
pub trait SuspendBackend: Send + Sync + 'static {
    /// OS reference to one profiled thread
    type Handle: Send + 'static;

    /// Open a handle to `tid` with the rights needed to suspend it, resume
    /// it and read its registers
    ///
    /// # Errors
    /// Returns an error if the thread does not exist or cannot be opened
    fn acquire(&self, tid: Tid) -> Result<Self::Handle, BackendError>;

    /// Ask the OS to stop the thread. `false` means the request itself
    /// failed and the thread is still running.
    fn suspend(&self, handle: &Self::Handle) -> bool;

    /// Read the registers of a thread after a successful `suspend`
    ///
    /// Suspension can be asynchronous; this call is what confirms the thread
    /// has actually stopped. `None` means the context could not be trusted.
    fn read_context(&self, handle: &Self::Handle) -> Option<RawContext>;

    /// Let a suspended thread run again
    fn resume(&self, handle: &Self::Handle);
}

/// Backend for targets without a suspension primitive
#[derive(Debug)]
pub struct UnsupportedBackend {
    _private: (),
}

impl UnsupportedBackend {
    /// # Errors
    /// Always returns [`BackendError::Unsupported`]
    pub fn new() -> Result<Self, BackendError> {
        Err(BackendError::Unsupported)
    }
}

impl SuspendBackend for UnsupportedBackend {
    type Handle = Tid;

    fn acquire(&self, _tid: Tid) -> Result<Self::Handle, BackendError> {
        Err(BackendError::Unsupported)
    }

    fn suspend(&self, _handle: &Self::Handle) -> bool {
        false
    }

    fn read_context(&self, _handle: &Self::Handle) -> Option<RawContext> {
        None
    }

    fn resume(&self, _handle: &Self::Handle) {}
}

/// Thread id of the calling thread on targets without a native backend
#[cfg(not(any(target_os = "linux", windows)))]
#[must_use]
pub fn current_tid() -> Tid {
    use std::sync::atomic::{AtomicU32, Ordering};

    static NEXT: AtomicU32 = AtomicU32::new(1);
    thread_local! {
        static TID: u32 = NEXT.fetch_add(1, Ordering::Relaxed);
    }
    Tid(TID.with(|tid| *tid))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unsupported_backend_refuses_construction() {
        assert!(matches!(UnsupportedBackend::new(), Err(BackendError::Unsupported)));
    }

    #[test]
    fn test_current_tid_is_stable_per_thread() {
        let here = current_tid();
        assert_eq!(here, current_tid());
        let other = std::thread::spawn(current_tid).join().unwrap();
        assert_ne!(here, other);
    }
}
