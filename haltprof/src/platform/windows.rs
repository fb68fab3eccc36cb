//! `SuspendThread`-based thread suspension for Windows

#![allow(unsafe_code)] // Win32 thread APIs are FFI

use std::io;
use std::mem::MaybeUninit;

use haltprof_common::{RawContext, RegisterLayout};
use log::debug;
use winapi::shared::minwindef::{DWORD, FALSE};
use winapi::um::handleapi::CloseHandle;
use winapi::um::processthreadsapi::{
    GetCurrentThreadId, GetThreadContext, OpenThread, ResumeThread, SuspendThread,
};
use winapi::um::winnt::{
    CONTEXT, HANDLE, THREAD_GET_CONTEXT, THREAD_QUERY_INFORMATION, THREAD_SUSPEND_RESUME,
};

use super::SuspendBackend;
use crate::domain::{BackendError, Tid};

/// `SuspendThread` return value on failure
const SUSPEND_FAILED: DWORD = DWORD::MAX;

/// Thread id of the calling thread
#[must_use]
pub fn current_tid() -> Tid {
    // SAFETY: no preconditions
    Tid(unsafe { GetCurrentThreadId() })
}

/// Owned `HANDLE` to a profiled thread, closed on drop
#[derive(Debug)]
pub struct ThreadHandle {
    tid: Tid,
    raw: HANDLE,
}

// SAFETY: thread handles may be used from any thread
unsafe impl Send for ThreadHandle {}

impl ThreadHandle {
    #[must_use]
    pub fn tid(&self) -> Tid {
        self.tid
    }
}

impl Drop for ThreadHandle {
    fn drop(&mut self) {
        if !self.raw.is_null() {
            // SAFETY: `raw` came from OpenThread and is closed exactly once
            unsafe {
                CloseHandle(self.raw);
            }
            self.raw = std::ptr::null_mut();
        }
    }
}

/// Native Win32 suspension backend
#[derive(Debug, Default)]
pub struct Win32Backend {
    _private: (),
}

impl Win32Backend {
    /// # Errors
    /// Never fails on Windows; the signature matches the other backends
    pub fn new() -> Result<Self, BackendError> {
        Ok(Self { _private: () })
    }
}

impl SuspendBackend for Win32Backend {
    type Handle = ThreadHandle;

    fn acquire(&self, tid: Tid) -> Result<Self::Handle, BackendError> {
        // OpenThread rather than DuplicateHandle: the latter is refused
        // inside some sandboxes
        // SAFETY: plain call; a null return is handled below
        let raw = unsafe {
            OpenThread(
                THREAD_GET_CONTEXT | THREAD_SUSPEND_RESUME | THREAD_QUERY_INFORMATION,
                FALSE,
                tid.0,
            )
        };
        if raw.is_null() {
            return Err(BackendError::ThreadOpenFailed { tid, error: io::Error::last_os_error() });
        }
        Ok(ThreadHandle { tid, raw })
    }

    fn suspend(&self, handle: &Self::Handle) -> bool {
        // SAFETY: `raw` is a live handle with THREAD_SUSPEND_RESUME
        let previous = unsafe { SuspendThread(handle.raw) };
        if previous == SUSPEND_FAILED {
            debug!("SuspendThread {} failed: {}", handle.tid, io::Error::last_os_error());
            return false;
        }
        true
    }

    fn read_context(&self, handle: &Self::Handle) -> Option<RawContext> {
        // SuspendThread returns before the thread has necessarily stopped;
        // GetThreadContext only succeeds once it really has.
        // SAFETY: CONTEXT is a C POD; ContextFlags is set before the call
        let mut context: CONTEXT = unsafe { MaybeUninit::zeroed().assume_init() };
        context.ContextFlags = context_flags();
        // The target is suspended and may hold the heap or stderr lock:
        // report failure without logging.
        // SAFETY: `raw` has THREAD_GET_CONTEXT; `context` is aligned by its type
        if unsafe { GetThreadContext(handle.raw, &mut context) } == 0 {
            return None;
        }
        Some(pack_registers(&context))
    }

    fn resume(&self, handle: &Self::Handle) {
        // SAFETY: `raw` is a live handle with THREAD_SUSPEND_RESUME
        unsafe {
            ResumeThread(handle.raw);
        }
    }
}

// Control-only contexts are faster, but unwinding from them crashes
// RtlVirtualUnwind on x86-64
#[cfg(target_arch = "x86_64")]
fn context_flags() -> DWORD {
    winapi::um::winnt::CONTEXT_FULL
}

#[cfg(target_arch = "x86")]
fn context_flags() -> DWORD {
    winapi::um::winnt::CONTEXT_CONTROL | winapi::um::winnt::CONTEXT_INTEGER
}

#[cfg(not(any(target_arch = "x86_64", target_arch = "x86")))]
fn context_flags() -> DWORD {
    0
}

#[cfg(target_arch = "x86_64")]
fn pack_registers(c: &CONTEXT) -> RawContext {
    RawContext::from_slots(
        RegisterLayout::WindowsX86_64,
        &[
            c.Rax, c.Rcx, c.Rdx, c.Rbx, c.Rsp, c.Rbp, c.Rsi, c.Rdi, c.R8, c.R9, c.R10, c.R11,
            c.R12, c.R13, c.R14, c.R15, c.Rip, u64::from(c.EFlags),
        ],
    )
}

#[cfg(target_arch = "x86")]
fn pack_registers(c: &CONTEXT) -> RawContext {
    let regs = [c.Edi, c.Esi, c.Ebx, c.Edx, c.Ecx, c.Eax, c.Ebp, c.Eip, c.Esp, c.EFlags];
    let mut ctx = RawContext::from_slots(RegisterLayout::WindowsX86, &[]);
    for (index, value) in regs.into_iter().enumerate() {
        ctx.set(index, u64::from(value));
    }
    ctx
}

#[cfg(not(any(target_arch = "x86_64", target_arch = "x86")))]
fn pack_registers(_c: &CONTEXT) -> RawContext {
    RawContext::empty()
}
