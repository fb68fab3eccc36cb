//! Process memory measurement
//!
//! Resident set size is read once per sampling iteration and attached to the
//! first sample of that iteration. Unique set size is reported as 0 where the
//! platform cannot provide it.

/// Source of whole-process memory readings
pub trait MemoryProbe: Send + Sync + 'static {
    /// Resident set size in bytes (0 if unavailable)
    fn resident_bytes(&self) -> u64;

    /// Unique (private) set size in bytes (0 if unavailable)
    fn unique_bytes(&self) -> u64;
}

/// Reads the current process's memory from the OS
#[derive(Debug, Default, Clone, Copy)]
pub struct ProcessMemory;

#[cfg(target_os = "linux")]
mod imp {
    use std::fs;

    /// Resident pages from /proc/self/statm times the page size
    pub fn resident_bytes() -> u64 {
        let Ok(statm) = fs::read_to_string("/proc/self/statm") else {
            return 0;
        };
        parse_statm_resident(&statm).map_or(0, |pages| pages * page_size())
    }

    /// Private_Clean + Private_Dirty from /proc/self/smaps_rollup
    pub fn unique_bytes() -> u64 {
        fs::read_to_string("/proc/self/smaps_rollup")
            .ok()
            .and_then(|rollup| parse_private_kib(&rollup))
            .map_or(0, |kib| kib * 1024)
    }

    #[allow(unsafe_code, clippy::cast_sign_loss)]
    fn page_size() -> u64 {
        // SAFETY: sysconf has no preconditions
        let size = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
        if size > 0 {
            size as u64
        } else {
            4096
        }
    }

    /// statm format: "size resident shared text lib data dt" (in pages)
    pub(super) fn parse_statm_resident(statm: &str) -> Option<u64> {
        statm.split_whitespace().nth(1)?.parse().ok()
    }

    /// Sum of the `Private_*` lines, in kB
    pub(super) fn parse_private_kib(rollup: &str) -> Option<u64> {
        let mut total = None;
        for line in rollup.lines() {
            let Some(rest) = line
                .strip_prefix("Private_Clean:")
                .or_else(|| line.strip_prefix("Private_Dirty:"))
            else {
                continue;
            };
            let kib: u64 = rest.split_whitespace().next()?.parse().ok()?;
            total = Some(total.unwrap_or(0) + kib);
        }
        total
    }
}

#[cfg(windows)]
mod imp {
    #![allow(unsafe_code)]

    use std::mem::{size_of, MaybeUninit};
    use winapi::um::processthreadsapi::GetCurrentProcess;
    use winapi::um::psapi::{GetProcessMemoryInfo, PROCESS_MEMORY_COUNTERS};

    /// Working set size of the current process
    #[allow(clippy::cast_possible_truncation)]
    pub fn resident_bytes() -> u64 {
        // SAFETY: PROCESS_MEMORY_COUNTERS is a C POD filled in by the call
        unsafe {
            let mut counters: PROCESS_MEMORY_COUNTERS = MaybeUninit::zeroed().assume_init();
            let size = size_of::<PROCESS_MEMORY_COUNTERS>() as u32;
            if GetProcessMemoryInfo(GetCurrentProcess(), &mut counters, size) == 0 {
                return 0;
            }
            counters.WorkingSetSize as u64
        }
    }

    /// Not available on Windows
    pub fn unique_bytes() -> u64 {
        0
    }
}

#[cfg(not(any(target_os = "linux", windows)))]
mod imp {
    pub fn resident_bytes() -> u64 {
        0
    }

    pub fn unique_bytes() -> u64 {
        0
    }
}

impl MemoryProbe for ProcessMemory {
    fn resident_bytes(&self) -> u64 {
        imp::resident_bytes()
    }

    fn unique_bytes(&self) -> u64 {
        imp::unique_bytes()
    }
}
