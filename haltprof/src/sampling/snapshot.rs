//! Register snapshot of one suspended thread

use std::time::Instant;

use haltprof_common::{Address, RawContext, Registers};

use crate::domain::Tid;

/// Everything captured while one thread was suspended
///
/// Immutable once built. Handed to the sample buffer under the state lock
/// and not retained by the sampler afterwards.
#[derive(Debug, Clone)]
pub struct RegisterSnapshot {
    timestamp: Instant,
    tid: Tid,
    registers: Registers,
    context: RawContext,
    rss_memory: u64,
    uss_memory: u64,
}

impl RegisterSnapshot {
    #[must_use]
    pub fn new(
        timestamp: Instant,
        tid: Tid,
        registers: Registers,
        context: RawContext,
        memory: MemoryReading,
    ) -> Self {
        Self {
            timestamp,
            tid,
            registers,
            context,
            rss_memory: memory.resident,
            uss_memory: memory.unique,
        }
    }

    /// Taken before the thread was suspended
    #[must_use]
    pub fn timestamp(&self) -> Instant {
        self.timestamp
    }

    #[must_use]
    pub fn tid(&self) -> Tid {
        self.tid
    }

    #[must_use]
    pub fn registers(&self) -> Registers {
        self.registers
    }

    #[must_use]
    pub fn pc(&self) -> Address {
        self.registers.pc
    }

    #[must_use]
    pub fn sp(&self) -> Address {
        self.registers.sp
    }

    #[must_use]
    pub fn fp(&self) -> Address {
        self.registers.fp
    }

    /// Full register file, for unwinders
    #[must_use]
    pub fn context(&self) -> &RawContext {
        &self.context
    }

    /// Whole-process resident size; non-zero on at most one sample per
    /// sampling iteration
    #[must_use]
    pub fn rss_memory(&self) -> u64 {
        self.rss_memory
    }

    /// Whole-process unique set size; 0 where unsupported
    #[must_use]
    pub fn uss_memory(&self) -> u64 {
        self.uss_memory
    }
}

/// Memory figures attached to a snapshot
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MemoryReading {
    pub resident: u64,
    pub unique: u64,
}
