//! # Shared Register Types (Signal Handler ↔ Sampler ↔ Unwinder)
//!
//! Defines the register snapshot types that cross the boundary between the
//! code that captures a suspended thread's CPU state and the code that later
//! consumes it. All types are `#[repr(C)]`, `Copy`, and fixed size so that a
//! signal handler can fill them with plain stores: no allocation, no locks.
//!
//! ## Key Types
//!
//! - [`Address`] - A code or stack address in the profiled process
//! - [`Registers`] - The three registers every sample reports (pc, sp, fp)
//! - [`RawContext`] - Full general-purpose register file, tagged with the
//!   [`RegisterLayout`] that says how to read it
//!
//! Downstream unwinders depend on this crate alone; they never need the
//! sampler itself.

#![no_std]

use core::fmt;

// ============================================================================
// Constants
// ============================================================================

/// Capacity of [`RawContext::regs`]
///
/// Sized for the largest layout we capture: aarch64 Linux stores
/// x0-x30, sp, pc and pstate (34 slots).
pub const MAX_REGISTERS: usize = 34;

// ============================================================================
// Addresses
// ============================================================================

/// Address in the profiled process (instruction or stack)
#[repr(transparent)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct Address(pub u64);

impl Address {
    /// Returns true for the zero address, which never names a real frame
    #[must_use]
    pub const fn is_null(self) -> bool {
        self.0 == 0
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:x}", self.0)
    }
}

/// Program counter, stack pointer and frame pointer of one sample
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Registers {
    pub pc: Address,
    pub sp: Address,
    pub fp: Address,
}

// ============================================================================
// Register layouts
// ============================================================================

/// How the slots of a [`RawContext`] map onto machine registers
///
/// Linux layouts follow the kernel's `mcontext_t` order verbatim (the
/// `REG_*` indices for x86, `regs[]`/`sp`/`pc`/`pstate` for aarch64).
/// Windows layouts pack the integer fields of `CONTEXT` in declaration
/// order, skipping segment registers.
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegisterLayout {
    /// No registers captured
    Unknown = 0,
    /// `gregs[NGREG]`, 23 slots
    LinuxX86_64 = 1,
    /// `gregs[NGREG]`, 19 slots
    LinuxX86 = 2,
    /// x0-x30, sp, pc, pstate
    LinuxAarch64 = 3,
    /// Rax Rcx Rdx Rbx Rsp Rbp Rsi Rdi R8-R15 Rip EFlags
    WindowsX86_64 = 4,
    /// Edi Esi Ebx Edx Ecx Eax Ebp Eip Esp EFlags
    WindowsX86 = 5,
}

/// Slot indices of pc, sp and fp within one layout
#[derive(Debug, Clone, Copy)]
struct Slots {
    pc: usize,
    sp: usize,
    fp: usize,
    len: usize,
}

impl RegisterLayout {
    const fn slots(self) -> Option<Slots> {
        match self {
            RegisterLayout::Unknown => None,
            // REG_RIP = 16, REG_RSP = 15, REG_RBP = 10
            RegisterLayout::LinuxX86_64 => Some(Slots { pc: 16, sp: 15, fp: 10, len: 23 }),
            // REG_EIP = 14, REG_ESP = 7, REG_EBP = 6
            RegisterLayout::LinuxX86 => Some(Slots { pc: 14, sp: 7, fp: 6, len: 19 }),
            // x29 is the frame pointer under AAPCS64
            RegisterLayout::LinuxAarch64 => Some(Slots { pc: 32, sp: 31, fp: 29, len: 34 }),
            RegisterLayout::WindowsX86_64 => Some(Slots { pc: 16, sp: 4, fp: 5, len: 18 }),
            RegisterLayout::WindowsX86 => Some(Slots { pc: 7, sp: 8, fp: 6, len: 10 }),
        }
    }

    /// Number of register slots this layout fills
    #[must_use]
    pub const fn len(self) -> usize {
        match self.slots() {
            Some(slots) => slots.len,
            None => 0,
        }
    }

    /// Returns true for [`RegisterLayout::Unknown`]
    #[must_use]
    pub const fn is_empty(self) -> bool {
        self.len() == 0
    }
}

// ============================================================================
// Raw context
// ============================================================================

/// Full general-purpose register file of a suspended thread
///
/// Opaque to the sampler apart from [`RawContext::registers`]; unwinders
/// interpret the remaining slots through [`RawContext::layout`].
///
/// **Memory Layout**: `#[repr(C)]`, 280 bytes, no pointers. The kernel's
/// `ucontext_t` points into the signal frame, so it is never copied whole.
#[repr(C)]
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct RawContext {
    layout: RegisterLayout,
    len: u32,
    regs: [u64; MAX_REGISTERS],
}

impl RawContext {
    /// A context with no captured registers
    #[must_use]
    pub const fn empty() -> Self {
        Self { layout: RegisterLayout::Unknown, len: 0, regs: [0; MAX_REGISTERS] }
    }

    /// Build a context from register values in `layout` order
    ///
    /// Slots beyond the layout's length are ignored; missing slots stay zero.
    #[must_use]
    pub fn from_slots(layout: RegisterLayout, values: &[u64]) -> Self {
        let mut ctx = Self { layout, len: 0, regs: [0; MAX_REGISTERS] };
        let len = layout.len().min(values.len());
        ctx.regs[..len].copy_from_slice(&values[..len]);
        // len <= MAX_REGISTERS
        #[allow(clippy::cast_possible_truncation)]
        {
            ctx.len = layout.len() as u32;
        }
        ctx
    }

    /// Store one slot; out-of-range indices are ignored
    pub fn set(&mut self, index: usize, value: u64) {
        if index < self.layout.len() {
            self.regs[index] = value;
        }
    }

    #[must_use]
    pub const fn layout(&self) -> RegisterLayout {
        self.layout
    }

    /// The captured slots, in layout order
    #[must_use]
    pub fn slots(&self) -> &[u64] {
        &self.regs[..self.len as usize]
    }

    /// Extract pc, sp and fp according to the layout
    ///
    /// Returns `None` for [`RegisterLayout::Unknown`].
    #[must_use]
    pub fn registers(&self) -> Option<Registers> {
        let slots = self.layout.slots()?;
        Some(Registers {
            pc: Address(self.regs[slots.pc]),
            sp: Address(self.regs[slots.sp]),
            fp: Address(self.regs[slots.fp]),
        })
    }
}

impl Default for RawContext {
    fn default() -> Self {
        Self::empty()
    }
}

impl fmt::Debug for RawContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RawContext")
            .field("layout", &self.layout)
            .field("regs", &self.slots())
            .finish()
    }
}
