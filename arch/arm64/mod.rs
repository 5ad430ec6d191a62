//! ARM64 (AArch64) world-switch support
//!
//! This module provides the EL2 side of running a guest:
//! - CPU context storage, system register save/restore and the hardware seam
//! - Trap configuration, lazy FP/SVE switching and fault info recovery
//! - The exit dispatcher and the VHE / non-VHE run loops
//! - The fatal path (`hyp_panic`) and the EL2 exception fixup table
//!
//! ## Architecture Overview
//!
//! A VHE host kernel runs at EL2 with HCR_EL2.E2H set, so most of the guest's
//! EL1 state can stay loaded while the vCPU is scheduled. A non-VHE host runs
//! at EL1 and calls a small hyp layer at EL2, which has to switch the whole EL1
//! context on every run.
//!
//! ## References
//! - [ARM Architecture Reference Manual ARMv8-A](https://developer.arm.com/documentation/ddi0487/latest)

pub mod cpu;
pub mod mmu;
pub mod hooks;
pub mod percpu;
pub mod pmu;
pub mod switch;

#[cfg(test)]
mod tests;

// Re-export key types
pub use percpu::PerCoreState;

/// Maximum number of CPUs supported
pub const MAX_CPUS: usize = 8;

/// ESR_ELx exception class
///
/// Only the classes the world switch looks at, or reports, are named.
/// Anything else decodes as [`ExceptionClass::Unknown`]; the raw syndrome is
/// always kept next to it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ExceptionClass {
    /// Unknown reason
    Unknown = 0x00,
    /// Trapped WFI/WFE
    Wfx = 0x01,
    /// Trapped MCR/MRC to CP15 (AArch32)
    Cp15_32 = 0x03,
    /// Trapped MCRR/MRRC to CP15 (AArch32)
    Cp15_64 = 0x04,
    /// Trapped MCR/MRC to CP14 (AArch32)
    Cp14Mr = 0x05,
    /// Trapped access to SVE, Advanced SIMD or floating point
    FpAsimd = 0x07,
    /// Trapped VMRS to CP10 (AArch32)
    Cp10Id = 0x08,
    /// Illegal execution state
    IllegalState = 0x0e,
    /// SVC from AArch32
    Svc32 = 0x11,
    /// HVC from AArch32
    Hvc32 = 0x12,
    /// SMC from AArch32
    Smc32 = 0x13,
    /// SVC from AArch64
    Svc64 = 0x15,
    /// HVC from AArch64
    Hvc64 = 0x16,
    /// SMC from AArch64
    Smc64 = 0x17,
    /// Trapped MSR, MRS or system instruction (AArch64)
    Sys64 = 0x18,
    /// Trapped access to SVE functionality
    Sve = 0x19,
    /// Instruction abort from a lower EL
    IabtLow = 0x20,
    /// Instruction abort from the current EL
    IabtCur = 0x21,
    /// PC alignment fault
    PcAlign = 0x22,
    /// Data abort from a lower EL
    DabtLow = 0x24,
    /// Data abort from the current EL
    DabtCur = 0x25,
    /// SP alignment fault
    SpAlign = 0x26,
    /// SError interrupt
    SError = 0x2f,
    /// Breakpoint from a lower EL
    BreakptLow = 0x30,
    /// Software step from a lower EL
    SoftStepLow = 0x32,
    /// Watchpoint from a lower EL
    WatchptLow = 0x34,
    /// BRK instruction (AArch64)
    Brk64 = 0x3c,
}

impl ExceptionClass {
    /// Decode the EC field of an ESR_ELx value
    pub fn from_esr(esr: u64) -> Self {
        use cpu::regs::esr::{EC_MASK, EC_SHIFT};

        match (esr >> EC_SHIFT) & EC_MASK {
            0x01 => ExceptionClass::Wfx,
            0x03 => ExceptionClass::Cp15_32,
            0x04 => ExceptionClass::Cp15_64,
            0x05 => ExceptionClass::Cp14Mr,
            0x07 => ExceptionClass::FpAsimd,
            0x08 => ExceptionClass::Cp10Id,
            0x0e => ExceptionClass::IllegalState,
            0x11 => ExceptionClass::Svc32,
            0x12 => ExceptionClass::Hvc32,
            0x13 => ExceptionClass::Smc32,
            0x15 => ExceptionClass::Svc64,
            0x16 => ExceptionClass::Hvc64,
            0x17 => ExceptionClass::Smc64,
            0x18 => ExceptionClass::Sys64,
            0x19 => ExceptionClass::Sve,
            0x20 => ExceptionClass::IabtLow,
            0x21 => ExceptionClass::IabtCur,
            0x22 => ExceptionClass::PcAlign,
            0x24 => ExceptionClass::DabtLow,
            0x25 => ExceptionClass::DabtCur,
            0x26 => ExceptionClass::SpAlign,
            0x2f => ExceptionClass::SError,
            0x30 => ExceptionClass::BreakptLow,
            0x32 => ExceptionClass::SoftStepLow,
            0x34 => ExceptionClass::WatchptLow,
            0x3c => ExceptionClass::Brk64,
            _ => ExceptionClass::Unknown,
        }
    }

    /// Build an ESR value carrying this class, a 32-bit IL and `iss`
    pub const fn esr(self, iss: u64) -> u64 {
        use cpu::regs::esr::{EC_SHIFT, IL, ISS_MASK};

        ((self as u64) << EC_SHIFT) | IL | (iss & ISS_MASK)
    }

    /// Whether this is a stage-2 abort taken from the guest
    pub fn is_guest_abort(self) -> bool {
        matches!(self, ExceptionClass::DabtLow | ExceptionClass::IabtLow)
    }
}

/// Exit kinds reported by the guest exit vectors
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u64)]
pub enum ExitKind {
    /// Physical IRQ or FIQ while the guest ran
    Irq = 0,
    /// SError taken from the guest
    El1SError = 1,
    /// Synchronous trap from the guest
    Trap = 2,
    /// Illegal exception return to the guest
    IllegalException = 3,
}

/// Guest exit code
///
/// The low bits carry an [`ExitKind`]; bit 31 flags an SError that was
/// pending when the guest exited.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExitCode(u64);

impl ExitCode {
    /// Bit set when an SError was pending at exit
    pub const SERROR_PENDING: u64 = 1 << 31;

    pub const IRQ: Self = Self(ExitKind::Irq as u64);
    pub const EL1_SERROR: Self = Self(ExitKind::El1SError as u64);
    pub const TRAP: Self = Self(ExitKind::Trap as u64);
    pub const ILLEGAL_EXCEPTION: Self = Self(ExitKind::IllegalException as u64);

    /// Validate a raw code produced by the exit vectors
    pub fn from_raw(raw: u64) -> Option<Self> {
        match raw & !Self::SERROR_PENDING {
            0..=3 => Some(Self(raw)),
            _ => None,
        }
    }

    /// Raw value, including the SError-pending bit
    pub const fn raw(self) -> u64 {
        self.0
    }

    /// Exit kind with the SError-pending bit stripped
    pub fn kind(self) -> ExitKind {
        match self.0 & !Self::SERROR_PENDING {
            0 => ExitKind::Irq,
            1 => ExitKind::El1SError,
            2 => ExitKind::Trap,
            _ => ExitKind::IllegalException,
        }
    }

    /// Whether an SError was pending when the guest exited
    pub const fn serror_pending(self) -> bool {
        self.0 & Self::SERROR_PENDING != 0
    }

    /// Same exit, flagged with a pending SError
    pub const fn with_serror_pending(self) -> Self {
        Self(self.0 | Self::SERROR_PENDING)
    }

    /// A synchronous trap with no SError pending
    pub fn is_clean_trap(self) -> bool {
        self == Self::TRAP
    }
}
