//! Hardware access for the world switch
//!
//! Everything the switch does to the physical CPU goes through
//! [`SysRegOps`]. `El2Hw` implements it with real system register
//! instructions on AArch64; [`model::ModelCpu`] implements it in software.

use super::state::{FpSimdState, GpRegs, SveState};
use super::sysreg::SysReg;

pub mod model;

cfg_if::cfg_if! {
    if #[cfg(target_arch = "aarch64")] {
        pub mod el2;
        pub use el2::El2Hw;
    }
}

pub use model::ModelCpu;

/// SMCCC function ID of ARCH_WORKAROUND_2 (SSBD)
pub const SMCCC_ARCH_WORKAROUND_2: u32 = 0x8000_7fff;

/// Operations the world switch needs from the CPU
pub trait SysRegOps {
    /// Read a system register
    fn read(&self, reg: SysReg) -> u64;

    /// Write a system register
    fn write(&mut self, reg: SysReg, value: u64);

    /// Instruction synchronization barrier
    fn isb(&mut self);

    /// Full-system data synchronization barrier
    fn dsb(&mut self);

    /// Stage-1 EL1 read translation of `va`; the result lands in PAR_EL1
    fn at_s1e1r(&mut self, va: u64);

    /// Save the live FP/SIMD registers into `state`
    fn fpsimd_save(&mut self, state: &mut FpSimdState);

    /// Load `state` into the live FP/SIMD registers
    fn fpsimd_restore(&mut self, state: &FpSimdState);

    /// Save the live SVE registers into `state`
    fn sve_save(&mut self, state: &mut SveState);

    /// Load `state` into the live SVE registers at vector length
    /// `(vq_minus_one + 1) * 16` bytes
    fn sve_load(&mut self, state: &SveState, vq_minus_one: u64);

    /// Ask firmware to enable or disable the SSBD mitigation
    fn arch_workaround_2(&mut self, enable: bool);

    /// Enter the guest and return the raw exit code when it exits
    ///
    /// # Safety
    ///
    /// The guest's trap configuration, stage-2 regime and return state
    /// (ELR_EL2/SPSR_EL2) must be programmed. `guest` receives the guest's
    /// general purpose registers at exit; the host's callee-saved registers
    /// are parked in `host` for the duration.
    unsafe fn guest_enter(&mut self, guest: &mut GpRegs, host: &mut GpRegs) -> u64;
}
