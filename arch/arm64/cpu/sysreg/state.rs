//! System register state for ARM64
//!
//! Saved EL1 system registers of one context, and the save/restore groups
//! the run loops are built from:
//! - common: MDSCR_EL1 and SP_EL0, switched on every run
//! - user: TPIDR_EL0 / TPIDRRO_EL0
//! - EL1: the full EL1 translation and exception state
//! - EL2 return: ELR_EL2 / SPSR_EL2 (and VDISR_EL2 with RAS)
//! - AArch32: banked SPSRs and the 32-bit shadow registers
//!
//! A non-VHE host switches all groups per run. A VHE host switches common
//! and EL2 return state per run and the rest on vCPU load/put.

use crate::arch::arm64::cpu::hw::SysRegOps;
use crate::arch::arm64::cpu::regs::psr;
use crate::arch::arm64::cpu::state::CpuContext;

use super::SysReg;

/// Saved system registers
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[repr(C)]
pub struct SysRegs {
    pub sctlr_el1: u64,
    pub actlr_el1: u64,
    pub cpacr_el1: u64,
    pub csselr_el1: u64,
    pub ttbr0_el1: u64,
    pub ttbr1_el1: u64,
    pub tcr_el1: u64,
    pub esr_el1: u64,
    pub afsr0_el1: u64,
    pub afsr1_el1: u64,
    pub far_el1: u64,
    pub mair_el1: u64,
    pub amair_el1: u64,
    pub vbar_el1: u64,
    pub contextidr_el1: u64,
    pub cntkctl_el1: u64,
    pub par_el1: u64,
    pub tpidr_el1: u64,
    pub sp_el1: u64,
    pub elr_el1: u64,
    pub spsr_el1: u64,
    pub mdscr_el1: u64,
    /// Virtual MPIDR presented to the guest
    pub mpidr_el1: u64,
    /// ZCR_EL1 of SVE guests
    pub zcr_el1: u64,
    /// Deferred SError status (RAS)
    pub disr_el1: u64,

    pub tpidr_el0: u64,
    pub tpidrro_el0: u64,

    /// AArch32 banked SPSRs
    pub spsr_abt: u64,
    pub spsr_und: u64,
    pub spsr_irq: u64,
    pub spsr_fiq: u64,
    pub dacr32_el2: u64,
    pub ifsr32_el2: u64,
    pub fpexc32_el2: u64,
    pub dbgvcr32_el2: u64,
}

/// Save MDSCR_EL1 and SP_EL0
pub fn save_common<H: SysRegOps>(ctxt: &mut CpuContext, hw: &H) {
    ctxt.sys.mdscr_el1 = hw.read(SysReg::MdscrEl1);
    ctxt.gp.sp = hw.read(SysReg::SpEl0);
}

/// Restore MDSCR_EL1 and SP_EL0
pub fn restore_common<H: SysRegOps>(ctxt: &CpuContext, hw: &mut H) {
    hw.write(SysReg::MdscrEl1, ctxt.sys.mdscr_el1);
    hw.write(SysReg::SpEl0, ctxt.gp.sp);
}

/// Save the EL0 thread ID registers
pub fn save_user<H: SysRegOps>(ctxt: &mut CpuContext, hw: &H) {
    ctxt.sys.tpidr_el0 = hw.read(SysReg::TpidrEl0);
    ctxt.sys.tpidrro_el0 = hw.read(SysReg::TpidrroEl0);
}

/// Restore the EL0 thread ID registers
pub fn restore_user<H: SysRegOps>(ctxt: &CpuContext, hw: &mut H) {
    hw.write(SysReg::TpidrEl0, ctxt.sys.tpidr_el0);
    hw.write(SysReg::TpidrroEl0, ctxt.sys.tpidrro_el0);
}

/// Save the EL1 state
pub fn save_el1<H: SysRegOps>(ctxt: &mut CpuContext, hw: &H) {
    let sys = &mut ctxt.sys;
    sys.csselr_el1 = hw.read(SysReg::CsselrEl1);
    sys.sctlr_el1 = hw.read(SysReg::SctlrEl1);
    sys.actlr_el1 = hw.read(SysReg::ActlrEl1);
    sys.cpacr_el1 = hw.read(SysReg::CpacrEl1);
    sys.ttbr0_el1 = hw.read(SysReg::Ttbr0El1);
    sys.ttbr1_el1 = hw.read(SysReg::Ttbr1El1);
    sys.tcr_el1 = hw.read(SysReg::TcrEl1);
    sys.esr_el1 = hw.read(SysReg::EsrEl1);
    sys.afsr0_el1 = hw.read(SysReg::Afsr0El1);
    sys.afsr1_el1 = hw.read(SysReg::Afsr1El1);
    sys.far_el1 = hw.read(SysReg::FarEl1);
    sys.mair_el1 = hw.read(SysReg::MairEl1);
    sys.vbar_el1 = hw.read(SysReg::VbarEl1);
    sys.contextidr_el1 = hw.read(SysReg::ContextidrEl1);
    sys.amair_el1 = hw.read(SysReg::AmairEl1);
    sys.cntkctl_el1 = hw.read(SysReg::CntkctlEl1);
    sys.par_el1 = hw.read(SysReg::ParEl1);
    sys.tpidr_el1 = hw.read(SysReg::TpidrEl1);

    sys.sp_el1 = hw.read(SysReg::SpEl1);
    sys.elr_el1 = hw.read(SysReg::ElrEl1);
    sys.spsr_el1 = hw.read(SysReg::SpsrEl1);
}

/// Restore the EL1 state
pub fn restore_el1<H: SysRegOps>(ctxt: &CpuContext, hw: &mut H) {
    let sys = &ctxt.sys;
    hw.write(SysReg::VmpidrEl2, sys.mpidr_el1);
    hw.write(SysReg::CsselrEl1, sys.csselr_el1);
    hw.write(SysReg::SctlrEl1, sys.sctlr_el1);
    hw.write(SysReg::ActlrEl1, sys.actlr_el1);
    hw.write(SysReg::CpacrEl1, sys.cpacr_el1);
    hw.write(SysReg::Ttbr0El1, sys.ttbr0_el1);
    hw.write(SysReg::Ttbr1El1, sys.ttbr1_el1);
    hw.write(SysReg::TcrEl1, sys.tcr_el1);
    hw.write(SysReg::EsrEl1, sys.esr_el1);
    hw.write(SysReg::Afsr0El1, sys.afsr0_el1);
    hw.write(SysReg::Afsr1El1, sys.afsr1_el1);
    hw.write(SysReg::FarEl1, sys.far_el1);
    hw.write(SysReg::MairEl1, sys.mair_el1);
    hw.write(SysReg::VbarEl1, sys.vbar_el1);
    hw.write(SysReg::ContextidrEl1, sys.contextidr_el1);
    hw.write(SysReg::AmairEl1, sys.amair_el1);
    hw.write(SysReg::CntkctlEl1, sys.cntkctl_el1);
    hw.write(SysReg::ParEl1, sys.par_el1);
    hw.write(SysReg::TpidrEl1, sys.tpidr_el1);

    hw.write(SysReg::SpEl1, sys.sp_el1);
    hw.write(SysReg::ElrEl1, sys.elr_el1);
    hw.write(SysReg::SpsrEl1, sys.spsr_el1);
}

/// Save the guest's return state from ELR_EL2 / SPSR_EL2
pub fn save_el2_return<H: SysRegOps>(ctxt: &mut CpuContext, ras: bool, hw: &H) {
    ctxt.gp.pc = hw.read(SysReg::ElrEl2);
    ctxt.gp.pstate = hw.read(SysReg::SpsrEl2);

    if ras {
        ctxt.sys.disr_el1 = hw.read(SysReg::VdisrEl2);
    }
}

/// Program ELR_EL2 / SPSR_EL2 for the next ERET
///
/// An AArch64 PSTATE that targets EL2 or above is replaced by EL2h with the
/// IL bit set, so the ERET takes an illegal-state exception instead of
/// running the guest at EL2.
pub fn restore_el2_return<H: SysRegOps>(ctxt: &CpuContext, ras: bool, hw: &mut H) {
    let mut pstate = ctxt.gp.pstate;
    let mode = pstate & psr::MODE_MASK;

    if mode & psr::MODE32_BIT == 0 && mode >= psr::MODE_EL2T {
        log::warn!("refusing ERET to EL2 (pstate={:#x})", pstate);
        pstate = psr::MODE_EL2H | psr::IL_BIT;
    }

    hw.write(SysReg::ElrEl2, ctxt.gp.pc);
    hw.write(SysReg::SpsrEl2, pstate);

    if ras {
        hw.write(SysReg::VdisrEl2, ctxt.sys.disr_el1);
    }
}

/// Save the AArch32 shadow state of a 32-bit guest
pub fn save_sysreg32<H: SysRegOps>(ctxt: &mut CpuContext, debug_dirty: bool, hw: &H) {
    let sys = &mut ctxt.sys;
    sys.spsr_abt = hw.read(SysReg::SpsrAbt);
    sys.spsr_und = hw.read(SysReg::SpsrUnd);
    sys.spsr_irq = hw.read(SysReg::SpsrIrq);
    sys.spsr_fiq = hw.read(SysReg::SpsrFiq);

    sys.dacr32_el2 = hw.read(SysReg::Dacr32El2);
    sys.ifsr32_el2 = hw.read(SysReg::Ifsr32El2);

    if debug_dirty {
        sys.dbgvcr32_el2 = hw.read(SysReg::Dbgvcr32El2);
    }
}

/// Restore the AArch32 shadow state of a 32-bit guest
pub fn restore_sysreg32<H: SysRegOps>(ctxt: &CpuContext, debug_dirty: bool, hw: &mut H) {
    let sys = &ctxt.sys;
    hw.write(SysReg::SpsrAbt, sys.spsr_abt);
    hw.write(SysReg::SpsrUnd, sys.spsr_und);
    hw.write(SysReg::SpsrIrq, sys.spsr_irq);
    hw.write(SysReg::SpsrFiq, sys.spsr_fiq);

    hw.write(SysReg::Dacr32El2, sys.dacr32_el2);
    hw.write(SysReg::Ifsr32El2, sys.ifsr32_el2);

    if debug_dirty {
        hw.write(SysReg::Dbgvcr32El2, sys.dbgvcr32_el2);
    }
}

/// Full save used by a non-VHE host, for both host and guest contexts
pub fn save_state_nvhe<H: SysRegOps>(ctxt: &mut CpuContext, ras: bool, hw: &H) {
    save_el1(ctxt, hw);
    save_common(ctxt, hw);
    save_user(ctxt, hw);
    save_el2_return(ctxt, ras, hw);
}

/// Full restore used by a non-VHE host, for both host and guest contexts
pub fn restore_state_nvhe<H: SysRegOps>(ctxt: &CpuContext, ras: bool, hw: &mut H) {
    restore_el1(ctxt, hw);
    restore_common(ctxt, hw);
    restore_user(ctxt, hw);
    restore_el2_return(ctxt, ras, hw);
}

/// Per-run host save on a VHE host
pub fn save_host_state_vhe<H: SysRegOps>(ctxt: &mut CpuContext, hw: &H) {
    save_common(ctxt, hw);
}

/// Per-run host restore on a VHE host
pub fn restore_host_state_vhe<H: SysRegOps>(ctxt: &CpuContext, hw: &mut H) {
    restore_common(ctxt, hw);
}

/// Per-run guest save on a VHE host
pub fn save_guest_state_vhe<H: SysRegOps>(ctxt: &mut CpuContext, ras: bool, hw: &H) {
    save_common(ctxt, hw);
    save_el2_return(ctxt, ras, hw);
}

/// Per-run guest restore on a VHE host
pub fn restore_guest_state_vhe<H: SysRegOps>(ctxt: &CpuContext, ras: bool, hw: &mut H) {
    restore_common(ctxt, hw);
    restore_el2_return(ctxt, ras, hw);
}
