//! ARM64 VCPU Trap Handling
//!
//! [`TrapRecord`] is what the exit dispatcher knows about one guest exit.
//! It lives on the stack for a single iteration of the run loop; when the
//! run loop gives up and returns to the host, the last record is committed
//! into the vCPU as its [`FaultInfo`].
//!
//! The instruction skip helpers advance the guest past an instruction the
//! fast path has emulated, including the AArch32 IT state machine.
//!
//! ## References
//! - [ARM DDI 0487] D13.2.37 ESR_EL2, G1.9.3 ITSTATE

use crate::arch::arm64::cpu::hw::SysRegOps;
use crate::arch::arm64::cpu::regs::{esr, psr};
use crate::arch::arm64::cpu::state::GpRegs;
use crate::arch::arm64::cpu::sysreg::SysReg;
use crate::arch::arm64::mmu::fault::FaultInfo;
use crate::arch::arm64::{ExceptionClass, ExitCode};

/// One guest exit
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TrapRecord {
    /// Exit code from the vectors (may be rewritten by the dispatcher)
    pub exit: ExitCode,
    /// ESR_EL2; zero for IRQ exits
    pub esr: u64,
    /// Decoded exception class
    pub class: ExceptionClass,
    /// Faulting guest virtual address (aborts only)
    pub far: Option<u64>,
    /// Faulting IPA in HPFAR_EL2 format (aborts only)
    pub hpfar: Option<u64>,
}

impl TrapRecord {
    /// A record holding only the exit code
    pub fn new(exit: ExitCode) -> Self {
        Self {
            exit,
            esr: 0,
            class: ExceptionClass::Unknown,
            far: None,
            hpfar: None,
        }
    }

    /// Record the syndrome of this exit
    pub fn set_esr(&mut self, esr: u64) {
        self.esr = esr;
        self.class = ExceptionClass::from_esr(esr);
    }

    /// Instruction specific syndrome
    pub fn iss(&self) -> u64 {
        self.esr & esr::ISS_MASK
    }

    /// Trapped instruction was 32 bits wide
    pub fn il_is_32bit(&self) -> bool {
        self.esr & esr::IL != 0
    }

    /// Abort fault status without the level
    pub fn fault_type(&self) -> u64 {
        self.esr & esr::FSC_TYPE
    }

    /// Stage-2 fault taken on a stage-1 table walk
    pub fn is_s1ptw(&self) -> bool {
        self.esr & esr::S1PTW != 0
    }

    /// Data abort carries a valid instruction syndrome
    pub fn dabt_is_valid(&self) -> bool {
        self.esr & esr::ISV != 0
    }

    /// External abort
    pub fn dabt_is_external(&self) -> bool {
        self.esr & esr::EA != 0
    }

    /// Transfer register of a trapped MSR/MRS
    pub fn sys64_rt(&self) -> usize {
        ((self.esr >> esr::SYS64_RT_SHIFT) & esr::SYS64_RT_MASK) as usize
    }

    /// A trapped MSR (register write)
    pub fn sys64_is_write(&self) -> bool {
        self.esr & esr::SYS64_ISS_DIR_READ == 0
    }

    /// The fault information the host gets to see
    pub fn fault_info(&self) -> FaultInfo {
        FaultInfo {
            esr: self.esr,
            far: self.far,
            hpfar: self.hpfar,
        }
    }
}

/// Advance the AArch32 IT state by one instruction
///
/// IT[7:0] is split over CPSR[15:10] and CPSR[26:25]. Once the mask bits
/// IT[2:0] run out the block is finished and the whole field clears.
pub fn adjust_itstate(cpsr: u64) -> u64 {
    let is_arm = cpsr & psr::AA32_T_BIT == 0;
    if is_arm || cpsr & psr::AA32_IT_MASK == 0 {
        return cpsr;
    }

    let mut cond = (cpsr & 0xe000) >> 13;
    let mut itbits = (cpsr & 0x1c00) >> (10 - 2);
    itbits |= (cpsr & (0x3 << 25)) >> 25;

    if itbits & 0x7 == 0 {
        itbits = 0;
        cond = 0;
    } else {
        itbits = (itbits << 1) & 0x1f;
    }

    let mut cpsr = cpsr & !psr::AA32_IT_MASK;
    cpsr |= cond << 13;
    cpsr |= (itbits & 0x1c) << (10 - 2);
    cpsr |= (itbits & 0x3) << 25;
    cpsr
}

/// Move the guest past the trapped instruction
pub fn skip_instr(gp: &mut GpRegs, wide: bool) {
    if gp.pstate & psr::MODE32_BIT != 0 {
        let thumb = gp.pstate & psr::AA32_T_BIT != 0;
        let len = if thumb && !wide { 2 } else { 4 };
        gp.pc = (gp.pc as u32).wrapping_add(len) as u64;
        gp.pstate = adjust_itstate(gp.pstate);
    } else {
        gp.pc = gp.pc.wrapping_add(4);
    }

    // The single-step state machine advances with the PC
    gp.pstate &= !psr::DBG_SS;
}

/// Skip the trapped instruction while the guest's return state is still
/// live in ELR_EL2 / SPSR_EL2
pub fn skip_trapped_instr<H: SysRegOps>(gp: &mut GpRegs, record: &TrapRecord, hw: &mut H) {
    gp.pc = hw.read(SysReg::ElrEl2);
    gp.pstate = hw.read(SysReg::SpsrEl2);

    skip_instr(gp, record.il_is_32bit());

    hw.write(SysReg::SpsrEl2, gp.pstate);
    hw.write(SysReg::ElrEl2, gp.pc);
}
