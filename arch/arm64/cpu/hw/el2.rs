//! EL2 hardware backend
//!
//! Implements [`SysRegOps`] with real system register accesses. On a VHE
//! host the guest's EL1 registers are reached through their `_EL12`
//! aliases, which the assembler only knows by encoding.
//!
//! The FP/SIMD and SVE primitives and the guest entry live in `global_asm!`
//! so they can carry their own `.arch_extension` directives. They clobber
//! V8-V15 behind the compiler's back: the crate expects to be built for a
//! target that keeps no FP state live at EL2 (for example with the `-neon`
//! target feature), the same constraint a kernel places on its own code.
//!
//! Reference: ARM DDI 0487I.a, D13.2 and C5.3

use core::arch::{asm, global_asm};

use aarch64_cpu::asm::barrier;
use aarch64_cpu::registers::{
    ELR_EL2, ESR_EL2, FAR_EL2, HCR_EL2, MIDR_EL1, PAR_EL1, SPSR_EL2, SP_EL0, VBAR_EL2, VTCR_EL2,
    VTTBR_EL2,
};
use tock_registers::interfaces::{Readable, Writeable};

use super::{SysRegOps, SMCCC_ARCH_WORKAROUND_2};
use crate::arch::arm64::cpu::features::CpuIdRegs;
use crate::arch::arm64::cpu::state::{FpSimdState, GpRegs, GpRegsOffsets, SveState};
use crate::arch::arm64::cpu::sysreg::SysReg;
use crate::arch::arm64::ExitCode;

/// Expands to register read/write dispatch. Each entry names the register,
/// its assembler name on a non-VHE core and on a VHE core.
macro_rules! sysreg_table {
    ($( $reg:ident => $nvhe:literal, $vhe:literal; )*) => {
        fn read_raw(vhe: bool, reg: SysReg) -> u64 {
            let value: u64;
            match reg {
                $(
                    SysReg::$reg => unsafe {
                        if vhe {
                            asm!(concat!("mrs {0}, ", $vhe), out(reg) value, options(nomem, nostack));
                        } else {
                            asm!(concat!("mrs {0}, ", $nvhe), out(reg) value, options(nomem, nostack));
                        }
                    },
                )*
            }
            value
        }

        fn write_raw(vhe: bool, reg: SysReg, value: u64) {
            match reg {
                $(
                    SysReg::$reg => unsafe {
                        if vhe {
                            asm!(concat!("msr ", $vhe, ", {0}"), in(reg) value, options(nostack));
                        } else {
                            asm!(concat!("msr ", $nvhe, ", {0}"), in(reg) value, options(nostack));
                        }
                    },
                )*
            }
        }
    };
}

sysreg_table! {
    HcrEl2 => "hcr_el2", "hcr_el2";
    CptrEl2 => "cptr_el2", "cptr_el2";
    HstrEl2 => "hstr_el2", "hstr_el2";
    MdcrEl2 => "mdcr_el2", "mdcr_el2";
    VttbrEl2 => "vttbr_el2", "vttbr_el2";
    VtcrEl2 => "vtcr_el2", "vtcr_el2";
    VsesrEl2 => "S3_4_C5_C2_3", "S3_4_C5_C2_3";
    VdisrEl2 => "S3_4_C12_C1_1", "S3_4_C12_C1_1";
    EsrEl2 => "esr_el2", "esr_el2";
    FarEl2 => "far_el2", "far_el2";
    HpfarEl2 => "hpfar_el2", "hpfar_el2";
    ElrEl2 => "elr_el2", "elr_el2";
    SpsrEl2 => "spsr_el2", "spsr_el2";
    VbarEl2 => "vbar_el2", "vbar_el2";
    VmpidrEl2 => "vmpidr_el2", "vmpidr_el2";
    ZcrEl2 => "S3_4_C1_C2_0", "S3_4_C1_C2_0";
    Fpexc32El2 => "fpexc32_el2", "fpexc32_el2";
    Dacr32El2 => "dacr32_el2", "dacr32_el2";
    Ifsr32El2 => "ifsr32_el2", "ifsr32_el2";
    Dbgvcr32El2 => "dbgvcr32_el2", "dbgvcr32_el2";

    SctlrEl1 => "sctlr_el1", "S3_5_C1_C0_0";
    CpacrEl1 => "cpacr_el1", "S3_5_C1_C0_2";
    ZcrEl1 => "S3_0_C1_C2_0", "S3_5_C1_C2_0";
    Ttbr0El1 => "ttbr0_el1", "S3_5_C2_C0_0";
    Ttbr1El1 => "ttbr1_el1", "S3_5_C2_C0_1";
    TcrEl1 => "tcr_el1", "S3_5_C2_C0_2";
    EsrEl1 => "esr_el1", "S3_5_C5_C2_0";
    FarEl1 => "far_el1", "S3_5_C6_C0_0";
    Afsr0El1 => "afsr0_el1", "S3_5_C5_C1_0";
    Afsr1El1 => "afsr1_el1", "S3_5_C5_C1_1";
    MairEl1 => "mair_el1", "S3_5_C10_C2_0";
    AmairEl1 => "amair_el1", "S3_5_C10_C3_0";
    VbarEl1 => "vbar_el1", "S3_5_C12_C0_0";
    ContextidrEl1 => "contextidr_el1", "S3_5_C13_C0_1";
    CntkctlEl1 => "cntkctl_el1", "S3_5_C14_C1_0";
    ElrEl1 => "elr_el1", "S3_5_C4_C0_1";
    SpsrEl1 => "spsr_el1", "S3_5_C4_C0_0";

    ActlrEl1 => "actlr_el1", "actlr_el1";
    CsselrEl1 => "csselr_el1", "csselr_el1";
    TpidrEl1 => "tpidr_el1", "tpidr_el1";
    ParEl1 => "par_el1", "par_el1";
    MdscrEl1 => "mdscr_el1", "mdscr_el1";
    SpEl1 => "sp_el1", "sp_el1";
    IccPmrEl1 => "S3_0_C4_C6_0", "S3_0_C4_C6_0";

    SpEl0 => "sp_el0", "sp_el0";
    TpidrEl0 => "tpidr_el0", "tpidr_el0";
    TpidrroEl0 => "tpidrro_el0", "tpidrro_el0";
    PmselrEl0 => "pmselr_el0", "pmselr_el0";
    PmuserenrEl0 => "pmuserenr_el0", "pmuserenr_el0";
    PmcntensetEl0 => "pmcntenset_el0", "pmcntenset_el0";
    PmcntenclrEl0 => "pmcntenclr_el0", "pmcntenclr_el0";

    SpsrAbt => "spsr_abt", "spsr_abt";
    SpsrUnd => "spsr_und", "spsr_und";
    SpsrIrq => "spsr_irq", "spsr_irq";
    SpsrFiq => "spsr_fiq", "spsr_fiq";
}

extern "C" {
    fn __ferroswitch_guest_enter(guest: *mut GpRegs, host: *mut GpRegs) -> u64;
    fn __ferroswitch_fpsimd_save(state: *mut FpSimdState);
    fn __ferroswitch_fpsimd_restore(state: *const FpSimdState);
    fn __ferroswitch_sve_save(regs: *mut u8, fpsr: *mut u32);
    fn __ferroswitch_sve_load(regs: *const u8, fpsr: *const u32, vq_minus_one: u64);
    static __ferroswitch_vectors: u8;

    /// Handler for exceptions taken from EL2 itself, supplied by the platform.
    /// It is expected to call [`crate::arch::arm64::switch::unexpected_el2_exception`].
    fn ferroswitch_el2_exception();
}

/// Address of the EL2 vector table used while a guest runs
pub fn hyp_vectors() -> u64 {
    // SAFETY: only the address of the linker symbol is taken.
    unsafe { core::ptr::addr_of!(__ferroswitch_vectors) as u64 }
}

impl CpuIdRegs {
    /// Read the identification registers of the current CPU
    pub fn read_current() -> Self {
        let pfr0: u64;
        let mmfr1: u64;
        // SAFETY: ID registers are readable at EL1 and above and have no side effects.
        unsafe {
            asm!("mrs {0}, id_aa64pfr0_el1", out(reg) pfr0, options(nomem, nostack));
            asm!("mrs {0}, id_aa64mmfr1_el1", out(reg) mmfr1, options(nomem, nostack));
        }
        Self {
            midr: MIDR_EL1.get(),
            pfr0,
            mmfr1,
        }
    }
}

/// The physical CPU, accessed from EL2
#[derive(Debug)]
pub struct El2Hw {
    vhe: bool,
}

impl El2Hw {
    /// Backend for the current core
    ///
    /// # Safety
    ///
    /// The caller must run at EL2, and `vhe` must match HCR_EL2.E2H.
    pub const unsafe fn new(vhe: bool) -> Self {
        Self { vhe }
    }
}

impl SysRegOps for El2Hw {
    fn read(&self, reg: SysReg) -> u64 {
        match reg {
            SysReg::HcrEl2 => HCR_EL2.get(),
            SysReg::ElrEl2 => ELR_EL2.get(),
            SysReg::SpsrEl2 => SPSR_EL2.get(),
            SysReg::EsrEl2 => ESR_EL2.get(),
            SysReg::FarEl2 => FAR_EL2.get(),
            SysReg::ParEl1 => PAR_EL1.get(),
            SysReg::VttbrEl2 => VTTBR_EL2.get(),
            SysReg::VtcrEl2 => VTCR_EL2.get(),
            SysReg::VbarEl2 => VBAR_EL2.get(),
            SysReg::SpEl0 => SP_EL0.get(),
            other => read_raw(self.vhe, other),
        }
    }

    fn write(&mut self, reg: SysReg, value: u64) {
        match reg {
            SysReg::HcrEl2 => HCR_EL2.set(value),
            SysReg::ElrEl2 => ELR_EL2.set(value),
            SysReg::SpsrEl2 => SPSR_EL2.set(value),
            SysReg::ParEl1 => PAR_EL1.set(value),
            SysReg::VttbrEl2 => VTTBR_EL2.set(value),
            SysReg::VtcrEl2 => VTCR_EL2.set(value),
            SysReg::VbarEl2 => VBAR_EL2.set(value),
            SysReg::SpEl0 => SP_EL0.set(value),
            other => write_raw(self.vhe, other, value),
        }
    }

    fn isb(&mut self) {
        barrier::isb(barrier::SY);
    }

    fn dsb(&mut self) {
        barrier::dsb(barrier::SY);
    }

    fn at_s1e1r(&mut self, va: u64) {
        // SAFETY: the probe only updates PAR_EL1. A synchronous exception
        // raised by the AT itself is caught by the fixup table.
        unsafe {
            asm!("at s1e1r, {0}", "isb", in(reg) va, options(nostack));
        }
    }

    fn fpsimd_save(&mut self, state: &mut FpSimdState) {
        // SAFETY: `state` is a valid, 16-byte aligned bank.
        unsafe { __ferroswitch_fpsimd_save(state) }
    }

    fn fpsimd_restore(&mut self, state: &FpSimdState) {
        // SAFETY: `state` is a valid, 16-byte aligned bank.
        unsafe { __ferroswitch_fpsimd_restore(state) }
    }

    fn sve_save(&mut self, state: &mut SveState) {
        // SAFETY: `regs` holds the largest supported bank and `fpsr` is
        // immediately followed by `fpcr`.
        unsafe { __ferroswitch_sve_save(state.regs.as_mut_ptr(), &mut state.fpsr) }
    }

    fn sve_load(&mut self, state: &SveState, vq_minus_one: u64) {
        // SAFETY: as for `sve_save`; the vector length is bounded by the bank size.
        unsafe { __ferroswitch_sve_load(state.regs.as_ptr(), &state.fpsr, vq_minus_one & 0xf) }
    }

    fn arch_workaround_2(&mut self, enable: bool) {
        // SAFETY: SMCCC 1.1 fast call; x0-x3 are the only registers it may change.
        unsafe {
            asm!(
                "smc #0",
                inout("x0") SMCCC_ARCH_WORKAROUND_2 as u64 => _,
                inout("x1") enable as u64 => _,
                lateout("x2") _,
                lateout("x3") _,
                options(nostack),
            );
        }
    }

    unsafe fn guest_enter(&mut self, guest: &mut GpRegs, host: &mut GpRegs) -> u64 {
        __ferroswitch_guest_enter(guest, host)
    }
}

// Guest entry and exit.
//
// enter(x0 = guest regs, x1 = host regs): park the host's callee-saved
// registers, push both pointers, load the guest and ERET.
// The vectors push the guest's x0/x1, load an exit code into x0 and branch
// to exit, which stores the guest, reloads the host and returns the code.
global_asm!(
    r#"
    .pushsection .text.ferroswitch, "ax"

    .global __ferroswitch_guest_enter
    .type __ferroswitch_guest_enter, %function
__ferroswitch_guest_enter:
    stp     x19, x20, [x1, #{x19} + 16 * 0]
    stp     x21, x22, [x1, #{x19} + 16 * 1]
    stp     x23, x24, [x1, #{x19} + 16 * 2]
    stp     x25, x26, [x1, #{x19} + 16 * 3]
    stp     x27, x28, [x1, #{x19} + 16 * 4]
    stp     x29, x30, [x1, #{x19} + 16 * 5]
    stp     x0, x1, [sp, #-16]!

    ldp     x2, x3, [x0, #16 * 1]
    ldp     x4, x5, [x0, #16 * 2]
    ldp     x6, x7, [x0, #16 * 3]
    ldp     x8, x9, [x0, #16 * 4]
    ldp     x10, x11, [x0, #16 * 5]
    ldp     x12, x13, [x0, #16 * 6]
    ldp     x14, x15, [x0, #16 * 7]
    ldp     x16, x17, [x0, #16 * 8]
    ldp     x18, x19, [x0, #16 * 9]
    ldp     x20, x21, [x0, #16 * 10]
    ldp     x22, x23, [x0, #16 * 11]
    ldp     x24, x25, [x0, #16 * 12]
    ldp     x26, x27, [x0, #16 * 13]
    ldp     x28, x29, [x0, #16 * 14]
    ldr     x30, [x0, #{x30}]
    ldp     x0, x1, [x0, #{x0}]
    eret
    dsb     nsh
    isb
    .size __ferroswitch_guest_enter, . - __ferroswitch_guest_enter

    .global __ferroswitch_guest_exit
    .type __ferroswitch_guest_exit, %function
__ferroswitch_guest_exit:
    // sp: guest x0/x1, then the guest and host pointers
    ldr     x1, [sp, #16]
    stp     x2, x3, [x1, #16 * 1]
    stp     x4, x5, [x1, #16 * 2]
    stp     x6, x7, [x1, #16 * 3]
    stp     x8, x9, [x1, #16 * 4]
    stp     x10, x11, [x1, #16 * 5]
    stp     x12, x13, [x1, #16 * 6]
    stp     x14, x15, [x1, #16 * 7]
    stp     x16, x17, [x1, #16 * 8]
    stp     x18, x19, [x1, #16 * 9]
    stp     x20, x21, [x1, #16 * 10]
    stp     x22, x23, [x1, #16 * 11]
    stp     x24, x25, [x1, #16 * 12]
    stp     x26, x27, [x1, #16 * 13]
    stp     x28, x29, [x1, #16 * 14]
    str     x30, [x1, #{x30}]
    ldp     x2, x3, [sp], #16
    stp     x2, x3, [x1, #{x0}]

    ldp     x1, x2, [sp], #16
    ldp     x19, x20, [x2, #{x19} + 16 * 0]
    ldp     x21, x22, [x2, #{x19} + 16 * 1]
    ldp     x23, x24, [x2, #{x19} + 16 * 2]
    ldp     x25, x26, [x2, #{x19} + 16 * 3]
    ldp     x27, x28, [x2, #{x19} + 16 * 4]
    ldp     x29, x30, [x2, #{x19} + 16 * 5]

    // An SError the guest left pending is reported alongside the exit
    mrs     x1, isr_el1
    tbz     x1, #8, 1f
    orr     x0, x0, #{serror_pending}
1:
    ret
    .size __ferroswitch_guest_exit, . - __ferroswitch_guest_exit

    .macro ferroswitch_exit_vector code
    .balign 128
    stp     x0, x1, [sp, #-16]!
    mov     x0, #\code
    b       __ferroswitch_guest_exit
    .endm

    .macro ferroswitch_el2_vector
    .balign 128
    b       __ferroswitch_el2_exception
    .endm

    .balign 2048
    .global __ferroswitch_vectors
__ferroswitch_vectors:
    // Current EL with SP_EL0
    ferroswitch_el2_vector
    ferroswitch_el2_vector
    ferroswitch_el2_vector
    ferroswitch_el2_vector
    // Current EL with SP_ELx
    ferroswitch_el2_vector
    ferroswitch_el2_vector
    ferroswitch_el2_vector
    ferroswitch_el2_vector
    // Lower EL, AArch64
    ferroswitch_exit_vector {trap}
    ferroswitch_exit_vector {irq}
    ferroswitch_exit_vector {irq}
    ferroswitch_exit_vector {el1_serror}
    // Lower EL, AArch32
    ferroswitch_exit_vector {trap}
    ferroswitch_exit_vector {irq}
    ferroswitch_exit_vector {irq}
    ferroswitch_exit_vector {el1_serror}

    .balign 128
__ferroswitch_el2_exception:
    sub     sp, sp, #16 * 10
    stp     x0, x1, [sp, #16 * 0]
    stp     x2, x3, [sp, #16 * 1]
    stp     x4, x5, [sp, #16 * 2]
    stp     x6, x7, [sp, #16 * 3]
    stp     x8, x9, [sp, #16 * 4]
    stp     x10, x11, [sp, #16 * 5]
    stp     x12, x13, [sp, #16 * 6]
    stp     x14, x15, [sp, #16 * 7]
    stp     x16, x17, [sp, #16 * 8]
    stp     x18, x30, [sp, #16 * 9]
    bl      {handler}
    ldp     x18, x30, [sp, #16 * 9]
    ldp     x16, x17, [sp, #16 * 8]
    ldp     x14, x15, [sp, #16 * 7]
    ldp     x12, x13, [sp, #16 * 6]
    ldp     x10, x11, [sp, #16 * 5]
    ldp     x8, x9, [sp, #16 * 4]
    ldp     x6, x7, [sp, #16 * 3]
    ldp     x4, x5, [sp, #16 * 2]
    ldp     x2, x3, [sp, #16 * 1]
    ldp     x0, x1, [sp, #16 * 0]
    add     sp, sp, #16 * 10
    eret

    .popsection
"#,
    x0 = const GpRegsOffsets::X0,
    x19 = const GpRegsOffsets::X19,
    x30 = const GpRegsOffsets::X30,
    serror_pending = const ExitCode::SERROR_PENDING,
    trap = const ExitCode::TRAP.raw(),
    irq = const ExitCode::IRQ.raw(),
    el1_serror = const ExitCode::EL1_SERROR.raw(),
    handler = sym ferroswitch_el2_exception,
);

// FP/SIMD bank: V0-V31 at 16-byte strides, then FPSR and FPCR.
global_asm!(
    r#"
    .pushsection .text.ferroswitch, "ax"
    .arch_extension fp
    .arch_extension simd

    .global __ferroswitch_fpsimd_save
    .type __ferroswitch_fpsimd_save, %function
__ferroswitch_fpsimd_save:
    stp     q0, q1, [x0, #16 * 0]
    stp     q2, q3, [x0, #16 * 2]
    stp     q4, q5, [x0, #16 * 4]
    stp     q6, q7, [x0, #16 * 6]
    stp     q8, q9, [x0, #16 * 8]
    stp     q10, q11, [x0, #16 * 10]
    stp     q12, q13, [x0, #16 * 12]
    stp     q14, q15, [x0, #16 * 14]
    stp     q16, q17, [x0, #16 * 16]
    stp     q18, q19, [x0, #16 * 18]
    stp     q20, q21, [x0, #16 * 20]
    stp     q22, q23, [x0, #16 * 22]
    stp     q24, q25, [x0, #16 * 24]
    stp     q26, q27, [x0, #16 * 26]
    stp     q28, q29, [x0, #16 * 28]
    stp     q30, q31, [x0, #16 * 30]
    mrs     x8, fpsr
    str     w8, [x0, #16 * 32]
    mrs     x8, fpcr
    str     w8, [x0, #16 * 32 + 4]
    ret
    .size __ferroswitch_fpsimd_save, . - __ferroswitch_fpsimd_save

    .global __ferroswitch_fpsimd_restore
    .type __ferroswitch_fpsimd_restore, %function
__ferroswitch_fpsimd_restore:
    ldp     q0, q1, [x0, #16 * 0]
    ldp     q2, q3, [x0, #16 * 2]
    ldp     q4, q5, [x0, #16 * 4]
    ldp     q6, q7, [x0, #16 * 6]
    ldp     q8, q9, [x0, #16 * 8]
    ldp     q10, q11, [x0, #16 * 10]
    ldp     q12, q13, [x0, #16 * 12]
    ldp     q14, q15, [x0, #16 * 14]
    ldp     q16, q17, [x0, #16 * 16]
    ldp     q18, q19, [x0, #16 * 18]
    ldp     q20, q21, [x0, #16 * 20]
    ldp     q22, q23, [x0, #16 * 22]
    ldp     q24, q25, [x0, #16 * 24]
    ldp     q26, q27, [x0, #16 * 26]
    ldp     q28, q29, [x0, #16 * 28]
    ldp     q30, q31, [x0, #16 * 30]
    ldr     w8, [x0, #16 * 32]
    msr     fpsr, x8
    ldr     w8, [x0, #16 * 32 + 4]
    msr     fpcr, x8
    ret
    .size __ferroswitch_fpsimd_restore, . - __ferroswitch_fpsimd_restore

    .popsection
"#
);

// SVE bank: Z0-Z31, P0-P15, FFR, addressed in multiples of the current
// vector length. x0 = bank, x1 = FPSR/FPCR pair, x2 = vq - 1 (load only).
global_asm!(
    r#"
    .pushsection .text.ferroswitch, "ax"
    .arch_extension sve

    .global __ferroswitch_sve_save
    .type __ferroswitch_sve_save, %function
__ferroswitch_sve_save:
    .irp n, 0,1,2,3,4,5,6,7,8,9,10,11,12,13,14,15,16,17,18,19,20,21,22,23,24,25,26,27,28,29,30,31
    str     z\n, [x0, #\n, MUL VL]
    .endr
    addvl   x2, x0, #16
    addvl   x2, x2, #16
    .irp n, 0,1,2,3,4,5,6,7,8,9,10,11,12,13,14,15
    str     p\n, [x2, #\n, MUL VL]
    .endr
    addpl   x3, x2, #16
    rdffr   p0.b
    str     p0, [x3]
    ldr     p0, [x2]
    mrs     x8, fpsr
    str     w8, [x1]
    mrs     x8, fpcr
    str     w8, [x1, #4]
    ret
    .size __ferroswitch_sve_save, . - __ferroswitch_sve_save

    .global __ferroswitch_sve_load
    .type __ferroswitch_sve_load, %function
__ferroswitch_sve_load:
    mrs     x9, S3_4_C1_C2_0
    bic     x10, x9, #0xf
    orr     x10, x10, x2
    cmp     x10, x9
    b.eq    1f
    msr     S3_4_C1_C2_0, x10
    isb
1:
    .irp n, 0,1,2,3,4,5,6,7,8,9,10,11,12,13,14,15,16,17,18,19,20,21,22,23,24,25,26,27,28,29,30,31
    ldr     z\n, [x0, #\n, MUL VL]
    .endr
    addvl   x3, x0, #16
    addvl   x3, x3, #16
    addpl   x4, x3, #16
    ldr     p0, [x4]
    wrffr   p0.b
    .irp n, 0,1,2,3,4,5,6,7,8,9,10,11,12,13,14,15
    ldr     p\n, [x3, #\n, MUL VL]
    .endr
    ldr     w9, [x1]
    msr     fpsr, x9
    ldr     w9, [x1, #4]
    msr     fpcr, x9
    ret
    .size __ferroswitch_sve_load, . - __ferroswitch_sve_load

    .popsection
"#
);
