//! Lazy FP/SIMD/SVE Switching for ARM64
//!
//! The guest starts every run with its FP/SIMD (and SVE) accesses trapped.
//! Only when it actually touches the unit does the trap handler park the
//! host's registers and load the guest's; from then on the guest owns the
//! unit until the vCPU is put.
//!
//! Reference: ARM DDI 0487I.a - D13.2.30 CPTR_EL2, D13.2.29 CPACR_EL1
//!
//! Ownership moves like this:
//! 1. `vcpu_load_fp`: the live registers are the host task's (`HostOwns`)
//! 2. `update_fp_enabled` before each run: a foreign owner drops to `Unowned`
//! 3. `handle_fpsimd` on the first guest access: host saved if it owned the
//!    unit, guest loaded (`GuestOwns`)
//! 4. `vcpu_put_fp`: guest saved, host reloaded if it was parked

use crate::arch::arm64::cpu::features::Capabilities;
use crate::arch::arm64::cpu::hw::SysRegOps;
use crate::arch::arm64::cpu::regs::{CpacrEl1, CptrEl2, HcrEl2};
use crate::arch::arm64::cpu::sysreg::SysReg;
use crate::arch::arm64::cpu::vcpu::{TrapRecord, Vcpu, VcpuFlags};
use crate::arch::arm64::percpu::PerCoreState;
use crate::arch::arm64::ExceptionClass;

/// Owner of the live FP/SIMD registers
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum FpOwner {
    /// Nobody we care about; nothing to save
    #[default]
    Unowned,
    /// The host task that scheduled the vCPU
    HostOwns,
    /// The guest
    GuestOwns,
}

/// Mark the live registers as the host task's
pub fn vcpu_load_fp(vcpu: &mut Vcpu, host_sve_in_use: bool) {
    vcpu.fp_owner = FpOwner::HostOwns;
    vcpu.flags.remove(VcpuFlags::HOST_FP_SAVED | VcpuFlags::HOST_SVE_IN_USE);
    if host_sve_in_use {
        vcpu.flags.insert(VcpuFlags::HOST_SVE_IN_USE);
    }
}

/// Decide before a run whether the guest still owns the FP unit
///
/// Something other than the host task may have used the registers since the
/// last run (flagged with `HOST_FOREIGN_FPSTATE`); the guest's copy is then
/// stale and has to be reloaded on its next access.
pub fn update_fp_enabled(vcpu: &mut Vcpu, caps: &Capabilities) -> bool {
    if !caps.has_fpsimd() || vcpu.flags.contains(VcpuFlags::HOST_FOREIGN_FPSTATE) {
        vcpu.fp_owner = FpOwner::Unowned;
        vcpu.flags.remove(VcpuFlags::HOST_FOREIGN_FPSTATE);
    }

    vcpu.fp_owner == FpOwner::GuestOwns
}

/// Save FPEXC32_EL2 of a 32-bit guest that owns the FP unit
pub fn save_fpexc32<H: SysRegOps>(vcpu: &mut Vcpu, hw: &H) {
    if vcpu.fp_owner != FpOwner::GuestOwns || !vcpu.is_32bit() {
        return;
    }

    vcpu.ctxt.sys.fpexc32_el2 = hw.read(SysReg::Fpexc32El2);
}

/// Handle a trapped FP/SIMD or SVE access
///
/// Returns `false` when the exit is not an FP trap this core can serve;
/// the dispatcher then keeps looking. Once it returns `true` the guest owns
/// the unit and can be resumed.
pub fn handle_fpsimd<H: SysRegOps>(
    vcpu: &mut Vcpu,
    core: &mut PerCoreState,
    record: &TrapRecord,
    hw: &mut H,
) -> bool {
    let caps = core.caps;
    if !caps.has_fpsimd() {
        return false;
    }

    // CPTR_EL2 has the CPACR layout only with E2H set
    let vhe = caps.is_vhe();
    let (sve_guest, sve_host) = if caps.has_sve() && vhe {
        (
            vcpu.has_sve(),
            vcpu.flags.contains(VcpuFlags::HOST_SVE_IN_USE),
        )
    } else {
        (false, false)
    };

    match record.class {
        ExceptionClass::FpAsimd => {}
        ExceptionClass::Sve if sve_guest => {}
        _ => return false,
    }

    let cptr = hw.read(SysReg::CptrEl2);
    if vhe {
        let mut enable = CpacrEl1::FPEN;
        if sve_guest {
            enable |= CpacrEl1::ZEN;
        }
        hw.write(SysReg::CptrEl2, cptr | enable.bits());
    } else {
        hw.write(SysReg::CptrEl2, cptr & !CptrEl2::TFP.bits());
    }
    hw.isb();

    if vcpu.fp_owner == FpOwner::HostOwns {
        if sve_host {
            hw.sve_save(&mut core.host_sve);
        } else {
            hw.fpsimd_save(&mut core.host.fp);
            // Put has to restore the bank in the format it was saved in
            vcpu.flags.remove(VcpuFlags::HOST_SVE_IN_USE);
        }
        vcpu.flags.insert(VcpuFlags::HOST_FP_SAVED);
    }

    if sve_guest {
        let vq_minus_one = (vcpu.sve.vq() as u64).saturating_sub(1);
        hw.sve_load(&vcpu.sve, vq_minus_one);
        hw.write(SysReg::ZcrEl1, vcpu.ctxt.sys.zcr_el1);
    } else {
        hw.fpsimd_restore(&vcpu.ctxt.fp);
    }

    // Skip the write when the guest cannot run in AArch32 at all
    if HcrEl2::from_bits_retain(hw.read(SysReg::HcrEl2)).el1_is_32bit() {
        hw.write(SysReg::Fpexc32El2, vcpu.ctxt.sys.fpexc32_el2);
    }

    log::trace!(
        "lazy fp: vcpu{} takes the FP unit (sve={}, host parked={})",
        vcpu.id(),
        sve_guest,
        vcpu.flags.contains(VcpuFlags::HOST_FP_SAVED)
    );

    vcpu.fp_owner = FpOwner::GuestOwns;
    true
}

/// Hand the FP unit back when the vCPU is put
pub fn vcpu_put_fp<H: SysRegOps>(vcpu: &mut Vcpu, core: &mut PerCoreState, hw: &mut H) {
    if vcpu.fp_owner == FpOwner::GuestOwns {
        if vcpu.has_sve() {
            hw.sve_save(&mut vcpu.sve);
            vcpu.ctxt.sys.zcr_el1 = hw.read(SysReg::ZcrEl1);
        } else {
            hw.fpsimd_save(&mut vcpu.ctxt.fp);
        }

        if vcpu.flags.contains(VcpuFlags::HOST_FP_SAVED) {
            if vcpu.flags.contains(VcpuFlags::HOST_SVE_IN_USE) {
                let vq_minus_one = (core.host_sve.vq() as u64).saturating_sub(1);
                hw.sve_load(&core.host_sve, vq_minus_one);
            } else {
                hw.fpsimd_restore(&core.host.fp);
            }
            vcpu.fp_owner = FpOwner::HostOwns;
        } else {
            vcpu.fp_owner = FpOwner::Unowned;
        }
    }

    vcpu.flags.remove(VcpuFlags::HOST_FP_SAVED);
}
