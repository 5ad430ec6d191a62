//! Cavium ThunderX2 erratum 219 fast path
//!
//! On affected cores the virtual memory control registers are trapped
//! (HCR_EL2.TVM) even though the vCPU did not ask for it. Trapped writes are
//! performed here on the guest's behalf without going back to the host.

use crate::arch::arm64::cpu::hw::SysRegOps;
use crate::arch::arm64::cpu::sysreg::{SysReg, SysRegEncoding};
use crate::arch::arm64::cpu::regs::HcrEl2;
use crate::arch::arm64::cpu::vcpu::{skip_trapped_instr, TrapRecord, Vcpu};

/// EL1 register a trapped SYS64 access targets, if TVM covers it
fn tvm_target(record: &TrapRecord) -> Option<SysReg> {
    let enc = SysRegEncoding::from_sys64_iss(record.iss());
    SysReg::TVM_REGS
        .into_iter()
        .find(|reg| reg.el1_encoding() == Some(enc))
}

/// Perform a trapped TVM register write for the guest
///
/// Returns `false` when the trap must go the normal way: the vCPU asked for
/// TVM itself, the access is a read, or the register is not one TVM covers.
pub fn handle_tx2_tvm<H: SysRegOps>(vcpu: &mut Vcpu, record: &TrapRecord, hw: &mut H) -> bool {
    if vcpu.hcr.contains(HcrEl2::TVM) || !record.sys64_is_write() {
        return false;
    }

    let Some(reg) = tvm_target(record) else {
        return false;
    };

    let value = vcpu.ctxt.gp.get(record.sys64_rt());
    hw.write(reg, value);
    skip_trapped_instr(&mut vcpu.ctxt.gp, record, hw);

    log::trace!("vcpu{}: TVM write {:?} = {:#x}", vcpu.id(), reg, value);
    true
}
