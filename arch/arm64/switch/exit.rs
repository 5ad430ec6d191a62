//! Exit dispatcher
//!
//! Decides, for each guest exit, whether it can be dealt with at EL2 and
//! the guest resumed, or whether the host has to see it. The checks run in
//! a fixed order and the first one that decides wins.

use crate::arch::arm64::cpu::features::Errata;
use crate::arch::arm64::cpu::fpu;
use crate::arch::arm64::cpu::hw::SysRegOps;
use crate::arch::arm64::cpu::sysreg::SysReg;
use crate::arch::arm64::cpu::vcpu::{TrapRecord, Vcpu};
use crate::arch::arm64::hooks::SwitchHooks;
use crate::arch::arm64::mmu::fault;
use crate::arch::arm64::percpu::PerCoreState;
use crate::arch::arm64::switch::tvm;
use crate::arch::arm64::{ExceptionClass, ExitKind};

cfg_if::cfg_if! {
    if #[cfg(feature = "vgic-cpuif-emul")] {
        use crate::arch::arm64::cpu::features::VgicTrapMode;
        use crate::arch::arm64::cpu::regs::esr;
        use crate::arch::arm64::hooks::CpuIfAccess;
        use crate::arch::arm64::ExitCode;
    }
}

/// What the run loop does after an exit
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitAction {
    /// Exit dealt with; enter the guest again
    ResumeGuest,
    /// Leave the run loop and report the exit
    ReturnToHost,
}

/// Classify one guest exit, doing any EL2-side work it needs
pub fn fixup_guest_exit<H: SysRegOps, K: SwitchHooks>(
    vcpu: &mut Vcpu,
    core: &mut PerCoreState,
    record: &mut TrapRecord,
    hooks: &mut K,
    hw: &mut H,
) -> ExitAction {
    if record.exit.kind() != ExitKind::Irq {
        record.set_esr(hw.read(SysReg::EsrEl2));
    }

    let action = dispatch(vcpu, core, record, hooks, hw);

    if action == ExitAction::ReturnToHost {
        vcpu.replays = 0;
    }
    action
}

fn dispatch<H: SysRegOps, K: SwitchHooks>(
    vcpu: &mut Vcpu,
    core: &mut PerCoreState,
    record: &mut TrapRecord,
    hooks: &mut K,
    hw: &mut H,
) -> ExitAction {
    // An SError that arrived with the trap goes to the host first
    if !record.exit.is_clean_trap() {
        return ExitAction::ReturnToHost;
    }

    if core.caps.has_erratum(Errata::CAVIUM_TX2_219_TVM)
        && record.class == ExceptionClass::Sys64
        && tvm::handle_tx2_tvm(vcpu, record, hw)
    {
        return ExitAction::ResumeGuest;
    }

    if fpu::handle_fpsimd(vcpu, core, record, hw) {
        return ExitAction::ResumeGuest;
    }

    if let Err(err) = fault::populate_fault_info(record, &core.caps, hw) {
        // The guest's stage-1 changed under us; taking the fault again
        // will give a usable address
        vcpu.replays = vcpu.replays.saturating_add(1);
        if vcpu.replays == core.replay_warn_threshold {
            log::warn!(
                "vcpu{}: {} consecutive fault replays ({}), far={:#x}",
                vcpu.id(),
                vcpu.replays,
                err,
                hw.read(SysReg::FarEl2)
            );
        }
        return ExitAction::ResumeGuest;
    }

    #[cfg(feature = "vgic-cpuif-emul")]
    {
        if let Some(action) = vgic_cpuif_fast_path(vcpu, core, record, hooks, hw) {
            return action;
        }
    }
    #[cfg(not(feature = "vgic-cpuif-emul"))]
    let _ = hooks;

    ExitAction::ReturnToHost
}

/// GIC CPU-interface emulation
#[cfg(feature = "vgic-cpuif-emul")]
fn vgic_cpuif_fast_path<H: SysRegOps, K: SwitchHooks>(
    vcpu: &mut Vcpu,
    core: &PerCoreState,
    record: &mut TrapRecord,
    hooks: &mut K,
    hw: &mut H,
) -> Option<ExitAction> {
    match core.caps.vgic_trap {
        VgicTrapMode::V2CpuIf => {
            let valid = record.class == ExceptionClass::DabtLow
                && record.fault_type() == esr::FSC_FAULT
                && record.dabt_is_valid()
                && !record.dabt_is_external()
                && !record.is_s1ptw();

            if !valid {
                return None;
            }

            match hooks.vgic_v2_cpuif_access(vcpu, record, hw) {
                CpuIfAccess::Handled => Some(ExitAction::ResumeGuest),
                CpuIfAccess::Illegal => {
                    log::warn!(
                        "vcpu{}: illegal GICv2 CPU interface access at ipa {:#x}",
                        vcpu.id(),
                        record.fault_info().ipa().unwrap_or(0)
                    );
                    record.exit = ExitCode::EL1_SERROR;
                    Some(ExitAction::ReturnToHost)
                }
                CpuIfAccess::NotHandled => Some(ExitAction::ReturnToHost),
            }
        }
        VgicTrapMode::V3CpuIf => {
            if !matches!(record.class, ExceptionClass::Sys64 | ExceptionClass::Cp15_32) {
                return None;
            }

            match hooks.vgic_v3_cpuif_access(vcpu, record, hw) {
                CpuIfAccess::Handled => Some(ExitAction::ResumeGuest),
                _ => None,
            }
        }
        VgicTrapMode::None => None,
    }
}
