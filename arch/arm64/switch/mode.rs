//! Host mode specific steps of a guest run
//!
//! The run loop is the same for both host modes; what differs is which
//! state moves around it. A VHE host keeps the guest's EL1 state loaded
//! between runs, so only the common and return state switch. A non-VHE
//! host switches everything and also owns the PMU, vGIC, timer and
//! interrupt priority mask handoff.

use crate::arch::arm64::cpu::features::HostModeKind;
use crate::arch::arm64::cpu::hw::SysRegOps;
use crate::arch::arm64::cpu::regs::gic_prio;
use crate::arch::arm64::cpu::sysreg::state as sysreg;
use crate::arch::arm64::cpu::sysreg::SysReg;
use crate::arch::arm64::cpu::vcpu::{Vcpu, VcpuFlags};
use crate::arch::arm64::hooks::SwitchHooks;
use crate::arch::arm64::mmu::stage2;
use crate::arch::arm64::percpu::PerCoreState;
use crate::arch::arm64::switch::traps;

/// Steps of a run that depend on how the host uses EL2
pub trait HostMode {
    const KIND: HostModeKind;

    /// Before the host state is saved
    ///
    /// Returns whether PMU counters were switched for the guest.
    fn prepare<H: SysRegOps>(core: &mut PerCoreState, hw: &mut H) -> bool;

    fn save_host<H: SysRegOps>(core: &mut PerCoreState, hw: &mut H);

    /// Load the guest, after its traps are armed
    fn restore_guest<H: SysRegOps, K: SwitchHooks>(
        vcpu: &mut Vcpu,
        core: &PerCoreState,
        hooks: &mut K,
        hw: &mut H,
    );

    fn save_guest<H: SysRegOps, K: SwitchHooks>(
        vcpu: &mut Vcpu,
        core: &PerCoreState,
        hooks: &mut K,
        hw: &mut H,
    );

    /// Load the host, after its traps are back
    fn restore_host<H: SysRegOps>(core: &PerCoreState, hw: &mut H);

    /// After the host debug state is back
    fn finish<H: SysRegOps>(core: &PerCoreState, pmu_switched: bool, hw: &mut H);

    /// Put the host back on the fatal path
    fn unwind_for_panic<H: SysRegOps, K: SwitchHooks>(
        core: &mut PerCoreState,
        vcpu: Option<&mut Vcpu>,
        hooks: &mut K,
        hw: &mut H,
    );
}

/// Host kernel at EL2 (HCR_EL2.E2H set)
#[derive(Debug)]
pub enum Vhe {}

/// Host kernel at EL1 with a hyp layer at EL2
#[derive(Debug)]
pub enum Nvhe {}

impl HostMode for Vhe {
    const KIND: HostModeKind = HostModeKind::Vhe;

    fn prepare<H: SysRegOps>(_core: &mut PerCoreState, _hw: &mut H) -> bool {
        false
    }

    fn save_host<H: SysRegOps>(core: &mut PerCoreState, hw: &mut H) {
        sysreg::save_host_state_vhe(&mut core.host, hw);
    }

    fn restore_guest<H: SysRegOps, K: SwitchHooks>(
        vcpu: &mut Vcpu,
        core: &PerCoreState,
        _hooks: &mut K,
        hw: &mut H,
    ) {
        sysreg::restore_guest_state_vhe(&vcpu.ctxt, core.caps.ras, hw);
    }

    fn save_guest<H: SysRegOps, K: SwitchHooks>(
        vcpu: &mut Vcpu,
        core: &PerCoreState,
        _hooks: &mut K,
        hw: &mut H,
    ) {
        sysreg::save_guest_state_vhe(&mut vcpu.ctxt, core.caps.ras, hw);
    }

    fn restore_host<H: SysRegOps>(core: &PerCoreState, hw: &mut H) {
        sysreg::restore_host_state_vhe(&core.host, hw);
    }

    fn finish<H: SysRegOps>(_core: &PerCoreState, _pmu_switched: bool, _hw: &mut H) {}

    fn unwind_for_panic<H: SysRegOps, K: SwitchHooks>(
        core: &mut PerCoreState,
        vcpu: Option<&mut Vcpu>,
        _hooks: &mut K,
        hw: &mut H,
    ) {
        traps::deactivate(vcpu, &core.host_traps, hw);
        sysreg::restore_host_state_vhe(&core.host, hw);
    }
}

impl HostMode for Nvhe {
    const KIND: HostModeKind = HostModeKind::Nvhe;

    fn prepare<H: SysRegOps>(core: &mut PerCoreState, hw: &mut H) -> bool {
        // The guest can only be left through its own exceptions while the
        // PMR masks interrupts
        if core.caps.irq_prio_masking {
            hw.write(SysReg::IccPmrEl1, gic_prio::IRQON | gic_prio::PSR_I_SET);
            hw.dsb();
        }

        core.pmu.switch_to_guest(hw)
    }

    fn save_host<H: SysRegOps>(core: &mut PerCoreState, hw: &mut H) {
        sysreg::save_state_nvhe(&mut core.host, core.caps.ras, hw);
    }

    fn restore_guest<H: SysRegOps, K: SwitchHooks>(
        vcpu: &mut Vcpu,
        core: &PerCoreState,
        hooks: &mut K,
        hw: &mut H,
    ) {
        hooks.vgic_restore(vcpu, hw);
        hooks.timer_enable_traps(vcpu, hw);

        // AArch32 state goes first: Cortex-A57 #852523, Cortex-A72 #853709
        if vcpu.is_32bit() {
            let debug_dirty = vcpu.flags.contains(VcpuFlags::DEBUG_DIRTY);
            sysreg::restore_sysreg32(&vcpu.ctxt, debug_dirty, hw);
        }
        sysreg::restore_state_nvhe(&vcpu.ctxt, core.caps.ras, hw);
    }

    fn save_guest<H: SysRegOps, K: SwitchHooks>(
        vcpu: &mut Vcpu,
        core: &PerCoreState,
        hooks: &mut K,
        hw: &mut H,
    ) {
        sysreg::save_state_nvhe(&mut vcpu.ctxt, core.caps.ras, hw);
        if vcpu.is_32bit() {
            let debug_dirty = vcpu.flags.contains(VcpuFlags::DEBUG_DIRTY);
            sysreg::save_sysreg32(&mut vcpu.ctxt, debug_dirty, hw);
        }

        hooks.timer_disable_traps(hw);
        hooks.vgic_save(vcpu, hw);
    }

    fn restore_host<H: SysRegOps>(core: &PerCoreState, hw: &mut H) {
        stage2::deactivate_vm(hw);
        sysreg::restore_state_nvhe(&core.host, core.caps.ras, hw);
    }

    fn finish<H: SysRegOps>(core: &PerCoreState, pmu_switched: bool, hw: &mut H) {
        if pmu_switched {
            core.pmu.switch_to_host(hw);
        }

        // Returning to the host clears PSR.I
        if core.caps.irq_prio_masking {
            hw.write(SysReg::IccPmrEl1, gic_prio::IRQOFF);
        }
    }

    fn unwind_for_panic<H: SysRegOps, K: SwitchHooks>(
        core: &mut PerCoreState,
        vcpu: Option<&mut Vcpu>,
        hooks: &mut K,
        hw: &mut H,
    ) {
        if stage2::guest_regime_active(hw) {
            hooks.timer_disable_traps(hw);
            traps::deactivate(vcpu, &core.host_traps, hw);
            stage2::deactivate_vm(hw);
            sysreg::restore_state_nvhe(&core.host, core.caps.ras, hw);
        }

        // PMU and PMR were handed over before the regime was loaded
        Self::finish(core, true, hw);
    }
}
