//! SSBD (speculative store bypass) mitigation around guest runs
//!
//! The host always runs with the mitigation on. A guest may turn it off for
//! itself through ARCH_WORKAROUND_2; the switch then asks firmware to drop
//! it for the run and turns it back on before the host continues.

use crate::arch::arm64::cpu::features::Capabilities;
use crate::arch::arm64::cpu::hw::SysRegOps;
use crate::arch::arm64::cpu::vcpu::Vcpu;

/// Per-core mitigation state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkaroundState {
    /// Firmware has to be called to change the mitigation on this core
    pub ssbd_callback_required: bool,
    mitigation_on: bool,
}

impl WorkaroundState {
    pub const fn new(ssbd_callback_required: bool) -> Self {
        Self {
            ssbd_callback_required,
            mitigation_on: true,
        }
    }

    /// Mitigation state last requested from firmware
    pub fn mitigation_on(&self) -> bool {
        self.mitigation_on
    }

    fn needs_ssbd_off(&self, vcpu: &Vcpu, caps: &Capabilities) -> bool {
        caps.ssbd && self.ssbd_callback_required && !vcpu.workaround_2()
    }

    /// Apply the guest's choice before entering it
    pub fn enter_guest<H: SysRegOps>(&mut self, vcpu: &Vcpu, caps: &Capabilities, hw: &mut H) {
        if self.needs_ssbd_off(vcpu, caps) {
            hw.arch_workaround_2(false);
            self.mitigation_on = false;
        }
    }

    /// Bring the mitigation back for the host
    ///
    /// Follows what firmware was last told, not the vCPU's current flag:
    /// the flag may change while the guest is in.
    pub fn leave_guest<H: SysRegOps>(&mut self, hw: &mut H) {
        if !self.mitigation_on {
            hw.arch_workaround_2(true);
            self.mitigation_on = true;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arch::arm64::cpu::features::{Errata, HostModeKind, VectorUnit, VgicTrapMode};
    use crate::arch::arm64::cpu::hw::ModelCpu;
    use crate::arch::arm64::mmu::stage2::Stage2Config;
    use test_case::test_case;

    fn caps(ssbd: bool) -> Capabilities {
        Capabilities {
            mode: HostModeKind::Vhe,
            vector: VectorUnit::FpSimd,
            errata: Errata::empty(),
            ras: false,
            ssbd,
            irq_prio_masking: false,
            vgic_trap: VgicTrapMode::None,
        }
    }

    #[test_case(true, true, false, 2; "guest opts out")]
    #[test_case(true, true, true, 0; "guest keeps mitigation")]
    #[test_case(false, true, false, 0; "no firmware support")]
    #[test_case(true, false, false, 0; "callback not required")]
    fn test_ssbd_calls(ssbd: bool, callback: bool, guest_wants: bool, calls: u32) {
        let caps = caps(ssbd);
        let mut hw = ModelCpu::new();
        let mut vcpu = Vcpu::new(0, &caps, false, Stage2Config::default());
        vcpu.set_workaround_2(guest_wants);
        let mut state = WorkaroundState::new(callback);

        state.enter_guest(&vcpu, &caps, &mut hw);
        assert_eq!(hw.ssbd_enabled, calls == 0);
        state.leave_guest(&mut hw);

        assert_eq!(hw.stats.ssbd_calls, calls);
        assert!(hw.ssbd_enabled);
        assert!(state.mitigation_on());
    }

    #[test]
    fn test_flag_change_during_run_restores_mitigation() {
        let caps = caps(true);
        let mut hw = ModelCpu::new();
        let mut vcpu = Vcpu::new(0, &caps, false, Stage2Config::default());
        vcpu.set_workaround_2(false);
        let mut state = WorkaroundState::new(true);

        state.enter_guest(&vcpu, &caps, &mut hw);
        assert!(!hw.ssbd_enabled);

        vcpu.set_workaround_2(true);
        state.leave_guest(&mut hw);

        assert_eq!(hw.stats.ssbd_calls, 2);
        assert!(hw.ssbd_enabled);
        assert!(state.mitigation_on());
    }

    #[test]
    fn test_leave_without_enter_is_silent() {
        let mut hw = ModelCpu::new();
        let mut state = WorkaroundState::new(true);

        state.leave_guest(&mut hw);
        assert_eq!(hw.stats.ssbd_calls, 0);
    }
}
