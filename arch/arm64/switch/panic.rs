//! Fatal path
//!
//! When the switch cannot continue it snapshots the exception registers,
//! puts the host's trap and translation regime back so the report can be
//! printed, and hands over to the platform's [`HaltFacility`]. SSBD and the
//! PMU/PMR handoff go back to the host as well.

use core::fmt;

use crate::arch::arm64::cpu::features::HostModeKind;
use crate::arch::arm64::cpu::hw::SysRegOps;
use crate::arch::arm64::cpu::sysreg::SysReg;
use crate::arch::arm64::cpu::vcpu::Vcpu;
use crate::arch::arm64::hooks::{HaltFacility, SwitchHooks};
use crate::arch::arm64::percpu::PerCoreState;
use crate::arch::arm64::switch::mode::{HostMode, Nvhe, Vhe};

/// Exception state at the time of the panic
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PanicRecord {
    pub spsr: u64,
    pub elr: u64,
    pub esr: u64,
    pub far: u64,
    pub hpfar: u64,
    pub par: u64,
    /// Address of the running vCPU, if any
    pub vcpu: usize,
}

impl PanicRecord {
    /// Read the exception registers before anything else touches them
    pub fn capture<H: SysRegOps>(vcpu: Option<&Vcpu>, hw: &H) -> Self {
        Self {
            spsr: hw.read(SysReg::SpsrEl2),
            elr: hw.read(SysReg::ElrEl2),
            esr: hw.read(SysReg::EsrEl2),
            far: hw.read(SysReg::FarEl2),
            hpfar: hw.read(SysReg::HpfarEl2),
            par: hw.read(SysReg::ParEl1),
            vcpu: vcpu.map_or(0, |vcpu| vcpu as *const Vcpu as usize),
        }
    }
}

impl fmt::Display for PanicRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "HYP panic:")?;
        writeln!(
            f,
            "PS:{:08x} PC:{:016x} ESR:{:08x}",
            self.spsr, self.elr, self.esr
        )?;
        writeln!(
            f,
            "FAR:{:016x} HPFAR:{:016x} PAR:{:016x}",
            self.far, self.hpfar, self.par
        )?;
        write!(f, "VCPU:{:016x}", self.vcpu)
    }
}

/// Restore the host and halt
pub fn hyp_panic<M, H, K, P>(
    core: &mut PerCoreState,
    mut vcpu: Option<&mut Vcpu>,
    hooks: &mut K,
    halt: &mut P,
    hw: &mut H,
) -> !
where
    M: HostMode,
    H: SysRegOps,
    K: SwitchHooks,
    P: HaltFacility,
{
    let record = PanicRecord::capture(vcpu.as_deref(), hw);

    M::unwind_for_panic(core, vcpu.as_deref_mut(), hooks, hw);
    core.workaround.leave_guest(hw);

    log::error!("cpu{}: {}", core.cpu_id(), record);
    halt.halt(&record)
}

/// Handle an exception taken at EL2 itself
///
/// Instructions registered in the core's fixup table may fault; execution
/// continues at their fixup address. Anything else is fatal.
pub fn unexpected_el2_exception<H, K, P>(
    core: &mut PerCoreState,
    hooks: &mut K,
    halt: &mut P,
    hw: &mut H,
) where
    H: SysRegOps,
    K: SwitchHooks,
    P: HaltFacility,
{
    let elr = hw.read(SysReg::ElrEl2);

    if let Some(fixup) = core.fixups.lookup(elr) {
        log::warn!(
            "cpu{}: EL2 exception at {:#x} (esr={:#x}), resuming at {:#x}",
            core.cpu_id(),
            elr,
            hw.read(SysReg::EsrEl2),
            fixup
        );
        hw.write(SysReg::ElrEl2, fixup);
        return;
    }

    match core.caps.mode {
        HostModeKind::Vhe => hyp_panic::<Vhe, _, _, _>(core, None, hooks, halt, hw),
        HostModeKind::Nvhe => hyp_panic::<Nvhe, _, _, _>(core, None, hooks, halt, hw),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::panic::{catch_unwind, AssertUnwindSafe};
    use std::string::{String, ToString};

    use crate::arch::arm64::cpu::features::{Capabilities, Errata, VectorUnit, VgicTrapMode};
    use crate::arch::arm64::cpu::hw::ModelCpu;
    use crate::arch::arm64::cpu::regs::HcrEl2;
    use crate::arch::arm64::hooks::NoHooks;
    use crate::arch::arm64::percpu::CoreVectors;
    use crate::config::SwitchConfig;

    /// Halts by unwinding, keeping the report
    #[derive(Default)]
    struct UnwindingHalt {
        report: Option<String>,
    }

    impl HaltFacility for UnwindingHalt {
        fn halt(&mut self, record: &PanicRecord) -> ! {
            self.report = Some(record.to_string());
            panic!("halted");
        }
    }

    fn core(mode: HostModeKind, hw: &ModelCpu) -> PerCoreState {
        let caps = Capabilities {
            mode,
            vector: VectorUnit::FpSimd,
            errata: Errata::empty(),
            ras: false,
            ssbd: false,
            irq_prio_masking: false,
            vgic_trap: VgicTrapMode::None,
        };
        PerCoreState::new(0, caps, &SwitchConfig::default(), CoreVectors::new(0x1000, 0x2000), hw).unwrap()
    }

    #[test]
    fn test_record_format() {
        let record = PanicRecord {
            spsr: 0x3c9,
            elr: 0xffff_0000_0800_1234,
            esr: 0x9600_0045,
            far: 0x10,
            hpfar: 0,
            par: 0x801,
            vcpu: 0,
        };

        assert_eq!(
            record.to_string(),
            "HYP panic:\nPS:000003c9 PC:ffff000008001234 ESR:96000045\n\
             FAR:0000000000000010 HPFAR:0000000000000000 PAR:0000000000000801\n\
             VCPU:0000000000000000"
        );
    }

    #[test]
    fn test_fixup_resumes() {
        let mut hw = ModelCpu::new();
        let mut core = core(HostModeKind::Nvhe, &hw);
        core.fixups.register(0x4000, 0x4100).unwrap();
        hw.preset(SysReg::ElrEl2, 0x4000);

        let mut halt = UnwindingHalt::default();
        unexpected_el2_exception(&mut core, &mut NoHooks, &mut halt, &mut hw);
        assert_eq!(hw.read(SysReg::ElrEl2), 0x4100);
        assert!(halt.report.is_none());
    }

    #[test]
    fn test_unknown_el2_exception_panics() {
        let mut hw = ModelCpu::with_host_traps(HostModeKind::Vhe, 0x1000);
        let mut core = core(HostModeKind::Vhe, &hw);
        hw.preset(SysReg::ElrEl2, 0x5000);
        hw.preset(SysReg::HcrEl2, HcrEl2::GUEST_FLAGS.bits());

        let mut halt = UnwindingHalt::default();
        let result = catch_unwind(AssertUnwindSafe(|| {
            unexpected_el2_exception(&mut core, &mut NoHooks, &mut halt, &mut hw)
        }));

        assert!(result.is_err());
        let report = halt.report.unwrap();
        assert!(report.starts_with("HYP panic:\nPS:"));
        assert!(report.contains("PC:0000000000005000"));
        // Host regime back in place
        assert_eq!(hw.read(SysReg::HcrEl2), HcrEl2::HOST_VHE_FLAGS.bits());
        assert_eq!(hw.read(SysReg::VbarEl2), 0x1000);
    }
}
