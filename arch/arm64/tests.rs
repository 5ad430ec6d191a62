//! ARM64 world-switch tests
//!
//! End-to-end runs of [`run_vcpu`] on a [`ModelCpu`] with scripted guests.
//! Unit tests of the individual pieces live next to them; the tests here
//! look at what a whole run leaves behind.
//!
//! Tests are grouped by functionality:
//! - `test_run_*` - run loop behaviour and ordering
//! - `test_fp_*` - FP/SIMD ownership across runs
//! - `test_fault_*` - guest abort handling
//! - `test_panic_*` - the fatal path

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::vec::Vec;

use test_case::test_case;

use super::cpu::features::{Capabilities, Errata, HostModeKind, VectorUnit, VgicTrapMode};
use super::cpu::fpu::FpOwner;
use super::cpu::hw::model::{AtResponse, GuestStep, ModelCpu};
use super::cpu::hw::SysRegOps;
use super::cpu::regs::{esr, gic_prio, par, HcrEl2};
use super::cpu::sysreg::SysReg;
use super::cpu::vcpu::Vcpu;
use super::hooks::{HaltFacility, NoHooks, SwitchHooks};
use super::mmu::stage2::Stage2Config;
use super::percpu::{CoreVectors, PerCoreState};
use super::switch::{run_vcpu, PanicRecord};
use super::{ExceptionClass, ExitCode};
use crate::config::SwitchConfig;

const HOST_VECTORS: u64 = 0xffff_8000_1001_0000;
const HYP_VECTORS: u64 = 0xffff_8000_1002_0000;
const GUEST_PC: u64 = 0x4008_0000;
const HOST_SCTLR: u64 = 0x30d0_0800;
const GUEST_SCTLR: u64 = 0x30d0_1805;

// T0SZ = 24 (40-bit IPA), SL0 = 1, 4KB granule
const VTCR_40BIT: u64 = 24 | (1 << 6);

/// Halts by unwinding, keeping the record
#[derive(Default)]
struct UnwindingHalt {
    record: Option<PanicRecord>,
}

impl HaltFacility for UnwindingHalt {
    fn halt(&mut self, record: &PanicRecord) -> ! {
        self.record = Some(*record);
        panic!("core halted");
    }
}

/// Notes every hook call with the trap and EL1 state visible at the time
#[derive(Default)]
struct RecordingHooks {
    calls: Vec<(&'static str, u64, u64)>,
}

impl RecordingHooks {
    fn note<H: SysRegOps>(&mut self, name: &'static str, hw: &H) {
        self.calls
            .push((name, hw.read(SysReg::HcrEl2), hw.read(SysReg::SctlrEl1)));
    }

    fn names(&self) -> Vec<&'static str> {
        self.calls.iter().map(|(name, _, _)| *name).collect()
    }

    fn at(&self, name: &str) -> (u64, u64) {
        self.calls
            .iter()
            .find(|(n, _, _)| *n == name)
            .map(|(_, hcr, sctlr)| (*hcr, *sctlr))
            .unwrap()
    }
}

impl SwitchHooks for RecordingHooks {
    fn vgic_restore<H: SysRegOps>(&mut self, _vcpu: &mut Vcpu, hw: &mut H) {
        self.note("vgic_restore", hw);
    }

    fn vgic_save<H: SysRegOps>(&mut self, _vcpu: &mut Vcpu, hw: &mut H) {
        self.note("vgic_save", hw);
    }

    fn timer_enable_traps<H: SysRegOps>(&mut self, _vcpu: &Vcpu, hw: &mut H) {
        self.note("timer_enable_traps", hw);
    }

    fn timer_disable_traps<H: SysRegOps>(&mut self, hw: &mut H) {
        self.note("timer_disable_traps", hw);
    }

    fn debug_switch_to_guest<H: SysRegOps>(&mut self, _vcpu: &mut Vcpu, hw: &mut H) {
        self.note("debug_to_guest", hw);
    }

    fn debug_switch_to_host<H: SysRegOps>(&mut self, _vcpu: &mut Vcpu, hw: &mut H) {
        self.note("debug_to_host", hw);
    }
}

fn caps(mode: HostModeKind) -> Capabilities {
    Capabilities {
        mode,
        vector: VectorUnit::FpSimd,
        errata: Errata::empty(),
        ras: false,
        ssbd: false,
        irq_prio_masking: false,
        vgic_trap: VgicTrapMode::None,
    }
}

fn stage2() -> Stage2Config {
    Stage2Config::new(1, 0x8_0000_0000, VTCR_40BIT)
}

/// A core in its host configuration with one loaded vCPU
fn setup(caps: Capabilities) -> (ModelCpu, PerCoreState, Vcpu) {
    let mut hw = ModelCpu::with_host_traps(caps.mode, HOST_VECTORS);
    hw.preset(SysReg::SctlrEl1, HOST_SCTLR);

    let mut core = PerCoreState::new(
        0,
        caps,
        &SwitchConfig::default(),
        CoreVectors::new(HOST_VECTORS, HYP_VECTORS),
        &hw,
    )
    .unwrap();

    let mut vcpu = Vcpu::new(0, &caps, false, stage2());
    vcpu.ctxt.gp.pc = GUEST_PC;
    vcpu.ctxt.gp.set(0, 0x1234);
    vcpu.ctxt.sys.sctlr_el1 = GUEST_SCTLR;
    vcpu.load(&mut core, &mut hw).unwrap();

    (hw, core, vcpu)
}

fn run(core: &mut PerCoreState, vcpu: &mut Vcpu, hw: &mut ModelCpu) -> ExitCode {
    run_vcpu(core, vcpu, &mut NoHooks, &mut UnwindingHalt::default(), hw)
}

const HOST_TRAP_REGS: [SysReg; 5] = [
    SysReg::HcrEl2,
    SysReg::CptrEl2,
    SysReg::MdcrEl2,
    SysReg::HstrEl2,
    SysReg::PmuserenrEl0,
];

// ============================================================================
// Run loop
// ============================================================================

#[test_case(HostModeKind::Vhe; "vhe")]
#[test_case(HostModeKind::Nvhe; "nvhe")]
fn test_run_trivial_exit_only_advances_pc(mode: HostModeKind) {
    let (mut hw, mut core, mut vcpu) = setup(caps(mode));
    let before = vcpu.ctxt.clone();
    let host_traps = HOST_TRAP_REGS.map(|reg| hw.read(reg));

    hw.push_step(GuestStep::trap(ExceptionClass::Hvc64.esr(0)).with_pc_advance(4))
        .unwrap();
    let exit = run(&mut core, &mut vcpu, &mut hw);

    assert_eq!(exit, ExitCode::TRAP);
    assert_eq!(hw.stats.entries, 1);

    let mut expected = before;
    expected.gp.pc = GUEST_PC + 4;
    assert_eq!(vcpu.ctxt, expected);

    assert_eq!(HOST_TRAP_REGS.map(|reg| hw.read(reg)), host_traps);
    assert_eq!(hw.read(SysReg::SctlrEl1) == HOST_SCTLR, mode == HostModeKind::Nvhe);
}

#[test]
fn test_run_nvhe_ordering() {
    let (mut hw, mut core, mut vcpu) = setup(caps(HostModeKind::Nvhe));
    let mut hooks = RecordingHooks::default();

    hw.push_step(GuestStep::trap(ExceptionClass::Hvc64.esr(0))).unwrap();
    let exit = run_vcpu(&mut core, &mut vcpu, &mut hooks, &mut UnwindingHalt::default(), &mut hw);
    assert_eq!(exit, ExitCode::TRAP);

    assert_eq!(
        hooks.names(),
        [
            "vgic_restore",
            "timer_enable_traps",
            "debug_to_guest",
            "timer_disable_traps",
            "vgic_save",
            "debug_to_host",
        ]
    );

    // Traps armed before the guest state goes in
    let (hcr, sctlr) = hooks.at("vgic_restore");
    assert!(HcrEl2::from_bits_retain(hcr).contains(HcrEl2::VM));
    assert_eq!(sctlr, HOST_SCTLR);

    let (_, sctlr) = hooks.at("debug_to_guest");
    assert_eq!(sctlr, GUEST_SCTLR);

    // Host traps and EL1 state back before the host debug state
    let (hcr, sctlr) = hooks.at("debug_to_host");
    assert_eq!(hcr, HcrEl2::HOST_NVHE_FLAGS.bits());
    assert_eq!(sctlr, HOST_SCTLR);

    assert!(hw.last_write(SysReg::VttbrEl2) < hw.last_write(SysReg::SctlrEl1));
    assert_eq!(hw.read(SysReg::VttbrEl2), 0);
}

#[test]
fn test_run_vhe_hooks() {
    let (mut hw, mut core, mut vcpu) = setup(caps(HostModeKind::Vhe));
    let mut hooks = RecordingHooks::default();

    let exit = run_vcpu(&mut core, &mut vcpu, &mut hooks, &mut UnwindingHalt::default(), &mut hw);
    assert_eq!(exit, ExitCode::IRQ);

    assert_eq!(hooks.names(), ["debug_to_guest", "debug_to_host"]);
    let (hcr, _) = hooks.at("debug_to_guest");
    assert!(HcrEl2::from_bits_retain(hcr).contains(HcrEl2::E2H | HcrEl2::VM));
    assert_eq!(hw.read(SysReg::VbarEl2), HOST_VECTORS);
}

#[test_case(ExceptionClass::Wfx; "wfx")]
#[test_case(ExceptionClass::Hvc64; "hvc")]
#[test_case(ExceptionClass::Smc64; "smc")]
#[test_case(ExceptionClass::Unknown; "unknown")]
fn test_run_unhandled_trap_returns_to_host(class: ExceptionClass) {
    let (mut hw, mut core, mut vcpu) = setup(caps(HostModeKind::Nvhe));
    hw.push_step(GuestStep::trap(class.esr(0))).unwrap();

    assert_eq!(run(&mut core, &mut vcpu, &mut hw), ExitCode::TRAP);
    assert_eq!(vcpu.fault().class(), class);
    assert_eq!(hw.stats.entries, 1);
}

#[test]
fn test_run_interrupt_touches_nothing() {
    let (mut hw, mut core, mut vcpu) = setup(caps(HostModeKind::Nvhe));
    // Stale syndrome from an earlier exit
    hw.preset(SysReg::EsrEl2, ExceptionClass::FpAsimd.esr(0));
    let gp = vcpu.ctxt.gp;

    hw.push_step(GuestStep::irq()).unwrap();
    assert_eq!(run(&mut core, &mut vcpu, &mut hw), ExitCode::IRQ);

    assert_eq!(vcpu.ctxt.gp, gp);
    assert_eq!(vcpu.fault().esr, 0);
    assert_eq!(vcpu.fp_owner(), FpOwner::HostOwns);
    assert_eq!(hw.stats.fp_saves, 0);
}

#[test]
fn test_run_requires_loaded_vcpu() {
    let (mut hw, mut core, mut vcpu) = setup(caps(HostModeKind::Nvhe));
    vcpu.put(&mut core, &mut hw).unwrap();

    let mut halt = UnwindingHalt::default();
    let result = catch_unwind(AssertUnwindSafe(|| {
        run_vcpu(&mut core, &mut vcpu, &mut NoHooks, &mut halt, &mut hw)
    }));

    assert!(result.is_err());
    assert!(halt.record.is_some());
    assert_eq!(hw.stats.entries, 0);
}

#[test]
fn test_run_ssbd_toggled_around_guest() {
    let mut caps = caps(HostModeKind::Vhe);
    caps.ssbd = true;
    let (mut hw, mut core, mut vcpu) = setup(caps);

    // Guest keeps the mitigation: firmware is left alone
    run(&mut core, &mut vcpu, &mut hw);
    assert_eq!(hw.stats.ssbd_calls, 0);

    vcpu.set_workaround_2(false);
    run(&mut core, &mut vcpu, &mut hw);
    assert_eq!(hw.stats.ssbd_calls, 2);
    assert!(hw.ssbd_enabled);
    assert!(core.workaround.mitigation_on());
}

/// Emulates GICv3 accesses, and re-enables the guest's SSBD mitigation
#[cfg(feature = "vgic-cpuif-emul")]
struct MitigationOnHooks;

#[cfg(feature = "vgic-cpuif-emul")]
impl SwitchHooks for MitigationOnHooks {
    fn vgic_v3_cpuif_access<H: SysRegOps>(
        &mut self,
        vcpu: &mut Vcpu,
        _record: &super::cpu::vcpu::TrapRecord,
        _hw: &mut H,
    ) -> super::hooks::CpuIfAccess {
        vcpu.set_workaround_2(true);
        super::hooks::CpuIfAccess::Handled
    }
}

#[cfg(feature = "vgic-cpuif-emul")]
#[test]
fn test_run_ssbd_back_on_after_flag_change_in_guest() {
    let mut caps = caps(HostModeKind::Vhe);
    caps.ssbd = true;
    caps.vgic_trap = VgicTrapMode::V3CpuIf;
    let (mut hw, mut core, mut vcpu) = setup(caps);
    vcpu.set_workaround_2(false);

    hw.push_step(GuestStep::trap(ExceptionClass::Sys64.esr(0))).unwrap();
    let exit = run_vcpu(
        &mut core,
        &mut vcpu,
        &mut MitigationOnHooks,
        &mut UnwindingHalt::default(),
        &mut hw,
    );

    assert_eq!(exit, ExitCode::IRQ);
    assert!(vcpu.workaround_2());
    assert_eq!(hw.stats.ssbd_calls, 2);
    assert!(hw.ssbd_enabled);
    assert!(core.workaround.mitigation_on());
}

#[test_case(false; "not taken")]
#[test_case(true; "taken")]
fn test_run_virtual_serror(taken: bool) {
    let (mut hw, mut core, mut vcpu) = setup(caps(HostModeKind::Nvhe));
    vcpu.inject_serror(0).unwrap();

    let step = GuestStep::trap(ExceptionClass::Hvc64.esr(0));
    hw.push_step(if taken { step.taking_serror() } else { step }).unwrap();
    run(&mut core, &mut vcpu, &mut hw);

    assert_eq!(vcpu.pending_serror().is_some(), !taken);
    assert_eq!(hw.read(SysReg::HcrEl2) & HcrEl2::VSE.bits(), 0);
}

#[test]
fn test_run_nvhe_pmu_and_priority_mask() {
    let mut caps = caps(HostModeKind::Nvhe);
    caps.irq_prio_masking = true;
    let (mut hw, mut core, mut vcpu) = setup(caps);
    core.pmu.events_host = 0b01;
    core.pmu.events_guest = 0b10;

    run(&mut core, &mut vcpu, &mut hw);

    // Guest-only counters stopped, host-only counters running again
    assert_eq!(hw.read(SysReg::PmcntenclrEl0), 0b10);
    assert_eq!(hw.read(SysReg::PmcntensetEl0), 0b01);

    assert_eq!(hw.read(SysReg::IccPmrEl1), gic_prio::IRQOFF);
    assert!(hw.stats.dsbs >= 1);
    assert!(hw.last_write(SysReg::SctlrEl1) < hw.last_write(SysReg::IccPmrEl1));
}

#[test]
fn test_run_vhe_leaves_pmu_alone() {
    let (mut hw, mut core, mut vcpu) = setup(caps(HostModeKind::Vhe));
    core.pmu.events_host = 0b01;
    core.pmu.events_guest = 0b10;

    run(&mut core, &mut vcpu, &mut hw);

    assert_eq!(hw.last_write(SysReg::PmcntenclrEl0), None);
    assert_eq!(hw.last_write(SysReg::PmcntensetEl0), None);
}

// ============================================================================
// FP/SIMD ownership
// ============================================================================

#[test_case(HostModeKind::Vhe; "vhe")]
#[test_case(HostModeKind::Nvhe; "nvhe")]
fn test_fp_first_access_resumes_guest(mode: HostModeKind) {
    let (mut hw, mut core, mut vcpu) = setup(caps(mode));
    assert_eq!(vcpu.fp_owner(), FpOwner::HostOwns);
    let host_traps = HOST_TRAP_REGS.map(|reg| hw.read(reg));

    hw.push_step(GuestStep::trap(ExceptionClass::FpAsimd.esr(0))).unwrap();
    let exit = run(&mut core, &mut vcpu, &mut hw);

    // Handled at EL2; the run only ended on the following interrupt
    assert_eq!(exit, ExitCode::IRQ);
    assert_eq!(hw.stats.entries, 2);
    assert_eq!(vcpu.fp_owner(), FpOwner::GuestOwns);
    assert_eq!(hw.stats.fp_saves, 1);
    assert_eq!(HOST_TRAP_REGS.map(|reg| hw.read(reg)), host_traps);
}

#[test_case(HostModeKind::Vhe; "vhe")]
#[test_case(HostModeKind::Nvhe; "nvhe")]
fn test_fp_round_trip(mode: HostModeKind) {
    let (mut hw, mut core, mut vcpu) = setup(caps(mode));
    hw.fp.vregs[0] = 0x1111;
    hw.fp.fpcr = 0x0300_0000;
    let host_fp = hw.fp;
    vcpu.ctxt.fp.vregs[0] = 0x2222;

    hw.push_step(GuestStep::trap(ExceptionClass::FpAsimd.esr(0))).unwrap();
    hw.push_step(
        GuestStep::trap(ExceptionClass::Hvc64.esr(0)).writing_fp(0, 0x3333),
    )
    .unwrap();
    run(&mut core, &mut vcpu, &mut hw);

    assert_eq!(hw.fp.vregs[0], 0x3333);
    assert_eq!((hw.stats.fp_saves, hw.stats.fp_restores), (1, 1));

    // Still the guest's on the next run: nothing moves
    run(&mut core, &mut vcpu, &mut hw);
    assert_eq!((hw.stats.fp_saves, hw.stats.fp_restores), (1, 1));

    vcpu.put(&mut core, &mut hw).unwrap();
    assert_eq!(vcpu.ctxt.fp.vregs[0], 0x3333);
    assert_eq!(hw.fp, host_fp);
    assert_eq!((hw.stats.fp_saves, hw.stats.fp_restores), (2, 2));
    assert_eq!(vcpu.fp_owner(), FpOwner::HostOwns);
}

#[test]
fn test_fp_untouched_guest_costs_nothing() {
    let (mut hw, mut core, mut vcpu) = setup(caps(HostModeKind::Nvhe));
    let host_fp = hw.fp;

    run(&mut core, &mut vcpu, &mut hw);
    vcpu.put(&mut core, &mut hw).unwrap();

    assert_eq!(hw.fp, host_fp);
    assert_eq!((hw.stats.fp_saves, hw.stats.fp_restores), (0, 0));
}

// ============================================================================
// Guest aborts
// ============================================================================

const FAULT_VA: u64 = 0x0000_7fff_1234_5678;
const STALE_HPFAR: u64 = 0xdead_0;

fn caps_834220() -> Capabilities {
    let mut caps = caps(HostModeKind::Nvhe);
    caps.errata = Errata::ARM_834220;
    caps
}

#[test_case(esr::FSC_PERM | 3; "permission fault")]
#[test_case(esr::FSC_FAULT | 3; "translation fault")]
fn test_fault_probe_success(fsc: u64) {
    let (mut hw, mut core, mut vcpu) = setup(caps_834220());
    hw.at_response = AtResponse::Translate(0x8_4321_0000);

    let abort = ExceptionClass::DabtLow.esr(fsc);
    hw.push_step(GuestStep::abort(abort, FAULT_VA, STALE_HPFAR)).unwrap();

    assert_eq!(run(&mut core, &mut vcpu, &mut hw), ExitCode::TRAP);
    assert_eq!(hw.stats.at_probes, 1);

    let fault = vcpu.fault();
    assert_eq!(fault.esr, abort);
    assert_eq!(fault.far, Some(FAULT_VA));
    assert_eq!(fault.hpfar, Some(par::to_hpfar(0x8_4321_0000)));
    assert_eq!(fault.ipa(), Some(0x8_4321_0678));
}

#[test]
fn test_fault_probe_failure_replays() {
    let (mut hw, mut core, mut vcpu) = setup(caps_834220());
    hw.at_response = AtResponse::Fault;
    hw.preset(SysReg::ParEl1, 0x77);

    let abort = ExceptionClass::DabtLow.esr(esr::FSC_PERM | 3);
    hw.push_step(GuestStep::abort(abort, FAULT_VA, STALE_HPFAR)).unwrap();
    hw.push_step(GuestStep::abort(abort, FAULT_VA, STALE_HPFAR)).unwrap();

    // Both aborts replayed; the interrupt after them goes to the host
    assert_eq!(run(&mut core, &mut vcpu, &mut hw), ExitCode::IRQ);
    assert_eq!(hw.stats.entries, 3);
    assert_eq!(hw.stats.at_probes, 2);
    assert_eq!(vcpu.replays(), 0);
    assert_eq!(vcpu.fault().hpfar, None);
}

#[test]
fn test_fault_stage1_walk_trusts_hpfar() {
    let (mut hw, mut core, mut vcpu) = setup(caps_834220());

    let abort = ExceptionClass::DabtLow.esr(esr::S1PTW | esr::FSC_PERM | 2);
    hw.push_step(GuestStep::abort(abort, FAULT_VA, STALE_HPFAR)).unwrap();

    assert_eq!(run(&mut core, &mut vcpu, &mut hw), ExitCode::TRAP);
    assert_eq!(hw.stats.at_probes, 0);
    assert_eq!(vcpu.fault().hpfar, Some(STALE_HPFAR));
}

// ============================================================================
// Fatal path
// ============================================================================

#[test_case(HostModeKind::Vhe; "vhe")]
#[test_case(HostModeKind::Nvhe; "nvhe")]
fn test_panic_bad_exit_code(mode: HostModeKind) {
    let (mut hw, mut core, mut vcpu) = setup(caps(mode));
    let host_traps = HOST_TRAP_REGS.map(|reg| hw.read(reg));

    let abort = ExceptionClass::DabtLow.esr(esr::FSC_FAULT | 3);
    hw.push_step(GuestStep::abort(abort, 0xdead_b000, STALE_HPFAR).with_exit(7))
        .unwrap();

    let mut halt = UnwindingHalt::default();
    let result = catch_unwind(AssertUnwindSafe(|| {
        run_vcpu(&mut core, &mut vcpu, &mut NoHooks, &mut halt, &mut hw)
    }));
    assert!(result.is_err());

    let record = halt.record.unwrap();
    assert_eq!(record.far, 0xdead_b000);
    assert_eq!(record.esr, abort);
    assert_eq!(record.hpfar, STALE_HPFAR);
    assert_ne!(record.vcpu, 0);

    // Host trap configuration is back
    assert_eq!(HOST_TRAP_REGS.map(|reg| hw.read(reg)), host_traps);
    if mode == HostModeKind::Nvhe {
        assert_eq!(hw.read(SysReg::VttbrEl2), 0);
        assert_eq!(hw.read(SysReg::SctlrEl1), HOST_SCTLR);
    } else {
        assert_eq!(hw.read(SysReg::VbarEl2), HOST_VECTORS);
    }
}

#[test]
fn test_panic_bad_stage2_before_entry() {
    let (mut hw, mut core, mut vcpu) = setup(caps(HostModeKind::Nvhe));
    vcpu.stage2 = Stage2Config::default();

    let mut halt = UnwindingHalt::default();
    let result = catch_unwind(AssertUnwindSafe(|| {
        run_vcpu(&mut core, &mut vcpu, &mut NoHooks, &mut halt, &mut hw)
    }));

    assert!(result.is_err());
    assert!(halt.record.is_some());
    assert_eq!(hw.stats.entries, 0);
    assert_eq!(hw.read(SysReg::HcrEl2), HcrEl2::HOST_NVHE_FLAGS.bits());
}

#[test_case(true; "guest regime loaded")]
#[test_case(false; "stage-2 rejected")]
fn test_panic_hands_back_ssbd_pmu_and_pmr(regime_loaded: bool) {
    let mut caps = caps(HostModeKind::Nvhe);
    caps.ssbd = true;
    caps.irq_prio_masking = true;
    let (mut hw, mut core, mut vcpu) = setup(caps);
    core.pmu.events_host = 0b01;
    core.pmu.events_guest = 0b10;
    vcpu.set_workaround_2(false);

    if regime_loaded {
        hw.push_step(GuestStep::trap(ExceptionClass::Hvc64.esr(0)).with_exit(7))
            .unwrap();
    } else {
        vcpu.stage2 = Stage2Config::default();
    }

    let mut halt = UnwindingHalt::default();
    let result = catch_unwind(AssertUnwindSafe(|| {
        run_vcpu(&mut core, &mut vcpu, &mut NoHooks, &mut halt, &mut hw)
    }));
    assert!(result.is_err());
    assert_eq!(hw.stats.entries, u32::from(regime_loaded));

    assert!(hw.ssbd_enabled);
    assert!(core.workaround.mitigation_on());
    assert_eq!(hw.read(SysReg::PmcntenclrEl0), 0b10);
    assert_eq!(hw.read(SysReg::PmcntensetEl0), 0b01);
    assert_eq!(hw.read(SysReg::IccPmrEl1), gic_prio::IRQOFF);
}
