//! Software model of the EL2 hardware
//!
//! `ModelCpu` keeps a register file, live FP/SVE banks and a scripted guest.
//! Each `guest_enter` consumes one [`GuestStep`], applies what the guest did
//! and reports its exit the way the exception vectors would. Every software
//! write is stamped with a sequence number so ordering can be checked.

use heapless::Deque;

use super::SysRegOps;
use crate::arch::arm64::cpu::features::HostModeKind;
use crate::arch::arm64::cpu::regs::{mdcr_el2, par, CpacrEl1, CptrEl2, HcrEl2};
use crate::arch::arm64::cpu::state::{FpSimdState, GpRegs, SveState, SVE_VL_MAX};
use crate::arch::arm64::cpu::sysreg::SysReg;
use crate::arch::arm64::ExitCode;
use crate::{Error, Result};

/// Maximum number of scripted guest steps
pub const MAX_STEPS: usize = 16;

/// What the guest does between one entry and the following exit
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GuestStep {
    /// Raw exit code reported by the vectors
    pub exit: u64,
    /// ESR_EL2 at exit (not updated for IRQ exits)
    pub esr: u64,
    /// FAR_EL2 at exit
    pub far: u64,
    /// HPFAR_EL2 at exit
    pub hpfar: u64,
    /// Bytes ELR_EL2 moves forward before the exit
    pub pc_advance: u64,
    /// FP/SIMD register the guest writes, as (index, value)
    pub fp_write: Option<(usize, u128)>,
    /// Guest takes the pending virtual SError (HCR_EL2.VSE clears)
    pub takes_serror: bool,
}

impl GuestStep {
    /// Physical interrupt while the guest runs
    pub const fn irq() -> Self {
        Self {
            exit: ExitCode::IRQ.raw(),
            esr: 0,
            far: 0,
            hpfar: 0,
            pc_advance: 0,
            fp_write: None,
            takes_serror: false,
        }
    }

    /// Synchronous trap with syndrome `esr`
    pub const fn trap(esr: u64) -> Self {
        Self {
            exit: ExitCode::TRAP.raw(),
            esr,
            ..Self::irq()
        }
    }

    /// Stage-2 abort with the given fault registers
    pub const fn abort(esr: u64, far: u64, hpfar: u64) -> Self {
        Self {
            exit: ExitCode::TRAP.raw(),
            esr,
            far,
            hpfar,
            ..Self::irq()
        }
    }

    /// Replace the raw exit code
    pub const fn with_exit(mut self, exit: u64) -> Self {
        self.exit = exit;
        self
    }

    /// Guest retires instructions before exiting
    pub const fn with_pc_advance(mut self, bytes: u64) -> Self {
        self.pc_advance = bytes;
        self
    }

    /// Guest writes V`index` before exiting
    pub const fn writing_fp(mut self, index: usize, value: u128) -> Self {
        self.fp_write = Some((index, value));
        self
    }

    /// Guest takes its pending virtual SError
    pub const fn taking_serror(mut self) -> Self {
        self.takes_serror = true;
        self
    }
}

/// Result of an `AT S1E1R` probe
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AtResponse {
    /// Translation succeeds to this physical address
    Translate(u64),
    /// Translation aborts
    Fault,
}

/// Call counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ModelStats {
    pub fp_saves: u32,
    pub fp_restores: u32,
    pub sve_saves: u32,
    pub sve_loads: u32,
    pub at_probes: u32,
    pub isbs: u32,
    pub dsbs: u32,
    pub ssbd_calls: u32,
    pub entries: u32,
}

/// Software CPU
pub struct ModelCpu {
    regs: [u64; SysReg::COUNT],
    write_seq: [u64; SysReg::COUNT],
    seq: u64,
    script: Deque<GuestStep, MAX_STEPS>,
    /// Live FP/SIMD bank
    pub fp: FpSimdState,
    /// Live SVE bank
    pub sve: SveState,
    /// Answer to the next `AT S1E1R`
    pub at_response: AtResponse,
    /// Whether the SSBD mitigation is active in firmware
    pub ssbd_enabled: bool,
    /// Counters
    pub stats: ModelStats,
}

impl Default for ModelCpu {
    fn default() -> Self {
        Self::new()
    }
}

impl ModelCpu {
    /// All registers zero, mitigation on
    pub fn new() -> Self {
        Self {
            regs: [0; SysReg::COUNT],
            write_seq: [0; SysReg::COUNT],
            seq: 0,
            script: Deque::new(),
            fp: FpSimdState::default(),
            sve: SveState::new(SVE_VL_MAX),
            at_response: AtResponse::Fault,
            ssbd_enabled: true,
            stats: ModelStats::default(),
        }
    }

    /// A core sitting in the host's trap configuration
    pub fn with_host_traps(mode: HostModeKind, host_vectors: u64) -> Self {
        let mut cpu = Self::new();
        match mode {
            HostModeKind::Vhe => {
                cpu.regs[SysReg::HcrEl2.index()] = HcrEl2::HOST_VHE_FLAGS.bits();
                cpu.regs[SysReg::CptrEl2.index()] = CpacrEl1::DEFAULT.bits();
                cpu.regs[SysReg::VbarEl2.index()] = host_vectors;
            }
            HostModeKind::Nvhe => {
                cpu.regs[SysReg::HcrEl2.index()] = HcrEl2::HOST_NVHE_FLAGS.bits();
                cpu.regs[SysReg::CptrEl2.index()] = CptrEl2::DEFAULT.bits();
                cpu.regs[SysReg::MdcrEl2.index()] =
                    6 | (mdcr_el2::E2PB_MASK << mdcr_el2::E2PB_SHIFT);
            }
        }
        cpu
    }

    /// Set a register as if by hardware, without stamping a write
    pub fn preset(&mut self, reg: SysReg, value: u64) {
        self.regs[reg.index()] = value;
    }

    /// Queue a guest step
    pub fn push_step(&mut self, step: GuestStep) -> Result<()> {
        self.script.push_back(step).map_err(|_| Error::ResourceBusy)
    }

    /// Steps not yet consumed
    pub fn pending_steps(&self) -> usize {
        self.script.len()
    }

    /// Sequence number of the last software write to `reg`, if any
    pub fn last_write(&self, reg: SysReg) -> Option<u64> {
        match self.write_seq[reg.index()] {
            0 => None,
            seq => Some(seq),
        }
    }

    /// Forget write history
    pub fn clear_write_log(&mut self) {
        self.write_seq = [0; SysReg::COUNT];
    }

    fn apply_step(&mut self, step: &GuestStep) {
        if let Some((index, value)) = step.fp_write {
            if let Some(reg) = self.fp.vregs.get_mut(index) {
                *reg = value;
            }
        }

        let elr = SysReg::ElrEl2.index();
        self.regs[elr] = self.regs[elr].wrapping_add(step.pc_advance);

        if step.takes_serror {
            self.regs[SysReg::HcrEl2.index()] &= !HcrEl2::VSE.bits();
        }

        if step.exit != ExitCode::IRQ.raw() {
            self.regs[SysReg::EsrEl2.index()] = step.esr;
            self.regs[SysReg::FarEl2.index()] = step.far;
            self.regs[SysReg::HpfarEl2.index()] = step.hpfar;
        }
    }
}

impl SysRegOps for ModelCpu {
    fn read(&self, reg: SysReg) -> u64 {
        self.regs[reg.index()]
    }

    fn write(&mut self, reg: SysReg, value: u64) {
        self.seq += 1;
        self.regs[reg.index()] = value;
        self.write_seq[reg.index()] = self.seq;
    }

    fn isb(&mut self) {
        self.stats.isbs += 1;
    }

    fn dsb(&mut self) {
        self.stats.dsbs += 1;
    }

    fn at_s1e1r(&mut self, _va: u64) {
        self.stats.at_probes += 1;
        let result = match self.at_response {
            AtResponse::Translate(pa) => pa & ((1 << par::PHYS_MASK_SHIFT) - 1) & !0xfff,
            // FST = translation fault, level 3
            AtResponse::Fault => par::F | (0x07 << 1),
        };
        self.regs[SysReg::ParEl1.index()] = result;
    }

    fn fpsimd_save(&mut self, state: &mut FpSimdState) {
        self.stats.fp_saves += 1;
        *state = self.fp;
    }

    fn fpsimd_restore(&mut self, state: &FpSimdState) {
        self.stats.fp_restores += 1;
        self.fp = *state;
    }

    fn sve_save(&mut self, state: &mut SveState) {
        self.stats.sve_saves += 1;
        state.regs.copy_from_slice(&self.sve.regs);
        state.fpsr = self.fp.fpsr;
        state.fpcr = self.fp.fpcr;
    }

    fn sve_load(&mut self, state: &SveState, vq_minus_one: u64) {
        self.stats.sve_loads += 1;
        self.sve.regs.copy_from_slice(&state.regs);
        self.sve.vl = ((vq_minus_one + 1) * 16) as usize;
        self.fp.fpsr = state.fpsr;
        self.fp.fpcr = state.fpcr;

        let zcr = SysReg::ZcrEl2.index();
        self.regs[zcr] = (self.regs[zcr] & !0xf) | (vq_minus_one & 0xf);
    }

    fn arch_workaround_2(&mut self, enable: bool) {
        self.stats.ssbd_calls += 1;
        self.ssbd_enabled = enable;
    }

    unsafe fn guest_enter(&mut self, _guest: &mut GpRegs, _host: &mut GpRegs) -> u64 {
        self.stats.entries += 1;
        let step = self.script.pop_front().unwrap_or_else(GuestStep::irq);
        self.apply_step(&step);
        step.exit
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_write_sequence() {
        let mut cpu = ModelCpu::new();
        cpu.write(SysReg::VttbrEl2, 1);
        cpu.write(SysReg::HcrEl2, 2);
        assert!(cpu.last_write(SysReg::VttbrEl2) < cpu.last_write(SysReg::HcrEl2));
        assert_eq!(cpu.last_write(SysReg::SctlrEl1), None);

        cpu.clear_write_log();
        assert_eq!(cpu.last_write(SysReg::HcrEl2), None);
        assert_eq!(cpu.read(SysReg::HcrEl2), 2);
    }

    #[test]
    fn test_scripted_trap() {
        let mut cpu = ModelCpu::new();
        cpu.preset(SysReg::ElrEl2, 0x1000);
        cpu.push_step(GuestStep::trap(0x5a00_0000).with_pc_advance(4)).unwrap();
        assert_eq!(cpu.pending_steps(), 1);

        let mut guest = GpRegs::default();
        let mut host = GpRegs::default();
        let exit = unsafe { cpu.guest_enter(&mut guest, &mut host) };

        assert_eq!(exit, ExitCode::TRAP.raw());
        assert_eq!(cpu.read(SysReg::EsrEl2), 0x5a00_0000);
        assert_eq!(cpu.read(SysReg::ElrEl2), 0x1004);
        assert_eq!(cpu.pending_steps(), 0);

        // Empty script: the guest gets interrupted
        let exit = unsafe { cpu.guest_enter(&mut guest, &mut host) };
        assert_eq!(exit, ExitCode::IRQ.raw());
        assert_eq!(cpu.read(SysReg::EsrEl2), 0x5a00_0000);
    }

    #[test]
    fn test_at_probe() {
        let mut cpu = ModelCpu::new();
        cpu.at_s1e1r(0x1234);
        assert_ne!(cpu.read(SysReg::ParEl1) & par::F, 0);

        cpu.at_response = AtResponse::Translate(0x8_1234_5678);
        cpu.at_s1e1r(0x1234);
        assert_eq!(cpu.read(SysReg::ParEl1), 0x8_1234_5000);
        assert_eq!(cpu.stats.at_probes, 2);
    }
}
