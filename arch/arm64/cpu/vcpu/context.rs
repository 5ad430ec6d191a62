//! VCPU context management for ARM64
//!
//! A [`Vcpu`] is the guest side of the context store: the guest's register
//! file, its trap intent (HCR_EL2 / MDCR_EL2), the lazy FP ownership state
//! and the per-vCPU bits of workaround and error state.
//!
//! On a VHE host the guest's EL1 state stays in the CPU for as long as the
//! vCPU is loaded; [`Vcpu::load`] and [`Vcpu::put`] move it in and out.

use bitflags::bitflags;

use crate::arch::arm64::cpu::features::Capabilities;
use crate::arch::arm64::cpu::fpu::{self, FpOwner};
use crate::arch::arm64::cpu::hw::SysRegOps;
use crate::arch::arm64::cpu::regs::{mdcr_el2, HcrEl2};
use crate::arch::arm64::cpu::state::{CpuContext, SveState};
use crate::arch::arm64::cpu::sysreg::state as sysreg;
use crate::arch::arm64::mmu::fault::FaultInfo;
use crate::arch::arm64::mmu::stage2::Stage2Config;
use crate::arch::arm64::percpu::PerCoreState;
use crate::arch::arm64::switch::traps;
use crate::{Error, Result};

/// AArch32 SVC mode with A, I and F masked
const AA32_SVC_RESET: u64 = 0x1d3;

bitflags! {
    /// Sticky per-vCPU flags
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct VcpuFlags: u32 {
        /// Guest has SVE
        const SVE = 1 << 0;
        /// Host task had live SVE state when the vCPU was loaded
        const HOST_SVE_IN_USE = 1 << 1;
        /// Guest debug registers must be switched
        const DEBUG_DIRTY = 1 << 2;
        /// The live FP registers belong to neither host task nor guest
        const HOST_FOREIGN_FPSTATE = 1 << 3;
        /// Host FP bank was parked in the per-core state by the trap handler
        const HOST_FP_SAVED = 1 << 4;
    }
}

/// Virtual SError owed to the guest
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PendingVirtualError {
    /// Syndrome the guest sees (VSESR_EL2, RAS only)
    pub vsesr: u64,
}

/// A virtual CPU
#[derive(Debug, Clone)]
pub struct Vcpu {
    id: u32,
    /// Guest register file
    pub ctxt: CpuContext,
    /// Guest SVE bank (used when [`VcpuFlags::SVE`] is set)
    pub sve: SveState,
    /// Requested HCR_EL2. Hypervisor-reserved bits are forced on entry
    pub hcr: HcrEl2,
    /// Requested MDCR_EL2
    pub mdcr_el2: u64,
    /// Sticky flags
    pub flags: VcpuFlags,
    /// Stage-2 regime of the VM
    pub stage2: Stage2Config,
    pub(crate) fp_owner: FpOwner,
    pub(crate) pending_serror: Option<PendingVirtualError>,
    workaround_2: bool,
    pub(crate) fault: FaultInfo,
    pub(crate) replays: u32,
    loaded: bool,
}

impl Vcpu {
    /// Create a vCPU in its reset state
    pub fn new(id: u32, caps: &Capabilities, aarch32: bool, stage2: Stage2Config) -> Self {
        let mut hcr = HcrEl2::GUEST_FLAGS;
        if caps.is_vhe() {
            hcr |= HcrEl2::E2H;
        }

        let mut ctxt = CpuContext::new();
        if aarch32 {
            hcr.remove(HcrEl2::RW);
            ctxt.gp.pstate = AA32_SVC_RESET;
        }

        Self {
            id,
            ctxt,
            sve: SveState::new(0),
            hcr,
            mdcr_el2: mdcr_el2::GUEST_DEFAULT,
            flags: VcpuFlags::empty(),
            stage2,
            fp_owner: FpOwner::Unowned,
            pending_serror: None,
            workaround_2: true,
            fault: FaultInfo::default(),
            replays: 0,
            loaded: false,
        }
    }

    /// vCPU index
    pub fn id(&self) -> u32 {
        self.id
    }

    /// EL1 runs in AArch32
    pub fn is_32bit(&self) -> bool {
        self.hcr.el1_is_32bit()
    }

    /// Guest has SVE
    pub fn has_sve(&self) -> bool {
        self.flags.contains(VcpuFlags::SVE)
    }

    /// Give the guest SVE with vector length `vl` bytes
    pub fn enable_sve(&mut self, caps: &Capabilities, vl: usize) -> Result<()> {
        if !caps.has_sve() || !caps.is_vhe() {
            return Err(Error::Unsupported);
        }
        if !SveState::valid_vl(vl) || self.is_32bit() {
            return Err(Error::InvalidArgument);
        }

        self.sve.vl = vl;
        self.flags.insert(VcpuFlags::SVE);
        Ok(())
    }

    /// Current owner of the live FP/SIMD registers
    pub fn fp_owner(&self) -> FpOwner {
        self.fp_owner
    }

    /// Fault information of the last exit to the host
    pub fn fault(&self) -> &FaultInfo {
        &self.fault
    }

    /// Consecutive fault-probe replays since the last exit to the host
    pub fn replays(&self) -> u32 {
        self.replays
    }

    /// Virtual SError not yet taken by the guest
    pub fn pending_serror(&self) -> Option<&PendingVirtualError> {
        self.pending_serror.as_ref()
    }

    /// Queue a virtual SError; only one may be outstanding
    pub fn inject_serror(&mut self, vsesr: u64) -> Result<()> {
        if self.pending_serror.is_some() {
            return Err(Error::SErrorPending);
        }

        log::debug!("vcpu{}: virtual SError pending (vsesr={:#x})", self.id, vsesr);
        self.pending_serror = Some(PendingVirtualError { vsesr });
        Ok(())
    }

    /// Whether the guest runs with the SSBD mitigation enabled
    pub fn workaround_2(&self) -> bool {
        self.workaround_2
    }

    /// Record the guest's ARCH_WORKAROUND_2 request
    pub fn set_workaround_2(&mut self, enabled: bool) {
        self.workaround_2 = enabled;
    }

    /// The vCPU is loaded on a core
    pub fn is_loaded(&self) -> bool {
        self.loaded
    }

    /// Schedule the vCPU onto `core`
    ///
    /// Picks up the host's PMU counter split, loads the guest's EL1 state on
    /// a VHE host and marks the live FP registers as the host's.
    pub fn load<H: SysRegOps>(&mut self, core: &mut PerCoreState, hw: &mut H) -> Result<()> {
        if self.loaded {
            return Err(Error::InvalidState);
        }

        self.mdcr_el2 = (self.mdcr_el2 & !mdcr_el2::HPMN_MASK) | (core.host_mdcr & mdcr_el2::HPMN_MASK);

        if core.caps.is_vhe() {
            sysreg::save_user(&mut core.host, hw);

            if self.is_32bit() {
                sysreg::restore_sysreg32(&self.ctxt, self.flags.contains(VcpuFlags::DEBUG_DIRTY), hw);
            }
            sysreg::restore_user(&self.ctxt, hw);
            sysreg::restore_el1(&self.ctxt, hw);

            traps::activate_traps_vhe_load(self, hw);
        }

        fpu::vcpu_load_fp(self, core.host_sve_in_use);
        self.loaded = true;

        log::debug!("vcpu{}: loaded on cpu{}", self.id, core.cpu_id());
        Ok(())
    }

    /// Deschedule the vCPU from `core`
    pub fn put<H: SysRegOps>(&mut self, core: &mut PerCoreState, hw: &mut H) -> Result<()> {
        if !self.loaded {
            return Err(Error::InvalidState);
        }

        fpu::vcpu_put_fp(self, core, hw);

        if core.caps.is_vhe() {
            traps::deactivate_traps_vhe_put(hw);

            sysreg::save_el1(&mut self.ctxt, hw);
            sysreg::save_user(&mut self.ctxt, hw);
            if self.is_32bit() {
                sysreg::save_sysreg32(&mut self.ctxt, self.flags.contains(VcpuFlags::DEBUG_DIRTY), hw);
            }

            sysreg::restore_user(&core.host, hw);
        }

        self.loaded = false;

        log::debug!("vcpu{}: put from cpu{}", self.id, core.cpu_id());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arch::arm64::cpu::features::{HostModeKind, VectorUnit, VgicTrapMode, Errata};
    use crate::arch::arm64::cpu::hw::ModelCpu;
    use crate::arch::arm64::cpu::regs::psr;
    use crate::arch::arm64::cpu::sysreg::SysReg;
    use crate::arch::arm64::percpu::CoreVectors;
    use crate::config::SwitchConfig;

    fn caps(mode: HostModeKind, vector: VectorUnit) -> Capabilities {
        Capabilities {
            mode,
            vector,
            errata: Errata::empty(),
            ras: false,
            ssbd: false,
            irq_prio_masking: false,
            vgic_trap: VgicTrapMode::None,
        }
    }

    #[test]
    fn test_new_vhe_guest() {
        let vcpu = Vcpu::new(0, &caps(HostModeKind::Vhe, VectorUnit::FpSimd), false, Stage2Config::default());
        assert!(vcpu.hcr.contains(HcrEl2::GUEST_FLAGS | HcrEl2::E2H));
        assert!(!vcpu.is_32bit());
        assert_eq!(vcpu.ctxt.gp.pstate, psr::MODE_EL1H_DAIF);
        assert_eq!(vcpu.fp_owner(), FpOwner::Unowned);
    }

    #[test]
    fn test_new_aarch32_guest() {
        let vcpu = Vcpu::new(1, &caps(HostModeKind::Nvhe, VectorUnit::FpSimd), true, Stage2Config::default());
        assert!(vcpu.is_32bit());
        assert!(!vcpu.hcr.contains(HcrEl2::E2H));
        assert_ne!(vcpu.ctxt.gp.pstate & psr::MODE32_BIT, 0);
    }

    #[test]
    fn test_single_pending_serror() {
        let mut vcpu = Vcpu::new(0, &caps(HostModeKind::Nvhe, VectorUnit::FpSimd), false, Stage2Config::default());
        vcpu.inject_serror(0x1).unwrap();
        assert_eq!(vcpu.inject_serror(0x2), Err(Error::SErrorPending));
        assert_eq!(vcpu.pending_serror().map(|e| e.vsesr), Some(0x1));
    }

    #[test]
    fn test_enable_sve() {
        let sve_caps = caps(HostModeKind::Vhe, VectorUnit::Sve);
        let mut vcpu = Vcpu::new(0, &sve_caps, false, Stage2Config::default());
        assert_eq!(vcpu.enable_sve(&sve_caps, 24), Err(Error::InvalidArgument));
        vcpu.enable_sve(&sve_caps, 64).unwrap();
        assert!(vcpu.has_sve());
        assert_eq!(vcpu.sve.vq(), 4);

        let fp_caps = caps(HostModeKind::Vhe, VectorUnit::FpSimd);
        let mut other = Vcpu::new(1, &fp_caps, false, Stage2Config::default());
        assert_eq!(other.enable_sve(&fp_caps, 64), Err(Error::Unsupported));
    }

    #[test]
    fn test_vhe_load_put_switches_el1_state() {
        let vhe = caps(HostModeKind::Vhe, VectorUnit::FpSimd);
        let mut hw = ModelCpu::with_host_traps(HostModeKind::Vhe, 0x1000);
        hw.preset(SysReg::TpidrEl0, 0x1111);
        let mut core = PerCoreState::new(0, vhe, &SwitchConfig::default(), CoreVectors::new(0x1000, 0x2000), &hw).unwrap();

        let mut vcpu = Vcpu::new(0, &vhe, false, Stage2Config::default());
        vcpu.ctxt.sys.sctlr_el1 = 0x30d0_0800;
        vcpu.ctxt.sys.tpidr_el0 = 0x2222;

        vcpu.load(&mut core, &mut hw).unwrap();
        assert_eq!(hw.read(SysReg::SctlrEl1), 0x30d0_0800);
        assert_eq!(hw.read(SysReg::TpidrEl0), 0x2222);
        assert_eq!(vcpu.fp_owner(), FpOwner::HostOwns);
        assert_eq!(vcpu.load(&mut core, &mut hw), Err(Error::InvalidState));

        hw.write(SysReg::SctlrEl1, 0x30d0_0801);
        vcpu.put(&mut core, &mut hw).unwrap();
        assert_eq!(vcpu.ctxt.sys.sctlr_el1, 0x30d0_0801);
        assert_eq!(hw.read(SysReg::TpidrEl0), 0x1111);
        assert_eq!(hw.read(SysReg::HstrEl2), 0);
    }

    #[test]
    fn test_nvhe_load_leaves_el1_alone() {
        let nvhe = caps(HostModeKind::Nvhe, VectorUnit::FpSimd);
        let mut hw = ModelCpu::with_host_traps(HostModeKind::Nvhe, 0);
        let mut core = PerCoreState::new(0, nvhe, &SwitchConfig::default(), CoreVectors::new(0, 0x2000), &hw).unwrap();
        let mut vcpu = Vcpu::new(0, &nvhe, false, Stage2Config::default());
        vcpu.ctxt.sys.sctlr_el1 = 0x30d0_0800;

        vcpu.load(&mut core, &mut hw).unwrap();
        assert_eq!(hw.last_write(SysReg::SctlrEl1), None);
        // HPMN comes from the host
        assert_eq!(vcpu.mdcr_el2 & mdcr_el2::HPMN_MASK, 6);
    }
}
