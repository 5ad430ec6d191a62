//! Trap configuration
//!
//! Computes and installs the EL2 trap setup for a guest run, and puts the
//! host's back afterwards. Computing is pure ([`GuestTraps::compute`],
//! [`HostTraps::compute`]); writing hands out an [`ArmedTraps`] token, and
//! only that token can undo it. A deactivate without a matching activate
//! does not type-check.
//!
//! Reference: ARM DDI 0487I.a - D13.2.48 HCR_EL2, D13.2.30 CPTR_EL2,
//! D13.2.77 MDCR_EL2

use crate::arch::arm64::cpu::features::{Capabilities, Errata, HostModeKind};
use crate::arch::arm64::cpu::hw::SysRegOps;
use crate::arch::arm64::cpu::regs::{
    mdcr_el2, CpacrEl1, CptrEl2, HcrEl2, FPEXC32_EN, HSTR_EL2_T15, PMU_USERENR_MASK,
};
use crate::arch::arm64::cpu::sysreg::SysReg;
use crate::arch::arm64::cpu::vcpu::Vcpu;

/// Debug and PMU traps shared by the non-VHE run and the VHE load
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommonTraps {
    pub hstr: u64,
    pub pmselr: u64,
    pub pmuserenr: u64,
    pub mdcr: u64,
}

impl CommonTraps {
    pub fn for_vcpu(vcpu: &Vcpu) -> Self {
        Self {
            // Trap CP15 c15 (IMPDEF) accesses of 32-bit guests
            hstr: HSTR_EL2_T15,
            // PMSELR_EL0 is not context switched; keep EL0 from seeing a
            // stale selection
            pmselr: 0,
            pmuserenr: PMU_USERENR_MASK,
            mdcr: vcpu.mdcr_el2,
        }
    }

    fn write<H: SysRegOps>(&self, hw: &mut H) {
        hw.write(SysReg::HstrEl2, self.hstr);
        hw.write(SysReg::PmselrEl0, self.pmselr);
        hw.write(SysReg::PmuserenrEl0, self.pmuserenr);
        hw.write(SysReg::MdcrEl2, self.mdcr);
    }
}

fn remove_common_traps<H: SysRegOps>(hw: &mut H) {
    hw.write(SysReg::HstrEl2, 0);
    hw.write(SysReg::PmuserenrEl0, 0);
}

/// Apply the common traps when a vCPU is loaded on a VHE core
pub fn activate_traps_vhe_load<H: SysRegOps>(vcpu: &Vcpu, hw: &mut H) {
    CommonTraps::for_vcpu(vcpu).write(hw);
}

/// Remove the common traps when a vCPU is put on a VHE core
pub fn deactivate_traps_vhe_put<H: SysRegOps>(hw: &mut H) {
    let keep = mdcr_el2::HPMN_MASK
        | (mdcr_el2::E2PB_MASK << mdcr_el2::E2PB_SHIFT)
        | mdcr_el2::TPMS;
    let mdcr = hw.read(SysReg::MdcrEl2) & keep;

    hw.write(SysReg::MdcrEl2, mdcr);
    remove_common_traps(hw);
}

/// Trap configuration of one guest run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GuestTraps {
    mode: HostModeKind,
    /// HCR_EL2
    pub hcr: HcrEl2,
    /// VSESR_EL2, written when a virtual SError is pending and RAS exists
    pub vsesr: Option<u64>,
    /// Debug and PMU traps (non-VHE; a VHE core has them from vCPU load)
    pub common: Option<CommonTraps>,
    /// CPTR_EL2, in the CPACR layout on a VHE core
    pub cptr: u64,
    /// FP accesses of a 32-bit guest must trap to EL2
    pub fpexc32_en: bool,
    /// VBAR_EL2 (VHE only)
    pub vectors: Option<u64>,
}

impl GuestTraps {
    /// Trap configuration for `vcpu`
    ///
    /// `guest_owns_fp` is the outcome of the lazy FP check; while the guest
    /// owns the unit its accesses are not trapped.
    pub fn compute(
        vcpu: &Vcpu,
        caps: &Capabilities,
        guest_owns_fp: bool,
        hyp_vectors: u64,
    ) -> Self {
        // RW stays under the vCPU's control; the rest of the guest flags
        // are forced
        let mut hcr = vcpu.hcr | (HcrEl2::GUEST_FLAGS - HcrEl2::RW);
        hcr.remove(HcrEl2::TGE | HcrEl2::VSE);
        hcr.set(HcrEl2::E2H, caps.is_vhe());

        if caps.has_erratum(Errata::CAVIUM_TX2_219_TVM) {
            hcr.insert(HcrEl2::TVM);
        }

        let mut vsesr = None;
        if let Some(pending) = vcpu.pending_serror() {
            hcr.insert(HcrEl2::VSE);
            if caps.ras {
                vsesr = Some(pending.vsesr);
            }
        }

        let fpexc32_en = !guest_owns_fp && vcpu.is_32bit() && caps.has_fpsimd();

        let (cptr, common, vectors) = match caps.mode {
            HostModeKind::Vhe => {
                let mut cpacr = CpacrEl1::DEFAULT | CpacrEl1::TTA;
                cpacr.remove(CpacrEl1::ZEN);
                if guest_owns_fp {
                    if vcpu.has_sve() {
                        cpacr.insert(CpacrEl1::ZEN);
                    }
                } else {
                    cpacr.remove(CpacrEl1::FPEN);
                }
                (cpacr.bits(), None, Some(hyp_vectors))
            }
            HostModeKind::Nvhe => {
                let mut cptr = CptrEl2::DEFAULT | CptrEl2::TTA | CptrEl2::TZ;
                if !guest_owns_fp {
                    cptr.insert(CptrEl2::TFP);
                }
                (cptr.bits(), Some(CommonTraps::for_vcpu(vcpu)), None)
            }
        };

        Self {
            mode: caps.mode,
            hcr,
            vsesr,
            common,
            cptr,
            fpexc32_en,
            vectors,
        }
    }

    /// Host mode this configuration was computed for
    pub fn mode(&self) -> HostModeKind {
        self.mode
    }

    /// Install the configuration
    pub fn apply<H: SysRegOps>(self, hw: &mut H) -> ArmedTraps {
        hw.write(SysReg::HcrEl2, self.hcr.bits());

        if let Some(vsesr) = self.vsesr {
            hw.write(SysReg::VsesrEl2, vsesr);
        }

        if let Some(common) = &self.common {
            common.write(hw);
        }

        if self.fpexc32_en {
            hw.write(SysReg::Fpexc32El2, FPEXC32_EN);
            hw.isb();
        }

        hw.write(SysReg::CptrEl2, self.cptr);

        if let Some(vectors) = self.vectors {
            hw.write(SysReg::VbarEl2, vectors);
        }

        log::trace!("guest traps armed: hcr={:#x} cptr={:#x}", self.hcr.bits(), self.cptr);

        ArmedTraps { guest: self }
    }
}

/// Host trap configuration of a core
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HostTraps {
    mode: HostModeKind,
    /// HCR_EL2
    pub hcr: HcrEl2,
    /// CPTR_EL2, in the CPACR layout on a VHE core
    pub cptr: u64,
    /// VBAR_EL2 (VHE only)
    pub vectors: Option<u64>,
    /// Synchronize after HCR_EL2 (erratum 1165522)
    pub sync_hcr: bool,
}

impl HostTraps {
    /// Host configuration of a core with `caps`
    pub fn compute(caps: &Capabilities, host_vectors: u64) -> Self {
        match caps.mode {
            HostModeKind::Vhe => Self {
                mode: HostModeKind::Vhe,
                hcr: HcrEl2::HOST_VHE_FLAGS,
                cptr: CpacrEl1::DEFAULT.bits(),
                vectors: Some(host_vectors),
                sync_hcr: caps.has_erratum(Errata::ARM_1165522),
            },
            HostModeKind::Nvhe => Self {
                mode: HostModeKind::Nvhe,
                hcr: HcrEl2::HOST_NVHE_FLAGS,
                cptr: CptrEl2::DEFAULT.bits(),
                vectors: None,
                sync_hcr: false,
            },
        }
    }

    fn write<H: SysRegOps>(&self, hw: &mut H) {
        match self.mode {
            HostModeKind::Vhe => {
                hw.write(SysReg::HcrEl2, self.hcr.bits());
                if self.sync_hcr {
                    // Stage-2 must not be live while TGE is being set
                    hw.isb();
                }
                hw.write(SysReg::CptrEl2, self.cptr);
            }
            HostModeKind::Nvhe => {
                let mut mdcr = hw.read(SysReg::MdcrEl2);
                remove_common_traps(hw);

                mdcr &= mdcr_el2::HPMN_MASK;
                mdcr |= mdcr_el2::E2PB_MASK << mdcr_el2::E2PB_SHIFT;
                hw.write(SysReg::MdcrEl2, mdcr);

                hw.write(SysReg::HcrEl2, self.hcr.bits());
                hw.write(SysReg::CptrEl2, self.cptr);
            }
        }

        if let Some(vectors) = self.vectors {
            hw.write(SysReg::VbarEl2, vectors);
        }
    }
}

/// Proof that the guest trap configuration is installed
#[must_use = "guest traps stay installed until disarmed"]
#[derive(Debug)]
pub struct ArmedTraps {
    guest: GuestTraps,
}

impl ArmedTraps {
    /// The configuration that was installed
    pub fn guest(&self) -> &GuestTraps {
        &self.guest
    }

    /// Put the host configuration back
    pub fn disarm<H: SysRegOps>(self, vcpu: &mut Vcpu, host: &HostTraps, hw: &mut H) -> HostTraps {
        deactivate(Some(vcpu), host, hw);
        *host
    }
}

/// Restore the host configuration without a token
///
/// Only for the fatal path, which may run with the guest configuration
/// half installed and without a vCPU at hand.
pub(crate) fn deactivate<H: SysRegOps>(vcpu: Option<&mut Vcpu>, host: &HostTraps, hw: &mut H) {
    // A virtual SError the guest has not taken yet stays pending
    if let Some(vcpu) = vcpu {
        if vcpu.pending_serror.is_some() && hw.read(SysReg::HcrEl2) & HcrEl2::VSE.bits() == 0 {
            log::debug!("vcpu{}: virtual SError taken", vcpu.id());
            vcpu.pending_serror = None;
        }
    }

    host.write(hw);
}
