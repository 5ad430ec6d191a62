//! CPU feature and erratum detection for ARM64
//!
//! Builds the [`Capabilities`] descriptor once at core bring-up. The run loop
//! and the exit dispatcher only look at this descriptor, never at the ID
//! registers themselves.

use bitflags::bitflags;

use crate::config::SwitchConfig;
use crate::{Error, Result};

/// ARM CPU implementer/manufacturer IDs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum CpuImplementer {
    /// ARM Limited
    Arm = 0x41,
    /// Broadcom Corporation
    Broadcom = 0x42,
    /// Cavium Inc.
    Cavium = 0x43,
    /// Unknown implementer
    Unknown = 0x00,
}

impl CpuImplementer {
    /// Create from implementer byte in MIDR_EL1
    pub fn from_midr(midr: u64) -> Self {
        match (midr >> 24) & 0xff {
            0x41 => CpuImplementer::Arm,
            0x42 => CpuImplementer::Broadcom,
            0x43 => CpuImplementer::Cavium,
            _ => CpuImplementer::Unknown,
        }
    }
}

/// CPU models with an erratum the world switch has to care about
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CpuPart {
    /// Cortex-A57
    CortexA57,
    /// Cortex-A72
    CortexA72,
    /// Cortex-A76
    CortexA76,
    /// Cavium ThunderX2
    ThunderX2,
    /// Broadcom Vulcan
    Vulcan,
    /// Anything else
    Other,
}

impl CpuPart {
    /// Create from implementer and part number in MIDR_EL1
    pub fn from_midr(midr: u64) -> Self {
        let part = (midr >> 4) & 0xfff;
        match (CpuImplementer::from_midr(midr), part) {
            (CpuImplementer::Arm, 0xd07) => CpuPart::CortexA57,
            (CpuImplementer::Arm, 0xd08) => CpuPart::CortexA72,
            (CpuImplementer::Arm, 0xd0b) => CpuPart::CortexA76,
            (CpuImplementer::Cavium, 0x0af) => CpuPart::ThunderX2,
            (CpuImplementer::Broadcom, 0x516) => CpuPart::Vulcan,
            _ => CpuPart::Other,
        }
    }
}

/// Variant/revision pair packed as `rVpR` (variant in the high nibble)
fn midr_rev(midr: u64) -> u64 {
    (((midr >> 20) & 0xf) << 4) | (midr & 0xf)
}

bitflags! {
    /// CPU errata with a world-switch workaround
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct Errata: u32 {
        /// Cortex-A57 834220: HPFAR_EL2 may be wrong on stage-2 faults
        const ARM_834220 = 1 << 0;
        /// Cortex-A76 1165522: speculative AT with a half-switched regime
        const ARM_1165522 = 1 << 1;
        /// ThunderX2 219: TVM traps must be taken and redirected
        const CAVIUM_TX2_219_TVM = 1 << 2;
    }
}

/// Host kernel privilege mode
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HostModeKind {
    /// Host kernel at EL2, HCR_EL2.E2H set
    Vhe,
    /// Host kernel at EL1, hyp layer at EL2
    Nvhe,
}

/// Vector register unit available to guests
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VectorUnit {
    /// No FP/SIMD implemented
    None,
    /// FP and Advanced SIMD only
    FpSimd,
    /// FP/SIMD plus the Scalable Vector Extension
    Sve,
}

/// Which virtual GIC CPU-interface accesses are trapped to EL2
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VgicTrapMode {
    /// No CPU-interface trapping
    None,
    /// GICv2 CPU interface emulated through stage-2 data aborts
    V2CpuIf,
    /// GICv3 ICC_* system register traps
    V3CpuIf,
}

/// Raw ID register values used for detection
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CpuIdRegs {
    /// MIDR_EL1
    pub midr: u64,
    /// ID_AA64PFR0_EL1
    pub pfr0: u64,
    /// ID_AA64MMFR1_EL1
    pub mmfr1: u64,
}

impl CpuIdRegs {
    fn field(reg: u64, shift: u32) -> u64 {
        (reg >> shift) & 0xf
    }

    /// FP implemented (ID_AA64PFR0_EL1.FP != 0xf)
    pub fn has_fp(&self) -> bool {
        Self::field(self.pfr0, 16) != 0xf
    }

    /// Advanced SIMD implemented
    pub fn has_asimd(&self) -> bool {
        Self::field(self.pfr0, 20) != 0xf
    }

    /// RAS extension implemented
    pub fn has_ras(&self) -> bool {
        Self::field(self.pfr0, 28) != 0
    }

    /// SVE implemented
    pub fn has_sve(&self) -> bool {
        Self::field(self.pfr0, 32) != 0
    }

    /// EL2 implemented
    pub fn has_el2(&self) -> bool {
        Self::field(self.pfr0, 8) != 0
    }

    /// Virtualization Host Extensions (ID_AA64MMFR1_EL1.VH)
    pub fn has_vhe(&self) -> bool {
        Self::field(self.mmfr1, 8) != 0
    }
}

/// Per-core capability descriptor
///
/// Selected once at core bring-up; every conditional path of the switch
/// (host mode, vector unit, errata) reads it from here.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Capabilities {
    /// Host privilege mode
    pub mode: HostModeKind,
    /// Vector unit
    pub vector: VectorUnit,
    /// Errata that need a workaround
    pub errata: Errata,
    /// RAS extension (VSESR_EL2, DISR_EL1)
    pub ras: bool,
    /// Firmware provides the dynamic SSBD mitigation (ARCH_WORKAROUND_2)
    pub ssbd: bool,
    /// Host masks IRQs through the GIC priority mask
    pub irq_prio_masking: bool,
    /// GIC CPU-interface trapping
    pub vgic_trap: VgicTrapMode,
}

impl Capabilities {
    /// Derive the descriptor from the ID registers and the switch config
    pub fn detect(id: &CpuIdRegs, config: &SwitchConfig) -> Result<Self> {
        if !id.has_el2() {
            log::error!("EL2 not implemented (PFR0={:#x})", id.pfr0);
            return Err(Error::Unsupported);
        }

        let mode = match config.host_mode {
            Some(HostModeKind::Vhe) if !id.has_vhe() => return Err(Error::Unsupported),
            Some(mode) => mode,
            None if id.has_vhe() => HostModeKind::Vhe,
            None => HostModeKind::Nvhe,
        };

        let vector = if !id.has_fp() || !id.has_asimd() {
            VectorUnit::None
        } else if id.has_sve() {
            VectorUnit::Sve
        } else {
            VectorUnit::FpSimd
        };

        // SVE state is only switched with the CPACR layout of CPTR_EL2
        if vector == VectorUnit::Sve && mode != HostModeKind::Vhe {
            log::error!("SVE system without VHE (MMFR1={:#x})", id.mmfr1);
            return Err(Error::Unsupported);
        }

        let caps = Self {
            mode,
            vector,
            errata: detect_errata(id.midr),
            ras: id.has_ras(),
            ssbd: config.firmware_ssbd,
            irq_prio_masking: config.irq_prio_masking,
            vgic_trap: config.vgic_trap,
        };

        log::debug!(
            "capabilities: midr={:#x} mode={:?} vector={:?} errata={:?} ras={}",
            id.midr,
            caps.mode,
            caps.vector,
            caps.errata,
            caps.ras
        );

        Ok(caps)
    }

    /// Host runs at EL2
    pub fn is_vhe(&self) -> bool {
        self.mode == HostModeKind::Vhe
    }

    /// FP/SIMD implemented
    pub fn has_fpsimd(&self) -> bool {
        self.vector != VectorUnit::None
    }

    /// SVE implemented
    pub fn has_sve(&self) -> bool {
        self.vector == VectorUnit::Sve
    }

    /// Erratum workaround active
    pub fn has_erratum(&self, erratum: Errata) -> bool {
        self.errata.contains(erratum)
    }
}

/// Match MIDR_EL1 against the errata the switch works around
pub fn detect_errata(midr: u64) -> Errata {
    let rev = midr_rev(midr);
    let mut errata = Errata::empty();

    match CpuPart::from_midr(midr) {
        // r0p0 - r1p2
        CpuPart::CortexA57 if rev <= 0x12 => errata |= Errata::ARM_834220,
        // r0p0 - r2p0
        CpuPart::CortexA76 if rev <= 0x20 => errata |= Errata::ARM_1165522,
        CpuPart::ThunderX2 | CpuPart::Vulcan => errata |= Errata::CAVIUM_TX2_219_TVM,
        _ => {}
    }

    errata
}
