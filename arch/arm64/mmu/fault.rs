//! Stage-2 Fault Handling for ARM64
//!
//! Recovers the faulting addresses of a guest abort. FAR_EL2 always holds
//! the guest virtual address. HPFAR_EL2 (the IPA) is only trustworthy when
//! the fault happened on a stage-1 table walk, or when it was neither a
//! permission fault nor taken on a CPU with erratum 834220. Otherwise the
//! IPA is rebuilt with an `AT S1E1R` probe through the guest's own stage-1
//! tables.
//!
//! Reference: ARM DDI 0487I.a - D13.2.37 ESR_EL2, D13.2.56 HPFAR_EL2

use crate::arch::arm64::cpu::features::{Capabilities, Errata};
use crate::arch::arm64::cpu::hw::SysRegOps;
use crate::arch::arm64::cpu::regs::{esr, par};
use crate::arch::arm64::cpu::sysreg::SysReg;
use crate::arch::arm64::cpu::vcpu::TrapRecord;
use crate::arch::arm64::ExceptionClass;
use crate::{Error, Result};

/// HPFAR_EL2.FIPA, IPA[47:12] at bits [43:4]
pub const HPFAR_FIPA_MASK: u64 = 0x0000_0fff_ffff_fff0;

/// Fault status type, level stripped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaultKind {
    /// Translation fault (no mapping)
    Translation,
    /// Access flag fault
    AccessFlag,
    /// Permission fault
    Permission,
    /// Any other status; the raw FSC is kept
    Other(u8),
}

impl FaultKind {
    /// Decode from an abort ESR
    pub fn from_esr(esr: u64) -> Self {
        match esr & esr::FSC_TYPE {
            esr::FSC_FAULT => FaultKind::Translation,
            esr::FSC_ACCESS => FaultKind::AccessFlag,
            esr::FSC_PERM => FaultKind::Permission,
            _ => FaultKind::Other((esr & 0x3f) as u8),
        }
    }
}

/// Fault information of the last exit, as handed to the host
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FaultInfo {
    /// ESR_EL2
    pub esr: u64,
    /// Faulting guest virtual address
    pub far: Option<u64>,
    /// Faulting IPA in HPFAR_EL2 format
    pub hpfar: Option<u64>,
}

impl FaultInfo {
    /// Exception class
    pub fn class(&self) -> ExceptionClass {
        ExceptionClass::from_esr(self.esr)
    }

    /// Fault status type
    pub fn kind(&self) -> FaultKind {
        FaultKind::from_esr(self.esr)
    }

    /// Translation table level the fault was reported at
    pub fn level(&self) -> u8 {
        (self.esr & 0x3) as u8
    }

    /// Access was a write
    pub fn is_write(&self) -> bool {
        self.esr & esr::WNR != 0
    }

    /// Full faulting IPA, combining HPFAR's page with FAR's offset
    pub fn ipa(&self) -> Option<u64> {
        let hpfar = self.hpfar?;
        let offset = self.far.unwrap_or(0) & 0xfff;
        Some(((hpfar & HPFAR_FIPA_MASK) << 8) | offset)
    }
}

/// Resolve `far` to an HPFAR value through the guest's stage-1 tables
///
/// PAR_EL1 belongs to the guest at this point, so it is put back whatever
/// the outcome. PAR_EL1 is poisoned first: if the probe itself takes an
/// exception and gets skipped, the read-back still reports failure.
pub fn translate_far_to_hpfar<H: SysRegOps>(far: u64, hw: &mut H) -> Result<u64> {
    let saved = hw.read(SysReg::ParEl1);

    hw.write(SysReg::ParEl1, par::F);
    hw.at_s1e1r(far);
    let result = hw.read(SysReg::ParEl1);

    hw.write(SysReg::ParEl1, saved);

    if result & par::F != 0 {
        log::trace!("AT S1E1R {:#x} failed (par={:#x})", far, result);
        return Err(Error::TranslationProbeFailed);
    }

    Ok(par::to_hpfar(result))
}

/// Fill in FAR and HPFAR for a guest abort
///
/// Exits other than lower-EL data/instruction aborts are left alone. The
/// record is only updated once both addresses are known.
pub fn populate_fault_info<H: SysRegOps>(
    record: &mut TrapRecord,
    caps: &Capabilities,
    hw: &mut H,
) -> Result<()> {
    if !record.class.is_guest_abort() {
        return Ok(());
    }

    let far = hw.read(SysReg::FarEl2);

    let hpfar_untrusted = !record.is_s1ptw()
        && (caps.has_erratum(Errata::ARM_834220) || record.fault_type() == esr::FSC_PERM);

    let hpfar = if hpfar_untrusted {
        translate_far_to_hpfar(far, hw)?
    } else {
        hw.read(SysReg::HpfarEl2)
    };

    record.far = Some(far);
    record.hpfar = Some(hpfar);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arch::arm64::cpu::features::{HostModeKind, VectorUnit, VgicTrapMode};
    use crate::arch::arm64::cpu::hw::model::{AtResponse, ModelCpu};
    use crate::arch::arm64::ExitCode;
    use test_case::test_case;

    fn caps(errata: Errata) -> Capabilities {
        Capabilities {
            mode: HostModeKind::Nvhe,
            vector: VectorUnit::FpSimd,
            errata,
            ras: false,
            ssbd: false,
            irq_prio_masking: false,
            vgic_trap: VgicTrapMode::None,
        }
    }

    fn abort(iss: u64) -> TrapRecord {
        let mut record = TrapRecord::new(ExitCode::TRAP);
        record.set_esr(ExceptionClass::DabtLow.esr(iss));
        record
    }

    #[test_case(esr::FSC_FAULT | 1, FaultKind::Translation; "translation l1")]
    #[test_case(esr::FSC_ACCESS | 3, FaultKind::AccessFlag; "access flag l3")]
    #[test_case(esr::FSC_PERM | 2, FaultKind::Permission; "permission l2")]
    #[test_case(0x10, FaultKind::Other(0x10); "external abort")]
    fn test_fault_kind(iss: u64, expected: FaultKind) {
        assert_eq!(FaultKind::from_esr(iss), expected);
    }

    #[test]
    fn test_translation_fault_reads_hpfar() {
        let mut hw = ModelCpu::new();
        hw.preset(SysReg::FarEl2, 0x1234);
        hw.preset(SysReg::HpfarEl2, 0x80_0000);

        let mut record = abort(esr::FSC_FAULT | 3);
        populate_fault_info(&mut record, &caps(Errata::empty()), &mut hw).unwrap();

        assert_eq!(record.far, Some(0x1234));
        assert_eq!(record.hpfar, Some(0x80_0000));
        assert_eq!(hw.stats.at_probes, 0);
    }

    #[test]
    fn test_permission_fault_probes() {
        let mut hw = ModelCpu::new();
        hw.preset(SysReg::FarEl2, 0xffff_0000_0040_0123);
        hw.preset(SysReg::HpfarEl2, 0xdead_0000);
        hw.preset(SysReg::ParEl1, 0x55);
        hw.at_response = AtResponse::Translate(0x4_0040_0000);

        let mut record = abort(esr::FSC_PERM | esr::WNR | 3);
        populate_fault_info(&mut record, &caps(Errata::empty()), &mut hw).unwrap();

        assert!(record.fault_info().is_write());
        assert_eq!(record.hpfar, Some(par::to_hpfar(0x4_0040_0000)));
        assert_eq!(record.fault_info().ipa(), Some(0x4_0040_0123));
        assert_eq!(hw.read(SysReg::ParEl1), 0x55);
    }

    #[test]
    fn test_s1ptw_trusts_hpfar_even_with_erratum() {
        let mut hw = ModelCpu::new();
        hw.preset(SysReg::HpfarEl2, 0x40);

        let mut record = abort(esr::FSC_PERM | esr::S1PTW);
        populate_fault_info(&mut record, &caps(Errata::ARM_834220), &mut hw).unwrap();

        assert_eq!(record.hpfar, Some(0x40));
        assert_eq!(hw.stats.at_probes, 0);
    }

    #[test]
    fn test_probe_failure_leaves_record_untouched() {
        let mut hw = ModelCpu::new();
        hw.preset(SysReg::ParEl1, 0x77);
        hw.at_response = AtResponse::Fault;

        let mut record = abort(esr::FSC_FAULT);
        let result = populate_fault_info(&mut record, &caps(Errata::ARM_834220), &mut hw);

        assert_eq!(result, Err(Error::TranslationProbeFailed));
        assert_eq!(record.far, None);
        assert_eq!(record.hpfar, None);
        assert_eq!(hw.read(SysReg::ParEl1), 0x77);
    }

    #[test]
    fn test_non_abort_is_ignored() {
        let mut hw = ModelCpu::new();
        let mut record = TrapRecord::new(ExitCode::TRAP);
        record.set_esr(ExceptionClass::Hvc64.esr(0));

        populate_fault_info(&mut record, &caps(Errata::ARM_834220), &mut hw).unwrap();
        assert_eq!(record.far, None);
    }
}
