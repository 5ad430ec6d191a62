//! Stage-2 translation regime of a VM
//!
//! Only the registers the world switch programs are modelled here: the
//! table base plus VMID in VTTBR_EL2 and the regime controls in VTCR_EL2.
//! Building the tables themselves is the host's business.
//!
//! Reference: ARM DDI 0487I.a, D13.2.151 VTCR_EL2, D13.2.152 VTTBR_EL2

use crate::arch::arm64::cpu::features::{Capabilities, Errata};
use crate::arch::arm64::cpu::hw::SysRegOps;
use crate::arch::arm64::cpu::regs::vttbr;
use crate::arch::arm64::cpu::sysreg::SysReg;
use crate::{Error, Result};

/// VTCR_EL2 fields checked before a regime is loaded
pub mod vtcr {
    /// Size offset of the IPA space
    pub const T0SZ_MASK: u64 = 0x3f;
    /// Smallest T0SZ (48-bit IPA)
    pub const T0SZ_MIN: u64 = 16;
    /// Largest T0SZ usable with a 4KB granule
    pub const T0SZ_MAX: u64 = 39;
    /// Starting level
    pub const SL0_SHIFT: u64 = 6;
    pub const SL0_MASK: u64 = 0x3 << SL0_SHIFT;
    /// Granule size; 0 selects 4KB
    pub const TG0_MASK: u64 = 0x3 << 14;
    /// Offset bits of a 4KB page
    pub const PAGE_SHIFT: u64 = 12;
    /// Address bits resolved per lookup level with a 4KB granule
    pub const BITS_PER_LEVEL: u64 = 9;
    /// Up to 16 concatenated tables at the starting level
    pub const MAX_CONCAT_BITS: u64 = 4;
}

/// VMID 0 belongs to the host
pub const HOST_VMID: u16 = 0;

/// Stage-2 configuration of one VM
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Stage2Config {
    /// Virtual machine identifier
    pub vmid: u16,
    /// Physical address of the level-0/1 table
    pub baddr: u64,
    /// VTCR_EL2 value
    pub vtcr: u64,
    /// Common-not-private translations
    pub cnp: bool,
}

impl Stage2Config {
    /// Create a configuration
    pub const fn new(vmid: u16, baddr: u64, vtcr: u64) -> Self {
        Self {
            vmid,
            baddr,
            vtcr,
            cnp: false,
        }
    }

    /// VTTBR_EL2 value
    pub fn vttbr(&self) -> u64 {
        let mut value = (self.baddr & vttbr::BADDR_MASK)
            | ((self.vmid as u64 & vttbr::VMID_MASK) << vttbr::VMID_SHIFT);
        if self.cnp {
            value |= vttbr::CNP;
        }
        value
    }

    /// log2 of the alignment VTTBR_EL2.BADDR needs
    ///
    /// The starting level may concatenate up to 16 tables, so the first
    /// table can be larger than a page. `None` when T0SZ and SL0 do not
    /// describe a usable 4KB-granule walk.
    pub fn table_align_bits(&self) -> Option<u64> {
        let t0sz = self.vtcr & vtcr::T0SZ_MASK;
        if !(vtcr::T0SZ_MIN..=vtcr::T0SZ_MAX).contains(&t0sz) {
            return None;
        }

        // SL0 = 3 is reserved for the 4KB granule
        if self.vtcr & vtcr::TG0_MASK != 0 || self.vtcr & vtcr::SL0_MASK == vtcr::SL0_MASK {
            return None;
        }

        // SL0 0, 1, 2 start at level 2, 1, 0
        let levels = ((self.vtcr & vtcr::SL0_MASK) >> vtcr::SL0_SHIFT) + 2;
        let below_start = vtcr::PAGE_SHIFT + (levels - 1) * vtcr::BITS_PER_LEVEL;
        let start_bits = (64 - t0sz).checked_sub(below_start)?;
        if !(1..=vtcr::BITS_PER_LEVEL + vtcr::MAX_CONCAT_BITS).contains(&start_bits) {
            return None;
        }

        Some((start_bits + 3).max(vtcr::PAGE_SHIFT))
    }

    /// Check the regime can be loaded
    pub fn validate(&self) -> Result<()> {
        if self.vmid == HOST_VMID {
            return Err(Error::InvalidStage2);
        }

        let align = self.table_align_bits().ok_or(Error::InvalidStage2)?;

        if self.baddr == 0
            || self.baddr & ((1 << align) - 1) != 0
            || self.baddr & !vttbr::BADDR_MASK != 0
        {
            return Err(Error::InvalidStage2);
        }

        Ok(())
    }
}

/// Load the guest's stage-2 regime
///
/// With erratum 1165522 the writes must complete before the trap
/// configuration clears HCR_EL2.TGE.
pub fn activate_vm<H: SysRegOps>(
    config: &Stage2Config,
    caps: &Capabilities,
    hw: &mut H,
) -> Result<()> {
    config.validate().map_err(|err| {
        log::error!("VM {}: unusable stage-2 regime {:x?}", config.vmid, config);
        err
    })?;

    hw.write(SysReg::VtcrEl2, config.vtcr);
    hw.write(SysReg::VttbrEl2, config.vttbr());

    if caps.has_erratum(Errata::ARM_1165522) {
        hw.isb();
    }

    Ok(())
}

/// Drop the guest's stage-2 regime
pub fn deactivate_vm<H: SysRegOps>(hw: &mut H) {
    hw.write(SysReg::VttbrEl2, 0);
}

/// A guest regime is still loaded
pub fn guest_regime_active<H: SysRegOps>(hw: &H) -> bool {
    hw.read(SysReg::VttbrEl2) != 0
}
