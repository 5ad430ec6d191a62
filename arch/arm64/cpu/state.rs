//! CPU state management for ARM64
//!
//! Register file of one logical CPU (host or guest role): general purpose
//! registers, EL1 system registers and the FP/SIMD bank. The SVE bank is
//! kept separately because only SVE guests and SVE hosts carry it.

use super::regs::psr;
use super::sysreg::SysRegs;

/// General purpose register file
///
/// Shared with the guest entry assembly, which addresses it through
/// [`GpRegsOffsets`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(C)]
pub struct GpRegs {
    /// X0-X30
    pub x: [u64; 31],
    /// SP_EL0
    pub sp: u64,
    /// Program counter (ELR_EL2 at exit)
    pub pc: u64,
    /// PSTATE (SPSR_EL2 at exit)
    pub pstate: u64,
}

impl Default for GpRegs {
    fn default() -> Self {
        Self {
            x: [0; 31],
            sp: 0,
            pc: 0,
            pstate: psr::MODE_EL1H_DAIF,
        }
    }
}

impl GpRegs {
    /// Read Xn; register 31 reads as zero (XZR)
    pub fn get(&self, index: usize) -> u64 {
        self.x.get(index).copied().unwrap_or(0)
    }

    /// Write Xn; writes to register 31 are discarded
    pub fn set(&mut self, index: usize, value: u64) {
        if let Some(reg) = self.x.get_mut(index) {
            *reg = value;
        }
    }
}

/// Byte offsets into [`GpRegs`]
pub struct GpRegsOffsets;

impl GpRegsOffsets {
    pub const X0: usize = 0x00;
    pub const X19: usize = 19 * 8;
    pub const X30: usize = 30 * 8;
    pub const SP: usize = 31 * 8;
    pub const PC: usize = 32 * 8;
    pub const PSTATE: usize = 33 * 8;
}

/// FP/SIMD register bank (V0-V31, FPSR, FPCR)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(C, align(16))]
pub struct FpSimdState {
    /// V0-V31
    pub vregs: [u128; 32],
    /// FPSR
    pub fpsr: u32,
    /// FPCR
    pub fpcr: u32,
}

impl Default for FpSimdState {
    fn default() -> Self {
        Self {
            vregs: [0; 32],
            fpsr: 0,
            fpcr: 0,
        }
    }
}

/// Largest vector length supported, in bytes
pub const SVE_VL_MAX: usize = 256;

/// Bytes of SVE state for a vector length: 32 Z, 16 P and FFR
pub const fn sve_state_size(vl: usize) -> usize {
    32 * vl + 17 * (vl / 8)
}

/// SVE register bank
///
/// Laid out like the kernel's `sve_state`: Z0-Z31, P0-P15, then FFR. The save
/// and load primitives address it relative to FFR.
#[derive(Clone, PartialEq, Eq)]
#[repr(C, align(16))]
pub struct SveState {
    /// Raw register storage
    pub regs: [u8; sve_state_size(SVE_VL_MAX)],
    /// Vector length in bytes
    pub vl: usize,
    /// FPSR
    pub fpsr: u32,
    /// FPCR
    pub fpcr: u32,
}

impl core::fmt::Debug for SveState {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("SveState")
            .field("vl", &self.vl)
            .field("fpsr", &self.fpsr)
            .field("fpcr", &self.fpcr)
            .finish_non_exhaustive()
    }
}

impl SveState {
    /// Zeroed bank for vector length `vl` (bytes, multiple of 16)
    pub const fn new(vl: usize) -> Self {
        Self {
            regs: [0; sve_state_size(SVE_VL_MAX)],
            vl,
            fpsr: 0,
            fpcr: 0,
        }
    }

    /// Quadwords per vector
    pub fn vq(&self) -> usize {
        self.vl / 16
    }

    /// Offset of FFR within `regs`
    pub fn ffr_offset(&self) -> usize {
        34 * self.vl
    }

    /// Whether `vl` is a usable vector length
    pub fn valid_vl(vl: usize) -> bool {
        vl >= 16 && vl <= SVE_VL_MAX && vl % 16 == 0
    }
}

/// Logical CPU context
#[derive(Debug, Clone, Default, PartialEq, Eq)]
#[repr(C)]
pub struct CpuContext {
    /// General purpose registers
    pub gp: GpRegs,
    /// System registers
    pub sys: SysRegs,
    /// FP/SIMD bank
    pub fp: FpSimdState,
}

impl CpuContext {
    /// Create a context with reset values
    pub fn new() -> Self {
        Self::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gp_offsets_match_layout() {
        assert_eq!(core::mem::size_of::<GpRegs>(), GpRegsOffsets::PSTATE + 8);
        assert_eq!(core::mem::offset_of!(GpRegs, sp), GpRegsOffsets::SP);
        assert_eq!(core::mem::offset_of!(GpRegs, pc), GpRegsOffsets::PC);
    }

    #[test]
    fn test_xzr_reads_zero() {
        let mut gp = GpRegs::default();
        gp.set(31, 0x55);
        gp.set(3, 0x77);
        assert_eq!(gp.get(31), 0);
        assert_eq!(gp.get(3), 0x77);
    }

    #[test]
    fn test_sve_layout() {
        let sve = SveState::new(32);
        assert_eq!(sve.vq(), 2);
        assert_eq!(sve.ffr_offset(), 34 * 32);
        assert_eq!(sve_state_size(SVE_VL_MAX), 34 * 256 + 32);
        assert!(SveState::valid_vl(256));
        assert!(!SveState::valid_vl(24));
    }
}
