//! System registers touched by the world switch
//!
//! [`SysReg`] names every register the switch reads or writes through the
//! hardware seam. The name is architectural: on a VHE host the backend maps
//! the guest's EL1 registers to their `_EL12` aliases.
//! Reference: ARM DDI 0487I.a, D13.2

/// Saved system register state and the save/restore groups
pub mod state;

pub use state::SysRegs;

/// System register identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(usize)]
pub enum SysReg {
    // EL2 control and syndrome
    HcrEl2,
    CptrEl2,
    HstrEl2,
    MdcrEl2,
    VttbrEl2,
    VtcrEl2,
    VsesrEl2,
    VdisrEl2,
    EsrEl2,
    FarEl2,
    HpfarEl2,
    ElrEl2,
    SpsrEl2,
    VbarEl2,
    VmpidrEl2,
    ZcrEl2,
    Fpexc32El2,
    Dacr32El2,
    Ifsr32El2,
    Dbgvcr32El2,

    // EL1 registers with an _EL12 alias under VHE
    SctlrEl1,
    CpacrEl1,
    ZcrEl1,
    Ttbr0El1,
    Ttbr1El1,
    TcrEl1,
    EsrEl1,
    FarEl1,
    Afsr0El1,
    Afsr1El1,
    MairEl1,
    AmairEl1,
    VbarEl1,
    ContextidrEl1,
    CntkctlEl1,
    ElrEl1,
    SpsrEl1,

    // EL1 registers without an alias
    ActlrEl1,
    CsselrEl1,
    TpidrEl1,
    ParEl1,
    MdscrEl1,
    SpEl1,
    IccPmrEl1,

    // EL0
    SpEl0,
    TpidrEl0,
    TpidrroEl0,
    PmselrEl0,
    PmuserenrEl0,
    PmcntensetEl0,
    PmcntenclrEl0,

    // AArch32 banked SPSRs
    SpsrAbt,
    SpsrUnd,
    SpsrIrq,
    SpsrFiq,
}

impl SysReg {
    /// Number of registers
    pub const COUNT: usize = SysReg::SpsrFiq as usize + 1;

    /// Index into a register file
    pub const fn index(self) -> usize {
        self as usize
    }

    /// The EL1 registers whose writes TX2 erratum 219 redirects
    pub const TVM_REGS: [SysReg; 11] = [
        SysReg::SctlrEl1,
        SysReg::Ttbr0El1,
        SysReg::Ttbr1El1,
        SysReg::TcrEl1,
        SysReg::EsrEl1,
        SysReg::FarEl1,
        SysReg::Afsr0El1,
        SysReg::Afsr1El1,
        SysReg::MairEl1,
        SysReg::AmairEl1,
        SysReg::ContextidrEl1,
    ];

    /// MSR/MRS encoding of an EL1 virtual memory control register
    pub fn el1_encoding(self) -> Option<SysRegEncoding> {
        let enc = match self {
            SysReg::SctlrEl1 => SysRegEncoding::new(3, 0, 1, 0, 0),
            SysReg::Ttbr0El1 => SysRegEncoding::new(3, 0, 2, 0, 0),
            SysReg::Ttbr1El1 => SysRegEncoding::new(3, 0, 2, 0, 1),
            SysReg::TcrEl1 => SysRegEncoding::new(3, 0, 2, 0, 2),
            SysReg::Afsr0El1 => SysRegEncoding::new(3, 0, 5, 1, 0),
            SysReg::Afsr1El1 => SysRegEncoding::new(3, 0, 5, 1, 1),
            SysReg::EsrEl1 => SysRegEncoding::new(3, 0, 5, 2, 0),
            SysReg::FarEl1 => SysRegEncoding::new(3, 0, 6, 0, 0),
            SysReg::MairEl1 => SysRegEncoding::new(3, 0, 10, 2, 0),
            SysReg::AmairEl1 => SysRegEncoding::new(3, 0, 10, 3, 0),
            SysReg::ContextidrEl1 => SysRegEncoding::new(3, 0, 13, 0, 1),
            _ => return None,
        };
        Some(enc)
    }
}

/// System register encoding
///
/// Represents the encoding used for MRS/MSR instructions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SysRegEncoding {
    pub op0: u8,
    pub op1: u8,
    pub crn: u8,
    pub crm: u8,
    pub op2: u8,
}

impl SysRegEncoding {
    /// Create new system register encoding
    pub const fn new(op0: u8, op1: u8, crn: u8, crm: u8, op2: u8) -> Self {
        Self { op0, op1, crn, crm, op2 }
    }

    /// Decode the register from the ISS of an EC=0x18 (SYS64) syndrome
    ///
    /// ISS: Op0 [21:20], Op2 [19:17], Op1 [16:14], CRn [13:10], Rt [9:5],
    /// CRm [4:1], Direction [0].
    pub fn from_sys64_iss(iss: u64) -> Self {
        Self {
            op0: ((iss >> 20) & 0x3) as u8,
            op2: ((iss >> 17) & 0x7) as u8,
            op1: ((iss >> 14) & 0x7) as u8,
            crn: ((iss >> 10) & 0xf) as u8,
            crm: ((iss >> 1) & 0xf) as u8,
        }
    }

    /// Encode back into SYS64 ISS position (Rt and direction zero)
    pub fn to_sys64_iss(&self) -> u64 {
        ((self.op0 as u64 & 0x3) << 20)
            | ((self.op2 as u64 & 0x7) << 17)
            | ((self.op1 as u64 & 0x7) << 14)
            | ((self.crn as u64 & 0xf) << 10)
            | ((self.crm as u64 & 0xf) << 1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sysreg_count() {
        assert_eq!(SysReg::COUNT, SysReg::SpsrFiq.index() + 1);
        assert_eq!(SysReg::HcrEl2.index(), 0);
    }

    #[test]
    fn test_tvm_regs_have_encodings() {
        for reg in SysReg::TVM_REGS {
            let enc = reg.el1_encoding().unwrap();
            assert_eq!(SysRegEncoding::from_sys64_iss(enc.to_sys64_iss() | 0x3e1), enc);
        }
        assert_eq!(SysReg::HcrEl2.el1_encoding(), None);
    }
}
