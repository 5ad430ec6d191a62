//! Register bit definitions for ARM64 EL2
//!
//! Named bit positions of the EL2 control registers that the world switch
//! composes. Values follow ARM DDI 0487 (D13.2).

use bitflags::bitflags;

bitflags! {
    /// HCR_EL2 - Hypervisor Configuration Register
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct HcrEl2: u64 {
        /// Stage-2 translation enable
        const VM = 1 << 0;
        /// Set/Way invalidation override
        const SWIO = 1 << 1;
        /// Protected table walk
        const PTW = 1 << 2;
        /// Route physical FIQ to EL2
        const FMO = 1 << 3;
        /// Route physical IRQ to EL2
        const IMO = 1 << 4;
        /// Route physical SError to EL2
        const AMO = 1 << 5;
        /// Virtual FIQ pending
        const VF = 1 << 6;
        /// Virtual IRQ pending
        const VI = 1 << 7;
        /// Virtual SError pending
        const VSE = 1 << 8;
        /// Force broadcast of TLB/cache maintenance
        const FB = 1 << 9;
        /// Barrier shareability upgrade: inner shareable
        const BSU_IS = 1 << 10;
        /// Default cacheability
        const DC = 1 << 12;
        /// Trap WFI
        const TWI = 1 << 13;
        /// Trap WFE
        const TWE = 1 << 14;
        /// Trap ID group 3
        const TID3 = 1 << 18;
        /// Trap SMC
        const TSC = 1 << 19;
        /// Trap implementation defined functionality
        const TIDCP = 1 << 20;
        /// Trap auxiliary control registers
        const TACR = 1 << 21;
        /// Trap data/unified cache maintenance by set/way
        const TSW = 1 << 22;
        /// Trap cache maintenance to point of coherency
        const TPC = 1 << 23;
        /// Trap cache maintenance to point of unification
        const TPU = 1 << 24;
        /// Trap TLB maintenance
        const TTLB = 1 << 25;
        /// Trap virtual memory controls (writes)
        const TVM = 1 << 26;
        /// Trap general exceptions
        const TGE = 1 << 27;
        /// Trap DC ZVA
        const TDZ = 1 << 28;
        /// Trap reads of virtual memory controls
        const TRVM = 1 << 30;
        /// EL1 is AArch64
        const RW = 1 << 31;
        /// EL2 host (VHE)
        const E2H = 1 << 34;
        /// Trap LOR registers
        const TLOR = 1 << 35;
        /// Do not trap pointer authentication key accesses
        const APK = 1 << 40;
        /// Do not trap pointer authentication instructions
        const API = 1 << 41;
    }
}

impl HcrEl2 {
    /// Bits that are always set while a guest runs, whatever the vCPU asked for
    pub const GUEST_FLAGS: Self = Self::from_bits_retain(
        Self::TSC.bits()
            | Self::TSW.bits()
            | Self::TWE.bits()
            | Self::TWI.bits()
            | Self::VM.bits()
            | Self::BSU_IS.bits()
            | Self::FB.bits()
            | Self::TACR.bits()
            | Self::AMO.bits()
            | Self::SWIO.bits()
            | Self::TIDCP.bits()
            | Self::RW.bits()
            | Self::TLOR.bits()
            | Self::FMO.bits()
            | Self::IMO.bits(),
    );

    /// Host configuration on a non-VHE core
    pub const HOST_NVHE_FLAGS: Self =
        Self::from_bits_retain(Self::RW.bits() | Self::API.bits() | Self::APK.bits());

    /// Host configuration on a VHE core
    pub const HOST_VHE_FLAGS: Self =
        Self::from_bits_retain(Self::RW.bits() | Self::TGE.bits() | Self::E2H.bits());

    /// Whether EL1 runs in AArch32
    pub fn el1_is_32bit(self) -> bool {
        !self.contains(Self::RW)
    }
}

bitflags! {
    /// CPTR_EL2 - Architectural Feature Trap Register (non-VHE layout)
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct CptrEl2: u64 {
        /// Trap SVE accesses
        const TZ = 1 << 8;
        /// Trap FP/SIMD accesses
        const TFP = 1 << 10;
        /// Trap trace register accesses
        const TTA = 1 << 20;
        /// Trap CPACR_EL1 accesses
        const TCPAC = 1 << 31;
    }
}

impl CptrEl2 {
    /// RES1 bits: [13:12], [9], [7:0]
    pub const RES1: u64 = 0x0000_32ff;

    /// Host value on a non-VHE core
    pub const DEFAULT: Self = Self::from_bits_retain(Self::RES1);
}

bitflags! {
    /// CPACR_EL1 layout. With E2H set, CPTR_EL2 takes this layout too.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct CpacrEl1: u64 {
        /// SVE enable at EL1
        const ZEN_EL1EN = 1 << 16;
        /// SVE enable at EL0
        const ZEN_EL0EN = 1 << 17;
        /// SVE enable (both)
        const ZEN = 0b11 << 16;
        /// FP/SIMD enable (both)
        const FPEN = 0b11 << 20;
        /// Trap trace register accesses
        const TTA = 1 << 28;
    }
}

impl CpacrEl1 {
    /// Host value on a VHE core
    pub const DEFAULT: Self =
        Self::from_bits_retain(Self::FPEN.bits() | Self::ZEN_EL1EN.bits());
}

/// MDCR_EL2 fields
pub mod mdcr_el2 {
    /// Number of event counters reserved for EL1/EL0
    pub const HPMN_MASK: u64 = 0x1f;
    /// Profiling buffer owning regime
    pub const E2PB_MASK: u64 = 0x3;
    pub const E2PB_SHIFT: u64 = 12;
    /// Trap PMCR_EL0 accesses
    pub const TPMCR: u64 = 1 << 5;
    /// Trap PMU accesses
    pub const TPM: u64 = 1 << 6;
    /// Trap OS-related debug register accesses
    pub const TDOSA: u64 = 1 << 10;
    /// Trap debug ROM address register accesses
    pub const TDRA: u64 = 1 << 11;
    /// Trap profiling controls
    pub const TPMS: u64 = 1 << 14;

    /// Traps every guest runs with; HPMN is filled in from the host on load
    pub const GUEST_DEFAULT: u64 = TPM | TPMS | TPMCR | TDRA | TDOSA;
}

/// HSTR_EL2: trap AArch32 CP15 c15 (implementation defined) accesses
pub const HSTR_EL2_T15: u64 = 1 << 15;

/// PMUSERENR_EL0: all EL0 PMU access enables
pub const PMU_USERENR_MASK: u64 = 0xf;

/// FPEXC32_EL2.EN
pub const FPEXC32_EN: u64 = 1 << 30;

/// ESR_ELx fields
pub mod esr {
    pub const EC_SHIFT: u64 = 26;
    pub const EC_MASK: u64 = 0x3f;
    /// Instruction length (32-bit when set)
    pub const IL: u64 = 1 << 25;
    pub const ISS_MASK: u64 = 0x01ff_ffff;

    /// Abort ISS: instruction syndrome valid
    pub const ISV: u64 = 1 << 24;
    /// Abort ISS: external abort
    pub const EA: u64 = 1 << 9;
    /// Abort ISS: fault on stage-1 page table walk
    pub const S1PTW: u64 = 1 << 7;
    /// Abort ISS: write not read
    pub const WNR: u64 = 1 << 6;
    /// Abort ISS: fault status code, type without level
    pub const FSC_TYPE: u64 = 0x3c;
    /// Translation fault
    pub const FSC_FAULT: u64 = 0x04;
    /// Access flag fault
    pub const FSC_ACCESS: u64 = 0x08;
    /// Permission fault
    pub const FSC_PERM: u64 = 0x0c;

    /// SYS64 ISS: direction (1 = read)
    pub const SYS64_ISS_DIR_READ: u64 = 1;
    pub const SYS64_RT_SHIFT: u64 = 5;
    pub const SYS64_RT_MASK: u64 = 0x1f;
}

/// PAR_EL1 fields
pub mod par {
    /// Translation aborted
    pub const F: u64 = 1 << 0;
    /// Physical address width used by the stage-2 regime
    pub const PHYS_MASK_SHIFT: u64 = 48;

    /// Convert a successful PAR_EL1 value to the HPFAR_EL2 format
    ///
    /// PAR holds PA[47:12] at bits [47:12], HPFAR holds IPA[47:12] at [43:4].
    #[inline]
    pub const fn to_hpfar(par: u64) -> u64 {
        let mask = ((1u64 << PHYS_MASK_SHIFT) - 1) & !0xfff;
        ((par & mask) >> 12) << 4
    }
}

/// PSTATE / SPSR fields
pub mod psr {
    /// AArch32 execution state
    pub const MODE32_BIT: u64 = 0x10;
    /// AArch32 Thumb state
    pub const AA32_T_BIT: u64 = 0x20;
    /// EL1h with DAIF masked, the reset state of a 64-bit guest
    pub const MODE_EL1H_DAIF: u64 = 0x3c5;
    pub const MODE_MASK: u64 = 0x1f;
    pub const MODE_EL2T: u64 = 0x08;
    pub const MODE_EL2H: u64 = 0x09;
    /// Illegal execution state
    pub const IL_BIT: u64 = 1 << 20;
    /// Software step
    pub const DBG_SS: u64 = 1 << 21;
    /// AArch32 IT[7:0] field, split over [15:10] and [26:25]
    pub const AA32_IT_MASK: u64 = 0x0600_fc00;
}

/// GIC CPU interface priority mask values used with pseudo-NMI masking
pub mod gic_prio {
    pub const IRQON: u64 = 0xe0;
    pub const IRQOFF: u64 = IRQON & !0x80;
    pub const PSR_I_SET: u64 = 1 << 4;
}

/// VTTBR_EL2 fields
pub mod vttbr {
    pub const CNP: u64 = 1 << 0;
    pub const VMID_SHIFT: u64 = 48;
    pub const VMID_MASK: u64 = 0xffff;
    /// BADDR bits; the low bits must be zero for any valid table
    pub const BADDR_MASK: u64 = 0x0000_ffff_ffff_fffe;
}
