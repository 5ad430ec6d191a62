//! Per-core state of the world switch
//!
//! One [`PerCoreState`] exists for every physical core that runs guests. It
//! carries the host half of the context store and everything else the
//! switch needs to know about the core. The owner of the core passes it to
//! the run loop explicitly; there is no global table.

use heapless::Vec;

use crate::arch::arm64::cpu::features::Capabilities;
use crate::arch::arm64::cpu::hw::SysRegOps;
use crate::arch::arm64::cpu::state::{CpuContext, SveState, SVE_VL_MAX};
use crate::arch::arm64::cpu::sysreg::SysReg;
use crate::arch::arm64::pmu::PmuEvents;
use crate::arch::arm64::switch::traps::HostTraps;
use crate::arch::arm64::switch::workaround::WorkaroundState;
use crate::arch::arm64::MAX_CPUS;
use crate::config::SwitchConfig;
use crate::{Error, Result};

/// Number of EL2 exception fixups a core can hold
pub const MAX_FIXUPS: usize = 16;

/// Exception vector bases of a core
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CoreVectors {
    /// Host kernel vectors (VBAR_EL2 of a VHE host between runs)
    pub host: u64,
    /// Vectors that catch guest exits
    pub hyp: u64,
}

impl CoreVectors {
    pub const fn new(host: u64, hyp: u64) -> Self {
        Self { host, hyp }
    }
}

/// An EL2 instruction allowed to fault, and where to resume if it does
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FixupEntry {
    pub insn: u64,
    pub fixup: u64,
}

/// Fixup table consulted by the EL2 exception handler
#[derive(Debug, Clone, Default)]
pub struct FixupTable {
    entries: Vec<FixupEntry, MAX_FIXUPS>,
}

impl FixupTable {
    /// Create an empty table
    pub const fn new() -> Self {
        Self { entries: Vec::new() }
    }

    /// Register a fixup for the instruction at `insn`
    pub fn register(&mut self, insn: u64, fixup: u64) -> Result<()> {
        if self.lookup(insn).is_some() {
            return Err(Error::InvalidArgument);
        }

        self.entries
            .push(FixupEntry { insn, fixup })
            .map_err(|_| Error::ResourceBusy)
    }

    /// Fixup address for a faulting instruction
    pub fn lookup(&self, elr: u64) -> Option<u64> {
        self.entries
            .iter()
            .find(|entry| entry.insn == elr)
            .map(|entry| entry.fixup)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// World-switch state of one physical core
#[derive(Debug, Clone)]
pub struct PerCoreState {
    cpu_id: usize,
    /// Capability descriptor, fixed at bring-up
    pub caps: Capabilities,
    /// Host register file while a guest runs
    pub host: CpuContext,
    /// Host SVE bank parked by the lazy FP switch
    pub host_sve: SveState,
    /// The host task scheduling vCPUs has live SVE state
    pub host_sve_in_use: bool,
    /// Host MDCR_EL2 at bring-up; guests inherit its HPMN split
    pub host_mdcr: u64,
    /// Host trap configuration restored after each run
    pub host_traps: HostTraps,
    /// Vectors that catch guest exits
    pub hyp_vectors: u64,
    /// SSBD mitigation state
    pub workaround: WorkaroundState,
    /// Host/guest-only PMU counters
    pub pmu: PmuEvents,
    /// EL2 exception fixups
    pub fixups: FixupTable,
    /// Replays of a vCPU at which the dispatcher starts warning
    pub replay_warn_threshold: u32,
}

impl PerCoreState {
    /// Set up the state for core `cpu_id`
    ///
    /// Reads the host's MDCR_EL2, so it must run on the core itself.
    pub fn new<H: SysRegOps>(
        cpu_id: usize,
        caps: Capabilities,
        config: &SwitchConfig,
        vectors: CoreVectors,
        hw: &H,
    ) -> Result<Self> {
        if cpu_id >= MAX_CPUS {
            log::error!("cpu{}: beyond MAX_CPUS ({})", cpu_id, MAX_CPUS);
            return Err(Error::InvalidArgument);
        }

        let host_mdcr = hw.read(SysReg::MdcrEl2);

        log::debug!(
            "cpu{}: world switch ready (mode={:?}, mdcr={:#x}, hyp vectors={:#x})",
            cpu_id,
            caps.mode,
            host_mdcr,
            vectors.hyp
        );

        Ok(Self {
            cpu_id,
            caps,
            host: CpuContext::new(),
            host_sve: SveState::new(SVE_VL_MAX),
            host_sve_in_use: false,
            host_mdcr,
            host_traps: HostTraps::compute(&caps, vectors.host),
            hyp_vectors: vectors.hyp,
            workaround: WorkaroundState::new(caps.ssbd),
            pmu: PmuEvents::new(),
            fixups: FixupTable::new(),
            replay_warn_threshold: config.replay_warn_threshold,
        })
    }

    /// Physical core index
    pub fn cpu_id(&self) -> usize {
        self.cpu_id
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arch::arm64::cpu::features::{Errata, HostModeKind, VectorUnit, VgicTrapMode};
    use crate::arch::arm64::cpu::hw::ModelCpu;

    fn caps() -> Capabilities {
        Capabilities {
            mode: HostModeKind::Nvhe,
            vector: VectorUnit::FpSimd,
            errata: Errata::empty(),
            ras: false,
            ssbd: true,
            irq_prio_masking: false,
            vgic_trap: VgicTrapMode::None,
        }
    }

    #[test]
    fn test_new_reads_host_mdcr() {
        let hw = ModelCpu::with_host_traps(HostModeKind::Nvhe, 0);
        let core = PerCoreState::new(2, caps(), &SwitchConfig::default(), CoreVectors::new(0, 0x8000), &hw)
            .unwrap();
        assert_eq!(core.cpu_id(), 2);
        assert_eq!(core.host_mdcr, hw.read(SysReg::MdcrEl2));
        assert_eq!(core.hyp_vectors, 0x8000);
        assert!(core.workaround.ssbd_callback_required);
    }

    #[test]
    fn test_cpu_id_bound() {
        let hw = ModelCpu::new();
        let result = PerCoreState::new(MAX_CPUS, caps(), &SwitchConfig::default(), CoreVectors::new(0, 0), &hw);
        assert!(matches!(result, Err(Error::InvalidArgument)));
    }

    #[test]
    fn test_fixup_table() {
        let mut table = FixupTable::new();
        table.register(0x1000, 0x2000).unwrap();
        assert_eq!(table.register(0x1000, 0x3000), Err(Error::InvalidArgument));
        assert_eq!(table.lookup(0x1000), Some(0x2000));
        assert_eq!(table.lookup(0x1004), None);

        for i in 1..MAX_FIXUPS as u64 {
            table.register(0x1000 + i * 4, 0x4000).unwrap();
        }
        assert_eq!(table.len(), MAX_FIXUPS);
        assert_eq!(table.register(0x9000, 0x4000), Err(Error::ResourceBusy));
    }
}
