//! Collaborator hooks of the run loop
//!
//! The interrupt controller, the timer and the debug unit each keep some
//! per-vCPU hardware state that has to move with the guest. The run loop
//! calls into them at fixed points through [`SwitchHooks`]; every hook has
//! a do-nothing default so a platform only implements what it has.

use crate::arch::arm64::cpu::hw::SysRegOps;
use crate::arch::arm64::cpu::vcpu::{TrapRecord, Vcpu};
use crate::arch::arm64::switch::panic::PanicRecord;

/// Outcome of an emulated GIC CPU-interface access
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CpuIfAccess {
    /// Access emulated, instruction skipped
    Handled,
    /// Access the guest is not allowed to make
    Illegal,
    /// Not a CPU-interface access
    NotHandled,
}

/// Per-device steps of the world switch
#[allow(unused_variables)]
pub trait SwitchHooks {
    /// Load the vCPU's interrupt controller state (non-VHE, before guest
    /// system registers)
    fn vgic_restore<H: SysRegOps>(&mut self, vcpu: &mut Vcpu, hw: &mut H) {}

    /// Save the vCPU's interrupt controller state (non-VHE, after guest
    /// system registers)
    fn vgic_save<H: SysRegOps>(&mut self, vcpu: &mut Vcpu, hw: &mut H) {}

    /// Trap the guest's physical timer accesses (non-VHE)
    fn timer_enable_traps<H: SysRegOps>(&mut self, vcpu: &Vcpu, hw: &mut H) {}

    /// Give the host its timer back (non-VHE)
    fn timer_disable_traps<H: SysRegOps>(&mut self, hw: &mut H) {}

    /// Switch debug registers to the guest's
    fn debug_switch_to_guest<H: SysRegOps>(&mut self, vcpu: &mut Vcpu, hw: &mut H) {}

    /// Switch debug registers back to the host's
    fn debug_switch_to_host<H: SysRegOps>(&mut self, vcpu: &mut Vcpu, hw: &mut H) {}

    /// Emulate a GICv2 CPU-interface access reported as a data abort
    fn vgic_v2_cpuif_access<H: SysRegOps>(
        &mut self,
        vcpu: &mut Vcpu,
        record: &TrapRecord,
        hw: &mut H,
    ) -> CpuIfAccess {
        CpuIfAccess::NotHandled
    }

    /// Emulate a trapped GICv3 ICC_* system register access
    fn vgic_v3_cpuif_access<H: SysRegOps>(
        &mut self,
        vcpu: &mut Vcpu,
        record: &TrapRecord,
        hw: &mut H,
    ) -> CpuIfAccess {
        CpuIfAccess::NotHandled
    }
}

/// Hooks of a platform with none of the optional devices
#[derive(Debug, Clone, Copy, Default)]
pub struct NoHooks;

impl SwitchHooks for NoHooks {}

/// Where the fatal path ends
pub trait HaltFacility {
    /// Report `record` and stop the core
    fn halt(&mut self, record: &PanicRecord) -> !;
}
