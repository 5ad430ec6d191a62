//! PMU counter multiplexing between host and guest
//!
//! Host perf events can be restricted to host-only or guest-only execution.
//! The core keeps two counter masks and flips PMCNTEN{SET,CLR}_EL0 around
//! each non-VHE run so that each event only counts where it was asked to.
//! On a VHE host the EL0/EL2 split already does this for user-excluded
//! events.

use crate::arch::arm64::cpu::features::Capabilities;
use crate::arch::arm64::cpu::hw::SysRegOps;
use crate::arch::arm64::cpu::sysreg::SysReg;

/// Exclusion attributes of a host perf event
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PmuEventAttr {
    pub exclude_user: bool,
    pub exclude_host: bool,
    pub exclude_guest: bool,
}

/// Counters that only run on one side of the switch
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PmuEvents {
    /// Counters that count only while the host runs
    pub events_host: u32,
    /// Counters that count only while a guest runs
    pub events_guest: u32,
}

impl PmuEvents {
    /// Create an empty set
    pub const fn new() -> Self {
        Self {
            events_host: 0,
            events_guest: 0,
        }
    }

    /// Whether an event with `attr` needs to be switched around guest runs
    pub fn switch_needed(attr: &PmuEventAttr, caps: &Capabilities) -> bool {
        // Host at EL2, guest kernel at EL1: exclude_user covers it
        if caps.is_vhe() && attr.exclude_user {
            return false;
        }

        attr.exclude_host != attr.exclude_guest
    }

    /// Track `counters` for an event with `attr`
    pub fn set(&mut self, counters: u32, attr: &PmuEventAttr, caps: &Capabilities) {
        if !Self::switch_needed(attr, caps) {
            return;
        }

        if !attr.exclude_host {
            self.events_host |= counters;
        }
        if !attr.exclude_guest {
            self.events_guest |= counters;
        }
    }

    /// Stop tracking `counters`
    pub fn clear(&mut self, counters: u32) {
        self.events_host &= !counters;
        self.events_guest &= !counters;
    }

    /// Stop host-only counters and start guest-only ones
    ///
    /// Returns whether anything was switched, i.e. whether
    /// [`PmuEvents::switch_to_host`] is owed after the run.
    pub fn switch_to_guest<H: SysRegOps>(&self, hw: &mut H) -> bool {
        if self.events_host != 0 {
            hw.write(SysReg::PmcntenclrEl0, self.events_host as u64);
        }
        if self.events_guest != 0 {
            hw.write(SysReg::PmcntensetEl0, self.events_guest as u64);
        }

        self.events_host != 0 || self.events_guest != 0
    }

    /// Stop guest-only counters and restart host-only ones
    pub fn switch_to_host<H: SysRegOps>(&self, hw: &mut H) {
        if self.events_guest != 0 {
            hw.write(SysReg::PmcntenclrEl0, self.events_guest as u64);
        }
        if self.events_host != 0 {
            hw.write(SysReg::PmcntensetEl0, self.events_host as u64);
        }
    }
}
