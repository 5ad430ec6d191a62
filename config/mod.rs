//! Configuration management
//!
//! Bring-up settings of the switch core. Everything here is decided once per
//! core, before the first guest runs.

use log::LevelFilter;

use crate::arch::arm64::cpu::features::{HostModeKind, VgicTrapMode};

/// Consecutive fault-probe replays of one vCPU before a warning is logged
pub const DEFAULT_REPLAY_WARN_THRESHOLD: u32 = 64;

/// Switch core configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SwitchConfig {
    /// Console log level
    pub log_level: LevelFilter,
    /// Force a host mode instead of the detected one
    pub host_mode: Option<HostModeKind>,
    /// GIC CPU-interface trapping in use
    pub vgic_trap: VgicTrapMode,
    /// Host masks IRQs through the GIC priority mask
    pub irq_prio_masking: bool,
    /// Firmware implements SMCCC ARCH_WORKAROUND_2
    pub firmware_ssbd: bool,
    /// Replay count at which the dispatcher starts warning
    pub replay_warn_threshold: u32,
}

impl Default for SwitchConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            host_mode: None,
            vgic_trap: VgicTrapMode::None,
            irq_prio_masking: false,
            firmware_ssbd: false,
            replay_warn_threshold: DEFAULT_REPLAY_WARN_THRESHOLD,
        }
    }
}

/// Log level selected by the `debug` / `verbose` features
pub fn default_log_level() -> LevelFilter {
    #[cfg(feature = "debug")]
    {
        #[cfg(feature = "verbose")]
        return LevelFilter::Trace;

        #[cfg(not(feature = "verbose"))]
        return LevelFilter::Debug;
    }

    #[cfg(not(feature = "debug"))]
    LevelFilter::Info
}
