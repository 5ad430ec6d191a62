//! Ferroswitch - ARM64 EL2 world-switch core
//!
//! This crate holds the code that moves a physical core between the host and
//! a guest vCPU on an ARMv8 CPU with virtualization extensions:
//! - guest entry/exit and the run loop (VHE and non-VHE hosts)
//! - trap configuration for the guest and the host
//! - lazy FP/SIMD/SVE register switching
//! - stage-2 fault information recovery
//! - the exit fast path and the fatal path
//!
//! Hardware is reached through [`arch::arm64::cpu::hw::SysRegOps`]. On
//! AArch64 builds `El2Hw` drives the real registers; everywhere else (and in
//! tests) `ModelCpu` provides a software register file.

#![cfg_attr(not(test), no_std)]

// Core modules
pub mod utils;
pub mod config;

// Architecture-specific code
pub mod arch;

// Re-export key modules for convenience
pub use arch::arm64::cpu::features::{Capabilities, CpuIdRegs, HostModeKind};
pub use arch::arm64::cpu::hw::SysRegOps;
pub use arch::arm64::cpu::vcpu::Vcpu;
pub use arch::arm64::hooks::{HaltFacility, NoHooks, SwitchHooks};
pub use arch::arm64::percpu::PerCoreState;
pub use arch::arm64::switch::{run_vcpu, ExitAction};
pub use arch::arm64::ExitCode;
pub use config::SwitchConfig;

use core::fmt;

/// Ferroswitch version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Bring up the ambient services of the switch core
///
/// Installs the console logger at the configured level. Safe to call more
/// than once: later calls only adjust the level.
pub fn init(logger: &'static utils::log::ConsoleLogger, config: &SwitchConfig) -> Result<()> {
    utils::log::init(logger, config.log_level)?;

    log::info!("Ferroswitch v{} initialized", VERSION);

    Ok(())
}

/// Common error type for Ferroswitch
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    /// Invalid argument
    InvalidArgument,
    /// Not found
    NotFound,
    /// Resource busy
    ResourceBusy,
    /// Invalid state
    InvalidState,
    /// The requested host mode is not supported by this CPU
    Unsupported,
    /// AT S1E1R could not translate the faulting address
    TranslationProbeFailed,
    /// The stage-2 regime of a VM is not usable
    InvalidStage2,
    /// The guest exit code is outside the architectural set
    InvalidExitCode(u64),
    /// A virtual SError is already pending for this vCPU
    SErrorPending,
    /// A different global logger was installed first
    LoggerConflict,
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::InvalidArgument => write!(f, "invalid argument"),
            Error::NotFound => write!(f, "not found"),
            Error::ResourceBusy => write!(f, "resource busy"),
            Error::InvalidState => write!(f, "invalid state"),
            Error::Unsupported => write!(f, "not supported by this CPU"),
            Error::TranslationProbeFailed => write!(f, "stage-1 translation probe failed"),
            Error::InvalidStage2 => write!(f, "invalid stage-2 configuration"),
            Error::InvalidExitCode(code) => write!(f, "invalid exit code {:#x}", code),
            Error::SErrorPending => write!(f, "virtual SError already pending"),
            Error::LoggerConflict => write!(f, "another logger is installed"),
        }
    }
}

/// Result type for Ferroswitch
pub type Result<T> = core::result::Result<T, Error>;
