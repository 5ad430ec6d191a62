//! CPU module for ARM64
//!
//! This module provides CPU-specific functionality including:
//! - Register bit definitions
//! - Feature and erratum detection
//! - Host/guest context storage and system register save/restore
//! - The hardware seam (`hw`) and the vCPU
//! - Lazy FP/SIMD/SVE switching

pub mod regs;
pub mod features;
pub mod state;
pub mod sysreg;
pub mod hw;
pub mod vcpu;
pub mod fpu;

pub use features::{Capabilities, CpuIdRegs, HostModeKind};
pub use hw::SysRegOps;
pub use state::{CpuContext, FpSimdState, GpRegs, SveState};
pub use sysreg::SysReg;
