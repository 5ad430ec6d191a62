//! Memory Management Unit for ARM64
//!
//! The parts of stage-2 translation the world switch deals with: loading and
//! dropping a VM's regime, and recovering fault addresses after an abort.

/// Stage-2 regime registers
pub mod stage2;

/// Stage-2 fault information
pub mod fault;

pub use fault::{populate_fault_info, FaultInfo, FaultKind};
pub use stage2::Stage2Config;
