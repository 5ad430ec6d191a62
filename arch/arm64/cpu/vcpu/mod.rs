//! VCPU state for ARM64
//!
//! The guest side of the context store ([`Vcpu`]) and the per-exit trap
//! record the dispatcher works on.

/// VCPU context management
pub mod context;

/// Guest exit records and instruction skipping
pub mod trap;

pub use context::{PendingVirtualError, Vcpu, VcpuFlags};
pub use trap::{adjust_itstate, skip_instr, skip_trapped_instr, TrapRecord};
