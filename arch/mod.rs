//! Architecture support
//!
//! Only ARM64 has a world switch. Its logic compiles on every host so that it
//! can run against the software CPU model; the EL2 hardware backend is gated
//! on `target_arch = "aarch64"` inside `arm64::cpu::hw`.

pub mod arm64;

pub use arm64::*;
