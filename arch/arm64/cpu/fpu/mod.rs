//! FP/SIMD and SVE register switching for ARM64
//!
//! The register banks themselves live in [`crate::arch::arm64::cpu::state`];
//! this module decides when they move.

pub mod lazy;

pub use lazy::{
    handle_fpsimd, save_fpexc32, update_fp_enabled, vcpu_load_fp, vcpu_put_fp, FpOwner,
};
