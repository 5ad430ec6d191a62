//! Utility functions and data structures
//!
//! This module contains the ambient helpers of the switch core.

pub mod log;
