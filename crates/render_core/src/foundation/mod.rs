//! Foundation module - small shared utilities
//!
//! - Math type aliases over nalgebra
//! - Logging initialisation

pub mod logging;
pub mod math;
