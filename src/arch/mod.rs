//! # Architecture Abstraction Layer
//!
//! Board ports implementing `platform::Platform`, plus the sleep-depth
//! policy they share. Currently the Cortex-M4 port; other architectures
//! are added as sibling modules.

pub mod sleep;

#[cfg(all(target_arch = "arm", target_os = "none"))]
pub mod cortex_m4;
