//! # Architecture Abstraction Layer
//!
//! Ports implement [`crate::time::Platform`] and provide the wake hook for
//! the event registry. Only the Cortex-M4 port exists; other architectures
//! go in sibling modules.

pub mod cortex_m4;
