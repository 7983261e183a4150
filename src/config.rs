//! # EvOS Configuration
//!
//! Compile-time constants governing the scheduler and the event subsystem.
//! All limits are fixed at compile time; nothing grows at runtime.
//! Exhausting any of them is reported as an error (or, for the pending
//! queue, a panic); the mitigation is sizing headroom here.

use static_assertions::const_assert;

/// Maximum number of tasks (live or dead-but-unreaped) per scheduler.
/// Each slot stores the task body inline, so size the body type with care.
pub const MAX_TASKS: usize = 16;

/// Number of event slots in one event registry.
pub const MAX_EVENTS: usize = 32;

/// Capacity of each half of the double-buffered pending-event queue.
///
/// An event is queued at most once until the dispatch loop drains it, so
/// this bounds the number of *distinct* events that can be pending and
/// undrained at the same time. Overflow is fatal.
pub const EVENT_QUEUE_DEPTH: usize = 16;

/// Maximum number of tasks watching a single event.
pub const MAX_WATCHERS: usize = 8;

/// Maximum number of tasks joining a single task.
pub const MAX_JOINERS: usize = 8;

/// SysTick frequency in Hz. One tick of the scheduler clock per interrupt.
pub const TICK_HZ: u32 = 1000;

/// System clock frequency in Hz (default for STM32F4 at 16 MHz HSI).
pub const SYSTEM_CLOCK_HZ: u32 = 16_000_000;

// Handles store slot indexes as u16.
const_assert!(MAX_TASKS > 0 && MAX_TASKS <= u16::MAX as usize);
const_assert!(MAX_EVENTS > 0 && MAX_EVENTS <= u16::MAX as usize);
const_assert!(EVENT_QUEUE_DEPTH > 0);
const_assert!(MAX_WATCHERS >= 2);
const_assert!(MAX_JOINERS >= 2);
const_assert!(SYSTEM_CLOCK_HZ / TICK_HZ > 1);
