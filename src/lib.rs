//! # EvOS: Event-driven cooperative scheduler
//!
//! A no-heap, single-core cooperative scheduler for bare-metal ARM
//! Cortex-M, with an interrupt-safe event subsystem.
//!
//! ## Overview
//!
//! Tasks are resumable bodies ([`task::Task`]). Each one runs until it
//! reports a [`task::Step`]: yield, block (indefinitely or until a
//! deadline), finish, or request shutdown. Nothing preempts a task.
//! Interrupt handlers never touch the scheduler; they only mark events
//! pending, and the scheduler loop resumes the tasks watching those events.
//!
//! ## Architecture
//!
//! ```text
//! ┌────────────────────────────────────────────────────────┐
//! │          Task bodies (impl Task) · Context API          │
//! ├────────────────────────────────────────────────────────┤
//! │              Scheduler loop (scheduler.rs)              │
//! │      dispatch · promote timers · pick · run · step      │
//! ├──────────────┬─────────────────────┬──────────────────┤
//! │ Task Table   │   Kernel            │  Watcher Map     │
//! │ task.rs      │   kernel.rs         │  watch.rs        │
//! │ ─ run queue  │   ─ start · resume  │  ─ TaskSet       │
//! │ ─ timer list │   ─ kill · join     │  ─ watch/unwatch │
//! │              │   ─ handle()        │                  │
//! │              │     (handler.rs)    │                  │
//! ├──────────────┴─────────────────────┴──────────────────┤
//! │   Event Registry + pending queue (event.rs, sync.rs)    │
//! │         ▲ set_pending() from interrupt handlers         │
//! ├────────────────────────────────────────────────────────┤
//! │  Clock / Platform (time.rs) · Port (arch/cortex_m4.rs)  │
//! │            SysTick · WFE idle · SEV wake                │
//! └────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Memory Model
//!
//! - **No heap**: every table is a fixed array sized in [`config`]
//! - **Arena handles**: tasks and events are referenced by
//!   generation-checked indexes, never by pointer
//! - **One scheduler per core**: a plain value owned by that core; the
//!   event registry is the only `static`
//! - **Critical sections**: the `critical-section` crate, held only around
//!   event registry access
//!
//! ## Usage
//!
//! ```ignore
//! static EVENTS: Events = Events::new(arch::cortex_m4::wake);
//!
//! let clock = SysTickClock::new(cp.SYST, &mut cp.SCB);
//! let mut scheduler = Scheduler::new(&EVENTS, clock);
//! scheduler.start(MyTask::new())?;
//! let result = scheduler.run();
//! ```

#![cfg_attr(not(test), no_std)]

pub mod config;
pub mod error;
pub mod event;
pub mod handler;
pub mod kernel;
pub mod scheduler;
pub mod sync;
pub mod task;
pub mod time;
pub mod watch;

#[cfg(all(target_arch = "arm", target_os = "none"))]
pub mod arch;

#[cfg(test)]
mod testing;

pub use error::Error;
pub use event::{EventHandle, Events};
pub use handler::{EventHandler, Handler};
pub use kernel::{Context, Stats};
pub use scheduler::Scheduler;
pub use task::{Exit, Step, Task, TaskHandle, TaskState};
pub use time::{Deadline, Platform, Tick};
