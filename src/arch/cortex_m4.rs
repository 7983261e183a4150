//! # Cortex-M4 Port Layer
//!
//! Clock and idle primitive for ARM Cortex-M4 (Thumb-2) targets.
//!
//! ## Clock
//!
//! SysTick fires at `TICK_HZ`; its handler bumps a 64-bit tick counter
//! under a critical section. At 1 kHz the counter does not wrap in any
//! realistic uptime.
//!
//! ## Idle
//!
//! The scheduler idles with `WFE`. Any interrupt taken wakes the core, and
//! [`wake`] (the hook given to the event registry) issues `SEV`, which sets
//! the event register. An event made pending after the scheduler's last
//! drain therefore makes the next `WFE` fall straight through instead of
//! being lost.
//!
//! ## Interrupt Priorities
//!
//! SysTick runs at the lowest priority so the tick never delays a
//! peripheral interrupt that is about to set an event pending.

use core::cell::Cell;

use cortex_m::asm;
use cortex_m::peripheral::scb::SystemHandler;
use cortex_m::peripheral::syst::SystClkSource;
use cortex_m::peripheral::{SCB, SYST};
use cortex_m_rt::exception;
use critical_section::Mutex;

use crate::config::{SYSTEM_CLOCK_HZ, TICK_HZ};
use crate::sync;
use crate::time::{Deadline, Platform, Tick};

/// Ticks since `SysTickClock::new`.
static TICKS: Mutex<Cell<u64>> = Mutex::new(Cell::new(0));

// ---------------------------------------------------------------------------
// SysTick configuration
// ---------------------------------------------------------------------------

/// Configure SysTick to fire at `TICK_HZ` from the processor clock.
pub fn configure_systick(syst: &mut SYST) {
    let reload = SYSTEM_CLOCK_HZ / TICK_HZ - 1;
    syst.set_reload(reload);
    syst.clear_current();
    syst.set_clock_source(SystClkSource::Core);
    syst.enable_counter();
    syst.enable_interrupt();
}

/// Put SysTick at the lowest exception priority.
pub fn set_interrupt_priorities(scb: &mut SCB) {
    // SAFETY: lowering SysTick's priority cannot break a priority-based
    // critical section; this crate masks interrupts globally instead.
    unsafe { scb.set_priority(SystemHandler::SysTick, 0xFF) }
}

#[exception]
fn SysTick() {
    sync::critical_section(|cs| {
        let ticks = TICKS.borrow(cs);
        ticks.set(ticks.get() + 1);
    });
}

// ---------------------------------------------------------------------------
// Platform
// ---------------------------------------------------------------------------

/// The SysTick-driven clock. Owns SYST so nothing else reprograms it.
pub struct SysTickClock {
    _syst: SYST,
}

impl SysTickClock {
    pub fn new(mut syst: SYST, scb: &mut SCB) -> Self {
        sync::critical_section(|cs| TICKS.borrow(cs).set(0));
        set_interrupt_priorities(scb);
        configure_systick(&mut syst);
        Self { _syst: syst }
    }
}

impl Platform for SysTickClock {
    fn now(&self) -> Tick {
        Tick(sync::critical_section(|cs| TICKS.borrow(cs).get()))
    }

    fn wait_until(&mut self, deadline: Deadline) -> bool {
        if deadline.reached(self.now()) {
            return true;
        }
        // Returns on the next interrupt (at the latest the next tick) or
        // straight away if `wake` ran since the last WFE.
        asm::wfe();
        deadline.reached(self.now())
    }
}

/// Wake hook for [`crate::event::Events::new`]. Safe from any context.
#[inline]
pub fn wake() {
    asm::sev();
}
