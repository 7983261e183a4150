//! # EvOS Example Firmware
//!
//! Three cooperative tasks around one event:
//!
//! | Task | Behavior |
//! |------|----------|
//! | `producer` | Sleeps `PERIOD` ticks, bumps a counter and sets the event pending, `BURSTS` times |
//! | `consumer` | Waits on the event for a new count, with a `TIMEOUT` deadline per wait |
//! | `supervisor` | Joins the producer, then shuts the scheduler down with its result |
//! | `mirror` | Handler task of the event: copies the count after every occurrence |
//!
//! The producer stands in for a peripheral interrupt handler: a real
//! driver would call `EVENTS.set_pending` from its ISR in exactly the same
//! way. Shutdown kills the consumer, whose `close` releases the event and
//! with it the mirror.

#![no_std]
#![no_main]

use core::sync::atomic::{AtomicU32, Ordering};
use core::task::Poll;

use cortex_m_rt::entry;
use panic_halt as _;

use evos::arch::cortex_m4::{self, SysTickClock};
use evos::event::{EventHandle, Events};
use evos::handler::{EventHandler, Handler};
use evos::kernel::Context;
use evos::scheduler::Scheduler;
use evos::task::{Exit, Step, Task, TaskHandle};
use evos::time::Deadline;

const PERIOD: u64 = 250;
const TIMEOUT: u64 = 1_000;
const BURSTS: u32 = 8;

static EVENTS: Events = Events::new(cortex_m4::wake);

/// Driver-side state the event announces changes to.
static PRODUCED: AtomicU32 = AtomicU32::new(0);

/// Last count seen by the mirror.
static MIRRORED: AtomicU32 = AtomicU32::new(0);

// ---------------------------------------------------------------------------
// Tasks
// ---------------------------------------------------------------------------

enum Demo {
    Producer {
        ev: EventHandle,
        sent: u32,
        next: Option<Deadline>,
    },
    Consumer {
        ev: EventHandle,
        seen: u32,
        deadline: Option<Deadline>,
    },
    Supervisor {
        producer: TaskHandle,
    },
    Mirror(Handler<Mirror>),
}

struct Mirror;

impl EventHandler<Demo> for Mirror {
    fn handle(&mut self, _cx: &mut Context<'_, Demo>) -> Result<(), &'static str> {
        MIRRORED.store(PRODUCED.load(Ordering::Acquire), Ordering::Release);
        Ok(())
    }
}

impl Task for Demo {
    type Output = u32;
    type Error = &'static str;

    fn resume(&mut self, cx: &mut Context<'_, Self>) -> Step<u32, &'static str> {
        match self {
            Demo::Producer { ev, sent, next } => {
                match *next {
                    Some(due) if due.reached(cx.now()) => {}
                    Some(due) => return Step::Sleep(due),
                    None => {
                        let due = cx.after(PERIOD);
                        *next = Some(due);
                        return Step::Sleep(due);
                    }
                }
                *sent += 1;
                PRODUCED.store(*sent, Ordering::Release);
                cx.events().set_pending(*ev);
                if *sent == BURSTS {
                    return Step::Return(*sent);
                }
                let due = cx.after(PERIOD);
                *next = Some(due);
                Step::Sleep(due)
            }

            Demo::Consumer { ev, seen, deadline } => {
                let due = *deadline.get_or_insert_with(|| cx.after(TIMEOUT));
                let last = *seen;
                let fresh = || {
                    let count = PRODUCED.load(Ordering::Acquire);
                    (count > last).then_some(count)
                };
                match cx.wait(&[*ev], due, fresh) {
                    Ok(Poll::Ready(Some(count))) => {
                        *seen = count;
                        *deadline = None;
                        Step::Yield
                    }
                    Ok(Poll::Ready(None)) => Step::Fail("producer stalled"),
                    Ok(Poll::Pending) => Step::suspend(Some(due)),
                    Err(_) => Step::Fail("event released"),
                }
            }

            Demo::Supervisor { producer } => match cx.join(*producer) {
                Ok(Poll::Ready(Exit::Returned(count))) => Step::Shutdown(count),
                Ok(Poll::Ready(_)) | Err(_) => Step::Fail("producer lost"),
                Ok(Poll::Pending) => Step::Suspend,
            },

            Demo::Mirror(mirror) => mirror.resume(cx),
        }
    }

    fn close(&mut self, cx: &mut Context<'_, Self>) {
        match self {
            Demo::Consumer { ev, .. } => {
                cx.release_event(*ev);
            }
            Demo::Mirror(mirror) => mirror.close(cx),
            _ => {}
        }
    }
}

// ---------------------------------------------------------------------------
// Main entry point
// ---------------------------------------------------------------------------

#[entry]
fn main() -> ! {
    let mut cp = cortex_m::Peripherals::take().unwrap();
    let clock = SysTickClock::new(cp.SYST, &mut cp.SCB);
    let mut scheduler: Scheduler<Demo, SysTickClock> = Scheduler::new(&EVENTS, clock);

    let ev = scheduler.claim_event().expect("Failed to claim demo event");
    let producer = scheduler
        .start_named(
            Demo::Producer {
                ev,
                sent: 0,
                next: None,
            },
            "producer",
        )
        .expect("Failed to start producer");
    scheduler
        .start_named(
            Demo::Consumer {
                ev,
                seen: 0,
                deadline: None,
            },
            "consumer",
        )
        .expect("Failed to start consumer");
    scheduler
        .start_named(Demo::Supervisor { producer }, "supervisor")
        .expect("Failed to start supervisor");
    scheduler
        .handle_named(ev, Demo::Mirror(Handler::new(ev, Mirror)), "mirror")
        .expect("Failed to start mirror");

    let _delivered = scheduler.run();

    loop {
        cortex_m::asm::wfi();
    }
}
