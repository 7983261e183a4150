//! # Event Handler Tasks
//!
//! The usual shape of an interrupt-driven driver: one task per event that
//! runs a callback after each occurrence and goes back to sleep on the
//! event. [`Handler`] is that loop; embed it in a variant of the
//! application's task type and forward `resume` and `close` to it.
//!
//! ```ignore
//! enum App {
//!     Uart(Handler<UartRx>),
//!     // ...
//! }
//!
//! impl Task for App {
//!     fn resume(&mut self, cx: &mut Context<'_, Self>) -> Step<..> {
//!         match self {
//!             App::Uart(rx) => rx.resume(cx),
//!         }
//!     }
//!     fn close(&mut self, cx: &mut Context<'_, Self>) {
//!         match self {
//!             App::Uart(rx) => rx.close(cx),
//!         }
//!     }
//! }
//!
//! let ev = scheduler.claim_event()?;
//! scheduler.handle(ev, App::Uart(Handler::new(ev, UartRx::default())))?;
//! ```
//!
//! At most one handler task exists per event. It is found again with
//! `handler(ev)` and stopped with `stop_handler(ev)`; releasing or
//! abandoning the event stops it too.

use crate::config::MAX_EVENTS;
use crate::event::EventHandle;
use crate::kernel::Context;
use crate::task::{Step, Task, TaskHandle};

/// Callbacks of an event handler task.
pub trait EventHandler<T: Task> {
    /// Runs when the task starts and after every resume, which is normally
    /// an occurrence of the event. An error ends the task as failed.
    fn handle(&mut self, cx: &mut Context<'_, T>) -> Result<(), T::Error>;

    /// Runs once when the task ends, killed or failed, after it has stopped
    /// watching the event.
    fn done(&mut self, cx: &mut Context<'_, T>) {
        let _ = cx;
    }
}

/// Task body that calls `H` for every occurrence of one event.
///
/// Start it with `handle`, which registers the watch; a `Handler` started
/// as a plain task never hears from its event.
#[derive(Debug)]
pub struct Handler<H> {
    ev: EventHandle,
    handler: H,
    finished: bool,
}

impl<H> Handler<H> {
    pub fn new(ev: EventHandle, handler: H) -> Self {
        Self {
            ev,
            handler,
            finished: false,
        }
    }

    pub fn event(&self) -> EventHandle {
        self.ev
    }

    pub fn get(&self) -> &H {
        &self.handler
    }

    pub fn get_mut(&mut self) -> &mut H {
        &mut self.handler
    }

    /// Run the callback, then block until the next occurrence.
    pub fn resume<T>(&mut self, cx: &mut Context<'_, T>) -> Step<T::Output, T::Error>
    where
        T: Task,
        H: EventHandler<T>,
    {
        match self.handler.handle(cx) {
            Ok(()) => Step::Suspend,
            Err(err) => {
                self.finish(cx);
                Step::Fail(err)
            }
        }
    }

    /// Forward of [`Task::close`].
    pub fn close<T>(&mut self, cx: &mut Context<'_, T>)
    where
        T: Task,
        H: EventHandler<T>,
    {
        self.finish(cx);
    }

    fn finish<T>(&mut self, cx: &mut Context<'_, T>)
    where
        T: Task,
        H: EventHandler<T>,
    {
        if self.finished {
            return;
        }
        self.finished = true;
        cx.unwatch(self.ev);
        self.handler.done(cx);
    }
}

// ---------------------------------------------------------------------------
// Event -> handler task
// ---------------------------------------------------------------------------

/// The handler task of each event slot.
pub(crate) struct Handlers {
    slots: [Option<(EventHandle, TaskHandle)>; MAX_EVENTS],
}

impl Handlers {
    pub fn new() -> Self {
        Self {
            slots: [None; MAX_EVENTS],
        }
    }

    /// The handler of `ev`. A stale handle never matches.
    pub fn get(&self, ev: EventHandle) -> Option<TaskHandle> {
        match self.slots[ev.index()] {
            Some((owner, task)) if owner == ev => Some(task),
            _ => None,
        }
    }

    pub fn insert(&mut self, ev: EventHandle, task: TaskHandle) {
        self.slots[ev.index()] = Some((ev, task));
    }

    /// Drop whatever entry names `task`.
    pub fn forget(&mut self, task: TaskHandle) {
        for slot in self.slots.iter_mut() {
            if matches!(slot, Some((_, owner)) if *owner == task) {
                *slot = None;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use crate::scheduler::Scheduler;
    use crate::task::{Exit, TaskState};
    use crate::testing::{leak_events, MockPlatform};
    use crate::time::{Deadline, Tick};
    use core::task::Poll;
    use std::cell::Cell;
    use std::rc::Rc;

    /// Counts calls; fails on the `fail_at`-th one if set.
    struct Counter {
        calls: Rc<Cell<u32>>,
        done: Rc<Cell<u32>>,
        fail_at: Option<u32>,
    }

    impl EventHandler<Irq> for Counter {
        fn handle(&mut self, cx: &mut Context<'_, Irq>) -> Result<(), &'static str> {
            assert!(cx.is_alive(cx.current()));
            self.calls.set(self.calls.get() + 1);
            if self.fail_at == Some(self.calls.get()) {
                return Err("overrun");
            }
            Ok(())
        }

        fn done(&mut self, _cx: &mut Context<'_, Irq>) {
            self.done.set(self.done.get() + 1);
        }
    }

    enum Irq {
        Handler(Handler<Counter>),
        /// Sleeps until `at`, then stops the handler of `ev`.
        Stop { at: u64, ev: EventHandle },
    }

    impl Task for Irq {
        type Output = u32;
        type Error = &'static str;

        fn resume(&mut self, cx: &mut Context<'_, Self>) -> Step<u32, &'static str> {
            match self {
                Irq::Handler(handler) => handler.resume(cx),
                Irq::Stop { at, ev } => {
                    let due = Deadline::at(Tick(*at));
                    if !due.reached(cx.now()) {
                        return Step::Sleep(due);
                    }
                    assert!(cx.handler(*ev).is_some());
                    assert_eq!(cx.stop_handler(*ev), Ok(true));
                    assert_eq!(cx.stop_handler(*ev), Ok(false));
                    Step::Return(0)
                }
            }
        }

        fn close(&mut self, cx: &mut Context<'_, Self>) {
            if let Irq::Handler(handler) = self {
                handler.close(cx);
            }
        }
    }

    struct Tally {
        calls: Rc<Cell<u32>>,
        done: Rc<Cell<u32>>,
    }

    fn counter(fail_at: Option<u32>) -> (Counter, Tally) {
        let calls = Rc::new(Cell::new(0));
        let done = Rc::new(Cell::new(0));
        let counter = Counter {
            calls: Rc::clone(&calls),
            done: Rc::clone(&done),
            fail_at,
        };
        (counter, Tally { calls, done })
    }

    fn scheduler() -> Scheduler<Irq, MockPlatform> {
        let events = leak_events();
        Scheduler::new(events, MockPlatform::new(events))
    }

    #[test]
    fn test_handler_runs_after_each_occurrence() {
        let mut sched = scheduler();
        let ev = sched.claim_event().unwrap();
        for tick in [10, 20, 40] {
            sched.platform_mut().irq_at(tick, ev);
        }
        let (counter, tally) = counter(None);
        let handler = sched.handle(ev, Irq::Handler(Handler::new(ev, counter))).unwrap();
        assert_eq!(sched.handler(ev), Some(handler));
        let stopper = sched.start(Irq::Stop { at: 50, ev }).unwrap();

        assert_eq!(sched.run(), None);
        // One call on start, then one per occurrence.
        assert_eq!(tally.calls.get(), 4);
        assert_eq!(tally.done.get(), 1);
        assert_eq!(sched.join(handler), Ok(Poll::Ready(Exit::Cancelled)));
        assert_eq!(sched.join(stopper), Ok(Poll::Ready(Exit::Returned(0))));
        assert_eq!(sched.handler(ev), None);
        assert!(sched.events().is_enabled(ev));
    }

    #[test]
    fn test_stop_handler_from_outside() {
        let mut sched = scheduler();
        let ev = sched.claim_event().unwrap();
        let (counter, tally) = counter(None);
        let handler = sched.handle(ev, Irq::Handler(Handler::new(ev, counter))).unwrap();

        assert_eq!(sched.stop_handler(ev), Ok(true));
        assert_eq!(sched.stop_handler(ev), Ok(false));
        assert_eq!(tally.calls.get(), 0);
        assert_eq!(tally.done.get(), 1);
        assert_eq!(sched.state(handler), Ok(&TaskState::Dead(Exit::Cancelled)));

        // The event can take a new handler.
        let (counter2, _) = self::counter(None);
        let next = sched.handle(ev, Irq::Handler(Handler::new(ev, counter2))).unwrap();
        assert_eq!(sched.handler(ev), Some(next));
    }

    #[test]
    fn test_failing_handler_stops_watching() {
        let mut sched = scheduler();
        let ev = sched.claim_event().unwrap();
        sched.platform_mut().irq_at(5, ev);
        let (counter, tally) = counter(Some(2));
        let handler = sched.handle(ev, Irq::Handler(Handler::new(ev, counter))).unwrap();

        assert_eq!(sched.run(), None);
        assert_eq!(tally.calls.get(), 2);
        assert_eq!(tally.done.get(), 1);
        assert_eq!(sched.join(handler), Ok(Poll::Ready(Exit::Failed("overrun"))));
        assert_eq!(sched.handler(ev), None);
        assert!(!sched.unwatch(ev, handler));
    }

    #[test]
    fn test_one_handler_per_enabled_event() {
        let mut sched = scheduler();
        let ev = sched.claim_event().unwrap();
        let (first, _) = counter(None);
        let (second, _) = counter(None);
        sched.handle(ev, Irq::Handler(Handler::new(ev, first))).unwrap();
        assert_eq!(
            sched.handle(ev, Irq::Handler(Handler::new(ev, second))).err(),
            Some(Error::AlreadyHandled)
        );
        assert_eq!(sched.live_tasks(), 1);

        let released = sched.claim_event().unwrap();
        sched.release_event(released);
        let (third, _) = counter(None);
        assert_eq!(
            sched.handle(released, Irq::Handler(Handler::new(released, third))).err(),
            Some(Error::EventDisabled)
        );
        assert_eq!(sched.live_tasks(), 1);
    }

    #[test]
    fn test_release_stops_handler() {
        let mut sched = scheduler();
        let ev = sched.claim_event().unwrap();
        let (counter, tally) = counter(None);
        let handler = sched.handle(ev, Irq::Handler(Handler::new(ev, counter))).unwrap();

        assert!(sched.release_event(ev));
        assert_eq!(tally.done.get(), 1);
        assert!(!sched.is_alive(handler));
        assert_eq!(sched.handler(ev), None);
        assert_eq!(sched.run(), None);
        assert_eq!(tally.calls.get(), 0);
    }
}
