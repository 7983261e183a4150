//! Host-side test doubles: a closure-driven task body and a virtual clock
//! with scripted interrupts.

use std::boxed::Box;
use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::rc::Rc;
use std::vec::Vec;

use crate::event::{EventHandle, Events};
use crate::kernel::Context;
use crate::task::{Step, Task};
use crate::time::{Deadline, Platform, Tick};

type Program = Box<dyn FnMut(&mut Context<'_, Script>) -> Step<i32, &'static str>>;
type Close = Box<dyn FnMut(&mut Context<'_, Script>)>;

/// A task whose body is a closure, called once per resume.
pub(crate) struct Script {
    program: Program,
    on_close: Option<Close>,
}

impl Script {
    pub fn new<F>(program: F) -> Self
    where
        F: FnMut(&mut Context<'_, Script>) -> Step<i32, &'static str> + 'static,
    {
        Self {
            program: Box::new(program),
            on_close: None,
        }
    }

    pub fn on_close<F>(mut self, close: F) -> Self
    where
        F: FnMut(&mut Context<'_, Script>) + 'static,
    {
        self.on_close = Some(Box::new(close));
        self
    }

    /// Returns `value` on its first turn.
    pub fn returning(value: i32) -> Self {
        Self::new(move |_| Step::Return(value))
    }

    /// Reports each step in turn, then returns `value`.
    pub fn steps(steps: Vec<Step<i32, &'static str>>, value: i32) -> Self {
        let mut steps = VecDeque::from(steps);
        Self::new(move |_| steps.pop_front().unwrap_or(Step::Return(value)))
    }
}

impl Task for Script {
    type Output = i32;
    type Error = &'static str;

    fn resume(&mut self, cx: &mut Context<'_, Self>) -> Step<i32, &'static str> {
        (self.program)(cx)
    }

    fn close(&mut self, cx: &mut Context<'_, Self>) {
        if let Some(close) = self.on_close.as_mut() {
            close(cx);
        }
    }
}

/// Shared, ordered record of what tasks did.
#[derive(Clone, Default)]
pub(crate) struct Journal(Rc<RefCell<Vec<String>>>);

impl Journal {
    pub fn log(&self, entry: impl Into<String>) {
        self.0.borrow_mut().push(entry.into());
    }

    pub fn entries(&self) -> Vec<String> {
        self.0.borrow().clone()
    }
}

/// An event registry that lives for the rest of the test binary.
pub(crate) fn leak_events() -> &'static Events {
    Box::leak(Box::new(Events::new(|| {})))
}

/// Virtual clock. `wait_until` jumps straight to the next scripted
/// interrupt or to the deadline, whichever is earlier.
pub(crate) struct MockPlatform {
    now: Rc<Cell<u64>>,
    irqs: VecDeque<(u64, EventHandle)>,
    events: &'static Events,
    /// Every deadline passed to `wait_until`.
    pub waits: Vec<Deadline>,
}

impl MockPlatform {
    pub fn new(events: &'static Events) -> Self {
        Self {
            now: Rc::new(Cell::new(0)),
            irqs: VecDeque::new(),
            events,
            waits: Vec::new(),
        }
    }

    /// Handle on the clock, for advancing time from inside task bodies.
    pub fn clock(&self) -> Rc<Cell<u64>> {
        Rc::clone(&self.now)
    }

    /// Raise `ev` once the clock reaches `tick` and the scheduler idles.
    pub fn irq_at(&mut self, tick: u64, ev: EventHandle) {
        let at = self.irqs.partition_point(|&(other, _)| other <= tick);
        self.irqs.insert(at, (tick, ev));
    }
}

impl Platform for MockPlatform {
    fn now(&self) -> Tick {
        Tick(self.now.get())
    }

    fn wait_until(&mut self, deadline: Deadline) -> bool {
        self.waits.push(deadline);
        let now = self.now.get();
        if let Some(&(at, ev)) = self.irqs.front() {
            if deadline.tick().map_or(true, |due| at < due.ticks()) {
                self.irqs.pop_front();
                self.now.set(now.max(at));
                self.events.set_pending(ev);
                return false;
            }
        }
        match deadline.tick() {
            Some(due) => {
                self.now.set(now.max(due.ticks()));
                true
            }
            None => panic!("scheduler idles forever with nothing scheduled"),
        }
    }
}
