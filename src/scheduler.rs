//! # Scheduler
//!
//! The event-driven cooperative loop of one core.
//!
//! ## Scheduling Algorithm
//!
//! Each turn of [`Scheduler::run`]:
//! 1. **Dispatch events**: drain the pending queue and move the watchers of
//!    every drained event to the run queue. If nothing woke and the next
//!    deadline has not passed, sleep in `Platform::wait_until` and retry.
//!    That sleep is the only blocking point of the system.
//! 2. **Promote expired timers**: pop the due prefix of the timer list onto
//!    the run queue.
//! 3. **Pick next task**: a task that yielded last turn goes back on the
//!    run queue *behind* everything activated in steps 1 and 2, then the
//!    head is popped.
//! 4. **Run it** and apply the [`Step`] it reports.
//!
//! The loop ends when a task reports `Step::Shutdown`, or when no live task
//! remains.
//!
//! ## Shutdown
//!
//! The requesting task ends as `Exit::Returned(value)`. Every other task
//! alive at that moment is killed in slot order, so its `close` runs and its
//! joiners see `Exit::Cancelled`. Tasks started by those `close` handlers
//! are left queued for a later `run`.
//!
//! ## Ownership
//!
//! One `Scheduler` per core, owned by the code that runs on that core. The
//! only state it shares with interrupt handlers is its `&'static Events`.

use core::task::Poll;

use log::{debug, trace, warn};

use crate::config::MAX_TASKS;
use crate::error::Error;
use crate::event::{EventHandle, Events, PendingQueue};
use crate::kernel::{Kernel, Stats};
use crate::task::{Exit, ExitOf, StateOf, Step, Task, TaskHandle};
use crate::time::{Deadline, Platform, Tick};

// ---------------------------------------------------------------------------
// Scheduler struct
// ---------------------------------------------------------------------------

pub struct Scheduler<T: Task, P: Platform> {
    kernel: Kernel<T>,
    platform: P,
    /// Second half of the pending queue, swapped in by each dispatch pass.
    drained: PendingQueue,
    /// The task that yielded on the previous turn.
    yielded: Option<TaskHandle>,
}

impl<T: Task, P: Platform> Scheduler<T, P> {
    pub fn new(events: &'static Events, platform: P) -> Self {
        let mut kernel = Kernel::new(events);
        kernel.now = platform.now();
        Self {
            kernel,
            platform,
            drained: PendingQueue::new(),
            yielded: None,
        }
    }

    /// Create a task at the run queue tail. It first runs on its turn.
    pub fn start(&mut self, body: T) -> Result<TaskHandle, Error> {
        self.kernel.start(body, None)
    }

    pub fn start_named(&mut self, body: T, name: &'static str) -> Result<TaskHandle, Error> {
        self.kernel.start(body, Some(name))
    }

    /// Wake a suspended or sleeping task. False if it was not waiting.
    pub fn resume(&mut self, task: TaskHandle) -> bool {
        self.kernel.resume(task)
    }

    /// Kill a task, running its `close` handler before returning.
    pub fn kill(&mut self, task: TaskHandle) -> Result<bool, Error> {
        self.kernel.kill(task)
    }

    /// The exit of `task` if it is dead.
    ///
    /// Outside the loop there is no calling task to block, so this never
    /// registers a joiner; tasks join through their `Context`.
    pub fn join(&self, task: TaskHandle) -> Result<Poll<ExitOf<T>>, Error> {
        self.kernel.tasks.state(task)?;
        Ok(match self.kernel.exit(task) {
            Some(exit) => Poll::Ready(exit),
            None => Poll::Pending,
        })
    }

    /// The task whose body is executing. `None` outside a task body.
    pub fn current_task(&self) -> Option<TaskHandle> {
        self.kernel.running
    }

    pub fn state(&self, task: TaskHandle) -> Result<&StateOf<T>, Error> {
        self.kernel.tasks.state(task)
    }

    pub fn is_alive(&self, task: TaskHandle) -> bool {
        self.kernel.is_alive(task)
    }

    pub fn is_waiting(&self, task: TaskHandle) -> bool {
        self.kernel.is_waiting(task)
    }

    pub fn name(&self, task: TaskHandle) -> Option<&'static str> {
        self.kernel.name(task)
    }

    /// Free the slot of a dead task and return how it ended. `Ok(None)` if
    /// the task is still alive.
    pub fn reap(&mut self, task: TaskHandle) -> Result<Option<ExitOf<T>>, Error> {
        self.kernel.tasks.reap(task)
    }

    pub fn live_tasks(&self) -> usize {
        self.kernel.tasks.live()
    }

    /// Tasks waiting to run, head first.
    pub fn run_queue(&self) -> impl Iterator<Item = TaskHandle> + '_ {
        self.kernel.tasks.run_queue()
    }

    /// Sleeping tasks, earliest deadline first.
    pub fn timers(&self) -> impl Iterator<Item = TaskHandle> + '_ {
        self.kernel.tasks.timer_list()
    }

    pub fn events(&self) -> &'static Events {
        self.kernel.events
    }

    pub fn claim_event(&mut self) -> Result<EventHandle, Error> {
        self.kernel.events.claim()
    }

    /// Release `ev`, killing its handler task if it has one. Other watchers
    /// are evicted unresumed; wake them some other way first.
    pub fn release_event(&mut self, ev: EventHandle) -> bool {
        self.kernel.release(ev)
    }

    /// Hand `ev` to non-task context, which frees it with
    /// [`Events::release_abandoned`].
    pub fn abandon_event(&mut self, ev: EventHandle) -> bool {
        self.kernel.abandon(ev)
    }

    pub fn watch(&mut self, ev: EventHandle, task: TaskHandle) -> Result<(), Error> {
        self.kernel.watch(ev, task)
    }

    /// Start `body` as the handler task of `ev`; see [`crate::handler`].
    pub fn handle(&mut self, ev: EventHandle, body: T) -> Result<TaskHandle, Error> {
        self.kernel.handle(ev, body, None)
    }

    pub fn handle_named(&mut self, ev: EventHandle, body: T, name: &'static str) -> Result<TaskHandle, Error> {
        self.kernel.handle(ev, body, Some(name))
    }

    /// The handler task of `ev`, if it has a live one.
    pub fn handler(&self, ev: EventHandle) -> Option<TaskHandle> {
        self.kernel.handlers.get(ev)
    }

    /// Kill the handler task of `ev`. `Ok(false)` if it has none.
    pub fn stop_handler(&mut self, ev: EventHandle) -> Result<bool, Error> {
        self.kernel.stop_handler(ev)
    }

    pub fn unwatch(&mut self, ev: EventHandle, task: TaskHandle) -> bool {
        self.kernel.unwatch(ev, task)
    }

    pub fn now(&self) -> Tick {
        self.platform.now()
    }

    pub fn stats(&self) -> Stats {
        self.kernel.stats
    }

    pub fn platform(&self) -> &P {
        &self.platform
    }

    pub fn platform_mut(&mut self) -> &mut P {
        &mut self.platform
    }

    // -----------------------------------------------------------------------
    // Main loop
    // -----------------------------------------------------------------------

    /// Run tasks until one reports `Step::Shutdown(value)`, which returns
    /// `Some(value)`, or until no live task is left, which returns `None`.
    ///
    /// On shutdown every other live task is killed, so its `close` handler
    /// runs and its joiners see `Exit::Cancelled`.
    pub fn run(&mut self) -> Option<T::Output> {
        loop {
            let deadline = if self.yielded.is_some() || self.kernel.tasks.has_runnable() {
                Deadline::ELAPSED
            } else if let Some(deadline) = self.kernel.tasks.next_deadline() {
                deadline
            } else if self.kernel.tasks.live() == 0 {
                debug!("no live tasks");
                return None;
            } else {
                Deadline::NEVER
            };
            self.dispatch(deadline);

            self.kernel.tasks.promote_expired(self.kernel.now);
            if let Some(task) = self.yielded.take() {
                self.kernel.tasks.requeue(task);
            }
            let Some(task) = self.kernel.tasks.pop_runnable() else {
                continue;
            };

            trace!("run {}", task);
            match self.kernel.run_task(task) {
                Step::Yield => self.yielded = Some(task),
                Step::Suspend => self.kernel.tasks.suspend(task),
                Step::Sleep(deadline) => self.kernel.tasks.sleep(task, deadline),
                Step::Return(value) => self.kernel.finish(task, Exit::Returned(value)),
                Step::Fail(err) => {
                    warn!("{} failed", task);
                    self.kernel.finish(task, Exit::Failed(err));
                }
                Step::Shutdown(value) => {
                    debug!("shutdown requested by {}", task);
                    self.kernel.finish(task, Exit::Returned(value.clone()));
                    self.shutdown();
                    return Some(value);
                }
            }
        }
    }

    /// Drain pending events, resuming their watchers, until something woke
    /// or `deadline` passed. Sleeps on the platform in between.
    fn dispatch(&mut self, deadline: Deadline) {
        let mut woke = deadline == Deadline::ELAPSED;
        self.kernel.stats.dispatches += 1;
        loop {
            self.kernel.events.take_pending(&mut self.drained);
            for &ev in self.drained.iter() {
                trace!("dispatch {}", ev);
                woke |= self.kernel.resume_watchers(ev);
            }
            self.drained.clear();

            self.kernel.now = self.platform.now();
            if woke || deadline.reached(self.kernel.now) {
                return;
            }
            trace!("idle until {}", deadline);
            self.kernel.stats.waits += 1;
            self.platform.wait_until(deadline);
        }
    }

    /// Kill every task alive now, in slot order.
    fn shutdown(&mut self) {
        self.yielded = None;
        let doomed: heapless::Vec<TaskHandle, MAX_TASKS> = self.kernel.tasks.live_tasks().collect();
        for task in doomed {
            // A `close` that already ran may have killed it.
            if let Err(err) = self.kernel.kill(task) {
                unreachable!("killing {} at shutdown: {}", task, err);
            }
        }
    }
}
