//! # Kernel
//!
//! Task lifecycle and watcher bookkeeping for one core, plus the
//! [`Context`] handed to a task body while it runs.
//!
//! The kernel owns the task table and the watcher map outright. Nothing in
//! here is touched from interrupt context; the only shared state is the
//! `'static` event registry, which does its own locking.
//!
//! ## Lifecycle operations
//!
//! ```text
//! start()  ─► Active, run queue tail
//! resume() ─► Suspended / Timer(d) → Active, run queue tail
//! kill()   ─► Dead(Cancelled), unlinked, close() runs, joiners resumed
//! join()   ─► Ready(exit) if dead, else register joiner and stay Pending
//! handle() ─► start() + watch(ev), remembered as the handler of ev
//! ```

use core::task::Poll;

use log::debug;

use crate::config::MAX_JOINERS;
use crate::error::Error;
use crate::event::{EventHandle, Events};
use crate::handler::Handlers;
use crate::task::{Exit, ExitOf, StateOf, Step, Task, TaskHandle, TaskState, TaskTable};
use crate::time::{Deadline, Tick};
use crate::watch::{TaskSet, WatcherMap};

/// Scheduler counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Stats {
    /// Dispatch passes run by the scheduler loop.
    pub dispatches: u64,
    /// Times the loop slept in `Platform::wait_until`.
    pub waits: u64,
    /// Waiting tasks moved to the run queue by `resume`, an event, or the
    /// death of a joined task. Expired timers are not counted.
    pub resumes: u64,
}

pub(crate) struct Kernel<T: Task> {
    pub tasks: TaskTable<T>,
    pub watchers: WatcherMap,
    pub handlers: Handlers,
    pub events: &'static Events,
    /// The task whose body is executing, if any.
    pub running: Option<TaskHandle>,
    /// Platform time sampled by the last dispatch pass.
    pub now: Tick,
    pub stats: Stats,
}

impl<T: Task> Kernel<T> {
    pub fn new(events: &'static Events) -> Self {
        Self {
            tasks: TaskTable::new(),
            watchers: WatcherMap::new(),
            handlers: Handlers::new(),
            events,
            running: None,
            now: Tick(0),
            stats: Stats::default(),
        }
    }

    pub fn start(&mut self, body: T, name: Option<&'static str>) -> Result<TaskHandle, Error> {
        let task = self.tasks.insert(body, name)?;
        debug!("start {} ({})", task, name.unwrap_or("-"));
        Ok(task)
    }

    pub fn resume(&mut self, task: TaskHandle) -> bool {
        let resumed = self.tasks.activate(task);
        if resumed {
            self.stats.resumes += 1;
        }
        resumed
    }

    /// Kill `task`, running its `close` handler before returning.
    ///
    /// Returns false if it was already dead.
    pub fn kill(&mut self, task: TaskHandle) -> Result<bool, Error> {
        if self.running == Some(task) {
            return Err(Error::SelfKill);
        }
        let entry = self.tasks.entry_mut(task)?;
        if entry.state.is_dead() {
            return Ok(false);
        }
        let body = entry.body.take();
        let joiners = self.retire(task, Exit::Cancelled);
        debug!("kill {}", task);

        if let Some(mut body) = body {
            let mut cx = Context {
                kernel: self,
                current: task,
            };
            body.close(&mut cx);
        }
        for joiner in joiners.iter() {
            self.resume(joiner);
        }
        Ok(true)
    }

    /// Record the normal end of the task that just ran.
    pub fn finish(&mut self, task: TaskHandle, exit: ExitOf<T>) {
        let joiners = self.retire(task, exit);
        for joiner in joiners.iter() {
            self.resume(joiner);
        }
    }

    /// Mark dead, unlink, and drop every relation naming the task.
    fn retire(&mut self, task: TaskHandle, exit: ExitOf<T>) -> TaskSet<MAX_JOINERS> {
        debug!(
            "{} dead ({})",
            task,
            match &exit {
                Exit::Returned(_) => "returned",
                Exit::Failed(_) => "failed",
                Exit::Cancelled => "cancelled",
            }
        );
        let joiners = self.tasks.retire(task, exit);
        self.watchers.forget(task);
        self.handlers.forget(task);
        self.tasks.forget_joiner(task);
        joiners
    }

    /// Ready with the exit of a dead `task`; otherwise registers `joiner`
    /// to be resumed when it dies.
    pub fn join(&mut self, task: TaskHandle, joiner: TaskHandle) -> Result<Poll<ExitOf<T>>, Error> {
        if task == joiner {
            return Err(Error::SelfJoin);
        }
        if let TaskState::Dead(exit) = self.tasks.state(task)? {
            return Ok(Poll::Ready(exit.clone()));
        }
        // A task running its `close` is already dead.
        if !self.is_alive(joiner) {
            return Err(Error::DeadTask);
        }
        self.tasks
            .entry_mut(task)?
            .joiners
            .insert(joiner)
            .map_err(|_| Error::TooManyJoiners)?;
        Ok(Poll::Pending)
    }

    pub fn watch(&mut self, ev: EventHandle, task: TaskHandle) -> Result<(), Error> {
        if self.tasks.state(task)?.is_dead() {
            return Err(Error::DeadTask);
        }
        self.watchers.watch(self.events, ev, task)?;
        Ok(())
    }

    pub fn unwatch(&mut self, ev: EventHandle, task: TaskHandle) -> bool {
        self.watchers.unwatch(self.events, ev, task)
    }

    /// Start `body` as the handler task of `ev`. It watches `ev` from the
    /// start, before its first turn.
    pub fn handle(&mut self, ev: EventHandle, body: T, name: Option<&'static str>) -> Result<TaskHandle, Error> {
        if !self.events.is_enabled(ev) {
            return Err(Error::EventDisabled);
        }
        if self.handlers.get(ev).is_some() {
            return Err(Error::AlreadyHandled);
        }
        let task = self.tasks.insert(body, name)?;
        if let Err(err) = self.watchers.watch(self.events, ev, task) {
            // It never ran, so it is dropped without `close`.
            self.tasks.retire(task, Exit::Cancelled);
            self.tasks.reap(task)?;
            return Err(err);
        }
        self.handlers.insert(ev, task);
        debug!("{} handles {}", task, ev);
        Ok(task)
    }

    /// Kill the handler task of `ev`. False if it has none.
    pub fn stop_handler(&mut self, ev: EventHandle) -> Result<bool, Error> {
        match self.handlers.get(ev) {
            Some(task) => self.kill(task),
            None => Ok(false),
        }
    }

    /// Stop the handler of an event about to go away. A handler releasing
    /// its own event only loses the registration.
    fn drop_handler(&mut self, ev: EventHandle) {
        let Some(task) = self.handlers.get(ev) else {
            return;
        };
        if self.running == Some(task) {
            self.handlers.forget(task);
        } else if let Err(err) = self.kill(task) {
            unreachable!("stopping handler {}: {}", task, err);
        }
    }

    /// Release `ev`. Its handler task is killed first; other watchers are
    /// evicted without being resumed.
    pub fn release(&mut self, ev: EventHandle) -> bool {
        self.drop_handler(ev);
        if !self.events.release(ev) {
            return false;
        }
        let evicted = self.watchers.evict(ev);
        if !evicted.is_empty() {
            debug!("{} released with {} watcher(s)", ev, evicted.len());
        }
        true
    }

    pub fn abandon(&mut self, ev: EventHandle) -> bool {
        self.drop_handler(ev);
        if !self.events.abandon(ev) {
            return false;
        }
        self.watchers.evict(ev);
        true
    }

    /// Move every watcher of a drained event to the run queue.
    pub fn resume_watchers(&mut self, ev: EventHandle) -> bool {
        let tasks = &mut self.tasks;
        let stats = &mut self.stats;
        self.watchers.resume_watchers(ev, |task| {
            let resumed = tasks.activate(task);
            if resumed {
                stats.resumes += 1;
            }
            resumed
        })
    }

    pub fn is_alive(&self, task: TaskHandle) -> bool {
        self.tasks.state(task).is_ok_and(|state| !state.is_dead())
    }

    pub fn is_waiting(&self, task: TaskHandle) -> bool {
        self.tasks.state(task).is_ok_and(|state| state.is_waiting())
    }

    pub fn name(&self, task: TaskHandle) -> Option<&'static str> {
        self.tasks.entry(task).ok().and_then(|entry| entry.name)
    }

    pub fn exit(&self, task: TaskHandle) -> Option<ExitOf<T>> {
        match self.tasks.state(task) {
            Ok(TaskState::Dead(exit)) => Some(exit.clone()),
            _ => None,
        }
    }

    /// Run one slice of `task`.
    pub fn run_task(&mut self, task: TaskHandle) -> Step<T::Output, T::Error> {
        let body = self.tasks.entry_mut(task).ok().and_then(|entry| entry.body.take());
        let Some(mut body) = body else {
            unreachable!("runnable {} has no body", task);
        };
        debug_assert!(self.running.is_none(), "nested task run");
        self.running = Some(task);
        let step = body.resume(&mut Context {
            kernel: self,
            current: task,
        });
        self.running = None;
        if let Ok(entry) = self.tasks.entry_mut(task) {
            entry.body = Some(body);
        }
        step
    }
}

// ---------------------------------------------------------------------------
// Task context
// ---------------------------------------------------------------------------

/// What a task body can do to the scheduler while it runs.
///
/// Operations that would make the task act on itself in ways the
/// cooperative model cannot express (killing or joining itself) fail
/// synchronously.
pub struct Context<'a, T: Task> {
    kernel: &'a mut Kernel<T>,
    current: TaskHandle,
}

impl<'a, T: Task> Context<'a, T> {
    /// The task this context belongs to.
    pub fn current(&self) -> TaskHandle {
        self.current
    }

    pub fn now(&self) -> Tick {
        self.kernel.now
    }

    /// The deadline `ticks` from now.
    pub fn after(&self, ticks: u64) -> Deadline {
        Deadline::after(self.kernel.now, ticks)
    }

    pub fn events(&self) -> &'static Events {
        self.kernel.events
    }

    pub fn start(&mut self, body: T) -> Result<TaskHandle, Error> {
        self.kernel.start(body, None)
    }

    pub fn start_named(&mut self, body: T, name: &'static str) -> Result<TaskHandle, Error> {
        self.kernel.start(body, Some(name))
    }

    /// Wake a suspended or sleeping task. False if it was not waiting.
    pub fn resume(&mut self, task: TaskHandle) -> bool {
        task != self.current && self.kernel.resume(task)
    }

    pub fn kill(&mut self, task: TaskHandle) -> Result<bool, Error> {
        if task == self.current {
            return Err(Error::SelfKill);
        }
        self.kernel.kill(task)
    }

    /// Join `task`.
    ///
    /// On `Pending` the caller is registered as a joiner and should return
    /// `Step::Suspend`, then call `join` again when resumed.
    pub fn join(&mut self, task: TaskHandle) -> Result<Poll<ExitOf<T>>, Error> {
        self.kernel.join(task, self.current)
    }

    pub fn is_alive(&self, task: TaskHandle) -> bool {
        self.kernel.is_alive(task)
    }

    pub fn is_waiting(&self, task: TaskHandle) -> bool {
        self.kernel.is_waiting(task)
    }

    pub fn state(&self, task: TaskHandle) -> Result<&StateOf<T>, Error> {
        self.kernel.tasks.state(task)
    }

    pub fn name(&self, task: TaskHandle) -> Option<&'static str> {
        self.kernel.name(task)
    }

    pub fn claim_event(&mut self) -> Result<EventHandle, Error> {
        self.kernel.events.claim()
    }

    pub fn release_event(&mut self, ev: EventHandle) -> bool {
        self.kernel.release(ev)
    }

    pub fn abandon_event(&mut self, ev: EventHandle) -> bool {
        self.kernel.abandon(ev)
    }

    /// Start `body` as the handler task of `ev`; see [`crate::handler`].
    pub fn handle(&mut self, ev: EventHandle, body: T) -> Result<TaskHandle, Error> {
        self.kernel.handle(ev, body, None)
    }

    pub fn handler(&self, ev: EventHandle) -> Option<TaskHandle> {
        self.kernel.handlers.get(ev)
    }

    pub fn stop_handler(&mut self, ev: EventHandle) -> Result<bool, Error> {
        self.kernel.stop_handler(ev)
    }

    /// Resume the current task when `ev` becomes pending.
    pub fn watch(&mut self, ev: EventHandle) -> Result<(), Error> {
        self.kernel.watch(ev, self.current)
    }

    pub fn unwatch(&mut self, ev: EventHandle) -> bool {
        self.kernel.unwatch(ev, self.current)
    }

    /// One step of waiting on several events for a condition.
    ///
    /// `poll` is checked first. If it has no answer and `deadline` has not
    /// passed, the current task watches every event in `events` and the
    /// caller should return `Step::suspend(Some(deadline))`, calling `wait`
    /// again with the same arguments when resumed. Once `poll` answers
    /// (`Ready(Some(_))`) or the deadline passes (`Ready(None)`), the
    /// registrations are dropped.
    ///
    /// Waiting on an event that is not enabled is [`Error::EventDisabled`].
    pub fn wait<R, F>(
        &mut self,
        events: &[EventHandle],
        deadline: Deadline,
        mut poll: F,
    ) -> Result<Poll<Option<R>>, Error>
    where
        F: FnMut() -> Option<R>,
    {
        if let Some(&disabled) = events.iter().find(|&&ev| !self.kernel.events.is_enabled(ev)) {
            debug!("{} waits on disabled {}", self.current, disabled);
            self.unwatch_all(events);
            return Err(Error::EventDisabled);
        }
        if let Some(ready) = poll() {
            self.unwatch_all(events);
            return Ok(Poll::Ready(Some(ready)));
        }
        if deadline.reached(self.kernel.now) {
            self.unwatch_all(events);
            return Ok(Poll::Ready(None));
        }
        for &ev in events {
            if let Err(err) = self.watch(ev) {
                self.unwatch_all(events);
                return Err(err);
            }
        }
        Ok(Poll::Pending)
    }

    fn unwatch_all(&mut self, events: &[EventHandle]) {
        for &ev in events {
            self.unwatch(ev);
        }
    }
}
