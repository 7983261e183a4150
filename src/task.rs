//! # Task Table
//!
//! Task model for EvOS. A task is an opaque resumable body plus the
//! scheduling metadata kept next to it in a fixed arena.
//!
//! ## State machine
//!
//! ```text
//!               Step::Suspend              resume()
//!   ┌────────┐ ───────────────► ┌───────────┐ ──────┐
//!   │ Active │                  │ Suspended │       │
//!   └────────┘ ◄─────────────── └───────────┘ ◄─────┘
//!     │  ▲  │        resume() / event
//!     │  │  │ Step::Sleep(d)     ┌──────────┐
//!     │  │  └──────────────────► │ Timer(d) │
//!     │  └────────────────────── └──────────┘
//!     │     deadline / resume() / event
//!     ▼
//!   ┌──────┐   Return, Fail, kill() from any state
//!   │ Dead │
//!   └──────┘
//! ```
//!
//! ## Lists
//!
//! The run queue (FIFO) and the timer list (ascending deadline) are threaded
//! through the arena: each slot carries one `next` index and a marker saying
//! which list, if any, it is on. Pushing a slot that is already linked is an
//! invariant violation and panics, so a task can never be on both lists.

use core::fmt;
use core::iter;

use crate::config::{MAX_JOINERS, MAX_TASKS};
use crate::error::Error;
use crate::kernel::Context;
use crate::time::{Deadline, Tick};
use crate::watch::TaskSet;

// ---------------------------------------------------------------------------
// Handles and states
// ---------------------------------------------------------------------------

/// A generation-checked reference to a task slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TaskHandle {
    index: u16,
    generation: u16,
}

impl TaskHandle {
    pub(crate) const fn new(index: usize, generation: u16) -> Self {
        Self {
            index: index as u16,
            generation,
        }
    }

    /// Slot index inside the task arena.
    #[inline]
    pub fn index(self) -> usize {
        self.index as usize
    }
}

impl fmt::Display for TaskHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "task{}.{}", self.index, self.generation)
    }
}

/// How a task ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Exit<O, E> {
    /// The body returned a value.
    Returned(O),
    /// The body failed.
    Failed(E),
    /// Killed, or still alive when another task requested shutdown.
    Cancelled,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskState<O, E> {
    /// Running, or waiting in the run queue.
    Active,
    /// Blocked until an external `resume`.
    Suspended,
    /// Blocked until the deadline or an external `resume`.
    Timer(Deadline),
    /// Terminal.
    Dead(Exit<O, E>),
}

impl<O, E> TaskState<O, E> {
    pub fn is_dead(&self) -> bool {
        matches!(self, TaskState::Dead(_))
    }

    pub fn is_waiting(&self) -> bool {
        matches!(self, TaskState::Suspended | TaskState::Timer(_))
    }
}

/// What a task body reports when it gives control back.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Step<O, E> {
    /// Stay active and run again after every other runnable task.
    Yield,
    /// Block until resumed.
    Suspend,
    /// Block until the deadline passes or until resumed.
    Sleep(Deadline),
    /// Finish with a value.
    Return(O),
    /// Finish with an error.
    Fail(E),
    /// Finish with a value and stop the scheduler loop, which returns it.
    /// Every other live task is killed.
    Shutdown(O),
}

impl<O, E> Step<O, E> {
    /// Block, optionally with a deadline. `Deadline::NEVER` is the same as
    /// no deadline.
    pub fn suspend(deadline: Option<Deadline>) -> Self {
        match deadline {
            Some(deadline) if !deadline.is_never() => Step::Sleep(deadline),
            _ => Step::Suspend,
        }
    }
}

/// A resumable task body.
///
/// `resume` runs one slice of the task and reports how it gave control
/// back. It must not block: anything that waits returns `Step::Suspend` or
/// `Step::Sleep` and re-checks its condition when resumed, since resumes
/// can be spurious.
pub trait Task: Sized {
    type Output: Clone;
    type Error: Clone;

    fn resume(&mut self, cx: &mut Context<'_, Self>) -> Step<Self::Output, Self::Error>;

    /// Cleanup when the task is killed. Runs synchronously inside `kill`,
    /// after the task has been marked dead.
    fn close(&mut self, cx: &mut Context<'_, Self>) {
        let _ = cx;
    }
}

pub type ExitOf<T> = Exit<<T as Task>::Output, <T as Task>::Error>;
pub type StateOf<T> = TaskState<<T as Task>::Output, <T as Task>::Error>;

// ---------------------------------------------------------------------------
// Arena
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum List {
    Run,
    Timer,
}

pub(crate) struct Entry<T: Task> {
    pub state: StateOf<T>,
    /// Taken out while the body runs or while it is being closed.
    pub body: Option<T>,
    pub joiners: TaskSet<MAX_JOINERS>,
    pub name: Option<&'static str>,
}

struct Slot<T: Task> {
    generation: u16,
    next: Option<u16>,
    on: Option<List>,
    entry: Option<Entry<T>>,
}

pub(crate) struct TaskTable<T: Task> {
    slots: [Slot<T>; MAX_TASKS],
    run_head: Option<u16>,
    run_tail: Option<u16>,
    timers: Option<u16>,
    live: usize,
}

impl<T: Task> TaskTable<T> {
    pub fn new() -> Self {
        Self {
            slots: core::array::from_fn(|_| Slot {
                generation: 0,
                next: None,
                on: None,
                entry: None,
            }),
            run_head: None,
            run_tail: None,
            timers: None,
            live: 0,
        }
    }

    /// Number of tasks that are not dead.
    pub fn live(&self) -> usize {
        self.live
    }

    /// Allocate an active task at the tail of the run queue.
    ///
    /// Takes the first empty slot. Dead tasks keep theirs until reaped, so
    /// their joiners can always collect the exit.
    pub fn insert(&mut self, body: T, name: Option<&'static str>) -> Result<TaskHandle, Error> {
        let index = self
            .slots
            .iter()
            .position(|slot| slot.entry.is_none())
            .ok_or(Error::NoTaskSlots)?;
        let slot = &mut self.slots[index];
        slot.entry = Some(Entry {
            state: TaskState::Active,
            body: Some(body),
            joiners: TaskSet::None,
            name,
        });
        let handle = TaskHandle::new(index, slot.generation);
        self.live += 1;
        self.push_run(index as u16);
        Ok(handle)
    }

    pub fn entry(&self, task: TaskHandle) -> Result<&Entry<T>, Error> {
        self.slots
            .get(task.index())
            .filter(|slot| slot.generation == task.generation)
            .and_then(|slot| slot.entry.as_ref())
            .ok_or(Error::StaleTask)
    }

    pub fn entry_mut(&mut self, task: TaskHandle) -> Result<&mut Entry<T>, Error> {
        self.slots
            .get_mut(task.index())
            .filter(|slot| slot.generation == task.generation)
            .and_then(|slot| slot.entry.as_mut())
            .ok_or(Error::StaleTask)
    }

    pub fn state(&self, task: TaskHandle) -> Result<&StateOf<T>, Error> {
        self.entry(task).map(|entry| &entry.state)
    }

    pub fn has_runnable(&self) -> bool {
        self.run_head.is_some()
    }

    /// Pop the run queue until an active task comes up.
    pub fn pop_runnable(&mut self) -> Option<TaskHandle> {
        while let Some(index) = self.pop_run() {
            let slot = &self.slots[index as usize];
            match slot.entry.as_ref().map(|entry| &entry.state) {
                Some(TaskState::Active) => {
                    return Some(TaskHandle::new(index as usize, slot.generation));
                }
                Some(TaskState::Dead(_)) => continue,
                _ => unreachable!("task{} queued but not active", index),
            }
        }
        None
    }

    /// Move a suspended or sleeping task to the run queue tail.
    pub fn activate(&mut self, task: TaskHandle) -> bool {
        let Ok(entry) = self.entry_mut(task) else {
            return false;
        };
        if !entry.state.is_waiting() {
            return false;
        }
        entry.state = TaskState::Active;
        let index = task.index;
        self.unlink(index);
        self.push_run(index);
        true
    }

    /// Put the task that just ran back on the run queue, if it is still
    /// active and not already queued.
    pub fn requeue(&mut self, task: TaskHandle) {
        let queued = self.slots[task.index()].on.is_some();
        if !queued && matches!(self.state(task), Ok(TaskState::Active)) {
            self.push_run(task.index);
        }
    }

    /// Block the task that just ran until it is resumed.
    pub fn suspend(&mut self, task: TaskHandle) {
        let Ok(entry) = self.entry_mut(task) else {
            return;
        };
        debug_assert!(matches!(entry.state, TaskState::Active));
        entry.state = TaskState::Suspended;
        self.unlink(task.index);
    }

    /// Block the task that just ran until `deadline` or until resumed.
    pub fn sleep(&mut self, task: TaskHandle, deadline: Deadline) {
        if deadline.is_never() {
            return self.suspend(task);
        }
        let Ok(entry) = self.entry_mut(task) else {
            return;
        };
        entry.state = TaskState::Timer(deadline);
        self.unlink(task.index);
        self.insert_timer(task.index, deadline);
    }

    /// Mark a task dead, unlink it and drop its body. Returns its joiners.
    pub fn retire(&mut self, task: TaskHandle, exit: ExitOf<T>) -> TaskSet<MAX_JOINERS> {
        let Ok(entry) = self.entry_mut(task) else {
            return TaskSet::None;
        };
        debug_assert!(!entry.state.is_dead(), "{} retired twice", task);
        entry.state = TaskState::Dead(exit);
        entry.body = None;
        let joiners = entry.joiners.take();
        self.live -= 1;
        self.unlink(task.index);
        joiners
    }

    /// Drop `task` from every joiner set.
    pub fn forget_joiner(&mut self, task: TaskHandle) {
        for entry in self.slots.iter_mut().filter_map(|slot| slot.entry.as_mut()) {
            entry.joiners.remove(task);
        }
    }

    /// Free the slot of a dead task, returning how it ended.
    ///
    /// A live task is left untouched and yields `Ok(None)`.
    pub fn reap(&mut self, task: TaskHandle) -> Result<Option<ExitOf<T>>, Error> {
        if !self.state(task)?.is_dead() {
            return Ok(None);
        }
        let slot = &mut self.slots[task.index()];
        slot.generation = slot.generation.wrapping_add(1);
        match slot.entry.take().map(|entry| entry.state) {
            Some(TaskState::Dead(exit)) => Ok(Some(exit)),
            _ => unreachable!("{} reaped while alive", task),
        }
    }

    /// Earliest deadline on the timer list.
    pub fn next_deadline(&self) -> Option<Deadline> {
        self.timers.map(|index| self.deadline_of(index))
    }

    /// Move every task whose deadline has passed to the run queue tail, in
    /// deadline order.
    pub fn promote_expired(&mut self, now: Tick) -> usize {
        let mut promoted = 0;
        while let Some(head) = self.timers {
            if !self.deadline_of(head).reached(now) {
                break;
            }
            self.unlink(head);
            if let Some(entry) = self.slots[head as usize].entry.as_mut() {
                entry.state = TaskState::Active;
            }
            self.push_run(head);
            promoted += 1;
        }
        promoted
    }

    /// Every task that is not dead, in slot order.
    pub fn live_tasks(&self) -> impl Iterator<Item = TaskHandle> + '_ {
        self.slots.iter().enumerate().filter_map(|(index, slot)| {
            let entry = slot.entry.as_ref()?;
            (!entry.state.is_dead()).then(|| TaskHandle::new(index, slot.generation))
        })
    }

    pub fn run_queue(&self) -> impl Iterator<Item = TaskHandle> + '_ {
        self.walk(self.run_head)
    }

    pub fn timer_list(&self) -> impl Iterator<Item = TaskHandle> + '_ {
        self.walk(self.timers)
    }

    // -- list plumbing --------------------------------------------------

    fn walk(&self, head: Option<u16>) -> impl Iterator<Item = TaskHandle> + '_ {
        iter::successors(head, |&index| self.slots[index as usize].next)
            .map(|index| TaskHandle::new(index as usize, self.slots[index as usize].generation))
    }

    fn deadline_of(&self, index: u16) -> Deadline {
        match self.slots[index as usize].entry.as_ref().map(|entry| &entry.state) {
            Some(TaskState::Timer(deadline)) => *deadline,
            _ => unreachable!("task{} on timer list without a deadline", index),
        }
    }

    fn push_run(&mut self, index: u16) {
        let slot = &mut self.slots[index as usize];
        assert!(slot.on.is_none(), "task{} is already linked", index);
        slot.on = Some(List::Run);
        slot.next = None;
        match self.run_tail {
            Some(tail) => self.slots[tail as usize].next = Some(index),
            None => self.run_head = Some(index),
        }
        self.run_tail = Some(index);
    }

    fn pop_run(&mut self) -> Option<u16> {
        let head = self.run_head?;
        self.unlink(head);
        Some(head)
    }

    /// Sorted insert; equal deadlines keep insertion order.
    fn insert_timer(&mut self, index: u16, deadline: Deadline) {
        assert!(
            self.slots[index as usize].on.is_none(),
            "task{} is already linked",
            index
        );
        let mut prev = None;
        let mut cursor = self.timers;
        while let Some(at) = cursor {
            if self.deadline_of(at) > deadline {
                break;
            }
            prev = Some(at);
            cursor = self.slots[at as usize].next;
        }
        let slot = &mut self.slots[index as usize];
        slot.on = Some(List::Timer);
        slot.next = cursor;
        match prev {
            Some(prev) => self.slots[prev as usize].next = Some(index),
            None => self.timers = Some(index),
        }
    }

    /// Remove a slot from whichever list holds it. No-op if unlinked.
    fn unlink(&mut self, index: u16) {
        let Some(list) = self.slots[index as usize].on else {
            return;
        };
        let head = match list {
            List::Run => self.run_head,
            List::Timer => self.timers,
        };
        let mut prev = None;
        let mut cursor = head;
        while let Some(at) = cursor {
            if at == index {
                break;
            }
            prev = Some(at);
            cursor = self.slots[at as usize].next;
        }
        if cursor.is_none() {
            unreachable!("task{} marked {:?}-linked but not found", index, list);
        }

        let slot = &mut self.slots[index as usize];
        let next = slot.next.take();
        slot.on = None;
        match (prev, list) {
            (Some(prev), _) => self.slots[prev as usize].next = next,
            (None, List::Run) => self.run_head = next,
            (None, List::Timer) => self.timers = next,
        }
        if list == List::Run && self.run_tail == Some(index) {
            self.run_tail = prev;
        }
    }
}
