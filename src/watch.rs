//! # Watcher Map
//!
//! Which tasks wait on which event, and which tasks join which task.
//!
//! Both relations use [`TaskSet`]: almost every event has a single watcher
//! and almost every task at most one joiner, so the set stays a single
//! handle until a second distinct task shows up.

use core::mem;
use core::slice;

use heapless::Vec;

use crate::config::{MAX_EVENTS, MAX_WATCHERS};
use crate::error::Error;
use crate::event::{EventHandle, Events};
use crate::task::TaskHandle;

/// A [`TaskSet`] is at capacity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Full;

/// A small insertion-ordered set of tasks.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum TaskSet<const N: usize> {
    #[default]
    None,
    One(TaskHandle),
    Many(Vec<TaskHandle, N>),
}

impl<const N: usize> TaskSet<N> {
    /// Add `task`. Returns false if it was already present.
    pub fn insert(&mut self, task: TaskHandle) -> Result<bool, Full> {
        match self {
            TaskSet::None => {
                *self = TaskSet::One(task);
                Ok(true)
            }
            TaskSet::One(first) if *first == task => Ok(false),
            TaskSet::One(first) => {
                let mut many = Vec::new();
                many.push(*first).map_err(|_| Full)?;
                many.push(task).map_err(|_| Full)?;
                *self = TaskSet::Many(many);
                Ok(true)
            }
            TaskSet::Many(many) if many.contains(&task) => Ok(false),
            TaskSet::Many(many) => {
                many.push(task).map_err(|_| Full)?;
                Ok(true)
            }
        }
    }

    /// Remove `task`. Returns false if it was not present.
    pub fn remove(&mut self, task: TaskHandle) -> bool {
        match self {
            TaskSet::One(only) if *only == task => {
                *self = TaskSet::None;
                true
            }
            TaskSet::Many(many) if many.contains(&task) => {
                let rest: Vec<TaskHandle, N> = mem::take(many)
                    .into_iter()
                    .filter(|&other| other != task)
                    .collect();
                *self = match rest.as_slice() {
                    [] => TaskSet::None,
                    [only] => TaskSet::One(*only),
                    _ => TaskSet::Many(rest),
                };
                true
            }
            _ => false,
        }
    }

    pub fn contains(&self, task: TaskHandle) -> bool {
        self.as_slice().contains(&task)
    }

    pub fn is_empty(&self) -> bool {
        self.as_slice().is_empty()
    }

    pub fn len(&self) -> usize {
        self.as_slice().len()
    }

    /// Members in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = TaskHandle> + '_ {
        self.as_slice().iter().copied()
    }

    /// Empty the set, returning its previous contents.
    pub fn take(&mut self) -> Self {
        mem::take(self)
    }

    fn as_slice(&self) -> &[TaskHandle] {
        match self {
            TaskSet::None => &[],
            TaskSet::One(task) => slice::from_ref(task),
            TaskSet::Many(many) => many.as_slice(),
        }
    }
}

// ---------------------------------------------------------------------------
// Event -> watchers
// ---------------------------------------------------------------------------

pub(crate) type Watchers = TaskSet<MAX_WATCHERS>;

/// Watcher sets indexed by event slot.
///
/// Only enabled events have non-empty sets: `watch` refuses anything else,
/// and releasing or abandoning an event evicts its set.
pub(crate) struct WatcherMap {
    sets: [Watchers; MAX_EVENTS],
}

impl WatcherMap {
    pub fn new() -> Self {
        Self {
            sets: core::array::from_fn(|_| TaskSet::None),
        }
    }

    /// Register `task` on `ev`. Returns false if it already was.
    pub fn watch(&mut self, events: &Events, ev: EventHandle, task: TaskHandle) -> Result<bool, Error> {
        if !events.is_enabled(ev) {
            return Err(Error::EventDisabled);
        }
        self.sets[ev.index()]
            .insert(task)
            .map_err(|Full| Error::TooManyWatchers)
    }

    /// Drop the registration, if any. Disabled events have none.
    pub fn unwatch(&mut self, events: &Events, ev: EventHandle, task: TaskHandle) -> bool {
        events.is_enabled(ev) && self.sets[ev.index()].remove(task)
    }

    /// Drop every watcher of the slot without resuming them.
    pub fn evict(&mut self, ev: EventHandle) -> Watchers {
        self.sets[ev.index()].take()
    }

    /// Remove `task` from every watcher set.
    pub fn forget(&mut self, task: TaskHandle) {
        for set in self.sets.iter_mut() {
            set.remove(task);
        }
    }

    #[cfg(test)]
    pub fn watchers(&self, ev: EventHandle) -> &Watchers {
        &self.sets[ev.index()]
    }

    /// Call `resume` for each watcher of `ev` in registration order.
    ///
    /// Registrations are kept; a waiting task unwatches when it is done.
    /// Returns true iff at least one call returned true.
    pub fn resume_watchers<F>(&self, ev: EventHandle, mut resume: F) -> bool
    where
        F: FnMut(TaskHandle) -> bool,
    {
        self.sets[ev.index()]
            .iter()
            .fold(false, |woke, task| resume(task) | woke)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn task(index: usize) -> TaskHandle {
        TaskHandle::new(index, 0)
    }

    fn nop() {}

    #[test]
    fn test_set_promotes_and_demotes() {
        let mut set: TaskSet<4> = TaskSet::None;
        assert_eq!(set.insert(task(1)), Ok(true));
        assert_eq!(set, TaskSet::One(task(1)));
        assert_eq!(set.insert(task(1)), Ok(false));
        assert_eq!(set.insert(task(2)), Ok(true));
        assert!(matches!(set, TaskSet::Many(_)));
        assert_eq!(set.len(), 2);

        assert!(set.remove(task(1)));
        assert_eq!(set, TaskSet::One(task(2)));
        assert!(!set.remove(task(1)));
        assert!(set.remove(task(2)));
        assert!(set.is_empty());
    }

    #[test]
    fn test_set_keeps_insertion_order() {
        let mut set: TaskSet<4> = TaskSet::None;
        for i in [3, 1, 2] {
            set.insert(task(i)).unwrap();
        }
        set.remove(task(1));
        set.insert(task(0)).unwrap();
        let order: std::vec::Vec<_> = set.iter().map(TaskHandle::index).collect();
        assert_eq!(order, [3, 2, 0]);
    }

    #[test]
    fn test_set_capacity() {
        let mut set: TaskSet<2> = TaskSet::None;
        set.insert(task(0)).unwrap();
        set.insert(task(1)).unwrap();
        assert_eq!(set.insert(task(2)), Err(Full));
        assert_eq!(set.insert(task(1)), Ok(false));
    }

    #[test]
    fn test_watch_requires_enabled_event() {
        let events = Events::new(nop);
        let mut map = WatcherMap::new();
        let ev = events.claim().unwrap();
        assert_eq!(map.watch(&events, ev, task(0)), Ok(true));
        assert_eq!(map.watch(&events, ev, task(0)), Ok(false));

        events.release(ev);
        map.evict(ev);
        assert_eq!(map.watch(&events, ev, task(0)), Err(Error::EventDisabled));
        assert!(!map.unwatch(&events, ev, task(0)));
    }

    #[test]
    fn test_too_many_watchers() {
        let events = Events::new(nop);
        let mut map = WatcherMap::new();
        let ev = events.claim().unwrap();
        for i in 0..MAX_WATCHERS {
            map.watch(&events, ev, task(i)).unwrap();
        }
        assert_eq!(
            map.watch(&events, ev, task(MAX_WATCHERS)),
            Err(Error::TooManyWatchers)
        );
    }

    #[test]
    fn test_resume_watchers_visits_all() {
        let events = Events::new(nop);
        let mut map = WatcherMap::new();
        let ev = events.claim().unwrap();
        let quiet = events.claim().unwrap();
        map.watch(&events, ev, task(4)).unwrap();
        map.watch(&events, ev, task(7)).unwrap();

        let mut seen = std::vec::Vec::new();
        // The first watcher refuses; the second must still be visited.
        let woke = map.resume_watchers(ev, |t| {
            seen.push(t.index());
            t.index() == 7
        });
        assert!(woke);
        assert_eq!(seen, [4, 7]);
        assert!(!map.resume_watchers(quiet, |_| true));
        assert!(!map.resume_watchers(ev, |_| false));
    }

    #[test]
    fn test_forget_removes_task_everywhere() {
        let events = Events::new(nop);
        let mut map = WatcherMap::new();
        let a = events.claim().unwrap();
        let b = events.claim().unwrap();
        map.watch(&events, a, task(1)).unwrap();
        map.watch(&events, b, task(1)).unwrap();
        map.watch(&events, b, task(2)).unwrap();

        map.forget(task(1));
        assert!(map.watchers(a).is_empty());
        assert_eq!(*map.watchers(b), TaskSet::One(task(2)));
    }
}
