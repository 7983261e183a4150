//! # Event Registry
//!
//! A fixed table of event slots plus the interrupt-safe queue of events that
//! just became pending. This is the only state shared between interrupt
//! handlers and the scheduler loop.
//!
//! ## Slot lifecycle
//!
//! ```text
//!              claim()                     abandon()
//!   ┌──────┐ ──────────► ┌─────────┐ ─────────────────► ┌───────────┐
//!   │ Free │             │ Enabled │                    │ Abandoned │
//!   └──────┘ ◄────────── └─────────┘                    └───────────┘
//!      ▲       release()      │ ▲  set_pending()              │
//!      │                      ▼ │  drain                      │
//!      │                  (pending)                           │
//!      └──────────────────────────────────────────────────────┘
//!                        release_abandoned()
//! ```
//!
//! Every return to `Free` bumps the slot generation, so handles held by a
//! driver after release go stale instead of aliasing the next claim.
//!
//! ## Pending queue
//!
//! `set_pending` appends to a bounded queue under a critical section. The
//! dispatch loop owns a second buffer of the same size and swaps it with the
//! live one under the same critical section (see [`Events::take_pending`]),
//! so draining never races with appending and no allocation happens on
//! either side.

use core::cell::RefCell;
use core::fmt;
use core::mem;

use critical_section::Mutex;
use heapless::Vec;

use crate::config::{EVENT_QUEUE_DEPTH, MAX_EVENTS};
use crate::error::Error;
use crate::sync;

/// One half of the double-buffered pending queue.
pub type PendingQueue = Vec<EventHandle, EVENT_QUEUE_DEPTH>;

/// A claimed event slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EventHandle {
    index: u16,
    generation: u16,
}

impl EventHandle {
    /// Slot index inside the registry.
    #[inline]
    pub fn index(self) -> usize {
        self.index as usize
    }
}

impl fmt::Display for EventHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ev{}.{}", self.index, self.generation)
    }
}

// ---------------------------------------------------------------------------
// Slot table
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SlotState {
    Free,
    Enabled { pending: bool },
    /// Claimed, but no longer watchable; waiting for `release_abandoned`.
    Abandoned,
}

#[derive(Debug, Clone, Copy)]
struct Slot {
    generation: u16,
    state: SlotState,
}

impl Slot {
    const FREE: Slot = Slot {
        generation: 0,
        state: SlotState::Free,
    };
}

struct Registry {
    slots: [Slot; MAX_EVENTS],
    queue: PendingQueue,
}

impl Registry {
    const fn new() -> Self {
        Self {
            slots: [Slot::FREE; MAX_EVENTS],
            queue: Vec::new(),
        }
    }

    /// The slot `ev` refers to, unless the handle is stale.
    fn slot_mut(&mut self, ev: EventHandle) -> Option<&mut Slot> {
        self.slots
            .get_mut(ev.index())
            .filter(|slot| slot.generation == ev.generation && slot.state != SlotState::Free)
    }

    fn slot(&self, ev: EventHandle) -> Option<&Slot> {
        self.slots
            .get(ev.index())
            .filter(|slot| slot.generation == ev.generation && slot.state != SlotState::Free)
    }

    fn claim(&mut self) -> Result<EventHandle, Error> {
        let (index, slot) = self
            .slots
            .iter_mut()
            .enumerate()
            .find(|(_, slot)| slot.state == SlotState::Free)
            .ok_or(Error::NoEventSlots)?;
        slot.state = SlotState::Enabled { pending: false };
        Ok(EventHandle {
            index: index as u16,
            generation: slot.generation,
        })
    }

    fn dequeue(&mut self, ev: EventHandle) {
        if self.queue.contains(&ev) {
            let queue = mem::take(&mut self.queue);
            self.queue = queue.into_iter().filter(|&queued| queued != ev).collect();
        }
    }

    fn free(&mut self, ev: EventHandle) -> bool {
        let Some(slot) = self.slot_mut(ev) else {
            return false;
        };
        slot.state = SlotState::Free;
        slot.generation = slot.generation.wrapping_add(1);
        self.dequeue(ev);
        true
    }
}

// ---------------------------------------------------------------------------
// Public registry
// ---------------------------------------------------------------------------

/// The event registry of one core.
///
/// Lives in a `static` so interrupt handlers can reach it:
///
/// ```ignore
/// static EVENTS: Events = Events::new(arch::cortex_m4::wake);
///
/// #[interrupt]
/// fn USART2() {
///     EVENTS.set_pending(unsafe { UART_EVENT });
/// }
/// ```
///
/// `wake` is called whenever an event becomes pending, so a core sleeping in
/// `Platform::wait_until` notices.
pub struct Events {
    inner: Mutex<RefCell<Registry>>,
    wake: fn(),
}

impl Events {
    pub const fn new(wake: fn()) -> Self {
        Self {
            inner: Mutex::new(RefCell::new(Registry::new())),
            wake,
        }
    }

    /// Reserve a free slot and enable it.
    pub fn claim(&self) -> Result<EventHandle, Error> {
        sync::critical_section(|cs| self.inner.borrow_ref_mut(cs).claim())
    }

    /// Claim into a driver-owned cell.
    ///
    /// Fails with [`Error::EventAlreadyClaimed`] while the cell still holds a
    /// live claim. A cell holding a stale handle is simply overwritten.
    pub fn claim_into(&self, cell: &mut Option<EventHandle>) -> Result<EventHandle, Error> {
        sync::critical_section(|cs| {
            let mut registry = self.inner.borrow_ref_mut(cs);
            if let Some(held) = *cell {
                if registry.slot(held).is_some() {
                    return Err(Error::EventAlreadyClaimed);
                }
            }
            let ev = registry.claim()?;
            *cell = Some(ev);
            Ok(ev)
        })
    }

    /// Mark `ev` pending. Callable from interrupt context.
    ///
    /// Returns true iff this call queued the event. Stale, disabled,
    /// abandoned and already-pending events are left alone.
    ///
    /// # Panics
    /// If the pending queue is full. Size `EVENT_QUEUE_DEPTH` for the
    /// number of distinct events that can fire between two dispatch passes.
    pub fn set_pending(&self, ev: EventHandle) -> bool {
        sync::critical_section(|cs| self.set_pending_in(cs, ev))
    }

    /// [`Events::set_pending`] for callers already inside a critical section.
    pub fn set_pending_in(&self, cs: critical_section::CriticalSection<'_>, ev: EventHandle) -> bool {
        let mut registry = self.inner.borrow_ref_mut(cs);
        let queued = match registry.slot_mut(ev) {
            Some(Slot {
                state: SlotState::Enabled { pending },
                ..
            }) if !*pending => {
                *pending = true;
                true
            }
            _ => false,
        };
        if queued && registry.queue.push(ev).is_err() {
            panic!("event queue overflow ({} pending)", EVENT_QUEUE_DEPTH);
        }
        drop(registry);
        if queued {
            (self.wake)();
        }
        queued
    }

    /// True iff `ev` is claimed and can be watched.
    pub fn is_enabled(&self, ev: EventHandle) -> bool {
        sync::critical_section(|cs| {
            matches!(
                self.inner.borrow_ref(cs).slot(ev),
                Some(Slot {
                    state: SlotState::Enabled { .. },
                    ..
                })
            )
        })
    }

    /// True iff `ev` is enabled and pending, i.e. queued but not yet drained.
    pub fn is_pending(&self, ev: EventHandle) -> bool {
        sync::critical_section(|cs| {
            matches!(
                self.inner.borrow_ref(cs).slot(ev),
                Some(Slot {
                    state: SlotState::Enabled { pending: true },
                    ..
                })
            )
        })
    }

    /// Free a slot handed over by [`Events::abandon`]. Callable from
    /// interrupt context. Returns false if `ev` is not abandoned.
    pub fn release_abandoned(&self, ev: EventHandle) -> bool {
        sync::critical_section(|cs| {
            let mut registry = self.inner.borrow_ref_mut(cs);
            let abandoned = matches!(
                registry.slot(ev),
                Some(Slot {
                    state: SlotState::Abandoned,
                    ..
                })
            );
            abandoned && registry.free(ev)
        })
    }

    /// Disable and free `ev`, dropping any queued occurrence.
    ///
    /// Watchers are not touched here; the kernel evicts them.
    pub(crate) fn release(&self, ev: EventHandle) -> bool {
        sync::critical_section(|cs| self.inner.borrow_ref_mut(cs).free(ev))
    }

    /// Stop accepting occurrences of `ev` without freeing the slot.
    pub(crate) fn abandon(&self, ev: EventHandle) -> bool {
        sync::critical_section(|cs| {
            let mut registry = self.inner.borrow_ref_mut(cs);
            let Some(slot) = registry.slot_mut(ev) else {
                return false;
            };
            if !matches!(slot.state, SlotState::Enabled { .. }) {
                return false;
            }
            slot.state = SlotState::Abandoned;
            registry.dequeue(ev);
            true
        })
    }

    /// Swap the live pending queue with `spare` and clear the pending flag
    /// of every event taken.
    ///
    /// `spare` must be empty; it comes back holding the drained events in
    /// the order they became pending.
    pub(crate) fn take_pending(&self, spare: &mut PendingQueue) {
        debug_assert!(spare.is_empty(), "pending buffer not drained");
        sync::critical_section(|cs| {
            let mut registry = self.inner.borrow_ref_mut(cs);
            mem::swap(&mut registry.queue, spare);
            for &ev in spare.iter() {
                match registry.slot_mut(ev) {
                    Some(Slot {
                        state: SlotState::Enabled { pending },
                        ..
                    }) => *pending = false,
                    _ => unreachable!("queued event {} is not enabled", ev),
                }
            }
        })
    }

    /// Number of events queued and not yet drained.
    pub fn queued(&self) -> usize {
        sync::critical_section(|cs| self.inner.borrow_ref(cs).queue.len())
    }
}

impl fmt::Debug for Events {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Events")
            .field("queued", &self.queued())
            .finish_non_exhaustive()
    }
}
