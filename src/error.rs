//! Errors reported synchronously by the scheduler and event APIs.
//!
//! Everything here is either capacity exhaustion or protocol misuse by a
//! collaborator. None of it is transient: retrying the same call will fail
//! the same way. Conditions that cannot be reported to a caller (pending
//! queue overflow from interrupt context, broken internal invariants)
//! panic instead.

use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum Error {
    /// Every event slot is claimed.
    #[error("no events available")]
    NoEventSlots,

    /// The driver's event cell still holds a live claim.
    #[error("event already claimed")]
    EventAlreadyClaimed,

    /// Watching or waiting on an event that is not enabled.
    #[error("watching disabled event")]
    EventDisabled,

    /// The watcher set of one event is full.
    #[error("too many watchers for one event")]
    TooManyWatchers,

    /// Every task slot holds a live task or an unreaped dead one.
    #[error("no task slots available")]
    NoTaskSlots,

    /// The handle refers to a task slot that has since been reaped.
    #[error("stale task handle")]
    StaleTask,

    /// The operation needs a live task.
    #[error("task is dead")]
    DeadTask,

    #[error("task cannot kill itself")]
    SelfKill,

    #[error("task cannot join itself")]
    SelfJoin,

    /// The joiner set of one task is full.
    #[error("too many joiners for one task")]
    TooManyJoiners,

    /// The event already has a live handler task.
    #[error("event already has a handler")]
    AlreadyHandled,
}
