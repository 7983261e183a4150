//! # Clock Source
//!
//! Monotonic ticks, absolute deadlines, and the platform boundary the
//! scheduler sleeps on.
//!
//! Deadlines are always absolute. A task that waits in several partial
//! steps keeps the same `Deadline` and never accumulates drift from
//! recomputing a relative timeout.

use core::fmt;

/// A point on the monotonic platform clock.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Tick(pub u64);

impl Tick {
    /// The raw tick count.
    #[inline]
    pub const fn ticks(self) -> u64 {
        self.0
    }
}

impl fmt::Display for Tick {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}t", self.0)
    }
}

/// An absolute deadline on the monotonic clock.
///
/// Two values are reserved: [`Deadline::ELAPSED`] is reached at any time,
/// and [`Deadline::NEVER`] is never reached. Constructors clamp ordinary
/// deadlines so that only the `NEVER` constant means "never".
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Deadline(u64);

impl Deadline {
    /// Already due; fires immediately.
    pub const ELAPSED: Deadline = Deadline(0);

    /// Never fires.
    pub const NEVER: Deadline = Deadline(u64::MAX);

    /// The deadline at an absolute tick.
    #[inline]
    pub const fn at(tick: Tick) -> Self {
        if tick.0 == u64::MAX {
            Deadline(u64::MAX - 1)
        } else {
            Deadline(tick.0)
        }
    }

    /// The deadline `ticks` after `now`, saturating below `NEVER`.
    #[inline]
    pub const fn after(now: Tick, ticks: u64) -> Self {
        Self::at(Tick(now.0.saturating_add(ticks)))
    }

    /// True iff this deadline has been reached at `now`.
    #[inline]
    pub const fn reached(self, now: Tick) -> bool {
        self.0 != u64::MAX && self.0 <= now.0
    }

    #[inline]
    pub const fn is_never(self) -> bool {
        self.0 == u64::MAX
    }

    /// The tick this deadline fires at, or `None` for `NEVER`.
    #[inline]
    pub const fn tick(self) -> Option<Tick> {
        if self.is_never() {
            None
        } else {
            Some(Tick(self.0))
        }
    }
}

impl fmt::Display for Deadline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Deadline::NEVER => f.write_str("never"),
            Deadline::ELAPSED => f.write_str("elapsed"),
            Deadline(t) => write!(f, "@{}t", t),
        }
    }
}

/// The clock and idle primitive of one core.
///
/// This is the only place the scheduler blocks. Implementations must not
/// lose wakeups: an event made pending between the scheduler's last drain
/// and the call to `wait_until` has to make `wait_until` return promptly
/// (on Cortex-M, `SEV` from the interrupt sets the event register that the
/// following `WFE` consumes).
pub trait Platform {
    /// Current time.
    fn now(&self) -> Tick;

    /// Sleep until `deadline` or until an external wake, whichever comes
    /// first. Returns true iff the deadline caused the return. Spurious
    /// returns are allowed; the caller re-checks.
    fn wait_until(&mut self, deadline: Deadline) -> bool;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sentinels() {
        assert!(Deadline::ELAPSED.reached(Tick(0)));
        assert!(!Deadline::NEVER.reached(Tick(u64::MAX)));
        assert!(Deadline::ELAPSED < Deadline::at(Tick(1)));
        assert!(Deadline::at(Tick(1_000)) < Deadline::NEVER);
        assert_eq!(Deadline::NEVER.tick(), None);
    }

    #[test]
    fn test_after_clamps_below_never() {
        let d = Deadline::after(Tick(u64::MAX - 5), 100);
        assert!(!d.is_never());
        assert_eq!(d.tick(), Some(Tick(u64::MAX - 1)));
        assert!(d.reached(Tick(u64::MAX - 1)));
    }

    #[test]
    fn test_reached_boundary() {
        let d = Deadline::after(Tick(50), 100);
        assert!(!d.reached(Tick(149)));
        assert!(d.reached(Tick(150)));
        assert!(d.reached(Tick(151)));
    }
}
