//! # Synchronization Primitives
//!
//! Interrupt-safe critical sections for the state shared between interrupt
//! handlers and the scheduler loop. In EvOS that is exactly the event
//! registry and its pending queue; everything else is owned by the core's
//! scheduler and needs no locking.
//!
//! The implementation comes from the `critical-section` crate: on Cortex-M
//! it masks interrupts (`cortex-m`'s `critical-section-single-core`), on the
//! host it is a global reentrant lock.

use core::marker::PhantomData;

use critical_section::RestoreState;

/// A scoped critical section.
///
/// Interrupts stay masked for as long as the guard lives and the previous
/// interrupt state is restored when it is dropped, on every exit path,
/// including early returns and unwinding panics. Guards must be dropped in
/// the reverse order they were created, which lexical scoping guarantees.
///
/// # Usage
/// ```ignore
/// let cs = CriticalSection::enter();
/// let mut state = SHARED.borrow_ref_mut(cs.token());
/// // ...
/// ```
pub struct CriticalSection {
    restore: RestoreState,
    // Restoring must happen on the context that acquired.
    _not_send: PhantomData<*mut ()>,
}

impl CriticalSection {
    /// Enter a critical section.
    #[inline]
    pub fn enter() -> Self {
        // SAFETY: the matching `release` happens in `Drop`, exactly once.
        let restore = unsafe { critical_section::acquire() };
        Self {
            restore,
            _not_send: PhantomData,
        }
    }

    /// Token proving that a critical section is held, for use with
    /// `critical_section::Mutex::borrow`.
    #[inline]
    pub fn token(&self) -> critical_section::CriticalSection<'_> {
        // SAFETY: the token cannot outlive `self`, and `self` holds the
        // critical section until it is dropped.
        unsafe { critical_section::CriticalSection::new() }
    }
}

impl Drop for CriticalSection {
    #[inline]
    fn drop(&mut self) {
        // SAFETY: `restore` came from the `acquire` in `enter`.
        unsafe { critical_section::release(self.restore) }
    }
}

/// Execute a closure within a critical section.
///
/// Keep critical sections as short as possible: they add directly to
/// interrupt latency.
#[inline]
pub fn critical_section<F, R>(f: F) -> R
where
    F: FnOnce(critical_section::CriticalSection<'_>) -> R,
{
    let cs = CriticalSection::enter();
    f(cs.token())
}
