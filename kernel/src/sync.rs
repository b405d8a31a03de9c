//! # Interrupt- and Preemption-Aware Primitives
//!
//! This module provides the two critical-section disciplines used by the
//! time and I/O subsystems:
//!
//! - [`IrqLock`] - a spin mutex that disables hardware interrupts for the
//!   lifetime of its guard. Required around multi-word time state that the
//!   tick interrupt handler also mutates.
//! - [`preempt_disable`] - a scoped guard that prevents the scheduler from
//!   suspending the current task, for paired reads that must observe a
//!   consistent view (e.g. HW clock + system timestamp).
//!
//! Neither guard may be held across a suspension point.

use core::ops::{Deref, DerefMut};
use core::sync::atomic::{AtomicUsize, Ordering};
use spin::{Mutex, MutexGuard};

use crate::arch::{self, IrqState};

/// A spin mutex whose guard also masks hardware interrupts.
///
/// Locking saves the interrupt flag and disables interrupts before taking
/// the inner lock; dropping the guard releases the lock and restores the
/// saved flag. This excludes the tick interrupt handler from the critical
/// section, which is what makes multi-word reads of the time state safe.
pub struct IrqLock<T> {
    inner: Mutex<T>,
}

impl<T> IrqLock<T> {
    /// Create a new lock wrapping `value`.
    pub const fn new(value: T) -> Self {
        Self {
            inner: Mutex::new(value),
        }
    }

    /// Acquire the lock with interrupts disabled.
    pub fn lock(&self) -> IrqLockGuard<'_, T> {
        let irq_state = arch::irq_save_disable();
        IrqLockGuard {
            guard: Some(self.inner.lock()),
            irq_state,
        }
    }
}

/// Guard for [`IrqLock`]. Restores the interrupt flag on drop.
pub struct IrqLockGuard<'a, T> {
    guard: Option<MutexGuard<'a, T>>,
    irq_state: IrqState,
}

impl<T> Deref for IrqLockGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        self.guard.as_ref().expect("guard taken before drop")
    }
}

impl<T> DerefMut for IrqLockGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        self.guard.as_mut().expect("guard taken before drop")
    }
}

impl<T> Drop for IrqLockGuard<'_, T> {
    fn drop(&mut self) {
        // Release the spinlock before re-enabling interrupts.
        self.guard.take();
        arch::irq_restore(self.irq_state);
    }
}

/// Nesting depth of preemption-disable sections.
static PREEMPT_DEPTH: AtomicUsize = AtomicUsize::new(0);

/// Disable preemption until the returned guard is dropped.
///
/// Sections nest; preemption is re-enabled when the outermost guard drops.
/// The (external) scheduler consults [`preemption_disabled`] before
/// suspending a task.
pub fn preempt_disable() -> PreemptGuard {
    PREEMPT_DEPTH.fetch_add(1, Ordering::SeqCst);
    PreemptGuard { _priv: () }
}

/// Whether the current task is inside a preemption-disable section.
pub fn preemption_disabled() -> bool {
    PREEMPT_DEPTH.load(Ordering::SeqCst) > 0
}

/// Guard returned by [`preempt_disable`].
pub struct PreemptGuard {
    _priv: (),
}

impl Drop for PreemptGuard {
    fn drop(&mut self) {
        let prev = PREEMPT_DEPTH.fetch_sub(1, Ordering::SeqCst);
        debug_assert!(prev > 0, "unbalanced preempt_disable/enable");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_irq_lock_read_write() {
        let lock = IrqLock::new(42);

        {
            let guard = lock.lock();
            assert_eq!(*guard, 42);
        }

        {
            let mut guard = lock.lock();
            *guard = 100;
        }

        assert_eq!(*lock.lock(), 100);
    }

    #[test]
    fn test_preempt_guard_nesting() {
        let outer = preempt_disable();
        assert!(preemption_disabled());

        {
            let _inner = preempt_disable();
            assert!(preemption_disabled());
        }

        assert!(preemption_disabled());
        drop(outer);
    }
}
