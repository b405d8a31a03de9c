//! Condition variables and the multi-object waiter
//!
//! A [`CondVar`] is a kernel object with a wait-list: tasks suspend on it
//! until it is signaled. A [`MultiObjWaiter`] is a fixed-slot aggregate
//! that lets one task wait on several condition variables at once - the
//! primitive `select()` is built on.
//!
//! Contract: when a bound condition is signaled, the slot's wait-object
//! kind is cleared and the owning waiter is woken. A wake does not imply
//! any object is logically ready; consumers re-check and re-sleep.

use alloc::sync::{Arc, Weak};
use alloc::vec::Vec;
use core::sync::atomic::{AtomicBool, Ordering};
use spin::Mutex;

/// Upper bound on slots in a single waiter. `select()` needs at most three
/// conditions per handle, so this is far above any legal request.
pub const MAX_WAIT_OBJECTS: usize = 256;

/// What a waiter slot is bound to.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WaitObjectKind {
    /// Slot is empty (or its condition already fired).
    None,
    /// Slot is bound to a condition variable.
    CondVar,
    /// Slot is bound to a timer.
    Timer,
}

/// Wait-object errors.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WaitError {
    /// Requested more slots than a waiter can hold.
    TooManyObjects,
}

struct WaitSlot {
    kind: WaitObjectKind,
    cond: Option<Arc<CondVar>>,
}

struct WaiterInner {
    slots: Mutex<Vec<WaitSlot>>,
    woken: AtomicBool,
    wake_hook: Mutex<Option<Arc<dyn Fn() + Send + Sync>>>,
}

impl WaiterInner {
    /// Signal path: clear the slot's kind, mark the waiter woken, notify.
    fn signal_slot(&self, idx: usize) {
        {
            let mut slots = self.slots.lock();
            if let Some(slot) = slots.get_mut(idx) {
                slot.kind = WaitObjectKind::None;
            }
        }

        self.woken.store(true, Ordering::SeqCst);

        let hook = self.wake_hook.lock().clone();
        if let Some(hook) = hook {
            hook();
        }
    }
}

/// A fixed-size aggregate of wait slots, each bindable to a condition
/// variable's wait-list.
pub struct MultiObjWaiter {
    inner: Arc<WaiterInner>,
}

impl MultiObjWaiter {
    /// Allocate a waiter with `count` empty slots.
    pub fn allocate(count: u32) -> Result<Self, WaitError> {
        if count as usize > MAX_WAIT_OBJECTS {
            return Err(WaitError::TooManyObjects);
        }

        let mut slots = Vec::with_capacity(count as usize);
        for _ in 0..count {
            slots.push(WaitSlot {
                kind: WaitObjectKind::None,
                cond: None,
            });
        }

        Ok(Self {
            inner: Arc::new(WaiterInner {
                slots: Mutex::new(slots),
                woken: AtomicBool::new(false),
                wake_hook: Mutex::new(None),
            }),
        })
    }

    /// Number of slots.
    pub fn count(&self) -> usize {
        self.inner.slots.lock().len()
    }

    /// Bind slot `idx` to a condition variable.
    pub fn set(&self, idx: usize, cond: Arc<CondVar>) {
        let mut slots = self.inner.slots.lock();
        let slot = &mut slots[idx];
        slot.kind = WaitObjectKind::CondVar;
        slot.cond = Some(cond);
    }

    /// Kind currently bound at `idx`.
    pub fn kind(&self, idx: usize) -> WaitObjectKind {
        self.inner.slots.lock()[idx].kind
    }

    /// Re-arm a slot whose condition fired, or empty it entirely.
    pub fn reset(&self, idx: usize) {
        let mut slots = self.inner.slots.lock();
        let slot = &mut slots[idx];
        slot.kind = WaitObjectKind::None;
        slot.cond = None;
    }

    /// Install the hook the scheduler uses to make the owning task
    /// runnable when a bound condition fires.
    pub fn set_wake_hook(&self, hook: Arc<dyn Fn() + Send + Sync>) {
        *self.inner.wake_hook.lock() = Some(hook);
    }

    /// Enqueue every bound slot on its condition's wait-list. Called by the
    /// scheduler's blocking primitive immediately before suspending.
    /// Registration is idempotent, and slots whose condition fired on a
    /// previous round are re-armed, so a re-sleep after a spurious wake
    /// listens to all of its conditions again.
    pub fn register_all(&self) {
        let bound: Vec<(usize, Arc<CondVar>)> = {
            let mut slots = self.inner.slots.lock();
            slots
                .iter_mut()
                .enumerate()
                .filter_map(|(i, s)| {
                    s.cond.clone().map(|c| {
                        s.kind = WaitObjectKind::CondVar;
                        (i, c)
                    })
                })
                .collect()
        };

        for (idx, cond) in bound {
            cond.enqueue(Arc::downgrade(&self.inner), idx);
        }
    }

    /// Drop every wait-list registration this waiter still holds. Called
    /// when the wait completes, before the waiter is freed.
    pub fn unregister_all(&self) {
        let conds: Vec<Arc<CondVar>> = {
            let slots = self.inner.slots.lock();
            slots.iter().filter_map(|s| s.cond.clone()).collect()
        };

        for cond in conds {
            cond.remove_waiter(&self.inner);
        }
    }

    /// Consume the woken flag. The scheduler polls this to decide whether
    /// the task should become runnable.
    pub fn take_woken(&self) -> bool {
        self.inner.woken.swap(false, Ordering::SeqCst)
    }

    /// Count slots whose condition fired since binding, re-arming each.
    pub fn consume_signaled(&self) -> usize {
        let mut slots = self.inner.slots.lock();
        let mut count = 0;

        for slot in slots.iter_mut() {
            if slot.kind == WaitObjectKind::None && slot.cond.is_some() {
                slot.kind = WaitObjectKind::CondVar;
                count += 1;
            }
        }

        count
    }
}

struct WaitReg {
    waiter: Weak<WaiterInner>,
    slot: usize,
}

/// A condition variable: a wait-list that tasks (via waiter slots) park on
/// until it is signaled.
pub struct CondVar {
    wait_list: Mutex<Vec<WaitReg>>,
}

impl CondVar {
    /// Create a condition variable with an empty wait-list.
    pub const fn new() -> Self {
        Self {
            wait_list: Mutex::new(Vec::new()),
        }
    }

    /// Signal the condition: every registered waiter slot is cleared and
    /// its owner woken. Registrations are one-shot; re-sleeping registers
    /// again.
    pub fn signal(&self) {
        let regs = core::mem::take(&mut *self.wait_list.lock());

        for reg in regs {
            if let Some(waiter) = reg.waiter.upgrade() {
                waiter.signal_slot(reg.slot);
            }
        }
    }

    /// Whether any waiter is currently registered.
    pub fn has_waiters(&self) -> bool {
        !self.wait_list.lock().is_empty()
    }

    fn enqueue(&self, waiter: Weak<WaiterInner>, slot: usize) {
        let mut list = self.wait_list.lock();

        let already = list
            .iter()
            .any(|r| r.slot == slot && r.waiter.ptr_eq(&waiter));
        if !already {
            list.push(WaitReg { waiter, slot });
        }
    }

    fn remove_waiter(&self, waiter: &Arc<WaiterInner>) {
        self.wait_list
            .lock()
            .retain(|r| match r.waiter.upgrade() {
                Some(w) => !Arc::ptr_eq(&w, waiter),
                None => false,
            });
    }
}

impl Default for CondVar {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::sync::Arc;

    #[test]
    fn test_allocate_bounds() {
        assert!(MultiObjWaiter::allocate(0).is_ok());
        assert!(MultiObjWaiter::allocate(MAX_WAIT_OBJECTS as u32).is_ok());
        assert_eq!(
            MultiObjWaiter::allocate(MAX_WAIT_OBJECTS as u32 + 1).err(),
            Some(WaitError::TooManyObjects)
        );
    }

    #[test]
    fn test_signal_clears_slot_and_wakes() {
        let cond = Arc::new(CondVar::new());
        let waiter = MultiObjWaiter::allocate(2).unwrap();

        waiter.set(0, cond.clone());
        assert_eq!(waiter.kind(0), WaitObjectKind::CondVar);
        assert_eq!(waiter.kind(1), WaitObjectKind::None);

        waiter.register_all();
        assert!(cond.has_waiters());

        cond.signal();
        assert_eq!(waiter.kind(0), WaitObjectKind::None);
        assert!(waiter.take_woken());
        assert!(!waiter.take_woken());
        assert!(!cond.has_waiters());
    }

    #[test]
    fn test_signal_is_one_shot() {
        let cond = Arc::new(CondVar::new());
        let waiter = MultiObjWaiter::allocate(1).unwrap();

        waiter.set(0, cond.clone());
        waiter.register_all();
        cond.signal();
        assert!(waiter.take_woken());

        // Not re-registered: a second signal reaches nobody.
        cond.signal();
        assert!(!waiter.take_woken());

        // Re-registering (as a re-sleep would) makes it live again.
        waiter.consume_signaled();
        waiter.register_all();
        cond.signal();
        assert!(waiter.take_woken());
    }

    #[test]
    fn test_register_is_idempotent() {
        let cond = Arc::new(CondVar::new());
        let waiter = MultiObjWaiter::allocate(1).unwrap();

        waiter.set(0, cond.clone());
        waiter.register_all();
        waiter.register_all();

        assert_eq!(cond.wait_list.lock().len(), 1);
    }

    #[test]
    fn test_consume_signaled_counts_and_rearms() {
        let a = Arc::new(CondVar::new());
        let b = Arc::new(CondVar::new());
        let waiter = MultiObjWaiter::allocate(2).unwrap();

        waiter.set(0, a.clone());
        waiter.set(1, b.clone());
        waiter.register_all();

        a.signal();
        assert_eq!(waiter.consume_signaled(), 1);
        assert_eq!(waiter.kind(0), WaitObjectKind::CondVar);
        assert_eq!(waiter.consume_signaled(), 0);
    }

    #[test]
    fn test_wake_hook_runs_on_signal() {
        let cond = Arc::new(CondVar::new());
        let waiter = MultiObjWaiter::allocate(1).unwrap();

        let fired = Arc::new(AtomicBool::new(false));
        let fired_clone = fired.clone();
        waiter.set_wake_hook(Arc::new(move || {
            fired_clone.store(true, Ordering::SeqCst);
        }));

        waiter.set(0, cond.clone());
        waiter.register_all();
        cond.signal();

        assert!(fired.load(Ordering::SeqCst));
    }

    #[test]
    fn test_unregister_all() {
        let cond = Arc::new(CondVar::new());
        let waiter = MultiObjWaiter::allocate(1).unwrap();

        waiter.set(0, cond.clone());
        waiter.register_all();
        assert!(cond.has_waiters());

        waiter.unregister_all();
        assert!(!cond.has_waiters());

        cond.signal();
        assert!(!waiter.take_woken());
    }

    #[test]
    fn test_reset_empties_slot() {
        let cond = Arc::new(CondVar::new());
        let waiter = MultiObjWaiter::allocate(1).unwrap();

        waiter.set(0, cond);
        waiter.reset(0);
        assert_eq!(waiter.kind(0), WaitObjectKind::None);

        waiter.register_all();
        assert_eq!(waiter.consume_signaled(), 0);
    }
}
