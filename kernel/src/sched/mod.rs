//! Scheduling interfaces
//!
//! The scheduler proper (run queues, context switching, the timer queue)
//! lives outside this crate. What lives here is the seam the time and I/O
//! subsystems contract against - the blocking operations a kernel task may
//! perform - plus the wait objects (`CondVar`, `MultiObjWaiter`) those
//! operations consume.
//!
//! A task may suspend only in `sleep_ticks`, `yield_now` and
//! `sleep_on_waiter`. Interrupt-disable and preemption-disable sections
//! must never reach one of these.

pub mod wait;

pub use wait::{CondVar, MultiObjWaiter, WaitError, WaitObjectKind};

/// Why a blocked task woke up.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WakeEvent {
    /// The task's wakeup timer expired.
    Timeout,
    /// A condition variable bound to the waiter was signaled. May be
    /// spurious: the signaled condition need not correspond to any
    /// logically-ready object, and callers must re-check and re-sleep.
    Signaled,
}

/// Blocking services provided by the scheduler to kernel tasks.
pub trait SchedOps {
    /// Suspend the current task for at least `ticks` timer ticks.
    fn sleep_ticks(&self, ticks: u32);

    /// Give up the CPU. Returns `true` if the task was preempted while
    /// yielded (ran again only after losing a full scheduling round), which
    /// tells callers their sampled state may be stale.
    fn yield_now(&self) -> bool;

    /// Atomically enqueue on every condition bound to `waiter` and
    /// suspend. Returns the reason for the wakeup; on [`WakeEvent::Timeout`]
    /// the scheduler has already reset the task's wakeup object.
    fn sleep_on_waiter(&self, waiter: &MultiObjWaiter) -> WakeEvent;

    /// Arm the current task's one-shot wakeup timer.
    fn set_wakeup_timer(&self, ticks: u32);

    /// Disarm the wakeup timer, returning the ticks that were left.
    fn cancel_wakeup_timer(&self) -> u32;

    /// Timer ticks consumed by the current task, for CPU-time clocks.
    fn current_task_ticks(&self) -> u64;
}
