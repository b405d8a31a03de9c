//! # select() core
//!
//! A blocking wait across an arbitrary mix of readable/writable/exceptional
//! descriptors, bounded by an optional timeout. The syscall layer copies
//! the user's fd-sets and timeout in and out; everything here operates on
//! kernel-owned copies.
//!
//! The wait works in four phases:
//!
//! 1. **Translate** - resolve every set descriptor and count the condition
//!    variables the handles expose for the requested readiness kinds.
//! 2. **Convert** - turn the timeout into timer ticks (`u32`-saturating).
//!    A zero timeout is a pure poll and skips phase 3 entirely.
//! 3. **Wait** - bind the conditions into a multi-object waiter and sleep,
//!    re-sleeping on spurious signals (a signaled condition does not imply
//!    a ready stream), until a stream is ready or the timer fires. With no
//!    conditions but a positive timeout, plain-sleep instead - this keeps
//!    `select(0, NULL, NULL, NULL, &tv)` working as a portable sleep.
//! 4. **Report** - clear every bit whose handle is not ready right now and
//!    count the remainder.

use alloc::sync::Arc;

use crate::fs::{FileOps, HandleTable, PollKind, MAX_HANDLES};
use crate::sched::{MultiObjWaiter, SchedOps, WakeEvent};
use crate::time::{Timeval, TIMER_HZ};

/// Number of descriptors an [`FdSet`] covers.
pub const FD_SETSIZE: usize = MAX_HANDLES;

const FDSET_WORDS: usize = (FD_SETSIZE + 63) / 64;

/// Fixed-size descriptor bitset, bit-compatible with the userspace ABI.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct FdSet {
    bits: [u64; FDSET_WORDS],
}

impl FdSet {
    /// An empty set.
    pub const fn new() -> Self {
        Self {
            bits: [0; FDSET_WORDS],
        }
    }

    /// Add `fd` to the set. Out-of-range descriptors are ignored.
    pub fn set(&mut self, fd: u32) {
        if (fd as usize) < FD_SETSIZE {
            self.bits[(fd / 64) as usize] |= 1 << (fd % 64);
        }
    }

    /// Remove `fd` from the set.
    pub fn clear(&mut self, fd: u32) {
        if (fd as usize) < FD_SETSIZE {
            self.bits[(fd / 64) as usize] &= !(1 << (fd % 64));
        }
    }

    /// Whether `fd` is in the set.
    pub fn is_set(&self, fd: u32) -> bool {
        if (fd as usize) < FD_SETSIZE {
            self.bits[(fd / 64) as usize] & (1 << (fd % 64)) != 0
        } else {
            false
        }
    }

    /// Total number of set bits.
    pub fn count(&self) -> usize {
        self.bits.iter().map(|w| w.count_ones() as usize).sum()
    }
}

/// Errors `do_select` can report.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SelectError {
    /// `nfds` out of range
    InvalidArgument,
    /// A set descriptor does not resolve to a handle
    BadFileDescriptor,
    /// The multi-object waiter could not be allocated
    OutOfMemory,
}

/// Result of a completed select: the pruned sets, the rewritten timeout and
/// the total ready count (which always equals the set bits remaining below
/// `nfds` across all three sets).
pub struct SelectOutcome {
    /// Number of ready descriptors
    pub ready: usize,
    /// Updated read/write/except sets
    pub sets: [Option<FdSet>; 3],
    /// Updated timeout (zeroed if the wait timed out or slept in full)
    pub timeout: Option<Timeval>,
}

/// Run a select over kernel-side sets. See the module docs for the phases.
pub fn do_select(
    table: &HandleTable,
    sched: &dyn SchedOps,
    nfds: u32,
    mut sets: [Option<FdSet>; 3],
    timeout: Option<Timeval>,
) -> Result<SelectOutcome, SelectError> {
    if nfds as usize > MAX_HANDLES {
        return Err(SelectError::InvalidArgument);
    }

    let timeout_ticks = timeout.map(timeval_to_ticks);
    let mut tv = timeout;

    // A zero timeout is a pure poll: no conditions are collected and no
    // sleep happens, the sets are just pruned below.
    let mut cond_cnt = 0u32;
    if timeout_ticks != Some(0) {
        for (i, set) in sets.iter().enumerate() {
            if let Some(set) = set {
                cond_cnt += count_conds(table, nfds, set, PollKind::ALL[i])?;
            }
        }
    }

    if cond_cnt > 0 {
        wait_on_conds(table, sched, nfds, &sets, cond_cnt, timeout_ticks, &mut tv)?;
    } else if let Some(ticks) = timeout_ticks {
        if ticks > 0 {
            // No conditions to wait on, but a timeout was given: sleep it
            // out. None of the specified files can become ready by
            // signaling, so there is nothing else to wake up for.
            sched.sleep_ticks(ticks);
            tv = Some(Timeval::default());
        }
    }

    let mut ready = 0;
    for (i, set) in sets.iter_mut().enumerate() {
        if let Some(set) = set {
            ready += mark_ready(table, nfds, set, PollKind::ALL[i]);
        }
    }

    Ok(SelectOutcome {
        ready,
        sets,
        timeout: tv,
    })
}

/// Count the condition variables the set's handles expose for `kind`.
/// Handles that support the kind without a condition are tolerated; they
/// are still polled in phase 4.
fn count_conds(
    table: &HandleTable,
    nfds: u32,
    set: &FdSet,
    kind: PollKind,
) -> Result<u32, SelectError> {
    let mut count = 0;

    for fd in 0..nfds {
        if !set.is_set(fd) {
            continue;
        }

        // Handles are borrowed for the query only, never across a sleep.
        let handle: Arc<dyn FileOps> = table.get(fd).ok_or(SelectError::BadFileDescriptor)?;
        if handle.poll_cond(kind).is_some() {
            count += 1;
        }
    }

    Ok(count)
}

/// Bind every condition from the set's handles into free waiter slots.
fn bind_conds(
    table: &HandleTable,
    nfds: u32,
    waiter: &MultiObjWaiter,
    idx: &mut usize,
    set: &FdSet,
    kind: PollKind,
) -> Result<(), SelectError> {
    for fd in 0..nfds {
        if !set.is_set(fd) {
            continue;
        }

        let handle = table.get(fd).ok_or(SelectError::BadFileDescriptor)?;
        if let Some(cond) = handle.poll_cond(kind) {
            debug_assert!(*idx < waiter.count());
            waiter.set(*idx, cond);
            *idx += 1;
        }
    }

    Ok(())
}

/// How many of the still-set descriptors are ready right now.
fn count_ready_streams(table: &HandleTable, nfds: u32, sets: &[Option<FdSet>; 3]) -> usize {
    let mut count = 0;

    for (i, set) in sets.iter().enumerate() {
        let Some(set) = set else { continue };

        for fd in 0..nfds {
            if !set.is_set(fd) {
                continue;
            }
            if let Some(handle) = table.get(fd) {
                if handle.poll_ready(PollKind::ALL[i]) {
                    count += 1;
                }
            }
        }
    }

    count
}

/// Phase 3: sleep on the bound conditions until a stream is ready or the
/// timer fires. Spurious condition signals re-enter the sleep.
fn wait_on_conds(
    table: &HandleTable,
    sched: &dyn SchedOps,
    nfds: u32,
    sets: &[Option<FdSet>; 3],
    cond_cnt: u32,
    timeout_ticks: Option<u32>,
    tv: &mut Option<Timeval>,
) -> Result<(), SelectError> {
    let waiter = MultiObjWaiter::allocate(cond_cnt).map_err(|_| SelectError::OutOfMemory)?;

    let rc = (|| {
        let mut idx = 0;
        for (i, set) in sets.iter().enumerate() {
            if let Some(set) = set {
                bind_conds(table, nfds, &waiter, &mut idx, set, PollKind::ALL[i])?;
            }
        }

        if let Some(ticks) = timeout_ticks {
            // The pure-poll case never reaches the wait.
            debug_assert!(ticks > 0);
            sched.set_wakeup_timer(ticks);
        }

        loop {
            let event = sched.sleep_on_waiter(&waiter);

            if timeout_ticks.is_some() && event == WakeEvent::Timeout {
                *tv = Some(Timeval::default());
                break;
            }

            // A condition was signaled, but that does not mean any of the
            // signaled conditions corresponds to a ready stream.
            if count_ready_streams(table, nfds, sets) == 0 {
                continue;
            }

            if timeout_ticks.is_some() {
                let remaining = sched.cancel_wakeup_timer();
                *tv = Some(ticks_to_timeval(remaining));
            }

            break;
        }

        Ok(())
    })();

    waiter.unregister_all();
    rc
}

/// Phase 4: clear bits whose handle is gone or not ready; count the rest.
fn mark_ready(table: &HandleTable, nfds: u32, set: &mut FdSet, kind: PollKind) -> usize {
    let mut total = 0;

    for fd in 0..nfds {
        if !set.is_set(fd) {
            continue;
        }

        match table.get(fd) {
            Some(handle) if handle.poll_ready(kind) => total += 1,
            _ => set.clear(fd),
        }
    }

    total
}

/// Convert a timeout to timer ticks, saturating at `u32::MAX` (a select
/// cannot sleep longer than that many ticks).
fn timeval_to_ticks(tv: Timeval) -> u32 {
    let sec = tv.tv_sec.max(0) as u64;
    let usec = tv.tv_usec.max(0) as u64;

    let ticks = sec
        .saturating_mul(TIMER_HZ as u64)
        .saturating_add(usec / (1_000_000 / TIMER_HZ as u64));

    ticks.min(u32::MAX as u64) as u32
}

/// Convert remaining timer ticks back into a timeout.
fn ticks_to_timeval(ticks: u32) -> Timeval {
    Timeval {
        tv_sec: (ticks / TIMER_HZ) as i64,
        tv_usec: ((ticks % TIMER_HZ) as u64 * (1_000_000 / TIMER_HZ as u64)) as i64,
    }
}
