//! System call interface
//!
//! Dispatch and handlers for the userspace-facing calls. Every pointer
//! argument goes through the `mem::user` copy helpers before any other
//! work happens, so no handler ever touches user memory directly, and all
//! blocking happens on kernel-owned copies of the arguments.
//!
//! Handlers return `Ok(value)` or a negative [`SyscallError`]; the
//! dispatcher folds that into the return register.

use crate::fs;
use crate::mem::user::{copy_value_from_user, copy_value_to_user, UserMemError};
use crate::sched::SchedOps;
use crate::select::{do_select, FdSet, SelectError};
use crate::time::{ClockId, Timespec, Timeval, Timezone, SYSTEM_CLOCK};

/// System call numbers.
#[repr(u64)]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Syscall {
    // Time (0-15)
    /// `gettimeofday(tv*, tz*)`
    Gettimeofday = 0,
    /// `clock_gettime(clk_id, tp*)`
    ClockGettime = 1,
    /// `clock_getres(clk_id, res*)`
    ClockGetres = 2,

    // I/O multiplexing (16-31)
    /// `select(nfds, readfds*, writefds*, exceptfds*, tv*)`
    Select = 16,
}

/// Saved registers for a syscall.
#[repr(C)]
pub struct SyscallRegs {
    /// Syscall number
    pub syscall_num: u64,
    /// First argument
    pub arg0: u64,
    /// Second argument
    pub arg1: u64,
    /// Third argument
    pub arg2: u64,
    /// Fourth argument
    pub arg3: u64,
    /// Fifth argument
    pub arg4: u64,
    /// Return value
    pub result: i64,
}

/// Syscall errors, as negative return values.
#[repr(i32)]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SyscallError {
    /// Unknown syscall number
    InvalidSyscall = -1,
    /// Out of memory
    OutOfMemory = -4,
    /// Invalid argument
    InvalidArgument = -5,
    /// Descriptor not in the handle table
    BadFileDescriptor = -9,
    /// Bad userspace address
    BadAddress = -14,
}

impl From<UserMemError> for SyscallError {
    fn from(err: UserMemError) -> Self {
        match err {
            UserMemError::NullPointer => SyscallError::BadAddress,
            UserMemError::InvalidAddress => SyscallError::BadAddress,
            UserMemError::AddressOverflow => SyscallError::BadAddress,
            UserMemError::SizeTooLarge => SyscallError::InvalidArgument,
        }
    }
}

impl From<SelectError> for SyscallError {
    fn from(err: SelectError) -> Self {
        match err {
            SelectError::InvalidArgument => SyscallError::InvalidArgument,
            SelectError::BadFileDescriptor => SyscallError::BadFileDescriptor,
            SelectError::OutOfMemory => SyscallError::OutOfMemory,
        }
    }
}

/// System call handler (called from the arch-specific entry, which owns
/// the scheduler reference for the current task).
pub fn syscall_handler(regs: &mut SyscallRegs, sched: &dyn SchedOps) {
    let result = match regs.syscall_num {
        0 => handle_gettimeofday(regs),
        1 => handle_clock_gettime(regs, sched),
        2 => handle_clock_getres(regs),
        16 => handle_select(regs, sched),
        _ => Err(SyscallError::InvalidSyscall),
    };

    regs.result = match result {
        Ok(val) => val as i64,
        Err(err) => err as i64,
    };
}

// ============================================================================
// Time Syscall Handlers
// ============================================================================

fn handle_gettimeofday(regs: &mut SyscallRegs) -> Result<u64, SyscallError> {
    let user_tv = regs.arg0 as *mut Timeval;
    let user_tz = regs.arg1 as *mut Timezone;

    let tp = SYSTEM_CLOCK.real_time_timespec();
    let tv = Timeval {
        tv_sec: tp.tv_sec,
        tv_usec: tp.tv_nsec / 1000,
    };

    if !user_tv.is_null() {
        copy_value_to_user(user_tv, tv)?;
    }

    // No timezone support; report zeros.
    if !user_tz.is_null() {
        copy_value_to_user(user_tz, Timezone::default())?;
    }

    Ok(0)
}

fn handle_clock_gettime(
    regs: &mut SyscallRegs,
    sched: &dyn SchedOps,
) -> Result<u64, SyscallError> {
    let user_tp = regs.arg1 as *mut Timespec;

    if user_tp.is_null() {
        return Err(SyscallError::InvalidArgument);
    }

    let tp = match ClockId::from_raw(regs.arg0 as i32) {
        Some(ClockId::Realtime) | Some(ClockId::RealtimeCoarse) => {
            SYSTEM_CLOCK.real_time_timespec()
        }

        Some(ClockId::Monotonic)
        | Some(ClockId::MonotonicCoarse)
        | Some(ClockId::MonotonicRaw) => SYSTEM_CLOCK.monotonic_time_timespec(),

        Some(ClockId::ProcessCputime) | Some(ClockId::ThreadCputime) => {
            SYSTEM_CLOCK.task_cpu_timespec(sched.current_task_ticks())
        }

        None => {
            log::warn!("unsupported clock id: {}", regs.arg0 as i32);
            return Err(SyscallError::InvalidArgument);
        }
    };

    copy_value_to_user(user_tp, tp)?;
    Ok(0)
}

fn handle_clock_getres(regs: &mut SyscallRegs) -> Result<u64, SyscallError> {
    let user_res = regs.arg1 as *mut Timespec;

    if ClockId::from_raw(regs.arg0 as i32).is_none() {
        log::warn!("unsupported clock id: {}", regs.arg0 as i32);
        return Err(SyscallError::InvalidArgument);
    }

    // Every supported clock advances once per timer tick.
    copy_value_to_user(user_res, SYSTEM_CLOCK.resolution())?;
    Ok(0)
}

// ============================================================================
// I/O Multiplexing Handlers
// ============================================================================

fn handle_select(regs: &mut SyscallRegs, sched: &dyn SchedOps) -> Result<u64, SyscallError> {
    let nfds = regs.arg0 as i64;
    let user_sets = [
        regs.arg1 as *mut FdSet,
        regs.arg2 as *mut FdSet,
        regs.arg3 as *mut FdSet,
    ];
    let user_tv = regs.arg4 as *mut Timeval;

    if nfds < 0 || nfds as usize > fs::MAX_HANDLES {
        return Err(SyscallError::InvalidArgument);
    }

    // Copy all inputs before any blocking.
    let mut sets: [Option<FdSet>; 3] = [None, None, None];
    for (set, &user_set) in sets.iter_mut().zip(&user_sets) {
        if !user_set.is_null() {
            *set = Some(copy_value_from_user(user_set)?);
        }
    }

    let timeout = if user_tv.is_null() {
        None
    } else {
        Some(copy_value_from_user(user_tv)?)
    };

    let outcome = do_select(fs::handles(), sched, nfds as u32, sets, timeout)?;

    // Copy the pruned sets and the rewritten timeout back out.
    for (set, &user_set) in outcome.sets.iter().zip(&user_sets) {
        if let Some(set) = set {
            if !user_set.is_null() {
                copy_value_to_user(user_set, *set)?;
            }
        }
    }

    if let Some(tv) = outcome.timeout {
        if !user_tv.is_null() {
            copy_value_to_user(user_tv, tv)?;
        }
    }

    Ok(outcome.ready as u64)
}
