//! # System Time
//!
//! The system clock is a nanosecond counter advanced by the periodic timer
//! interrupt: every tick adds `tick_duration` units, plus a signed one-shot
//! adjustment while `tick_adj_ticks_rem > 0`. The drift compensator (see
//! [`drift`]) programs that adjustment to keep the counter in step with the
//! battery-backed hardware clock, which only has one-second resolution.
//!
//! All multi-word state lives behind an [`IrqLock`] so readers never observe
//! a torn update from the tick interrupt handler.

pub mod datetime;
pub mod drift;

pub use datetime::DateTime;

use core::sync::atomic::{AtomicI64, Ordering};

use crate::sync::{preempt_disable, IrqLock};

/// Timer interrupt frequency (ticks per second).
pub const TIMER_HZ: u32 = 100;

/// Units of `time_ns` per second. Nanoseconds as configured.
pub const TS_SCALE: u64 = 1_000_000_000;

/// Nanoseconds per second.
pub const BILLION: u64 = 1_000_000_000;

// The timespec rescale below multiplies when TS_SCALE divides BILLION.
const _: () = assert!(TS_SCALE <= BILLION);

/// `struct timespec`, as the syscall ABI expects it.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Timespec {
    /// Whole seconds
    pub tv_sec: i64,
    /// Nanoseconds, 0..10^9
    pub tv_nsec: i64,
}

/// `struct timeval`, as the syscall ABI expects it.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Timeval {
    /// Whole seconds
    pub tv_sec: i64,
    /// Microseconds, 0..10^6
    pub tv_usec: i64,
}

/// `struct timezone`. Obsolete; always reported as zero.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Timezone {
    /// Minutes west of Greenwich
    pub tz_minuteswest: i32,
    /// Type of DST correction
    pub tz_dsttime: i32,
}

/// POSIX clock identifiers accepted by `clock_gettime`/`clock_getres`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ClockId {
    /// Wall-clock time
    Realtime,
    /// Wall-clock time, coarse variant
    RealtimeCoarse,
    /// Time since boot
    Monotonic,
    /// Time since boot, coarse variant
    MonotonicCoarse,
    /// Time since boot, never adjusted
    MonotonicRaw,
    /// CPU time consumed by the process
    ProcessCputime,
    /// CPU time consumed by the thread
    ThreadCputime,
}

impl ClockId {
    /// Decode a raw clock id from the syscall ABI.
    pub fn from_raw(id: i32) -> Option<Self> {
        match id {
            0 => Some(Self::Realtime),
            1 => Some(Self::Monotonic),
            2 => Some(Self::ProcessCputime),
            3 => Some(Self::ThreadCputime),
            4 => Some(Self::MonotonicRaw),
            5 => Some(Self::RealtimeCoarse),
            6 => Some(Self::MonotonicCoarse),
            _ => None,
        }
    }
}

/// Access to the hardware real-time clock (one-second resolution).
pub trait RtcClock {
    /// Read the current calendar date/time.
    fn read(&self) -> DateTime;
}

/// Tick-driven clock state. Mutated by the tick handler and the drift
/// compensator, always under the interrupt-disabling lock.
struct TimeState {
    /// Units since boot
    time_ns: u64,
    /// Units added per tick
    tick_duration: u32,
    /// Signed per-tick delta while `tick_adj_ticks_rem > 0`
    tick_adj_val: i32,
    /// Ticks the adjustment still applies for
    tick_adj_ticks_rem: i32,
}

/// The system clock.
///
/// The kernel-wide instance is [`SYSTEM_CLOCK`]; separate instances can be
/// constructed so the clock logic is testable without shared state.
pub struct SystemClock {
    state: IrqLock<TimeState>,
    /// Seconds since the epoch at boot, captured from the RTC.
    boot_timestamp: AtomicI64,
}

/// Ideal tick duration in `time_ns` units.
const IDEAL_TICK: u32 = (TS_SCALE / TIMER_HZ as u64) as u32;

impl SystemClock {
    /// Create a clock at time zero with the ideal tick duration.
    pub const fn new() -> Self {
        Self {
            state: IrqLock::new(TimeState {
                time_ns: 0,
                tick_duration: IDEAL_TICK,
                tick_adj_val: 0,
                tick_adj_ticks_rem: 0,
            }),
            boot_timestamp: AtomicI64::new(0),
        }
    }

    /// Advance the clock by one tick. Called from the timer interrupt.
    pub fn timer_tick(&self) {
        let mut st = self.state.lock();

        let mut delta = st.tick_duration as u64;
        if st.tick_adj_ticks_rem > 0 {
            delta = delta.saturating_add_signed(st.tick_adj_val as i64);
            st.tick_adj_ticks_rem -= 1;
        }

        st.time_ns += delta;
    }

    /// Monotonic units since boot.
    pub fn sys_time_ns(&self) -> u64 {
        self.state.lock().time_ns
    }

    /// Seconds since the epoch.
    pub fn timestamp(&self) -> i64 {
        self.boot_timestamp.load(Ordering::Relaxed) + (self.sys_time_ns() / TS_SCALE) as i64
    }

    /// Wall-clock time as a timespec.
    pub fn real_time_timespec(&self) -> Timespec {
        let t = self.sys_time_ns();
        let (sec, nsec) = split_scaled(t);

        Timespec {
            tv_sec: self.boot_timestamp.load(Ordering::Relaxed) + sec,
            tv_nsec: nsec,
        }
    }

    /// Monotonic time as a timespec. Same representation as realtime: the
    /// wall clock is never stepped after boot, only tick-steered.
    pub fn monotonic_time_timespec(&self) -> Timespec {
        self.real_time_timespec()
    }

    /// CPU time for a task that has run for `total_ticks` ticks.
    pub fn task_cpu_timespec(&self, total_ticks: u64) -> Timespec {
        let _guard = preempt_disable();
        let tot = total_ticks * self.tick_duration() as u64;
        let (sec, nsec) = split_scaled(tot);

        Timespec {
            tv_sec: sec,
            tv_nsec: nsec,
        }
    }

    /// Resolution of every supported clock: one timer tick.
    pub fn resolution(&self) -> Timespec {
        Timespec {
            tv_sec: 0,
            tv_nsec: (BILLION / TIMER_HZ as u64) as i64,
        }
    }

    /// Seconds since the epoch at boot.
    pub fn boot_timestamp(&self) -> i64 {
        self.boot_timestamp.load(Ordering::Relaxed)
    }

    /// Current units-per-tick.
    pub fn tick_duration(&self) -> u32 {
        self.state.lock().tick_duration
    }

    /// Override the units-per-tick. Test/selftest hook.
    pub fn set_tick_duration(&self, duration: u32) {
        self.state.lock().tick_duration = duration;
    }

    /// Atomically install a tick adjustment: `adj_val` extra units per tick
    /// for the next `adj_ticks` ticks. The handler observes either the old
    /// pair or the new pair, never a mix.
    pub fn install_adjustment(&self, adj_val: i32, adj_ticks: i32) {
        let mut st = self.state.lock();
        st.tick_adj_val = adj_val;
        st.tick_adj_ticks_rem = adj_ticks;
    }

    /// Current `(adj_val, adj_ticks_rem)` pair.
    pub fn adjustment(&self) -> (i32, i32) {
        let st = self.state.lock();
        (st.tick_adj_val, st.tick_adj_ticks_rem)
    }

    /// Push `time_ns` forward to the next whole second by programming a
    /// +10%-of-a-tick adjustment, and return the number of ticks it will
    /// take. Used by the drift compensator at the moment the hardware clock
    /// crosses a second boundary; must complete quickly.
    pub fn align_to_next_second(&self) -> i32 {
        let mut st = self.state.lock();
        let hw_time_ns = round_up(st.time_ns, TS_SCALE);

        if hw_time_ns <= st.time_ns {
            return 0;
        }

        // The initial offset cannot exceed TS_SCALE, so ten seconds of
        // +tick/10 always covers it.
        let abs_drift = (hw_time_ns - st.time_ns) as i64;
        st.tick_adj_val = (IDEAL_TICK / 10) as i32;
        st.tick_adj_ticks_rem = (abs_drift / st.tick_adj_val as i64) as i32;
        st.tick_adj_ticks_rem
    }

    fn set_boot_timestamp(&self, ts: i64) {
        self.boot_timestamp.store(ts, Ordering::SeqCst);
        self.state.lock().time_ns = 0;
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

/// The kernel-wide clock instance.
pub static SYSTEM_CLOCK: SystemClock = SystemClock::new();

/// Split a scaled unit count into `(seconds, nanoseconds)`.
fn split_scaled(t: u64) -> (i64, i64) {
    let sec = (t / TS_SCALE) as i64;
    let rem = t % TS_SCALE;

    let nsec = if TS_SCALE <= BILLION {
        (rem * (BILLION / TS_SCALE)) as i64
    } else {
        (rem / (TS_SCALE / BILLION)) as i64
    };

    (sec, nsec)
}

/// Round `value` up to the next multiple of `multiple`.
fn round_up(value: u64, multiple: u64) -> u64 {
    value.div_ceil(multiple) * multiple
}

/// Capture the boot timestamp from the hardware clock and zero the tick
/// counter. The drift-compensation task should be started on its own kernel
/// thread right after this; if thread creation fails the system still runs,
/// just without compensation.
///
/// # Panics
///
/// Panics if the RTC reports a date before the epoch: the wall clock would
/// be meaningless and every derived timestamp negative.
pub fn init_system_time(clock: &SystemClock, rtc: &dyn RtcClock) {
    let d = rtc.read();
    let ts = d.to_unix_timestamp();

    if ts <= 0 {
        panic!("invalid boot-time UNIX timestamp: {}", ts);
    }

    clock.set_boot_timestamp(ts);
    log::info!("system time: {} (timestamp {})", d, ts);
}

/// Monotonic units since boot, from the kernel-wide clock.
pub fn get_sys_time() -> u64 {
    SYSTEM_CLOCK.sys_time_ns()
}

/// Seconds since the epoch, from the kernel-wide clock.
pub fn get_timestamp() -> i64 {
    SYSTEM_CLOCK.timestamp()
}

/// Tick handler entry for the kernel-wide clock.
pub fn timer_tick() {
    SYSTEM_CLOCK.timer_tick();
}
