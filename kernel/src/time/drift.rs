//! # Clock Drift Compensation
//!
//! The boot timestamp is captured from the hardware clock with one-second
//! resolution, so the system starts with an unknown sub-second offset; and
//! the timer crystal drifts over hours of uptime. A dedicated kernel task
//! runs the three phases below to keep `get_timestamp()` equal to the
//! hardware clock's seconds:
//!
//! 1. **Boot alignment** - wait for the exact moment the hardware clock
//!    increments its second counter, then push the system clock forward to
//!    the next whole second via a tick adjustment.
//! 2. **Verification** - after the push has had time to complete, the
//!    remaining drift must be zero. A non-zero value means the adjustment
//!    arithmetic itself is broken, which is fatal.
//! 3. **Steady state** - re-measure the drift periodically (hourly by
//!    default) and program a compensating adjustment when it is non-zero.

use super::{RtcClock, SystemClock, TIMER_HZ, TS_SCALE};
use crate::sched::SchedOps;
use crate::sync::preempt_disable;

/// Default delay between steady-state drift measurements: one hour.
pub const DRIFT_ADJ_LOOP_DELAY: u32 = 3600 * TIMER_HZ;

/// The drift-compensation task body. Run [`DriftCompensator::run`] on its
/// own kernel thread after [`super::init_system_time`].
pub struct DriftCompensator<'a> {
    clock: &'a SystemClock,
    rtc: &'a dyn RtcClock,
    sched: &'a dyn SchedOps,
    loop_delay_ticks: u32,
}

impl<'a> DriftCompensator<'a> {
    /// Create a compensator with the default measurement period.
    pub fn new(clock: &'a SystemClock, rtc: &'a dyn RtcClock, sched: &'a dyn SchedOps) -> Self {
        Self {
            clock,
            rtc,
            sched,
            loop_delay_ticks: DRIFT_ADJ_LOOP_DELAY,
        }
    }

    /// Override the steady-state measurement period (selftest hook).
    pub fn with_loop_delay(mut self, ticks: u32) -> Self {
        self.loop_delay_ticks = ticks;
        self
    }

    /// Run all phases, then compensate forever.
    pub fn run(&self) -> ! {
        self.align_at_boot();
        self.verify_after_alignment();

        loop {
            self.sched.sleep_ticks(self.loop_delay_ticks);
            self.steady_state_once();
        }
    }

    /// Phase 1: align the tick clock to the hardware second boundary.
    pub fn align_at_boot(&self) {
        // Let the tick counter accumulate a real value first.
        self.sched.sleep_ticks(TIMER_HZ);

        // Catch the instant the hardware second changes. Preemption stays
        // off while sampling so the reference second cannot go stale
        // between the read and the comparison; the yield gives other tasks
        // the CPU in between.
        let mut guard = preempt_disable();
        let mut hw_ts = self.rtc.read().to_unix_timestamp();

        loop {
            let ts = self.rtc.read().to_unix_timestamp();
            if ts != hw_ts {
                break;
            }

            drop(guard);
            let preempted = self.sched.yield_now();
            guard = preempt_disable();

            if preempted {
                // Lost the CPU for a while; the reference second is stale.
                hw_ts = self.rtc.read().to_unix_timestamp();
            }
        }

        // The hardware clock just crossed a second boundary, so the system
        // clock belongs on a whole second too. Program the push before
        // anything else can run.
        let ticks = self.clock.align_to_next_second();
        drop(guard);

        if ticks > 0 {
            log::debug!(
                "clock drift: boot alignment over {} ticks ({} ms)",
                ticks,
                ticks as u64 * 1000 / TIMER_HZ as u64
            );
        }
    }

    /// Phase 2: the alignment must have removed all drift measurable in
    /// seconds. Panics otherwise, because it proves the adjustment math is
    /// wrong, not the hardware.
    pub fn verify_after_alignment(&self) {
        // Boot alignment needs at most 10 s to compensate the at-most 1 s
        // initial offset; 20 s leaves margin.
        self.sched.sleep_ticks(20 * TIMER_HZ);

        let drift = self.measure_drift();
        if drift != 0 {
            panic!(
                "time-management failure: drift ({}) must be zero after sync",
                drift
            );
        }

        log::info!("clock drift: boot alignment verified");
    }

    /// One steady-state iteration: measure, and compensate if needed.
    pub fn steady_state_once(&self) {
        let drift = self.measure_drift();
        if drift == 0 {
            return;
        }

        let (adj_val, adj_ticks) = compute_adjustment(drift);
        self.clock.install_adjustment(adj_val, adj_ticks);

        log::info!(
            "clock drift: {} s, compensating over {} ticks",
            drift,
            adj_ticks
        );
    }

    /// Signed drift in whole seconds: system timestamp minus hardware
    /// timestamp. Both samples are taken in one preemption-disabled window.
    fn measure_drift(&self) -> i64 {
        let d;
        let sys_ts;
        {
            let _guard = preempt_disable();
            d = self.rtc.read();
            sys_ts = self.clock.timestamp();
        }

        sys_ts - d.to_unix_timestamp()
    }
}

/// Adjustment for a measured drift: a tenth of a tick per tick, directed
/// against the drift, sustained for ten real seconds per drifted second.
///
/// Positive drift means the system clock runs ahead of the hardware clock
/// and needs a negative per-tick delta; negative drift the opposite.
fn compute_adjustment(drift: i64) -> (i32, i32) {
    let tick = (TS_SCALE / TIMER_HZ as u64) as i32;

    let adj_val = if drift > 0 { -(tick / 10) } else { tick / 10 };
    let adj_ticks = (drift.unsigned_abs() * TIMER_HZ as u64 * 10) as i32;

    (adj_val, adj_ticks)
}
