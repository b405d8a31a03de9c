//! # Erebus Kernel
//!
//! The core of a small monolithic x86_64 kernel: fine-grained timekeeping
//! with hardware-clock drift compensation, PCI/PCIe bus enumeration over
//! interchangeable configuration-space backends, and `select()`-style I/O
//! readiness multiplexing, together with the syscall surface that exposes
//! them.
//!
//! ## Structure
//!
//! - [`time`] - the tick-driven system clock, POSIX clock reads and the
//!   drift compensator task
//! - [`driver`] - ACPI table lookup and the PCI enumerator
//! - [`select`] - the readiness multiplexer core
//! - [`fs`] - the handle table and the per-handle readiness seam
//! - [`sched`] - the blocking interfaces and wait objects the above are
//!   built on; the scheduler itself is provided by the embedder
//! - [`syscall`] - userspace entry points
//!
//! Hardware access (port I/O, the CMOS clock, physical-memory windows) is
//! confined to bare-metal builds; every subsystem above that line builds
//! and tests on the host.

#![no_std]
#![deny(unsafe_op_in_unsafe_fn)]
#![warn(missing_docs)]

extern crate alloc;

pub mod arch;
pub mod driver;
pub mod fs;
pub mod mem;
pub mod sched;
pub mod select;
pub mod sync;
pub mod syscall;
pub mod time;

#[cfg(all(target_os = "none", not(test)))]
mod panic;

/// Kernel version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Early platform bring-up: capture the boot timestamp from the CMOS
/// clock and enumerate the PCI buses. Memory, interrupts and the
/// scheduler must already be up; the caller then starts
/// [`time::drift::DriftCompensator::run`] on a kernel thread of its own
/// (when thread creation fails, the clock simply runs uncompensated).
#[cfg(target_os = "none")]
pub fn init_platform() {
    log::info!("Erebus kernel v{} core init", VERSION);

    time::init_system_time(&time::SYSTEM_CLOCK, &arch::x86_64::rtc::CmosRtc);
    driver::init();
}
