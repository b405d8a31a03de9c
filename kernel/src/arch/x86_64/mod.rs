//! x86_64 specifics: port I/O and the CMOS real-time clock.

#[cfg(target_os = "none")]
pub mod io;
pub mod rtc;
