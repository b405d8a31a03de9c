//! Architecture support
//!
//! Interrupt-flag save/restore and the handful of privileged instructions
//! the portable kernel code needs. Everything that touches hardware is
//! confined to bare-metal builds (`target_os = "none"`); hosted builds get
//! no-op equivalents so the subsystems above stay testable.

pub mod x86_64;

/// Saved interrupt-enable state, returned by [`irq_save_disable`].
#[cfg(target_os = "none")]
#[derive(Clone, Copy, Debug)]
pub struct IrqState {
    enabled: bool,
}

/// Saved interrupt-enable state. Hosted builds have no interrupt flag;
/// the type keeps the guard structure identical.
#[cfg(not(target_os = "none"))]
#[derive(Clone, Copy, Debug)]
pub struct IrqState {
    _priv: (),
}

/// Save the interrupt flag and disable interrupts.
#[cfg(target_os = "none")]
#[inline]
pub fn irq_save_disable() -> IrqState {
    let enabled = ::x86_64::instructions::interrupts::are_enabled();
    ::x86_64::instructions::interrupts::disable();
    IrqState { enabled }
}

/// Restore a previously saved interrupt flag.
#[cfg(target_os = "none")]
#[inline]
pub fn irq_restore(state: IrqState) {
    if state.enabled {
        ::x86_64::instructions::interrupts::enable();
    }
}

/// Halt until the next interrupt.
#[cfg(target_os = "none")]
#[inline]
pub fn halt() {
    ::x86_64::instructions::hlt();
}

#[cfg(not(target_os = "none"))]
#[inline]
pub fn irq_save_disable() -> IrqState {
    IrqState { _priv: () }
}

#[cfg(not(target_os = "none"))]
#[inline]
pub fn irq_restore(_state: IrqState) {}
