//! Kernel panic handler

use core::panic::PanicInfo;

#[panic_handler]
fn panic(info: &PanicInfo) -> ! {
    // No recovery from here; stop taking interrupts.
    crate::arch::irq_save_disable();

    log::error!("KERNEL PANIC: {}", info);

    loop {
        crate::arch::halt();
    }
}
