//! Device drivers
//!
//! Bus-level discovery lives here. Individual device drivers are userspace
//! concerns; the kernel's job ends at enumerating what is present and
//! answering configuration-space access requests.

pub mod acpi;
pub mod pci;
pub mod pci_ids;

/// Initialize the driver subsystems.
pub fn init() {
    log::info!("Initializing driver subsystems");

    pci::init();
}
