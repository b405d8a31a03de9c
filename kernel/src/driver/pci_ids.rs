//! PCI class and vendor name tables
//!
//! The class table is kept in class-major order (class, then subclass,
//! then prog-if ascending) so [`find_class_names`] can resolve all three
//! levels with one forward scan: find the class, keep scanning while the
//! class matches to find the subclass, keep scanning while the subclass
//! matches to find the prog-if. Missing prog-if or subclass entries are
//! normal; only a missing class means the device is unknown.

/// One row of the class table.
pub struct PciDeviceClass {
    /// Class code
    pub class_id: u8,
    /// Subclass code
    pub subclass_id: u8,
    /// Programming interface code
    pub progif_id: u8,
    /// Class name
    pub class_name: &'static str,
    /// Subclass name, when registered
    pub subclass_name: Option<&'static str>,
    /// Prog-if name, when registered
    pub progif_name: Option<&'static str>,
}

/// Resolved names for a `(class, subclass, progif)` triple.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ResolvedClass {
    /// Class name, `None` for an unknown device class
    pub class_name: Option<&'static str>,
    /// Subclass name, if the subclass is registered
    pub subclass_name: Option<&'static str>,
    /// Prog-if name, if the prog-if is registered
    pub progif_name: Option<&'static str>,
}

macro_rules! class_row {
    ($c:expr, $s:expr, $p:expr, $cn:expr, $sn:expr, $pn:expr) => {
        PciDeviceClass {
            class_id: $c,
            subclass_id: $s,
            progif_id: $p,
            class_name: $cn,
            subclass_name: $sn,
            progif_name: $pn,
        }
    };
}

/// The class table. Class-major ordered; see the module docs.
#[rustfmt::skip]
pub static PCI_DEVICE_CLASSES: &[PciDeviceClass] = &[
    class_row!(0x00, 0x00, 0x00, "Unclassified", Some("Non-VGA-compatible device"), None),
    class_row!(0x00, 0x01, 0x00, "Unclassified", Some("VGA-compatible device"), None),

    class_row!(0x01, 0x00, 0x00, "Mass storage controller", Some("SCSI bus controller"), None),
    class_row!(0x01, 0x01, 0x00, "Mass storage controller", Some("IDE controller"), Some("ISA compatibility mode-only")),
    class_row!(0x01, 0x01, 0x05, "Mass storage controller", Some("IDE controller"), Some("PCI native mode-only")),
    class_row!(0x01, 0x01, 0x0A, "Mass storage controller", Some("IDE controller"), Some("ISA compatibility mode, PCI native supported")),
    class_row!(0x01, 0x01, 0x0F, "Mass storage controller", Some("IDE controller"), Some("PCI native mode, ISA compatibility supported")),
    class_row!(0x01, 0x01, 0x80, "Mass storage controller", Some("IDE controller"), Some("ISA compatibility mode-only, bus mastering")),
    class_row!(0x01, 0x01, 0x85, "Mass storage controller", Some("IDE controller"), Some("PCI native mode-only, bus mastering")),
    class_row!(0x01, 0x02, 0x00, "Mass storage controller", Some("Floppy disk controller"), None),
    class_row!(0x01, 0x03, 0x00, "Mass storage controller", Some("IPI bus controller"), None),
    class_row!(0x01, 0x04, 0x00, "Mass storage controller", Some("RAID controller"), None),
    class_row!(0x01, 0x05, 0x20, "Mass storage controller", Some("ATA controller"), Some("Single DMA")),
    class_row!(0x01, 0x05, 0x30, "Mass storage controller", Some("ATA controller"), Some("Chained DMA")),
    class_row!(0x01, 0x06, 0x00, "Mass storage controller", Some("SATA controller"), Some("Vendor specific interface")),
    class_row!(0x01, 0x06, 0x01, "Mass storage controller", Some("SATA controller"), Some("AHCI 1.0")),
    class_row!(0x01, 0x06, 0x02, "Mass storage controller", Some("SATA controller"), Some("Serial Storage Bus")),
    class_row!(0x01, 0x07, 0x00, "Mass storage controller", Some("Serial attached SCSI controller"), None),
    class_row!(0x01, 0x08, 0x01, "Mass storage controller", Some("Non-volatile memory controller"), Some("NVMHCI")),
    class_row!(0x01, 0x08, 0x02, "Mass storage controller", Some("Non-volatile memory controller"), Some("NVM Express")),
    class_row!(0x01, 0x80, 0x00, "Mass storage controller", Some("Other mass storage controller"), None),

    class_row!(0x02, 0x00, 0x00, "Network controller", Some("Ethernet controller"), None),
    class_row!(0x02, 0x01, 0x00, "Network controller", Some("Token Ring controller"), None),
    class_row!(0x02, 0x02, 0x00, "Network controller", Some("FDDI controller"), None),
    class_row!(0x02, 0x03, 0x00, "Network controller", Some("ATM controller"), None),
    class_row!(0x02, 0x04, 0x00, "Network controller", Some("ISDN controller"), None),
    class_row!(0x02, 0x80, 0x00, "Network controller", Some("Other network controller"), None),

    class_row!(0x03, 0x00, 0x00, "Display controller", Some("VGA compatible controller"), Some("VGA controller")),
    class_row!(0x03, 0x00, 0x01, "Display controller", Some("VGA compatible controller"), Some("8514-compatible controller")),
    class_row!(0x03, 0x01, 0x00, "Display controller", Some("XGA controller"), None),
    class_row!(0x03, 0x02, 0x00, "Display controller", Some("3D controller"), None),
    class_row!(0x03, 0x80, 0x00, "Display controller", Some("Other display controller"), None),

    class_row!(0x04, 0x00, 0x00, "Multimedia controller", Some("Video controller"), None),
    class_row!(0x04, 0x01, 0x00, "Multimedia controller", Some("Audio controller"), None),
    class_row!(0x04, 0x02, 0x00, "Multimedia controller", Some("Computer telephony device"), None),
    class_row!(0x04, 0x03, 0x00, "Multimedia controller", Some("Audio device"), None),
    class_row!(0x04, 0x80, 0x00, "Multimedia controller", Some("Other multimedia controller"), None),

    class_row!(0x05, 0x00, 0x00, "Memory controller", Some("RAM controller"), None),
    class_row!(0x05, 0x01, 0x00, "Memory controller", Some("Flash controller"), None),
    class_row!(0x05, 0x80, 0x00, "Memory controller", Some("Other memory controller"), None),

    class_row!(0x06, 0x00, 0x00, "Bridge", Some("Host bridge"), None),
    class_row!(0x06, 0x01, 0x00, "Bridge", Some("ISA bridge"), None),
    class_row!(0x06, 0x02, 0x00, "Bridge", Some("EISA bridge"), None),
    class_row!(0x06, 0x03, 0x00, "Bridge", Some("MCA bridge"), None),
    class_row!(0x06, 0x04, 0x00, "Bridge", Some("PCI-to-PCI bridge"), Some("Normal decode")),
    class_row!(0x06, 0x04, 0x01, "Bridge", Some("PCI-to-PCI bridge"), Some("Subtractive decode")),
    class_row!(0x06, 0x05, 0x00, "Bridge", Some("PCMCIA bridge"), None),
    class_row!(0x06, 0x06, 0x00, "Bridge", Some("NuBus bridge"), None),
    class_row!(0x06, 0x07, 0x00, "Bridge", Some("CardBus bridge"), None),
    class_row!(0x06, 0x08, 0x00, "Bridge", Some("RACEway bridge"), None),
    class_row!(0x06, 0x09, 0x00, "Bridge", Some("Semi-transparent PCI-to-PCI bridge"), None),
    class_row!(0x06, 0x0A, 0x00, "Bridge", Some("InfiniBand-to-PCI host bridge"), None),
    class_row!(0x06, 0x80, 0x00, "Bridge", Some("Other bridge"), None),

    class_row!(0x07, 0x00, 0x00, "Simple communication controller", Some("Serial controller"), Some("8250")),
    class_row!(0x07, 0x00, 0x01, "Simple communication controller", Some("Serial controller"), Some("16450")),
    class_row!(0x07, 0x00, 0x02, "Simple communication controller", Some("Serial controller"), Some("16550")),
    class_row!(0x07, 0x01, 0x00, "Simple communication controller", Some("Parallel controller"), None),
    class_row!(0x07, 0x02, 0x00, "Simple communication controller", Some("Multiport serial controller"), None),
    class_row!(0x07, 0x03, 0x00, "Simple communication controller", Some("Modem"), None),
    class_row!(0x07, 0x80, 0x00, "Simple communication controller", Some("Other communication controller"), None),

    class_row!(0x08, 0x00, 0x00, "Base system peripheral", Some("Programmable interrupt controller"), Some("8259")),
    class_row!(0x08, 0x00, 0x10, "Base system peripheral", Some("Programmable interrupt controller"), Some("I/O APIC")),
    class_row!(0x08, 0x00, 0x20, "Base system peripheral", Some("Programmable interrupt controller"), Some("I/O(x) APIC")),
    class_row!(0x08, 0x01, 0x00, "Base system peripheral", Some("DMA controller"), None),
    class_row!(0x08, 0x02, 0x00, "Base system peripheral", Some("Timer"), None),
    class_row!(0x08, 0x03, 0x00, "Base system peripheral", Some("RTC controller"), None),
    class_row!(0x08, 0x04, 0x00, "Base system peripheral", Some("PCI hot-plug controller"), None),
    class_row!(0x08, 0x05, 0x00, "Base system peripheral", Some("SD host controller"), None),
    class_row!(0x08, 0x06, 0x00, "Base system peripheral", Some("IOMMU"), None),
    class_row!(0x08, 0x80, 0x00, "Base system peripheral", Some("Other system peripheral"), None),

    class_row!(0x09, 0x00, 0x00, "Input device controller", Some("Keyboard controller"), None),
    class_row!(0x09, 0x01, 0x00, "Input device controller", Some("Digitizer pen"), None),
    class_row!(0x09, 0x02, 0x00, "Input device controller", Some("Mouse controller"), None),
    class_row!(0x09, 0x03, 0x00, "Input device controller", Some("Scanner controller"), None),
    class_row!(0x09, 0x04, 0x00, "Input device controller", Some("Gameport controller"), None),
    class_row!(0x09, 0x80, 0x00, "Input device controller", Some("Other input controller"), None),

    class_row!(0x0A, 0x00, 0x00, "Docking station", Some("Generic docking station"), None),
    class_row!(0x0A, 0x80, 0x00, "Docking station", Some("Other docking station"), None),

    class_row!(0x0B, 0x00, 0x00, "Processor", Some("386"), None),
    class_row!(0x0B, 0x01, 0x00, "Processor", Some("486"), None),
    class_row!(0x0B, 0x02, 0x00, "Processor", Some("Pentium"), None),
    class_row!(0x0B, 0x10, 0x00, "Processor", Some("Alpha"), None),
    class_row!(0x0B, 0x20, 0x00, "Processor", Some("PowerPC"), None),
    class_row!(0x0B, 0x30, 0x00, "Processor", Some("MIPS"), None),
    class_row!(0x0B, 0x40, 0x00, "Processor", Some("Co-processor"), None),

    class_row!(0x0C, 0x00, 0x00, "Serial bus controller", Some("FireWire controller"), Some("Generic")),
    class_row!(0x0C, 0x00, 0x10, "Serial bus controller", Some("FireWire controller"), Some("OHCI")),
    class_row!(0x0C, 0x01, 0x00, "Serial bus controller", Some("ACCESS bus controller"), None),
    class_row!(0x0C, 0x02, 0x00, "Serial bus controller", Some("SSA controller"), None),
    class_row!(0x0C, 0x03, 0x00, "Serial bus controller", Some("USB controller"), Some("UHCI")),
    class_row!(0x0C, 0x03, 0x10, "Serial bus controller", Some("USB controller"), Some("OHCI")),
    class_row!(0x0C, 0x03, 0x20, "Serial bus controller", Some("USB controller"), Some("EHCI (USB2)")),
    class_row!(0x0C, 0x03, 0x30, "Serial bus controller", Some("USB controller"), Some("XHCI (USB3)")),
    class_row!(0x0C, 0x03, 0xFE, "Serial bus controller", Some("USB controller"), Some("USB device")),
    class_row!(0x0C, 0x04, 0x00, "Serial bus controller", Some("Fibre Channel controller"), None),
    class_row!(0x0C, 0x05, 0x00, "Serial bus controller", Some("SMBus controller"), None),
    class_row!(0x0C, 0x06, 0x00, "Serial bus controller", Some("InfiniBand controller"), None),
    class_row!(0x0C, 0x80, 0x00, "Serial bus controller", Some("Other serial bus controller"), None),

    class_row!(0x0D, 0x00, 0x00, "Wireless controller", Some("iRDA compatible controller"), None),
    class_row!(0x0D, 0x11, 0x00, "Wireless controller", Some("Bluetooth controller"), None),
    class_row!(0x0D, 0x20, 0x00, "Wireless controller", Some("802.11a controller"), None),
    class_row!(0x0D, 0x21, 0x00, "Wireless controller", Some("802.11b controller"), None),
    class_row!(0x0D, 0x80, 0x00, "Wireless controller", Some("Other wireless controller"), None),

    class_row!(0x0E, 0x00, 0x00, "Intelligent controller", Some("I2O controller"), None),

    class_row!(0x0F, 0x01, 0x00, "Satellite communication controller", Some("Satellite TV controller"), None),
    class_row!(0x0F, 0x02, 0x00, "Satellite communication controller", Some("Satellite audio controller"), None),

    class_row!(0x10, 0x00, 0x00, "Encryption controller", Some("Network and computing encryption"), None),
    class_row!(0x10, 0x10, 0x00, "Encryption controller", Some("Entertainment encryption"), None),
    class_row!(0x10, 0x80, 0x00, "Encryption controller", Some("Other encryption controller"), None),

    class_row!(0x11, 0x00, 0x00, "Signal processing controller", Some("DPIO module"), None),
    class_row!(0x11, 0x01, 0x00, "Signal processing controller", Some("Performance counters"), None),
    class_row!(0x11, 0x80, 0x00, "Signal processing controller", Some("Other signal processing controller"), None),

    class_row!(0x12, 0x00, 0x00, "Processing accelerator", None, None),
    class_row!(0x13, 0x00, 0x00, "Non-essential instrumentation", None, None),
    class_row!(0x40, 0x00, 0x00, "Co-processor", None, None),
];

/// One row of the vendor table.
pub struct PciVendor {
    /// Vendor identifier
    pub vendor_id: u16,
    /// Registered vendor name
    pub name: &'static str,
}

macro_rules! vendor {
    ($id:expr, $name:expr) => {
        PciVendor {
            vendor_id: $id,
            name: $name,
        }
    };
}

/// Known vendor ids.
#[rustfmt::skip]
pub static PCI_VENDORS: &[PciVendor] = &[
    vendor!(0x1000, "Broadcom / LSI"),
    vendor!(0x1002, "AMD/ATI"),
    vendor!(0x1013, "Cirrus Logic"),
    vendor!(0x1022, "AMD"),
    vendor!(0x1028, "Dell"),
    vendor!(0x1039, "Silicon Integrated Systems"),
    vendor!(0x103C, "Hewlett-Packard"),
    vendor!(0x1043, "ASUSTeK"),
    vendor!(0x104C, "Texas Instruments"),
    vendor!(0x105A, "Promise Technology"),
    vendor!(0x106B, "Apple"),
    vendor!(0x1077, "QLogic"),
    vendor!(0x1095, "Silicon Image"),
    vendor!(0x10B7, "3Com"),
    vendor!(0x10DE, "NVIDIA"),
    vendor!(0x10EC, "Realtek"),
    vendor!(0x10EE, "Xilinx"),
    vendor!(0x1106, "VIA Technologies"),
    vendor!(0x1172, "Altera"),
    vendor!(0x11AB, "Marvell"),
    vendor!(0x121A, "3Dfx Interactive"),
    vendor!(0x1234, "QEMU"),
    vendor!(0x126F, "Silicon Motion"),
    vendor!(0x102B, "Matrox"),
    vendor!(0x1414, "Microsoft"),
    vendor!(0x1458, "Gigabyte"),
    vendor!(0x1462, "Micro-Star International"),
    vendor!(0x144D, "Samsung Electronics"),
    vendor!(0x14E4, "Broadcom"),
    vendor!(0x15AD, "VMware"),
    vendor!(0x15B7, "SanDisk"),
    vendor!(0x1679, "Tehuti Networks"),
    vendor!(0x168C, "Qualcomm Atheros"),
    vendor!(0x17AA, "Lenovo"),
    vendor!(0x17CB, "Qualcomm"),
    vendor!(0x1969, "Qualcomm Atheros"),
    vendor!(0x1987, "Phison Electronics"),
    vendor!(0x19E5, "Huawei"),
    vendor!(0x1A03, "ASPEED Technology"),
    vendor!(0x1AF4, "Red Hat (virtio)"),
    vendor!(0x1B36, "Red Hat (QEMU)"),
    vendor!(0x1C5C, "SK hynix"),
    vendor!(0x1D0F, "Amazon Annapurna Labs"),
    vendor!(0x1D6B, "Linux Foundation"),
    vendor!(0x1E0F, "KIOXIA"),
    vendor!(0x2646, "Kingston Technology"),
    vendor!(0x5333, "S3 Graphics"),
    vendor!(0x80EE, "InnoTek (VirtualBox)"),
    vendor!(0x8086, "Intel"),
    vendor!(0x9005, "Adaptec"),
];

/// Resolve the human-readable names for a class triple.
pub fn find_class_names(class_id: u8, subclass_id: u8, progif_id: u8) -> ResolvedClass {
    let mut resolved = ResolvedClass::default();

    // Stage 1: locate the class.
    let Some(start) = PCI_DEVICE_CLASSES
        .iter()
        .position(|row| row.class_id == class_id)
    else {
        return resolved;
    };
    resolved.class_name = Some(PCI_DEVICE_CLASSES[start].class_name);

    // Stage 2: from there, the subclass; rows for one class are adjacent.
    let mut i = start;
    while i < PCI_DEVICE_CLASSES.len() && PCI_DEVICE_CLASSES[i].class_id == class_id {
        if PCI_DEVICE_CLASSES[i].subclass_id == subclass_id {
            resolved.subclass_name = PCI_DEVICE_CLASSES[i].subclass_name;
            break;
        }
        i += 1;
    }

    if resolved.subclass_name.is_none() {
        return resolved;
    }

    // Stage 3: from the subclass onward, the prog-if.
    while i < PCI_DEVICE_CLASSES.len()
        && PCI_DEVICE_CLASSES[i].class_id == class_id
        && PCI_DEVICE_CLASSES[i].subclass_id == subclass_id
    {
        if PCI_DEVICE_CLASSES[i].progif_id == progif_id {
            resolved.progif_name = PCI_DEVICE_CLASSES[i].progif_name;
            break;
        }
        i += 1;
    }

    resolved
}

/// Resolve a vendor id to its registered name.
pub fn find_vendor_name(vendor_id: u16) -> Option<&'static str> {
    PCI_VENDORS
        .iter()
        .find(|v| v.vendor_id == vendor_id)
        .map(|v| v.name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_class_table_is_class_major_ordered() {
        // The forward-scan resolution depends on this ordering.
        for pair in PCI_DEVICE_CLASSES.windows(2) {
            let a = (pair[0].class_id, pair[0].subclass_id, pair[0].progif_id);
            let b = (pair[1].class_id, pair[1].subclass_id, pair[1].progif_id);
            assert!(a < b, "table rows out of order: {:?} >= {:?}", a, b);
        }
    }

    #[test]
    fn test_every_row_resolves_to_itself() {
        for row in PCI_DEVICE_CLASSES {
            let resolved = find_class_names(row.class_id, row.subclass_id, row.progif_id);
            assert_eq!(resolved.class_name, Some(row.class_name));
            assert_eq!(resolved.subclass_name, row.subclass_name);
            assert_eq!(resolved.progif_name, row.progif_name);
        }
    }

    #[test]
    fn test_missing_progif_keeps_higher_names() {
        let resolved = find_class_names(0x0C, 0x03, 0x42);
        assert_eq!(resolved.class_name, Some("Serial bus controller"));
        assert_eq!(resolved.subclass_name, Some("USB controller"));
        assert_eq!(resolved.progif_name, None);
    }

    #[test]
    fn test_missing_subclass_keeps_class_name() {
        let resolved = find_class_names(0x06, 0x42, 0x00);
        assert_eq!(resolved.class_name, Some("Bridge"));
        assert_eq!(resolved.subclass_name, None);
        assert_eq!(resolved.progif_name, None);
    }

    #[test]
    fn test_unknown_class() {
        assert_eq!(find_class_names(0xEE, 0x00, 0x00), ResolvedClass::default());
    }

    #[test]
    fn test_bridge_lookup() {
        let resolved = find_class_names(0x06, 0x04, 0x00);
        assert_eq!(resolved.subclass_name, Some("PCI-to-PCI bridge"));
        assert_eq!(resolved.progif_name, Some("Normal decode"));
    }

    #[test]
    fn test_vendor_lookup() {
        assert_eq!(find_vendor_name(0x8086), Some("Intel"));
        assert_eq!(find_vendor_name(0x1AF4), Some("Red Hat (virtio)"));
        assert_eq!(find_vendor_name(0x0666), None);
    }
}
