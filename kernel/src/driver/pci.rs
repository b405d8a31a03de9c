//! PCI/PCIe bus enumeration and configuration-space access
//!
//! Configuration space is reachable through one of two interchangeable
//! backends, selected once at init: the legacy `0xCF8/0xCFC` I/O port pair
//! (segment 0 only, 256 bytes per function) or memory-mapped ECAM windows
//! described by the ACPI MCFG table (4 KiB per function, one window per
//! segment). On top of either backend, discovery walks every bus reachable
//! from the root through PCI-to-PCI bridges and records what it finds.

use alloc::collections::BTreeMap;
use alloc::format;
use alloc::string::String;
use alloc::vec::Vec;
use spin::RwLock;

use super::{acpi, pci_ids};

/// Legacy configuration address port.
#[cfg(target_os = "none")]
const PCI_CONFIG_ADDRESS: u16 = 0xCF8;
/// Legacy configuration data port.
#[cfg(target_os = "none")]
const PCI_CONFIG_DATA: u16 = 0xCFC;

/// Offset of the vendor:device id doubleword.
const OFF_VENDOR_DEVICE: u32 = 0x00;
/// Offset of the class:subclass:progif:revision doubleword.
const OFF_CLASS_INFO: u32 = 0x08;
/// Offset of the header type byte (bit 7 = multi-function).
const OFF_HEADER_TYPE: u32 = 0x0E;
/// Header type 1: secondary bus number.
const OFF_SECONDARY_BUS: u32 = 0x19;
/// Header type 1: subordinate bus number.
const OFF_SUBORDINATE_BUS: u32 = 0x1A;

/// Class/subclass identifying a PCI-to-PCI bridge.
const CLASS_BRIDGE: u8 = 0x06;
const SUBCLASS_PCI_BRIDGE: u8 = 0x04;

/// Location of one function in configuration space.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub struct PciLoc {
    /// Segment group
    pub seg: u16,
    /// Bus number
    pub bus: u8,
    /// Device number, 0..32
    pub dev: u8,
    /// Function number, 0..8
    pub func: u8,
}

impl PciLoc {
    /// Build a location.
    pub const fn new(seg: u16, bus: u8, dev: u8, func: u8) -> Self {
        Self {
            seg,
            bus,
            dev,
            func,
        }
    }
}

/// Access width for configuration-space reads and writes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AccessWidth {
    /// 8-bit access
    U8,
    /// 16-bit access
    U16,
    /// 32-bit access
    U32,
}

impl AccessWidth {
    /// Width in bytes.
    pub const fn bytes(self) -> u32 {
        match self {
            Self::U8 => 1,
            Self::U16 => 2,
            Self::U32 => 4,
        }
    }
}

/// PCI subsystem errors.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PciError {
    /// Offset/width/segment not valid for the backend
    InvalidArgument,
    /// No device responds at the probed location
    NoSuchDevice,
    /// No configuration access backend selected yet
    NotInitialized,
    /// Backend cannot run in this build (hosted test build)
    Unsupported,
}

/// A configuration-space access backend.
pub trait ConfigAccess {
    /// Read `width` bits at `off` of the function at `loc`.
    fn read(&self, loc: PciLoc, off: u32, width: AccessWidth) -> Result<u32, PciError>;

    /// Write `width` bits at `off` of the function at `loc`.
    fn write(&self, loc: PciLoc, off: u32, width: AccessWidth, value: u32) -> Result<(), PciError>;
}

/// Offset must be inside the window and aligned to the access width.
fn check_cfg_offset(off: u32, width: AccessWidth, limit: u32) -> Result<(), PciError> {
    if off >= limit || off & (width.bytes() - 1) != 0 {
        return Err(PciError::InvalidArgument);
    }
    Ok(())
}

// ============================================================================
// Legacy I/O Port Backend
// ============================================================================

/// Address-port encoding for a legacy configuration access: enable bit,
/// bus, device, function, and the doubleword-aligned offset.
fn legacy_config_address(loc: PciLoc, off: u32) -> u32 {
    0x8000_0000
        | (loc.bus as u32) << 16
        | (loc.dev as u32) << 11
        | (loc.func as u32) << 8
        | (off & !3)
}

/// Configuration access through the `0xCF8/0xCFC` port pair. Conventional
/// PCI only: no segments, 256 bytes of configuration space per function.
pub struct LegacyPortAccess;

impl LegacyPortAccess {
    fn validate(loc: PciLoc, off: u32, width: AccessWidth) -> Result<(), PciError> {
        if loc.seg != 0 {
            // Conventional PCI has no segment support.
            return Err(PciError::InvalidArgument);
        }
        check_cfg_offset(off, width, 256)
    }
}

impl ConfigAccess for LegacyPortAccess {
    #[cfg(target_os = "none")]
    fn read(&self, loc: PciLoc, off: u32, width: AccessWidth) -> Result<u32, PciError> {
        use crate::arch::x86_64::io::{inb, inl, inw, outl};

        Self::validate(loc, off, width)?;
        let data_port = PCI_CONFIG_DATA + (off & 3) as u16;

        // SAFETY: the config address/data ports belong to the PCI host
        // bridge and are only touched through this backend.
        unsafe {
            outl(PCI_CONFIG_ADDRESS, legacy_config_address(loc, off));
            Ok(match width {
                AccessWidth::U8 => inb(data_port) as u32,
                AccessWidth::U16 => inw(data_port) as u32,
                AccessWidth::U32 => inl(data_port),
            })
        }
    }

    #[cfg(target_os = "none")]
    fn write(&self, loc: PciLoc, off: u32, width: AccessWidth, value: u32) -> Result<(), PciError> {
        use crate::arch::x86_64::io::{outb, outl, outw};

        Self::validate(loc, off, width)?;
        let data_port = PCI_CONFIG_DATA + (off & 3) as u16;

        // SAFETY: see read().
        unsafe {
            outl(PCI_CONFIG_ADDRESS, legacy_config_address(loc, off));
            match width {
                AccessWidth::U8 => outb(data_port, value as u8),
                AccessWidth::U16 => outw(data_port, value as u16),
                AccessWidth::U32 => outl(data_port, value),
            }
        }
        Ok(())
    }

    #[cfg(not(target_os = "none"))]
    fn read(&self, loc: PciLoc, off: u32, width: AccessWidth) -> Result<u32, PciError> {
        Self::validate(loc, off, width)?;
        Err(PciError::Unsupported)
    }

    #[cfg(not(target_os = "none"))]
    fn write(&self, loc: PciLoc, off: u32, width: AccessWidth, _value: u32) -> Result<(), PciError> {
        Self::validate(loc, off, width)?;
        Err(PciError::Unsupported)
    }
}

// ============================================================================
// ECAM (Memory-Mapped) Backend
// ============================================================================

/// One ECAM window, from an MCFG allocation entry.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PciSegment {
    /// Physical base of the window
    pub base_paddr: u64,
    /// Segment group this window serves
    pub segment: u16,
    /// First bus number covered
    pub start_bus: u8,
    /// Last bus number covered
    pub end_bus: u8,
}

/// Byte length of one MCFG allocation entry.
const MCFG_ENTRY_LEN: usize = 16;
/// Reserved bytes between the MCFG header and its first entry.
const MCFG_RESERVED_LEN: usize = 8;

/// Parse the allocation entries of a raw MCFG table (header included).
/// A malformed table yields no segments, which drops the system back to
/// the legacy backend.
pub fn parse_mcfg_allocations(table: &[u8]) -> Vec<PciSegment> {
    let mut segments = Vec::new();

    let entries_off = acpi::SDT_HEADER_LEN + MCFG_RESERVED_LEN;
    if table.len() < entries_off {
        return segments;
    }

    for entry in table[entries_off..].chunks_exact(MCFG_ENTRY_LEN) {
        let base_paddr = u64::from_le_bytes([
            entry[0], entry[1], entry[2], entry[3], entry[4], entry[5], entry[6], entry[7],
        ]);
        let segment = u16::from_le_bytes([entry[8], entry[9]]);
        let start_bus = entry[10];
        let end_bus = entry[11];

        if end_bus < start_bus {
            continue;
        }

        segments.push(PciSegment {
            base_paddr,
            segment,
            start_bus,
            end_bus,
        });
    }

    segments
}

/// Physical address of `(loc, off)` inside a segment's ECAM window: 1 MiB
/// per bus, 32 KiB per device, 4 KiB per function.
fn ecam_address(seg: &PciSegment, loc: PciLoc, off: u32) -> u64 {
    seg.base_paddr
        + (((loc.bus - seg.start_bus) as u64) << 20)
        + ((loc.dev as u64) << 15)
        + ((loc.func as u64) << 12)
        + off as u64
}

/// Configuration access through memory-mapped ECAM windows.
pub struct EcamAccess {
    segments: Vec<PciSegment>,
}

impl EcamAccess {
    /// Build the backend from parsed MCFG allocations.
    pub fn new(segments: Vec<PciSegment>) -> Self {
        Self { segments }
    }

    /// The windows this backend serves.
    pub fn segments(&self) -> &[PciSegment] {
        &self.segments
    }

    fn window_for(&self, loc: PciLoc) -> Result<&PciSegment, PciError> {
        self.segments
            .iter()
            .find(|s| {
                s.segment == loc.seg && (s.start_bus..=s.end_bus).contains(&loc.bus)
            })
            .ok_or(PciError::InvalidArgument)
    }
}

impl ConfigAccess for EcamAccess {
    #[cfg(target_os = "none")]
    fn read(&self, loc: PciLoc, off: u32, width: AccessWidth) -> Result<u32, PciError> {
        use crate::mem::{phys_to_virt, PhysAddr};

        check_cfg_offset(off, width, 4096)?;
        let seg = self.window_for(loc)?;
        let virt = phys_to_virt(PhysAddr::new(ecam_address(seg, loc, off))).as_u64();

        // SAFETY: the window covers 4 KiB per function and off is inside
        // and aligned; ECAM registers require exactly-sized accesses.
        unsafe {
            Ok(match width {
                AccessWidth::U8 => (virt as *const u8).read_volatile() as u32,
                AccessWidth::U16 => (virt as *const u16).read_volatile() as u32,
                AccessWidth::U32 => (virt as *const u32).read_volatile(),
            })
        }
    }

    #[cfg(target_os = "none")]
    fn write(&self, loc: PciLoc, off: u32, width: AccessWidth, value: u32) -> Result<(), PciError> {
        use crate::mem::{phys_to_virt, PhysAddr};

        check_cfg_offset(off, width, 4096)?;
        let seg = self.window_for(loc)?;
        let virt = phys_to_virt(PhysAddr::new(ecam_address(seg, loc, off))).as_u64();

        // SAFETY: see read().
        unsafe {
            match width {
                AccessWidth::U8 => (virt as *mut u8).write_volatile(value as u8),
                AccessWidth::U16 => (virt as *mut u16).write_volatile(value as u16),
                AccessWidth::U32 => (virt as *mut u32).write_volatile(value),
            }
        }
        Ok(())
    }

    #[cfg(not(target_os = "none"))]
    fn read(&self, loc: PciLoc, off: u32, width: AccessWidth) -> Result<u32, PciError> {
        check_cfg_offset(off, width, 4096)?;
        self.window_for(loc)?;
        Err(PciError::Unsupported)
    }

    #[cfg(not(target_os = "none"))]
    fn write(&self, loc: PciLoc, off: u32, width: AccessWidth, _value: u32) -> Result<(), PciError> {
        check_cfg_offset(off, width, 4096)?;
        self.window_for(loc)?;
        Err(PciError::Unsupported)
    }
}

// ============================================================================
// Backend Selection
// ============================================================================

/// The backend selected at init.
pub enum ConfigBackend {
    /// Legacy I/O ports
    Legacy(LegacyPortAccess),
    /// Memory-mapped ECAM
    Ecam(EcamAccess),
}

impl ConfigAccess for ConfigBackend {
    fn read(&self, loc: PciLoc, off: u32, width: AccessWidth) -> Result<u32, PciError> {
        match self {
            Self::Legacy(a) => a.read(loc, off, width),
            Self::Ecam(a) => a.read(loc, off, width),
        }
    }

    fn write(&self, loc: PciLoc, off: u32, width: AccessWidth, value: u32) -> Result<(), PciError> {
        match self {
            Self::Legacy(a) => a.write(loc, off, width, value),
            Self::Ecam(a) => a.write(loc, off, width, value),
        }
    }
}

static CONFIG_BACKEND: RwLock<Option<ConfigBackend>> = RwLock::new(None);

/// Read from configuration space through the active backend.
pub fn config_read(loc: PciLoc, off: u32, width: AccessWidth) -> Result<u32, PciError> {
    CONFIG_BACKEND
        .read()
        .as_ref()
        .ok_or(PciError::NotInitialized)?
        .read(loc, off, width)
}

/// Write to configuration space through the active backend.
pub fn config_write(loc: PciLoc, off: u32, width: AccessWidth, value: u32) -> Result<(), PciError> {
    CONFIG_BACKEND
        .read()
        .as_ref()
        .ok_or(PciError::NotInitialized)?
        .write(loc, off, width, value)
}

// ============================================================================
// Device Probing
// ============================================================================

/// Basic identification of one function, from the standard header.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PciDeviceInfo {
    /// Vendor id
    pub vendor_id: u16,
    /// Device id
    pub device_id: u16,
    /// Class code
    pub class_id: u8,
    /// Subclass code
    pub subclass_id: u8,
    /// Programming interface
    pub progif_id: u8,
    /// Revision id
    pub revision: u8,
    /// Header type with the multi-function bit masked off
    pub header_type: u8,
    /// Whether the device exposes functions 1..7
    pub multi_func: bool,
}

/// Probe one function. [`PciError::NoSuchDevice`] when nothing responds
/// (vendor id all-zeros or all-ones).
pub fn device_info(access: &dyn ConfigAccess, loc: PciLoc) -> Result<PciDeviceInfo, PciError> {
    let dev_vendor = access.read(loc, OFF_VENDOR_DEVICE, AccessWidth::U32)?;
    let vendor_id = dev_vendor as u16;

    if vendor_id == 0xFFFF || vendor_id == 0 {
        return Err(PciError::NoSuchDevice);
    }

    let class_info = access.read(loc, OFF_CLASS_INFO, AccessWidth::U32)?;
    let header = access.read(loc, OFF_HEADER_TYPE, AccessWidth::U8)?;

    Ok(PciDeviceInfo {
        vendor_id,
        device_id: (dev_vendor >> 16) as u16,
        class_id: (class_info >> 24) as u8,
        subclass_id: (class_info >> 16) as u8,
        progif_id: (class_info >> 8) as u8,
        revision: class_info as u8,
        header_type: (header & 0x7F) as u8,
        multi_func: header & 0x80 != 0,
    })
}

/// Human-readable one-liner for a discovered function, from the class and
/// vendor tables. More specific names win; whatever is missing degrades to
/// raw class/subclass codes.
pub fn describe_device(info: &PciDeviceInfo) -> String {
    let names = pci_ids::find_class_names(info.class_id, info.subclass_id, info.progif_id);
    let vendor = pci_ids::find_vendor_name(info.vendor_id);

    match (names.subclass_name, names.progif_name, vendor) {
        (Some(sub), Some(progif), Some(vendor)) => format!("{}: {} {}", sub, vendor, progif),
        (Some(sub), Some(progif), None) => format!("{} ({})", sub, progif),
        (Some(sub), None, Some(vendor)) => format!("{}: {}", sub, vendor),
        (Some(sub), None, None) => String::from(sub),
        (None, _, _) => match (names.class_name, vendor) {
            (Some(class), Some(vendor)) => {
                format!("{}: {} (subclass: {:#04x})", class, vendor, info.subclass_id)
            }
            (Some(class), None) => format!("{} (subclass: {:#04x})", class, info.subclass_id),
            (None, Some(vendor)) => format!(
                "vendor: {}, class: {:#04x}, subclass: {:#04x}",
                vendor, info.class_id, info.subclass_id
            ),
            (None, None) => format!(
                "class: {:#04x}, subclass: {:#04x}",
                info.class_id, info.subclass_id
            ),
        },
    }
}

// ============================================================================
// Bus Discovery
// ============================================================================

/// Visitation state of one bus number during a segment walk.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum BusState {
    NotVisited,
    ToVisit,
    Visited,
}

/// A discovered function.
#[derive(Clone, Copy, Debug)]
pub struct PciFunction {
    /// Where it lives
    pub loc: PciLoc,
    /// What it is
    pub info: PciDeviceInfo,
}

struct BusScanner<'a> {
    access: &'a dyn ConfigAccess,
    seg: u16,
    buses: [BusState; 256],
    found: Vec<PciFunction>,
}

impl<'a> BusScanner<'a> {
    fn new(access: &'a dyn ConfigAccess, seg: u16) -> Self {
        Self {
            access,
            seg,
            buses: [BusState::NotVisited; 256],
            found: Vec::new(),
        }
    }

    fn mark_to_visit(&mut self, bus: u8) {
        if self.buses[bus as usize] == BusState::NotVisited {
            self.buses[bus as usize] = BusState::ToVisit;
        }
    }

    /// Discover one function; returns whether it responded. Bridges mark
    /// their secondary bus range for a later visit.
    fn discover_function(&mut self, loc: PciLoc, dev_info: Option<PciDeviceInfo>) -> bool {
        let info = match dev_info {
            Some(info) => info,
            None => match device_info(self.access, loc) {
                Ok(info) => info,
                Err(_) => return false,
            },
        };

        log::info!(
            "PCI: {:04x}:{:02x}:{:02x}.{:x}: {}",
            loc.seg,
            loc.bus,
            loc.dev,
            loc.func,
            describe_device(&info)
        );
        self.found.push(PciFunction { loc, info });

        if info.class_id == CLASS_BRIDGE && info.subclass_id == SUBCLASS_PCI_BRIDGE {
            let secondary = self.access.read(loc, OFF_SECONDARY_BUS, AccessWidth::U8);
            let subordinate = self.access.read(loc, OFF_SUBORDINATE_BUS, AccessWidth::U8);

            match (secondary, subordinate) {
                (Ok(secondary), Ok(subordinate)) => {
                    for bus in secondary..=subordinate {
                        self.mark_to_visit(bus as u8);
                    }
                }
                _ => log::error!("PCI: config space read error on bridge at {:?}", loc),
            }
        }

        true
    }

    /// Probe function 0 of a device and, for multi-function devices, the
    /// remaining functions.
    fn discover_device(&mut self, loc: PciLoc) {
        debug_assert_eq!(loc.func, 0);

        let info = match device_info(self.access, loc) {
            Ok(info) => info,
            Err(_) => return,
        };

        if !self.discover_function(loc, Some(info)) {
            log::error!("PCI: discovery of function 0 failed on a present device");
            return;
        }

        if info.multi_func {
            for func in 1..8 {
                self.discover_function(PciLoc { func, ..loc }, None);
            }
        }
    }

    fn discover_bus(&mut self, bus: u8) {
        self.buses[bus as usize] = BusState::Visited;

        for dev in 0..32 {
            self.discover_device(PciLoc::new(self.seg, bus, dev, 0));
        }
    }

    /// Walk the whole segment: the root complex first, then every bus the
    /// bridges marked, sweeping in ascending order until a sweep finds no
    /// bus left to visit.
    fn discover_segment(&mut self) {
        let root = PciLoc::new(self.seg, 0, 0, 0);
        let info = match device_info(self.access, root) {
            Ok(info) => info,
            Err(_) => {
                log::error!("PCI: cannot get root device info for segment {}", self.seg);
                return;
            }
        };

        if !info.multi_func {
            // Single host controller.
            self.discover_bus(0);
        } else {
            // One host controller per function; function index = bus.
            for func in 0..8 {
                if device_info(self.access, PciLoc::new(self.seg, 0, 0, func)).is_err() {
                    break;
                }
                self.discover_bus(func);
            }
        }

        loop {
            let mut visit_count = 0;

            for bus in 1..=255u8 {
                if self.buses[bus as usize] == BusState::ToVisit {
                    self.discover_bus(bus);
                    visit_count += 1;
                }
            }

            if visit_count == 0 {
                break;
            }
        }
    }
}

/// Enumerate one segment (or the implicit legacy segment when `seg` is
/// `None`) and return the functions found, in discovery order.
pub fn discover_segment(access: &dyn ConfigAccess, seg: Option<&PciSegment>) -> Vec<PciFunction> {
    let seg_num = seg.map(|s| s.segment).unwrap_or(0);
    let mut scanner = BusScanner::new(access, seg_num);
    scanner.discover_segment();
    scanner.found
}

// ============================================================================
// Device Registry
// ============================================================================

/// Everything discovery found, keyed by location.
static PCI_DEVICES: RwLock<BTreeMap<PciLoc, PciDeviceInfo>> = RwLock::new(BTreeMap::new());

/// Look up a discovered function.
pub fn get_device(loc: PciLoc) -> Option<PciDeviceInfo> {
    PCI_DEVICES.read().get(&loc).copied()
}

/// All discovered functions.
pub fn all_devices() -> Vec<PciFunction> {
    PCI_DEVICES
        .read()
        .iter()
        .map(|(&loc, &info)| PciFunction { loc, info })
        .collect()
}

/// Discovered functions matching a class/subclass pair.
pub fn find_devices_by_class(class_id: u8, subclass_id: u8) -> Vec<PciLoc> {
    PCI_DEVICES
        .read()
        .iter()
        .filter(|(_, info)| info.class_id == class_id && info.subclass_id == subclass_id)
        .map(|(&loc, _)| loc)
        .collect()
}

fn register_functions(functions: &[PciFunction]) {
    let mut devices = PCI_DEVICES.write();
    for f in functions {
        devices.insert(f.loc, f.info);
    }
}

/// Initialize the PCI subsystem: pick the configuration-space backend from
/// MCFG presence and enumerate every segment.
pub fn init() {
    let segments = acpi::find_table(b"MCFG")
        .map(parse_mcfg_allocations)
        .unwrap_or_default();

    let (backend, functions) = if segments.is_empty() {
        log::info!("PCI: no MCFG, using I/O port configuration access");

        let backend = ConfigBackend::Legacy(LegacyPortAccess);
        let functions = discover_segment(&backend, None);
        (backend, functions)
    } else {
        log::info!("PCI: MCFG found with {} segment(s), using ECAM", segments.len());

        let backend = ConfigBackend::Ecam(EcamAccess::new(segments.clone()));
        let mut functions = Vec::new();
        for seg in &segments {
            functions.extend(discover_segment(&backend, Some(seg)));
        }
        (backend, functions)
    };

    register_functions(&functions);
    *CONFIG_BACKEND.write() = Some(backend);

    log::info!("PCI: found {} device function(s)", functions.len());
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::vec;
    use spin::Mutex;

    /// In-memory configuration space: a byte store over (loc, offset),
    /// reading as all-ones where nothing was written, like real hardware.
    struct MockConfigSpace {
        bytes: Mutex<BTreeMap<(PciLoc, u32), u8>>,
    }

    impl MockConfigSpace {
        fn new() -> Self {
            Self {
                bytes: Mutex::new(BTreeMap::new()),
            }
        }

        fn put(&self, loc: PciLoc, off: u32, data: &[u8]) {
            let mut bytes = self.bytes.lock();
            for (i, &b) in data.iter().enumerate() {
                bytes.insert((loc, off + i as u32), b);
            }
        }

        /// Install a function with the standard-header identification
        /// fields populated.
        #[allow(clippy::too_many_arguments)]
        fn add_function(
            &self,
            loc: PciLoc,
            vendor: u16,
            device: u16,
            class: u8,
            subclass: u8,
            progif: u8,
            revision: u8,
            multi_func: bool,
        ) {
            let mut id = [0u8; 4];
            id[..2].copy_from_slice(&vendor.to_le_bytes());
            id[2..].copy_from_slice(&device.to_le_bytes());
            self.put(loc, OFF_VENDOR_DEVICE, &id);

            self.put(loc, OFF_CLASS_INFO, &[revision, progif, subclass, class]);

            let header = if multi_func { 0x80 } else { 0x00 };
            self.put(loc, OFF_HEADER_TYPE, &[header]);
        }

        /// Install a PCI-to-PCI bridge with its bus number registers.
        fn add_bridge(&self, loc: PciLoc, secondary: u8, subordinate: u8) {
            self.add_function(loc, 0x8086, 0x1234, 0x06, 0x04, 0x00, 0x01, false);
            self.put(loc, OFF_HEADER_TYPE, &[0x01]);
            self.put(loc, OFF_SECONDARY_BUS, &[secondary]);
            self.put(loc, OFF_SUBORDINATE_BUS, &[subordinate]);
        }
    }

    impl ConfigAccess for MockConfigSpace {
        fn read(&self, loc: PciLoc, off: u32, width: AccessWidth) -> Result<u32, PciError> {
            check_cfg_offset(off, width, 4096)?;

            let bytes = self.bytes.lock();
            let mut value = 0u32;
            for i in (0..width.bytes()).rev() {
                let b = bytes.get(&(loc, off + i)).copied().unwrap_or(0xFF);
                value = value << 8 | b as u32;
            }
            Ok(value)
        }

        fn write(&self, loc: PciLoc, off: u32, width: AccessWidth, value: u32) -> Result<(), PciError> {
            check_cfg_offset(off, width, 4096)?;

            let mut bytes = self.bytes.lock();
            for i in 0..width.bytes() {
                bytes.insert((loc, off + i), (value >> (8 * i)) as u8);
            }
            Ok(())
        }
    }

    fn locs(functions: &[PciFunction]) -> Vec<(u8, u8, u8)> {
        functions
            .iter()
            .map(|f| (f.loc.bus, f.loc.dev, f.loc.func))
            .collect()
    }

    #[test]
    fn test_legacy_address_encoding() {
        let loc = PciLoc::new(0, 0x12, 0x0A, 0x3);
        assert_eq!(
            legacy_config_address(loc, 0x47),
            0x8000_0000 | 0x12 << 16 | 0x0A << 11 | 0x3 << 8 | 0x44
        );
    }

    #[test]
    fn test_legacy_validation() {
        let access = LegacyPortAccess;

        // Non-zero segment is invalid on the port backend.
        assert_eq!(
            access.read(PciLoc::new(1, 0, 0, 0), 0, AccessWidth::U32),
            Err(PciError::InvalidArgument)
        );

        // Offset beyond the 256-byte window.
        assert_eq!(
            access.read(PciLoc::new(0, 0, 0, 0), 256, AccessWidth::U8),
            Err(PciError::InvalidArgument)
        );

        // Misaligned offsets for each width.
        assert_eq!(
            access.read(PciLoc::new(0, 0, 0, 0), 0x01, AccessWidth::U16),
            Err(PciError::InvalidArgument)
        );
        assert_eq!(
            access.read(PciLoc::new(0, 0, 0, 0), 0x02, AccessWidth::U32),
            Err(PciError::InvalidArgument)
        );
    }

    #[test]
    fn test_ecam_address_derivation() {
        let seg = PciSegment {
            base_paddr: 0xE000_0000,
            segment: 0,
            start_bus: 0,
            end_bus: 255,
        };

        assert_eq!(ecam_address(&seg, PciLoc::new(0, 0, 0, 0), 0), 0xE000_0000);
        assert_eq!(
            ecam_address(&seg, PciLoc::new(0, 2, 3, 1), 0x40),
            0xE000_0000 + (2 << 20) + (3 << 15) + (1 << 12) + 0x40
        );

        // A window that does not start at bus 0 subtracts its start bus.
        let high = PciSegment {
            base_paddr: 0xD000_0000,
            segment: 1,
            start_bus: 0x80,
            end_bus: 0xFF,
        };
        assert_eq!(
            ecam_address(&high, PciLoc::new(1, 0x81, 0, 0), 0),
            0xD000_0000 + (1 << 20)
        );
    }

    #[test]
    fn test_ecam_window_lookup() {
        let access = EcamAccess::new(vec![
            PciSegment {
                base_paddr: 0xE000_0000,
                segment: 0,
                start_bus: 0,
                end_bus: 0x3F,
            },
            PciSegment {
                base_paddr: 0xD000_0000,
                segment: 1,
                start_bus: 0,
                end_bus: 0xFF,
            },
        ]);

        assert!(access.window_for(PciLoc::new(0, 0x20, 0, 0)).is_ok());
        assert!(access.window_for(PciLoc::new(1, 0x80, 0, 0)).is_ok());

        // Bus outside the segment's range, and unknown segment.
        assert_eq!(
            access.window_for(PciLoc::new(0, 0x40, 0, 0)).err(),
            Some(PciError::InvalidArgument)
        );
        assert_eq!(
            access.window_for(PciLoc::new(2, 0, 0, 0)).err(),
            Some(PciError::InvalidArgument)
        );

        // Offset checks apply before the window lookup.
        assert_eq!(
            access.read(PciLoc::new(0, 0, 0, 0), 4096, AccessWidth::U8),
            Err(PciError::InvalidArgument)
        );
    }

    #[test]
    fn test_parse_mcfg() {
        // Header + reserved + two allocation entries.
        let mut table = vec![0u8; acpi::SDT_HEADER_LEN + MCFG_RESERVED_LEN];
        table[..4].copy_from_slice(b"MCFG");

        let mut entry = [0u8; MCFG_ENTRY_LEN];
        entry[..8].copy_from_slice(&0xE000_0000u64.to_le_bytes());
        entry[8..10].copy_from_slice(&0u16.to_le_bytes());
        entry[10] = 0;
        entry[11] = 0xFF;
        table.extend_from_slice(&entry);

        entry[..8].copy_from_slice(&0xD000_0000u64.to_le_bytes());
        entry[8..10].copy_from_slice(&1u16.to_le_bytes());
        entry[10] = 0x10;
        entry[11] = 0x1F;
        table.extend_from_slice(&entry);

        let segments = parse_mcfg_allocations(&table);
        assert_eq!(
            segments,
            vec![
                PciSegment {
                    base_paddr: 0xE000_0000,
                    segment: 0,
                    start_bus: 0,
                    end_bus: 0xFF,
                },
                PciSegment {
                    base_paddr: 0xD000_0000,
                    segment: 1,
                    start_bus: 0x10,
                    end_bus: 0x1F,
                },
            ]
        );
    }

    #[test]
    fn test_parse_mcfg_rejects_garbage() {
        assert!(parse_mcfg_allocations(&[0u8; 10]).is_empty());

        // end_bus < start_bus entries are dropped.
        let mut table = vec![0u8; acpi::SDT_HEADER_LEN + MCFG_RESERVED_LEN];
        let mut entry = [0u8; MCFG_ENTRY_LEN];
        entry[10] = 0x20;
        entry[11] = 0x10;
        table.extend_from_slice(&entry);
        assert!(parse_mcfg_allocations(&table).is_empty());
    }

    #[test]
    fn test_device_info_decoding() {
        let mock = MockConfigSpace::new();
        let loc = PciLoc::new(0, 0, 3, 0);
        mock.add_function(loc, 0x8086, 0x10D3, 0x02, 0x00, 0x00, 0x07, true);

        let info = device_info(&mock, loc).unwrap();
        assert_eq!(info.vendor_id, 0x8086);
        assert_eq!(info.device_id, 0x10D3);
        assert_eq!(info.class_id, 0x02);
        assert_eq!(info.subclass_id, 0x00);
        assert_eq!(info.progif_id, 0x00);
        assert_eq!(info.revision, 0x07);
        assert_eq!(info.header_type, 0x00);
        assert!(info.multi_func);
    }

    #[test]
    fn test_device_info_absent() {
        let mock = MockConfigSpace::new();

        // Nothing written: reads as all-ones.
        assert_eq!(
            device_info(&mock, PciLoc::new(0, 0, 0, 0)).err(),
            Some(PciError::NoSuchDevice)
        );

        // Vendor id zero is "not present" too.
        let loc = PciLoc::new(0, 0, 1, 0);
        mock.put(loc, OFF_VENDOR_DEVICE, &[0, 0, 0x34, 0x12]);
        assert_eq!(device_info(&mock, loc).err(), Some(PciError::NoSuchDevice));
    }

    #[test]
    fn test_single_controller_enumeration() {
        // One host bridge at 00:00.0, nothing else: bus 0 only, one function.
        let mock = MockConfigSpace::new();
        mock.add_function(PciLoc::new(0, 0, 0, 0), 0x8086, 0x29C0, 0x06, 0x00, 0x00, 0x02, false);

        let functions = discover_segment(&mock, None);
        assert_eq!(locs(&functions), vec![(0, 0, 0)]);
    }

    #[test]
    fn test_bridge_enumeration_order() {
        // Host bridge at 00:00.0, a bridge at 00:02.0 spanning buses 1..=3,
        // one device per secondary bus. Expected first-visit order: bus 0,
        // then buses 1, 2, 3.
        let mock = MockConfigSpace::new();
        mock.add_function(PciLoc::new(0, 0, 0, 0), 0x8086, 0x29C0, 0x06, 0x00, 0x00, 0x02, false);
        mock.add_bridge(PciLoc::new(0, 0, 2, 0), 1, 3);
        mock.add_function(PciLoc::new(0, 1, 0, 0), 0x10EC, 0x8168, 0x02, 0x00, 0x00, 0x01, false);
        mock.add_function(PciLoc::new(0, 2, 4, 0), 0x1AF4, 0x1001, 0x01, 0x00, 0x00, 0x00, false);
        mock.add_function(PciLoc::new(0, 3, 0, 0), 0x1234, 0x1111, 0x03, 0x00, 0x00, 0x02, false);

        let functions = discover_segment(&mock, None);
        assert_eq!(
            locs(&functions),
            vec![(0, 0, 0), (0, 2, 0), (1, 0, 0), (2, 4, 0), (3, 0, 0)]
        );
    }

    #[test]
    fn test_nested_bridges_visited_once() {
        // A bridge on bus 1 leads to bus 2; every reachable function must
        // appear exactly once.
        let mock = MockConfigSpace::new();
        mock.add_function(PciLoc::new(0, 0, 0, 0), 0x8086, 0x29C0, 0x06, 0x00, 0x00, 0x02, false);
        mock.add_bridge(PciLoc::new(0, 0, 1, 0), 1, 2);
        mock.add_bridge(PciLoc::new(0, 1, 0, 0), 2, 2);
        mock.add_function(PciLoc::new(0, 2, 0, 0), 0x144D, 0xA808, 0x01, 0x08, 0x02, 0x00, false);

        let functions = discover_segment(&mock, None);
        let all = locs(&functions);
        assert_eq!(all, vec![(0, 0, 0), (0, 1, 0), (1, 0, 0), (2, 0, 0)]);

        // Exactly once each.
        let mut dedup = all.clone();
        dedup.sort_unstable();
        dedup.dedup();
        assert_eq!(dedup.len(), all.len());
    }

    #[test]
    fn test_multi_function_device() {
        let mock = MockConfigSpace::new();
        mock.add_function(PciLoc::new(0, 0, 0, 0), 0x8086, 0x29C0, 0x06, 0x00, 0x00, 0x02, false);
        // Functions 0, 2 of device 5 respond; 1 and 3..7 do not.
        mock.add_function(PciLoc::new(0, 0, 5, 0), 0x8086, 0x2934, 0x0C, 0x03, 0x00, 0x03, true);
        mock.add_function(PciLoc::new(0, 0, 5, 2), 0x8086, 0x2936, 0x0C, 0x03, 0x00, 0x03, false);

        let functions = discover_segment(&mock, None);
        assert_eq!(locs(&functions), vec![(0, 0, 0), (0, 5, 0), (0, 5, 2)]);
    }

    #[test]
    fn test_multiple_host_controllers() {
        // A multi-function device at 00:00.0 means one host controller per
        // function; each function index is a root bus.
        let mock = MockConfigSpace::new();
        mock.add_function(PciLoc::new(0, 0, 0, 0), 0x8086, 0x29C0, 0x06, 0x00, 0x00, 0x02, true);
        mock.add_function(PciLoc::new(0, 0, 0, 1), 0x8086, 0x29C1, 0x06, 0x00, 0x00, 0x02, false);
        mock.add_function(PciLoc::new(0, 1, 7, 0), 0x10DE, 0x2204, 0x03, 0x00, 0x00, 0xA1, false);

        let functions = discover_segment(&mock, None);
        let all = locs(&functions);

        // Bus 0 scan reports both root functions (device 0 is
        // multi-function), bus 1 the extra device.
        assert!(all.contains(&(0, 0, 0)));
        assert!(all.contains(&(0, 0, 1)));
        assert!(all.contains(&(1, 7, 0)));
    }

    #[test]
    fn test_bridge_to_visited_bus_not_rescanned() {
        // A bogus bridge pointing back at bus 0 must not cause a rescan.
        let mock = MockConfigSpace::new();
        mock.add_function(PciLoc::new(0, 0, 0, 0), 0x8086, 0x29C0, 0x06, 0x00, 0x00, 0x02, false);
        mock.add_bridge(PciLoc::new(0, 0, 3, 0), 0, 1);
        mock.add_function(PciLoc::new(0, 1, 0, 0), 0x10EC, 0x8168, 0x02, 0x00, 0x00, 0x01, false);

        let functions = discover_segment(&mock, None);
        assert_eq!(locs(&functions), vec![(0, 0, 0), (0, 3, 0), (1, 0, 0)]);
    }

    #[test]
    fn test_describe_device() {
        let mut info = PciDeviceInfo {
            vendor_id: 0x8086,
            device_id: 0x2934,
            class_id: 0x0C,
            subclass_id: 0x03,
            progif_id: 0x00,
            revision: 0,
            header_type: 0,
            multi_func: false,
        };
        assert_eq!(describe_device(&info), "USB controller: Intel UHCI");

        info.vendor_id = 0x0666;
        assert_eq!(describe_device(&info), "USB controller (UHCI)");

        info.progif_id = 0x42;
        assert_eq!(describe_device(&info), "USB controller");

        info.class_id = 0xEE;
        assert_eq!(describe_device(&info), "class: 0xee, subclass: 0x03");
    }

    #[test]
    fn test_registry_queries() {
        let mock = MockConfigSpace::new();
        mock.add_function(PciLoc::new(9, 0, 0, 0), 0x8086, 0x29C0, 0x06, 0x00, 0x00, 0x02, false);
        mock.add_function(PciLoc::new(9, 0, 4, 0), 0x1AF4, 0x1000, 0x02, 0x00, 0x00, 0x00, false);

        let seg = PciSegment {
            base_paddr: 0,
            segment: 9,
            start_bus: 0,
            end_bus: 0,
        };
        let functions = discover_segment(&mock, Some(&seg));
        register_functions(&functions);

        let loc = PciLoc::new(9, 0, 4, 0);
        assert_eq!(get_device(loc).map(|i| i.vendor_id), Some(0x1AF4));
        assert_eq!(find_devices_by_class(0x02, 0x00), vec![loc]);
        assert!(all_devices().len() >= 2);
    }
}
