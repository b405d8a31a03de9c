//! ACPI table access
//!
//! Just enough of ACPI to locate firmware tables by signature: the RSDP
//! scan over the EBDA and BIOS ROM areas, header/checksum validation, and
//! the XSDT/RSDT walk. Interpretation of individual tables belongs to
//! their consumers (the PCI code parses MCFG itself).

/// Byte length of a system description table header.
pub const SDT_HEADER_LEN: usize = 36;

/// Offset of the 32-bit length field within an SDT header.
const SDT_LENGTH_OFF: usize = 4;

/// Parsed fields of a system description table header.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SdtHeader {
    /// Table signature (e.g. `b"MCFG"`)
    pub signature: [u8; 4],
    /// Total table length in bytes, header included
    pub length: u32,
}

impl SdtHeader {
    /// Parse a header from the start of `bytes`.
    pub fn parse(bytes: &[u8]) -> Option<Self> {
        if bytes.len() < SDT_HEADER_LEN {
            return None;
        }

        let mut signature = [0u8; 4];
        signature.copy_from_slice(&bytes[..4]);

        let length = u32::from_le_bytes([
            bytes[SDT_LENGTH_OFF],
            bytes[SDT_LENGTH_OFF + 1],
            bytes[SDT_LENGTH_OFF + 2],
            bytes[SDT_LENGTH_OFF + 3],
        ]);

        Some(Self { signature, length })
    }
}

/// Sum of all bytes, modulo 256. A valid ACPI structure sums to zero.
pub fn checksum(data: &[u8]) -> u8 {
    data.iter().fold(0u8, |acc, &b| acc.wrapping_add(b))
}

/// Validate a complete table: plausible header and zero checksum.
pub fn validate_table(bytes: &[u8]) -> bool {
    match SdtHeader::parse(bytes) {
        Some(hdr) => {
            hdr.length as usize >= SDT_HEADER_LEN
                && bytes.len() >= hdr.length as usize
                && checksum(&bytes[..hdr.length as usize]) == 0
        }
        None => false,
    }
}

/// Find a firmware table by signature. Returns the full table, header
/// included, or `None` when firmware does not provide it.
#[cfg(target_os = "none")]
pub fn find_table(signature: &[u8; 4]) -> Option<&'static [u8]> {
    imp::find_table(signature)
}

/// Hosted builds have no firmware tables.
#[cfg(not(target_os = "none"))]
pub fn find_table(_signature: &[u8; 4]) -> Option<&'static [u8]> {
    None
}

#[cfg(target_os = "none")]
mod imp {
    use super::{checksum, validate_table, SdtHeader, SDT_HEADER_LEN};
    use crate::mem::{phys_to_virt, PhysAddr};

    /// Search for the `RSD PTR ` signature in one physical range.
    fn scan_rsdp_range(start: u64, length: u64) -> Option<u64> {
        const SIGNATURE: &[u8; 8] = b"RSD PTR ";

        let base = phys_to_virt(PhysAddr::new(start)).as_u64() as *const u8;

        for offset in (0..length).step_by(16) {
            // SAFETY: the EBDA/BIOS ranges are identity-present in the
            // linear mapping and only read here.
            let candidate = unsafe {
                core::slice::from_raw_parts(base.add(offset as usize), 20)
            };

            if &candidate[..8] == SIGNATURE && checksum(candidate) == 0 {
                return Some(start + offset);
            }
        }

        None
    }

    /// Locate the RSDP in the standard legacy areas.
    fn find_rsdp() -> Option<u64> {
        // Extended BIOS Data Area, then the BIOS ROM window.
        scan_rsdp_range(0x9FC00, 0x400).or_else(|| scan_rsdp_range(0xE0000, 0x20000))
    }

    /// Read a table at a physical address as a byte slice.
    fn table_at(phys: u64) -> Option<&'static [u8]> {
        let virt = phys_to_virt(PhysAddr::new(phys)).as_u64() as *const u8;

        // SAFETY: firmware tables live in reserved memory covered by the
        // linear mapping; read the header first to learn the full length.
        let header = unsafe { core::slice::from_raw_parts(virt, SDT_HEADER_LEN) };
        let hdr = SdtHeader::parse(header)?;

        if (hdr.length as usize) < SDT_HEADER_LEN {
            return None;
        }

        // SAFETY: same mapping, now with the self-reported length.
        let full = unsafe { core::slice::from_raw_parts(virt, hdr.length as usize) };
        validate_table(full).then_some(full)
    }

    pub fn find_table(signature: &[u8; 4]) -> Option<&'static [u8]> {
        let rsdp_phys = find_rsdp()?;
        let rsdp = phys_to_virt(PhysAddr::new(rsdp_phys)).as_u64() as *const u8;

        // SAFETY: the 36-byte ACPI 2.0 RSDP; revision decides XSDT vs RSDT.
        let revision = unsafe { *rsdp.add(15) };

        if revision >= 2 {
            // XSDT: 64-bit entries.
            let xsdt_phys = unsafe { (rsdp.add(24) as *const u64).read_unaligned() };
            let xsdt = table_at(xsdt_phys)?;

            for entry in xsdt[SDT_HEADER_LEN..].chunks_exact(8) {
                let phys = u64::from_le_bytes([
                    entry[0], entry[1], entry[2], entry[3], entry[4], entry[5], entry[6], entry[7],
                ]);

                if let Some(table) = table_at(phys) {
                    if &table[..4] == signature {
                        return Some(table);
                    }
                }
            }
        } else {
            // RSDT: 32-bit entries.
            let rsdt_phys = unsafe { (rsdp.add(16) as *const u32).read_unaligned() } as u64;
            let rsdt = table_at(rsdt_phys)?;

            for entry in rsdt[SDT_HEADER_LEN..].chunks_exact(4) {
                let phys = u32::from_le_bytes([entry[0], entry[1], entry[2], entry[3]]) as u64;

                if let Some(table) = table_at(phys) {
                    if &table[..4] == signature {
                        return Some(table);
                    }
                }
            }
        }

        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::vec;
    use alloc::vec::Vec;

    fn build_table(signature: &[u8; 4], payload: &[u8]) -> Vec<u8> {
        let length = (SDT_HEADER_LEN + payload.len()) as u32;
        let mut table = vec![0u8; SDT_HEADER_LEN];

        table[..4].copy_from_slice(signature);
        table[4..8].copy_from_slice(&length.to_le_bytes());
        table.extend_from_slice(payload);

        // Patch the checksum byte so the whole table sums to zero.
        let sum = checksum(&table);
        table[9] = table[9].wrapping_sub(sum);
        table
    }

    #[test]
    fn test_checksum() {
        assert_eq!(checksum(&[0x01, 0x02, 0x03, 0xFA]), 0);
        assert_ne!(checksum(&[0x01, 0x02, 0x03, 0x04]), 0);
        assert_eq!(checksum(&[]), 0);
    }

    #[test]
    fn test_header_parse() {
        let table = build_table(b"MCFG", &[0; 16]);
        let hdr = SdtHeader::parse(&table).unwrap();

        assert_eq!(&hdr.signature, b"MCFG");
        assert_eq!(hdr.length as usize, table.len());
    }

    #[test]
    fn test_header_too_short() {
        assert_eq!(SdtHeader::parse(&[0u8; 10]), None);
    }

    #[test]
    fn test_validate_table() {
        let table = build_table(b"APIC", &[1, 2, 3, 4]);
        assert!(validate_table(&table));

        let mut corrupt = table.clone();
        corrupt[20] ^= 0xFF;
        assert!(!validate_table(&corrupt));

        // Truncated table.
        assert!(!validate_table(&table[..table.len() - 1]));
    }
}
