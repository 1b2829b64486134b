//! # Kernel Boot Information
//!
//! The bootloader contract: the E820 memory map the real-mode stage collects.

use core::fmt;

/// Physical address of the first [`E820Entry`].
pub const MEMORY_MAP_ADDR: u32 = 0x0500;

/// Physical address of the `u32` entry count that precedes the map.
pub const MEMORY_MAP_COUNT_ADDR: u32 = 0x04FC;

/// Size of one E820 entry as written by the bootloader.
pub const E820_ENTRY_SIZE: usize = 24;

/// Classification of a physical region as reported by the BIOS.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum MemoryRegionType {
    /// Free RAM.
    Usable,
    /// Firmware-reserved (MMIO, ROM, ...).
    Reserved,
    /// ACPI tables; reclaimable once parsed.
    AcpiReclaimable,
    /// ACPI non-volatile storage.
    AcpiNvs,
    /// Defective RAM.
    BadMemory,
    /// Any type value the BIOS reported that we do not know. Never usable.
    Unknown(u32),
}

impl MemoryRegionType {
    #[must_use]
    pub const fn from_raw(raw: u32) -> Self {
        match raw {
            1 => Self::Usable,
            2 => Self::Reserved,
            3 => Self::AcpiReclaimable,
            4 => Self::AcpiNvs,
            5 => Self::BadMemory,
            other => Self::Unknown(other),
        }
    }

    #[must_use]
    pub const fn as_raw(self) -> u32 {
        match self {
            Self::Usable => 1,
            Self::Reserved => 2,
            Self::AcpiReclaimable => 3,
            Self::AcpiNvs => 4,
            Self::BadMemory => 5,
            Self::Unknown(other) => other,
        }
    }
}

impl fmt::Display for MemoryRegionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Usable => f.write_str("usable"),
            Self::Reserved => f.write_str("reserved"),
            Self::AcpiReclaimable => f.write_str("ACPI reclaimable"),
            Self::AcpiNvs => f.write_str("ACPI NVS"),
            Self::BadMemory => f.write_str("bad memory"),
            Self::Unknown(raw) => write!(f, "unknown ({raw})"),
        }
    }
}

/// One BIOS E820 memory map entry.
///
/// Keep this `#[repr(C, packed)]`: it is read in place from the buffer the
/// bootloader filled, 24 bytes per entry with no padding.
#[repr(C, packed)]
#[derive(Copy, Clone, Eq, PartialEq)]
pub struct E820Entry {
    base: u64,
    length: u64,
    kind: u32,
    acpi: u32,
}

const _: () = assert!(size_of::<E820Entry>() == E820_ENTRY_SIZE);

impl E820Entry {
    #[must_use]
    pub const fn new(base: u64, length: u64, kind: MemoryRegionType) -> Self {
        Self {
            base,
            length,
            kind: kind.as_raw(),
            acpi: 0,
        }
    }

    /// Decode an entry from its little-endian on-disk form.
    ///
    /// ```rust
    /// # use kernel_info::boot::{E820Entry, MemoryRegionType};
    /// let mut raw = [0u8; 24];
    /// raw[8..16].copy_from_slice(&0x9_FC00u64.to_le_bytes());
    /// raw[16..20].copy_from_slice(&1u32.to_le_bytes());
    /// let entry = E820Entry::from_le_bytes(&raw);
    /// assert_eq!(entry.base(), 0);
    /// assert_eq!(entry.length(), 0x9_FC00);
    /// assert_eq!(entry.kind(), MemoryRegionType::Usable);
    /// ```
    #[must_use]
    pub const fn from_le_bytes(raw: &[u8; E820_ENTRY_SIZE]) -> Self {
        let mut base = [0u8; 8];
        let mut length = [0u8; 8];
        let mut kind = [0u8; 4];
        let mut acpi = [0u8; 4];
        let mut i = 0;
        while i < 8 {
            base[i] = raw[i];
            length[i] = raw[8 + i];
            i += 1;
        }
        let mut i = 0;
        while i < 4 {
            kind[i] = raw[16 + i];
            acpi[i] = raw[20 + i];
            i += 1;
        }
        Self {
            base: u64::from_le_bytes(base),
            length: u64::from_le_bytes(length),
            kind: u32::from_le_bytes(kind),
            acpi: u32::from_le_bytes(acpi),
        }
    }

    #[must_use]
    pub const fn base(&self) -> u64 {
        self.base
    }

    #[must_use]
    pub const fn length(&self) -> u64 {
        self.length
    }

    /// Exclusive end address; saturates instead of overflowing.
    #[must_use]
    pub const fn end(&self) -> u64 {
        self.base.saturating_add(self.length)
    }

    #[must_use]
    pub const fn kind(&self) -> MemoryRegionType {
        MemoryRegionType::from_raw(self.kind)
    }

    /// ACPI 3.0 extended attributes (zero when the BIOS does not supply them).
    #[must_use]
    pub const fn acpi(&self) -> u32 {
        self.acpi
    }

    #[must_use]
    pub const fn is_usable(&self) -> bool {
        matches!(self.kind(), MemoryRegionType::Usable)
    }
}

impl fmt::Debug for E820Entry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("E820Entry")
            .field("base", &format_args!("{:#011x}", self.base()))
            .field("length", &format_args!("{:#x}", self.length()))
            .field("kind", &self.kind())
            .finish()
    }
}

/// Read-only view over the firmware memory map.
#[derive(Copy, Clone, Debug)]
pub struct MemoryMap<'a> {
    entries: &'a [E820Entry],
}

impl<'a> MemoryMap<'a> {
    #[must_use]
    pub const fn new(entries: &'a [E820Entry]) -> Self {
        Self { entries }
    }

    #[must_use]
    pub const fn entries(&self) -> &'a [E820Entry] {
        self.entries
    }

    #[must_use]
    pub const fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = E820Entry> + use<'a> {
        self.entries.iter().copied()
    }

    pub fn usable(&self) -> impl Iterator<Item = E820Entry> + use<'a> {
        self.iter().filter(E820Entry::is_usable)
    }

    /// Highest end address over all usable regions, or 0 if there are none.
    #[must_use]
    pub fn highest_usable_address(&self) -> u64 {
        self.usable().map(|e| e.end()).max().unwrap_or(0)
    }

    /// Total bytes reported as usable (regions may extend beyond 4 GiB).
    #[must_use]
    pub fn usable_bytes(&self) -> u64 {
        self.usable().map(|e| e.length()).sum()
    }
}

impl<'a> IntoIterator for &MemoryMap<'a> {
    type Item = E820Entry;
    type IntoIter = core::iter::Copied<core::slice::Iter<'a, E820Entry>>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.iter().copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn region_types_round_trip_known_values() {
        for raw in 1..=5 {
            assert_eq!(MemoryRegionType::from_raw(raw).as_raw(), raw);
        }
        assert_eq!(MemoryRegionType::from_raw(7), MemoryRegionType::Unknown(7));
    }

    #[test]
    fn highest_usable_ignores_reserved_regions() {
        let entries = [
            E820Entry::new(0, 0x9_FC00, MemoryRegionType::Usable),
            E820Entry::new(0xF_0000, 0x1_0000, MemoryRegionType::Reserved),
            E820Entry::new(0x10_0000, 0x7F0_0000, MemoryRegionType::Usable),
            E820Entry::new(0xFFFC_0000, 0x4_0000, MemoryRegionType::Reserved),
        ];
        let map = MemoryMap::new(&entries);
        assert_eq!(map.highest_usable_address(), 0x800_0000);
        assert_eq!(map.usable().count(), 2);
        assert_eq!(map.usable_bytes(), 0x9_FC00 + 0x7F0_0000);
    }

    #[test]
    fn empty_map_has_no_usable_memory() {
        let map = MemoryMap::new(&[]);
        assert!(map.is_empty());
        assert_eq!(map.highest_usable_address(), 0);
    }

    #[test]
    fn decodes_bootloader_bytes() {
        let mut raw = [0u8; E820_ENTRY_SIZE];
        raw[0..8].copy_from_slice(&0x10_0000u64.to_le_bytes());
        raw[8..16].copy_from_slice(&0x100_0000u64.to_le_bytes());
        raw[16..20].copy_from_slice(&2u32.to_le_bytes());
        raw[20..24].copy_from_slice(&1u32.to_le_bytes());
        let entry = E820Entry::from_le_bytes(&raw);
        assert_eq!(entry.base(), 0x10_0000);
        assert_eq!(entry.end(), 0x110_0000);
        assert_eq!(entry.kind(), MemoryRegionType::Reserved);
        assert_eq!(entry.acpi(), 1);
        assert!(!entry.is_usable());
    }
}
