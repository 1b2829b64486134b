use crate::{ADDRESS_LIMIT, PAGE_SIZE, PhysicalPage};
use core::fmt;
use core::ops::{Add, AddAssign};

/// Physical memory address.
///
/// A thin wrapper around a `u32` that denotes a **physical** byte address. The
/// kernel runs without paging, so this is also the address the CPU
/// dereferences.
///
/// ### Semantics
/// - Use [`PhysicalAddress::page`] / [`PhysicalAddress::page_offset`] to derive
///   the containing frame and the in-frame offset.
/// - Arithmetic via [`Add`] wraps like the underlying register would; use
///   [`PhysicalAddress::checked_add`] where overflow must be detected.
///
/// ### Examples
/// ```rust
/// # use kernel_memory_addresses::*;
/// let pa = PhysicalAddress::from_u64_clamped(0x1_0000_0000);
/// assert_eq!(pa.as_u32(), 0xFFFF_FFFF);
/// assert_eq!(PhysicalAddress::new(0x2000).page().index(), 2);
/// ```
#[repr(transparent)]
#[derive(Copy, Clone, Default, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct PhysicalAddress(u32);

impl PhysicalAddress {
    #[inline]
    #[must_use]
    pub const fn zero() -> Self {
        Self::new(0)
    }

    #[inline]
    #[must_use]
    pub const fn new(v: u32) -> Self {
        Self(v)
    }

    /// Convert a firmware-reported 64-bit address, saturating at the 32-bit limit.
    #[inline]
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub const fn from_u64_clamped(v: u64) -> Self {
        if v > ADDRESS_LIMIT {
            Self(ADDRESS_LIMIT as u32)
        } else {
            Self(v as u32)
        }
    }

    #[inline]
    #[must_use]
    pub const fn as_u32(self) -> u32 {
        self.0
    }

    #[inline]
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0 as u64
    }

    #[inline]
    #[must_use]
    pub const fn as_usize(self) -> usize {
        self.0 as usize
    }

    /// The frame containing this address.
    #[inline]
    #[must_use]
    pub const fn page(self) -> PhysicalPage {
        PhysicalPage::containing_address(self)
    }

    /// The offset of this address within its frame.
    #[inline]
    #[must_use]
    pub const fn page_offset(self) -> u32 {
        self.0 & (PAGE_SIZE - 1)
    }

    #[inline]
    #[must_use]
    pub const fn is_page_aligned(self) -> bool {
        self.page_offset() == 0
    }

    /// Align up to `align` (power of two); `None` if that leaves the 32-bit space.
    #[inline]
    #[must_use]
    pub const fn align_up(self, align: u32) -> Option<Self> {
        debug_assert!(align.is_power_of_two());
        match self.0.checked_add(align - 1) {
            Some(v) => Some(Self(v & !(align - 1))),
            None => None,
        }
    }

    /// Align down to `align` (power of two).
    #[inline]
    #[must_use]
    pub const fn align_down(self, align: u32) -> Self {
        debug_assert!(align.is_power_of_two());
        Self(self.0 & !(align - 1))
    }

    #[inline]
    #[must_use]
    pub const fn checked_add(self, rhs: u32) -> Option<Self> {
        match self.0.checked_add(rhs) {
            Some(v) => Some(Self(v)),
            None => None,
        }
    }
}

impl fmt::Debug for PhysicalAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PA(0x{:08X})", self.0)
    }
}

impl fmt::Display for PhysicalAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:08X}", self.0)
    }
}

impl From<u32> for PhysicalAddress {
    #[inline]
    fn from(v: u32) -> Self {
        Self::new(v)
    }
}

impl From<PhysicalPage> for PhysicalAddress {
    #[inline]
    fn from(value: PhysicalPage) -> Self {
        value.base()
    }
}

impl Add<u32> for PhysicalAddress {
    type Output = Self;
    #[inline]
    fn add(self, rhs: u32) -> Self::Output {
        Self(self.0.wrapping_add(rhs))
    }
}

impl AddAssign<u32> for PhysicalAddress {
    #[inline]
    fn add_assign(&mut self, rhs: u32) {
        self.0 = self.0.wrapping_add(rhs);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clamps_firmware_addresses() {
        assert_eq!(PhysicalAddress::from_u64_clamped(0x1234).as_u32(), 0x1234);
        assert_eq!(
            PhysicalAddress::from_u64_clamped(u64::MAX).as_u32(),
            0xFFFF_FFFF
        );
    }

    #[test]
    fn alignment_does_not_wrap() {
        let top = PhysicalAddress::new(0xFFFF_F001);
        assert_eq!(top.align_up(PAGE_SIZE), None);
        assert_eq!(top.align_down(PAGE_SIZE).as_u32(), 0xFFFF_F000);
        assert_eq!(
            PhysicalAddress::new(0x1001).align_up(8),
            Some(PhysicalAddress::new(0x1008))
        );
    }

    #[test]
    fn formats_as_hex() {
        let pa = PhysicalAddress::new(0x0010_0000);
        assert_eq!(format!("{pa}"), "0x00100000");
        assert_eq!(format!("{pa:?}"), "PA(0x00100000)");
    }
}
