use crate::{PAGE_SHIFT, PhysicalAddress};
use core::fmt;

/// A 4 KiB physical page frame.
///
/// Identified by its frame number (the physical base address shifted right by
/// [`PAGE_SHIFT`]). This is also the bit index the frame allocator uses.
///
/// ### Examples
/// ```rust
/// # use kernel_memory_addresses::*;
/// let page = PhysicalPage::from_index(3);
/// assert_eq!(page.base(), PhysicalAddress::new(3 * PAGE_SIZE));
/// assert_eq!(PhysicalPage::containing_address(PhysicalAddress::new(0x3FFF)), page);
/// ```
#[repr(transparent)]
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct PhysicalPage(u32);

impl PhysicalPage {
    #[inline]
    #[must_use]
    pub const fn from_index(index: u32) -> Self {
        Self(index)
    }

    #[inline]
    #[must_use]
    pub const fn containing_address(pa: PhysicalAddress) -> Self {
        Self(pa.as_u32() >> PAGE_SHIFT)
    }

    #[inline]
    #[must_use]
    pub const fn index(self) -> u32 {
        self.0
    }

    #[inline]
    #[must_use]
    pub const fn base(self) -> PhysicalAddress {
        PhysicalAddress::new(self.0 << PAGE_SHIFT)
    }
}

impl fmt::Display for PhysicalPage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

impl fmt::Debug for PhysicalPage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PhysicalPage({}, {})", self.0, self.base())
    }
}

impl From<PhysicalAddress> for PhysicalPage {
    #[inline]
    fn from(value: PhysicalAddress) -> Self {
        Self::containing_address(value)
    }
}
