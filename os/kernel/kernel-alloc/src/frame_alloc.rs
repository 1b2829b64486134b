//! # Bitmap Physical Frame Allocator
//!
//! One bit per 4 KiB frame, from physical address 0 up to the highest usable
//! address in the firmware memory map. A set bit means "in use".
//!
//! Initialization is conservative: every frame starts out used and only frames
//! fully covered by a usable E820 region are released. The low megabyte, the
//! kernel image and the bitmap itself are then reserved again, because they
//! overlap usable RAM but must never be handed out.
//!
//! ```text
//! bitmap byte 0          bitmap byte 1
//! ┌─┬─┬─┬─┬─┬─┬─┬─┐      ┌─┬─┬─┬─┬─┬─┬─┬─┐
//! │0│1│2│3│4│5│6│7│      │8│9│ │ │ │ │ │ │   bit n (LSB first) ⇔ frame n
//! └─┴─┴─┴─┴─┴─┴─┴─┘      └─┴─┴─┴─┴─┴─┴─┴─┘
//! ```
//!
//! Allocation is first fit: the lowest free frame wins. Fully used bitmap
//! bytes are skipped eight frames at a time, but the scan is still linear in
//! the number of frames.

use crate::error::PmmError;
use kernel_info::boot::MemoryMap;
use kernel_info::memory::{KERNEL_LOAD_ADDR, LOW_MEMORY_END};
use kernel_memory_addresses::{ADDRESS_LIMIT, PAGE_SIZE, PhysicalAddress, PhysicalPage};
use log::{debug, info, trace};

const FRAME_SIZE: u64 = PAGE_SIZE as u64;

/// Geometry of the frame allocator, derived from the memory map before any
/// memory is touched.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct FrameLayout {
    /// Number of frames tracked, `highest usable address / 4096`.
    pub total_pages: u32,
    /// End of the kernel image, aligned up to a page boundary.
    pub kernel_end: PhysicalAddress,
    /// Physical address the bitmap lives at (equal to `kernel_end`).
    pub bitmap_start: PhysicalAddress,
    /// Bitmap length in bytes, `ceil(total_pages / 8)`.
    pub bitmap_len: usize,
}

impl FrameLayout {
    /// Derive the geometry for `map` with the kernel image ending at `kernel_end`.
    ///
    /// # Errors
    /// [`PmmError::OutOfRange`] if the page-aligned kernel end or the bitmap
    /// behind it would leave the 32-bit address space.
    #[allow(clippy::cast_possible_truncation)]
    pub fn compute(map: &MemoryMap<'_>, kernel_end: PhysicalAddress) -> Result<Self, PmmError> {
        let highest = map.highest_usable_address().min(ADDRESS_LIMIT);
        // highest <= 0xFFFF_FFFF, so this fits in 20 bits.
        let total_pages = (highest / FRAME_SIZE) as u32;
        let bitmap_len = total_pages.div_ceil(8) as usize;

        let kernel_end = kernel_end
            .align_up(PAGE_SIZE)
            .ok_or(PmmError::OutOfRange(kernel_end))?;
        if kernel_end.as_u64() + bitmap_len as u64 > ADDRESS_LIMIT {
            return Err(PmmError::OutOfRange(kernel_end));
        }

        Ok(Self {
            total_pages,
            kernel_end,
            bitmap_start: kernel_end,
            bitmap_len,
        })
    }

    /// First byte past the bitmap.
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub const fn bitmap_end(&self) -> PhysicalAddress {
        // Checked against the address limit in `compute`.
        PhysicalAddress::new(self.bitmap_start.as_u32() + self.bitmap_len as u32)
    }
}

/// Bitmap-based physical frame allocator.
///
/// # Invariants
/// - `free_pages` equals the number of clear bits among the first
///   `total_pages` bits.
/// - Bits past `total_pages` in the last byte are always set.
pub struct BitmapFrameAllocator<'a> {
    bitmap: &'a mut [u8],
    total_pages: u32,
    free_pages: u32,
}

impl<'a> BitmapFrameAllocator<'a> {
    /// Build the allocator over `storage`, using the first `layout.bitmap_len`
    /// bytes as the bitmap.
    ///
    /// In the running kernel `storage` is the memory at `layout.bitmap_start`;
    /// the reservations below use the layout's addresses, not the slice's.
    ///
    /// # Errors
    /// [`PmmError::BitmapTooSmall`] if `storage` is shorter than the layout needs.
    pub fn init(
        map: &MemoryMap<'_>,
        layout: &FrameLayout,
        storage: &'a mut [u8],
    ) -> Result<Self, PmmError> {
        if storage.len() < layout.bitmap_len {
            return Err(PmmError::BitmapTooSmall {
                needed: layout.bitmap_len,
                actual: storage.len(),
            });
        }

        let (bitmap, _) = storage.split_at_mut(layout.bitmap_len);
        bitmap.fill(0xFF);

        let mut pmm = Self {
            bitmap,
            total_pages: layout.total_pages,
            free_pages: 0,
        };

        for entry in map {
            debug!(
                "E820 {:#011x}..{:#011x} {}",
                entry.base(),
                entry.end(),
                entry.kind()
            );
            if !entry.is_usable() || entry.base() >= ADDRESS_LIMIT {
                continue;
            }
            let end = entry.end().min(ADDRESS_LIMIT);
            pmm.release_range(entry.base(), end);
        }

        let low = pmm.reserve_range(0, u64::from(LOW_MEMORY_END));
        let kernel = pmm.reserve_range(
            u64::from(KERNEL_LOAD_ADDR),
            layout.kernel_end.as_u64(),
        );
        let own = pmm.reserve_range(
            layout.bitmap_start.as_u64(),
            layout.bitmap_end().as_u64(),
        );
        debug!("Reserved {low} low-memory, {kernel} kernel and {own} bitmap frames");

        info!(
            "Physical memory: {} of {} frames free ({} KiB), bitmap {} bytes at {}",
            pmm.free_pages,
            pmm.total_pages,
            u64::from(pmm.free_pages) * FRAME_SIZE / 1024,
            layout.bitmap_len,
            layout.bitmap_start
        );
        Ok(pmm)
    }

    #[inline]
    fn test_bit(&self, page: u32) -> bool {
        self.bitmap[(page / 8) as usize] & (1 << (page % 8)) != 0
    }

    #[inline]
    fn set_bit(&mut self, page: u32) {
        self.bitmap[(page / 8) as usize] |= 1 << (page % 8);
    }

    #[inline]
    fn clear_bit(&mut self, page: u32) {
        self.bitmap[(page / 8) as usize] &= !(1 << (page % 8));
    }

    /// Clamp a frame range to the frames this allocator tracks.
    #[allow(clippy::cast_possible_truncation)]
    fn clamp_pages(&self, first: u64, last: u64) -> core::ops::Range<u32> {
        let total = u64::from(self.total_pages);
        let first = first.min(total) as u32;
        let last = last.min(total) as u32;
        first..last.max(first)
    }

    /// Mark every frame touched by `[start, end)` as used.
    fn reserve_range(&mut self, start: u64, end: u64) -> u32 {
        let mut changed = 0;
        for page in self.clamp_pages(start / FRAME_SIZE, end.div_ceil(FRAME_SIZE)) {
            if !self.test_bit(page) {
                self.set_bit(page);
                self.free_pages -= 1;
                changed += 1;
            }
        }
        changed
    }

    /// Mark every frame fully inside `[start, end)` as free.
    fn release_range(&mut self, start: u64, end: u64) -> u32 {
        let mut changed = 0;
        for page in self.clamp_pages(start.div_ceil(FRAME_SIZE), end / FRAME_SIZE) {
            if self.test_bit(page) {
                self.clear_bit(page);
                self.free_pages += 1;
                changed += 1;
            }
        }
        changed
    }

    /// Reserve `[base, base + size)`, rounding outwards to whole frames.
    ///
    /// Returns the number of frames that went from free to used; frames that
    /// were already used or lie beyond the tracked range are skipped.
    pub fn mark_region_used(&mut self, base: PhysicalAddress, size: u32) -> u32 {
        self.reserve_range(base.as_u64(), base.as_u64() + u64::from(size))
    }

    /// Release the frames fully inside `[base, base + size)`.
    ///
    /// Returns the number of frames that went from used to free.
    pub fn mark_region_free(&mut self, base: PhysicalAddress, size: u32) -> u32 {
        self.release_range(base.as_u64(), base.as_u64() + u64::from(size))
    }

    /// Lowest free frame, if any.
    #[allow(clippy::cast_possible_truncation)]
    fn find_free_page(&self) -> Option<u32> {
        self.bitmap
            .iter()
            .position(|&byte| byte != 0xFF)
            .map(|index| index as u32 * 8 + self.bitmap[index].trailing_ones())
            .filter(|&page| page < self.total_pages)
    }

    /// Allocate one frame and return its physical base address.
    ///
    /// # Errors
    /// [`PmmError::OutOfMemory`] when no frame is free.
    pub fn alloc_page(&mut self) -> Result<PhysicalAddress, PmmError> {
        if self.free_pages == 0 {
            return Err(PmmError::OutOfMemory);
        }
        let page = self.find_free_page().ok_or(PmmError::OutOfMemory)?;
        self.set_bit(page);
        self.free_pages -= 1;

        let addr = PhysicalPage::from_index(page).base();
        trace!("alloc_page -> {addr}");
        Ok(addr)
    }

    /// Return a frame obtained from [`alloc_page`](Self::alloc_page).
    ///
    /// Invalid requests are refused without touching the bitmap or the counters.
    ///
    /// # Errors
    /// - [`PmmError::Unaligned`] if `addr` is not on a frame boundary.
    /// - [`PmmError::OutOfRange`] if the frame is not tracked.
    /// - [`PmmError::DoubleFree`] if the frame is already free.
    pub fn free_page(&mut self, addr: PhysicalAddress) -> Result<(), PmmError> {
        if !addr.is_page_aligned() {
            return Err(PmmError::Unaligned(addr));
        }
        let page = addr.page().index();
        if page >= self.total_pages {
            return Err(PmmError::OutOfRange(addr));
        }
        if !self.test_bit(page) {
            return Err(PmmError::DoubleFree(addr));
        }
        self.clear_bit(page);
        self.free_pages += 1;
        trace!("free_page {addr}");
        Ok(())
    }

    #[must_use]
    pub const fn free_pages(&self) -> u32 {
        self.free_pages
    }

    #[must_use]
    pub const fn total_pages(&self) -> u32 {
        self.total_pages
    }

    #[must_use]
    pub const fn used_pages(&self) -> u32 {
        self.total_pages - self.free_pages
    }

    /// Whether `page` is in use; `None` if it is not tracked.
    #[must_use]
    pub fn is_page_used(&self, page: PhysicalPage) -> Option<bool> {
        (page.index() < self.total_pages).then(|| self.test_bit(page.index()))
    }

    /// The raw bitmap, LSB-first within each byte.
    #[must_use]
    pub fn bitmap(&self) -> &[u8] {
        self.bitmap
    }
}

impl core::fmt::Debug for BitmapFrameAllocator<'_> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("BitmapFrameAllocator")
            .field("total_pages", &self.total_pages)
            .field("free_pages", &self.free_pages)
            .field("bitmap_len", &self.bitmap.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kernel_info::boot::{E820Entry, MemoryRegionType};

    fn pmm_over<'a>(
        entries: &[E820Entry],
        kernel_end: u32,
        storage: &'a mut [u8],
    ) -> BitmapFrameAllocator<'a> {
        let map = MemoryMap::new(entries);
        let layout = FrameLayout::compute(&map, PhysicalAddress::new(kernel_end)).unwrap();
        BitmapFrameAllocator::init(&map, &layout, storage).unwrap()
    }

    #[test]
    fn partial_frames_of_usable_regions_stay_reserved() {
        let entries = [E820Entry::new(
            0x20_0800,
            0x2000,
            MemoryRegionType::Usable,
        )];
        let mut storage = [0u8; 80];
        let pmm = pmm_over(&entries, 0x2000, &mut storage);
        // Only 0x20_1000..0x20_2000 is fully covered.
        assert_eq!(pmm.total_pages(), 0x202);
        assert_eq!(pmm.free_pages(), 1);
        assert_eq!(pmm.is_page_used(PhysicalPage::from_index(0x201)), Some(false));
        assert_eq!(pmm.is_page_used(PhysicalPage::from_index(0x200)), Some(true));
    }

    #[test]
    fn padding_bits_are_never_handed_out() {
        // 0x10_3000 / 4096 = 259 frames; the last bitmap byte has 5 padding bits.
        let entries = [E820Entry::new(0, 0x10_3000, MemoryRegionType::Usable)];
        let mut storage = [0u8; 33];
        let mut pmm = pmm_over(&entries, 0x2000, &mut storage);
        assert_eq!(pmm.free_pages(), 3);
        assert_eq!(pmm.bitmap()[32], 0b1111_1000);
        for _ in 0..3 {
            assert!(pmm.alloc_page().is_ok());
        }
        assert_eq!(pmm.alloc_page(), Err(PmmError::OutOfMemory));
    }

    #[test]
    fn clamp_pages_never_inverts() {
        let entries = [E820Entry::new(0, 0x20_0000, MemoryRegionType::Usable)];
        let mut storage = [0u8; 64];
        let pmm = pmm_over(&entries, 0x2000, &mut storage);
        assert!(pmm.clamp_pages(600, 10).is_empty());
        assert_eq!(pmm.clamp_pages(500, 700), 500..512);
    }
}
