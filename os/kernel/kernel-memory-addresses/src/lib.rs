//! # Physical Memory Address Types
//!
//! Strongly typed wrappers for the 32-bit physical addresses and 4 KiB page
//! frames the memory manager deals in.
//!
//! ## Overview
//!
//! The kernel runs without paging, so every address it hands around is a
//! physical one and fits in 32 bits. Two principal types keep byte addresses
//! and frame numbers apart:
//!
//! | Type | Description |
//! |------|-------------|
//! | [`PhysicalAddress`] | A raw 32-bit physical byte address. |
//! | [`PhysicalPage`] | A 4 KiB page frame, identified by its frame number. |
//!
//! Firmware reports memory in 64-bit quantities; [`PhysicalAddress::from_u64_clamped`]
//! folds those into the 32-bit space the allocator manages.
//!
//! ## Typical Usage
//!
//! ```rust
//! # use kernel_memory_addresses::*;
//! let pa = PhysicalAddress::new(0x0010_1234);
//! let page = pa.page();
//! assert_eq!(page.index(), 0x101);
//! assert_eq!(page.base().as_u32(), 0x0010_1000);
//! assert_eq!(pa.page_offset(), 0x234);
//! assert!(!pa.is_page_aligned());
//! assert_eq!(pa.align_up(PAGE_SIZE), Some(PhysicalAddress::new(0x0010_2000)));
//! ```
//!
//! ## Design Notes
//!
//! - The types are `#[repr(transparent)]` and implement `Copy`, `Eq`, `Ord`
//!   and `Hash`.
//! - Alignment helpers are `const fn` and return `None` instead of wrapping
//!   past the top of the 32-bit address space.

#![cfg_attr(not(any(test, doctest)), no_std)]

mod physical_address;
mod physical_page;

pub use physical_address::PhysicalAddress;
pub use physical_page::PhysicalPage;

/// Size of a page frame in bytes.
pub const PAGE_SIZE: u32 = 4096;

/// log2([`PAGE_SIZE`]).
pub const PAGE_SHIFT: u32 = 12;

/// Highest byte address representable in the 32-bit physical address space.
pub const ADDRESS_LIMIT: u64 = 0xFFFF_FFFF;

const _: () = assert!(1 << PAGE_SHIFT == PAGE_SIZE);

/// Align `value` up to `align` (must be a power of two).
///
/// Returns `None` if the result does not fit in a `u64`.
#[inline]
#[must_use]
pub const fn align_up(value: u64, align: u64) -> Option<u64> {
    debug_assert!(align.is_power_of_two());
    match value.checked_add(align - 1) {
        Some(v) => Some(v & !(align - 1)),
        None => None,
    }
}

/// Align `value` down to `align` (must be a power of two).
#[inline]
#[must_use]
pub const fn align_down(value: u64, align: u64) -> u64 {
    debug_assert!(align.is_power_of_two());
    value & !(align - 1)
}

/// Number of whole pages needed to cover `bytes`.
#[inline]
#[must_use]
pub const fn pages_for(bytes: u64) -> u64 {
    bytes.div_ceil(PAGE_SIZE as u64)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn align_helpers() {
        assert_eq!(align_up(0, 8), Some(0));
        assert_eq!(align_up(1, 8), Some(8));
        assert_eq!(align_up(8, 8), Some(8));
        assert_eq!(align_up(u64::MAX, 8), None);
        assert_eq!(align_down(0x1FFF, 0x1000), 0x1000);
    }

    #[test]
    fn page_counts_round_up() {
        assert_eq!(pages_for(0), 0);
        assert_eq!(pages_for(1), 1);
        assert_eq!(pages_for(4096), 1);
        assert_eq!(pages_for(4097), 2);
        assert_eq!(pages_for(1024 * 1024), 256);
    }
}
