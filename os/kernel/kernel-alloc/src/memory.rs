//! # Memory Manager
//!
//! Places the frame bitmap and the heap arena behind the kernel image and owns
//! both allocators. Planning ([`MemoryLayout::plan`]) is pure arithmetic on
//! the memory map; [`MemoryManager::init`] then takes the storage that lives at
//! the planned addresses.

use crate::error::{HeapError, MemoryError, PmmError};
use crate::frame_alloc::{BitmapFrameAllocator, FrameLayout};
use crate::heap::Heap;
use core::ptr::NonNull;
use kernel_info::boot::MemoryMap;
use kernel_memory_addresses::{ADDRESS_LIMIT, PAGE_SIZE, PhysicalAddress};
use log::info;

/// Where the bitmap and the heap arena go.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct MemoryLayout {
    pub frames: FrameLayout,
    /// First page boundary after the bitmap.
    pub heap_start: PhysicalAddress,
    pub heap_size: usize,
}

impl MemoryLayout {
    /// Plan the layout for `map` with the kernel image ending at `kernel_end`.
    ///
    /// # Errors
    /// [`MemoryError::Frames`] for an invalid kernel end,
    /// [`MemoryError::LayoutOverflow`] if the arena would leave the 32-bit
    /// address space.
    pub fn plan(
        map: &MemoryMap<'_>,
        kernel_end: PhysicalAddress,
        heap_size: usize,
    ) -> Result<Self, MemoryError> {
        let frames = FrameLayout::compute(map, kernel_end)?;
        let heap_start = frames
            .bitmap_end()
            .align_up(PAGE_SIZE)
            .ok_or(MemoryError::LayoutOverflow)?;

        let fits = u64::try_from(heap_size)
            .ok()
            .and_then(|size| heap_start.as_u64().checked_add(size))
            .is_some_and(|end| end <= ADDRESS_LIMIT + 1);
        if !fits {
            return Err(MemoryError::LayoutOverflow);
        }

        Ok(Self {
            frames,
            heap_start,
            heap_size,
        })
    }

    /// First byte past the heap arena.
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub const fn heap_end(&self) -> u64 {
        self.heap_start.as_u64() + self.heap_size as u64
    }
}

/// The frame allocator and the heap, initialized together.
#[derive(Debug)]
pub struct MemoryManager<'a> {
    frames: BitmapFrameAllocator<'a>,
    heap: Heap<'a>,
}

impl<'a> MemoryManager<'a> {
    /// Bring up the frame allocator over `bitmap`, reserve the heap arena's
    /// frames, then hand `arena` to the heap.
    ///
    /// `bitmap` and `arena` are the memory at `layout.frames.bitmap_start` and
    /// `layout.heap_start`; only the first `layout.heap_size` bytes of `arena`
    /// are used.
    ///
    /// # Errors
    /// Whatever the frame allocator or the heap refuse, and
    /// [`HeapError::ArenaTooSmall`] if `arena` is shorter than the layout says.
    pub fn init(
        map: &MemoryMap<'_>,
        layout: &MemoryLayout,
        bitmap: &'a mut [u8],
        arena: &'a mut [u8],
    ) -> Result<Self, MemoryError> {
        let mut frames = BitmapFrameAllocator::init(map, &layout.frames, bitmap)?;

        let available = arena.len();
        let arena = arena
            .get_mut(..layout.heap_size)
            .ok_or(HeapError::ArenaTooSmall(available))?;
        let heap_size = u32::try_from(layout.heap_size).map_err(|_| MemoryError::LayoutOverflow)?;
        let reserved = frames.mark_region_used(layout.heap_start, heap_size);

        let mut heap = Heap::new();
        heap.init(arena)?;

        info!(
            "Heap arena {}..{:#010x} ({} KiB, {reserved} frames reserved), {} frames free",
            layout.heap_start,
            layout.heap_end(),
            layout.heap_size / 1024,
            frames.free_pages()
        );
        Ok(Self { frames, heap })
    }

    #[must_use]
    pub const fn frames(&self) -> &BitmapFrameAllocator<'a> {
        &self.frames
    }

    pub const fn frames_mut(&mut self) -> &mut BitmapFrameAllocator<'a> {
        &mut self.frames
    }

    #[must_use]
    pub const fn heap(&self) -> &Heap<'a> {
        &self.heap
    }

    pub const fn heap_mut(&mut self) -> &mut Heap<'a> {
        &mut self.heap
    }

    /// See [`BitmapFrameAllocator::alloc_page`].
    ///
    /// # Errors
    /// [`PmmError::OutOfMemory`].
    pub fn alloc_page(&mut self) -> Result<PhysicalAddress, PmmError> {
        self.frames.alloc_page()
    }

    /// See [`BitmapFrameAllocator::free_page`].
    ///
    /// # Errors
    /// As for [`BitmapFrameAllocator::free_page`].
    pub fn free_page(&mut self, addr: PhysicalAddress) -> Result<(), PmmError> {
        self.frames.free_page(addr)
    }

    #[must_use]
    pub const fn free_pages(&self) -> u32 {
        self.frames.free_pages()
    }

    #[must_use]
    pub const fn total_pages(&self) -> u32 {
        self.frames.total_pages()
    }

    /// See [`Heap::allocate`].
    ///
    /// # Errors
    /// As for [`Heap::allocate`].
    pub fn allocate(&mut self, size: usize) -> Result<NonNull<u8>, HeapError> {
        self.heap.allocate(size)
    }

    /// See [`Heap::allocate_aligned`].
    ///
    /// # Errors
    /// As for [`Heap::allocate_aligned`].
    pub fn allocate_aligned(
        &mut self,
        size: usize,
        alignment: usize,
    ) -> Result<NonNull<u8>, HeapError> {
        self.heap.allocate_aligned(size, alignment)
    }

    /// See [`Heap::free`].
    ///
    /// # Errors
    /// As for [`Heap::free`].
    pub fn free(&mut self, ptr: NonNull<u8>) -> Result<(), HeapError> {
        self.heap.free(ptr)
    }
}
