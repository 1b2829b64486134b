//! # Kernel Heap
//!
//! A first-fit, split-and-coalesce allocator over one contiguous arena. Every
//! block, free or used, starts with a 16-byte header stored in the arena
//! itself:
//!
//! ```text
//! offset 0                                                      arena size
//! ┌────────┬──────────────┬────────┬─────────┬────────┬─────────────────┐
//! │ header │ payload      │ header │ payload │ header │ payload         │
//! └────────┴──────────────┴────────┴─────────┴────────┴─────────────────┘
//!   used                    free              used
//! ```
//!
//! | bytes  | field                                      |
//! |--------|--------------------------------------------|
//! | 0..4   | payload size (excludes the header)         |
//! | 4..8   | [`BlockFlags`]: free bit and a magic value |
//! | 8..12  | offset of the next block, `u32::MAX` = end |
//! | 12..16 | offset of the previous block               |
//!
//! Links are byte offsets from the arena start rather than addresses, and
//! every header access is bounds checked against the arena. The first block
//! always sits at offset 0 (merges only ever grow the lower block), so the
//! list head needs no storage.
//!
//! ## Invariants
//! - Walking the list from offset 0 visits blocks that exactly tile the arena;
//!   `prev`/`next` agree with each other.
//! - No two neighboring blocks are both free after any [`Heap::free`].
//! - Payload sizes are multiples of 8 and at least [`MIN_BLOCK_SIZE`], so
//!   every payload is 8-byte aligned.
//!
//! ## Aligned allocations
//! [`Heap::allocate_aligned`] over-allocates and returns an address inside the
//! payload. The distance from the payload start is recorded in the owning
//! block's header ([`BlockFlags::align_shift`]), so [`Heap::free`] accepts
//! exactly that address and nothing stored in the payload is ever trusted.

use crate::error::HeapError;
use bitfield_struct::bitfield;
use core::marker::PhantomData;
use core::ptr::{self, NonNull};
use kernel_info::memory::HEAP_ALIGN;
use log::trace;

/// Size of the in-band block header.
pub const HEADER_SIZE: usize = 16;

/// Smallest payload ever handed out or split off.
pub const MIN_BLOCK_SIZE: usize = 16;

/// Largest payload the `u32` size field can describe.
const MAX_BLOCK_SIZE: usize = (u32::MAX as usize) & !(HEAP_ALIGN - 1);

/// Link value for "no block".
const NIL: u32 = u32::MAX;

/// Tag in every live header; anything else means the list is corrupted.
const BLOCK_MAGIC: u16 = 0xB10C;

/// Largest alignment [`Heap::allocate_aligned`] accepts. The shift from the
/// payload start has to fit [`BlockFlags::align_shift`].
pub const MAX_ALIGNMENT: usize = 256 * 1024;

const _: () = {
    assert!(HEADER_SIZE.is_multiple_of(HEAP_ALIGN));
    assert!(MIN_BLOCK_SIZE.is_multiple_of(HEAP_ALIGN));
    assert!(MAX_ALIGNMENT / HEAP_ALIGN <= 1 << 15);
};

/// Second word of a block header.
#[bitfield(u32)]
#[derive(PartialEq, Eq)]
pub struct BlockFlags {
    /// Block is available for allocation.
    pub free: bool,
    /// Offset of the pointer handed out for this block from its payload
    /// start, in units of 8 bytes. Zero unless the block backs an adjusted
    /// aligned allocation.
    #[bits(15)]
    pub align_shift: u16,
    /// Always [`BLOCK_MAGIC`] for a live header.
    pub magic: u16,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
struct BlockHeader {
    size: u32,
    flags: BlockFlags,
    next: u32,
    prev: u32,
}

impl BlockHeader {
    #[allow(clippy::cast_possible_truncation)]
    fn new(size: usize, free: bool, next: Option<usize>, prev: Option<usize>) -> Self {
        Self {
            size: size as u32,
            flags: BlockFlags::new().with_free(free).with_magic(BLOCK_MAGIC),
            next: to_link(next),
            prev: to_link(prev),
        }
    }

    const fn size(&self) -> usize {
        self.size as usize
    }

    const fn is_free(&self) -> bool {
        self.flags.free()
    }

    /// Distance from the payload start to the pointer handed out.
    const fn shift(&self) -> usize {
        self.flags.align_shift() as usize * HEAP_ALIGN
    }

    fn next(&self) -> Option<usize> {
        from_link(self.next)
    }

    fn prev(&self) -> Option<usize> {
        from_link(self.prev)
    }

    fn encode(&self) -> [u8; HEADER_SIZE] {
        let mut raw = [0u8; HEADER_SIZE];
        raw[0..4].copy_from_slice(&self.size.to_le_bytes());
        raw[4..8].copy_from_slice(&self.flags.into_bits().to_le_bytes());
        raw[8..12].copy_from_slice(&self.next.to_le_bytes());
        raw[12..16].copy_from_slice(&self.prev.to_le_bytes());
        raw
    }

    fn decode(raw: &[u8; HEADER_SIZE]) -> Self {
        let word = |i: usize| u32::from_le_bytes([raw[i], raw[i + 1], raw[i + 2], raw[i + 3]]);
        Self {
            size: word(0),
            flags: BlockFlags::from_bits(word(4)),
            next: word(8),
            prev: word(12),
        }
    }
}

#[allow(clippy::cast_possible_truncation)]
fn to_link(offset: Option<usize>) -> u32 {
    offset.map_or(NIL, |o| o as u32)
}

fn from_link(link: u32) -> Option<usize> {
    (link != NIL).then_some(link as usize)
}

/// Round a request up to the heap granularity, then to the minimum block size.
fn block_size_for(size: usize) -> Option<usize> {
    let rounded = size.checked_add(HEAP_ALIGN - 1)? & !(HEAP_ALIGN - 1);
    let rounded = rounded.max(MIN_BLOCK_SIZE);
    (rounded <= MAX_BLOCK_SIZE).then_some(rounded)
}

/// Snapshot of one block, as yielded by [`Heap::blocks`].
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct BlockInfo {
    /// Offset of the header from the arena start.
    pub offset: usize,
    /// Payload size in bytes.
    pub size: usize,
    pub free: bool,
    pub prev: Option<usize>,
    pub next: Option<usize>,
}

/// Aggregate heap usage.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq)]
pub struct HeapStats {
    pub arena_size: usize,
    pub blocks: usize,
    pub free_blocks: usize,
    /// Payload bytes in used blocks.
    pub used_bytes: usize,
    /// Payload bytes in free blocks.
    pub free_bytes: usize,
    pub largest_free: usize,
}

/// The kernel heap.
///
/// Starts out uninitialized (`const`-constructible for statics); [`Heap::init`]
/// hands it its arena.
pub struct Heap<'a> {
    /// Arena start after alignment; `None` until initialized.
    base: Option<NonNull<u8>>,
    /// Usable arena length after alignment.
    size: usize,
    _arena: PhantomData<&'a mut [u8]>,
}

// Safety: the heap exclusively owns its arena; callers serialize access.
unsafe impl Send for Heap<'_> {}

impl Default for Heap<'_> {
    fn default() -> Self {
        Self::new()
    }
}

impl<'a> Heap<'a> {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            base: None,
            size: 0,
            _arena: PhantomData,
        }
    }

    #[must_use]
    pub const fn is_initialized(&self) -> bool {
        self.base.is_some()
    }

    /// Bytes under management (after aligning the start to 8 bytes).
    #[must_use]
    pub const fn arena_size(&self) -> usize {
        self.size
    }

    /// Address of the first block header.
    #[must_use]
    pub fn arena_start(&self) -> Option<NonNull<u8>> {
        self.base
    }

    /// Take ownership of `arena` and turn it into a single free block.
    ///
    /// The start is aligned up to 8 bytes; the skipped prefix and any tail
    /// that is not a multiple of 8 are not used. Any previous arena is
    /// forgotten.
    ///
    /// # Errors
    /// [`HeapError::ArenaTooSmall`] if no block with a minimum-size payload fits.
    pub fn init(&mut self, arena: &'a mut [u8]) -> Result<(), HeapError> {
        let len = arena.len();
        let skip = arena.as_ptr().align_offset(HEAP_ALIGN);
        if skip >= len {
            return Err(HeapError::ArenaTooSmall(len));
        }
        let size = ((len - skip) & !(HEAP_ALIGN - 1)).min(MAX_BLOCK_SIZE);
        if size < HEADER_SIZE + MIN_BLOCK_SIZE {
            return Err(HeapError::ArenaTooSmall(len));
        }

        let (_, aligned) = arena.split_at_mut(skip);
        let start = aligned.as_mut_ptr();
        self.base = NonNull::new(start);
        self.size = size;
        self.write_header(0, BlockHeader::new(size - HEADER_SIZE, true, None, None))?;

        trace!("heap arena of {size} bytes at {start:p}");
        Ok(())
    }

    fn base(&self) -> Result<NonNull<u8>, HeapError> {
        self.base.ok_or(HeapError::Uninitialized)
    }

    fn read_header(&self, offset: usize) -> Result<BlockHeader, HeapError> {
        let base = self.base()?;
        let in_bounds = offset
            .checked_add(HEADER_SIZE)
            .is_some_and(|end| end <= self.size);
        if !in_bounds || !offset.is_multiple_of(HEAP_ALIGN) {
            return Err(HeapError::Corrupted(offset));
        }
        let mut raw = [0u8; HEADER_SIZE];
        // Safety: `offset..offset + HEADER_SIZE` lies inside the arena.
        unsafe {
            ptr::copy_nonoverlapping(base.as_ptr().add(offset), raw.as_mut_ptr(), HEADER_SIZE);
        }
        let header = BlockHeader::decode(&raw);
        if header.flags.magic() != BLOCK_MAGIC {
            return Err(HeapError::Corrupted(offset));
        }
        Ok(header)
    }

    fn write_header(&mut self, offset: usize, header: BlockHeader) -> Result<(), HeapError> {
        self.write_bytes(offset, &header.encode())
            .map_err(|_| HeapError::Corrupted(offset))
    }

    fn write_bytes(&mut self, offset: usize, bytes: &[u8]) -> Result<(), HeapError> {
        let base = self.base()?;
        let in_bounds = offset
            .checked_add(bytes.len())
            .is_some_and(|end| end <= self.size);
        if !in_bounds {
            return Err(HeapError::OutOfRange(offset));
        }
        // Safety: bounds checked above; `bytes` never aliases the arena.
        unsafe {
            ptr::copy_nonoverlapping(bytes.as_ptr(), base.as_ptr().add(offset), bytes.len());
        }
        Ok(())
    }

    fn set_prev(&mut self, offset: usize, prev: usize) -> Result<(), HeapError> {
        let mut header = self.read_header(offset)?;
        header.prev = to_link(Some(prev));
        self.write_header(offset, header)
    }

    fn payload_ptr(&self, offset: usize) -> Result<NonNull<u8>, HeapError> {
        let base = self.base()?;
        // Safety: `offset` is a block header inside the arena; its payload follows it.
        Ok(unsafe { base.add(offset + HEADER_SIZE) })
    }

    /// Allocate at least `size` bytes, 8-byte aligned.
    ///
    /// First fit: the lowest-addressed free block that is large enough wins.
    /// The block is split when the remainder can hold another header plus a
    /// minimum-size payload; otherwise it is handed out whole.
    ///
    /// # Errors
    /// [`HeapError::Uninitialized`], [`HeapError::ZeroSize`], or
    /// [`HeapError::OutOfMemory`] when no free block is large enough.
    pub fn allocate(&mut self, size: usize) -> Result<NonNull<u8>, HeapError> {
        self.base()?;
        if size == 0 {
            return Err(HeapError::ZeroSize);
        }
        let request = block_size_for(size).ok_or(HeapError::OutOfMemory(size))?;

        let mut cursor = Some(0);
        while let Some(offset) = cursor {
            let mut block = self.read_header(offset)?;
            if block.is_free() && block.size() >= request {
                let remainder = block.size() - request;
                if remainder >= HEADER_SIZE + MIN_BLOCK_SIZE {
                    let split = offset + HEADER_SIZE + request;
                    let tail =
                        BlockHeader::new(remainder - HEADER_SIZE, true, block.next(), Some(offset));
                    self.write_header(split, tail)?;
                    if let Some(next) = block.next() {
                        self.set_prev(next, split)?;
                    }
                    block = BlockHeader::new(request, true, Some(split), block.prev());
                }
                block.flags.set_free(false);
                block.flags.set_align_shift(0);
                self.write_header(offset, block)?;
                trace!("allocate({size}) -> block {offset:#x} ({} bytes)", block.size());
                return self.payload_ptr(offset);
            }
            cursor = block.next();
        }

        Err(HeapError::OutOfMemory(size))
    }

    /// Allocate at least `size` bytes whose address is a multiple of `alignment`.
    ///
    /// The returned pointer is the aligned address itself and may be passed
    /// straight to [`free`](Self::free).
    ///
    /// # Errors
    /// [`HeapError::InvalidAlignment`] if `alignment` is zero, not a power of
    /// two, or above [`MAX_ALIGNMENT`], otherwise as for
    /// [`allocate`](Self::allocate).
    pub fn allocate_aligned(
        &mut self,
        size: usize,
        alignment: usize,
    ) -> Result<NonNull<u8>, HeapError> {
        if !alignment.is_power_of_two() || alignment > MAX_ALIGNMENT {
            return Err(HeapError::InvalidAlignment(alignment));
        }
        if alignment <= HEAP_ALIGN {
            return self.allocate(size);
        }
        self.base()?;
        if size == 0 {
            return Err(HeapError::ZeroSize);
        }

        let padded = size
            .checked_add(alignment)
            .and_then(|n| n.checked_add(HEADER_SIZE))
            .ok_or(HeapError::OutOfMemory(size))?;
        let payload = self.allocate(padded)?;

        let shift = payload.as_ptr().align_offset(alignment);
        if shift == 0 {
            return Ok(payload);
        }

        let base = self.base()?;
        let owner = payload.as_ptr() as usize - base.as_ptr() as usize - HEADER_SIZE;
        // Both addresses are multiples of 8 and `shift < MAX_ALIGNMENT`.
        let Ok(units) = u16::try_from(shift / HEAP_ALIGN) else {
            self.free(payload)?;
            return Err(HeapError::InvalidAlignment(alignment));
        };
        let mut block = self.read_header(owner)?;
        block.flags.set_align_shift(units);
        self.write_header(owner, block)?;

        trace!("allocate_aligned({size}, {alignment}) -> block {owner:#x} + {shift}");
        // Safety: `shift < alignment`, which the padding covers.
        Ok(unsafe { payload.add(shift) })
    }

    /// Map a pointer handed out by this heap to its block header offset.
    ///
    /// Walks the list to the block containing `ptr`; only the address that
    /// block's header says was handed out resolves.
    fn resolve(&self, ptr: NonNull<u8>) -> Result<usize, HeapError> {
        let base = self.base()?.as_ptr() as usize;
        let addr = ptr.as_ptr() as usize;

        let header_addr = addr.checked_sub(HEADER_SIZE).ok_or(HeapError::OutOfRange(addr))?;
        if header_addr < base || header_addr >= base + self.size {
            return Err(HeapError::OutOfRange(addr));
        }
        let target = addr - base;

        let mut cursor = Some(0);
        while let Some(offset) = cursor {
            let block = self.read_header(offset)?;
            let payload = offset + HEADER_SIZE;
            if target == payload + block.shift() {
                return Ok(offset);
            }
            if target < payload + block.size() {
                break;
            }
            cursor = block.next();
        }
        Err(HeapError::InvalidPointer(addr))
    }

    /// Release an allocation and merge it with free neighbors.
    ///
    /// The pointer is never trusted: it must lie in the arena and resolve to a
    /// live block, otherwise the call changes nothing.
    ///
    /// # Errors
    /// [`HeapError::Uninitialized`], [`HeapError::OutOfRange`],
    /// [`HeapError::InvalidPointer`], or [`HeapError::DoubleFree`].
    pub fn free(&mut self, ptr: NonNull<u8>) -> Result<(), HeapError> {
        let offset = self.resolve(ptr)?;
        let mut block = self.read_header(offset)?;
        if block.is_free() {
            return Err(HeapError::DoubleFree(ptr.as_ptr() as usize));
        }

        block.flags.set_free(true);
        block.flags.set_align_shift(0);
        self.write_header(offset, block)?;
        trace!("free block {offset:#x} ({} bytes)", block.size());
        self.coalesce(offset)
    }

    /// Merge the free block at `offset` with its next, then its previous neighbor.
    fn coalesce(&mut self, offset: usize) -> Result<(), HeapError> {
        let mut block = self.read_header(offset)?;

        if let Some(next_offset) = block.next() {
            let next = self.read_header(next_offset)?;
            if next.is_free() {
                block = BlockHeader::new(
                    block.size() + HEADER_SIZE + next.size(),
                    true,
                    next.next(),
                    block.prev(),
                );
                if let Some(after) = next.next() {
                    self.set_prev(after, offset)?;
                }
                self.write_header(offset, block)?;
            }
        }

        if let Some(prev_offset) = block.prev() {
            let prev = self.read_header(prev_offset)?;
            if prev.is_free() {
                let merged = BlockHeader::new(
                    prev.size() + HEADER_SIZE + block.size(),
                    true,
                    block.next(),
                    prev.prev(),
                );
                if let Some(after) = block.next() {
                    self.set_prev(after, prev_offset)?;
                }
                self.write_header(prev_offset, merged)?;
            }
        }
        Ok(())
    }

    /// Writable bytes behind `ptr`, from `ptr` to the end of its block.
    ///
    /// # Errors
    /// As for [`free`](Self::free); free blocks are [`HeapError::InvalidPointer`].
    pub fn usable_size(&self, ptr: NonNull<u8>) -> Result<usize, HeapError> {
        let offset = self.resolve(ptr)?;
        let block = self.read_header(offset)?;
        if block.is_free() {
            return Err(HeapError::InvalidPointer(ptr.as_ptr() as usize));
        }
        let payload_end = self.base()?.as_ptr() as usize + offset + HEADER_SIZE + block.size();
        Ok(payload_end - ptr.as_ptr() as usize)
    }

    /// The allocation behind `ptr` as a byte slice.
    ///
    /// # Errors
    /// As for [`usable_size`](Self::usable_size).
    pub fn payload(&self, ptr: NonNull<u8>) -> Result<&[u8], HeapError> {
        let len = self.usable_size(ptr)?;
        // Safety: `ptr..ptr + len` is the validated payload of a live block.
        Ok(unsafe { core::slice::from_raw_parts(ptr.as_ptr(), len) })
    }

    /// The allocation behind `ptr` as a mutable byte slice.
    ///
    /// # Errors
    /// As for [`usable_size`](Self::usable_size).
    pub fn payload_mut(&mut self, ptr: NonNull<u8>) -> Result<&mut [u8], HeapError> {
        let len = self.usable_size(ptr)?;
        // Safety: as above; `&mut self` keeps the heap from handing the block out again.
        Ok(unsafe { core::slice::from_raw_parts_mut(ptr.as_ptr(), len) })
    }

    /// Walk the block list in address order.
    #[must_use]
    pub fn blocks(&self) -> Blocks<'_, 'a> {
        Blocks {
            heap: self,
            cursor: self.base.map(|_| 0),
        }
    }

    #[must_use]
    pub fn stats(&self) -> HeapStats {
        self.blocks().fold(
            HeapStats {
                arena_size: self.size,
                ..HeapStats::default()
            },
            |mut stats, block| {
                stats.blocks += 1;
                if block.free {
                    stats.free_blocks += 1;
                    stats.free_bytes += block.size;
                    stats.largest_free = stats.largest_free.max(block.size);
                } else {
                    stats.used_bytes += block.size;
                }
                stats
            },
        )
    }
}

impl core::fmt::Debug for Heap<'_> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Heap")
            .field("base", &self.base)
            .field("size", &self.size)
            .finish()
    }
}

/// Iterator over the heap's blocks; stops early at a corrupted header.
pub struct Blocks<'h, 'a> {
    heap: &'h Heap<'a>,
    cursor: Option<usize>,
}

impl Iterator for Blocks<'_, '_> {
    type Item = BlockInfo;

    fn next(&mut self) -> Option<Self::Item> {
        let offset = self.cursor?;
        let Ok(header) = self.heap.read_header(offset) else {
            self.cursor = None;
            return None;
        };
        self.cursor = header.next();
        Some(BlockInfo {
            offset,
            size: header.size(),
            free: header.is_free(),
            prev: header.prev(),
            next: header.next(),
        })
    }
}
