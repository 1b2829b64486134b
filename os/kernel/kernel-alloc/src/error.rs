//! Error types of the memory manager.
//!
//! Nothing in here is fatal: every variant describes a request that was
//! refused and left the allocator state untouched.

use kernel_memory_addresses::PhysicalAddress;

/// Failures of the physical frame allocator.
#[derive(Debug, Copy, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PmmError {
    #[error("out of physical memory")]
    OutOfMemory,
    #[error("{0} is not page aligned")]
    Unaligned(PhysicalAddress),
    #[error("{0} is outside the managed physical range")]
    OutOfRange(PhysicalAddress),
    #[error("page at {0} is already free")]
    DoubleFree(PhysicalAddress),
    #[error("bitmap storage too small: need {needed} bytes, got {actual}")]
    BitmapTooSmall { needed: usize, actual: usize },
}

/// Failures of the kernel heap.
#[derive(Debug, Copy, Clone, PartialEq, Eq, thiserror::Error)]
pub enum HeapError {
    #[error("heap is not initialized")]
    Uninitialized,
    #[error("zero-sized allocation")]
    ZeroSize,
    #[error("out of heap memory ({0} bytes requested)")]
    OutOfMemory(usize),
    #[error("alignment {0} is not a supported power of two")]
    InvalidAlignment(usize),
    #[error("pointer {0:#x} is outside the heap arena")]
    OutOfRange(usize),
    #[error("pointer {0:#x} does not refer to a live heap block")]
    InvalidPointer(usize),
    #[error("block at {0:#x} is already free")]
    DoubleFree(usize),
    #[error("arena of {0} bytes cannot hold a single block")]
    ArenaTooSmall(usize),
    #[error("heap block list is corrupted at offset {0:#x}")]
    Corrupted(usize),
}

/// Failures while bringing up the memory manager as a whole.
#[derive(Debug, Copy, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MemoryError {
    #[error(transparent)]
    Frames(#[from] PmmError),
    #[error(transparent)]
    Heap(#[from] HeapError),
    #[error("memory layout does not fit in the 32-bit address space")]
    LayoutOverflow,
}
