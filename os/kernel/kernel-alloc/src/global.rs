//! # Global Memory Handle
//!
//! The kernel owns exactly one [`MemoryManager`]. It is installed once during
//! boot and afterwards reached through a [`SpinLock`]; every function below
//! takes the lock for a single operation and the guard releases it on every
//! path, including early error returns.
//!
//! The `k*`/`pmm_*` functions form the kernel-facing, C-style API: failures
//! come back as a null pointer or `None` and are logged, never panicked on.

use crate::error::{HeapError, MemoryError};
use crate::heap::Heap;
use crate::memory::{MemoryLayout, MemoryManager};
use core::alloc::{GlobalAlloc, Layout};
use core::ptr::{self, NonNull};
use kernel_info::boot::MemoryMap;
use kernel_info::memory::{HEAP_ALIGN, HEAP_SIZE};
use kernel_memory_addresses::PhysicalAddress;
use kernel_sync::SpinLock;
use log::{debug, warn};

static MEMORY: SpinLock<Option<MemoryManager<'static>>> = SpinLock::new(None);

/// Make `manager` the global memory manager, returning the previous one.
pub fn install(manager: MemoryManager<'static>) -> Option<MemoryManager<'static>> {
    MEMORY.with_lock(|slot| slot.replace(manager))
}

#[must_use]
pub fn is_initialized() -> bool {
    MEMORY.with_lock(|slot| slot.is_some())
}

/// Run `f` on the global manager; `None` if none is installed yet.
pub fn with_memory<R>(f: impl FnOnce(&mut MemoryManager<'static>) -> R) -> Option<R> {
    MEMORY.with_lock(|slot| slot.as_mut().map(f))
}

/// Plan the layout with a [`HEAP_SIZE`] arena, build the manager over the
/// given storage and install it.
///
/// `bitmap` must hold at least the planned bitmap length and `arena` at least
/// [`HEAP_SIZE`] bytes.
///
/// # Errors
/// Planning or initialization failures; nothing is installed in that case.
pub fn init_with(
    map: &MemoryMap<'_>,
    kernel_end: PhysicalAddress,
    bitmap: &'static mut [u8],
    arena: &'static mut [u8],
) -> Result<MemoryLayout, MemoryError> {
    let layout = MemoryLayout::plan(map, kernel_end, HEAP_SIZE as usize)?;
    let manager = MemoryManager::init(map, &layout, bitmap, arena)?;
    if install(manager).is_some() {
        warn!("memory manager replaced");
    }
    Ok(layout)
}

/// Initialize from physical memory: the bitmap and the arena are placed at
/// the addresses [`MemoryLayout::plan`] picks behind `kernel_end`.
///
/// # Safety
/// Physical memory must be identity mapped, and the planned bitmap and arena
/// ranges must be RAM that nothing else references for the rest of the
/// kernel's lifetime.
///
/// # Errors
/// As for [`init_with`].
pub unsafe fn init_from_physical(
    map: &MemoryMap<'_>,
    kernel_end: PhysicalAddress,
) -> Result<MemoryLayout, MemoryError> {
    let layout = MemoryLayout::plan(map, kernel_end, HEAP_SIZE as usize)?;
    // Safety: per the contract above, both ranges are exclusively ours.
    let (bitmap, arena) = unsafe {
        (
            core::slice::from_raw_parts_mut(
                layout.frames.bitmap_start.as_usize() as *mut u8,
                layout.frames.bitmap_len,
            ),
            core::slice::from_raw_parts_mut(
                layout.heap_start.as_usize() as *mut u8,
                layout.heap_size,
            ),
        )
    };
    init_with(map, kernel_end, bitmap, arena)
}

/// Move the kernel heap of the installed manager onto `arena`.
///
/// Live allocations in the previous arena are forgotten; freeing them later
/// is refused as out of range. The frames behind `arena` are not reserved.
///
/// # Errors
/// [`HeapError::Uninitialized`] if no manager is installed yet, otherwise
/// whatever [`Heap::init`] refuses. The current heap stays in place on error.
pub fn heap_init(arena: &'static mut [u8]) -> Result<(), HeapError> {
    let len = arena.len();
    let mut heap = Heap::new();
    heap.init(arena)?;
    with_memory(|memory| *memory.heap_mut() = heap).ok_or(HeapError::Uninitialized)?;
    debug!("heap moved to a {len} byte arena");
    Ok(())
}

/// Allocate `size` bytes from the kernel heap; null on failure.
#[must_use]
pub fn kmalloc(size: usize) -> *mut u8 {
    match with_memory(|memory| memory.allocate(size)) {
        Some(Ok(ptr)) => ptr.as_ptr(),
        Some(Err(err)) => {
            warn!("kmalloc({size}): {err}");
            ptr::null_mut()
        }
        None => {
            warn!("kmalloc({size}) before memory initialization");
            ptr::null_mut()
        }
    }
}

/// Allocate `size` bytes aligned to `alignment`; null on failure.
///
/// The result can be released with [`kfree`] like any other allocation.
#[must_use]
pub fn kmalloc_aligned(size: usize, alignment: usize) -> *mut u8 {
    match with_memory(|memory| memory.allocate_aligned(size, alignment)) {
        Some(Ok(ptr)) => ptr.as_ptr(),
        Some(Err(err)) => {
            warn!("kmalloc_aligned({size}, {alignment}): {err}");
            ptr::null_mut()
        }
        None => {
            warn!("kmalloc_aligned({size}, {alignment}) before memory initialization");
            ptr::null_mut()
        }
    }
}

/// Release a [`kmalloc`]/[`kmalloc_aligned`] allocation. Null is ignored;
/// foreign or already freed pointers are refused and logged.
pub fn kfree(ptr: *mut u8) {
    let Some(ptr) = NonNull::new(ptr) else {
        return;
    };
    match with_memory(|memory| memory.free(ptr)) {
        Some(Ok(())) => {}
        Some(Err(err)) => warn!("kfree({ptr:p}): {err}"),
        None => warn!("kfree({ptr:p}) before memory initialization"),
    }
}

/// Allocate one physical frame.
#[must_use]
pub fn pmm_alloc_page() -> Option<PhysicalAddress> {
    match with_memory(MemoryManager::alloc_page)? {
        Ok(addr) => Some(addr),
        Err(err) => {
            warn!("pmm_alloc_page: {err}");
            None
        }
    }
}

/// Return a frame from [`pmm_alloc_page`]; invalid addresses are refused and logged.
pub fn pmm_free_page(addr: PhysicalAddress) {
    match with_memory(|memory| memory.free_page(addr)) {
        Some(Ok(())) => {}
        Some(Err(err)) => warn!("pmm_free_page: {err}"),
        None => debug!("pmm_free_page({addr}) before memory initialization"),
    }
}

/// Free frames; 0 before initialization.
#[must_use]
pub fn pmm_free_pages() -> u32 {
    with_memory(|memory| memory.free_pages()).unwrap_or(0)
}

/// Tracked frames; 0 before initialization.
#[must_use]
pub fn pmm_total_pages() -> u32 {
    with_memory(|memory| memory.total_pages()).unwrap_or(0)
}

/// [`GlobalAlloc`] over the global heap.
///
/// Register it with `#[global_allocator]` in the final kernel binary. Requests
/// fail (null) until a manager is installed.
pub struct KernelHeapAllocator;

unsafe impl GlobalAlloc for KernelHeapAllocator {
    /// # Safety
    /// The `GlobalAlloc` contract applies. Caller must handle a null return (OOM).
    unsafe fn alloc(&self, layout: Layout) -> *mut u8 {
        let size = layout.size().max(1);
        let result = if layout.align() <= HEAP_ALIGN {
            with_memory(|memory| memory.allocate(size))
        } else {
            with_memory(|memory| memory.allocate_aligned(size, layout.align()))
        };
        result
            .and_then(Result::ok)
            .map_or(ptr::null_mut(), NonNull::as_ptr)
    }

    /// # Safety
    /// The `GlobalAlloc` contract applies. `ptr` must come from `alloc` of this allocator.
    unsafe fn dealloc(&self, ptr: *mut u8, _layout: Layout) {
        kfree(ptr);
    }
}
