//! C ABI over [`kernel_alloc::global`].

use core::ffi::c_void;
use kernel_alloc::global;
use kernel_memory_addresses::PhysicalAddress;
use log::warn;

/// Move the kernel heap onto `size` bytes at `start`. Returns `false` and
/// keeps the current heap if no memory manager is installed or the region
/// cannot hold a block.
///
/// # Safety
/// `start..start + size` must be writable memory that nothing else uses for
/// the rest of the kernel's lifetime.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn heap_init(start: *mut c_void, size: usize) -> bool {
    if start.is_null() {
        return false;
    }
    // Safety: the caller hands the region over for good.
    let arena = unsafe { core::slice::from_raw_parts_mut(start.cast::<u8>(), size) };
    match global::heap_init(arena) {
        Ok(()) => true,
        Err(err) => {
            warn!("heap_init({start:p}, {size}): {err}");
            false
        }
    }
}

#[unsafe(no_mangle)]
pub extern "C" fn kmalloc(size: usize) -> *mut c_void {
    global::kmalloc(size).cast()
}

#[unsafe(no_mangle)]
pub extern "C" fn kmalloc_aligned(size: usize, alignment: usize) -> *mut c_void {
    global::kmalloc_aligned(size, alignment).cast()
}

/// Null and pointers the heap does not recognize are ignored.
#[unsafe(no_mangle)]
pub extern "C" fn kfree(ptr: *mut c_void) {
    global::kfree(ptr.cast());
}

/// Physical address of a fresh frame, or 0 when none is left. Frame 0 lies
/// in reserved low memory and is never handed out.
#[unsafe(no_mangle)]
pub extern "C" fn pmm_alloc_page() -> u32 {
    global::pmm_alloc_page().map_or(0, PhysicalAddress::as_u32)
}

#[unsafe(no_mangle)]
pub extern "C" fn pmm_free_page(addr: u32) {
    global::pmm_free_page(PhysicalAddress::new(addr));
}

#[unsafe(no_mangle)]
pub extern "C" fn pmm_get_free_pages() -> u32 {
    global::pmm_free_pages()
}

#[unsafe(no_mangle)]
pub extern "C" fn pmm_get_total_pages() -> u32 {
    global::pmm_total_pages()
}
