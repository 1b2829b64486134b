//! # Memory Layout

pub use kernel_memory_addresses::{ADDRESS_LIMIT, PAGE_SIZE};

/// End of the legacy low-memory area (1 MiB). Frames below it are never handed out.
pub const LOW_MEMORY_END: u32 = 0x0010_0000;

/// Physical address the kernel image is loaded at. Everything from here up to
/// `_kernel_end` is reserved.
pub const KERNEL_LOAD_ADDR: u32 = 0x1000;

/// Size of the kernel heap arena reserved at boot.
pub const HEAP_SIZE: u32 = 1024 * 1024;

/// Alignment of every heap payload.
pub const HEAP_ALIGN: usize = 8;

const _: () = {
    assert!(LOW_MEMORY_END.is_multiple_of(PAGE_SIZE));
    assert!(KERNEL_LOAD_ADDR.is_multiple_of(PAGE_SIZE));
    assert!(KERNEL_LOAD_ADDR < LOW_MEMORY_END);
    assert!(HEAP_SIZE.is_multiple_of(PAGE_SIZE));
    assert!(HEAP_ALIGN.is_power_of_two());
};
