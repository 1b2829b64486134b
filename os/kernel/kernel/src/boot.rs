//! Freestanding glue: logger, panic handler, global allocator and the boot
//! time memory bring-up.

use core::hint::spin_loop;
use core::panic::PanicInfo;
use kernel_alloc::global::{self, KernelHeapAllocator};
use kernel_info::boot::{E820Entry, MEMORY_MAP_ADDR, MEMORY_MAP_COUNT_ADDR, MemoryMap};
use kernel_memory_addresses::PhysicalAddress;
use kernel_qemu::{QemuLogger, qemu_trace};
use log::{LevelFilter, error, info};

static LOGGER: QemuLogger = QemuLogger::new(LevelFilter::Debug);

#[global_allocator]
static GLOBAL_ALLOCATOR: KernelHeapAllocator = KernelHeapAllocator;

unsafe extern "C" {
    /// First byte past the kernel image, provided by the linker script.
    static _kernel_end: u8;
}

#[panic_handler]
fn panic(info: &PanicInfo) -> ! {
    qemu_trace!("kernel panic: {info}\n");
    loop {
        spin_loop();
    }
}

/// The E820 map the real-mode loader left in low memory.
///
/// # Safety
/// Low memory must be identity mapped and still hold the loader's map.
unsafe fn boot_memory_map() -> MemoryMap<'static> {
    // Safety: fixed loader addresses, see `kernel_info::boot`.
    let entries = unsafe {
        let count = core::ptr::read_volatile(MEMORY_MAP_COUNT_ADDR as usize as *const u32);
        core::slice::from_raw_parts(MEMORY_MAP_ADDR as usize as *const E820Entry, count as usize)
    };
    MemoryMap::new(entries)
}

/// Bring up the frame allocator and the heap. Returns `false` if the memory
/// manager could not be initialized; allocation requests then keep failing.
///
/// # Safety
/// Call once, before any allocation, while physical memory is identity mapped
/// and nothing lives behind the kernel image yet.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn memory_init() -> bool {
    if LOGGER.install().is_err() {
        qemu_trace!("logger already installed\n");
    }

    // Safety: the caller guarantees the boot-time memory state.
    let map = unsafe { boot_memory_map() };
    let kernel_end = PhysicalAddress::from_u64_clamped(&raw const _kernel_end as usize as u64);
    info!(
        "E820 map: {} entries, {} KiB usable, kernel ends at {kernel_end}",
        map.len(),
        map.usable_bytes() / 1024
    );

    // Safety: see above.
    match unsafe { global::init_from_physical(&map, kernel_end) } {
        Ok(layout) => {
            info!(
                "Memory manager ready: {} frames, heap at {}",
                global::pmm_total_pages(),
                layout.heap_start
            );
            true
        }
        Err(err) => {
            error!("memory initialization failed: {err}");
            false
        }
    }
}
