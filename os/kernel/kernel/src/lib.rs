//! # Kernel Memory Entry Points
//!
//! Links the memory manager into the rest of the kernel. The crate builds as
//! a static library exporting a C ABI:
//!
//! | symbol                     | purpose                                   |
//! |----------------------------|-------------------------------------------|
//! | `memory_init`              | bring up frames and heap from the E820 map |
//! | `heap_init`                | move the heap onto another region         |
//! | `kmalloc` / `kfree`        | heap allocation, null on failure          |
//! | `kmalloc_aligned`          | heap allocation with a power-of-two alignment |
//! | `pmm_alloc_page`           | one 4 KiB frame, 0 on failure             |
//! | `pmm_free_page`            | return a frame                            |
//! | `pmm_get_free_pages`       | free frame count                          |
//! | `pmm_get_total_pages`      | tracked frame count                       |
//!
//! In a freestanding build (`target_os = "none"`) the crate also provides the
//! panic handler, installs the debug console logger and registers the heap as
//! the Rust global allocator. Hosted builds only carry the C ABI, which keeps
//! it testable.

#![cfg_attr(target_os = "none", no_std)]
#![allow(unsafe_code)]

mod abi;
#[cfg(target_os = "none")]
mod boot;

pub use abi::{
    heap_init, kfree, kmalloc, kmalloc_aligned, pmm_alloc_page, pmm_free_page,
    pmm_get_free_pages, pmm_get_total_pages,
};
#[cfg(target_os = "none")]
pub use boot::memory_init;
