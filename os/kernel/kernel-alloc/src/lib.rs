//! # Kernel Memory Management
//!
//! Physical frame allocation and the kernel heap for a 32-bit, identity-mapped
//! kernel. Everything here works on caller-provided memory, so the crate is
//! `no_std` in the kernel and fully testable on the host.
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────┐
//! │        kmalloc / kfree / pmm_* ([`global`])         │
//! │    • One lock-protected MemoryManager               │
//! │    • GlobalAlloc adapter                            │
//! └─────────────────┬───────────────────────────────────┘
//!                   │
//! ┌─────────────────▼───────────────────────────────────┐
//! │              MemoryManager ([`memory`])             │
//! │    • Places bitmap and heap arena after the kernel  │
//! │    • Reserves the arena in the frame bitmap         │
//! └────────┬───────────────────────────┬────────────────┘
//!          │                           │
//! ┌────────▼──────────────┐  ┌─────────▼────────────────┐
//! │ BitmapFrameAllocator  │  │ Heap                     │
//! │ ([`frame_alloc`])     │  │ ([`heap`])               │
//! │ • 1 bit per 4 KiB     │  │ • in-band block headers  │
//! │ • first fit           │  │ • first fit, split,      │
//! │                       │  │   eager coalescing       │
//! └───────────────────────┘  └──────────────────────────┘
//! ```
//!
//! ## Physical Layout After Initialization
//!
//! ```text
//! 0x0000_0000 ┌───────────────────────┐
//!             │ low memory (reserved) │
//! 0x0000_1000 │ kernel image          │
//!             ├───────────────────────┤ kernel_end, page aligned
//!             │ frame bitmap          │
//!             ├───────────────────────┤ page aligned
//!             │ heap arena (1 MiB)    │
//!             ├───────────────────────┤
//!             │ free frames ...       │
//!             └───────────────────────┘
//! ```
//!
//! ## Usage
//! ```
//! use kernel_alloc::memory::{MemoryLayout, MemoryManager};
//! use kernel_info::boot::{E820Entry, MemoryMap, MemoryRegionType};
//! use kernel_memory_addresses::PhysicalAddress;
//!
//! let entries = [E820Entry::new(0, 16 << 20, MemoryRegionType::Usable)];
//! let map = MemoryMap::new(&entries);
//! let layout = MemoryLayout::plan(&map, PhysicalAddress::new(0x20_0000), 64 * 1024).unwrap();
//!
//! let mut bitmap = vec![0u8; layout.frames.bitmap_len];
//! let mut arena = vec![0u8; layout.heap_size];
//! let mut memory = MemoryManager::init(&map, &layout, &mut bitmap, &mut arena).unwrap();
//!
//! let frame = memory.alloc_page().unwrap();
//! assert!(frame.is_page_aligned());
//! let block = memory.allocate(100).unwrap();
//! memory.free(block).unwrap();
//! memory.free_page(frame).unwrap();
//! ```

#![cfg_attr(not(any(test, doctest)), no_std)]
#![allow(unsafe_code)]

pub mod error;
pub mod frame_alloc;
pub mod global;
pub mod heap;
pub mod memory;

pub use error::{HeapError, MemoryError, PmmError};
