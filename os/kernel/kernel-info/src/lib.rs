//! # Kernel Boot Contract and Memory Layout
//!
//! This crate is the single source of truth for what the bootloader hands to
//! the kernel and where the kernel expects things to live in physical memory.
//! It contains no logic beyond validation and read-only views; the memory
//! manager in `kernel-alloc` consumes it.
//!
//! ## Boot Information ([`boot`])
//!
//! The real-mode stage of the bootloader queries the BIOS (`INT 15h, E820h`)
//! and leaves the result at two fixed low-memory addresses:
//!
//! ```text
//! 0x0000_04FC ┌──────────────────────┐
//!             │ entry count (u32)    │
//! 0x0000_0500 ├──────────────────────┤
//!             │ E820 entry 0 (24 B)  │
//!             │ E820 entry 1 (24 B)  │
//!             │ ...                  │
//!             └──────────────────────┘
//! ```
//!
//! [`E820Entry`](boot::E820Entry) mirrors that layout bit-for-bit and
//! [`MemoryMap`](boot::MemoryMap) is a read-only view over the entries.
//!
//! ## Physical Memory Layout ([`memory`])
//!
//! ```text
//! 0x0000_0000 ┌─────────────────────────────────┐
//!             │  Low memory (IVT, BDA, boot     │
//!             │  data, VGA, BIOS ROM)           │  always reserved
//! 0x0010_0000 ├─────────────────────────────────┤ LOW_MEMORY_END
//!             │  ...                            │
//! _kernel_end ├─────────────────────────────────┤ (page aligned up)
//!             │  Page-frame bitmap              │  ceil(total_pages / 8) bytes
//!             ├─────────────────────────────────┤ (page aligned up)
//!             │  Kernel heap arena              │  HEAP_SIZE
//!             ├─────────────────────────────────┤
//!             │  Free frames                    │
//!             └─────────────────────────────────┘
//! ```
//!
//! The kernel image itself is linked at [`KERNEL_LOAD_ADDR`](memory::KERNEL_LOAD_ADDR).
//! All constants are checked with `const` assertions.

#![cfg_attr(not(any(test, doctest)), no_std)]
#![deny(unsafe_code)]

pub mod boot;
pub mod memory;
