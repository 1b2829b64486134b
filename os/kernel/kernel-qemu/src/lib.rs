//! # QEMU Debug Console Output
//!
//! Zero-allocation log output for the kernel while it runs under QEMU (or
//! Bochs). Bytes written to I/O port `0xE9` show up on the host when QEMU is
//! started with `-debugcon stdio` (or `-debugcon file:debug.log`).
//!
//! Two entry points:
//!
//! * [`QemuLogger`], a [`log::Log`] backend that formats records as
//!   `[LEVEL] target: message`.
//! * [`qemu_trace!`], raw `format_args!`-style output that bypasses the `log`
//!   facade, for the earliest boot steps and the panic handler.
//!
//! With the `enabled` feature off, or outside a freestanding x86 build, every
//! write compiles to nothing.
//!
//! ```rust,no_run
//! use kernel_qemu::QemuLogger;
//! use log::{LevelFilter, info};
//!
//! static LOGGER: QemuLogger = QemuLogger::new(LevelFilter::Debug);
//!
//! LOGGER.install().expect("logger installed once");
//! info!("memory manager online");
//! ```

#![cfg_attr(not(any(test, doctest)), no_std)]
#![allow(unsafe_code)]

mod logger;

pub use logger::QemuLogger;

#[cfg(feature = "enabled")]
#[doc(hidden)]
pub mod qemu_fmt {
    use core::fmt::{self, Write};

    /// The Bochs/QEMU debug console port.
    pub const DEBUGCON_PORT: u16 = 0xE9;

    #[allow(clippy::inline_always)]
    #[inline(always)]
    pub fn dbg_putc(c: u8) {
        #[cfg(all(target_os = "none", any(target_arch = "x86", target_arch = "x86_64")))]
        unsafe {
            core::arch::asm!(
                "out dx, al",
                in("dx") DEBUGCON_PORT,
                in("al") c,
                options(nomem, nostack, preserves_flags)
            );
        }
        #[cfg(not(all(target_os = "none", any(target_arch = "x86", target_arch = "x86_64"))))]
        let _ = c;
    }

    pub struct QemuSink;

    impl Write for QemuSink {
        #[inline]
        fn write_str(&mut self, s: &str) -> fmt::Result {
            s.bytes().for_each(dbg_putc);
            Ok(())
        }
    }

    #[doc(hidden)]
    #[inline]
    pub fn qemu_write(args: fmt::Arguments) {
        // Best effort; there is nowhere to report a failed debug write.
        let _ = QemuSink.write_fmt(args);
    }
}

#[cfg(not(feature = "enabled"))]
#[doc(hidden)]
pub mod qemu_fmt {
    use core::fmt;

    #[doc(hidden)]
    #[inline(always)]
    #[allow(clippy::inline_always)]
    pub fn qemu_write(_: fmt::Arguments) {}
}

/// Write `format_args!`-style output straight to the debug console.
#[macro_export]
macro_rules! qemu_trace {
    ($($arg:tt)*) => {{
        $crate::qemu_fmt::qemu_write(core::format_args!($($arg)*));
    }};
}
