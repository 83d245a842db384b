//! # QEMU Debug Console
//!
//! Byte-wise output to QEMU's `isa-debugcon` device (I/O port `0x402`).
//!
//! The port needs neither firmware services nor memory allocation, which makes
//! it the only output channel that keeps working across `ExitBootServices`.
//! The loader routes every log record here and additionally mirrors it to the
//! firmware console while that is still available.
//!
//! Capture the output on the host with
//!
//! ```bash
//! qemu-system-x86_64 ... -debugcon file:debug.log -global isa-debugcon.iobase=0x402
//! ```
//!
//! On real hardware the port is normally unused and writes are dropped.
//!
//! With the `enabled` feature switched off, [`qemu_trace!`] still type-checks
//! its arguments but compiles to nothing.

#![cfg_attr(not(any(test, doctest)), no_std)]
#![allow(unsafe_code)]

#[cfg(all(feature = "enabled", target_arch = "x86_64"))]
#[doc(hidden)]
pub mod qemu_fmt {
    use core::fmt::{self, Write};

    /// The port number for QEMU's debug console.
    const QEMU_DEBUG_PORT: u16 = 0x402;

    #[allow(clippy::inline_always)]
    #[inline(always)]
    pub fn dbg_putc(c: u8) {
        // SAFETY: port 0x402 has no side effects beyond QEMU's debug console.
        unsafe {
            core::arch::asm!(
                "out dx, al",
                in("dx") QEMU_DEBUG_PORT,
                in("al") c,
                options(nomem, nostack, preserves_flags)
            );
        }
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
        // Best effort; there is nobody to report a failure to.
        let _ = QemuSink.write_fmt(args);
    }
}

#[cfg(not(all(feature = "enabled", target_arch = "x86_64")))]
#[doc(hidden)]
pub mod qemu_fmt {
    use core::fmt;

    #[doc(hidden)]
    #[inline(always)]
    #[allow(clippy::inline_always, clippy::needless_pass_by_value)]
    pub fn qemu_write(_: fmt::Arguments) {}
}

/// `format!`-style output to the QEMU debug console. Does not allocate.
#[macro_export]
macro_rules! qemu_trace {
    ($($arg:tt)*) => {{
        $crate::qemu_fmt::qemu_write(core::format_args!($($arg)*));
    }};
}
