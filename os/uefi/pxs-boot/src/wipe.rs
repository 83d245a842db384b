//! # Secure Wipe

extern crate alloc;

use alloc::vec::Vec;
use core::ops::Deref;
use core::sync::atomic::{Ordering, compiler_fence};

/// Overwrite `buf` with zeros in a way the optimizer cannot elide, even if
/// the buffer is freed right afterwards.
pub fn wipe(buf: &mut [u8]) {
    for byte in buf.iter_mut() {
        // SAFETY: `byte` is a valid, aligned, exclusive reference.
        unsafe { core::ptr::write_volatile(byte, 0) };
    }
    compiler_fence(Ordering::SeqCst);
}

/// A byte buffer that is wiped before its memory is released.
pub struct WipeOnDrop(Vec<u8>);

impl WipeOnDrop {
    #[must_use]
    pub const fn new(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }
}

impl Deref for WipeOnDrop {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        &self.0
    }
}

impl Drop for WipeOnDrop {
    fn drop(&mut self) {
        wipe(&mut self.0);
    }
}
