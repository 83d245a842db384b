//! # Environment Handle
//!
//! Every interaction with the pre-boot firmware goes through the traits in
//! this module. The loader implements them on top of UEFI boot services; the
//! tests implement them on top of an in-memory arena. Nothing in this crate
//! reaches for global firmware state.

extern crate alloc;

use crate::addresses::PhysicalAddress;
use crate::boot_info::GraphicsMode;
use crate::entropy::EntropyHardware;
use crate::teardown::MemoryMapSource;
use alloc::vec::Vec;

/// The raw physical page allocator.
///
/// Rejections are expected during the KASLR search and are reported as
/// values, never by panicking.
pub trait PageAllocator {
    /// Reserve exactly `pages` 4 KiB pages starting at `address`.
    ///
    /// # Errors
    /// [`AllocationRejected`] if any part of the range is in use or not RAM.
    fn allocate_at(
        &mut self,
        address: PhysicalAddress,
        pages: u64,
    ) -> Result<PhysicalAddress, AllocationRejected>;

    /// Reserve `pages` 4 KiB pages wherever the firmware likes.
    ///
    /// # Errors
    /// [`AllocationRejected`] if no such range exists.
    fn allocate_anywhere(&mut self, pages: u64) -> Result<PhysicalAddress, AllocationRejected>;

    /// Borrow `len` bytes at `base` for writing.
    ///
    /// # Safety
    /// The range must lie within memory previously returned by
    /// [`allocate_at`](Self::allocate_at) or
    /// [`allocate_anywhere`](Self::allocate_anywhere) and must not be
    /// borrowed elsewhere for the lifetime of the returned slice.
    unsafe fn memory_mut(&mut self, base: PhysicalAddress, len: usize) -> &mut [u8];
}

#[derive(Debug, Copy, Clone, Eq, PartialEq, thiserror::Error)]
#[error("the firmware rejected the page allocation")]
pub struct AllocationRejected;

/// Read access to the volume the loader was started from.
pub trait BootVolume {
    /// Read a whole file. `path` is relative to the volume root.
    ///
    /// # Errors
    /// [`VolumeError`] if the file cannot be opened or fully read.
    fn read_file(&mut self, path: &str) -> Result<Vec<u8>, VolumeError>;
}

#[derive(Debug, Clone, Eq, PartialEq, thiserror::Error)]
pub enum VolumeError {
    #[error("the path cannot be represented on the volume")]
    InvalidPath,
    #[error("the file does not exist")]
    NotFound,
    #[error("the path does not name a regular file")]
    NotAFile,
    #[error("reading the file failed")]
    Read,
    #[error("short read: got {read} of {expected} bytes")]
    ShortRead { read: usize, expected: usize },
}

/// Firmware configuration tables the kernel may want.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum FirmwareTable {
    /// ACPI 2.0+ RSDP.
    Acpi2,
    /// ACPI 1.0 RSDP.
    Acpi1,
    /// SMBIOS 32-bit entry point.
    Smbios,
    /// SMBIOS 3.x 64-bit entry point.
    Smbios3,
}

/// Everything else the loader reads from the platform.
pub trait Platform {
    /// The current graphics mode, `None` when there is no display.
    fn graphics_mode(&mut self) -> Option<GraphicsMode>;

    /// Address of a configuration table, `None` if the firmware has none.
    fn config_table(&self, table: FirmwareTable) -> Option<PhysicalAddress>;

    /// Address of the runtime-services table.
    fn runtime_services_address(&self) -> u64;

    /// Busy-wait for `seconds`.
    fn stall(&mut self, seconds: u64);
}

/// The complete environment handle threaded through a boot attempt.
pub trait Environment:
    PageAllocator + EntropyHardware + BootVolume + Platform + MemoryMapSource
{
}

impl<T> Environment for T where
    T: PageAllocator + EntropyHardware + BootVolume + Platform + MemoryMapSource
{
}
