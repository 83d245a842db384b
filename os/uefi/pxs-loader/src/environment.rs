//! # The Environment Handle
//!
//! Binds the firmware-independent boot sequence to UEFI boot services.

extern crate alloc;

use alloc::vec::Vec;
use pxs_boot::BootError;
use pxs_boot::addresses::PhysicalAddress;
use pxs_boot::boot_info::GraphicsMode;
use pxs_boot::firmware::{BootVolume, FirmwareTable, Platform, VolumeError};
use pxs_boot::teardown::{ExitRefused, MapKey, MemoryMapError, MemoryMapMeta, MemoryMapSource};
use uefi::boot;

use crate::logger::UefiLogger;
use crate::{config_tables, file_system, framebuffer, memory, uefi_mmap};

const MICROSECONDS_PER_SECOND: usize = 1_000_000;

pub struct UefiEnvironment {
    logger: &'static UefiLogger,
}

impl UefiEnvironment {
    /// Check that the boot volume is reachable and bind the environment.
    ///
    /// # Errors
    /// [`BootError::ProtocolLookup`] if the loader was not started from a
    /// file system.
    pub fn new(logger: &'static UefiLogger) -> Result<Self, BootError> {
        if !file_system::boot_volume_present() {
            return Err(BootError::ProtocolLookup {
                protocol: "SimpleFileSystem",
            });
        }
        Ok(Self { logger })
    }
}

impl BootVolume for UefiEnvironment {
    fn read_file(&mut self, path: &str) -> Result<Vec<u8>, VolumeError> {
        file_system::load_file(path)
    }
}

impl Platform for UefiEnvironment {
    fn graphics_mode(&mut self) -> Option<GraphicsMode> {
        framebuffer::current_graphics_mode()
    }

    fn config_table(&self, table: FirmwareTable) -> Option<PhysicalAddress> {
        config_tables::find_table(table)
    }

    fn runtime_services_address(&self) -> u64 {
        config_tables::runtime_services_address()
    }

    fn stall(&mut self, seconds: u64) {
        for _ in 0..seconds {
            boot::stall(MICROSECONDS_PER_SECOND);
        }
    }
}

impl MemoryMapSource for UefiEnvironment {
    fn enter_teardown(&mut self) {
        self.logger.exit_boot_services();
    }

    fn memory_map(&mut self, buffer: &mut [u8]) -> Result<MemoryMapMeta, MemoryMapError> {
        uefi_mmap::get_memory_map(buffer)
    }

    fn exit_boot_services(&mut self, key: MapKey) -> Result<(), ExitRefused> {
        uefi_mmap::exit_boot_services(key)?;
        memory::retire_allocator();
        Ok(())
    }
}
