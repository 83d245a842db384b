//! # UEFI Memory Map and Exit
//!
//! `GetMemoryMap` and `ExitBootServices` called through the raw boot-services
//! table, so the caller owns the buffer and the map key. Nothing here
//! allocates.

use pxs_boot::teardown::{ExitRefused, MapKey, MemoryMapError, MemoryMapMeta};
use uefi::{Status, boot};

/// Write the current memory map into `buffer`.
pub fn get_memory_map(buffer: &mut [u8]) -> Result<MemoryMapMeta, MemoryMapError> {
    let Some(st) = uefi::table::system_table_raw() else {
        return Err(MemoryMapError::Firmware(Status::UNSUPPORTED.0));
    };

    let mut map_size = buffer.len();
    let mut key = 0usize;
    let mut descriptor_size = 0usize;
    let mut descriptor_version = 0u32;

    // SAFETY: The system table is valid while boot services are; every
    // out-pointer refers to a live local and the buffer is `map_size` bytes.
    let status = unsafe {
        let bs = st.as_ref().boot_services;
        ((*bs).get_memory_map)(
            &raw mut map_size,
            buffer.as_mut_ptr().cast(),
            &raw mut key,
            &raw mut descriptor_size,
            &raw mut descriptor_version,
        )
    };

    if status == Status::SUCCESS {
        Ok(MemoryMapMeta {
            map_size,
            key: MapKey(key),
            descriptor_size,
            descriptor_version,
        })
    } else if status == Status::BUFFER_TOO_SMALL {
        Err(MemoryMapError::BufferTooSmall { required: map_size })
    } else {
        Err(MemoryMapError::Firmware(status.0))
    }
}

/// Leave the boot services with the key of the most recent memory map.
pub fn exit_boot_services(key: MapKey) -> Result<(), ExitRefused> {
    let Some(st) = uefi::table::system_table_raw() else {
        return Err(ExitRefused(Status::UNSUPPORTED.0));
    };

    // SAFETY: See `get_memory_map`; after success no boot service may be used.
    let status = unsafe {
        let bs = st.as_ref().boot_services;
        ((*bs).exit_boot_services)(boot::image_handle().as_ptr(), key.0)
    };

    if status == Status::SUCCESS {
        Ok(())
    } else {
        Err(ExitRefused(status.0))
    }
}
