//! # Firmware Teardown
//!
//! Takes the final memory map and leaves the firmware's boot services. The
//! map key returned with a snapshot is only valid until the next allocation,
//! so nothing between the final snapshot and the exit call may allocate or
//! free memory. Logging stays legal because the environment is told to stop
//! using the firmware console before the first snapshot.
//!
//! A refused exit is retried exactly once with a fresh snapshot taken into
//! the buffer that is already there. A second refusal is fatal: the firmware
//! may already have shut parts of itself down and nothing further can be
//! trusted. Once the first exit call has been made the pool is off limits,
//! so the buffer is never grown, freed or reallocated after that point.

extern crate alloc;

use alloc::vec;
use alloc::vec::Vec;
use core::mem::ManuallyDrop;
use log::{debug, info, warn};
use pxs_protocol::MemoryMapInfo;

/// Size of the first snapshot buffer.
pub const MMAP_INITIAL_SIZE: usize = 4096;

/// Headroom added whenever the buffer has to grow; the growth allocation
/// itself may add descriptors.
pub const MMAP_GROWTH: usize = 4096;

/// Identifies one version of the firmware memory map.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct MapKey(pub usize);

/// Layout of a successfully retrieved memory map.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct MemoryMapMeta {
    /// Bytes of the buffer actually used.
    pub map_size: usize,
    pub key: MapKey,
    pub descriptor_size: usize,
    pub descriptor_version: u32,
}

#[derive(Debug, Copy, Clone, Eq, PartialEq, thiserror::Error)]
pub enum MemoryMapError {
    #[error("memory map needs {required} bytes")]
    BufferTooSmall { required: usize },
    #[error("firmware error {0:#x}")]
    Firmware(usize),
}

/// The firmware refused to exit; carries its status code.
#[derive(Debug, Copy, Clone, Eq, PartialEq, thiserror::Error)]
#[error("exit refused with status {0:#x}")]
pub struct ExitRefused(pub usize);

/// The two firmware calls teardown is made of.
pub trait MemoryMapSource {
    /// Called once before the first snapshot. From here on the firmware
    /// console must not be used.
    fn enter_teardown(&mut self);

    /// Write the current memory map into `buffer`.
    ///
    /// # Errors
    /// [`MemoryMapError::BufferTooSmall`] with the required size, or any
    /// other firmware failure.
    fn memory_map(&mut self, buffer: &mut [u8]) -> Result<MemoryMapMeta, MemoryMapError>;

    /// Leave the boot services, presenting `key` as proof of an up-to-date map.
    ///
    /// # Errors
    /// [`ExitRefused`] if the key is stale or the firmware declines.
    fn exit_boot_services(&mut self, key: MapKey) -> Result<(), ExitRefused>;
}

#[derive(Debug, Copy, Clone, Eq, PartialEq, thiserror::Error)]
pub enum TeardownError {
    #[error("failed to read the memory map: {0}")]
    MemoryMap(MemoryMapError),
    #[error("memory map buffer size overflowed")]
    BufferOverflow,
    #[error("firmware refused to exit twice: {0}")]
    ExitRefused(ExitRefused),
}

/// The memory map as it was when the firmware was left.
#[derive(Debug)]
pub struct MemoryMapSnapshot {
    buffer: Vec<u8>,
    meta: MemoryMapMeta,
    attempts: usize,
}

impl MemoryMapSnapshot {
    #[must_use]
    pub const fn meta(&self) -> &MemoryMapMeta {
        &self.meta
    }

    /// Calls to [`MemoryMapSource::memory_map`] it took, over all snapshots.
    #[must_use]
    pub const fn attempts(&self) -> usize {
        self.attempts
    }

    /// Capacity of the snapshot buffer.
    #[must_use]
    pub fn buffer_len(&self) -> usize {
        self.buffer.len()
    }

    /// Leak the buffer to the kernel and describe it in wire format.
    #[must_use]
    pub fn into_info(self) -> MemoryMapInfo {
        let meta = self.meta;
        let buffer = self.buffer.leak();
        MemoryMapInfo {
            ptr: buffer.as_ptr() as u64,
            size: meta.map_size as u64,
            map_key: meta.key.0 as u64,
            descriptor_size: meta.descriptor_size as u64,
            descriptor_version: meta.descriptor_version,
        }
    }
}

/// Read the memory map into `buffer`, growing it until it fits.
///
/// Returns the map layout and the number of calls it took.
///
/// # Errors
/// [`TeardownError::MemoryMap`] for any failure other than a too small
/// buffer.
pub fn snapshot<S>(
    source: &mut S,
    buffer: &mut Vec<u8>,
) -> Result<(MemoryMapMeta, usize), TeardownError>
where
    S: MemoryMapSource + ?Sized,
{
    let mut attempts = 0usize;
    loop {
        attempts += 1;
        match source.memory_map(buffer) {
            Ok(meta) => return Ok((meta, attempts)),
            Err(MemoryMapError::BufferTooSmall { required }) => {
                let size = required
                    .max(buffer.len())
                    .checked_add(MMAP_GROWTH)
                    .ok_or(TeardownError::BufferOverflow)?;
                debug!("Memory map needs {required} bytes, growing buffer to {size}");
                // Release first so the firmware sees the smaller footprint.
                drop(core::mem::take(buffer));
                *buffer = vec![0u8; size];
            }
            Err(e) => return Err(TeardownError::MemoryMap(e)),
        }
    }
}

/// Take the final memory map and exit the boot services.
///
/// The buffer is leaked on every error after the first exit call.
///
/// # Errors
/// Any [`TeardownError`]. A map that no longer fits the buffer on the retry
/// is reported as [`MemoryMapError::BufferTooSmall`]. Once this returns an
/// error, the state of the firmware is unknown.
pub fn exit_boot_services<S>(source: &mut S) -> Result<MemoryMapSnapshot, TeardownError>
where
    S: MemoryMapSource + ?Sized,
{
    info!("Exiting boot services ...");
    source.enter_teardown();

    let mut buffer = vec![0u8; MMAP_INITIAL_SIZE];
    let (mut meta, mut attempts) = snapshot(source, &mut buffer)?;

    let mut buffer = ManuallyDrop::new(buffer);
    if let Err(refused) = source.exit_boot_services(meta.key) {
        warn!("Firmware refused to exit ({refused}), retrying once with a fresh memory map");
        attempts += 1;
        meta = source
            .memory_map(buffer.as_mut_slice())
            .map_err(TeardownError::MemoryMap)?;
        source
            .exit_boot_services(meta.key)
            .map_err(TeardownError::ExitRefused)?;
    }

    info!("Boot services exited, we're now flying by instruments.");
    Ok(MemoryMapSnapshot {
        buffer: ManuallyDrop::into_inner(buffer),
        meta,
        attempts,
    })
}
