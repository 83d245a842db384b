//! # Boot Information
//!
//! Collects what the kernel needs to know about the machine into a
//! [`BootInfo`] record. The record and everything it points to (command line,
//! initrd pages, memory map) is leaked: the loader never returns, and the
//! memory belongs to the kernel from the jump on.

extern crate alloc;

use crate::addresses::{PhysicalAddress, Size4K, pages_for};
use crate::elf::loader::LoadedKernel;
use crate::entropy::EntropySeed;
use crate::firmware::{BootVolume, FirmwareTable, PageAllocator, Platform};
use alloc::boxed::Box;
use alloc::ffi::CString;
use alloc::vec::Vec;
use log::{debug, info, warn};
use pxs_protocol::{BootFlags, BootInfo, FramebufferInfo};

/// Channel order of a linear framebuffer.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum PixelLayout {
    /// 32 bits per pixel, red in the lowest byte.
    Rgb,
    /// 32 bits per pixel, blue in the lowest byte.
    Bgr,
    /// Bitmask or blit-only modes; no channel layout is reported.
    Other,
}

/// The active graphics mode as the firmware reports it.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct GraphicsMode {
    pub framebuffer_base: PhysicalAddress,
    pub framebuffer_size: u64,
    pub width: u32,
    pub height: u32,
    /// Pixels per scan line.
    pub stride: u32,
    pub pixel_layout: PixelLayout,
}

/// Describe `mode` in wire format. `None` yields an all-zero record.
#[must_use]
pub const fn framebuffer_info(mode: Option<&GraphicsMode>) -> FramebufferInfo {
    let Some(mode) = mode else {
        return FramebufferInfo::headless();
    };

    let mut fb = FramebufferInfo::headless();
    fb.base_address = mode.framebuffer_base.as_u64();
    fb.size = mode.framebuffer_size;
    fb.width = mode.width;
    fb.height = mode.height;
    fb.pixels_per_scan_line = mode.stride;

    let (red, green, blue) = match mode.pixel_layout {
        PixelLayout::Rgb => (0, 8, 16),
        PixelLayout::Bgr => (16, 8, 0),
        PixelLayout::Other => return fb,
    };
    fb.red_mask_size = 8;
    fb.red_field_position = red;
    fb.green_mask_size = 8;
    fb.green_field_position = green;
    fb.blue_mask_size = 8;
    fb.blue_field_position = blue;
    fb.reserved_mask_size = 8;
    fb.reserved_field_position = 24;
    fb
}

/// Firmware tables handed through to the kernel.
#[derive(Debug, Copy, Clone, Default, Eq, PartialEq)]
pub struct FirmwareTables {
    pub rsdp: Option<PhysicalAddress>,
    pub smbios: Option<PhysicalAddress>,
    pub runtime_services: u64,
}

impl FirmwareTables {
    /// Look up the ACPI root pointer (2.0 preferred) and the SMBIOS entry
    /// point (32-bit preferred).
    pub fn lookup<P>(platform: &P) -> Self
    where
        P: Platform + ?Sized,
    {
        let rsdp = platform
            .config_table(FirmwareTable::Acpi2)
            .or_else(|| platform.config_table(FirmwareTable::Acpi1));
        let smbios = platform
            .config_table(FirmwareTable::Smbios)
            .or_else(|| platform.config_table(FirmwareTable::Smbios3));

        match rsdp {
            Some(address) => info!("RSDP at {address}"),
            None => warn!("No ACPI RSDP found"),
        }
        if let Some(address) = smbios {
            debug!("SMBIOS entry point at {address}");
        }

        Self {
            rsdp,
            smbios,
            runtime_services: platform.runtime_services_address(),
        }
    }
}

/// The initial RAM disk after it was copied into its own pages.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct Initrd {
    pub address: PhysicalAddress,
    pub size: u64,
}

/// Read the initrd at `path` into freshly allocated pages.
///
/// Every failure is reported and degrades to "no initrd".
pub fn load_initrd<E>(env: &mut E, path: &str) -> Option<Initrd>
where
    E: BootVolume + PageAllocator + ?Sized,
{
    let bytes = match env.read_file(path) {
        Ok(bytes) => bytes,
        Err(e) => {
            warn!("Failed to load initrd '{path}': {e}");
            return None;
        }
    };
    if bytes.is_empty() {
        warn!("Initrd '{path}' is empty, ignoring it");
        return None;
    }

    let size = bytes.len() as u64;
    let Ok(address) = env.allocate_anywhere(pages_for::<Size4K>(size)) else {
        warn!("No memory for the {size} byte initrd, ignoring it");
        return None;
    };

    // SAFETY: The allocator just handed out at least `bytes.len()` bytes at
    // `address`.
    let target = unsafe { env.memory_mut(address, bytes.len()) };
    target.copy_from_slice(&bytes);

    info!("Initrd loaded at {address} ({size} bytes)");
    Some(Initrd { address, size })
}

/// Leak a NUL-terminated copy of `cmdline` and return its address.
///
/// An empty command line is passed as a null pointer. Anything after an
/// interior NUL is dropped.
#[must_use]
pub fn leak_command_line(cmdline: &str) -> u64 {
    let bytes = cmdline.as_bytes();
    let end = bytes.iter().position(|&b| b == 0).unwrap_or(bytes.len());
    if end == 0 {
        return 0;
    }

    let owned: Vec<u8> = bytes[..end].to_vec();
    match CString::new(owned) {
        Ok(c) => c.into_raw() as u64,
        Err(_) => 0,
    }
}

/// Everything the record is assembled from.
#[derive(Debug, Copy, Clone)]
pub struct BootInfoParts<'a> {
    pub kernel: &'a LoadedKernel,
    pub initrd: Option<Initrd>,
    pub graphics: Option<GraphicsMode>,
    pub tables: FirmwareTables,
    /// Address of the leaked command line, or 0.
    pub command_line: u64,
    pub canary: EntropySeed,
}

/// Assemble the record. The memory map is filled in after teardown.
#[must_use]
pub fn build_boot_info(parts: &BootInfoParts<'_>) -> BootInfo {
    let framebuffer = framebuffer_info(parts.graphics.as_ref());

    let mut info = BootInfo::new();
    info.flags = BootFlags::new()
        .with_kaslr(parts.kernel.plan.randomized)
        .with_initrd(parts.initrd.is_some())
        .with_framebuffer(framebuffer.has_channel_layout())
        .with_null_page_hazard(parts.kernel.links_at_null)
        .with_canary_from_hardware(parts.canary.provenance.is_hardware());
    info.framebuffer = framebuffer;
    info.rsdp = parts.tables.rsdp.map_or(0, PhysicalAddress::as_u64);
    info.smbios = parts.tables.smbios.map_or(0, PhysicalAddress::as_u64);
    info.runtime_services = parts.tables.runtime_services;
    info.kernel_physical_base = parts.kernel.plan.load_base.as_u64();
    info.kernel_file_size = parts.kernel.file_size;
    if let Some(initrd) = parts.initrd {
        info.initrd_address = initrd.address.as_u64();
        info.initrd_size = initrd.size;
    }
    info.command_line = parts.command_line;
    info.security_canary = parts.canary.value;
    info
}

/// Move the record to the heap and leak it to the kernel.
#[must_use]
pub fn leak_boot_info(info: BootInfo) -> &'static mut BootInfo {
    Box::leak(Box::new(info))
}
