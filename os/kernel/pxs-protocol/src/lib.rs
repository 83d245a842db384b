//! # PXS Boot Protocol
//!
//! The stable contract between the PXS loader and the kernel it starts.
//!
//! The loader builds exactly one [`BootInfo`] record, leaks it (together with
//! every buffer it points to) and passes its physical address as the single
//! argument of the kernel entry point. From that moment on the kernel owns the
//! record and all referenced memory; the loader never touches it again.
//!
//! ## Layout
//!
//! All structures are `#[repr(C)]`, little-endian and naturally aligned. Every
//! width is fixed, pointers are carried as `u64`:
//!
//! ```text
//! off  field
//!   0  magic                  u32   "PXS!" (0x2153_5850)
//!   4  version                u32   PROTOCOL_VERSION
//!   8  flags                  u32   BootFlags
//!  16  framebuffer            FramebufferInfo (40 bytes)
//!  56  memory_map             MemoryMapInfo   (40 bytes)
//!  96  rsdp                   u64   0 if absent
//! 104  smbios                 u64   0 if absent
//! 112  runtime_services       u64
//! 120  kernel_physical_base   u64
//! 128  kernel_file_size       u64
//! 136  initrd_address         u64   0 if absent
//! 144  initrd_size            u64   0 if absent
//! 152  command_line           u64   NUL-terminated bytes, 0 if absent
//! 160  security_canary        u64
//! ```
//!
//! ## Entry Convention
//!
//! ```rust
//! # use pxs_protocol::BootInfo;
//! pub type KernelEntryFn = extern "sysv64" fn(*const BootInfo);
//! ```
//!
//! The kernel is expected never to return.
//!
//! ## Consumers
//!
//! A kernel must reject records it does not understand:
//!
//! ```rust
//! # use pxs_protocol::{BootInfo, ProtocolError};
//! fn kernel_main(info: &BootInfo) -> Result<(), ProtocolError> {
//!     info.validate()?;
//!     // ...
//!     Ok(())
//! }
//! # let info = BootInfo::new();
//! # assert!(kernel_main(&info).is_ok());
//! ```

#![cfg_attr(not(any(test, doctest)), no_std)]
#![deny(unsafe_code)]

use bitfield_struct::bitfield;
use core::mem::{offset_of, size_of};

/// `"PXS!"` read as a little-endian `u32`.
pub const PXS_MAGIC: u32 = 0x2153_5850;

/// Revision of the [`BootInfo`] layout.
///
/// Version 1 carried the memory map size, key and descriptor size as native
/// `unsigned int`s in some builds; version 2 fixes every field to 64 bits.
pub const PROTOCOL_VERSION: u32 = 2;

/// Kernel function pointer.
///
/// # ABI
/// The kernel is built for the System V calling convention; the loader is a
/// PE/COFF (`win64`) application and therefore spells the ABI out.
pub type KernelEntryFn = extern "sysv64" fn(*const BootInfo);

/// Information the kernel needs right after the firmware has been exited.
#[repr(C)]
#[derive(Debug, Clone)]
pub struct BootInfo {
    /// Always [`PXS_MAGIC`].
    pub magic: u32,

    /// Always [`PROTOCOL_VERSION`].
    pub version: u32,

    /// Summary of what the loader did, see [`BootFlags`].
    pub flags: BootFlags,

    /// Linear framebuffer, all zero when the machine is headless.
    pub framebuffer: FramebufferInfo,

    /// The final firmware memory map.
    pub memory_map: MemoryMapInfo,

    /// ACPI RSDP (2.0 preferred over 1.0), or 0.
    pub rsdp: u64,

    /// SMBIOS entry point structure, or 0.
    pub smbios: u64,

    /// Address of the firmware runtime-services table.
    ///
    /// Only meaningful if the kernel keeps the firmware's runtime regions
    /// mapped as described by the memory map; the loader does not call
    /// `SetVirtualAddressMap`.
    pub runtime_services: u64,

    /// Physical address the kernel image was placed at (after KASLR).
    pub kernel_physical_base: u64,

    /// Size of the kernel ELF file in bytes.
    pub kernel_file_size: u64,

    /// Physical address of the initial ramdisk, or 0.
    pub initrd_address: u64,

    /// Size of the initial ramdisk in bytes, or 0.
    pub initrd_size: u64,

    /// Pointer to a NUL-terminated command line, or 0.
    pub command_line: u64,

    /// Random value for the kernel's stack protector and pointer guards.
    pub security_canary: u64,
}

impl BootInfo {
    /// An empty record with a valid header and every other field zeroed.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            magic: PXS_MAGIC,
            version: PROTOCOL_VERSION,
            flags: BootFlags::new(),
            framebuffer: FramebufferInfo::headless(),
            memory_map: MemoryMapInfo::empty(),
            rsdp: 0,
            smbios: 0,
            runtime_services: 0,
            kernel_physical_base: 0,
            kernel_file_size: 0,
            initrd_address: 0,
            initrd_size: 0,
            command_line: 0,
            security_canary: 0,
        }
    }

    /// Checks the header fields.
    ///
    /// # Errors
    /// Returns [`ProtocolError`] if the magic or version do not match this
    /// crate's definitions.
    pub const fn validate(&self) -> Result<(), ProtocolError> {
        if self.magic != PXS_MAGIC {
            return Err(ProtocolError::BadMagic(self.magic));
        }
        if self.version != PROTOCOL_VERSION {
            return Err(ProtocolError::UnsupportedVersion(self.version));
        }
        Ok(())
    }
}

impl Default for BootInfo {
    fn default() -> Self {
        Self::new()
    }
}

/// Header mismatch reported by [`BootInfo::validate`].
#[derive(Debug, Copy, Clone, Eq, PartialEq, thiserror::Error)]
pub enum ProtocolError {
    #[error("boot info magic {0:#010x} does not match")]
    BadMagic(u32),
    #[error("boot info version {0} is not supported")]
    UnsupportedVersion(u32),
}

/// Bit flags in [`BootInfo::flags`].
///
/// Layout (LSB→MSB):
/// - bit 0: the kernel base was randomized
/// - bit 1: an initrd was loaded
/// - bit 2: the framebuffer uses one of the described 8:8:8:8 layouts
/// - bit 3: the kernel is linked at physical address 0
/// - bit 4: the canary came from a hardware source
#[bitfield(u32)]
#[derive(PartialEq, Eq)]
pub struct BootFlags {
    pub kaslr: bool,
    pub initrd: bool,
    pub framebuffer: bool,
    pub null_page_hazard: bool,
    pub canary_from_hardware: bool,
    #[bits(27)]
    __: u32,
}

#[repr(C)]
#[derive(Debug, Clone, Default, Eq, PartialEq)]
pub struct FramebufferInfo {
    /// Linear framebuffer base address (CPU physical address).
    pub base_address: u64,

    /// Total framebuffer size in **bytes**.
    pub size: u64,

    /// Visible width in **pixels**.
    pub width: u32,

    /// Visible height in **pixels**.
    pub height: u32,

    /// Pixels per scanline. May be >= width due to padding.
    pub pixels_per_scan_line: u32,

    pub red_mask_size: u8,
    pub red_field_position: u8,
    pub green_mask_size: u8,
    pub green_field_position: u8,
    pub blue_mask_size: u8,
    pub blue_field_position: u8,
    pub reserved_mask_size: u8,
    pub reserved_field_position: u8,
}

impl FramebufferInfo {
    /// No display attached.
    #[must_use]
    pub const fn headless() -> Self {
        Self {
            base_address: 0,
            size: 0,
            width: 0,
            height: 0,
            pixels_per_scan_line: 0,
            red_mask_size: 0,
            red_field_position: 0,
            green_mask_size: 0,
            green_field_position: 0,
            blue_mask_size: 0,
            blue_field_position: 0,
            reserved_mask_size: 0,
            reserved_field_position: 0,
        }
    }

    /// Whether the channel layout fields are populated.
    #[must_use]
    pub const fn has_channel_layout(&self) -> bool {
        self.red_mask_size != 0 && self.green_mask_size != 0 && self.blue_mask_size != 0
    }
}

#[repr(C)]
#[derive(Debug, Clone, Default, Eq, PartialEq)]
pub struct MemoryMapInfo {
    /// Pointer to the raw firmware memory map (array of `EFI_MEMORY_DESCRIPTOR`).
    pub ptr: u64,

    /// Length of the memory map in **bytes**.
    pub size: u64,

    /// The key that was accepted by `ExitBootServices`.
    pub map_key: u64,

    /// Stride between descriptors in bytes. Not necessarily `size_of::<EFI_MEMORY_DESCRIPTOR>()`.
    pub descriptor_size: u64,

    /// Descriptor format version reported by the firmware.
    pub descriptor_version: u32,
}

impl MemoryMapInfo {
    #[must_use]
    pub const fn empty() -> Self {
        Self {
            ptr: 0,
            size: 0,
            map_key: 0,
            descriptor_size: 0,
            descriptor_version: 0,
        }
    }

    /// Number of descriptors in the map.
    #[must_use]
    pub const fn descriptor_count(&self) -> u64 {
        if self.descriptor_size == 0 {
            0
        } else {
            self.size / self.descriptor_size
        }
    }
}

const _: () = {
    assert!(size_of::<BootFlags>() == 4);
    assert!(size_of::<FramebufferInfo>() == 40);
    assert!(size_of::<MemoryMapInfo>() == 40);
    assert!(offset_of!(BootInfo, magic) == 0);
    assert!(offset_of!(BootInfo, version) == 4);
    assert!(offset_of!(BootInfo, flags) == 8);
    assert!(offset_of!(BootInfo, framebuffer) == 16);
    assert!(offset_of!(BootInfo, memory_map) == 56);
    assert!(offset_of!(BootInfo, rsdp) == 96);
    assert!(offset_of!(BootInfo, smbios) == 104);
    assert!(offset_of!(BootInfo, runtime_services) == 112);
    assert!(offset_of!(BootInfo, kernel_physical_base) == 120);
    assert!(offset_of!(BootInfo, kernel_file_size) == 128);
    assert!(offset_of!(BootInfo, initrd_address) == 136);
    assert!(offset_of!(BootInfo, initrd_size) == 144);
    assert!(offset_of!(BootInfo, command_line) == 152);
    assert!(offset_of!(BootInfo, security_canary) == 160);
    assert!(size_of::<BootInfo>() == 168);
};
