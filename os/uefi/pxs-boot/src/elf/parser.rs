//! # ELF Header Parsing
//!
//! Validates a kernel image and collects its `PT_LOAD` segments. The kernel
//! is expected to be a statically linked, non-PIE executable: the physical
//! addresses in its program headers are the load targets, nothing gets
//! relocated.

extern crate alloc;

use crate::addresses::{PhysicalAddress, Size4K, VirtualAddress, pages_for};
use crate::elf::{ELFCLASS64, PT_LOAD};
use alloc::vec::Vec;
use core::fmt;
use core::mem::size_of;
use core::ptr::read_unaligned;
use log::warn;

// Minimal ELF64 definitions
#[repr(C)]
#[derive(Clone, Copy)]
#[allow(clippy::struct_field_names)]
struct Elf64Ehdr {
    e_ident: [u8; 16],
    e_type: u16,
    e_machine: u16,
    e_version: u32,
    e_entry: u64,
    e_phoff: u64,
    e_shoff: u64,
    e_flags: u32,
    e_ehsize: u16,
    e_phentsize: u16,
    e_phnum: u16,
    e_shentsize: u16,
    e_shnum: u16,
    e_shstrndx: u16,
}

#[repr(C)]
#[derive(Clone, Copy)]
#[allow(clippy::struct_field_names)]
struct Elf64Phdr {
    p_type: u32,
    p_flags: SegmentFlags,
    p_offset: u64,
    p_vaddr: u64,
    p_paddr: u64,
    p_filesz: u64,
    p_memsz: u64,
    p_align: u64,
}

#[derive(Debug, Copy, Clone, Eq, PartialEq, thiserror::Error)]
pub enum ElfError {
    #[error("file is too short to hold an ELF header")]
    Truncated,
    #[error("bad ELF magic")]
    BadMagic,
    #[error("not a 64-bit ELF file (class {0})")]
    NotElf64(u8),
    #[error("program header entries are {0} bytes, too small for ELF64")]
    ProgramHeaderSize(u16),
    #[error("program header table lies outside the file")]
    ProgramHeadersOutOfBounds,
    #[error("no loadable segments")]
    NoLoadableSegments,
    #[error("segment {0} has a file size larger than its memory size")]
    SegmentSizeMismatch(usize),
    #[error("segment {0} references bytes beyond the end of the file")]
    SegmentOutOfFile(usize),
    #[error("segment {0} wraps around the address space")]
    AddressOverflow(usize),
    #[error("segments {0} and {1} overlap in physical memory")]
    OverlappingSegments(usize, usize),
}

/// One `PT_LOAD` program header.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct SegmentDescriptor {
    /// Byte offset of the segment's contents in the file.
    pub source_offset: u64,
    /// Number of bytes to copy from the file.
    pub source_size: u64,
    /// Physical load address (`p_paddr`).
    pub destination: PhysicalAddress,
    /// Size in memory; the tail beyond `source_size` is zero-filled.
    pub memory_size: u64,
    pub flags: SegmentFlags,
}

impl SegmentDescriptor {
    /// Exclusive physical end of the segment.
    #[must_use]
    pub const fn destination_end(&self) -> PhysicalAddress {
        PhysicalAddress::new(self.destination.as_u64() + self.memory_size)
    }
}

/// What the loader knows about a validated kernel image.
#[derive(Debug, Clone)]
pub struct ImageDescriptor {
    entry: VirtualAddress,
    segments: Vec<SegmentDescriptor>,
    min_physical_address: PhysicalAddress,
    max_physical_address: PhysicalAddress,
}

impl ImageDescriptor {
    const EI_MAGIC_BYTES: [u8; 4] = [0x7F, b'E', b'L', b'F'];
    const EI_CLASS: usize = 4;

    /// Parse a 64-bit ELF image and collect its `PT_LOAD` segments.
    ///
    /// # Errors
    /// Returns an [`ElfError`] for any validation or bounds failure.
    pub fn parse(bytes: &[u8]) -> Result<Self, ElfError> {
        if bytes.len() < size_of::<Elf64Ehdr>() {
            return Err(ElfError::Truncated);
        }

        // SAFETY: We just checked bounds; using read_unaligned to avoid alignment assumptions.
        let ehdr = unsafe { read_unaligned(bytes.as_ptr().cast::<Elf64Ehdr>()) };

        if ehdr.e_ident[0..4] != Self::EI_MAGIC_BYTES {
            return Err(ElfError::BadMagic);
        }
        if ehdr.e_ident[Self::EI_CLASS] != ELFCLASS64 {
            return Err(ElfError::NotElf64(ehdr.e_ident[Self::EI_CLASS]));
        }

        let phnum = usize::from(ehdr.e_phnum);
        if phnum == 0 {
            return Err(ElfError::NoLoadableSegments);
        }

        let phentsize = usize::from(ehdr.e_phentsize);
        if phentsize < size_of::<Elf64Phdr>() {
            return Err(ElfError::ProgramHeaderSize(ehdr.e_phentsize));
        }

        // Program header table bounds
        let phoff = usize::try_from(ehdr.e_phoff).map_err(|_| ElfError::ProgramHeadersOutOfBounds)?;
        let end = phentsize
            .checked_mul(phnum)
            .and_then(|size| phoff.checked_add(size))
            .ok_or(ElfError::ProgramHeadersOutOfBounds)?;
        if end > bytes.len() {
            return Err(ElfError::ProgramHeadersOutOfBounds);
        }

        let mut segments = Vec::new();
        let mut min_phys = u64::MAX;
        let mut max_phys = 0u64;

        for index in 0..phnum {
            let off = phoff + index * phentsize;
            // SAFETY: off + sizeof(Phdr) is within bytes by earlier bound check.
            let ph = unsafe { read_unaligned(bytes.as_ptr().add(off).cast::<Elf64Phdr>()) };
            if ph.p_type != PT_LOAD {
                continue;
            }
            if ph.p_filesz > ph.p_memsz {
                return Err(ElfError::SegmentSizeMismatch(index));
            }
            let file_end = ph
                .p_offset
                .checked_add(ph.p_filesz)
                .ok_or(ElfError::SegmentOutOfFile(index))?;
            if file_end > bytes.len() as u64 {
                return Err(ElfError::SegmentOutOfFile(index));
            }
            let destination = PhysicalAddress::new(ph.p_paddr);
            let phys_end = destination
                .checked_add(ph.p_memsz)
                .ok_or(ElfError::AddressOverflow(index))?;

            min_phys = min_phys.min(destination.as_u64());
            max_phys = max_phys.max(phys_end.as_u64());

            segments.push((
                index,
                SegmentDescriptor {
                    source_offset: ph.p_offset,
                    source_size: ph.p_filesz,
                    destination,
                    memory_size: ph.p_memsz,
                    flags: ph.p_flags,
                },
            ));
        }

        if segments.is_empty() {
            return Err(ElfError::NoLoadableSegments);
        }

        // Empty segments occupy no memory and cannot overlap anything.
        for (i, (first_index, first)) in segments.iter().enumerate() {
            for (second_index, second) in &segments[i + 1..] {
                let disjoint = first.memory_size == 0
                    || second.memory_size == 0
                    || first.destination_end() <= second.destination
                    || second.destination_end() <= first.destination;
                if !disjoint {
                    return Err(ElfError::OverlappingSegments(*first_index, *second_index));
                }
            }
        }

        let image = Self {
            entry: VirtualAddress::new(ehdr.e_entry),
            segments: segments.into_iter().map(|(_, seg)| seg).collect(),
            min_physical_address: PhysicalAddress::new(min_phys),
            max_physical_address: PhysicalAddress::new(max_phys),
        };

        if image.links_at_null() {
            warn!("Kernel linked at 0x0. This is a null pointer trap hazard.");
            warn!("Consider linking at 1 MiB or higher.");
        }

        Ok(image)
    }

    /// Entry point as linked.
    #[must_use]
    pub const fn entry(&self) -> VirtualAddress {
        self.entry
    }

    /// Loadable segments in program-header order.
    #[must_use]
    pub fn segments(&self) -> &[SegmentDescriptor] {
        &self.segments
    }

    /// Lowest physical load address of any segment.
    #[must_use]
    pub const fn min_physical_address(&self) -> PhysicalAddress {
        self.min_physical_address
    }

    /// Exclusive upper bound of all segments in physical memory.
    #[must_use]
    pub const fn max_physical_address(&self) -> PhysicalAddress {
        self.max_physical_address
    }

    /// Page floor of the lowest load address; the natural load base.
    #[must_use]
    pub const fn base_offset(&self) -> PhysicalAddress {
        self.min_physical_address.align_down::<Size4K>()
    }

    /// Number of 4 KiB pages spanned from [`base_offset`](Self::base_offset)
    /// to the end of the last segment.
    #[must_use]
    pub const fn total_pages(&self) -> u64 {
        pages_for::<Size4K>(self.max_physical_address.as_u64() - self.base_offset().as_u64())
    }

    /// Whether the first page of the image sits at physical address 0.
    #[must_use]
    pub const fn links_at_null(&self) -> bool {
        self.min_physical_address.is_null()
    }
}

/// Bitfield wrapper for `Elf64_Phdr.p_flags` (32-bit)
///
/// Layout (LSB→MSB):
/// - bit 0: execute
/// - bit 1: write
/// - bit 2: read
/// - bits 3..31: reserved
#[bitfield_struct::bitfield(u32)]
#[derive(PartialEq, Eq)]
pub struct SegmentFlags {
    pub execute: bool,
    pub write: bool,
    pub read: bool,
    #[bits(29)]
    __: u32,
}

impl fmt::Display for SegmentFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let flag = |set: bool, c: char| if set { c } else { '-' };
        write!(
            f,
            "{}{}{}",
            flag(self.read(), 'r'),
            flag(self.write(), 'w'),
            flag(self.execute(), 'x')
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::vec;

    fn header(phnum: u16) -> Vec<u8> {
        let mut b = vec![0u8; 64];
        b[0..4].copy_from_slice(&[0x7F, b'E', b'L', b'F']);
        b[4] = 2; // ELFCLASS64
        b[5] = 1; // little-endian
        b[6] = 1;
        b[24..32].copy_from_slice(&0x0010_1000u64.to_le_bytes()); // e_entry
        b[32..40].copy_from_slice(&64u64.to_le_bytes()); // e_phoff
        b[54..56].copy_from_slice(&56u16.to_le_bytes()); // e_phentsize
        b[56..58].copy_from_slice(&phnum.to_le_bytes()); // e_phnum
        b
    }

    fn phdr(p_type: u32, offset: u64, paddr: u64, filesz: u64, memsz: u64) -> [u8; 56] {
        let mut p = [0u8; 56];
        p[0..4].copy_from_slice(&p_type.to_le_bytes());
        p[4..8].copy_from_slice(&5u32.to_le_bytes()); // R+X
        p[8..16].copy_from_slice(&offset.to_le_bytes());
        p[16..24].copy_from_slice(&paddr.to_le_bytes());
        p[24..32].copy_from_slice(&paddr.to_le_bytes());
        p[32..40].copy_from_slice(&filesz.to_le_bytes());
        p[40..48].copy_from_slice(&memsz.to_le_bytes());
        p[48..56].copy_from_slice(&0x1000u64.to_le_bytes());
        p
    }

    fn image(phdrs: &[[u8; 56]], payload: usize) -> Vec<u8> {
        let mut b = header(u16::try_from(phdrs.len()).unwrap());
        for p in phdrs {
            b.extend_from_slice(p);
        }
        b.resize(b.len() + payload, 0xCC);
        b
    }

    #[test]
    fn parses_loadable_segments_in_order() {
        let bytes = image(
            &[
                phdr(PT_LOAD, 0x100, 0x0010_0000, 0x80, 0x80),
                phdr(6, 0, 0, 0, 0), // PT_PHDR is ignored
                phdr(PT_LOAD, 0x180, 0x0010_2000, 0x10, 0x3000),
            ],
            0x200,
        );
        let image = ImageDescriptor::parse(&bytes).unwrap();
        assert_eq!(image.entry().as_u64(), 0x0010_1000);
        assert_eq!(image.segments().len(), 2);
        assert_eq!(image.segments()[1].destination.as_u64(), 0x0010_2000);
        assert_eq!(image.min_physical_address().as_u64(), 0x0010_0000);
        assert_eq!(image.max_physical_address().as_u64(), 0x0010_5000);
        assert_eq!(image.base_offset().as_u64(), 0x0010_0000);
        assert_eq!(image.total_pages(), 5);
        assert!(image.segments()[0].flags.execute());
        assert!(image.segments()[0].flags.read());
        assert!(!image.segments()[0].flags.write());
        assert_eq!(format!("{}", image.segments()[0].flags), "r-x");
        assert!(!image.links_at_null());
    }

    #[test]
    fn unaligned_minimum_is_floored() {
        let bytes = image(&[phdr(PT_LOAD, 0x100, 0x0010_0123, 0x10, 0x1000)], 0x100);
        let image = ImageDescriptor::parse(&bytes).unwrap();
        assert_eq!(image.base_offset().as_u64(), 0x0010_0000);
        // 0x123 + 0x1000 bytes need two pages
        assert_eq!(image.total_pages(), 2);
    }

    #[test]
    fn rejects_bad_magic() {
        let mut bytes = image(&[phdr(PT_LOAD, 0x100, 0x0010_0000, 0x10, 0x10)], 0x100);
        bytes[1] = b'X';
        assert_eq!(ImageDescriptor::parse(&bytes).unwrap_err(), ElfError::BadMagic);
    }

    #[test]
    fn rejects_32_bit_class() {
        let mut bytes = image(&[phdr(PT_LOAD, 0x100, 0x0010_0000, 0x10, 0x10)], 0x100);
        bytes[4] = 1;
        assert_eq!(ImageDescriptor::parse(&bytes).unwrap_err(), ElfError::NotElf64(1));
    }

    #[test]
    fn rejects_truncated_header() {
        assert_eq!(
            ImageDescriptor::parse(&[0x7F, b'E', b'L', b'F']).unwrap_err(),
            ElfError::Truncated
        );
    }

    #[test]
    fn rejects_images_without_load_segments() {
        let bytes = image(&[phdr(6, 0, 0, 0, 0)], 0);
        assert_eq!(
            ImageDescriptor::parse(&bytes).unwrap_err(),
            ElfError::NoLoadableSegments
        );
        let bytes = header(0);
        assert_eq!(
            ImageDescriptor::parse(&bytes).unwrap_err(),
            ElfError::NoLoadableSegments
        );
    }

    #[test]
    fn rejects_program_headers_past_end() {
        let mut bytes = header(4);
        bytes.extend_from_slice(&phdr(PT_LOAD, 0, 0x0010_0000, 0, 0x10));
        assert_eq!(
            ImageDescriptor::parse(&bytes).unwrap_err(),
            ElfError::ProgramHeadersOutOfBounds
        );
    }

    #[test]
    fn rejects_segment_bytes_past_end() {
        let bytes = image(&[phdr(PT_LOAD, 0x100, 0x0010_0000, 0x1000, 0x1000)], 0x10);
        assert_eq!(
            ImageDescriptor::parse(&bytes).unwrap_err(),
            ElfError::SegmentOutOfFile(0)
        );
    }

    #[test]
    fn rejects_filesz_larger_than_memsz() {
        let bytes = image(&[phdr(PT_LOAD, 0x100, 0x0010_0000, 0x20, 0x10)], 0x100);
        assert_eq!(
            ImageDescriptor::parse(&bytes).unwrap_err(),
            ElfError::SegmentSizeMismatch(0)
        );
    }

    #[test]
    fn rejects_overlapping_destinations() {
        let bytes = image(
            &[
                phdr(PT_LOAD, 0x100, 0x0010_0000, 0x10, 0x2000),
                phdr(PT_LOAD, 0x100, 0x0010_1000, 0x10, 0x10),
            ],
            0x100,
        );
        assert_eq!(
            ImageDescriptor::parse(&bytes).unwrap_err(),
            ElfError::OverlappingSegments(0, 1)
        );
    }

    #[test]
    fn empty_load_segments_are_collected() {
        let bytes = image(
            &[
                phdr(PT_LOAD, 0x100, 0x0010_0000, 0x10, 0x2000),
                phdr(PT_LOAD, 0x100, 0x0010_1000, 0, 0),
                phdr(PT_LOAD, 0x100, 0x0010_4000, 0, 0),
            ],
            0x100,
        );
        let image = ImageDescriptor::parse(&bytes).unwrap();
        assert_eq!(image.segments().len(), 3);
        assert_eq!(image.segments()[1].memory_size, 0);
        assert_eq!(image.max_physical_address().as_u64(), 0x0010_4000);
        assert_eq!(image.total_pages(), 4);
    }

    #[test]
    fn null_link_address_is_flagged_not_rejected() {
        let bytes = image(&[phdr(PT_LOAD, 0x100, 0, 0x10, 0x10)], 0x100);
        let image = ImageDescriptor::parse(&bytes).unwrap();
        assert!(image.links_at_null());
        assert_eq!(image.base_offset().as_u64(), 0);
    }
}
