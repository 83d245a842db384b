//! A scripted in-memory firmware for the integration tests.

#![allow(dead_code)]

use pxs_boot::addresses::PhysicalAddress;
use pxs_boot::boot_info::GraphicsMode;
use pxs_boot::entropy::{EntropyHardware, WallClock};
use pxs_boot::firmware::{AllocationRejected, BootVolume, FirmwareTable, PageAllocator, Platform, VolumeError};
use pxs_boot::teardown::{ExitRefused, MapKey, MemoryMapError, MemoryMapMeta, MemoryMapSource};
use std::collections::{HashMap, VecDeque};
use std::ops::Range;

pub const PAGE: u64 = 4096;
pub const MIB: u64 = 1024 * 1024;

/// Byte pattern fresh pages are filled with, so missed zeroing shows up.
pub const GARBAGE: u8 = 0xA5;

/// What the mock saw, in order.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum Event {
    EnterTeardown,
    MemoryMap { buffer: usize, ok: bool },
    Exit { key: usize, ok: bool },
}

pub struct MockEnv {
    // memory
    pub ram_end: u64,
    pub reserved: Vec<Range<u64>>,
    pub allocations: Vec<(u64, Vec<u8>)>,
    pub requests: Vec<(u64, u64)>,
    next_anywhere: u64,

    // entropy
    pub firmware_rng: Option<u64>,
    pub cpu_rng_supported: bool,
    pub cpu_rng: VecDeque<Option<u64>>,
    pub tsc: u64,
    pub clock: Option<WallClock>,

    // volume
    pub files: HashMap<String, Vec<u8>>,

    // platform
    pub graphics: Option<GraphicsMode>,
    pub tables: Vec<(FirmwareTable, PhysicalAddress)>,
    pub runtime_services: u64,
    pub stalls: Vec<u64>,

    // teardown
    pub map_sizes: VecDeque<usize>,
    pub exit_refusals: usize,
    pub events: Vec<Event>,
    key: usize,
}

impl Default for MockEnv {
    fn default() -> Self {
        Self {
            ram_end: 4 * 1024 * MIB,
            reserved: Vec::new(),
            allocations: Vec::new(),
            requests: Vec::new(),
            next_anywhere: 0x1_0000_0000,
            firmware_rng: None,
            cpu_rng_supported: false,
            cpu_rng: VecDeque::new(),
            tsc: 0x1234_5678,
            clock: None,
            files: HashMap::new(),
            graphics: None,
            tables: Vec::new(),
            runtime_services: 0x7FF0_0000,
            stalls: Vec::new(),
            map_sizes: VecDeque::new(),
            exit_refusals: 0,
            events: Vec::new(),
            key: 0,
        }
    }
}

impl MockEnv {
    pub fn with_file(mut self, path: &str, bytes: Vec<u8>) -> Self {
        self.files.insert(path.to_owned(), bytes);
        self
    }

    pub fn with_firmware_rng(mut self, value: u64) -> Self {
        self.firmware_rng = Some(value);
        self
    }

    fn is_free(&self, range: &Range<u64>) -> bool {
        let overlaps = |other: &Range<u64>| range.start < other.end && other.start < range.end;
        range.end <= self.ram_end
            && !self.reserved.iter().any(overlaps)
            && !self
                .allocations
                .iter()
                .any(|(base, mem)| overlaps(&(*base..*base + mem.len() as u64)))
    }

    fn commit(&mut self, base: u64, pages: u64) -> PhysicalAddress {
        let len = usize::try_from(pages * PAGE).unwrap();
        self.allocations.push((base, vec![GARBAGE; len]));
        PhysicalAddress::new(base)
    }

    /// The bytes of the allocation that starts at `base`.
    pub fn allocation(&self, base: u64) -> &[u8] {
        self.allocations
            .iter()
            .find(|(b, _)| *b == base)
            .map(|(_, mem)| mem.as_slice())
            .expect("no allocation at this base")
    }

    pub fn exit_calls(&self) -> usize {
        self.events.iter().filter(|e| matches!(e, Event::Exit { .. })).count()
    }

    pub fn map_calls(&self) -> usize {
        self.events
            .iter()
            .filter(|e| matches!(e, Event::MemoryMap { .. }))
            .count()
    }
}

impl PageAllocator for MockEnv {
    fn allocate_at(
        &mut self,
        address: PhysicalAddress,
        pages: u64,
    ) -> Result<PhysicalAddress, AllocationRejected> {
        self.requests.push((address.as_u64(), pages));
        let range = address.as_u64()..address.as_u64() + pages * PAGE;
        if pages == 0 || !self.is_free(&range) {
            return Err(AllocationRejected);
        }
        Ok(self.commit(address.as_u64(), pages))
    }

    fn allocate_anywhere(&mut self, pages: u64) -> Result<PhysicalAddress, AllocationRejected> {
        let base = self.next_anywhere;
        self.next_anywhere += pages * PAGE;
        Ok(self.commit(base, pages))
    }

    unsafe fn memory_mut(&mut self, base: PhysicalAddress, len: usize) -> &mut [u8] {
        let address = base.as_u64();
        let (start, mem) = self
            .allocations
            .iter_mut()
            .find(|(b, mem)| *b <= address && address < *b + mem.len() as u64)
            .expect("access outside of any allocation");
        let offset = usize::try_from(address - *start).unwrap();
        &mut mem[offset..offset + len]
    }
}

impl EntropyHardware for MockEnv {
    fn firmware_rng(&mut self) -> Option<u64> {
        self.firmware_rng
    }

    fn cpu_rng_supported(&mut self) -> bool {
        self.cpu_rng_supported
    }

    fn cpu_rng(&mut self) -> Option<u64> {
        self.cpu_rng.pop_front().flatten()
    }

    fn cycle_counter(&mut self) -> u64 {
        self.tsc
    }

    fn wall_clock(&mut self) -> Option<WallClock> {
        self.clock
    }
}

impl BootVolume for MockEnv {
    fn read_file(&mut self, path: &str) -> Result<Vec<u8>, VolumeError> {
        self.files.get(path).cloned().ok_or(VolumeError::NotFound)
    }
}

impl Platform for MockEnv {
    fn graphics_mode(&mut self) -> Option<GraphicsMode> {
        self.graphics
    }

    fn config_table(&self, table: FirmwareTable) -> Option<PhysicalAddress> {
        self.tables
            .iter()
            .find(|(t, _)| *t == table)
            .map(|(_, address)| *address)
    }

    fn runtime_services_address(&self) -> u64 {
        self.runtime_services
    }

    fn stall(&mut self, seconds: u64) {
        self.stalls.push(seconds);
    }
}

impl MemoryMapSource for MockEnv {
    fn enter_teardown(&mut self) {
        self.events.push(Event::EnterTeardown);
    }

    /// Each call consumes one scripted size; the last one sticks.
    fn memory_map(&mut self, buffer: &mut [u8]) -> Result<MemoryMapMeta, MemoryMapError> {
        let required = if self.map_sizes.len() > 1 {
            self.map_sizes.pop_front().unwrap_or(480)
        } else {
            self.map_sizes.front().copied().unwrap_or(480)
        };
        let ok = buffer.len() >= required;
        self.events.push(Event::MemoryMap {
            buffer: buffer.len(),
            ok,
        });
        if !ok {
            return Err(MemoryMapError::BufferTooSmall { required });
        }
        buffer[..required].fill(0xD5);
        self.key += 1;
        Ok(MemoryMapMeta {
            map_size: required,
            key: MapKey(self.key),
            descriptor_size: 48,
            descriptor_version: 1,
        })
    }

    fn exit_boot_services(&mut self, key: MapKey) -> Result<(), ExitRefused> {
        let ok = self.exit_refusals == 0 && key.0 == self.key;
        self.events.push(Event::Exit { key: key.0, ok });
        if ok {
            Ok(())
        } else {
            self.exit_refusals = self.exit_refusals.saturating_sub(1);
            // EFI_INVALID_PARAMETER
            Err(ExitRefused(0x8000_0000_0000_0002))
        }
    }
}

/// One loadable segment for [`build_elf`].
pub struct Segment<'a> {
    pub paddr: u64,
    pub data: &'a [u8],
    pub memsz: u64,
}

/// Assemble a minimal ELF64 executable with one program header per segment.
pub fn build_elf(entry: u64, segments: &[Segment<'_>]) -> Vec<u8> {
    const EHDR: usize = 64;
    const PHDR: usize = 56;

    let mut bytes = vec![0u8; EHDR + PHDR * segments.len()];
    bytes[0..4].copy_from_slice(b"\x7FELF");
    bytes[4] = 2; // ELFCLASS64
    bytes[5] = 1; // ELFDATA2LSB
    bytes[6] = 1; // EV_CURRENT
    bytes[16..18].copy_from_slice(&2u16.to_le_bytes()); // ET_EXEC
    bytes[18..20].copy_from_slice(&62u16.to_le_bytes()); // EM_X86_64
    bytes[24..32].copy_from_slice(&entry.to_le_bytes());
    bytes[32..40].copy_from_slice(&(EHDR as u64).to_le_bytes());
    bytes[52..54].copy_from_slice(&(EHDR as u16).to_le_bytes());
    bytes[54..56].copy_from_slice(&(PHDR as u16).to_le_bytes());
    bytes[56..58].copy_from_slice(&u16::try_from(segments.len()).unwrap().to_le_bytes());

    for (i, segment) in segments.iter().enumerate() {
        let offset = bytes.len() as u64;
        bytes.extend_from_slice(segment.data);

        let ph = EHDR + i * PHDR;
        bytes[ph..ph + 4].copy_from_slice(&1u32.to_le_bytes()); // PT_LOAD
        bytes[ph + 4..ph + 8].copy_from_slice(&7u32.to_le_bytes()); // RWX
        bytes[ph + 8..ph + 16].copy_from_slice(&offset.to_le_bytes());
        bytes[ph + 16..ph + 24].copy_from_slice(&segment.paddr.to_le_bytes());
        bytes[ph + 24..ph + 32].copy_from_slice(&segment.paddr.to_le_bytes());
        bytes[ph + 32..ph + 40].copy_from_slice(&(segment.data.len() as u64).to_le_bytes());
        bytes[ph + 40..ph + 48].copy_from_slice(&segment.memsz.to_le_bytes());
        bytes[ph + 48..ph + 56].copy_from_slice(&PAGE.to_le_bytes());
    }
    bytes
}

/// A two-segment kernel linked at 1 MiB: text, then data with a `.bss` tail.
pub fn sample_kernel() -> Vec<u8> {
    build_elf(
        0x0010_0040,
        &[
            Segment {
                paddr: 0x0010_0000,
                data: &[0x90; 0x180],
                memsz: 0x180,
            },
            Segment {
                paddr: 0x0010_2000,
                data: &[0x11; 0x40],
                memsz: 0x2000,
            },
        ],
    )
}
