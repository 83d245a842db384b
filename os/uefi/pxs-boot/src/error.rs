//! # Fatal Boot Errors
//!
//! Recoverable conditions (missing configuration, a failed initrd load) never
//! surface here; they are logged and replaced by defaults. Everything in
//! [`BootError`] ends the boot attempt.

extern crate alloc;

use crate::elf::loader::ElfLoaderError;
use crate::elf::parser::ElfError;
use crate::firmware::VolumeError;
use crate::kaslr::PlacementError;
use crate::teardown::TeardownError;
use alloc::string::String;

#[derive(Debug, thiserror::Error)]
pub enum BootError {
    /// A required firmware protocol is missing.
    #[error("required firmware interface not found: {protocol}")]
    ProtocolLookup { protocol: &'static str },

    /// The kernel file could not be read.
    #[error("could not read kernel file '{path}': {source}")]
    KernelLoad {
        path: String,
        #[source]
        source: VolumeError,
    },

    /// The kernel image is not a loadable ELF64 file.
    #[error("invalid kernel image: {0}")]
    Format(#[from] ElfError),

    /// An essential allocation failed.
    #[error("allocation failed: {0}")]
    Allocation(#[from] PlacementError),

    /// The image could not be copied into its planned location.
    #[error("kernel placement inconsistent: {0}")]
    Materialize(ElfLoaderError),

    /// The firmware could not be exited.
    #[error("leaving the firmware failed: {0}")]
    Teardown(#[from] TeardownError),
}

impl From<ElfLoaderError> for BootError {
    fn from(value: ElfLoaderError) -> Self {
        match value {
            ElfLoaderError::Format(e) => Self::Format(e),
            ElfLoaderError::Placement(e) => Self::Allocation(e),
            e @ ElfLoaderError::SegmentOutsidePlan { .. } => Self::Materialize(e),
        }
    }
}

impl BootError {
    /// Whether the firmware has already been (partially) shut down, in which
    /// case only the debug console and a halt remain.
    #[must_use]
    pub const fn firmware_gone(&self) -> bool {
        matches!(self, Self::Teardown(_))
    }
}
