//! # PXS Boot Core
//!
//! The firmware-independent part of the PXS stage-2 loader. It reads a
//! configuration file and an ELF64 kernel from the boot volume, places the
//! kernel in physical memory (at a randomized base when entropy allows),
//! describes the machine in a [`pxs_protocol::BootInfo`] record and leaves
//! the firmware's boot services.
//!
//! All firmware access goes through the traits in [`firmware`], bundled into
//! the [`Environment`] handle that is passed explicitly to
//! [`prepare_handoff`]. The UEFI application implements them on top of boot
//! services; the tests implement them on top of plain memory.
//!
//! The final jump into the kernel is not part of this crate.

#![cfg_attr(not(test), no_std)]

extern crate alloc;

pub mod addresses;
pub mod boot;
pub mod boot_info;
pub mod config;
pub mod elf;
pub mod entropy;
pub mod error;
pub mod firmware;
pub mod kaslr;
pub mod teardown;
pub mod wipe;

pub use boot::{Handoff, prepare_handoff};
pub use error::BootError;
pub use firmware::Environment;
