//! # PXS Stage-2 UEFI Loader
//!
//! Loads an ELF64 kernel from the volume this application was started from,
//! places it at a randomized physical base when entropy is available, hands
//! it a [`pxs_protocol::BootInfo`] record and leaves the firmware.
//!
//! ```text
//! UEFI Firmware Boot
//!         ↓
//! ┌─────────────────────────────────────────────┐
//! │              PXS Loader                     │
//! ├─────────────────────────────────────────────┤
//! │  1. Logger, boot volume, pxs.cfg            │
//! │  2. Command line and initrd                 │
//! │  3. Kernel: parse, place (KASLR), copy      │
//! │  4. Framebuffer, ACPI/SMBIOS, canary        │
//! │  5. Memory map and ExitBootServices         │
//! │  6. Jump: sysv64 entry(&BootInfo)           │
//! └─────────────────────────────────────────────┘
//!         ↓
//! Kernel Execution (identity-mapped, physical)
//! ```
//!
//! The sequence itself lives in [`pxs_boot`]; this crate binds it to boot
//! services and the CPU.
//!
//! ## Debug output
//!
//! Log records go to QEMU's debug console (port `0x402`, feature `qemu`) and,
//! until teardown starts, to the firmware text console.
//!
//! ## Failures
//!
//! Fatal errors are reported, then the loader waits for a key and resets the
//! machine. With the `halt-on-fatal` feature it halts instead. After teardown
//! has begun it always halts.

#![cfg_attr(not(any(test, doctest)), no_std)]
#![no_main]
#![allow(unsafe_code)]
extern crate alloc;

mod config_tables;
mod cpu;
mod entropy;
mod environment;
mod fatal;
mod file_system;
mod framebuffer;
mod handoff;
mod logger;
mod memory;
mod tracing;
mod uefi_mmap;

use crate::environment::UefiEnvironment;
use crate::fatal::fatal;
use crate::handoff::jump_to_kernel;
use crate::logger::UefiLogger;
use log::info;
use uefi::prelude::*;

#[entry]
fn efi_main() -> Status {
    if uefi::helpers::init().is_err() {
        return Status::UNSUPPORTED;
    }

    let Ok(logger) = UefiLogger::init() else {
        return Status::ABORTED;
    };

    info!("PXS loader v{} reporting", env!("CARGO_PKG_VERSION"));

    let mut env = match UefiEnvironment::new(logger) {
        Ok(env) => env,
        Err(e) => fatal(logger, &e),
    };

    match pxs_boot::prepare_handoff(&mut env) {
        // SAFETY: The kernel was loaded and the boot services are gone.
        Ok(handoff) => unsafe { jump_to_kernel(handoff) },
        Err(e) => fatal(logger, &e),
    }
}
