//! # Fatal Errors

use log::error;
use pxs_boot::BootError;

use crate::cpu::halt_forever;
use crate::logger::UefiLogger;

/// Report `error` and end the boot attempt.
///
/// While the firmware is intact, this waits for a key press and resets the
/// machine, unless the `halt-on-fatal` feature asks for a halt. Once
/// teardown has begun, halting is the only option left.
pub fn fatal(logger: &UefiLogger, error: &BootError) -> ! {
    error!("Boot failed: {error}");

    if error.firmware_gone() || !logger.boot_services_available() {
        halt_forever();
    }

    if cfg!(feature = "halt-on-fatal") {
        uefi::println!("System halted.");
        halt_forever();
    }

    uefi::println!("Press any key to reboot ...");
    wait_for_key();
    uefi::runtime::reset(uefi::runtime::ResetType::COLD, uefi::Status::ABORTED, None)
}

fn wait_for_key() {
    uefi::system::with_stdin(|stdin| {
        if let Some(event) = stdin.wait_for_key_event() {
            let _ = uefi::boot::wait_for_event(&mut [event]);
        }
        let _ = stdin.read_key();
    });
}
