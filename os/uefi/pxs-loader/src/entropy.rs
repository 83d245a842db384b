//! # Entropy Hardware

use pxs_boot::entropy::{EntropyHardware, WallClock};
use uefi::boot::{self, OpenProtocolAttributes, OpenProtocolParams, ScopedProtocol};
use uefi::proto::rng::Rng;

use crate::cpu;
use crate::environment::UefiEnvironment;

impl EntropyHardware for UefiEnvironment {
    fn firmware_rng(&mut self) -> Option<u64> {
        let mut rng = get_rng().ok()?;

        let mut bytes = [0u8; 8];
        rng.get_rng(None, &mut bytes).ok()?;
        Some(u64::from_le_bytes(bytes))
    }

    fn cpu_rng_supported(&mut self) -> bool {
        cpu::has_rdrand()
    }

    fn cpu_rng(&mut self) -> Option<u64> {
        cpu::rdrand()
    }

    fn cycle_counter(&mut self) -> u64 {
        cpu::rdtsc()
    }

    fn wall_clock(&mut self) -> Option<WallClock> {
        let time = uefi::runtime::get_time().ok()?;
        Some(WallClock {
            year: time.year(),
            month: time.month(),
            day: time.day(),
            hour: time.hour(),
            minute: time.minute(),
            second: time.second(),
            nanosecond: time.nanosecond(),
        })
    }
}

/// Fetch the RNG protocol without disconnecting its other users.
fn get_rng() -> Result<ScopedProtocol<Rng>, uefi::Error> {
    let handle = boot::get_handle_for_protocol::<Rng>()?;

    // SAFETY: Only `GetRNG` is called and the protocol is dropped right after.
    unsafe {
        boot::open_protocol::<Rng>(
            OpenProtocolParams {
                handle,
                agent: boot::image_handle(),
                controller: None,
            },
            OpenProtocolAttributes::GetProtocol,
        )
    }
}
