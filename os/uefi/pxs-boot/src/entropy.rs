//! # Entropy Source Chain
//!
//! Produces one best-effort 64-bit seed. Sources are tried in order of
//! quality and the first one that yields a nonzero value wins:
//!
//! 1. [`EntropySource::HardwareRng`]: the firmware RNG protocol.
//! 2. [`EntropySource::CpuInstruction`]: `RDRAND`, retried on underflow.
//! 3. [`EntropySource::TimeMix`]: cycle counter and wall clock folded through
//!    an xorshift round. Always available.
//!
//! The chain never fails. Callers judge quality by the provenance tag.

use log::debug;

/// Bounded retries for the CPU instruction; `RDRAND` may transiently underflow.
pub const RDRAND_RETRIES: usize = 10;

/// Stands in for a time mix that folded to zero; xorshift maps only zero to
/// zero, so this needs both an all-zero counter and clock.
pub const TIME_MIX_FALLBACK: u64 = 0x9E37_79B9_7F4A_7C15;

/// Where a seed came from.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum EntropySource {
    HardwareRng,
    CpuInstruction,
    TimeMix,
}

impl EntropySource {
    /// Whether the seed came from a dedicated random number generator.
    #[must_use]
    pub const fn is_hardware(self) -> bool {
        matches!(self, Self::HardwareRng | Self::CpuInstruction)
    }
}

/// A seed tagged with its provenance.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct EntropySeed {
    pub value: u64,
    pub provenance: EntropySource,
}

impl EntropySeed {
    /// A zero seed means "no entropy" and must not be used.
    #[must_use]
    pub const fn is_usable(&self) -> bool {
        self.value != 0
    }
}

/// Calendar time as reported by the firmware clock.
#[derive(Debug, Copy, Clone, Default, Eq, PartialEq)]
pub struct WallClock {
    pub year: u16,
    pub month: u8,
    pub day: u8,
    pub hour: u8,
    pub minute: u8,
    pub second: u8,
    pub nanosecond: u32,
}

/// The raw sources behind the chain.
pub trait EntropyHardware {
    /// One read from the firmware RNG, `None` if there is none or it failed.
    fn firmware_rng(&mut self) -> Option<u64>;

    /// Whether the CPU implements a random-number instruction.
    fn cpu_rng_supported(&mut self) -> bool;

    /// One attempt of the CPU instruction, `None` when it reported underflow.
    fn cpu_rng(&mut self) -> Option<u64>;

    /// A free-running cycle counter.
    fn cycle_counter(&mut self) -> u64;

    /// The firmware wall clock, `None` if it cannot be read.
    fn wall_clock(&mut self) -> Option<WallClock>;
}

/// Run the chain once.
pub fn best_entropy<H>(hw: &mut H) -> EntropySeed
where
    H: EntropyHardware + ?Sized,
{
    if let Some(value) = hw.firmware_rng().filter(|&v| v != 0) {
        debug!("Entropy from firmware RNG");
        return EntropySeed {
            value,
            provenance: EntropySource::HardwareRng,
        };
    }

    if hw.cpu_rng_supported() {
        for _ in 0..RDRAND_RETRIES {
            if let Some(value) = hw.cpu_rng().filter(|&v| v != 0) {
                debug!("Entropy from CPU random instruction");
                return EntropySeed {
                    value,
                    provenance: EntropySource::CpuInstruction,
                };
            }
        }
        debug!("CPU random instruction exhausted {RDRAND_RETRIES} attempts");
    }

    let tsc = hw.cycle_counter();
    let clock = hw.wall_clock().unwrap_or_default();
    debug!("Entropy from cycle counter and wall clock");
    EntropySeed {
        value: time_mix(tsc, &clock),
        provenance: EntropySource::TimeMix,
    }
}

/// Fold the cycle counter and wall clock into one value. Never zero.
#[must_use]
pub fn time_mix(tsc: u64, clock: &WallClock) -> u64 {
    let mut seed = tsc;
    seed ^= u64::from(clock.nanosecond) << 32;
    seed ^= (u64::from(clock.year) << 16) | (u64::from(clock.month) << 8) | u64::from(clock.day);
    seed ^= (u64::from(clock.hour) << 24)
        | (u64::from(clock.minute) << 16)
        | (u64::from(clock.second) << 8);

    seed ^= seed << 13;
    seed ^= seed >> 7;
    seed ^= seed << 17;
    if seed == 0 { TIME_MIX_FALLBACK } else { seed }
}
