//! # Loader Configuration
//!
//! `pxs.cfg` is a line-oriented `KEY=VALUE` file at the root of the boot
//! volume:
//!
//! ```text
//! KERNEL=voidframex.krnl
//! INITRD=initrd.img
//! CMDLINE=console=ttyS0 loglevel=7
//! TIMEOUT=5
//! KASLR=1
//! ```
//!
//! Keys are case-sensitive and matched after leading blanks. Unknown lines
//! are ignored. A missing file yields [`Config::default`].

extern crate alloc;

use crate::firmware::BootVolume;
use crate::wipe::wipe;
use alloc::borrow::ToOwned;
use alloc::string::String;
use log::{info, warn};

/// Name of the configuration file on the boot volume.
pub const CONFIG_PATH: &str = "pxs.cfg";

pub const DEFAULT_KERNEL_PATH: &str = "voidframex.krnl";
pub const DEFAULT_TIMEOUT_SECS: u64 = 3;

/// Longest accepted path, in bytes.
pub const MAX_PATH_LEN: usize = 255;

/// Longest accepted command line, in bytes (excluding the terminator).
pub const MAX_CMDLINE_LEN: usize = 511;

#[derive(Debug, Clone, Eq, PartialEq)]
pub struct Config {
    /// Kernel ELF file, relative to the volume root.
    pub kernel_path: String,
    /// Optional initial ramdisk.
    pub initrd_path: Option<String>,
    /// Kernel command line; empty means none.
    pub cmdline: String,
    /// Seconds to wait before leaving the firmware.
    pub timeout_secs: u64,
    /// Whether to randomize the kernel's physical base.
    pub kaslr_enabled: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            kernel_path: DEFAULT_KERNEL_PATH.to_owned(),
            initrd_path: None,
            cmdline: String::new(),
            timeout_secs: DEFAULT_TIMEOUT_SECS,
            kaslr_enabled: true,
        }
    }
}

impl Config {
    /// Parse the contents of a configuration file on top of the defaults.
    #[must_use]
    pub fn parse(text: &[u8]) -> Self {
        let mut config = Self::default();

        for line in text.split(|&b| b == b'\n' || b == b'\r') {
            let line = trim_leading_blanks(line);
            if line.is_empty() {
                continue;
            }

            if let Some(value) = line.strip_prefix(b"KERNEL=") {
                if value.is_empty() {
                    warn!("Ignoring empty KERNEL= entry");
                } else {
                    config.kernel_path = truncated(value, MAX_PATH_LEN);
                }
            } else if let Some(value) = line.strip_prefix(b"INITRD=") {
                config.initrd_path =
                    (!value.is_empty()).then(|| truncated(value, MAX_PATH_LEN));
            } else if let Some(value) = line.strip_prefix(b"CMDLINE=") {
                config.cmdline = truncated(value, MAX_CMDLINE_LEN);
            } else if let Some(value) = line.strip_prefix(b"TIMEOUT=") {
                config.timeout_secs = parse_leading_digits(value);
            } else if let Some(value) = line.strip_prefix(b"KASLR=") {
                config.kaslr_enabled = !(value.starts_with(b"0") || value.starts_with(b"FALSE"));
            }
        }

        config
    }
}

/// Read and parse [`CONFIG_PATH`], falling back to defaults on any error.
pub fn load_config<V>(volume: &mut V) -> Config
where
    V: BootVolume + ?Sized,
{
    let mut bytes = match volume.read_file(CONFIG_PATH) {
        Ok(bytes) => bytes,
        Err(e) => {
            warn!("Config '{CONFIG_PATH}' not available ({e}). Using defaults.");
            return Config::default();
        }
    };

    let config = Config::parse(&bytes);
    wipe(&mut bytes);

    info!(
        "Config loaded: kernel={}, KASLR={}",
        config.kernel_path,
        if config.kaslr_enabled { "ON" } else { "OFF" }
    );
    if !config.cmdline.is_empty() {
        info!("CmdLine: {}", config.cmdline);
    }
    config
}

fn trim_leading_blanks(line: &[u8]) -> &[u8] {
    let start = line
        .iter()
        .position(|&b| b != b' ' && b != b'\t')
        .unwrap_or(line.len());
    &line[start..]
}

fn truncated(value: &[u8], max: usize) -> String {
    let value = &value[..value.len().min(max)];
    String::from_utf8_lossy(value).into_owned()
}

/// Decimal digits up to the first non-digit; no digits yields 0.
fn parse_leading_digits(value: &[u8]) -> u64 {
    value
        .iter()
        .take_while(|b| b.is_ascii_digit())
        .fold(0u64, |acc, &d| {
            acc.saturating_mul(10).saturating_add(u64::from(d - b'0'))
        })
}
