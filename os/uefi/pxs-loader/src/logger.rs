use core::sync::atomic::{AtomicBool, Ordering};
use log::{LevelFilter, Log, Metadata, Record, SetLoggerError};
use pxs_qemu::qemu_trace;

#[cfg(debug_assertions)]
const MAX_LEVEL: LevelFilter = LevelFilter::Debug;
#[cfg(not(debug_assertions))]
const MAX_LEVEL: LevelFilter = LevelFilter::Info;

static LOGGER: UefiLogger = UefiLogger::new(MAX_LEVEL);

/// Writes every record to the QEMU debug console and, until teardown
/// begins, to the firmware text console as well.
pub struct UefiLogger {
    max_level: LevelFilter,
    boot_services_available: AtomicBool,
}

impl UefiLogger {
    #[must_use]
    const fn new(max_level: LevelFilter) -> Self {
        Self {
            max_level,
            boot_services_available: AtomicBool::new(true),
        }
    }

    /// Install the logger. Call this once during early init.
    ///
    /// # Errors
    /// Fails if another logger was installed before.
    pub fn init() -> Result<&'static Self, SetLoggerError> {
        log::set_logger(&LOGGER)?;
        log::set_max_level(LOGGER.max_level);
        Ok(&LOGGER)
    }

    /// Stop mirroring to the firmware console. Only the debug port is used
    /// from here on, which neither allocates nor calls into the firmware.
    pub fn exit_boot_services(&self) {
        self.boot_services_available.store(false, Ordering::Release);
    }

    pub fn boot_services_available(&self) -> bool {
        self.boot_services_available.load(Ordering::Acquire)
    }
}

impl Log for UefiLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= self.max_level
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }

        // Format: "[LEVEL] target: message\n"
        qemu_trace!(
            "[{}] {}: {}\n",
            record.level(),
            record.target(),
            record.args()
        );

        if self.boot_services_available() {
            uefi::println!(
                "[{}] {}: {}",
                record.level(),
                record.target(),
                record.args()
            );
        }
    }

    fn flush(&self) {
        // no-op for qemu debug port
    }
}
