//! # Boot Sequence
//!
//! Everything between "the loader is running" and "jump to the kernel". On
//! success the firmware has been left and the returned [`Handoff`] is all
//! that remains; on error the firmware is still usable unless
//! [`BootError::firmware_gone`] says otherwise.

use crate::addresses::VirtualAddress;
use crate::boot_info::{
    BootInfoParts, FirmwareTables, build_boot_info, leak_boot_info, leak_command_line, load_initrd,
};
use crate::config::load_config;
use crate::elf::loader::load_kernel;
use crate::entropy::best_entropy;
use crate::error::BootError;
use crate::firmware::Environment;
use crate::teardown::exit_boot_services;
use log::{info, warn};
use pxs_protocol::BootInfo;

/// What the final jump needs.
#[derive(Debug)]
pub struct Handoff {
    /// Relocated kernel entry point.
    pub entry: VirtualAddress,
    /// The leaked, complete boot information record.
    pub boot_info: &'static mut BootInfo,
}

/// Load the configuration, the initrd and the kernel, describe the machine
/// and leave the firmware.
///
/// # Errors
/// Any [`BootError`]; recoverable conditions are logged and never returned.
pub fn prepare_handoff<E>(env: &mut E) -> Result<Handoff, BootError>
where
    E: Environment + ?Sized,
{
    let config = load_config(env);
    let command_line = leak_command_line(&config.cmdline);

    let initrd = config
        .initrd_path
        .as_deref()
        .and_then(|path| load_initrd(env, path));

    info!("Loading kernel '{}'", config.kernel_path);
    let file = env
        .read_file(&config.kernel_path)
        .map_err(|source| BootError::KernelLoad {
            path: config.kernel_path.clone(),
            source,
        })?;
    let kernel = load_kernel(env, file, config.kaslr_enabled)?;

    let graphics = env.graphics_mode();
    if graphics.is_none() {
        warn!("No graphics output available, continuing headless");
    }

    let tables = FirmwareTables::lookup(&*env);
    let canary = best_entropy(env);

    let boot_info = leak_boot_info(build_boot_info(&BootInfoParts {
        kernel: &kernel,
        initrd,
        graphics,
        tables,
        command_line,
        canary,
    }));

    info!(
        "Kernel at {} ({} pages), entry {}, KASLR {}",
        kernel.plan.load_base,
        kernel.plan.total_pages,
        kernel.entry,
        if kernel.plan.randomized { "active" } else { "inactive" }
    );
    if let Some(mode) = graphics {
        info!("Framebuffer {}x{} at {}", mode.width, mode.height, mode.framebuffer_base);
    }

    if config.timeout_secs > 0 {
        info!("Booting in {} second(s) ...", config.timeout_secs);
        env.stall(config.timeout_secs);
    }

    // Nothing may be freed once the firmware is gone.
    drop(config);

    let snapshot = exit_boot_services(env)?;
    boot_info.memory_map = snapshot.into_info();

    Ok(Handoff {
        entry: kernel.entry,
        boot_info,
    })
}
