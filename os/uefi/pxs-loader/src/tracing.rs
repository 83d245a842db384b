//! # Trace output

use pxs_protocol::BootInfo;
use pxs_qemu::qemu_trace;

/// Dump the final record to the debug console. Safe after teardown.
pub fn trace_boot_info(boot_info: &BootInfo) {
    qemu_trace!("Boot Info in PXS Loader:\n");
    qemu_trace!(
        "   BI ptr = {:018x}, version = {}, flags = {:#07b}\n",
        core::ptr::from_ref(boot_info) as usize,
        boot_info.version,
        boot_info.flags.into_bits()
    );
    qemu_trace!(" MMAP ptr = {:018x}", boot_info.memory_map.ptr);
    qemu_trace!(", MMAP size = {}", boot_info.memory_map.size);
    qemu_trace!(", MMAP key = {}", boot_info.memory_map.map_key);
    qemu_trace!(", MMAP desc size = {}", boot_info.memory_map.descriptor_size);
    qemu_trace!(
        ", MMAP desc version = {}\n",
        boot_info.memory_map.descriptor_version
    );
    qemu_trace!("   FB ptr = {:018x}", boot_info.framebuffer.base_address);
    qemu_trace!(", FB size = {}", boot_info.framebuffer.size);
    qemu_trace!(", FB width = {}", boot_info.framebuffer.width);
    qemu_trace!(", FB height = {}", boot_info.framebuffer.height);
    qemu_trace!(", FB stride = {}", boot_info.framebuffer.pixels_per_scan_line);
    qemu_trace!(
        ", FB red/green/blue at {}/{}/{}\n",
        boot_info.framebuffer.red_field_position,
        boot_info.framebuffer.green_field_position,
        boot_info.framebuffer.blue_field_position
    );
    qemu_trace!(" RSDP = {:018x}", boot_info.rsdp);
    qemu_trace!(", SMBIOS = {:018x}", boot_info.smbios);
    qemu_trace!(", RT = {:018x}\n", boot_info.runtime_services);
    qemu_trace!(" Kernel base = {:018x}", boot_info.kernel_physical_base);
    qemu_trace!(", file size = {}", boot_info.kernel_file_size);
    qemu_trace!(", initrd = {:018x}", boot_info.initrd_address);
    qemu_trace!(" ({} bytes)", boot_info.initrd_size);
    qemu_trace!(", cmdline = {:018x}\n", boot_info.command_line);
}
