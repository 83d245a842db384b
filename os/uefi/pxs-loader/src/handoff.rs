//! # Kernel Entry

use log::info;
use pxs_boot::Handoff;
use pxs_protocol::KernelEntryFn;

use crate::cpu::halt_forever;
use crate::tracing::trace_boot_info;

/// Call the kernel. Should it ever return, the CPU is halted.
///
/// # Safety
/// `handoff.entry` must be the entry point of a kernel that was just loaded,
/// and the boot services must have been exited.
pub unsafe fn jump_to_kernel(handoff: Handoff) -> ! {
    let Handoff { entry, boot_info } = handoff;
    trace_boot_info(&*boot_info);
    info!("Jumping to kernel at {entry}. Ciao Kakao ...");

    // SAFETY: The caller guarantees a loaded image at `entry`, which follows
    // the `sysv64` entry convention.
    let kernel_main = unsafe { core::mem::transmute::<u64, KernelEntryFn>(entry.as_u64()) };

    // SAFETY: Nothing is left that relies on interrupts.
    unsafe {
        core::arch::asm!("cli", options(nomem, nostack));
    }
    kernel_main(core::ptr::from_ref(&*boot_info));

    halt_forever()
}
