//! # x86-64 Primitives

const LEAF_01H: u32 = 0x01;

/// CPUID.01H:ECX bit 30, RDRAND supported.
const LEAF_01H_ECX_RDRAND: u32 = 1 << 30;

/// Execute CPUID with the given leaf and subleaf.
#[inline(always)]
#[allow(unused_assignments, clippy::inline_always)]
fn cpuid(leaf: u32, subleaf: u32) -> (u32, u32, u32, u32) {
    let (mut eax, mut ebx, mut ecx, mut edx) = (leaf, 0u32, subleaf, 0u32);
    // SAFETY: CPUID is available on every x86-64 CPU and has no side effects.
    unsafe {
        core::arch::asm!(
            "push rbx",
            "cpuid",
            "mov {ebx_out:e}, ebx", // move EBX to a free GPR we bind
            "pop rbx",
            ebx_out = lateout(reg) ebx,
            inlateout("eax") eax,
            inlateout("ecx") ecx,
            lateout("edx") edx,
            options(nomem, preserves_flags),
        );
    }
    (eax, ebx, ecx, edx)
}

/// Whether the CPU implements `RDRAND`.
pub fn has_rdrand() -> bool {
    let (_, _, ecx, _) = cpuid(LEAF_01H, 0);
    ecx & LEAF_01H_ECX_RDRAND != 0
}

/// One `RDRAND` attempt; `None` when the carry flag reports underflow.
///
/// Only call this after [`has_rdrand`] returned `true`.
pub fn rdrand() -> Option<u64> {
    let value: u64;
    let ok: u8;
    // SAFETY: Gated on CPUID by the caller; RDRAND only writes its operand.
    unsafe {
        core::arch::asm!(
            "rdrand {value}",
            "setc {ok}",
            value = out(reg) value,
            ok = out(reg_byte) ok,
            options(nomem, nostack),
        );
    }
    (ok != 0).then_some(value)
}

#[inline(always)]
#[allow(clippy::inline_always)]
pub fn rdtsc() -> u64 {
    let lo: u32;
    let hi: u32;
    // SAFETY: RDTSC is unprivileged unless CR4.TSD is set, which firmware does not do.
    unsafe {
        core::arch::asm!(
            "lfence", // serialize (Intel-recommended)
            "rdtsc",
            out("eax") lo,
            out("edx") hi,
            options(nomem, nostack, preserves_flags),
        );
    }
    (u64::from(hi) << 32) | u64::from(lo)
}

/// Disable interrupts and stop the CPU for good.
pub fn halt_forever() -> ! {
    loop {
        // SAFETY: The loader runs at CPL0; nothing is left to run.
        unsafe {
            core::arch::asm!("cli", "hlt", options(nomem, nostack));
        }
    }
}
