use core::alloc::{GlobalAlloc, Layout};
use core::ptr;
use core::ptr::NonNull;
use core::ptr::null_mut;
use core::sync::atomic::{AtomicBool, Ordering};
use pxs_boot::addresses::PhysicalAddress;
use pxs_boot::firmware::{AllocationRejected, PageAllocator};
use uefi::boot;
use uefi::boot::{AllocateType, MemoryType};

use crate::environment::UefiEnvironment;

/// A UEFI Boot Services pool allocation to back Rust's global allocator.
///
/// # Notes
/// - Valid only while Boot Services are active (before `ExitBootServices`).
///   Afterwards allocation fails and deallocation leaks.
/// - We always over-allocate to satisfy alignment and store the original pointer
///   just before the returned aligned block for correct deallocation.
pub struct UefiBootAllocator {
    active: AtomicBool,
}

#[global_allocator]
static GLOBAL_ALLOC: UefiBootAllocator = UefiBootAllocator {
    active: AtomicBool::new(true),
};

/// Stop using the firmware pool. Called once the boot services are gone.
pub fn retire_allocator() {
    GLOBAL_ALLOC.active.store(false, Ordering::Release);
}

unsafe impl GlobalAlloc for UefiBootAllocator {
    unsafe fn alloc(&self, layout: Layout) -> *mut u8 {
        if !self.active.load(Ordering::Acquire) {
            return null_mut();
        }

        // Ensure minimum size of 1 and include header for original pointer and padding for alignment
        let align = layout.align().max(size_of::<usize>());
        let size = layout.size().max(1);
        let Some(total) = size
            .checked_add(align)
            .and_then(|v| v.checked_add(size_of::<usize>()))
        else {
            return null_mut();
        };

        let Ok(raw) = boot::allocate_pool(MemoryType::LOADER_DATA, total) else {
            return null_mut();
        };

        let raw_ptr = raw.as_ptr();
        let addr = raw_ptr as usize + size_of::<usize>();
        let aligned = (addr + (align - 1)) & !(align - 1);
        let header_ptr = (aligned - size_of::<usize>()) as *mut usize;

        // Store the original allocation pointer just before the aligned region
        unsafe {
            ptr::write(header_ptr, raw_ptr as usize);
        }
        aligned as *mut u8
    }

    unsafe fn dealloc(&self, ptr: *mut u8, _layout: Layout) {
        if ptr.is_null() || !self.active.load(Ordering::Acquire) {
            return;
        }

        // Recover the original pool pointer from the header we stored in alloc()
        let header_ptr = (ptr as usize - size_of::<usize>()) as *mut usize;
        let orig_ptr = unsafe { ptr::read(header_ptr) as *mut u8 };

        // SAFETY: `orig_ptr` was returned by `allocate_pool` and stored by us.
        let _ = unsafe { boot::free_pool(NonNull::new_unchecked(orig_ptr)) };
    }
}

impl PageAllocator for UefiEnvironment {
    fn allocate_at(
        &mut self,
        address: PhysicalAddress,
        pages: u64,
    ) -> Result<PhysicalAddress, AllocationRejected> {
        // `boot::allocate_pages` never returns page 0.
        if address.is_null() {
            return Err(AllocationRejected);
        }
        allocate_pages(AllocateType::Address(address.as_u64()), pages)
    }

    fn allocate_anywhere(&mut self, pages: u64) -> Result<PhysicalAddress, AllocationRejected> {
        allocate_pages(AllocateType::AnyPages, pages)
    }

    unsafe fn memory_mut(&mut self, base: PhysicalAddress, len: usize) -> &mut [u8] {
        // Boot services identity-map all memory.
        unsafe { core::slice::from_raw_parts_mut(base.as_u64() as *mut u8, len) }
    }
}

fn allocate_pages(ty: AllocateType, pages: u64) -> Result<PhysicalAddress, AllocationRejected> {
    let pages = usize::try_from(pages).map_err(|_| AllocationRejected)?;
    boot::allocate_pages(ty, MemoryType::LOADER_DATA, pages)
        .map(|base| PhysicalAddress::new(base.as_ptr() as u64))
        .map_err(|_| AllocationRejected)
}
