//! # Kernel Image Loading
//!
//! Runs the parse, place and copy pipeline over a kernel file read from the
//! boot volume. The planner has already zeroed the reservation, so only the
//! file-backed part of each segment is written here.

extern crate alloc;

use crate::addresses::{PhysicalAddress, VirtualAddress};
use crate::elf::parser::{ElfError, ImageDescriptor};
use crate::entropy::{EntropyHardware, best_entropy};
use crate::firmware::PageAllocator;
use crate::kaslr::{PlacementError, PlacementPlan, plan_placement};
use crate::wipe::WipeOnDrop;
use alloc::vec::Vec;
use log::{debug, info, trace};

#[derive(Debug, Copy, Clone, Eq, PartialEq, thiserror::Error)]
pub enum ElfLoaderError {
    #[error(transparent)]
    Format(#[from] ElfError),
    #[error(transparent)]
    Placement(#[from] PlacementError),
    #[error("segment {index} at {destination} falls outside the reserved range")]
    SegmentOutsidePlan {
        index: usize,
        destination: PhysicalAddress,
    },
}

/// A kernel image copied into its final location.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct LoadedKernel {
    /// The relocated entry point.
    pub entry: VirtualAddress,
    pub plan: PlacementPlan,
    /// Size of the kernel file in bytes.
    pub file_size: u64,
    /// Whether the image was linked to start at physical address 0.
    pub links_at_null: bool,
}

/// Copy every segment's file bytes to `destination + slide`.
///
/// Returns the relocated entry point.
///
/// # Errors
/// [`ElfLoaderError::SegmentOutsidePlan`] if a relocated segment does not fit
/// the reservation described by `plan`.
pub fn materialize<A>(
    alloc: &mut A,
    image: &ImageDescriptor,
    bytes: &[u8],
    plan: &PlacementPlan,
) -> Result<VirtualAddress, ElfLoaderError>
where
    A: PageAllocator + ?Sized,
{
    for (index, segment) in image.segments().iter().enumerate() {
        let destination = plan.relocate(segment.destination);
        if !plan.contains(destination, segment.memory_size) {
            return Err(ElfLoaderError::SegmentOutsidePlan { index, destination });
        }

        // The parser checked both ranges against the file.
        #[allow(clippy::cast_possible_truncation)]
        let (offset, len) = (segment.source_offset as usize, segment.source_size as usize);
        trace!(
            "Segment {index} [{}]: {len} bytes to {destination} ({} in memory)",
            segment.flags,
            segment.memory_size
        );
        if len == 0 {
            continue;
        }

        // SAFETY: `destination..destination + memory_size` lies within the
        // reservation, which was handed out by `alloc` and is not borrowed.
        let target = unsafe { alloc.memory_mut(destination, len) };
        target.copy_from_slice(&bytes[offset..offset + len]);
    }

    Ok(plan.relocate_entry(image.entry()))
}

/// Parse, place and copy the kernel in `file`.
///
/// With `randomize` set, a fresh entropy-chain run seeds the placement
/// search. The file buffer is wiped before it is released, on success and
/// on error alike.
///
/// # Errors
/// Any [`ElfLoaderError`] from the stages above.
pub fn load_kernel<E>(env: &mut E, file: Vec<u8>, randomize: bool) -> Result<LoadedKernel, ElfLoaderError>
where
    E: PageAllocator + EntropyHardware + ?Sized,
{
    let file = WipeOnDrop::new(file);
    let image = ImageDescriptor::parse(&file)?;
    debug!(
        "Kernel image: {} loadable segment(s), physical {}..{}, entry {}",
        image.segments().len(),
        image.min_physical_address(),
        image.max_physical_address(),
        image.entry()
    );

    let seed = if randomize {
        Some(best_entropy(env))
    } else {
        info!("KASLR disabled by configuration");
        None
    };

    let plan = plan_placement(env, &image, seed)?;
    let entry = materialize(env, &image, &file, &plan)?;
    info!("Kernel entry point at {entry}");

    Ok(LoadedKernel {
        entry,
        plan,
        file_size: file.len() as u64,
        links_at_null: image.links_at_null(),
    })
}
