//! # Kernel Address Space Layout Randomization
//!
//! Picks the physical base the kernel image is loaded at. With a usable seed
//! the planner draws up to [`KASLR_ATTEMPTS`] 2 MiB aligned candidates from
//! `[KASLR_WINDOW_START, KASLR_WINDOW_END - image_size)` and asks the
//! firmware for each one in turn. If none is accepted, or randomization is
//! off, the image goes to its linked base instead.
//!
//! Whatever base is chosen, the whole reserved range is zeroed before the
//! planner returns, so segment tails (`.bss`) and the gaps between segments
//! never carry stale memory into the kernel.

use crate::addresses::{PageSize, PhysicalAddress, Size2M, Size4K, VirtualAddress};
use crate::elf::parser::ImageDescriptor;
use crate::entropy::EntropySeed;
use crate::firmware::PageAllocator;
use log::{debug, info, warn};

/// Candidates tried before falling back to the linked base.
pub const KASLR_ATTEMPTS: usize = 64;

/// Lowest randomized base; keeps the low 2 MiB (real-mode area, legacy
/// regions) untouched.
pub const KASLR_WINDOW_START: u64 = 2 * 1024 * 1024;

/// Exclusive upper bound for the end of a randomized image.
pub const KASLR_WINDOW_END: u64 = 1024 * 1024 * 1024;

const LCG_MULTIPLIER: u64 = 6_364_136_223_846_793_005;
const LCG_INCREMENT: u64 = 1;

#[derive(Debug, Copy, Clone, Eq, PartialEq, thiserror::Error)]
pub enum PlacementError {
    #[error("could not allocate {pages} pages at the fixed base {base}")]
    FixedAllocation { base: PhysicalAddress, pages: u64 },
    #[error("an image of {pages} pages cannot be addressed")]
    ImageTooLarge { pages: u64 },
    #[error("an image linked at physical 0 cannot be placed at its linked base")]
    NullBase { pages: u64 },
}

/// Where the image ended up.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct PlacementPlan {
    /// First byte of the reserved range.
    pub load_base: PhysicalAddress,
    /// Page floor of the image's lowest linked address.
    pub base_offset: PhysicalAddress,
    /// Size of the reservation in 4 KiB pages.
    pub total_pages: u64,
    /// Whether `load_base` came from the randomized search.
    pub randomized: bool,
}

impl PlacementPlan {
    /// Distance between the chosen and the linked base, as a two's-complement
    /// `u64`. Zero for fixed placements.
    #[must_use]
    pub const fn slide(&self) -> u64 {
        self.load_base.as_u64().wrapping_sub(self.base_offset.as_u64())
    }

    /// Size of the reservation in bytes.
    #[must_use]
    pub const fn size_bytes(&self) -> u64 {
        self.total_pages * Size4K::SIZE
    }

    /// Apply the slide to a linked physical address.
    #[must_use]
    pub const fn relocate(&self, linked: PhysicalAddress) -> PhysicalAddress {
        linked.wrapping_add(self.slide())
    }

    /// Apply the slide to the linked entry point.
    #[must_use]
    pub const fn relocate_entry(&self, linked: VirtualAddress) -> VirtualAddress {
        linked.wrapping_add(self.slide())
    }

    /// Whether `[address, address + len)` lies inside the reservation.
    #[must_use]
    pub fn contains(&self, address: PhysicalAddress, len: u64) -> bool {
        let Some(start) = address.offset_from(self.load_base) else {
            return false;
        };
        start
            .checked_add(len)
            .is_some_and(|end| end <= self.size_bytes())
    }
}

/// Map one generator state onto a 2 MiB aligned base inside the window.
///
/// Returns `None` when an image of `image_size` bytes does not fit the
/// window at all.
#[must_use]
pub const fn candidate_base(state: u64, image_size: u64) -> Option<PhysicalAddress> {
    let Some(limit) = KASLR_WINDOW_END.checked_sub(image_size) else {
        return None;
    };
    let Some(span) = limit.checked_sub(KASLR_WINDOW_START) else {
        return None;
    };
    if span == 0 {
        return None;
    }
    let candidate = PhysicalAddress::new(KASLR_WINDOW_START + state % span);
    Some(candidate.align_down::<Size2M>())
}

/// The bounded sequence of randomized candidates derived from one seed.
#[derive(Debug, Clone)]
pub struct CandidateSequence {
    state: u64,
    image_size: u64,
    remaining: usize,
}

impl CandidateSequence {
    #[must_use]
    pub const fn new(seed: u64, image_size: u64) -> Self {
        Self {
            state: seed,
            image_size,
            remaining: KASLR_ATTEMPTS,
        }
    }
}

impl Iterator for CandidateSequence {
    type Item = PhysicalAddress;

    fn next(&mut self) -> Option<Self::Item> {
        if self.remaining == 0 {
            return None;
        }
        self.remaining -= 1;
        self.state = self
            .state
            .wrapping_mul(LCG_MULTIPLIER)
            .wrapping_add(LCG_INCREMENT);
        let candidate = candidate_base(self.state, self.image_size);
        if candidate.is_none() {
            self.remaining = 0;
        }
        candidate
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (0, Some(self.remaining))
    }
}

/// Reserve memory for `image` and zero it.
///
/// `seed` is `None` when randomization is disabled. A seed of zero counts as
/// no entropy.
///
/// # Errors
/// [`PlacementError::FixedAllocation`] if the fallback allocation at the
/// linked base is rejected, [`PlacementError::NullBase`] if that base is
/// physical page 0, which the firmware never hands out.
pub fn plan_placement<A>(
    alloc: &mut A,
    image: &ImageDescriptor,
    seed: Option<EntropySeed>,
) -> Result<PlacementPlan, PlacementError>
where
    A: PageAllocator + ?Sized,
{
    let base_offset = image.base_offset();
    let total_pages = image.total_pages();
    let image_size = total_pages
        .checked_mul(Size4K::SIZE)
        .ok_or(PlacementError::ImageTooLarge { pages: total_pages })?;

    let randomized = match seed {
        Some(seed) if seed.is_usable() => {
            debug!(
                "KASLR seed from {:?}, image spans {total_pages} pages",
                seed.provenance
            );
            try_randomized(alloc, seed.value, image_size, total_pages)
        }
        Some(_) => {
            warn!("KASLR: no entropy available, using fixed base");
            None
        }
        None => None,
    };

    let plan = if let Some(load_base) = randomized {
        PlacementPlan {
            load_base,
            base_offset,
            total_pages,
            randomized: true,
        }
    } else {
        if base_offset.is_null() {
            return Err(PlacementError::NullBase { pages: total_pages });
        }
        let load_base = alloc
            .allocate_at(base_offset, total_pages)
            .map_err(|_| PlacementError::FixedAllocation {
                base: base_offset,
                pages: total_pages,
            })?;
        PlacementPlan {
            load_base,
            base_offset,
            total_pages,
            randomized: false,
        }
    };

    zero_reservation(alloc, &plan)?;

    if plan.randomized {
        info!(
            "KASLR: kernel at {} (slide {:+} bytes)",
            plan.load_base,
            plan.slide().cast_signed()
        );
    } else {
        info!("Kernel at fixed base {}", plan.load_base);
    }
    Ok(plan)
}

fn try_randomized<A>(
    alloc: &mut A,
    seed: u64,
    image_size: u64,
    total_pages: u64,
) -> Option<PhysicalAddress>
where
    A: PageAllocator + ?Sized,
{
    let mut attempts = 0usize;
    for candidate in CandidateSequence::new(seed, image_size) {
        attempts += 1;
        if let Ok(base) = alloc.allocate_at(candidate, total_pages) {
            debug!("KASLR candidate {candidate} accepted after {attempts} attempt(s)");
            return Some(base);
        }
    }

    if attempts == 0 {
        warn!("KASLR: image of {image_size} bytes does not fit the window, using fixed base");
    } else {
        warn!("KASLR: no free slot after {attempts} attempts, using fixed base");
    }
    None
}

fn zero_reservation<A>(alloc: &mut A, plan: &PlacementPlan) -> Result<(), PlacementError>
where
    A: PageAllocator + ?Sized,
{
    let len = usize::try_from(plan.size_bytes()).map_err(|_| PlacementError::ImageTooLarge {
        pages: plan.total_pages,
    })?;
    // SAFETY: The range was just handed out by the allocator and is not
    // borrowed anywhere else.
    let memory = unsafe { alloc.memory_mut(plan.load_base, len) };
    memory.fill(0);
    Ok(())
}
