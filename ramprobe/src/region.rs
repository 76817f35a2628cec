//! Test region
//!
//! An owned, page-aligned, zero-filled block of memory that the walk
//! generators hand out offsets into. Sizes are always powers of two, so an
//! offset can be wrapped with a simple mask.

// Imports
use {
	anyhow::Context,
	std::{alloc, ptr},
};

/// Page size the walks are built around
pub const PAGE_SIZE: usize = 4096;

/// Minimum workable region size, in bytes
pub const MIN_REGION_SIZE: usize = PAGE_SIZE;

/// Returns the largest power of two that fits within `size`.
///
/// Returns `size` unchanged when it is already a power of two, and `0` when
/// `size` is `0`.
pub fn size_rounded_down(size: usize) -> usize {
	// Smear the highest set bit downwards, then keep only the highest bit
	let mut mask = size;
	let mut shift = 1;
	while shift < usize::BITS as usize && mask >> shift != 0 {
		mask |= mask >> shift;
		shift <<= 1;
	}

	mask - (mask >> 1)
}

/// Memory region under test
#[derive(Debug)]
pub struct Region {
	/// Region base
	base: ptr::NonNull<u8>,

	/// Region size (power of two, at least [`MIN_REGION_SIZE`])
	size: usize,

	/// Allocation layout
	layout: alloc::Layout,
}

// SAFETY: The region is an exclusively owned allocation; all access
//         coordination is up to the owner.
unsafe impl Send for Region {}
unsafe impl Sync for Region {}

impl Region {
	/// Allocates a region of the largest power of two within `requested` bytes.
	///
	/// The region is zero-filled and every page is touched so it is physically
	/// backed before any measurement starts.
	pub fn new(requested: usize, huge_pages: bool) -> Result<Self, anyhow::Error> {
		let size = self::size_rounded_down(requested);
		anyhow::ensure!(
			size >= MIN_REGION_SIZE,
			"Region size {requested} is below the minimum of {MIN_REGION_SIZE} bytes"
		);

		// Note: The large alignment keeps the area away from allocator
		//       metadata boundaries.
		let align = usize::max(PAGE_SIZE, size / 4);
		let layout = alloc::Layout::from_size_align(size, align).context("Unable to compute region layout")?;

		// SAFETY: `layout` has a non-zero size.
		let base = unsafe { alloc::alloc_zeroed(layout) };
		let base = ptr::NonNull::new(base).with_context(|| format!("Unable to allocate a {size} byte region"))?;

		let region = Self { base, size, layout };
		region.advise(huge_pages);
		region.touch();
		tracing::debug!(size, align, huge_pages, "Allocated region");

		Ok(region)
	}

	/// Returns the region size
	pub fn size(&self) -> usize {
		self.size
	}

	/// Returns the region offset mask, `size - 1`
	pub fn mask(&self) -> usize {
		self.size - 1
	}

	/// Returns the region base pointer
	pub fn as_ptr(&self) -> *const u8 {
		self.base.as_ptr()
	}

	/// Advises the kernel on how to back this region.
	#[cfg(target_os = "linux")]
	fn advise(&self, huge_pages: bool) {
		// Note: Advice is best-effort, failures are only logged.
		// SAFETY: The range is owned by us and page-aligned.
		unsafe {
			if libc::madvise(self.base.as_ptr().cast(), self.size, libc::MADV_DONTDUMP) != 0 {
				tracing::debug!("Unable to advise `MADV_DONTDUMP`");
			}

			let advice = match huge_pages {
				true => libc::MADV_HUGEPAGE,
				false => libc::MADV_NOHUGEPAGE,
			};
			if libc::madvise(self.base.as_ptr().cast(), self.size, advice) != 0 {
				tracing::debug!(huge_pages, "Unable to advise huge page usage");
			}
		}
	}

	#[cfg(not(target_os = "linux"))]
	fn advise(&self, _huge_pages: bool) {}

	/// Touches every page so the region is physically backed.
	fn touch(&self) {
		for offset in (0..self.size).step_by(PAGE_SIZE) {
			// SAFETY: `offset` is within the allocation.
			// Note: Volatile so the writes aren't elided as redundant zeroing.
			unsafe { self.base.as_ptr().add(offset).write_volatile(0) };
		}
	}
}

impl Drop for Region {
	fn drop(&mut self) {
		// SAFETY: `base` was allocated with `layout`.
		unsafe { alloc::dealloc(self.base.as_ptr(), self.layout) };
	}
}

#[cfg(test)]
mod tests {
	// Imports
	use super::*;

	#[test]
	fn rounds_down_to_power_of_two() {
		assert_eq!(size_rounded_down(5000), 4096);
		assert_eq!(size_rounded_down(4096), 4096);
		assert_eq!(size_rounded_down(4095), 2048);
		assert_eq!(size_rounded_down(usize::MAX), 1 << (usize::BITS - 1));
		assert_eq!(size_rounded_down(1), 1);
		assert_eq!(size_rounded_down(0), 0);
	}

	#[test]
	fn allocates_rounded_and_aligned() {
		let region = Region::new(5000, false).expect("Unable to allocate region");
		assert_eq!(region.size(), 4096);
		assert_eq!(region.mask(), 4095);
		assert_eq!(region.as_ptr() as usize % PAGE_SIZE, 0);
	}

	#[test]
	fn zero_filled() {
		let region = Region::new(8192, false).expect("Unable to allocate region");
		for offset in (0..region.size()).step_by(512) {
			// SAFETY: `offset` is within the region.
			let value = unsafe { region.as_ptr().add(offset).read() };
			assert_eq!(value, 0);
		}
	}

	#[test]
	fn rejects_undersized() {
		assert!(Region::new(0, false).is_err());
		assert!(Region::new(4095, false).is_err());
	}
}
