//! Address-walk generator
//!
//! Produces the deterministic, order-scrambled offset sequences the timed
//! loops read from. The outer walk jumps between pages by a fixed
//! prime-multiple stride; inside each page a fixed scrambled pattern visits
//! every granularity-aligned slot. One full pass touches every slot of the
//! covered range exactly once, while consecutive accesses stay far apart so
//! no streaming prefetcher can follow them.

// Imports
use crate::region::{MIN_REGION_SIZE, PAGE_SIZE};

/// Prime page-stride multiplier.
///
/// Coprime with every power-of-two page count, so the masked accumulator
/// enumerates all pages before repeating.
pub const STRIDE_PAGES: usize = 257;

/// Accumulator advance per page step
pub const STRIDE: usize = STRIDE_PAGES * PAGE_SIZE;

/// In-page slot size
const SLOT_SIZE: usize = 64;

/// Scrambled slot offsets within a 512-byte block
const SUB_OFFSETS: [usize; 8] = [0, 256, 128, 384, 320, 64, 192, 448];

/// Kilobyte-block bases within a page
const BLOCK_OFFSETS: [usize; 4] = [0, 1024, 2048, 3072];

/// Full-period page walk.
///
/// Advancing the accumulator by [`STRIDE`] and masking visits every page of
/// the covered range exactly once per `size / PAGE_SIZE` steps, in a
/// scattered order.
#[derive(Clone, Debug)]
pub struct PageWalk {
	/// Stride accumulator
	acc: usize,

	/// Page-aligned offset mask
	mask: usize,
}

impl PageWalk {
	/// Creates a page walk over `size` bytes.
	///
	/// `size` must be a power of two of at least one page.
	pub fn new(size: usize) -> Self {
		Self {
			acc:  0,
			mask: (size - 1) & !(PAGE_SIZE - 1),
		}
	}

	/// Returns the next page base offset
	#[inline]
	pub fn advance(&mut self) -> usize {
		self.acc = self.acc.wrapping_add(STRIDE);
		self.acc & self.mask
	}

	/// Folds a loaded value into the accumulator.
	///
	/// Serializes dependent loads: the next page base cannot be computed
	/// before `value` is available. The region is zero-filled, so at run time
	/// this never changes the emitted sequence.
	#[inline]
	pub fn inject(&mut self, value: u64) {
		self.acc = self.acc.wrapping_add((value & 1) as usize * PAGE_SIZE);
	}
}

/// Stream selection for a walk
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Stream {
	/// One stream covering the whole region
	Single,

	/// Two streams, half the region apart.
	///
	/// The walk covers the lower half of the region and every offset is
	/// mirrored by `offset ^ (size / 2)`, so the two streams together tile
	/// the region with no overlap.
	Dual,
}

/// Offset walk at a fixed access granularity
#[derive(Clone, Debug)]
pub struct Walk {
	/// Page walk over the covered range
	pages: PageWalk,

	/// Scrambled in-page offsets, one per granule
	pattern: Vec<u32>,

	/// Next pattern index
	idx: usize,

	/// Current page base
	page: usize,

	/// Covered range, in bytes
	covered: usize,

	/// Granularity, in bytes
	granularity: usize,

	/// Dual-stream mirror distance (`0` for single streams)
	mirror: usize,
}

impl Walk {
	/// Creates a walk over a region of `size` bytes at `granularity`.
	///
	/// All validation happens here, before any timed loop can start.
	pub fn new(size: usize, granularity: usize, stream: Stream) -> Result<Self, anyhow::Error> {
		anyhow::ensure!(size.is_power_of_two(), "Region size {size} isn't a power of two");
		anyhow::ensure!(
			granularity.is_power_of_two(),
			"Access granularity {granularity} isn't a power of two"
		);
		anyhow::ensure!(
			granularity <= SLOT_SIZE,
			"Access granularity {granularity} is above the maximum of {SLOT_SIZE} bytes"
		);

		// Each stream must cover at least one page worth of distinct slots,
		// else offsets would alias within a pass.
		let covered = match stream {
			Stream::Single => size,
			Stream::Dual => size / 2,
		};
		anyhow::ensure!(
			covered >= MIN_REGION_SIZE && granularity * (PAGE_SIZE / SLOT_SIZE) <= covered,
			"Region size {size} is too small for granularity {granularity} with {stream:?} streams"
		);

		// Build the in-page pattern: scrambled 64-byte slots, each expanded
		// into its granules. The slot order is the one the original
		// `[0, 256, 128, ..]` jumps produce, interleaving the two halves of
		// every kilobyte block.
		let mut pattern = Vec::with_capacity(PAGE_SIZE / granularity);
		for block in BLOCK_OFFSETS {
			for sub in SUB_OFFSETS {
				for half in [0, 512] {
					let slot = block + sub + half;
					for granule in (slot..slot + SLOT_SIZE).step_by(granularity) {
						pattern.push(granule as u32);
					}
				}
			}
		}

		Ok(Self {
			pages: PageWalk::new(covered),
			pattern,
			idx: 0,
			page: 0,
			covered,
			granularity,
			mirror: match stream {
				Stream::Single => 0,
				Stream::Dual => size / 2,
			},
		})
	}

	/// Returns the next offset.
	///
	/// Never exhausts; one full pass is [`Self::steps_per_pass`] offsets long
	/// and visits every granularity-aligned slot of the covered range exactly
	/// once.
	#[inline]
	pub fn next_offset(&mut self) -> usize {
		if self.idx == 0 {
			self.page = self.pages.advance();
		}

		let offset = self.page + self.pattern[self.idx] as usize;
		self.idx += 1;
		if self.idx == self.pattern.len() {
			self.idx = 0;
		}

		offset
	}

	/// Returns the dual-stream mirror of `offset`.
	///
	/// The identity for single-stream walks.
	#[inline]
	pub fn mirror(&self, offset: usize) -> usize {
		offset ^ self.mirror
	}

	/// Folds a loaded value into the page accumulator, serializing dependent loads
	#[inline]
	pub fn inject(&mut self, value: u64) {
		self.pages.inject(value);
	}

	/// Whether this walk drives two streams
	pub fn is_dual(&self) -> bool {
		self.mirror != 0
	}

	/// Reads performed per emitted offset
	pub fn accesses_per_step(&self) -> u64 {
		match self.is_dual() {
			true => 2,
			false => 1,
		}
	}

	/// Number of offsets in one full pass over the covered range
	pub fn steps_per_pass(&self) -> usize {
		self.covered / self.granularity
	}

	/// Total region span reached by all streams, in bytes
	pub fn span(&self) -> usize {
		self.covered + self.mirror
	}

	/// Access granularity, in bytes
	pub fn granularity(&self) -> usize {
		self.granularity
	}
}

impl Iterator for Walk {
	type Item = usize;

	#[inline]
	fn next(&mut self) -> Option<usize> {
		Some(self.next_offset())
	}
}

#[cfg(test)]
mod tests {
	// Imports
	use super::*;

	#[test]
	fn full_coverage() {
		for (size, granularity) in [(4096, 1), (4096, 64), (16384, 4), (1 << 20, 8)] {
			let mut walk = Walk::new(size, granularity, Stream::Single).expect("Unable to create walk");

			let slots = size / granularity;
			let mut visited = vec![false; slots];
			for _ in 0..slots {
				let offset = walk.next_offset();
				assert_eq!(offset % granularity, 0, "offset {offset} is misaligned");
				assert!(!visited[offset / granularity], "offset {offset} was visited twice");
				visited[offset / granularity] = true;
			}

			assert!(visited.iter().all(|&slot| slot), "some slots were never visited");
		}
	}

	#[test]
	fn page_walk_period() {
		let size = 1 << 20;
		let period = size / PAGE_SIZE;

		let mut walk = PageWalk::new(size);
		let first = (0..period).map(|_| walk.advance()).collect::<Vec<_>>();
		let second = (0..period).map(|_| walk.advance()).collect::<Vec<_>>();
		assert_eq!(first, second, "walk did not repeat after one period");

		let mut pages = first;
		pages.sort_unstable();
		pages.dedup();
		assert_eq!(pages.len(), period, "walk repeated a page within one period");
	}

	#[test]
	fn consecutive_pages_are_far_apart() {
		let size = 1 << 20;
		let mut walk = PageWalk::new(size);

		let mut prev = walk.advance();
		for _ in 0..1000 {
			let cur = walk.advance();
			assert!(prev.abs_diff(cur) >= PAGE_SIZE, "consecutive pages are adjacent");
			prev = cur;
		}
	}

	#[test]
	fn dual_mirror() {
		let size = 1 << 16;
		let granularity = 8;
		let mut walk = Walk::new(size, granularity, Stream::Dual).expect("Unable to create walk");

		let mut visited = vec![false; size / granularity];
		for _ in 0..walk.steps_per_pass() {
			let offset = walk.next_offset();
			let paired = walk.mirror(offset);
			assert_eq!(paired.abs_diff(offset), size / 2, "mirror isn't half the region away");

			for offset in [offset, paired] {
				assert!(!visited[offset / granularity], "offset {offset} was visited twice");
				visited[offset / granularity] = true;
			}
		}

		assert!(
			visited.iter().all(|&slot| slot),
			"the two streams did not tile the region"
		);
	}

	#[test]
	fn deterministic() {
		let mut lhs = Walk::new(1 << 20, 8, Stream::Single).expect("Unable to create walk");
		let mut rhs = lhs.clone();

		for _ in 0..10_000 {
			assert_eq!(lhs.next_offset(), rhs.next_offset());
		}
	}

	#[test]
	fn rejects_invalid_configurations() {
		// Non-power-of-two granularity / region
		assert!(Walk::new(4096, 3, Stream::Single).is_err());
		assert!(Walk::new(6000, 8, Stream::Single).is_err());

		// Granularity above the slot size
		assert!(Walk::new(4096, 128, Stream::Single).is_err());

		// Regions too small for the stream count
		assert!(Walk::new(2048, 8, Stream::Single).is_err());
		assert!(Walk::new(4096, 8, Stream::Dual).is_err());

		// Smallest valid configurations
		assert!(Walk::new(4096, 64, Stream::Single).is_ok());
		assert!(Walk::new(8192, 64, Stream::Dual).is_ok());
	}
}
