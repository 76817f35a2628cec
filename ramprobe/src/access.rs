//! Memory access primitives
//!
//! A single dispatch table maps an access width to a read function, so the
//! timed loops are generic over widths and implementations. Each read returns
//! a value derived from the loaded bytes, letting the caller chain dependent
//! loads.

// Imports
use {
	anyhow::Context,
	std::{hint, mem, ptr},
};

/// Access width of a single read
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[derive(serde::Serialize, serde::Deserialize)]
pub enum AccessWidth {
	/// 1 byte
	B1,

	/// 2 bytes
	B2,

	/// 4 bytes
	B4,

	/// 8 bytes
	B8,

	/// 16 bytes
	B16,

	/// 32 bytes
	B32,

	/// 64 bytes
	B64,
}

impl AccessWidth {
	/// All widths, narrowest first
	pub const ALL: [Self; 7] = [
		Self::B1,
		Self::B2,
		Self::B4,
		Self::B8,
		Self::B16,
		Self::B32,
		Self::B64,
	];

	/// Returns the width in bytes
	pub const fn bytes(self) -> usize {
		match self {
			Self::B1 => 1,
			Self::B2 => 2,
			Self::B4 => 4,
			Self::B8 => 8,
			Self::B16 => 16,
			Self::B32 => 32,
			Self::B64 => 64,
		}
	}

	/// Returns the platform's native pointer width
	pub const fn native() -> Self {
		match mem::size_of::<usize>() {
			4 => Self::B4,
			_ => Self::B8,
		}
	}

	/// Returns the width for `bytes` bytes
	pub fn from_bytes(bytes: usize) -> Result<Self, anyhow::Error> {
		Self::ALL
			.into_iter()
			.find(|width| width.bytes() == bytes)
			.with_context(|| format!("Unsupported access width: {bytes} bytes"))
	}

	/// Table index of this width
	const fn idx(self) -> usize {
		match self {
			Self::B1 => 0,
			Self::B2 => 1,
			Self::B4 => 2,
			Self::B8 => 3,
			Self::B16 => 4,
			Self::B32 => 5,
			Self::B64 => 6,
		}
	}
}

/// A single read of a fixed width.
///
/// # Safety
/// The pointer must be valid for reads of the function's width, and aligned
/// to it.
pub type ReadFn = unsafe fn(*const u8) -> u64;

/// Read implementation selection
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ImplKind {
	/// Best implementation the host supports
	Auto,

	/// Portable scalar reads
	Generic,

	/// 128-bit vector reads
	Sse,

	/// 256-bit vector reads
	Avx,
}

impl ImplKind {
	/// Returns the best implementation the host supports
	pub fn detect() -> Self {
		#[cfg(target_arch = "x86_64")]
		{
			if std::arch::is_x86_feature_detected!("avx") {
				return Self::Avx;
			}
			if std::arch::is_x86_feature_detected!("sse4.1") {
				return Self::Sse;
			}
		}

		Self::Generic
	}
}

/// Width-indexed read dispatch table
#[derive(Clone, Copy, Debug)]
pub struct Dispatch {
	/// Read functions, indexed by [`AccessWidth::idx`]
	fns: [ReadFn; 7],
}

impl Dispatch {
	/// Builds the dispatch table for `kind`.
	///
	/// Returns an error if the host doesn't support the requested
	/// implementation.
	pub fn select(kind: ImplKind) -> Result<Self, anyhow::Error> {
		let kind = match kind {
			ImplKind::Auto => ImplKind::detect(),
			kind => kind,
		};

		let mut fns: [ReadFn; 7] = [
			generic::read1,
			generic::read2,
			generic::read4,
			generic::read8,
			generic::read16,
			generic::read32,
			generic::read64,
		];

		#[cfg(target_arch = "x86_64")]
		match kind {
			ImplKind::Auto | ImplKind::Generic => (),
			ImplKind::Sse => {
				anyhow::ensure!(
					std::arch::is_x86_feature_detected!("sse4.1"),
					"Host doesn't support sse4.1"
				);
				fns[AccessWidth::B8.idx()] = x86::read8_sse;
				fns[AccessWidth::B16.idx()] = x86::read16_sse;
				fns[AccessWidth::B32.idx()] = x86::read32_sse;
				fns[AccessWidth::B64.idx()] = x86::read64_sse;
			},
			ImplKind::Avx => {
				anyhow::ensure!(std::arch::is_x86_feature_detected!("avx"), "Host doesn't support avx");
				fns[AccessWidth::B8.idx()] = x86::read8_sse;
				fns[AccessWidth::B16.idx()] = x86::read16_sse;
				fns[AccessWidth::B32.idx()] = x86::read32_avx;
				fns[AccessWidth::B64.idx()] = x86::read64_avx;
			},
		}

		#[cfg(not(target_arch = "x86_64"))]
		match kind {
			ImplKind::Auto | ImplKind::Generic => (),
			ImplKind::Sse | ImplKind::Avx =>
				anyhow::bail!("Vector implementation {kind:?} is only available on x86_64"),
		}

		Ok(Self { fns })
	}

	/// Returns the read function for `width`
	pub fn reader(&self, width: AccessWidth) -> ReadFn {
		self.fns[width.idx()]
	}
}

/// Portable scalar reads
mod generic {
	// Imports
	use super::*;

	/// Reads `N` bytes at `ptr` as 8-byte lanes, folding them into one value.
	///
	/// # Safety
	/// `ptr` must be valid for `N` byte reads and 8-byte aligned.
	#[inline]
	unsafe fn read_lanes<const N: usize>(ptr: *const u8) -> u64 {
		let mut value = 0;
		for lane in 0..N / 8 {
			// SAFETY: Within the caller's guaranteed range.
			value |= unsafe { ptr::read_volatile(ptr.cast::<u64>().add(lane)) };
		}
		hint::black_box(value)
	}

	pub unsafe fn read1(ptr: *const u8) -> u64 {
		// SAFETY: Caller guarantees validity.
		hint::black_box(unsafe { ptr::read_volatile(ptr) } as u64)
	}

	pub unsafe fn read2(ptr: *const u8) -> u64 {
		// SAFETY: Caller guarantees validity and alignment.
		hint::black_box(unsafe { ptr::read_volatile(ptr.cast::<u16>()) } as u64)
	}

	pub unsafe fn read4(ptr: *const u8) -> u64 {
		// SAFETY: Caller guarantees validity and alignment.
		hint::black_box(unsafe { ptr::read_volatile(ptr.cast::<u32>()) } as u64)
	}

	pub unsafe fn read8(ptr: *const u8) -> u64 {
		// SAFETY: Caller guarantees validity and alignment.
		hint::black_box(unsafe { ptr::read_volatile(ptr.cast::<u64>()) })
	}

	pub unsafe fn read16(ptr: *const u8) -> u64 {
		// SAFETY: Caller guarantees validity and alignment.
		unsafe { read_lanes::<16>(ptr) }
	}

	pub unsafe fn read32(ptr: *const u8) -> u64 {
		// SAFETY: Caller guarantees validity and alignment.
		unsafe { read_lanes::<32>(ptr) }
	}

	pub unsafe fn read64(ptr: *const u8) -> u64 {
		// SAFETY: Caller guarantees validity and alignment.
		unsafe { read_lanes::<64>(ptr) }
	}
}

/// x86_64 vector reads.
///
/// The `#[target_feature]` functions are wrapped by plain `unsafe fn`s so
/// they coerce to [`ReadFn`]. [`Dispatch::select`] verifies feature support
/// before handing any of these out.
#[cfg(target_arch = "x86_64")]
mod x86 {
	// Imports
	use std::{arch::x86_64 as arch, hint};

	#[target_feature(enable = "sse4.1")]
	unsafe fn load8(ptr: *const u8) -> u64 {
		// SAFETY: Caller guarantees validity and alignment.
		let value = unsafe { arch::_mm_loadl_epi64(ptr.cast()) };
		arch::_mm_cvtsi128_si64(value) as u64
	}

	#[target_feature(enable = "sse4.1")]
	unsafe fn load16(ptr: *const u8) -> u64 {
		// SAFETY: Caller guarantees validity and 16-byte alignment.
		let value = unsafe { arch::_mm_load_si128(ptr.cast()) };
		arch::_mm_cvtsi128_si64(value) as u64
	}

	#[target_feature(enable = "avx")]
	unsafe fn load32(ptr: *const u8) -> u64 {
		// SAFETY: Caller guarantees validity and 32-byte alignment.
		let value = unsafe { arch::_mm256_load_si256(ptr.cast()) };
		arch::_mm_cvtsi128_si64(arch::_mm256_castsi256_si128(value)) as u64
	}

	pub unsafe fn read8_sse(ptr: *const u8) -> u64 {
		// SAFETY: Caller guarantees validity; `select` verified sse4.1.
		hint::black_box(unsafe { load8(ptr) })
	}

	pub unsafe fn read16_sse(ptr: *const u8) -> u64 {
		// SAFETY: Caller guarantees validity; `select` verified sse4.1.
		hint::black_box(unsafe { load16(ptr) })
	}

	pub unsafe fn read32_sse(ptr: *const u8) -> u64 {
		// SAFETY: Caller guarantees validity; `select` verified sse4.1.
		hint::black_box(unsafe { load16(ptr) | load16(ptr.add(16)) })
	}

	pub unsafe fn read64_sse(ptr: *const u8) -> u64 {
		// SAFETY: Caller guarantees validity; `select` verified sse4.1.
		hint::black_box(unsafe { load16(ptr) | load16(ptr.add(16)) | load16(ptr.add(32)) | load16(ptr.add(48)) })
	}

	pub unsafe fn read32_avx(ptr: *const u8) -> u64 {
		// SAFETY: Caller guarantees validity; `select` verified avx.
		hint::black_box(unsafe { load32(ptr) })
	}

	pub unsafe fn read64_avx(ptr: *const u8) -> u64 {
		// SAFETY: Caller guarantees validity; `select` verified avx.
		hint::black_box(unsafe { load32(ptr) | load32(ptr.add(32)) })
	}
}
