//! Probes
//!
//! The timed access loop, and the two drivers built on it: a latency sweep
//! over region sizes and access widths, and a multi-threaded bandwidth run
//! at a single size.

// Imports
use {
	crate::{
		access::{AccessWidth, Dispatch, ReadFn},
		region::{self, Region, MIN_REGION_SIZE},
		sample::{Clock, Sample, SampleConfig, Sampler, StopFlag, Timer},
		walk::{Stream, Walk},
	},
	anyhow::Context,
	std::{
		hint,
		sync::atomic::{AtomicBool, AtomicUsize, Ordering},
		thread,
		time::Duration,
	},
};

/// Accesses per round of the timed loop.
///
/// The stop flag is only checked once per round, so this bounds how much a
/// sample can overrun its deadline.
pub const ACCESSES_PER_ROUND: u64 = 65536;

/// Runs rounds of [`ACCESSES_PER_ROUND`] accesses until `flag` is raised,
/// returning the number of completed rounds.
///
/// Every loaded value is folded back into the walk, so each access depends
/// on the previous one having completed.
pub fn run_rounds(region: &Region, walk: &mut Walk, read: ReadFn, flag: &StopFlag) -> u64 {
	assert!(walk.span() <= region.size(), "walk exceeds the region");

	let base = region.as_ptr();
	let steps = ACCESSES_PER_ROUND / walk.accesses_per_step();

	let mut rounds = 0;
	match walk.is_dual() {
		false =>
			while !flag.is_set() {
				for _ in 0..steps {
					let offset = walk.next_offset();
					// SAFETY: Walk offsets are within the region and aligned
					//         to the access granularity.
					let value = unsafe { read(base.add(offset)) };
					walk.inject(value);
				}
				rounds += 1;
			},
		true =>
			while !flag.is_set() {
				for _ in 0..steps {
					let offset = walk.next_offset();
					// SAFETY: Both stream offsets are within the region and
					//         aligned to the access granularity.
					let value = unsafe { read(base.add(offset)) | read(base.add(walk.mirror(offset))) };
					walk.inject(value);
				}
				rounds += 1;
			},
	}

	rounds
}

/// Probe configuration
#[derive(Clone, Debug)]
pub struct ProbeConfig {
	/// Duration of each sample
	pub duration: Duration,

	/// Samples per measurement
	pub samples: usize,

	/// Whether to run a discarded warm-up sample per measurement
	pub slow_start: bool,

	/// Maximum region size, in bytes
	pub max_size: usize,

	/// Access widths to measure
	pub widths: Vec<AccessWidth>,

	/// Stream selection
	pub stream: Stream,

	/// Read dispatch table
	pub dispatch: Dispatch,

	/// Whether to request huge page backing
	pub huge_pages: bool,
}

impl ProbeConfig {
	/// Sampling configuration for this probe
	fn sample_config(&self) -> SampleConfig {
		SampleConfig {
			duration:           self.duration,
			count:              self.samples,
			slow_start:         self.slow_start,
			accesses_per_round: ACCESSES_PER_ROUND,
		}
	}

	/// Smallest region size this probe can measure
	fn min_size(&self) -> usize {
		match self.stream {
			Stream::Single => MIN_REGION_SIZE,
			Stream::Dual => 2 * MIN_REGION_SIZE,
		}
	}
}

/// Measurement of one width at one size
#[derive(Clone, Debug)]
pub struct Cell {
	/// Access width
	pub width: AccessWidth,

	/// Samples taken
	pub samples: Vec<Sample>,
}

/// All measurements at one region size
#[derive(Clone, Debug)]
pub struct Row {
	/// Region size, in bytes
	pub size: usize,

	/// Per-width measurements
	pub cells: Vec<Cell>,
}

/// Runs a latency sweep: every width of `config.widths`, at every
/// power-of-two size from the minimum up to `config.max_size`.
///
/// The region is allocated once at the maximum size; smaller sizes reuse its
/// lower part.
pub fn latency_probe<C: Clock, T: Timer>(
	sampler: &mut Sampler<C, T>,
	config: &ProbeConfig,
) -> Result<Vec<Row>, anyhow::Error> {
	anyhow::ensure!(!config.widths.is_empty(), "No access widths selected");

	let region = Region::new(config.max_size, config.huge_pages).context("Unable to allocate region")?;
	anyhow::ensure!(
		region.size() >= config.min_size(),
		"Region size {} is too small for {:?} streams",
		region.size(),
		config.stream,
	);
	let sample_config = config.sample_config();

	let mut rows = vec![];
	let mut size = config.min_size();
	while size <= region.size() {
		tracing::debug!(size, "Measuring");

		let mut cells = vec![];
		for &width in &config.widths {
			let mut walk = Walk::new(size, width.bytes(), config.stream)
				.with_context(|| format!("Unable to create walk for size {size}, width {width:?}"))?;
			let read = config.dispatch.reader(width);

			let samples = sampler
				.run(&sample_config, |flag| run_rounds(&region, &mut walk, read, flag))
				.with_context(|| format!("Unable to measure size {size}, width {width:?}"))?;
			cells.push(Cell { width, samples });
		}

		rows.push(Row { size, cells });
		size *= 2;
	}

	Ok(rows)
}

/// Runs a bandwidth measurement: `threads` workers, each reading its own
/// region at the widest configured width, all rounds summed.
pub fn bandwidth_probe<C: Clock, T: Timer>(
	sampler: &mut Sampler<C, T>,
	config: &ProbeConfig,
	threads: usize,
) -> Result<Vec<Row>, anyhow::Error> {
	anyhow::ensure!(threads >= 1, "Thread count must be at least 1");
	let width = config
		.widths
		.iter()
		.copied()
		.max_by_key(|width| width.bytes())
		.context("No access widths selected")?;

	let per_thread = region::size_rounded_down(config.max_size / threads);
	anyhow::ensure!(
		per_thread >= config.min_size(),
		"Size {} is too small to split across {threads} threads",
		config.max_size,
	);

	let regions = (0..threads)
		.map(|thread_idx| {
			Region::new(per_thread, config.huge_pages)
				.with_context(|| format!("Unable to allocate region for thread {thread_idx}"))
		})
		.collect::<Result<Vec<_>, _>>()?;
	let walk = Walk::new(per_thread, width.bytes(), config.stream)
		.with_context(|| format!("Unable to create walk for size {per_thread}, width {width:?}"))?;
	let mut walks = vec![walk; threads];
	let read = config.dispatch.reader(width);

	tracing::debug!(threads, per_thread, ?width, "Measuring bandwidth");
	let samples = sampler.run(&config.sample_config(), |flag| {
		// All workers spin until the last one is ready, so thread startup
		// stays out of the measured window as far as possible.
		let ready = AtomicUsize::new(0);
		let start = AtomicBool::new(false);

		thread::scope(|s| {
			let (ready, start) = (&ready, &start);
			let handles = regions
				.iter()
				.zip(&mut walks)
				.map(|(region, walk)| {
					s.spawn(move || {
						ready.fetch_add(1, Ordering::SeqCst);
						while !start.load(Ordering::Acquire) {
							hint::spin_loop();
						}

						run_rounds(region, walk, read, flag)
					})
				})
				.collect::<Vec<_>>();

			while ready.load(Ordering::SeqCst) < threads {
				hint::spin_loop();
			}
			start.store(true, Ordering::Release);

			// Note: A panicked worker contributes no rounds.
			handles
				.into_iter()
				.map(|handle| handle.join().unwrap_or(0))
				.sum::<u64>()
		})
	})?;

	Ok(vec![Row {
		size:  per_thread * threads,
		cells: vec![Cell { width, samples }],
	}])
}

#[cfg(test)]
mod tests {
	// Imports
	use {
		super::*,
		crate::{
			access::ImplKind,
			sample::{testing::*, AlarmTimer, SystemClock},
		},
	};

	fn config(max_size: usize, widths: Vec<AccessWidth>) -> ProbeConfig {
		ProbeConfig {
			duration: Duration::from_millis(20),
			samples: 1,
			slow_start: false,
			max_size,
			widths,
			stream: Stream::Single,
			dispatch: Dispatch::select(ImplKind::Generic).expect("Unable to select implementation"),
			huge_pages: false,
		}
	}

	#[test]
	fn run_rounds_counts_full_rounds() {
		let region = Region::new(1 << 16, false).expect("Unable to allocate region");
		let mut walk = Walk::new(region.size(), 8, Stream::Single).expect("Unable to create walk");
		let read = Dispatch::select(ImplKind::Generic)
			.expect("Unable to select implementation")
			.reader(AccessWidth::B8);

		// An already-raised flag stops before the first round
		let flag = StopFlag::new();
		flag.set();
		assert_eq!(run_rounds(&region, &mut walk, read, &flag), 0);
	}

	#[test]
	fn latency_probe_sweeps_sizes() {
		let mut sampler = Sampler::new(SystemClock::new(), AlarmTimer::new().expect("Unable to start timer"));
		let config = config(1 << 16, vec![AccessWidth::B4, AccessWidth::B8]);

		let rows = latency_probe(&mut sampler, &config).expect("Unable to run probe");

		// 4k up to 64k, doubling
		assert_eq!(rows.len(), 5);
		for (row_idx, row) in rows.iter().enumerate() {
			assert_eq!(row.size, MIN_REGION_SIZE << row_idx);
			assert_eq!(row.cells.len(), 2);
			for cell in &row.cells {
				assert_eq!(cell.samples.len(), 1);
				assert!(cell.samples[0].rate > 0, "no progress at size {}", row.size);
			}
		}
	}

	#[test]
	fn bandwidth_probe_sums_threads() {
		let mut sampler = Sampler::new(SystemClock::new(), AlarmTimer::new().expect("Unable to start timer"));
		let config = config(1 << 16, vec![AccessWidth::B8, AccessWidth::B64]);

		let rows = bandwidth_probe(&mut sampler, &config, 2).expect("Unable to run probe");

		assert_eq!(rows.len(), 1);
		assert_eq!(rows[0].size, 1 << 16);
		assert_eq!(rows[0].cells.len(), 1);
		assert_eq!(rows[0].cells[0].width, AccessWidth::B64);
		assert!(rows[0].cells[0].samples[0].rate > 0);
	}

	#[test]
	fn bandwidth_probe_rejects_oversplit() {
		let mut sampler = Sampler::new(MockClock::new(), MockTimer::new());
		let config = config(1 << 13, vec![AccessWidth::B8]);

		assert!(bandwidth_probe(&mut sampler, &config, 0).is_err());
		assert!(bandwidth_probe(&mut sampler, &config, 16).is_err());
	}

	#[test]
	fn end_to_end_one_mebibyte() {
		let mut sampler = Sampler::new(SystemClock::new(), AlarmTimer::new().expect("Unable to start timer"));
		let sample_config = SampleConfig {
			duration:           Duration::from_millis(100),
			count:              1,
			slow_start:         false,
			accesses_per_round: ACCESSES_PER_ROUND,
		};

		let region = Region::new(1 << 20, false).expect("Unable to allocate region");
		let mut walk = Walk::new(region.size(), 8, Stream::Single).expect("Unable to create walk");
		let read = Dispatch::select(ImplKind::Generic)
			.expect("Unable to select implementation")
			.reader(AccessWidth::B8);

		let samples = sampler
			.run(&sample_config, |flag| run_rounds(&region, &mut walk, read, flag))
			.expect("Unable to run samples");

		assert_eq!(samples.len(), 1);
		assert!(samples[0].rate > 0);
		assert!(samples[0].elapsed_us >= 90_000, "stopped early: {:?}", samples[0]);
	}

	#[test]
	fn zeroed_region_reads_do_not_perturb_the_walk() {
		// `run_rounds` folds loaded values into the walk; over a zero-filled
		// region that must leave the offset sequence unchanged.
		let mut plain = Walk::new(1 << 14, 8, Stream::Single).expect("Unable to create walk");
		let mut injected = plain.clone();

		for _ in 0..10_000 {
			let offset = injected.next_offset();
			injected.inject(0);
			assert_eq!(offset, plain.next_offset());
		}
	}
}
