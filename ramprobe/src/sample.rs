//! Timed sampling
//!
//! A worker runs rounds of accesses until a stop flag is raised by a
//! deadline timer; the sampler stamps the clock around the worker and turns
//! round counts into access rates. The worker only ever checks a flag, so
//! the timed loop carries no clock reads.

// Imports
use {
	anyhow::Context,
	ramprobe_util::DurationMicrosExt,
	std::{
		sync::{
			atomic::{self, AtomicBool},
			Arc, Condvar, Mutex,
		},
		thread,
		time::{Duration, Instant},
	},
};

/// Monotonic microsecond clock
pub trait Clock {
	/// Returns microseconds since an arbitrary epoch
	fn now_micros(&self) -> u64;
}

/// System monotonic clock
#[derive(Debug)]
pub struct SystemClock {
	/// Clock epoch
	epoch: Instant,
}

impl SystemClock {
	/// Creates a system clock
	pub fn new() -> Self {
		Self { epoch: Instant::now() }
	}
}

impl Default for SystemClock {
	fn default() -> Self {
		Self::new()
	}
}

impl Clock for SystemClock {
	fn now_micros(&self) -> u64 {
		self.epoch.elapsed().as_micros_u64()
	}
}

/// Shared stop flag checked by timed loops.
///
/// Loads are relaxed; a late observation only stretches a sample by a
/// fraction of one round.
#[derive(Clone, Debug, Default)]
pub struct StopFlag(Arc<AtomicBool>);

impl StopFlag {
	/// Creates an unset flag
	pub fn new() -> Self {
		Self::default()
	}

	/// Whether the flag has been raised
	#[inline]
	pub fn is_set(&self) -> bool {
		self.0.load(atomic::Ordering::Relaxed)
	}

	/// Raises the flag
	pub fn set(&self) {
		self.0.store(true, atomic::Ordering::Release);
	}

	/// Clears the flag
	pub fn clear(&self) {
		self.0.store(false, atomic::Ordering::Release);
	}
}

/// Deadline timer driving the stop flag
pub trait Timer {
	/// Arms the timer, returning the flag it will raise after `duration`
	fn arm(&mut self, duration: Duration) -> Result<StopFlag, anyhow::Error>;

	/// Disarms the timer, if armed
	fn disarm(&mut self);
}

/// Alarm timer state
#[derive(Debug)]
enum AlarmState {
	/// Waiting for an arm request
	Idle,

	/// Armed with a deadline
	Armed {
		/// Time until the flag is raised
		duration: Duration,

		/// Flag to raise
		flag: StopFlag,

		/// Arm generation, to detect re-arms during the wait
		gen: u64,
	},

	/// Timer is being dropped
	Shutdown,
}

/// State shared with the alarm thread
#[derive(Debug)]
struct AlarmShared {
	/// Current state
	state: Mutex<AlarmState>,

	/// Notified on every state change
	cond: Condvar,
}

/// Deadline timer backed by a background thread.
///
/// Re-armable; arming while armed replaces the previous deadline without
/// raising its flag.
#[derive(Debug)]
pub struct AlarmTimer {
	/// Shared state
	shared: Arc<AlarmShared>,

	/// Alarm thread handle
	thread: Option<thread::JoinHandle<()>>,

	/// Arm generation counter
	gen: u64,
}

impl AlarmTimer {
	/// Starts the alarm thread
	pub fn new() -> Result<Self, anyhow::Error> {
		let shared = Arc::new(AlarmShared {
			state: Mutex::new(AlarmState::Idle),
			cond:  Condvar::new(),
		});

		let thread = thread::Builder::new()
			.name("ramprobe-alarm".to_owned())
			.spawn({
				let shared = Arc::clone(&shared);
				move || Self::run(&shared)
			})
			.context("Unable to start alarm timer thread")?;

		Ok(Self {
			shared,
			thread: Some(thread),
			gen: 0,
		})
	}

	/// Alarm thread loop
	fn run(shared: &AlarmShared) {
		let mut state = shared.state.lock().unwrap_or_else(|err| err.into_inner());
		loop {
			match &*state {
				AlarmState::Idle => {
					state = shared.cond.wait(state).unwrap_or_else(|err| err.into_inner());
				},
				AlarmState::Armed { duration, flag, gen } => {
					let flag = flag.clone();
					let gen = *gen;
					let deadline = Instant::now() + *duration;

					// Wait out the deadline, restarting on spurious wakes and
					// bailing if we were re-armed or disarmed meanwhile.
					let mut interrupted = false;
					loop {
						let now = Instant::now();
						if now >= deadline {
							break;
						}

						state = shared
							.cond
							.wait_timeout(state, deadline - now)
							.unwrap_or_else(|err| err.into_inner())
							.0;
						match &*state {
							AlarmState::Armed { gen: cur, .. } if *cur == gen => (),
							_ => {
								interrupted = true;
								break;
							},
						}
					}

					if !interrupted {
						flag.set();
						*state = AlarmState::Idle;
					}
				},
				AlarmState::Shutdown => break,
			}
		}
	}

	/// Replaces the state and wakes the alarm thread
	fn transition(&self, next: AlarmState) {
		let mut state = self.shared.state.lock().unwrap_or_else(|err| err.into_inner());
		*state = next;
		self.shared.cond.notify_all();
	}
}

impl Timer for AlarmTimer {
	fn arm(&mut self, duration: Duration) -> Result<StopFlag, anyhow::Error> {
		anyhow::ensure!(!duration.is_zero(), "Timer duration must be non-zero");

		self.gen += 1;
		let flag = StopFlag::new();
		self.transition(AlarmState::Armed {
			duration,
			flag: flag.clone(),
			gen: self.gen,
		});

		Ok(flag)
	}

	fn disarm(&mut self) {
		self.transition(AlarmState::Idle);
	}
}

impl Drop for AlarmTimer {
	fn drop(&mut self) {
		self.transition(AlarmState::Shutdown);
		if let Some(thread) = self.thread.take() {
			let _ = thread.join();
		}
	}
}

/// Configuration of a sampling run
#[derive(Clone, Copy, Debug)]
pub struct SampleConfig {
	/// Duration of each sample
	pub duration: Duration,

	/// Number of samples to take
	pub count: usize,

	/// Whether to run a discarded warm-up sample first
	pub slow_start: bool,

	/// Accesses performed per worker round
	pub accesses_per_round: u64,
}

/// A single timed measurement
#[derive(Clone, Copy, Debug)]
#[derive(serde::Serialize, serde::Deserialize)]
pub struct Sample {
	/// Requested duration, in microseconds
	pub requested_us: u64,

	/// Measured elapsed time, in microseconds (always at least 1)
	pub elapsed_us: u64,

	/// Rounds the worker completed
	pub rounds: u64,

	/// Total accesses performed
	pub accesses: u64,

	/// Accesses per microsecond
	pub rate: u64,
}

/// Timed sampler
#[derive(Debug)]
pub struct Sampler<C, T> {
	/// Clock stamping the samples
	clock: C,

	/// Timer raising the stop flags
	timer: T,
}

impl<C: Clock, T: Timer> Sampler<C, T> {
	/// Warm-up sample duration
	pub const SLOW_START_DURATION: Duration = Duration::from_millis(500);

	/// Creates a sampler
	pub fn new(clock: C, timer: T) -> Self {
		Self { clock, timer }
	}

	/// Runs `config.count` timed samples of `worker`.
	///
	/// The worker must run rounds of `config.accesses_per_round` accesses
	/// until the flag is raised, then return how many rounds it completed.
	pub fn run(
		&mut self,
		config: &SampleConfig,
		mut worker: impl FnMut(&StopFlag) -> u64,
	) -> Result<Vec<Sample>, anyhow::Error> {
		anyhow::ensure!(!config.duration.is_zero(), "Sample duration must be non-zero");
		anyhow::ensure!(config.count != 0, "Sample count must be non-zero");

		if config.slow_start {
			let sample = self
				.run_one(Self::SLOW_START_DURATION, config.accesses_per_round, &mut worker)
				.context("Unable to run warm-up sample")?;
			tracing::debug!(?sample, "Discarded warm-up sample");
		}

		(0..config.count)
			.map(|sample_idx| {
				self.run_one(config.duration, config.accesses_per_round, &mut worker)
					.with_context(|| format!("Unable to run sample {sample_idx}"))
			})
			.collect()
	}

	/// Runs a single timed sample
	fn run_one(
		&mut self,
		duration: Duration,
		accesses_per_round: u64,
		worker: &mut impl FnMut(&StopFlag) -> u64,
	) -> Result<Sample, anyhow::Error> {
		let flag = self.timer.arm(duration).context("Unable to arm timer")?;

		// Stamp twice; `t1 - t0` is the stamping cost, and backing `t1` off
		// by it cancels the cost of the closing stamp.
		let t0 = self.clock.now_micros();
		let t1 = self.clock.now_micros();
		let before = t1.saturating_sub(t1 - t0);

		let rounds = worker(&flag);
		let after = self.clock.now_micros();
		self.timer.disarm();

		// Note: Clamped so rates can never divide by zero.
		let elapsed_us = u64::max(1, after.saturating_sub(before));
		let accesses = rounds.saturating_mul(accesses_per_round);

		Ok(Sample {
			requested_us: duration.as_micros_u64(),
			elapsed_us,
			rounds,
			accesses,
			rate: accesses / elapsed_us,
		})
	}
}

#[cfg(test)]
pub(crate) mod testing {
	// Imports
	use {
		super::*,
		std::sync::atomic::{AtomicU64, Ordering},
	};

	/// Manually advanced clock
	#[derive(Clone, Debug, Default)]
	pub struct MockClock(Arc<AtomicU64>);

	impl MockClock {
		pub fn new() -> Self {
			Self::default()
		}

		pub fn advance(&self, micros: u64) {
			self.0.fetch_add(micros, Ordering::SeqCst);
		}
	}

	impl Clock for MockClock {
		fn now_micros(&self) -> u64 {
			self.0.load(Ordering::SeqCst)
		}
	}

	/// Timer that never fires on its own.
	///
	/// The worker under test raises the flag itself once its scripted
	/// deadline passes.
	#[derive(Debug, Default)]
	pub struct MockTimer {
		/// Durations of all arm requests
		pub armed: Vec<Duration>,
	}

	impl MockTimer {
		pub fn new() -> Self {
			Self::default()
		}
	}

	impl Timer for MockTimer {
		fn arm(&mut self, duration: Duration) -> Result<StopFlag, anyhow::Error> {
			self.armed.push(duration);
			Ok(StopFlag::new())
		}

		fn disarm(&mut self) {}
	}
}
