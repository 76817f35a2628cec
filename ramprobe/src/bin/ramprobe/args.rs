//! Args

// Imports
use std::path::PathBuf;

/// Args
#[derive(Debug)]
#[derive(clap::Parser)]
#[command(author, version, about = "Memory access-rate prober")]
pub struct Args {
	/// Duration of each sample, in milliseconds
	#[arg(default_value_t = 100)]
	pub time_ms: u64,

	/// Maximum region size, in kibibytes
	#[arg(default_value_t = 16384)]
	pub size_kb: usize,

	/// Worker thread count.
	///
	/// More than 1 switches to the bandwidth measurement.
	#[arg(short = 't', long = "threads", default_value_t = 1)]
	pub threads: usize,

	/// Samples per measurement
	#[arg(long = "samples", default_value_t = 1)]
	pub samples: usize,

	/// Report megabytes per second instead of accesses per microsecond
	#[arg(short = 'b', long = "bandwidth")]
	pub bandwidth: bool,

	/// Only measure the native pointer width
	#[arg(short = 'p', long = "ptr-only")]
	pub ptr_only: bool,

	/// Run a discarded 500 ms warm-up sample before each measurement
	#[arg(short = 's', long = "slowstart")]
	pub slow_start: bool,

	/// Omit the header and row prefixes
	#[arg(short = 'q', long = "quiet")]
	pub quiet: bool,

	/// Don't request huge page backing for the region
	#[arg(short = 'H', long = "no-hugepages")]
	pub no_huge_pages: bool,

	/// Read two streams half the region apart
	#[arg(long = "dual")]
	pub dual: bool,

	/// Smallest access width to measure, in bytes
	#[arg(long = "min-word", default_value_t = 4)]
	pub min_word: usize,

	/// Largest access width to measure, in bytes
	#[arg(long = "max-word", default_value_t = 64)]
	pub max_word: usize,

	/// Read implementation to use
	#[arg(long = "impl", value_enum, default_value_t = ArgImpl::Auto)]
	pub r#impl: ArgImpl,

	/// Write all samples as JSON to this file
	#[arg(long = "output")]
	pub output: Option<PathBuf>,

	/// Log file
	#[arg(long = "log-file")]
	pub log_file: Option<PathBuf>,

	/// Whether to append to the log file
	#[arg(long = "log-file-append")]
	pub log_file_append: bool,
}

/// Read implementation argument
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[derive(clap::ValueEnum)]
pub enum ArgImpl {
	/// Best implementation the host supports
	Auto,

	/// Portable scalar reads
	Generic,

	/// 128-bit vector reads
	Sse,

	/// 256-bit vector reads
	Avx,
}
