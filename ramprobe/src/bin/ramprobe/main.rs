//! Memory access-rate prober

// Modules
mod args;

// Imports
use {
	anyhow::Context,
	clap::Parser,
	ramprobe::{
		access::{AccessWidth, Dispatch, ImplKind},
		probe::{self, ProbeConfig},
		report,
		sample::{AlarmTimer, Sampler, SystemClock},
		walk::Stream,
	},
	ramprobe_util::{logger, DurationMicrosExt},
	std::{fs, io::BufWriter, time::Duration},
};

fn main() -> Result<(), anyhow::Error> {
	// Get arguments and setup logging
	let args = args::Args::parse();
	logger::pre_init::debug(format!("Args: {args:?}"));
	logger::init(args.log_file.as_deref(), args.log_file_append);

	// Validate everything up-front, before any allocation or timed run
	anyhow::ensure!(args.time_ms > 0, "Sample duration must be non-zero");
	anyhow::ensure!(args.samples > 0, "Sample count must be non-zero");
	anyhow::ensure!(args.threads >= 1, "Thread count must be at least 1");
	let widths = self::widths(&args)?;

	let dispatch = Dispatch::select(match args.r#impl {
		args::ArgImpl::Auto => ImplKind::Auto,
		args::ArgImpl::Generic => ImplKind::Generic,
		args::ArgImpl::Sse => ImplKind::Sse,
		args::ArgImpl::Avx => ImplKind::Avx,
	})
	.context("Unable to select read implementation")?;

	let duration = Duration::from_millis(args.time_ms);
	let config = ProbeConfig {
		duration,
		samples: args.samples,
		slow_start: args.slow_start,
		max_size: args.size_kb.saturating_mul(1024),
		widths,
		stream: match args.dual {
			true => Stream::Dual,
			false => Stream::Single,
		},
		dispatch,
		huge_pages: !args.no_huge_pages,
	};

	// Run the probe
	let timer = AlarmTimer::new().context("Unable to create timer")?;
	let mut sampler = Sampler::new(SystemClock::new(), timer);
	let rows = match args.threads {
		1 => probe::latency_probe(&mut sampler, &config).context("Unable to run latency probe")?,
		threads =>
			probe::bandwidth_probe(&mut sampler, &config, threads).context("Unable to run bandwidth probe")?,
	};

	// Report
	let options = report::Options {
		quiet:     args.quiet,
		bandwidth: args.bandwidth,
	};
	if !args.quiet {
		let header_widths = rows
			.first()
			.map(|row| row.cells.iter().map(|cell| cell.width).collect::<Vec<_>>())
			.unwrap_or_default();
		println!("{}", report::header(&header_widths));
	}
	for row in &rows {
		println!("{}", report::row(row, options));
	}

	// Then dump all samples, if requested
	if let Some(output) = &args.output {
		let data = ramprobe::data::Data::from_rows(duration.as_micros_u64(), args.threads, &rows);
		let file = fs::File::create(output).with_context(|| format!("Unable to create output file {output:?}"))?;
		serde_json::to_writer_pretty(BufWriter::new(file), &data)
			.with_context(|| format!("Unable to write output file {output:?}"))?;
	}

	Ok(())
}

/// Returns the access widths to measure
fn widths(args: &args::Args) -> Result<Vec<AccessWidth>, anyhow::Error> {
	if args.ptr_only {
		return Ok(vec![AccessWidth::native()]);
	}

	let min = AccessWidth::from_bytes(args.min_word).context("Invalid `--min-word`")?;
	let max = AccessWidth::from_bytes(args.max_word).context("Invalid `--max-word`")?;
	anyhow::ensure!(
		min.bytes() <= max.bytes(),
		"`--min-word` ({}) is above `--max-word` ({})",
		min.bytes(),
		max.bytes(),
	);

	Ok(AccessWidth::ALL
		.into_iter()
		.filter(|width| (min.bytes()..=max.bytes()).contains(&width.bytes()))
		.collect())
}
