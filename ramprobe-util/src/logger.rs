//! Logger

// Imports
use {
	std::{fs, path::Path, sync::Arc},
	tracing_subscriber::{filter::LevelFilter, prelude::*, EnvFilter},
};

/// Logging before initialization.
///
/// Messages are buffered and emitted once [`init`] runs.
pub mod pre_init {
	// Imports
	use std::{mem, sync::Mutex};

	/// Buffered messages
	static MESSAGES: Mutex<Vec<String>> = Mutex::new(Vec::new());

	/// Buffers a debug message until [`init`](super::init) runs
	pub fn debug(msg: String) {
		if let Ok(mut messages) = MESSAGES.lock() {
			messages.push(msg);
		}
	}

	/// Drains all buffered messages
	pub(super) fn drain() -> Vec<String> {
		MESSAGES
			.lock()
			.map(|mut messages| mem::take(&mut *messages))
			.unwrap_or_default()
	}
}

/// Initializes logging.
///
/// Logs to stderr, filtered by `RUST_LOG` (defaulting to `info`), and, if
/// `log_file` is given, to it, filtered by `RUST_LOG_FILE` (defaulting to
/// `debug`).
pub fn init(log_file: Option<&Path>, log_file_append: bool) {
	let stderr_layer = tracing_subscriber::fmt::layer()
		.with_writer(std::io::stderr)
		.with_filter(
			EnvFilter::builder()
				.with_default_directive(LevelFilter::INFO.into())
				.from_env_lossy(),
		);

	let file_layer = log_file.and_then(|path| {
		let file = fs::OpenOptions::new()
			.create(true)
			.write(true)
			.append(log_file_append)
			.truncate(!log_file_append)
			.open(path);
		let file = match file {
			Ok(file) => file,
			Err(err) => {
				eprintln!("Unable to open log file {path:?}: {err}");
				return None;
			},
		};

		let filter = EnvFilter::builder()
			.with_default_directive(LevelFilter::DEBUG.into())
			.with_env_var("RUST_LOG_FILE")
			.from_env_lossy();
		Some(
			tracing_subscriber::fmt::layer()
				.with_writer(Arc::new(file))
				.with_ansi(false)
				.with_filter(filter),
		)
	});

	tracing_subscriber::registry()
		.with(stderr_layer)
		.with(file_layer)
		.init();

	// Emit anything that was logged before we were initialized
	for msg in pre_init::drain() {
		tracing::debug!(target: "ramprobe::pre_init", "{msg}");
	}
}
