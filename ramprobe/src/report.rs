//! Report formatting
//!
//! Renders probe rows as `size_kB: rate rate ...` lines, one column per
//! access width. Rates are accesses per microsecond, or, in bandwidth mode,
//! megabytes per second.

// Imports
use {
	crate::{
		access::AccessWidth,
		probe::{Cell, Row},
	},
	itertools::Itertools,
	ramprobe_util::DisplayWrapper,
	std::fmt,
};

/// Report options
#[derive(Clone, Copy, Debug)]
pub struct Options {
	/// Omit the header and row prefixes
	pub quiet: bool,

	/// Report megabytes per second instead of accesses per microsecond
	pub bandwidth: bool,
}

/// Rate reported for a cell: the best sample, scaled in bandwidth mode
fn cell_rate(cell: &Cell, options: Options) -> u64 {
	let rate = cell.samples.iter().map(|sample| sample.rate).max().unwrap_or(0);
	match options.bandwidth {
		true => rate * cell.width.bytes() as u64,
		false => rate,
	}
}

/// Returns a displayable header for `widths`.
///
/// The platform's native width is marked with a `*`.
pub fn header(widths: &[AccessWidth]) -> impl fmt::Display + '_ {
	DisplayWrapper::new(move |f| {
		write!(f, "{:>8}", "size")?;
		for &width in widths {
			let native = match width == AccessWidth::native() {
				true => "*",
				false => "",
			};
			write!(f, " {:>7}", format_args!("{}b{native}", width.bytes()))?;
		}
		Ok(())
	})
}

/// Returns a displayable report row
pub fn row(row: &Row, options: Options) -> impl fmt::Display + '_ {
	DisplayWrapper::new(move |f| {
		if !options.quiet {
			write!(f, "{:>6}k:", row.size / 1024)?;
		}

		let rates = row
			.cells
			.iter()
			.format_with(" ", |cell, f| f(&format_args!("{:>7}", cell_rate(cell, options))));
		write!(f, " {rates}")
	})
}

#[cfg(test)]
mod tests {
	// Imports
	use {super::*, crate::sample::Sample};

	fn sample(rate: u64) -> Sample {
		Sample {
			requested_us: 1000,
			elapsed_us: 1000,
			rounds: 1,
			accesses: rate * 1000,
			rate,
		}
	}

	fn row_fixture() -> Row {
		Row {
			size:  16384,
			cells: vec![
				Cell {
					width:   AccessWidth::B4,
					samples: vec![sample(100), sample(150), sample(120)],
				},
				Cell {
					width:   AccessWidth::B8,
					samples: vec![sample(200)],
				},
			],
		}
	}

	#[test]
	fn header_marks_native_width() {
		let header = header(&[AccessWidth::B4, AccessWidth::B8]).to_string();
		assert!(header.contains("4b"));
		assert!(header.contains(&format!("{}b*", AccessWidth::native().bytes())));
	}

	#[test]
	fn row_reports_best_sample() {
		let options = Options { quiet: false, bandwidth: false };
		let line = row(&row_fixture(), options).to_string();
		assert!(line.starts_with("    16k:"), "bad prefix: {line:?}");
		assert!(line.contains("150"), "best sample missing: {line:?}");
		assert!(!line.contains("100"), "non-best sample reported: {line:?}");
		assert!(line.contains("200"));
	}

	#[test]
	fn quiet_omits_prefix() {
		let options = Options { quiet: true, bandwidth: false };
		let line = row(&row_fixture(), options).to_string();
		assert!(!line.contains("16k"), "prefix not omitted: {line:?}");
	}

	#[test]
	fn bandwidth_scales_by_width() {
		let options = Options { quiet: false, bandwidth: true };
		let line = row(&row_fixture(), options).to_string();
		// 150/us * 4b and 200/us * 8b
		assert!(line.contains("600"), "scaled rate missing: {line:?}");
		assert!(line.contains("1600"), "scaled rate missing: {line:?}");
	}
}
