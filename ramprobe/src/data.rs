//! Output data
//!
//! Serializable form of a probe run, written as JSON by `--output`.

// Imports
use crate::{probe::Row, sample::Sample};

/// A full probe run
#[derive(Clone, Debug)]
#[derive(serde::Serialize, serde::Deserialize)]
pub struct Data {
	/// Requested sample duration, in microseconds
	pub duration_us: u64,

	/// Worker thread count
	pub threads: usize,

	/// All measurements
	pub rows: Vec<RowData>,
}

/// Measurements at one region size
#[derive(Clone, Debug)]
#[derive(serde::Serialize, serde::Deserialize)]
pub struct RowData {
	/// Region size, in bytes
	pub size_bytes: usize,

	/// Per-width measurements
	pub cells: Vec<CellData>,
}

/// Measurement of one width at one size
#[derive(Clone, Debug)]
#[derive(serde::Serialize, serde::Deserialize)]
pub struct CellData {
	/// Access width, in bytes
	pub width_bytes: usize,

	/// All samples taken
	pub samples: Vec<Sample>,
}

impl Data {
	/// Builds the output data from probe rows
	pub fn from_rows(duration_us: u64, threads: usize, rows: &[Row]) -> Self {
		Self {
			duration_us,
			threads,
			rows: rows
				.iter()
				.map(|row| RowData {
					size_bytes: row.size,
					cells:      row
						.cells
						.iter()
						.map(|cell| CellData {
							width_bytes: cell.width.bytes(),
							samples:     cell.samples.clone(),
						})
						.collect(),
				})
				.collect(),
		}
	}
}

#[cfg(test)]
mod tests {
	// Imports
	use {
		super::*,
		crate::{access::AccessWidth, probe::Cell},
	};

	#[test]
	fn serializes_to_json() {
		let rows = vec![Row {
			size:  4096,
			cells: vec![Cell {
				width:   AccessWidth::B8,
				samples: vec![Sample {
					requested_us: 1000,
					elapsed_us:   1001,
					rounds:       10,
					accesses:     655360,
					rate:         654,
				}],
			}],
		}];

		let data = Data::from_rows(1000, 1, &rows);
		let json = serde_json::to_string(&data).expect("Unable to serialize");
		assert!(json.contains("\"size_bytes\":4096"));
		assert!(json.contains("\"width_bytes\":8"));
		assert!(json.contains("\"rate\":654"));

		let parsed: Data = serde_json::from_str(&json).expect("Unable to deserialize");
		assert_eq!(parsed.rows.len(), 1);
		assert_eq!(parsed.rows[0].cells[0].samples[0].rounds, 10);
	}
}
