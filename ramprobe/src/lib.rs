//! Memory access-rate prober
//!
//! Measures how fast memory can be read at various region sizes, access
//! widths and thread counts, using a pseudo-random full-coverage address
//! walk that defeats prefetching.

// Modules
pub mod access;
pub mod data;
pub mod probe;
pub mod region;
pub mod report;
pub mod sample;
pub mod walk;

// Exports
pub use self::{
	access::{AccessWidth, Dispatch, ImplKind, ReadFn},
	data::Data,
	probe::{bandwidth_probe, latency_probe, Cell, ProbeConfig, Row, ACCESSES_PER_ROUND},
	region::{size_rounded_down, Region},
	sample::{AlarmTimer, Clock, Sample, SampleConfig, Sampler, StopFlag, SystemClock, Timer},
	walk::{PageWalk, Stream, Walk},
};
