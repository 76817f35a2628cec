//! Utilities

// Modules
pub mod logger;

// Imports
use std::{cell::RefCell, fmt, time::Duration};

/// Extension trait for [`Duration`] to get whole microseconds as a `u64`
#[extend::ext(name = DurationMicrosExt)]
pub impl Duration {
	/// Returns this duration in whole microseconds, saturating on overflow.
	fn as_micros_u64(&self) -> u64 {
		u64::try_from(self.as_micros()).unwrap_or(u64::MAX)
	}
}

/// [`fmt::Display`] helper to display using a `FnMut(&mut fmt::Formatter)`
pub struct DisplayWrapper<F: FnMut(&mut fmt::Formatter) -> fmt::Result>(RefCell<F>);

impl<F: FnMut(&mut fmt::Formatter) -> fmt::Result> DisplayWrapper<F> {
	/// Creates a new display wrapper
	#[must_use]
	pub const fn new(func: F) -> Self {
		Self(RefCell::new(func))
	}
}

impl<F: FnMut(&mut fmt::Formatter) -> fmt::Result> fmt::Display for DisplayWrapper<F> {
	fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
		// Note: `f` cannot be re-entrant, so this cannot fail
		self.0.borrow_mut()(f)
	}
}
