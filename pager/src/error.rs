//! Errors returned to a trapping thread.
//!
//! Only conditions a caller can cause or recover from live here. Registry
//! invariant violations are not errors: they are `BUG:` panics (see
//! `mutex::registry`).

use core::fmt;

/// errno values used on the mutex-control path (Linux numbering).
pub mod errno {
	/// Out of memory.
	pub const ENOMEM: i64 = 12;
	/// Invalid argument.
	pub const EINVAL: i64 = 22;
	/// Function not implemented.
	pub const ENOSYS: i64 = 38;
	/// Connection timed out (used for bounded mutex waits).
	pub const ETIMEDOUT: i64 = 110;
}

/// Error returned by the mutex-control handlers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MutexError {
	/// Unknown operation, address outside the caller's range, or address
	/// that does not translate.
	InvalidArgument,
	/// A registry entry could not be allocated. Registry left untouched.
	OutOfMemory,
	/// A bounded wait expired before the peer showed up.
	TimedOut,
}

impl MutexError {
	/// The negative errno handed back to userspace.
	pub const fn errno(self) -> i64 {
		match self {
			MutexError::InvalidArgument => -errno::EINVAL,
			MutexError::OutOfMemory => -errno::ENOMEM,
			MutexError::TimedOut => -errno::ETIMEDOUT,
		}
	}
}

impl fmt::Display for MutexError {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			MutexError::InvalidArgument => f.write_str("invalid argument"),
			MutexError::OutOfMemory => f.write_str("out of memory"),
			MutexError::TimedOut => f.write_str("wait timed out"),
		}
	}
}
