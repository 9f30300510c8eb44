//! Broker configuration.
//!
//! Defaults reproduce the baseline behaviour exactly: no quota beyond the
//! allocator, unbounded waits, the full lower half minus the null page as
//! the legal user range. The pager may override them from its argument
//! string, e.g. `mutex.max_entries=256 mutex.timeout_ms=5000`.

use core::time::Duration;

use crate::memory::address::{PAGE_SIZE, USER_SPACE_END};

/// Well-known pager argument keys.
pub mod params {
	/// Quota on simultaneously contended mutexes.
	pub const MAX_ENTRIES: &str = "mutex.max_entries";
	/// Bound on a single lock/unlock suspension, in milliseconds.
	pub const TIMEOUT_MS: &str = "mutex.timeout_ms";
	/// First legal user address for a mutex word.
	pub const USER_START: &str = "mutex.user_start";
	/// End (exclusive) of the legal user range.
	pub const USER_END: &str = "mutex.user_end";
}

/// Tunables for `MutexBroker`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BrokerConfig {
	/// Maximum number of live registry entries. `None` = allocator-bound.
	pub max_entries: Option<usize>,
	/// Bound on how long a thread stays suspended. `None` = forever.
	pub wait_timeout: Option<Duration>,
	/// First legal user address (inclusive).
	pub user_start: u64,
	/// End of the legal user range (exclusive).
	pub user_end: u64,
}

impl BrokerConfig {
	/// Baseline configuration.
	pub const fn new() -> Self {
		Self {
			max_entries: None,
			wait_timeout: None,
			user_start: PAGE_SIZE,
			user_end: USER_SPACE_END,
		}
	}

	/// Sets the registry quota.
	pub const fn with_max_entries(mut self, max: usize) -> Self {
		self.max_entries = Some(max);
		self
	}

	/// Bounds every suspension by `timeout`.
	pub const fn with_wait_timeout(mut self, timeout: Duration) -> Self {
		self.wait_timeout = Some(timeout);
		self
	}

	/// Restricts the legal user range to `[start, end)`.
	pub const fn with_user_range(mut self, start: u64, end: u64) -> Self {
		self.user_start = start;
		self.user_end = end;
		self
	}

	/// Builds a configuration from whitespace-separated `key=value` pager
	/// arguments. Unknown keys are ignored; malformed values keep the
	/// default and log a warning.
	pub fn from_args(args: &str) -> Self {
		let mut config = Self::new();

		for part in args.split_whitespace() {
			let Some((key, value)) = part.split_once('=') else {
				continue;
			};
			let parsed = parse_uint(value);
			match (key, parsed) {
				(params::MAX_ENTRIES, Some(n)) if usize::try_from(n).is_ok() => {
					config.max_entries = usize::try_from(n).ok()
				}
				(params::TIMEOUT_MS, Some(0)) => config.wait_timeout = None,
				(params::TIMEOUT_MS, Some(ms)) => {
					config.wait_timeout = Some(Duration::from_millis(ms))
				}
				(params::USER_START, Some(addr)) => config.user_start = addr,
				(params::USER_END, Some(addr)) => config.user_end = addr,
				(params::MAX_ENTRIES | params::TIMEOUT_MS | params::USER_START | params::USER_END, _) => {
					log::warn!("[config] ignoring malformed {}={}", key, value);
				}
				_ => {}
			}
		}

		if config.user_start >= config.user_end {
			log::warn!(
				"[config] empty user range {:#x}..{:#x}, using defaults",
				config.user_start,
				config.user_end
			);
			config.user_start = PAGE_SIZE;
			config.user_end = USER_SPACE_END;
		}

		config
	}
}

impl Default for BrokerConfig {
	fn default() -> Self {
		Self::new()
	}
}

/// Parses a decimal or `0x`-prefixed hexadecimal integer.
fn parse_uint(s: &str) -> Option<u64> {
	if let Some(hex) = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
		u64::from_str_radix(hex, 16).ok()
	} else {
		s.parse().ok()
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn defaults_are_baseline() {
		let config = BrokerConfig::default();
		assert_eq!(config.max_entries, None);
		assert_eq!(config.wait_timeout, None);
		assert_eq!(config.user_start, 0x1000);
		assert_eq!(config.user_end, 0x0000_8000_0000_0000);
	}

	#[test]
	fn parse_args() {
		let config = BrokerConfig::from_args(
			"console=ttyS0 mutex.max_entries=64 mutex.timeout_ms=250 mutex.user_end=0x8000_0000",
		);
		assert_eq!(config.max_entries, Some(64));
		assert_eq!(config.wait_timeout, Some(Duration::from_millis(250)));
		// Underscores are not accepted: the default survives.
		assert_eq!(config.user_end, USER_SPACE_END);

		let config = BrokerConfig::from_args("mutex.user_start=0x10000 mutex.user_end=0x80000000 quiet");
		assert_eq!(config.user_start, 0x10000);
		assert_eq!(config.user_end, 0x8000_0000);
	}

	#[test]
	fn max_entries_never_truncates() {
		let config = BrokerConfig::from_args("mutex.max_entries=0xFFFFFFFFFFFFFFFF");
		assert_eq!(config.max_entries, usize::try_from(u64::MAX).ok());

		let config = BrokerConfig::from_args("mutex.max_entries=0x100000000");
		assert_eq!(config.max_entries, usize::try_from(0x1_0000_0000u64).ok());
	}

	#[test]
	fn zero_timeout_means_unbounded() {
		let config = BrokerConfig::from_args("mutex.timeout_ms=0");
		assert_eq!(config.wait_timeout, None);
	}

	#[test]
	fn malformed_values_keep_defaults() {
		let config = BrokerConfig::from_args("mutex.max_entries=lots mutex.user_start=0xZZ");
		assert_eq!(config, BrokerConfig::new());
	}

	#[test]
	fn inverted_range_falls_back() {
		let config = BrokerConfig::from_args("mutex.user_start=0x9000 mutex.user_end=0x1000");
		assert_eq!(config.user_start, PAGE_SIZE);
		assert_eq!(config.user_end, USER_SPACE_END);
	}

	#[test]
	fn builders() {
		let config = BrokerConfig::new()
			.with_max_entries(1)
			.with_wait_timeout(Duration::from_secs(1))
			.with_user_range(0x2000, 0x3000);
		assert_eq!(config.max_entries, Some(1));
		assert_eq!(config.user_start, 0x2000);
		assert_eq!(config.user_end, 0x3000);
	}
}
