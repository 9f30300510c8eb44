//! Thread and scheduler collaborators.
//!
//! The broker needs exactly four things from whoever schedules threads:
//!   - a handle to the thread that trapped (`Scheduler::current`)
//!   - a way to give up the CPU until resumed (`Scheduler::suspend`)
//!   - a way to make another thread runnable again (`Thread::resume`)
//!   - a clock, for the optional bounded wait (`Scheduler::uptime`)
//!
//! `resume` has permit semantics: resuming a thread that has not suspended
//! yet makes its next `suspend` return immediately. The wait queue relies on
//! that to close the window between releasing the control lock and actually
//! going to sleep.

use core::time::Duration;

/// Thread identifier as reported by the scheduler.
pub type Tid = u64;

/// Handle to a schedulable thread.
pub trait Thread: Clone + Send + Sync {
	/// Stable identifier, for logs and diagnostics.
	fn tid(&self) -> Tid;

	/// Makes the thread runnable. Never blocks the caller and never waits
	/// for the target to actually run.
	fn resume(&self);
}

/// The scheduler as seen from the trap path.
pub trait Scheduler: Send + Sync {
	type Thread: Thread;

	/// Handle to the calling thread.
	fn current(&self) -> Self::Thread;

	/// Yields until resumed. May return spuriously; callers re-check their
	/// wake condition.
	fn suspend(&self);

	/// Like `suspend`, but returns after at most `timeout`.
	fn suspend_for(&self, timeout: Duration);

	/// Monotonic time since the scheduler started.
	fn uptime(&self) -> Duration;
}

// ── Hosted scheduler ────────────────────────────────────────────

#[cfg(feature = "std")]
mod host {
	use super::{Scheduler, Thread, Tid};
	use core::sync::atomic::{AtomicU64, Ordering};
	use core::time::Duration;
	use std::time::Instant;

	/// Monotonically increasing TID counter.
	static NEXT_TID: AtomicU64 = AtomicU64::new(1);

	std::thread_local! {
		static TID: Tid = NEXT_TID.fetch_add(1, Ordering::Relaxed);
	}

	/// A std thread, resumed through `unpark`.
	#[derive(Clone, Debug)]
	pub struct HostThread {
		tid: Tid,
		handle: std::thread::Thread,
	}

	impl Thread for HostThread {
		fn tid(&self) -> Tid {
			self.tid
		}

		fn resume(&self) {
			self.handle.unpark();
		}
	}

	/// Scheduler backed by `std::thread::park` / `unpark`, whose token
	/// already gives the permit semantics the wait queue needs.
	#[derive(Debug)]
	pub struct HostScheduler {
		epoch: Instant,
	}

	impl HostScheduler {
		pub fn new() -> Self {
			Self {
				epoch: Instant::now(),
			}
		}
	}

	impl Default for HostScheduler {
		fn default() -> Self {
			Self::new()
		}
	}

	impl Scheduler for HostScheduler {
		type Thread = HostThread;

		fn current(&self) -> HostThread {
			HostThread {
				tid: TID.with(|tid| *tid),
				handle: std::thread::current(),
			}
		}

		fn suspend(&self) {
			std::thread::park();
		}

		fn suspend_for(&self, timeout: Duration) {
			std::thread::park_timeout(timeout);
		}

		fn uptime(&self) -> Duration {
			self.epoch.elapsed()
		}
	}
}

#[cfg(feature = "std")]
pub use host::{HostScheduler, HostThread};

#[cfg(all(test, feature = "std"))]
mod tests {
	use super::*;
	use std::sync::Arc;
	use std::sync::atomic::{AtomicBool, Ordering};

	#[test]
	fn tids_are_per_thread() {
		let sched = HostScheduler::new();
		let here = sched.current().tid();
		assert_eq!(here, sched.current().tid());
		let there = std::thread::spawn(|| HostScheduler::new().current().tid())
			.join()
			.unwrap();
		assert_ne!(here, there);
	}

	#[test]
	fn resume_before_suspend_is_not_lost() {
		let sched = HostScheduler::new();
		sched.current().resume();
		// The pending permit makes this return immediately.
		sched.suspend();
	}

	#[test]
	fn resume_wakes_suspended_thread() {
		let sched = Arc::new(HostScheduler::new());
		let flag = Arc::new(AtomicBool::new(false));
		let (tx, rx) = std::sync::mpsc::channel();
		let th = std::thread::spawn({
			let sched = sched.clone();
			let flag = flag.clone();
			move || {
				tx.send(sched.current()).unwrap();
				while !flag.load(Ordering::Acquire) {
					sched.suspend();
				}
			}
		});
		let target = rx.recv().unwrap();
		flag.store(true, Ordering::Release);
		target.resume();
		th.join().unwrap();
	}

	#[test]
	fn uptime_is_monotonic() {
		let sched = HostScheduler::new();
		let a = sched.uptime();
		sched.suspend_for(Duration::from_millis(1));
		assert!(sched.uptime() >= a);
	}
}
