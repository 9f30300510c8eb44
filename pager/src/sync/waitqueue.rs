//! Wait queues with a two-phase wait.
//!
//! A thread that must sleep on a queue does so in two steps:
//!
//!   1. `WaitQueue::prepare`: link a waiter into the queue. Non-blocking,
//!      done while the control lock is still held, so no other trap can see
//!      the queue without this thread in it.
//!   2. `PreparedWait::commit`: after the control lock is dropped, suspend
//!      until the waiter's `woken` flag is set.
//!
//! A wake that lands between (1) and (2) sets the flag and resumes the
//! thread early; the scheduler's permit semantics turn the following
//! `suspend` into a no-op and `commit` sees the flag. Nothing is lost.

use alloc::collections::VecDeque;
use alloc::sync::Arc;
use core::fmt;
use core::sync::atomic::{AtomicBool, Ordering};
use core::time::Duration;

use crate::task::thread::{Scheduler, Thread, Tid};

/// How many sleepers a wake releases.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WakeMode {
	/// The oldest sleeper only.
	One,
	/// Every sleeper (broadcast).
	All,
}

/// One linked sleeper.
struct Waiter<T> {
	thread: T,
	woken: AtomicBool,
}

/// A queue of threads sleeping on one condition.
pub struct WaitQueue<T> {
	sleepers: VecDeque<Arc<Waiter<T>>>,
}

impl<T: Thread> WaitQueue<T> {
	/// Creates an empty queue.
	pub const fn new() -> Self {
		Self {
			sleepers: VecDeque::new(),
		}
	}

	/// Number of linked sleepers.
	#[inline]
	pub fn len(&self) -> usize {
		self.sleepers.len()
	}

	/// Returns `true` if nobody is linked.
	#[inline]
	pub fn is_empty(&self) -> bool {
		self.sleepers.is_empty()
	}

	/// Links `thread` into the queue and returns the token it will commit
	/// on. Never blocks.
	pub fn prepare(&mut self, thread: T) -> PreparedWait<T> {
		let waiter = Arc::new(Waiter {
			thread,
			woken: AtomicBool::new(false),
		});
		self.sleepers.push_back(waiter.clone());
		log::trace!("[waitqueue] tid {} linked ({} sleeping)", waiter.thread.tid(), self.len());
		PreparedWait { waiter }
	}

	/// Unlinks sleepers according to `mode`, marks them woken and resumes
	/// them. Asynchronous: returns without waiting for any of them to run.
	///
	/// Returns the number of threads woken.
	pub fn wake(&mut self, mode: WakeMode) -> usize {
		let count = match mode {
			WakeMode::One => self.sleepers.len().min(1),
			WakeMode::All => self.sleepers.len(),
		};
		for waiter in self.sleepers.drain(..count) {
			// Flag first: a thread resumed before it ever suspended must
			// find it set.
			waiter.woken.store(true, Ordering::Release);
			waiter.thread.resume();
			log::trace!("[waitqueue] tid {} woken", waiter.thread.tid());
		}
		count
	}

	/// Unlinks a prepared waiter that has not been woken.
	///
	/// Returns `false` if it is no longer linked here, which means a wake
	/// already took it.
	pub fn cancel(&mut self, wait: &PreparedWait<T>) -> bool {
		match self
			.sleepers
			.iter()
			.position(|w| Arc::ptr_eq(w, &wait.waiter))
		{
			Some(index) => {
				self.sleepers.remove(index);
				true
			}
			None => false,
		}
	}

	/// TIDs of linked sleepers, oldest first.
	pub fn tids(&self) -> impl Iterator<Item = Tid> + '_ {
		self.sleepers.iter().map(|w| w.thread.tid())
	}
}

impl<T: Thread> Default for WaitQueue<T> {
	fn default() -> Self {
		Self::new()
	}
}

impl<T> fmt::Debug for WaitQueue<T> {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("WaitQueue")
			.field("sleepers", &self.sleepers.len())
			.finish()
	}
}

/// Token returned by `WaitQueue::prepare`.
pub struct PreparedWait<T> {
	waiter: Arc<Waiter<T>>,
}

impl<T: Thread> PreparedWait<T> {
	/// Returns `true` once a wake has released this waiter.
	#[inline]
	pub fn is_woken(&self) -> bool {
		self.waiter.woken.load(Ordering::Acquire)
	}

	/// TID of the prepared thread.
	pub fn tid(&self) -> Tid {
		self.waiter.thread.tid()
	}

	/// Suspends until woken. Must be called without the control lock.
	pub fn commit<S: Scheduler<Thread = T>>(&self, scheduler: &S) {
		while !self.is_woken() {
			scheduler.suspend();
		}
	}

	/// Suspends until woken or until `timeout` has elapsed.
	///
	/// Returns `true` if woken. A `false` return leaves the waiter linked;
	/// the caller must `cancel` it under the control lock. A timeout too
	/// large to fit a deadline waits like `commit`.
	pub fn commit_timeout<S: Scheduler<Thread = T>>(&self, scheduler: &S, timeout: Duration) -> bool {
		let Some(deadline) = scheduler.uptime().checked_add(timeout) else {
			self.commit(scheduler);
			return true;
		};
		loop {
			if self.is_woken() {
				return true;
			}
			let now = scheduler.uptime();
			if now >= deadline {
				return self.is_woken();
			}
			scheduler.suspend_for(deadline - now);
		}
	}
}

impl<T> fmt::Debug for PreparedWait<T> {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("PreparedWait")
			.field("woken", &self.waiter.woken.load(Ordering::Relaxed))
			.finish()
	}
}

#[cfg(all(test, feature = "std"))]
mod tests {
	use super::*;
	use crate::task::thread::HostScheduler;
	use std::sync::atomic::AtomicUsize;
	use std::vec::Vec;

	/// Thread stand-in that only counts resumes.
	#[derive(Clone)]
	struct Counted(Tid, Arc<AtomicUsize>);

	impl Thread for Counted {
		fn tid(&self) -> Tid {
			self.0
		}
		fn resume(&self) {
			self.1.fetch_add(1, Ordering::SeqCst);
		}
	}

	fn queue_of(n: u64, resumes: &Arc<AtomicUsize>) -> (WaitQueue<Counted>, Vec<PreparedWait<Counted>>) {
		let mut wq = WaitQueue::new();
		let waits = (0..n).map(|tid| wq.prepare(Counted(tid, resumes.clone()))).collect();
		(wq, waits)
	}

	#[test]
	fn wake_one_takes_oldest() {
		let resumes = Arc::new(AtomicUsize::new(0));
		let (mut wq, waits) = queue_of(3, &resumes);
		assert_eq!(wq.wake(WakeMode::One), 1);
		assert!(waits[0].is_woken());
		assert!(!waits[1].is_woken());
		assert_eq!(wq.tids().collect::<Vec<_>>(), [1, 2]);
		assert_eq!(resumes.load(Ordering::SeqCst), 1);
	}

	#[test]
	fn wake_all_broadcasts() {
		let resumes = Arc::new(AtomicUsize::new(0));
		let (mut wq, waits) = queue_of(4, &resumes);
		assert_eq!(wq.wake(WakeMode::All), 4);
		assert!(wq.is_empty());
		assert!(waits.iter().all(PreparedWait::is_woken));
		assert_eq!(resumes.load(Ordering::SeqCst), 4);
	}

	#[test]
	fn wake_on_empty_queue_is_noop() {
		let mut wq: WaitQueue<Counted> = WaitQueue::new();
		assert_eq!(wq.wake(WakeMode::One), 0);
		assert_eq!(wq.wake(WakeMode::All), 0);
	}

	#[test]
	fn cancel_only_unlinks_unwoken() {
		let resumes = Arc::new(AtomicUsize::new(0));
		let (mut wq, waits) = queue_of(2, &resumes);
		assert!(wq.cancel(&waits[1]));
		assert!(!wq.cancel(&waits[1]));
		wq.wake(WakeMode::One);
		assert!(!wq.cancel(&waits[0]));
		assert!(wq.is_empty());
	}

	#[test]
	fn wake_before_commit_is_not_lost() {
		let sched = HostScheduler::new();
		let mut wq = WaitQueue::new();
		let wait = wq.prepare(sched.current());
		wq.wake(WakeMode::One);
		// Returns immediately: flag set, permit pending.
		wait.commit(&sched);
		assert!(wait.is_woken());
	}

	#[test]
	fn commit_timeout_expires_unwoken() {
		let sched = HostScheduler::new();
		let mut wq = WaitQueue::new();
		let wait = wq.prepare(sched.current());
		assert!(!wait.commit_timeout(&sched, Duration::from_millis(20)));
		assert!(wq.cancel(&wait));
	}

	#[test]
	fn unrepresentable_deadline_waits_for_wake() {
		let sched = HostScheduler::new();
		let mut wq = WaitQueue::new();
		let wait = wq.prepare(sched.current());
		wq.wake(WakeMode::One);
		assert!(wait.commit_timeout(&sched, Duration::MAX));
	}

	#[test]
	fn commit_returns_after_cross_thread_wake() {
		let sched = Arc::new(HostScheduler::new());
		let wq = Arc::new(spin::Mutex::new(WaitQueue::new()));
		let th = std::thread::spawn({
			let sched = sched.clone();
			let wq = wq.clone();
			move || {
				let wait = wq.lock().prepare(sched.current());
				wait.commit(&*sched);
			}
		});
		while wq.lock().is_empty() {
			std::thread::yield_now();
		}
		assert_eq!(wq.lock().wake(WakeMode::All), 1);
		th.join().unwrap();
	}
}
