//! Contended-mutex broker: the slow path of userspace mutexes.
//!
//! Userspace takes and releases its mutexes with an atomic on the mutex
//! word. Only when that fast path sees contention does a thread trap into
//! the pager, with the word's physical address as the key:
//!
//!   - `lock(key)`:   the acquire failed. Park as a *waiter* until an
//!     unlocker shows up, or, if an unlocker is already parked as a *waker*,
//!     release it and return at once.
//!   - `unlock(key)`: the release saw contention. Wake *every* waiter, or,
//!     if no locker has arrived yet, park as a waker until one does.
//!
//! An unlock releases every waiter at once and lets the fast path pick the
//! new owner. Losers trap again.
//!
//! All registry and queue state sits behind one control lock. A thread
//! always links itself into a queue *before* that lock is dropped and only
//! suspends *after*; no trap can ever observe a queue missing a thread that
//! is about to sleep on it.

pub mod registry;

use alloc::string::String;
use core::sync::atomic::{AtomicU64, Ordering};
use spin::Mutex;

use crate::config::BrokerConfig;
use crate::error::MutexError;
use crate::memory::address::PhysAddr;
use crate::sync::waitqueue::{PreparedWait, WakeMode};
use crate::task::thread::{Scheduler, Thread};

use registry::{MutexQueue, MutexRegistry};

/// Snapshot of broker activity counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BrokerStats {
	/// `lock` calls that reached the registry.
	pub locks: u64,
	/// `unlock` calls that reached the registry.
	pub unlocks: u64,
	/// Handshakes completed without the completing thread suspending.
	pub handoffs: u64,
	/// Threads that went to sleep on a queue.
	pub suspensions: u64,
	/// Bounded waits that expired.
	pub timeouts: u64,
	/// Entry allocations refused.
	pub alloc_failures: u64,
}

/// Sleepers on one registry entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueDepth {
	pub waiters: usize,
	pub wakers: usize,
}

/// Which queue of an entry a thread parked on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Side {
	Waiters,
	Wakers,
}

#[derive(Default)]
struct Counters {
	locks: AtomicU64,
	unlocks: AtomicU64,
	handoffs: AtomicU64,
	suspensions: AtomicU64,
	timeouts: AtomicU64,
	alloc_failures: AtomicU64,
}

impl Counters {
	#[inline]
	fn bump(counter: &AtomicU64) {
		counter.fetch_add(1, Ordering::Relaxed);
	}
}

/// The pager's contended-mutex broker.
///
/// Constructed once per pager lifetime and shared by reference with every
/// trap handler.
pub struct MutexBroker<S: Scheduler> {
	scheduler: S,
	/// Control lock + the registry it guards.
	registry: Mutex<MutexRegistry<S::Thread>>,
	config: BrokerConfig,
	stats: Counters,
}

impl<S: Scheduler> MutexBroker<S> {
	/// Creates a broker with an empty registry.
	pub fn new(scheduler: S, config: BrokerConfig) -> Self {
		log::info!(
			"[mutex] broker up (max_entries={:?}, wait_timeout={:?}, user={:#x}..{:#x})",
			config.max_entries,
			config.wait_timeout,
			config.user_start,
			config.user_end
		);
		Self {
			scheduler,
			registry: Mutex::new(MutexRegistry::new(config.max_entries)),
			config,
			stats: Counters::default(),
		}
	}

	/// The configuration this broker was built with.
	pub fn config(&self) -> &BrokerConfig {
		&self.config
	}

	// ── Lock handler ────────────────────────────────────────────

	/// Locker side of the handshake.
	///
	/// Returns once the caller may retry its fast-path acquire: either an
	/// unlocker woke it, or it found a parked unlocker and released that one
	/// instead of sleeping.
	pub fn lock(&self, key: PhysAddr) -> Result<(), MutexError> {
		Counters::bump(&self.stats.locks);
		let current = self.scheduler.current();
		let mut registry = self.registry.lock();

		let wait = match registry.find(key) {
			Some(entry) if !entry.wakers.is_empty() => {
				// An unlocker is parked waiting for us. Release it and go:
				// we never sleep on this path.
				entry.wakers.wake(WakeMode::One);
				if entry.wakers.is_empty() {
					let entry = registry.remove(key);
					registry.delete(entry);
				}
				drop(registry);

				Counters::bump(&self.stats.handoffs);
				log::debug!("[mutex] tid {} took handoff on {}", current.tid(), key);
				return Ok(());
			}
			// Other lockers are already queued; join them.
			Some(entry) => entry.waiters.prepare(current),
			None => {
				let entry = self.create(&mut registry, key)?;
				log::debug!("[mutex] {} now contended (lock first)", key);
				registry.add(entry).waiters.prepare(current)
			}
		};
		drop(registry);

		self.suspend(key, wait, Side::Waiters)
	}

	// ── Unlock handler ──────────────────────────────────────────

	/// Unlocker side of the handshake.
	///
	/// Wakes every parked locker and returns at once, or, if no locker has
	/// arrived yet, parks until one does.
	pub fn unlock(&self, key: PhysAddr) -> Result<(), MutexError> {
		Counters::bump(&self.stats.unlocks);
		let current = self.scheduler.current();
		let mut registry = self.registry.lock();

		let wait = match registry.find(key) {
			Some(entry) if !entry.waiters.is_empty() => {
				let woken = entry.waiters.wake(WakeMode::All);
				let entry = registry.remove(key);
				registry.delete(entry);
				drop(registry);

				Counters::bump(&self.stats.handoffs);
				log::debug!(
					"[mutex] tid {} released {} waiter(s) on {}",
					current.tid(),
					woken,
					key
				);
				return Ok(());
			}
			// Only unlockers parked here so far; wait for a locker too.
			Some(entry) => entry.wakers.prepare(current),
			None => {
				let entry = self.create(&mut registry, key)?;
				log::debug!("[mutex] {} now contended (unlock first)", key);
				registry.add(entry).wakers.prepare(current)
			}
		};
		drop(registry);

		self.suspend(key, wait, Side::Wakers)
	}

	// ── Shared paths ────────────────────────────────────────────

	fn create(
		&self,
		registry: &mut MutexRegistry<S::Thread>,
		key: PhysAddr,
	) -> Result<MutexQueue<S::Thread>, MutexError> {
		registry.create(key).inspect_err(|_| {
			Counters::bump(&self.stats.alloc_failures);
		})
	}

	/// Sleeps on a prepared wait. Called with the control lock released.
	fn suspend(
		&self,
		key: PhysAddr,
		wait: PreparedWait<S::Thread>,
		side: Side,
	) -> Result<(), MutexError> {
		Counters::bump(&self.stats.suspensions);
		log::trace!("[mutex] tid {} sleeping on {} ({:?})", wait.tid(), key, side);

		match self.config.wait_timeout {
			None => {
				wait.commit(&self.scheduler);
				Ok(())
			}
			Some(timeout) => {
				if wait.commit_timeout(&self.scheduler, timeout) {
					return Ok(());
				}
				self.abandon(key, &wait, side)
			}
		}
	}

	/// Timeout path: unlink a wait that expired, unless a wake beat us to
	/// the control lock.
	fn abandon(
		&self,
		key: PhysAddr,
		wait: &PreparedWait<S::Thread>,
		side: Side,
	) -> Result<(), MutexError> {
		let mut registry = self.registry.lock();

		// `Some(idle)` if we unlinked ourselves. If our waiter is not on
		// the entry for `key` (or there is none), a wake already took it;
		// wakes only happen under this lock, so the flag is set by now.
		let cancelled = match registry.find(key) {
			Some(entry) => {
				let queue = match side {
					Side::Waiters => &mut entry.waiters,
					Side::Wakers => &mut entry.wakers,
				};
				if queue.cancel(wait) {
					Some(entry.is_idle())
				} else {
					None
				}
			}
			None => None,
		};

		match cancelled {
			None => {
				debug_assert!(wait.is_woken());
				Ok(())
			}
			Some(idle) => {
				if idle {
					let entry = registry.remove(key);
					registry.delete(entry);
				}
				drop(registry);

				Counters::bump(&self.stats.timeouts);
				log::warn!("[mutex] tid {} timed out on {} ({:?})", wait.tid(), key, side);
				Err(MutexError::TimedOut)
			}
		}
	}

	// ── Diagnostics ─────────────────────────────────────────────

	/// Number of currently contended mutexes.
	pub fn contended(&self) -> usize {
		self.registry.lock().count()
	}

	/// Sleepers on the entry for `key`, or `None` if it is not contended.
	pub fn queue_depth(&self, key: PhysAddr) -> Option<QueueDepth> {
		self.registry.lock().get(key).map(|entry| QueueDepth {
			waiters: entry.waiters.len(),
			wakers: entry.wakers.len(),
		})
	}

	/// Snapshot of the activity counters.
	pub fn stats(&self) -> BrokerStats {
		let load = |c: &AtomicU64| c.load(Ordering::Relaxed);
		BrokerStats {
			locks: load(&self.stats.locks),
			unlocks: load(&self.stats.unlocks),
			handoffs: load(&self.stats.handoffs),
			suspensions: load(&self.stats.suspensions),
			timeouts: load(&self.stats.timeouts),
			alloc_failures: load(&self.stats.alloc_failures),
		}
	}

	/// One-line registry dump for the pager's debug console.
	pub fn summary(&self) -> String {
		self.registry.lock().summary()
	}
}
