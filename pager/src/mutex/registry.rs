//! Registry of currently contended mutexes.
//!
//! One `MutexQueue` per physical mutex word that has at least one thread
//! parked on it. Every method here assumes the caller holds the broker's
//! control lock; the registry does no locking of its own.
//!
//! **Invariants:**
//! - At most one entry per key.
//! - A live entry has sleepers on exactly one of its two queues.
//! - An entry is only deleted after it was removed and both of its queues
//!   drained. Breaking either rule would drop a parked thread on the floor,
//!   so it is a `BUG:` panic, never an error return.

use alloc::string::String;
use core::fmt::Write;
use hashbrown::HashMap;

use crate::error::MutexError;
use crate::memory::address::PhysAddr;
use crate::sync::waitqueue::WaitQueue;
use crate::task::thread::Thread;

// ── Entry ───────────────────────────────────────────────────────

/// Per-contended-mutex record.
pub struct MutexQueue<T> {
	/// Physical address of the mutex word.
	key: PhysAddr,
	/// Lockers parked until an unlocker hands the mutex over.
	pub waiters: WaitQueue<T>,
	/// Unlockers parked until a locker arrives to take the handoff.
	pub wakers: WaitQueue<T>,
}

impl<T: Thread> MutexQueue<T> {
	fn new(key: PhysAddr) -> Self {
		Self {
			key,
			waiters: WaitQueue::new(),
			wakers: WaitQueue::new(),
		}
	}

	/// The physical key this entry tracks.
	#[inline]
	pub fn key(&self) -> PhysAddr {
		self.key
	}

	/// Returns `true` when neither queue holds a sleeper.
	#[inline]
	pub fn is_idle(&self) -> bool {
		self.waiters.is_empty() && self.wakers.is_empty()
	}
}

// ── Registry ────────────────────────────────────────────────────

/// The pager-wide table of contended mutexes.
pub struct MutexRegistry<T> {
	entries: HashMap<PhysAddr, MutexQueue<T>>,
	/// Number of linked entries.
	count: usize,
	/// Quota on `count`; `create` fails with `OutOfMemory` once reached.
	max_entries: Option<usize>,
}

impl<T: Thread> MutexRegistry<T> {
	/// Creates an empty registry with an optional entry quota.
	pub fn new(max_entries: Option<usize>) -> Self {
		Self {
			entries: HashMap::new(),
			count: 0,
			max_entries,
		}
	}

	/// Number of linked entries.
	#[inline]
	pub fn count(&self) -> usize {
		self.count
	}

	/// Looks up the entry for `key`.
	pub fn find(&mut self, key: PhysAddr) -> Option<&mut MutexQueue<T>> {
		self.entries.get_mut(&key)
	}

	/// Read-only lookup, for diagnostics.
	pub fn get(&self, key: PhysAddr) -> Option<&MutexQueue<T>> {
		self.entries.get(&key)
	}

	/// Allocates a fresh, unlinked entry with two empty queues.
	///
	/// Reserves the table slot up front so that the following `add` cannot
	/// allocate. On failure nothing observable changes.
	pub fn create(&mut self, key: PhysAddr) -> Result<MutexQueue<T>, MutexError> {
		if let Some(max) = self.max_entries {
			if self.count >= max {
				log::warn!("[mutex] registry quota ({}) exhausted, cannot track {}", max, key);
				return Err(MutexError::OutOfMemory);
			}
		}
		if self.entries.try_reserve(1).is_err() {
			log::warn!("[mutex] allocation failed for {}", key);
			return Err(MutexError::OutOfMemory);
		}
		Ok(MutexQueue::new(key))
	}

	/// Links `entry` into the registry.
	///
	/// # Panics
	/// If an entry for the same key is already linked.
	pub fn add(&mut self, entry: MutexQueue<T>) -> &mut MutexQueue<T> {
		let key = entry.key;
		assert!(
			!self.entries.contains_key(&key),
			"BUG: mutex queue for {} already linked",
			key
		);
		self.count += 1;
		self.entries.entry(key).or_insert(entry)
	}

	/// Unlinks the entry for `key` and hands it back for deletion.
	///
	/// # Panics
	/// If no entry for `key` is linked.
	pub fn remove(&mut self, key: PhysAddr) -> MutexQueue<T> {
		let Some(entry) = self.entries.remove(&key) else {
			panic!("BUG: removing unlinked mutex queue {}", key);
		};
		self.count -= 1;
		entry
	}

	/// Frees an unlinked entry.
	///
	/// # Panics
	/// If either queue still holds a sleeper.
	pub fn delete(&mut self, entry: MutexQueue<T>) {
		assert!(
			entry.waiters.is_empty(),
			"BUG: deleting mutex queue {} with {} waiters",
			entry.key,
			entry.waiters.len()
		);
		assert!(
			entry.wakers.is_empty(),
			"BUG: deleting mutex queue {} with {} wakers",
			entry.key,
			entry.wakers.len()
		);
		drop(entry);
	}

	/// Iterates over linked entries in no particular order.
	pub fn iter(&self) -> impl Iterator<Item = &MutexQueue<T>> {
		self.entries.values()
	}

	/// Debug: one-line dump, e.g. `[P:0x00001000 w2 k0] [P:0x00002000 w0 k1]`.
	pub fn summary(&self) -> String {
		let mut keys: alloc::vec::Vec<_> = self.entries.keys().copied().collect();
		keys.sort_unstable();
		let mut out = String::new();
		for key in keys {
			let entry = &self.entries[&key];
			if !out.is_empty() {
				out.push(' ');
			}
			let _ = write!(
				out,
				"[{} w{} k{}]",
				key,
				entry.waiters.len(),
				entry.wakers.len()
			);
		}
		out
	}
}
