//! Mutex-control trap boundary.
//!
//! The trap stub decodes raw registers and lands here with the caller's
//! address space. Everything userspace hands us is untrusted: the op code is
//! checked, the mutex word must lie wholly inside the legal user range, and
//! it must translate to a physical key. Only then is the broker touched, so
//! a rejected call never mutates the registry.

use crate::error::{errno, MutexError};
use crate::memory::address::{VirtAddr, MUTEX_WORD_SIZE};
use crate::memory::vmm::AddressSpace;
use crate::mutex::MutexBroker;
use crate::task::thread::Scheduler;

// ── Trap numbers ────────────────────────────────────────────────

/// Pager trap numbers.
pub mod nr {
	/// `sys_mutex_control(addr, op)`: contended lock/unlock slow path.
	pub const SYS_MUTEX_CONTROL: u64 = 26;
}

/// `op` value for the locker side.
pub const MUTEX_CONTROL_LOCK: u64 = 0;
/// `op` value for the unlocker side.
pub const MUTEX_CONTROL_UNLOCK: u64 = 1;

/// A decoded mutex-control operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MutexOp {
	Lock,
	Unlock,
}

impl TryFrom<u64> for MutexOp {
	type Error = MutexError;

	fn try_from(op: u64) -> Result<Self, Self::Error> {
		match op {
			MUTEX_CONTROL_LOCK => Ok(MutexOp::Lock),
			MUTEX_CONTROL_UNLOCK => Ok(MutexOp::Unlock),
			_ => Err(MutexError::InvalidArgument),
		}
	}
}

// ── Validation ──────────────────────────────────────────────────

/// Returns `true` if the whole mutex word at `addr` lies in
/// `[user_start, user_end)`.
#[inline]
fn validate_user_word(addr: u64, user_start: u64, user_end: u64) -> bool {
	if addr < user_start {
		return false;
	}
	match addr.checked_add(MUTEX_WORD_SIZE) {
		Some(end) => end <= user_end,
		None => false,
	}
}

// ── Handlers ────────────────────────────────────────────────────

/// Validates, translates and dispatches one mutex-control call.
pub fn mutex_control<S, A>(
	broker: &MutexBroker<S>,
	space: &A,
	addr: u64,
	op: u64,
) -> Result<(), MutexError>
where
	S: Scheduler,
	A: AddressSpace + ?Sized,
{
	let op = MutexOp::try_from(op).inspect_err(|_| {
		log::warn!("[syscall] mutex_control: bad op {:#x}", op);
	})?;

	let config = broker.config();
	if !validate_user_word(addr, config.user_start, config.user_end) {
		log::warn!("[syscall] mutex_control: address {:#x} out of range", addr);
		return Err(MutexError::InvalidArgument);
	}

	let virt = VirtAddr::new(addr);
	let Some(key) = space.translate(virt) else {
		log::warn!("[syscall] mutex_control: {} not mapped", virt);
		return Err(MutexError::InvalidArgument);
	};

	log::trace!("[syscall] mutex_control({}, {:?}) -> {}", virt, op, key);
	match op {
		MutexOp::Lock => broker.lock(key),
		MutexOp::Unlock => broker.unlock(key),
	}
}

/// `sys_mutex_control` ABI wrapper: `0` on success, `-errno` on failure.
pub fn sys_mutex_control<S, A>(broker: &MutexBroker<S>, space: &A, addr: u64, op: u64) -> i64
where
	S: Scheduler,
	A: AddressSpace + ?Sized,
{
	match mutex_control(broker, space, addr, op) {
		Ok(()) => 0,
		Err(e) => e.errno(),
	}
}

/// Pager trap dispatcher.
///
/// Returns the value for the caller's return register.
pub fn dispatch<S, A>(broker: &MutexBroker<S>, space: &A, nr: u64, a0: u64, a1: u64) -> i64
where
	S: Scheduler,
	A: AddressSpace + ?Sized,
{
	match nr {
		nr::SYS_MUTEX_CONTROL => sys_mutex_control(broker, space, a0, a1),
		_ => {
			log::warn!("[syscall] unknown syscall nr={}", nr);
			-errno::ENOSYS
		}
	}
}

#[cfg(all(test, feature = "std"))]
mod tests {
	use super::*;
	use crate::config::BrokerConfig;
	use crate::memory::address::PhysAddr;
	use crate::memory::vmm::{PageMap, PageTableFlags};
	use crate::task::thread::HostScheduler;
	use core::time::Duration;

	const WORD: u64 = 0x40_0010;

	fn space() -> PageMap {
		let mut map = PageMap::new();
		map.map(VirtAddr::new(0x40_0000), PhysAddr::new(0x9000), PageTableFlags::USER_DATA)
			.unwrap();
		map
	}

	fn broker(config: BrokerConfig) -> MutexBroker<HostScheduler> {
		MutexBroker::new(HostScheduler::new(), config)
	}

	#[test]
	fn op_decoding() {
		assert_eq!(MutexOp::try_from(0), Ok(MutexOp::Lock));
		assert_eq!(MutexOp::try_from(1), Ok(MutexOp::Unlock));
		assert_eq!(MutexOp::try_from(2), Err(MutexError::InvalidArgument));
	}

	#[test]
	fn word_must_fit_in_range() {
		assert!(validate_user_word(0x1000, 0x1000, 0x2000));
		assert!(validate_user_word(0x1FFC, 0x1000, 0x2000));
		assert!(!validate_user_word(0x1FFE, 0x1000, 0x2000));
		assert!(!validate_user_word(0x0FFC, 0x1000, 0x2000));
		assert!(!validate_user_word(u64::MAX - 1, 0, u64::MAX));
	}

	#[test]
	fn bad_op_is_einval() {
		let broker = broker(BrokerConfig::new());
		assert_eq!(sys_mutex_control(&broker, &space(), WORD, 7), -22);
		assert_eq!(broker.contended(), 0);
	}

	#[test]
	fn out_of_range_is_einval() {
		let broker = broker(BrokerConfig::new());
		let space = space();
		assert_eq!(sys_mutex_control(&broker, &space, 0, MUTEX_CONTROL_LOCK), -22);
		assert_eq!(
			sys_mutex_control(&broker, &space, 0xFFFF_8000_0000_0000, MUTEX_CONTROL_UNLOCK),
			-22
		);
		assert_eq!(broker.contended(), 0);
		assert_eq!(broker.stats().locks, 0);
	}

	#[test]
	fn unmapped_is_einval() {
		let broker = broker(BrokerConfig::new());
		assert_eq!(sys_mutex_control(&broker, &space(), 0x50_0000, MUTEX_CONTROL_LOCK), -22);
		assert_eq!(broker.contended(), 0);
	}

	#[test]
	fn quota_exhaustion_is_enomem() {
		let broker = broker(BrokerConfig::new().with_max_entries(0));
		assert_eq!(sys_mutex_control(&broker, &space(), WORD, MUTEX_CONTROL_LOCK), -12);
		assert_eq!(broker.contended(), 0);
		assert_eq!(broker.stats().alloc_failures, 1);
	}

	#[test]
	fn lone_locker_times_out() {
		let config = BrokerConfig::new().with_wait_timeout(Duration::from_millis(20));
		let broker = broker(config);
		assert_eq!(sys_mutex_control(&broker, &space(), WORD, MUTEX_CONTROL_LOCK), -110);
		assert_eq!(broker.contended(), 0);
		assert_eq!(broker.stats().timeouts, 1);
	}

	#[test]
	fn unknown_nr_is_enosys() {
		let broker = broker(BrokerConfig::new());
		assert_eq!(dispatch(&broker, &space(), 99, WORD, MUTEX_CONTROL_LOCK), -38);
	}
}
