// =============================================================================
// MinimalOS NextGen - Pager: Contended-Mutex Broker
// =============================================================================
//
// Userspace mutexes are a single atomic word. The fast path never leaves the
// task; only when it contends does a thread trap into the pager with
// `sys_mutex_control(addr, op)`. The pager then rendezvouses lockers with
// unlockers:
//
//   trap ──► syscall   (validate op + range, translate virt → phys)
//        ──► mutex     (MutexBroker: lock / unlock handshake)
//        ──► registry  (one MutexQueue per contended physical word)
//        ──► waitqueue (prepare under the control lock, suspend after)
//
// The core builds without std. The default `std` feature adds a scheduler
// backed by host threads so the broker can be exercised end to end.
//
// =============================================================================

#![cfg_attr(not(feature = "std"), no_std)]

extern crate alloc;

pub mod config;
pub mod error;
pub mod memory;
pub mod mutex;
pub mod sync;
pub mod syscall;
pub mod task;

pub use config::BrokerConfig;
pub use error::MutexError;
pub use memory::address::{PhysAddr, VirtAddr};
pub use memory::vmm::{AddressSpace, PageMap, PageTableFlags};
pub use mutex::{BrokerStats, MutexBroker, QueueDepth};
pub use task::thread::{Scheduler, Thread, Tid};

#[cfg(feature = "std")]
pub use task::thread::{HostScheduler, HostThread};
