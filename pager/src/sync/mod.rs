// =============================================================================
// MinimalOS NextGen - Pager Synchronization Primitives
// =============================================================================
//
// The registry itself is guarded by a `spin::Mutex` (the control lock). What
// lives here is the thing that lets a thread sleep on a condition without
// holding that lock:
//
//   waitqueue.rs - prepare-under-lock / commit-after-release wait queues
//
// LOCK RULE: `WaitQueue` methods other than `PreparedWait::commit*` are only
// ever called with the control lock held. `commit*` is only ever called with
// it released.
// =============================================================================

pub mod waitqueue;
