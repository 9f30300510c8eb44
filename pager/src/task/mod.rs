// =============================================================================
// MinimalOS NextGen - Pager Task Interface
// =============================================================================
//
// The pager does not own thread control blocks; the kernel does. This module
// only describes what the mutex broker needs from the scheduler.
//
//   thread.rs - Thread / Scheduler traits + the std-hosted scheduler
// =============================================================================

pub mod thread;
