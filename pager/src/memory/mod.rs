// =============================================================================
// MinimalOS NextGen - Pager Memory Views
// =============================================================================
//
//   address.rs - PhysAddr / VirtAddr newtypes (PhysAddr is the mutex key)
//   vmm.rs     - AddressSpace translation + the pager's shadow PageMap
// =============================================================================

pub mod address;
pub mod vmm;
